//! Store configuration and config-file loading
//!
//! Configuration files are YAML (`.yaml`, `.yml`) or JSON (`.json`). Every
//! field is optional and falls back to [`StoreConfig::default`].

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::{StoreError, StoreResult};
use crate::schema::{Attribute, ELEMENT_SIZE};
use crate::shaders::{node_fragment_shader, node_vertex_shader};

/// Default canvas width in pixels
pub const DEFAULT_WIDTH: u32 = 800;

/// Default canvas height in pixels
pub const DEFAULT_HEIGHT: u32 = 600;

/// Default instance capacity
pub const DEFAULT_LIMIT: usize = 10_000;

/// Largest accepted instance capacity (instance counts are drawn as `u32`)
pub const MAX_LIMIT: usize = u32::MAX as usize;

/// Errors that can occur while loading a configuration file
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The file extension is not a known config format
    #[error("unsupported config format: {0}")]
    UnsupportedFormat(String),

    /// An I/O error occurred
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The file could not be parsed
    #[error("parse error: {0}")]
    Parse(String),
}

/// Shader source text handed to the device for compilation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShaderSources {
    pub vertex: String,
    pub fragment: String,
}

impl Default for ShaderSources {
    fn default() -> Self {
        Self {
            vertex: node_vertex_shader(),
            fragment: node_fragment_shader(),
        }
    }
}

/// Construction parameters for an [`InstanceStore`](crate::store::InstanceStore)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Canvas width in pixels
    pub width: u32,
    /// Canvas height in pixels
    pub height: u32,
    /// Maximum number of node instances
    pub limit: usize,
    /// Node shaders
    pub shaders: ShaderSources,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            limit: DEFAULT_LIMIT,
            shaders: ShaderSources::default(),
        }
    }
}

impl StoreConfig {
    /// Default configuration with the given canvas size and limit
    pub fn new(width: u32, height: u32, limit: usize) -> Self {
        Self {
            width,
            height,
            limit,
            ..Self::default()
        }
    }

    /// Replace the shader sources
    pub fn with_shaders(mut self, vertex: impl Into<String>, fragment: impl Into<String>) -> Self {
        self.shaders = ShaderSources {
            vertex: vertex.into(),
            fragment: fragment.into(),
        };
        self
    }

    /// Load a configuration file, choosing the parser by extension
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        let text = std::fs::read_to_string(path)?;

        match ext.as_str() {
            "yaml" | "yml" => {
                serde_yaml::from_str(&text).map_err(|e| ConfigError::Parse(e.to_string()))
            }
            "json" => serde_json::from_str(&text).map_err(|e| ConfigError::Parse(e.to_string())),
            _ => Err(ConfigError::UnsupportedFormat(path.display().to_string())),
        }
    }

    /// Check that every construction parameter is positive and that the
    /// per-instance buffers for `limit` nodes are addressable
    pub fn validate(&self) -> StoreResult<()> {
        if self.width == 0 || self.height == 0 {
            return Err(StoreError::InvalidConfig(format!(
                "canvas must be non-empty, got {}x{}",
                self.width, self.height
            )));
        }
        if self.limit == 0 {
            return Err(StoreError::InvalidConfig(
                "limit must be at least 1".to_string(),
            ));
        }
        if self.limit > MAX_LIMIT {
            return Err(StoreError::InvalidConfig(format!(
                "limit {} exceeds the maximum of {} instances",
                self.limit, MAX_LIMIT
            )));
        }
        for attribute in Attribute::INSTANCED {
            let descriptor = attribute.descriptor();
            let bytes = descriptor
                .backing_len(self.limit)
                .and_then(|len| len.checked_mul(ELEMENT_SIZE));
            if bytes.is_none() {
                return Err(StoreError::InvalidConfig(format!(
                    "{} buffer for limit {} does not fit in memory",
                    descriptor.name, self.limit
                )));
            }
        }
        Ok(())
    }
}
