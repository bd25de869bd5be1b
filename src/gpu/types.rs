//! GPU buffer types for the wgpu backend
//!
//! repr(C) so the layout matches the WGSL `NodeUniforms` struct.

use bytemuck::{Pod, Zeroable};

use crate::device::{Mat3Uniform, Vec2Uniform};

/// Default background clear color (RGBA)
pub const DEFAULT_CLEAR_COLOR: [f32; 4] = [0.1, 0.1, 0.15, 1.0];

/// Uniform block of the node shaders.
///
/// WGSL `mat3x3<f32>` columns are padded to 16 bytes.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct NodeUniforms {
    /// Canvas -> clip space (three padded columns)
    pub projection: [[f32; 4]; 3],
    /// Pan/zoom scale
    pub scale: [f32; 2],
    /// Pan/zoom translation
    pub translate: [f32; 2],
    /// Viewport size in pixels
    pub viewport: [f32; 2],
    /// Padding to the 16-byte struct alignment
    pub _padding: [f32; 2],
}

impl NodeUniforms {
    /// Store a column-major 3x3 matrix uniform
    pub fn set_mat3(&mut self, uniform: Mat3Uniform, value: [f32; 9]) {
        match uniform {
            Mat3Uniform::Projection => {
                for (column, chunk) in self.projection.iter_mut().zip(value.chunks(3)) {
                    column[..3].copy_from_slice(chunk);
                    column[3] = 0.0;
                }
            }
        }
    }

    /// Store a vec2 uniform
    pub fn set_vec2(&mut self, uniform: Vec2Uniform, value: [f32; 2]) {
        match uniform {
            Vec2Uniform::Scale => self.scale = value,
            Vec2Uniform::Translate => self.translate = value,
            Vec2Uniform::Viewport => self.viewport = value,
        }
    }
}

impl Default for NodeUniforms {
    fn default() -> Self {
        Self {
            projection: [
                [1.0, 0.0, 0.0, 0.0],
                [0.0, 1.0, 0.0, 0.0],
                [0.0, 0.0, 1.0, 0.0],
            ],
            scale: [1.0, 1.0],
            translate: [0.0, 0.0],
            viewport: [0.0, 0.0],
            _padding: [0.0, 0.0],
        }
    }
}

/// Offscreen render target for the headless device
#[derive(Debug, Clone)]
pub struct RenderTarget {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Background clear color (RGBA)
    pub clear_color: [f32; 4],
}

impl RenderTarget {
    /// Target of the given size with the default clear color
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            clear_color: DEFAULT_CLEAR_COLOR,
        }
    }
}
