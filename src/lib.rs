//! nodestream - instanced GPU rendering backend for streaming graph nodes.
//!
//! Nodes are appended in batches to an [`InstanceStore`], which keeps one
//! buffer per vertex attribute, uploads only the newly written range of each
//! buffer, and renders every stored node as a circle with a single instanced
//! draw call.

pub mod config;
pub mod device;
pub mod error;
pub mod generator;
pub mod record;
pub mod schema;
pub mod shaders;
pub mod store;
pub mod transform;

#[cfg(feature = "gpu")]
pub mod gpu;

pub use config::{ShaderSources, StoreConfig};
pub use error::{StoreError, StoreResult};
pub use record::{NodeRecord, NodeSource};
pub use schema::{Attribute, AttributeDescriptor, build_schema};
pub use store::InstanceStore;
