//! Headless wgpu backend
//!
//! Implements [`Device`](crate::device::Device) on top of wgpu, rendering
//! into an offscreen texture that can be read back with
//! [`WgpuDevice::read_pixels`].
//!
//! # Example
//!
//! ```rust,ignore
//! use nodestream::gpu::{RenderTarget, WgpuDevice};
//! use nodestream::{InstanceStore, NodeRecord, StoreConfig};
//!
//! let device = WgpuDevice::headless(RenderTarget::new(800, 600))?;
//! let mut store = InstanceStore::initialize(device, StoreConfig::new(800, 600, 10_000))?;
//!
//! store.append(&[NodeRecord::new(400.0, 300.0).with_radius(20.0)])?;
//! store.draw();
//!
//! let rgba = store.device().read_pixels()?;
//! ```

mod device;
mod types;

pub use device::{WgpuDevice, create_render_device};
pub use types::{DEFAULT_CLEAR_COLOR, NodeUniforms, RenderTarget};
