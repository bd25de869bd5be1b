//! Graphics device capability
//!
//! The [`InstanceStore`](crate::store::InstanceStore) talks to the GPU only
//! through the [`Device`] trait. Resources are referred to by opaque handles;
//! the device keeps the actual objects.
//!
//! Two implementations ship with the crate:
//!
//! - [`RecordingDevice`]: in-memory mirror of every buffer plus a call log
//! - `WgpuDevice` (feature `gpu`): headless wgpu rendering to a texture

mod recording;

pub use recording::{DeviceCall, RecordingDevice};

use thiserror::Error;

use crate::schema::AttributeDescriptor;

/// Errors reported by a graphics device
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DeviceError {
    /// Shader program failed to compile or link
    #[error("program compilation failed: {0}")]
    ProgramCompilation(String),

    /// A GPU buffer could not be created
    #[error("buffer creation failed: {0}")]
    BufferCreation(String),

    /// No suitable GPU adapter was found
    #[error("no suitable GPU adapter available")]
    AdapterUnavailable,

    /// The adapter refused to create a device
    #[error("device request failed: {0}")]
    DeviceRequest(String),

    /// Rendered pixels could not be read back
    #[error("readback failed: {0}")]
    Readback(String),
}

/// Opaque handle to a compiled shader program
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProgramHandle(pub(crate) u32);

/// Opaque handle to a GPU buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferHandle(pub(crate) u32);

impl ProgramHandle {
    /// Raw id assigned by the device
    pub fn id(self) -> u32 {
        self.0
    }
}

impl BufferHandle {
    /// Raw id assigned by the device
    pub fn id(self) -> u32 {
        self.0
    }
}

/// Primitive topology for instanced draws
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Topology {
    TriangleStrip,
}

/// 3x3 matrix uniforms
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mat3Uniform {
    /// Canvas pixels to clip space
    Projection,
}

/// 2-component vector uniforms
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Vec2Uniform {
    /// Pan/zoom scale
    Scale,
    /// Pan/zoom translation
    Translate,
    /// Viewport size in pixels
    Viewport,
}

/// The narrow graphics interface used by the instance store.
///
/// Calls follow the bind-then-configure model of classic vertex attribute
/// APIs: [`Device::set_attribute_pointer`] captures whatever buffer was last
/// passed to [`Device::bind_buffer`].
pub trait Device {
    /// Compile a program from vertex and fragment sources for the given attributes
    fn compile_program(
        &mut self,
        vertex_source: &str,
        fragment_source: &str,
        attributes: &[AttributeDescriptor],
    ) -> Result<ProgramHandle, DeviceError>;

    /// Create a GPU buffer initialized with `data`
    fn create_buffer(&mut self, data: &[f32]) -> Result<BufferHandle, DeviceError>;

    /// Overwrite part of a buffer, starting at `byte_offset`, with `data`
    fn update_buffer(&mut self, buffer: BufferHandle, byte_offset: usize, data: &[f32]);

    /// Make `program` current for uniforms and draws
    fn use_program(&mut self, program: ProgramHandle);

    /// Set a column-major 3x3 matrix uniform
    fn set_uniform_mat3(&mut self, program: ProgramHandle, uniform: Mat3Uniform, value: [f32; 9]);

    /// Set a vec2 uniform
    fn set_uniform_vec2(&mut self, program: ProgramHandle, uniform: Vec2Uniform, value: [f32; 2]);

    /// Enable the attribute at `index`
    fn enable_attribute(&mut self, index: u32);

    /// Bind `buffer` as the current vertex buffer
    fn bind_buffer(&mut self, buffer: BufferHandle);

    /// Point attribute `index` at the currently bound buffer
    fn set_attribute_pointer(
        &mut self,
        index: u32,
        component_count: usize,
        stride: usize,
        byte_offset: usize,
    );

    /// Set how often attribute `index` advances (0 = per vertex, 1 = per instance)
    fn set_attribute_divisor(&mut self, index: u32, divisor: u32);

    /// Draw `vertex_count` vertices, `instance_count` times
    fn draw_instanced(&mut self, topology: Topology, vertex_count: u32, instance_count: u32);
}
