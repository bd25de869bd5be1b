//! In-memory device that records every call
//!
//! Keeps a CPU mirror of each buffer so the effect of partial updates can be
//! inspected, and logs every call in order so binding sequences can be
//! compared between frames. Upload and draw totals are kept as running
//! counters, so long streams can turn the log off and still report them.

use tracing::error;

use super::{
    BufferHandle, Device, DeviceError, Mat3Uniform, ProgramHandle, Topology, Vec2Uniform,
};
use crate::schema::{AttributeDescriptor, ELEMENT_SIZE};

/// One recorded device call
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceCall {
    CompileProgram {
        program: ProgramHandle,
        attributes: Vec<&'static str>,
    },
    CreateBuffer {
        buffer: BufferHandle,
        len: usize,
    },
    UpdateBuffer {
        buffer: BufferHandle,
        byte_offset: usize,
        len: usize,
    },
    UseProgram(ProgramHandle),
    UniformMat3 {
        uniform: Mat3Uniform,
        value: [f32; 9],
    },
    UniformVec2 {
        uniform: Vec2Uniform,
        value: [f32; 2],
    },
    EnableAttribute(u32),
    BindBuffer(BufferHandle),
    AttributePointer {
        index: u32,
        buffer: Option<BufferHandle>,
        component_count: usize,
        stride: usize,
        byte_offset: usize,
    },
    AttributeDivisor {
        index: u32,
        divisor: u32,
    },
    DrawInstanced {
        topology: Topology,
        vertex_count: u32,
        instance_count: u32,
    },
}

/// A [`Device`] that never touches a GPU.
///
/// # Example
///
/// ```
/// use nodestream::device::{Device, RecordingDevice};
///
/// let mut device = RecordingDevice::new();
/// let buffer = device.create_buffer(&[0.0; 4]).unwrap();
/// device.update_buffer(buffer, 8, &[1.0, 2.0]);
///
/// assert_eq!(device.buffer_contents(buffer), Some(&[0.0, 0.0, 1.0, 2.0][..]));
/// assert_eq!(device.bytes_uploaded(), 8);
/// ```
#[derive(Debug)]
pub struct RecordingDevice {
    calls: Vec<DeviceCall>,
    log_calls: bool,
    uploads: usize,
    bytes_uploaded: usize,
    draws: usize,
    buffers: Vec<Vec<f32>>,
    programs: u32,
    bound_buffer: Option<BufferHandle>,
    compile_failure: Option<String>,
    buffer_budget: Option<usize>,
}

impl Default for RecordingDevice {
    fn default() -> Self {
        Self {
            calls: Vec::new(),
            log_calls: true,
            uploads: 0,
            bytes_uploaded: 0,
            draws: 0,
            buffers: Vec::new(),
            programs: 0,
            bound_buffer: None,
            compile_failure: None,
            buffer_budget: None,
        }
    }
}

impl RecordingDevice {
    /// Create an empty device
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep buffer mirrors and counters but stop logging individual calls
    pub fn without_call_log(mut self) -> Self {
        self.log_calls = false;
        self
    }

    /// Make every program compilation fail with `message`
    pub fn with_compile_failure(mut self, message: impl Into<String>) -> Self {
        self.compile_failure = Some(message.into());
        self
    }

    /// Allow only `count` buffers to be created; later requests fail
    pub fn with_buffer_budget(mut self, count: usize) -> Self {
        self.buffer_budget = Some(count);
        self
    }

    /// Every call made so far, in order
    pub fn calls(&self) -> &[DeviceCall] {
        &self.calls
    }

    /// Drain the call log and reset the upload and draw counters
    pub fn take_calls(&mut self) -> Vec<DeviceCall> {
        self.uploads = 0;
        self.bytes_uploaded = 0;
        self.draws = 0;
        std::mem::take(&mut self.calls)
    }

    fn record(&mut self, call: DeviceCall) {
        if self.log_calls {
            self.calls.push(call);
        }
    }

    /// Current contents of a buffer
    pub fn buffer_contents(&self, buffer: BufferHandle) -> Option<&[f32]> {
        self.buffers.get(buffer.0 as usize).map(Vec::as_slice)
    }

    /// Number of buffers created
    pub fn buffer_count(&self) -> usize {
        self.buffers.len()
    }

    /// Number of sub-range uploads recorded
    pub fn uploads(&self) -> usize {
        self.uploads
    }

    /// Total bytes sent through sub-range uploads
    pub fn bytes_uploaded(&self) -> usize {
        self.bytes_uploaded
    }

    /// Number of instanced draws recorded
    pub fn draws(&self) -> usize {
        self.draws
    }
}

impl Device for RecordingDevice {
    fn compile_program(
        &mut self,
        _vertex_source: &str,
        _fragment_source: &str,
        attributes: &[AttributeDescriptor],
    ) -> Result<ProgramHandle, DeviceError> {
        if let Some(message) = &self.compile_failure {
            return Err(DeviceError::ProgramCompilation(message.clone()));
        }

        let program = ProgramHandle(self.programs);
        self.programs += 1;
        self.record(DeviceCall::CompileProgram {
            program,
            attributes: attributes.iter().map(|a| a.name).collect(),
        });
        Ok(program)
    }

    fn create_buffer(&mut self, data: &[f32]) -> Result<BufferHandle, DeviceError> {
        if self
            .buffer_budget
            .is_some_and(|budget| self.buffers.len() >= budget)
        {
            return Err(DeviceError::BufferCreation(format!(
                "buffer budget of {} exhausted",
                self.buffers.len()
            )));
        }

        let buffer = BufferHandle(self.buffers.len() as u32);
        self.buffers.push(data.to_vec());
        self.record(DeviceCall::CreateBuffer {
            buffer,
            len: data.len(),
        });
        Ok(buffer)
    }

    fn update_buffer(&mut self, buffer: BufferHandle, byte_offset: usize, data: &[f32]) {
        self.uploads += 1;
        self.bytes_uploaded += data.len() * ELEMENT_SIZE;
        self.record(DeviceCall::UpdateBuffer {
            buffer,
            byte_offset,
            len: data.len(),
        });

        let Some(contents) = self.buffers.get_mut(buffer.0 as usize) else {
            error!(buffer = buffer.0, "update of unknown buffer");
            return;
        };
        let start = byte_offset / ELEMENT_SIZE;
        let end = start + data.len();
        if byte_offset % ELEMENT_SIZE != 0 || end > contents.len() {
            error!(
                buffer = buffer.0,
                byte_offset,
                len = data.len(),
                capacity = contents.len(),
                "buffer update out of range"
            );
            return;
        }
        contents[start..end].copy_from_slice(data);
    }

    fn use_program(&mut self, program: ProgramHandle) {
        self.record(DeviceCall::UseProgram(program));
    }

    fn set_uniform_mat3(&mut self, _program: ProgramHandle, uniform: Mat3Uniform, value: [f32; 9]) {
        self.record(DeviceCall::UniformMat3 { uniform, value });
    }

    fn set_uniform_vec2(&mut self, _program: ProgramHandle, uniform: Vec2Uniform, value: [f32; 2]) {
        self.record(DeviceCall::UniformVec2 { uniform, value });
    }

    fn enable_attribute(&mut self, index: u32) {
        self.record(DeviceCall::EnableAttribute(index));
    }

    fn bind_buffer(&mut self, buffer: BufferHandle) {
        self.bound_buffer = Some(buffer);
        self.record(DeviceCall::BindBuffer(buffer));
    }

    fn set_attribute_pointer(
        &mut self,
        index: u32,
        component_count: usize,
        stride: usize,
        byte_offset: usize,
    ) {
        self.record(DeviceCall::AttributePointer {
            index,
            buffer: self.bound_buffer,
            component_count,
            stride,
            byte_offset,
        });
    }

    fn set_attribute_divisor(&mut self, index: u32, divisor: u32) {
        self.record(DeviceCall::AttributeDivisor { index, divisor });
    }

    fn draw_instanced(&mut self, topology: Topology, vertex_count: u32, instance_count: u32) {
        self.draws += 1;
        self.record(DeviceCall::DrawInstanced {
            topology,
            vertex_count,
            instance_count,
        });
    }
}
