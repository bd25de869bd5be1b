//! Headless wgpu implementation of [`Device`]
//!
//! Each attribute becomes its own vertex buffer slot. Because wgpu fixes the
//! step mode of a slot when the pipeline is built, the attribute list given to
//! [`Device::compile_program`] decides it (per-vertex for the built-in
//! template, per-instance otherwise); divisors set later are checked against
//! it at draw time.

use std::sync::Arc;

use tracing::{debug, warn};
use wgpu::util::DeviceExt;

use crate::device::{
    BufferHandle, Device, DeviceError, Mat3Uniform, ProgramHandle, Topology, Vec2Uniform,
};
use crate::gpu::types::{NodeUniforms, RenderTarget};
use crate::schema::{AttributeDescriptor, ELEMENT_SIZE};
use crate::shaders::{FRAGMENT_ENTRY_POINT, VERTEX_ENTRY_POINT};

const COLOR_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8UnormSrgb;

/// A compiled node program with its uniform state
struct Program {
    pipeline: wgpu::RenderPipeline,
    uniform_buffer: wgpu::Buffer,
    bind_group: wgpu::BindGroup,
    uniforms: NodeUniforms,
    /// Expected divisor per vertex buffer slot
    divisors: Vec<u32>,
}

/// Attribute binding state captured by `set_attribute_pointer`
#[derive(Debug, Clone, Copy, Default)]
struct Slot {
    enabled: bool,
    buffer: Option<BufferHandle>,
    divisor: u32,
}

/// wgpu device rendering into an offscreen texture.
pub struct WgpuDevice {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    target: RenderTarget,
    color_texture: wgpu::Texture,
    staging_buffer: wgpu::Buffer,

    buffers: Vec<wgpu::Buffer>,
    programs: Vec<Program>,
    current_program: Option<ProgramHandle>,
    bound_buffer: Option<BufferHandle>,
    slots: Vec<Slot>,
}

impl WgpuDevice {
    /// Create a headless device with its own adapter.
    ///
    /// # Errors
    ///
    /// [`DeviceError::AdapterUnavailable`] when no GPU (or fallback) adapter
    /// exists, [`DeviceError::DeviceRequest`] when the adapter refuses.
    pub fn headless(target: RenderTarget) -> Result<Self, DeviceError> {
        let (device, queue) = pollster::block_on(create_render_device())?;
        Ok(Self::with_device(Arc::new(device), Arc::new(queue), target))
    }

    /// Wrap an existing device and queue
    pub fn with_device(
        device: Arc<wgpu::Device>,
        queue: Arc<wgpu::Queue>,
        target: RenderTarget,
    ) -> Self {
        let color_texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Node Color Texture"),
            size: wgpu::Extent3d {
                width: target.width,
                height: target.height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: COLOR_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });

        // Row pitch must be aligned for texture -> buffer copies
        let staging_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Node Staging Buffer"),
            size: (padded_bytes_per_row(target.width) * target.height) as u64,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        Self {
            device,
            queue,
            target,
            color_texture,
            staging_buffer,
            buffers: Vec::new(),
            programs: Vec::new(),
            current_program: None,
            bound_buffer: None,
            slots: Vec::new(),
        }
    }

    /// The offscreen target description
    pub fn target(&self) -> &RenderTarget {
        &self.target
    }

    /// The wgpu device
    pub fn device(&self) -> &Arc<wgpu::Device> {
        &self.device
    }

    /// The wgpu queue
    pub fn queue(&self) -> &Arc<wgpu::Queue> {
        &self.queue
    }

    fn slot_mut(&mut self, index: u32) -> &mut Slot {
        let index = index as usize;
        if self.slots.len() <= index {
            self.slots.resize(index + 1, Slot::default());
        }
        &mut self.slots[index]
    }

    fn write_uniforms(&self, program: ProgramHandle) {
        if let Some(program) = self.programs.get(program.0 as usize) {
            self.queue.write_buffer(
                &program.uniform_buffer,
                0,
                bytemuck::bytes_of(&program.uniforms),
            );
        }
    }

    /// Read back the last rendered frame as tightly packed RGBA8 rows.
    ///
    /// Blocks until the GPU has finished all submitted work.
    pub fn read_pixels(&self) -> Result<Vec<u8>, DeviceError> {
        let unpadded_bytes_per_row = self.target.width * 4;
        let padded = padded_bytes_per_row(self.target.width);

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Node Readback Encoder"),
            });
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: &self.color_texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &self.staging_buffer,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded),
                    rows_per_image: Some(self.target.height),
                },
            },
            wgpu::Extent3d {
                width: self.target.width,
                height: self.target.height,
                depth_or_array_layers: 1,
            },
        );
        self.queue.submit(std::iter::once(encoder.finish()));

        let slice = self.staging_buffer.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        let _ = self.device.poll(wgpu::Maintain::Wait);
        rx.recv()
            .map_err(|e| DeviceError::Readback(e.to_string()))?
            .map_err(|e| DeviceError::Readback(e.to_string()))?;

        let data = slice.get_mapped_range();
        let mut pixels =
            Vec::with_capacity((unpadded_bytes_per_row * self.target.height) as usize);
        for y in 0..self.target.height {
            let start = (y * padded) as usize;
            pixels.extend_from_slice(&data[start..start + unpadded_bytes_per_row as usize]);
        }
        drop(data);
        self.staging_buffer.unmap();

        Ok(pixels)
    }

    fn render_pass_clear(&self, encoder: &mut wgpu::CommandEncoder, view: &wgpu::TextureView) {
        let [r, g, b, a] = self.target.clear_color;
        let _ = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("Node Clear Pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(wgpu::Color {
                        r: r as f64,
                        g: g as f64,
                        b: b as f64,
                        a: a as f64,
                    }),
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });
    }

    /// Vertex buffers for every slot of `program`, or `None` if one is unbound
    fn vertex_buffers(&self, program: &Program) -> Option<Vec<&wgpu::Buffer>> {
        let mut buffers = Vec::with_capacity(program.divisors.len());
        for (index, expected) in program.divisors.iter().enumerate() {
            let slot = self.slots.get(index).copied().unwrap_or_default();
            let Some(handle) = slot.buffer.filter(|_| slot.enabled) else {
                warn!(index, "attribute not enabled or bound, skipping draw");
                return None;
            };
            if slot.divisor != *expected {
                warn!(
                    index,
                    divisor = slot.divisor,
                    expected,
                    "divisor differs from pipeline step mode"
                );
            }
            buffers.push(self.buffers.get(handle.0 as usize)?);
        }
        Some(buffers)
    }
}

impl Device for WgpuDevice {
    fn compile_program(
        &mut self,
        vertex_source: &str,
        fragment_source: &str,
        attributes: &[AttributeDescriptor],
    ) -> Result<ProgramHandle, DeviceError> {
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);

        let vertex_module = self
            .device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some("Node Vertex Shader"),
                source: wgpu::ShaderSource::Wgsl(vertex_source.into()),
            });
        let fragment_module = self
            .device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some("Node Fragment Shader"),
                source: wgpu::ShaderSource::Wgsl(fragment_source.into()),
            });

        let uniform_layout =
            self.device
                .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                    label: Some("Node Uniform Bind Group Layout"),
                    entries: &[wgpu::BindGroupLayoutEntry {
                        binding: 0,
                        visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
                        ty: wgpu::BindingType::Buffer {
                            ty: wgpu::BufferBindingType::Uniform,
                            has_dynamic_offset: false,
                            min_binding_size: None,
                        },
                        count: None,
                    }],
                });
        let pipeline_layout = self
            .device
            .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("Node Pipeline Layout"),
                bind_group_layouts: &[&uniform_layout],
                push_constant_ranges: &[],
            });

        // One slot per attribute, each holding a single tightly packed attribute
        let vertex_attributes: Vec<[wgpu::VertexAttribute; 1]> = attributes
            .iter()
            .map(|descriptor| {
                [wgpu::VertexAttribute {
                    format: vertex_format(descriptor.component_count),
                    offset: 0,
                    shader_location: descriptor.binding_index,
                }]
            })
            .collect();
        let buffer_layouts: Vec<wgpu::VertexBufferLayout> = attributes
            .iter()
            .zip(&vertex_attributes)
            .map(|(descriptor, attribute)| wgpu::VertexBufferLayout {
                array_stride: descriptor.stride() as u64,
                step_mode: if descriptor.is_built_in {
                    wgpu::VertexStepMode::Vertex
                } else {
                    wgpu::VertexStepMode::Instance
                },
                attributes: attribute,
            })
            .collect();

        let pipeline = self
            .device
            .create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some("Node Render Pipeline"),
                layout: Some(&pipeline_layout),
                vertex: wgpu::VertexState {
                    module: &vertex_module,
                    entry_point: Some(VERTEX_ENTRY_POINT),
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                    buffers: &buffer_layouts,
                },
                fragment: Some(wgpu::FragmentState {
                    module: &fragment_module,
                    entry_point: Some(FRAGMENT_ENTRY_POINT),
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                    targets: &[Some(wgpu::ColorTargetState {
                        format: COLOR_FORMAT,
                        blend: Some(wgpu::BlendState::ALPHA_BLENDING),
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                }),
                primitive: wgpu::PrimitiveState {
                    topology: wgpu::PrimitiveTopology::TriangleStrip,
                    strip_index_format: None,
                    front_face: wgpu::FrontFace::Ccw,
                    cull_mode: None,
                    unclipped_depth: false,
                    polygon_mode: wgpu::PolygonMode::Fill,
                    conservative: false,
                },
                depth_stencil: None,
                multisample: wgpu::MultisampleState::default(),
                multiview: None,
                cache: None,
            });

        if let Some(error) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(DeviceError::ProgramCompilation(error.to_string()));
        }

        let uniforms = NodeUniforms::default();
        let uniform_buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("Node Uniform Buffer"),
                contents: bytemuck::bytes_of(&uniforms),
                usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            });
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Node Uniform Bind Group"),
            layout: &uniform_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: uniform_buffer.as_entire_binding(),
            }],
        });

        let handle = ProgramHandle(self.programs.len() as u32);
        self.programs.push(Program {
            pipeline,
            uniform_buffer,
            bind_group,
            uniforms,
            divisors: attributes.iter().map(AttributeDescriptor::divisor).collect(),
        });
        debug!(program = handle.0, attributes = attributes.len(), "compiled program");
        Ok(handle)
    }

    fn create_buffer(&mut self, data: &[f32]) -> Result<BufferHandle, DeviceError> {
        if data.is_empty() {
            return Err(DeviceError::BufferCreation(
                "vertex buffers must not be empty".to_string(),
            ));
        }

        check_buffer_size(data.len(), self.device.limits().max_buffer_size)?;

        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("Node Attribute Buffer"),
                contents: bytemuck::cast_slice(data),
                usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
            });
        let validation = pollster::block_on(self.device.pop_error_scope());
        let out_of_memory = pollster::block_on(self.device.pop_error_scope());
        if let Some(error) = validation.or(out_of_memory) {
            return Err(DeviceError::BufferCreation(error.to_string()));
        }

        let handle = BufferHandle(self.buffers.len() as u32);
        self.buffers.push(buffer);
        Ok(handle)
    }

    fn update_buffer(&mut self, buffer: BufferHandle, byte_offset: usize, data: &[f32]) {
        match self.buffers.get(buffer.0 as usize) {
            Some(target) => {
                self.queue
                    .write_buffer(target, byte_offset as u64, bytemuck::cast_slice(data));
            }
            None => warn!(buffer = buffer.0, "update of unknown buffer"),
        }
    }

    fn use_program(&mut self, program: ProgramHandle) {
        self.current_program = Some(program);
    }

    fn set_uniform_mat3(&mut self, program: ProgramHandle, uniform: Mat3Uniform, value: [f32; 9]) {
        if let Some(state) = self.programs.get_mut(program.0 as usize) {
            state.uniforms.set_mat3(uniform, value);
            self.write_uniforms(program);
        }
    }

    fn set_uniform_vec2(&mut self, program: ProgramHandle, uniform: Vec2Uniform, value: [f32; 2]) {
        if let Some(state) = self.programs.get_mut(program.0 as usize) {
            state.uniforms.set_vec2(uniform, value);
            self.write_uniforms(program);
        }
    }

    fn enable_attribute(&mut self, index: u32) {
        self.slot_mut(index).enabled = true;
    }

    fn bind_buffer(&mut self, buffer: BufferHandle) {
        self.bound_buffer = Some(buffer);
    }

    fn set_attribute_pointer(
        &mut self,
        index: u32,
        _component_count: usize,
        _stride: usize,
        byte_offset: usize,
    ) {
        // Layout is fixed by the pipeline; only the buffer binding is live state
        if byte_offset != 0 {
            warn!(index, byte_offset, "non-zero attribute offsets are not supported");
        }
        let bound = self.bound_buffer;
        self.slot_mut(index).buffer = bound;
    }

    fn set_attribute_divisor(&mut self, index: u32, divisor: u32) {
        self.slot_mut(index).divisor = divisor;
    }

    fn draw_instanced(&mut self, topology: Topology, vertex_count: u32, instance_count: u32) {
        // every pipeline is built as a strip
        let Topology::TriangleStrip = topology;
        let view = self
            .color_texture
            .create_view(&wgpu::TextureViewDescriptor::default());
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Node Render Encoder"),
            });

        let program = self
            .current_program
            .and_then(|handle| self.programs.get(handle.0 as usize))
            .filter(|_| instance_count > 0);
        let buffers = program.and_then(|program| self.vertex_buffers(program));

        match (program, buffers) {
            (Some(program), Some(buffers)) => {
                let [r, g, b, a] = self.target.clear_color;
                let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                    label: Some("Node Render Pass"),
                    color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                        view: &view,
                        resolve_target: None,
                        ops: wgpu::Operations {
                            load: wgpu::LoadOp::Clear(wgpu::Color {
                                r: r as f64,
                                g: g as f64,
                                b: b as f64,
                                a: a as f64,
                            }),
                            store: wgpu::StoreOp::Store,
                        },
                    })],
                    depth_stencil_attachment: None,
                    timestamp_writes: None,
                    occlusion_query_set: None,
                });
                render_pass.set_pipeline(&program.pipeline);
                render_pass.set_bind_group(0, &program.bind_group, &[]);
                for (slot, buffer) in buffers.into_iter().enumerate() {
                    render_pass.set_vertex_buffer(slot as u32, buffer.slice(..));
                }
                render_pass.draw(0..vertex_count, 0..instance_count);
            }
            // Nothing to draw: still present a cleared frame
            _ => self.render_pass_clear(&mut encoder, &view),
        }

        self.queue.submit(std::iter::once(encoder.finish()));
    }
}

/// Byte size of a `len`-float buffer, if the device can hold it
fn check_buffer_size(len: usize, max_buffer_size: u64) -> Result<u64, DeviceError> {
    let bytes = len
        .checked_mul(ELEMENT_SIZE)
        .and_then(|bytes| u64::try_from(bytes).ok())
        .filter(|bytes| *bytes <= max_buffer_size);
    bytes.ok_or_else(|| {
        DeviceError::BufferCreation(format!(
            "{} floats exceed the device buffer limit of {} bytes",
            len, max_buffer_size
        ))
    })
}

/// Vertex format for a float attribute with `component_count` components
fn vertex_format(component_count: usize) -> wgpu::VertexFormat {
    match component_count {
        1 => wgpu::VertexFormat::Float32,
        2 => wgpu::VertexFormat::Float32x2,
        3 => wgpu::VertexFormat::Float32x3,
        _ => wgpu::VertexFormat::Float32x4,
    }
}

fn padded_bytes_per_row(width: u32) -> u32 {
    let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
    (width * 4).div_ceil(align) * align
}

/// Create a GPU device and queue without a surface.
pub async fn create_render_device() -> Result<(wgpu::Device, wgpu::Queue), DeviceError> {
    let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
        backends: wgpu::Backends::all(),
        ..Default::default()
    });

    let adapter = instance
        .request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        })
        .await
        .ok_or(DeviceError::AdapterUnavailable)?;

    adapter
        .request_device(
            &wgpu::DeviceDescriptor {
                label: Some("Node Render Device"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::default(),
                memory_hints: wgpu::MemoryHints::default(),
            },
            None, // trace path
        )
        .await
        .map_err(|e| DeviceError::DeviceRequest(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use crate::record::NodeRecord;
    use crate::store::InstanceStore;

    // Tests return early on machines without any adapter
    fn test_device(width: u32, height: u32) -> Option<WgpuDevice> {
        WgpuDevice::headless(RenderTarget::new(width, height)).ok()
    }

    fn pixel(pixels: &[u8], width: u32, x: u32, y: u32) -> [u8; 4] {
        let i = ((y * width + x) * 4) as usize;
        [pixels[i], pixels[i + 1], pixels[i + 2], pixels[i + 3]]
    }

    #[test]
    fn test_vertex_format() {
        assert_eq!(vertex_format(1), wgpu::VertexFormat::Float32);
        assert_eq!(vertex_format(3), wgpu::VertexFormat::Float32x3);
        assert_eq!(vertex_format(4), wgpu::VertexFormat::Float32x4);
    }

    #[test]
    fn test_check_buffer_size() {
        let max = wgpu::Limits::default().max_buffer_size;
        assert_eq!(check_buffer_size(4, max), Ok(16));
        assert_eq!(check_buffer_size((max / 4) as usize, max), Ok(max));
        // color buffer of a store too large for one wgpu buffer
        assert!(matches!(
            check_buffer_size(4 * (max as usize / 16 + 1), max),
            Err(DeviceError::BufferCreation(_))
        ));
        assert!(check_buffer_size(usize::MAX, max).is_err());
    }

    #[test]
    fn test_padded_bytes_per_row() {
        assert_eq!(padded_bytes_per_row(64), 256);
        assert_eq!(padded_bytes_per_row(65), 512);
    }

    #[test]
    fn test_empty_frame_is_clear_color() {
        let Some(device) = test_device(64, 64) else {
            return;
        };
        let mut store = InstanceStore::initialize(device, StoreConfig::new(64, 64, 16)).unwrap();

        store.draw();

        let pixels = store.device().read_pixels().unwrap();
        assert_eq!(pixels.len(), 64 * 64 * 4);
        assert_eq!(pixels[3], 255);
    }

    #[test]
    fn test_node_is_rendered_at_its_position() {
        let Some(device) = test_device(64, 64) else {
            return;
        };
        let mut store = InstanceStore::initialize(device, StoreConfig::new(64, 64, 16)).unwrap();
        store
            .append(&[NodeRecord::new(16.0, 16.0)
                .with_radius(6.0)
                .with_fill(1.0, 0.0, 0.0, 1.0)
                .with_stroke(0.0, [0.0, 0.0, 0.0, 1.0])])
            .unwrap();

        store.draw();

        let pixels = store.device().read_pixels().unwrap();
        let center = pixel(&pixels, 64, 16, 16);
        let far = pixel(&pixels, 64, 48, 48);
        assert!(center[0] > 200 && center[1] < 50, "center {:?}", center);
        assert!(far[0] < 100, "background {:?}", far);
    }

    #[test]
    fn test_transform_moves_nodes() {
        let Some(device) = test_device(64, 64) else {
            return;
        };
        let mut store = InstanceStore::initialize(device, StoreConfig::new(64, 64, 16)).unwrap();
        store
            .append(&[NodeRecord::new(16.0, 16.0)
                .with_radius(6.0)
                .with_fill(0.0, 1.0, 0.0, 1.0)])
            .unwrap();

        store.set_transform(1.0, 32.0, 32.0);
        store.draw();

        let pixels = store.device().read_pixels().unwrap();
        assert!(pixel(&pixels, 64, 48, 48)[1] > 200);
        assert!(pixel(&pixels, 64, 16, 16)[1] < 100);
    }

    #[test]
    fn test_invalid_shader_is_reported() {
        let Some(device) = test_device(16, 16) else {
            return;
        };
        let config = StoreConfig::new(16, 16, 4).with_shaders("not wgsl", "not wgsl");
        let result = InstanceStore::initialize(device, config);
        assert!(matches!(
            result,
            Err(crate::error::StoreError::DeviceInitialization(
                DeviceError::ProgramCompilation(_)
            ))
        ));
    }
}
