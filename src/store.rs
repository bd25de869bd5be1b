//! Append-only instance store
//!
//! Owns one backing array and one GPU buffer per vertex attribute. New nodes
//! are written at the end of each array and only the freshly written byte
//! range is uploaded, so already-committed instances are never re-sent.
//! [`InstanceStore::draw`] then renders every live node with one instanced
//! draw call.

use tracing::{debug, info, trace, warn};

use crate::config::StoreConfig;
use crate::device::{
    BufferHandle, Device, Mat3Uniform, ProgramHandle, Topology, Vec2Uniform,
};
use crate::error::{StoreError, StoreResult};
use crate::record::{NodeSource, validate};
use crate::schema::{
    Attribute, AttributeDescriptor, ELEMENT_SIZE, TEMPLATE_VERTEX_COUNT, TEMPLATE_VERTICES,
    build_schema,
};
use crate::transform::{Transform, projection};

/// Element offset of `instance_index` in an array of `component_count`-wide elements
#[inline]
pub const fn element_offset(component_count: usize, instance_index: usize) -> usize {
    component_count * instance_index
}

/// Byte offset of `instance_index` in a buffer of `component_count`-wide elements
#[inline]
pub const fn byte_offset(component_count: usize, instance_index: usize) -> usize {
    element_offset(component_count, instance_index) * ELEMENT_SIZE
}

/// CPU backing array and GPU buffer of one attribute
#[derive(Debug)]
struct AttributeBuffer {
    descriptor: AttributeDescriptor,
    data: Vec<f32>,
    buffer: BufferHandle,
}

impl AttributeBuffer {
    /// Write one element at instance `slot`
    #[inline]
    fn write(&mut self, slot: usize, values: &[f32]) {
        debug_assert_eq!(values.len(), self.descriptor.component_count);
        let start = element_offset(self.descriptor.component_count, slot);
        self.data[start..start + values.len()].copy_from_slice(values);
    }

    /// Upload instances `first..first + len` to the GPU buffer
    fn sync<D: Device>(&self, device: &mut D, first: usize, len: usize) {
        let components = self.descriptor.component_count;
        let start = element_offset(components, first);
        let end = start + element_offset(components, len);
        device.update_buffer(
            self.buffer,
            byte_offset(components, first),
            &self.data[start..end],
        );
    }
}

/// GPU-resident, append-only storage for node instances.
///
/// # Example
///
/// ```
/// use nodestream::{InstanceStore, NodeRecord, StoreConfig};
/// use nodestream::device::RecordingDevice;
///
/// let config = StoreConfig::new(800, 600, 100);
/// let mut store = InstanceStore::initialize(RecordingDevice::new(), config).unwrap();
///
/// store
///     .append(&[
///         NodeRecord::new(100.0, 100.0).with_fill(1.0, 0.0, 0.0, 1.0),
///         NodeRecord::new(200.0, 150.0).with_radius(8.0),
///     ])
///     .unwrap();
/// store.set_transform(2.0, -50.0, 0.0);
/// store.draw();
///
/// assert_eq!(store.count(), 2);
/// ```
#[derive(Debug)]
pub struct InstanceStore<D: Device> {
    device: D,
    program: ProgramHandle,
    attributes: Vec<AttributeBuffer>,
    limit: usize,
    count: usize,
    canvas_width: u32,
    canvas_height: u32,
}

impl<D: Device> InstanceStore<D> {
    /// Allocate every attribute buffer, compile the program and set the
    /// initial uniforms.
    ///
    /// # Errors
    ///
    /// - [`StoreError::InvalidConfig`] if width, height or limit is zero, or
    ///   the backing arrays for `limit` nodes cannot be allocated
    /// - [`StoreError::DeviceInitialization`] if the program or a buffer
    ///   cannot be created
    pub fn initialize(mut device: D, config: StoreConfig) -> StoreResult<Self> {
        config.validate()?;
        let limit = config.limit;
        let schema = build_schema();

        let mut attributes = Vec::with_capacity(schema.len());
        for descriptor in schema {
            let data = if descriptor.is_built_in {
                TEMPLATE_VERTICES.to_vec()
            } else {
                zeroed(&descriptor, limit)?
            };
            let buffer = device.create_buffer(&data)?;
            attributes.push(AttributeBuffer {
                descriptor,
                data,
                buffer,
            });
        }

        let program = device.compile_program(
            &config.shaders.vertex,
            &config.shaders.fragment,
            &schema,
        )?;

        let mut store = Self {
            device,
            program,
            attributes,
            limit,
            count: 0,
            canvas_width: config.width,
            canvas_height: config.height,
        };
        store.set_initial_uniforms();

        info!(
            width = config.width,
            height = config.height,
            limit,
            "instance store initialized"
        );
        Ok(store)
    }

    fn set_initial_uniforms(&mut self) {
        let (width, height) = (self.canvas_width as f32, self.canvas_height as f32);
        self.device.use_program(self.program);
        self.device.set_uniform_mat3(
            self.program,
            Mat3Uniform::Projection,
            projection(width, height),
        );
        self.push_transform(Transform::default());
        self.device
            .set_uniform_vec2(self.program, Vec2Uniform::Viewport, [width, height]);
    }

    fn push_transform(&mut self, transform: Transform) {
        self.device.set_uniform_vec2(
            self.program,
            Vec2Uniform::Scale,
            transform.scale_uniform(),
        );
        self.device
            .set_uniform_vec2(self.program, Vec2Uniform::Translate, transform.translate);
    }

    /// Append a batch of nodes after the ones already stored.
    ///
    /// The batch is checked as a whole before anything is written: either
    /// every record is stored and uploaded, or nothing changes.
    ///
    /// # Errors
    ///
    /// - [`StoreError::CapacityExceeded`] if the batch does not fit
    /// - [`StoreError::InvalidRecord`] if any record holds a non-finite or
    ///   out-of-range value
    pub fn append<N: NodeSource>(&mut self, records: &[N]) -> StoreResult<()> {
        let available = self.remaining();
        if records.len() > available {
            let overflow = records.len() - available;
            warn!(
                requested = records.len(),
                available, overflow, "rejected append: capacity exceeded"
            );
            return Err(StoreError::CapacityExceeded {
                requested: records.len(),
                available,
                overflow,
                limit: self.limit,
            });
        }

        for (index, record) in records.iter().enumerate() {
            if let Err(violation) = validate(record) {
                warn!(index, field = violation.field, "rejected append: invalid node");
                return Err(StoreError::InvalidRecord {
                    index,
                    field: violation.field,
                    reason: violation.reason,
                });
            }
        }

        if records.is_empty() {
            return Ok(());
        }

        let first = self.count;
        for (i, record) in records.iter().enumerate() {
            let slot = first + i;
            self.attribute_mut(Attribute::Position)
                .write(slot, &record.position());
            self.attribute_mut(Attribute::Size)
                .write(slot, &[record.radius()]);
            self.attribute_mut(Attribute::Color)
                .write(slot, &record.fill());
            self.attribute_mut(Attribute::StrokeWidth)
                .write(slot, &[record.stroke_width()]);
            self.attribute_mut(Attribute::StrokeColor)
                .write(slot, &record.stroke_color());
        }

        for attribute in Attribute::INSTANCED {
            self.attributes[attribute.index()].sync(&mut self.device, first, records.len());
        }

        self.count += records.len();
        debug!(
            appended = records.len(),
            count = self.count,
            limit = self.limit,
            "appended nodes"
        );
        Ok(())
    }

    /// Update the pan/zoom uniforms. Instance data is untouched.
    pub fn set_transform(&mut self, scale: f32, translate_x: f32, translate_y: f32) {
        self.device.use_program(self.program);
        self.push_transform(Transform::new(scale, translate_x, translate_y));
    }

    /// Bind every attribute and issue one instanced draw for all stored nodes.
    ///
    /// Bindings are re-specified on every call; the store itself is not
    /// modified. With no nodes stored only the template is bound and the draw
    /// is issued with zero instances.
    pub fn draw(&mut self) {
        self.device.use_program(self.program);

        let template = &self.attributes[Attribute::Template.index()];
        bind_attribute(&mut self.device, template);

        if self.count > 0 {
            for attribute in Attribute::INSTANCED {
                bind_attribute(&mut self.device, &self.attributes[attribute.index()]);
            }
        }

        trace!(instances = self.count, "draw");
        // lossless: `count <= limit <= MAX_LIMIT`
        self.device.draw_instanced(
            Topology::TriangleStrip,
            TEMPLATE_VERTEX_COUNT,
            self.count as u32,
        );
    }

    fn attribute_mut(&mut self, attribute: Attribute) -> &mut AttributeBuffer {
        &mut self.attributes[attribute.index()]
    }

    /// Number of stored nodes
    pub fn count(&self) -> usize {
        self.count
    }

    /// Maximum number of nodes
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Slots left before the store is full
    pub fn remaining(&self) -> usize {
        self.limit - self.count
    }

    /// True when no nodes are stored
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// True when no more nodes fit
    pub fn is_full(&self) -> bool {
        self.count == self.limit
    }

    /// Canvas size used for the projection
    pub fn canvas_size(&self) -> (u32, u32) {
        (self.canvas_width, self.canvas_height)
    }

    /// CPU copy of an attribute's backing array
    pub fn attribute_data(&self, attribute: Attribute) -> &[f32] {
        &self.attributes[attribute.index()].data
    }

    /// GPU buffer backing an attribute
    pub fn attribute_buffer(&self, attribute: Attribute) -> BufferHandle {
        self.attributes[attribute.index()].buffer
    }

    /// Attribute descriptors in binding order
    pub fn descriptors(&self) -> impl Iterator<Item = &AttributeDescriptor> {
        self.attributes.iter().map(|a| &a.descriptor)
    }

    /// Compiled program
    pub fn program(&self) -> ProgramHandle {
        self.program
    }

    /// The underlying device
    pub fn device(&self) -> &D {
        &self.device
    }

    /// Mutable access to the underlying device
    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }
}

fn bind_attribute<D: Device>(device: &mut D, attribute: &AttributeBuffer) {
    let descriptor = &attribute.descriptor;
    device.enable_attribute(descriptor.binding_index);
    device.bind_buffer(attribute.buffer);
    device.set_attribute_pointer(
        descriptor.binding_index,
        descriptor.component_count,
        descriptor.stride(),
        0,
    );
    device.set_attribute_divisor(descriptor.binding_index, descriptor.divisor());
}

/// Zero-filled backing array for `limit` instances, failing instead of aborting
fn zeroed(descriptor: &AttributeDescriptor, limit: usize) -> StoreResult<Vec<f32>> {
    let len = descriptor.backing_len(limit).ok_or_else(|| {
        StoreError::InvalidConfig(format!(
            "{} buffer for limit {} overflows",
            descriptor.name, limit
        ))
    })?;
    let mut data = Vec::new();
    data.try_reserve_exact(len).map_err(|e| {
        StoreError::InvalidConfig(format!(
            "cannot allocate {} floats for {}: {}",
            len, descriptor.name, e
        ))
    })?;
    data.resize(len, 0.0);
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{DeviceCall, DeviceError, RecordingDevice};
    use crate::record::NodeRecord;

    const RED: [f32; 4] = [1.0, 0.0, 0.0, 1.0];

    fn store(limit: usize) -> InstanceStore<RecordingDevice> {
        InstanceStore::initialize(RecordingDevice::new(), StoreConfig::new(800, 600, limit))
            .unwrap()
    }

    fn red_nodes(n: usize) -> Vec<NodeRecord> {
        (0..n)
            .map(|i| {
                NodeRecord::new(i as f32 * 10.0, i as f32 * 20.0)
                    .with_radius(5.0)
                    .with_fill(1.0, 0.0, 0.0, 1.0)
            })
            .collect()
    }

    fn updates(calls: &[DeviceCall]) -> Vec<(BufferHandle, usize, usize)> {
        calls
            .iter()
            .filter_map(|call| match call {
                DeviceCall::UpdateBuffer {
                    buffer,
                    byte_offset,
                    len,
                } => Some((*buffer, *byte_offset, *len)),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_offsets() {
        assert_eq!(element_offset(4, 0), 0);
        assert_eq!(element_offset(4, 3), 12);
        assert_eq!(element_offset(1, 7), 7);
        assert_eq!(byte_offset(2, 3), 24);
        assert_eq!(byte_offset(4, 3), 48);
    }

    #[test]
    fn test_initialize_allocates_buffers() {
        let store = store(10);
        let device = store.device();

        assert_eq!(device.buffer_count(), 6);
        assert_eq!(store.attribute_data(Attribute::Template), &TEMPLATE_VERTICES);
        assert_eq!(store.attribute_data(Attribute::Position).len(), 20);
        assert_eq!(store.attribute_data(Attribute::Size).len(), 10);
        assert_eq!(store.attribute_data(Attribute::Color).len(), 40);
        assert_eq!(store.attribute_data(Attribute::StrokeWidth).len(), 10);
        assert_eq!(store.attribute_data(Attribute::StrokeColor).len(), 40);
        assert!(
            store
                .attribute_data(Attribute::Color)
                .iter()
                .all(|v| *v == 0.0)
        );
        assert_eq!(
            device.buffer_contents(store.attribute_buffer(Attribute::Template)),
            Some(&TEMPLATE_VERTICES[..])
        );
        assert_eq!(store.count(), 0);
        assert_eq!(store.canvas_size(), (800, 600));
    }

    #[test]
    fn test_initialize_sets_uniforms() {
        let store = store(10);
        let calls = store.device().calls();

        assert!(calls.contains(&DeviceCall::UniformMat3 {
            uniform: Mat3Uniform::Projection,
            value: projection(800.0, 600.0),
        }));
        assert!(calls.contains(&DeviceCall::UniformVec2 {
            uniform: Vec2Uniform::Scale,
            value: [1.0, 1.0],
        }));
        assert!(calls.contains(&DeviceCall::UniformVec2 {
            uniform: Vec2Uniform::Translate,
            value: [0.0, 0.0],
        }));
        assert!(calls.contains(&DeviceCall::UniformVec2 {
            uniform: Vec2Uniform::Viewport,
            value: [800.0, 600.0],
        }));
        assert_eq!(store.device().uploads(), 0);
    }

    #[test]
    fn test_initialize_rejects_oversized_limit() {
        let err = InstanceStore::initialize(
            RecordingDevice::new(),
            StoreConfig::new(800, 600, usize::MAX / 2),
        )
        .unwrap_err();

        assert!(matches!(err, StoreError::InvalidConfig(_)));
    }

    #[test]
    fn test_zeroed_reports_overflow() {
        let descriptor = Attribute::Color.descriptor();
        assert!(matches!(
            zeroed(&descriptor, usize::MAX),
            Err(StoreError::InvalidConfig(_))
        ));
        assert_eq!(zeroed(&descriptor, 3).unwrap(), vec![0.0; 12]);
    }

    #[test]
    fn test_initialize_compile_failure() {
        let device = RecordingDevice::new().with_compile_failure("bad shader");
        let err = InstanceStore::initialize(device, StoreConfig::new(800, 600, 10)).unwrap_err();
        assert_eq!(
            err,
            StoreError::DeviceInitialization(DeviceError::ProgramCompilation(
                "bad shader".into()
            ))
        );
    }

    #[test]
    fn test_initialize_buffer_failure() {
        let device = RecordingDevice::new().with_buffer_budget(3);
        let err = InstanceStore::initialize(device, StoreConfig::new(800, 600, 10)).unwrap_err();
        assert!(matches!(
            err,
            StoreError::DeviceInitialization(DeviceError::BufferCreation(_))
        ));
    }

    #[test]
    fn test_initialize_rejects_zero_limit() {
        let err = InstanceStore::initialize(RecordingDevice::new(), StoreConfig::new(800, 600, 0))
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidConfig(_)));
    }

    #[test]
    fn test_append_writes_fields() {
        let mut store = store(10);
        store.append(&red_nodes(3)).unwrap();

        assert_eq!(store.count(), 3);
        assert_eq!(&store.attribute_data(Attribute::Size)[0..3], &[5.0, 5.0, 5.0]);
        assert_eq!(
            &store.attribute_data(Attribute::Color)[0..12],
            RED.repeat(3).as_slice()
        );
        assert_eq!(
            &store.attribute_data(Attribute::Position)[0..6],
            &[0.0, 0.0, 10.0, 20.0, 20.0, 40.0]
        );
        assert_eq!(&store.attribute_data(Attribute::StrokeWidth)[0..3], &[1.0; 3]);
    }

    #[test]
    fn test_append_leaves_other_slots_untouched() {
        let mut store = store(10);
        store.append(&red_nodes(2)).unwrap();
        let before = store.attribute_data(Attribute::Color).to_vec();

        let blue = NodeRecord::new(1.0, 1.0).with_fill(0.0, 0.0, 1.0, 1.0);
        store.append(&[blue]).unwrap();

        let after = store.attribute_data(Attribute::Color);
        assert_eq!(&after[0..8], &before[0..8]);
        assert_eq!(&after[8..12], &[0.0, 0.0, 1.0, 1.0]);
        assert_eq!(&after[12..], &before[12..]);
    }

    #[test]
    fn test_append_syncs_only_new_range() {
        let mut store = store(10);
        store.append(&red_nodes(3)).unwrap();
        store.device_mut().take_calls();

        store.append(&red_nodes(2)).unwrap();

        let uploads = updates(store.device().calls());
        let expected: Vec<_> = Attribute::INSTANCED
            .iter()
            .map(|attribute| {
                let components = attribute.descriptor().component_count;
                (
                    store.attribute_buffer(*attribute),
                    components * 3 * ELEMENT_SIZE,
                    components * 2,
                )
            })
            .collect();
        assert_eq!(uploads, expected);
    }

    #[test]
    fn test_gpu_mirror_matches_backing_arrays() {
        let mut store = store(10);
        store.append(&red_nodes(4)).unwrap();
        store.append(&red_nodes(3)).unwrap();

        for attribute in Attribute::ALL {
            assert_eq!(
                store
                    .device()
                    .buffer_contents(store.attribute_buffer(attribute))
                    .unwrap(),
                store.attribute_data(attribute),
                "{:?} out of sync",
                attribute
            );
        }
    }

    #[test]
    fn test_append_over_capacity() {
        let mut store = store(10);
        store.append(&red_nodes(3)).unwrap();
        store.device_mut().take_calls();

        let err = store.append(&red_nodes(8)).unwrap_err();

        assert_eq!(
            err,
            StoreError::CapacityExceeded {
                requested: 8,
                available: 7,
                overflow: 1,
                limit: 10,
            }
        );
        assert_eq!(store.count(), 3);
        assert_eq!(store.device().uploads(), 0);
    }

    #[test]
    fn test_append_fills_exactly_to_limit() {
        let mut store = store(4);
        store.append(&red_nodes(4)).unwrap();
        assert!(store.is_full());
        assert_eq!(store.remaining(), 0);
        assert!(matches!(
            store.append(&red_nodes(1)),
            Err(StoreError::CapacityExceeded { overflow: 1, .. })
        ));
    }

    #[test]
    fn test_invalid_record_rejects_whole_batch() {
        let mut store = store(10);
        let mut batch = red_nodes(3);
        batch[2].radius = -1.0;
        let before = store.attribute_data(Attribute::Size).to_vec();

        let err = store.append(&batch).unwrap_err();

        assert!(matches!(
            err,
            StoreError::InvalidRecord {
                index: 2,
                field: "radius",
                ..
            }
        ));
        assert_eq!(store.count(), 0);
        assert_eq!(store.attribute_data(Attribute::Size), before.as_slice());
        assert_eq!(store.device().uploads(), 0);
    }

    #[test]
    fn test_empty_append_is_noop() {
        let mut store = store(10);
        store.append::<NodeRecord>(&[]).unwrap();
        assert_eq!(store.count(), 0);
        assert_eq!(store.device().uploads(), 0);
    }

    #[test]
    fn test_append_accepts_references() {
        let nodes = red_nodes(2);
        let refs: Vec<&NodeRecord> = nodes.iter().collect();
        let mut store = store(10);
        store.append(&refs).unwrap();
        assert_eq!(store.count(), 2);
    }

    #[test]
    fn test_draw_empty_store() {
        let mut store = store(10);
        store.device_mut().take_calls();

        store.draw();

        let calls = store.device().calls();
        assert_eq!(
            calls.last(),
            Some(&DeviceCall::DrawInstanced {
                topology: Topology::TriangleStrip,
                vertex_count: 4,
                instance_count: 0,
            })
        );
        // only the template is bound
        let pointers: Vec<u32> = calls
            .iter()
            .filter_map(|call| match call {
                DeviceCall::AttributePointer { index, .. } => Some(*index),
                _ => None,
            })
            .collect();
        assert_eq!(pointers, vec![0]);
    }

    #[test]
    fn test_draw_binds_every_attribute() {
        let mut store = store(10);
        store.append(&red_nodes(3)).unwrap();
        store.device_mut().take_calls();

        store.draw();

        let calls = store.device().calls();
        for descriptor in build_schema() {
            let buffer = store.attribute_buffer(Attribute::ALL[descriptor.binding_index as usize]);
            assert!(calls.contains(&DeviceCall::EnableAttribute(descriptor.binding_index)));
            assert!(calls.contains(&DeviceCall::AttributePointer {
                index: descriptor.binding_index,
                buffer: Some(buffer),
                component_count: descriptor.component_count,
                stride: descriptor.component_count * 4,
                byte_offset: 0,
            }));
            assert!(calls.contains(&DeviceCall::AttributeDivisor {
                index: descriptor.binding_index,
                divisor: if descriptor.is_built_in { 0 } else { 1 },
            }));
        }
        assert_eq!(
            calls.last(),
            Some(&DeviceCall::DrawInstanced {
                topology: Topology::TriangleStrip,
                vertex_count: 4,
                instance_count: 3,
            })
        );
    }

    #[test]
    fn test_draw_is_repeatable_and_read_only() {
        let mut store = store(10);
        store.append(&red_nodes(5)).unwrap();
        let data_before: Vec<Vec<f32>> = Attribute::ALL
            .iter()
            .map(|a| store.attribute_data(*a).to_vec())
            .collect();
        store.device_mut().take_calls();

        store.draw();
        let first = store.device_mut().take_calls();
        store.draw();
        let second = store.device_mut().take_calls();

        assert_eq!(first, second);
        assert_eq!(store.count(), 5);
        for (attribute, before) in Attribute::ALL.iter().zip(&data_before) {
            assert_eq!(store.attribute_data(*attribute), before.as_slice());
        }
        assert!(updates(&first).is_empty());
    }

    #[test]
    fn test_set_transform_only_touches_scale_and_translate() {
        let mut store = store(10);
        store.device_mut().take_calls();

        store.set_transform(2.5, 10.0, -4.0);

        let uniforms: Vec<_> = store
            .device()
            .calls()
            .iter()
            .filter(|call| {
                matches!(
                    call,
                    DeviceCall::UniformMat3 { .. } | DeviceCall::UniformVec2 { .. }
                )
            })
            .cloned()
            .collect();
        assert_eq!(
            uniforms,
            vec![
                DeviceCall::UniformVec2 {
                    uniform: Vec2Uniform::Scale,
                    value: [2.5, 2.5],
                },
                DeviceCall::UniformVec2 {
                    uniform: Vec2Uniform::Translate,
                    value: [10.0, -4.0],
                },
            ]
        );
        assert_eq!(store.device().uploads(), 0);
    }
}
