//! Fixed-capacity binding tables backed by mapped GPU memory

use crate::backend::{
    BindingTableBinding, BufferDescriptor, BufferHandle, BufferUsage, GpuBackend, MemoryLocation,
    ResourceDescriptor, ResourceKind,
};
use crate::binding_table::{BindingTableLayout, BindingTableProperties, BindingTableVariant};
use crate::error::{RendererError, RendererResult};

/// Device placement of one layout entry inside a slot
#[derive(Debug, Clone, Copy)]
struct BindingRun {
    kind: ResourceKind,
    /// Offset from the start of the slot
    offset: u64,
    count: u32,
}

/// One GPU buffer holding `capacity` slots of a single binding-table layout.
///
/// Slots are recycled through an explicit free-index stack. Allocation pops,
/// freeing pushes, so the most recently freed index is reused first. The buffer
/// is released only by [`destroy`](Self::destroy), which consumes the table.
#[derive(Debug)]
pub struct BindingTable {
    label: String,
    variant: BindingTableVariant,
    properties: &'static BindingTableProperties,
    buffer: BufferHandle,
    address: u64,
    usage: BufferUsage,
    slot_size: u64,
    base_offset: u64,
    runs: Vec<BindingRun>,
    capacity: u32,
    free_slots: Vec<u32>,
}

impl BindingTable {
    pub fn new<B: GpuBackend>(
        backend: &mut B,
        properties: &'static BindingTableProperties,
        layout: &BindingTableLayout,
        capacity: u32,
        variant: BindingTableVariant,
        label: &str,
    ) -> RendererResult<Self> {
        if capacity == 0 {
            return Err(RendererError::InvalidParameter(format!(
                "binding table '{label}' needs a non-zero capacity"
            )));
        }
        if let Some(entry) = layout.entries().iter().find(|e| !variant.accepts(e.kind)) {
            return Err(RendererError::InvalidParameter(format!(
                "{variant:?} binding table '{label}' cannot hold {} bindings",
                entry.kind.name()
            )));
        }

        let layout_size = backend.binding_layout_size(layout.handle())?;
        let slot_size = properties.align(layout_size);
        let base_offset = backend.binding_layout_offset(layout.handle(), layout.first_binding())?;

        let mut entries = layout.entries().to_vec();
        entries.sort_by_key(|e| e.binding);
        let mut runs = Vec::with_capacity(entries.len());
        for entry in &entries {
            let offset = backend.binding_layout_offset(layout.handle(), entry.binding)?;
            let end = offset + entry.count as u64 * properties.descriptor_size(entry.kind) as u64;
            if end > slot_size {
                return Err(RendererError::UnsupportedFeature(format!(
                    "binding {} of table '{label}' ends at byte {end}, \
                     past the {slot_size}-byte slot",
                    entry.binding
                )));
            }
            runs.push(BindingRun {
                kind: entry.kind,
                offset,
                count: entry.count,
            });
        }

        let usage = variant.buffer_usage(layout.entries());
        let buffer = backend.create_buffer(&BufferDescriptor {
            label: Some(format!("{label} binding table")),
            size: slot_size * capacity as u64,
            usage,
            location: MemoryLocation::CpuToGpu,
        })?;
        let address = backend.buffer_address(buffer)?;

        log::debug!(
            "Created {variant:?} binding table '{label}': {capacity} slots of {slot_size} bytes \
             (base offset {base_offset})"
        );

        Ok(Self {
            label: label.to_string(),
            variant,
            properties,
            buffer,
            address,
            usage,
            slot_size,
            base_offset,
            runs,
            capacity,
            // Low indices on top so they are handed out first
            free_slots: (0..capacity).rev().collect(),
        })
    }

    /// Take a free slot and write `descriptors` into it.
    ///
    /// Fails with [`RendererError::OutOfSlots`] when every slot is live. Nothing is
    /// written to the GPU on any failure.
    pub fn allocate_slot<B: GpuBackend>(
        &mut self,
        backend: &mut B,
        descriptors: &[ResourceDescriptor],
    ) -> RendererResult<u32> {
        if self.free_slots.is_empty() {
            return Err(self.out_of_slots());
        }

        let payload = self.encode(backend, descriptors)?;
        let index = self.free_slots.pop().ok_or_else(|| self.out_of_slots())?;
        let offset = self.slot_offset(index) + self.base_offset;
        if let Err(e) = backend.write_buffer(self.buffer, offset, &payload) {
            self.free_slots.push(index);
            return Err(e.into());
        }
        Ok(index)
    }

    fn out_of_slots(&self) -> RendererError {
        RendererError::OutOfSlots {
            table: self.label.clone(),
            capacity: self.capacity,
        }
    }

    /// Overwrite the contents of an existing slot in place
    pub fn write_slot<B: GpuBackend>(
        &mut self,
        backend: &mut B,
        index: u32,
        descriptors: &[ResourceDescriptor],
    ) -> RendererResult<()> {
        if index >= self.capacity {
            return Err(RendererError::InvalidParameter(format!(
                "slot {index} is outside binding table '{}' (capacity {})",
                self.label, self.capacity
            )));
        }
        let payload = self.encode(backend, descriptors)?;
        backend.write_buffer(self.buffer, self.slot_offset(index) + self.base_offset, &payload)?;
        Ok(())
    }

    /// Return a slot to the free stack.
    ///
    /// The caller guarantees no in-flight GPU work still reads the slot; the
    /// renderer achieves this by deferring frees to its per-frame deletion queue.
    pub fn free_slot(&mut self, index: u32) -> RendererResult<()> {
        if index >= self.capacity || self.free_slots.contains(&index) {
            return Err(RendererError::InvalidParameter(format!(
                "slot {index} of binding table '{}' is not live",
                self.label
            )));
        }
        self.free_slots.push(index);
        Ok(())
    }

    /// Release the backing GPU buffer
    pub fn destroy<B: GpuBackend>(self, backend: &mut B) {
        log::debug!("Destroying binding table '{}'", self.label);
        backend.destroy_buffer(self.buffer);
    }

    /// Encode descriptors in layout order into the bytes that follow the base offset.
    ///
    /// Within a binding the running offset advances by each descriptor's declared
    /// size; a new binding starts at the device-reported offset of that binding.
    fn encode<B: GpuBackend>(
        &self,
        backend: &B,
        descriptors: &[ResourceDescriptor],
    ) -> RendererResult<Vec<u8>> {
        let mut placements = Vec::with_capacity(descriptors.len());
        let mut run_index = 0;
        let mut element = 0u32;

        for descriptor in descriptors {
            let kind = descriptor.kind();
            if !self.variant.accepts(kind) {
                return Err(RendererError::InvalidParameter(format!(
                    "{:?} binding table '{}' cannot hold a {} descriptor",
                    self.variant,
                    self.label,
                    kind.name()
                )));
            }
            if kind == ResourceKind::CombinedImageSampler
                && !self.properties.combined_image_sampler_single_array
            {
                return Err(RendererError::UnsupportedFeature(
                    "combined image/sampler descriptors cannot be written as a single array element"
                        .into(),
                ));
            }

            while run_index < self.runs.len() && element >= self.runs[run_index].count {
                run_index += 1;
                element = 0;
            }
            let Some(run) = self.runs.get(run_index) else {
                return Err(RendererError::InvalidParameter(format!(
                    "{} descriptors overflow one slot of binding table '{}'",
                    descriptors.len(),
                    self.label
                )));
            };
            if run.kind != kind {
                return Err(RendererError::InvalidParameter(format!(
                    "binding table '{}' expects a {} descriptor, got a {}",
                    self.label,
                    run.kind.name(),
                    kind.name()
                )));
            }

            let size = self.properties.descriptor_size(kind);
            let offset = run.offset + element as u64 * size as u64 - self.base_offset;
            placements.push((descriptor, offset as usize, size));
            element += 1;
        }

        let len = placements
            .iter()
            .map(|(_, offset, size)| offset + size)
            .max()
            .unwrap_or(0);
        let mut payload = vec![0u8; len];
        for (descriptor, offset, size) in placements {
            backend.write_descriptor(descriptor, &mut payload[offset..offset + size])?;
        }
        Ok(payload)
    }

    /// Byte offset of a slot from the start of the buffer
    pub fn slot_offset(&self, index: u32) -> u64 {
        index as u64 * self.slot_size
    }

    /// What the command recorder needs to bind this table
    pub fn binding(&self) -> BindingTableBinding {
        BindingTableBinding {
            address: self.address,
            usage: self.usage,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn variant(&self) -> BindingTableVariant {
        self.variant
    }

    pub fn buffer(&self) -> BufferHandle {
        self.buffer
    }

    pub fn slot_size(&self) -> u64 {
        self.slot_size
    }

    pub fn base_offset(&self) -> u64 {
        self.base_offset
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn live_slots(&self) -> u32 {
        self.capacity - self.free_slots.len() as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::dummy::DummyBackend;
    use crate::backend::SamplerDescriptor;

    fn uniform(address: u64) -> ResourceDescriptor {
        ResourceDescriptor::UniformBuffer { address, range: 64 }
    }

    fn uniform_table(backend: &mut DummyBackend, capacity: u32) -> BindingTable {
        let properties = BindingTableProperties::retrieve(backend).unwrap();
        let layout = BindingTableLayout::single_uniform(backend).unwrap();
        BindingTable::new(
            backend,
            properties,
            &layout,
            capacity,
            BindingTableVariant::Uniform,
            "test uniforms",
        )
        .unwrap()
    }

    #[test]
    fn test_slot_size_is_aligned() {
        let mut backend = DummyBackend::new();
        let table = uniform_table(&mut backend, 4);
        let alignment = BindingTableProperties::get().unwrap().offset_alignment;

        assert_eq!(table.slot_size() % alignment, 0);
        let descriptor_size = DummyBackend::default_properties().uniform_buffer_descriptor_size;
        assert!(table.slot_size() >= descriptor_size as u64);
        assert_eq!(backend.buffer_size(table.buffer()), Some(table.slot_size() * 4));
    }

    #[test]
    fn test_sequential_allocations_are_unique() {
        let mut backend = DummyBackend::new();
        let mut table = uniform_table(&mut backend, 8);

        let mut indices: Vec<u32> = (0..8)
            .map(|i| table.allocate_slot(&mut backend, &[uniform(0x1000 + i)]).unwrap())
            .collect();
        assert_eq!(indices, (0..8).collect::<Vec<_>>());

        indices.sort_unstable();
        indices.dedup();
        assert_eq!(indices.len(), 8);
        assert_eq!(table.live_slots(), 8);
    }

    #[test]
    fn test_freed_slot_is_reused_first() {
        let mut backend = DummyBackend::new();
        let mut table = uniform_table(&mut backend, 4);

        for _ in 0..3 {
            table.allocate_slot(&mut backend, &[uniform(0x2000)]).unwrap();
        }
        table.free_slot(1).unwrap();
        assert_eq!(table.allocate_slot(&mut backend, &[uniform(0x3000)]).unwrap(), 1);

        table.free_slot(2).unwrap();
        table.free_slot(0).unwrap();
        assert_eq!(table.allocate_slot(&mut backend, &[uniform(0x3000)]).unwrap(), 0);
        assert_eq!(table.allocate_slot(&mut backend, &[uniform(0x3000)]).unwrap(), 2);
    }

    #[test]
    fn test_out_of_slots_writes_nothing() {
        let mut backend = DummyBackend::new();
        let mut table = uniform_table(&mut backend, 2);
        table.allocate_slot(&mut backend, &[uniform(1)]).unwrap();
        table.allocate_slot(&mut backend, &[uniform(2)]).unwrap();

        let writes_before = backend.write_count(table.buffer());
        let err = table.allocate_slot(&mut backend, &[uniform(3)]).unwrap_err();

        assert!(matches!(err, RendererError::OutOfSlots { capacity: 2, .. }));
        assert_eq!(backend.write_count(table.buffer()), writes_before);
    }

    #[test]
    fn test_descriptor_lands_at_slot_offset() {
        let mut backend = DummyBackend::new();
        let mut table = uniform_table(&mut backend, 3);
        table.allocate_slot(&mut backend, &[uniform(0xAAAA)]).unwrap();
        let index = table.allocate_slot(&mut backend, &[uniform(0xBBBB)]).unwrap();

        let size = BindingTableProperties::get().unwrap().uniform_buffer_descriptor_size;
        let mut expected = vec![0u8; size];
        backend.write_descriptor(&uniform(0xBBBB), &mut expected).unwrap();

        let start = (table.slot_offset(index) + table.base_offset()) as usize;
        let data = backend.buffer_data(table.buffer()).unwrap();
        assert_eq!(&data[start..start + size], expected.as_slice());
    }

    #[test]
    fn test_write_slot_updates_in_place() {
        let mut backend = DummyBackend::new();
        let mut table = uniform_table(&mut backend, 2);
        let index = table.allocate_slot(&mut backend, &[uniform(0x10)]).unwrap();
        table.write_slot(&mut backend, index, &[uniform(0x20)]).unwrap();

        let size = BindingTableProperties::get().unwrap().uniform_buffer_descriptor_size;
        let mut expected = vec![0u8; size];
        backend.write_descriptor(&uniform(0x20), &mut expected).unwrap();
        let start = (table.slot_offset(index) + table.base_offset()) as usize;
        let written = &backend.buffer_data(table.buffer()).unwrap()[start..start + size];
        assert_eq!(written, expected.as_slice());
        assert_eq!(table.live_slots(), 1);

        assert!(table.write_slot(&mut backend, 2, &[uniform(0x30)]).is_err());
    }

    #[test]
    fn test_double_free_is_rejected() {
        let mut backend = DummyBackend::new();
        let mut table = uniform_table(&mut backend, 2);
        let index = table.allocate_slot(&mut backend, &[uniform(1)]).unwrap();
        table.free_slot(index).unwrap();
        assert!(table.free_slot(index).is_err());
        assert!(table.free_slot(7).is_err());
    }

    #[test]
    fn test_variant_rejects_foreign_descriptors() {
        let mut backend = DummyBackend::new();
        let mut table = uniform_table(&mut backend, 2);
        let sampler = backend.create_sampler(&SamplerDescriptor::default()).unwrap();

        let err = table
            .allocate_slot(&mut backend, &[ResourceDescriptor::Sampler(Some(sampler))])
            .unwrap_err();
        assert!(matches!(err, RendererError::InvalidParameter(_)));
        assert_eq!(table.live_slots(), 0);
    }

    #[test]
    fn test_combined_image_sampler_requires_single_array_support() {
        let properties: &'static BindingTableProperties =
            Box::leak(Box::new(BindingTableProperties {
                combined_image_sampler_single_array: false,
                ..DummyBackend::default_properties()
            }));
        let mut backend = DummyBackend::with_properties(*properties);
        let layout = BindingTableLayout::new(
            &mut backend,
            vec![crate::backend::BindingLayoutEntry {
                binding: 0,
                kind: ResourceKind::CombinedImageSampler,
                count: 1,
                visibility: crate::backend::ShaderStageFlags::FRAGMENT,
            }],
        )
        .unwrap();
        let mut table = BindingTable::new(
            &mut backend,
            properties,
            &layout,
            2,
            BindingTableVariant::ImageSampler,
            "combined",
        )
        .unwrap();

        let writes_before = backend.write_count(table.buffer());
        let err = table
            .allocate_slot(&mut backend, &[ResourceDescriptor::CombinedImageSampler(None)])
            .unwrap_err();
        assert!(matches!(err, RendererError::UnsupportedFeature(_)));
        assert_eq!(backend.write_count(table.buffer()), writes_before);
        assert_eq!(table.live_slots(), 0);
    }

    #[test]
    fn test_texture_arrays_follow_binding_offsets() {
        let mut backend = DummyBackend::new();
        let properties = BindingTableProperties::retrieve(&backend).unwrap();
        let layout = BindingTableLayout::texture_arrays(&mut backend, 2, 3).unwrap();
        let mut table = BindingTable::new(
            &mut backend,
            properties,
            &layout,
            1,
            BindingTableVariant::ImageSampler,
            "textures",
        )
        .unwrap();

        let sampler = backend.create_sampler(&SamplerDescriptor::default()).unwrap();
        let descriptors = [
            ResourceDescriptor::Sampler(Some(sampler)),
            ResourceDescriptor::Sampler(None),
            ResourceDescriptor::SampledImage(None),
            ResourceDescriptor::SampledImage(None),
            ResourceDescriptor::SampledImage(None),
        ];
        assert_eq!(table.allocate_slot(&mut backend, &descriptors).unwrap(), 0);

        // One descriptor too many
        let mut overflow = descriptors.to_vec();
        overflow.push(ResourceDescriptor::SampledImage(None));
        table.free_slot(0).unwrap();
        assert!(matches!(
            table.allocate_slot(&mut backend, &overflow),
            Err(RendererError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_destroy_releases_buffer() {
        let mut backend = DummyBackend::new();
        let table = uniform_table(&mut backend, 2);
        let buffer = table.buffer();
        table.destroy(&mut backend);
        assert!(backend.buffer_data(buffer).is_none());
    }
}
