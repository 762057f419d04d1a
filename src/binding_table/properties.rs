//! Process-wide descriptor size and alignment properties

use std::sync::OnceLock;

use crate::backend::{BackendResult, GpuBackend, ResourceKind};

static PROPERTIES: OnceLock<BindingTableProperties> = OnceLock::new();

/// Device-specific descriptor sizes and binding-table alignment.
///
/// Retrieved once per process during single-threaded startup and never mutated
/// afterwards. Binding tables keep a `&'static` reference to it rather than a copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BindingTableProperties {
    pub uniform_buffer_descriptor_size: usize,
    pub sampler_descriptor_size: usize,
    pub combined_image_sampler_descriptor_size: usize,
    pub sampled_image_descriptor_size: usize,
    pub storage_image_descriptor_size: usize,
    /// Required alignment of every slot offset within a binding table
    pub offset_alignment: u64,
    /// Whether a combined image/sampler can be written as one contiguous array element
    pub combined_image_sampler_single_array: bool,
}

impl BindingTableProperties {
    /// Query the device on first use and cache the result for the process lifetime.
    ///
    /// Later calls return the cached value without touching the device, even when
    /// given a different backend.
    pub fn retrieve<B: GpuBackend + ?Sized>(backend: &B) -> BackendResult<&'static Self> {
        if let Some(properties) = PROPERTIES.get() {
            return Ok(properties);
        }

        let queried = backend.query_binding_table_properties()?;
        log::debug!(
            "{}: binding table alignment {} bytes, uniform descriptor {} bytes",
            backend.name(),
            queried.offset_alignment,
            queried.uniform_buffer_descriptor_size
        );
        Ok(PROPERTIES.get_or_init(|| queried))
    }

    /// The cached properties, if [`retrieve`](Self::retrieve) has run.
    pub fn get() -> Option<&'static Self> {
        PROPERTIES.get()
    }

    pub fn is_ready() -> bool {
        PROPERTIES.get().is_some()
    }

    /// Declared byte size of one descriptor of `kind`
    pub fn descriptor_size(&self, kind: ResourceKind) -> usize {
        match kind {
            ResourceKind::UniformBuffer => self.uniform_buffer_descriptor_size,
            ResourceKind::Sampler => self.sampler_descriptor_size,
            ResourceKind::CombinedImageSampler => self.combined_image_sampler_descriptor_size,
            ResourceKind::SampledImage => self.sampled_image_descriptor_size,
            ResourceKind::StorageImage => self.storage_image_descriptor_size,
        }
    }

    /// Round `size` up to the binding-table offset alignment
    pub fn align(&self, size: u64) -> u64 {
        align_up(size, self.offset_alignment)
    }
}

pub(crate) fn align_up(value: u64, alignment: u64) -> u64 {
    if alignment <= 1 {
        return value;
    }
    value.div_ceil(alignment) * alignment
}
