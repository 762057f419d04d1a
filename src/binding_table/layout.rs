//! Binding-table layouts

use crate::backend::{
    BackendResult, BindingLayoutEntry, BindingLayoutHandle, GpuBackend, ResourceKind,
    ShaderStageFlags,
};

/// A backend layout together with the entries it was declared with.
///
/// Layouts are declared once at pipeline-creation time and never grow.
#[derive(Debug, Clone)]
pub struct BindingTableLayout {
    handle: BindingLayoutHandle,
    entries: Vec<BindingLayoutEntry>,
}

impl BindingTableLayout {
    pub fn new<B: GpuBackend>(
        backend: &mut B,
        entries: Vec<BindingLayoutEntry>,
    ) -> BackendResult<Self> {
        let handle = backend.create_binding_layout(&entries)?;
        Ok(Self { handle, entries })
    }

    /// One uniform buffer at binding 0
    pub fn single_uniform<B: GpuBackend>(backend: &mut B) -> BackendResult<Self> {
        Self::new(
            backend,
            vec![BindingLayoutEntry {
                binding: 0,
                kind: ResourceKind::UniformBuffer,
                count: 1,
                visibility: ShaderStageFlags::ALL,
            }],
        )
    }

    /// A sampler array at binding 0 followed by a sampled image array at binding 1
    pub fn texture_arrays<B: GpuBackend>(
        backend: &mut B,
        max_samplers: u32,
        max_images: u32,
    ) -> BackendResult<Self> {
        Self::new(
            backend,
            vec![
                BindingLayoutEntry {
                    binding: 0,
                    kind: ResourceKind::Sampler,
                    count: max_samplers,
                    visibility: ShaderStageFlags::FRAGMENT,
                },
                BindingLayoutEntry {
                    binding: 1,
                    kind: ResourceKind::SampledImage,
                    count: max_images,
                    visibility: ShaderStageFlags::FRAGMENT,
                },
            ],
        )
    }

    pub fn handle(&self) -> BindingLayoutHandle {
        self.handle
    }

    pub fn entries(&self) -> &[BindingLayoutEntry] {
        &self.entries
    }

    /// Binding number of the first entry; its offset is a table's base offset
    pub fn first_binding(&self) -> u32 {
        self.entries.iter().map(|e| e.binding).min().unwrap_or(0)
    }

    pub fn destroy<B: GpuBackend>(self, backend: &mut B) {
        backend.destroy_binding_layout(self.handle);
    }
}
