//! Binding tables
//!
//! A binding table is a GPU buffer whose contents are raw resource descriptors,
//! read by shaders directly instead of through descriptor sets. Each table holds
//! a fixed number of equally sized slots, one per bound "set".

mod layout;
mod properties;
mod table;

pub use layout::*;
pub use properties::*;
pub use table::*;

use crate::backend::{BindingLayoutEntry, BufferUsage, ResourceKind};

/// The two table specializations: which descriptor kinds a table accepts and
/// which buffer flags its layout requires
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BindingTableVariant {
    /// Uniform buffer descriptors only
    Uniform,
    /// Samplers, sampled images, storage images and combined image/samplers
    ImageSampler,
}

impl BindingTableVariant {
    pub fn accepts(&self, kind: ResourceKind) -> bool {
        match self {
            BindingTableVariant::Uniform => kind == ResourceKind::UniformBuffer,
            BindingTableVariant::ImageSampler => kind != ResourceKind::UniformBuffer,
        }
    }

    /// Buffer usage for a table holding `entries`.
    ///
    /// Sampler-bearing layouts need the sampler-descriptor flag; anything else
    /// needs the resource-descriptor flag. Mixed layouts need both.
    pub fn buffer_usage(&self, entries: &[BindingLayoutEntry]) -> BufferUsage {
        let holds_samplers = entries.iter().any(|e| {
            matches!(
                e.kind,
                ResourceKind::Sampler | ResourceKind::CombinedImageSampler
            )
        });
        let holds_resources = entries.iter().any(|e| e.kind != ResourceKind::Sampler);

        let mut usage = BufferUsage::DEVICE_ADDRESS;
        if holds_samplers {
            usage = usage | BufferUsage::SAMPLER_DESCRIPTORS;
        }
        if holds_resources || !holds_samplers {
            usage = usage | BufferUsage::RESOURCE_DESCRIPTORS;
        }
        usage
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::ShaderStageFlags;

    fn entry(kind: ResourceKind) -> BindingLayoutEntry {
        BindingLayoutEntry {
            binding: 0,
            kind,
            count: 1,
            visibility: ShaderStageFlags::ALL,
        }
    }

    #[test]
    fn test_variant_accepts() {
        assert!(BindingTableVariant::Uniform.accepts(ResourceKind::UniformBuffer));
        assert!(!BindingTableVariant::Uniform.accepts(ResourceKind::Sampler));
        assert!(BindingTableVariant::ImageSampler.accepts(ResourceKind::StorageImage));
        assert!(BindingTableVariant::ImageSampler.accepts(ResourceKind::CombinedImageSampler));
        assert!(!BindingTableVariant::ImageSampler.accepts(ResourceKind::UniformBuffer));
    }

    #[test]
    fn test_buffer_usage_flags() {
        let uniform =
            BindingTableVariant::Uniform.buffer_usage(&[entry(ResourceKind::UniformBuffer)]);
        assert!(uniform.contains(BufferUsage::RESOURCE_DESCRIPTORS));
        assert!(!uniform.contains(BufferUsage::SAMPLER_DESCRIPTORS));

        let samplers =
            BindingTableVariant::ImageSampler.buffer_usage(&[entry(ResourceKind::Sampler)]);
        assert!(samplers.contains(BufferUsage::SAMPLER_DESCRIPTORS));
        assert!(!samplers.contains(BufferUsage::RESOURCE_DESCRIPTORS));

        let mixed = BindingTableVariant::ImageSampler.buffer_usage(&[
            entry(ResourceKind::Sampler),
            entry(ResourceKind::SampledImage),
        ]);
        assert!(
            mixed.contains(BufferUsage::SAMPLER_DESCRIPTORS | BufferUsage::RESOURCE_DESCRIPTORS)
        );
        assert!(mixed.contains(BufferUsage::DEVICE_ADDRESS));
    }
}
