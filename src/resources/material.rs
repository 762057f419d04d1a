//! Material constants

use bytemuck::{Pod, Zeroable};
use glam::{Vec3, Vec4};

/// Index meaning "no texture bound"; shaders fall back to the constant factors
pub const NO_TEXTURE: u32 = u32::MAX;

/// Flat per-material constant payload stored in the material buffer.
///
/// Texture references are indices into the texture table's sampler and image
/// arrays.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct MaterialConstants {
    pub base_color: Vec4,
    /// x = metallic, y = roughness
    pub metal_rough_factors: Vec4,
    pub color_image: u32,
    pub color_sampler: u32,
    pub metal_rough_image: u32,
    pub metal_rough_sampler: u32,
}

impl Default for MaterialConstants {
    fn default() -> Self {
        Self {
            base_color: Vec4::ONE,
            metal_rough_factors: Vec4::new(0.0, 0.5, 0.0, 0.0),
            color_image: NO_TEXTURE,
            color_sampler: NO_TEXTURE,
            metal_rough_image: NO_TEXTURE,
            metal_rough_sampler: NO_TEXTURE,
        }
    }
}

impl MaterialConstants {
    pub fn with_base_color(mut self, color: Vec4) -> Self {
        self.base_color = color;
        self
    }

    pub fn with_metallic_roughness(mut self, metallic: f32, roughness: f32) -> Self {
        self.metal_rough_factors.x = metallic;
        self.metal_rough_factors.y = roughness;
        self
    }

    pub fn with_color_texture(mut self, image: u32, sampler: u32) -> Self {
        self.color_image = image;
        self.color_sampler = sampler;
        self
    }

    pub fn plastic(color: Vec3) -> Self {
        Self::default()
            .with_base_color(color.extend(1.0))
            .with_metallic_roughness(0.0, 0.4)
    }

    pub fn metal(color: Vec3, roughness: f32) -> Self {
        Self::default()
            .with_base_color(color.extend(1.0))
            .with_metallic_roughness(1.0, roughness)
    }

    pub fn glass() -> Self {
        Self::default()
            .with_base_color(Vec4::new(1.0, 1.0, 1.0, 0.3))
            .with_metallic_roughness(0.0, 0.1)
    }

    /// Texture indices this material references, ignoring unbound ones
    pub fn texture_references(&self) -> impl Iterator<Item = (u32, u32)> {
        [
            (self.color_image, self.color_sampler),
            (self.metal_rough_image, self.metal_rough_sampler),
        ]
        .into_iter()
        .filter(|&(image, sampler)| image != NO_TEXTURE && sampler != NO_TEXTURE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout() {
        assert_eq!(std::mem::size_of::<MaterialConstants>(), 48);
    }

    #[test]
    fn test_texture_references_skip_unbound() {
        let material = MaterialConstants::plastic(Vec3::X).with_color_texture(3, 1);
        assert_eq!(material.texture_references().collect::<Vec<_>>(), vec![(3, 1)]);
        assert_eq!(MaterialConstants::glass().texture_references().count(), 0);
    }
}
