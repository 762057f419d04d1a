//! Batch Renderer - GPU binding tables and GPU-culled batched scene drawing
//!
//! The crate turns a loaded scene (meshes, materials, textures, transforms) into a
//! handful of GPU-resident buffers and binding tables, then draws the whole scene
//! with two indirect draws per frame while a compute pass decides visibility.
//!
//! # Features
//! - Binding tables: fixed-capacity slabs of raw resource descriptors living in
//!   persistently mapped GPU memory (`VK_EXT_descriptor_buffer`)
//! - Scene flattening into structure-of-arrays GPU buffers
//! - Opaque/transparent indirect draw partitioning
//! - GPU compute culling over per-mesh bounding spheres
//! - Deferred per-frame deletion with a two-deep frame pipeline
//!
//! # Backends
//! - **Vulkan**: `ash` + `gpu-allocator`, enabled by the `vulkan-backend` feature
//! - **Dummy**: CPU-only command recorder used by the test suite

pub mod backend;
pub mod binding_table;
pub mod error;
pub mod frame;
pub mod renderer;
pub mod resources;
pub mod scene;

pub use backend::dummy::DummyBackend;
#[cfg(feature = "vulkan-backend")]
pub use backend::vulkan::{VulkanBackend, VulkanBackendConfig};
pub use backend::{BackendError, BackendResult, GpuBackend};
pub use binding_table::{
    BindingTable, BindingTableLayout, BindingTableProperties, BindingTableVariant,
};
pub use error::{RendererError, RendererResult};
pub use renderer::{BatchRenderer, BindingTables, DrawStats, ShaderSet};
pub use resources::{BoundingSphere, MaterialConstants, RawMesh, TextureData, Vertex};
pub use scene::{
    Camera, NodeKind, Projection, Scene, SceneData, SceneImage, SceneLighting, SceneNode,
    Transform,
};

use backend::TextureFormat;
use glam::Vec3;

/// Fixed number of sampler entries in the texture table.
pub const MAX_SAMPLERS: u32 = 32;

/// Fixed number of image entries in the texture table.
pub const MAX_IMAGES: u32 = 512;

/// Configuration for the batch renderer
#[derive(Debug, Clone)]
pub struct RendererConfig {
    /// Sampler entries reserved in the texture table (padded when the scene has fewer)
    pub max_samplers: u32,
    /// Image entries reserved in the texture table (padded when the scene has fewer)
    pub max_images: u32,
    /// Slots in the uniform binding table. A built scene takes the resource
    /// addresses, the culling input and one scene-data slot per frame in flight;
    /// the rest are spare.
    pub uniform_table_capacity: u32,
    /// Slots in the image/sampler binding table
    pub texture_table_capacity: u32,
    /// Local workgroup size of the culling kernel
    pub culling_workgroup_size: u32,
    /// World offsets at which the scene hierarchy is stamped; one walk per entry
    pub instance_groups: Vec<Vec3>,
    /// Color attachment format of the mesh pipelines
    pub color_format: TextureFormat,
    /// Depth attachment format of the mesh pipelines
    pub depth_format: TextureFormat,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            max_samplers: MAX_SAMPLERS,
            max_images: MAX_IMAGES,
            uniform_table_capacity: 8,
            texture_table_capacity: 1,
            culling_workgroup_size: 64,
            instance_groups: vec![Vec3::ZERO],
            color_format: TextureFormat::Rgba16Float,
            depth_format: TextureFormat::Depth32Float,
        }
    }
}
