//! CPU-side scene resources
//!
//! Meshes, material constants and decoded textures as the scene loader hands
//! them over, before flattening uploads them to the GPU.

mod mesh;
mod material;
mod texture;

pub use mesh::*;
pub use material::*;
pub use texture::*;
