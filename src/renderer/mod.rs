//! Batched, GPU-culled scene rendering
//!
//! [`BatchRenderer`] flattens a [`Scene`](crate::scene::Scene) into a few shared
//! GPU buffers and draws it with one indirect draw per bucket (opaque, then
//! transparent) after a compute pass has culled invisible instances.

mod batch;
mod culling;
mod indirect;
mod scene_buffers;

pub use batch::*;
pub use culling::*;
pub use indirect::*;
pub use scene_buffers::*;

use std::path::Path;

use crate::error::{RendererError, RendererResult};

/// First word of every SPIR-V module
pub const SPIRV_MAGIC: u32 = 0x0723_0203;

/// Length of the SPIR-V module header in words
const SPIRV_HEADER_WORDS: usize = 5;

/// Precompiled SPIR-V for the three renderer pipelines
#[derive(Debug, Clone)]
pub struct ShaderSet {
    pub cull: Vec<u32>,
    pub mesh_vertex: Vec<u32>,
    pub mesh_fragment: Vec<u32>,
}

impl ShaderSet {
    pub const CULL_FILE: &'static str = "cull.comp.spv";
    pub const MESH_VERTEX_FILE: &'static str = "mesh.vert.spv";
    pub const MESH_FRAGMENT_FILE: &'static str = "mesh.frag.spv";

    /// Read the three modules from `dir`
    pub fn load(dir: impl AsRef<Path>) -> RendererResult<Self> {
        let dir = dir.as_ref();
        let read = |file: &str| {
            let path = dir.join(file);
            std::fs::read(&path).map_err(|e| {
                RendererError::AssetLoadFailure(format!("shader {}: {e}", path.display()))
            })
        };
        log::debug!("Loading shaders from {}", dir.display());
        Self::from_spirv_bytes(
            &read(Self::CULL_FILE)?,
            &read(Self::MESH_VERTEX_FILE)?,
            &read(Self::MESH_FRAGMENT_FILE)?,
        )
    }

    pub fn from_spirv_bytes(
        cull: &[u8],
        mesh_vertex: &[u8],
        mesh_fragment: &[u8],
    ) -> RendererResult<Self> {
        Ok(Self {
            cull: spirv_words(cull, Self::CULL_FILE)?,
            mesh_vertex: spirv_words(mesh_vertex, Self::MESH_VERTEX_FILE)?,
            mesh_fragment: spirv_words(mesh_fragment, Self::MESH_FRAGMENT_FILE)?,
        })
    }
}

/// Split a little-endian SPIR-V blob into words, checking its header
pub fn spirv_words(bytes: &[u8], name: &str) -> RendererResult<Vec<u32>> {
    if bytes.len() % 4 != 0 || bytes.len() < SPIRV_HEADER_WORDS * 4 {
        return Err(RendererError::AssetLoadFailure(format!(
            "shader {name}: {} bytes is not a SPIR-V module",
            bytes.len()
        )));
    }
    let words: Vec<u32> = bytes
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();
    if words[0] != SPIRV_MAGIC {
        return Err(RendererError::AssetLoadFailure(format!(
            "shader {name}: bad magic {:#010x}",
            words[0]
        )));
    }
    Ok(words)
}
