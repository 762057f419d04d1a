//! Scene graph handed to the renderer
//!
//! A [`Scene`] is what a loader produces: flat lists of meshes, materials,
//! images and samplers, plus a forest of nodes referencing them by index. The
//! renderer reads it once to build its GPU buffers and again each frame the
//! root transform changes.

mod camera;
mod transform;

pub use camera::*;
pub use transform::*;

use glam::Mat4;

use crate::backend::SamplerDescriptor;
use crate::error::{RendererError, RendererResult};
use crate::resources::{MaterialConstants, RawMesh, TextureData};

/// What a node carries besides its transform
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Transform,
    Mesh { mesh: usize },
}

#[derive(Debug, Clone)]
pub struct SceneNode {
    pub name: String,
    pub local: Transform,
    /// Cached by [`Scene::refresh_transforms`]; instance walks recompute it
    pub world: Mat4,
    pub children: Vec<usize>,
    pub kind: NodeKind,
}

impl SceneNode {
    pub fn new(name: &str, local: Transform, kind: NodeKind) -> Self {
        Self {
            name: name.to_string(),
            local,
            world: local.matrix(),
            children: Vec::new(),
            kind,
        }
    }

    pub fn mesh(name: &str, local: Transform, mesh: usize) -> Self {
        Self::new(name, local, NodeKind::Mesh { mesh })
    }

    pub fn empty(name: &str, local: Transform) -> Self {
        Self::new(name, local, NodeKind::Transform)
    }
}

/// Image as delivered by the loader, decoded lazily at build time
#[derive(Debug, Clone)]
pub enum SceneImage {
    Encoded {
        name: String,
        bytes: Vec<u8>,
    },
    Rgba8 {
        name: String,
        width: u32,
        height: u32,
        pixels: Vec<u8>,
    },
}

impl SceneImage {
    /// Pixels for upload; broken images come back as the checkerboard
    pub fn decode(&self) -> TextureData {
        match self {
            SceneImage::Encoded { name, bytes } => TextureData::decode_or_substitute(bytes, name),
            SceneImage::Rgba8 {
                name,
                width,
                height,
                pixels,
            } => TextureData::from_rgba8(*width, *height, pixels.clone(), name).unwrap_or_else(|e| {
                log::warn!("{e}; substituting checkerboard");
                TextureData::checkerboard()
            }),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            SceneImage::Encoded { name, .. } | SceneImage::Rgba8 { name, .. } => name,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Scene {
    pub meshes: Vec<RawMesh>,
    pub materials: Vec<MaterialConstants>,
    pub images: Vec<SceneImage>,
    pub samplers: Vec<SamplerDescriptor>,
    pub nodes: Vec<SceneNode>,
    pub roots: Vec<usize>,
}

impl Scene {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_mesh(&mut self, mesh: RawMesh) -> usize {
        self.meshes.push(mesh);
        self.meshes.len() - 1
    }

    pub fn add_material(&mut self, material: MaterialConstants) -> usize {
        self.materials.push(material);
        self.materials.len() - 1
    }

    pub fn add_image(&mut self, image: SceneImage) -> usize {
        self.images.push(image);
        self.images.len() - 1
    }

    pub fn add_sampler(&mut self, sampler: SamplerDescriptor) -> usize {
        self.samplers.push(sampler);
        self.samplers.len() - 1
    }

    /// Add a node under `parent`, or as a new root
    pub fn add_node(&mut self, node: SceneNode, parent: Option<usize>) -> RendererResult<usize> {
        let index = self.nodes.len();
        match parent {
            Some(p) => self
                .nodes
                .get_mut(p)
                .ok_or_else(|| {
                    RendererError::InvalidParameter(format!("parent node {p} does not exist"))
                })?
                .children
                .push(index),
            None => self.roots.push(index),
        }
        self.nodes.push(node);
        Ok(index)
    }

    /// Check every index the scene holds and that the nodes form a forest
    pub fn validate(&self) -> RendererResult<()> {
        let mut parents = vec![0u32; self.nodes.len()];
        let references = self
            .roots
            .iter()
            .chain(self.nodes.iter().flat_map(|n| n.children.iter()));
        for &index in references {
            let Some(count) = parents.get_mut(index) else {
                return Err(RendererError::AssetLoadFailure(format!(
                    "scene references missing node {index}"
                )));
            };
            *count += 1;
            if *count > 1 {
                return Err(RendererError::AssetLoadFailure(format!(
                    "node {index} is reachable along more than one path"
                )));
            }
        }
        if let Some(orphan) = parents.iter().position(|&count| count == 0) {
            return Err(RendererError::AssetLoadFailure(format!(
                "node {orphan} ('{}') is not attached to any root",
                self.nodes[orphan].name
            )));
        }

        for node in &self.nodes {
            if let NodeKind::Mesh { mesh } = node.kind {
                if mesh >= self.meshes.len() {
                    return Err(RendererError::AssetLoadFailure(format!(
                        "node '{}' references missing mesh {mesh}",
                        node.name
                    )));
                }
            }
        }
        for mesh in &self.meshes {
            if !self.materials.is_empty() && mesh.material >= self.materials.len() {
                return Err(RendererError::AssetLoadFailure(format!(
                    "mesh '{}' references missing material {}",
                    mesh.name, mesh.material
                )));
            }
            if let Some(&bad) = mesh.indices.iter().find(|&&i| i as usize >= mesh.vertices.len()) {
                return Err(RendererError::AssetLoadFailure(format!(
                    "mesh '{}' indexes vertex {bad} of {}",
                    mesh.name,
                    mesh.vertices.len()
                )));
            }
        }
        Ok(())
    }

    /// Recompute cached world matrices from the local transforms, top-down
    pub fn refresh_transforms(&mut self) {
        let mut stack: Vec<(usize, Mat4)> = self
            .roots
            .iter()
            .rev()
            .map(|&r| (r, Mat4::IDENTITY))
            .collect();
        while let Some((index, parent)) = stack.pop() {
            let Some(node) = self.nodes.get_mut(index) else {
                continue;
            };
            node.world = parent * node.local.matrix();
            let world = node.world;
            stack.extend(node.children.iter().rev().map(|&c| (c, world)));
        }
    }

    /// Walk the graph depth-first, pre-order, roots and children in declaration
    /// order, calling `f(node, mesh, parent * world)` for every mesh-bearing node.
    ///
    /// World matrices are composed from the local transforms during the walk,
    /// so the cached [`SceneNode::world`] is never consulted. This is the only
    /// traversal used to produce instance records, so a build walk and any
    /// later update walk see nodes in exactly the same order.
    pub fn visit_mesh_instances(&self, parent: Mat4, mut f: impl FnMut(usize, usize, Mat4)) {
        let mut stack: Vec<(usize, Mat4)> =
            self.roots.iter().rev().map(|&r| (r, parent)).collect();
        while let Some((index, parent)) = stack.pop() {
            let Some(node) = self.nodes.get(index) else {
                continue;
            };
            let world = parent * node.local.matrix();
            if let NodeKind::Mesh { mesh } = node.kind {
                f(index, mesh, world);
            }
            stack.extend(node.children.iter().rev().map(|&c| (c, world)));
        }
    }

    /// Number of instance records one walk produces
    pub fn mesh_instance_count(&self) -> usize {
        let mut count = 0;
        self.visit_mesh_instances(Mat4::IDENTITY, |_, _, _| count += 1);
        count
    }
}
