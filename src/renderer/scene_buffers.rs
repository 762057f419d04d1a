//! Flattening a scene into shared GPU buffers

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};

use crate::backend::{
    BufferDescriptor, BufferHandle, BufferUsage, GpuBackend, MemoryLocation, ResourceDescriptor,
    SamplerHandle, TextureHandle,
};
use crate::error::{RendererError, RendererResult};
use crate::resources::{BoundingSphere, MaterialConstants, Vertex};
use crate::scene::Scene;

/// Placement of one unique mesh inside the combined vertex and index buffers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MeshRecord {
    /// Byte offset of the mesh's first index in the index buffer
    pub index_byte_offset: u64,
    /// Number of vertices preceding this mesh in the vertex buffer
    pub vertex_offset: u32,
    pub index_count: u32,
    pub vertex_count: u32,
    pub material: u32,
    pub transparent: bool,
}

impl MeshRecord {
    /// First index in 32-bit index units, as indirect draws address it
    pub fn first_index(&self) -> u32 {
        (self.index_byte_offset / std::mem::size_of::<u32>() as u64) as u32
    }
}

/// One occurrence of a mesh in the flattened scene
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct InstanceRecord {
    pub model: Mat4,
    pub vertex_offset: u32,
    pub index_count: u32,
    pub vertex_count: u32,
    pub mesh_id: u32,
    pub material_id: u32,
    pub _padding: [u32; 3],
}

/// Device addresses the shaders use to reach the scene buffers
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct ResourceAddresses {
    pub vertex_buffer: u64,
    pub material_buffer: u64,
    pub instance_buffer: u64,
    pub _padding: u64,
}

/// CPU-side result of flattening a scene, before upload
#[derive(Debug, Clone, Default)]
pub struct FlattenedScene {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
    pub meshes: Vec<MeshRecord>,
    pub bounds: Vec<BoundingSphere>,
    pub materials: Vec<MaterialConstants>,
    pub instances: Vec<InstanceRecord>,
}

impl FlattenedScene {
    /// Concatenate every mesh in load order, then stamp the node hierarchy once
    /// per instance group
    pub fn flatten(scene: &Scene, instance_groups: &[Vec3], root: Mat4) -> Self {
        let mut flat = Self::default();

        for mesh in &scene.meshes {
            flat.meshes.push(MeshRecord {
                index_byte_offset: (flat.indices.len() * std::mem::size_of::<u32>()) as u64,
                vertex_offset: flat.vertices.len() as u32,
                index_count: mesh.indices.len() as u32,
                vertex_count: mesh.vertices.len() as u32,
                material: mesh.material as u32,
                transparent: mesh.transparent,
            });
            flat.bounds.push(BoundingSphere::from_vertices(&mesh.vertices));
            flat.vertices.extend_from_slice(&mesh.vertices);
            flat.indices.extend_from_slice(&mesh.indices);
        }

        flat.materials = if scene.materials.is_empty() {
            vec![MaterialConstants::default()]
        } else {
            scene.materials.clone()
        };
        flat.instances = collect_instances(scene, &flat.meshes, instance_groups, root);
        flat
    }
}

/// Walk the scene once per instance group and emit one record per mesh-bearing node.
///
/// Used for both the initial build and every later transform update, so record
/// `i` always refers to the same node and mesh.
pub fn collect_instances(
    scene: &Scene,
    meshes: &[MeshRecord],
    instance_groups: &[Vec3],
    root: Mat4,
) -> Vec<InstanceRecord> {
    let mut instances = Vec::new();
    for offset in instance_groups {
        let parent = root * Mat4::from_translation(*offset);
        scene.visit_mesh_instances(parent, |_, mesh_id, model| {
            let Some(mesh) = meshes.get(mesh_id) else {
                return;
            };
            instances.push(InstanceRecord {
                model,
                vertex_offset: mesh.vertex_offset,
                index_count: mesh.index_count,
                vertex_count: mesh.vertex_count,
                mesh_id: mesh_id as u32,
                material_id: mesh.material,
                _padding: [0; 3],
            });
        });
    }
    instances
}

/// Fail with `CapacityExceeded` if either count is over its fixed maximum
pub fn check_texture_capacity(
    samplers: usize,
    images: usize,
    max_samplers: u32,
    max_images: u32,
) -> RendererResult<()> {
    if samplers > max_samplers as usize {
        return Err(RendererError::CapacityExceeded {
            kind: "sampler",
            count: samplers,
            max: max_samplers as usize,
        });
    }
    if images > max_images as usize {
        return Err(RendererError::CapacityExceeded {
            kind: "image",
            count: images,
            max: max_images as usize,
        });
    }
    Ok(())
}

/// Texture-table slot contents: every sampler padded to `max_samplers`, then
/// every image padded to `max_images`
pub fn build_texture_descriptors(
    samplers: &[SamplerHandle],
    images: &[TextureHandle],
    max_samplers: u32,
    max_images: u32,
) -> RendererResult<Vec<ResourceDescriptor>> {
    check_texture_capacity(samplers.len(), images.len(), max_samplers, max_images)?;

    let mut descriptors = Vec::with_capacity((max_samplers + max_images) as usize);
    descriptors.extend(samplers.iter().map(|&s| ResourceDescriptor::Sampler(Some(s))));
    descriptors.resize(max_samplers as usize, ResourceDescriptor::Sampler(None));
    descriptors.extend(images.iter().map(|&t| ResourceDescriptor::SampledImage(Some(t))));
    descriptors.resize(
        (max_samplers + max_images) as usize,
        ResourceDescriptor::SampledImage(None),
    );
    Ok(descriptors)
}

/// Create a GPU-only buffer and fill it through a staging copy on the blocking
/// one-shot submit. The staging buffer is released once the copy has completed.
pub fn upload_buffer<B: GpuBackend>(
    backend: &mut B,
    label: &str,
    bytes: &[u8],
    usage: BufferUsage,
) -> RendererResult<BufferHandle> {
    if bytes.is_empty() {
        return Err(RendererError::InvalidParameter(format!(
            "cannot upload empty {label} buffer"
        )));
    }
    let size = bytes.len() as u64;
    let buffer = backend.create_buffer(&BufferDescriptor {
        label: Some(label.to_string()),
        size,
        usage: usage | BufferUsage::COPY_DST | BufferUsage::DEVICE_ADDRESS,
        location: MemoryLocation::GpuOnly,
    })?;

    let staging = backend
        .create_buffer(&BufferDescriptor::staging(&format!("{label} staging"), size))
        .inspect_err(|_| backend.destroy_buffer(buffer))?;
    let submitted = backend.write_buffer(staging, 0, bytes).and_then(|()| {
        backend.immediate_submit(|backend, cmd| {
            backend.cmd_copy_buffer(cmd, staging, buffer, size);
        })
    });
    backend.destroy_buffer(staging);
    if let Err(e) = submitted {
        backend.destroy_buffer(buffer);
        return Err(e.into());
    }

    log::debug!("Uploaded {size} bytes to {label} buffer");
    Ok(buffer)
}

/// Create a persistently mapped buffer the CPU rewrites in place
pub fn create_mapped_buffer<B: GpuBackend>(
    backend: &mut B,
    label: &str,
    size: u64,
    usage: BufferUsage,
) -> RendererResult<BufferHandle> {
    Ok(backend.create_buffer(&BufferDescriptor {
        label: Some(label.to_string()),
        size,
        usage: usage | BufferUsage::DEVICE_ADDRESS,
        location: MemoryLocation::CpuToGpu,
    })?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::RawMesh;
    use crate::scene::{SceneNode, Transform};

    #[test]
    fn test_instance_record_layout() {
        assert_eq!(std::mem::size_of::<InstanceRecord>(), 96);
        assert_eq!(std::mem::size_of::<ResourceAddresses>(), 32);
    }

    #[test]
    fn test_mesh_records_accumulate_offsets() {
        let mut scene = Scene::new();
        scene.add_mesh(RawMesh::cube());
        scene.add_mesh(RawMesh::plane(1.0, 1.0, 1));
        let flat = FlattenedScene::flatten(&scene, &[Vec3::ZERO], Mat4::IDENTITY);

        assert_eq!(flat.meshes[0].vertex_offset, 0);
        assert_eq!(flat.meshes[0].index_byte_offset, 0);
        assert_eq!(flat.meshes[1].vertex_offset, 24);
        assert_eq!(flat.meshes[1].index_byte_offset, 36 * 4);
        assert_eq!(flat.meshes[1].first_index(), 36);
        assert_eq!(flat.vertices.len(), 24 + 4);
        assert_eq!(flat.bounds.len(), 2);
        assert_eq!(flat.materials.len(), 1);
        assert!(flat.instances.is_empty());
    }

    #[test]
    fn test_instance_groups_stamp_hierarchy() {
        let mut scene = Scene::new();
        let mesh = scene.add_mesh(RawMesh::cube());
        scene
            .add_node(SceneNode::mesh("cube", Transform::from_position(Vec3::Y), mesh), None)
            .unwrap();

        let groups = [Vec3::ZERO, Vec3::new(5.0, 0.0, 0.0)];
        let flat = FlattenedScene::flatten(&scene, &groups, Mat4::IDENTITY);

        assert_eq!(flat.instances.len(), 2);
        assert_eq!(flat.instances[1].model.transform_point3(Vec3::ZERO), Vec3::new(5.0, 1.0, 0.0));
        assert_eq!(flat.instances[0].index_count, 36);
    }

    #[test]
    fn test_texture_descriptors_are_padded() {
        let descriptors =
            build_texture_descriptors(&[SamplerHandle(7)], &[TextureHandle(9)], 2, 3).unwrap();
        assert_eq!(
            descriptors,
            vec![
                ResourceDescriptor::Sampler(Some(SamplerHandle(7))),
                ResourceDescriptor::Sampler(None),
                ResourceDescriptor::SampledImage(Some(TextureHandle(9))),
                ResourceDescriptor::SampledImage(None),
                ResourceDescriptor::SampledImage(None),
            ]
        );
    }

    #[test]
    fn test_upload_frees_staging() {
        let mut backend = crate::backend::dummy::DummyBackend::new();
        let buffer =
            upload_buffer(&mut backend, "test", &[1, 2, 3, 4], BufferUsage::STORAGE).unwrap();

        assert_eq!(backend.buffer_data(buffer).unwrap(), &[1, 2, 3, 4]);
        assert_eq!(backend.live_buffer_count(), 1);
        assert_eq!(backend.immediate_submits(), 1);
        assert!(upload_buffer(&mut backend, "empty", &[], BufferUsage::STORAGE).is_err());
    }
}
