//! Opaque / transparent indirect draw partitioning

use bytemuck::{Pod, Zeroable};

use crate::backend::{BufferHandle, BufferUsage, GpuBackend};
use crate::error::RendererResult;
use crate::renderer::scene_buffers::{upload_buffer, InstanceRecord, MeshRecord};

/// Byte stride between consecutive commands in a draw bucket
pub const INDIRECT_COMMAND_STRIDE: u32 = std::mem::size_of::<IndirectDrawCommand>() as u32;

/// Indexed indirect draw arguments, laid out as the device reads them.
///
/// The culling kernel may only lower `instance_count` from 1 to 0. Vertex
/// offset stays 0 because the vertex stage resolves each instance's vertices
/// through its instance record.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct IndirectDrawCommand {
    pub index_count: u32,
    pub instance_count: u32,
    pub first_index: u32,
    pub vertex_offset: i32,
    /// Position of the instance in the full flattened instance array
    pub first_instance: u32,
}

/// Draw commands split by their mesh's transparency
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Partition {
    pub opaque: Vec<IndirectDrawCommand>,
    pub transparent: Vec<IndirectDrawCommand>,
}

impl Partition {
    pub fn total(&self) -> usize {
        self.opaque.len() + self.transparent.len()
    }
}

/// Bucket every instance in a single scan, keeping flattened order within each bucket
pub fn partition(instances: &[InstanceRecord], meshes: &[MeshRecord]) -> Partition {
    let mut result = Partition::default();
    for (index, instance) in instances.iter().enumerate() {
        let Some(mesh) = meshes.get(instance.mesh_id as usize) else {
            log::warn!("Instance {index} references unknown mesh {}", instance.mesh_id);
            continue;
        };
        let command = IndirectDrawCommand {
            index_count: mesh.index_count,
            instance_count: 1,
            first_index: mesh.first_index(),
            vertex_offset: 0,
            first_instance: index as u32,
        };
        if mesh.transparent {
            result.transparent.push(command);
        } else {
            result.opaque.push(command);
        }
    }
    result
}

/// Kernel input describing both buckets and the bounding spheres
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct CullingInput {
    pub opaque_commands: u64,
    pub transparent_commands: u64,
    pub bounds: u64,
    pub opaque_count: u32,
    pub transparent_count: u32,
}

impl CullingInput {
    pub fn new(opaque: Option<&DrawBucket>, transparent: Option<&DrawBucket>, bounds: u64) -> Self {
        Self {
            opaque_commands: opaque.map_or(0, |b| b.address),
            transparent_commands: transparent.map_or(0, |b| b.address),
            bounds,
            opaque_count: opaque.map_or(0, |b| b.count),
            transparent_count: transparent.map_or(0, |b| b.count),
        }
    }
}

/// GPU copies of one bucket's commands.
///
/// `live` is what the culling kernel rewrites and the draw reads; `template`
/// keeps the pristine commands and is copied over `live` at the start of
/// every cull pass.
#[derive(Debug)]
pub struct DrawBucket {
    pub live: BufferHandle,
    pub template: BufferHandle,
    pub address: u64,
    pub count: u32,
    pub size: u64,
}

impl DrawBucket {
    /// Upload `commands`, or return `None` for an empty bucket
    pub fn create<B: GpuBackend>(
        backend: &mut B,
        label: &str,
        commands: &[IndirectDrawCommand],
    ) -> RendererResult<Option<Self>> {
        if commands.is_empty() {
            log::debug!("No {label} draws; skipping bucket");
            return Ok(None);
        }
        let bytes: &[u8] = bytemuck::cast_slice(commands);
        let live = upload_buffer(
            backend,
            &format!("{label} draws"),
            bytes,
            BufferUsage::INDIRECT | BufferUsage::STORAGE,
        )?;
        let template = upload_buffer(
            backend,
            &format!("{label} draw template"),
            bytes,
            BufferUsage::COPY_SRC,
        )
        .inspect_err(|_| backend.destroy_buffer(live))?;
        let address = backend.buffer_address(live).inspect_err(|_| {
            backend.destroy_buffer(live);
            backend.destroy_buffer(template);
        })?;
        Ok(Some(Self {
            live,
            template,
            address,
            count: commands.len() as u32,
            size: bytes.len() as u64,
        }))
    }

    pub fn destroy<B: GpuBackend>(self, backend: &mut B) {
        backend.destroy_buffer(self.live);
        backend.destroy_buffer(self.template);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::dummy::DummyBackend;
    use glam::Mat4;

    fn mesh(index_byte_offset: u64, index_count: u32, transparent: bool) -> MeshRecord {
        MeshRecord {
            index_byte_offset,
            vertex_offset: 0,
            index_count,
            vertex_count: 0,
            material: 0,
            transparent,
        }
    }

    fn instance(mesh_id: u32) -> InstanceRecord {
        InstanceRecord {
            model: Mat4::IDENTITY,
            vertex_offset: 0,
            index_count: 0,
            vertex_count: 0,
            mesh_id,
            material_id: 0,
            _padding: [0; 3],
        }
    }

    #[test]
    fn test_command_layout() {
        assert_eq!(INDIRECT_COMMAND_STRIDE, 20);
        assert_eq!(std::mem::size_of::<CullingInput>(), 32);
    }

    #[test]
    fn test_first_instance_is_original_index() {
        let meshes = [mesh(0, 36, false), mesh(144, 6, true)];
        let instances = [instance(1), instance(0), instance(1), instance(0)];
        let split = partition(&instances, &meshes);

        let opaque: Vec<u32> = split.opaque.iter().map(|c| c.first_instance).collect();
        let transparent: Vec<u32> = split.transparent.iter().map(|c| c.first_instance).collect();
        assert_eq!(opaque, vec![1, 3]);
        assert_eq!(transparent, vec![0, 2]);

        assert_eq!(split.transparent[0].first_index, 36);
        assert_eq!(split.transparent[0].index_count, 6);
        assert!(split
            .opaque
            .iter()
            .chain(&split.transparent)
            .all(|c| c.instance_count == 1 && c.vertex_offset == 0));
    }

    #[test]
    fn test_empty_bucket_is_not_allocated() {
        let mut backend = DummyBackend::new();
        assert!(DrawBucket::create(&mut backend, "transparent", &[]).unwrap().is_none());
        assert_eq!(backend.live_buffer_count(), 0);
    }

    #[test]
    fn test_bucket_live_and_template_match() {
        let mut backend = DummyBackend::new();
        let commands = partition(&[instance(0)], &[mesh(0, 3, false)]).opaque;
        let bucket = DrawBucket::create(&mut backend, "opaque", &commands).unwrap().unwrap();

        assert_eq!(bucket.count, 1);
        assert_eq!(backend.buffer_data(bucket.live), backend.buffer_data(bucket.template));
        let usage = backend.buffer_usage(bucket.live).unwrap();
        assert!(usage.contains(BufferUsage::INDIRECT));

        let input = CullingInput::new(Some(&bucket), None, 0x40);
        assert_eq!(input.opaque_count, 1);
        assert_eq!(input.transparent_commands, 0);
        assert_eq!(input.transparent_count, 0);
    }
}
