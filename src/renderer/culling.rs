//! GPU culling pass recording

use crate::backend::{
    AccessScope, BindingTableBinding, BufferBarrier, BufferHandle, CommandBufferHandle, GpuBackend,
    PipelineHandle,
};
use crate::renderer::indirect::DrawBucket;

/// A pending copy of re-walked instance records into the GPU instance buffer
#[derive(Debug, Clone, Copy)]
pub struct InstanceUpload {
    pub staging: BufferHandle,
    pub instances: BufferHandle,
    pub size: u64,
}

/// The per-frame culling dispatch.
///
/// Recording order within one command buffer:
/// 1. barriers ordering the copies after the previous frame's culling, indirect
///    and vertex-stage use of the same buffers
/// 2. reset every bucket from its template, and copy pending instance updates
/// 3. transfer → compute barriers on everything just copied
/// 4. bind the uniform table and dispatch `ceil(instances / workgroup_size)` groups
/// 5. compute → indirect-read barrier on every bucket
#[derive(Debug)]
pub struct CullingDispatch {
    pipeline: PipelineHandle,
    workgroup_size: u32,
}

impl CullingDispatch {
    pub fn new(pipeline: PipelineHandle, workgroup_size: u32) -> Self {
        Self {
            pipeline,
            workgroup_size: workgroup_size.max(1),
        }
    }

    pub fn pipeline(&self) -> PipelineHandle {
        self.pipeline
    }

    pub fn workgroup_count(&self, instances: u32) -> u32 {
        instances.div_ceil(self.workgroup_size)
    }

    /// Record the whole pass.
    ///
    /// `set_offsets` are the (buffer index, byte offset) pairs for the
    /// resource-address, scene-data and culling-input sets, all living in
    /// `tables[0]`.
    pub fn record<B: GpuBackend>(
        &self,
        backend: &mut B,
        cmd: CommandBufferHandle,
        buckets: &[&DrawBucket],
        instance_upload: Option<InstanceUpload>,
        tables: &[BindingTableBinding],
        set_offsets: &[(u32, u64)],
    ) {
        // The live buckets and the instance buffer are shared by both frames in flight
        for bucket in buckets {
            backend.cmd_buffer_barrier(
                cmd,
                &BufferBarrier {
                    buffer: bucket.live,
                    src: AccessScope::ComputeWriteIndirectRead,
                    dst: AccessScope::TransferWrite,
                },
            );
        }
        if let Some(upload) = instance_upload {
            backend.cmd_buffer_barrier(
                cmd,
                &BufferBarrier {
                    buffer: upload.instances,
                    src: AccessScope::ComputeVertexRead,
                    dst: AccessScope::TransferWrite,
                },
            );
        }

        for bucket in buckets {
            backend.cmd_copy_buffer(cmd, bucket.template, bucket.live, bucket.size);
        }
        if let Some(upload) = instance_upload {
            backend.cmd_copy_buffer(cmd, upload.staging, upload.instances, upload.size);
        }

        for bucket in buckets {
            backend.cmd_buffer_barrier(
                cmd,
                &BufferBarrier {
                    buffer: bucket.live,
                    src: AccessScope::TransferWrite,
                    dst: AccessScope::ComputeWrite,
                },
            );
        }
        if let Some(upload) = instance_upload {
            for dst in [AccessScope::ComputeRead, AccessScope::VertexShaderRead] {
                backend.cmd_buffer_barrier(
                    cmd,
                    &BufferBarrier {
                        buffer: upload.instances,
                        src: AccessScope::TransferWrite,
                        dst,
                    },
                );
            }
        }

        let total: u32 = buckets.iter().map(|b| b.count).sum();
        backend.cmd_bind_pipeline(cmd, self.pipeline);
        backend.cmd_bind_binding_tables(cmd, tables);
        backend.cmd_set_binding_table_offsets(cmd, self.pipeline, 0, set_offsets);
        backend.cmd_dispatch(cmd, self.workgroup_count(total), 1, 1);

        for bucket in buckets {
            backend.cmd_buffer_barrier(
                cmd,
                &BufferBarrier {
                    buffer: bucket.live,
                    src: AccessScope::ComputeWrite,
                    dst: AccessScope::IndirectRead,
                },
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workgroup_count_rounds_up() {
        let dispatch = CullingDispatch::new(PipelineHandle(1), 64);
        assert_eq!(dispatch.workgroup_count(0), 0);
        assert_eq!(dispatch.workgroup_count(1), 1);
        assert_eq!(dispatch.workgroup_count(64), 1);
        assert_eq!(dispatch.workgroup_count(65), 2);
        assert_eq!(dispatch.workgroup_count(200), 4);
    }
}
