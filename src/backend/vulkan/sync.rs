//! Command pools, command buffers and fences for frame and one-shot submission.

use ash::vk;

use super::conversion::submit_error;
use crate::backend::{BackendError, BackendResult};

/// A command pool with one primary command buffer and the fence its submissions signal.
#[derive(Debug, Clone, Copy)]
pub struct SubmitContext {
    pub pool: vk::CommandPool,
    pub cmd: vk::CommandBuffer,
    pub fence: vk::Fence,
}

impl SubmitContext {
    /// `signaled` creates the fence already signaled so the first wait returns at once.
    pub fn new(device: &ash::Device, queue_family: u32, signaled: bool) -> BackendResult<Self> {
        let pool_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(queue_family)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
        let pool = unsafe { device.create_command_pool(&pool_info, None) }.map_err(|e| {
            BackendError::InitializationFailed(format!("Failed to create command pool: {e:?}"))
        })?;

        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let cmd = unsafe { device.allocate_command_buffers(&alloc_info) }
            .map_err(|e| {
                BackendError::InitializationFailed(format!(
                    "Failed to allocate command buffer: {e:?}"
                ))
            })?
            .into_iter()
            .next()
            .ok_or_else(|| {
                BackendError::InitializationFailed("no command buffer allocated".into())
            })?;

        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        let fence_info = vk::FenceCreateInfo::default().flags(flags);
        let fence = unsafe { device.create_fence(&fence_info, None) }.map_err(|e| {
            BackendError::InitializationFailed(format!("Failed to create fence: {e:?}"))
        })?;

        Ok(Self { pool, cmd, fence })
    }

    /// Wait for the previous submission, then reset and begin recording.
    pub fn begin(&self, device: &ash::Device, timeout_ns: u64) -> BackendResult<()> {
        unsafe {
            device
                .wait_for_fences(&[self.fence], true, timeout_ns)
                .map_err(|e| submit_error("waiting for previous submission", e))?;
            device
                .reset_fences(&[self.fence])
                .map_err(|e| submit_error("resetting fence", e))?;
            device
                .reset_command_buffer(self.cmd, vk::CommandBufferResetFlags::empty())
                .map_err(|e| submit_error("resetting command buffer", e))?;

            let begin_info = vk::CommandBufferBeginInfo::default()
                .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
            device
                .begin_command_buffer(self.cmd, &begin_info)
                .map_err(|e| submit_error("beginning command buffer", e))
        }
    }

    /// End recording and submit, signaling the fence on completion.
    pub fn submit(&self, device: &ash::Device, queue: vk::Queue) -> BackendResult<()> {
        unsafe {
            device
                .end_command_buffer(self.cmd)
                .map_err(|e| submit_error("ending command buffer", e))?;

            let cmd_infos = [vk::CommandBufferSubmitInfo::default().command_buffer(self.cmd)];
            let submit = vk::SubmitInfo2::default().command_buffer_infos(&cmd_infos);
            device
                .queue_submit2(queue, &[submit], self.fence)
                .map_err(|e| submit_error("queue submit", e))
        }
    }

    /// Block until the last submission completes or `timeout_ns` elapses.
    pub fn wait(&self, device: &ash::Device, timeout_ns: u64) -> BackendResult<()> {
        unsafe { device.wait_for_fences(&[self.fence], true, timeout_ns) }
            .map_err(|e| submit_error("waiting for submission", e))
    }

    pub fn destroy(&self, device: &ash::Device) {
        unsafe {
            device.destroy_fence(self.fence, None);
            device.destroy_command_pool(self.pool, None);
        }
    }
}
