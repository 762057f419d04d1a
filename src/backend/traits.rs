//! Core backend abstraction traits
//!
//! [`GpuBackend`] is the explicit device context every renderer operation is
//! handed. Nothing in the renderer keeps a pointer back to the device; callers
//! pass `&mut B` into each method that needs device or allocator access.

use crate::backend::types::*;
use crate::binding_table::BindingTableProperties;
use thiserror::Error;

/// Backend error type
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("Failed to initialize backend: {0}")]
    InitializationFailed(String),
    #[error("Failed to create device: {0}")]
    DeviceCreationFailed(String),
    #[error("Failed to create buffer: {0}")]
    BufferCreationFailed(String),
    #[error("Failed to create texture: {0}")]
    TextureCreationFailed(String),
    #[error("Failed to create pipeline: {0}")]
    PipelineCreationFailed(String),
    #[error("Failed to create shader: {0}")]
    ShaderCreationFailed(String),
    #[error("Failed to submit commands: {0}")]
    SubmitFailed(String),
    #[error("Timed out waiting for the device: {0}")]
    Timeout(String),
    #[error("Feature not supported: {0}")]
    FeatureNotSupported(String),
    #[error("Invalid handle: {0}")]
    InvalidHandle(String),
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("Out of memory")]
    OutOfMemory,
    #[error("GPU device lost")]
    DeviceLost,
}

pub type BackendResult<T> = Result<T, BackendError>;

/// Handle to a GPU buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferHandle(pub(crate) u64);

/// Handle to a GPU texture (image plus its default view)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureHandle(pub(crate) u64);

/// Handle to a sampler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SamplerHandle(pub(crate) u64);

/// Handle to a binding-table layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BindingLayoutHandle(pub(crate) u64);

/// Handle to a compute or render pipeline (owns its pipeline layout and shaders)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PipelineHandle(pub(crate) u64);

/// Handle to a command buffer in the recording state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CommandBufferHandle(pub(crate) u64);

impl BufferHandle {
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl CommandBufferHandle {
    /// Wrap a raw backend command buffer handle owned by the frame loop.
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// Main GPU backend trait
pub trait GpuBackend {
    /// Human readable backend name
    fn name(&self) -> &'static str;

    /// Query descriptor sizes and alignment for binding tables.
    ///
    /// This is the expensive device query. Callers go through
    /// [`BindingTableProperties::retrieve`], which runs it at most once.
    fn query_binding_table_properties(&self) -> BackendResult<BindingTableProperties>;

    // Binding layouts

    /// Create a binding-table layout
    fn create_binding_layout(
        &mut self,
        entries: &[BindingLayoutEntry],
    ) -> BackendResult<BindingLayoutHandle>;

    /// Size in bytes the device needs for one instance of the layout
    fn binding_layout_size(&self, layout: BindingLayoutHandle) -> BackendResult<u64>;

    /// Byte offset of `binding` within one instance of the layout
    fn binding_layout_offset(&self, layout: BindingLayoutHandle, binding: u32)
        -> BackendResult<u64>;

    /// Destroy a binding-table layout
    fn destroy_binding_layout(&mut self, layout: BindingLayoutHandle);

    // Buffers

    /// Create a buffer
    fn create_buffer(&mut self, desc: &BufferDescriptor) -> BackendResult<BufferHandle>;

    /// GPU virtual address of a buffer
    fn buffer_address(&self, buffer: BufferHandle) -> BackendResult<u64>;

    /// Write bytes into a persistently mapped buffer
    fn write_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8])
        -> BackendResult<()>;

    /// Destroy a buffer
    fn destroy_buffer(&mut self, buffer: BufferHandle);

    /// Encode one resource descriptor into `out`.
    ///
    /// `out` is sized by the caller from the binding-table properties. Empty
    /// descriptors are written as zeroes.
    fn write_descriptor(&self, descriptor: &ResourceDescriptor, out: &mut [u8])
        -> BackendResult<()>;

    // Textures and samplers

    /// Create a texture and upload `pixels` into it (tightly packed rows).
    ///
    /// Uploads block on the one-shot submit primitive.
    fn create_texture(&mut self, desc: &TextureDescriptor, pixels: &[u8])
        -> BackendResult<TextureHandle>;

    /// Destroy a texture
    fn destroy_texture(&mut self, texture: TextureHandle);

    /// Create a sampler
    fn create_sampler(&mut self, desc: &SamplerDescriptor) -> BackendResult<SamplerHandle>;

    /// Destroy a sampler
    fn destroy_sampler(&mut self, sampler: SamplerHandle);

    // Pipelines

    /// Create a compute pipeline
    fn create_compute_pipeline(
        &mut self,
        desc: &ComputePipelineDescriptor,
    ) -> BackendResult<PipelineHandle>;

    /// Create a render pipeline
    fn create_render_pipeline(
        &mut self,
        desc: &RenderPipelineDescriptor,
    ) -> BackendResult<PipelineHandle>;

    /// Destroy a pipeline together with its layout and shader modules
    fn destroy_pipeline(&mut self, pipeline: PipelineHandle);

    // Submission

    /// Reset the immediate fence and begin the one-shot command buffer
    fn begin_immediate(&mut self) -> BackendResult<CommandBufferHandle>;

    /// Submit the one-shot command buffer and block until the device signals it
    fn submit_immediate(&mut self, cmd: CommandBufferHandle) -> BackendResult<()>;

    /// Record and submit a one-shot command sequence, blocking until completion.
    ///
    /// Never call this from the steady-state per-frame path.
    fn immediate_submit<F>(&mut self, record: F) -> BackendResult<()>
    where
        F: FnOnce(&mut Self, CommandBufferHandle),
        Self: Sized,
    {
        let cmd = self.begin_immediate()?;
        record(self, cmd);
        self.submit_immediate(cmd)
    }

    /// Wait for the oldest in-flight frame and begin recording its command buffer
    fn begin_frame(&mut self) -> BackendResult<CommandBufferHandle>;

    /// Submit the frame's command buffer and rotate to the next frame
    fn end_frame(&mut self, cmd: CommandBufferHandle) -> BackendResult<()>;

    /// Block until the device is idle
    fn wait_idle(&mut self) -> BackendResult<()>;

    // Command recording

    /// Copy `size` bytes between buffers
    fn cmd_copy_buffer(
        &mut self,
        cmd: CommandBufferHandle,
        src: BufferHandle,
        dst: BufferHandle,
        size: u64,
    );

    /// Order earlier accesses to `buffer` before later ones
    fn cmd_buffer_barrier(&mut self, cmd: CommandBufferHandle, barrier: &BufferBarrier);

    /// Bind a pipeline
    fn cmd_bind_pipeline(&mut self, cmd: CommandBufferHandle, pipeline: PipelineHandle);

    /// Bind binding-table buffers; their position in `tables` is the buffer index
    fn cmd_bind_binding_tables(&mut self, cmd: CommandBufferHandle, tables: &[BindingTableBinding]);

    /// Point consecutive sets of `pipeline`'s layout at (buffer index, byte offset) pairs
    fn cmd_set_binding_table_offsets(
        &mut self,
        cmd: CommandBufferHandle,
        pipeline: PipelineHandle,
        first_set: u32,
        offsets: &[(u32, u64)],
    );

    /// Dispatch compute work
    fn cmd_dispatch(&mut self, cmd: CommandBufferHandle, x: u32, y: u32, z: u32);

    /// Bind a 32-bit index buffer
    fn cmd_bind_index_buffer(
        &mut self,
        cmd: CommandBufferHandle,
        buffer: BufferHandle,
        offset: u64,
    );

    /// Set viewport and scissor to cover `extent`
    fn cmd_set_viewport(&mut self, cmd: CommandBufferHandle, extent: Extent2D);

    /// Indexed indirect draw reading `draw_count` commands from `buffer`
    fn cmd_draw_indexed_indirect(
        &mut self,
        cmd: CommandBufferHandle,
        buffer: BufferHandle,
        offset: u64,
        draw_count: u32,
        stride: u32,
    );

    /// Begin dynamic rendering into the given attachments
    fn cmd_begin_rendering(&mut self, cmd: CommandBufferHandle, targets: &RenderTargets);

    /// End dynamic rendering
    fn cmd_end_rendering(&mut self, cmd: CommandBufferHandle);
}
