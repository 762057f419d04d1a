//! Dummy GPU backend for testing and development.
//!
//! This backend doesn't talk to a GPU. Buffers are plain byte vectors with fake
//! device addresses, copies run eagerly when they are recorded, and every
//! recorded command is appended to a log that tests can inspect.

use std::cell::Cell;
use std::collections::HashMap;

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::binding_table::BindingTableProperties;

/// First fake device address handed out
const ADDRESS_BASE: u64 = 0x1_0000_0000;
/// Fake device addresses are spaced at this granularity
const ADDRESS_ALIGNMENT: u64 = 256;

const IMMEDIATE_COMMAND_BUFFER: CommandBufferHandle = CommandBufferHandle(1);
const FRAME_COMMAND_BUFFER_BASE: u64 = 100;

/// A command recorded into a dummy command buffer
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedCommand {
    CopyBuffer {
        src: BufferHandle,
        dst: BufferHandle,
        size: u64,
    },
    Barrier(BufferBarrier),
    BindPipeline(PipelineHandle),
    BindBindingTables(Vec<BindingTableBinding>),
    SetBindingTableOffsets {
        pipeline: PipelineHandle,
        first_set: u32,
        offsets: Vec<(u32, u64)>,
    },
    Dispatch {
        x: u32,
        y: u32,
        z: u32,
    },
    BindIndexBuffer {
        buffer: BufferHandle,
        offset: u64,
    },
    SetViewport(Extent2D),
    DrawIndexedIndirect {
        buffer: BufferHandle,
        offset: u64,
        draw_count: u32,
        stride: u32,
    },
    BeginRendering {
        color: TextureHandle,
        depth: Option<TextureHandle>,
        extent: Extent2D,
    },
    EndRendering,
}

#[derive(Debug)]
struct DummyBuffer {
    data: Vec<u8>,
    address: u64,
    usage: BufferUsage,
    location: MemoryLocation,
    writes: usize,
}

#[derive(Debug)]
enum DummyPipeline {
    Compute,
    Render { blended: bool },
}

/// Dummy GPU backend.
#[derive(Debug)]
pub struct DummyBackend {
    properties: BindingTableProperties,
    property_queries: Cell<u32>,
    next_handle: u64,
    next_address: u64,
    layouts: HashMap<u64, Vec<BindingLayoutEntry>>,
    buffers: HashMap<u64, DummyBuffer>,
    textures: HashMap<u64, TextureDescriptor>,
    samplers: HashMap<u64, SamplerDescriptor>,
    pipelines: HashMap<u64, DummyPipeline>,
    commands: Vec<RecordedCommand>,
    immediate_open: bool,
    immediate_submits: u32,
    frame_number: u64,
    frame_open: Option<CommandBufferHandle>,
    frames_submitted: u64,
}

impl Default for DummyBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl DummyBackend {
    /// Create a dummy backend reporting [`default_properties`](Self::default_properties)
    pub fn new() -> Self {
        Self::with_properties(Self::default_properties())
    }

    pub fn with_properties(properties: BindingTableProperties) -> Self {
        Self {
            properties,
            property_queries: Cell::new(0),
            next_handle: 1,
            next_address: ADDRESS_BASE,
            layouts: HashMap::new(),
            buffers: HashMap::new(),
            textures: HashMap::new(),
            samplers: HashMap::new(),
            pipelines: HashMap::new(),
            commands: Vec::new(),
            immediate_open: false,
            immediate_submits: 0,
            frame_number: 0,
            frame_open: None,
            frames_submitted: 0,
        }
    }

    /// Descriptor sizes in the range real drivers report
    pub fn default_properties() -> BindingTableProperties {
        BindingTableProperties {
            uniform_buffer_descriptor_size: 16,
            sampler_descriptor_size: 16,
            combined_image_sampler_descriptor_size: 32,
            sampled_image_descriptor_size: 32,
            storage_image_descriptor_size: 32,
            offset_alignment: 64,
            combined_image_sampler_single_array: true,
        }
    }

    /// How many times the device property query actually ran
    pub fn property_queries(&self) -> u32 {
        self.property_queries.get()
    }

    /// Contents of a live buffer
    pub fn buffer_data(&self, buffer: BufferHandle) -> Option<&[u8]> {
        self.buffers.get(&buffer.0).map(|b| b.data.as_slice())
    }

    pub fn buffer_size(&self, buffer: BufferHandle) -> Option<u64> {
        self.buffers.get(&buffer.0).map(|b| b.data.len() as u64)
    }

    pub fn buffer_usage(&self, buffer: BufferHandle) -> Option<BufferUsage> {
        self.buffers.get(&buffer.0).map(|b| b.usage)
    }

    /// Number of `write_buffer` calls that reached a buffer
    pub fn write_count(&self, buffer: BufferHandle) -> usize {
        self.buffers.get(&buffer.0).map_or(0, |b| b.writes)
    }

    pub fn live_buffer_count(&self) -> usize {
        self.buffers.len()
    }

    pub fn live_texture_count(&self) -> usize {
        self.textures.len()
    }

    pub fn live_pipeline_count(&self) -> usize {
        self.pipelines.len()
    }

    pub fn live_layout_count(&self) -> usize {
        self.layouts.len()
    }

    pub fn texture_exists(&self, texture: TextureHandle) -> bool {
        self.textures.contains_key(&texture.0)
    }

    /// Whether `pipeline` is a render pipeline with blending enabled
    pub fn pipeline_is_blended(&self, pipeline: PipelineHandle) -> bool {
        matches!(
            self.pipelines.get(&pipeline.0),
            Some(DummyPipeline::Render { blended: true })
        )
    }

    pub fn immediate_submits(&self) -> u32 {
        self.immediate_submits
    }

    pub fn frames_submitted(&self) -> u64 {
        self.frames_submitted
    }

    /// Every command recorded so far, in recording order
    pub fn commands(&self) -> &[RecordedCommand] {
        &self.commands
    }

    /// Drain the command log
    pub fn take_commands(&mut self) -> Vec<RecordedCommand> {
        std::mem::take(&mut self.commands)
    }

    fn allocate_handle(&mut self) -> u64 {
        let handle = self.next_handle;
        self.next_handle += 1;
        handle
    }

    fn layout(&self, layout: BindingLayoutHandle) -> BackendResult<&[BindingLayoutEntry]> {
        self.layouts
            .get(&layout.0)
            .map(Vec::as_slice)
            .ok_or_else(|| BackendError::InvalidHandle(format!("binding layout {}", layout.0)))
    }

    fn record(&mut self, command: RecordedCommand) {
        log::trace!("DummyBackend: {:?}", command);
        self.commands.push(command);
    }
}

impl GpuBackend for DummyBackend {
    fn name(&self) -> &'static str {
        "Dummy Backend"
    }

    fn query_binding_table_properties(&self) -> BackendResult<BindingTableProperties> {
        self.property_queries.set(self.property_queries.get() + 1);
        Ok(self.properties)
    }

    fn create_binding_layout(
        &mut self,
        entries: &[BindingLayoutEntry],
    ) -> BackendResult<BindingLayoutHandle> {
        if entries.is_empty() {
            return Err(BackendError::InvalidParameter(
                "binding layout without entries".into(),
            ));
        }
        let mut sorted = entries.to_vec();
        sorted.sort_by_key(|e| e.binding);
        let handle = self.allocate_handle();
        self.layouts.insert(handle, sorted);
        Ok(BindingLayoutHandle(handle))
    }

    fn binding_layout_size(&self, layout: BindingLayoutHandle) -> BackendResult<u64> {
        let properties = self.properties;
        Ok(self
            .layout(layout)?
            .iter()
            .map(|e| e.count as u64 * properties.descriptor_size(e.kind) as u64)
            .sum())
    }

    fn binding_layout_offset(
        &self,
        layout: BindingLayoutHandle,
        binding: u32,
    ) -> BackendResult<u64> {
        let properties = self.properties;
        let mut offset = 0;
        for entry in self.layout(layout)? {
            if entry.binding == binding {
                return Ok(offset);
            }
            offset += entry.count as u64 * properties.descriptor_size(entry.kind) as u64;
        }
        Err(BackendError::InvalidParameter(format!(
            "binding {binding} is not part of layout {}",
            layout.0
        )))
    }

    fn destroy_binding_layout(&mut self, layout: BindingLayoutHandle) {
        self.layouts.remove(&layout.0);
    }

    fn create_buffer(&mut self, desc: &BufferDescriptor) -> BackendResult<BufferHandle> {
        if desc.size == 0 {
            return Err(BackendError::BufferCreationFailed(format!(
                "{:?} has zero size",
                desc.label
            )));
        }
        log::trace!(
            "DummyBackend: creating buffer {:?} (size: {})",
            desc.label,
            desc.size
        );

        let handle = self.allocate_handle();
        let address = self.next_address;
        self.next_address += desc.size.div_ceil(ADDRESS_ALIGNMENT) * ADDRESS_ALIGNMENT;
        self.buffers.insert(
            handle,
            DummyBuffer {
                data: vec![0; desc.size as usize],
                address,
                usage: desc.usage,
                location: desc.location,
                writes: 0,
            },
        );
        Ok(BufferHandle(handle))
    }

    fn buffer_address(&self, buffer: BufferHandle) -> BackendResult<u64> {
        self.buffers
            .get(&buffer.0)
            .map(|b| b.address)
            .ok_or_else(|| BackendError::InvalidHandle(format!("buffer {}", buffer.0)))
    }

    fn write_buffer(
        &mut self,
        buffer: BufferHandle,
        offset: u64,
        data: &[u8],
    ) -> BackendResult<()> {
        let target = self
            .buffers
            .get_mut(&buffer.0)
            .ok_or_else(|| BackendError::InvalidHandle(format!("buffer {}", buffer.0)))?;
        if target.location != MemoryLocation::CpuToGpu {
            return Err(BackendError::InvalidParameter(format!(
                "buffer {} is not CPU visible",
                buffer.0
            )));
        }
        let start = offset as usize;
        let end = start + data.len();
        if end > target.data.len() {
            return Err(BackendError::InvalidParameter(format!(
                "write of {} bytes at {offset} overflows buffer {} ({} bytes)",
                data.len(),
                buffer.0,
                target.data.len()
            )));
        }
        target.data[start..end].copy_from_slice(data);
        target.writes += 1;
        Ok(())
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        self.buffers.remove(&buffer.0);
    }

    fn write_descriptor(
        &self,
        descriptor: &ResourceDescriptor,
        out: &mut [u8],
    ) -> BackendResult<()> {
        out.fill(0);
        let mut encoded = Vec::with_capacity(24);
        match *descriptor {
            ResourceDescriptor::UniformBuffer { address, range } => {
                encoded.extend_from_slice(&address.to_le_bytes());
                encoded.extend_from_slice(&range.to_le_bytes());
            }
            ResourceDescriptor::Sampler(Some(sampler)) => {
                encoded.push(1);
                encoded.extend_from_slice(&sampler.0.to_le_bytes());
            }
            ResourceDescriptor::SampledImage(Some(texture)) => {
                encoded.push(2);
                encoded.extend_from_slice(&texture.0.to_le_bytes());
            }
            ResourceDescriptor::StorageImage(Some(texture)) => {
                encoded.push(3);
                encoded.extend_from_slice(&texture.0.to_le_bytes());
            }
            ResourceDescriptor::CombinedImageSampler(Some((texture, sampler))) => {
                encoded.push(4);
                encoded.extend_from_slice(&texture.0.to_le_bytes());
                encoded.extend_from_slice(&sampler.0.to_le_bytes());
            }
            // Empty entries stay zeroed
            _ => {}
        }
        let len = encoded.len().min(out.len());
        out[..len].copy_from_slice(&encoded[..len]);
        Ok(())
    }

    fn create_texture(
        &mut self,
        desc: &TextureDescriptor,
        pixels: &[u8],
    ) -> BackendResult<TextureHandle> {
        if desc.width == 0 || desc.height == 0 {
            return Err(BackendError::TextureCreationFailed(format!(
                "{:?} has zero extent",
                desc.label
            )));
        }
        if !pixels.is_empty() {
            let expected =
                desc.width as usize * desc.height as usize * desc.format.bytes_per_pixel() as usize;
            if pixels.len() != expected {
                return Err(BackendError::InvalidParameter(format!(
                    "texture {:?} expects {expected} bytes of pixels, got {}",
                    desc.label,
                    pixels.len()
                )));
            }
            self.immediate_submits += 1;
        }
        log::trace!(
            "DummyBackend: creating texture {:?} ({}x{})",
            desc.label,
            desc.width,
            desc.height
        );
        let handle = self.allocate_handle();
        self.textures.insert(handle, desc.clone());
        Ok(TextureHandle(handle))
    }

    fn destroy_texture(&mut self, texture: TextureHandle) {
        self.textures.remove(&texture.0);
    }

    fn create_sampler(&mut self, desc: &SamplerDescriptor) -> BackendResult<SamplerHandle> {
        log::trace!("DummyBackend: creating sampler {:?}", desc.label);
        let handle = self.allocate_handle();
        self.samplers.insert(handle, desc.clone());
        Ok(SamplerHandle(handle))
    }

    fn destroy_sampler(&mut self, sampler: SamplerHandle) {
        self.samplers.remove(&sampler.0);
    }

    fn create_compute_pipeline(
        &mut self,
        desc: &ComputePipelineDescriptor,
    ) -> BackendResult<PipelineHandle> {
        if desc.shader.is_empty() {
            return Err(BackendError::ShaderCreationFailed(format!(
                "{:?} has no shader code",
                desc.label
            )));
        }
        for layout in &desc.binding_layouts {
            self.layout(*layout)?;
        }
        let handle = self.allocate_handle();
        self.pipelines.insert(handle, DummyPipeline::Compute);
        Ok(PipelineHandle(handle))
    }

    fn create_render_pipeline(
        &mut self,
        desc: &RenderPipelineDescriptor,
    ) -> BackendResult<PipelineHandle> {
        if desc.vertex_shader.is_empty() || desc.fragment_shader.is_empty() {
            return Err(BackendError::ShaderCreationFailed(format!(
                "{:?} is missing shader code",
                desc.label
            )));
        }
        for layout in &desc.binding_layouts {
            self.layout(*layout)?;
        }
        let handle = self.allocate_handle();
        self.pipelines.insert(
            handle,
            DummyPipeline::Render {
                blended: desc.blend.is_some(),
            },
        );
        Ok(PipelineHandle(handle))
    }

    fn destroy_pipeline(&mut self, pipeline: PipelineHandle) {
        self.pipelines.remove(&pipeline.0);
    }

    fn begin_immediate(&mut self) -> BackendResult<CommandBufferHandle> {
        if self.immediate_open {
            return Err(BackendError::InvalidParameter(
                "immediate command buffer is already recording".into(),
            ));
        }
        self.immediate_open = true;
        Ok(IMMEDIATE_COMMAND_BUFFER)
    }

    fn submit_immediate(&mut self, cmd: CommandBufferHandle) -> BackendResult<()> {
        if cmd != IMMEDIATE_COMMAND_BUFFER || !self.immediate_open {
            return Err(BackendError::SubmitFailed(format!(
                "command buffer {} is not the recording immediate buffer",
                cmd.0
            )));
        }
        self.immediate_open = false;
        self.immediate_submits += 1;
        Ok(())
    }

    fn begin_frame(&mut self) -> BackendResult<CommandBufferHandle> {
        if self.frame_open.is_some() {
            return Err(BackendError::InvalidParameter("frame already begun".into()));
        }
        let cmd = CommandBufferHandle(FRAME_COMMAND_BUFFER_BASE + self.frame_number % 2);
        self.frame_open = Some(cmd);
        Ok(cmd)
    }

    fn end_frame(&mut self, cmd: CommandBufferHandle) -> BackendResult<()> {
        if self.frame_open != Some(cmd) {
            return Err(BackendError::SubmitFailed(format!(
                "command buffer {} is not the current frame",
                cmd.0
            )));
        }
        self.frame_open = None;
        self.frame_number += 1;
        self.frames_submitted += 1;
        Ok(())
    }

    fn wait_idle(&mut self) -> BackendResult<()> {
        Ok(())
    }

    fn cmd_copy_buffer(
        &mut self,
        _cmd: CommandBufferHandle,
        src: BufferHandle,
        dst: BufferHandle,
        size: u64,
    ) {
        let bytes = self
            .buffers
            .get(&src.0)
            .map(|b| b.data[..(size as usize).min(b.data.len())].to_vec());
        match (bytes, self.buffers.get_mut(&dst.0)) {
            (Some(bytes), Some(target)) => {
                let len = bytes.len().min(target.data.len());
                target.data[..len].copy_from_slice(&bytes[..len]);
            }
            _ => log::warn!("DummyBackend: copy between unknown buffers {} -> {}", src.0, dst.0),
        }
        self.record(RecordedCommand::CopyBuffer { src, dst, size });
    }

    fn cmd_buffer_barrier(&mut self, _cmd: CommandBufferHandle, barrier: &BufferBarrier) {
        self.record(RecordedCommand::Barrier(*barrier));
    }

    fn cmd_bind_pipeline(&mut self, _cmd: CommandBufferHandle, pipeline: PipelineHandle) {
        self.record(RecordedCommand::BindPipeline(pipeline));
    }

    fn cmd_bind_binding_tables(
        &mut self,
        _cmd: CommandBufferHandle,
        tables: &[BindingTableBinding],
    ) {
        self.record(RecordedCommand::BindBindingTables(tables.to_vec()));
    }

    fn cmd_set_binding_table_offsets(
        &mut self,
        _cmd: CommandBufferHandle,
        pipeline: PipelineHandle,
        first_set: u32,
        offsets: &[(u32, u64)],
    ) {
        self.record(RecordedCommand::SetBindingTableOffsets {
            pipeline,
            first_set,
            offsets: offsets.to_vec(),
        });
    }

    fn cmd_dispatch(&mut self, _cmd: CommandBufferHandle, x: u32, y: u32, z: u32) {
        self.record(RecordedCommand::Dispatch { x, y, z });
    }

    fn cmd_bind_index_buffer(
        &mut self,
        _cmd: CommandBufferHandle,
        buffer: BufferHandle,
        offset: u64,
    ) {
        self.record(RecordedCommand::BindIndexBuffer { buffer, offset });
    }

    fn cmd_set_viewport(&mut self, _cmd: CommandBufferHandle, extent: Extent2D) {
        self.record(RecordedCommand::SetViewport(extent));
    }

    fn cmd_draw_indexed_indirect(
        &mut self,
        _cmd: CommandBufferHandle,
        buffer: BufferHandle,
        offset: u64,
        draw_count: u32,
        stride: u32,
    ) {
        self.record(RecordedCommand::DrawIndexedIndirect {
            buffer,
            offset,
            draw_count,
            stride,
        });
    }

    fn cmd_begin_rendering(&mut self, _cmd: CommandBufferHandle, targets: &RenderTargets) {
        self.record(RecordedCommand::BeginRendering {
            color: targets.color,
            depth: targets.depth,
            extent: targets.extent,
        });
    }

    fn cmd_end_rendering(&mut self, _cmd: CommandBufferHandle) {
        self.record(RecordedCommand::EndRendering);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(binding: u32, kind: ResourceKind, count: u32) -> BindingLayoutEntry {
        BindingLayoutEntry {
            binding,
            kind,
            count,
            visibility: ShaderStageFlags::ALL,
        }
    }

    #[test]
    fn test_layout_size_and_offsets() {
        let mut backend = DummyBackend::new();
        let layout = backend
            .create_binding_layout(&[
                entry(1, ResourceKind::SampledImage, 4),
                entry(0, ResourceKind::Sampler, 2),
            ])
            .unwrap();

        assert_eq!(backend.binding_layout_size(layout).unwrap(), 2 * 16 + 4 * 32);
        assert_eq!(backend.binding_layout_offset(layout, 0).unwrap(), 0);
        assert_eq!(backend.binding_layout_offset(layout, 1).unwrap(), 32);
        assert!(backend.binding_layout_offset(layout, 2).is_err());
    }

    #[test]
    fn test_buffer_addresses_are_distinct() {
        let mut backend = DummyBackend::new();
        let a = backend.create_buffer(&BufferDescriptor::staging("a", 10)).unwrap();
        let b = backend.create_buffer(&BufferDescriptor::staging("b", 300)).unwrap();
        let c = backend.create_buffer(&BufferDescriptor::staging("c", 1)).unwrap();

        let a_addr = backend.buffer_address(a).unwrap();
        let b_addr = backend.buffer_address(b).unwrap();
        let c_addr = backend.buffer_address(c).unwrap();
        assert!(a_addr + 10 <= b_addr);
        assert!(b_addr + 300 <= c_addr);
        assert_eq!(b_addr % ADDRESS_ALIGNMENT, 0);
    }

    #[test]
    fn test_write_buffer_rejects_gpu_only_and_overflow() {
        let mut backend = DummyBackend::new();
        let gpu = backend
            .create_buffer(&BufferDescriptor {
                label: None,
                size: 16,
                usage: BufferUsage::STORAGE,
                location: MemoryLocation::GpuOnly,
            })
            .unwrap();
        assert!(backend.write_buffer(gpu, 0, &[1, 2, 3]).is_err());

        let mapped = backend.create_buffer(&BufferDescriptor::staging("mapped", 4)).unwrap();
        assert!(backend.write_buffer(mapped, 2, &[1, 2, 3]).is_err());
        backend.write_buffer(mapped, 1, &[7, 8, 9]).unwrap();
        assert_eq!(backend.buffer_data(mapped).unwrap(), &[0, 7, 8, 9]);
        assert_eq!(backend.write_count(mapped), 1);
    }

    #[test]
    fn test_copy_runs_eagerly_and_is_logged() {
        let mut backend = DummyBackend::new();
        let src = backend.create_buffer(&BufferDescriptor::staging("src", 4)).unwrap();
        let dst = backend
            .create_buffer(&BufferDescriptor {
                label: None,
                size: 4,
                usage: BufferUsage::COPY_DST,
                location: MemoryLocation::GpuOnly,
            })
            .unwrap();
        backend.write_buffer(src, 0, &[1, 2, 3, 4]).unwrap();

        backend
            .immediate_submit(|backend, cmd| backend.cmd_copy_buffer(cmd, src, dst, 4))
            .unwrap();

        assert_eq!(backend.buffer_data(dst).unwrap(), &[1, 2, 3, 4]);
        assert_eq!(backend.immediate_submits(), 1);
        assert_eq!(
            backend.commands(),
            &[RecordedCommand::CopyBuffer { src, dst, size: 4 }]
        );
    }

    #[test]
    fn test_empty_descriptors_encode_as_zeroes() {
        let backend = DummyBackend::new();
        let mut out = [0xFFu8; 32];
        backend
            .write_descriptor(&ResourceDescriptor::SampledImage(None), &mut out)
            .unwrap();
        assert!(out.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_frames_alternate_command_buffers() {
        let mut backend = DummyBackend::new();
        let first = backend.begin_frame().unwrap();
        assert!(backend.begin_frame().is_err());
        backend.end_frame(first).unwrap();
        let second = backend.begin_frame().unwrap();
        backend.end_frame(second).unwrap();
        let third = backend.begin_frame().unwrap();

        assert_ne!(first, second);
        assert_eq!(first, third);
        assert_eq!(backend.frames_submitted(), 2);
    }
}
