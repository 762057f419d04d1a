//! Vulkan backend implementation using ash
//!
//! Headless: the renderer draws into textures it owns and never presents.
//! Binding tables are `VK_EXT_descriptor_buffer` buffers, shaders reach scene
//! data through buffer device addresses, and drawing uses dynamic rendering
//! with synchronization2 barriers.

mod conversion;
mod device;
mod sync;

use std::collections::HashMap;
use std::ffi::CString;
use std::sync::Arc;
use std::time::Duration;

use ash::vk;
use ash::vk::Handle;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme, Allocator};
use parking_lot::Mutex;

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::binding_table::BindingTableProperties;
use crate::frame::FrameRing;
use sync::SubmitContext;

/// Startup options for [`VulkanBackend`]
#[derive(Debug, Clone)]
pub struct VulkanBackendConfig {
    pub application_name: String,
    /// Enable `VK_LAYER_KHRONOS_validation` when it is installed
    pub enable_validation: bool,
    /// How long fence waits may block before failing with [`BackendError::Timeout`]
    pub fence_timeout: Duration,
}

impl Default for VulkanBackendConfig {
    fn default() -> Self {
        Self {
            application_name: "batch-renderer".to_string(),
            enable_validation: cfg!(debug_assertions),
            fence_timeout: Duration::from_secs(1),
        }
    }
}

/// Vulkan backend implementation
pub struct VulkanBackend {
    config: VulkanBackendConfig,
    _entry: ash::Entry,
    instance: ash::Instance,
    debug_utils: Option<(ash::ext::debug_utils::Instance, vk::DebugUtilsMessengerEXT)>,
    physical_device: vk::PhysicalDevice,
    device: ash::Device,
    descriptor_buffer: ash::ext::descriptor_buffer::Device,
    queue: vk::Queue,
    queue_family: u32,
    allocator: Option<Arc<Mutex<Allocator>>>,

    immediate: SubmitContext,
    frames: FrameRing<SubmitContext>,
    frame_open: bool,

    buffers: HashMap<u64, VkBuffer>,
    textures: HashMap<u64, VkTexture>,
    samplers: HashMap<u64, vk::Sampler>,
    layouts: HashMap<u64, vk::DescriptorSetLayout>,
    pipelines: HashMap<u64, VkPipeline>,
    next_handle: u64,
}

struct VkBuffer {
    buffer: vk::Buffer,
    allocation: Allocation,
    size: u64,
    address: Option<u64>,
}

struct VkTexture {
    image: vk::Image,
    view: vk::ImageView,
    allocation: Allocation,
    format: TextureFormat,
    /// Layout after every command recorded so far
    layout: vk::ImageLayout,
}

struct VkPipeline {
    pipeline: vk::Pipeline,
    layout: vk::PipelineLayout,
    bind_point: vk::PipelineBindPoint,
}

fn vk_cmd(cmd: CommandBufferHandle) -> vk::CommandBuffer {
    vk::CommandBuffer::from_raw(cmd.raw())
}

fn cmd_handle(cmd: vk::CommandBuffer) -> CommandBufferHandle {
    CommandBufferHandle::from_raw(cmd.as_raw())
}

impl VulkanBackend {
    /// Bring up a headless device with descriptor buffers enabled.
    ///
    /// Fails with [`BackendError::FeatureNotSupported`] when no GPU exposes
    /// Vulkan 1.3 together with `VK_EXT_descriptor_buffer`.
    pub fn new(config: VulkanBackendConfig) -> BackendResult<Self> {
        let entry = unsafe { ash::Entry::load() }
            .map_err(|e| BackendError::InitializationFailed(format!("Vulkan loader: {e}")))?;
        let bundle =
            device::create_instance(&entry, &config.application_name, config.enable_validation)?;
        let instance = bundle.instance;

        let (physical_device, queue_family) = device::select_physical_device(&instance)?;
        let device = device::create_logical_device(&instance, physical_device, queue_family)?;
        let queue = unsafe { device.get_device_queue(queue_family, 0) };
        let descriptor_buffer = ash::ext::descriptor_buffer::Device::new(&instance, &device);
        let allocator = device::create_allocator(&instance, physical_device, &device)?;

        let immediate = SubmitContext::new(&device, queue_family, true)?;
        let contexts = [
            SubmitContext::new(&device, queue_family, true)?,
            SubmitContext::new(&device, queue_family, true)?,
        ];
        let frames = FrameRing::from_fn(|i| contexts[i]);

        log::info!("Vulkan backend ready (queue family {queue_family})");

        Ok(Self {
            config,
            _entry: entry,
            instance,
            debug_utils: bundle.debug_utils,
            physical_device,
            device,
            descriptor_buffer,
            queue,
            queue_family,
            allocator: Some(Arc::new(Mutex::new(allocator))),
            immediate,
            frames,
            frame_open: false,
            buffers: HashMap::new(),
            textures: HashMap::new(),
            samplers: HashMap::new(),
            layouts: HashMap::new(),
            pipelines: HashMap::new(),
            next_handle: 1,
        })
    }

    pub fn config(&self) -> &VulkanBackendConfig {
        &self.config
    }

    pub fn device(&self) -> &ash::Device {
        &self.device
    }

    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    pub fn queue_family(&self) -> u32 {
        self.queue_family
    }

    /// Frames submitted so far
    pub fn frame_number(&self) -> u64 {
        self.frames.frame_number()
    }

    fn timeout_ns(&self) -> u64 {
        self.config.fence_timeout.as_nanos().min(u64::MAX as u128) as u64
    }

    fn allocate_handle(&mut self) -> u64 {
        let id = self.next_handle;
        self.next_handle += 1;
        id
    }

    fn allocator(&self) -> BackendResult<&Arc<Mutex<Allocator>>> {
        self.allocator
            .as_ref()
            .ok_or_else(|| BackendError::InitializationFailed("allocator already released".into()))
    }

    fn allocate(
        &self,
        name: &str,
        requirements: vk::MemoryRequirements,
        location: MemoryLocation,
        linear: bool,
    ) -> BackendResult<Allocation> {
        let location = match location {
            MemoryLocation::GpuOnly => gpu_allocator::MemoryLocation::GpuOnly,
            MemoryLocation::CpuToGpu => gpu_allocator::MemoryLocation::CpuToGpu,
        };
        self.allocator()?
            .lock()
            .allocate(&AllocationCreateDesc {
                name,
                requirements,
                location,
                linear,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })
            .map_err(|e| match e {
                gpu_allocator::AllocationError::OutOfMemory => BackendError::OutOfMemory,
                other => BackendError::BufferCreationFailed(format!("{name}: {other}")),
            })
    }

    fn free(&self, allocation: Allocation) {
        if let Some(allocator) = &self.allocator {
            if let Err(e) = allocator.lock().free(allocation) {
                log::warn!("Failed to free allocation: {e}");
            }
        }
    }

    fn vk_buffer(&self, buffer: BufferHandle) -> Option<vk::Buffer> {
        let found = self.buffers.get(&buffer.0).map(|b| b.buffer);
        if found.is_none() {
            log::warn!("Unknown buffer handle {}", buffer.0);
        }
        found
    }

    fn pipeline(&self, pipeline: PipelineHandle) -> Option<&VkPipeline> {
        let found = self.pipelines.get(&pipeline.0);
        if found.is_none() {
            log::warn!("Unknown pipeline handle {}", pipeline.0);
        }
        found
    }

    fn create_shader_module(&self, words: &[u32]) -> BackendResult<vk::ShaderModule> {
        let info = vk::ShaderModuleCreateInfo::default().code(words);
        unsafe { self.device.create_shader_module(&info, None) }
            .map_err(|e| BackendError::ShaderCreationFailed(format!("{e:?}")))
    }

    fn create_pipeline_layout(
        &self,
        binding_layouts: &[BindingLayoutHandle],
    ) -> BackendResult<vk::PipelineLayout> {
        let set_layouts = binding_layouts
            .iter()
            .map(|handle| {
                self.layouts.get(&handle.0).copied().ok_or_else(|| {
                    BackendError::InvalidHandle(format!("binding layout {}", handle.0))
                })
            })
            .collect::<BackendResult<Vec<_>>>()?;

        let info = vk::PipelineLayoutCreateInfo::default().set_layouts(&set_layouts);
        unsafe { self.device.create_pipeline_layout(&info, None) }
            .map_err(|e| BackendError::PipelineCreationFailed(format!("pipeline layout: {e:?}")))
    }

    fn register_pipeline(
        &mut self,
        result: Result<Vec<vk::Pipeline>, (Vec<vk::Pipeline>, vk::Result)>,
        layout: vk::PipelineLayout,
        bind_point: vk::PipelineBindPoint,
        label: &str,
    ) -> BackendResult<PipelineHandle> {
        let pipeline = result
            .map_err(|(_, e)| e)
            .and_then(|pipelines| pipelines.into_iter().next().ok_or(vk::Result::ERROR_UNKNOWN));
        let pipeline = match pipeline {
            Ok(pipeline) => pipeline,
            Err(e) => {
                unsafe { self.device.destroy_pipeline_layout(layout, None) };
                return Err(BackendError::PipelineCreationFailed(format!("{label}: {e:?}")));
            }
        };

        let id = self.allocate_handle();
        self.pipelines.insert(
            id,
            VkPipeline {
                pipeline,
                layout,
                bind_point,
            },
        );
        log::debug!("Created pipeline '{label}'");
        Ok(PipelineHandle(id))
    }

    /// Record a layout transition and remember the new layout.
    ///
    /// `discard` treats the current contents as undefined.
    fn transition_image(
        &mut self,
        cmd: vk::CommandBuffer,
        texture: TextureHandle,
        new_layout: vk::ImageLayout,
        discard: bool,
    ) {
        let Some(tex) = self.textures.get_mut(&texture.0) else {
            log::warn!("Unknown texture handle {}", texture.0);
            return;
        };
        if tex.layout == new_layout && !discard {
            return;
        }
        let old_layout = if discard {
            vk::ImageLayout::UNDEFINED
        } else {
            tex.layout
        };

        let (src_stage, src_access) = conversion::layout_scope(old_layout);
        let (dst_stage, dst_access) = conversion::layout_scope(new_layout);
        let barriers = [vk::ImageMemoryBarrier2::default()
            .src_stage_mask(src_stage)
            .src_access_mask(src_access)
            .dst_stage_mask(dst_stage)
            .dst_access_mask(dst_access)
            .old_layout(old_layout)
            .new_layout(new_layout)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(tex.image)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: conversion::aspect_mask(tex.format),
                base_mip_level: 0,
                level_count: vk::REMAINING_MIP_LEVELS,
                base_array_layer: 0,
                layer_count: vk::REMAINING_ARRAY_LAYERS,
            })];
        tex.layout = new_layout;

        let dependency = vk::DependencyInfo::default().image_memory_barriers(&barriers);
        unsafe { self.device.cmd_pipeline_barrier2(cmd, &dependency) };
    }

    fn record_texture_upload(
        &mut self,
        cmd: vk::CommandBuffer,
        texture: TextureHandle,
        staging: BufferHandle,
        width: u32,
        height: u32,
    ) {
        self.transition_image(cmd, texture, vk::ImageLayout::TRANSFER_DST_OPTIMAL, true);

        let (Some(source), Some(image)) = (
            self.vk_buffer(staging),
            self.textures.get(&texture.0).map(|t| t.image),
        ) else {
            return;
        };
        let region = vk::BufferImageCopy::default()
            .image_subresource(vk::ImageSubresourceLayers {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                mip_level: 0,
                base_array_layer: 0,
                layer_count: 1,
            })
            .image_extent(vk::Extent3D {
                width,
                height,
                depth: 1,
            });
        unsafe {
            self.device.cmd_copy_buffer_to_image(
                cmd,
                source,
                image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region],
            );
        }

        self.transition_image(cmd, texture, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL, false);
    }

    fn get_descriptor(
        &self,
        info: &vk::DescriptorGetInfoEXT<'_>,
        out: &mut [u8],
    ) -> BackendResult<()> {
        unsafe { self.descriptor_buffer.get_descriptor(info, out) };
        Ok(())
    }

    fn texture_view(&self, texture: TextureHandle) -> BackendResult<vk::ImageView> {
        self.textures
            .get(&texture.0)
            .map(|t| t.view)
            .ok_or_else(|| BackendError::InvalidHandle(format!("texture {}", texture.0)))
    }

    fn sampler(&self, sampler: SamplerHandle) -> BackendResult<vk::Sampler> {
        self.samplers
            .get(&sampler.0)
            .copied()
            .ok_or_else(|| BackendError::InvalidHandle(format!("sampler {}", sampler.0)))
    }
}

impl GpuBackend for VulkanBackend {
    fn name(&self) -> &'static str {
        "Vulkan"
    }

    fn query_binding_table_properties(&self) -> BackendResult<BindingTableProperties> {
        let mut descriptor_buffer = vk::PhysicalDeviceDescriptorBufferPropertiesEXT::default();
        let mut properties =
            vk::PhysicalDeviceProperties2::default().push_next(&mut descriptor_buffer);
        unsafe {
            self.instance
                .get_physical_device_properties2(self.physical_device, &mut properties)
        };

        Ok(BindingTableProperties {
            uniform_buffer_descriptor_size: descriptor_buffer.uniform_buffer_descriptor_size,
            sampler_descriptor_size: descriptor_buffer.sampler_descriptor_size,
            combined_image_sampler_descriptor_size: descriptor_buffer
                .combined_image_sampler_descriptor_size,
            sampled_image_descriptor_size: descriptor_buffer.sampled_image_descriptor_size,
            storage_image_descriptor_size: descriptor_buffer.storage_image_descriptor_size,
            offset_alignment: descriptor_buffer.descriptor_buffer_offset_alignment,
            combined_image_sampler_single_array: descriptor_buffer
                .combined_image_sampler_descriptor_single_array
                == vk::TRUE,
        })
    }

    fn create_binding_layout(
        &mut self,
        entries: &[BindingLayoutEntry],
    ) -> BackendResult<BindingLayoutHandle> {
        let bindings: Vec<vk::DescriptorSetLayoutBinding> = entries
            .iter()
            .map(|entry| {
                vk::DescriptorSetLayoutBinding::default()
                    .binding(entry.binding)
                    .descriptor_type(conversion::descriptor_type(entry.kind))
                    .descriptor_count(entry.count)
                    .stage_flags(conversion::shader_stages(entry.visibility))
            })
            .collect();
        let binding_flags = vec![vk::DescriptorBindingFlags::PARTIALLY_BOUND; bindings.len()];
        let mut flags_info =
            vk::DescriptorSetLayoutBindingFlagsCreateInfo::default().binding_flags(&binding_flags);

        let info = vk::DescriptorSetLayoutCreateInfo::default()
            .flags(vk::DescriptorSetLayoutCreateFlags::DESCRIPTOR_BUFFER_EXT)
            .bindings(&bindings)
            .push_next(&mut flags_info);

        let layout = unsafe { self.device.create_descriptor_set_layout(&info, None) }.map_err(|e| {
            BackendError::PipelineCreationFailed(format!("descriptor set layout: {e:?}"))
        })?;

        let id = self.allocate_handle();
        self.layouts.insert(id, layout);
        Ok(BindingLayoutHandle(id))
    }

    fn binding_layout_size(&self, layout: BindingLayoutHandle) -> BackendResult<u64> {
        let layout = self
            .layouts
            .get(&layout.0)
            .ok_or_else(|| BackendError::InvalidHandle(format!("binding layout {}", layout.0)))?;
        Ok(unsafe { self.descriptor_buffer.get_descriptor_set_layout_size(*layout) })
    }

    fn binding_layout_offset(
        &self,
        layout: BindingLayoutHandle,
        binding: u32,
    ) -> BackendResult<u64> {
        let layout = self
            .layouts
            .get(&layout.0)
            .ok_or_else(|| BackendError::InvalidHandle(format!("binding layout {}", layout.0)))?;
        Ok(unsafe {
            self.descriptor_buffer
                .get_descriptor_set_layout_binding_offset(*layout, binding)
        })
    }

    fn destroy_binding_layout(&mut self, layout: BindingLayoutHandle) {
        if let Some(layout) = self.layouts.remove(&layout.0) {
            unsafe { self.device.destroy_descriptor_set_layout(layout, None) };
        }
    }

    fn create_buffer(&mut self, desc: &BufferDescriptor) -> BackendResult<BufferHandle> {
        let name = desc.label.as_deref().unwrap_or("buffer");
        let info = vk::BufferCreateInfo::default()
            .size(desc.size)
            .usage(conversion::buffer_usage(desc.usage))
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let buffer = unsafe { self.device.create_buffer(&info, None) }
            .map_err(|e| BackendError::BufferCreationFailed(format!("{name}: {e:?}")))?;

        let requirements = unsafe { self.device.get_buffer_memory_requirements(buffer) };
        let allocation = match self.allocate(name, requirements, desc.location, true) {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { self.device.destroy_buffer(buffer, None) };
                return Err(e);
            }
        };
        let bound = unsafe {
            self.device
                .bind_buffer_memory(buffer, allocation.memory(), allocation.offset())
        };
        if let Err(e) = bound {
            unsafe { self.device.destroy_buffer(buffer, None) };
            self.free(allocation);
            return Err(BackendError::BufferCreationFailed(format!("{name}: {e:?}")));
        }

        let address = desc.usage.contains(BufferUsage::DEVICE_ADDRESS).then(|| unsafe {
            self.device
                .get_buffer_device_address(&vk::BufferDeviceAddressInfo::default().buffer(buffer))
        });

        let id = self.allocate_handle();
        self.buffers.insert(
            id,
            VkBuffer {
                buffer,
                allocation,
                size: desc.size,
                address,
            },
        );
        Ok(BufferHandle(id))
    }

    fn buffer_address(&self, buffer: BufferHandle) -> BackendResult<u64> {
        let vk_buffer = self
            .buffers
            .get(&buffer.0)
            .ok_or_else(|| BackendError::InvalidHandle(format!("buffer {}", buffer.0)))?;
        vk_buffer.address.ok_or_else(|| {
            BackendError::InvalidParameter(format!(
                "buffer {} was not created with DEVICE_ADDRESS usage",
                buffer.0
            ))
        })
    }

    fn write_buffer(
        &mut self,
        buffer: BufferHandle,
        offset: u64,
        data: &[u8],
    ) -> BackendResult<()> {
        let vk_buffer = self
            .buffers
            .get_mut(&buffer.0)
            .ok_or_else(|| BackendError::InvalidHandle(format!("buffer {}", buffer.0)))?;
        let end = offset + data.len() as u64;
        if end > vk_buffer.size {
            return Err(BackendError::InvalidParameter(format!(
                "write of {} bytes at {offset} overflows buffer of {} bytes",
                data.len(),
                vk_buffer.size
            )));
        }
        let mapped = vk_buffer.allocation.mapped_slice_mut().ok_or_else(|| {
            BackendError::InvalidParameter(format!("buffer {} is not host visible", buffer.0))
        })?;
        mapped[offset as usize..end as usize].copy_from_slice(data);
        Ok(())
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        if let Some(vk_buffer) = self.buffers.remove(&buffer.0) {
            unsafe { self.device.destroy_buffer(vk_buffer.buffer, None) };
            self.free(vk_buffer.allocation);
        }
    }

    fn write_descriptor(
        &self,
        descriptor: &ResourceDescriptor,
        out: &mut [u8],
    ) -> BackendResult<()> {
        let ty = conversion::descriptor_type(descriptor.kind());
        match *descriptor {
            ResourceDescriptor::UniformBuffer { address, range } => {
                let info = vk::DescriptorAddressInfoEXT::default()
                    .address(address)
                    .range(range)
                    .format(vk::Format::UNDEFINED);
                let data = vk::DescriptorDataEXT { p_uniform_buffer: &info };
                self.get_descriptor(&vk::DescriptorGetInfoEXT::default().ty(ty).data(data), out)
            }
            ResourceDescriptor::Sampler(Some(sampler)) => {
                let sampler = self.sampler(sampler)?;
                let data = vk::DescriptorDataEXT { p_sampler: &sampler };
                self.get_descriptor(&vk::DescriptorGetInfoEXT::default().ty(ty).data(data), out)
            }
            ResourceDescriptor::SampledImage(Some(texture)) => {
                let info = vk::DescriptorImageInfo::default()
                    .image_view(self.texture_view(texture)?)
                    .image_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
                let data = vk::DescriptorDataEXT { p_sampled_image: &info };
                self.get_descriptor(&vk::DescriptorGetInfoEXT::default().ty(ty).data(data), out)
            }
            ResourceDescriptor::StorageImage(Some(texture)) => {
                let info = vk::DescriptorImageInfo::default()
                    .image_view(self.texture_view(texture)?)
                    .image_layout(vk::ImageLayout::GENERAL);
                let data = vk::DescriptorDataEXT { p_storage_image: &info };
                self.get_descriptor(&vk::DescriptorGetInfoEXT::default().ty(ty).data(data), out)
            }
            ResourceDescriptor::CombinedImageSampler(Some((texture, sampler))) => {
                let info = vk::DescriptorImageInfo::default()
                    .sampler(self.sampler(sampler)?)
                    .image_view(self.texture_view(texture)?)
                    .image_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
                let data = vk::DescriptorDataEXT {
                    p_combined_image_sampler: &info,
                };
                self.get_descriptor(&vk::DescriptorGetInfoEXT::default().ty(ty).data(data), out)
            }
            ResourceDescriptor::Sampler(None)
            | ResourceDescriptor::SampledImage(None)
            | ResourceDescriptor::StorageImage(None)
            | ResourceDescriptor::CombinedImageSampler(None) => {
                out.fill(0);
                Ok(())
            }
        }
    }

    fn create_texture(
        &mut self,
        desc: &TextureDescriptor,
        pixels: &[u8],
    ) -> BackendResult<TextureHandle> {
        let name = desc.label.as_deref().unwrap_or("texture");
        let expected =
            desc.width as usize * desc.height as usize * desc.format.bytes_per_pixel() as usize;
        if !pixels.is_empty() && pixels.len() != expected {
            return Err(BackendError::InvalidParameter(format!(
                "{name}: {} bytes of pixels for a {}x{} {:?} texture",
                pixels.len(),
                desc.width,
                desc.height,
                desc.format
            )));
        }

        let format = conversion::texture_format(desc.format);
        let mut usage = conversion::image_usage(desc.usage, desc.format);
        if !pixels.is_empty() {
            usage |= vk::ImageUsageFlags::TRANSFER_DST;
        }
        let image_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(format)
            .extent(vk::Extent3D {
                width: desc.width,
                height: desc.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);
        let image = unsafe { self.device.create_image(&image_info, None) }
            .map_err(|e| BackendError::TextureCreationFailed(format!("{name}: {e:?}")))?;

        let requirements = unsafe { self.device.get_image_memory_requirements(image) };
        let allocation = match self.allocate(name, requirements, MemoryLocation::GpuOnly, false) {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { self.device.destroy_image(image, None) };
                return Err(e);
            }
        };

        let view_info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: conversion::aspect_mask(desc.format),
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            });
        let view = unsafe {
            self.device
                .bind_image_memory(image, allocation.memory(), allocation.offset())
                .and_then(|()| self.device.create_image_view(&view_info, None))
        };
        let view = match view {
            Ok(view) => view,
            Err(e) => {
                unsafe { self.device.destroy_image(image, None) };
                self.free(allocation);
                return Err(BackendError::TextureCreationFailed(format!("{name}: {e:?}")));
            }
        };

        let id = self.allocate_handle();
        self.textures.insert(
            id,
            VkTexture {
                image,
                view,
                allocation,
                format: desc.format,
                layout: vk::ImageLayout::UNDEFINED,
            },
        );
        let handle = TextureHandle(id);

        if !pixels.is_empty() {
            let staging = self.create_buffer(&BufferDescriptor::staging(
                &format!("{name} staging"),
                pixels.len() as u64,
            ))?;
            let (width, height) = (desc.width, desc.height);
            let uploaded = self.write_buffer(staging, 0, pixels).and_then(|()| {
                self.immediate_submit(|backend, cmd| {
                    backend.record_texture_upload(vk_cmd(cmd), handle, staging, width, height);
                })
            });
            self.destroy_buffer(staging);
            if let Err(e) = uploaded {
                self.destroy_texture(handle);
                return Err(e);
            }
            log::debug!("Uploaded {width}x{height} texture '{name}'");
        }

        Ok(handle)
    }

    fn destroy_texture(&mut self, texture: TextureHandle) {
        if let Some(tex) = self.textures.remove(&texture.0) {
            unsafe {
                self.device.destroy_image_view(tex.view, None);
                self.device.destroy_image(tex.image, None);
            }
            self.free(tex.allocation);
        }
    }

    fn create_sampler(&mut self, desc: &SamplerDescriptor) -> BackendResult<SamplerHandle> {
        let info = vk::SamplerCreateInfo::default()
            .mag_filter(conversion::filter(desc.mag_filter))
            .min_filter(conversion::filter(desc.min_filter))
            .mipmap_mode(conversion::mipmap_mode(desc.min_filter))
            .address_mode_u(conversion::address_mode(desc.address_mode_u))
            .address_mode_v(conversion::address_mode(desc.address_mode_v))
            .address_mode_w(conversion::address_mode(desc.address_mode_u))
            .min_lod(0.0)
            .max_lod(vk::LOD_CLAMP_NONE)
            .border_color(vk::BorderColor::FLOAT_OPAQUE_BLACK);

        let sampler = unsafe { self.device.create_sampler(&info, None) }
            .map_err(|e| BackendError::TextureCreationFailed(format!("sampler: {e:?}")))?;

        let id = self.allocate_handle();
        self.samplers.insert(id, sampler);
        Ok(SamplerHandle(id))
    }

    fn destroy_sampler(&mut self, sampler: SamplerHandle) {
        if let Some(sampler) = self.samplers.remove(&sampler.0) {
            unsafe { self.device.destroy_sampler(sampler, None) };
        }
    }

    fn create_compute_pipeline(
        &mut self,
        desc: &ComputePipelineDescriptor,
    ) -> BackendResult<PipelineHandle> {
        let label = desc.label.as_deref().unwrap_or("compute");
        let entry_point = CString::new(desc.entry_point.as_str())
            .map_err(|e| BackendError::PipelineCreationFailed(format!("{label}: {e}")))?;

        let layout = self.create_pipeline_layout(&desc.binding_layouts)?;
        let module = match self.create_shader_module(&desc.shader) {
            Ok(module) => module,
            Err(e) => {
                unsafe { self.device.destroy_pipeline_layout(layout, None) };
                return Err(e);
            }
        };

        let stage = vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::COMPUTE)
            .module(module)
            .name(&entry_point);
        let info = vk::ComputePipelineCreateInfo::default()
            .flags(vk::PipelineCreateFlags::DESCRIPTOR_BUFFER_EXT)
            .stage(stage)
            .layout(layout);

        let result = unsafe {
            self.device
                .create_compute_pipelines(vk::PipelineCache::null(), &[info], None)
        };
        unsafe { self.device.destroy_shader_module(module, None) };

        self.register_pipeline(result, layout, vk::PipelineBindPoint::COMPUTE, label)
    }

    fn create_render_pipeline(
        &mut self,
        desc: &RenderPipelineDescriptor,
    ) -> BackendResult<PipelineHandle> {
        let label = desc.label.as_deref().unwrap_or("render");
        let layout = self.create_pipeline_layout(&desc.binding_layouts)?;
        let modules = self
            .create_shader_module(&desc.vertex_shader)
            .and_then(|vertex| match self.create_shader_module(&desc.fragment_shader) {
                Ok(fragment) => Ok((vertex, fragment)),
                Err(e) => {
                    unsafe { self.device.destroy_shader_module(vertex, None) };
                    Err(e)
                }
            });
        let (vertex, fragment) = match modules {
            Ok(modules) => modules,
            Err(e) => {
                unsafe { self.device.destroy_pipeline_layout(layout, None) };
                return Err(e);
            }
        };

        let stages = [
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::VERTEX)
                .module(vertex)
                .name(c"main"),
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::FRAGMENT)
                .module(fragment)
                .name(c"main"),
        ];

        // Vertices are pulled through device addresses
        let vertex_input = vk::PipelineVertexInputStateCreateInfo::default();
        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(vk::PrimitiveTopology::TRIANGLE_LIST);
        let viewport_state = vk::PipelineViewportStateCreateInfo::default()
            .viewport_count(1)
            .scissor_count(1);
        let rasterization = vk::PipelineRasterizationStateCreateInfo::default()
            .polygon_mode(vk::PolygonMode::FILL)
            .cull_mode(conversion::cull_mode(desc.cull_mode))
            .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
            .line_width(1.0);
        let multisample = vk::PipelineMultisampleStateCreateInfo::default()
            .rasterization_samples(vk::SampleCountFlags::TYPE_1);
        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::default()
            .depth_test_enable(desc.depth_format.is_some())
            .depth_write_enable(desc.depth_write_enabled)
            .depth_compare_op(conversion::compare_op(desc.depth_compare))
            .min_depth_bounds(0.0)
            .max_depth_bounds(1.0);
        let attachments = [conversion::color_blend_attachment(desc.blend)];
        let color_blend =
            vk::PipelineColorBlendStateCreateInfo::default().attachments(&attachments);
        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic = vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

        let color_formats = [conversion::texture_format(desc.color_format)];
        let mut rendering = vk::PipelineRenderingCreateInfo::default()
            .color_attachment_formats(&color_formats)
            .depth_attachment_format(
                desc.depth_format
                    .map_or(vk::Format::UNDEFINED, conversion::texture_format),
            );

        let info = vk::GraphicsPipelineCreateInfo::default()
            .flags(vk::PipelineCreateFlags::DESCRIPTOR_BUFFER_EXT)
            .stages(&stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterization)
            .multisample_state(&multisample)
            .depth_stencil_state(&depth_stencil)
            .color_blend_state(&color_blend)
            .dynamic_state(&dynamic)
            .layout(layout)
            .push_next(&mut rendering);

        let result = unsafe {
            self.device
                .create_graphics_pipelines(vk::PipelineCache::null(), &[info], None)
        };
        unsafe {
            self.device.destroy_shader_module(vertex, None);
            self.device.destroy_shader_module(fragment, None);
        }

        self.register_pipeline(result, layout, vk::PipelineBindPoint::GRAPHICS, label)
    }

    fn destroy_pipeline(&mut self, pipeline: PipelineHandle) {
        if let Some(pipeline) = self.pipelines.remove(&pipeline.0) {
            unsafe {
                self.device.destroy_pipeline(pipeline.pipeline, None);
                self.device.destroy_pipeline_layout(pipeline.layout, None);
            }
        }
    }

    fn begin_immediate(&mut self) -> BackendResult<CommandBufferHandle> {
        self.immediate.begin(&self.device, self.timeout_ns())?;
        Ok(cmd_handle(self.immediate.cmd))
    }

    fn submit_immediate(&mut self, cmd: CommandBufferHandle) -> BackendResult<()> {
        if vk_cmd(cmd) != self.immediate.cmd {
            return Err(BackendError::InvalidParameter(
                "not the immediate command buffer".into(),
            ));
        }
        self.immediate.submit(&self.device, self.queue)?;
        self.immediate.wait(&self.device, self.timeout_ns())
    }

    fn begin_frame(&mut self) -> BackendResult<CommandBufferHandle> {
        if self.frame_open {
            return Err(BackendError::InvalidParameter("frame already begun".into()));
        }
        let frame = *self.frames.current();
        frame.begin(&self.device, self.timeout_ns())?;
        self.frame_open = true;
        Ok(cmd_handle(frame.cmd))
    }

    fn end_frame(&mut self, cmd: CommandBufferHandle) -> BackendResult<()> {
        let frame = *self.frames.current();
        if !self.frame_open || vk_cmd(cmd) != frame.cmd {
            return Err(BackendError::InvalidParameter(
                "command buffer is not the current frame".into(),
            ));
        }
        frame.submit(&self.device, self.queue)?;
        self.frame_open = false;
        self.frames.advance();
        Ok(())
    }

    fn wait_idle(&mut self) -> BackendResult<()> {
        unsafe { self.device.device_wait_idle() }
            .map_err(|e| conversion::submit_error("waiting for idle", e))
    }

    fn cmd_copy_buffer(
        &mut self,
        cmd: CommandBufferHandle,
        src: BufferHandle,
        dst: BufferHandle,
        size: u64,
    ) {
        let (Some(src), Some(dst)) = (self.vk_buffer(src), self.vk_buffer(dst)) else {
            return;
        };
        let region = vk::BufferCopy::default().size(size);
        unsafe { self.device.cmd_copy_buffer(vk_cmd(cmd), src, dst, &[region]) };
    }

    fn cmd_buffer_barrier(&mut self, cmd: CommandBufferHandle, barrier: &BufferBarrier) {
        let Some(buffer) = self.vk_buffer(barrier.buffer) else {
            return;
        };
        let (src_stage, src_access) = conversion::access_scope(barrier.src);
        let (dst_stage, dst_access) = conversion::access_scope(barrier.dst);
        let barriers = [vk::BufferMemoryBarrier2::default()
            .src_stage_mask(src_stage)
            .src_access_mask(src_access)
            .dst_stage_mask(dst_stage)
            .dst_access_mask(dst_access)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .buffer(buffer)
            .offset(0)
            .size(vk::WHOLE_SIZE)];
        let dependency = vk::DependencyInfo::default().buffer_memory_barriers(&barriers);
        unsafe { self.device.cmd_pipeline_barrier2(vk_cmd(cmd), &dependency) };
    }

    fn cmd_bind_pipeline(&mut self, cmd: CommandBufferHandle, pipeline: PipelineHandle) {
        if let Some(pipeline) = self.pipeline(pipeline) {
            unsafe {
                self.device
                    .cmd_bind_pipeline(vk_cmd(cmd), pipeline.bind_point, pipeline.pipeline)
            };
        }
    }

    fn cmd_bind_binding_tables(
        &mut self,
        cmd: CommandBufferHandle,
        tables: &[BindingTableBinding],
    ) {
        let infos: Vec<vk::DescriptorBufferBindingInfoEXT> = tables
            .iter()
            .map(|table| {
                vk::DescriptorBufferBindingInfoEXT::default()
                    .address(table.address)
                    .usage(conversion::buffer_usage(table.usage))
            })
            .collect();
        unsafe {
            self.descriptor_buffer
                .cmd_bind_descriptor_buffers(vk_cmd(cmd), &infos)
        };
    }

    fn cmd_set_binding_table_offsets(
        &mut self,
        cmd: CommandBufferHandle,
        pipeline: PipelineHandle,
        first_set: u32,
        offsets: &[(u32, u64)],
    ) {
        let Some(pipeline) = self.pipeline(pipeline) else {
            return;
        };
        let (indices, offsets): (Vec<u32>, Vec<vk::DeviceSize>) = offsets.iter().copied().unzip();
        unsafe {
            self.descriptor_buffer.cmd_set_descriptor_buffer_offsets(
                vk_cmd(cmd),
                pipeline.bind_point,
                pipeline.layout,
                first_set,
                &indices,
                &offsets,
            );
        }
    }

    fn cmd_dispatch(&mut self, cmd: CommandBufferHandle, x: u32, y: u32, z: u32) {
        unsafe { self.device.cmd_dispatch(vk_cmd(cmd), x, y, z) };
    }

    fn cmd_bind_index_buffer(
        &mut self,
        cmd: CommandBufferHandle,
        buffer: BufferHandle,
        offset: u64,
    ) {
        if let Some(buffer) = self.vk_buffer(buffer) {
            unsafe {
                self.device
                    .cmd_bind_index_buffer(vk_cmd(cmd), buffer, offset, vk::IndexType::UINT32)
            };
        }
    }

    fn cmd_set_viewport(&mut self, cmd: CommandBufferHandle, extent: Extent2D) {
        // Negative height flips Y so clip space matches the right-handed camera
        let viewport = vk::Viewport {
            x: 0.0,
            y: extent.height as f32,
            width: extent.width as f32,
            height: -(extent.height as f32),
            min_depth: 0.0,
            max_depth: 1.0,
        };
        let scissor = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent: vk::Extent2D {
                width: extent.width,
                height: extent.height,
            },
        };
        unsafe {
            self.device.cmd_set_viewport(vk_cmd(cmd), 0, &[viewport]);
            self.device.cmd_set_scissor(vk_cmd(cmd), 0, &[scissor]);
        }
    }

    fn cmd_draw_indexed_indirect(
        &mut self,
        cmd: CommandBufferHandle,
        buffer: BufferHandle,
        offset: u64,
        draw_count: u32,
        stride: u32,
    ) {
        if let Some(buffer) = self.vk_buffer(buffer) {
            unsafe {
                self.device
                    .cmd_draw_indexed_indirect(vk_cmd(cmd), buffer, offset, draw_count, stride)
            };
        }
    }

    fn cmd_begin_rendering(&mut self, cmd: CommandBufferHandle, targets: &RenderTargets) {
        let raw = vk_cmd(cmd);
        let clear = targets.clear_color.is_some();
        self.transition_image(raw, targets.color, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL, clear);
        if let Some(depth) = targets.depth {
            self.transition_image(raw, depth, vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL, clear);
        }

        let load_op = if clear {
            vk::AttachmentLoadOp::CLEAR
        } else {
            vk::AttachmentLoadOp::LOAD
        };
        let Ok(color_view) = self.texture_view(targets.color) else {
            log::warn!("Unknown color target {}", targets.color.0);
            return;
        };
        let color_attachments = [vk::RenderingAttachmentInfo::default()
            .image_view(color_view)
            .image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            .load_op(load_op)
            .store_op(vk::AttachmentStoreOp::STORE)
            .clear_value(vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: targets.clear_color.unwrap_or_default(),
                },
            })];

        // Reverse-Z clears depth to the far plane at 0
        let depth_attachment = targets
            .depth
            .and_then(|depth| self.texture_view(depth).ok())
            .map(|view| {
                vk::RenderingAttachmentInfo::default()
                    .image_view(view)
                    .image_layout(vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL)
                    .load_op(load_op)
                    .store_op(vk::AttachmentStoreOp::STORE)
                    .clear_value(vk::ClearValue {
                        depth_stencil: vk::ClearDepthStencilValue {
                            depth: 0.0,
                            stencil: 0,
                        },
                    })
            });

        let mut info = vk::RenderingInfo::default()
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: vk::Extent2D {
                    width: targets.extent.width,
                    height: targets.extent.height,
                },
            })
            .layer_count(1)
            .color_attachments(&color_attachments);
        if let Some(depth) = depth_attachment.as_ref() {
            info = info.depth_attachment(depth);
        }
        unsafe { self.device.cmd_begin_rendering(raw, &info) };
    }

    fn cmd_end_rendering(&mut self, cmd: CommandBufferHandle) {
        unsafe { self.device.cmd_end_rendering(vk_cmd(cmd)) };
    }
}

impl Drop for VulkanBackend {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();

            let buffers: Vec<VkBuffer> = self.buffers.drain().map(|(_, b)| b).collect();
            if !buffers.is_empty() {
                log::warn!("{} buffers still alive at shutdown", buffers.len());
            }
            for buffer in buffers {
                self.device.destroy_buffer(buffer.buffer, None);
                self.free(buffer.allocation);
            }
            let textures: Vec<VkTexture> = self.textures.drain().map(|(_, t)| t).collect();
            for texture in textures {
                self.device.destroy_image_view(texture.view, None);
                self.device.destroy_image(texture.image, None);
                self.free(texture.allocation);
            }

            // The allocator must go before the device
            drop(self.allocator.take());

            for (_, sampler) in self.samplers.drain() {
                self.device.destroy_sampler(sampler, None);
            }
            for (_, pipeline) in self.pipelines.drain() {
                self.device.destroy_pipeline(pipeline.pipeline, None);
                self.device.destroy_pipeline_layout(pipeline.layout, None);
            }
            for (_, layout) in self.layouts.drain() {
                self.device.destroy_descriptor_set_layout(layout, None);
            }

            self.immediate.destroy(&self.device);
            for frame in self.frames.iter() {
                frame.destroy(&self.device);
            }

            self.device.destroy_device(None);
            if let Some((loader, messenger)) = self.debug_utils.take() {
                loader.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}
