//! Headless Vulkan instance and device setup.
//!
//! The renderer never presents, so no surface or swapchain extensions are
//! requested. Devices without `VK_EXT_descriptor_buffer` are skipped during
//! selection.

use std::ffi::{CStr, CString};

use ash::vk;
use gpu_allocator::vulkan::{Allocator, AllocatorCreateDesc};

use crate::backend::BackendError;

/// Dynamic rendering and synchronization2 are core in 1.3.
const REQUIRED_API_VERSION: u32 = vk::API_VERSION_1_3;

const VALIDATION_LAYER_NAME: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Instance plus the optional validation messenger
pub struct InstanceBundle {
    pub instance: ash::Instance,
    pub debug_utils: Option<(ash::ext::debug_utils::Instance, vk::DebugUtilsMessengerEXT)>,
}

/// Create a Vulkan instance, enabling validation when requested and present.
pub fn create_instance(
    entry: &ash::Entry,
    application_name: &str,
    validation_requested: bool,
) -> Result<InstanceBundle, BackendError> {
    let validation = validation_requested && validation_layer_available(entry);
    if validation_requested && !validation {
        log::warn!("Validation layers requested but not available");
    }

    let app_name = CString::new(application_name)
        .map_err(|e| BackendError::InitializationFailed(format!("application name: {e}")))?;
    let app_info = vk::ApplicationInfo::default()
        .application_name(&app_name)
        .application_version(vk::make_api_version(0, 0, 1, 0))
        .engine_name(c"batch-renderer")
        .engine_version(vk::make_api_version(0, 0, 1, 0))
        .api_version(REQUIRED_API_VERSION);

    let mut extensions = Vec::new();
    if validation {
        extensions.push(ash::ext::debug_utils::NAME.as_ptr());
    }
    let layers: Vec<*const std::ffi::c_char> = if validation {
        vec![VALIDATION_LAYER_NAME.as_ptr()]
    } else {
        vec![]
    };

    let create_info = vk::InstanceCreateInfo::default()
        .application_info(&app_info)
        .enabled_extension_names(&extensions)
        .enabled_layer_names(&layers);

    let instance = unsafe { entry.create_instance(&create_info, None) }.map_err(|e| {
        BackendError::InitializationFailed(format!("Failed to create Vulkan instance: {e:?}"))
    })?;

    let debug_utils = if validation {
        let loader = ash::ext::debug_utils::Instance::new(entry, &instance);
        let messenger = create_debug_messenger(&loader)?;
        Some((loader, messenger))
    } else {
        None
    };

    Ok(InstanceBundle {
        instance,
        debug_utils,
    })
}

fn validation_layer_available(entry: &ash::Entry) -> bool {
    let Ok(layers) = (unsafe { entry.enumerate_instance_layer_properties() }) else {
        return false;
    };
    layers.iter().any(|layer| {
        // SAFETY: layer_name is a null-terminated array filled in by the loader
        let name = unsafe { CStr::from_ptr(layer.layer_name.as_ptr()) };
        name == VALIDATION_LAYER_NAME
    })
}

fn create_debug_messenger(
    loader: &ash::ext::debug_utils::Instance,
) -> Result<vk::DebugUtilsMessengerEXT, BackendError> {
    let create_info = vk::DebugUtilsMessengerCreateInfoEXT::default()
        .message_severity(
            vk::DebugUtilsMessageSeverityFlagsEXT::ERROR
                | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING,
        )
        .message_type(
            vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        )
        .pfn_user_callback(Some(debug_callback));

    unsafe { loader.create_debug_utils_messenger(&create_info, None) }.map_err(|e| {
        BackendError::InitializationFailed(format!("Failed to create debug messenger: {e:?}"))
    })
}

unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    // SAFETY: the driver passes either null or a valid callback data pointer
    let message = match unsafe { callback_data.as_ref() } {
        Some(data) if !data.p_message.is_null() => {
            // SAFETY: p_message is a valid null-terminated string for the callback's duration
            unsafe { CStr::from_ptr(data.p_message) }.to_string_lossy().into_owned()
        }
        _ => String::from("(no message)"),
    };

    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        log::error!("[vulkan] {message}");
    } else {
        log::warn!("[vulkan] {message}");
    }
    vk::FALSE
}

/// Pick the highest scoring device that exposes descriptor buffers and a
/// graphics queue. Returns the device and its queue family.
pub fn select_physical_device(
    instance: &ash::Instance,
) -> Result<(vk::PhysicalDevice, u32), BackendError> {
    let devices = unsafe { instance.enumerate_physical_devices() }.map_err(|e| {
        BackendError::InitializationFailed(format!("Failed to enumerate physical devices: {e:?}"))
    })?;
    if devices.is_empty() {
        return Err(BackendError::InitializationFailed(
            "No Vulkan-capable GPU found".to_string(),
        ));
    }

    let mut best: Option<(vk::PhysicalDevice, u32, u32)> = None;
    for device in devices {
        let properties = unsafe { instance.get_physical_device_properties(device) };
        // SAFETY: device_name is a null-terminated array filled in by the driver
        let name = unsafe { CStr::from_ptr(properties.device_name.as_ptr()) };

        if properties.api_version < REQUIRED_API_VERSION {
            log::info!("Skipping {name:?}: Vulkan 1.3 not supported");
            continue;
        }
        if !supports_descriptor_buffer(instance, device) {
            log::info!("Skipping {name:?}: VK_EXT_descriptor_buffer not supported");
            continue;
        }
        let Some(queue_family) = find_queue_family(instance, device) else {
            log::info!("Skipping {name:?}: no graphics and compute queue");
            continue;
        };

        let score = match properties.device_type {
            vk::PhysicalDeviceType::DISCRETE_GPU => 1000,
            vk::PhysicalDeviceType::INTEGRATED_GPU => 100,
            _ => 1,
        };
        log::info!("Found GPU: {name:?} (type: {:?}, score: {score})", properties.device_type);

        if best.map_or(true, |(_, _, best_score)| score > best_score) {
            best = Some((device, queue_family, score));
        }
    }

    best.map(|(device, family, _)| (device, family)).ok_or_else(|| {
        BackendError::FeatureNotSupported(
            "no GPU supports Vulkan 1.3 with VK_EXT_descriptor_buffer".to_string(),
        )
    })
}

fn supports_descriptor_buffer(instance: &ash::Instance, device: vk::PhysicalDevice) -> bool {
    let Ok(extensions) = (unsafe { instance.enumerate_device_extension_properties(device) }) else {
        return false;
    };
    let present = extensions.iter().any(|ext| {
        // SAFETY: extension_name is a null-terminated array filled in by the driver
        let name = unsafe { CStr::from_ptr(ext.extension_name.as_ptr()) };
        name == ash::ext::descriptor_buffer::NAME
    });
    if !present {
        return false;
    }

    let mut descriptor_buffer = vk::PhysicalDeviceDescriptorBufferFeaturesEXT::default();
    let mut features = vk::PhysicalDeviceFeatures2::default().push_next(&mut descriptor_buffer);
    unsafe { instance.get_physical_device_features2(device, &mut features) };
    descriptor_buffer.descriptor_buffer == vk::TRUE
}

fn find_queue_family(instance: &ash::Instance, device: vk::PhysicalDevice) -> Option<u32> {
    let families = unsafe { instance.get_physical_device_queue_family_properties(device) };
    families
        .iter()
        .position(|family| {
            family
                .queue_flags
                .contains(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE)
        })
        .map(|index| index as u32)
}

/// Create the logical device with descriptor buffers, buffer device addresses,
/// dynamic rendering and synchronization2 enabled.
pub fn create_logical_device(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    queue_family: u32,
) -> Result<ash::Device, BackendError> {
    let priorities = [1.0f32];
    let queue_infos = [vk::DeviceQueueCreateInfo::default()
        .queue_family_index(queue_family)
        .queue_priorities(&priorities)];

    let extensions = [ash::ext::descriptor_buffer::NAME.as_ptr()];

    let features = vk::PhysicalDeviceFeatures::default()
        .multi_draw_indirect(true)
        .draw_indirect_first_instance(true)
        .shader_int64(true);
    let mut vulkan_12 = vk::PhysicalDeviceVulkan12Features::default()
        .buffer_device_address(true)
        .descriptor_indexing(true)
        .descriptor_binding_partially_bound(true)
        .runtime_descriptor_array(true)
        .shader_sampled_image_array_non_uniform_indexing(true)
        .scalar_block_layout(true);
    let mut vulkan_13 = vk::PhysicalDeviceVulkan13Features::default()
        .dynamic_rendering(true)
        .synchronization2(true);
    let mut descriptor_buffer =
        vk::PhysicalDeviceDescriptorBufferFeaturesEXT::default().descriptor_buffer(true);

    let create_info = vk::DeviceCreateInfo::default()
        .queue_create_infos(&queue_infos)
        .enabled_extension_names(&extensions)
        .enabled_features(&features)
        .push_next(&mut vulkan_12)
        .push_next(&mut vulkan_13)
        .push_next(&mut descriptor_buffer);

    unsafe { instance.create_device(physical_device, &create_info, None) }.map_err(|e| match e {
        vk::Result::ERROR_FEATURE_NOT_PRESENT | vk::Result::ERROR_EXTENSION_NOT_PRESENT => {
            BackendError::FeatureNotSupported(format!("device creation: {e:?}"))
        }
        _ => BackendError::DeviceCreationFailed(format!("{e:?}")),
    })
}

/// Create the memory allocator with buffer device addresses enabled.
pub fn create_allocator(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    device: &ash::Device,
) -> Result<Allocator, BackendError> {
    Allocator::new(&AllocatorCreateDesc {
        instance: instance.clone(),
        device: device.clone(),
        physical_device,
        debug_settings: Default::default(),
        buffer_device_address: true,
        allocation_sizes: gpu_allocator::AllocationSizes::default(),
    })
    .map_err(|e| {
        BackendError::InitializationFailed(format!("Failed to create memory allocator: {e}"))
    })
}
