//! Vulkan instance and physical device setup
//!
//! Also home of the error type shared by every Vulkan wrapper in the crate.

use ash::{vk, Entry, Instance};
#[cfg(debug_assertions)]
use ash::extensions::ext::DebugUtils;
use ash::extensions::khr::Swapchain as SwapchainLoader;
use std::ffi::{CStr, CString};
use thiserror::Error;

use crate::foundation::Severity;

/// Vulkan-specific error types
#[derive(Error, Debug)]
pub enum VulkanError {
    /// General Vulkan API error with result code
    #[error("Vulkan API error: {0:?}")]
    Api(vk::Result),

    /// Device memory allocation failed
    #[error("Allocation failed: {0:?}")]
    Allocation(vk::Result),

    /// Vulkan context initialization failed
    #[error("Initialization failed: {0}")]
    InitializationFailed(String),

    /// No physical device can run the renderer
    #[error("No suitable GPU found")]
    NoSuitableDevice,

    /// No suitable memory type found for allocation
    #[error("No suitable memory type found")]
    NoSuitableMemoryType,

    /// Recording was requested on a command buffer that was never allocated
    #[error("Command buffer used before initialization")]
    CommandBufferUninitialized,

    /// Constant buffers must be created with their contents
    #[error("Constant buffer '{name}' created without data")]
    ConstantBufferWithoutData {
        /// Debug name of the rejected buffer
        name: String,
    },

    /// Invalid operation attempted
    #[error("Invalid operation: {reason}")]
    InvalidOperation {
        /// Description of why the operation is invalid
        reason: String,
    },

    /// Shader could not be loaded
    #[error("Shader error: {0}")]
    Shader(String),

    /// Window system failure
    #[error("Window error: {0}")]
    Window(String),
}

impl VulkanError {
    /// How this error is handled when it reaches the reporting sink
    pub fn severity(&self) -> Severity {
        match self {
            Self::Api(_)
            | Self::InitializationFailed(_)
            | Self::NoSuitableDevice
            | Self::NoSuitableMemoryType
            | Self::CommandBufferUninitialized
            | Self::Shader(_)
            | Self::Window(_) => Severity::Fatal,
            Self::Allocation(_) | Self::InvalidOperation { .. } => Severity::Error,
            Self::ConstantBufferWithoutData { .. } => Severity::Warning,
        }
    }

    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidOperation { reason: reason.into() }
    }
}

/// Result type for Vulkan operations
pub type VulkanResult<T> = Result<T, VulkanError>;

const VALIDATION_LAYER: &str = "VK_LAYER_KHRONOS_validation";

/// Vulkan instance together with its optional debug messenger
///
/// Destruction is driven by [`crate::render::vulkan::RenderCore`], which owns
/// the instance for the lifetime of the process.
pub struct VulkanInstance {
    /// Vulkan entry point
    pub entry: Entry,
    /// Vulkan instance handle
    pub instance: Instance,
    /// Debug utilities extension (debug builds)
    #[cfg(debug_assertions)]
    pub debug_utils: Option<DebugUtils>,
    /// Debug messenger handle (debug builds)
    #[cfg(debug_assertions)]
    pub debug_messenger: Option<vk::DebugUtilsMessengerEXT>,
}

impl VulkanInstance {
    /// Create a new Vulkan instance enabling `extensions`
    ///
    /// An empty extension list yields a headless instance.
    pub fn new(app_name: &str, extensions: &[String], enable_validation: bool) -> VulkanResult<Self> {
        let entry = unsafe { Entry::load() }
            .map_err(|e| VulkanError::InitializationFailed(format!("Failed to load Vulkan: {:?}", e)))?;

        let app_name_cstr = CString::new(app_name)
            .map_err(|_| VulkanError::InitializationFailed("application name contains a NUL byte".to_string()))?;
        let engine_name_cstr = CString::new("pixel_render")
            .map_err(|_| VulkanError::InitializationFailed("engine name contains a NUL byte".to_string()))?;
        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name_cstr)
            .application_version(vk::make_api_version(0, 1, 0, 0))
            .engine_name(&engine_name_cstr)
            .engine_version(vk::make_api_version(0, 1, 0, 0))
            .api_version(vk::API_VERSION_1_0);

        let cstr_extensions = extensions
            .iter()
            .map(|ext| CString::new(ext.as_str()))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| VulkanError::InitializationFailed("extension name contains a NUL byte".to_string()))?;

        #[allow(unused_mut)]
        let mut extension_ptrs: Vec<*const std::ffi::c_char> = cstr_extensions
            .iter()
            .map(|ext| ext.as_ptr())
            .collect();

        let validation = enable_validation && Self::validation_layer_available(&entry);
        if enable_validation && !validation {
            log::warn!("{} requested but not installed; continuing without it", VALIDATION_LAYER);
        }

        #[cfg(debug_assertions)]
        if validation {
            extension_ptrs.push(DebugUtils::name().as_ptr());
        }

        let layer_names = if validation {
            vec![CString::new(VALIDATION_LAYER)
                .map_err(|_| VulkanError::InitializationFailed("bad layer name".to_string()))?]
        } else {
            vec![]
        };
        let layer_ptrs: Vec<*const std::ffi::c_char> = layer_names.iter().map(|name| name.as_ptr()).collect();

        let create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(&extension_ptrs)
            .enabled_layer_names(&layer_ptrs);

        let instance = unsafe {
            entry.create_instance(&create_info, None)
                .map_err(VulkanError::Api)?
        };

        #[cfg(debug_assertions)]
        let (debug_utils, debug_messenger) = if validation {
            let debug_utils = DebugUtils::new(&entry, &instance);
            match Self::setup_debug_messenger(&debug_utils) {
                Ok(messenger) => (Some(debug_utils), Some(messenger)),
                Err(e) => {
                    unsafe { instance.destroy_instance(None) };
                    return Err(e);
                }
            }
        } else {
            (None, None)
        };

        log::debug!("Vulkan instance created (validation: {})", validation);

        Ok(Self {
            entry,
            instance,
            #[cfg(debug_assertions)]
            debug_utils,
            #[cfg(debug_assertions)]
            debug_messenger,
        })
    }

    fn validation_layer_available(entry: &Entry) -> bool {
        entry
            .enumerate_instance_layer_properties()
            .map(|layers| {
                layers.iter().any(|layer| {
                    let name = unsafe { CStr::from_ptr(layer.layer_name.as_ptr()) };
                    name.to_bytes() == VALIDATION_LAYER.as_bytes()
                })
            })
            .unwrap_or(false)
    }

    #[cfg(debug_assertions)]
    fn setup_debug_messenger(debug_utils: &DebugUtils) -> VulkanResult<vk::DebugUtilsMessengerEXT> {
        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE
            )
            .pfn_user_callback(Some(debug_callback));

        unsafe {
            debug_utils.create_debug_utils_messenger(&create_info, None)
                .map_err(VulkanError::Api)
        }
    }

    /// Destroy the debug messenger and the instance
    ///
    /// # Safety
    /// Every object created from this instance must already be destroyed, and
    /// the instance must not be used afterwards.
    pub(crate) unsafe fn destroy(&self) {
        #[cfg(debug_assertions)]
        if let (Some(debug_utils), Some(debug_messenger)) =
            (&self.debug_utils, &self.debug_messenger) {
            debug_utils.destroy_debug_utils_messenger(*debug_messenger, None);
        }

        self.instance.destroy_instance(None);
    }
}

/// Debug callback for validation layers
#[cfg(debug_assertions)]
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    let callback_data = *callback_data;
    let message = CStr::from_ptr(callback_data.p_message).to_string_lossy();

    if message_severity >= vk::DebugUtilsMessageSeverityFlagsEXT::ERROR {
        log::error!("[Vulkan] {:?} - {}", message_type, message);
    } else if message_severity >= vk::DebugUtilsMessageSeverityFlagsEXT::WARNING {
        log::warn!("[Vulkan] {:?} - {}", message_type, message);
    } else {
        log::debug!("[Vulkan] {:?} - {}", message_type, message);
    }

    vk::FALSE
}

/// Physical device selection and capabilities
pub struct PhysicalDeviceInfo {
    /// Vulkan physical device handle
    pub device: vk::PhysicalDevice,
    /// Device properties and limits
    pub properties: vk::PhysicalDeviceProperties,
    /// Memory heaps and types
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
    /// Index of the queue family used for graphics, transfer and presentation
    pub graphics_family: u32,
}

impl PhysicalDeviceInfo {
    /// Select the first device with a graphics queue
    ///
    /// When `needs_swapchain` is set the device must also expose `VK_KHR_swapchain`.
    pub fn select_suitable_device(instance: &Instance, needs_swapchain: bool) -> VulkanResult<Self> {
        let devices = unsafe {
            instance.enumerate_physical_devices()
                .map_err(VulkanError::Api)?
        };

        for device in devices {
            if let Some(device_info) = Self::evaluate_device(instance, device, needs_swapchain)? {
                log::info!("Selected GPU: {}", device_info.name());
                return Ok(device_info);
            }
        }

        Err(VulkanError::NoSuitableDevice)
    }

    fn evaluate_device(
        instance: &Instance,
        device: vk::PhysicalDevice,
        needs_swapchain: bool,
    ) -> VulkanResult<Option<Self>> {
        let properties = unsafe { instance.get_physical_device_properties(device) };
        let queue_families = unsafe {
            instance.get_physical_device_queue_family_properties(device)
        };

        let Some(graphics_family) = queue_families
            .iter()
            .position(|family| family.queue_flags.contains(vk::QueueFlags::GRAPHICS))
        else {
            return Ok(None);
        };

        if needs_swapchain {
            let extensions = unsafe {
                instance.enumerate_device_extension_properties(device)
                    .map_err(VulkanError::Api)?
            };
            let has_swapchain = extensions.iter().any(|available| {
                let extension_name = unsafe {
                    CStr::from_ptr(available.extension_name.as_ptr())
                };
                extension_name == SwapchainLoader::name()
            });
            if !has_swapchain {
                return Ok(None);
            }
        }

        let memory_properties = unsafe { instance.get_physical_device_memory_properties(device) };

        Ok(Some(Self {
            device,
            properties,
            memory_properties,
            graphics_family: graphics_family as u32,
        }))
    }

    /// Human readable device name
    pub fn name(&self) -> String {
        unsafe { CStr::from_ptr(self.properties.device_name.as_ptr()) }
            .to_string_lossy()
            .into_owned()
    }
}

/// First memory type allowed by `type_filter` whose flags include `properties`
pub fn find_memory_type_in(
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
    type_filter: u32,
    properties: vk::MemoryPropertyFlags,
) -> VulkanResult<u32> {
    let count = memory_properties.memory_type_count.min(vk::MAX_MEMORY_TYPES as u32);
    (0..count)
        .find(|&i| {
            type_filter & (1 << i) != 0
                && memory_properties.memory_types[i as usize].property_flags.contains(properties)
        })
        .ok_or(VulkanError::NoSuitableMemoryType)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_with(types: &[vk::MemoryPropertyFlags]) -> vk::PhysicalDeviceMemoryProperties {
        let mut props = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: types.len() as u32,
            ..Default::default()
        };
        for (slot, flags) in types.iter().enumerate() {
            props.memory_types[slot] = vk::MemoryType {
                property_flags: *flags,
                heap_index: 0,
            };
        }
        props
    }

    #[test]
    fn finds_first_matching_type_in_filter() {
        let host = vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;
        let props = memory_with(&[
            host,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            host | vk::MemoryPropertyFlags::HOST_CACHED,
        ]);

        // Type 0 matches the flags but is excluded by the filter
        assert_eq!(find_memory_type_in(&props, 0b0110, host).unwrap(), 2);
    }

    #[test]
    fn missing_type_is_fatal() {
        let props = memory_with(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::HOST_VISIBLE,
        ]);
        let wanted = vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;

        let err = find_memory_type_in(&props, 0b0110, wanted).unwrap_err();
        assert!(matches!(err, VulkanError::NoSuitableMemoryType));
        assert_eq!(err.severity(), Severity::Fatal);
    }

    #[test]
    fn empty_request_matches_any_allowed_type() {
        let props = memory_with(&[vk::MemoryPropertyFlags::DEVICE_LOCAL; 3]);
        assert_eq!(find_memory_type_in(&props, 0b100, vk::MemoryPropertyFlags::empty()).unwrap(), 2);
    }

    #[test]
    fn misuse_errors_are_not_fatal() {
        let warn = VulkanError::ConstantBufferWithoutData { name: "quad".to_string() };
        assert_eq!(warn.severity(), Severity::Warning);
        assert_eq!(VulkanError::invalid("x").severity(), Severity::Error);
        assert_eq!(VulkanError::CommandBufferUninitialized.severity(), Severity::Fatal);
    }
}
