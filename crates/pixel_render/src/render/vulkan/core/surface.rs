//! Presentation surfaces
//!
//! The window system creates the native surface through [`SurfaceProvider`];
//! [`Surface`] owns the resulting handle and answers capability queries.

use ash::vk;
use std::sync::Arc;

use super::context::{VulkanError, VulkanResult};
use super::render_core::RenderCore;

/// Anything that can back a Vulkan surface
pub trait SurfaceProvider {
    /// Create a surface for `instance`
    fn create_surface(&mut self, instance: vk::Instance) -> VulkanResult<vk::SurfaceKHR>;

    /// Current drawable size in pixels
    fn framebuffer_extent(&self) -> vk::Extent2D;
}

/// Pick the surface format: `B8G8R8A8_UNORM` in sRGB-nonlinear, else the first one offered
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    formats
        .iter()
        .find(|sf| sf.format == vk::Format::B8G8R8A8_UNORM && sf.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR)
        .or_else(|| formats.first())
        .copied()
}

/// Owned `VkSurfaceKHR` checked for presentation on the graphics queue
pub struct Surface {
    core: Arc<RenderCore>,
    surface: vk::SurfaceKHR,
}

impl Surface {
    /// Create a surface and verify the graphics family can present to it
    pub fn new(core: Arc<RenderCore>, provider: &mut dyn SurfaceProvider) -> VulkanResult<Self> {
        let loader = core.surface_loader().ok_or_else(|| {
            VulkanError::InitializationFailed("render core was created without window extensions".to_string())
        })?;

        let surface = provider.create_surface(core.instance().handle())?;

        let supported = unsafe {
            loader
                .get_physical_device_surface_support(core.physical_device().device, core.graphics_family(), surface)
                .map_err(VulkanError::Api)
        };
        match supported {
            Ok(true) => {}
            Ok(false) => {
                unsafe { loader.destroy_surface(surface, None) };
                return Err(VulkanError::InitializationFailed(
                    "graphics queue family cannot present to this surface".to_string(),
                ));
            }
            Err(e) => {
                unsafe { loader.destroy_surface(surface, None) };
                return Err(e);
            }
        }

        log::debug!("Created surface {:?}", surface);
        Ok(Self { core, surface })
    }

    fn loader(&self) -> VulkanResult<&ash::extensions::khr::Surface> {
        self.core
            .surface_loader()
            .ok_or_else(|| VulkanError::InitializationFailed("surface loader missing".to_string()))
    }

    /// Surface capabilities on the selected physical device
    pub fn capabilities(&self) -> VulkanResult<vk::SurfaceCapabilitiesKHR> {
        unsafe {
            self.loader()?
                .get_physical_device_surface_capabilities(self.core.physical_device().device, self.surface)
                .map_err(VulkanError::Api)
        }
    }

    /// Supported surface formats
    pub fn formats(&self) -> VulkanResult<Vec<vk::SurfaceFormatKHR>> {
        unsafe {
            self.loader()?
                .get_physical_device_surface_formats(self.core.physical_device().device, self.surface)
                .map_err(VulkanError::Api)
        }
    }

    /// Supported present modes
    pub fn present_modes(&self) -> VulkanResult<Vec<vk::PresentModeKHR>> {
        unsafe {
            self.loader()?
                .get_physical_device_surface_present_modes(self.core.physical_device().device, self.surface)
                .map_err(VulkanError::Api)
        }
    }

    /// Format the swapchain will use
    pub fn preferred_format(&self) -> VulkanResult<vk::SurfaceFormatKHR> {
        let formats = self.formats()?;
        choose_surface_format(&formats)
            .ok_or_else(|| VulkanError::InitializationFailed("surface reports no formats".to_string()))
    }

    /// Native handle
    pub fn handle(&self) -> vk::SurfaceKHR {
        self.surface
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        if let Some(loader) = self.core.surface_loader() {
            unsafe { loader.destroy_surface(self.surface, None) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn format(format: vk::Format, color_space: vk::ColorSpaceKHR) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR { format, color_space }
    }

    #[test]
    fn prefers_bgra_unorm() {
        let formats = [
            format(vk::Format::R8G8B8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            format(vk::Format::B8G8R8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
        ];
        assert_eq!(choose_surface_format(&formats), Some(formats[1]));
    }

    #[test]
    fn falls_back_to_first_format() {
        let formats = [
            format(vk::Format::R8G8B8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            format(vk::Format::B8G8R8A8_UNORM, vk::ColorSpaceKHR::DISPLAY_P3_NONLINEAR_EXT),
        ];
        assert_eq!(choose_surface_format(&formats), Some(formats[0]));
    }

    #[test]
    fn no_formats() {
        assert_eq!(choose_surface_format(&[]), None);
    }
}
