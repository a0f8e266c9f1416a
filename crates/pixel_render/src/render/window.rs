//! GLFW windows used as presentation targets
//!
//! The [`glfw::Glfw`] handle is owned by the application and lent to
//! [`Window::new`]; each window keeps its own event receiver.

use ash::vk;

use crate::config::WindowConfig;
use crate::render::vulkan::core::{SurfaceProvider, VulkanError, VulkanResult};

/// Events of one poll relevant to rendering
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WindowEvents {
    /// Last framebuffer size reported, if it changed
    pub resized: Option<(u32, u32)>,
    /// The user asked to close the window
    pub close_requested: bool,
}

/// GLFW window without a client API
pub struct Window {
    window: glfw::PWindow,
    events: glfw::GlfwReceiver<(f64, glfw::WindowEvent)>,
    title: String,
}

impl Window {
    /// Open a window configured for Vulkan rendering
    pub fn new(glfw: &mut glfw::Glfw, config: &WindowConfig) -> VulkanResult<Self> {
        glfw.window_hint(glfw::WindowHint::ClientApi(glfw::ClientApiHint::NoApi));
        glfw.window_hint(glfw::WindowHint::Resizable(config.resizable));

        let (mut window, events) = glfw
            .create_window(config.width, config.height, &config.title, glfw::WindowMode::Windowed)
            .ok_or_else(|| VulkanError::Window(format!("failed to create window '{}'", config.title)))?;

        window.set_close_polling(true);
        window.set_framebuffer_size_polling(true);

        log::debug!("Opened window '{}' ({}x{})", config.title, config.width, config.height);
        Ok(Self {
            window,
            events,
            title: config.title.clone(),
        })
    }

    /// Drain pending events; call after `Glfw::poll_events`
    pub fn take_events(&mut self) -> WindowEvents {
        let mut events = WindowEvents::default();
        for (_, event) in glfw::flush_messages(&self.events) {
            match event {
                glfw::WindowEvent::FramebufferSize(width, height) => {
                    events.resized = Some((width.max(0) as u32, height.max(0) as u32));
                }
                glfw::WindowEvent::Close => events.close_requested = true,
                _ => {}
            }
        }
        events
    }

    /// Whether the window was asked to close
    pub fn should_close(&self) -> bool {
        self.window.should_close()
    }

    /// Request or cancel closing
    pub fn set_should_close(&mut self, should_close: bool) {
        self.window.set_should_close(should_close);
    }

    /// Framebuffer size in pixels
    pub fn framebuffer_size(&self) -> (u32, u32) {
        let (width, height) = self.window.get_framebuffer_size();
        (width.max(0) as u32, height.max(0) as u32)
    }

    /// Title given at creation
    pub fn title(&self) -> &str {
        &self.title
    }
}

impl SurfaceProvider for Window {
    fn create_surface(&mut self, instance: vk::Instance) -> VulkanResult<vk::SurfaceKHR> {
        let mut surface = vk::SurfaceKHR::null();
        let result = self.window.create_window_surface(instance, std::ptr::null(), &mut surface);

        if result == vk::Result::SUCCESS {
            Ok(surface)
        } else {
            Err(VulkanError::Window(format!("failed to create Vulkan surface: {:?}", result)))
        }
    }

    fn framebuffer_extent(&self) -> vk::Extent2D {
        let (width, height) = self.framebuffer_size();
        vk::Extent2D { width, height }
    }
}
