//! Application facade: windows, textures and the main loop
//!
//! This is where library calls meet their caller, so errors are reported here
//! instead of returned: fatal ones terminate the process, the rest are logged
//! and the call is skipped.

use slotmap::SlotMap;
use std::path::Path;
use std::sync::Arc;

use crate::config::{Config, ConfigError, RendererConfig, WindowConfig};
use crate::foundation::{report, OrReport, Severity};
use crate::graphics::{GraphicsSupport, Texture, TextureId};
use crate::render::vulkan::core::{DescriptorPool, GraphicsDescriptorLayouts, RenderCore, VulkanError, VulkanResult};
use crate::render::vulkan::RenderTarget;
use crate::render::Window;

slotmap::new_key_type! {
    /// Handle to an open window
    pub struct WindowId;
}

/// Descriptor sets available to all windows and textures together
pub const DESCRIPTOR_POOL_SETS: u32 = 4096;

/// Callback run once per loop iteration
pub type LoopHook = Box<dyn FnMut(&mut Application)>;

struct WindowSlot {
    graphics: GraphicsSupport,
    window: Window,
}

struct DrawResources {
    layouts: Arc<GraphicsDescriptorLayouts>,
    pool: Arc<DescriptorPool>,
}

/// Owner of the GPU context and everything drawn with it
pub struct Application {
    windows: SlotMap<WindowId, WindowSlot>,
    textures: SlotMap<TextureId, Texture>,
    resources: Option<DrawResources>,
    core: Arc<RenderCore>,
    glfw: glfw::Glfw,
    config: RendererConfig,
    hook: Option<LoopHook>,
    running: bool,
}

impl Application {
    /// Initialize the window system and the GPU context
    pub fn new(config: RendererConfig) -> VulkanResult<Self> {
        config
            .validate()
            .and_then(|()| config.shaders.check_files())
            .map_err(|e| VulkanError::InitializationFailed(e.to_string()))?;

        let glfw = glfw::init(glfw::fail_on_errors)
            .map_err(|e| VulkanError::Window(format!("GLFW initialization failed: {:?}", e)))?;
        if !glfw.vulkan_supported() {
            return Err(VulkanError::InitializationFailed("GLFW reports no Vulkan support".to_string()));
        }
        let extensions = glfw
            .get_required_instance_extensions()
            .ok_or_else(|| VulkanError::Window("no Vulkan instance extensions for this window system".to_string()))?;

        let core = RenderCore::new(&config, &extensions)?;
        let layouts = GraphicsDescriptorLayouts::new(&core)?;
        let pool = DescriptorPool::new(&core, DESCRIPTOR_POOL_SETS)?;

        Ok(Self {
            windows: SlotMap::with_key(),
            textures: SlotMap::with_key(),
            resources: Some(DrawResources { layouts, pool }),
            core,
            glfw,
            config,
            hook: None,
            running: false,
        })
    }

    fn resources(&self, operation: &str) -> Option<&DrawResources> {
        let resources = self.resources.as_ref();
        if resources.is_none() {
            report(Severity::Warning, format_args!("{}: application already destroyed", operation));
        }
        resources
    }

    /// Open a window
    pub fn new_window(&mut self, title: &str, width: u32, height: u32) -> Option<WindowId> {
        let (layouts, pool) = {
            let resources = self.resources("new_window")?;
            (Arc::clone(&resources.layouts), Arc::clone(&resources.pool))
        };
        let window_config = WindowConfig {
            title: title.to_string(),
            width,
            height,
            ..self.config.window.clone()
        };

        let mut window = Window::new(&mut self.glfw, &window_config).or_report("new_window")?;
        let graphics = GraphicsSupport::new(
            &self.core,
            RenderTarget::Window(&mut window),
            &self.config,
            &layouts,
            &pool,
        )
        .or_report("new_window")?;

        Some(self.windows.insert(WindowSlot { graphics, window }))
    }

    /// Close a window and release its GPU resources
    pub fn destroy_window(&mut self, id: WindowId) {
        if !self.windows.contains_key(id) {
            report(Severity::Warning, format_args!("destroy_window: invalid window {:?}", id));
            return;
        }
        self.core.wait_idle().or_report("destroy_window");
        self.windows.remove(id);
    }

    /// Create a texture from tightly packed RGBA8 pixels
    pub fn new_texture(&mut self, width: u32, height: u32, pixels: &[u8]) -> Option<TextureId> {
        let resources = self.resources("new_texture")?;
        let name = format!("texture_{}", self.textures.len());
        let texture = Texture::new(
            &self.core,
            width,
            height,
            pixels,
            &name,
            &resources.layouts,
            Arc::clone(&resources.pool),
        )
        .or_report("new_texture")?;
        Some(self.textures.insert(texture))
    }

    /// Destroy a texture, waiting for frames still drawing it
    pub fn destroy_texture(&mut self, id: TextureId) {
        let Some(texture) = self.textures.get(id) else {
            report(Severity::Warning, format_args!("destroy_texture: invalid texture {:?}", id));
            return;
        };
        if texture.is_in_flight() {
            self.core.wait_idle().or_report("destroy_texture");
        }
        for slot in self.windows.values_mut() {
            slot.graphics.forget_texture(id);
        }
        self.textures.remove(id);
    }

    fn window_mut(&mut self, id: WindowId, operation: &str) -> Option<&mut WindowSlot> {
        let slot = self.windows.get_mut(id);
        if slot.is_none() {
            report(Severity::Warning, format_args!("{}: invalid window {:?}", operation, id));
        }
        slot
    }

    /// Set a pixel of a window's pixel layer; color is `0xAARRGGBB`
    pub fn pixel_put(&mut self, window: WindowId, x: i32, y: i32, color: u32) {
        if let Some(slot) = self.window_mut(window, "pixel_put") {
            slot.graphics.pixel_put(x, y, color);
        }
    }

    /// Draw a texture at `(x, y)` in a window from the next frame on
    pub fn texture_put(&mut self, window: WindowId, texture: TextureId, x: i32, y: i32) {
        if !self.textures.contains_key(texture) {
            report(Severity::Warning, format_args!("texture_put: invalid texture {:?}", texture));
            return;
        }
        if let Some(slot) = self.window_mut(window, "texture_put") {
            slot.graphics.texture_put(texture, x, y);
        }
    }

    /// Remove everything drawn in a window
    pub fn clear_window(&mut self, window: WindowId) {
        if let Some(slot) = self.window_mut(window, "clear_window") {
            slot.graphics.clear();
        }
    }

    /// Install the per-iteration callback, replacing a previous one
    pub fn loop_hook(&mut self, hook: impl FnMut(&mut Self) + 'static) {
        self.hook = Some(Box::new(hook));
    }

    /// Run until [`Application::loop_end`] or a window close request
    pub fn run(&mut self) {
        self.running = true;
        log::info!("Entering main loop with {} window(s)", self.windows.len());

        while self.running {
            self.glfw.poll_events();
            self.process_window_events();

            if let Some(mut hook) = self.hook.take() {
                hook(self);
                // The hook may have installed a replacement
                if self.hook.is_none() {
                    self.hook = Some(hook);
                }
            }

            for slot in self.windows.values_mut() {
                slot.graphics.render(&self.textures).or_report("render");
            }
        }
        log::info!("Main loop ended");
    }

    fn process_window_events(&mut self) {
        for slot in self.windows.values_mut() {
            let events = slot.window.take_events();
            if let Some((width, height)) = events.resized {
                slot.graphics.renderer_mut().resize(width, height);
            }
            if events.close_requested || slot.window.should_close() {
                self.running = false;
            }
        }
    }

    /// Stop the loop after the current iteration
    pub fn loop_end(&mut self) {
        self.running = false;
    }

    /// Whether [`Application::run`] is looping
    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Number of open windows
    pub fn window_count(&self) -> usize {
        self.windows.len()
    }

    /// Number of live textures
    pub fn texture_count(&self) -> usize {
        self.textures.len()
    }

    /// Shared GPU context
    pub fn core(&self) -> &Arc<RenderCore> {
        &self.core
    }

    /// Write the allocator's live allocations to a RON file
    pub fn dump_allocations(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        self.core.allocator().dump_to_file(path)
    }

    /// Release windows, textures and the GPU context; later calls are no-ops
    pub fn destroy(&mut self) {
        if self.resources.is_none() {
            return;
        }
        self.running = false;
        self.hook = None;
        self.core.wait_idle().or_report("destroy");

        self.windows.clear();
        self.textures.clear();
        self.resources = None;
        self.core.destroy();
    }
}

impl Drop for Application {
    fn drop(&mut self) {
        self.destroy();
    }
}
