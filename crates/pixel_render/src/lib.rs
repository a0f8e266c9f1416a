//! # pixel_render
//!
//! A small windowed 2D pixel library on top of Vulkan.
//!
//! Callers open windows, put pixels and blit textures; the library batches the
//! requests and turns each loop iteration into one correctly synchronized GPU
//! frame with up to [`config::MAX_FRAMES_IN_FLIGHT`] frames in flight.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pixel_render::prelude::*;
//!
//! let mut app = Application::new(RendererConfig::default()).or_fatal("init");
//! let window = app.new_window("My window", 400, 400).expect("window");
//!
//! let mut frames = 0;
//! app.loop_hook(move |app| {
//!     app.pixel_put(window, 0, 0, 0xFF0000);
//!     frames += 1;
//!     if frames > 20_000 {
//!         app.loop_end();
//!     }
//! });
//! app.run();
//! app.destroy();
//! ```
//!
//! ## Layout
//!
//! - [`render::vulkan::core`]: RAII wrappers over instance, device, memory,
//!   command buffers, images, swapchain and pipeline objects
//! - [`render::vulkan::system`]: the [`render::vulkan::Renderer`] frame loop
//! - [`graphics`]: pixel layer, textures and per-window draw state
//! - [`application`]: the facade owning all of the above

#![warn(missing_docs)]

pub mod application;
pub mod config;
pub mod foundation;
pub mod graphics;
pub mod render;

pub use application::{Application, LoopHook, WindowId};

/// Common imports for library users
pub mod prelude {
    pub use crate::{
        application::{Application, WindowId},
        config::{Config, RendererConfig, ShaderConfig, WindowConfig, MAX_FRAMES_IN_FLIGHT},
        foundation::{logging, OrFatal, OrReport, Severity},
        graphics::{pack_pixel, GraphicsSupport, TextureId},
        render::vulkan::{RenderCore, RenderTarget, Renderer, VulkanError, VulkanResult},
    };
}
