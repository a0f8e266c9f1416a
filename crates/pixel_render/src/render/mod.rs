//! Rendering: the Vulkan backend and the window glue feeding it

pub mod vulkan;
/// GLFW window backing a presentation surface
pub mod window;

pub use window::{Window, WindowEvents};
