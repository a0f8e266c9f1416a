pub mod frame;
pub mod renderer;

pub use frame::{FrameCounter, ResizeTracker};
pub use renderer::{RenderTarget, Renderer};
