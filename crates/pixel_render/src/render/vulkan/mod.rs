//! Vulkan rendering backend
//!
//! `core` holds the RAII wrappers over device objects; `system` drives frames
//! on top of them.

/// Core Vulkan wrappers and primitives
pub mod core;
/// Frame orchestration
pub mod system;

pub use core::{
    Buffer, BufferKind, CommandBuffer, CommandBufferKind, CommandBufferState, DescriptorPool, DescriptorSet,
    GpuAllocator, GraphicsDescriptorLayouts, Image, RenderCore, Surface, SurfaceProvider, UniformBuffer, Vertex,
    VulkanError, VulkanResult,
};
pub use system::{FrameCounter, RenderTarget, Renderer, ResizeTracker};
