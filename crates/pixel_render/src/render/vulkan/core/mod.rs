pub mod allocator;
pub mod buffer;
pub mod commands;
pub mod context;
pub mod descriptors;
pub mod framebuffer;
pub mod image;
pub mod render_core;
pub mod render_pass;
pub mod shader;
pub mod surface;
pub mod swapchain;
pub mod sync;
/// Vertex format, projection uniform and push constants
pub mod vertex;

pub use allocator::{AllocationKind, AllocationRecord, AllocationReport, GpuAllocator, MemoryStrategy};
pub use buffer::{Buffer, BufferKind, UniformBuffer};
pub use commands::{submit_once, CommandBuffer, CommandBufferKind, CommandBufferState, CommandPool};
pub use context::{find_memory_type_in, PhysicalDeviceInfo, VulkanError, VulkanInstance, VulkanResult};
pub use descriptors::{DescriptorPool, DescriptorSet, DescriptorSetLayout, DescriptorSetLayoutBuilder, GraphicsDescriptorLayouts};
pub use framebuffer::Framebuffer;
pub use image::{format_size, Image};
pub use render_core::{RenderCore, TeardownGuard};
pub use render_pass::{RenderDestination, RenderPass};
pub use shader::{GraphicsPipeline, ShaderModule};
pub use surface::{Surface, SurfaceProvider};
pub use swapchain::Swapchain;
pub use sync::{Fence, FrameSemaphores, InFlight, InFlightRef, Semaphore};
pub use vertex::{DrawOffset, ProjectionUniform, Vertex};
