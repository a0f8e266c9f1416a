//! Frame orchestration
//!
//! One logical frame is the pair [`Renderer::begin_frame`] /
//! [`Renderer::end_frame`]:
//!
//! 1. wait for the command buffer of the current frame slot
//! 2. acquire a swapchain image (recreating the render data when out of date)
//! 3. record the render pass with the 2D pipeline and projection bound
//! 4. callers record their draws into [`Renderer::command_buffer`]
//! 5. submit, present, advance the frame slot
//!
//! Render data (swapchain or offscreen target, render pass, framebuffers,
//! pipeline) is held in an `Option` and taken out before being rebuilt, so a
//! recreation triggered from both the acquire and the present path never
//! destroys anything twice.

use ash::vk;
use std::mem::size_of;
use std::sync::Arc;

use crate::config::{RendererConfig, MAX_FRAMES_IN_FLIGHT};
use crate::foundation::{report, Severity};
use crate::render::vulkan::core::{
    Buffer, CommandBuffer, CommandBufferKind, CommandPool, DescriptorPool, DescriptorSet, Framebuffer,
    FrameSemaphores, GraphicsDescriptorLayouts, GraphicsPipeline, Image, ProjectionUniform, RenderCore,
    RenderDestination, RenderPass, ShaderModule, Surface, SurfaceProvider, Swapchain, UniformBuffer, VulkanError,
    VulkanResult,
};

use super::frame::{FrameCounter, ResizeTracker};

/// Color format of offscreen targets; readback yields RGBA bytes
pub const OFFSCREEN_FORMAT: vk::Format = vk::Format::R8G8B8A8_UNORM;

/// What a [`Renderer`] draws into
pub enum RenderTarget<'a> {
    /// A window surface, presented through a swapchain
    Window(&'a mut dyn SurfaceProvider),
    /// A single color image that can be read back
    Offscreen {
        /// Width in pixels
        width: u32,
        /// Height in pixels
        height: u32,
    },
}

enum Presenter {
    Swapchain(Swapchain),
    Offscreen(Image),
}

struct RenderData {
    pipeline: GraphicsPipeline,
    framebuffers: Vec<Framebuffer>,
    render_pass: RenderPass,
    presenter: Presenter,
    extent: vk::Extent2D,
}

impl RenderData {
    fn old_swapchain(&self) -> vk::SwapchainKHR {
        match &self.presenter {
            Presenter::Swapchain(swapchain) => swapchain.handle(),
            Presenter::Offscreen(_) => vk::SwapchainKHR::null(),
        }
    }

    fn color_format(&self) -> vk::Format {
        match &self.presenter {
            Presenter::Swapchain(swapchain) => swapchain.format().format,
            Presenter::Offscreen(image) => image.format(),
        }
    }
}

fn is_zero(extent: vk::Extent2D) -> bool {
    extent.width == 0 || extent.height == 0
}

/// Drives frames for one render target
pub struct Renderer {
    // Field order is drop order: render data before the surface it presents
    // to, command buffers before their pool.
    render_data: Option<RenderData>,
    surface: Option<Surface>,
    projection_set: DescriptorSet,
    uniform: UniformBuffer,
    command_buffers: Vec<CommandBuffer>,
    command_pool: CommandPool,
    semaphores: Vec<FrameSemaphores>,
    vertex_shader: ShaderModule,
    fragment_shader: ShaderModule,
    layouts: Arc<GraphicsDescriptorLayouts>,
    core: Arc<RenderCore>,
    frames: FrameCounter,
    resize: ResizeTracker,
    requested_extent: vk::Extent2D,
    image_index: u32,
    frame_in_progress: bool,
    clear_color: [f32; 4],
}

impl Renderer {
    /// Create a renderer for `target`
    pub fn new(
        core: Arc<RenderCore>,
        target: RenderTarget<'_>,
        config: &RendererConfig,
        layouts: Arc<GraphicsDescriptorLayouts>,
        descriptor_pool: Arc<DescriptorPool>,
    ) -> VulkanResult<Self> {
        let device = core.device().clone();

        let (surface, requested_extent) = match target {
            RenderTarget::Window(provider) => {
                let extent = provider.framebuffer_extent();
                (Some(Surface::new(Arc::clone(&core), provider)?), extent)
            }
            RenderTarget::Offscreen { width, height } => (None, vk::Extent2D { width, height }),
        };

        let vertex_shader = ShaderModule::from_file(device.clone(), &config.shaders.vertex_shader_path)?;
        let fragment_shader = ShaderModule::from_file(device.clone(), &config.shaders.fragment_shader_path)?;

        let command_pool = CommandPool::new(device.clone(), core.graphics_family())?;
        let command_buffers = (0..MAX_FRAMES_IN_FLIGHT)
            .map(|_| CommandBuffer::new(Arc::clone(&core), &command_pool, CommandBufferKind::LongTime))
            .collect::<VulkanResult<Vec<_>>>()?;
        let semaphores = (0..MAX_FRAMES_IN_FLIGHT)
            .map(|_| FrameSemaphores::new(&device))
            .collect::<VulkanResult<Vec<_>>>()?;

        let uniform = UniformBuffer::new(&core, size_of::<ProjectionUniform>() as vk::DeviceSize, "projection")?;
        let projection_set = DescriptorSet::new(descriptor_pool, &layouts.vertex)?;
        for frame in 0..MAX_FRAMES_IN_FLIGHT {
            projection_set.write_uniform(frame, 0, uniform.buffer(frame))?;
        }

        let mut renderer = Self {
            render_data: None,
            surface,
            projection_set,
            uniform,
            command_buffers,
            command_pool,
            semaphores,
            vertex_shader,
            fragment_shader,
            layouts,
            core,
            frames: FrameCounter::new(),
            resize: ResizeTracker::new(),
            requested_extent,
            image_index: 0,
            frame_in_progress: false,
            clear_color: config.clear_color,
        };
        renderer.recreate_render_data()?;

        log::debug!(
            "Renderer ready ({}, {}x{})",
            if renderer.is_offscreen() { "offscreen" } else { "window" },
            renderer.extent().width,
            renderer.extent().height
        );
        Ok(renderer)
    }

    fn build_render_data(&self, extent: vk::Extent2D, old_swapchain: vk::SwapchainKHR) -> VulkanResult<RenderData> {
        let device = self.core.device();

        let (presenter, render_pass, framebuffers, extent) = match &self.surface {
            Some(surface) => {
                let swapchain = Swapchain::new(Arc::clone(&self.core), surface, extent, old_swapchain)?;
                let render_pass = RenderPass::new(device.clone(), swapchain.format().format, RenderDestination::Present)?;
                let extent = swapchain.extent();
                let framebuffers = swapchain
                    .image_views()
                    .iter()
                    .map(|&view| Framebuffer::new(device.clone(), render_pass.handle(), &[view], extent))
                    .collect::<VulkanResult<Vec<_>>>()?;
                (Presenter::Swapchain(swapchain), render_pass, framebuffers, extent)
            }
            None => {
                let mut image = Image::new(
                    Arc::clone(&self.core),
                    extent.width,
                    extent.height,
                    OFFSCREEN_FORMAT,
                    vk::ImageTiling::OPTIMAL,
                    vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_SRC,
                    "offscreen_target",
                )?;
                let view = image.create_view()?;
                let render_pass = RenderPass::new(device.clone(), OFFSCREEN_FORMAT, RenderDestination::Offscreen)?;
                let framebuffers = vec![Framebuffer::new(device.clone(), render_pass.handle(), &[view], extent)?];
                (Presenter::Offscreen(image), render_pass, framebuffers, extent)
            }
        };

        let pipeline = GraphicsPipeline::new(
            device.clone(),
            render_pass.handle(),
            &self.vertex_shader,
            &self.fragment_shader,
            &self.layouts,
        )?;

        Ok(RenderData {
            pipeline,
            framebuffers,
            render_pass,
            presenter,
            extent,
        })
    }

    /// Rebuild everything that depends on the target's images
    ///
    /// Waits for the device to go idle first. With a zero extent (minimized
    /// window) the old data is released and the rebuild is deferred to the
    /// next [`Renderer::begin_frame`] with a usable size.
    pub fn recreate_render_data(&mut self) -> VulkanResult<()> {
        self.core.wait_idle()?;
        self.resize.clear();

        let old = self.render_data.take();
        if is_zero(self.requested_extent) {
            log::debug!("Render target has zero extent, deferring render data");
            return Ok(());
        }

        let old_swapchain = old.as_ref().map_or(vk::SwapchainKHR::null(), RenderData::old_swapchain);
        let data = self.build_render_data(self.requested_extent, old_swapchain)?;
        drop(old);

        log::info!(
            "Render data ready: {}x{}, {} framebuffer(s)",
            data.extent.width,
            data.extent.height,
            data.framebuffers.len()
        );
        self.render_data = Some(data);
        Ok(())
    }

    /// Start a frame
    ///
    /// Returns `Ok(false)` when the frame must be skipped: zero-sized target,
    /// or the swapchain was out of date and has just been rebuilt.
    pub fn begin_frame(&mut self) -> VulkanResult<bool> {
        if self.frame_in_progress {
            report(Severity::Warning, "begin_frame called twice without end_frame");
            return Ok(false);
        }
        let frame = self.frames.current();
        self.command_buffers[frame].wait_for_execution()?;

        if is_zero(self.requested_extent) {
            return Ok(false);
        }
        if self.render_data.is_none() {
            self.recreate_render_data()?;
        }

        // Written before acquiring so a failure cannot strand the acquired image
        if let Some(data) = self.render_data.as_ref() {
            let projection = ProjectionUniform::orthographic(data.extent.width, data.extent.height);
            self.uniform.set_data(frame, bytemuck::bytes_of(&projection))?;
        }

        let acquired = match self.render_data.as_ref().map(|data| &data.presenter) {
            Some(Presenter::Swapchain(swapchain)) => {
                swapchain.acquire_next_image(self.semaphores[frame].image_available.handle())?
            }
            Some(Presenter::Offscreen(_)) => Some(0),
            None => return Ok(false),
        };
        let Some(image_index) = acquired else {
            log::debug!("Swapchain out of date on acquire");
            self.recreate_render_data()?;
            return Ok(false);
        };

        if let Err(e) = self.start_recording(frame, image_index) {
            self.release_acquired(frame)?;
            return Err(e);
        }

        self.image_index = image_index;
        self.frame_in_progress = true;
        Ok(true)
    }

    fn start_recording(&mut self, frame: usize, image_index: u32) -> VulkanResult<()> {
        let data = self
            .render_data
            .as_ref()
            .ok_or_else(|| VulkanError::invalid("render data released during begin_frame"))?;
        let framebuffer = data
            .framebuffers
            .get(image_index as usize)
            .ok_or_else(|| VulkanError::invalid(format!("no framebuffer for image {}", image_index)))?;

        let cmd = &mut self.command_buffers[frame];
        cmd.begin_record(vk::CommandBufferUsageFlags::empty())?;
        cmd.begin_render_pass(data.render_pass.handle(), framebuffer.handle(), data.extent, self.clear_color);
        cmd.bind_pipeline(data.pipeline.handle());
        cmd.bind_descriptor_set(data.pipeline.layout(), 0, self.projection_set.handle(frame));
        Ok(())
    }

    /// Consume the image-acquired semaphore of a frame that will not be
    /// drawn, then rebuild so the acquired image returns to the swapchain
    fn release_acquired(&mut self, frame: usize) -> VulkanResult<()> {
        if self.is_offscreen() {
            return Ok(());
        }
        let wait_semaphores = [self.semaphores[frame].image_available.handle()];
        let wait_stages = [vk::PipelineStageFlags::ALL_COMMANDS];
        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages);
        unsafe {
            self.core
                .device()
                .queue_submit(self.core.graphics_queue(), &[submit_info.build()], vk::Fence::null())
                .map_err(VulkanError::Api)?;
        }
        self.recreate_render_data()
    }

    /// Close a frame whose drawing failed part way
    ///
    /// Whatever was recorded is still submitted and presented, so the acquired
    /// image and its semaphores are consumed and the next
    /// [`Renderer::begin_frame`] starts clean. Without a frame in progress this
    /// does nothing.
    pub fn abort_frame(&mut self) -> VulkanResult<()> {
        if !self.frame_in_progress {
            return Ok(());
        }
        log::debug!("Closing frame {} after a drawing error", self.frames.current());
        self.end_frame()
    }

    /// Finish the frame started by [`Renderer::begin_frame`]
    ///
    /// Submits and presents, then advances the frame slot. An out-of-date or
    /// suboptimal swapchain, or a pending resize, rebuilds the render data for
    /// the next frame.
    pub fn end_frame(&mut self) -> VulkanResult<()> {
        if !self.frame_in_progress {
            report(Severity::Warning, "end_frame called without a successful begin_frame");
            return Ok(());
        }
        self.frame_in_progress = false;

        let frame = self.frames.current();
        let cmd = &mut self.command_buffers[frame];
        cmd.end_render_pass();
        cmd.end_record()?;

        let Some(data) = self.render_data.as_mut() else {
            return Ok(());
        };
        let out_of_date = match &mut data.presenter {
            Presenter::Swapchain(swapchain) => {
                let semaphores = &self.semaphores[frame];
                cmd.submit(Some(semaphores))?;
                swapchain.present(self.image_index, semaphores.render_finished.handle())?
            }
            Presenter::Offscreen(image) => {
                cmd.submit(None)?;
                image.assume_layout(RenderDestination::Offscreen.final_layout());
                false
            }
        };
        self.frames.advance();

        let resized = self.resize.take_pending();
        if out_of_date || resized {
            log::debug!("Recreating render data (out of date: {}, resized: {})", out_of_date, resized);
            self.recreate_render_data()?;
        }
        Ok(())
    }

    /// Mark the target as resized; handled after the next presented frame
    pub fn require_framebuffer_resize(&mut self) {
        self.resize.require();
    }

    /// Record the target's new size and schedule a rebuild
    pub fn resize(&mut self, width: u32, height: u32) {
        self.requested_extent = vk::Extent2D { width, height };
        self.require_framebuffer_resize();
    }

    /// Copy the last rendered offscreen frame to host memory as RGBA rows
    pub fn capture(&mut self) -> VulkanResult<Vec<u8>> {
        self.core.wait_idle()?;
        let core = Arc::clone(&self.core);
        let Some(RenderData {
            presenter: Presenter::Offscreen(image),
            ..
        }) = self.render_data.as_mut()
        else {
            return Err(VulkanError::invalid("capture needs an offscreen render target"));
        };

        let mut readback = Buffer::new_readback(core, image.byte_size(), "capture")?;
        image.copy_to_buffer(&readback)?;
        readback.read()
    }

    /// Wait for the device and release the render data
    ///
    /// Safe to call more than once; the renderer is unusable afterwards
    /// until [`Renderer::recreate_render_data`] is called.
    pub fn destroy(&mut self) {
        if let Err(e) = self.core.wait_idle() {
            log::warn!("wait_idle failed while destroying renderer: {:?}", e);
        }
        self.frame_in_progress = false;
        self.render_data = None;
    }

    /// Command buffer of the current frame slot
    pub fn command_buffer(&mut self) -> &mut CommandBuffer {
        &mut self.command_buffers[self.frames.current()]
    }

    /// Current frame slot
    pub fn frame_index(&self) -> usize {
        self.frames.current()
    }

    /// Frames presented so far
    pub fn presented_frames(&self) -> u64 {
        self.frames.presented()
    }

    /// Swapchain image acquired by the current frame
    pub fn image_index(&self) -> u32 {
        self.image_index
    }

    /// Whether a frame is between begin and end
    pub fn frame_in_progress(&self) -> bool {
        self.frame_in_progress
    }

    /// Extent of the render data, or the requested extent when there is none
    pub fn extent(&self) -> vk::Extent2D {
        self.render_data.as_ref().map_or(self.requested_extent, |data| data.extent)
    }

    /// Color format of the target, if render data exists
    pub fn color_format(&self) -> Option<vk::Format> {
        self.render_data.as_ref().map(RenderData::color_format)
    }

    /// Layout of the 2D pipeline, if render data exists
    pub fn pipeline_layout(&self) -> Option<vk::PipelineLayout> {
        self.render_data.as_ref().map(|data| data.pipeline.layout())
    }

    /// Whether the target is an offscreen image
    pub fn is_offscreen(&self) -> bool {
        self.surface.is_none()
    }

    /// Whether a resize is waiting to be applied
    pub fn resize_pending(&self) -> bool {
        self.resize.is_pending()
    }

    /// Projection descriptor set (set 0)
    pub fn projection_set(&self) -> &DescriptorSet {
        &self.projection_set
    }

    /// Pool the frame command buffers were allocated from
    pub fn command_pool(&self) -> &CommandPool {
        &self.command_pool
    }

    /// Per-frame projection uniform
    pub fn uniform_buffer(&self) -> &UniformBuffer {
        &self.uniform
    }

    /// Shared render core
    pub fn core(&self) -> &Arc<RenderCore> {
        &self.core
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        self.destroy();
    }
}
