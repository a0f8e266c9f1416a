//! Command pools and command buffers
//!
//! A [`CommandBuffer`] walks the state machine
//! `Uninit -> Idle -> Recording -> Idle -> Submitted -> Ready`, with every
//! transition checked through [`CommandBufferState`].

use ash::{vk, Device};
use std::sync::Arc;

use super::buffer::Buffer;
use super::context::{VulkanError, VulkanResult};
use super::render_core::RenderCore;
use super::sync::{Fence, FrameSemaphores, InFlightRef};
use crate::foundation::{report, Severity};

/// Command pool wrapper with RAII cleanup
pub struct CommandPool {
    device: Device,
    command_pool: vk::CommandPool,
}

impl CommandPool {
    /// Create a pool whose buffers can be reset individually
    pub fn new(device: Device, queue_family_index: u32) -> VulkanResult<Self> {
        Self::with_flags(device, queue_family_index, vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
    }

    /// Create a pool for short-lived one-shot buffers
    pub fn transient(device: Device, queue_family_index: u32) -> VulkanResult<Self> {
        Self::with_flags(device, queue_family_index, vk::CommandPoolCreateFlags::TRANSIENT)
    }

    fn with_flags(device: Device, queue_family_index: u32, flags: vk::CommandPoolCreateFlags) -> VulkanResult<Self> {
        let pool_create_info = vk::CommandPoolCreateInfo::builder()
            .flags(flags)
            .queue_family_index(queue_family_index);

        let command_pool = unsafe {
            device.create_command_pool(&pool_create_info, None)
                .map_err(VulkanError::Api)?
        };

        Ok(Self {
            device,
            command_pool,
        })
    }

    /// Allocate one primary command buffer
    fn allocate(&self) -> VulkanResult<vk::CommandBuffer> {
        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(self.command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);

        let command_buffers = unsafe {
            self.device.allocate_command_buffers(&alloc_info)
                .map_err(VulkanError::Api)?
        };

        command_buffers
            .into_iter()
            .next()
            .ok_or_else(|| VulkanError::InitializationFailed("driver returned no command buffer".to_string()))
    }

    /// Get the command pool handle
    pub fn handle(&self) -> vk::CommandPool {
        self.command_pool
    }
}

impl Drop for CommandPool {
    fn drop(&mut self) {
        // Frees every command buffer allocated from the pool
        unsafe {
            self.device.destroy_command_pool(self.command_pool, None);
        }
    }
}

/// Lifecycle of a command buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandBufferState {
    /// Not allocated, or destroyed
    Uninit,
    /// Allocated and not recording
    Idle,
    /// Between `begin_record` and `end_record`
    Recording,
    /// Handed to the queue, fence not yet waited on
    Submitted,
    /// Execution finished
    Ready,
}

/// Outcome of a checked state transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Perform the operation and move to the given state
    To(CommandBufferState),
    /// Leave state and GPU untouched
    Stay,
}

impl CommandBufferState {
    fn invalid(self, target: Self) -> Transition {
        debug_assert!(false, "invalid command buffer transition {:?} -> {:?}", self, target);
        Transition::Stay
    }

    /// Transition for `begin_record`
    pub fn begin(self) -> VulkanResult<Transition> {
        match self {
            Self::Uninit => Err(VulkanError::CommandBufferUninitialized),
            Self::Recording => Ok(Transition::Stay),
            Self::Idle | Self::Ready => Ok(Transition::To(Self::Recording)),
            Self::Submitted => Ok(self.invalid(Self::Recording)),
        }
    }

    /// Transition for `end_record`
    pub fn end(self) -> VulkanResult<Transition> {
        match self {
            Self::Uninit => Err(VulkanError::CommandBufferUninitialized),
            Self::Recording => Ok(Transition::To(Self::Idle)),
            Self::Idle | Self::Submitted | Self::Ready => Ok(Transition::Stay),
        }
    }

    /// Transition for an asynchronous submit
    pub fn submit(self) -> Transition {
        match self {
            Self::Idle => Transition::To(Self::Submitted),
            other => other.invalid(Self::Submitted),
        }
    }

    /// Transition for a blocking one-shot submit
    pub fn submit_idle(self) -> Transition {
        match self {
            Self::Idle => Transition::To(Self::Ready),
            other => other.invalid(Self::Ready),
        }
    }

    /// Transition once the fence has been waited on
    pub fn wait(self) -> Transition {
        match self {
            Self::Submitted => Transition::To(Self::Ready),
            _ => Transition::Stay,
        }
    }
}

/// Intended lifetime of a command buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandBufferKind {
    /// Re-recorded every frame
    LongTime,
    /// Recorded and submitted once
    SingleTime,
}

/// Recorded GPU commands plus the fence tracking their execution
pub struct CommandBuffer {
    core: Arc<RenderCore>,
    handle: vk::CommandBuffer,
    fence: Option<Fence>,
    kind: CommandBufferKind,
    state: CommandBufferState,
    referenced: Vec<InFlightRef>,
}

impl CommandBuffer {
    /// Allocate a command buffer from `pool` and create its fence
    pub fn new(core: Arc<RenderCore>, pool: &CommandPool, kind: CommandBufferKind) -> VulkanResult<Self> {
        let handle = pool.allocate()?;
        let fence = Fence::new(core.device().clone(), true)?;

        #[cfg(debug_assertions)]
        log::debug!("New {:?} command buffer {:?}", kind, handle);

        Ok(Self {
            core,
            handle,
            fence: Some(fence),
            kind,
            state: CommandBufferState::Idle,
            referenced: Vec::new(),
        })
    }

    fn device(&self) -> &Device {
        self.core.device()
    }

    /// Start recording; already recording is a no-op
    pub fn begin_record(&mut self, usage: vk::CommandBufferUsageFlags) -> VulkanResult<()> {
        let Transition::To(next) = self.state.begin()? else {
            return Ok(());
        };

        let begin_info = vk::CommandBufferBeginInfo::builder().flags(usage);
        unsafe {
            self.device().begin_command_buffer(self.handle, &begin_info)
                .map_err(VulkanError::Api)?;
        }
        self.state = next;
        Ok(())
    }

    /// Finish recording; a no-op unless currently recording
    pub fn end_record(&mut self) -> VulkanResult<()> {
        let Transition::To(next) = self.state.end()? else {
            return Ok(());
        };

        unsafe {
            self.device().end_command_buffer(self.handle)
                .map_err(VulkanError::Api)?;
        }
        self.state = next;
        Ok(())
    }

    /// Submit and block until the GPU is done, using a throwaway fence
    pub fn submit_idle(&mut self) -> VulkanResult<()> {
        let Transition::To(next) = self.state.submit_idle() else {
            return Ok(());
        };

        let fence = Fence::new(self.device().clone(), false)?;
        let command_buffers = [self.handle];
        let submit_info = vk::SubmitInfo::builder().command_buffers(&command_buffers);

        unsafe {
            self.device().queue_submit(self.core.graphics_queue(), &[submit_info.build()], fence.handle())
                .map_err(VulkanError::Api)?;
        }
        fence.wait()?;

        self.release_references();
        self.state = next;
        Ok(())
    }

    /// Submit for asynchronous execution
    ///
    /// With `semaphores`, execution waits for `image_available` at the color
    /// output stage and signals `render_finished`. The buffer's own fence is
    /// signaled on completion.
    pub fn submit(&mut self, semaphores: Option<&FrameSemaphores>) -> VulkanResult<()> {
        let Transition::To(next) = self.state.submit() else {
            return Ok(());
        };
        let fence = self.fence.as_ref().ok_or(VulkanError::CommandBufferUninitialized)?;

        let wait_semaphores: Vec<vk::Semaphore> = semaphores
            .map(|s| vec![s.image_available.handle()])
            .unwrap_or_default();
        let wait_stages: Vec<vk::PipelineStageFlags> = wait_semaphores
            .iter()
            .map(|_| vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
            .collect();
        let signal_semaphores: Vec<vk::Semaphore> = semaphores
            .map(|s| vec![s.render_finished.handle()])
            .unwrap_or_default();
        let command_buffers = [self.handle];

        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        // Reset right before submitting so an aborted frame never leaves the fence unsignaled
        fence.reset()?;
        unsafe {
            self.device().queue_submit(self.core.graphics_queue(), &[submit_info.build()], fence.handle())
                .map_err(VulkanError::Api)?;
        }

        self.state = next;
        Ok(())
    }

    /// Block until the last submission finished executing
    pub fn wait_for_execution(&mut self) -> VulkanResult<()> {
        let Some(fence) = self.fence.as_ref() else {
            return Ok(());
        };
        fence.wait()?;

        self.release_references();
        if let Transition::To(next) = self.state.wait() {
            self.state = next;
        }
        Ok(())
    }

    fn release_references(&mut self) {
        self.referenced.clear();
    }

    fn reference(&mut self, buffer: &Buffer) {
        self.referenced.push(buffer.in_flight().acquire());
    }

    /// Buffers recorded since the last completed execution
    pub fn referenced_count(&self) -> usize {
        self.referenced.len()
    }

    fn require_recording(&self, operation: &str) -> bool {
        if self.state == CommandBufferState::Recording {
            return true;
        }
        report(
            Severity::Warning,
            format_args!("{}: command buffer is not recording ({:?}), skipped", operation, self.state),
        );
        false
    }

    /// Bind a vertex buffer at binding 0
    ///
    /// Skipped with a warning unless recording. The buffer is marked in flight
    /// until this command buffer's execution has been waited on.
    pub fn bind_vertex_buffer(&mut self, buffer: &Buffer) {
        if !self.require_recording("bind_vertex_buffer") {
            return;
        }
        unsafe {
            self.device().cmd_bind_vertex_buffers(self.handle, 0, &[buffer.handle()], &[buffer.offset()]);
        }
        self.reference(buffer);
    }

    /// Bind a `u16` index buffer
    pub fn bind_index_buffer(&mut self, buffer: &Buffer) {
        if !self.require_recording("bind_index_buffer") {
            return;
        }
        unsafe {
            self.device().cmd_bind_index_buffer(self.handle, buffer.handle(), buffer.offset(), vk::IndexType::UINT16);
        }
        self.reference(buffer);
    }

    /// Copy `size` bytes between buffers
    pub fn copy_buffer(&mut self, src: &Buffer, dst: &Buffer, size: vk::DeviceSize) {
        if !self.require_recording("copy_buffer") {
            return;
        }
        let region = vk::BufferCopy {
            src_offset: src.offset(),
            dst_offset: dst.offset(),
            size,
        };
        unsafe {
            self.device().cmd_copy_buffer(self.handle, src.handle(), dst.handle(), &[region]);
        }
        self.reference(src);
        self.reference(dst);
    }

    /// Begin an inline render pass
    pub fn begin_render_pass(
        &mut self,
        render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        extent: vk::Extent2D,
        clear_color: [f32; 4],
    ) {
        if !self.require_recording("begin_render_pass") {
            return;
        }
        let clear_values = [vk::ClearValue {
            color: vk::ClearColorValue { float32: clear_color },
        }];
        let begin_info = vk::RenderPassBeginInfo::builder()
            .render_pass(render_pass)
            .framebuffer(framebuffer)
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent,
            })
            .clear_values(&clear_values);

        unsafe {
            self.device().cmd_begin_render_pass(self.handle, &begin_info, vk::SubpassContents::INLINE);

            let viewport = vk::Viewport {
                x: 0.0,
                y: 0.0,
                width: extent.width as f32,
                height: extent.height as f32,
                min_depth: 0.0,
                max_depth: 1.0,
            };
            self.device().cmd_set_viewport(self.handle, 0, &[viewport]);
            self.device().cmd_set_scissor(self.handle, 0, &[vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent,
            }]);
        }
    }

    /// End the current render pass
    pub fn end_render_pass(&mut self) {
        if !self.require_recording("end_render_pass") {
            return;
        }
        unsafe {
            self.device().cmd_end_render_pass(self.handle);
        }
    }

    /// Bind a graphics pipeline
    pub fn bind_pipeline(&mut self, pipeline: vk::Pipeline) {
        if !self.require_recording("bind_pipeline") {
            return;
        }
        unsafe {
            self.device().cmd_bind_pipeline(self.handle, vk::PipelineBindPoint::GRAPHICS, pipeline);
        }
    }

    /// Bind one descriptor set at `set_index`
    pub fn bind_descriptor_set(&mut self, layout: vk::PipelineLayout, set_index: u32, set: vk::DescriptorSet) {
        if !self.require_recording("bind_descriptor_set") {
            return;
        }
        unsafe {
            self.device().cmd_bind_descriptor_sets(
                self.handle,
                vk::PipelineBindPoint::GRAPHICS,
                layout,
                set_index,
                &[set],
                &[],
            );
        }
    }

    /// Push constants to the vertex stage
    pub fn push_vertex_constants(&mut self, layout: vk::PipelineLayout, data: &[u8]) {
        if !self.require_recording("push_constants") {
            return;
        }
        unsafe {
            self.device().cmd_push_constants(self.handle, layout, vk::ShaderStageFlags::VERTEX, 0, data);
        }
    }

    /// Draw indexed
    pub fn draw_indexed(&mut self, index_count: u32) {
        if !self.require_recording("draw_indexed") {
            return;
        }
        unsafe {
            self.device().cmd_draw_indexed(self.handle, index_count, 1, 0, 0, 0);
        }
    }

    /// Release the fence and forget the native handle
    ///
    /// The handle itself is returned to its pool when the pool is destroyed.
    /// Calling this more than once is harmless.
    pub fn destroy(&mut self) {
        if self.state == CommandBufferState::Uninit {
            return;
        }
        self.release_references();
        self.fence = None;
        self.handle = vk::CommandBuffer::null();
        self.state = CommandBufferState::Uninit;
    }

    /// Native handle
    pub fn handle(&self) -> vk::CommandBuffer {
        self.handle
    }

    /// Current lifecycle state
    pub fn state(&self) -> CommandBufferState {
        self.state
    }

    /// Whether commands are being recorded
    pub fn is_recording(&self) -> bool {
        self.state == CommandBufferState::Recording
    }

    /// Intended lifetime
    pub fn kind(&self) -> CommandBufferKind {
        self.kind
    }

    /// Render core this buffer was allocated from
    pub fn core(&self) -> &Arc<RenderCore> {
        &self.core
    }
}

impl Drop for CommandBuffer {
    fn drop(&mut self) {
        self.destroy();
    }
}

/// Record commands into a one-shot buffer, submit them and wait
pub fn submit_once(
    core: &Arc<RenderCore>,
    record: impl FnOnce(&mut CommandBuffer) -> VulkanResult<()>,
) -> VulkanResult<()> {
    let pool = CommandPool::transient(core.device().clone(), core.graphics_family())?;
    let mut cmd = CommandBuffer::new(Arc::clone(core), &pool, CommandBufferKind::SingleTime)?;

    cmd.begin_record(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT)?;
    record(&mut cmd)?;
    cmd.end_record()?;
    cmd.submit_idle()
}

#[cfg(test)]
mod tests {
    use super::CommandBufferState::*;
    use super::*;

    fn apply(state: CommandBufferState, transition: Transition) -> CommandBufferState {
        match transition {
            Transition::To(next) => next,
            Transition::Stay => state,
        }
    }

    #[test]
    fn begin_then_end_returns_to_idle() {
        for start in [Idle, Ready] {
            let recording = apply(start, start.begin().unwrap());
            assert_eq!(recording, Recording);
            assert_eq!(apply(recording, recording.end().unwrap()), Idle);
        }
    }

    #[test]
    fn end_without_begin_is_a_noop() {
        for state in [Idle, Ready, Submitted] {
            assert_eq!(state.end().unwrap(), Transition::Stay);
        }
    }

    #[test]
    fn double_begin_is_a_noop() {
        assert_eq!(Recording.begin().unwrap(), Transition::Stay);
    }

    #[test]
    fn uninitialized_buffer_rejects_recording() {
        assert!(matches!(Uninit.begin(), Err(VulkanError::CommandBufferUninitialized)));
        assert!(matches!(Uninit.end(), Err(VulkanError::CommandBufferUninitialized)));
        assert_eq!(
            Uninit.begin().unwrap_err().severity(),
            Severity::Fatal
        );
    }

    #[test]
    fn frame_cycle() {
        let mut state = Idle;
        for _ in 0..3 {
            state = apply(state, state.begin().unwrap());
            state = apply(state, state.end().unwrap());
            state = apply(state, state.submit());
            assert_eq!(state, Submitted);
            state = apply(state, state.wait());
            assert_eq!(state, Ready);
        }
    }

    #[test]
    fn submit_idle_goes_straight_to_ready() {
        assert_eq!(Idle.submit_idle(), Transition::To(Ready));
    }

    #[test]
    fn waiting_on_an_unsubmitted_buffer_changes_nothing() {
        assert_eq!(Idle.wait(), Transition::Stay);
        assert_eq!(Ready.wait(), Transition::Stay);
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "invalid command buffer transition")]
    fn submitting_while_recording_asserts_in_debug() {
        let _ = Recording.submit();
    }
}
