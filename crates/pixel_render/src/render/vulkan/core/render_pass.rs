//! Single-subpass color render pass

use ash::{vk, Device};

use super::context::{VulkanError, VulkanResult};

/// Where the rendered image goes after the pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderDestination {
    /// Swapchain image handed to the presentation engine
    Present,
    /// Offscreen image read back with a transfer
    Offscreen,
}

impl RenderDestination {
    /// Layout the color attachment ends the pass in
    pub fn final_layout(self) -> vk::ImageLayout {
        match self {
            Self::Present => vk::ImageLayout::PRESENT_SRC_KHR,
            Self::Offscreen => vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
        }
    }
}

/// Render pass wrapper with RAII cleanup
pub struct RenderPass {
    device: Device,
    render_pass: vk::RenderPass,
    destination: RenderDestination,
}

impl RenderPass {
    /// One color attachment cleared on load and stored
    pub fn new(device: Device, color_format: vk::Format, destination: RenderDestination) -> VulkanResult<Self> {
        let color_attachment = vk::AttachmentDescription::builder()
            .format(color_format)
            .samples(vk::SampleCountFlags::TYPE_1)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::STORE)
            .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .final_layout(destination.final_layout())
            .build();
        let attachments = [color_attachment];

        let color_refs = [vk::AttachmentReference::builder()
            .attachment(0)
            .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            .build()];

        let subpasses = [vk::SubpassDescription::builder()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&color_refs)
            .build()];

        let dependencies = [vk::SubpassDependency::builder()
            .src_subpass(vk::SUBPASS_EXTERNAL)
            .dst_subpass(0)
            .src_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
            .src_access_mask(vk::AccessFlags::empty())
            .dst_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
            .dst_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_READ | vk::AccessFlags::COLOR_ATTACHMENT_WRITE)
            .build()];

        let create_info = vk::RenderPassCreateInfo::builder()
            .attachments(&attachments)
            .subpasses(&subpasses)
            .dependencies(&dependencies);

        let render_pass = unsafe {
            device.create_render_pass(&create_info, None)
                .map_err(VulkanError::Api)?
        };

        Ok(Self {
            device,
            render_pass,
            destination,
        })
    }

    /// Native handle
    pub fn handle(&self) -> vk::RenderPass {
        self.render_pass
    }

    /// Destination this pass was built for
    pub fn destination(&self) -> RenderDestination {
        self.destination
    }
}

impl Drop for RenderPass {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_render_pass(self.render_pass, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn final_layouts() {
        assert_eq!(RenderDestination::Present.final_layout(), vk::ImageLayout::PRESENT_SRC_KHR);
        assert_eq!(RenderDestination::Offscreen.final_layout(), vk::ImageLayout::TRANSFER_SRC_OPTIMAL);
    }
}
