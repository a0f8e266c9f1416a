//! Allocator-backed 2D images
//!
//! Layouts are tracked on the CPU side and changed only through explicit
//! transitions, which must happen before any copy or sampling that expects a
//! different layout.

use ash::vk;
use std::sync::Arc;

use super::allocator::MemoryStrategy;
use super::buffer::Buffer;
use super::commands::{submit_once, CommandBuffer};
use super::context::{VulkanError, VulkanResult};
use super::render_core::RenderCore;

/// Bytes per texel of `format`, or 0 for formats the crate never creates
pub fn format_size(format: vk::Format) -> u64 {
    match format {
        vk::Format::R8_UNORM | vk::Format::R8_SRGB => 1,
        vk::Format::R8G8_UNORM | vk::Format::R8G8_SRGB => 2,
        vk::Format::R8G8B8A8_UNORM
        | vk::Format::R8G8B8A8_SRGB
        | vk::Format::B8G8R8A8_UNORM
        | vk::Format::B8G8R8A8_SRGB
        | vk::Format::R32_SFLOAT
        | vk::Format::D32_SFLOAT => 4,
        vk::Format::R16G16B16A16_SFLOAT => 8,
        vk::Format::R32G32B32A32_SFLOAT => 16,
        _ => 0,
    }
}

/// Access masks and pipeline stages for one layout transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayoutTransition {
    /// Writes that must complete before the transition
    pub src_access: vk::AccessFlags,
    /// Accesses that wait for the transition
    pub dst_access: vk::AccessFlags,
    /// Stage producing the source accesses
    pub src_stage: vk::PipelineStageFlags,
    /// Stage consuming the new layout
    pub dst_stage: vk::PipelineStageFlags,
}

fn source_scope(layout: vk::ImageLayout) -> (vk::AccessFlags, vk::PipelineStageFlags) {
    match layout {
        vk::ImageLayout::UNDEFINED => (vk::AccessFlags::empty(), vk::PipelineStageFlags::TOP_OF_PIPE),
        vk::ImageLayout::TRANSFER_DST_OPTIMAL => (vk::AccessFlags::TRANSFER_WRITE, vk::PipelineStageFlags::TRANSFER),
        vk::ImageLayout::TRANSFER_SRC_OPTIMAL => (vk::AccessFlags::TRANSFER_READ, vk::PipelineStageFlags::TRANSFER),
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL => {
            (vk::AccessFlags::SHADER_READ, vk::PipelineStageFlags::FRAGMENT_SHADER)
        }
        vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL => (
            vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        ),
        _ => (vk::AccessFlags::MEMORY_WRITE, vk::PipelineStageFlags::ALL_COMMANDS),
    }
}

fn destination_scope(layout: vk::ImageLayout) -> (vk::AccessFlags, vk::PipelineStageFlags) {
    match layout {
        vk::ImageLayout::TRANSFER_DST_OPTIMAL => (vk::AccessFlags::TRANSFER_WRITE, vk::PipelineStageFlags::TRANSFER),
        vk::ImageLayout::TRANSFER_SRC_OPTIMAL => (vk::AccessFlags::TRANSFER_READ, vk::PipelineStageFlags::TRANSFER),
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL => {
            (vk::AccessFlags::SHADER_READ, vk::PipelineStageFlags::FRAGMENT_SHADER)
        }
        vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL => (
            vk::AccessFlags::COLOR_ATTACHMENT_READ | vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        ),
        vk::ImageLayout::PRESENT_SRC_KHR => (vk::AccessFlags::empty(), vk::PipelineStageFlags::BOTTOM_OF_PIPE),
        _ => (
            vk::AccessFlags::MEMORY_READ | vk::AccessFlags::MEMORY_WRITE,
            vk::PipelineStageFlags::ALL_COMMANDS,
        ),
    }
}

/// Synchronization scopes for moving an image from `old` to `new`
pub fn transition_masks(old: vk::ImageLayout, new: vk::ImageLayout) -> LayoutTransition {
    let (src_access, src_stage) = source_scope(old);
    let (dst_access, dst_stage) = destination_scope(new);
    LayoutTransition {
        src_access,
        dst_access,
        src_stage,
        dst_stage,
    }
}

const COLOR_RANGE: vk::ImageSubresourceRange = vk::ImageSubresourceRange {
    aspect_mask: vk::ImageAspectFlags::COLOR,
    base_mip_level: 0,
    level_count: 1,
    base_array_layer: 0,
    layer_count: 1,
};

struct RawImage {
    handle: vk::Image,
    allocation: vk_mem::Allocation,
}

/// 2D color image with optional view and sampler
pub struct Image {
    core: Arc<RenderCore>,
    raw: Option<RawImage>,
    view: vk::ImageView,
    sampler: vk::Sampler,
    format: vk::Format,
    tiling: vk::ImageTiling,
    layout: vk::ImageLayout,
    width: u32,
    height: u32,
    name: String,
}

impl Image {
    /// Create an image in device-local memory
    pub fn new(
        core: Arc<RenderCore>,
        width: u32,
        height: u32,
        format: vk::Format,
        tiling: vk::ImageTiling,
        usage: vk::ImageUsageFlags,
        name: &str,
    ) -> VulkanResult<Self> {
        if width == 0 || height == 0 {
            return Err(VulkanError::invalid(format!("image '{}' has zero extent", name)));
        }

        let info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::TYPE_2D)
            .extent(vk::Extent3D { width, height, depth: 1 })
            .mip_levels(1)
            .array_layers(1)
            .format(format)
            .tiling(tiling)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .samples(vk::SampleCountFlags::TYPE_1);

        let (handle, allocation) = core.allocator().create_image(&info, MemoryStrategy::PreferDevice, name)?;

        Ok(Self {
            core,
            raw: Some(RawImage { handle, allocation }),
            view: vk::ImageView::null(),
            sampler: vk::Sampler::null(),
            format,
            tiling,
            layout: vk::ImageLayout::UNDEFINED,
            width,
            height,
            name: name.to_string(),
        })
    }

    /// Create the color view; replaces a previous one
    pub fn create_view(&mut self) -> VulkanResult<vk::ImageView> {
        let create_info = vk::ImageViewCreateInfo::builder()
            .image(self.handle())
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(self.format)
            .subresource_range(COLOR_RANGE);

        let view = unsafe {
            self.core.device().create_image_view(&create_info, None)
                .map_err(VulkanError::Api)?
        };
        self.destroy_view();
        self.view = view;
        Ok(view)
    }

    /// Create a clamped sampler; replaces a previous one
    pub fn create_sampler(&mut self, filter: vk::Filter) -> VulkanResult<vk::Sampler> {
        let create_info = vk::SamplerCreateInfo::builder()
            .mag_filter(filter)
            .min_filter(filter)
            .mipmap_mode(vk::SamplerMipmapMode::NEAREST)
            .address_mode_u(vk::SamplerAddressMode::CLAMP_TO_EDGE)
            .address_mode_v(vk::SamplerAddressMode::CLAMP_TO_EDGE)
            .address_mode_w(vk::SamplerAddressMode::CLAMP_TO_EDGE)
            .max_anisotropy(1.0)
            .border_color(vk::BorderColor::INT_OPAQUE_BLACK)
            .compare_op(vk::CompareOp::ALWAYS)
            .min_lod(0.0)
            .max_lod(0.0);

        let sampler = unsafe {
            self.core.device().create_sampler(&create_info, None)
                .map_err(VulkanError::Api)?
        };
        self.destroy_sampler();
        self.sampler = sampler;
        Ok(sampler)
    }

    /// Record a layout transition into `cmd`
    pub fn record_transition(&mut self, cmd: &mut CommandBuffer, new_layout: vk::ImageLayout) {
        if new_layout == self.layout || !cmd.is_recording() {
            return;
        }
        let masks = transition_masks(self.layout, new_layout);
        let barrier = vk::ImageMemoryBarrier::builder()
            .old_layout(self.layout)
            .new_layout(new_layout)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(self.handle())
            .subresource_range(COLOR_RANGE)
            .src_access_mask(masks.src_access)
            .dst_access_mask(masks.dst_access);

        unsafe {
            self.core.device().cmd_pipeline_barrier(
                cmd.handle(),
                masks.src_stage,
                masks.dst_stage,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[barrier.build()],
            );
        }
        self.layout = new_layout;
    }

    /// Transition immediately with a one-shot command buffer
    pub fn transition_layout(&mut self, new_layout: vk::ImageLayout) -> VulkanResult<()> {
        if new_layout == self.layout {
            return Ok(());
        }
        let core = Arc::clone(&self.core);
        submit_once(&core, |cmd| {
            self.record_transition(cmd, new_layout);
            Ok(())
        })
    }

    fn copy_region(&self) -> vk::BufferImageCopy {
        vk::BufferImageCopy {
            buffer_offset: 0,
            buffer_row_length: 0,
            buffer_image_height: 0,
            image_subresource: vk::ImageSubresourceLayers {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                mip_level: 0,
                base_array_layer: 0,
                layer_count: 1,
            },
            image_offset: vk::Offset3D { x: 0, y: 0, z: 0 },
            image_extent: vk::Extent3D {
                width: self.width,
                height: self.height,
                depth: 1,
            },
        }
    }

    /// Byte size of the full image
    pub fn byte_size(&self) -> vk::DeviceSize {
        u64::from(self.width) * u64::from(self.height) * format_size(self.format)
    }

    fn check_buffer(&self, buffer: &Buffer) -> VulkanResult<()> {
        if buffer.size() < self.byte_size() {
            return Err(VulkanError::invalid(format!(
                "buffer '{}' ({} bytes) is too small for image '{}' ({} bytes)",
                buffer.name(),
                buffer.size(),
                self.name,
                self.byte_size()
            )));
        }
        Ok(())
    }

    /// Fill the image from `buffer` and leave it ready for sampling
    pub fn copy_from_buffer(&mut self, buffer: &Buffer) -> VulkanResult<()> {
        self.check_buffer(buffer)?;
        let core = Arc::clone(&self.core);
        let region = self.copy_region();

        submit_once(&core, |cmd| {
            self.record_transition(cmd, vk::ImageLayout::TRANSFER_DST_OPTIMAL);
            unsafe {
                core.device().cmd_copy_buffer_to_image(
                    cmd.handle(),
                    buffer.handle(),
                    self.handle(),
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    &[region],
                );
            }
            self.record_transition(cmd, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
            Ok(())
        })
    }

    /// Copy the image into `buffer`, leaving it in `TRANSFER_SRC_OPTIMAL`
    pub fn copy_to_buffer(&mut self, buffer: &Buffer) -> VulkanResult<()> {
        self.check_buffer(buffer)?;
        let core = Arc::clone(&self.core);
        let region = self.copy_region();

        submit_once(&core, |cmd| {
            self.record_transition(cmd, vk::ImageLayout::TRANSFER_SRC_OPTIMAL);
            unsafe {
                core.device().cmd_copy_image_to_buffer(
                    cmd.handle(),
                    self.handle(),
                    vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                    buffer.handle(),
                    &[region],
                );
            }
            Ok(())
        })
    }

    /// Record that a render pass left the image in `layout`
    pub fn assume_layout(&mut self, layout: vk::ImageLayout) {
        self.layout = layout;
    }

    fn destroy_view(&mut self) {
        if self.view != vk::ImageView::null() {
            unsafe { self.core.device().destroy_image_view(self.view, None) };
            self.view = vk::ImageView::null();
        }
    }

    fn destroy_sampler(&mut self) {
        if self.sampler != vk::Sampler::null() {
            unsafe { self.core.device().destroy_sampler(self.sampler, None) };
            self.sampler = vk::Sampler::null();
        }
    }

    /// Release sampler, view and memory; later calls are no-ops
    pub fn destroy(&mut self) {
        self.destroy_sampler();
        self.destroy_view();
        if let Some(mut raw) = self.raw.take() {
            self.core.allocator().destroy_image(raw.handle, &mut raw.allocation);
        }
    }

    /// Native handle, null once destroyed
    pub fn handle(&self) -> vk::Image {
        self.raw.as_ref().map_or(vk::Image::null(), |raw| raw.handle)
    }

    /// Color view, null until [`Image::create_view`]
    pub fn view(&self) -> vk::ImageView {
        self.view
    }

    /// Sampler, null until [`Image::create_sampler`]
    pub fn sampler(&self) -> vk::Sampler {
        self.sampler
    }

    /// Texel format
    pub fn format(&self) -> vk::Format {
        self.format
    }

    /// Tiling mode
    pub fn tiling(&self) -> vk::ImageTiling {
        self.tiling
    }

    /// Current layout as tracked on the CPU
    pub fn layout(&self) -> vk::ImageLayout {
        self.layout
    }

    /// Width in texels
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Height in texels
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Extent as a Vulkan 2D extent
    pub fn extent(&self) -> vk::Extent2D {
        vk::Extent2D {
            width: self.width,
            height: self.height,
        }
    }
}

impl Drop for Image {
    fn drop(&mut self) {
        self.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upload_transitions() {
        let to_dst = transition_masks(vk::ImageLayout::UNDEFINED, vk::ImageLayout::TRANSFER_DST_OPTIMAL);
        assert_eq!(to_dst.src_access, vk::AccessFlags::empty());
        assert_eq!(to_dst.src_stage, vk::PipelineStageFlags::TOP_OF_PIPE);
        assert_eq!(to_dst.dst_access, vk::AccessFlags::TRANSFER_WRITE);
        assert_eq!(to_dst.dst_stage, vk::PipelineStageFlags::TRANSFER);

        let to_read = transition_masks(vk::ImageLayout::TRANSFER_DST_OPTIMAL, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
        assert_eq!(to_read.src_access, vk::AccessFlags::TRANSFER_WRITE);
        assert_eq!(to_read.dst_access, vk::AccessFlags::SHADER_READ);
        assert_eq!(to_read.dst_stage, vk::PipelineStageFlags::FRAGMENT_SHADER);
    }

    #[test]
    fn reupload_waits_for_sampling() {
        let masks = transition_masks(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL, vk::ImageLayout::TRANSFER_DST_OPTIMAL);
        assert_eq!(masks.src_access, vk::AccessFlags::SHADER_READ);
        assert_eq!(masks.src_stage, vk::PipelineStageFlags::FRAGMENT_SHADER);
    }

    #[test]
    fn unknown_layouts_fall_back_to_full_barrier() {
        let masks = transition_masks(vk::ImageLayout::GENERAL, vk::ImageLayout::GENERAL);
        assert_eq!(masks.src_stage, vk::PipelineStageFlags::ALL_COMMANDS);
        assert_eq!(masks.dst_stage, vk::PipelineStageFlags::ALL_COMMANDS);
    }

    #[test]
    fn texel_sizes() {
        assert_eq!(format_size(vk::Format::R8G8B8A8_UNORM), 4);
        assert_eq!(format_size(vk::Format::B8G8R8A8_SRGB), 4);
        assert_eq!(format_size(vk::Format::R8_UNORM), 1);
        assert_eq!(format_size(vk::Format::R32G32B32A32_SFLOAT), 16);
        assert_eq!(format_size(vk::Format::BC1_RGB_UNORM_BLOCK), 0);
    }
}
