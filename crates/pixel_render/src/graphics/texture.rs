//! Sampled RGBA textures drawn as screen-space quads

use ash::vk;
use std::sync::Arc;

use crate::config::MAX_FRAMES_IN_FLIGHT;
use crate::render::vulkan::core::buffer::{index_buffer, vertex_buffer};
use crate::render::vulkan::core::vertex::quad;
use crate::render::vulkan::core::{
    Buffer, BufferKind, CommandBuffer, DescriptorPool, DescriptorSet, DrawOffset, GraphicsDescriptorLayouts, Image,
    RenderCore, VulkanError, VulkanResult,
};

slotmap::new_key_type! {
    /// Handle to a texture owned by the application
    pub struct TextureId;
}

/// Texel format of every texture
pub const TEXTURE_FORMAT: vk::Format = vk::Format::R8G8B8A8_UNORM;

/// Byte length of a tightly packed RGBA8 image
pub fn rgba_len(width: u32, height: u32) -> usize {
    width as usize * height as usize * 4
}

/// RGBA8 image with its quad and fragment descriptor set
pub struct Texture {
    set: DescriptorSet,
    vertices: Buffer,
    indices: Buffer,
    image: Image,
    index_count: u32,
    name: String,
}

impl Texture {
    /// Create a texture from tightly packed RGBA8 `pixels`
    pub fn new(
        core: &Arc<RenderCore>,
        width: u32,
        height: u32,
        pixels: &[u8],
        name: &str,
        layouts: &GraphicsDescriptorLayouts,
        pool: Arc<DescriptorPool>,
    ) -> VulkanResult<Self> {
        let mut image = Image::new(
            Arc::clone(core),
            width,
            height,
            TEXTURE_FORMAT,
            vk::ImageTiling::OPTIMAL,
            vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED,
            name,
        )?;
        Self::upload(core, &mut image, pixels, name)?;
        image.create_view()?;
        image.create_sampler(vk::Filter::NEAREST)?;

        let (quad_vertices, quad_indices) = quad(width as f32, height as f32);
        let vertices = vertex_buffer(Arc::clone(core), name, bytemuck::cast_slice(&quad_vertices))?;
        let indices = index_buffer(Arc::clone(core), name, &quad_indices)?;

        let set = DescriptorSet::new(pool, &layouts.fragment)?;
        for frame in 0..MAX_FRAMES_IN_FLIGHT {
            set.write_image_sampler(frame, 0, &image)?;
        }

        Ok(Self {
            set,
            vertices,
            indices,
            image,
            index_count: quad_indices.len() as u32,
            name: name.to_string(),
        })
    }

    /// Blank (fully transparent) texture
    pub fn blank(
        core: &Arc<RenderCore>,
        width: u32,
        height: u32,
        name: &str,
        layouts: &GraphicsDescriptorLayouts,
        pool: Arc<DescriptorPool>,
    ) -> VulkanResult<Self> {
        let pixels = vec![0u8; rgba_len(width, height)];
        Self::new(core, width, height, &pixels, name, layouts, pool)
    }

    fn upload(core: &Arc<RenderCore>, image: &mut Image, pixels: &[u8], name: &str) -> VulkanResult<()> {
        let expected = rgba_len(image.width(), image.height());
        if pixels.len() != expected {
            return Err(VulkanError::invalid(format!(
                "texture '{}' expects {} bytes of RGBA data, got {}",
                name,
                expected,
                pixels.len()
            )));
        }
        let staging = Buffer::new(
            Arc::clone(core),
            BufferKind::Mutable,
            expected as vk::DeviceSize,
            vk::BufferUsageFlags::TRANSFER_SRC,
            &format!("{}_staging", name),
            Some(pixels),
        )?;
        image.copy_from_buffer(&staging)
    }

    /// Replace the texels; refused while a pending frame still draws the texture
    pub fn update(&mut self, pixels: &[u8]) -> VulkanResult<()> {
        if self.is_in_flight() {
            return Err(VulkanError::invalid(format!(
                "texture '{}' is still drawn by a frame in flight",
                self.name
            )));
        }
        let core = Arc::clone(self.vertices.core());
        Self::upload(&core, &mut self.image, pixels, &self.name)
    }

    /// Record a draw with the top-left corner at `(x, y)` pixels
    pub fn record_draw(&self, cmd: &mut CommandBuffer, layout: vk::PipelineLayout, frame: usize, x: i32, y: i32) {
        cmd.bind_descriptor_set(layout, 1, self.set.handle(frame));
        cmd.push_vertex_constants(layout, bytemuck::bytes_of(&DrawOffset::new(x, y)));
        cmd.bind_vertex_buffer(&self.vertices);
        cmd.bind_index_buffer(&self.indices);
        cmd.draw_indexed(self.index_count);
    }

    /// Whether a pending frame still references the quad
    pub fn is_in_flight(&self) -> bool {
        self.vertices.is_in_flight() || self.indices.is_in_flight()
    }

    /// Width in pixels
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    /// Height in pixels
    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Name given at creation
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Backing image
    pub fn image(&self) -> &Image {
        &self.image
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rgba_length() {
        assert_eq!(rgba_len(400, 400), 640_000);
        assert_eq!(rgba_len(0, 10), 0);
    }
}
