//! Descriptor set layouts, pools and per-frame descriptor sets
//!
//! The 2D pipeline uses two sets: set 0 holds the projection uniform for the
//! vertex stage, set 1 holds the sampled texture for the fragment stage. Every
//! [`DescriptorSet`] owns one native set per frame in flight so a frame can be
//! rewritten while the previous ones are still executing.

use ash::{vk, Device};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use super::buffer::Buffer;
use super::context::{VulkanError, VulkanResult};
use super::image::Image;
use super::render_core::RenderCore;
use crate::config::MAX_FRAMES_IN_FLIGHT;

/// Builder for [`DescriptorSetLayout`]
#[derive(Default)]
pub struct DescriptorSetLayoutBuilder {
    bindings: Vec<vk::DescriptorSetLayoutBinding>,
}

impl DescriptorSetLayoutBuilder {
    /// Empty layout
    pub fn new() -> Self {
        Self::default()
    }

    fn add(mut self, binding: u32, ty: vk::DescriptorType, stage_flags: vk::ShaderStageFlags) -> Self {
        self.bindings.push(
            vk::DescriptorSetLayoutBinding::builder()
                .binding(binding)
                .descriptor_type(ty)
                .descriptor_count(1)
                .stage_flags(stage_flags)
                .build(),
        );
        self
    }

    /// Add a uniform buffer binding
    pub fn add_uniform_buffer(self, binding: u32, stage_flags: vk::ShaderStageFlags) -> Self {
        self.add(binding, vk::DescriptorType::UNIFORM_BUFFER, stage_flags)
    }

    /// Add a combined image sampler binding
    pub fn add_combined_image_sampler(self, binding: u32, stage_flags: vk::ShaderStageFlags) -> Self {
        self.add(binding, vk::DescriptorType::COMBINED_IMAGE_SAMPLER, stage_flags)
    }

    /// Bindings added so far
    pub fn bindings(&self) -> &[vk::DescriptorSetLayoutBinding] {
        &self.bindings
    }

    /// Create the layout
    pub fn build(self, device: &Device) -> VulkanResult<DescriptorSetLayout> {
        let layout_info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(&self.bindings);

        let layout = unsafe { device.create_descriptor_set_layout(&layout_info, None) }
            .map_err(VulkanError::Api)?;

        Ok(DescriptorSetLayout {
            layout,
            device: device.clone(),
            bindings: self.bindings,
        })
    }
}

/// Descriptor set layout with RAII cleanup
pub struct DescriptorSetLayout {
    layout: vk::DescriptorSetLayout,
    device: Device,
    bindings: Vec<vk::DescriptorSetLayoutBinding>,
}

impl DescriptorSetLayout {
    /// Native handle
    pub fn handle(&self) -> vk::DescriptorSetLayout {
        self.layout
    }

    /// Bindings of this layout
    pub fn bindings(&self) -> &[vk::DescriptorSetLayoutBinding] {
        &self.bindings
    }

    /// Descriptor type declared at `binding`
    pub fn descriptor_type(&self, binding: u32) -> Option<vk::DescriptorType> {
        self.bindings
            .iter()
            .find(|b| b.binding == binding)
            .map(|b| b.descriptor_type)
    }
}

impl Drop for DescriptorSetLayout {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_descriptor_set_layout(self.layout, None);
        }
    }
}

/// The two layouts used by the 2D pipeline
pub struct GraphicsDescriptorLayouts {
    /// Set 0: projection uniform, vertex stage
    pub vertex: DescriptorSetLayout,
    /// Set 1: texture sampler, fragment stage
    pub fragment: DescriptorSetLayout,
    _core: Arc<RenderCore>,
}

impl GraphicsDescriptorLayouts {
    /// Create both layouts; they keep `core` alive until dropped
    pub fn new(core: &Arc<RenderCore>) -> VulkanResult<Arc<Self>> {
        let vertex = DescriptorSetLayoutBuilder::new()
            .add_uniform_buffer(0, vk::ShaderStageFlags::VERTEX)
            .build(core.device())?;
        let fragment = DescriptorSetLayoutBuilder::new()
            .add_combined_image_sampler(0, vk::ShaderStageFlags::FRAGMENT)
            .build(core.device())?;
        Ok(Arc::new(Self {
            vertex,
            fragment,
            _core: Arc::clone(core),
        }))
    }

    /// Handles in set-index order
    pub fn handles(&self) -> [vk::DescriptorSetLayout; 2] {
        [self.vertex.handle(), self.fragment.handle()]
    }
}

/// Pool that individual sets can be returned to
pub struct DescriptorPool {
    pool: vk::DescriptorPool,
    core: Arc<RenderCore>,
    max_sets: u32,
    allocated: AtomicU32,
}

impl DescriptorPool {
    /// Pool for up to `max_sets` sets of uniform buffers and image samplers
    pub fn new(core: &Arc<RenderCore>, max_sets: u32) -> VulkanResult<Arc<Self>> {
        let pool_sizes = [
            vk::DescriptorPoolSize::builder()
                .ty(vk::DescriptorType::UNIFORM_BUFFER)
                .descriptor_count(max_sets)
                .build(),
            vk::DescriptorPoolSize::builder()
                .ty(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                .descriptor_count(max_sets)
                .build(),
        ];

        let pool_info = vk::DescriptorPoolCreateInfo::builder()
            .flags(vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET)
            .max_sets(max_sets)
            .pool_sizes(&pool_sizes);

        let pool = unsafe { core.device().create_descriptor_pool(&pool_info, None) }
            .map_err(VulkanError::Api)?;

        Ok(Arc::new(Self {
            pool,
            core: Arc::clone(core),
            max_sets,
            allocated: AtomicU32::new(0),
        }))
    }

    /// Allocate `count` sets with `layout`
    pub fn allocate(&self, layout: vk::DescriptorSetLayout, count: usize) -> VulkanResult<Vec<vk::DescriptorSet>> {
        let layouts = vec![layout; count];
        let alloc_info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(self.pool)
            .set_layouts(&layouts);

        let sets = unsafe { self.core.device().allocate_descriptor_sets(&alloc_info) }
            .map_err(VulkanError::Api)?;
        self.allocated.fetch_add(sets.len() as u32, Ordering::Relaxed);
        Ok(sets)
    }

    /// Return sets to the pool
    pub fn free(&self, sets: &[vk::DescriptorSet]) {
        if sets.is_empty() {
            return;
        }
        match unsafe { self.core.device().free_descriptor_sets(self.pool, sets) } {
            Ok(()) => {
                self.allocated.fetch_sub(sets.len() as u32, Ordering::Relaxed);
            }
            Err(e) => log::warn!("Failed to free {} descriptor sets: {:?}", sets.len(), e),
        }
    }

    /// Sets currently allocated from this pool
    pub fn allocated_sets(&self) -> u32 {
        self.allocated.load(Ordering::Relaxed)
    }

    /// Capacity in sets
    pub fn max_sets(&self) -> u32 {
        self.max_sets
    }

    /// Native handle
    pub fn handle(&self) -> vk::DescriptorPool {
        self.pool
    }
}

impl Drop for DescriptorPool {
    fn drop(&mut self) {
        let leaked = self.allocated_sets();
        if leaked > 0 {
            log::debug!("Destroying descriptor pool with {} sets still allocated", leaked);
        }
        unsafe {
            self.core.device().destroy_descriptor_pool(self.pool, None);
        }
    }
}

/// One native descriptor set per frame in flight, sharing a layout
pub struct DescriptorSet {
    pool: Arc<DescriptorPool>,
    sets: Vec<vk::DescriptorSet>,
    layout: vk::DescriptorSetLayout,
}

impl DescriptorSet {
    /// Allocate [`MAX_FRAMES_IN_FLIGHT`] sets from `pool`
    pub fn new(pool: Arc<DescriptorPool>, layout: &DescriptorSetLayout) -> VulkanResult<Self> {
        let sets = pool.allocate(layout.handle(), MAX_FRAMES_IN_FLIGHT)?;
        Ok(Self {
            pool,
            sets,
            layout: layout.handle(),
        })
    }

    fn set(&self, frame: usize) -> VulkanResult<vk::DescriptorSet> {
        self.sets
            .get(frame)
            .copied()
            .ok_or_else(|| VulkanError::invalid(format!("frame index {} out of range", frame)))
    }

    /// Point `binding` of the set for `frame` at a uniform buffer
    pub fn write_uniform(&self, frame: usize, binding: u32, buffer: &Buffer) -> VulkanResult<()> {
        let buffer_info = [vk::DescriptorBufferInfo {
            buffer: buffer.handle(),
            offset: buffer.offset(),
            range: buffer.size(),
        }];
        let write = vk::WriteDescriptorSet::builder()
            .dst_set(self.set(frame)?)
            .dst_binding(binding)
            .dst_array_element(0)
            .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
            .buffer_info(&buffer_info);

        unsafe { self.pool.core.device().update_descriptor_sets(&[write.build()], &[]) };
        Ok(())
    }

    /// Point `binding` of the set for `frame` at an image and its sampler
    ///
    /// The image must have a view and a sampler and be in
    /// `SHADER_READ_ONLY_OPTIMAL` when the set is used.
    pub fn write_image_sampler(&self, frame: usize, binding: u32, image: &Image) -> VulkanResult<()> {
        if image.view() == vk::ImageView::null() || image.sampler() == vk::Sampler::null() {
            return Err(VulkanError::invalid("image has no view or sampler"));
        }
        let image_info = [vk::DescriptorImageInfo {
            sampler: image.sampler(),
            image_view: image.view(),
            image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        }];
        let write = vk::WriteDescriptorSet::builder()
            .dst_set(self.set(frame)?)
            .dst_binding(binding)
            .dst_array_element(0)
            .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
            .image_info(&image_info);

        unsafe { self.pool.core.device().update_descriptor_sets(&[write.build()], &[]) };
        Ok(())
    }

    /// Native set for `frame`
    pub fn handle(&self, frame: usize) -> vk::DescriptorSet {
        self.sets.get(frame).copied().unwrap_or_default()
    }

    /// Layout the sets were allocated with
    pub fn layout(&self) -> vk::DescriptorSetLayout {
        self.layout
    }
}

impl Drop for DescriptorSet {
    fn drop(&mut self) {
        self.pool.free(&self.sets);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_collects_bindings() {
        let builder = DescriptorSetLayoutBuilder::new()
            .add_uniform_buffer(0, vk::ShaderStageFlags::VERTEX)
            .add_combined_image_sampler(1, vk::ShaderStageFlags::FRAGMENT);

        let bindings = builder.bindings();
        assert_eq!(bindings.len(), 2);
        assert_eq!(bindings[0].descriptor_type, vk::DescriptorType::UNIFORM_BUFFER);
        assert_eq!(bindings[0].stage_flags, vk::ShaderStageFlags::VERTEX);
        assert_eq!(bindings[1].binding, 1);
        assert_eq!(bindings[1].descriptor_type, vk::DescriptorType::COMBINED_IMAGE_SAMPLER);
        assert_eq!(bindings[1].descriptor_count, 1);
    }
}
