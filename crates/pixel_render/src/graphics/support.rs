//! Per-window drawing state
//!
//! Draw requests accumulate between frames and are replayed by
//! [`GraphicsSupport::render`]: textures in request order, then the pixel layer
//! on top.

use slotmap::SlotMap;
use std::sync::Arc;

use crate::config::RendererConfig;
use crate::foundation::{report, Severity};
use crate::render::vulkan::core::{DescriptorPool, GraphicsDescriptorLayouts, RenderCore, VulkanResult};
use crate::render::vulkan::{RenderTarget, Renderer};

use super::pixel_put::PixelPutPipeline;
use super::texture::{Texture, TextureId};

/// One texture placement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureDraw {
    /// Texture to draw
    pub texture: TextureId,
    /// Left edge in pixels
    pub x: i32,
    /// Top edge in pixels
    pub y: i32,
}

/// Ordered set of texture placements; the same placement is kept once
#[derive(Debug, Clone, Default)]
pub struct DrawList {
    draws: Vec<TextureDraw>,
}

impl DrawList {
    /// Empty list
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a placement unless it is already queued
    pub fn push(&mut self, draw: TextureDraw) -> bool {
        if self.draws.contains(&draw) {
            return false;
        }
        self.draws.push(draw);
        true
    }

    /// Drop every placement of `texture`
    pub fn remove_texture(&mut self, texture: TextureId) {
        self.draws.retain(|draw| draw.texture != texture);
    }

    /// Forget all placements
    pub fn clear(&mut self) {
        self.draws.clear();
    }

    /// Placements in draw order
    pub fn iter(&self) -> impl Iterator<Item = &TextureDraw> {
        self.draws.iter()
    }

    /// Number of placements
    pub fn len(&self) -> usize {
        self.draws.len()
    }

    /// Whether nothing is queued
    pub fn is_empty(&self) -> bool {
        self.draws.is_empty()
    }
}

/// Renderer, pixel layer and queued texture draws of one window
pub struct GraphicsSupport {
    pixel_put: PixelPutPipeline,
    draws: DrawList,
    renderer: Renderer,
}

impl GraphicsSupport {
    /// Set up rendering for `target`; the pixel layer covers its initial extent
    pub fn new(
        core: &Arc<RenderCore>,
        target: RenderTarget<'_>,
        config: &RendererConfig,
        layouts: &Arc<GraphicsDescriptorLayouts>,
        pool: &Arc<DescriptorPool>,
    ) -> VulkanResult<Self> {
        let renderer = Renderer::new(Arc::clone(core), target, config, Arc::clone(layouts), Arc::clone(pool))?;
        let extent = renderer.extent();
        let pixel_put = PixelPutPipeline::new(core, extent.width, extent.height, layouts, pool)?;

        Ok(Self {
            pixel_put,
            draws: DrawList::new(),
            renderer,
        })
    }

    /// Set one pixel of the pixel layer
    pub fn pixel_put(&mut self, x: i32, y: i32, color: u32) {
        self.pixel_put.set_pixel(x, y, color);
    }

    /// Queue `texture` at `(x, y)`
    pub fn texture_put(&mut self, texture: TextureId, x: i32, y: i32) {
        self.draws.push(TextureDraw { texture, x, y });
    }

    /// Forget queued textures and clear the pixel layer
    pub fn clear(&mut self) {
        self.draws.clear();
        self.pixel_put.clear();
    }

    /// Forget placements of a texture that is going away
    pub fn forget_texture(&mut self, texture: TextureId) {
        self.draws.remove_texture(texture);
    }

    /// Draw one frame; a skipped frame is not an error
    ///
    /// A drawing error still closes the frame before it is returned.
    pub fn render(&mut self, textures: &SlotMap<TextureId, Texture>) -> VulkanResult<()> {
        if !self.renderer.begin_frame()? {
            return Ok(());
        }
        if let Err(e) = self.record_draws(textures) {
            self.renderer.abort_frame()?;
            return Err(e);
        }
        self.renderer.end_frame()
    }

    fn record_draws(&mut self, textures: &SlotMap<TextureId, Texture>) -> VulkanResult<()> {
        if let Some(layout) = self.renderer.pipeline_layout() {
            let frame = self.renderer.frame_index();
            for draw in self.draws.iter() {
                match textures.get(draw.texture) {
                    Some(texture) => texture.record_draw(self.renderer.command_buffer(), layout, frame, draw.x, draw.y),
                    None => report(
                        Severity::Warning,
                        format_args!("texture_put: invalid texture {:?}, skipped", draw.texture),
                    ),
                }
            }
        }
        self.pixel_put.record(&mut self.renderer)
    }

    /// Queued texture placements
    pub fn draws(&self) -> &DrawList {
        &self.draws
    }

    /// Pixel layer
    pub fn pixel_layer(&self) -> &PixelPutPipeline {
        &self.pixel_put
    }

    /// Underlying renderer
    pub fn renderer(&self) -> &Renderer {
        &self.renderer
    }

    /// Underlying renderer, mutably
    pub fn renderer_mut(&mut self) -> &mut Renderer {
        &mut self.renderer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(count: usize) -> Vec<TextureId> {
        let mut map: SlotMap<TextureId, ()> = SlotMap::with_key();
        (0..count).map(|_| map.insert(())).collect()
    }

    #[test]
    fn draw_list_keeps_order_and_dedups() {
        let ids = ids(2);
        let mut list = DrawList::new();

        assert!(list.push(TextureDraw { texture: ids[1], x: 0, y: 0 }));
        assert!(list.push(TextureDraw { texture: ids[0], x: 5, y: 5 }));
        assert!(!list.push(TextureDraw { texture: ids[1], x: 0, y: 0 }));
        assert!(list.push(TextureDraw { texture: ids[1], x: 1, y: 0 }));

        let order: Vec<_> = list.iter().map(|d| (d.texture, d.x)).collect();
        assert_eq!(order, vec![(ids[1], 0), (ids[0], 5), (ids[1], 1)]);
    }

    #[test]
    fn removing_a_texture_drops_all_its_placements() {
        let ids = ids(2);
        let mut list = DrawList::new();
        list.push(TextureDraw { texture: ids[0], x: 0, y: 0 });
        list.push(TextureDraw { texture: ids[1], x: 0, y: 0 });
        list.push(TextureDraw { texture: ids[0], x: 9, y: 9 });

        list.remove_texture(ids[0]);
        assert_eq!(list.len(), 1);
        list.clear();
        assert!(list.is_empty());
    }
}
