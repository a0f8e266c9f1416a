//! Per-pixel drawing
//!
//! Pixels are written into a host-side canvas. Each frame slot owns a canvas
//! texture that is re-uploaded only when the canvas changed since that slot
//! last drew, then the texture is drawn as one window-sized quad.

use std::sync::Arc;

use crate::config::MAX_FRAMES_IN_FLIGHT;
use crate::render::vulkan::core::{DescriptorPool, GraphicsDescriptorLayouts, RenderCore, VulkanResult};
use crate::render::vulkan::Renderer;

use super::texture::{rgba_len, Texture};

/// Convert `0xAARRGGBB` to RGBA bytes
///
/// The top byte is transparency: `0x00` is opaque, `0xFF` fully transparent.
pub fn pack_pixel(color: u32) -> [u8; 4] {
    let [transparency, r, g, b] = color.to_be_bytes();
    [r, g, b, 255 - transparency]
}

/// Host-side RGBA8 pixel grid
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelCanvas {
    width: u32,
    height: u32,
    pixels: Vec<[u8; 4]>,
    generation: u64,
}

impl PixelCanvas {
    /// Transparent canvas
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![[0; 4]; width as usize * height as usize],
            generation: 0,
        }
    }

    fn index(&self, x: i32, y: i32) -> Option<usize> {
        let x = u32::try_from(x).ok().filter(|&x| x < self.width)?;
        let y = u32::try_from(y).ok().filter(|&y| y < self.height)?;
        Some(y as usize * self.width as usize + x as usize)
    }

    /// Write one pixel; coordinates outside the canvas are ignored
    pub fn set_pixel(&mut self, x: i32, y: i32, color: u32) -> bool {
        let Some(index) = self.index(x, y) else {
            return false;
        };
        let packed = pack_pixel(color);
        if self.pixels[index] != packed {
            self.pixels[index] = packed;
            self.generation += 1;
        }
        true
    }

    /// RGBA value at `(x, y)`
    pub fn pixel(&self, x: i32, y: i32) -> Option<[u8; 4]> {
        self.index(x, y).map(|i| self.pixels[i])
    }

    /// Make every pixel transparent
    pub fn clear(&mut self) {
        if self.pixels.iter().any(|p| *p != [0; 4]) {
            self.pixels.fill([0; 4]);
            self.generation += 1;
        }
    }

    /// Counter bumped by every visible change
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Tightly packed RGBA rows
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.pixels)
    }

    /// Width in pixels
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Height in pixels
    pub fn height(&self) -> u32 {
        self.height
    }
}

/// Canvas plus one GPU texture per frame in flight
pub struct PixelPutPipeline {
    canvas: PixelCanvas,
    textures: Vec<Texture>,
    uploaded: Vec<Option<u64>>,
}

impl PixelPutPipeline {
    /// Canvas covering `width` x `height` pixels
    pub fn new(
        core: &Arc<RenderCore>,
        width: u32,
        height: u32,
        layouts: &GraphicsDescriptorLayouts,
        pool: &Arc<DescriptorPool>,
    ) -> VulkanResult<Self> {
        let canvas = PixelCanvas::new(width.max(1), height.max(1));
        let textures = (0..MAX_FRAMES_IN_FLIGHT)
            .map(|frame| {
                Texture::blank(
                    core,
                    canvas.width(),
                    canvas.height(),
                    &format!("pixel_canvas_{}", frame),
                    layouts,
                    Arc::clone(pool),
                )
            })
            .collect::<VulkanResult<Vec<_>>>()?;
        debug_assert_eq!(canvas.as_bytes().len(), rgba_len(canvas.width(), canvas.height()));

        Ok(Self {
            canvas,
            textures,
            uploaded: vec![Some(0); MAX_FRAMES_IN_FLIGHT],
        })
    }

    /// Write one pixel
    pub fn set_pixel(&mut self, x: i32, y: i32, color: u32) {
        self.canvas.set_pixel(x, y, color);
    }

    /// Clear the canvas
    pub fn clear(&mut self) {
        self.canvas.clear();
    }

    /// Host-side canvas
    pub fn canvas(&self) -> &PixelCanvas {
        &self.canvas
    }

    /// Upload the canvas if stale for this frame slot and record its draw
    pub fn record(&mut self, renderer: &mut Renderer) -> VulkanResult<()> {
        let frame = renderer.frame_index();
        let Some(layout) = renderer.pipeline_layout() else {
            return Ok(());
        };
        let generation = self.canvas.generation();
        let texture = &mut self.textures[frame];

        if self.uploaded[frame] != Some(generation) {
            texture.update(self.canvas.as_bytes())?;
            self.uploaded[frame] = Some(generation);
        }
        texture.record_draw(renderer.command_buffer(), layout, frame, 0, 0);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packs_argb_with_inverted_alpha() {
        assert_eq!(pack_pixel(0x00FF_0000), [0xFF, 0, 0, 0xFF]);
        assert_eq!(pack_pixel(0x0012_3456), [0x12, 0x34, 0x56, 0xFF]);
        assert_eq!(pack_pixel(0xFF00_FF00), [0, 0xFF, 0, 0]);
        assert_eq!(pack_pixel(0x8000_0000)[3], 0x7F);
    }

    #[test]
    fn set_pixel_in_bounds() {
        let mut canvas = PixelCanvas::new(4, 3);
        assert!(canvas.set_pixel(3, 2, 0x0000_00FF));
        assert_eq!(canvas.pixel(3, 2), Some([0, 0, 0xFF, 0xFF]));
        assert_eq!(canvas.as_bytes()[(2 * 4 + 3) * 4..][..4], [0, 0, 0xFF, 0xFF]);
    }

    #[test]
    fn out_of_bounds_is_ignored() {
        let mut canvas = PixelCanvas::new(4, 3);
        assert!(!canvas.set_pixel(-1, 0, 0xFFFFFF));
        assert!(!canvas.set_pixel(4, 0, 0xFFFFFF));
        assert!(!canvas.set_pixel(0, 3, 0xFFFFFF));
        assert_eq!(canvas.generation(), 0);
        assert_eq!(canvas.pixel(4, 0), None);
    }

    #[test]
    fn generation_tracks_visible_changes() {
        let mut canvas = PixelCanvas::new(2, 2);
        canvas.set_pixel(0, 0, 0xFF0000);
        assert_eq!(canvas.generation(), 1);
        // Same color again changes nothing
        canvas.set_pixel(0, 0, 0xFF0000);
        assert_eq!(canvas.generation(), 1);

        canvas.clear();
        assert_eq!(canvas.generation(), 2);
        assert_eq!(canvas.pixel(0, 0), Some([0; 4]));
        canvas.clear();
        assert_eq!(canvas.generation(), 2);
    }
}
