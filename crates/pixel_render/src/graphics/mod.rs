//! Drawing layer: textures, the pixel layer and per-window draw state

pub mod pixel_put;
pub mod support;
pub mod texture;

pub use pixel_put::{pack_pixel, PixelCanvas, PixelPutPipeline};
pub use support::{DrawList, GraphicsSupport, TextureDraw};
pub use texture::{Texture, TextureId};
