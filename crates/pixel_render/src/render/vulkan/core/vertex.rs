//! Vertex format and shader-visible data of the 2D pipeline

use ash::vk;
use bytemuck::{Pod, Zeroable};
use nalgebra::{Matrix4, Vector4};
use std::mem::{offset_of, size_of};

/// 2D vertex: position in pixels, tint color, texture coordinate
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    /// Position in window pixels, origin at the top-left corner
    pub pos: [f32; 2],
    /// RGBA tint multiplied with the sampled texel
    pub color: [f32; 4],
    /// Texture coordinate
    pub uv: [f32; 2],
}

impl Vertex {
    /// Vertex with a white tint
    pub const fn new(pos: [f32; 2], uv: [f32; 2]) -> Self {
        Self {
            pos,
            color: [1.0; 4],
            uv,
        }
    }

    /// Vertex input binding 0, advanced per vertex
    pub fn binding_description() -> vk::VertexInputBindingDescription {
        vk::VertexInputBindingDescription {
            binding: 0,
            stride: size_of::<Self>() as u32,
            input_rate: vk::VertexInputRate::VERTEX,
        }
    }

    /// Locations 0 (pos), 1 (color) and 2 (uv)
    pub fn attribute_descriptions() -> [vk::VertexInputAttributeDescription; 3] {
        [
            vk::VertexInputAttributeDescription {
                binding: 0,
                location: 0,
                format: vk::Format::R32G32_SFLOAT,
                offset: offset_of!(Self, pos) as u32,
            },
            vk::VertexInputAttributeDescription {
                binding: 0,
                location: 1,
                format: vk::Format::R32G32B32A32_SFLOAT,
                offset: offset_of!(Self, color) as u32,
            },
            vk::VertexInputAttributeDescription {
                binding: 0,
                location: 2,
                format: vk::Format::R32G32_SFLOAT,
                offset: offset_of!(Self, uv) as u32,
            },
        ]
    }
}

/// Axis-aligned quad covering `width` x `height` pixels from the origin
pub fn quad(width: f32, height: f32) -> ([Vertex; 4], [u16; 6]) {
    (
        [
            Vertex::new([0.0, 0.0], [0.0, 0.0]),
            Vertex::new([width, 0.0], [1.0, 0.0]),
            Vertex::new([width, height], [1.0, 1.0]),
            Vertex::new([0.0, height], [0.0, 1.0]),
        ],
        [0, 1, 2, 2, 3, 0],
    )
}

/// Orthographic projection bound at set 0, binding 0
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct ProjectionUniform {
    /// Column-major matrix
    pub projection: [[f32; 4]; 4],
}

impl ProjectionUniform {
    /// Map window pixels to clip space, `(0, 0)` at the top-left corner
    pub fn orthographic(width: u32, height: u32) -> Self {
        let matrix = Matrix4::new_orthographic(0.0, width.max(1) as f32, 0.0, height.max(1) as f32, -1.0, 1.0);
        Self {
            projection: matrix.into(),
        }
    }

    /// Apply the projection to a pixel position
    pub fn project(&self, x: f32, y: f32) -> [f32; 2] {
        let matrix = Matrix4::from(self.projection);
        let clip = matrix * Vector4::new(x, y, 0.0, 1.0);
        [clip.x / clip.w, clip.y / clip.w]
    }
}

/// Per-draw offset pushed to the vertex stage
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct DrawOffset {
    /// Translation in pixels
    pub offset: [f32; 2],
}

impl DrawOffset {
    /// Size of the push-constant range
    pub const SIZE: u32 = size_of::<Self>() as u32;

    /// Offset by `(x, y)` pixels
    pub fn new(x: i32, y: i32) -> Self {
        Self {
            offset: [x as f32, y as f32],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn vertex_layout_is_tightly_packed() {
        assert_eq!(size_of::<Vertex>(), 32);
        let attributes = Vertex::attribute_descriptions();
        assert_eq!(attributes[0].offset, 0);
        assert_eq!(attributes[1].offset, 8);
        assert_eq!(attributes[2].offset, 24);
        assert_eq!(Vertex::binding_description().stride, 32);
    }

    #[test]
    fn projection_maps_window_corners() {
        let projection = ProjectionUniform::orthographic(400, 300);

        let top_left = projection.project(0.0, 0.0);
        assert_relative_eq!(top_left[0], -1.0);
        assert_relative_eq!(top_left[1], -1.0);

        let bottom_right = projection.project(400.0, 300.0);
        assert_relative_eq!(bottom_right[0], 1.0);
        assert_relative_eq!(bottom_right[1], 1.0);

        let center = projection.project(200.0, 150.0);
        assert_relative_eq!(center[0], 0.0);
        assert_relative_eq!(center[1], 0.0);
    }

    #[test]
    fn zero_extent_does_not_produce_nan() {
        let projection = ProjectionUniform::orthographic(0, 0);
        assert!(projection.projection.iter().flatten().all(|v| v.is_finite()));
    }

    #[test]
    fn push_constant_is_two_floats() {
        assert_eq!(DrawOffset::SIZE, 8);
        assert_eq!(DrawOffset::new(3, -4).offset, [3.0, -4.0]);
    }

    #[test]
    fn quad_covers_extent() {
        let (vertices, indices) = quad(16.0, 8.0);
        assert_eq!(vertices[2].pos, [16.0, 8.0]);
        assert_eq!(vertices[2].uv, [1.0, 1.0]);
        assert_eq!(indices.len(), 6);
    }
}
