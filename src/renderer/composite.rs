// src/renderer/composite.rs

//! Screen-space composite: binding the G-buffer for a lighting shader and
//! computing the texture coordinates of the full-screen quad.

use crate::renderer::backend::{RenderBackend, RowOrder};
use crate::renderer::deferred::bind_composite_texture;
use crate::renderer::gbuffer::GBuffer;

/// Texture units the composite shader samples from. Unit 0 is left to the
/// host's own draw texture.
pub const COMPOSITE_COLOR_SLOT: u32 = 1;
pub const COMPOSITE_NORMAL_SLOT: u32 = 2;
pub const COMPOSITE_POSITION_SLOT: u32 = 3;

pub fn bind_gbuffer_for_composite<B: RenderBackend + ?Sized>(backend: &mut B, gbuffer: &GBuffer) {
    bind_composite_texture(backend, gbuffer.color().texture, COMPOSITE_COLOR_SLOT);
    bind_composite_texture(backend, gbuffer.normal().texture, COMPOSITE_NORMAL_SLOT);
    bind_composite_texture(backend, gbuffer.position().texture, COMPOSITE_POSITION_SLOT);
}

/// Source rectangle in texels. A negative width or height mirrors the
/// sampled region along that axis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SourceRect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl SourceRect {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn full(width: u32, height: u32) -> Self {
        Self::new(0.0, 0.0, width as f32, height as f32)
    }

    /// Whole G-buffer with a negative height, undoing bottom-up row order.
    pub fn flipped(gbuffer: &GBuffer) -> Self {
        let (width, height) = gbuffer.size();
        Self::new(0.0, 0.0, width as f32, -(height as f32))
    }

    /// The rectangle that shows `gbuffer` upright for a backend with the
    /// given row order.
    pub fn for_gbuffer(gbuffer: &GBuffer, row_order: RowOrder) -> Self {
        match row_order {
            RowOrder::BottomUp => Self::flipped(gbuffer),
            RowOrder::TopDown => {
                let (width, height) = gbuffer.size();
                Self::full(width, height)
            }
        }
    }

    /// Texture coordinates for the quad corners top-left, bottom-left,
    /// bottom-right, top-right, for a `texture_width` x `texture_height`
    /// texture.
    pub fn quad_uvs(&self, texture_width: f32, texture_height: f32) -> [[f32; 2]; 4] {
        let mut y = self.y;
        let flip_x = self.width < 0.0;
        let width = self.width.abs();
        if self.height < 0.0 {
            y -= self.height;
        }

        let u0 = self.x / texture_width;
        let u1 = (self.x + width) / texture_width;
        let v0 = y / texture_height;
        let v1 = (y + self.height) / texture_height;
        let (left, right) = if flip_x { (u1, u0) } else { (u0, u1) };

        [[left, v0], [left, v1], [right, v1], [right, v0]]
    }
}
