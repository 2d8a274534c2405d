// src/renderer/gbuffer.rs

//! Geometry buffer: one framebuffer with position, normal and color targets
//! plus depth, filled by the deferred pass and sampled by the composite.

use log::{debug, info, warn};

use crate::renderer::backend::{
    AttachmentDescriptor, AttachmentFormat, AttachmentPoint, FilterMode, FramebufferId,
    FramebufferStatus, RenderBackend, TextureId, WrapMode,
};
use crate::settings::FailurePolicy;

pub const POSITION_SLOT: u32 = 0;
pub const NORMAL_SLOT: u32 = 1;
pub const COLOR_SLOT: u32 = 2;

/// Color slots receiving fragment output, in shader location order.
pub const DRAW_BUFFERS: [u32; 3] = [POSITION_SLOT, NORMAL_SLOT, COLOR_SLOT];

/// Formats of the color targets, indexed like [`DRAW_BUFFERS`].
pub const COLOR_FORMATS: [AttachmentFormat; 3] = [
    AttachmentFormat::Rgb16Float,
    AttachmentFormat::Rgb16Float,
    AttachmentFormat::Rgba8Unorm,
];
pub const DEPTH_FORMAT: AttachmentFormat = AttachmentFormat::Depth24;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum GBufferError {
    #[error("invalid G-buffer size {width}x{height}")]
    InvalidSize { width: u32, height: u32 },
    #[error("G-buffer is incomplete: {0}")]
    Incomplete(FramebufferStatus),
}

/// A texture attached to the G-buffer together with how it was allocated.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Attachment {
    pub texture: TextureId,
    pub point: AttachmentPoint,
    pub width: u32,
    pub height: u32,
    pub format: AttachmentFormat,
    pub filter: FilterMode,
    pub wrap: WrapMode,
    pub mip_levels: u32,
}

/// Not `Clone`: the G-buffer exclusively owns its GPU objects and
/// [`GBuffer::destroy`] consumes it.
#[derive(Debug)]
pub struct GBuffer {
    framebuffer: FramebufferId,
    width: u32,
    height: u32,
    position: Attachment,
    normal: Attachment,
    color: Attachment,
    depth: Attachment,
    status: FramebufferStatus,
}

impl GBuffer {
    /// Allocates the G-buffer. An incomplete framebuffer is logged and the
    /// G-buffer is returned anyway; check [`GBuffer::status`] if it matters.
    pub fn create<B: RenderBackend + ?Sized>(backend: &mut B, width: u32, height: u32) -> Self {
        let gbuffer = Self::allocate(backend, width, height);
        if gbuffer.is_complete() {
            info!("GBuffer {}x{} created", width, height);
        } else {
            warn!(
                "GBuffer {}x{}: framebuffer object could not be created: {}",
                width, height, gbuffer.status
            );
        }
        gbuffer
    }

    /// Like [`GBuffer::create`] but fails on a zero size or an incomplete
    /// framebuffer, releasing anything already allocated.
    pub fn try_create<B: RenderBackend + ?Sized>(
        backend: &mut B,
        width: u32,
        height: u32,
    ) -> Result<Self, GBufferError> {
        if width == 0 || height == 0 {
            return Err(GBufferError::InvalidSize { width, height });
        }
        let gbuffer = Self::allocate(backend, width, height);
        if !gbuffer.is_complete() {
            let status = gbuffer.status;
            gbuffer.destroy(backend);
            return Err(GBufferError::Incomplete(status));
        }
        info!("GBuffer {}x{} created", width, height);
        Ok(gbuffer)
    }

    /// Creates under the given failure policy.
    pub fn create_with_policy<B: RenderBackend + ?Sized>(
        backend: &mut B,
        width: u32,
        height: u32,
        policy: FailurePolicy,
    ) -> Result<Self, GBufferError> {
        match policy {
            FailurePolicy::Degrade => Ok(Self::create(backend, width, height)),
            FailurePolicy::Strict => Self::try_create(backend, width, height),
        }
    }

    fn allocate<B: RenderBackend + ?Sized>(backend: &mut B, width: u32, height: u32) -> Self {
        let framebuffer = backend.create_framebuffer();
        backend.bind_framebuffer(Some(framebuffer));

        let mut attach = |label: &str, point: AttachmentPoint, format: AttachmentFormat, wrap: WrapMode| {
            let desc = AttachmentDescriptor {
                label: Some(label),
                width,
                height,
                format,
                filter: FilterMode::Nearest,
                wrap,
                mip_levels: 1,
            };
            let texture = backend.create_attachment(&desc);
            backend.attach(framebuffer, point, texture);
            Attachment {
                texture,
                point,
                width,
                height,
                format,
                filter: desc.filter,
                wrap,
                mip_levels: desc.mip_levels,
            }
        };

        let position = attach(
            "GBuffer Position",
            AttachmentPoint::Color(POSITION_SLOT),
            COLOR_FORMATS[0],
            WrapMode::Repeat,
        );
        let normal = attach(
            "GBuffer Normal",
            AttachmentPoint::Color(NORMAL_SLOT),
            COLOR_FORMATS[1],
            WrapMode::Repeat,
        );
        let color = attach(
            "GBuffer Color",
            AttachmentPoint::Color(COLOR_SLOT),
            COLOR_FORMATS[2],
            WrapMode::Repeat,
        );
        let depth = attach(
            "GBuffer Depth",
            AttachmentPoint::Depth,
            DEPTH_FORMAT,
            WrapMode::ClampToEdge,
        );

        backend.set_draw_buffers(framebuffer, &DRAW_BUFFERS);
        let status = backend.framebuffer_status(framebuffer);
        backend.bind_framebuffer(None);

        Self {
            framebuffer,
            width,
            height,
            position,
            normal,
            color,
            depth,
            status,
        }
    }

    /// Releases the framebuffer and all four attachments.
    pub fn destroy<B: RenderBackend + ?Sized>(self, backend: &mut B) {
        if backend.render_state().framebuffer == Some(self.framebuffer) {
            backend.bind_framebuffer(None);
        }
        backend.delete_framebuffer(self.framebuffer);
        for attachment in self.attachments() {
            backend.delete_texture(attachment.texture);
        }
        debug!("GBuffer {}x{} destroyed", self.width, self.height);
    }

    /// Destroys and re-creates at a new size; there is no in-place resize.
    pub fn recreate<B: RenderBackend + ?Sized>(self, backend: &mut B, width: u32, height: u32) -> Self {
        self.destroy(backend);
        Self::create(backend, width, height)
    }

    pub fn framebuffer(&self) -> FramebufferId {
        self.framebuffer
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn position(&self) -> &Attachment {
        &self.position
    }

    pub fn normal(&self) -> &Attachment {
        &self.normal
    }

    pub fn color(&self) -> &Attachment {
        &self.color
    }

    pub fn depth(&self) -> &Attachment {
        &self.depth
    }

    /// Position, normal, color, depth.
    pub fn attachments(&self) -> [&Attachment; 4] {
        [&self.position, &self.normal, &self.color, &self.depth]
    }

    pub fn status(&self) -> FramebufferStatus {
        self.status
    }

    pub fn is_complete(&self) -> bool {
        self.status.is_complete()
    }
}
