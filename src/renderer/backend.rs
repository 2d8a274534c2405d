// src/renderer/backend.rs

//! The seam between the deferred pipeline and whatever owns the GPU.
//!
//! `RenderBackend` merges two collaborators: the native graphics API
//! (framebuffers, attachments, texture slots, blend state) and the host
//! library's immediate-mode state (draw batch flushing, viewport and matrix
//! stacks, window size, texture loading). Everything in `gbuffer`,
//! `deferred` and `model` is written against this trait only.

use std::fmt;
use std::path::Path;

use glam::Mat4;

use crate::renderer::texture::TextureError;

/// Opaque handle of a GPU texture owned by a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureId(u32);

impl TextureId {
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }
}

/// Opaque handle of an offscreen framebuffer owned by a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FramebufferId(u32);

impl FramebufferId {
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }
}

/// Storage formats used by G-buffer attachments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttachmentFormat {
    /// 8-bit normalized RGBA.
    Rgba8Unorm,
    /// 16-bit float RGB. Backends without a three channel half format widen
    /// it to four channels.
    Rgb16Float,
    /// 24-bit depth.
    Depth24,
}

impl AttachmentFormat {
    pub fn is_depth(self) -> bool {
        matches!(self, Self::Depth24)
    }

    /// Bytes a single texel occupies in GPU memory once widened.
    pub fn bytes_per_texel(self) -> u32 {
        match self {
            Self::Rgba8Unorm => 4,
            Self::Rgb16Float => 8,
            Self::Depth24 => 4,
        }
    }

    pub fn to_wgpu(self) -> wgpu::TextureFormat {
        match self {
            Self::Rgba8Unorm => wgpu::TextureFormat::Rgba8Unorm,
            Self::Rgb16Float => wgpu::TextureFormat::Rgba16Float,
            Self::Depth24 => wgpu::TextureFormat::Depth24Plus,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FilterMode {
    #[default]
    Nearest,
    Linear,
}

impl FilterMode {
    pub fn to_wgpu(self) -> wgpu::FilterMode {
        match self {
            Self::Nearest => wgpu::FilterMode::Nearest,
            Self::Linear => wgpu::FilterMode::Linear,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum WrapMode {
    #[default]
    Repeat,
    ClampToEdge,
}

impl WrapMode {
    pub fn to_wgpu(self) -> wgpu::AddressMode {
        match self {
            Self::Repeat => wgpu::AddressMode::Repeat,
            Self::ClampToEdge => wgpu::AddressMode::ClampToEdge,
        }
    }
}

/// Everything a backend needs to allocate one render-target texture.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AttachmentDescriptor<'a> {
    pub label: Option<&'a str>,
    pub width: u32,
    pub height: u32,
    pub format: AttachmentFormat,
    pub filter: FilterMode,
    pub wrap: WrapMode,
    pub mip_levels: u32,
}

/// Where a texture is attached on a framebuffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AttachmentPoint {
    Color(u32),
    Depth,
}

/// Outcome of a framebuffer completeness check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FramebufferStatus {
    Complete,
    /// The combination of formats is not renderable on this device.
    Unsupported,
    /// An attachment has no storage or the wrong kind of format for its point.
    IncompleteAttachment,
    /// Attachments disagree on width or height.
    IncompleteDimensions,
    /// Nothing is attached, or a draw buffer names an empty color slot.
    IncompleteMissingAttachment,
}

impl FramebufferStatus {
    pub fn is_complete(self) -> bool {
        self == Self::Complete
    }
}

impl fmt::Display for FramebufferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            Self::Complete => "framebuffer complete",
            Self::Unsupported => "framebuffer is unsupported",
            Self::IncompleteAttachment => "framebuffer has an incomplete attachment",
            Self::IncompleteDimensions => "framebuffer attachments have different dimensions",
            Self::IncompleteMissingAttachment => "framebuffer has a missing attachment",
        };
        f.write_str(reason)
    }
}

/// What a backend knows about one attachment when checking completeness.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AttachmentInfo {
    pub point: AttachmentPoint,
    pub width: u32,
    pub height: u32,
    pub format: AttachmentFormat,
    pub renderable: bool,
}

/// Completeness rules shared by every backend.
///
/// Checks run in a fixed order so the reported reason is deterministic:
/// missing attachments, per-attachment storage, device support, draw buffer
/// coverage, then matching dimensions.
pub fn check_completeness(
    attachments: &[AttachmentInfo],
    draw_buffers: &[u32],
    max_color_attachments: u32,
) -> FramebufferStatus {
    let Some(first) = attachments.first() else {
        return FramebufferStatus::IncompleteMissingAttachment;
    };

    for attachment in attachments {
        if attachment.width == 0 || attachment.height == 0 {
            return FramebufferStatus::IncompleteAttachment;
        }
        let wrong_kind = match attachment.point {
            AttachmentPoint::Color(_) => attachment.format.is_depth(),
            AttachmentPoint::Depth => !attachment.format.is_depth(),
        };
        if wrong_kind {
            return FramebufferStatus::IncompleteAttachment;
        }
    }

    for attachment in attachments {
        if !attachment.renderable {
            return FramebufferStatus::Unsupported;
        }
        if let AttachmentPoint::Color(slot) = attachment.point {
            if slot >= max_color_attachments {
                return FramebufferStatus::Unsupported;
            }
        }
    }

    if draw_buffers.len() as u32 > max_color_attachments {
        return FramebufferStatus::Unsupported;
    }
    let covered = |slot: &u32| {
        attachments
            .iter()
            .any(|a| a.point == AttachmentPoint::Color(*slot))
    };
    if !draw_buffers.iter().all(covered) {
        return FramebufferStatus::IncompleteMissingAttachment;
    }

    let mismatched = attachments
        .iter()
        .any(|a| a.width != first.width || a.height != first.height);
    if mismatched {
        return FramebufferStatus::IncompleteDimensions;
    }

    FramebufferStatus::Complete
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Viewport {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Viewport {
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Viewport covering a whole `width` x `height` target.
    pub fn full(width: u32, height: u32) -> Self {
        Self::new(0, 0, width, height)
    }
}

/// Row order of render-target textures as seen by a sampler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowOrder {
    /// Row 0 is the bottom of the rendered image (OpenGL-style hosts).
    BottomUp,
    /// Row 0 is the top of the rendered image (wgpu, Vulkan, Metal, D3D).
    TopDown,
}

/// Top-left origin orthographic projection over a `width` x `height` screen,
/// depth range 0..1.
pub fn screen_ortho(width: u32, height: u32) -> Mat4 {
    Mat4::orthographic_rh_gl(0.0, width as f32, height as f32, 0.0, 0.0, 1.0)
}

/// Snapshot of the host state the deferred pass manipulates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderState {
    /// `None` is the default (window) target.
    pub framebuffer: Option<FramebufferId>,
    pub viewport: Viewport,
    pub blend_enabled: bool,
    pub projection: Mat4,
    pub modelview: Mat4,
    /// G-buffer whose deferred pass is open, if any.
    pub deferred_pass: Option<FramebufferId>,
}

impl RenderState {
    /// The state a host is in when drawing straight to its window.
    pub fn window_default(width: u32, height: u32) -> Self {
        Self {
            framebuffer: None,
            viewport: Viewport::full(width, height),
            blend_enabled: true,
            projection: screen_ortho(width, height),
            modelview: Mat4::IDENTITY,
            deferred_pass: None,
        }
    }
}

pub trait RenderBackend {
    // Native graphics API.

    fn create_framebuffer(&mut self) -> FramebufferId;
    fn delete_framebuffer(&mut self, framebuffer: FramebufferId);
    fn create_attachment(&mut self, desc: &AttachmentDescriptor<'_>) -> TextureId;
    fn attach(&mut self, framebuffer: FramebufferId, point: AttachmentPoint, texture: TextureId);
    /// Declares which color slots receive fragment output, in order.
    fn set_draw_buffers(&mut self, framebuffer: FramebufferId, slots: &[u32]);
    fn framebuffer_status(&self, framebuffer: FramebufferId) -> FramebufferStatus;
    /// `None` binds the default target.
    fn bind_framebuffer(&mut self, framebuffer: Option<FramebufferId>);
    /// Clears color and depth of the bound target.
    fn clear(&mut self);
    fn set_blend(&mut self, enabled: bool);
    /// Activates texture unit `slot` and binds `texture` to it.
    fn bind_texture(&mut self, slot: u32, texture: TextureId);
    fn delete_texture(&mut self, texture: TextureId);

    // Host library.

    /// Submits any batched draws recorded so far.
    fn flush(&mut self);
    fn set_viewport(&mut self, viewport: Viewport);
    fn set_projection(&mut self, projection: Mat4);
    fn set_modelview(&mut self, modelview: Mat4);
    /// Current window size in pixels.
    fn screen_size(&self) -> (u32, u32);
    fn render_state(&self) -> RenderState;
    /// Marks the start (`Some`) or end (`None`) of a deferred pass.
    fn set_deferred_pass(&mut self, framebuffer: Option<FramebufferId>);
    fn load_texture(&mut self, path: &Path) -> Result<TextureId, TextureError>;
    /// Uploads decoded texels; fails when the image exceeds the device's
    /// texture size limit.
    fn upload_rgba8(
        &mut self,
        image: &image::RgbaImage,
        label: Option<&str>,
    ) -> Result<TextureId, TextureError>;
    fn texture_size(&self, texture: TextureId) -> Option<(u32, u32)>;

    fn row_order(&self) -> RowOrder {
        RowOrder::BottomUp
    }
}
