// src/renderer/headless.rs

//! A backend without a GPU.
//!
//! Keeps the same bookkeeping a real driver would (object tables, bound
//! state, completeness) and records every state change, so the deferred
//! pipeline and the model importer can run in CI and be asserted against.

use std::collections::BTreeMap;
use std::path::Path;

use glam::Mat4;
use log::{debug, warn};

use crate::renderer::backend::{
    check_completeness, AttachmentDescriptor, AttachmentFormat, AttachmentInfo, AttachmentPoint,
    FilterMode, FramebufferId, FramebufferStatus, RenderBackend, RenderState, RowOrder, TextureId,
    Viewport, WrapMode,
};
use crate::renderer::texture::{check_dimensions, TextureError};

/// GL_MAX_COLOR_ATTACHMENTS on common desktop drivers.
const DEFAULT_MAX_COLOR_ATTACHMENTS: u32 = 8;
/// `max_texture_dimension_2d` of wgpu's default limits.
const DEFAULT_MAX_TEXTURE_DIMENSION: u32 = 8192;

/// Where a headless texture came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TextureOrigin {
    Attachment {
        format: AttachmentFormat,
        filter: FilterMode,
        wrap: WrapMode,
        mip_levels: u32,
    },
    File(std::path::PathBuf),
    Upload,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeadlessTexture {
    pub label: Option<String>,
    pub width: u32,
    pub height: u32,
    pub origin: TextureOrigin,
    /// RGBA8 texels of an upload, empty for other origins.
    pub texels: Vec<u8>,
}

#[derive(Debug, Clone, Default)]
struct HeadlessFramebuffer {
    attachments: BTreeMap<AttachmentPoint, TextureId>,
    draw_buffers: Vec<u32>,
}

/// One state-changing call, in the order the backend received it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command {
    Flush,
    BindFramebuffer(Option<FramebufferId>),
    Clear(Option<FramebufferId>),
    SetBlend(bool),
    SetViewport(Viewport),
    SetProjection(Mat4),
    SetModelview(Mat4),
    BindTexture { slot: u32, texture: TextureId },
}

/// A draw call the test issued, with the state it would have rendered under.
#[derive(Debug, Clone, PartialEq)]
pub struct DrawRecord {
    pub label: String,
    pub state: RenderState,
}

#[derive(Debug)]
pub struct HeadlessBackend {
    screen_size: (u32, u32),
    next_id: u32,
    textures: BTreeMap<TextureId, HeadlessTexture>,
    framebuffers: BTreeMap<FramebufferId, HeadlessFramebuffer>,
    state: RenderState,
    bound_textures: BTreeMap<u32, TextureId>,
    commands: Vec<Command>,
    draws: Vec<DrawRecord>,
    forced_status: Option<FramebufferStatus>,
    max_color_attachments: u32,
    max_texture_dimension: u32,
    invalid_deletes: usize,
    uploads: usize,
}

impl HeadlessBackend {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            screen_size: (width, height),
            next_id: 1,
            textures: BTreeMap::new(),
            framebuffers: BTreeMap::new(),
            state: RenderState::window_default(width, height),
            bound_textures: BTreeMap::new(),
            commands: Vec::new(),
            draws: Vec::new(),
            forced_status: None,
            max_color_attachments: DEFAULT_MAX_COLOR_ATTACHMENTS,
            max_texture_dimension: DEFAULT_MAX_TEXTURE_DIMENSION,
            invalid_deletes: 0,
            uploads: 0,
        }
    }

    fn next_raw(&mut self) -> u32 {
        let raw = self.next_id;
        self.next_id += 1;
        raw
    }

    /// Simulates a window resize.
    pub fn set_screen_size(&mut self, width: u32, height: u32) {
        self.screen_size = (width, height);
    }

    /// Makes every completeness query report `status` until reset with `None`.
    pub fn force_status(&mut self, status: Option<FramebufferStatus>) {
        self.forced_status = status;
    }

    pub fn set_max_color_attachments(&mut self, max: u32) {
        self.max_color_attachments = max;
    }

    pub fn set_max_texture_dimension(&mut self, max: u32) {
        self.max_texture_dimension = max;
    }

    /// Records a draw under the current state, as a host draw call would.
    pub fn record_draw(&mut self, label: impl Into<String>) {
        self.draws.push(DrawRecord {
            label: label.into(),
            state: self.state,
        });
    }

    pub fn live_textures(&self) -> usize {
        self.textures.len()
    }

    pub fn live_framebuffers(&self) -> usize {
        self.framebuffers.len()
    }

    pub fn texture(&self, texture: TextureId) -> Option<&HeadlessTexture> {
        self.textures.get(&texture)
    }

    pub fn attachment(&self, framebuffer: FramebufferId, point: AttachmentPoint) -> Option<TextureId> {
        self.framebuffers
            .get(&framebuffer)
            .and_then(|fb| fb.attachments.get(&point).copied())
    }

    pub fn draw_buffers(&self, framebuffer: FramebufferId) -> Option<&[u32]> {
        self.framebuffers
            .get(&framebuffer)
            .map(|fb| fb.draw_buffers.as_slice())
    }

    pub fn bound_texture(&self, slot: u32) -> Option<TextureId> {
        self.bound_textures.get(&slot).copied()
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub fn clear_commands(&mut self) {
        self.commands.clear();
    }

    pub fn draws(&self) -> &[DrawRecord] {
        &self.draws
    }

    /// Deletes of ids that were not alive, i.e. double frees.
    pub fn invalid_deletes(&self) -> usize {
        self.invalid_deletes
    }

    /// Textures created from decoded pixels or files, as opposed to attachments.
    pub fn uploads(&self) -> usize {
        self.uploads
    }

    fn insert_texture(&mut self, texture: HeadlessTexture) -> TextureId {
        let id = TextureId::from_raw(self.next_raw());
        debug!(
            "headless: texture {} created ({}x{}, {:?})",
            id.raw(),
            texture.width,
            texture.height,
            texture.label
        );
        self.textures.insert(id, texture);
        id
    }
}

impl RenderBackend for HeadlessBackend {
    fn create_framebuffer(&mut self) -> FramebufferId {
        let id = FramebufferId::from_raw(self.next_raw());
        self.framebuffers.insert(id, HeadlessFramebuffer::default());
        id
    }

    fn delete_framebuffer(&mut self, framebuffer: FramebufferId) {
        if self.framebuffers.remove(&framebuffer).is_none() {
            warn!("headless: delete of unknown framebuffer {}", framebuffer.raw());
            self.invalid_deletes += 1;
            return;
        }
        if self.state.framebuffer == Some(framebuffer) {
            self.state.framebuffer = None;
        }
    }

    fn create_attachment(&mut self, desc: &AttachmentDescriptor<'_>) -> TextureId {
        self.insert_texture(HeadlessTexture {
            label: desc.label.map(str::to_owned),
            width: desc.width,
            height: desc.height,
            origin: TextureOrigin::Attachment {
                format: desc.format,
                filter: desc.filter,
                wrap: desc.wrap,
                mip_levels: desc.mip_levels,
            },
            texels: Vec::new(),
        })
    }

    fn attach(&mut self, framebuffer: FramebufferId, point: AttachmentPoint, texture: TextureId) {
        match self.framebuffers.get_mut(&framebuffer) {
            Some(fb) => {
                fb.attachments.insert(point, texture);
            }
            None => warn!("headless: attach to unknown framebuffer {}", framebuffer.raw()),
        }
    }

    fn set_draw_buffers(&mut self, framebuffer: FramebufferId, slots: &[u32]) {
        if let Some(fb) = self.framebuffers.get_mut(&framebuffer) {
            fb.draw_buffers = slots.to_vec();
        }
    }

    fn framebuffer_status(&self, framebuffer: FramebufferId) -> FramebufferStatus {
        if let Some(status) = self.forced_status {
            return status;
        }
        let Some(fb) = self.framebuffers.get(&framebuffer) else {
            return FramebufferStatus::IncompleteMissingAttachment;
        };

        let mut infos = Vec::with_capacity(fb.attachments.len());
        for (point, texture) in &fb.attachments {
            let Some(tex) = self.textures.get(texture) else {
                return FramebufferStatus::IncompleteAttachment;
            };
            let TextureOrigin::Attachment { format, .. } = tex.origin else {
                // Sampled-only textures cannot be rendered to.
                return FramebufferStatus::Unsupported;
            };
            infos.push(AttachmentInfo {
                point: *point,
                width: tex.width,
                height: tex.height,
                format,
                renderable: true,
            });
        }

        check_completeness(&infos, &fb.draw_buffers, self.max_color_attachments)
    }

    fn bind_framebuffer(&mut self, framebuffer: Option<FramebufferId>) {
        self.state.framebuffer = framebuffer;
        self.commands.push(Command::BindFramebuffer(framebuffer));
    }

    fn clear(&mut self) {
        self.commands.push(Command::Clear(self.state.framebuffer));
    }

    fn set_blend(&mut self, enabled: bool) {
        self.state.blend_enabled = enabled;
        self.commands.push(Command::SetBlend(enabled));
    }

    fn bind_texture(&mut self, slot: u32, texture: TextureId) {
        self.bound_textures.insert(slot, texture);
        self.commands.push(Command::BindTexture { slot, texture });
    }

    fn delete_texture(&mut self, texture: TextureId) {
        if self.textures.remove(&texture).is_none() {
            warn!("headless: delete of unknown texture {}", texture.raw());
            self.invalid_deletes += 1;
            return;
        }
        self.bound_textures.retain(|_, bound| *bound != texture);
    }

    fn flush(&mut self) {
        self.commands.push(Command::Flush);
    }

    fn set_viewport(&mut self, viewport: Viewport) {
        self.state.viewport = viewport;
        self.commands.push(Command::SetViewport(viewport));
    }

    fn set_projection(&mut self, projection: Mat4) {
        self.state.projection = projection;
        self.commands.push(Command::SetProjection(projection));
    }

    fn set_modelview(&mut self, modelview: Mat4) {
        self.state.modelview = modelview;
        self.commands.push(Command::SetModelview(modelview));
    }

    fn screen_size(&self) -> (u32, u32) {
        self.screen_size
    }

    fn render_state(&self) -> RenderState {
        self.state
    }

    fn set_deferred_pass(&mut self, framebuffer: Option<FramebufferId>) {
        self.state.deferred_pass = framebuffer;
    }

    fn load_texture(&mut self, path: &Path) -> Result<TextureId, TextureError> {
        let (width, height) = image::image_dimensions(path).map_err(|source| TextureError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        if width == 0 || height == 0 {
            return Err(TextureError::Empty);
        }
        check_dimensions(width, height, self.max_texture_dimension)?;
        self.uploads += 1;
        Ok(self.insert_texture(HeadlessTexture {
            label: path.to_str().map(str::to_owned),
            width,
            height,
            origin: TextureOrigin::File(path.to_path_buf()),
            texels: Vec::new(),
        }))
    }

    fn upload_rgba8(
        &mut self,
        image: &image::RgbaImage,
        label: Option<&str>,
    ) -> Result<TextureId, TextureError> {
        check_dimensions(image.width(), image.height(), self.max_texture_dimension)?;
        self.uploads += 1;
        Ok(self.insert_texture(HeadlessTexture {
            label: label.map(str::to_owned),
            width: image.width(),
            height: image.height(),
            origin: TextureOrigin::Upload,
            texels: image.as_raw().clone(),
        }))
    }

    fn texture_size(&self, texture: TextureId) -> Option<(u32, u32)> {
        self.textures.get(&texture).map(|t| (t.width, t.height))
    }

    fn row_order(&self) -> RowOrder {
        RowOrder::BottomUp
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rgba8(width: u32, height: u32) -> AttachmentDescriptor<'static> {
        AttachmentDescriptor {
            label: None,
            width,
            height,
            format: AttachmentFormat::Rgba8Unorm,
            filter: FilterMode::Nearest,
            wrap: WrapMode::Repeat,
            mip_levels: 1,
        }
    }

    #[test]
    fn starts_in_window_default_state() {
        let backend = HeadlessBackend::new(640, 480);
        assert_eq!(backend.render_state(), RenderState::window_default(640, 480));
        assert_eq!(backend.live_textures(), 0);
        assert_eq!(backend.live_framebuffers(), 0);
    }

    #[test]
    fn ids_are_unique_across_object_kinds() {
        let mut backend = HeadlessBackend::new(1, 1);
        let fb = backend.create_framebuffer();
        let tex = backend.create_attachment(&rgba8(4, 4));
        assert_ne!(fb.raw(), tex.raw());
    }

    #[test]
    fn double_delete_is_counted() {
        let mut backend = HeadlessBackend::new(1, 1);
        let tex = backend.create_attachment(&rgba8(4, 4));
        backend.delete_texture(tex);
        backend.delete_texture(tex);
        assert_eq!(backend.live_textures(), 0);
        assert_eq!(backend.invalid_deletes(), 1);
    }

    #[test]
    fn deleting_bound_framebuffer_rebinds_default() {
        let mut backend = HeadlessBackend::new(1, 1);
        let fb = backend.create_framebuffer();
        backend.bind_framebuffer(Some(fb));
        backend.delete_framebuffer(fb);
        assert_eq!(backend.render_state().framebuffer, None);
    }

    #[test]
    fn single_color_attachment_is_complete() {
        let mut backend = HeadlessBackend::new(1, 1);
        let fb = backend.create_framebuffer();
        let tex = backend.create_attachment(&rgba8(16, 16));
        backend.attach(fb, AttachmentPoint::Color(0), tex);
        backend.set_draw_buffers(fb, &[0]);
        assert_eq!(backend.framebuffer_status(fb), FramebufferStatus::Complete);
    }

    #[test]
    fn forced_status_overrides_check() {
        let mut backend = HeadlessBackend::new(1, 1);
        let fb = backend.create_framebuffer();
        backend.force_status(Some(FramebufferStatus::Unsupported));
        assert_eq!(backend.framebuffer_status(fb), FramebufferStatus::Unsupported);
    }

    #[test]
    fn uploaded_texture_cannot_be_attached() {
        let mut backend = HeadlessBackend::new(1, 1);
        let fb = backend.create_framebuffer();
        let tex = backend
            .upload_rgba8(&image::RgbaImage::new(2, 2), None)
            .unwrap();
        backend.attach(fb, AttachmentPoint::Color(0), tex);
        assert_eq!(backend.framebuffer_status(fb), FramebufferStatus::Unsupported);
    }

    #[test]
    fn upload_above_texture_limit_is_refused() {
        let mut backend = HeadlessBackend::new(1, 1);
        backend.set_max_texture_dimension(4);

        let err = backend
            .upload_rgba8(&image::RgbaImage::new(8, 2), None)
            .unwrap_err();
        assert!(matches!(err, TextureError::TooLarge { width: 8, height: 2, max: 4 }));
        assert_eq!(backend.live_textures(), 0);
        assert_eq!(backend.uploads(), 0);

        let ok = backend.upload_rgba8(&image::RgbaImage::new(4, 4), None).unwrap();
        assert_eq!(backend.texture(ok).unwrap().texels.len(), 4 * 4 * 4);
    }

    #[test]
    fn record_draw_snapshots_state() {
        let mut backend = HeadlessBackend::new(100, 50);
        backend.set_blend(false);
        backend.record_draw("cube");
        let draw = &backend.draws()[0];
        assert_eq!(draw.label, "cube");
        assert!(!draw.state.blend_enabled);
    }

    #[test]
    fn load_texture_reports_missing_file() {
        let mut backend = HeadlessBackend::new(1, 1);
        let err = backend
            .load_texture(Path::new("does/not/exist.png"))
            .unwrap_err();
        assert!(matches!(err, TextureError::Open { .. }));
        assert_eq!(backend.live_textures(), 0);
    }
}
