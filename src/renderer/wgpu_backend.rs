// src/renderer/wgpu_backend.rs

//! [`RenderBackend`] on top of wgpu.
//!
//! wgpu has no bound framebuffer or immediate draws, so the host state is
//! emulated: draws are recorded into a render pass that is opened lazily for
//! the currently bound target and closed whenever the target changes, the
//! target is cleared, or the host flushes. `flush` submits the encoder.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use glam::Mat4;
use log::{debug, trace, warn};

use crate::renderer::backend::{
    check_completeness, screen_ortho, AttachmentDescriptor, AttachmentFormat, AttachmentInfo,
    AttachmentPoint, FramebufferId, FramebufferStatus, RenderBackend, RenderState, RowOrder,
    TextureId, Viewport,
};
use crate::renderer::composite::{
    SourceRect, COMPOSITE_COLOR_SLOT, COMPOSITE_NORMAL_SLOT, COMPOSITE_POSITION_SLOT,
};
use crate::renderer::mesh::GpuMesh;
use crate::renderer::pipelines::{
    CompositePipeline, GeometryPipeline, MaterialBinding, ObjectBinding, QuadUniform,
};
use crate::renderer::texture::{Texture, TextureError};

struct GpuTexture {
    texture: Texture,
    width: u32,
    height: u32,
    /// `Some` for render-target attachments, `None` for sampled images.
    format: Option<AttachmentFormat>,
}

#[derive(Default)]
struct GpuFramebuffer {
    attachments: BTreeMap<AttachmentPoint, TextureId>,
    draw_buffers: Vec<u32>,
}

pub struct WgpuBackend {
    // Declared before `encoder` so an open pass is dropped first.
    pass: Option<wgpu::RenderPass<'static>>,
    encoder: Option<wgpu::CommandEncoder>,
    device: wgpu::Device,
    queue: wgpu::Queue,
    screen_size: (u32, u32),
    screen_format: wgpu::TextureFormat,
    screen_target: Option<wgpu::TextureView>,
    next_id: u32,
    textures: HashMap<TextureId, GpuTexture>,
    framebuffers: HashMap<FramebufferId, GpuFramebuffer>,
    state: RenderState,
    clear_color: wgpu::Color,
    pending_clear: bool,
    bound_textures: BTreeMap<u32, TextureId>,
    white: Texture,
}

impl WgpuBackend {
    pub fn new(
        device: wgpu::Device,
        queue: wgpu::Queue,
        screen_format: wgpu::TextureFormat,
        width: u32,
        height: u32,
    ) -> Self {
        let white = Texture::white(&device, &queue);

        Self {
            pass: None,
            encoder: None,
            device,
            queue,
            screen_size: (width, height),
            screen_format,
            screen_target: None,
            next_id: 1,
            textures: HashMap::new(),
            framebuffers: HashMap::new(),
            state: RenderState::window_default(width, height),
            clear_color: wgpu::Color::BLACK,
            pending_clear: false,
            bound_textures: BTreeMap::new(),
            white,
        }
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    pub fn screen_format(&self) -> wgpu::TextureFormat {
        self.screen_format
    }

    pub fn texture(&self, texture: TextureId) -> Option<&Texture> {
        self.textures.get(&texture).map(|entry| &entry.texture)
    }

    pub fn white_texture(&self) -> &Texture {
        &self.white
    }

    pub fn set_clear_color(&mut self, color: wgpu::Color) {
        self.clear_color = color;
    }

    /// Starts drawing a frame into `target`, usually a surface texture view.
    pub fn begin_frame(&mut self, target: wgpu::TextureView) {
        self.end_pass();
        self.screen_target = Some(target);
    }

    /// Submits everything recorded for the frame. The caller presents the
    /// surface texture afterwards.
    pub fn end_frame(&mut self) {
        self.flush();
        self.screen_target = None;
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        self.screen_size = (width, height);
        if self.state.framebuffer.is_none() {
            self.end_pass();
            self.state.viewport = Viewport::full(width, height);
            self.state.projection = screen_ortho(width, height);
        }
    }

    /// Records one mesh into the bound G-buffer.
    pub fn draw_mesh(
        &mut self,
        pipeline: &GeometryPipeline,
        mesh: &GpuMesh,
        object: &ObjectBinding,
        material: &MaterialBinding,
    ) {
        if self.state.framebuffer.is_none() {
            warn!("Geometry draw outside a deferred pass ignored");
            return;
        }
        let Some(pass) = self.ensure_pass() else {
            return;
        };
        pass.set_pipeline(pipeline.pipeline());
        pass.set_bind_group(0, object.bind_group(), &[]);
        pass.set_bind_group(1, material.bind_group(), &[]);
        mesh.draw(pass);
    }

    /// Draws the composite quad over the current viewport of the window,
    /// sampling whatever is bound to the composite texture slots. `source`
    /// is in texels of the texture bound to the color slot.
    pub fn draw_composite(&mut self, pipeline: &CompositePipeline, source: SourceRect) {
        if self.state.framebuffer.is_some() {
            warn!("Composite draw into an offscreen framebuffer ignored");
            return;
        }

        let slot = |slot: u32| {
            self.bound_textures
                .get(&slot)
                .and_then(|id| self.textures.get(id))
        };
        let (width, height) = slot(COMPOSITE_COLOR_SLOT).map_or((1, 1), |t| (t.width, t.height));
        let view = |slot_index: u32| slot(slot_index).map_or(&self.white.view, |t| &t.texture.view);

        let quad = QuadUniform::from_uvs(source.quad_uvs(width as f32, height as f32));
        let bind_group = pipeline.bind_group(
            &self.device,
            &quad,
            view(COMPOSITE_COLOR_SLOT),
            view(COMPOSITE_NORMAL_SLOT),
            view(COMPOSITE_POSITION_SLOT),
        );

        let blend = self.state.blend_enabled;
        let Some(pass) = self.ensure_pass() else {
            return;
        };
        pass.set_pipeline(pipeline.pipeline(blend));
        pass.set_bind_group(0, &bind_group, &[]);
        pass.draw(0..6, 0..1);
    }

    fn allocate_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn insert_texture(&mut self, texture: Texture, format: Option<AttachmentFormat>) -> TextureId {
        let id = TextureId::from_raw(self.allocate_id());
        let size = texture.texture.size();
        self.textures.insert(
            id,
            GpuTexture {
                texture,
                width: size.width,
                height: size.height,
                format,
            },
        );
        id
    }

    fn target_size(&self) -> (u32, u32) {
        match self.state.framebuffer {
            None => self.screen_size,
            Some(id) => self
                .framebuffers
                .get(&id)
                .and_then(|fb| fb.attachments.values().next())
                .and_then(|texture| self.textures.get(texture))
                .map_or((0, 0), |t| (t.width, t.height)),
        }
    }

    fn end_pass(&mut self) {
        if self.pass.take().is_some() {
            trace!("render pass closed");
        }
    }

    /// A pending clear must reach the target even when nothing is drawn.
    fn resolve_pending_clear(&mut self) {
        if self.pending_clear {
            let _ = self.ensure_pass();
            self.end_pass();
        }
    }

    fn ensure_pass(&mut self) -> Option<&mut wgpu::RenderPass<'static>> {
        if self.pass.is_none() {
            self.pass = self.open_pass();
        }
        self.pass.as_mut()
    }

    fn open_pass(&mut self) -> Option<wgpu::RenderPass<'static>> {
        let clear = std::mem::take(&mut self.pending_clear);
        let viewport = clamp_viewport(self.state.viewport, self.target_size());

        let color_load = |color: wgpu::Color| {
            if clear {
                wgpu::LoadOp::Clear(color)
            } else {
                wgpu::LoadOp::Load
            }
        };
        let color_attachment = |view| {
            Some(wgpu::RenderPassColorAttachment {
                view,
                depth_slice: None,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: color_load(wgpu::Color::TRANSPARENT),
                    store: wgpu::StoreOp::Store,
                },
            })
        };

        let (color_attachments, depth_view) = match self.state.framebuffer {
            None => {
                let Some(view) = self.screen_target.as_ref() else {
                    warn!("No window target; call begin_frame before drawing to the window");
                    return None;
                };
                let attachment = wgpu::RenderPassColorAttachment {
                    view,
                    depth_slice: None,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: color_load(self.clear_color),
                        store: wgpu::StoreOp::Store,
                    },
                };
                (vec![Some(attachment)], None)
            }
            Some(id) => {
                let Some(framebuffer) = self.framebuffers.get(&id) else {
                    warn!("Framebuffer {} is bound but does not exist", id.raw());
                    return None;
                };
                let view_at = |point: AttachmentPoint| {
                    framebuffer
                        .attachments
                        .get(&point)
                        .and_then(|texture| self.textures.get(texture))
                        .map(|texture| &texture.texture.view)
                };
                let colors: Vec<_> = framebuffer
                    .draw_buffers
                    .iter()
                    .map(|slot| view_at(AttachmentPoint::Color(*slot)).and_then(|view| color_attachment(view)))
                    .collect();
                (colors, view_at(AttachmentPoint::Depth))
            }
        };

        let depth_stencil_attachment =
            depth_view.map(|view| wgpu::RenderPassDepthStencilAttachment {
                view,
                depth_ops: Some(wgpu::Operations {
                    load: if clear {
                        wgpu::LoadOp::Clear(1.0)
                    } else {
                        wgpu::LoadOp::Load
                    },
                    store: wgpu::StoreOp::Store,
                }),
                stencil_ops: None,
            });

        let device = &self.device;
        let encoder = self.encoder.get_or_insert_with(|| {
            device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Backend Encoder"),
            })
        });

        let mut pass = encoder
            .begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Backend Pass"),
                color_attachments: &color_attachments,
                depth_stencil_attachment,
                timestamp_writes: None,
                occlusion_query_set: None,
            })
            .forget_lifetime();

        if let Some([x, y, width, height]) = viewport {
            pass.set_viewport(x, y, width, height, 0.0, 1.0);
        }
        trace!("render pass opened (clear: {})", clear);
        Some(pass)
    }
}

/// Clips a viewport to the target, as wgpu rejects viewports that leave it.
/// `None` when nothing of the viewport is visible.
fn clamp_viewport(viewport: Viewport, (target_width, target_height): (u32, u32)) -> Option<[f32; 4]> {
    let clamp_axis = |start: i32, len: u32, target: u32| {
        let start = i64::from(start);
        let end = (start + i64::from(len)).min(i64::from(target));
        let start = start.max(0);
        (end > start).then(|| (start as f32, (end - start) as f32))
    };
    let (x, width) = clamp_axis(viewport.x, viewport.width, target_width)?;
    let (y, height) = clamp_axis(viewport.y, viewport.height, target_height)?;
    Some([x, y, width, height])
}

impl RenderBackend for WgpuBackend {
    fn create_framebuffer(&mut self) -> FramebufferId {
        let id = FramebufferId::from_raw(self.allocate_id());
        self.framebuffers.insert(id, GpuFramebuffer::default());
        id
    }

    fn delete_framebuffer(&mut self, framebuffer: FramebufferId) {
        if self.state.framebuffer == Some(framebuffer) {
            self.end_pass();
            self.state.framebuffer = None;
        }
        if self.framebuffers.remove(&framebuffer).is_none() {
            warn!("Deleting unknown framebuffer {}", framebuffer.raw());
        }
    }

    fn create_attachment(&mut self, desc: &AttachmentDescriptor<'_>) -> TextureId {
        let texture = Texture::attachment(&self.device, desc);
        let id = self.insert_texture(texture, Some(desc.format));
        // Zero sizes are clamped on the GPU; completeness checks the requested size.
        if let Some(entry) = self.textures.get_mut(&id) {
            entry.width = desc.width;
            entry.height = desc.height;
        }
        id
    }

    fn attach(&mut self, framebuffer: FramebufferId, point: AttachmentPoint, texture: TextureId) {
        match self.framebuffers.get_mut(&framebuffer) {
            Some(fb) => {
                fb.attachments.insert(point, texture);
            }
            None => warn!("Attaching to unknown framebuffer {}", framebuffer.raw()),
        }
    }

    fn set_draw_buffers(&mut self, framebuffer: FramebufferId, slots: &[u32]) {
        match self.framebuffers.get_mut(&framebuffer) {
            Some(fb) => fb.draw_buffers = slots.to_vec(),
            None => warn!("Setting draw buffers on unknown framebuffer {}", framebuffer.raw()),
        }
    }

    fn framebuffer_status(&self, framebuffer: FramebufferId) -> FramebufferStatus {
        let Some(fb) = self.framebuffers.get(&framebuffer) else {
            return FramebufferStatus::IncompleteMissingAttachment;
        };
        let features = self.device.features();
        let limits = self.device.limits();

        let mut infos = Vec::with_capacity(fb.attachments.len());
        for (point, texture) in &fb.attachments {
            let Some(texture) = self.textures.get(texture) else {
                return FramebufferStatus::IncompleteAttachment;
            };
            let renderable = texture.format.is_some_and(|format| {
                format
                    .to_wgpu()
                    .guaranteed_format_features(features)
                    .allowed_usages
                    .contains(wgpu::TextureUsages::RENDER_ATTACHMENT)
            });
            infos.push(AttachmentInfo {
                point: *point,
                width: texture.width,
                height: texture.height,
                format: texture.format.unwrap_or(AttachmentFormat::Rgba8Unorm),
                renderable,
            });
        }

        let status = check_completeness(&infos, &fb.draw_buffers, limits.max_color_attachments);
        if !status.is_complete() {
            return status;
        }

        let bytes_per_sample: u32 = fb
            .draw_buffers
            .iter()
            .filter_map(|slot| fb.attachments.get(&AttachmentPoint::Color(*slot)))
            .filter_map(|texture| self.textures.get(texture)?.format)
            .filter_map(|format| format.to_wgpu().target_pixel_byte_cost())
            .sum();
        if bytes_per_sample > limits.max_color_attachment_bytes_per_sample {
            debug!(
                "Framebuffer {} needs {} bytes per sample, device allows {}",
                framebuffer.raw(),
                bytes_per_sample,
                limits.max_color_attachment_bytes_per_sample
            );
            return FramebufferStatus::Unsupported;
        }
        FramebufferStatus::Complete
    }

    fn bind_framebuffer(&mut self, framebuffer: Option<FramebufferId>) {
        if self.state.framebuffer == framebuffer {
            return;
        }
        self.resolve_pending_clear();
        self.end_pass();
        self.state.framebuffer = framebuffer;
    }

    fn clear(&mut self) {
        self.end_pass();
        self.pending_clear = true;
    }

    fn set_blend(&mut self, enabled: bool) {
        self.state.blend_enabled = enabled;
    }

    fn bind_texture(&mut self, slot: u32, texture: TextureId) {
        if !self.textures.contains_key(&texture) {
            warn!("Binding unknown texture {} to slot {}", texture.raw(), slot);
        }
        self.bound_textures.insert(slot, texture);
    }

    fn delete_texture(&mut self, texture: TextureId) {
        if self.textures.remove(&texture).is_none() {
            warn!("Deleting unknown texture {}", texture.raw());
            return;
        }
        self.bound_textures.retain(|_, bound| *bound != texture);
    }

    fn flush(&mut self) {
        self.resolve_pending_clear();
        self.end_pass();
        if let Some(encoder) = self.encoder.take() {
            self.queue.submit(Some(encoder.finish()));
        }
    }

    fn set_viewport(&mut self, viewport: Viewport) {
        self.state.viewport = viewport;
        let clamped = clamp_viewport(viewport, self.target_size());
        if let (Some(pass), Some([x, y, width, height])) = (self.pass.as_mut(), clamped) {
            pass.set_viewport(x, y, width, height, 0.0, 1.0);
        }
    }

    fn set_projection(&mut self, projection: Mat4) {
        self.state.projection = projection;
    }

    fn set_modelview(&mut self, modelview: Mat4) {
        self.state.modelview = modelview;
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
        let texture = Texture::from_path(&self.device, &self.queue, path)?;
        Ok(self.insert_texture(texture, None))
    }

    fn upload_rgba8(
        &mut self,
        image: &image::RgbaImage,
        label: Option<&str>,
    ) -> Result<TextureId, TextureError> {
        let texture = Texture::from_rgba8(&self.device, &self.queue, image, label)?;
        Ok(self.insert_texture(texture, None))
    }

    fn texture_size(&self, texture: TextureId) -> Option<(u32, u32)> {
        self.textures.get(&texture).map(|t| (t.width, t.height))
    }

    fn row_order(&self) -> RowOrder {
        RowOrder::TopDown
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::deferred::DeferredPass;
    use crate::renderer::gbuffer::GBuffer;

    #[test]
    fn viewport_inside_target_is_unchanged() {
        assert_eq!(
            clamp_viewport(Viewport::new(10, 20, 100, 50), (800, 600)),
            Some([10.0, 20.0, 100.0, 50.0])
        );
    }

    #[test]
    fn viewport_is_clipped_to_target() {
        assert_eq!(
            clamp_viewport(Viewport::new(-10, 550, 100, 100), (800, 600)),
            Some([0.0, 550.0, 90.0, 50.0])
        );
    }

    #[test]
    fn viewport_outside_target_is_dropped() {
        assert_eq!(clamp_viewport(Viewport::new(900, 0, 10, 10), (800, 600)), None);
        assert_eq!(clamp_viewport(Viewport::full(0, 0), (800, 600)), None);
    }

    fn request_backend(width: u32, height: u32) -> WgpuBackend {
        let (device, queue) = pollster::block_on(async {
            let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
                backends: wgpu::Backends::all(),
                ..Default::default()
            });
            let adapter = instance
                .request_adapter(&wgpu::RequestAdapterOptions::default())
                .await
                .expect("Failed to find adapter");
            adapter
                .request_device(&wgpu::DeviceDescriptor::default())
                .await
                .expect("Failed to create device")
        });
        WgpuBackend::new(device, queue, wgpu::TextureFormat::Rgba8Unorm, width, height)
    }

    #[test]
    #[ignore] // Requires a GPU
    fn gbuffer_is_complete_on_real_device() {
        let mut backend = request_backend(320, 240);
        let gbuffer = GBuffer::create(&mut backend, 320, 240);
        assert!(gbuffer.is_complete(), "{}", gbuffer.status());
        assert_eq!(backend.row_order(), RowOrder::TopDown);

        gbuffer.destroy(&mut backend);
        assert!(backend.textures.is_empty());
        assert!(backend.framebuffers.is_empty());
    }

    #[test]
    #[ignore] // Requires a GPU
    fn deferred_pass_submits_and_restores_window_state() {
        let mut backend = request_backend(320, 240);
        let gbuffer = GBuffer::create(&mut backend, 64, 64);

        let pass = DeferredPass::begin(&mut backend, &gbuffer).unwrap();
        pass.end();

        let state = backend.render_state();
        assert_eq!(state.framebuffer, None);
        assert_eq!(state.viewport, Viewport::full(320, 240));
        assert!(state.blend_enabled);
        assert!(backend.encoder.is_none());
        gbuffer.destroy(&mut backend);
    }

    #[test]
    #[ignore] // Requires a GPU
    fn uploaded_texture_cannot_be_attached() {
        let mut backend = request_backend(16, 16);
        let image = image::RgbaImage::from_pixel(16, 16, image::Rgba([0; 4]));
        let texture = backend.upload_rgba8(&image, None).unwrap();
        let fb = backend.create_framebuffer();
        backend.attach(fb, AttachmentPoint::Color(0), texture);
        backend.set_draw_buffers(fb, &[0]);
        assert_eq!(backend.framebuffer_status(fb), FramebufferStatus::Unsupported);
    }

    #[test]
    #[ignore] // Requires a GPU
    fn upload_above_device_limit_is_refused() {
        let mut backend = request_backend(16, 16);
        let max = backend.device().limits().max_texture_dimension_2d;
        let image = image::RgbaImage::new(max + 1, 1);
        let err = backend.upload_rgba8(&image, None).unwrap_err();
        assert!(matches!(err, TextureError::TooLarge { width, .. } if width == max + 1));
        assert!(backend.textures.is_empty());
    }
}
