// src/renderer/deferred.rs

//! The deferred geometry pass.
//!
//! Between begin and end every draw issued through the backend lands in the
//! G-buffer attachments. [`DeferredPass`] is the scoped form: it holds the
//! backend mutably and restores window state when dropped. [`DeferredMode`]
//! is the unscoped form for hosts that split begin and end across calls.
//! The open pass is recorded on the backend, so neither form can begin a
//! second pass on a backend that already has one.

use glam::Mat4;
use log::{debug, trace};

use crate::renderer::backend::{screen_ortho, FramebufferId, RenderBackend, TextureId, Viewport};
use crate::renderer::gbuffer::GBuffer;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PassError {
    #[error("a deferred pass is already active on framebuffer {}", .0.raw())]
    AlreadyInPass(FramebufferId),
    #[error("no deferred pass is active")]
    NotInPass,
}

fn ensure_idle<B: RenderBackend + ?Sized>(backend: &B) -> Result<(), PassError> {
    match backend.render_state().deferred_pass {
        Some(framebuffer) => {
            debug!("rejected nested deferred pass");
            Err(PassError::AlreadyInPass(framebuffer))
        }
        None => Ok(()),
    }
}

fn enter<B: RenderBackend + ?Sized>(backend: &mut B, gbuffer: &GBuffer) {
    let (width, height) = gbuffer.size();
    trace!("deferred pass begin ({}x{})", width, height);

    backend.flush();
    backend.bind_framebuffer(Some(gbuffer.framebuffer()));
    backend.clear();
    backend.set_viewport(Viewport::full(width, height));
    backend.set_projection(screen_ortho(width, height));
    backend.set_modelview(Mat4::IDENTITY);
    backend.set_blend(false);
    backend.set_deferred_pass(Some(gbuffer.framebuffer()));
}

fn leave<B: RenderBackend + ?Sized>(backend: &mut B) {
    backend.set_deferred_pass(None);
    backend.flush();
    backend.set_blend(true);
    backend.bind_framebuffer(None);

    let (width, height) = backend.screen_size();
    backend.set_viewport(Viewport::full(width, height));
    backend.set_projection(screen_ortho(width, height));
    backend.set_modelview(Mat4::IDENTITY);
    trace!("deferred pass end, window {}x{}", width, height);
}

/// Activates texture unit `slot` and binds `texture` to it. Valid inside or
/// outside a pass; composite shaders read the G-buffer through these slots.
pub fn bind_composite_texture<B: RenderBackend + ?Sized>(
    backend: &mut B,
    texture: TextureId,
    slot: u32,
) {
    backend.bind_texture(slot, texture);
}

/// Scope guard for one geometry pass.
pub struct DeferredPass<'a, B: RenderBackend + ?Sized> {
    backend: &'a mut B,
    gbuffer: &'a GBuffer,
    finished: bool,
}

impl<'a, B: RenderBackend + ?Sized> DeferredPass<'a, B> {
    /// Opens the pass. Fails without touching the backend when another pass
    /// is already open on it.
    pub fn begin(backend: &'a mut B, gbuffer: &'a GBuffer) -> Result<Self, PassError> {
        ensure_idle(&*backend)?;
        enter(backend, gbuffer);
        Ok(Self {
            backend,
            gbuffer,
            finished: false,
        })
    }

    /// The backend, for issuing geometry draws into the G-buffer.
    pub fn backend(&mut self) -> &mut B {
        self.backend
    }

    pub fn gbuffer(&self) -> &GBuffer {
        self.gbuffer
    }

    pub fn bind_composite_texture(&mut self, texture: TextureId, slot: u32) {
        bind_composite_texture(&mut *self.backend, texture, slot);
    }

    /// Ends the pass. Dropping the guard does the same.
    pub fn end(mut self) {
        self.finish();
    }

    fn finish(&mut self) {
        if !self.finished {
            self.finished = true;
            leave(&mut *self.backend);
        }
    }
}

impl<B: RenderBackend + ?Sized> Drop for DeferredPass<'_, B> {
    fn drop(&mut self) {
        self.finish();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PassState {
    #[default]
    Idle,
    InPass {
        framebuffer: FramebufferId,
    },
}

/// Explicit begin/end tracking. Misuse is rejected without touching the
/// backend: beginning while any pass is open on the backend, or ending a
/// pass this mode did not open there.
#[derive(Debug, Default)]
pub struct DeferredMode {
    state: PassState,
}

impl DeferredMode {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> PassState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        matches!(self.state, PassState::InPass { .. })
    }

    pub fn begin<B: RenderBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        gbuffer: &GBuffer,
    ) -> Result<(), PassError> {
        if let PassState::InPass { framebuffer } = self.state {
            debug!("rejected nested deferred pass");
            return Err(PassError::AlreadyInPass(framebuffer));
        }
        ensure_idle(&*backend)?;
        enter(backend, gbuffer);
        self.state = PassState::InPass {
            framebuffer: gbuffer.framebuffer(),
        };
        Ok(())
    }

    pub fn end<B: RenderBackend + ?Sized>(&mut self, backend: &mut B) -> Result<(), PassError> {
        let PassState::InPass { framebuffer } = self.state else {
            debug!("rejected end of inactive deferred pass");
            return Err(PassError::NotInPass);
        };
        if backend.render_state().deferred_pass != Some(framebuffer) {
            debug!("rejected end of a pass this backend does not hold");
            return Err(PassError::NotInPass);
        }
        leave(backend);
        self.state = PassState::Idle;
        Ok(())
    }
}
