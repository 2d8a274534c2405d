//! Deferred G-buffer rendering and model import on top of a pluggable
//! render backend.
//!
//! [`renderer::GBuffer`] owns the offscreen targets, [`renderer::DeferredPass`]
//! redirects drawing into them and [`renderer::composite`] binds them for the
//! lighting shader. [`model::ModelImporter`] turns asset files into meshes and
//! materials whose textures live on the same backend.

pub mod model;
pub mod renderer;
pub mod settings;

pub use model::{load_model, try_load_model, unload_model, ImportError, ImportedModel, ModelImporter};
pub use renderer::{
    DeferredMode, DeferredPass, GBuffer, GBufferError, HeadlessBackend, RenderBackend,
};
pub use settings::{FailurePolicy, ImportSettings, Settings};

/// Installs `env_logger` at `info` unless `RUST_LOG` says otherwise. Safe to
/// call more than once.
pub fn init_logging() {
    let _ = env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .try_init();
}
