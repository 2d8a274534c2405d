pub mod backend;
pub mod composite;
pub mod deferred;
pub mod gbuffer;
pub mod headless;
pub mod mesh;
pub mod pipeline_builder;
pub mod pipelines;
pub mod texture;
pub mod vertex;
pub mod wgpu_backend;

pub use backend::{
    AttachmentFormat, AttachmentPoint, FramebufferId, FramebufferStatus, RenderBackend,
    RenderState, RowOrder, TextureId, Viewport,
};
pub use composite::{bind_gbuffer_for_composite, SourceRect};
pub use deferred::{bind_composite_texture, DeferredMode, DeferredPass, PassError, PassState};
pub use gbuffer::{GBuffer, GBufferError};
pub use headless::HeadlessBackend;
pub use mesh::GpuMesh;
pub use pipeline_builder::PipelineBuilder;
pub use pipelines::{CompositePipeline, GeometryPipeline};
pub use texture::{Texture, TextureError};
pub use vertex::Vertex;
pub use wgpu_backend::WgpuBackend;
