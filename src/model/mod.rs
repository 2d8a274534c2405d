pub mod importer;
pub mod material;
pub mod mesh;
pub mod scene;
pub mod texture_ref;

#[cfg(feature = "import")]
pub mod gltf_scene;

pub use importer::{load_model, try_load_model, unload_model, ImportError, ImportedModel, ModelImporter};
pub use material::{MapSlot, Material, MaterialMap};
pub use mesh::{Mesh, MeshBuilder, MeshError, VertexChannels};
pub use scene::{EmbeddedTexture, SourceMaterial, SourceMesh, SourceNode, SourceScene, TextureSemantic};
pub use texture_ref::{resolve_texture, TextureRef};
