// src/model/importer.rs

//! Translates a parsed scene graph into an [`ImportedModel`]: flat meshes,
//! materials with four texture slots and a mesh to material map.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use glam::{Mat4, Vec4};
use log::{debug, info, warn};

use crate::model::material::{MapSlot, Material};
use crate::model::mesh::{Mesh, MeshError};
use crate::model::scene::{SourceMesh, SourceScene, TextureSemantic};
use crate::model::texture_ref::resolve_texture;
use crate::renderer::backend::{RenderBackend, TextureId};
use crate::renderer::texture::TextureError;
use crate::settings::{FailurePolicy, ImportSettings};

/// Slot, primary semantic, fallback semantic used when the primary declares
/// no texture.
const SLOT_SEMANTICS: [(MapSlot, TextureSemantic, TextureSemantic); 4] = [
    (MapSlot::Albedo, TextureSemantic::Diffuse, TextureSemantic::BaseColor),
    (MapSlot::Normal, TextureSemantic::Normals, TextureSemantic::NormalCamera),
    (MapSlot::Metalness, TextureSemantic::Ambient, TextureSemantic::Metalness),
    (MapSlot::Roughness, TextureSemantic::Shininess, TextureSemantic::DiffuseRoughness),
];

#[derive(Debug, thiserror::Error)]
pub enum ImportError {
    #[error("unable to load model {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    #[error("model import support is not compiled in ({0:?})")]
    Unsupported(PathBuf),
    #[error("mesh {index}: {source}")]
    Mesh {
        index: usize,
        #[source]
        source: MeshError,
    },
    #[error("material {material} {slot:?} texture {reference:?}: {source}")]
    Texture {
        material: usize,
        slot: MapSlot,
        reference: String,
        #[source]
        source: TextureError,
    },
    #[error("mesh {mesh} refers to material {index} but the model has {count}")]
    MaterialIndex {
        mesh: usize,
        index: usize,
        count: usize,
    },
}

/// A model owned by the caller. Its textures live on the backend that
/// imported it and are released by [`ImportedModel::unload`].
#[derive(Debug)]
pub struct ImportedModel {
    pub transform: Mat4,
    pub meshes: Vec<Mesh>,
    pub materials: Vec<Material>,
    /// Material index for each mesh, same length as `meshes`.
    pub mesh_material: Vec<usize>,
    /// Every step that degraded to a default during a lenient import.
    pub issues: Vec<ImportError>,
}

impl Default for ImportedModel {
    fn default() -> Self {
        Self::empty()
    }
}

impl ImportedModel {
    pub fn empty() -> Self {
        Self {
            transform: Mat4::IDENTITY,
            meshes: Vec::new(),
            materials: Vec::new(),
            mesh_material: Vec::new(),
            issues: Vec::new(),
        }
    }

    /// True when loading failed or the file held no meshes.
    pub fn is_empty(&self) -> bool {
        self.meshes.is_empty()
    }

    pub fn material_for(&self, mesh: usize) -> Option<&Material> {
        self.mesh_material
            .get(mesh)
            .and_then(|&index| self.materials.get(index))
    }

    /// Distinct textures referenced by the materials.
    pub fn textures(&self) -> BTreeSet<TextureId> {
        self.materials.iter().flat_map(Material::textures).collect()
    }

    /// Releases every texture exactly once, even when shared by materials.
    pub fn unload<B: RenderBackend + ?Sized>(self, backend: &mut B) {
        let textures = self.textures();
        for texture in &textures {
            backend.delete_texture(*texture);
        }
        debug!(
            "Unloaded model: {} meshes, {} textures",
            self.meshes.len(),
            textures.len()
        );
    }
}

#[derive(Debug, Clone, Default)]
pub struct ModelImporter {
    settings: ImportSettings,
}

impl ModelImporter {
    pub fn new(settings: ImportSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &ImportSettings {
        &self.settings
    }

    /// Loads a model file. Never fails: a file that cannot be parsed yields an
    /// empty model, any other problem is recorded in `issues`.
    pub fn load<B: RenderBackend + ?Sized>(&self, backend: &mut B, path: impl AsRef<Path>) -> ImportedModel {
        let path = path.as_ref();
        match parse_scene(path) {
            Ok(scene) => self.from_scene(backend, &scene),
            Err(err) => {
                warn!("{}", err);
                ImportedModel::empty()
            }
        }
    }

    /// Loads a model file, failing on the first problem. Textures uploaded
    /// before the failure are released.
    pub fn try_load<B: RenderBackend + ?Sized>(
        &self,
        backend: &mut B,
        path: impl AsRef<Path>,
    ) -> Result<ImportedModel, ImportError> {
        let scene = parse_scene(path.as_ref())?;
        self.try_from_scene(backend, &scene)
    }

    pub fn load_with_policy<B: RenderBackend + ?Sized>(
        &self,
        backend: &mut B,
        path: impl AsRef<Path>,
        policy: FailurePolicy,
    ) -> Result<ImportedModel, ImportError> {
        match policy {
            FailurePolicy::Degrade => Ok(self.load(backend, path)),
            FailurePolicy::Strict => self.try_load(backend, path),
        }
    }

    pub fn from_scene<B: RenderBackend + ?Sized>(&self, backend: &mut B, scene: &SourceScene) -> ImportedModel {
        let mut issues = Vec::new();
        let mut model = self.translate(backend, scene, &mut |err: ImportError| {
            warn!("{}", err);
            issues.push(err);
            Ok(())
        });
        model.issues = issues;
        model
    }

    pub fn try_from_scene<B: RenderBackend + ?Sized>(
        &self,
        backend: &mut B,
        scene: &SourceScene,
    ) -> Result<ImportedModel, ImportError> {
        let mut failure = None;
        let model = self.translate(backend, scene, &mut |err: ImportError| {
            failure = Some(err);
            Err(())
        });
        match failure {
            Some(err) => {
                model.unload(backend);
                Err(err)
            }
            None => Ok(model),
        }
    }

    /// Builds the model, handing every problem to `report`. When `report`
    /// returns `Err` translation stops and the partial model is returned.
    fn translate<B: RenderBackend + ?Sized>(
        &self,
        backend: &mut B,
        scene: &SourceScene,
        report: &mut dyn FnMut(ImportError) -> Result<(), ()>,
    ) -> ImportedModel {
        let mut model = ImportedModel::empty();
        let mut cache: HashMap<&str, TextureId> = HashMap::new();

        for (index, source) in scene.materials.iter().enumerate() {
            let mut material = Material::with_name(source.name.clone());
            if let Some(color) = source.diffuse_color {
                material.map_mut(MapSlot::Albedo).color = color_to_bytes(Vec4::from(color));
            }

            for (slot, primary, fallback) in SLOT_SEMANTICS {
                let semantic = if source.texture_count(primary) > 0 {
                    primary
                } else if source.texture_count(fallback) > 0 {
                    fallback
                } else {
                    continue;
                };
                let Some(reference) = source.texture(semantic, 0) else {
                    continue;
                };

                if let Some(&texture) = cache.get(reference) {
                    material.set_texture(slot, texture);
                    continue;
                }
                match resolve_texture(backend, scene, reference) {
                    Ok(texture) => {
                        cache.insert(reference, texture);
                        material.set_texture(slot, texture);
                    }
                    Err(source) => {
                        let err = ImportError::Texture {
                            material: index,
                            slot,
                            reference: reference.to_owned(),
                            source,
                        };
                        if report(err).is_err() {
                            model.materials.push(material);
                            return model;
                        }
                    }
                }
            }
            model.materials.push(material);
        }

        if model.materials.is_empty() {
            model.materials.push(Material::default());
        }

        for (index, source) in scene.meshes.iter().enumerate() {
            let transform = if self.settings.apply_node_transforms {
                scene.mesh_transform(index)
            } else {
                None
            };

            match convert_mesh(source, transform, self.settings.flip_uvs) {
                Ok(mesh) => model.meshes.push(mesh),
                Err(source) => {
                    if report(ImportError::Mesh { index, source }).is_err() {
                        return model;
                    }
                    // Keep indices aligned with the source.
                    model.meshes.push(Mesh::default());
                }
            }

            let material = source.material_index.unwrap_or(0);
            if material < model.materials.len() {
                model.mesh_material.push(material);
            } else {
                let err = ImportError::MaterialIndex {
                    mesh: index,
                    index: material,
                    count: model.materials.len(),
                };
                model.mesh_material.push(0);
                if report(err).is_err() {
                    return model;
                }
            }
        }

        info!(
            "Imported model: {} meshes, {} materials, {} textures",
            model.meshes.len(),
            model.materials.len(),
            cache.len()
        );
        model
    }
}

fn convert_mesh(source: &SourceMesh, transform: Option<Mat4>, flip_uvs: bool) -> Result<Mesh, MeshError> {
    let mut builder = Mesh::builder(source.positions.iter().map(|p| p.to_array()).collect())
        .faces(&source.faces);

    match &source.normals {
        Some(normals) => builder = builder.normals(normals.iter().map(|n| n.to_array()).collect()),
        None => debug!("mesh {:?} has no normals, defaulting to +Y", source.name),
    }

    let uvs = |channel: &[glam::Vec2]| -> Vec<[f32; 2]> {
        channel
            .iter()
            .map(|uv| if flip_uvs { [uv.x, 1.0 - uv.y] } else { uv.to_array() })
            .collect()
    };
    if let Some(channel) = &source.tex_coords[0] {
        builder = builder.uv0(uvs(channel));
    }
    if let Some(channel) = &source.tex_coords[1] {
        builder = builder.uv1(uvs(channel));
    }
    if let Some(tangents) = &source.tangents {
        builder = builder.tangents(tangents.iter().map(|t| [t.x, t.y, t.z, 0.0]).collect());
    }
    if let Some(colors) = &source.colors {
        builder = builder.colors(colors.iter().map(|c| color_to_bytes(*c)).collect());
    }

    let mut mesh = builder.build()?;
    if let Some(transform) = transform {
        mesh.transform(transform);
    }
    Ok(mesh)
}

/// Float color to bytes, clamped to 0..=1 and rounded.
fn color_to_bytes(color: Vec4) -> [u8; 4] {
    let scaled = (color.clamp(Vec4::ZERO, Vec4::ONE) * 255.0).round();
    [scaled.x as u8, scaled.y as u8, scaled.z as u8, scaled.w as u8]
}

#[cfg(feature = "import")]
fn parse_scene(path: &Path) -> Result<SourceScene, ImportError> {
    crate::model::gltf_scene::read_scene(path)
}

#[cfg(not(feature = "import"))]
fn parse_scene(path: &Path) -> Result<SourceScene, ImportError> {
    Err(ImportError::Unsupported(path.to_path_buf()))
}

/// Loads with default settings, degrading on failure.
pub fn load_model<B: RenderBackend + ?Sized>(backend: &mut B, path: impl AsRef<Path>) -> ImportedModel {
    ModelImporter::default().load(backend, path)
}

pub fn try_load_model<B: RenderBackend + ?Sized>(
    backend: &mut B,
    path: impl AsRef<Path>,
) -> Result<ImportedModel, ImportError> {
    ModelImporter::default().try_load(backend, path)
}

pub fn unload_model<B: RenderBackend + ?Sized>(backend: &mut B, model: ImportedModel) {
    model.unload(backend);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::scene::{EmbeddedTexture, SourceMaterial, SourceNode};
    use crate::renderer::headless::HeadlessBackend;
    use glam::{Vec2, Vec3};
    use std::io::Cursor;

    fn png(pixel: [u8; 4]) -> EmbeddedTexture {
        let image = image::RgbaImage::from_pixel(2, 2, image::Rgba(pixel));
        let mut bytes = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();
        EmbeddedTexture::compressed(bytes, "png")
    }

    fn triangle() -> SourceMesh {
        SourceMesh {
            positions: vec![Vec3::ZERO, Vec3::X, Vec3::Y],
            normals: Some(vec![Vec3::Z; 3]),
            faces: vec![vec![0, 1, 2]],
            ..Default::default()
        }
    }

    #[test]
    fn color_conversion_clamps_and_rounds() {
        assert_eq!(
            color_to_bytes(Vec4::new(1.5, -0.2, 0.5, 1.0)),
            [255, 0, 128, 255]
        );
    }

    #[test]
    fn mesh_without_material_index_maps_to_zero() {
        let mut backend = HeadlessBackend::new(1, 1);
        let scene = SourceScene {
            meshes: vec![triangle()],
            ..Default::default()
        };
        let model = ModelImporter::default().from_scene(&mut backend, &scene);
        assert_eq!(model.mesh_material, vec![0]);
        assert_eq!(model.materials.len(), 1);
        assert!(model.issues.is_empty());
    }

    #[test]
    fn optional_channels_follow_the_source() {
        let mut backend = HeadlessBackend::new(1, 1);
        let mut mesh = triangle();
        mesh.tex_coords[0] = Some(vec![Vec2::ZERO, Vec2::X, Vec2::Y]);
        mesh.tangents = Some(vec![Vec3::X; 3]);
        mesh.colors = Some(vec![Vec4::new(1.0, 0.0, 0.0, 1.0); 3]);
        let scene = SourceScene {
            meshes: vec![mesh],
            ..Default::default()
        };

        let model = ModelImporter::default().from_scene(&mut backend, &scene);
        let mesh = &model.meshes[0];
        assert!(mesh.uv0().is_some());
        assert!(mesh.uv1().is_none());
        assert_eq!(mesh.tangents().unwrap().get(0), Some([1.0, 0.0, 0.0, 0.0]));
        assert_eq!(mesh.colors().unwrap().get(2), Some([255, 0, 0, 255]));
        assert_eq!(mesh.triangle_count(), 1);
    }

    #[test]
    fn slots_fall_back_to_pbr_semantics() {
        let mut backend = HeadlessBackend::new(1, 1);
        let mut material = SourceMaterial::default();
        material.add_texture(TextureSemantic::BaseColor, "*0");
        material.add_texture(TextureSemantic::DiffuseRoughness, "*1");
        let scene = SourceScene {
            meshes: vec![triangle()],
            materials: vec![material],
            textures: vec![png([255, 0, 0, 255]), png([0, 255, 0, 255])],
            ..Default::default()
        };

        let model = ModelImporter::default().from_scene(&mut backend, &scene);
        let material = &model.materials[0];
        assert!(material.texture(MapSlot::Albedo).is_some());
        assert!(material.texture(MapSlot::Roughness).is_some());
        assert!(material.texture(MapSlot::Normal).is_none());
        assert!(material.texture(MapSlot::Metalness).is_none());
    }

    #[test]
    fn primary_semantic_wins_over_fallback() {
        let mut backend = HeadlessBackend::new(1, 1);
        let mut material = SourceMaterial::default();
        material.add_texture(TextureSemantic::BaseColor, "*1");
        material.add_texture(TextureSemantic::Diffuse, "*0");
        let scene = SourceScene {
            materials: vec![material],
            textures: vec![png([1, 1, 1, 255]), png([2, 2, 2, 255])],
            ..Default::default()
        };

        let model = ModelImporter::default().from_scene(&mut backend, &scene);
        let albedo = model.materials[0].texture(MapSlot::Albedo).unwrap();
        assert_eq!(
            backend.texture(albedo).unwrap().label.as_deref(),
            Some("*0")
        );
    }

    #[test]
    fn shared_reference_is_uploaded_once_and_released_once() {
        let mut backend = HeadlessBackend::new(1, 1);
        let mut first = SourceMaterial::default();
        first.add_texture(TextureSemantic::Diffuse, "*0");
        let mut second = SourceMaterial::default();
        second.add_texture(TextureSemantic::Diffuse, "*0");
        second.add_texture(TextureSemantic::Normals, "*0");
        let scene = SourceScene {
            materials: vec![first, second],
            textures: vec![png([9, 9, 9, 255])],
            ..Default::default()
        };

        let model = ModelImporter::default().from_scene(&mut backend, &scene);
        assert_eq!(backend.uploads(), 1);
        assert_eq!(model.textures().len(), 1);

        unload_model(&mut backend, model);
        assert_eq!(backend.live_textures(), 0);
        assert_eq!(backend.invalid_deletes(), 0);
    }

    #[test]
    fn bad_texture_degrades_to_default_slot() {
        let mut backend = HeadlessBackend::new(1, 1);
        let mut material = SourceMaterial::default();
        material.add_texture(TextureSemantic::Diffuse, "*7");
        material.add_texture(TextureSemantic::Normals, "*0");
        let scene = SourceScene {
            meshes: vec![triangle()],
            materials: vec![material],
            textures: vec![png([0, 0, 255, 255])],
            ..Default::default()
        };

        let model = ModelImporter::default().from_scene(&mut backend, &scene);
        assert_eq!(model.materials[0].texture(MapSlot::Albedo), None);
        assert!(model.materials[0].texture(MapSlot::Normal).is_some());
        assert_eq!(model.issues.len(), 1);
        assert!(matches!(
            model.issues[0],
            ImportError::Texture {
                material: 0,
                slot: MapSlot::Albedo,
                ..
            }
        ));
    }

    #[test]
    fn strict_import_releases_textures_on_failure() {
        let mut backend = HeadlessBackend::new(1, 1);
        let mut material = SourceMaterial::default();
        material.add_texture(TextureSemantic::Diffuse, "*0");
        material.add_texture(TextureSemantic::Normals, "*x");
        let scene = SourceScene {
            materials: vec![material],
            textures: vec![png([0, 0, 0, 255])],
            ..Default::default()
        };

        let err = ModelImporter::default()
            .try_from_scene(&mut backend, &scene)
            .unwrap_err();
        assert!(matches!(
            err,
            ImportError::Texture {
                source: TextureError::InvalidReference(_),
                ..
            }
        ));
        assert_eq!(backend.live_textures(), 0);
    }

    #[test]
    fn malformed_mesh_keeps_indices_aligned() {
        let mut backend = HeadlessBackend::new(1, 1);
        let mut broken = triangle();
        broken.normals = Some(vec![Vec3::Z]);
        let scene = SourceScene {
            meshes: vec![broken, triangle()],
            ..Default::default()
        };

        let model = ModelImporter::default().from_scene(&mut backend, &scene);
        assert_eq!(model.meshes.len(), 2);
        assert_eq!(model.meshes[0].vertex_count(), 0);
        assert_eq!(model.meshes[1].vertex_count(), 3);
        assert_eq!(model.mesh_material.len(), 2);
        assert!(matches!(model.issues[0], ImportError::Mesh { index: 0, .. }));
    }

    #[test]
    fn node_transform_is_applied_when_enabled() {
        let mut backend = HeadlessBackend::new(1, 1);
        let scene = SourceScene {
            meshes: vec![triangle()],
            root: SourceNode {
                transform: Mat4::from_translation(Vec3::new(0.0, 0.0, 2.0)),
                meshes: vec![0],
                ..Default::default()
            },
            ..Default::default()
        };

        let placed = ModelImporter::default().from_scene(&mut backend, &scene);
        assert_eq!(placed.meshes[0].positions().get(1), Some([1.0, 0.0, 2.0]));

        let raw = ModelImporter::new(ImportSettings {
            apply_node_transforms: false,
            ..Default::default()
        })
        .from_scene(&mut backend, &scene);
        assert_eq!(raw.meshes[0].positions().get(1), Some([1.0, 0.0, 0.0]));
        assert_eq!(raw.transform, Mat4::IDENTITY);
    }

    #[test]
    fn out_of_range_material_index_falls_back() {
        let mut backend = HeadlessBackend::new(1, 1);
        let mut mesh = triangle();
        mesh.material_index = Some(4);
        let scene = SourceScene {
            meshes: vec![mesh],
            ..Default::default()
        };
        let model = ModelImporter::default().from_scene(&mut backend, &scene);
        assert_eq!(model.mesh_material, vec![0]);
        assert!(matches!(
            model.issues[0],
            ImportError::MaterialIndex { mesh: 0, index: 4, count: 1 }
        ));
    }

    #[test]
    fn unreadable_file_yields_empty_model() {
        let mut backend = HeadlessBackend::new(1, 1);
        let model = load_model(&mut backend, "definitely/missing.gltf");
        assert!(model.is_empty());
        assert!(try_load_model(&mut backend, "definitely/missing.gltf").is_err());
    }
}
