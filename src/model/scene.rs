// src/model/scene.rs

//! The parsed asset graph the importer consumes.
//!
//! Mirrors the shape of a general scene-import library: meshes with
//! optional channels, materials that list texture references per semantic,
//! a table of embedded textures addressed as `"*N"`, and a node hierarchy.

use std::collections::BTreeMap;
use std::path::PathBuf;

use glam::{Mat4, Vec2, Vec3, Vec4};

/// Texture semantics a material can declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TextureSemantic {
    Diffuse,
    Normals,
    Ambient,
    Shininess,
    BaseColor,
    NormalCamera,
    Metalness,
    DiffuseRoughness,
    Emissive,
    Lightmap,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceMaterial {
    pub name: Option<String>,
    pub textures: BTreeMap<TextureSemantic, Vec<String>>,
    pub diffuse_color: Option<[f32; 4]>,
}

impl SourceMaterial {
    pub fn add_texture(&mut self, semantic: TextureSemantic, reference: impl Into<String>) {
        self.textures
            .entry(semantic)
            .or_default()
            .push(reference.into());
    }

    pub fn texture_count(&self, semantic: TextureSemantic) -> usize {
        self.textures.get(&semantic).map_or(0, Vec::len)
    }

    pub fn texture(&self, semantic: TextureSemantic, index: usize) -> Option<&str> {
        self.textures
            .get(&semantic)
            .and_then(|refs| refs.get(index))
            .map(String::as_str)
    }
}

/// An image stored inside the asset file.
///
/// `height == 0` marks a compressed blob (PNG, JPEG, ...) whose byte length
/// is `width`. Otherwise `data` holds `width * height` BGRA texels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbeddedTexture {
    pub width: u32,
    pub height: u32,
    pub format_hint: String,
    pub data: Vec<u8>,
}

impl EmbeddedTexture {
    pub fn compressed(data: Vec<u8>, format_hint: impl Into<String>) -> Self {
        Self {
            width: data.len() as u32,
            height: 0,
            format_hint: format_hint.into(),
            data,
        }
    }

    pub fn raw_bgra(width: u32, height: u32, data: Vec<u8>) -> Self {
        Self {
            width,
            height,
            format_hint: String::from("bgra8888"),
            data,
        }
    }

    pub fn is_compressed(&self) -> bool {
        self.height == 0
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceMesh {
    pub name: Option<String>,
    pub positions: Vec<Vec3>,
    pub normals: Option<Vec<Vec3>>,
    pub tex_coords: [Option<Vec<Vec2>>; 2],
    pub tangents: Option<Vec<Vec3>>,
    pub colors: Option<Vec<Vec4>>,
    /// Index lists of any arity.
    pub faces: Vec<Vec<u32>>,
    pub material_index: Option<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SourceNode {
    pub name: Option<String>,
    pub transform: Mat4,
    pub meshes: Vec<usize>,
    pub children: Vec<SourceNode>,
}

impl Default for SourceNode {
    fn default() -> Self {
        Self {
            name: None,
            transform: Mat4::IDENTITY,
            meshes: Vec::new(),
            children: Vec::new(),
        }
    }
}

impl SourceNode {
    /// Global transform of the first node, depth first, that references
    /// `mesh`.
    pub fn find_mesh(&self, mesh: usize, parent: Mat4) -> Option<Mat4> {
        let global = parent * self.transform;
        if self.meshes.contains(&mesh) {
            return Some(global);
        }
        self.children
            .iter()
            .find_map(|child| child.find_mesh(mesh, global))
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceScene {
    pub meshes: Vec<SourceMesh>,
    pub materials: Vec<SourceMaterial>,
    pub textures: Vec<EmbeddedTexture>,
    pub root: SourceNode,
    /// Directory external texture paths are relative to.
    pub base_dir: PathBuf,
}

impl SourceScene {
    pub fn embedded_texture(&self, index: usize) -> Option<&EmbeddedTexture> {
        self.textures.get(index)
    }

    pub fn mesh_transform(&self, mesh: usize) -> Option<Mat4> {
        self.root.find_mesh(mesh, Mat4::IDENTITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn material_texture_queries() {
        let mut material = SourceMaterial::default();
        material.add_texture(TextureSemantic::Diffuse, "albedo.png");
        material.add_texture(TextureSemantic::Diffuse, "*0");

        assert_eq!(material.texture_count(TextureSemantic::Diffuse), 2);
        assert_eq!(material.texture_count(TextureSemantic::Normals), 0);
        assert_eq!(material.texture(TextureSemantic::Diffuse, 1), Some("*0"));
        assert_eq!(material.texture(TextureSemantic::Normals, 0), None);
    }

    #[test]
    fn compressed_blob_records_length_as_width() {
        let texture = EmbeddedTexture::compressed(vec![1, 2, 3], "png");
        assert!(texture.is_compressed());
        assert_eq!(texture.width, 3);
    }

    #[test]
    fn find_mesh_accumulates_parent_transforms() {
        let root = SourceNode {
            transform: Mat4::from_translation(Vec3::X),
            children: vec![
                SourceNode::default(),
                SourceNode {
                    transform: Mat4::from_translation(Vec3::Y),
                    meshes: vec![2],
                    ..Default::default()
                },
            ],
            ..Default::default()
        };

        let global = root.find_mesh(2, Mat4::IDENTITY).unwrap();
        assert_eq!(global.transform_point3(Vec3::ZERO), Vec3::new(1.0, 1.0, 0.0));
        assert_eq!(root.find_mesh(7, Mat4::IDENTITY), None);
    }
}
