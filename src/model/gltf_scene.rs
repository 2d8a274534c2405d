// src/model/gltf_scene.rs

//! glTF 2.0 front-end producing a [`SourceScene`].
//!
//! Images stored in buffer views or `data:` URIs go into the embedded
//! texture table as compressed blobs and are referenced as `"*N"`; every
//! other image URI is percent-decoded and passed through as a relative path.
//! Each triangle primitive becomes one source mesh; line and point
//! primitives are skipped.

use std::ops::Range;
use std::path::Path;

use glam::{Mat4, Vec2, Vec3, Vec4};
use log::{debug, trace, warn};

use crate::model::importer::ImportError;
use crate::model::scene::{
    EmbeddedTexture, SourceMaterial, SourceMesh, SourceNode, SourceScene, TextureSemantic,
};
use crate::model::texture_ref::EMBEDDED_PREFIX;

fn parse_error(path: &Path, source: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> ImportError {
    ImportError::Parse {
        path: path.to_path_buf(),
        source: source.into(),
    }
}

/// Parses a `.gltf` or `.glb` file.
pub fn read_scene(path: &Path) -> Result<SourceScene, ImportError> {
    debug!("Reading glTF scene {:?}", path);
    let gltf::Gltf { document, blob } = gltf::Gltf::open(path).map_err(|e| parse_error(path, e))?;
    let base_dir = path.parent().unwrap_or_else(|| Path::new("")).to_path_buf();
    let buffers = gltf::import_buffers(&document, Some(base_dir.as_path()), blob)
        .map_err(|e| parse_error(path, e))?;

    let mut scene = SourceScene {
        base_dir,
        ..Default::default()
    };

    let image_refs = read_images(&document, &buffers, &mut scene.textures, path)?;
    scene.materials = document
        .materials()
        .map(|material| read_material(&material, &image_refs))
        .collect();

    let mut primitive_ranges = Vec::with_capacity(document.meshes().len());
    for mesh in document.meshes() {
        let start = scene.meshes.len();
        for primitive in mesh.primitives() {
            if let Some(source) = read_primitive(&mesh, &primitive, &buffers, path)? {
                scene.meshes.push(source);
            }
        }
        primitive_ranges.push(start..scene.meshes.len());
    }

    let root_nodes: Vec<gltf::Node> = match document.default_scene().or_else(|| document.scenes().next()) {
        Some(gltf_scene) => gltf_scene.nodes().collect(),
        None => Vec::new(),
    };
    scene.root = SourceNode {
        name: Some(String::from("root")),
        children: root_nodes
            .iter()
            .map(|node| read_node(node, &primitive_ranges))
            .collect(),
        ..Default::default()
    };

    debug!(
        "glTF scene: {} meshes, {} materials, {} embedded textures",
        scene.meshes.len(),
        scene.materials.len(),
        scene.textures.len()
    );
    Ok(scene)
}

/// Returns the texture reference string for every image in the document.
fn read_images(
    document: &gltf::Document,
    buffers: &[gltf::buffer::Data],
    embedded: &mut Vec<EmbeddedTexture>,
    path: &Path,
) -> Result<Vec<String>, ImportError> {
    let mut refs = Vec::with_capacity(document.images().len());

    for image in document.images() {
        let reference = match image.source() {
            gltf::image::Source::View { view, mime_type } => {
                let buffer = &buffers[view.buffer().index()];
                let range = view.offset()..view.offset() + view.length();
                let bytes = buffer.0.get(range).ok_or_else(|| {
                    parse_error(path, format!("image {} view is out of bounds", image.index()))
                })?;
                push_embedded(embedded, bytes.to_vec(), mime_type)
            }
            gltf::image::Source::Uri { uri, mime_type } => match uri.strip_prefix("data:") {
                Some(rest) => {
                    let (header, encoded) = rest.split_once(',').ok_or_else(|| {
                        parse_error(path, format!("malformed data URI in image {}", image.index()))
                    })?;
                    let bytes = base64::decode(encoded).map_err(|e| parse_error(path, e))?;
                    let hint = mime_type.unwrap_or_else(|| header.trim_end_matches(";base64"));
                    push_embedded(embedded, bytes, hint)
                }
                None => external_reference(uri),
            },
        };
        trace!("  image {} -> {}", image.index(), reference);
        refs.push(reference);
    }

    Ok(refs)
}

/// Percent-decodes a relative image URI. A decoded name that starts like an
/// embedded reference is prefixed with `./` so it still resolves as a file.
fn external_reference(uri: &str) -> String {
    let decoded = match urlencoding::decode(uri) {
        Ok(decoded) => decoded.into_owned(),
        Err(err) => {
            warn!("image URI {:?} does not decode to UTF-8 ({}), using it as written", uri, err);
            uri.to_owned()
        }
    };
    if decoded.starts_with(EMBEDDED_PREFIX) {
        format!("./{decoded}")
    } else {
        decoded
    }
}

fn push_embedded(embedded: &mut Vec<EmbeddedTexture>, bytes: Vec<u8>, mime_type: &str) -> String {
    let hint = mime_type.rsplit('/').next().unwrap_or(mime_type);
    embedded.push(EmbeddedTexture::compressed(bytes, hint));
    format!("*{}", embedded.len() - 1)
}

fn read_material(material: &gltf::Material, image_refs: &[String]) -> SourceMaterial {
    let mut source = SourceMaterial {
        name: material.name().map(str::to_owned),
        ..Default::default()
    };
    let pbr = material.pbr_metallic_roughness();
    source.diffuse_color = Some(pbr.base_color_factor());

    let reference = |texture: gltf::Texture| image_refs.get(texture.source().index()).cloned();
    let mut add = |semantics: &[TextureSemantic], texture: Option<gltf::Texture>| {
        let Some(reference) = texture.and_then(reference) else {
            return;
        };
        for semantic in semantics {
            source.add_texture(*semantic, reference.clone());
        }
    };

    add(
        &[TextureSemantic::Diffuse, TextureSemantic::BaseColor],
        pbr.base_color_texture().map(|info| info.texture()),
    );
    add(
        &[TextureSemantic::Metalness, TextureSemantic::DiffuseRoughness],
        pbr.metallic_roughness_texture().map(|info| info.texture()),
    );
    add(
        &[TextureSemantic::Normals],
        material.normal_texture().map(|info| info.texture()),
    );
    add(
        &[TextureSemantic::Lightmap],
        material.occlusion_texture().map(|info| info.texture()),
    );
    add(
        &[TextureSemantic::Emissive],
        material.emissive_texture().map(|info| info.texture()),
    );

    source
}

fn read_primitive(
    mesh: &gltf::Mesh,
    primitive: &gltf::Primitive,
    buffers: &[gltf::buffer::Data],
    path: &Path,
) -> Result<Option<SourceMesh>, ImportError> {
    let Some(assemble) = face_assembler(primitive.mode()) else {
        warn!(
            "mesh {} primitive {} uses {:?} topology, only triangles are imported",
            mesh.index(),
            primitive.index(),
            primitive.mode()
        );
        return Ok(None);
    };
    let reader = primitive.reader(|buffer| buffers.get(buffer.index()).map(|data| &data.0[..]));

    let positions: Vec<Vec3> = reader
        .read_positions()
        .ok_or_else(|| {
            parse_error(
                path,
                format!("mesh {} primitive {} has no positions", mesh.index(), primitive.index()),
            )
        })?
        .map(Vec3::from)
        .collect();

    let normals = reader
        .read_normals()
        .map(|iter| iter.map(Vec3::from).collect());
    let tex_coords = [0, 1].map(|set| {
        reader
            .read_tex_coords(set)
            .map(|iter| iter.into_f32().map(Vec2::from).collect())
    });
    let tangents = reader
        .read_tangents()
        .map(|iter| iter.map(|t| Vec3::new(t[0], t[1], t[2])).collect());
    let colors = reader
        .read_colors(0)
        .map(|iter| iter.into_rgba_f32().map(Vec4::from).collect());

    let indices: Vec<u32> = match reader.read_indices() {
        Some(indices) => indices.into_u32().collect(),
        None => (0..positions.len() as u32).collect(),
    };
    let faces = assemble(&indices);

    trace!(
        "  primitive {}/{}: {} vertices, {} faces",
        mesh.index(),
        primitive.index(),
        positions.len(),
        faces.len()
    );

    Ok(Some(SourceMesh {
        name: mesh.name().map(str::to_owned),
        positions,
        normals,
        tex_coords,
        tangents,
        colors,
        faces,
        material_index: primitive.material().index(),
    }))
}

type FaceAssembler = fn(&[u32]) -> Vec<Vec<u32>>;

/// How an index stream splits into triangles, or `None` for line and point
/// topologies.
fn face_assembler(mode: gltf::mesh::Mode) -> Option<FaceAssembler> {
    use gltf::mesh::Mode;

    match mode {
        Mode::Triangles => Some(triangle_list),
        Mode::TriangleStrip => Some(triangle_strip),
        Mode::TriangleFan => Some(triangle_fan),
        Mode::Points | Mode::Lines | Mode::LineLoop | Mode::LineStrip => None,
    }
}

fn triangle_list(indices: &[u32]) -> Vec<Vec<u32>> {
    indices.chunks_exact(3).map(<[u32]>::to_vec).collect()
}

fn triangle_strip(indices: &[u32]) -> Vec<Vec<u32>> {
    indices
        .windows(3)
        .enumerate()
        .map(|(i, w)| {
            if i % 2 == 0 {
                vec![w[0], w[1], w[2]]
            } else {
                vec![w[1], w[0], w[2]]
            }
        })
        .collect()
}

fn triangle_fan(indices: &[u32]) -> Vec<Vec<u32>> {
    match indices.split_first() {
        Some((&center, rest)) => rest.windows(2).map(|w| vec![center, w[0], w[1]]).collect(),
        None => Vec::new(),
    }
}

fn read_node(node: &gltf::Node, primitive_ranges: &[Range<usize>]) -> SourceNode {
    let meshes = match node.mesh() {
        Some(mesh) => match primitive_ranges.get(mesh.index()) {
            Some(range) => range.clone().collect(),
            None => {
                warn!("node {} refers to missing mesh {}", node.index(), mesh.index());
                Vec::new()
            }
        },
        None => Vec::new(),
    };

    SourceNode {
        name: node.name().map(str::to_owned),
        transform: Mat4::from_cols_array_2d(&node.transform().matrix()),
        meshes,
        children: node
            .children()
            .map(|child| read_node(&child, primitive_ranges))
            .collect(),
    }
}
