//! Builds small glTF files on disk for import tests.

#![allow(dead_code)]

use std::io::Cursor;
use std::path::PathBuf;

use serde_json::json;

pub const EXTERNAL_IMAGE: &str = "normal_ext.png";

pub fn png(width: u32, height: u32, pixel: [u8; 4]) -> Vec<u8> {
    let image = image::RgbaImage::from_pixel(width, height, image::Rgba(pixel));
    let mut bytes = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
        .unwrap();
    bytes
}

pub struct Fixture {
    pub dir: tempfile::TempDir,
    pub path: PathBuf,
    external_file: &'static str,
}

impl Fixture {
    pub fn external_image(&self) -> PathBuf {
        self.dir.path().join(self.external_file)
    }
}

pub struct FixtureOptions {
    /// Whether the external normal map is written next to the `.gltf`.
    pub write_external: bool,
    /// URI of the external image as it appears in the document.
    pub external_uri: &'static str,
    /// File name the external image is written under.
    pub external_file: &'static str,
    /// Adds a line-strip primitive to the triangle's mesh.
    pub line_primitive: bool,
}

impl Default for FixtureOptions {
    fn default() -> Self {
        Self {
            write_external: true,
            external_uri: EXTERNAL_IMAGE,
            external_file: EXTERNAL_IMAGE,
            line_primitive: false,
        }
    }
}

/// One triangle under a node translated to z = 5, with a material whose
/// base color is an embedded 2x2 PNG and whose normal map is an external
/// 4x4 PNG next to the `.gltf` file. `write_external` controls whether that
/// file exists.
pub fn triangle_gltf(write_external: bool) -> Fixture {
    gltf_with(FixtureOptions {
        write_external,
        ..Default::default()
    })
}

pub fn gltf_with(options: FixtureOptions) -> Fixture {
    let dir = tempfile::tempdir().unwrap();

    let mut buffer = Vec::new();
    for value in [0.0f32, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0] {
        buffer.extend_from_slice(&value.to_le_bytes());
    }
    for _ in 0..3 {
        for value in [0.0f32, 0.0, 1.0] {
            buffer.extend_from_slice(&value.to_le_bytes());
        }
    }
    for value in [0.0f32, 0.0, 1.0, 0.0, 0.0, 1.0] {
        buffer.extend_from_slice(&value.to_le_bytes());
    }
    for index in [0u16, 1, 2] {
        buffer.extend_from_slice(&index.to_le_bytes());
    }
    buffer.extend_from_slice(&[0, 0]);
    assert_eq!(buffer.len(), 104);

    let embedded = png(2, 2, [200, 100, 50, 255]);
    buffer.extend_from_slice(&embedded);

    let mut primitives = vec![json!({
        "attributes": { "POSITION": 0, "NORMAL": 1, "TEXCOORD_0": 2 },
        "indices": 3,
        "material": 0
    })];
    if options.line_primitive {
        primitives.push(json!({
            "attributes": { "POSITION": 0 },
            "indices": 3,
            "mode": 3
        }));
    }

    let document = json!({
        "asset": { "version": "2.0" },
        "scene": 0,
        "scenes": [{ "nodes": [0] }],
        "nodes": [{ "name": "Root", "translation": [0.0, 0.0, 5.0], "mesh": 0 }],
        "meshes": [{
            "name": "Triangle",
            "primitives": primitives
        }],
        "materials": [{
            "name": "Painted",
            "pbrMetallicRoughness": {
                "baseColorFactor": [1.0, 0.5, 0.25, 1.0],
                "baseColorTexture": { "index": 0 }
            },
            "normalTexture": { "index": 1 }
        }],
        "textures": [{ "source": 0 }, { "source": 1 }],
        "images": [
            { "bufferView": 4, "mimeType": "image/png" },
            { "uri": options.external_uri }
        ],
        "accessors": [
            { "bufferView": 0, "componentType": 5126, "count": 3, "type": "VEC3",
              "min": [0.0, 0.0, 0.0], "max": [1.0, 1.0, 0.0] },
            { "bufferView": 1, "componentType": 5126, "count": 3, "type": "VEC3" },
            { "bufferView": 2, "componentType": 5126, "count": 3, "type": "VEC2" },
            { "bufferView": 3, "componentType": 5123, "count": 3, "type": "SCALAR" }
        ],
        "bufferViews": [
            { "buffer": 0, "byteOffset": 0, "byteLength": 36, "target": 34962 },
            { "buffer": 0, "byteOffset": 36, "byteLength": 36, "target": 34962 },
            { "buffer": 0, "byteOffset": 72, "byteLength": 24, "target": 34962 },
            { "buffer": 0, "byteOffset": 96, "byteLength": 6, "target": 34963 },
            { "buffer": 0, "byteOffset": 104, "byteLength": embedded.len() }
        ],
        "buffers": [{
            "byteLength": buffer.len(),
            "uri": format!("data:application/octet-stream;base64,{}", base64::encode(&buffer))
        }]
    });

    let path = dir.path().join("triangle.gltf");
    std::fs::write(&path, serde_json::to_vec_pretty(&document).unwrap()).unwrap();
    if options.write_external {
        let external = dir.path().join(options.external_file);
        std::fs::write(external, png(4, 4, [128, 128, 255, 255])).unwrap();
    }

    Fixture {
        dir,
        path,
        external_file: options.external_file,
    }
}
