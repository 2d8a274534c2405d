// src/model/texture_ref.rs

//! Texture resolution: turning a material's texture reference into a GPU
//! texture, either by loading a file or by decoding an embedded image.

use std::path::{Path, PathBuf};

use log::{debug, trace};

use crate::model::scene::{EmbeddedTexture, SourceScene};
use crate::renderer::backend::{RenderBackend, TextureId};
use crate::renderer::texture::TextureError;

/// Leading character of an embedded texture reference.
pub const EMBEDDED_PREFIX: char = '*';

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TextureRef {
    External(PathBuf),
    Embedded(usize),
}

impl TextureRef {
    pub fn parse(reference: &str) -> Result<Self, TextureError> {
        match reference.strip_prefix(EMBEDDED_PREFIX) {
            Some(index) => index
                .parse::<usize>()
                .map(TextureRef::Embedded)
                .map_err(|_| TextureError::InvalidReference(reference.to_owned())),
            None if reference.is_empty() => {
                Err(TextureError::InvalidReference(reference.to_owned()))
            }
            None => Ok(TextureRef::External(PathBuf::from(reference))),
        }
    }
}

/// Decodes an embedded texture to RGBA8.
pub fn decode_embedded(texture: &EmbeddedTexture) -> Result<image::RgbaImage, TextureError> {
    if texture.is_compressed() {
        let len = texture.width as usize;
        let bytes = texture.data.get(..len).ok_or(TextureError::Truncated {
            expected: len,
            found: texture.data.len(),
        })?;
        let decoded = image::load_from_memory(bytes)?.to_rgba8();
        if decoded.width() == 0 || decoded.height() == 0 {
            return Err(TextureError::Empty);
        }
        return Ok(decoded);
    }

    let (width, height) = (texture.width, texture.height);
    let expected = (width as usize)
        .checked_mul(height as usize)
        .and_then(|texels| texels.checked_mul(4))
        .ok_or(TextureError::SizeOverflow { width, height })?;
    let texels = texture.data.get(..expected).ok_or(TextureError::Truncated {
        expected,
        found: texture.data.len(),
    })?;

    let mut rgba = Vec::with_capacity(expected);
    for bgra in texels.chunks_exact(4) {
        rgba.extend_from_slice(&[bgra[2], bgra[1], bgra[0], bgra[3]]);
    }
    image::RgbaImage::from_raw(width, height, rgba).ok_or(TextureError::Truncated {
        expected,
        found: texture.data.len(),
    })
}

/// Path an external reference is loaded from: relative to `base_dir` when
/// that file exists, otherwise the reference as written.
pub fn resolve_external(base_dir: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    let candidate = base_dir.join(path);
    if candidate.exists() {
        candidate
    } else {
        path.to_path_buf()
    }
}

/// Resolves `reference` to a texture owned by `backend`.
pub fn resolve_texture<B: RenderBackend + ?Sized>(
    backend: &mut B,
    scene: &SourceScene,
    reference: &str,
) -> Result<TextureId, TextureError> {
    match TextureRef::parse(reference)? {
        TextureRef::External(path) => {
            let path = resolve_external(&scene.base_dir, &path);
            debug!("loading external texture {:?}", path);
            backend.load_texture(&path)
        }
        TextureRef::Embedded(index) => {
            let texture = scene
                .embedded_texture(index)
                .ok_or(TextureError::MissingEmbedded {
                    index,
                    available: scene.textures.len(),
                })?;
            trace!(
                "decoding embedded texture {} ({}, {} bytes)",
                index,
                texture.format_hint,
                texture.data.len()
            );
            let image = decode_embedded(texture)?;
            let label = format!("{EMBEDDED_PREFIX}{index}");
            backend.upload_rgba8(&image, Some(&label))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::headless::HeadlessBackend;
    use std::io::Cursor;

    fn png_bytes(width: u32, height: u32, pixel: [u8; 4]) -> Vec<u8> {
        let image = image::RgbaImage::from_pixel(width, height, image::Rgba(pixel));
        let mut bytes = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();
        bytes
    }

    #[test]
    fn parse_distinguishes_embedded_and_external() {
        assert_eq!(TextureRef::parse("*3").unwrap(), TextureRef::Embedded(3));
        assert_eq!(
            TextureRef::parse("textures/albedo.png").unwrap(),
            TextureRef::External(PathBuf::from("textures/albedo.png"))
        );
    }

    #[test]
    fn malformed_embedded_index_is_an_error() {
        for reference in ["*", "*x", "*-1", "*1.5", ""] {
            assert!(
                matches!(
                    TextureRef::parse(reference),
                    Err(TextureError::InvalidReference(_))
                ),
                "{reference:?} should be rejected"
            );
        }
    }

    #[test]
    fn compressed_blob_decodes_by_length() {
        let mut data = png_bytes(3, 2, [10, 20, 30, 255]);
        let len = data.len();
        // Trailing bytes past the declared length are ignored.
        data.extend_from_slice(&[0xde, 0xad]);
        let texture = EmbeddedTexture {
            width: len as u32,
            height: 0,
            format_hint: "png".into(),
            data,
        };
        let image = decode_embedded(&texture).unwrap();
        assert_eq!(image.dimensions(), (3, 2));
        assert_eq!(image.get_pixel(0, 0).0, [10, 20, 30, 255]);
    }

    #[test]
    fn corrupt_compressed_blob_fails() {
        let texture = EmbeddedTexture::compressed(vec![1, 2, 3, 4, 5], "png");
        assert!(matches!(
            decode_embedded(&texture),
            Err(TextureError::Decode(_))
        ));
    }

    #[test]
    fn raw_texels_are_swizzled_from_bgra() {
        let texture = EmbeddedTexture::raw_bgra(2, 1, vec![1, 2, 3, 4, 5, 6, 7, 8]);
        let image = decode_embedded(&texture).unwrap();
        assert_eq!(image.dimensions(), (2, 1));
        assert_eq!(image.get_pixel(0, 0).0, [3, 2, 1, 4]);
        assert_eq!(image.get_pixel(1, 0).0, [7, 6, 5, 8]);
    }

    #[test]
    fn short_raw_data_is_truncated() {
        let texture = EmbeddedTexture::raw_bgra(2, 2, vec![0; 8]);
        assert!(matches!(
            decode_embedded(&texture),
            Err(TextureError::Truncated {
                expected: 16,
                found: 8
            })
        ));
    }

    #[test]
    fn raw_size_overflow_is_an_error() {
        let texture = EmbeddedTexture::raw_bgra(1 << 31, 1 << 31, vec![0; 4]);
        assert!(matches!(
            decode_embedded(&texture),
            Err(TextureError::SizeOverflow {
                width: 0x8000_0000,
                height: 0x8000_0000
            })
        ));
    }

    #[test]
    fn missing_embedded_index_is_reported() {
        let mut backend = HeadlessBackend::new(1, 1);
        let scene = SourceScene::default();
        let err = resolve_texture(&mut backend, &scene, "*2").unwrap_err();
        assert!(matches!(
            err,
            TextureError::MissingEmbedded {
                index: 2,
                available: 0
            }
        ));
        assert_eq!(backend.live_textures(), 0);
    }

    #[test]
    fn embedded_reference_uploads_rgba() {
        let mut backend = HeadlessBackend::new(1, 1);
        let scene = SourceScene {
            textures: vec![EmbeddedTexture::compressed(png_bytes(4, 4, [0; 4]), "png")],
            ..Default::default()
        };
        let id = resolve_texture(&mut backend, &scene, "*0").unwrap();
        assert_eq!(backend.texture_size(id), Some((4, 4)));
    }

    #[test]
    fn raw_and_compressed_entries_resolve_from_one_table() {
        let mut backend = HeadlessBackend::new(1, 1);
        let scene = SourceScene {
            textures: vec![
                EmbeddedTexture::compressed(png_bytes(2, 2, [9, 8, 7, 255]), "png"),
                EmbeddedTexture::compressed(png_bytes(1, 1, [0; 4]), "png"),
                EmbeddedTexture::raw_bgra(1, 2, vec![10, 20, 30, 40, 50, 60, 70, 80]),
            ],
            ..Default::default()
        };

        let compressed = resolve_texture(&mut backend, &scene, "*0").unwrap();
        let raw = resolve_texture(&mut backend, &scene, "*2").unwrap();
        assert_ne!(compressed, raw);
        assert_eq!(backend.uploads(), 2);

        let raw = backend.texture(raw).unwrap();
        assert_eq!((raw.width, raw.height), (1, 2));
        assert_eq!(raw.texels, vec![30, 20, 10, 40, 70, 60, 50, 80]);
        assert_eq!(backend.texture_size(compressed), Some((2, 2)));
    }

    #[test]
    fn external_path_prefers_base_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.png"), png_bytes(1, 1, [0; 4])).unwrap();

        assert_eq!(
            resolve_external(dir.path(), Path::new("a.png")),
            dir.path().join("a.png")
        );
        assert_eq!(
            resolve_external(dir.path(), Path::new("b.png")),
            PathBuf::from("b.png")
        );
    }
}
