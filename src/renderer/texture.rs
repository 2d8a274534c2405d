// src/renderer/texture.rs

use std::path::{Path, PathBuf};

use crate::renderer::backend::AttachmentDescriptor;

#[derive(Debug, thiserror::Error)]
pub enum TextureError {
    #[error("failed to load image {path:?}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("failed to decode embedded image: {0}")]
    Decode(#[from] image::ImageError),
    #[error("malformed texture reference {0:?}")]
    InvalidReference(String),
    #[error("embedded texture {index} requested but the scene only has {available}")]
    MissingEmbedded { index: usize, available: usize },
    #[error("embedded texture data is truncated: expected {expected} bytes, found {found}")]
    Truncated { expected: usize, found: usize },
    #[error("texture has zero size")]
    Empty,
    #[error("embedded texture dimensions {width}x{height} overflow the addressable size")]
    SizeOverflow { width: u32, height: u32 },
    #[error("texture is {width}x{height} but the device allows at most {max} texels per side")]
    TooLarge { width: u32, height: u32, max: u32 },
}

/// Rejects images the device cannot hold as a single 2D texture.
pub fn check_dimensions(width: u32, height: u32, max: u32) -> Result<(), TextureError> {
    if width > max || height > max {
        return Err(TextureError::TooLarge { width, height, max });
    }
    Ok(())
}

#[derive(Debug)]
pub struct Texture {
    pub texture: wgpu::Texture,
    pub view: wgpu::TextureView,
    pub sampler: wgpu::Sampler,
}

impl Texture {
    /// Load an image file and upload it as a single-level RGBA8 texture.
    pub fn from_path(
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        path: impl AsRef<Path>,
    ) -> Result<Self, TextureError> {
        let path = path.as_ref();
        log::info!("Loading texture: {:?}", path);

        let img = image::open(path).map_err(|source| TextureError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        let rgba = img.to_rgba8();
        if rgba.width() == 0 || rgba.height() == 0 {
            return Err(TextureError::Empty);
        }

        Self::from_rgba8(device, queue, &rgba, path.to_str())
    }

    /// Upload tightly packed RGBA8 texels, refusing images larger than
    /// `max_texture_dimension_2d`.
    pub fn from_rgba8(
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        image: &image::RgbaImage,
        label: Option<&str>,
    ) -> Result<Self, TextureError> {
        let max = device.limits().max_texture_dimension_2d;
        check_dimensions(image.width(), image.height(), max)?;
        Ok(Self::upload_rgba8(device, queue, image, label))
    }

    /// 1x1 white fallback bound where a material has no albedo texture.
    pub fn white(device: &wgpu::Device, queue: &wgpu::Queue) -> Self {
        let image = image::RgbaImage::from_pixel(1, 1, image::Rgba([255; 4]));
        Self::upload_rgba8(device, queue, &image, Some("White"))
    }

    fn upload_rgba8(
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        image: &image::RgbaImage,
        label: Option<&str>,
    ) -> Self {
        let size = wgpu::Extent3d {
            width: image.width().max(1),
            height: image.height().max(1),
            depth_or_array_layers: 1,
        };

        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label,
            size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8Unorm,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });

        if image.width() > 0 && image.height() > 0 {
            queue.write_texture(
                wgpu::TexelCopyTextureInfo {
                    texture: &texture,
                    mip_level: 0,
                    origin: wgpu::Origin3d::ZERO,
                    aspect: wgpu::TextureAspect::All,
                },
                image.as_raw(),
                wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(4 * image.width()),
                    rows_per_image: Some(image.height()),
                },
                size,
            );
        }

        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            address_mode_u: wgpu::AddressMode::Repeat,
            address_mode_v: wgpu::AddressMode::Repeat,
            address_mode_w: wgpu::AddressMode::Repeat,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        Self {
            texture,
            view,
            sampler,
        }
    }

    /// Render-target texture that can also be sampled by a later pass.
    pub fn attachment(device: &wgpu::Device, desc: &AttachmentDescriptor<'_>) -> Self {
        let size = wgpu::Extent3d {
            width: desc.width.max(1),
            height: desc.height.max(1),
            depth_or_array_layers: 1,
        };

        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: desc.label,
            size,
            mip_level_count: desc.mip_levels.max(1),
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: desc.format.to_wgpu(),
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING,
            view_formats: &[],
        });

        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());

        let sampler_label = desc.label.map(|name| format!("{name} Sampler"));
        let address_mode = desc.wrap.to_wgpu();
        let filter = desc.filter.to_wgpu();
        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: sampler_label.as_deref(),
            address_mode_u: address_mode,
            address_mode_v: address_mode,
            address_mode_w: address_mode,
            mag_filter: filter,
            min_filter: filter,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        Self {
            texture,
            view,
            sampler,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::backend::{AttachmentFormat, FilterMode, WrapMode};

    #[test]
    fn open_error_names_the_path() {
        let err = TextureError::Open {
            path: PathBuf::from("missing/albedo.png"),
            source: image::ImageError::IoError(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "not found",
            )),
        };
        assert!(err.to_string().contains("missing/albedo.png"));
    }

    #[test]
    fn truncated_error_reports_sizes() {
        let err = TextureError::Truncated {
            expected: 64,
            found: 12,
        };
        assert_eq!(
            err.to_string(),
            "embedded texture data is truncated: expected 64 bytes, found 12"
        );
    }

    #[test]
    fn dimensions_above_device_limit_are_rejected() {
        assert!(check_dimensions(8192, 8192, 8192).is_ok());
        assert!(matches!(
            check_dimensions(8193, 16, 8192),
            Err(TextureError::TooLarge {
                width: 8193,
                height: 16,
                max: 8192
            })
        ));
        assert!(check_dimensions(16, 8193, 8192).is_err());
    }

    fn request_device() -> (wgpu::Device, wgpu::Queue) {
        pollster::block_on(async {
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
        })
    }

    #[test]
    #[ignore] // Requires a GPU
    fn attachment_has_single_mip_and_requested_size() {
        let (device, _queue) = request_device();
        let texture = Texture::attachment(
            &device,
            &AttachmentDescriptor {
                label: Some("Test Attachment"),
                width: 64,
                height: 32,
                format: AttachmentFormat::Rgb16Float,
                filter: FilterMode::Nearest,
                wrap: WrapMode::Repeat,
                mip_levels: 1,
            },
        );
        assert_eq!(texture.texture.size().width, 64);
        assert_eq!(texture.texture.size().height, 32);
        assert_eq!(texture.texture.mip_level_count(), 1);
        assert_eq!(texture.texture.format(), wgpu::TextureFormat::Rgba16Float);
    }

    #[test]
    #[ignore] // Requires a GPU
    fn rgba8_upload_keeps_dimensions() {
        let (device, queue) = request_device();
        let image = image::RgbaImage::from_pixel(4, 2, image::Rgba([255, 0, 0, 255]));
        let texture = Texture::from_rgba8(&device, &queue, &image, Some("Red")).unwrap();
        assert_eq!(texture.texture.size().width, 4);
        assert_eq!(texture.texture.size().height, 2);
        assert_eq!(texture.texture.mip_level_count(), 1);
    }
}
