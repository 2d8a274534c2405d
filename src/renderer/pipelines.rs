// src/renderer/pipelines.rs

//! The two wgpu pipelines of the deferred renderer: geometry into the
//! G-buffer, and the composite quad that lights it onto the window.

use bytemuck::{Pod, Zeroable};
use glam::Mat4;
use wgpu::util::DeviceExt;

use crate::model::material::{MapSlot, Material};
use crate::renderer::gbuffer::{COLOR_FORMATS, DEPTH_FORMAT};
use crate::renderer::pipeline_builder::PipelineBuilder;
use crate::renderer::vertex::Vertex;
use crate::renderer::wgpu_backend::WgpuBackend;

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct ObjectUniform {
    pub view_proj: [[f32; 4]; 4],
    pub model: [[f32; 4]; 4],
}

impl ObjectUniform {
    pub fn new(view_proj: Mat4, model: Mat4) -> Self {
        Self {
            view_proj: view_proj.to_cols_array_2d(),
            model: model.to_cols_array_2d(),
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct MaterialUniform {
    pub albedo: [f32; 4],
}

impl MaterialUniform {
    pub fn from_material(material: &Material) -> Self {
        let color = material.map(MapSlot::Albedo).color;
        Self {
            albedo: color.map(|c| c as f32 / 255.0),
        }
    }
}

/// Corner UVs of the composite quad, packed as
/// `[top-left, bottom-left]`, `[bottom-right, top-right]`.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct QuadUniform {
    pub corners: [[f32; 4]; 2],
}

impl QuadUniform {
    pub fn from_uvs(uvs: [[f32; 2]; 4]) -> Self {
        let [tl, bl, br, tr] = uvs;
        Self {
            corners: [[tl[0], tl[1], bl[0], bl[1]], [br[0], br[1], tr[0], tr[1]]],
        }
    }
}

fn uniform_entry(binding: u32, visibility: wgpu::ShaderStages) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

fn texture_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::FRAGMENT,
        ty: wgpu::BindingType::Texture {
            sample_type: wgpu::TextureSampleType::Float { filterable: true },
            view_dimension: wgpu::TextureViewDimension::D2,
            multisampled: false,
        },
        count: None,
    }
}

fn sampler_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::FRAGMENT,
        ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
        count: None,
    }
}

/// Renders meshes into the position, normal and color targets.
pub struct GeometryPipeline {
    pipeline: wgpu::RenderPipeline,
    object_layout: wgpu::BindGroupLayout,
    material_layout: wgpu::BindGroupLayout,
}

impl GeometryPipeline {
    pub fn new(device: &wgpu::Device) -> Self {
        let object_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("GBufferObjectLayout"),
            entries: &[uniform_entry(0, wgpu::ShaderStages::VERTEX)],
        });
        let material_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("GBufferMaterialLayout"),
            entries: &[
                uniform_entry(0, wgpu::ShaderStages::FRAGMENT),
                texture_entry(1),
                sampler_entry(2),
            ],
        });

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("GBufferShader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("../shader/gbuffer.wgsl").into()),
        });
        let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("GBufferPipelineLayout"),
            bind_group_layouts: &[&object_layout, &material_layout],
            push_constant_ranges: &[],
        });

        let pipeline = PipelineBuilder::new(device, &layout, &shader)
            .with_label("GBufferPipeline")
            .with_vertex_buffer(Vertex::layout())
            .with_color_targets(COLOR_FORMATS.map(|format| format.to_wgpu()))
            .with_depth_stencil(DEPTH_FORMAT.to_wgpu(), true, wgpu::CompareFunction::Less)
            .build();

        Self {
            pipeline,
            object_layout,
            material_layout,
        }
    }

    pub fn pipeline(&self) -> &wgpu::RenderPipeline {
        &self.pipeline
    }
}

/// Per-object transform buffer. Each drawn object needs its own binding,
/// queue writes only land once per submission.
pub struct ObjectBinding {
    buffer: wgpu::Buffer,
    bind_group: wgpu::BindGroup,
}

impl ObjectBinding {
    pub fn new(device: &wgpu::Device, pipeline: &GeometryPipeline, uniform: &ObjectUniform) -> Self {
        let buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("ObjectUniformBuffer"),
            contents: bytemuck::bytes_of(uniform),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("ObjectBindGroup"),
            layout: &pipeline.object_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: buffer.as_entire_binding(),
            }],
        });
        Self { buffer, bind_group }
    }

    pub fn update(&self, queue: &wgpu::Queue, uniform: &ObjectUniform) {
        queue.write_buffer(&self.buffer, 0, bytemuck::bytes_of(uniform));
    }

    pub fn bind_group(&self) -> &wgpu::BindGroup {
        &self.bind_group
    }
}

/// Albedo color and texture of one [`Material`]. A material without an
/// albedo texture samples the backend's white texture.
pub struct MaterialBinding {
    _buffer: wgpu::Buffer,
    bind_group: wgpu::BindGroup,
}

impl MaterialBinding {
    pub fn new(backend: &WgpuBackend, pipeline: &GeometryPipeline, material: &Material) -> Self {
        let device = backend.device();
        let albedo = material
            .texture(MapSlot::Albedo)
            .and_then(|id| backend.texture(id))
            .unwrap_or_else(|| backend.white_texture());

        let buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("MaterialUniformBuffer"),
            contents: bytemuck::bytes_of(&MaterialUniform::from_material(material)),
            usage: wgpu::BufferUsages::UNIFORM,
        });
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: material.name.as_deref(),
            layout: &pipeline.material_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(&albedo.view),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::Sampler(&albedo.sampler),
                },
            ],
        });
        Self {
            _buffer: buffer,
            bind_group,
        }
    }

    pub fn bind_group(&self) -> &wgpu::BindGroup {
        &self.bind_group
    }
}

/// Screen quad sampling the G-buffer. Built twice, with and without alpha
/// blending, since blend is pipeline state in wgpu.
pub struct CompositePipeline {
    blended: wgpu::RenderPipeline,
    opaque: wgpu::RenderPipeline,
    layout: wgpu::BindGroupLayout,
    sampler: wgpu::Sampler,
    format: wgpu::TextureFormat,
}

impl CompositePipeline {
    pub fn new(device: &wgpu::Device, format: wgpu::TextureFormat) -> Self {
        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("CompositeLayout"),
            entries: &[
                uniform_entry(0, wgpu::ShaderStages::VERTEX),
                texture_entry(1),
                texture_entry(2),
                texture_entry(3),
                sampler_entry(4),
            ],
        });
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("CompositeShader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("../shader/composite.wgsl").into()),
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("CompositePipelineLayout"),
            bind_group_layouts: &[&layout],
            push_constant_ranges: &[],
        });

        let build = |label: &'static str, blend: Option<wgpu::BlendState>| {
            PipelineBuilder::new(device, &pipeline_layout, &shader)
                .with_label(label)
                .with_color_target(format, blend)
                .with_no_culling()
                .build()
        };
        let blended = build("CompositePipelineBlended", Some(wgpu::BlendState::ALPHA_BLENDING));
        let opaque = build("CompositePipelineOpaque", None);

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("CompositeSampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Nearest,
            min_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        Self {
            blended,
            opaque,
            layout,
            sampler,
            format,
        }
    }

    pub fn pipeline(&self, blend: bool) -> &wgpu::RenderPipeline {
        if blend {
            &self.blended
        } else {
            &self.opaque
        }
    }

    pub fn format(&self) -> wgpu::TextureFormat {
        self.format
    }

    pub fn bind_group(
        &self,
        device: &wgpu::Device,
        quad: &QuadUniform,
        color: &wgpu::TextureView,
        normal: &wgpu::TextureView,
        position: &wgpu::TextureView,
    ) -> wgpu::BindGroup {
        let buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("CompositeQuadBuffer"),
            contents: bytemuck::bytes_of(quad),
            usage: wgpu::BufferUsages::UNIFORM,
        });
        device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("CompositeBindGroup"),
            layout: &self.layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(color),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::TextureView(normal),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: wgpu::BindingResource::TextureView(position),
                },
                wgpu::BindGroupEntry {
                    binding: 4,
                    resource: wgpu::BindingResource::Sampler(&self.sampler),
                },
            ],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniform_sizes_match_wgsl() {
        assert_eq!(std::mem::size_of::<ObjectUniform>(), 128);
        assert_eq!(std::mem::size_of::<MaterialUniform>(), 16);
        assert_eq!(std::mem::size_of::<QuadUniform>(), 32);
    }

    #[test]
    fn quad_corners_pack_left_then_right() {
        let quad = QuadUniform::from_uvs([[0.0, 0.0], [0.0, 1.0], [1.0, 1.0], [1.0, 0.0]]);
        assert_eq!(quad.corners[0], [0.0, 0.0, 0.0, 1.0]);
        assert_eq!(quad.corners[1], [1.0, 1.0, 1.0, 0.0]);
    }

    #[test]
    fn material_color_is_normalized() {
        let mut material = Material::default();
        material.map_mut(MapSlot::Albedo).color = [255, 0, 51, 255];
        let uniform = MaterialUniform::from_material(&material);
        assert_eq!(uniform.albedo, [1.0, 0.0, 0.2, 1.0]);
    }
}
