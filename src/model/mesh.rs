// src/model/mesh.rs

//! CPU-side mesh with typed, length-checked vertex attributes.

use bitflags::bitflags;
use glam::{Mat3, Mat4, Vec3};

use crate::renderer::vertex::Vertex;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum MeshError {
    #[error("{attribute} has {found} elements but the mesh has {expected} vertices")]
    LengthMismatch {
        attribute: &'static str,
        expected: usize,
        found: usize,
    },
    #[error("index {index} is out of range for {vertex_count} vertices")]
    IndexOutOfRange { index: u32, vertex_count: usize },
}

bitflags! {
    /// Vertex channels present on a mesh.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct VertexChannels: u8 {
        const POSITION = 1 << 0;
        const NORMAL = 1 << 1;
        const UV0 = 1 << 2;
        const UV1 = 1 << 3;
        const TANGENT = 1 << 4;
        const COLOR = 1 << 5;
    }
}

/// One vertex attribute: `N` components of `T` per vertex, stored flat.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Attribute<T, const N: usize> {
    data: Vec<[T; N]>,
}

impl<T: Copy, const N: usize> Attribute<T, N> {
    pub fn new(data: Vec<[T; N]>) -> Self {
        Self { data }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn get(&self, vertex: usize) -> Option<[T; N]> {
        self.data.get(vertex).copied()
    }

    pub fn as_slice(&self) -> &[[T; N]] {
        &self.data
    }

    /// Contiguous components, `len() * N` long.
    pub fn as_flat(&self) -> &[T] {
        self.data.as_flattened()
    }

    pub fn iter(&self) -> impl Iterator<Item = [T; N]> + '_ {
        self.data.iter().copied()
    }

    fn check(&self, attribute: &'static str, expected: usize) -> Result<(), MeshError> {
        if self.data.len() == expected {
            Ok(())
        } else {
            Err(MeshError::LengthMismatch {
                attribute,
                expected,
                found: self.data.len(),
            })
        }
    }
}

impl<T, const N: usize> From<Vec<[T; N]>> for Attribute<T, N> {
    fn from(data: Vec<[T; N]>) -> Self {
        Self { data }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Mesh {
    positions: Attribute<f32, 3>,
    normals: Attribute<f32, 3>,
    uv0: Option<Attribute<f32, 2>>,
    uv1: Option<Attribute<f32, 2>>,
    tangents: Option<Attribute<f32, 4>>,
    colors: Option<Attribute<u8, 4>>,
    indices: Vec<u32>,
    triangle_count: usize,
}

impl Mesh {
    pub fn builder(positions: Vec<[f32; 3]>) -> MeshBuilder {
        MeshBuilder::new(positions)
    }

    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    /// Number of source faces. Faces are triangles after triangulation but
    /// any arity is kept as-is.
    pub fn triangle_count(&self) -> usize {
        self.triangle_count
    }

    pub fn positions(&self) -> &Attribute<f32, 3> {
        &self.positions
    }

    pub fn normals(&self) -> &Attribute<f32, 3> {
        &self.normals
    }

    pub fn uv0(&self) -> Option<&Attribute<f32, 2>> {
        self.uv0.as_ref()
    }

    pub fn uv1(&self) -> Option<&Attribute<f32, 2>> {
        self.uv1.as_ref()
    }

    pub fn tangents(&self) -> Option<&Attribute<f32, 4>> {
        self.tangents.as_ref()
    }

    pub fn colors(&self) -> Option<&Attribute<u8, 4>> {
        self.colors.as_ref()
    }

    pub fn indices(&self) -> &[u32] {
        &self.indices
    }

    pub fn channels(&self) -> VertexChannels {
        let mut channels = VertexChannels::empty();
        if !self.positions.is_empty() {
            channels |= VertexChannels::POSITION | VertexChannels::NORMAL;
        }
        channels.set(VertexChannels::UV0, self.uv0.is_some());
        channels.set(VertexChannels::UV1, self.uv1.is_some());
        channels.set(VertexChannels::TANGENT, self.tangents.is_some());
        channels.set(VertexChannels::COLOR, self.colors.is_some());
        channels
    }

    /// Bakes `transform` into positions, and its normal matrix into normals
    /// and tangent directions.
    pub fn transform(&mut self, transform: Mat4) {
        if transform == Mat4::IDENTITY {
            return;
        }
        let normal_matrix = Mat3::from_mat4(transform).inverse().transpose();

        for p in &mut self.positions.data {
            *p = transform.transform_point3(Vec3::from(*p)).to_array();
        }
        for n in &mut self.normals.data {
            *n = (normal_matrix * Vec3::from(*n)).normalize_or_zero().to_array();
        }
        if let Some(tangents) = &mut self.tangents {
            for t in &mut tangents.data {
                let dir = transform
                    .transform_vector3(Vec3::new(t[0], t[1], t[2]))
                    .normalize_or_zero();
                *t = [dir.x, dir.y, dir.z, t[3]];
            }
        }
    }

    /// Interleaved vertices for GPU upload. Missing channels are filled with
    /// zero UVs and tangents and opaque white color.
    pub fn interleaved(&self) -> Vec<Vertex> {
        (0..self.vertex_count())
            .map(|i| Vertex {
                pos: self.positions.data[i],
                normal: self.normals.get(i).unwrap_or([0.0, 1.0, 0.0]),
                uv: self.uv0.as_ref().and_then(|a| a.get(i)).unwrap_or_default(),
                uv2: self.uv1.as_ref().and_then(|a| a.get(i)).unwrap_or_default(),
                tangent: self
                    .tangents
                    .as_ref()
                    .and_then(|a| a.get(i))
                    .unwrap_or_default(),
                color: self
                    .colors
                    .as_ref()
                    .and_then(|a| a.get(i))
                    .unwrap_or([255; 4]),
            })
            .collect()
    }
}

#[derive(Debug, Clone, Default)]
pub struct MeshBuilder {
    positions: Vec<[f32; 3]>,
    normals: Option<Vec<[f32; 3]>>,
    uv0: Option<Vec<[f32; 2]>>,
    uv1: Option<Vec<[f32; 2]>>,
    tangents: Option<Vec<[f32; 4]>>,
    colors: Option<Vec<[u8; 4]>>,
    indices: Vec<u32>,
    face_count: usize,
}

impl MeshBuilder {
    pub fn new(positions: Vec<[f32; 3]>) -> Self {
        Self {
            positions,
            ..Default::default()
        }
    }

    pub fn normals(mut self, normals: Vec<[f32; 3]>) -> Self {
        self.normals = Some(normals);
        self
    }

    pub fn uv0(mut self, uvs: Vec<[f32; 2]>) -> Self {
        self.uv0 = Some(uvs);
        self
    }

    pub fn uv1(mut self, uvs: Vec<[f32; 2]>) -> Self {
        self.uv1 = Some(uvs);
        self
    }

    pub fn tangents(mut self, tangents: Vec<[f32; 4]>) -> Self {
        self.tangents = Some(tangents);
        self
    }

    pub fn colors(mut self, colors: Vec<[u8; 4]>) -> Self {
        self.colors = Some(colors);
        self
    }

    /// Flattens faces of any arity, in order.
    pub fn faces<F: AsRef<[u32]>>(mut self, faces: impl IntoIterator<Item = F>) -> Self {
        self.indices.clear();
        self.face_count = 0;
        for face in faces {
            self.indices.extend_from_slice(face.as_ref());
            self.face_count += 1;
        }
        self
    }

    /// Plain triangle list.
    pub fn triangles(mut self, indices: Vec<u32>) -> Self {
        self.face_count = indices.len() / 3;
        self.indices = indices;
        self
    }

    pub fn build(self) -> Result<Mesh, MeshError> {
        let vertex_count = self.positions.len();
        let normals = self
            .normals
            .unwrap_or_else(|| vec![[0.0, 1.0, 0.0]; vertex_count]);

        let mesh = Mesh {
            positions: Attribute::new(self.positions),
            normals: Attribute::new(normals),
            uv0: self.uv0.map(Attribute::new),
            uv1: self.uv1.map(Attribute::new),
            tangents: self.tangents.map(Attribute::new),
            colors: self.colors.map(Attribute::new),
            indices: self.indices,
            triangle_count: self.face_count,
        };

        mesh.normals.check("normals", vertex_count)?;
        if let Some(uv) = &mesh.uv0 {
            uv.check("uv0", vertex_count)?;
        }
        if let Some(uv) = &mesh.uv1 {
            uv.check("uv1", vertex_count)?;
        }
        if let Some(tangents) = &mesh.tangents {
            tangents.check("tangents", vertex_count)?;
        }
        if let Some(colors) = &mesh.colors {
            colors.check("colors", vertex_count)?;
        }
        if let Some(&index) = mesh.indices.iter().find(|&&i| i as usize >= vertex_count) {
            return Err(MeshError::IndexOutOfRange {
                index,
                vertex_count,
            });
        }

        Ok(mesh)
    }
}
