use nalgebra::Unit;
use thiserror::Error;

use crate::geometry::{
    HitRecord, Ray, TexturePoint, Triangle, TriangleHit, WorldBox,
    WorldPoint, WorldVector, tangent_frame,
};

/// Words per triangle record: three vertex indices and a material id.
pub const TRIANGLE_RECORD_LEN: usize = 4;

/// Where the attributes of one vertex sit in the flat vertex buffer.
/// The position is always the first three floats.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct VertexLayout {
    /// Floats per vertex
    pub stride: usize,
    pub normal_offset: Option<usize>,
    pub uv_offset: Option<usize>,
}

impl VertexLayout {
    pub const POSITION_ONLY: VertexLayout = VertexLayout {
        stride: 3,
        normal_offset: None,
        uv_offset: None,
    };

    /// Position, normal and texture coordinates, 8 floats.
    pub const POSITION_NORMAL_UV: VertexLayout = VertexLayout {
        stride: 8,
        normal_offset: Some(3),
        uv_offset: Some(6),
    };

    /// Smallest stride that holds all attributes of this layout.
    fn required_stride(&self) -> usize {
        [
            Some(3),
            self.normal_offset.map(|offset| offset + 3),
            self.uv_offset.map(|offset| offset + 2),
        ]
        .into_iter()
        .flatten()
        .max()
        .unwrap_or(3)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MeshError {
    #[error("vertex stride {stride} can't hold the vertex attributes, at least {required} needed")]
    StrideTooSmall { stride: usize, required: usize },

    #[error("vertex buffer length {len} is not a multiple of the stride {stride}")]
    RaggedVertexBuffer { len: usize, stride: usize },

    #[error("triangle buffer length {len} is not a multiple of {TRIANGLE_RECORD_LEN}")]
    RaggedTriangleBuffer { len: usize },

    #[error(
        "triangle {triangle} references vertex {vertex}, but there are only {vertex_count} vertices"
    )]
    VertexOutOfRange {
        triangle: usize,
        vertex: u32,
        vertex_count: usize,
    },
}

/// Borrowed view of caller-owned triangle geometry.
///
/// Layout is validated once in `new`, the accessors index without further checks.
/// Values (NaN coordinates, zero area triangles) are not validated.
#[derive(Copy, Clone, Debug)]
pub struct TriangleMesh<'a> {
    vertices: &'a [f32],
    layout: VertexLayout,
    triangles: &'a [u32],
}

impl<'a> TriangleMesh<'a> {
    pub fn new(
        vertices: &'a [f32],
        layout: VertexLayout,
        triangles: &'a [u32],
    ) -> Result<TriangleMesh<'a>, MeshError> {
        let required = layout.required_stride();
        if layout.stride < required {
            return Err(MeshError::StrideTooSmall {
                stride: layout.stride,
                required,
            });
        }
        if vertices.len() % layout.stride != 0 {
            return Err(MeshError::RaggedVertexBuffer {
                len: vertices.len(),
                stride: layout.stride,
            });
        }
        if triangles.len() % TRIANGLE_RECORD_LEN != 0 {
            return Err(MeshError::RaggedTriangleBuffer {
                len: triangles.len(),
            });
        }

        let vertex_count = vertices.len() / layout.stride;
        for (triangle, record) in triangles.chunks_exact(TRIANGLE_RECORD_LEN).enumerate() {
            if let Some(&vertex) = record[..3].iter().find(|v| **v as usize >= vertex_count) {
                return Err(MeshError::VertexOutOfRange {
                    triangle,
                    vertex,
                    vertex_count,
                });
            }
        }

        Ok(TriangleMesh {
            vertices,
            layout,
            triangles,
        })
    }

    pub fn layout(&self) -> &VertexLayout {
        &self.layout
    }

    pub fn triangle_count(&self) -> usize {
        self.triangles.len() / TRIANGLE_RECORD_LEN
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len() / self.layout.stride
    }

    fn attribute<const N: usize>(&self, vertex: usize, offset: usize) -> [f32; N] {
        let start = vertex * self.layout.stride + offset;
        std::array::from_fn(|i| self.vertices[start + i])
    }

    pub fn position(&self, vertex: usize) -> WorldPoint {
        self.attribute::<3>(vertex, 0).into()
    }

    pub fn normal(&self, vertex: usize) -> Option<WorldVector> {
        self.layout
            .normal_offset
            .map(|offset| self.attribute::<3>(vertex, offset).into())
    }

    pub fn texture_coords(&self, vertex: usize) -> Option<TexturePoint> {
        self.layout
            .uv_offset
            .map(|offset| self.attribute::<2>(vertex, offset).into())
    }

    pub fn vertex_indices(&self, triangle: usize) -> Triangle<usize> {
        let record = &self.triangles[triangle * TRIANGLE_RECORD_LEN..];
        Triangle::new(record[0] as usize, record[1] as usize, record[2] as usize)
    }

    pub fn material(&self, triangle: usize) -> u32 {
        self.triangles[triangle * TRIANGLE_RECORD_LEN + 3]
    }

    pub fn triangle(&self, triangle: usize) -> Triangle<WorldPoint> {
        self.vertex_indices(triangle).map(|v| self.position(*v))
    }

    /// Bounding box of all referenced vertices, empty if there are no triangles.
    pub fn bounding_box(&self) -> WorldBox {
        (0..self.triangle_count()).fold(WorldBox::empty(), |acc, i| {
            acc.union(&self.triangle(i).bounding_box())
        })
    }

    /// Completes a triangle hit into a full record: position, shading normal
    /// (interpolated vertex normals, or the geometric normal), texture coordinates
    /// (interpolated, or the barycentrics), material and tangent frame.
    pub fn hit_record(&self, triangle: usize, ray: &Ray, hit: &TriangleHit) -> HitRecord {
        let vertices = self.vertex_indices(triangle);
        let uv = hit.uv;

        let geometric_normal = self.triangle(triangle).normal();
        let interpolated_normal = self
            .layout
            .normal_offset
            .map(|_| {
                let normals = vertices.map(|v| self.normal(*v).unwrap_or_else(WorldVector::zeros));
                uv.interpolate_triangle(&normals)
            })
            .filter(|n| n.norm_squared() > 0.0 && n.iter().all(|x| x.is_finite()));
        let normal = Unit::new_normalize(interpolated_normal.unwrap_or(geometric_normal));
        let (tangent, bitangent) = tangent_frame(&normal);

        let texture_coords = match self.layout.uv_offset {
            Some(_) => {
                let coords = vertices.map(|v| {
                    self.texture_coords(*v)
                        .unwrap_or_else(TexturePoint::origin)
                        .coords
                });
                TexturePoint::from(uv.interpolate_triangle(&coords))
            }
            None => TexturePoint::new(uv.u, uv.v),
        };

        HitRecord {
            t: hit.t,
            point: ray.point_at(hit.t),
            normal,
            tangent,
            bitangent,
            texture_coords,
            barycentric: uv,
            material: self.material(triangle),
            primitive: triangle,
        }
    }
}
