use std::{fs, path::Path};

use indexmap::{IndexMap, IndexSet};
use thiserror::Error;

use super::mesh::{MeshError, TriangleMesh, VertexLayout};

/// Owned triangle soup loaded from a Wavefront OBJ file.
///
/// Vertices are deduplicated on their (position, texture, normal) index triple and stored
/// interleaved with `VertexLayout::POSITION_NORMAL_UV`. Missing normals are stored as zero
/// vectors, which makes the mesh fall back to geometric normals when shading.
#[derive(Clone, Debug, Default)]
pub struct ObjMesh {
    pub vertices: Vec<f32>,
    pub triangles: Vec<u32>,
    /// Material names, indexed by the material id of the triangles
    pub materials: Vec<Option<String>>,
}

impl ObjMesh {
    pub fn load(p: impl AsRef<Path>) -> Result<ObjMesh, ObjOpenError> {
        let content = fs::read_to_string(p)?;
        Self::parse(content)
    }

    pub fn parse(content: impl AsRef<str>) -> Result<ObjMesh, ObjOpenError> {
        let parsed = wavefront_obj::obj::parse(content)?;
        let mesh = Self::from_obj_set(parsed);
        mesh.mesh()?;
        Ok(mesh)
    }

    pub fn mesh(&self) -> Result<TriangleMesh<'_>, MeshError> {
        TriangleMesh::new(
            &self.vertices,
            VertexLayout::POSITION_NORMAL_UV,
            &self.triangles,
        )
    }

    fn from_obj_set(obj: wavefront_obj::obj::ObjSet) -> ObjMesh {
        let mut triangles = Vec::new();
        let mut vertices = IndexMap::new();
        let mut materials = IndexSet::new();
        let mut skipped = 0usize;

        // Vertex indices are per object, so the dedup key includes the object index
        for (object_index, o) in obj.objects.into_iter().enumerate() {
            for geometry in o.geometry {
                let (material, _) = materials.insert_full(geometry.material_name);
                for shape in geometry.shapes {
                    let wavefront_obj::obj::Primitive::Triangle(a, b, c) = shape.primitive else {
                        skipped += 1;
                        continue;
                    };

                    let mut handle_vertex = |vtindex: (usize, Option<usize>, Option<usize>)| {
                        let entry = vertices.entry((object_index, vtindex));
                        let index = entry.index();
                        entry.or_insert_with(|| {
                            let vertex = &o.vertices[vtindex.0];
                            let tex = vtindex.1.map_or([0.0; 2], |i| {
                                let t = &o.tex_vertices[i];
                                [t.u as f32, t.v as f32]
                            });
                            let normal = vtindex.2.map_or([0.0; 3], |i| {
                                let n = &o.normals[i];
                                [n.x as f32, n.y as f32, n.z as f32]
                            });
                            [
                                vertex.x as f32,
                                vertex.y as f32,
                                vertex.z as f32,
                                normal[0],
                                normal[1],
                                normal[2],
                                tex[0],
                                tex[1],
                            ]
                        });
                        index as u32
                    };

                    let a = handle_vertex(a);
                    let b = handle_vertex(b);
                    let c = handle_vertex(c);

                    triangles.extend_from_slice(&[a, b, c, material as u32]);
                }
            }
        }

        if skipped > 0 {
            tracing::warn!(skipped, "Ignoring non-triangle primitives");
        }

        ObjMesh {
            vertices: vertices.into_values().flatten().collect(),
            triangles,
            materials: materials.into_iter().collect(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ObjOpenError {
    #[error("Failed to read file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse file: {0}")]
    ParseError(#[from] wavefront_obj::ParseError),

    #[error("Invalid mesh: {0}")]
    MeshError(#[from] MeshError),
}
