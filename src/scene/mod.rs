mod brute_force;
pub mod mesh;
pub mod obj;
pub mod triangle_bvh;

use crate::geometry::{HitRecord, Ray, WorldBox};

pub use brute_force::BruteForce;
pub use mesh::{MeshError, TRIANGLE_RECORD_LEN, TriangleMesh, VertexLayout};
pub use obj::{ObjMesh, ObjOpenError};
pub use triangle_bvh::TriangleBvh;

/// Ray queries over a triangle mesh.
pub trait Accelerator {
    /// Closest hit within the ray's range
    fn intersect(&self, ray: &Ray) -> Option<HitRecord>;
    /// Whether anything is hit within the ray's range
    fn occluded(&self, ray: &Ray) -> bool;
    fn bounding_box(&self) -> WorldBox;
}
