pub mod bvh;
pub mod geometry;
pub mod scene;
mod util;

pub use bvh::{BuildParams, BuildReport, BuildStrategy, LinearBvh};
pub use scene::{Accelerator, BruteForce, ObjMesh, TriangleBvh, TriangleMesh, VertexLayout};
pub use util::Stats;
