mod printing;
mod ray_bvh_intersection;

use crate::bvh::{
    BuildParams, BuildReport, BuildStrategy, GpuNode, GpuTriangle, LinearBvh, ParamsError,
};

use super::TriangleMesh;

/// Mesh together with a linearized BVH built over it.
#[derive(Clone, Debug)]
pub struct TriangleBvh<'a> {
    mesh: TriangleMesh<'a>,
    linear: LinearBvh,
    report: BuildReport,
}

impl<'a> TriangleBvh<'a> {
    #[tracing::instrument(skip(mesh, params), fields(triangles = mesh.triangle_count()))]
    pub fn build(
        mesh: TriangleMesh<'a>,
        strategy: BuildStrategy,
        params: &BuildParams,
    ) -> Result<TriangleBvh<'a>, ParamsError> {
        let (bvh, report) = strategy.build(&mesh, params)?;
        let linear = LinearBvh::from_bvh(&bvh);
        Ok(TriangleBvh {
            mesh,
            linear,
            report,
        })
    }

    pub fn mesh(&self) -> &TriangleMesh<'a> {
        &self.mesh
    }

    pub fn linear(&self) -> &LinearBvh {
        &self.linear
    }

    pub fn report(&self) -> &BuildReport {
        &self.report
    }

    pub fn gpu_nodes(&self) -> Vec<GpuNode> {
        self.linear.to_gpu_nodes()
    }

    /// Triangles in leaf order, so that `GpuNode::prim_start` indexes this array directly.
    /// Triangles referenced by several leaves are repeated.
    pub fn gpu_triangles(&self) -> Vec<GpuTriangle> {
        self.linear
            .prim_indices()
            .iter()
            .map(|prim| {
                let i = prim.index();
                GpuTriangle::new(&self.mesh.triangle(i), self.mesh.material(i))
            })
            .collect()
    }
}
