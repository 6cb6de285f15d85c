use ordered_float::OrderedFloat;

use super::{
    BuildNodeIdx, BuildParams, Bvh, BvhBuilder, ChildSide, PrimitiveRef, SplitCounts, ref_bounds,
};
use crate::scene::mesh::TriangleMesh;

/// Splits at the median centroid along the longest axis of the centroid box,
/// until ranges fit into a leaf. Fast to build, ignores the SAH.
pub struct MedianBuilder;

impl BvhBuilder for MedianBuilder {
    #[tracing::instrument(name = "median", skip_all)]
    fn build(&self, mesh: &TriangleMesh<'_>, params: &BuildParams) -> (Bvh, SplitCounts) {
        let mut refs = PrimitiveRef::from_mesh(mesh);
        let mut bvh = Bvh::with_capacity(refs.len());
        let mut counts = SplitCounts::default();
        if !refs.is_empty() {
            let root = build_recursive(&mut bvh, &mut counts, &mut refs, params.max_leaf_prims);
            bvh.set_root(root);
        }
        (bvh, counts)
    }
}

fn build_recursive(
    bvh: &mut Bvh,
    counts: &mut SplitCounts,
    refs: &mut [PrimitiveRef],
    max_leaf_prims: usize,
) -> BuildNodeIdx {
    let (bbox, centroid_bbox) = ref_bounds(refs);

    if refs.len() <= max_leaf_prims {
        return bvh.create_leaf(bbox, refs.iter().map(|r| r.prim));
    }

    let axis = centroid_bbox.max_extent_axis();
    let mid = refs.len() / 2;
    // Primitive index breaks ties, so equal centroids still give a deterministic order
    refs.select_nth_unstable_by_key(mid, |r| (OrderedFloat(r.centroid()[axis]), r.prim));
    counts.object += 1;

    let node = bvh.create_inner(bbox, axis);
    let (left, right) = refs.split_at_mut(mid);
    let left = build_recursive(bvh, counts, left, max_leaf_prims);
    let right = build_recursive(bvh, counts, right, max_leaf_prims);
    bvh.attach_child(node, ChildSide::Left, left);
    bvh.attach_child(node, ChildSide::Right, right);
    node
}
