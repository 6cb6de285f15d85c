use arrayvec::ArrayVec;

use super::{
    BuildNodeIdx, BuildParams, Bvh, BvhBuilder, ChildSide, PrimitiveRef, SplitCounts,
    binned::{ObjectSplit, find_object_split},
    params::MAX_BIN_COUNT,
    ref_bounds,
    sah::{self, should_split},
};
use crate::{
    geometry::{Axis, FloatType, Triangle, WorldBox, WorldPoint},
    scene::mesh::TriangleMesh,
};

/// Binned SAH builder that may also split space, duplicating references to
/// triangles that straddle the splitting plane (SBVH).
pub struct SpatialSahBuilder;

impl BvhBuilder for SpatialSahBuilder {
    #[tracing::instrument(name = "spatial_sah", skip_all)]
    fn build(&self, mesh: &TriangleMesh<'_>, params: &BuildParams) -> (Bvh, SplitCounts) {
        let refs = PrimitiveRef::from_mesh(mesh);
        let mut build = SpatialBuild {
            mesh,
            params,
            bvh: Bvh::with_capacity(refs.len()),
            counts: SplitCounts::default(),
            root_area: 0.0,
            reference_budget: 2 * refs.len(),
            reference_count: refs.len(),
        };
        if !refs.is_empty() {
            build.root_area = ref_bounds(&refs).0.surface_area();
            let root = build.build_recursive(refs);
            build.bvh.set_root(root);
        }
        tracing::debug!(
            references = build.reference_count,
            spatial_splits = build.counts.spatial,
            "spatial split build finished"
        );
        (build.bvh, build.counts)
    }
}

struct SpatialBuild<'a, 'm> {
    mesh: &'a TriangleMesh<'m>,
    params: &'a BuildParams,
    bvh: Bvh,
    counts: SplitCounts,
    root_area: FloatType,
    /// Upper bound on the number of references in the whole tree
    reference_budget: usize,
    reference_count: usize,
}

enum Split {
    Object(ObjectSplit),
    Spatial(SpatialSplit),
}

impl SpatialBuild<'_, '_> {
    fn build_recursive(&mut self, mut refs: Vec<PrimitiveRef>) -> BuildNodeIdx {
        let (bbox, centroid_bbox) = ref_bounds(&refs);

        if refs.len() == 1 || centroid_bbox.is_degenerate() {
            return self.leaf(bbox, &refs);
        }

        let object = find_object_split(&refs, &bbox, &centroid_bbox, self.params);
        let spatial = object
            .as_ref()
            .filter(|object| self.spatial_split_worth_trying(object))
            .and_then(|_| self.find_spatial_split(&refs, &bbox));

        let split = match (object, spatial) {
            (Some(object), Some(spatial)) if spatial.cost < object.cost => Split::Spatial(spatial),
            (Some(object), _) => Split::Object(object),
            (None, _) => return self.leaf(bbox, &refs),
        };
        let cost = match &split {
            Split::Object(object) => object.cost,
            Split::Spatial(spatial) => spatial.cost,
        };
        if !should_split(self.params, refs.len(), cost) {
            return self.leaf(bbox, &refs);
        }

        let (axis, left, right) = match split {
            Split::Spatial(spatial) => {
                let n = refs.len();
                let (mut left, mut right) = self.apply_spatial_split(refs, &spatial);
                if left.is_empty() || right.is_empty() {
                    // Refs touching the plane all landed on one side
                    let mut refs = if left.is_empty() { right } else { left };
                    self.counts.midpoint += 1;
                    right = refs.split_off(refs.len() / 2);
                    left = refs;
                } else {
                    self.counts.spatial += 1;
                }
                self.reference_count += (left.len() + right.len()).saturating_sub(n);
                (spatial.axis, left, right)
            }
            Split::Object(object) => {
                let mid = match object.partition(&mut refs) {
                    Some(mid) => {
                        self.counts.object += 1;
                        mid
                    }
                    None => {
                        self.counts.midpoint += 1;
                        refs.len() / 2
                    }
                };
                let right = refs.split_off(mid);
                (object.binning.axis, refs, right)
            }
        };

        let node = self.bvh.create_inner(bbox, axis);
        let left = self.build_recursive(left);
        let right = self.build_recursive(right);
        self.bvh.attach_child(node, ChildSide::Left, left);
        self.bvh.attach_child(node, ChildSide::Right, right);
        node
    }

    fn leaf(&mut self, bbox: WorldBox, refs: &[PrimitiveRef]) -> BuildNodeIdx {
        self.bvh.create_leaf(bbox, refs.iter().map(|r| r.prim))
    }

    fn spatial_split_worth_trying(&self, object: &ObjectSplit) -> bool {
        self.reference_count < self.reference_budget
            && self.root_area > 0.0
            && object.overlap_area() / self.root_area > self.params.spatial_split_alpha
    }

    /// Bins the refs across equal slices of the node box along its longest axis.
    /// A ref is clipped into every slice it overlaps and counted as entering its
    /// first slice and exiting its last one.
    fn find_spatial_split(&self, refs: &[PrimitiveRef], bbox: &WorldBox) -> Option<SpatialSplit> {
        let axis = bbox.max_extent_axis();
        let extent = bbox.extent(axis);
        if !(extent > 0.0) {
            return None;
        }
        let bin_count = self.params.bin_count;
        let origin = bbox.min[axis];
        let bin_width = extent / bin_count as FloatType;
        let bin_of = |x: FloatType| (((x - origin) / bin_width) as usize).min(bin_count - 1);
        let plane_position = |plane: usize| origin + bin_width * plane as FloatType;

        let mut bins: ArrayVec<SpatialBin, MAX_BIN_COUNT> =
            (0..bin_count).map(|_| SpatialBin::default()).collect();
        for r in refs {
            let first = bin_of(r.bbox.min[axis]);
            let last = bin_of(r.bbox.max[axis]).max(first);
            let triangle = self.mesh.triangle(r.prim.index());

            let mut remainder = *r;
            for (bin, next_plane) in bins[first..last].iter_mut().zip(first + 1..) {
                let position = plane_position(next_plane);
                let (left, right) = split_reference(&remainder, &triangle, axis, position);
                bin.bbox = bin.bbox.union(&left.bbox);
                remainder = right;
            }
            bins[last].bbox = bins[last].bbox.union(&remainder.bbox);
            bins[first].entries += 1;
            bins[last].exits += 1;
        }

        let mut right_sums: ArrayVec<(WorldBox, usize), MAX_BIN_COUNT> = ArrayVec::new();
        let (mut acc_bbox, mut acc_exits) = (WorldBox::empty(), 0);
        for bin in bins.iter().rev() {
            acc_bbox = acc_bbox.union(&bin.bbox);
            acc_exits += bin.exits;
            right_sums.push((acc_bbox, acc_exits));
        }
        right_sums.reverse();

        let costs = self.params.sah_costs();
        let parent_area = bbox.surface_area();
        let budget_left = self.reference_budget.saturating_sub(self.reference_count);
        let mut best: Option<SpatialSplit> = None;
        let (mut left_bbox, mut left_count) = (WorldBox::empty(), 0);
        for plane in 1..bin_count {
            left_bbox = left_bbox.union(&bins[plane - 1].bbox);
            left_count += bins[plane - 1].entries;
            let (right_bbox, right_count) = right_sums[plane];
            if left_count == 0 || right_count == 0 {
                continue;
            }
            if left_count + right_count - refs.len() > budget_left {
                continue;
            }

            let cost = sah::split_cost(
                &costs,
                parent_area,
                left_bbox.surface_area(),
                left_count,
                right_bbox.surface_area(),
                right_count,
            );
            if best.as_ref().is_none_or(|best| cost < best.cost) {
                best = Some(SpatialSplit {
                    axis,
                    position: plane_position(plane),
                    cost,
                });
            }
        }
        best
    }

    /// Sends refs entirely on one side of the plane to that side and splits the
    /// straddling ones into a clipped ref for each side. Every ref keeps at least
    /// one part.
    fn apply_spatial_split(
        &self,
        refs: Vec<PrimitiveRef>,
        split: &SpatialSplit,
    ) -> (Vec<PrimitiveRef>, Vec<PrimitiveRef>) {
        let mut left = Vec::with_capacity(refs.len());
        let mut right = Vec::with_capacity(refs.len());
        for r in refs {
            if r.bbox.max[split.axis] <= split.position {
                left.push(r);
            } else if r.bbox.min[split.axis] >= split.position {
                right.push(r);
            } else {
                let triangle = self.mesh.triangle(r.prim.index());
                let (l, rr) = split_reference(&r, &triangle, split.axis, split.position);
                match (l.bbox.is_empty(), rr.bbox.is_empty()) {
                    (false, false) => {
                        left.push(l);
                        right.push(rr);
                    }
                    (false, true) => left.push(l),
                    (true, false) => right.push(rr),
                    // Clipping lost the whole triangle, keep the ref unclipped
                    (true, true) => left.push(r),
                }
            }
        }
        (left, right)
    }
}

#[derive(Copy, Clone, Debug)]
struct SpatialBin {
    bbox: WorldBox,
    entries: usize,
    exits: usize,
}

impl Default for SpatialBin {
    fn default() -> Self {
        SpatialBin {
            bbox: WorldBox::empty(),
            entries: 0,
            exits: 0,
        }
    }
}

#[derive(Copy, Clone, Debug)]
struct SpatialSplit {
    axis: Axis,
    position: FloatType,
    cost: FloatType,
}

/// Splits a reference by an axis aligned plane.
///
/// Walks the triangle's edges: each vertex goes to the side(s) it lies on and each
/// edge crossing the plane contributes its crossing point to both sides. The
/// crossing point's coordinate on the split axis is exactly the plane position.
/// Both halves are clipped to the reference's current box.
pub(crate) fn split_reference(
    r: &PrimitiveRef,
    triangle: &Triangle<WorldPoint>,
    axis: Axis,
    position: FloatType,
) -> (PrimitiveRef, PrimitiveRef) {
    let mut left = WorldBox::empty();
    let mut right = WorldBox::empty();

    for (a, b) in triangle.edges_iter() {
        let (va, vb) = (a[axis], b[axis]);
        if va <= position {
            left.grow(a);
        }
        if va >= position {
            right.grow(a);
        }
        if (va < position && position < vb) || (vb < position && position < va) {
            let t = ((position - va) / (vb - va)).clamp(0.0, 1.0);
            let mut crossing = a + (b - a) * t;
            crossing[axis] = position;
            left.grow(&crossing);
            right.grow(&crossing);
        }
    }

    (
        PrimitiveRef {
            prim: r.prim,
            bbox: left.intersection(&r.bbox),
        },
        PrimitiveRef {
            prim: r.prim,
            bbox: right.intersection(&r.bbox),
        },
    )
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::bvh::{BuildNodeKind, BuildStrategy, PrimIdx, test::*};
    use assert2::{assert, let_assert};
    use std::collections::HashMap;

    fn diagonal_triangle() -> Triangle<WorldPoint> {
        Triangle::new(
            WorldPoint::new(0.0, 0.0, 0.0),
            WorldPoint::new(4.0, 0.0, 0.0),
            WorldPoint::new(4.0, 4.0, 2.0),
        )
    }

    #[test]
    fn split_reference_covers_both_halves() {
        let triangle = diagonal_triangle();
        let r = PrimitiveRef {
            prim: PrimIdx::new(0),
            bbox: triangle.bounding_box(),
        };
        let (left, right) = split_reference(&r, &triangle, 0, 1.0);

        assert!(left.bbox.max.x == 1.0);
        assert!(right.bbox.min.x == 1.0);
        assert!(left.bbox.union(&right.bbox) == r.bbox);
        // Left part is the sliver near the origin, y and z are limited by the x = y edge
        assert!(left.bbox.max.y == 1.0);
        assert!(left.bbox.max.z == 0.5);
        assert!(right.bbox.min.y == 0.0);
    }

    #[test]
    fn split_reference_is_clipped_to_current_box() {
        let triangle = diagonal_triangle();
        let r = PrimitiveRef {
            prim: PrimIdx::new(0),
            bbox: WorldBox::new([2.0, 0.0, 0.0].into(), [4.0, 4.0, 2.0].into()),
        };
        let (left, right) = split_reference(&r, &triangle, 0, 3.0);
        assert!(left.bbox.min.x == 2.0);
        assert!(left.bbox.max.x == 3.0);
        assert!(right.bbox.min.x == 3.0);
        assert!(right.bbox.max.x == 4.0);
        assert!(r.bbox.contains_box(&left.bbox));
        assert!(r.bbox.contains_box(&right.bbox));
    }

    #[test]
    fn plane_through_vertex_touches_both_sides() {
        let triangle = diagonal_triangle();
        let r = PrimitiveRef {
            prim: PrimIdx::new(0),
            bbox: triangle.bounding_box(),
        };
        let (left, right) = split_reference(&r, &triangle, 0, 4.0);
        assert!(left.bbox == r.bbox);
        assert!(right.bbox.min.x == 4.0);
        assert!(!right.bbox.is_empty());
    }

    /// A grid of small triangles with two large quads above and below it.
    /// Object splits can't separate the quads from the small triangles.
    fn covered_grid() -> MeshBuffers {
        let mut triangles = Vec::new();
        for x in 0..20 {
            for y in 0..20 {
                let (x, y) = (2.5 + 5.0 * x as f32, 2.5 + 5.0 * y as f32);
                triangles.push([[x, y, 0.0], [x + 1.0, y, 0.0], [x, y + 1.0, 0.0]]);
            }
        }
        for z in [-1.0, 1.0] {
            triangles.push([[0.0, 0.0, z], [100.0, 0.0, z], [100.0, 100.0, z]]);
            triangles.push([[0.0, 0.0, z], [100.0, 100.0, z], [0.0, 100.0, z]]);
        }
        MeshBuffers::from_triangles(&triangles)
    }

    #[test]
    fn spatial_splits_stay_within_budget_and_cover_primitives() {
        let buffers = covered_grid();
        let mesh = buffers.mesh();
        let params = BuildParams::default();
        let_assert!(Ok((bvh, report)) = BuildStrategy::SpatialSah.build(&mesh, &params));

        let references = check_tree(&bvh, &mesh);
        assert!(references.len() == mesh.triangle_count());
        assert!(report.splits.spatial > 0);
        assert!(report.reference_count > mesh.triangle_count());
        assert!(report.reference_count <= 2 * mesh.triangle_count());

        // The leaves holding a primitive bound it together
        let mut leaf_union: HashMap<PrimIdx, WorldBox> = HashMap::new();
        for (index, node) in bvh.nodes().iter_enumerated() {
            if let BuildNodeKind::Leaf { .. } = node.kind {
                for prim in bvh.leaf_prims(index) {
                    let entry = leaf_union.entry(*prim).or_insert_with(WorldBox::empty);
                    *entry = entry.union(&node.bbox);
                }
            }
        }
        for (prim, bbox) in leaf_union {
            let triangle_box = mesh.triangle(prim.index()).bounding_box();
            assert!(bbox.contains_box(&triangle_box), "{prim:?}");
        }
    }

    #[test]
    fn no_spatial_splits_with_huge_alpha() {
        let buffers = covered_grid();
        let mesh = buffers.mesh();
        let params = BuildParams::builder().spatial_split_alpha(1e9).build().unwrap();
        let_assert!(Ok((bvh, report)) = BuildStrategy::SpatialSah.build(&mesh, &params));
        let references = check_tree(&bvh, &mesh);
        assert!(report.splits.spatial == 0);
        assert!(references.values().all(|count| *count == 1));
    }
}
