use arrayvec::ArrayVec;
use itertools::partition;

use super::{
    BuildNodeIdx, BuildParams, Bvh, BvhBuilder, ChildSide, PrimitiveRef, SplitCounts,
    params::MAX_BIN_COUNT, ref_bounds,
    sah::{self, should_split},
};
use crate::{
    geometry::{Axis, FloatType, WorldBox},
    scene::mesh::TriangleMesh,
};

/// Binned SAH builder that partitions primitives by centroid.
pub struct BinnedSahBuilder;

impl BvhBuilder for BinnedSahBuilder {
    #[tracing::instrument(name = "binned_sah", skip_all)]
    fn build(&self, mesh: &TriangleMesh<'_>, params: &BuildParams) -> (Bvh, SplitCounts) {
        let mut refs = PrimitiveRef::from_mesh(mesh);
        let mut build = BinnedBuild {
            params,
            bvh: Bvh::with_capacity(refs.len()),
            counts: SplitCounts::default(),
        };
        if !refs.is_empty() {
            let root = build.build_recursive(&mut refs);
            build.bvh.set_root(root);
        }
        (build.bvh, build.counts)
    }
}

struct BinnedBuild<'a> {
    params: &'a BuildParams,
    bvh: Bvh,
    counts: SplitCounts,
}

impl BinnedBuild<'_> {
    fn build_recursive(&mut self, refs: &mut [PrimitiveRef]) -> BuildNodeIdx {
        let (bbox, centroid_bbox) = ref_bounds(refs);

        if refs.len() == 1 || centroid_bbox.is_degenerate() {
            return self.leaf(bbox, refs);
        }

        let Some(split) = find_object_split(refs, &bbox, &centroid_bbox, self.params) else {
            return self.leaf(bbox, refs);
        };
        if !should_split(self.params, refs.len(), split.cost) {
            return self.leaf(bbox, refs);
        }

        let mid = match split.partition(refs) {
            Some(mid) => {
                self.counts.object += 1;
                mid
            }
            None => {
                self.counts.midpoint += 1;
                refs.len() / 2
            }
        };

        let node = self.bvh.create_inner(bbox, split.binning.axis);
        let (left, right) = refs.split_at_mut(mid);
        let left = self.build_recursive(left);
        let right = self.build_recursive(right);
        self.bvh.attach_child(node, ChildSide::Left, left);
        self.bvh.attach_child(node, ChildSide::Right, right);
        node
    }

    fn leaf(&mut self, bbox: WorldBox, refs: &[PrimitiveRef]) -> BuildNodeIdx {
        self.bvh.create_leaf(bbox, refs.iter().map(|r| r.prim))
    }
}

/// Maps centroids along one axis of the centroid box to bins.
#[derive(Copy, Clone, Debug)]
pub(crate) struct CentroidBinning {
    pub axis: Axis,
    min: FloatType,
    scale: FloatType,
    pub bin_count: usize,
}

impl CentroidBinning {
    /// None if the centroid box has no extent along its longest axis.
    pub fn new(centroid_bbox: &WorldBox, bin_count: usize) -> Option<CentroidBinning> {
        let axis = centroid_bbox.max_extent_axis();
        let extent = centroid_bbox.extent(axis);
        if !(extent > 0.0) {
            return None;
        }
        Some(CentroidBinning {
            axis,
            min: centroid_bbox.min[axis],
            scale: bin_count as FloatType / extent,
            bin_count,
        })
    }

    pub fn bin_of(&self, r: &PrimitiveRef) -> usize {
        let x = (r.centroid()[self.axis] - self.min) * self.scale;
        // `as` saturates, NaN becomes 0
        (x as usize).min(self.bin_count - 1)
    }
}

#[derive(Copy, Clone, Debug)]
struct Bin {
    bbox: WorldBox,
    count: usize,
}

impl Default for Bin {
    fn default() -> Self {
        Bin {
            bbox: WorldBox::empty(),
            count: 0,
        }
    }
}

/// Best centroid partition of a range.
#[derive(Clone, Debug)]
pub(crate) struct ObjectSplit {
    pub binning: CentroidBinning,
    /// Bins below this go left
    pub plane: usize,
    pub cost: FloatType,
    pub left_bbox: WorldBox,
    pub right_bbox: WorldBox,
}

impl ObjectSplit {
    /// Reorders refs so that the left side comes first. Returns the partition point,
    /// or None if one side came out empty.
    pub fn partition(&self, refs: &mut [PrimitiveRef]) -> Option<usize> {
        let mid = partition(refs.iter_mut(), |r| self.binning.bin_of(r) < self.plane);
        (mid != 0 && mid != refs.len()).then_some(mid)
    }

    /// Surface area of the overlap of the two child boxes.
    pub fn overlap_area(&self) -> FloatType {
        self.left_bbox.intersection(&self.right_bbox).surface_area()
    }
}

/// Bins refs by centroid along the longest centroid axis and sweeps all planes
/// between bins. The first plane with the lowest cost wins.
pub(crate) fn find_object_split(
    refs: &[PrimitiveRef],
    bbox: &WorldBox,
    centroid_bbox: &WorldBox,
    params: &BuildParams,
) -> Option<ObjectSplit> {
    let binning = CentroidBinning::new(centroid_bbox, params.bin_count)?;

    let mut bins: ArrayVec<Bin, MAX_BIN_COUNT> =
        (0..binning.bin_count).map(|_| Bin::default()).collect();
    for r in refs {
        let bin = &mut bins[binning.bin_of(r)];
        bin.bbox = bin.bbox.union(&r.bbox);
        bin.count += 1;
    }

    // Suffix sweep: right side of plane i is bins[i..]
    let mut right_boxes: ArrayVec<(WorldBox, usize), MAX_BIN_COUNT> = ArrayVec::new();
    let mut acc = Bin::default();
    for bin in bins.iter().rev() {
        acc.bbox = acc.bbox.union(&bin.bbox);
        acc.count += bin.count;
        right_boxes.push((acc.bbox, acc.count));
    }
    right_boxes.reverse();

    let costs = params.sah_costs();
    let parent_area = bbox.surface_area();
    let mut best: Option<ObjectSplit> = None;
    let mut left = Bin::default();
    for plane in 1..binning.bin_count {
        left.bbox = left.bbox.union(&bins[plane - 1].bbox);
        left.count += bins[plane - 1].count;
        let (right_bbox, right_count) = right_boxes[plane];
        if left.count == 0 || right_count == 0 {
            continue;
        }

        let cost = sah::split_cost(
            &costs,
            parent_area,
            left.bbox.surface_area(),
            left.count,
            right_bbox.surface_area(),
            right_count,
        );
        if best.as_ref().is_none_or(|best| cost < best.cost) {
            best = Some(ObjectSplit {
                binning,
                plane,
                cost,
                left_bbox: left.bbox,
                right_bbox,
            });
        }
    }
    best
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::bvh::{BuildStrategy, PrimIdx, test::*};
    use assert2::{assert, let_assert};

    fn make_ref(prim: usize, min: [f32; 3], max: [f32; 3]) -> PrimitiveRef {
        PrimitiveRef {
            prim: PrimIdx::new(prim),
            bbox: WorldBox::new(min.into(), max.into()),
        }
    }

    #[test]
    fn two_clusters_split_between_them() {
        let mut refs = vec![
            make_ref(0, [10.0, 0.0, 0.0], [11.0, 1.0, 1.0]),
            make_ref(1, [0.0, 0.0, 0.0], [1.0, 1.0, 1.0]),
            make_ref(2, [10.5, 0.0, 0.0], [11.5, 1.0, 1.0]),
            make_ref(3, [0.5, 0.0, 0.0], [1.5, 1.0, 1.0]),
        ];
        let (bbox, centroid_bbox) = ref_bounds(&refs);
        let params = BuildParams::default();
        let_assert!(Some(split) = find_object_split(&refs, &bbox, &centroid_bbox, &params));
        assert!(split.binning.axis == 0);
        assert!(split.overlap_area() == 0.0);

        let_assert!(Some(mid) = split.partition(&mut refs));
        assert!(mid == 2);
        assert!(refs[..2].iter().all(|r| r.bbox.max.x < 2.0));
        assert!(refs[2..].iter().all(|r| r.bbox.min.x >= 10.0));
    }

    #[test]
    fn identical_centroids_have_no_split() {
        let refs = vec![
            make_ref(0, [0.0, 0.0, 0.0], [2.0, 2.0, 2.0]),
            make_ref(1, [0.5, 0.5, 0.5], [1.5, 1.5, 1.5]),
        ];
        let (bbox, centroid_bbox) = ref_bounds(&refs);
        assert!(find_object_split(&refs, &bbox, &centroid_bbox, &BuildParams::default()).is_none());
    }

    #[test]
    fn max_bin_count_is_supported() {
        let buffers = random_soup(3, 500);
        let mesh = buffers.mesh();
        let params = BuildParams::builder().bin_count(MAX_BIN_COUNT).build().unwrap();
        let_assert!(Ok((bvh, report)) = BuildStrategy::BinnedSah.build(&mesh, &params));
        check_tree(&bvh, &mesh);
        assert!(report.splits.object > 0);
    }

    #[test]
    fn separated_clusters_end_up_in_separate_subtrees() {
        let mut triangles = Vec::new();
        for i in 0..8 {
            let x = i as f32 * 0.1;
            triangles.push([[x, 0.0, 0.0], [x + 0.05, 0.0, 0.0], [x, 0.05, 0.0]]);
            triangles.push([[x + 100.0, 0.0, 0.0], [x + 100.05, 0.0, 0.0], [x + 100.0, 0.05, 0.0]]);
        }
        let buffers = MeshBuffers::from_triangles(&triangles);
        let mesh = buffers.mesh();
        let_assert!(Ok((bvh, _)) = BuildStrategy::BinnedSah.build(&mesh, &BuildParams::default()));
        check_tree(&bvh, &mesh);

        let_assert!(Some([left, right]) = bvh.root().and_then(|root| bvh.node(root).children()));
        assert!(bvh.node(left).bbox.max.x < 1.0);
        assert!(bvh.node(right).bbox.min.x >= 100.0);
    }
}
