//! Bounding volume hierarchy over triangles.
//!
//! Builders produce a [`Bvh`]: an arena of [`BuildNode`]s plus the primitive indices
//! reordered so that every leaf owns a contiguous range. [`LinearBvh`] flattens that tree
//! into a pre-order array with skip links, which the [`traversal`] functions walk.

mod binned;
mod gpu_layout;
mod linear;
mod median;
mod morton;
mod params;
mod radix_sort;
mod report;
pub mod sah;
mod spatial;
pub mod traversal;

use std::ops::Range;

use index_vec::{IndexSlice, IndexVec};

use crate::{
    geometry::{Axis, WorldBox, WorldPoint},
    scene::mesh::TriangleMesh,
};

pub use binned::BinnedSahBuilder;
pub use gpu_layout::{GpuNode, GpuTriangle, INVALID_INDEX};
pub use linear::{LinearBvh, Node, NodeKind};
pub use median::MedianBuilder;
pub use morton::MortonBuilder;
pub use params::{BuildParams, ParamsError};
pub use report::{BuildReport, SplitCounts};
pub use spatial::SpatialSahBuilder;

index_vec::define_index_type! {
    /// Index of a triangle in the input mesh
    pub struct PrimIdx = u32;
    IMPL_RAW_CONVERSIONS = true;
}

index_vec::define_index_type! {
    /// Index of a node in the build-time arena
    pub struct BuildNodeIdx = u32;
    IMPL_RAW_CONVERSIONS = true;
}

index_vec::define_index_type! {
    /// Index of a node in the linear (pre-order) array
    pub struct NodeIdx = u32;
    MAX_INDEX = (INVALID_INDEX - 1) as usize;
    IMPL_RAW_CONVERSIONS = true;
}

/// Per-primitive summary used while building.
/// The spatial builder may hold several refs of one primitive, each with a clipped box.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct PrimitiveRef {
    pub prim: PrimIdx,
    pub bbox: WorldBox,
}

impl PrimitiveRef {
    pub fn centroid(&self) -> WorldPoint {
        self.bbox.center()
    }

    /// One ref per triangle of the mesh, in mesh order.
    pub fn from_mesh(mesh: &TriangleMesh<'_>) -> Vec<PrimitiveRef> {
        (0..mesh.triangle_count())
            .map(|i| PrimitiveRef {
                prim: PrimIdx::from_usize(i),
                bbox: mesh.triangle(i).bounding_box(),
            })
            .collect()
    }
}

/// Union of the boxes and of the centroids of the refs.
pub(crate) fn ref_bounds(refs: &[PrimitiveRef]) -> (WorldBox, WorldBox) {
    refs.iter()
        .fold((WorldBox::empty(), WorldBox::empty()), |(mut bbox, mut centroids), r| {
            bbox = bbox.union(&r.bbox);
            centroids.grow(&r.centroid());
            (bbox, centroids)
        })
}

#[derive(Clone, Debug, PartialEq)]
pub enum BuildNodeKind {
    /// Range into `Bvh::prim_indices()`
    Leaf { prims: Range<usize> },
    Inner {
        axis: Axis,
        children: [Option<BuildNodeIdx>; 2],
    },
}

#[derive(Clone, Debug, PartialEq)]
pub struct BuildNode {
    pub bbox: WorldBox,
    pub kind: BuildNodeKind,
    pub parent: Option<BuildNodeIdx>,
}

impl BuildNode {
    pub fn is_leaf(&self) -> bool {
        matches!(self.kind, BuildNodeKind::Leaf { .. })
    }

    /// Range into `Bvh::prim_indices()` of a leaf, None for inner nodes.
    pub fn prim_range(&self) -> Option<Range<usize>> {
        match &self.kind {
            BuildNodeKind::Leaf { prims } => Some(prims.clone()),
            BuildNodeKind::Inner { .. } => None,
        }
    }

    /// Left and right child of an inner node. None for leaves.
    ///
    /// An inner node that is still missing a child (only possible mid-build) is a
    /// debug assertion failure, release builds treat it as childless.
    pub fn children(&self) -> Option<[BuildNodeIdx; 2]> {
        let BuildNodeKind::Inner { children, .. } = &self.kind else {
            return None;
        };
        let [Some(left), Some(right)] = *children else {
            assert2::debug_assert!(false, "inner node with a detached child");
            return None;
        };
        Some([left, right])
    }
}

/// Which slot of an inner node a child goes into.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ChildSide {
    Left = 0,
    Right = 1,
}

/// Build-time tree: node arena plus primitive indices in leaf order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Bvh {
    nodes: IndexVec<BuildNodeIdx, BuildNode>,
    root: Option<BuildNodeIdx>,
    prim_indices: Vec<PrimIdx>,
}

impl Bvh {
    pub fn new() -> Bvh {
        Bvh::default()
    }

    pub fn with_capacity(primitive_count: usize) -> Bvh {
        Bvh {
            nodes: IndexVec::with_capacity(2 * primitive_count),
            root: None,
            prim_indices: Vec::with_capacity(primitive_count),
        }
    }

    /// Assembles a tree from already linked nodes.
    pub(crate) fn from_parts(
        nodes: IndexVec<BuildNodeIdx, BuildNode>,
        root: Option<BuildNodeIdx>,
        prim_indices: Vec<PrimIdx>,
    ) -> Bvh {
        Bvh {
            nodes,
            root,
            prim_indices,
        }
    }

    /// Appends the primitives to the reordered array and creates a leaf owning them.
    pub fn create_leaf(
        &mut self,
        bbox: WorldBox,
        prims: impl IntoIterator<Item = PrimIdx>,
    ) -> BuildNodeIdx {
        let start = self.prim_indices.len();
        self.prim_indices.extend(prims);
        let end = self.prim_indices.len();
        assert2::debug_assert!(start < end, "leaf without primitives");

        self.nodes.push(BuildNode {
            bbox,
            kind: BuildNodeKind::Leaf { prims: start..end },
            parent: None,
        })
    }

    /// Creates an inner node with no children yet.
    pub fn create_inner(&mut self, bbox: WorldBox, axis: Axis) -> BuildNodeIdx {
        self.nodes.push(BuildNode {
            bbox,
            kind: BuildNodeKind::Inner {
                axis,
                children: [None, None],
            },
            parent: None,
        })
    }

    /// Links `child` under `parent` and sets the child's parent index.
    pub fn attach_child(&mut self, parent: BuildNodeIdx, side: ChildSide, child: BuildNodeIdx) {
        assert2::debug_assert!(parent != child);
        match &mut self.nodes[parent].kind {
            BuildNodeKind::Inner { children, .. } => children[side as usize] = Some(child),
            BuildNodeKind::Leaf { .. } => panic!("can't attach a child to leaf {parent:?}"),
        }
        self.nodes[child].parent = Some(parent);
    }

    pub fn set_root(&mut self, root: BuildNodeIdx) {
        self.nodes[root].parent = None;
        self.root = Some(root);
    }

    pub fn root(&self) -> Option<BuildNodeIdx> {
        self.root
    }

    pub fn node(&self, index: BuildNodeIdx) -> &BuildNode {
        &self.nodes[index]
    }

    pub fn nodes(&self) -> &IndexSlice<BuildNodeIdx, [BuildNode]> {
        &self.nodes
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    /// Primitive indices in leaf order. A primitive appears more than once only
    /// in trees built with spatial splits.
    pub fn prim_indices(&self) -> &[PrimIdx] {
        &self.prim_indices
    }

    pub fn leaf_prims(&self, index: BuildNodeIdx) -> &[PrimIdx] {
        match self.nodes[index].prim_range() {
            Some(prims) => &self.prim_indices[prims],
            None => &[],
        }
    }

    pub fn bounding_box(&self) -> WorldBox {
        self.root
            .map_or_else(WorldBox::empty, |root| self.nodes[root].bbox)
    }

    /// Depth-first walk from the root, left subtree before right.
    /// Yields node indices with their depth (root = 0).
    pub fn preorder(&self) -> PreorderIter<'_> {
        PreorderIter {
            bvh: self,
            stack: self.root.map(|root| (root, 0)).into_iter().collect(),
        }
    }
}

pub struct PreorderIter<'a> {
    bvh: &'a Bvh,
    stack: Vec<(BuildNodeIdx, usize)>,
}

impl Iterator for PreorderIter<'_> {
    type Item = (BuildNodeIdx, usize);

    fn next(&mut self) -> Option<Self::Item> {
        let (index, depth) = self.stack.pop()?;
        if let Some([left, right]) = self.bvh.nodes[index].children() {
            self.stack.push((right, depth + 1));
            self.stack.push((left, depth + 1));
        }
        Some((index, depth))
    }
}

/// Available construction algorithms.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum BuildStrategy {
    /// Recursive split at the median centroid of the longest axis
    Median,
    /// Binned surface area heuristic over object partitions
    BinnedSah,
    /// Binned SAH that may also split space, duplicating straddling triangles
    SpatialSah,
    /// Data-parallel Morton code builder
    Morton,
}

impl BuildStrategy {
    pub const ALL: [BuildStrategy; 4] = [
        BuildStrategy::Median,
        BuildStrategy::BinnedSah,
        BuildStrategy::SpatialSah,
        BuildStrategy::Morton,
    ];

    pub fn builder(&self) -> &'static dyn BvhBuilder {
        match self {
            BuildStrategy::Median => &MedianBuilder,
            BuildStrategy::BinnedSah => &BinnedSahBuilder,
            BuildStrategy::SpatialSah => &SpatialSahBuilder,
            BuildStrategy::Morton => &MortonBuilder,
        }
    }

    /// Validates the parameters, builds the tree and collects a report.
    #[tracing::instrument(skip_all, fields(strategy = ?self, triangles = mesh.triangle_count()))]
    pub fn build(
        &self,
        mesh: &TriangleMesh<'_>,
        params: &BuildParams,
    ) -> Result<(Bvh, BuildReport), ParamsError> {
        params.validate()?;

        let start = std::time::Instant::now();
        let (bvh, splits) = self.builder().build(mesh, params);
        let build_time = start.elapsed();

        let report =
            BuildReport::new(*self, mesh.triangle_count(), &bvh, splits, params, build_time);
        tracing::info!(
            nodes = report.node_count(),
            leaves = report.leaf_count,
            references = report.reference_count,
            sah_cost = report.sah_cost,
            ?build_time,
            "BVH built"
        );

        Ok((bvh, report))
    }
}

impl std::fmt::Display for BuildStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            BuildStrategy::Median => "median",
            BuildStrategy::BinnedSah => "binned-sah",
            BuildStrategy::SpatialSah => "spatial-sah",
            BuildStrategy::Morton => "morton",
        };
        f.write_str(name)
    }
}

/// A construction algorithm. Parameters are validated before `build` is called.
pub trait BvhBuilder: Sync {
    fn build(&self, mesh: &TriangleMesh<'_>, params: &BuildParams) -> (Bvh, SplitCounts);
}
