use std::{fmt::Display, time::Duration};

use super::{BuildParams, BuildStrategy, Bvh, sah};
use crate::{geometry::FloatType, util::Stats};

/// How the inner nodes of a tree were split.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SplitCounts {
    /// Partitions by primitive centroid (or median position)
    pub object: usize,
    /// Partitions by a plane that may duplicate primitives
    pub spatial: usize,
    /// Index-midpoint splits taken because a partition left one side empty
    pub midpoint: usize,
}

/// Summary of a finished build.
#[derive(Clone, Debug)]
pub struct BuildReport {
    pub strategy: BuildStrategy,
    pub primitive_count: usize,
    /// Number of primitive references in leaves, larger than `primitive_count`
    /// only with spatial splits
    pub reference_count: usize,
    pub inner_count: usize,
    pub leaf_count: usize,
    /// Depth of the deepest leaf, the root has depth 0
    pub max_depth: usize,
    pub leaf_depth: Stats,
    pub leaf_size: Stats,
    pub splits: SplitCounts,
    /// Expected traversal cost of the finished tree under the SAH
    pub sah_cost: FloatType,
    pub build_time: Duration,
}

impl BuildReport {
    pub fn new(
        strategy: BuildStrategy,
        primitive_count: usize,
        bvh: &Bvh,
        splits: SplitCounts,
        params: &BuildParams,
        build_time: Duration,
    ) -> BuildReport {
        let mut leaf_depth = Stats::default();
        let mut leaf_size = Stats::default();
        let mut inner_count = 0;
        for (index, depth) in bvh.preorder() {
            if bvh.node(index).is_leaf() {
                leaf_depth.add_sample(depth);
                leaf_size.add_sample(bvh.leaf_prims(index).len());
            } else {
                inner_count += 1;
            }
        }

        BuildReport {
            strategy,
            primitive_count,
            reference_count: bvh.prim_indices().len(),
            inner_count,
            leaf_count: leaf_size.count,
            max_depth: leaf_depth.max,
            leaf_depth,
            leaf_size,
            splits,
            sah_cost: sah::tree_cost(bvh, &params.sah_costs()),
            build_time,
        }
    }

    pub fn node_count(&self) -> usize {
        self.inner_count + self.leaf_count
    }
}

impl Display for BuildReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Strategy: {} ({:.2?})", self.strategy, self.build_time)?;
        writeln!(
            f,
            "Nodes: {} inner, {} leaves; {} references to {} triangles",
            self.inner_count, self.leaf_count, self.reference_count, self.primitive_count
        )?;
        writeln!(
            f,
            "Splits: {} object, {} spatial, {} midpoint",
            self.splits.object, self.splits.spatial, self.splits.midpoint
        )?;
        writeln!(f, "Leaf depth: {}", self.leaf_depth)?;
        writeln!(f, "Leaf size: {}", self.leaf_size)?;
        write!(f, "SAH cost: {:.3}", self.sah_cost)
    }
}
