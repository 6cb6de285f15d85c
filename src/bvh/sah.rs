//! Surface area heuristic.

use super::{Bvh, BuildNodeKind, BuildParams};
use crate::geometry::FloatType;

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct SahCosts {
    pub traversal: FloatType,
    pub intersection: FloatType,
}

/// Cost of splitting a node of area `parent_area` into two children.
/// With a degenerate (zero area) parent only the counts are compared, which
/// never comes out cheaper than a leaf.
pub fn split_cost(
    costs: &SahCosts,
    parent_area: FloatType,
    left_area: FloatType,
    left_count: usize,
    right_area: FloatType,
    right_count: usize,
) -> FloatType {
    let weighted = if parent_area > 0.0 {
        (left_count as FloatType * left_area + right_count as FloatType * right_area) / parent_area
    } else {
        (left_count + right_count) as FloatType
    };
    costs.traversal + costs.intersection * weighted
}

pub fn leaf_cost(costs: &SahCosts, count: usize) -> FloatType {
    costs.intersection * count as FloatType
}

/// Leaf-or-split decision: above the cap a range is always split,
/// at or below it only when splitting is strictly cheaper.
pub(crate) fn should_split(params: &BuildParams, count: usize, split_cost: FloatType) -> bool {
    count > params.max_leaf_prims || split_cost < leaf_cost(&params.sah_costs(), count)
}

/// Expected cost of a ray that hits the root box: every inner node costs a traversal
/// and every leaf its intersections, each weighted by its area relative to the root.
pub fn tree_cost(bvh: &Bvh, costs: &SahCosts) -> FloatType {
    let Some(root) = bvh.root() else {
        return 0.0;
    };
    let root_area = bvh.node(root).bbox.surface_area();
    if root_area <= 0.0 {
        // Flat scene, the relative areas are meaningless
        return bvh
            .nodes()
            .iter()
            .map(|node| match &node.kind {
                BuildNodeKind::Leaf { prims } => leaf_cost(costs, prims.len()),
                BuildNodeKind::Inner { .. } => costs.traversal,
            })
            .sum();
    }

    bvh.nodes()
        .iter()
        .map(|node| {
            let relative_area = node.bbox.surface_area() / root_area;
            let cost = match &node.kind {
                BuildNodeKind::Leaf { prims } => leaf_cost(costs, prims.len()),
                BuildNodeKind::Inner { .. } => costs.traversal,
            };
            cost * relative_area
        })
        .sum()
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::bvh::{ChildSide, PrimIdx};
    use crate::geometry::WorldBox;
    use assert2::assert;
    use test_case::test_case;

    const COSTS: SahCosts = SahCosts {
        traversal: 1.0,
        intersection: 1.0,
    };

    #[test]
    fn unit_quad_prefers_leaf() {
        // Both triangles of the quad have the quad's box
        let cost = split_cost(&COSTS, 2.0, 2.0, 1, 2.0, 1);
        assert!(cost == 3.0);
        assert!(leaf_cost(&COSTS, 2) == 2.0);
        assert!(!should_split(&BuildParams::default(), 2, cost));
    }

    #[test]
    fn zero_parent_area_never_beats_leaf() {
        let cost = split_cost(&COSTS, 0.0, 0.0, 3, 0.0, 2);
        assert!(cost > leaf_cost(&COSTS, 5));
    }

    #[test_case(4, 3.9, true ; "cheaper_split_within_cap")]
    #[test_case(4, 4.0, false ; "equal_cost_stays_leaf")]
    #[test_case(5, 100.0, true ; "above_cap_always_splits")]
    #[test_case(1, 0.0, true ; "cap_does_not_force_leaf")]
    fn leaf_or_split(count: usize, split: FloatType, expected: bool) {
        assert!(should_split(&BuildParams::default(), count, split) == expected);
    }

    #[test]
    fn tree_cost_of_two_leaves() {
        let mut bvh = Bvh::new();
        let a = WorldBox::new([0.0, 0.0, 0.0].into(), [1.0, 1.0, 1.0].into());
        let b = WorldBox::new([1.0, 0.0, 0.0].into(), [2.0, 1.0, 1.0].into());
        let root = bvh.create_inner(a.union(&b), 0);
        let left = bvh.create_leaf(a, [PrimIdx::new(0)]);
        let right = bvh.create_leaf(b, [PrimIdx::new(1), PrimIdx::new(2)]);
        bvh.attach_child(root, ChildSide::Left, left);
        bvh.attach_child(root, ChildSide::Right, right);
        bvh.set_root(root);

        // Root area 10, leaves 6 each
        let expected = 1.0 + (1.0 * 6.0 + 2.0 * 6.0) / 10.0;
        assert!((tree_cost(&bvh, &COSTS) - expected).abs() < 1e-5);
        assert!(tree_cost(&Bvh::new(), &COSTS) == 0.0);
    }
}
