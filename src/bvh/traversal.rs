//! Stackless ray queries over a pre-order node array with skip links.

use std::ops::Range;

use super::{GpuNode, GpuTriangle, LinearBvh, NodeIdx, NodeKind, PrimIdx};
use crate::{
    geometry::{FloatType, Ray, RayIntersectionExt as _, TriangleHit, WorldBox},
    scene::mesh::TriangleMesh,
};

/// Node array laid out in pre-order: an inner node's left child is the next node
/// and `skip` jumps past the node's subtree.
pub trait NodeLayout {
    fn node_count(&self) -> usize;
    fn bbox(&self, node: NodeIdx) -> WorldBox;
    /// Slots of the reordered primitive array owned by a leaf, None for inner nodes
    fn leaf_slots(&self, node: NodeIdx) -> Option<Range<usize>>;
    fn skip(&self, node: NodeIdx) -> Option<NodeIdx>;

    fn first_child(&self, node: NodeIdx) -> NodeIdx {
        node + 1
    }
}

impl NodeLayout for LinearBvh {
    fn node_count(&self) -> usize {
        self.len()
    }

    fn bbox(&self, node: NodeIdx) -> WorldBox {
        self.node(node).bbox
    }

    fn leaf_slots(&self, node: NodeIdx) -> Option<Range<usize>> {
        match self.node(node).kind {
            NodeKind::Leaf { first, count } => Some(first as usize..(first + count) as usize),
            NodeKind::Inner { .. } => None,
        }
    }

    fn skip(&self, node: NodeIdx) -> Option<NodeIdx> {
        self.node(node).skip
    }
}

impl NodeLayout for [GpuNode] {
    fn node_count(&self) -> usize {
        self.len()
    }

    fn bbox(&self, node: NodeIdx) -> WorldBox {
        self[node.index()].bbox()
    }

    fn leaf_slots(&self, node: NodeIdx) -> Option<Range<usize>> {
        let node = &self[node.index()];
        node.is_leaf()
            .then(|| node.prim_start as usize..(node.prim_start + node.prim_count) as usize)
    }

    fn skip(&self, node: NodeIdx) -> Option<NodeIdx> {
        let skip = self[node.index()].skip;
        (skip != super::INVALID_INDEX).then(|| NodeIdx::from_raw(skip))
    }
}

/// Primitives addressed by their slot in the reordered primitive array.
pub trait SlotPrimitives {
    fn intersect(&self, slot: usize, ray: &Ray, t_max: FloatType) -> Option<TriangleHit>;
}

/// Mesh triangles looked up through the reordered index array.
pub struct MeshSlots<'a, 'm> {
    pub mesh: &'a TriangleMesh<'m>,
    pub prim_indices: &'a [PrimIdx],
}

impl SlotPrimitives for MeshSlots<'_, '_> {
    fn intersect(&self, slot: usize, ray: &Ray, t_max: FloatType) -> Option<TriangleHit> {
        self.mesh
            .triangle(self.prim_indices[slot].index())
            .intersect(ray, t_max)
    }
}

impl SlotPrimitives for [GpuTriangle] {
    fn intersect(&self, slot: usize, ray: &Ray, t_max: FloatType) -> Option<TriangleHit> {
        self[slot].triangle().intersect(ray, t_max)
    }
}

/// Work counters of one or more queries.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TraversalStats {
    pub nodes_visited: usize,
    pub leaves_visited: usize,
    pub primitive_tests: usize,
}

impl TraversalStats {
    pub fn add(&mut self, other: &TraversalStats) {
        self.nodes_visited += other.nodes_visited;
        self.leaves_visited += other.leaves_visited;
        self.primitive_tests += other.primitive_tests;
    }
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct SlotHit {
    pub slot: usize,
    pub hit: TriangleHit,
}

pub fn closest_hit<L, P>(layout: &L, prims: &P, ray: &Ray) -> Option<SlotHit>
where
    L: NodeLayout + ?Sized,
    P: SlotPrimitives + ?Sized,
{
    closest_hit_with_stats(layout, prims, ray, &mut TraversalStats::default())
}

/// Nearest hit in `[ray.t_min, ray.t_max]`. The search range shrinks to each
/// new hit so later boxes behind it are culled. Ties keep the first hit found.
pub fn closest_hit_with_stats<L, P>(
    layout: &L,
    prims: &P,
    ray: &Ray,
    stats: &mut TraversalStats,
) -> Option<SlotHit>
where
    L: NodeLayout + ?Sized,
    P: SlotPrimitives + ?Sized,
{
    let mut best: Option<SlotHit> = None;
    let mut t_max = ray.t_max;

    let mut current = (layout.node_count() > 0).then(|| NodeIdx::new(0));
    while let Some(node) = current {
        stats.nodes_visited += 1;
        if !layout.bbox(node).hit_within(ray, t_max) {
            current = layout.skip(node);
            continue;
        }

        match layout.leaf_slots(node) {
            Some(slots) => {
                stats.leaves_visited += 1;
                for slot in slots {
                    stats.primitive_tests += 1;
                    if let Some(hit) = prims.intersect(slot, ray, t_max) {
                        if best.is_none_or(|best| hit.t < best.hit.t) {
                            t_max = hit.t;
                            best = Some(SlotHit { slot, hit });
                        }
                    }
                }
                current = layout.skip(node);
            }
            None => current = Some(layout.first_child(node)),
        }
    }

    best
}

pub fn any_hit<L, P>(layout: &L, prims: &P, ray: &Ray) -> bool
where
    L: NodeLayout + ?Sized,
    P: SlotPrimitives + ?Sized,
{
    any_hit_with_stats(layout, prims, ray, &mut TraversalStats::default())
}

/// True as soon as any primitive is hit in `[ray.t_min, ray.t_max]`.
pub fn any_hit_with_stats<L, P>(
    layout: &L,
    prims: &P,
    ray: &Ray,
    stats: &mut TraversalStats,
) -> bool
where
    L: NodeLayout + ?Sized,
    P: SlotPrimitives + ?Sized,
{
    let mut current = (layout.node_count() > 0).then(|| NodeIdx::new(0));
    while let Some(node) = current {
        stats.nodes_visited += 1;
        if !layout.bbox(node).hit_within(ray, ray.t_max) {
            current = layout.skip(node);
            continue;
        }

        match layout.leaf_slots(node) {
            Some(slots) => {
                stats.leaves_visited += 1;
                for slot in slots {
                    stats.primitive_tests += 1;
                    if prims.intersect(slot, ray, ray.t_max).is_some() {
                        return true;
                    }
                }
                current = layout.skip(node);
            }
            None => current = Some(layout.first_child(node)),
        }
    }

    false
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        bvh::{BuildParams, BuildStrategy, test::*},
        geometry::{WorldPoint, WorldVector},
    };
    use assert2::{assert, let_assert};
    use rand::{SeedableRng, rngs::SmallRng};
    use rand_distr::{Distribution, UnitSphere};

    /// Nearest hit by testing every triangle.
    fn brute_force(mesh: &TriangleMesh<'_>, ray: &Ray) -> Option<FloatType> {
        (0..mesh.triangle_count())
            .filter_map(|i| mesh.triangle(i).intersect(ray, ray.t_max))
            .map(|hit| hit.t)
            .min_by(FloatType::total_cmp)
    }

    fn random_rays(seed: u64, count: usize) -> Vec<Ray> {
        let mut rng = SmallRng::seed_from_u64(seed);
        (0..count)
            .map(|i| {
                let direction: [f32; 3] = UnitSphere.sample(&mut rng);
                let direction = WorldVector::from(direction);
                // Half the rays start far outside the scene, half inside it
                let origin = if i % 2 == 0 {
                    WorldPoint::origin() - direction * 40.0
                } else {
                    let offset: [f32; 3] = UnitSphere.sample(&mut rng);
                    WorldPoint::from(WorldVector::from(offset) * 5.0)
                };
                Ray::new(origin, direction)
            })
            .collect()
    }

    #[test]
    fn unit_quad_hit() {
        let buffers = unit_quad();
        let mesh = buffers.mesh();
        let_assert!(Ok((bvh, _)) = BuildStrategy::BinnedSah.build(&mesh, &BuildParams::default()));
        let linear = LinearBvh::from_bvh(&bvh);
        let slots = MeshSlots {
            mesh: &mesh,
            prim_indices: linear.prim_indices(),
        };

        let ray = Ray::new(WorldPoint::new(0.5, 0.5, 1.0), WorldVector::new(0.0, 0.0, -1.0));
        let_assert!(Some(hit) = closest_hit(&linear, &slots, &ray));
        assert!(hit.hit.t == 1.0);
        assert!(linear.prim_indices()[hit.slot] == PrimIdx::new(0));
        assert!(hit.hit.uv.u == 0.5);
        assert!(hit.hit.uv.v == 0.5);
        assert!(any_hit(&linear, &slots, &ray));

        let miss = Ray::new(WorldPoint::new(1.5, 0.5, 1.0), WorldVector::new(0.0, 0.0, -1.0));
        assert!(closest_hit(&linear, &slots, &miss) == None);
        assert!(!any_hit(&linear, &slots, &miss));
    }

    #[test]
    fn empty_layout_never_hits() {
        let linear = LinearBvh::default();
        let gpu: Vec<GpuTriangle> = Vec::new();
        let ray = Ray::new(WorldPoint::origin(), WorldVector::new(1.0, 0.0, 0.0));
        assert!(closest_hit(&linear, gpu.as_slice(), &ray) == None);
        assert!(!any_hit(linear.to_gpu_nodes().as_slice(), gpu.as_slice(), &ray));
    }

    #[test]
    fn closest_hit_matches_brute_force() {
        let buffers = random_soup(99, 600);
        let mesh = buffers.mesh();
        let rays = random_rays(4, 500);

        for strategy in BuildStrategy::ALL {
            let_assert!(Ok((bvh, _)) = strategy.build(&mesh, &BuildParams::default()));
            let linear = LinearBvh::from_bvh(&bvh);
            let slots = MeshSlots {
                mesh: &mesh,
                prim_indices: linear.prim_indices(),
            };
            let gpu_nodes = linear.to_gpu_nodes();
            let gpu_triangles: Vec<GpuTriangle> = linear
                .prim_indices()
                .iter()
                .map(|prim| {
                    GpuTriangle::new(&mesh.triangle(prim.index()), mesh.material(prim.index()))
                })
                .collect();

            for ray in &rays {
                let expected = brute_force(&mesh, ray);
                let linear_hit = closest_hit(&linear, &slots, ray).map(|h| h.hit.t);
                let gpu_hit = closest_hit(gpu_nodes.as_slice(), gpu_triangles.as_slice(), ray)
                    .map(|h| h.hit.t);
                assert!(linear_hit == expected, "{strategy}");
                assert!(gpu_hit == expected, "{strategy}");
                assert!(any_hit(&linear, &slots, ray) == expected.is_some(), "{strategy}");
            }
        }
    }

    #[test]
    fn any_hit_does_not_visit_more_leaves_than_closest_hit() {
        let buffers = random_soup(5, 400);
        let mesh = buffers.mesh();
        let_assert!(Ok((bvh, _)) = BuildStrategy::SpatialSah.build(&mesh, &BuildParams::default()));
        let linear = LinearBvh::from_bvh(&bvh);
        let slots = MeshSlots {
            mesh: &mesh,
            prim_indices: linear.prim_indices(),
        };

        for ray in random_rays(8, 200) {
            let mut closest_stats = TraversalStats::default();
            let mut any_stats = TraversalStats::default();
            let closest = closest_hit_with_stats(&linear, &slots, &ray, &mut closest_stats);
            let any = any_hit_with_stats(&linear, &slots, &ray, &mut any_stats);

            assert!(any == closest.is_some());
            assert!(any_stats.leaves_visited <= closest_stats.leaves_visited);
            assert!(any_stats.primitive_tests <= closest_stats.primitive_tests);
        }
    }

    #[test]
    fn range_limits_are_respected() {
        let buffers = unit_quad();
        let mesh = buffers.mesh();
        let_assert!(Ok((bvh, _)) = BuildStrategy::Median.build(&mesh, &BuildParams::default()));
        let linear = LinearBvh::from_bvh(&bvh);
        let slots = MeshSlots {
            mesh: &mesh,
            prim_indices: linear.prim_indices(),
        };

        let origin = WorldPoint::new(0.25, 0.25, 2.0);
        let down = WorldVector::new(0.0, 0.0, -1.0);
        assert!(closest_hit(&linear, &slots, &Ray::with_range(origin, down, 0.0, 1.5)) == None);
        assert!(!any_hit(&linear, &slots, &Ray::with_range(origin, down, 2.5, 10.0)));
        assert!(any_hit(&linear, &slots, &Ray::with_range(origin, down, 1.5, 2.5)));
    }
}
