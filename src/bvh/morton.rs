use index_vec::IndexVec;
use rayon::prelude::*;
use tracing::debug;

use super::{
    BuildNode, BuildNodeIdx, BuildNodeKind, BuildParams, Bvh, BvhBuilder, PrimitiveRef,
    SplitCounts,
    radix_sort::{MortonKey, radix_sort},
};
use crate::{
    geometry::{Axis, FloatType, WorldBox, WorldPoint, WorldVector},
    scene::mesh::TriangleMesh,
};

/// Bits per axis of the quantization grid
const GRID_BITS: u32 = 10;
const GRID_MAX: FloatType = ((1 << GRID_BITS) - 1) as FloatType;

/// Linear BVH builder: sorts primitives along a Morton curve and derives the tree
/// from the code bits, one level at a time. Every stage runs in parallel.
pub struct MortonBuilder;

impl BvhBuilder for MortonBuilder {
    #[tracing::instrument(name = "morton", skip_all)]
    fn build(&self, mesh: &TriangleMesh<'_>, params: &BuildParams) -> (Bvh, SplitCounts) {
        let refs: Vec<PrimitiveRef> = (0..mesh.triangle_count())
            .into_par_iter()
            .map(|i| PrimitiveRef {
                prim: i.into(),
                bbox: mesh.triangle(i).bounding_box(),
            })
            .collect();
        if refs.is_empty() {
            return (Bvh::new(), SplitCounts::default());
        }

        let scene_bbox = refs
            .par_iter()
            .map(|r| r.bbox)
            .reduce(WorldBox::empty, |a, b| a.union(&b));
        let grid = MortonGrid::new(&scene_bbox);
        let keys: Vec<MortonKey> = refs
            .par_iter()
            .map(|r| MortonKey {
                code: grid.encode(&r.centroid()),
                prim: r.prim,
            })
            .collect();
        debug!(primitives = keys.len(), "computed morton codes");

        let keys = radix_sort(keys);
        let codes: Vec<u32> = keys.par_iter().map(|k| k.code).collect();
        debug!("sorted morton codes");

        let fallback_axis = scene_bbox.max_extent_axis();
        let (mut nodes, level_starts, counts) =
            emit_levels(&codes, params.max_leaf_prims, fallback_axis);
        debug!(nodes = nodes.len(), levels = level_starts.len(), "emitted hierarchy");

        fit_boxes(&mut nodes, &level_starts, &keys, &refs);

        let prim_indices = keys.into_iter().map(|k| k.prim).collect();
        (
            Bvh::from_parts(IndexVec::from_vec(nodes), Some(BuildNodeIdx::new(0)), prim_indices),
            counts,
        )
    }
}

/// Quantizes points inside a box to a 1024^3 grid.
#[derive(Copy, Clone, Debug)]
struct MortonGrid {
    min: WorldPoint,
    scale: WorldVector,
}

impl MortonGrid {
    fn new(bbox: &WorldBox) -> MortonGrid {
        let size = bbox.size();
        MortonGrid {
            min: bbox.min,
            // Flat axes all map to cell 0
            scale: size.map(|extent| if extent > 0.0 { GRID_MAX / extent } else { 0.0 }),
        }
    }

    fn encode(&self, p: &WorldPoint) -> u32 {
        let cell = (p - self.min)
            .component_mul(&self.scale)
            .map(|x| x.clamp(0.0, GRID_MAX) as u32);
        morton_code(cell.x, cell.y, cell.z)
    }
}

/// Spreads the low 10 bits of `v` so that there are two zero bits between each.
fn expand_bits(v: u32) -> u32 {
    let mut v = v & 0x3ff;
    v = (v | (v << 16)) & 0x0300_00ff;
    v = (v | (v << 8)) & 0x0300_f00f;
    v = (v | (v << 4)) & 0x030c_30c3;
    v = (v | (v << 2)) & 0x0924_9249;
    v
}

/// 30 bit Morton code, x in the highest bit of each triple.
fn morton_code(x: u32, y: u32, z: u32) -> u32 {
    (expand_bits(x) << 2) | (expand_bits(y) << 1) | expand_bits(z)
}

/// Axis that a code bit belongs to.
fn bit_axis(bit: u32) -> Axis {
    2 - (bit % 3) as Axis
}

/// One pending range of sorted primitives, `first..=last`.
#[derive(Copy, Clone, Debug, PartialEq)]
struct SplitRequest {
    first: u32,
    last: u32,
    parent: Option<BuildNodeIdx>,
    /// Last index of the left half, None if the range becomes a leaf
    split: Option<u32>,
}

impl SplitRequest {
    fn count(&self) -> usize {
        (self.last - self.first + 1) as usize
    }
}

/// Highest index in `first..last` whose code shares a longer prefix with `codes[first]`
/// than `codes[last]` does. Binary search over the prefix length.
/// Ranges of identical codes split in the middle.
fn find_split(codes: &[u32], first: u32, last: u32) -> u32 {
    let first_code = codes[first as usize];
    let last_code = codes[last as usize];
    if first_code == last_code {
        return (first + last) >> 1;
    }

    let common_prefix = (first_code ^ last_code).leading_zeros();
    let mut split = first;
    let mut step = last - first;
    loop {
        step = (step + 1) >> 1;
        let candidate = split + step;
        if candidate < last {
            let prefix = (first_code ^ codes[candidate as usize]).leading_zeros();
            if prefix > common_prefix {
                split = candidate;
            }
        }
        if step <= 1 {
            break;
        }
    }
    split
}

/// Processes split requests level by level and returns nodes in level-major order
/// with the start index of each level. Boxes are left empty.
fn emit_levels(
    codes: &[u32],
    max_leaf_prims: usize,
    fallback_axis: Axis,
) -> (Vec<BuildNode>, Vec<usize>, SplitCounts) {
    let mut nodes: Vec<BuildNode> = Vec::with_capacity(2 * codes.len());
    let mut level_starts = Vec::new();
    let mut counts = SplitCounts::default();

    let mut level = vec![SplitRequest {
        first: 0,
        last: (codes.len() - 1) as u32,
        parent: None,
        split: None,
    }];

    while !level.is_empty() {
        let level_start = nodes.len();
        level_starts.push(level_start);

        level.par_iter_mut().for_each(|request| {
            if request.count() > max_leaf_prims {
                request.split = Some(find_split(codes, request.first, request.last));
            }
        });

        // Exclusive scan over the "became inner" flags, each inner node owns
        // one pair of slots in the next level
        let mut inner_count = 0;
        let child_slots: Vec<usize> = level
            .iter()
            .map(|request| {
                let slot = inner_count;
                if request.split.is_some() {
                    inner_count += 1;
                    if codes[request.first as usize] == codes[request.last as usize] {
                        counts.midpoint += 1;
                    } else {
                        counts.object += 1;
                    }
                }
                slot
            })
            .collect();
        let next_start = level_start + level.len();

        let level_nodes: Vec<BuildNode> = level
            .par_iter()
            .zip(&child_slots)
            .map(|(request, slot)| {
                let kind = match request.split {
                    None => BuildNodeKind::Leaf {
                        prims: request.first as usize..request.last as usize + 1,
                    },
                    Some(_) => {
                        let left = BuildNodeIdx::from_usize(next_start + 2 * slot);
                        let differing =
                            codes[request.first as usize] ^ codes[request.last as usize];
                        let axis = if differing == 0 {
                            fallback_axis
                        } else {
                            bit_axis(u32::BITS - 1 - differing.leading_zeros())
                        };
                        BuildNodeKind::Inner {
                            axis,
                            children: [Some(left), Some(left + 1)],
                        }
                    }
                };
                BuildNode {
                    bbox: WorldBox::empty(),
                    kind,
                    parent: request.parent,
                }
            })
            .collect();

        let next_level: Vec<SplitRequest> = level
            .par_iter()
            .enumerate()
            .filter_map(|(i, request)| request.split.map(|split| (level_start + i, request, split)))
            .flat_map_iter(|(index, request, split)| {
                let parent = Some(BuildNodeIdx::from_usize(index));
                [
                    SplitRequest {
                        first: request.first,
                        last: split,
                        parent,
                        split: None,
                    },
                    SplitRequest {
                        first: split + 1,
                        last: request.last,
                        parent,
                        split: None,
                    },
                ]
            })
            .collect();
        assert2::debug_assert!(next_level.len() == 2 * inner_count);

        debug!(
            level = level_starts.len() - 1,
            nodes = level.len(),
            inner = inner_count,
            "processed level"
        );
        nodes.extend(level_nodes);
        level = next_level;
    }

    (nodes, level_starts, counts)
}

/// Fits boxes bottom up, deepest level first. Children of a level are all in the
/// next one, so each level only reads boxes finished in the previous step.
fn fit_boxes(
    nodes: &mut [BuildNode],
    level_starts: &[usize],
    keys: &[MortonKey],
    refs: &[PrimitiveRef],
) {
    for (level, &start) in level_starts.iter().enumerate().rev() {
        let end = level_starts.get(level + 1).copied().unwrap_or(nodes.len());
        let (current, deeper) = nodes[start..].split_at_mut(end - start);
        let deeper: &[BuildNode] = deeper;

        current.par_iter_mut().for_each(|node| {
            let bbox = match &node.kind {
                BuildNodeKind::Leaf { prims } => keys[prims.clone()]
                    .iter()
                    .fold(WorldBox::empty(), |acc, key| acc.union(&refs[key.prim.index()].bbox)),
                BuildNodeKind::Inner { children, .. } => children
                    .iter()
                    .flatten()
                    .fold(WorldBox::empty(), |acc, child| {
                        acc.union(&deeper[child.index() - end].bbox)
                    }),
            };
            node.bbox = bbox;
        });
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::bvh::{BuildStrategy, test::*};
    use assert2::{assert, let_assert};
    use test_case::test_case;

    #[test]
    fn expand_bits_spreads_ten_bits() {
        assert!(expand_bits(0) == 0);
        assert!(expand_bits(1) == 1);
        assert!(expand_bits(0b11) == 0b1001);
        assert!(expand_bits(0x3ff) == 0x0924_9249);
        // Bits above the tenth are ignored
        assert!(expand_bits(0x400) == 0);
    }

    #[test_case(1, 0, 0, 0b100 ; "x")]
    #[test_case(0, 1, 0, 0b010 ; "y")]
    #[test_case(0, 0, 1, 0b001 ; "z")]
    #[test_case(0x3ff, 0x3ff, 0x3ff, 0x3fff_ffff ; "all")]
    fn interleave(x: u32, y: u32, z: u32, expected: u32) {
        assert!(morton_code(x, y, z) == expected);
    }

    #[test_case(29, 0 ; "top_bit_is_x")]
    #[test_case(2, 0 ; "x")]
    #[test_case(1, 1 ; "y")]
    #[test_case(0, 2 ; "z")]
    fn axis_of_bit(bit: u32, expected: Axis) {
        assert!(bit_axis(bit) == expected);
    }

    #[test]
    fn grid_corners() {
        let bbox = WorldBox::new([-1.0, 0.0, 2.0].into(), [1.0, 4.0, 2.0].into());
        let grid = MortonGrid::new(&bbox);
        assert!(grid.encode(&bbox.min) == 0);
        // z is flat and maps to 0
        assert!(grid.encode(&bbox.max) == morton_code(0x3ff, 0x3ff, 0));
        // Points outside are clamped
        assert!(grid.encode(&WorldPoint::new(10.0, 10.0, 10.0)) == grid.encode(&bbox.max));
    }

    #[test]
    fn split_at_highest_differing_bit() {
        let codes = [0b000, 0b001, 0b100, 0b101, 0b111];
        assert!(find_split(&codes, 0, 3) == 1);
        assert!(find_split(&codes, 0, 4) == 1);
        assert!(find_split(&codes, 2, 4) == 3);
        assert!(find_split(&codes, 1, 2) == 1);
    }

    #[test]
    fn identical_codes_split_in_the_middle() {
        let codes = [7; 6];
        assert!(find_split(&codes, 0, 5) == 2);
        assert!(find_split(&codes, 2, 3) == 2);
    }

    #[test]
    fn levels_are_stored_in_order() {
        let codes: Vec<u32> = (0..40).map(|i| i * 3).collect();
        let (nodes, level_starts, counts) = emit_levels(&codes, 2, 0);

        assert!(level_starts[0] == 0);
        assert!(level_starts.windows(2).all(|w| w[0] < w[1]));
        let inner = nodes.iter().filter(|n| !n.is_leaf()).count();
        assert!(nodes.len() == 2 * inner + 1);
        assert!(counts.object == inner);

        for (i, node) in nodes.iter().enumerate() {
            if let Some(parent) = node.parent {
                assert!(parent.index() < i);
                let_assert!(BuildNodeKind::Inner { children, .. } = &nodes[parent.index()].kind);
                assert!(children.contains(&Some(BuildNodeIdx::from_usize(i))));
            }
        }
    }

    #[test]
    fn boxes_are_exact_unions_of_primitive_boxes() {
        let buffers = random_soup(21, 500);
        let mesh = buffers.mesh();
        let_assert!(Ok((bvh, _)) = BuildStrategy::Morton.build(&mesh, &BuildParams::default()));
        check_tree(&bvh, &mesh);

        // Leaves are contiguous in leaf order, so a subtree covers one range of prim_indices
        fn subtree_box(bvh: &Bvh, mesh: &TriangleMesh<'_>, index: BuildNodeIdx) -> WorldBox {
            match bvh.node(index).children() {
                None => bvh
                    .leaf_prims(index)
                    .iter()
                    .fold(WorldBox::empty(), |acc, p| {
                        acc.union(&mesh.triangle(p.index()).bounding_box())
                    }),
                Some([l, r]) => subtree_box(bvh, mesh, l).union(&subtree_box(bvh, mesh, r)),
            }
        }
        for (index, node) in bvh.nodes().iter_enumerated() {
            assert!(node.bbox == subtree_box(&bvh, &mesh, index));
        }
    }

    #[test]
    fn identical_centroids_still_split() {
        let triangles = vec![[[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]]; 20];
        let buffers = MeshBuffers::from_triangles(&triangles);
        let mesh = buffers.mesh();
        let params = BuildParams::default();
        let_assert!(Ok((bvh, report)) = BuildStrategy::Morton.build(&mesh, &params));
        check_tree(&bvh, &mesh);
        assert!(report.splits.midpoint == report.inner_count);
        assert!(report.leaf_size.max <= 4);
    }
}
