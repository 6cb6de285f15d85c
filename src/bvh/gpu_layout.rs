//! Fixed binary layout for uploading a linear BVH to a compute device.

use bytemuck::{Pod, Zeroable};

use super::{Node, NodeKind, NodeIdx};
use crate::geometry::{Triangle, WorldBox, WorldPoint};

/// "No node" marker for `skip`, `parent` and `right`.
pub const INVALID_INDEX: u32 = u32::MAX;

/// One node of the linear BVH, 48 bytes.
/// `prim_count == 0` marks an inner node, whose left child is the next node.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct GpuNode {
    pub bbox_min: [f32; 3],
    pub prim_start: u32,
    pub bbox_max: [f32; 3],
    pub prim_count: u32,
    pub right: u32,
    pub skip: u32,
    pub parent: u32,
    pub _pad: u32,
}

const _: () = assert!(std::mem::size_of::<GpuNode>() == 48);

fn pack_index(index: Option<NodeIdx>) -> u32 {
    index.map_or(INVALID_INDEX, |index| index.raw())
}

impl From<&Node> for GpuNode {
    fn from(node: &Node) -> Self {
        let (prim_start, prim_count, right) = match node.kind {
            NodeKind::Leaf { first, count } => (first, count, INVALID_INDEX),
            NodeKind::Inner { right } => (0, 0, right.raw()),
        };
        GpuNode {
            bbox_min: node.bbox.min.into(),
            prim_start,
            bbox_max: node.bbox.max.into(),
            prim_count,
            right,
            skip: pack_index(node.skip),
            parent: pack_index(node.parent),
            _pad: 0,
        }
    }
}

impl GpuNode {
    pub fn is_leaf(&self) -> bool {
        self.prim_count > 0
    }

    pub fn bbox(&self) -> WorldBox {
        WorldBox::new(self.bbox_min.into(), self.bbox_max.into())
    }
}

/// Triangle positions with material id, stored in leaf order, 48 bytes.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct GpuTriangle {
    pub v0: [f32; 3],
    pub material: u32,
    pub v1: [f32; 3],
    pub _pad0: u32,
    pub v2: [f32; 3],
    pub _pad1: u32,
}

const _: () = assert!(std::mem::size_of::<GpuTriangle>() == 48);

impl GpuTriangle {
    pub fn new(triangle: &Triangle<WorldPoint>, material: u32) -> GpuTriangle {
        GpuTriangle {
            v0: triangle[0].into(),
            material,
            v1: triangle[1].into(),
            _pad0: 0,
            v2: triangle[2].into(),
            _pad1: 0,
        }
    }

    pub fn triangle(&self) -> Triangle<WorldPoint> {
        Triangle::new(self.v0.into(), self.v1.into(), self.v2.into())
    }
}
