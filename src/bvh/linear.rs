use index_vec::{IndexSlice, IndexVec};

use super::{BuildNodeIdx, Bvh, GpuNode, NodeIdx, PrimIdx};
use crate::geometry::WorldBox;

#[derive(Clone, Debug, PartialEq)]
pub enum NodeKind {
    /// Range `first..first + count` of `LinearBvh::prim_indices()`
    Leaf { first: u32, count: u32 },
    /// The left child is always the next node
    Inner { right: NodeIdx },
}

#[derive(Clone, Debug, PartialEq)]
pub struct Node {
    pub bbox: WorldBox,
    pub kind: NodeKind,
    /// Next node in pre-order after this node's subtree, None past the end of the tree
    pub skip: Option<NodeIdx>,
    pub parent: Option<NodeIdx>,
}

/// A tree flattened into pre-order, ready for stackless traversal.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LinearBvh {
    nodes: IndexVec<NodeIdx, Node>,
    prim_indices: Vec<PrimIdx>,
}

impl LinearBvh {
    /// Lays out the build tree in pre-order (left subtree first).
    #[tracing::instrument(skip_all, fields(nodes = bvh.node_count()))]
    pub fn from_bvh(bvh: &Bvh) -> LinearBvh {
        let order: Vec<BuildNodeIdx> = bvh.preorder().map(|(index, _)| index).collect();

        let mut linear_index: IndexVec<BuildNodeIdx, NodeIdx> =
            IndexVec::from_vec(vec![NodeIdx::new(0); bvh.node_count()]);
        for (i, build_index) in order.iter().enumerate() {
            linear_index[*build_index] = NodeIdx::new(i);
        }

        // Subtree sizes, children before parents
        let mut subtree_size: IndexVec<BuildNodeIdx, usize> =
            IndexVec::from_vec(vec![1; bvh.node_count()]);
        for build_index in order.iter().rev() {
            if let Some([left, right]) = bvh.node(*build_index).children() {
                subtree_size[*build_index] = 1 + subtree_size[left] + subtree_size[right];
            }
        }

        let total = order.len();
        let nodes = order
            .iter()
            .enumerate()
            .map(|(i, build_index)| {
                let build_node = bvh.node(*build_index);
                let kind = match build_node.children() {
                    Some([left, right]) => {
                        assert2::debug_assert!(linear_index[left].index() == i + 1);
                        NodeKind::Inner {
                            right: linear_index[right],
                        }
                    }
                    None => {
                        let prims = build_node.prim_range().unwrap_or_default();
                        NodeKind::Leaf {
                            first: prims.start as u32,
                            count: prims.len() as u32,
                        }
                    }
                };
                let skip = i + subtree_size[*build_index];
                Node {
                    bbox: build_node.bbox,
                    kind,
                    skip: (skip < total).then(|| NodeIdx::new(skip)),
                    parent: build_node.parent.map(|parent| linear_index[parent]),
                }
            })
            .collect();

        LinearBvh {
            nodes,
            prim_indices: bvh.prim_indices().to_vec(),
        }
    }

    pub fn nodes(&self) -> &IndexSlice<NodeIdx, [Node]> {
        &self.nodes
    }

    pub fn node(&self, index: NodeIdx) -> &Node {
        &self.nodes[index]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn prim_indices(&self) -> &[PrimIdx] {
        &self.prim_indices
    }

    /// Primitives of a leaf, empty for inner nodes.
    pub fn leaf_prims(&self, index: NodeIdx) -> &[PrimIdx] {
        match self.nodes[index].kind {
            NodeKind::Leaf { first, count } => {
                &self.prim_indices[first as usize..(first + count) as usize]
            }
            NodeKind::Inner { .. } => &[],
        }
    }

    pub fn bounding_box(&self) -> WorldBox {
        self.nodes
            .iter()
            .next()
            .map_or_else(WorldBox::empty, |root| root.bbox)
    }

    /// Packs the nodes into the fixed device layout.
    pub fn to_gpu_nodes(&self) -> Vec<GpuNode> {
        self.nodes.iter().map(GpuNode::from).collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::bvh::{BuildParams, BuildStrategy, test::*};
    use assert2::{assert, let_assert};

    #[test]
    fn empty_tree() {
        let linear = LinearBvh::from_bvh(&Bvh::new());
        assert!(linear.is_empty());
        assert!(linear.bounding_box().is_empty());
    }

    #[test]
    fn single_leaf() {
        let buffers = unit_quad();
        let params = BuildParams::default();
        let_assert!(Ok((bvh, _)) = BuildStrategy::BinnedSah.build(&buffers.mesh(), &params));
        let linear = LinearBvh::from_bvh(&bvh);

        assert!(linear.len() == 1);
        let root = linear.node(NodeIdx::new(0));
        assert!(root.kind == NodeKind::Leaf { first: 0, count: 2 });
        assert!(root.skip == None);
        assert!(root.parent == None);
    }

    #[test]
    fn layout_matches_build_tree() {
        let buffers = random_soup(13, 400);
        let mesh = buffers.mesh();
        for strategy in BuildStrategy::ALL {
            let_assert!(Ok((bvh, _)) = strategy.build(&mesh, &BuildParams::default()));
            let linear = LinearBvh::from_bvh(&bvh);
            assert!(linear.len() == bvh.node_count());
            assert!(linear.bounding_box() == bvh.bounding_box());

            // Pre-order of the array is the pre-order descent of the build tree
            for ((build_index, _), node) in bvh.preorder().zip(linear.nodes().iter()) {
                assert!(node.bbox == bvh.node(build_index).bbox);
            }

            check_layout(&linear);
        }
    }

    /// Left child at i + 1, right child after the left subtree, skip after the whole subtree.
    fn check_layout(linear: &LinearBvh) {
        fn subtree_end(linear: &LinearBvh, index: NodeIdx) -> usize {
            match linear.node(index).kind {
                NodeKind::Leaf { .. } => index.index() + 1,
                NodeKind::Inner { right } => subtree_end(linear, right),
            }
        }

        for (index, node) in linear.nodes().iter_enumerated() {
            let end = subtree_end(linear, index);
            assert!(node.skip.map_or(linear.len(), |skip| skip.index()) == end);

            if let NodeKind::Inner { right } = node.kind {
                let left = index + 1;
                assert!(linear.node(left).parent == Some(index));
                assert!(linear.node(right).parent == Some(index));
                assert!(right.index() == subtree_end(linear, left));
                assert!(node.bbox.contains_box(&linear.node(left).bbox));
                assert!(node.bbox.contains_box(&linear.node(right).bbox));
            }
        }
    }
}
