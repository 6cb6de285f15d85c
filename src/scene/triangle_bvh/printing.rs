use crate::{
    bvh::NodeKind,
    util::Stats,
};

use super::TriangleBvh;

impl TriangleBvh<'_> {
    pub fn print_tree(&self) {
        for line in self.tree_lines() {
            println!("{}", line);
        }
    }

    pub fn print_statistics(&self) {
        let report = &self.report;
        println!("{}", report);
        println!("Subtree sizes: {}", self.subtree_size_statistics());
    }

    /// One line per node, indented by depth, with the leaf triangles listed under each leaf.
    fn tree_lines(&self) -> Vec<String> {
        let mut lines = Vec::new();
        let mut depth: Vec<usize> = Vec::with_capacity(self.linear.len());

        for (index, node) in self.linear.nodes().iter_enumerated() {
            let indent = node.parent.map_or(0, |parent| depth[parent.index()] + 1);
            depth.push(indent);

            let label = match node.kind {
                NodeKind::Leaf { .. } => "L",
                NodeKind::Inner { .. } => "I",
            };
            lines.push(format!(
                "{}- {}{}: {:?}-{:?}",
                "  ".repeat(indent),
                label,
                index.index(),
                node.bbox.min,
                node.bbox.max,
            ));

            let prim_indent = "  ".repeat(indent + 1);
            for prim in self.linear.leaf_prims(index) {
                let triangle = self.mesh.triangle(prim.index());
                lines.push(format!(
                    "{}{}: {:?}, {:?}, {:?}",
                    prim_indent,
                    prim.index(),
                    triangle[0],
                    triangle[1],
                    triangle[2]
                ));
            }
        }

        lines
    }

    /// Number of nodes under each inner node, read off the skip links.
    fn subtree_size_statistics(&self) -> Stats {
        let mut stats = Stats::default();
        let len = self.linear.len();
        stats.add_samples(
            self.linear
                .nodes()
                .iter_enumerated()
                .filter(|(_, node)| matches!(node.kind, NodeKind::Inner { .. }))
                .map(|(index, node)| node.skip.map_or(len, |skip| skip.index()) - index.index()),
        );
        stats
    }
}
