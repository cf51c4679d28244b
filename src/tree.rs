use std::collections::{BTreeMap, HashMap};

/// Arena index of a node; assigned in pre-order, so the root is always 0 and
/// every parent has a smaller id than its children.
pub type NodeId = phylotree::tree::NodeId;

/// NHX key holding the amino-acid mutations inferred on a node's branch.
pub const MUTATIONS_KEY: &str = "aa_muts";

#[derive(Clone, Debug, Default)]
pub struct Node {
    pub name: Option<String>,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    pub branch_length: Option<f64>,
    pub annotations: BTreeMap<String, String>,
    pub mutations: Vec<String>,
}

impl Node {
    pub fn is_tip(&self) -> bool {
        self.children.is_empty()
    }
}

/// Rooted phylogenetic tree with an explicit node list.
#[derive(Clone, Debug)]
pub struct Tree {
    pub nodes: Vec<Node>,
}

impl Tree {
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id]
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Tip ids in the order they appear in the tree file.
    pub fn tips(&self) -> Vec<NodeId> {
        // Pre-order ids visit tips left to right.
        (0..self.nodes.len())
            .filter(|&id| self.nodes[id].is_tip())
            .collect()
    }

    pub fn tip_labels(&self) -> Vec<&str> {
        self.tips()
            .into_iter()
            .filter_map(|id| self.nodes[id].name.as_deref())
            .collect()
    }

    /// Whether any branch carries a positive length; otherwise the tree is drawn as a cladogram.
    fn has_branch_lengths(&self) -> bool {
        self.nodes
            .iter()
            .skip(1)
            .any(|node| node.branch_length.is_some_and(|len| len > 0.0))
    }
}

/// First node id carrying each mutation, built once per tree.
#[derive(Debug, Default)]
pub struct MutationIndex {
    first_node: HashMap<String, NodeId>,
}

impl MutationIndex {
    pub fn build(tree: &Tree) -> Self {
        let mut first_node = HashMap::new();
        for (id, node) in tree.nodes.iter().enumerate() {
            for mutation in &node.mutations {
                first_node.entry(mutation.clone()).or_insert(id);
            }
        }
        Self { first_node }
    }

    pub fn first_node_with(&self, mutation: &str) -> Option<NodeId> {
        self.first_node.get(mutation).copied()
    }

    pub fn mutation_count(&self) -> usize {
        self.first_node.len()
    }
}

/// Rectangular phylogram coordinates in tree units (x) and tip rows (y).
#[derive(Clone, Debug)]
pub struct TreeLayout {
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    pub tip_count: usize,
    spans: Vec<CladeSpan>,
}

/// Extent of the tips below a node.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CladeSpan {
    pub min_row: f64,
    pub max_row: f64,
    pub max_x: f64,
}

impl TreeLayout {
    pub fn compute(tree: &Tree) -> Self {
        let count = tree.node_count();
        let unit_lengths = !tree.has_branch_lengths();
        let mut layout = Self {
            x: vec![0.0; count],
            y: vec![0.0; count],
            tip_count: 0,
            spans: vec![
                CladeSpan {
                    min_row: 0.0,
                    max_row: 0.0,
                    max_x: 0.0,
                };
                count
            ],
        };
        if count == 0 {
            return layout;
        }

        // Parents precede children in id order, so one forward pass places x and tip
        // rows and one backward pass folds children into their parents.
        for id in 0..count {
            let node = tree.node(id);
            if let Some(parent) = node.parent {
                let length = if unit_lengths {
                    1.0
                } else {
                    node.branch_length.unwrap_or(0.0).max(0.0)
                };
                layout.x[id] = layout.x[parent] + length;
            }
            if node.is_tip() {
                let row = layout.tip_count as f64;
                layout.tip_count += 1;
                layout.y[id] = row;
                layout.spans[id] = CladeSpan {
                    min_row: row,
                    max_row: row,
                    max_x: layout.x[id],
                };
            }
        }

        for id in (0..count).rev() {
            let node = tree.node(id);
            if node.is_tip() {
                continue;
            }
            let mut span = CladeSpan {
                min_row: f64::INFINITY,
                max_row: f64::NEG_INFINITY,
                max_x: f64::NEG_INFINITY,
            };
            let mut row_sum = 0.0;
            for &child in &node.children {
                row_sum += layout.y[child];
                let child_span = layout.spans[child];
                span.min_row = span.min_row.min(child_span.min_row);
                span.max_row = span.max_row.max(child_span.max_row);
                span.max_x = span.max_x.max(child_span.max_x);
            }
            layout.y[id] = row_sum / node.children.len() as f64;
            layout.spans[id] = span;
        }
        layout
    }

    /// Horizontal extent of the tree: the largest root-to-tip distance.
    pub fn width(&self) -> f64 {
        self.x.iter().copied().fold(0.0, f64::max)
    }

    pub fn span(&self, id: NodeId) -> CladeSpan {
        self.spans[id]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nhx::parse_tree;

    #[test]
    fn tips_follow_file_order() {
        let tree = parse_tree("((A:1,B:2):1,(C:1,D:1):2);").unwrap();
        assert_eq!(tree.tip_labels(), vec!["A", "B", "C", "D"]);
        assert_eq!(tree.node_count(), 7);
    }

    #[test]
    fn layout_places_tips_on_rows_and_parents_at_mean() {
        let tree = parse_tree("((A:1,B:2):1,C:4);").unwrap();
        let layout = TreeLayout::compute(&tree);
        // Pre-order ids: 0 root, 1 (A,B), 2 A, 3 B, 4 C
        assert_eq!(layout.tip_count, 3);
        assert_eq!(layout.y[2], 0.0);
        assert_eq!(layout.y[3], 1.0);
        assert_eq!(layout.y[4], 2.0);
        assert_eq!(layout.y[1], 0.5);
        assert_eq!(layout.y[0], 1.25);
        assert_eq!(layout.x[3], 3.0);
        assert_eq!(layout.width(), 4.0);
    }

    #[test]
    fn clade_span_covers_descendant_tips() {
        let tree = parse_tree("((A:1,B:2):1,C:1);").unwrap();
        let layout = TreeLayout::compute(&tree);
        assert_eq!(
            layout.span(1),
            CladeSpan {
                min_row: 0.0,
                max_row: 1.0,
                max_x: 3.0
            }
        );
        assert_eq!(layout.span(0).max_row, 2.0);
    }

    #[test]
    fn missing_lengths_become_a_cladogram() {
        let tree = parse_tree("((A,B),C);").unwrap();
        let layout = TreeLayout::compute(&tree);
        assert_eq!(layout.x[2], 2.0);
        assert_eq!(layout.x[4], 1.0);
        assert_eq!(layout.width(), 2.0);
    }

    #[test]
    fn mutation_index_keeps_first_node() {
        let tree = parse_tree(
            "((A:1[&&NHX:aa_muts=S1T],B:1)[&&NHX:aa_muts=X9Y,S1T]:1,C:1[&&NHX:aa_muts=X9Y]);",
        )
        .unwrap();
        let index = MutationIndex::build(&tree);
        assert_eq!(index.mutation_count(), 2);
        assert_eq!(index.first_node_with("S1T"), Some(1));
        assert_eq!(index.first_node_with("X9Y"), Some(1));
        assert_eq!(index.first_node_with("Q1R"), None);
    }

    fn ladder(depth: usize) -> String {
        let mut newick = "(".repeat(depth - 1);
        newick.push_str("(T0:1,T1:1)");
        for tip in 2..=depth {
            newick.push_str(&format!(":1,T{tip}:1)"));
        }
        newick.push(';');
        newick
    }

    #[test]
    fn deeply_nested_trees_parse_and_lay_out() {
        let depth = 20_000;
        let tree = parse_tree(&ladder(depth)).unwrap();
        assert_eq!(tree.node_count(), 2 * depth + 1);
        let tips = tree.tip_labels();
        assert_eq!(tips.len(), depth + 1);
        assert_eq!(tips[0], "T0");
        assert_eq!(tips[depth], format!("T{depth}"));

        let layout = TreeLayout::compute(&tree);
        assert_eq!(layout.tip_count, depth + 1);
        assert_eq!(layout.width(), depth as f64);
        assert_eq!(layout.span(0).max_row, depth as f64);
    }
}
