use anyhow::{bail, Result};
use log::{debug, warn};

use crate::table::CladeRow;
use crate::tree::{MutationIndex, NodeId};

/// Offsets are spaced in steps of this fraction of the tree width.
const OFFSET_STEP_FRACTION: f64 = 0.02;
const OFFSET_START_FRACTION: f64 = 0.2;
const OFFSET_END_FRACTION: f64 = 1.3;
/// Number of distinct offsets cycled through by consecutive clades.
const OFFSET_CYCLE_LEN: usize = 3;

#[derive(Clone, Debug, PartialEq)]
pub struct ResolvedClade {
    pub name: String,
    pub node: NodeId,
}

/// The first node whose mutations intersect `mutations`.
///
/// "First" is the lowest pre-order id: the root is 0 and nodes are numbered as
/// they appear in the tree file. This differs from the tips-then-internal-nodes
/// numbering used by ape and treeio when a mutation occurs on both a tip and an
/// internal node.
pub fn resolve_node(mutations: &[String], index: &MutationIndex) -> Option<NodeId> {
    mutations
        .iter()
        .filter_map(|mutation| index.first_node_with(mutation))
        .min()
}

/// Resolve clade rows to tree nodes, dropping rows that match no node.
pub fn resolve_clades(rows: &[CladeRow], index: &MutationIndex) -> Vec<ResolvedClade> {
    let mut resolved = Vec::with_capacity(rows.len());
    let mut dropped = Vec::new();
    for row in rows {
        match resolve_node(&row.mutations, index) {
            Some(node) => resolved.push(ResolvedClade {
                name: row.name.clone(),
                node,
            }),
            None => dropped.push(row.name.as_str()),
        }
    }
    if !dropped.is_empty() {
        warn!(
            "{} of {} clades matched no node in the tree and were dropped",
            dropped.len(),
            rows.len()
        );
        debug!("Dropped clades: {}", dropped.join(", "));
    }
    resolved
}

/// Label offsets for `count` clades, cycling through the first few values of
/// an evenly spaced range so neighbouring brackets do not overlap.
pub fn clade_offsets(tree_width: f64, count: usize) -> Result<Vec<f64>> {
    if count == 0 {
        return Ok(Vec::new());
    }
    if !tree_width.is_finite() || tree_width <= 0.0 {
        bail!("Cannot place clade labels on a tree of width {}", tree_width);
    }

    let step = tree_width * OFFSET_STEP_FRACTION;
    let start = tree_width * OFFSET_START_FRACTION;
    let end = tree_width * OFFSET_END_FRACTION;
    // Tolerate rounding at the closed end of the range.
    let limit = end + step * 1e-9;
    let cycle: Vec<f64> = (0..)
        .map(|i| start + step * i as f64)
        .take_while(|offset| *offset <= limit)
        .take(OFFSET_CYCLE_LEN)
        .collect();
    if cycle.is_empty() {
        bail!("No clade offsets fit in [{}, {}]", start, end);
    }

    Ok(cycle.iter().copied().cycle().take(count).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nhx::parse_tree;

    fn approx_eq(left: &[f64], right: &[f64]) -> bool {
        left.len() == right.len() && left.iter().zip(right).all(|(a, b)| (a - b).abs() < 1e-9)
    }

    fn row(name: &str, mutations: &[&str]) -> CladeRow {
        CladeRow {
            name: name.to_string(),
            mutations: mutations.iter().map(|m| m.to_string()).collect(),
        }
    }

    #[test]
    fn resolves_to_the_node_carrying_the_mutation() {
        // Pre-order ids: 0 root, 1, 2 A, 3 B, 4, 5, 6 C, 7 D, 8 E
        let tree = parse_tree("((A:1,B:1):1,((C:1,D:1)[&&NHX:aa_muts=A123T]:1,E:1):1);").unwrap();
        assert_eq!(tree.node(5).mutations, vec!["A123T"]);
        let index = MutationIndex::build(&tree);
        assert_eq!(resolve_node(&["A123T".to_string()], &index), Some(5));
        assert_eq!(resolve_node(&["Z999Z".to_string()], &index), None);
        assert_eq!(resolve_node(&[], &index), None);
    }

    #[test]
    fn first_intersecting_node_wins() {
        let tree = parse_tree(
            "((A:1[&&NHX:aa_muts=M2N],B:1)[&&NHX:aa_muts=K1L]:1,C:1[&&NHX:aa_muts=M2N]);",
        )
        .unwrap();
        let index = MutationIndex::build(&tree);
        let mutations = vec!["M2N".to_string(), "K1L".to_string()];
        assert_eq!(resolve_node(&mutations, &index), Some(1));
        assert_eq!(resolve_node(&["M2N".to_string()], &index), Some(2));
    }

    #[test]
    fn internal_node_listed_before_a_tip_comes_first() {
        // Pre-order ids: 0 root, 1 (B,C), 2 B, 3 C, 4 A
        let tree = parse_tree(
            "((B:1,C:1):1[&&NHX:aa_muts=X1Y],A:1[&&NHX:aa_muts=X1Y]);",
        )
        .unwrap();
        let index = MutationIndex::build(&tree);
        assert_eq!(resolve_node(&["X1Y".to_string()], &index), Some(1));
    }

    #[test]
    fn unresolved_clades_are_dropped_in_order() {
        let tree = parse_tree("((A:1,B:1)[&&NHX:aa_muts=A123T]:1,C:1[&&NHX:aa_muts=C5D]);").unwrap();
        let index = MutationIndex::build(&tree);
        let rows = vec![
            row("Gamma", &["C5D"]),
            row("Missing", &["Q9Q"]),
            row("Alpha", &["X1Y", "A123T"]),
        ];
        let resolved = resolve_clades(&rows, &index);
        assert_eq!(
            resolved,
            vec![
                ResolvedClade {
                    name: "Gamma".to_string(),
                    node: 4
                },
                ResolvedClade {
                    name: "Alpha".to_string(),
                    node: 1
                },
            ]
        );
    }

    #[test]
    fn offsets_cycle_through_first_three_values() {
        let offsets = clade_offsets(100.0, 5).unwrap();
        assert!(approx_eq(&offsets, &[20.0, 22.0, 24.0, 20.0, 22.0]), "{offsets:?}");
    }

    #[test]
    fn offsets_scale_with_tree_width() {
        let offsets = clade_offsets(0.05, 4).unwrap();
        assert!(approx_eq(&offsets, &[0.01, 0.011, 0.012, 0.01]), "{offsets:?}");
        assert!(approx_eq(&clade_offsets(100.0, 2).unwrap(), &[20.0, 22.0]));
    }

    #[test]
    fn no_clades_need_no_offsets() {
        assert!(clade_offsets(0.0, 0).unwrap().is_empty());
        assert!(clade_offsets(100.0, 0).unwrap().is_empty());
    }

    #[test]
    fn degenerate_widths_are_rejected() {
        assert!(clade_offsets(0.0, 1).is_err());
        assert!(clade_offsets(-5.0, 1).is_err());
        assert!(clade_offsets(f64::NAN, 1).is_err());
        assert!(clade_offsets(f64::INFINITY, 1).is_err());
    }
}
