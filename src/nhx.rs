//! Reader for Newick trees carrying New Hampshire eXtended (`[&&NHX:...]`) annotations.
//!
//! The raw text is first reduced to a single canonical tree: whitespace and plain
//! comments are dropped, quoted labels are unwrapped and every NHX block is moved
//! behind its node's branch length. `phylotree` then parses the structure and the
//! result is copied into a pre-order [`Tree`].

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};
use phylotree::tree::{Node as PhyloNode, Tree as PhyloTree};

use crate::tree::{Node, NodeId, Tree, MUTATIONS_KEY};

const NHX_MARKER: &str = "&&NHX";
const NEWICK_PUNCTUATION: &[char] = &['(', ')', ',', ':', ';', '[', ']'];

pub fn read_tree(path: &Path) -> Result<Tree> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read tree file {:?}", path))?;
    parse_tree(&raw).with_context(|| format!("Failed to parse tree file {:?}", path))
}

/// Parse a single rooted tree terminated by `;`.
pub fn parse_tree(input: &str) -> Result<Tree> {
    let newick = canonical_newick(input)?;
    let phylo = PhyloTree::from_newick(&newick)
        .map_err(|err| anyhow!("Failed to parse newick tree: {err}"))?;
    let tree = tree_from_phylo(&phylo)?;
    check_tip_names(&tree)?;
    Ok(tree)
}

/// Reduce `input` to the first tree in the layout `phylotree` reads.
fn canonical_newick(input: &str) -> Result<String> {
    let mut newick = String::with_capacity(input.len());
    // NHX fields of the node being read, emitted once the node ends.
    let mut pending_nhx = String::new();
    let mut depth = 0usize;
    let mut pos = 0;

    let end = loop {
        let Some(c) = input[pos..].chars().next() else {
            if newick.is_empty() && pending_nhx.is_empty() {
                bail!("Tree input is empty");
            }
            bail!("Expected ';' at end of tree at end of input");
        };
        match c {
            '[' => {
                let close = input[pos..]
                    .find(']')
                    .ok_or_else(|| anyhow!("Unterminated comment at byte {}", pos))?;
                if let Some(fields) = input[pos + 1..pos + close].strip_prefix(NHX_MARKER) {
                    pending_nhx.push_str(fields);
                }
                pos += close + 1;
                continue;
            }
            '\'' => {
                let (label, next) = quoted_label(input, pos)?;
                newick.push_str(&label);
                pos = next;
                continue;
            }
            '(' => depth += 1,
            ')' => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| anyhow!("Unbalanced ')' at byte {}", pos))?;
            }
            ']' => bail!("Unexpected ']' at byte {}", pos),
            _ => {}
        }
        if matches!(c, ',' | ')' | ';') && !pending_nhx.is_empty() {
            newick.push('[');
            newick.push_str(NHX_MARKER);
            newick.push_str(&pending_nhx);
            newick.push(']');
            pending_nhx.clear();
        }
        if !c.is_whitespace() {
            newick.push(c);
        }
        if c == ';' {
            break pos;
        }
        pos += c.len_utf8();
    };

    if depth > 0 {
        bail!("Unbalanced parentheses: {} '(' still open at byte {}", depth, end);
    }
    if newick == ";" {
        bail!("Tree input is empty");
    }
    let trailing = input[end + 1..].trim_start();
    if !trailing.is_empty() {
        bail!(
            "Unexpected content after the first tree at byte {}",
            input.len() - trailing.len()
        );
    }
    Ok(newick)
}

/// Unwrap the quoted label opening at `start`; `''` is an escaped quote.
fn quoted_label(input: &str, start: usize) -> Result<(String, usize)> {
    let mut label = String::new();
    let mut pos = start + 1;
    loop {
        let close = input[pos..]
            .find('\'')
            .ok_or_else(|| anyhow!("Unterminated quoted label at byte {}", start))?;
        label.push_str(&input[pos..pos + close]);
        pos += close + 1;
        if input[pos..].starts_with('\'') {
            label.push('\'');
            pos += 1;
        } else {
            break;
        }
    }
    if label.contains(NEWICK_PUNCTUATION) || label.contains('\'') {
        bail!(
            "Quoted label {:?} at byte {} contains a quote or Newick punctuation",
            label,
            start
        );
    }
    Ok((label, pos))
}

/// Copy a parsed tree into pre-order ids, reading each node's NHX block.
fn tree_from_phylo(phylo: &PhyloTree) -> Result<Tree> {
    let root = phylo
        .get_root()
        .map_err(|err| anyhow!("Parsed tree has no root: {err}"))?;
    let mut nodes: Vec<Node> = Vec::with_capacity(phylo.size());
    let mut stack: Vec<(NodeId, Option<NodeId>)> = vec![(root, None)];

    while let Some((phylo_id, parent)) = stack.pop() {
        let source: &PhyloNode = phylo
            .get(&phylo_id)
            .map_err(|err| anyhow!("Parsed tree lost node {}: {err}", phylo_id))?;
        let id = nodes.len();
        let mut node = Node {
            name: source.name.clone().filter(|name| !name.is_empty()),
            parent,
            branch_length: source.parent_edge,
            ..Node::default()
        };
        if let Some(comment) = source.comment.as_deref() {
            read_nhx_comment(&mut node, comment)?;
        }
        if let Some(parent) = parent {
            nodes[parent].children.push(id);
        }
        nodes.push(node);
        stack.extend(source.children.iter().rev().map(|&child| (child, Some(id))));
    }
    Ok(Tree { nodes })
}

fn read_nhx_comment(node: &mut Node, comment: &str) -> Result<()> {
    let comment = comment.trim();
    let comment = comment.strip_prefix('[').unwrap_or(comment);
    let comment = comment.strip_suffix(']').unwrap_or(comment);
    let Some(body) = comment.strip_prefix(NHX_MARKER) else {
        return Ok(());
    };
    let fields = parse_nhx_fields(body).with_context(|| {
        format!(
            "Invalid NHX annotation on node {}",
            node.name.as_deref().unwrap_or("(unnamed)")
        )
    })?;
    for (key, value) in fields {
        if key == MUTATIONS_KEY {
            node.mutations = split_mutations(&value);
        }
        node.annotations.insert(key, value);
    }
    Ok(())
}
/// Split an NHX body (`:k=v:k2=v2`) into key/value pairs.
///
/// A `:`-separated segment without its own `key=` belongs to the previous value,
/// which keeps gene-prefixed mutations such as `S:N501Y` intact.
fn parse_nhx_fields(body: &str) -> Result<Vec<(String, String)>> {
    let mut fields: Vec<(String, String)> = Vec::new();
    for segment in body.split(':') {
        if segment.trim().is_empty() {
            continue;
        }
        match segment.split_once('=') {
            Some((key, value)) if is_nhx_key(key.trim()) => {
                fields.push((key.trim().to_string(), value.trim().to_string()));
            }
            _ => match fields.last_mut() {
                Some((_, value)) => {
                    value.push(':');
                    value.push_str(segment.trim());
                }
                None => bail!("NHX field {:?} has no key", segment),
            },
        }
    }
    Ok(fields)
}

fn is_nhx_key(key: &str) -> bool {
    !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
}

/// Split a comma-separated mutation list, tolerating `{...}` wrapping.
pub fn split_mutations(value: &str) -> Vec<String> {
    value
        .trim()
        .trim_start_matches('{')
        .trim_end_matches('}')
        .split(',')
        .map(str::trim)
        .filter(|mutation| !mutation.is_empty())
        .map(str::to_string)
        .collect()
}

fn check_tip_names(tree: &Tree) -> Result<()> {
    let mut seen = HashSet::new();
    for id in tree.tips() {
        let name = match tree.node(id).name.as_deref() {
            Some(name) if !name.is_empty() => name,
            _ => bail!("Tip node {} has no name", id),
        };
        if !seen.insert(name) {
            bail!("Duplicate tip name {:?}", name);
        }
    }
    Ok(())
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_names_lengths_and_structure() {
        let tree = parse_tree("((A:0.1,B:0.2)AB:0.3,C:0.4)root;").unwrap();
        assert_eq!(tree.node_count(), 5);
        let root = tree.node(0);
        assert_eq!(root.name.as_deref(), Some("root"));
        assert_eq!(root.children, vec![1, 4]);
        assert_eq!(tree.node(1).name.as_deref(), Some("AB"));
        assert_eq!(tree.node(1).branch_length, Some(0.3));
        assert_eq!(tree.node(3).parent, Some(1));
        assert_eq!(tree.node(4).branch_length, Some(0.4));
    }

    #[test]
    fn parses_multifurcations() {
        let tree = parse_tree("(A,B,C,(D,E));").unwrap();
        assert_eq!(tree.node(0).children.len(), 4);
        assert_eq!(tree.tip_labels(), vec!["A", "B", "C", "D", "E"]);
    }

    #[test]
    fn parses_nhx_annotations_and_mutations() {
        let tree = parse_tree(
            "((A:1[&&NHX:aa_muts=S:N501Y,S:E484K:support=90],B:1):2[&&NHX:aa_muts=A123T],C:1);",
        )
        .unwrap();
        let a = tree.node(2);
        assert_eq!(a.mutations, vec!["S:N501Y", "S:E484K"]);
        assert_eq!(a.annotations.get("support").map(String::as_str), Some("90"));
        assert_eq!(
            a.annotations.get(MUTATIONS_KEY).map(String::as_str),
            Some("S:N501Y,S:E484K")
        );
        assert_eq!(tree.node(1).mutations, vec!["A123T"]);
        assert_eq!(tree.node(1).branch_length, Some(2.0));
    }

    #[test]
    fn annotation_may_precede_branch_length() {
        let tree = parse_tree("(A[&&NHX:aa_muts=Q1R]:0.5,B:1);").unwrap();
        assert_eq!(tree.node(1).mutations, vec!["Q1R"]);
        assert_eq!(tree.node(1).branch_length, Some(0.5));
    }

    #[test]
    fn canonical_form_moves_annotations_behind_lengths() {
        assert_eq!(
            canonical_newick("(A[&&NHX:aa_muts=Q1R]:0.5,B:1)[&&NHX:x=1][&&NHX:y=2];\n").unwrap(),
            "(A:0.5[&&NHX:aa_muts=Q1R],B:1)[&&NHX:x=1:y=2];"
        );
    }

    #[test]
    fn canonical_form_drops_comments_and_whitespace() {
        assert_eq!(
            canonical_newick("[header]\n( A : 1 [note] ,\n B:2 ) ; \n").unwrap(),
            "(A:1,B:2);"
        );
        let err = canonical_newick("('A.1':1,'O''Brien'x:1);").unwrap_err();
        assert_eq!(
            err.to_string(),
            "Quoted label \"O'Brien\" at byte 9 contains a quote or Newick punctuation"
        );
    }

    #[test]
    fn skips_plain_comments_and_whitespace() {
        let tree = parse_tree("[header]\n( A : 1 [note] ,\n B:2 ) ; \n").unwrap();
        assert_eq!(tree.tip_labels(), vec!["A", "B"]);
        assert_eq!(tree.node(1).branch_length, Some(1.0));
    }

    #[test]
    fn unwraps_quoted_labels() {
        let tree = parse_tree("('A.1':1,'B/2':1);").unwrap();
        assert_eq!(tree.tip_labels(), vec!["A.1", "B/2"]);
    }

    #[test]
    fn parses_scientific_branch_lengths() {
        let tree = parse_tree("(A:1.5e-3,B:2E2);").unwrap();
        assert_eq!(tree.node(1).branch_length, Some(0.0015));
        assert_eq!(tree.node(2).branch_length, Some(200.0));
    }

    #[test]
    fn rejects_malformed_trees() {
        for input in [
            "",
            "   ",
            " ; ",
            "(A,B)",
            "(A,B;",
            "(A,B));",
            "(A:x,B);",
            "(A,B); (C,D);",
            "(A[unterminated,B);",
            "(A[&&NHX:aa_muts=X,B);",
            "(A[&&NHX::orphan],B);",
            "(A,B]);",
            "('A,B);",
        ] {
            assert!(parse_tree(input).is_err(), "{input:?} should fail");
        }
    }

    #[test]
    fn rejects_unnamed_and_duplicate_tips() {
        assert!(parse_tree("(A,,B);").is_err());
        let err = parse_tree("((A,B),A);").unwrap_err();
        assert!(err.to_string().contains("Duplicate tip name"), "{err}");
    }

    #[test]
    fn unnamed_tip_is_reported() {
        let tree = Tree {
            nodes: vec![
                Node {
                    children: vec![1, 2],
                    ..Node::default()
                },
                Node {
                    name: Some("A".to_string()),
                    parent: Some(0),
                    ..Node::default()
                },
                Node {
                    parent: Some(0),
                    ..Node::default()
                },
            ],
        };
        let err = check_tip_names(&tree).unwrap_err();
        assert!(err.to_string().contains("no name"), "{err}");
    }

    #[test]
    fn error_reports_byte_offset() {
        let err = parse_tree("(A,B));").unwrap_err();
        assert_eq!(err.to_string(), "Unbalanced ')' at byte 5");
        let err = parse_tree("(A,B); x").unwrap_err();
        assert!(err.to_string().contains("byte 7"), "{err}");
    }

    #[test]
    fn nhx_field_without_key_is_an_error() {
        assert!(parse_nhx_fields(":orphan").is_err());
        let fields = parse_nhx_fields(":a=1:b=x:y").unwrap();
        assert_eq!(
            fields,
            vec![
                ("a".to_string(), "1".to_string()),
                ("b".to_string(), "x:y".to_string())
            ]
        );
    }

    #[test]
    fn splits_mutation_lists() {
        assert_eq!(split_mutations(" {A1T, B2C,} "), vec!["A1T", "B2C"]);
        assert!(split_mutations("").is_empty());
    }
}
