//! Rendering instructions for an annotated tree, independent of the drawing backend.

use std::collections::{BTreeSet, HashMap};

use chrono::NaiveDate;

use crate::clades::ResolvedClade;
use crate::palette::{ColorPalette, Rgb, Shape, ShapePalette};
use crate::sizing::LabelSizes;
use crate::table::{AttributeColumn, Metadata};
use crate::tree::{NodeId, Tree, TreeLayout};

#[derive(Clone, Debug, PartialEq)]
pub struct TipMark {
    pub node: NodeId,
    pub label: String,
    pub label_color: Rgb,
    pub marker: Option<(Rgb, Shape)>,
}

/// Vertical bar beside a clade's tips; `x` is in tree units.
#[derive(Clone, Debug, PartialEq)]
pub struct CladeBracket {
    pub name: String,
    pub x: f64,
    pub min_row: f64,
    pub max_row: f64,
}

/// Mutation text placed over the middle of a branch.
#[derive(Clone, Debug, PartialEq)]
pub struct BranchLabel {
    pub text: String,
    pub x: f64,
    pub row: f64,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum LegendKey {
    Swatch(Rgb),
    Marker(Rgb, Shape),
}

#[derive(Clone, Debug, PartialEq)]
pub struct LegendEntry {
    pub label: String,
    pub key: LegendKey,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Legend {
    pub title: String,
    pub entries: Vec<LegendEntry>,
}

/// How tips are styled from metadata.
pub struct TipStyling<'a> {
    pub metadata: &'a Metadata,
    pub label_column: &'a AttributeColumn,
    pub point_column: &'a AttributeColumn,
    pub colors: &'a ColorPalette,
    pub shapes: &'a ShapePalette,
}

#[derive(Clone, Debug)]
pub struct TreePlot {
    pub title: String,
    pub tree: Tree,
    pub layout: TreeLayout,
    pub tips: Vec<TipMark>,
    pub clades: Vec<CladeBracket>,
    pub branch_labels: Vec<BranchLabel>,
    pub legends: Vec<Legend>,
    pub sizes: LabelSizes,
}

impl TreePlot {
    pub fn build(
        tree: Tree,
        layout: TreeLayout,
        styling: &TipStyling,
        clades: &[ResolvedClade],
        offsets: &[f64],
        sizes: LabelSizes,
        title: String,
    ) -> Self {
        let (tips, legends) = style_tips(&tree, styling);
        let clades = clades
            .iter()
            .zip(offsets)
            .map(|(clade, offset)| {
                let span = layout.span(clade.node);
                CladeBracket {
                    name: clade.name.clone(),
                    x: span.max_x + offset,
                    min_row: span.min_row,
                    max_row: span.max_row,
                }
            })
            .collect();
        let branch_labels = branch_labels(&tree, &layout);

        Self {
            title,
            tree,
            layout,
            tips,
            clades,
            branch_labels,
            legends,
            sizes,
        }
    }
}

fn style_tips(tree: &Tree, styling: &TipStyling) -> (Vec<TipMark>, Vec<Legend>) {
    let tip_ids = tree.tips();
    let labelled: Vec<(NodeId, &str)> = tip_ids
        .iter()
        .filter_map(|&id| tree.node(id).name.as_deref().map(|name| (id, name)))
        .collect();

    let value_of = |taxon: &str, column: &AttributeColumn| styling.metadata.value(taxon, column);
    let label_values: BTreeSet<&str> = labelled
        .iter()
        .filter_map(|(_, name)| value_of(name, styling.label_column))
        .collect();
    let point_values: BTreeSet<&str> = labelled
        .iter()
        .filter_map(|(_, name)| value_of(name, styling.point_column))
        .collect();

    // Labels and markers share one color scale.
    let all_values: BTreeSet<&str> = label_values.union(&point_values).copied().collect();
    let colors: HashMap<String, Rgb> = styling.colors.assign_colors(&all_values);
    let shapes: HashMap<String, Shape> = styling.shapes.assign_shapes(&point_values);

    let tips = labelled
        .iter()
        .map(|&(node, name)| {
            let label_color = value_of(name, styling.label_column)
                .and_then(|value| colors.get(value).copied())
                .unwrap_or(Rgb::BLACK);
            let marker = value_of(name, styling.point_column).and_then(|value| {
                Some((colors.get(value).copied()?, shapes.get(value).copied()?))
            });
            TipMark {
                node,
                label: name.to_string(),
                label_color,
                marker,
            }
        })
        .collect();

    let mut legends = Vec::new();
    if !label_values.is_empty() {
        legends.push(Legend {
            title: styling.label_column.name.clone(),
            entries: label_values
                .iter()
                .map(|value| LegendEntry {
                    label: value.to_string(),
                    key: LegendKey::Swatch(colors[*value]),
                })
                .collect(),
        });
    }
    if !point_values.is_empty() {
        legends.push(Legend {
            title: styling.point_column.name.clone(),
            entries: point_values
                .iter()
                .map(|value| LegendEntry {
                    label: value.to_string(),
                    key: LegendKey::Marker(colors[*value], shapes[*value]),
                })
                .collect(),
        });
    }
    (tips, legends)
}

fn branch_labels(tree: &Tree, layout: &TreeLayout) -> Vec<BranchLabel> {
    tree.nodes
        .iter()
        .enumerate()
        .filter(|(_, node)| !node.mutations.is_empty())
        .filter_map(|(id, node)| {
            let parent = node.parent?;
            Some(BranchLabel {
                text: node.mutations.join(", "),
                x: (layout.x[parent] + layout.x[id]) / 2.0,
                row: layout.y[id],
            })
        })
        .collect()
}

/// Title followed by the date it was drawn on.
pub fn stamped_title(title: &str, date: NaiveDate) -> String {
    let title = title.trim();
    let date = date.format("%Y-%m-%d");
    if title.is_empty() {
        date.to_string()
    } else {
        format!("{title} {date}")
    }
}
