use anyhow::{bail, Result};

const TIP_POINT_SCALE: f64 = 1.0;
const LEGEND_GLYPH_SCALE: f64 = 2.0;
const BRANCH_LABEL_SCALE: f64 = 0.6;

/// Base text size for tip labels: one line of the page per tree node.
pub fn tip_label_size(page_height_mm: f64, node_count: usize) -> Result<f64> {
    if node_count == 0 {
        bail!("Cannot size tip labels for a tree without nodes");
    }
    Ok(page_height_mm / node_count as f64)
}

/// Text and glyph sizes in millimeters, all derived from the tip-label size.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LabelSizes {
    pub tip_label: f64,
    pub tip_point: f64,
    pub legend_glyph: f64,
    pub branch_label: f64,
}

impl LabelSizes {
    pub fn for_page(page_height_mm: f64, node_count: usize) -> Result<Self> {
        let base = tip_label_size(page_height_mm, node_count)?;
        Ok(Self {
            tip_label: base,
            tip_point: base * TIP_POINT_SCALE,
            legend_glyph: base * LEGEND_GLYPH_SCALE,
            branch_label: base * BRANCH_LABEL_SCALE,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_is_height_over_node_count() {
        assert_eq!(tip_label_size(297.0, 99).unwrap(), 3.0);
        assert_eq!(tip_label_size(210.0, 1).unwrap(), 210.0);
    }

    #[test]
    fn empty_tree_is_rejected() {
        assert!(tip_label_size(297.0, 0).is_err());
        assert!(LabelSizes::for_page(297.0, 0).is_err());
    }

    #[test]
    fn derived_sizes_scale_from_base() {
        let sizes = LabelSizes::for_page(297.0, 99).unwrap();
        assert_eq!(sizes.tip_label, 3.0);
        assert_eq!(sizes.tip_point, 3.0);
        assert_eq!(sizes.legend_glyph, 6.0);
        assert!((sizes.branch_label - 1.8).abs() < 1e-12);
    }
}
