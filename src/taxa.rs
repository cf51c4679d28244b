use std::collections::HashSet;

use log::{info, warn};

/// Report tree tips that have no metadata row.
///
/// Missing tips are not an error: they are drawn without styling. The missing
/// names are returned in tree order.
pub fn check_taxa<'a>(tips: &[&'a str], metadata_taxa: &[&str]) -> Vec<&'a str> {
    let known: HashSet<&str> = metadata_taxa.iter().copied().collect();
    let missing: Vec<&str> = tips
        .iter()
        .copied()
        .filter(|tip| !known.contains(tip))
        .collect();

    if missing.is_empty() {
        info!("All {} tree tips have metadata", tips.len());
    } else {
        warn!(
            "{} of {} tree tips have no metadata: {}",
            missing.len(),
            tips.len(),
            missing.join(", ")
        );
    }
    missing
}
