use anyhow::{bail, Result};

/// Page dimensions in millimeters.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PaperSize {
    pub width_mm: f64,
    pub height_mm: f64,
}

pub const DEFAULT_PAPER_SIZE: &str = "A4p";

const MM_PER_POINT: f64 = 25.4 / 72.0;

// Portrait dimensions; the `l` variant of each code swaps them.
const PORTRAIT_SIZES: &[(&str, f64, f64)] = &[
    ("A0", 841.0, 1189.0),
    ("A1", 594.0, 841.0),
    ("A2", 420.0, 594.0),
    ("A3", 297.0, 420.0),
    ("A4", 210.0, 297.0),
    ("A5", 148.0, 210.0),
    ("Letter", 215.9, 279.4),
    ("Legal", 215.9, 355.6),
];

impl PaperSize {
    /// Look up a size code such as `A4p` (portrait) or `A3l` (landscape).
    pub fn from_code(code: &str) -> Result<Self> {
        let trimmed = code.trim();
        let (base, orientation) = match trimmed.char_indices().last() {
            Some((idx, ch)) => (&trimmed[..idx], ch),
            None => bail!("Empty paper size code; expected one of {}", known_codes().join(", ")),
        };
        let found = PORTRAIT_SIZES
            .iter()
            .find(|(name, _, _)| name.eq_ignore_ascii_case(base));
        match (found, orientation) {
            (Some(&(_, w, h)), 'p' | 'P') => Ok(Self {
                width_mm: w,
                height_mm: h,
            }),
            (Some(&(_, w, h)), 'l' | 'L') => Ok(Self {
                width_mm: h,
                height_mm: w,
            }),
            _ => bail!(
                "Unknown paper size {:?}; expected one of {}",
                code,
                known_codes().join(", ")
            ),
        }
    }

    pub fn width_pt(&self) -> f64 {
        self.width_mm / MM_PER_POINT
    }

    pub fn height_pt(&self) -> f64 {
        self.height_mm / MM_PER_POINT
    }
}

pub fn known_codes() -> Vec<String> {
    PORTRAIT_SIZES
        .iter()
        .flat_map(|(name, _, _)| [format!("{name}p"), format!("{name}l")])
        .collect()
}

/// Convert millimeters to PDF points.
pub fn mm_to_pt(mm: f64) -> f64 {
    mm / MM_PER_POINT
}
