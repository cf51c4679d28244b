use std::collections::{BTreeSet, HashMap};
use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};
use log::debug;

use crate::table::TsvTable;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Rgb {
    pub r: f64,
    pub g: f64,
    pub b: f64,
    pub a: f64,
}

impl Rgb {
    pub const BLACK: Rgb = Rgb {
        r: 0.0,
        g: 0.0,
        b: 0.0,
        a: 1.0,
    };

    pub fn from_u8(r: u8, g: u8, b: u8) -> Self {
        Self {
            r: r as f64 / 255.0,
            g: g as f64 / 255.0,
            b: b as f64 / 255.0,
            a: 1.0,
        }
    }

    /// Parse `#RRGGBB`, `#RRGGBBAA` or a named color.
    pub fn parse(value: &str) -> Result<Self> {
        let value = value.trim();
        if let Some(hex) = value.strip_prefix('#') {
            let channel = |range: std::ops::Range<usize>| -> Result<u8> {
                hex.get(range)
                    .and_then(|digits| u8::from_str_radix(digits, 16).ok())
                    .ok_or_else(|| anyhow!("Invalid hex color {:?}", value))
            };
            return match hex.len() {
                6 => Ok(Self::from_u8(channel(0..2)?, channel(2..4)?, channel(4..6)?)),
                8 => {
                    let mut color = Self::from_u8(channel(0..2)?, channel(2..4)?, channel(4..6)?);
                    color.a = channel(6..8)? as f64 / 255.0;
                    Ok(color)
                }
                _ => bail!("Invalid hex color {:?}", value),
            };
        }
        NAMED_COLORS
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(value))
            .map(|&(_, (r, g, b))| Self::from_u8(r, g, b))
            .ok_or_else(|| anyhow!("Unknown color {:?}", value))
    }
}

const NAMED_COLORS: &[(&str, (u8, u8, u8))] = &[
    ("black", (0, 0, 0)),
    ("white", (255, 255, 255)),
    ("grey", (190, 190, 190)),
    ("gray", (190, 190, 190)),
    ("grey50", (127, 127, 127)),
    ("red", (255, 0, 0)),
    ("darkred", (139, 0, 0)),
    ("green", (0, 255, 0)),
    ("darkgreen", (0, 100, 0)),
    ("forestgreen", (34, 139, 34)),
    ("blue", (0, 0, 255)),
    ("navy", (0, 0, 128)),
    ("steelblue", (70, 130, 180)),
    ("skyblue", (135, 206, 235)),
    ("cyan", (0, 255, 255)),
    ("magenta", (255, 0, 255)),
    ("purple", (160, 32, 240)),
    ("orange", (255, 165, 0)),
    ("darkorange", (255, 140, 0)),
    ("gold", (255, 215, 0)),
    ("yellow", (255, 255, 0)),
    ("brown", (165, 42, 42)),
    ("pink", (255, 192, 203)),
    ("salmon", (250, 128, 114)),
    ("turquoise", (64, 224, 208)),
];

// Used in order for categories that a palette file does not name.
const FALLBACK_COLORS: &[(u8, u8, u8)] = &[
    (0xE6, 0x9F, 0x00),
    (0x56, 0xB4, 0xE9),
    (0x00, 0x9E, 0x73),
    (0xD5, 0x5E, 0x00),
    (0x00, 0x72, 0xB2),
    (0xCC, 0x79, 0xA7),
    (0xF0, 0xE4, 0x42),
    (0x99, 0x99, 0x99),
    (0x66, 0x33, 0x99),
    (0x88, 0x22, 0x55),
];

fn fallback_color(index: usize) -> Rgb {
    let (r, g, b) = FALLBACK_COLORS[index % FALLBACK_COLORS.len()];
    Rgb::from_u8(r, g, b)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Shape {
    Circle,
    Square,
    Triangle,
    TriangleDown,
    Diamond,
    OpenCircle,
    OpenSquare,
    OpenTriangle,
    OpenDiamond,
    Plus,
    Cross,
}

impl Shape {
    /// Parse a shape name or an R `pch` code.
    pub fn parse(value: &str) -> Result<Self> {
        let value = value.trim();
        if let Ok(code) = value.parse::<u8>() {
            return Self::from_pch(code).ok_or_else(|| anyhow!("Unsupported pch code {}", code));
        }
        let shape = match value.to_ascii_lowercase().replace(['-', ' '], "_").as_str() {
            "circle" => Shape::Circle,
            "square" => Shape::Square,
            "triangle" => Shape::Triangle,
            "triangle_down" => Shape::TriangleDown,
            "diamond" => Shape::Diamond,
            "circle_open" | "open_circle" => Shape::OpenCircle,
            "square_open" | "open_square" => Shape::OpenSquare,
            "triangle_open" | "open_triangle" => Shape::OpenTriangle,
            "diamond_open" | "open_diamond" => Shape::OpenDiamond,
            "plus" => Shape::Plus,
            "cross" => Shape::Cross,
            _ => bail!("Unknown shape {:?}", value),
        };
        Ok(shape)
    }

    fn from_pch(code: u8) -> Option<Self> {
        let shape = match code {
            0 => Shape::OpenSquare,
            1 => Shape::OpenCircle,
            2 => Shape::OpenTriangle,
            3 => Shape::Plus,
            4 => Shape::Cross,
            5 => Shape::OpenDiamond,
            6 | 25 => Shape::TriangleDown,
            15 | 22 => Shape::Square,
            16 | 19 | 20 | 21 => Shape::Circle,
            17 | 24 => Shape::Triangle,
            18 | 23 => Shape::Diamond,
            _ => return None,
        };
        Some(shape)
    }

    pub fn is_filled(self) -> bool {
        matches!(
            self,
            Shape::Circle | Shape::Square | Shape::Triangle | Shape::TriangleDown | Shape::Diamond
        )
    }
}

const FALLBACK_SHAPES: &[Shape] = &[
    Shape::Circle,
    Shape::Triangle,
    Shape::Square,
    Shape::Diamond,
    Shape::TriangleDown,
    Shape::OpenCircle,
    Shape::OpenTriangle,
    Shape::OpenSquare,
    Shape::Plus,
    Shape::Cross,
];

/// Category → value lookup with a deterministic fallback sequence.
#[derive(Clone, Debug)]
pub struct Palette<T> {
    entries: HashMap<String, T>,
}

pub type ColorPalette = Palette<Rgb>;
pub type ShapePalette = Palette<Shape>;

impl<T: Copy> Palette<T> {
    pub fn empty() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    fn from_table(table: &TsvTable, parse: fn(&str) -> Result<T>) -> Result<Self> {
        if table.header.len() < 2 {
            bail!("Palette needs a category column and a value column");
        }
        let mut entries = HashMap::new();
        for row in &table.rows {
            if row[0].is_empty() {
                continue;
            }
            let value = parse(&row[1]).with_context(|| format!("Bad entry for {:?}", row[0]))?;
            entries.insert(row[0].clone(), value);
        }
        Ok(Self { entries })
    }

    pub fn get(&self, category: &str) -> Option<T> {
        self.entries.get(category).copied()
    }

    /// Assign a value to every category: palette entries first, then the
    /// fallback sequence in sorted category order.
    fn assign(&self, categories: &BTreeSet<&str>, fallback: &[T]) -> HashMap<String, T> {
        let mut next = 0usize;
        categories
            .iter()
            .map(|category| {
                let value = match self.get(category) {
                    Some(value) => value,
                    None => {
                        debug!("No palette entry for {:?}; using a default", category);
                        let value = fallback[next % fallback.len()];
                        next += 1;
                        value
                    }
                };
                (category.to_string(), value)
            })
            .collect()
    }
}

impl ColorPalette {
    pub fn read(path: &Path) -> Result<Self> {
        let table = TsvTable::read(path)?;
        Self::from_table(&table, Rgb::parse)
            .with_context(|| format!("Invalid color palette {:?}", path))
    }

    pub fn assign_colors(&self, categories: &BTreeSet<&str>) -> HashMap<String, Rgb> {
        let fallback: Vec<Rgb> = (0..FALLBACK_COLORS.len()).map(fallback_color).collect();
        self.assign(categories, &fallback)
    }
}

impl ShapePalette {
    pub fn read(path: &Path) -> Result<Self> {
        let table = TsvTable::read(path)?;
        Self::from_table(&table, Shape::parse)
            .with_context(|| format!("Invalid shape palette {:?}", path))
    }

    pub fn assign_shapes(&self, categories: &BTreeSet<&str>) -> HashMap<String, Shape> {
        self.assign(categories, FALLBACK_SHAPES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(text: &str) -> TsvTable {
        TsvTable::from_reader(text.as_bytes()).unwrap()
    }

    #[test]
    fn parses_hex_and_named_colors() {
        assert_eq!(Rgb::parse("#FF0000").unwrap(), Rgb::from_u8(255, 0, 0));
        assert_eq!(Rgb::parse("Steelblue").unwrap(), Rgb::from_u8(70, 130, 180));
        let translucent = Rgb::parse("#00000080").unwrap();
        assert!((translucent.a - 128.0 / 255.0).abs() < 1e-9);
        for bad in ["#FFF", "#GG0000", "chartreuse-ish", "#ééé"] {
            assert!(Rgb::parse(bad).is_err(), "{bad}");
        }
    }

    #[test]
    fn parses_shape_names_and_pch_codes() {
        assert_eq!(Shape::parse("circle").unwrap(), Shape::Circle);
        assert_eq!(Shape::parse("Triangle-Down").unwrap(), Shape::TriangleDown);
        assert_eq!(Shape::parse("17").unwrap(), Shape::Triangle);
        assert_eq!(Shape::parse("1").unwrap(), Shape::OpenCircle);
        assert!(Shape::parse("9").is_err());
        assert!(Shape::parse("hexagon").is_err());
        assert!(!Shape::OpenSquare.is_filled());
    }

    #[test]
    fn palette_entries_win_over_fallback() {
        let palette =
            ColorPalette::from_table(&table("lineage\tcolor\nB.1\t#000000\n"), Rgb::parse).unwrap();
        let categories: BTreeSet<&str> = ["B.2", "B.1", "A"].into_iter().collect();
        let colors = palette.assign_colors(&categories);
        assert_eq!(colors["B.1"], Rgb::BLACK);
        assert_eq!(colors["A"], fallback_color(0));
        assert_eq!(colors["B.2"], fallback_color(1));
    }

    #[test]
    fn fallback_shapes_cycle() {
        let palette = ShapePalette::empty();
        let names: Vec<String> = (0..FALLBACK_SHAPES.len() + 1).map(|i| format!("c{i:02}")).collect();
        let categories: BTreeSet<&str> = names.iter().map(String::as_str).collect();
        let shapes = palette.assign_shapes(&categories);
        assert_eq!(shapes["c00"], Shape::Circle);
        assert_eq!(shapes[&names[FALLBACK_SHAPES.len()]], Shape::Circle);
    }

    #[test]
    fn bad_palette_value_is_an_error() {
        let err = ShapePalette::from_table(&table("group\tshape\nX\tblob\n"), Shape::parse)
            .unwrap_err();
        assert!(format!("{err:#}").contains("blob"), "{err:#}");
    }
}
