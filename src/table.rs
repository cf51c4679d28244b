use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};
use log::debug;

use crate::nhx::split_mutations;

/// Column naming a clade in the clade table.
pub const CLADE_NAME_COLUMN: &str = "clade";
/// Column listing the comma-separated mutations that define a clade.
pub const CLADE_MUTATIONS_COLUMN: &str = "aa_muts";

/// Header-keyed tab-separated table.
#[derive(Clone, Debug)]
pub struct TsvTable {
    pub header: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl TsvTable {
    pub fn read(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("Failed to open {:?}", path))?;
        Self::from_reader(BufReader::new(file)).with_context(|| format!("Failed to parse {:?}", path))
    }

    /// Parse a table whose first non-empty line is the header.
    ///
    /// Blank lines and lines starting with `#` are skipped. Short rows are padded
    /// with empty cells; rows longer than the header are rejected.
    pub fn from_reader<R: BufRead>(reader: R) -> Result<Self> {
        let mut header: Option<Vec<String>> = None;
        let mut rows = Vec::new();

        for (line_no, line) in reader.lines().enumerate() {
            let line = line?;
            let line = line.trim_end_matches(['\r', '\n']);
            if line.trim().is_empty() || line.starts_with('#') {
                continue;
            }
            let mut cells: Vec<String> = line.split('\t').map(|cell| cell.trim().to_string()).collect();
            let Some(width) = header.as_ref().map(Vec::len) else {
                header = Some(cells);
                continue;
            };
            if cells.len() > width {
                bail!(
                    "Line {} has {} fields but the header has {}",
                    line_no + 1,
                    cells.len(),
                    width
                );
            }
            cells.resize(width, String::new());
            rows.push(cells);
        }

        let header = header.ok_or_else(|| anyhow!("Table is empty"))?;
        Ok(Self { header, rows })
    }

    pub fn column_index(&self, name: &str) -> Result<usize> {
        self.header
            .iter()
            .position(|column| column == name)
            .ok_or_else(|| {
                anyhow!(
                    "Column {:?} not found; available columns: {}",
                    name,
                    self.header.join(", ")
                )
            })
    }
}

/// Sample metadata keyed by the first column (taxon name).
#[derive(Clone, Debug)]
pub struct Metadata {
    table: TsvTable,
    by_taxon: HashMap<String, usize>,
}

impl Metadata {
    pub fn read(path: &Path) -> Result<Self> {
        Self::from_table(TsvTable::read(path)?)
    }

    pub fn from_table(table: TsvTable) -> Result<Self> {
        if table.header.len() < 2 {
            bail!("Metadata needs a taxon column and at least one attribute column");
        }
        let mut by_taxon = HashMap::new();
        for (index, row) in table.rows.iter().enumerate() {
            let taxon = &row[0];
            if taxon.is_empty() {
                continue;
            }
            if by_taxon.contains_key(taxon) {
                debug!("Duplicate metadata row for {:?}; keeping the first", taxon);
                continue;
            }
            by_taxon.insert(taxon.clone(), index);
        }
        Ok(Self { table, by_taxon })
    }

    pub fn taxa(&self) -> Vec<&str> {
        self.table
            .rows
            .iter()
            .map(|row| row[0].as_str())
            .filter(|taxon| !taxon.is_empty())
            .collect()
    }

    /// Resolve an attribute column by name; the taxon column itself is not an attribute.
    pub fn attribute(&self, name: &str) -> Result<AttributeColumn> {
        let index = self
            .table
            .column_index(name)
            .context("Metadata column missing")?;
        Ok(AttributeColumn {
            name: name.to_string(),
            index,
        })
    }

    /// Non-empty value of `column` for `taxon`.
    pub fn value(&self, taxon: &str, column: &AttributeColumn) -> Option<&str> {
        let row = self.by_taxon.get(taxon)?;
        let value = self.table.rows[*row][column.index].as_str();
        (!value.is_empty()).then_some(value)
    }
}

#[derive(Clone, Debug)]
pub struct AttributeColumn {
    pub name: String,
    index: usize,
}

/// One row of the clade table before resolution against the tree.
#[derive(Clone, Debug, PartialEq)]
pub struct CladeRow {
    pub name: String,
    pub mutations: Vec<String>,
}

pub fn read_clades(path: &Path) -> Result<Vec<CladeRow>> {
    clades_from_table(&TsvTable::read(path)?)
        .with_context(|| format!("Invalid clade table {:?}", path))
}

pub fn clades_from_table(table: &TsvTable) -> Result<Vec<CladeRow>> {
    let name_index = table.column_index(CLADE_NAME_COLUMN)?;
    let mutations_index = table.column_index(CLADE_MUTATIONS_COLUMN)?;
    Ok(table
        .rows
        .iter()
        .filter(|row| !row[name_index].is_empty())
        .map(|row| CladeRow {
            name: row[name_index].clone(),
            mutations: split_mutations(&row[mutations_index]),
        })
        .collect())
}
