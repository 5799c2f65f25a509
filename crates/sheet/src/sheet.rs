use crate::cell::CellValue;
use crate::error::{Result, SheetError};
use indexmap::IndexMap;
use std::collections::HashSet;

/// A named table: ordered column names plus row-major cell data.
///
/// Rows never include the header. Every row is exactly `columns().len()`
/// cells wide; short rows are padded with nulls when the sheet is built.
#[derive(Debug, Clone, PartialEq)]
pub struct Sheet {
    name: String,
    columns: Vec<String>,
    rows: Vec<Vec<CellValue>>,
}

impl Sheet {
    /// Create a new empty sheet
    #[must_use]
    pub fn new() -> Self {
        Self::with_name("Sheet1")
    }

    /// Create a new empty sheet with a name
    #[must_use]
    pub fn with_name(name: &str) -> Self {
        Sheet {
            name: name.to_string(),
            columns: Vec::new(),
            rows: Vec::new(),
        }
    }

    /// Build a sheet from a raw grid whose first row is the header.
    ///
    /// Blank header cells become `Column N` and repeated names get a numeric
    /// suffix (`Name`, `Name.1`, ...) so every column name is unique.
    #[must_use]
    pub fn from_grid(name: &str, grid: Vec<Vec<CellValue>>) -> Self {
        let mut grid = grid.into_iter();
        let Some(header) = grid.next() else {
            return Sheet::with_name(name);
        };

        let body: Vec<Vec<CellValue>> = grid.collect();
        let width = body
            .iter()
            .map(Vec::len)
            .max()
            .unwrap_or(0)
            .max(header.len());

        let labels: Vec<String> = (0..width)
            .map(|i| header.get(i).map(CellValue::display_text).unwrap_or_default())
            .collect();
        let columns = unique_column_names(&labels);

        let rows = body
            .into_iter()
            .map(|mut row| {
                row.resize(width, CellValue::Null);
                row
            })
            .collect();

        Sheet {
            name: name.to_string(),
            columns,
            rows,
        }
    }

    /// Create a sheet from a header row and typed data rows
    #[must_use]
    pub fn from_data<T: Into<CellValue>>(name: &str, header: &[&str], rows: Vec<Vec<T>>) -> Self {
        let mut grid: Vec<Vec<CellValue>> = Vec::with_capacity(rows.len() + 1);
        grid.push(header.iter().map(|h| CellValue::from(*h)).collect());
        grid.extend(
            rows.into_iter()
                .map(|row| row.into_iter().map(Into::into).collect()),
        );
        Self::from_grid(name, grid)
    }

    /// Get the sheet name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Set the sheet name
    pub fn set_name(&mut self, name: &str) {
        self.name = name.to_string();
    }

    /// Get column names in order
    #[must_use]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Get the number of data rows (header excluded)
    #[must_use]
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Check if the sheet has no data rows
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Get a row by index
    pub fn row(&self, index: usize) -> Result<&[CellValue]> {
        self.rows
            .get(index)
            .map(Vec::as_slice)
            .ok_or(SheetError::RowIndexOutOfBounds {
                index,
                count: self.rows.len(),
            })
    }

    /// Iterate over data rows
    pub fn rows(&self) -> impl Iterator<Item = &[CellValue]> {
        self.rows.iter().map(Vec::as_slice)
    }

    /// Render a row as column name -> display text, keeping column order.
    #[must_use]
    pub fn render_row(&self, row: &[CellValue]) -> IndexMap<String, String> {
        self.columns
            .iter()
            .zip(row.iter())
            .map(|(name, cell)| (name.clone(), cell.display_text()))
            .collect()
    }
}

impl Default for Sheet {
    fn default() -> Self {
        Self::new()
    }
}

fn unique_column_names(labels: &[String]) -> Vec<String> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut names = Vec::with_capacity(labels.len());

    for (i, label) in labels.iter().enumerate() {
        let base = if label.trim().is_empty() {
            format!("Column {}", i + 1)
        } else {
            label.trim().to_string()
        };

        let mut candidate = base.clone();
        let mut suffix = 1;
        while seen.contains(&candidate) {
            candidate = format!("{base}.{suffix}");
            suffix += 1;
        }
        seen.insert(candidate.clone());
        names.push(candidate);
    }

    names
}
