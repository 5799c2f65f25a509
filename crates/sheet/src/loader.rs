use crate::book::Book;
use crate::csv;
use crate::error::{Result, SheetError};
use crate::format::DocumentFormat;
use crate::sheet::Sheet;
use crate::xlsx;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Lightweight description of a document, cheap enough for listing pages.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    pub sheet_names: Vec<String>,
    /// Column names of the first sheet
    pub columns: Vec<String>,
    /// Data rows in the first sheet (header excluded)
    pub row_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Metadata {
    /// Empty metadata carrying an error marker
    #[must_use]
    pub fn failed(error: impl ToString) -> Self {
        Metadata {
            error: Some(error.to_string()),
            ..Metadata::default()
        }
    }
}

/// Parses document bytes into sheets.
///
/// A loader holds no document state: every call decodes the bytes it is
/// given, so two calls never share parsed data.
#[derive(Debug, Clone)]
pub struct Loader {
    format: DocumentFormat,
    csv_sheet_name: String,
}

impl Loader {
    /// Create a loader for a known format
    #[must_use]
    pub fn new(format: DocumentFormat) -> Self {
        Loader {
            format,
            csv_sheet_name: "Sheet1".to_string(),
        }
    }

    /// Create a loader for a named document, sniffing the bytes when the name
    /// has no recognised extension.
    ///
    /// CSV documents expose a single sheet named after the file stem.
    pub fn for_document(name: &str, bytes: &[u8]) -> Result<Self> {
        let format = DocumentFormat::detect(name, bytes).ok_or_else(|| {
            SheetError::unreadable(format!("unsupported document format: {name}"))
        })?;

        let mut loader = Loader::new(format);
        if let Some(stem) = Path::new(name).file_stem().and_then(|s| s.to_str()) {
            if !stem.is_empty() {
                loader.csv_sheet_name = stem.to_string();
            }
        }
        Ok(loader)
    }

    /// Format this loader decodes
    #[must_use]
    pub fn format(&self) -> DocumentFormat {
        self.format
    }

    /// Sheet names in document order
    pub fn list_sheets(&self, bytes: &[u8]) -> Result<Vec<String>> {
        match self.format {
            DocumentFormat::Xlsx | DocumentFormat::Xls => xlsx::sheet_names(bytes),
            DocumentFormat::Csv => Ok(vec![self.csv_sheet_name.clone()]),
        }
    }

    /// Load a single sheet; `None` loads the first one
    pub fn load_sheet(&self, bytes: &[u8], sheet_name: Option<&str>) -> Result<Sheet> {
        tracing::debug!(format = %self.format, sheet = ?sheet_name, "loading sheet");
        match self.format {
            DocumentFormat::Xlsx | DocumentFormat::Xls => xlsx::read_sheet(bytes, sheet_name),
            DocumentFormat::Csv => {
                if let Some(wanted) = sheet_name {
                    if wanted != self.csv_sheet_name {
                        return Err(SheetError::SheetNotFound {
                            name: wanted.to_string(),
                        });
                    }
                }
                csv::read_sheet(bytes, &self.csv_sheet_name)
            }
        }
    }

    /// Load every sheet eagerly, in document order
    pub fn load_all_sheets(&self, bytes: &[u8]) -> Result<Book> {
        tracing::debug!(format = %self.format, bytes = bytes.len(), "loading all sheets");
        match self.format {
            DocumentFormat::Xlsx | DocumentFormat::Xls => xlsx::read_book(bytes),
            DocumentFormat::Csv => {
                let sheet = csv::read_sheet(bytes, &self.csv_sheet_name)?;
                Ok(std::iter::once(sheet).collect())
            }
        }
    }

    /// Read sheet names, first-sheet columns and row count
    pub fn try_peek_metadata(&self, bytes: &[u8]) -> Result<Metadata> {
        match self.format {
            DocumentFormat::Xlsx | DocumentFormat::Xls => xlsx::read_metadata(bytes),
            DocumentFormat::Csv => csv::read_metadata(bytes, &self.csv_sheet_name),
        }
    }

    /// Like [`Loader::try_peek_metadata`] but degrades to empty metadata with
    /// an error marker instead of failing.
    #[must_use]
    pub fn peek_metadata(&self, bytes: &[u8]) -> Metadata {
        self.try_peek_metadata(bytes).unwrap_or_else(|e| {
            tracing::debug!(error = %e, "metadata unavailable");
            Metadata::failed(e)
        })
    }
}
