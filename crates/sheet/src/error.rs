use thiserror::Error;

/// Errors that can occur while loading or exporting sheets
#[derive(Error, Debug)]
pub enum SheetError {
    #[error("Unreadable document: {reason}")]
    UnreadableDocument { reason: String },

    #[error("Sheet not found: {name}")]
    SheetNotFound { name: String },

    #[error("Sheet already exists: {name}")]
    SheetAlreadyExists { name: String },

    #[error("Row index out of bounds: {index} (sheet has {count} rows)")]
    RowIndexOutOfBounds { index: usize, count: usize },

    #[error("Export error: {0}")]
    Export(String),
}

impl SheetError {
    /// Create an unreadable-document error from any displayable cause.
    pub fn unreadable(reason: impl ToString) -> Self {
        SheetError::UnreadableDocument {
            reason: reason.to_string(),
        }
    }
}

impl From<csv::Error> for SheetError {
    fn from(e: csv::Error) -> Self {
        SheetError::unreadable(format!("CSV error: {e}"))
    }
}

impl From<calamine::Error> for SheetError {
    fn from(e: calamine::Error) -> Self {
        SheetError::unreadable(e)
    }
}

impl From<rust_xlsxwriter::XlsxError> for SheetError {
    fn from(e: rust_xlsxwriter::XlsxError) -> Self {
        SheetError::Export(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SheetError>;
