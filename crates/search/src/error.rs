use sheetfind_sheet::SheetError;
use std::io;
use thiserror::Error;

/// Errors returned by document search.
#[derive(Debug, Error)]
pub enum SearchError {
    /// Bytes are missing, corrupt or in an unsupported format.
    #[error("Unreadable document: {reason}")]
    UnreadableDocument { reason: String },

    /// A sheet was named that the document does not contain.
    #[error("Sheet not found: {name}")]
    SheetNotFound { name: String },

    /// Storage failed for a reason other than a missing file.
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(#[source] io::Error),

    /// Writing results to a workbook failed.
    #[error("Export error: {0}")]
    Export(String),
}

impl SearchError {
    /// Classify a storage read failure.
    ///
    /// A missing file means the document itself is unreadable; anything else
    /// is a storage outage.
    pub fn from_storage(err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::NotFound {
            SearchError::UnreadableDocument {
                reason: format!("document bytes missing: {err}"),
            }
        } else {
            SearchError::StorageUnavailable(err)
        }
    }

    /// Whether corpus search may skip the document and continue
    #[must_use]
    pub fn is_document_local(&self) -> bool {
        matches!(
            self,
            SearchError::UnreadableDocument { .. } | SearchError::SheetNotFound { .. }
        )
    }
}

impl From<SheetError> for SearchError {
    fn from(err: SheetError) -> Self {
        match err {
            SheetError::SheetNotFound { name } => SearchError::SheetNotFound { name },
            SheetError::Export(msg) => SearchError::Export(msg),
            other => SearchError::UnreadableDocument {
                reason: other.to_string(),
            },
        }
    }
}

pub type Result<T> = std::result::Result<T, SearchError>;
