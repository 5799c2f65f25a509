use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use sheetfind_core::DocumentId;

/// Matching rows from one sheet of one document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResult {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document_id: Option<DocumentId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document_name: Option<String>,
    pub sheet_name: String,
    pub columns: Vec<String>,
    /// Displayed rows, at most the row limit, each keyed by column name
    pub rows: Vec<IndexMap<String, String>>,
    /// Every matching row in the sheet, regardless of the limit
    pub total_rows: usize,
}

impl SearchResult {
    /// Whether the displayed rows are a strict prefix of the matches
    #[must_use]
    pub fn is_truncated(&self) -> bool {
        self.rows.len() < self.total_rows
    }

    /// Attach the owning document
    #[must_use]
    pub fn for_document(mut self, id: DocumentId, name: &str) -> Self {
        self.document_id = Some(id);
        self.document_name = Some(name.to_string());
        self
    }
}
