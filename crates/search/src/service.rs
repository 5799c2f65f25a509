//! Search over stored documents.

use crate::engine::{normalize_keyword, search_document_bytes};
use crate::error::{Result, SearchError};
use crate::result::SearchResult;
use sheetfind_core::{Document, Storage};
use sheetfind_sheet::{Loader, Metadata};
use std::sync::Arc;
use tracing::{debug, warn};

/// Row limit for single-document search
pub const DEFAULT_API_ROW_LIMIT: usize = 1000;
/// Per-sheet row limit for corpus search
pub const DEFAULT_QUICK_ROW_LIMIT: usize = 200;

/// Entry points the web layer and CLI call.
///
/// Every call reads the document's bytes from storage and decodes them
/// afresh; nothing parsed is kept between calls.
#[derive(Clone)]
pub struct SearchService {
    storage: Arc<dyn Storage>,
    api_row_limit: usize,
    quick_row_limit: usize,
}

impl SearchService {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            storage,
            api_row_limit: DEFAULT_API_ROW_LIMIT,
            quick_row_limit: DEFAULT_QUICK_ROW_LIMIT,
        }
    }

    /// Override the configured row limits.
    #[must_use]
    pub fn with_limits(mut self, api_row_limit: usize, quick_row_limit: usize) -> Self {
        self.api_row_limit = api_row_limit;
        self.quick_row_limit = quick_row_limit;
        self
    }

    #[must_use]
    pub fn api_row_limit(&self) -> usize {
        self.api_row_limit
    }

    #[must_use]
    pub fn quick_row_limit(&self) -> usize {
        self.quick_row_limit
    }

    /// Raw bytes of a document.
    pub fn read_document(&self, document: &Document) -> Result<Vec<u8>> {
        self.storage
            .read_bytes(&document.storage_key)
            .map_err(SearchError::from_storage)
    }

    /// Search one document; `row_limit` defaults to the API limit.
    pub fn search_one_document(
        &self,
        document: &Document,
        keyword: &str,
        sheet_name: Option<&str>,
        row_limit: Option<usize>,
    ) -> Result<Vec<SearchResult>> {
        if normalize_keyword(keyword).is_none() {
            return Ok(Vec::new());
        }
        let bytes = self.read_document(document)?;
        let limit = row_limit.unwrap_or(self.api_row_limit);
        let results = search_document_bytes(
            &document.display_name,
            &bytes,
            keyword,
            sheet_name,
            limit,
        )?;
        debug!(
            document = %document.id,
            sheets = results.len(),
            "searched document"
        );
        Ok(results
            .into_iter()
            .map(|r| r.for_document(document.id, &document.display_name))
            .collect())
    }

    /// Search several documents with the quick-search limit.
    ///
    /// Documents that cannot be read are logged and skipped; a storage outage
    /// aborts the whole search.
    pub fn search_corpus(&self, documents: &[Document], keyword: &str) -> Result<Vec<SearchResult>> {
        if normalize_keyword(keyword).is_none() {
            return Ok(Vec::new());
        }
        let mut results = Vec::new();
        let mut skipped = 0usize;
        for document in documents {
            match self.search_one_document(document, keyword, None, Some(self.quick_row_limit)) {
                Ok(found) => results.extend(found),
                Err(e) if e.is_document_local() => {
                    skipped += 1;
                    warn!(
                        document = %document.id,
                        name = %document.display_name,
                        error = %e,
                        "skipping document in corpus search"
                    );
                }
                Err(e) => return Err(e),
            }
        }
        debug!(
            documents = documents.len(),
            skipped,
            results = results.len(),
            "corpus search finished"
        );
        Ok(results)
    }

    /// Sheet names, first-sheet columns and row count. Never fails.
    #[must_use]
    pub fn peek_metadata(&self, document: &Document) -> Metadata {
        let bytes = match self.read_document(document) {
            Ok(bytes) => bytes,
            Err(e) => return Metadata::failed(e),
        };
        match Loader::for_document(&document.display_name, &bytes) {
            Ok(loader) => loader.peek_metadata(&bytes),
            Err(e) => Metadata::failed(e),
        }
    }

    /// Sheet names in document order.
    pub fn list_sheets(&self, document: &Document) -> Result<Vec<String>> {
        let bytes = self.read_document(document)?;
        let loader = Loader::for_document(&document.display_name, &bytes)?;
        Ok(loader.list_sheets(&bytes)?)
    }
}
