//! Keyword search over spreadsheet documents for sheetfind
//!
//! [`search`] is the pure engine: given a loaded [`sheetfind_sheet::Book`] it
//! returns matching rows grouped by sheet. [`SearchService`] wraps it with
//! storage access for single-document and corpus search.
//!
//! ```
//! use sheetfind_search::search;
//! use sheetfind_sheet::{Book, Sheet};
//!
//! let book: Book = std::iter::once(Sheet::from_data(
//!     "Staff",
//!     &["Name", "Team"],
//!     vec![vec!["Ada", "Research"], vec!["Grace", "Navy"]],
//! ))
//! .collect();
//!
//! let results = search(&book, "NAVY", None, 10).unwrap();
//! assert_eq!(results[0].total_rows, 1);
//! assert_eq!(results[0].rows[0]["Name"], "Grace");
//! ```

mod engine;
mod error;
mod export;
mod result;
mod service;

pub use engine::{normalize_keyword, search, search_document_bytes, search_sheet};
pub use error::{Result, SearchError};
pub use export::{export_results, results_to_book};
pub use result::SearchResult;
pub use service::{SearchService, DEFAULT_API_ROW_LIMIT, DEFAULT_QUICK_ROW_LIMIT};
