//! Sheet/Book model and document loading for sheetfind
//!
//! Decodes uploaded spreadsheet documents (xlsx, xls, csv) into an in-memory
//! table-of-tables. Every cell renders to text through a single function,
//! [`CellValue::display_text`], which is what both display and search see.
//!
//! # Examples
//!
//! ## Building a sheet
//!
//! ```
//! use sheetfind_sheet::{CellValue, Sheet};
//!
//! let sheet = Sheet::from_data(
//!     "People",
//!     &["Name", "City"],
//!     vec![vec!["Alice", "NYC"], vec!["Bob", "LA"]],
//! );
//!
//! assert_eq!(sheet.row_count(), 2);
//! assert_eq!(sheet.columns(), ["Name", "City"]);
//! ```
//!
//! ## Loading a document
//!
//! ```
//! use sheetfind_sheet::Loader;
//!
//! let bytes = b"sku,qty\nA-1,3\n";
//! let loader = Loader::for_document("stock.csv", bytes).unwrap();
//! let book = loader.load_all_sheets(bytes).unwrap();
//!
//! assert_eq!(book.sheet_names(), vec!["stock"]);
//! ```

mod book;
mod cell;
mod csv;
mod error;
mod format;
mod loader;
mod sheet;
mod xlsx;

/// Re-export book type.
pub use book::Book;
/// Re-export cell value type.
pub use cell::CellValue;
/// Re-export sheet error types.
pub use error::{Result, SheetError};
/// Re-export document format detection.
pub use format::DocumentFormat;
/// Re-export the loader and its metadata.
pub use loader::{Loader, Metadata};
/// Re-export sheet type.
pub use sheet::Sheet;
