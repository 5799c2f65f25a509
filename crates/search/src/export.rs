//! Writing search results to a workbook.

use crate::error::Result;
use crate::result::SearchResult;
use sheetfind_sheet::{Book, Sheet};
use std::collections::HashSet;

const MAX_SHEET_NAME: usize = 31;
const FORBIDDEN: [char; 7] = ['[', ']', ':', '*', '?', '/', '\\'];

/// Collect results into a book, one sheet per result.
///
/// Sheet names are made valid for Excel and unique; when results span
/// several documents the document name is prefixed.
#[must_use]
pub fn results_to_book(results: &[SearchResult]) -> Book {
    let multi_document = results
        .iter()
        .filter_map(|r| r.document_id)
        .collect::<HashSet<_>>()
        .len()
        > 1;

    let mut used = HashSet::new();
    let mut book = Book::new();
    for result in results {
        let base = match (&result.document_name, multi_document) {
            (Some(doc), true) => format!("{} - {}", file_stem(doc), result.sheet_name),
            _ => result.sheet_name.clone(),
        };
        let name = unique_name(&sanitize(&base), &mut used);

        let header: Vec<&str> = result.columns.iter().map(String::as_str).collect();
        let rows: Vec<Vec<String>> = result
            .rows
            .iter()
            .map(|row| {
                result
                    .columns
                    .iter()
                    .map(|c| row.get(c).cloned().unwrap_or_default())
                    .collect()
            })
            .collect();
        let sheet = Sheet::from_data(&name, &header, rows);
        // names are unique by construction
        if book.add_sheet(&name, sheet).is_err() {
            tracing::warn!(sheet = %name, "skipped duplicate export sheet");
        }
    }
    book
}

/// Render results as xlsx bytes.
pub fn export_results(results: &[SearchResult]) -> Result<Vec<u8>> {
    let book = results_to_book(results);
    tracing::debug!(sheets = book.sheet_count(), "exporting search results");
    Ok(book.to_xlsx_bytes()?)
}

fn file_stem(name: &str) -> &str {
    std::path::Path::new(name)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(name)
}

fn sanitize(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if FORBIDDEN.contains(&c) { '_' } else { c })
        .collect();
    let cleaned = cleaned.trim_matches('\'').trim();
    if cleaned.is_empty() {
        "Results".to_string()
    } else {
        cleaned.chars().take(MAX_SHEET_NAME).collect()
    }
}

fn unique_name(base: &str, used: &mut HashSet<String>) -> String {
    // Excel compares sheet names case-insensitively
    if used.insert(base.to_lowercase()) {
        return base.to_string();
    }
    let mut n = 2;
    loop {
        let suffix = format!(" ({n})");
        let keep = MAX_SHEET_NAME.saturating_sub(suffix.chars().count());
        let candidate = format!("{}{suffix}", base.chars().take(keep).collect::<String>());
        if used.insert(candidate.to_lowercase()) {
            return candidate;
        }
        n += 1;
    }
}
