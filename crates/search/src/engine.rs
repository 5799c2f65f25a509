//! Keyword matching over loaded sheets.

use crate::result::SearchResult;
use sheetfind_sheet::{Book, Loader, Result, Sheet};

/// Trim and lowercase a keyword; blank keywords yield `None`.
#[must_use]
pub fn normalize_keyword(keyword: &str) -> Option<String> {
    let trimmed = keyword.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_lowercase())
    }
}

/// Search every sheet of `book` (or only `target_sheet`) for rows where any
/// cell contains `keyword`, ignoring case.
///
/// Results come back in book order, one per sheet with at least one match.
/// Each result shows at most `row_limit` rows but reports the full match
/// count in `total_rows`.
pub fn search(
    book: &Book,
    keyword: &str,
    target_sheet: Option<&str>,
    row_limit: usize,
) -> Result<Vec<SearchResult>> {
    let Some(needle) = normalize_keyword(keyword) else {
        return Ok(Vec::new());
    };

    if let Some(name) = target_sheet {
        let sheet = book.get_sheet(name)?;
        return Ok(search_sheet(sheet, &needle, row_limit).into_iter().collect());
    }

    Ok(book
        .sheets()
        .filter_map(|(_, sheet)| search_sheet(sheet, &needle, row_limit))
        .collect())
}

/// Match one sheet against an already-normalized needle.
#[must_use]
pub fn search_sheet(sheet: &Sheet, needle: &str, row_limit: usize) -> Option<SearchResult> {
    let mut rows = Vec::new();
    let mut total_rows = 0;

    for row in sheet.rows() {
        let hit = row
            .iter()
            .any(|cell| cell.display_text().to_lowercase().contains(needle));
        if !hit {
            continue;
        }
        total_rows += 1;
        if rows.len() < row_limit {
            rows.push(sheet.render_row(row));
        }
    }

    (total_rows > 0).then(|| SearchResult {
        document_id: None,
        document_name: None,
        sheet_name: sheet.name().to_string(),
        columns: sheet.columns().to_vec(),
        rows,
        total_rows,
    })
}

/// Decode a named document and search it.
///
/// With a target sheet only that sheet is decoded.
pub fn search_document_bytes(
    name: &str,
    bytes: &[u8],
    keyword: &str,
    target_sheet: Option<&str>,
    row_limit: usize,
) -> Result<Vec<SearchResult>> {
    if normalize_keyword(keyword).is_none() {
        return Ok(Vec::new());
    }
    let loader = Loader::for_document(name, bytes)?;
    let book: Book = match target_sheet {
        Some(sheet_name) => std::iter::once(loader.load_sheet(bytes, Some(sheet_name))?).collect(),
        None => loader.load_all_sheets(bytes)?,
    };
    search(&book, keyword, target_sheet, row_limit)
}
