//! # sheetfind-cli
//!
//! Command-line keyword search over spreadsheet files.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use indexmap::IndexMap;
use sheetfind_search::{
    export_results, search_document_bytes, SearchError, SearchResult, DEFAULT_API_ROW_LIMIT,
    DEFAULT_QUICK_ROW_LIMIT,
};
use sheetfind_sheet::{DocumentFormat, Loader, Metadata};
use std::fs;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

/// Widest a table cell is printed before it is cut short.
const MAX_CELL_WIDTH: usize = 40;

/// sheetfind - keyword search over spreadsheets
#[derive(Parser)]
#[command(name = "sheetfind")]
#[command(author, version, about = "Keyword search over xlsx, xls and csv files", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Command {
    /// List the sheets of a document
    Sheets {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },

    /// Show sheet names, columns and row count of a document
    Info {
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Output format (json, table)
        #[arg(short = 'f', long = "format", default_value = "table")]
        format: OutputFormat,
    },

    /// Search one document for a keyword
    Search {
        #[arg(value_name = "FILE")]
        file: PathBuf,

        keyword: String,

        /// Only search this sheet
        #[arg(short, long)]
        sheet: Option<String>,

        /// Maximum rows returned per sheet
        #[arg(short, long, default_value_t = DEFAULT_API_ROW_LIMIT)]
        limit: usize,

        /// Output format (json, table)
        #[arg(short = 'f', long = "format", default_value = "table")]
        format: OutputFormat,

        /// Also write the matches to an xlsx workbook
        #[arg(short = 'o', long = "export", value_name = "OUT.xlsx")]
        export: Option<PathBuf>,
    },

    /// Search every spreadsheet in a directory
    Scan {
        #[arg(value_name = "DIR")]
        dir: PathBuf,

        keyword: String,

        /// Maximum rows returned per sheet
        #[arg(short, long, default_value_t = DEFAULT_QUICK_ROW_LIMIT)]
        limit: usize,

        /// Descend into subdirectories
        #[arg(short, long)]
        recursive: bool,

        /// Output format (json, table)
        #[arg(short = 'f', long = "format", default_value = "table")]
        format: OutputFormat,
    },
}

/// Output format for results.
#[derive(Clone, Copy, Default, clap::ValueEnum)]
enum OutputFormat {
    /// JSON output
    Json,
    /// Pretty table output (default)
    #[default]
    Table,
}

/// Outcome of searching a directory.
#[derive(Debug, Default)]
struct ScanReport {
    results: Vec<SearchResult>,
    /// Files that could not be searched, with the reason
    skipped: Vec<(PathBuf, String)>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    if cli.verbose {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
            )
            .init();
    }

    match cli.command {
        Command::Sheets { file } => {
            for name in list_sheets(&file)? {
                println!("{name}");
            }
        }
        Command::Info { file, format } => {
            let metadata = peek_metadata(&file)?;
            print_metadata(&metadata, format)?;
        }
        Command::Search {
            file,
            keyword,
            sheet,
            limit,
            format,
            export,
        } => {
            let results = search_file(&file, &keyword, sheet.as_deref(), limit)?;
            print_results(&results, format)?;
            if let Some(out) = export {
                write_export(&results, &out)?;
            }
        }
        Command::Scan {
            dir,
            keyword,
            limit,
            recursive,
            format,
        } => {
            let report = scan_directory(&dir, &keyword, limit, recursive)?;
            print_results(&report.results, format)?;
            for (path, reason) in &report.skipped {
                eprintln!("{} {}: {reason}", "Skipped:".yellow().bold(), path.display());
            }
        }
    }

    Ok(())
}

/// Read a document and the name used to detect its format.
fn read_document(path: &Path) -> Result<(String, Vec<u8>)> {
    let bytes =
        fs::read(path).with_context(|| format!("Failed to read file: {}", path.display()))?;
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default()
        .to_string();
    Ok((name, bytes))
}

fn list_sheets(path: &Path) -> Result<Vec<String>> {
    let (name, bytes) = read_document(path)?;
    let loader = Loader::for_document(&name, &bytes)?;
    Ok(loader.list_sheets(&bytes)?)
}

fn peek_metadata(path: &Path) -> Result<Metadata> {
    let (name, bytes) = read_document(path)?;
    let loader = Loader::for_document(&name, &bytes)?;
    Ok(loader.try_peek_metadata(&bytes)?)
}

fn search_file(
    path: &Path,
    keyword: &str,
    sheet: Option<&str>,
    limit: usize,
) -> Result<Vec<SearchResult>> {
    let (name, bytes) = read_document(path)?;
    Ok(search_document_bytes(&name, &bytes, keyword, sheet, limit)?)
}

/// Spreadsheet files under `dir`, sorted by path.
fn collect_documents(dir: &Path, recursive: bool) -> Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    let mut pending = vec![dir.to_path_buf()];
    while let Some(current) = pending.pop() {
        let entries = fs::read_dir(&current)
            .with_context(|| format!("Failed to read directory: {}", current.display()))?;
        for entry in entries {
            let path = entry?.path();
            if path.is_dir() {
                if recursive {
                    pending.push(path);
                }
            } else if DocumentFormat::from_path(&path).is_some() {
                found.push(path);
            }
        }
    }
    found.sort();
    Ok(found)
}

/// Search every document in `dir`, skipping the ones that cannot be decoded.
fn scan_directory(dir: &Path, keyword: &str, limit: usize, recursive: bool) -> Result<ScanReport> {
    let mut report = ScanReport::default();
    for path in collect_documents(dir, recursive)? {
        let (name, bytes) = read_document(&path)?;
        match search_document_bytes(&name, &bytes, keyword, None, limit).map_err(SearchError::from) {
            Ok(results) => {
                let label = path
                    .strip_prefix(dir)
                    .unwrap_or(&path)
                    .display()
                    .to_string();
                report.results.extend(results.into_iter().map(|mut r| {
                    r.document_name = Some(label.clone());
                    r
                }));
            }
            Err(e) if e.is_document_local() => {
                tracing::warn!(file = %path.display(), error = %e, "skipping unreadable document");
                report.skipped.push((path, e.to_string()));
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(report)
}

fn write_export(results: &[SearchResult], out: &Path) -> Result<()> {
    if results.is_empty() {
        anyhow::bail!("No matching rows to export");
    }
    let bytes = export_results(results)?;
    fs::write(out, bytes).with_context(|| format!("Failed to write {}", out.display()))?;
    println!("{} {}", "Exported to".green().bold(), out.display());
    Ok(())
}

fn print_metadata(metadata: &Metadata, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(metadata)?),
        OutputFormat::Table => {
            println!("{} {}", "Sheets:".cyan().bold(), metadata.sheet_names.join(", "));
            println!("{} {}", "Columns:".cyan().bold(), metadata.columns.join(", "));
            println!("{} {}", "Rows:".cyan().bold(), metadata.row_count);
        }
    }
    Ok(())
}

fn print_results(results: &[SearchResult], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(results)?),
        OutputFormat::Table => {
            if results.is_empty() {
                println!("{}", "No matches".yellow());
                return Ok(());
            }
            for result in results {
                println!(
                    "{} {}",
                    result_label(result).cyan().bold(),
                    row_summary(result).dimmed()
                );
                println!("{}", render_table(&result.columns, &result.rows));
            }
        }
    }
    Ok(())
}

fn result_label(result: &SearchResult) -> String {
    match &result.document_name {
        Some(document) => format!("{document} / {}", result.sheet_name),
        None => result.sheet_name.clone(),
    }
}

fn row_summary(result: &SearchResult) -> String {
    if result.is_truncated() {
        format!("({} of {} rows)", result.rows.len(), result.total_rows)
    } else if result.total_rows == 1 {
        "(1 row)".to_string()
    } else {
        format!("({} rows)", result.total_rows)
    }
}

/// Shorten a cell to `MAX_CELL_WIDTH` characters.
fn clip(text: &str) -> String {
    if text.chars().count() <= MAX_CELL_WIDTH {
        text.to_string()
    } else {
        let mut clipped: String = text.chars().take(MAX_CELL_WIDTH - 1).collect();
        clipped.push('…');
        clipped
    }
}

/// Lay out rows as a plain-text table with a header rule.
fn render_table(columns: &[String], rows: &[IndexMap<String, String>]) -> String {
    let header: Vec<String> = columns.iter().map(|c| clip(c)).collect();
    let body: Vec<Vec<String>> = rows
        .iter()
        .map(|row| {
            columns
                .iter()
                .map(|c| clip(row.get(c).map_or("", String::as_str)))
                .collect()
        })
        .collect();

    let mut widths: Vec<usize> = header.iter().map(|h| h.chars().count()).collect();
    for line in &body {
        for (width, cell) in widths.iter_mut().zip(line) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let format_line = |cells: &[String]| -> String {
        cells
            .iter()
            .zip(&widths)
            .map(|(cell, width)| format!("{cell:<width$}"))
            .collect::<Vec<_>>()
            .join(" | ")
            .trim_end()
            .to_string()
    };

    let mut out = format_line(&header);
    out.push('\n');
    out.push_str(
        &widths
            .iter()
            .map(|w| "-".repeat(*w))
            .collect::<Vec<_>>()
            .join("-+-"),
    );
    for line in &body {
        out.push('\n');
        out.push_str(&format_line(line));
    }
    out
}
