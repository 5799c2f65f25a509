use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

const ZIP_MAGIC: &[u8] = b"PK\x03\x04";
const OLE_MAGIC: &[u8] = &[0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];

/// Supported document container formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentFormat {
    /// Office Open XML workbook (zip container)
    Xlsx,
    /// Legacy binary workbook (OLE compound file)
    Xls,
    /// Comma-separated text, exposed as a single sheet
    Csv,
}

impl DocumentFormat {
    /// Every extension accepted on upload
    pub const EXTENSIONS: [&'static str; 3] = ["xlsx", "xls", "csv"];

    /// Look up a format by file extension (case-insensitive)
    #[must_use]
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "xlsx" | "xlsm" => Some(DocumentFormat::Xlsx),
            "xls" => Some(DocumentFormat::Xls),
            "csv" => Some(DocumentFormat::Csv),
            _ => None,
        }
    }

    /// Look up a format from a file name or path
    #[must_use]
    pub fn from_path<P: AsRef<Path>>(path: P) -> Option<Self> {
        path.as_ref()
            .extension()
            .and_then(|ext| ext.to_str())
            .and_then(Self::from_extension)
    }

    /// Sniff the container from leading bytes.
    ///
    /// Only binary containers can be recognized this way; text falls through
    /// to `None`.
    #[must_use]
    pub fn sniff(bytes: &[u8]) -> Option<Self> {
        if bytes.starts_with(ZIP_MAGIC) {
            Some(DocumentFormat::Xlsx)
        } else if bytes.starts_with(OLE_MAGIC) {
            Some(DocumentFormat::Xls)
        } else {
            None
        }
    }

    /// Resolve the format from a name, falling back to content sniffing
    #[must_use]
    pub fn detect(name: &str, bytes: &[u8]) -> Option<Self> {
        Self::from_path(name).or_else(|| Self::sniff(bytes))
    }

    /// Canonical lowercase extension
    #[must_use]
    pub fn extension(self) -> &'static str {
        match self {
            DocumentFormat::Xlsx => "xlsx",
            DocumentFormat::Xls => "xls",
            DocumentFormat::Csv => "csv",
        }
    }
}

impl fmt::Display for DocumentFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}
