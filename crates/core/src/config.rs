//! Service configuration.
//!
//! Values come from defaults, then an optional YAML file, then `SHEETFIND_*`
//! environment variables.

use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Account created on first start when the registry has no administrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootstrapAdmin {
    pub username: String,
    pub password: String,
    #[serde(default = "default_admin_email")]
    pub email: String,
}

fn default_admin_email() -> String {
    "admin@localhost".to_string()
}

/// Runtime configuration for the server and CLI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Socket address the HTTP server binds to
    pub bind: String,
    /// Directory holding uploads and the registry snapshot
    pub data_dir: PathBuf,
    /// Uploads larger than this are rejected
    pub max_upload_bytes: u64,
    /// Row limit for single-document API search
    pub api_row_limit: usize,
    /// Row limit per sheet for quick (corpus) search
    pub quick_row_limit: usize,
    /// Page size for admin listings
    pub page_size: usize,
    pub session_ttl_secs: u64,
    /// Lowercase file extensions accepted on upload
    pub allowed_extensions: Vec<String>,
    pub bootstrap_admin: Option<BootstrapAdmin>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:3000".to_string(),
            data_dir: PathBuf::from("data"),
            max_upload_bytes: 50 * 1024 * 1024,
            api_row_limit: 1000,
            quick_row_limit: 200,
            page_size: 20,
            session_ttl_secs: 24 * 60 * 60,
            allowed_extensions: sheetfind_sheet::DocumentFormat::EXTENSIONS
                .iter()
                .map(|e| (*e).to_string())
                .collect(),
            bootstrap_admin: None,
        }
    }
}

impl Config {
    /// Parse a YAML document; missing keys keep their defaults.
    pub fn from_yaml_str(yaml: &str) -> CoreResult<Self> {
        serde_yaml::from_str(yaml).map_err(|e| CoreError::Config(e.to_string()))
    }

    /// Load from an optional YAML file, then apply environment overrides.
    pub fn load(path: Option<&Path>) -> CoreResult<Self> {
        let mut config = match path {
            Some(path) => {
                let text = std::fs::read_to_string(path).map_err(|e| {
                    CoreError::Config(format!("cannot read {}: {e}", path.display()))
                })?;
                Self::from_yaml_str(&text)?
            }
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `SHEETFIND_*` overrides from a variable lookup.
    pub fn apply_env<F>(&mut self, lookup: F) -> CoreResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("SHEETFIND_BIND") {
            self.bind = v;
        }
        if let Some(v) = lookup("SHEETFIND_DATA_DIR") {
            self.data_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("SHEETFIND_MAX_UPLOAD_BYTES") {
            self.max_upload_bytes = parse_env("SHEETFIND_MAX_UPLOAD_BYTES", &v)?;
        }
        if let Some(v) = lookup("SHEETFIND_API_ROW_LIMIT") {
            self.api_row_limit = parse_env("SHEETFIND_API_ROW_LIMIT", &v)?;
        }
        if let Some(v) = lookup("SHEETFIND_QUICK_ROW_LIMIT") {
            self.quick_row_limit = parse_env("SHEETFIND_QUICK_ROW_LIMIT", &v)?;
        }
        if let Some(v) = lookup("SHEETFIND_SESSION_TTL_SECS") {
            self.session_ttl_secs = parse_env("SHEETFIND_SESSION_TTL_SECS", &v)?;
        }
        if let (Some(username), Some(password)) = (
            lookup("SHEETFIND_ADMIN_USERNAME"),
            lookup("SHEETFIND_ADMIN_PASSWORD"),
        ) {
            self.bootstrap_admin = Some(BootstrapAdmin {
                username,
                password,
                email: lookup("SHEETFIND_ADMIN_EMAIL").unwrap_or_else(default_admin_email),
            });
        }
        Ok(())
    }

    /// Reject settings that would make every request fail.
    pub fn validate(&self) -> CoreResult<()> {
        if self.page_size == 0 {
            return Err(CoreError::Config("page_size must be positive".into()));
        }
        if self.max_upload_bytes == 0 {
            return Err(CoreError::Config("max_upload_bytes must be positive".into()));
        }
        if self.allowed_extensions.is_empty() {
            return Err(CoreError::Config("allowed_extensions is empty".into()));
        }
        Ok(())
    }

    /// Whether an upload with this file name has an accepted extension
    #[must_use]
    pub fn accepts_file(&self, file_name: &str) -> bool {
        Path::new(file_name)
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| {
                self.allowed_extensions
                    .iter()
                    .any(|allowed| allowed.eq_ignore_ascii_case(ext))
            })
    }

    /// Directory for uploaded document bytes
    #[must_use]
    pub fn upload_dir(&self) -> PathBuf {
        self.data_dir.join("uploads")
    }

    /// Registry snapshot file
    #[must_use]
    pub fn registry_path(&self) -> PathBuf {
        self.data_dir.join("registry.json")
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> CoreResult<T> {
    value
        .trim()
        .parse()
        .map_err(|_| CoreError::Config(format!("{key} has an invalid value: {value:?}")))
}
