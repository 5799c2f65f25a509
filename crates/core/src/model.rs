//! Domain records: users, documents and grants.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_type!(
    /// Identifier of a [`User`].
    UserId
);
id_type!(
    /// Identifier of a [`Document`].
    DocumentId
);
id_type!(
    /// Identifier of a [`Grant`].
    GrantId
);

/// An account as seen by the access filter and the API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub email: String,
    #[serde(default)]
    pub department: Option<String>,
    pub is_admin: bool,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub last_login: Option<DateTime<Utc>>,
}

impl User {
    /// Department with surrounding whitespace removed; blank counts as none.
    #[must_use]
    pub fn department(&self) -> Option<&str> {
        self.department
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty())
    }
}

/// An uploaded spreadsheet file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub id: DocumentId,
    /// Key of the backing bytes in storage
    pub storage_key: String,
    /// File name as uploaded, used for display and format detection
    pub display_name: String,
    pub byte_size: u64,
    pub uploaded_by: UserId,
    #[serde(default)]
    pub description: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub download_count: u64,
}

/// Who a grant applies to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantSubject {
    /// Every user whose department matches
    Department(String),
    /// One named user
    User(UserId),
}

impl GrantSubject {
    /// Normalise department names so lookups compare trimmed text.
    #[must_use]
    pub fn normalized(self) -> Self {
        match self {
            GrantSubject::Department(d) => GrantSubject::Department(d.trim().to_string()),
            user @ GrantSubject::User(_) => user,
        }
    }
}

/// View/download rights on one document for one subject.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grant {
    pub id: GrantId,
    pub subject: GrantSubject,
    pub document_id: DocumentId,
    pub can_view: bool,
    pub can_download: bool,
    #[serde(default)]
    pub granted_by: Option<UserId>,
    pub granted_at: DateTime<Utc>,
}

/// Which capability an access check is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    View,
    Download,
}

impl Grant {
    /// Whether this grant carries the capability
    #[must_use]
    pub fn allows(&self, capability: Capability) -> bool {
        match capability {
            Capability::View => self.can_view,
            Capability::Download => self.can_download,
        }
    }
}

/// Counters for the admin dashboard.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stats {
    pub total_users: usize,
    pub active_users: usize,
    pub total_files: usize,
    pub active_files: usize,
    pub total_downloads: u64,
}
