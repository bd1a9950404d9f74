use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Category assigned to files created without one.
pub const DEFAULT_CATEGORY: &str = "uncategorized";

/// Row id of the singleton admin config record.
pub const ADMIN_CONFIG_ID: u64 = 1;

/// One downloadable catalog entry.
///
/// Stored in redb as bincode-encoded bytes, so no field may be skipped during
/// serialization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub id: u64,
    pub name: String,
    pub description: String,
    pub url: String,
    pub category: String,
    /// Size in bytes as reported by the admin.
    pub size: i64,
    #[serde(rename = "type")]
    pub file_type: String,
    pub downloads: u64,
    pub created_at: DateTime<Utc>,
}

/// Normalized create/update input. `name` and `url` are guaranteed non-empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewFile {
    pub name: String,
    pub description: String,
    pub url: String,
    pub category: String,
    pub size: i64,
    pub file_type: String,
}

impl NewFile {
    pub fn into_record(self, id: u64, created_at: DateTime<Utc>) -> FileRecord {
        FileRecord {
            id,
            name: self.name,
            description: self.description,
            url: self.url,
            category: self.category,
            size: self.size,
            file_type: self.file_type,
            downloads: 0,
            created_at,
        }
    }

    /// Overwrite the editable fields of `record`, keeping id, counter and timestamp.
    pub fn apply_to(self, record: &mut FileRecord) {
        record.name = self.name;
        record.description = self.description;
        record.url = self.url;
        record.category = self.category;
        record.size = self.size;
        record.file_type = self.file_type;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminConfig {
    pub id: u64,
    pub password: String,
    pub updated_at: DateTime<Utc>,
}

impl AdminConfig {
    pub fn new(password: impl Into<String>) -> Self {
        Self {
            id: ADMIN_CONFIG_ID,
            password: password.into(),
            updated_at: Utc::now(),
        }
    }
}

/// Aggregate counters over the whole catalog.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogStats {
    pub files: u64,
    pub downloads: u64,
    pub categories: u64,
}
