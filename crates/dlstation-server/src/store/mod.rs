pub mod db;
pub mod memory;
pub mod model;
pub mod seed;

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};

pub use db::RedbBackend;
pub use memory::MemoryBackend;
pub use model::{AdminConfig, CatalogStats, FileRecord, NewFile, DEFAULT_CATEGORY};
pub use seed::{InitOptions, InitReport};

/// Storage adapter. Every persistent read and write goes through one of these.
///
/// Each method is a single independent statement; there is no cross-call
/// transaction. Implementations must make `increment_downloads` atomic on its own.
pub trait Backend: Send + Sync {
    /// Create the `files`, `admin_config` and counter tables if absent.
    fn ensure_schema(&self) -> Result<()>;

    fn admin_config(&self) -> Result<Option<AdminConfig>>;

    /// Insert or replace the singleton admin row.
    fn put_admin_config(&self, config: &AdminConfig) -> Result<()>;

    /// Allocate an id and store a new record with `downloads = 0`.
    fn insert_file(&self, file: NewFile, created_at: DateTime<Utc>) -> Result<FileRecord>;

    fn get_file(&self, id: u64) -> Result<Option<FileRecord>>;

    /// All records in id order.
    fn list_files(&self) -> Result<Vec<FileRecord>>;

    /// Returns `None` if no record has this id.
    fn replace_file(&self, id: u64, file: NewFile) -> Result<Option<FileRecord>>;

    /// Returns true if the record existed.
    fn delete_file(&self, id: u64) -> Result<bool>;

    /// Returns the new counter value, or `None` if no record has this id.
    fn increment_downloads(&self, id: u64) -> Result<Option<u64>>;

    fn count_files(&self) -> Result<u64>;
}

/// Cheaply cloneable handle to whichever backend the server was started with.
#[derive(Clone)]
pub struct Store {
    backend: Arc<dyn Backend>,
}

impl Store {
    /// Open (or create) a persistent redb store at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self::from_backend(RedbBackend::open(path)?))
    }

    /// A fresh, empty, process-local store.
    pub fn in_memory() -> Self {
        Self::from_backend(MemoryBackend::default())
    }

    pub fn from_backend(backend: impl Backend + 'static) -> Self {
        Self {
            backend: Arc::new(backend),
        }
    }

    pub fn ensure_schema(&self) -> Result<()> {
        self.backend.ensure_schema()
    }

    pub fn admin_config(&self) -> Result<Option<AdminConfig>> {
        self.backend.admin_config()
    }

    pub fn set_admin_password(&self, password: &str) -> Result<()> {
        self.backend.put_admin_config(&AdminConfig::new(password))
    }

    pub fn insert_file(&self, file: NewFile) -> Result<FileRecord> {
        self.backend.insert_file(file, Utc::now())
    }

    pub fn get_file(&self, id: u64) -> Result<Option<FileRecord>> {
        self.backend.get_file(id)
    }

    /// All records, newest first. Records created in the same instant are
    /// ordered by descending id.
    pub fn list_files(&self) -> Result<Vec<FileRecord>> {
        let mut files = self.backend.list_files()?;
        files.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(files)
    }

    pub fn replace_file(&self, id: u64, file: NewFile) -> Result<Option<FileRecord>> {
        self.backend.replace_file(id, file)
    }

    pub fn delete_file(&self, id: u64) -> Result<bool> {
        self.backend.delete_file(id)
    }

    pub fn increment_downloads(&self, id: u64) -> Result<Option<u64>> {
        self.backend.increment_downloads(id)
    }

    pub fn count_files(&self) -> Result<u64> {
        self.backend.count_files()
    }

    /// Distinct non-empty categories, sorted.
    pub fn categories(&self) -> Result<Vec<String>> {
        let files = self.backend.list_files()?;
        let set: BTreeSet<String> = files
            .into_iter()
            .map(|f| f.category)
            .filter(|c| !c.is_empty())
            .collect();
        Ok(set.into_iter().collect())
    }

    pub fn stats(&self) -> Result<CatalogStats> {
        let files = self.backend.list_files()?;
        let categories: BTreeSet<&str> = files
            .iter()
            .map(|f| f.category.as_str())
            .filter(|c| !c.is_empty())
            .collect();
        Ok(CatalogStats {
            files: files.len() as u64,
            downloads: files.iter().map(|f| f.downloads).sum(),
            categories: categories.len() as u64,
        })
    }
}
