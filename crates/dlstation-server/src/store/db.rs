use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use redb::{Database, ReadableTable, TableDefinition};
use serde::{de::DeserializeOwned, Serialize};
use tracing::debug;

use super::model::{AdminConfig, FileRecord, NewFile, ADMIN_CONFIG_ID};
use super::Backend;

const FILES: TableDefinition<u64, &[u8]> = TableDefinition::new("files");
const ADMIN_CONFIG: TableDefinition<u64, &[u8]> = TableDefinition::new("admin_config");
const COUNTERS: TableDefinition<&str, u64> = TableDefinition::new("counters");
const FILE_SEQ_KEY: &str = "file_seq";

/// Persistent backend over a single redb file.
pub struct RedbBackend {
    db: Database,
}

impl RedbBackend {
    /// Open (or create) the database at `path` and make sure every table exists.
    pub fn open(path: &Path) -> Result<Self> {
        let db = Database::create(path).context("open redb database")?;
        let backend = Self { db };
        backend.ensure_schema()?;
        Ok(backend)
    }
}

impl Backend for RedbBackend {
    fn ensure_schema(&self) -> Result<()> {
        let write_txn = self.db.begin_write()?;
        write_txn.open_table(FILES)?;
        write_txn.open_table(ADMIN_CONFIG)?;
        write_txn.open_table(COUNTERS)?;
        write_txn.commit()?;
        Ok(())
    }

    fn admin_config(&self) -> Result<Option<AdminConfig>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(ADMIN_CONFIG)?;
        let raw: Option<Vec<u8>> = table
            .get(ADMIN_CONFIG_ID)?
            .map(|guard| guard.value().to_vec());
        raw.map(|bytes| decode(&bytes)).transpose()
    }

    fn put_admin_config(&self, config: &AdminConfig) -> Result<()> {
        let bytes = encode(config)?;
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(ADMIN_CONFIG)?;
            table.insert(ADMIN_CONFIG_ID, bytes.as_slice())?;
        }
        write_txn.commit()?;
        debug!("stored admin config");
        Ok(())
    }

    fn insert_file(&self, file: NewFile, created_at: DateTime<Utc>) -> Result<FileRecord> {
        let write_txn = self.db.begin_write()?;
        let record = {
            // Ids come from a persisted sequence so a deleted id is never handed out again.
            let mut counters = write_txn.open_table(COUNTERS)?;
            let id = counters.get(FILE_SEQ_KEY)?.map(|g| g.value()).unwrap_or(0) + 1;
            counters.insert(FILE_SEQ_KEY, id)?;

            let record = file.into_record(id, created_at);
            let bytes = encode(&record)?;
            let mut files = write_txn.open_table(FILES)?;
            files.insert(id, bytes.as_slice())?;
            record
        };
        write_txn.commit()?;

        debug!(id = record.id, name = %record.name, "stored file");
        Ok(record)
    }

    fn get_file(&self, id: u64) -> Result<Option<FileRecord>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(FILES)?;
        let raw: Option<Vec<u8>> = table.get(id)?.map(|guard| guard.value().to_vec());
        raw.map(|bytes| decode(&bytes)).transpose()
    }

    fn list_files(&self) -> Result<Vec<FileRecord>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(FILES)?;

        let mut files = Vec::new();
        for item in table.iter()? {
            let (_k, v) = item?;
            files.push(decode(v.value())?);
        }
        Ok(files)
    }

    fn replace_file(&self, id: u64, file: NewFile) -> Result<Option<FileRecord>> {
        let write_txn = self.db.begin_write()?;
        let result = {
            let mut table = write_txn.open_table(FILES)?;

            // Copy the bytes out so the AccessGuard borrow on `table` ends before the insert.
            let raw: Option<Vec<u8>> = table.get(id)?.map(|guard| guard.value().to_vec());

            match raw {
                None => None,
                Some(bytes) => {
                    let mut record: FileRecord = decode(&bytes)?;
                    file.apply_to(&mut record);
                    let updated = encode(&record)?;
                    table.insert(id, updated.as_slice())?;
                    Some(record)
                }
            }
        };
        write_txn.commit()?;
        Ok(result)
    }

    fn delete_file(&self, id: u64) -> Result<bool> {
        let write_txn = self.db.begin_write()?;
        let existed = {
            let mut table = write_txn.open_table(FILES)?;
            let existed = table.remove(id)?.is_some();
            existed
        };
        write_txn.commit()?;
        Ok(existed)
    }

    fn increment_downloads(&self, id: u64) -> Result<Option<u64>> {
        // redb allows one write transaction at a time, so read-modify-write here
        // cannot interleave with another increment.
        let write_txn = self.db.begin_write()?;
        let result = {
            let mut table = write_txn.open_table(FILES)?;
            let raw: Option<Vec<u8>> = table.get(id)?.map(|guard| guard.value().to_vec());

            match raw {
                None => None,
                Some(bytes) => {
                    let mut record: FileRecord = decode(&bytes)?;
                    record.downloads += 1;
                    let updated = encode(&record)?;
                    table.insert(id, updated.as_slice())?;
                    Some(record.downloads)
                }
            }
        };
        write_txn.commit()?;
        Ok(result)
    }

    fn count_files(&self) -> Result<u64> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(FILES)?;
        let mut count = 0u64;
        for item in table.iter()? {
            item?;
            count += 1;
        }
        Ok(count)
    }
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    bincode::serde::encode_to_vec(value, bincode::config::standard()).context("bincode encode")
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    let (value, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
        .context("bincode decode")?;
    Ok(value)
}
