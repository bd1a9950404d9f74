use std::collections::BTreeMap;

use anyhow::Result;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use super::model::{AdminConfig, FileRecord, NewFile};
use super::Backend;

/// Process-local backend for demo mode and tests. State dies with the process.
#[derive(Default)]
pub struct MemoryBackend {
    state: Mutex<MemoryState>,
}

#[derive(Default)]
struct MemoryState {
    files: BTreeMap<u64, FileRecord>,
    admin: Option<AdminConfig>,
    file_seq: u64,
}

impl Backend for MemoryBackend {
    fn ensure_schema(&self) -> Result<()> {
        Ok(())
    }

    fn admin_config(&self) -> Result<Option<AdminConfig>> {
        Ok(self.state.lock().admin.clone())
    }

    fn put_admin_config(&self, config: &AdminConfig) -> Result<()> {
        self.state.lock().admin = Some(config.clone());
        Ok(())
    }

    fn insert_file(&self, file: NewFile, created_at: DateTime<Utc>) -> Result<FileRecord> {
        let mut state = self.state.lock();
        state.file_seq += 1;
        let record = file.into_record(state.file_seq, created_at);
        state.files.insert(record.id, record.clone());
        Ok(record)
    }

    fn get_file(&self, id: u64) -> Result<Option<FileRecord>> {
        Ok(self.state.lock().files.get(&id).cloned())
    }

    fn list_files(&self) -> Result<Vec<FileRecord>> {
        Ok(self.state.lock().files.values().cloned().collect())
    }

    fn replace_file(&self, id: u64, file: NewFile) -> Result<Option<FileRecord>> {
        let mut state = self.state.lock();
        Ok(state.files.get_mut(&id).map(|record| {
            file.apply_to(record);
            record.clone()
        }))
    }

    fn delete_file(&self, id: u64) -> Result<bool> {
        Ok(self.state.lock().files.remove(&id).is_some())
    }

    fn increment_downloads(&self, id: u64) -> Result<Option<u64>> {
        let mut state = self.state.lock();
        Ok(state.files.get_mut(&id).map(|record| {
            record.downloads += 1;
            record.downloads
        }))
    }

    fn count_files(&self) -> Result<u64> {
        Ok(self.state.lock().files.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::tests::new_file;
    use std::sync::Arc;

    #[test]
    fn concurrent_increments_are_not_lost() {
        let backend = Arc::new(MemoryBackend::default());
        let rec = backend.insert_file(new_file("a", "docs"), Utc::now()).unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let backend = Arc::clone(&backend);
                std::thread::spawn(move || {
                    for _ in 0..25 {
                        backend.increment_downloads(rec.id).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(backend.get_file(rec.id).unwrap().unwrap().downloads, 200);
    }

    #[test]
    fn missing_ids_report_absent() {
        let backend = MemoryBackend::default();
        assert_eq!(backend.get_file(7).unwrap(), None);
        assert_eq!(backend.increment_downloads(7).unwrap(), None);
        assert_eq!(backend.replace_file(7, new_file("x", "docs")).unwrap(), None);
        assert!(!backend.delete_file(7).unwrap());
    }
}
