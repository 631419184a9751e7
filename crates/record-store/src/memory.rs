use crate::{NewRecord, Record, RecordStore, Result, StorageBackend, StoreError};
use async_trait::async_trait;
use std::sync::Mutex;

#[derive(Default)]
struct MemoryState {
    next_id: i64,
    records: Vec<Record>,
}

/// Volatile store guarded by a mutex. Ids start at 1, like the SQL backends.
#[derive(Default)]
pub struct MemoryRecordStore {
    state: Mutex<MemoryState>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of every record in insertion order.
    pub fn snapshot(&self) -> Result<Vec<Record>> {
        let state = self.lock()?;
        Ok(state.records.clone())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, MemoryState>> {
        self.state
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".into()))
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    fn backend(&self) -> StorageBackend {
        StorageBackend::Memory
    }

    async fn insert(&self, record: NewRecord) -> Result<Record> {
        record.validate()?;
        let mut state = self.lock()?;
        state.next_id += 1;
        let stored = record.into_record(state.next_id);
        state.records.push(stored.clone());
        Ok(stored)
    }

    async fn count(&self) -> Result<u64> {
        let state = self.lock()?;
        Ok(state.records.len() as u64)
    }
}
