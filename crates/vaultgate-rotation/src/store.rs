//! Rotation record storage.

use async_trait::async_trait;
use dashmap::DashMap;
use uuid::Uuid;

use vaultgate_types::RotationRecord;

use crate::{Result, RotationError};

/// Persistence seam for rotation records.
///
/// The controller is the sole writer. `active_for_client` must observe every
/// insert/update that completed before it was called; the in-memory store
/// gets this from its concurrent map, a persistent store from its
/// transaction isolation.
#[async_trait]
pub trait RotationStore: Send + Sync {
    /// Insert a fresh record.
    async fn insert(&self, record: RotationRecord) -> Result<()>;

    /// Replace an existing record.
    async fn update(&self, record: RotationRecord) -> Result<()>;

    /// Fetch by rotation id.
    async fn get(&self, rotation_id: Uuid) -> Result<Option<RotationRecord>>;

    /// The client's non-terminal record, if any.
    async fn active_for_client(&self, client_id: &str) -> Result<Option<RotationRecord>>;

    /// All non-terminal records, for the reconciliation sweep.
    async fn open_records(&self) -> Result<Vec<RotationRecord>>;

    /// Full history for a client, oldest first.
    async fn history_for_client(&self, client_id: &str) -> Result<Vec<RotationRecord>>;
}

/// In-memory store on a concurrent map.
#[derive(Debug, Default)]
pub struct MemoryRotationStore {
    records: DashMap<Uuid, RotationRecord>,
}

impl MemoryRotationStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RotationStore for MemoryRotationStore {
    async fn insert(&self, record: RotationRecord) -> Result<()> {
        self.records.insert(record.rotation_id, record);
        Ok(())
    }

    async fn update(&self, record: RotationRecord) -> Result<()> {
        if !self.records.contains_key(&record.rotation_id) {
            return Err(RotationError::NotFound(record.rotation_id));
        }
        self.records.insert(record.rotation_id, record);
        Ok(())
    }

    async fn get(&self, rotation_id: Uuid) -> Result<Option<RotationRecord>> {
        Ok(self.records.get(&rotation_id).map(|r| r.clone()))
    }

    async fn active_for_client(&self, client_id: &str) -> Result<Option<RotationRecord>> {
        Ok(self
            .records
            .iter()
            .find(|r| r.client_id == client_id && !r.state.is_terminal())
            .map(|r| r.clone()))
    }

    async fn open_records(&self) -> Result<Vec<RotationRecord>> {
        Ok(self
            .records
            .iter()
            .filter(|r| !r.state.is_terminal())
            .map(|r| r.clone())
            .collect())
    }

    async fn history_for_client(&self, client_id: &str) -> Result<Vec<RotationRecord>> {
        let mut history: Vec<RotationRecord> = self
            .records
            .iter()
            .filter(|r| r.client_id == client_id)
            .map(|r| r.clone())
            .collect();
        history.sort_by_key(|r| r.started_at);
        Ok(history)
    }
}
