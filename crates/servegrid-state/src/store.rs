//! StateStore: redb-backed persistence for ServeGrid.
//!
//! Holds the two pieces of durable state the control plane owns: the
//! ordered container-id list of each task (container backend only) and
//! each task's bounded anomaly history.

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde::de::DeserializeOwned;
use tracing::debug;

use servegrid_core::AnomalyRecommendResult;

use crate::error::{StateError, StateResult};
use crate::tables::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        txn.open_table(CONTAINERS).map_err(map_err!(Table))?;
        txn.open_table(HISTORY).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Container ids ──────────────────────────────────────────────

    /// Container ids recorded for a task, oldest first. `None` when the
    /// task has never been deployed on the container backend.
    pub fn get_container_ids(&self, task: &str) -> StateResult<Option<Vec<String>>> {
        self.get_json(CONTAINERS, task)
    }

    /// Replace the recorded container ids for a task.
    pub fn put_container_ids(&self, task: &str, ids: &[String]) -> StateResult<()> {
        let value = serde_json::to_vec(ids).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(CONTAINERS).map_err(map_err!(Table))?;
            table
                .insert(task, value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%task, count = ids.len(), "container ids stored");
        Ok(())
    }

    /// Forget a task's container ids. Returns true if any were recorded.
    pub fn delete_container_ids(&self, task: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(CONTAINERS).map_err(map_err!(Table))?;
            existed = table.remove(task).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%task, existed, "container ids deleted");
        Ok(existed)
    }

    // ── History ────────────────────────────────────────────────────

    /// Prepend a record and drop everything past the newest `limit`.
    ///
    /// Read, prepend and trim happen in one write transaction.
    pub fn append_history(
        &self,
        task: &str,
        record: &AnomalyRecommendResult,
        limit: usize,
    ) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let len;
        {
            let mut table = txn.open_table(HISTORY).map_err(map_err!(Table))?;
            let existing = table
                .get(task)
                .map_err(map_err!(Read))?
                .map(|guard| guard.value().to_vec());
            let mut records: Vec<AnomalyRecommendResult> = match existing {
                Some(bytes) => serde_json::from_slice(&bytes).map_err(map_err!(Deserialize))?,
                None => Vec::new(),
            };
            records.insert(0, record.clone());
            records.truncate(limit);
            len = records.len();

            let value = serde_json::to_vec(&records).map_err(map_err!(Serialize))?;
            table
                .insert(task, value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%task, len, "history record appended");
        Ok(())
    }

    /// History for a task, newest first. Empty when nothing was recorded.
    pub fn list_history(&self, task: &str) -> StateResult<Vec<AnomalyRecommendResult>> {
        Ok(self.get_json(HISTORY, task)?.unwrap_or_default())
    }

    // ── Helpers ────────────────────────────────────────────────────

    fn get_json<T: DeserializeOwned>(
        &self,
        table: TableDefinition<'static, &'static str, &'static [u8]>,
        key: &str,
    ) -> StateResult<Option<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(table).map_err(map_err!(Table))?;
        match table.get(key).map_err(map_err!(Read))? {
            Some(guard) => {
                let value: T =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }
}
