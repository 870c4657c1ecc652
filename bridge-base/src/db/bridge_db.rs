use std::collections::HashMap;
use std::fmt::Debug;

use parking_lot::Mutex;
use tracing::{debug, instrument};
use uuid::Uuid;

use bridge_core::Task;

use super::{DbError, DbResult, TypedDB, DB};

// these keys MUST not be given multiple uses in case multiple agents are
// started with the same database.

const TASK_BY_ID: &str = "task_by_id_";

/// Storage of the listeners' block watermarks. Each key has exactly one
/// writer, so no transactions are needed.
pub trait CursorStore: Send + Sync + Debug {
    /// Retrieve the last block fully dispatched under `key`
    fn retrieve_cursor(&self, key: &str) -> DbResult<Option<u64>>;

    /// Store the last block fully dispatched under `key`
    fn store_cursor(&self, key: &str, block: u64) -> DbResult<()>;
}

/// DB handle for the bridge agent's durable state.
#[derive(Debug, Clone)]
pub struct BridgeRocksDB(TypedDB);

impl std::ops::Deref for BridgeRocksDB {
    type Target = TypedDB;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl AsRef<DB> for BridgeRocksDB {
    fn as_ref(&self) -> &DB {
        self.0.as_ref()
    }
}

impl BridgeRocksDB {
    /// Instantiate a new `BridgeRocksDB`
    pub fn new(db: DB) -> Self {
        Self(TypedDB::new("bridge".to_owned(), db))
    }

    /// Persist a task until it is acknowledged
    pub fn store_task(&self, task: &Task) -> DbResult<()> {
        self.store_value(TASK_BY_ID, task.id.as_bytes(), task)
    }

    /// Retrieve a task by id
    pub fn retrieve_task(&self, id: &Uuid) -> DbResult<Option<Task>> {
        self.retrieve_value(TASK_BY_ID, id.as_bytes())
    }

    /// Remove an acknowledged task
    pub fn delete_task(&self, id: &Uuid) -> DbResult<()> {
        self.delete_value(TASK_BY_ID, id.as_bytes())
    }

    /// Every task not yet acknowledged
    pub fn retrieve_pending_tasks(&self) -> DbResult<Vec<Task>> {
        self.values_with_prefix(TASK_BY_ID)
    }
}

impl CursorStore for BridgeRocksDB {
    #[instrument(skip(self), level = "trace")]
    fn retrieve_cursor(&self, key: &str) -> DbResult<Option<u64>> {
        let db: &DB = self.as_ref();
        if !db.contains(key.as_bytes())? {
            return Ok(None);
        }
        let Some(raw) = db.retrieve(key.as_bytes())? else {
            return Ok(None);
        };
        let value = String::from_utf8_lossy(&raw).into_owned();
        value
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|_| DbError::InvalidCursor {
                key: key.to_owned(),
                value,
            })
    }

    fn store_cursor(&self, key: &str, block: u64) -> DbResult<()> {
        debug!(key, block, "Storing cursor");
        let db: &DB = self.as_ref();
        db.store(key.as_bytes(), block.to_string().as_bytes())
    }
}

/// An in-memory [`CursorStore`] for ephemeral runs.
#[derive(Debug, Default)]
pub struct MemoryCursorStore(Mutex<HashMap<String, u64>>);

impl CursorStore for MemoryCursorStore {
    fn retrieve_cursor(&self, key: &str) -> DbResult<Option<u64>> {
        Ok(self.0.lock().get(key).copied())
    }

    fn store_cursor(&self, key: &str, block: u64) -> DbResult<()> {
        self.0.lock().insert(key.to_owned(), block);
        Ok(())
    }
}
