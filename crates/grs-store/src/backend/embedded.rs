//! Embedded backend on [redb](https://docs.rs/redb).
//!
//! All records share one table with `&str` keys and `&[u8]` values. Each
//! `set` commits its own write transaction, so a write is durable once it
//! returns.

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use tracing::debug;

use super::KvBackend;
use crate::error::{BackendError, BackendResult};

/// Inventory records keyed by their store key.
const INVENTORY: TableDefinition<&str, &[u8]> = TableDefinition::new("inventory");

/// Convert any `Display` error into a `BackendError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| BackendError::$variant(e.to_string())
    };
}

/// Thread-safe key-value backend over a redb database.
#[derive(Clone)]
pub struct RedbBackend {
    db: Arc<Database>,
}

impl RedbBackend {
    /// Open (or create) a database file at the given path.
    pub fn open(path: &Path) -> BackendResult<Self> {
        let db = Database::create(path).map_err(map_err!(Unavailable))?;
        let backend = Self { db: Arc::new(db) };
        backend.ensure_table()?;
        debug!(?path, "redb backend opened");
        Ok(backend)
    }

    /// Create an ephemeral in-memory database.
    pub fn open_in_memory() -> BackendResult<Self> {
        let db = Database::builder()
            .create_with_backend(redb::backends::InMemoryBackend::new())
            .map_err(map_err!(Unavailable))?;
        let backend = Self { db: Arc::new(db) };
        backend.ensure_table()?;
        debug!("in-memory redb backend opened");
        Ok(backend)
    }

    /// Create the inventory table if it doesn't exist yet.
    fn ensure_table(&self) -> BackendResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Unavailable))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(INVENTORY).map_err(map_err!(Unavailable))?;
        txn.commit().map_err(map_err!(Unavailable))?;
        Ok(())
    }
}

impl KvBackend for RedbBackend {
    fn name(&self) -> &'static str {
        "redb"
    }

    fn set(&self, key: &str, value: &[u8]) -> BackendResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Storage))?;
        {
            let mut table = txn.open_table(INVENTORY).map_err(map_err!(Storage))?;
            table.insert(key, value).map_err(map_err!(Storage))?;
        }
        txn.commit().map_err(map_err!(Storage))?;
        Ok(())
    }

    fn get(&self, key: &str) -> BackendResult<Option<Vec<u8>>> {
        let txn = self.db.begin_read().map_err(map_err!(Storage))?;
        let table = txn.open_table(INVENTORY).map_err(map_err!(Storage))?;
        let value = table.get(key).map_err(map_err!(Storage))?;
        Ok(value.map(|guard| guard.value().to_vec()))
    }

    fn keys_with_prefix(&self, prefix: &str) -> BackendResult<Vec<String>> {
        let txn = self.db.begin_read().map_err(map_err!(Storage))?;
        let table = txn.open_table(INVENTORY).map_err(map_err!(Storage))?;
        let mut keys = Vec::new();
        // Keys are sorted, so the prefix range starts at `prefix` and ends at
        // the first key that no longer matches.
        for entry in table.range::<&str>(prefix..).map_err(map_err!(Storage))? {
            let (key, _) = entry.map_err(map_err!(Storage))?;
            let key = key.value();
            if !key.starts_with(prefix) {
                break;
            }
            keys.push(key.to_string());
        }
        Ok(keys)
    }
}
