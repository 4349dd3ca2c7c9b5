//! Key-value backing store capability.
//!
//! The inventory store needs three primitives from its backend: write a key,
//! read a key, and list keys under a prefix. Each call must be atomic per key
//! and safe to issue from many threads at once; nothing spans more than one
//! key.

mod embedded;
mod redis;

pub use embedded::RedbBackend;
pub use redis::RedisBackend;

use crate::error::BackendResult;

/// A durable key-value store holding raw record bytes.
pub trait KvBackend: Send + Sync {
    /// Short backend name for logs.
    fn name(&self) -> &'static str;

    /// Write `value` under `key`, replacing any previous value.
    fn set(&self, key: &str, value: &[u8]) -> BackendResult<()>;

    /// Read the value under `key`. A key that was never written is `None`.
    fn get(&self, key: &str) -> BackendResult<Option<Vec<u8>>>;

    /// All keys starting with `prefix`, in backend-defined order.
    fn keys_with_prefix(&self, prefix: &str) -> BackendResult<Vec<String>>;

    /// Check that the backend is reachable.
    fn ping(&self) -> BackendResult<()> {
        Ok(())
    }
}
