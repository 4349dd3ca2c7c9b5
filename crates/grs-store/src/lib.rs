//! grs-store — durable node inventory for the global resource service.
//!
//! [`NodeInventoryStore`] records logical nodes, the node store status, and
//! the virtual node assignment in a key-value backing store, and rebuilds
//! them on restart.
//!
//! # Architecture
//!
//! Every record is JSON-encoded and written under a key derived from its
//! type (see [`grs_core::keys`]): `MinNode{id}` per logical node, one fixed
//! key per singleton. Reads of logical nodes enumerate the `MinNode` prefix.
//!
//! The store talks to any [`KvBackend`]. Two ship with the crate:
//! [`RedbBackend`] (embedded, on-disk or in-memory) and [`RedisBackend`]
//! (RESP over TCP).
//!
//! `NodeInventoryStore` is `Clone` + `Send` + `Sync`; clones share one backend
//! handle. It caches nothing, and there is no cross-key atomicity: a
//! multi-node write that fails halfway leaves the earlier nodes written.

pub mod backend;
pub mod codec;
pub mod error;
pub mod store;

pub use backend::{KvBackend, RedbBackend, RedisBackend};
pub use error::{
    BackendError, BackendResult, PersistCause, ReadCause, StoreError, StoreResult,
};
pub use store::{NodeInventoryStore, NodeScan, SkipReason, SkippedRecord};
