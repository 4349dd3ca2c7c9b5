//! Mapping from records to backing store keys.
//!
//! Keys must match what is already in the store, so these strings are part
//! of the on-disk format:
//!
//! - logical node: `MinNode{id}`
//! - node store status: `NodeStoreStatus`
//! - virtual node assignment: `VirtualNodeAssignment`
//!
//! Singleton keys never start with [`NODE_KEY_PREFIX`], so a prefix scan over
//! `MinNode` returns exactly the logical node set.

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::types::{LogicalNode, NodeStoreStatus, VirtualNodeAssignment};

/// Namespace tag prepended to every logical node identifier.
pub const NODE_KEY_PREFIX: &str = "MinNode";

/// Store key for the logical node with the given identifier.
pub fn node_store_key(id: &str) -> String {
    format!("{NODE_KEY_PREFIX}{id}")
}

impl LogicalNode {
    /// The key this node is stored under.
    pub fn store_key(&self) -> String {
        node_store_key(&self.id)
    }
}

/// A record kind with exactly one stored instance under a fixed key.
///
/// The key is a property of the type, so it is available without a value
/// in hand (for example before the first read after a restart).
pub trait SingletonRecord: Serialize + DeserializeOwned {
    /// Fixed store key for this record kind.
    const STORE_KEY: &'static str;

    /// Human-readable record kind, used in logs and errors.
    const KIND: &'static str;
}

impl SingletonRecord for NodeStoreStatus {
    const STORE_KEY: &'static str = "NodeStoreStatus";
    const KIND: &'static str = "node store status";
}

impl SingletonRecord for VirtualNodeAssignment {
    const STORE_KEY: &'static str = "VirtualNodeAssignment";
    const KIND: &'static str = "virtual node assignment";
}
