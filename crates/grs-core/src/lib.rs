//! grs-core — shared types for the global resource service node inventory.
//!
//! Holds the records the resource-management service persists (logical
//! nodes, node store status, virtual node assignment), the rules that map
//! each record to its key in the backing store, and the store configuration.

pub mod config;
pub mod keys;
pub mod types;

pub use config::{RedisConfig, StoreConfig};
pub use keys::{NODE_KEY_PREFIX, SingletonRecord};
pub use types::*;
