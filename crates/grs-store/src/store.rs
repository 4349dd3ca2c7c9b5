//! NodeInventoryStore — typed persistence of the node inventory.
//!
//! Translates the three inventory record kinds to backend keys and back.
//! Every call is synchronous and goes straight to the backend; nothing is
//! cached here, so two stores over the same backend always agree.

use std::sync::Arc;

use grs_core::{
    LogicalNode, NODE_KEY_PREFIX, NodeStoreStatus, SingletonRecord, StoreConfig,
    VirtualNodeAssignment,
};
use serde::Serialize;
use tracing::{debug, warn};

use crate::backend::{KvBackend, RedbBackend, RedisBackend};
use crate::codec;
use crate::error::{BackendError, PersistCause, ReadCause, StoreError, StoreResult};

/// Why a stored logical node was left out of a scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// The key was listed but gone by the time it was fetched.
    Vanished,
    /// The stored bytes did not decode as a logical node.
    Corrupt(String),
    /// The backend refused to return the value, for example because the key
    /// holds a non-string Redis type.
    Rejected(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedRecord {
    pub key: String,
    pub reason: SkipReason,
}

/// Result of reading every logical node: the nodes that decoded, plus the
/// keys that could not be turned into a node.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeScan {
    pub nodes: Vec<LogicalNode>,
    pub skipped: Vec<SkippedRecord>,
}

impl NodeScan {
    /// True when every listed key produced a node.
    pub fn is_complete(&self) -> bool {
        self.skipped.is_empty()
    }
}

/// Durable store for logical nodes, node store status, and virtual node
/// assignment.
#[derive(Clone)]
pub struct NodeInventoryStore {
    backend: Arc<dyn KvBackend>,
}

impl std::fmt::Debug for NodeInventoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeInventoryStore")
            .field("backend", &self.backend.name())
            .finish()
    }
}

impl NodeInventoryStore {
    /// Open the configured backing store.
    ///
    /// The connection is made here: an unreachable Redis server or an
    /// unopenable database file fails with [`StoreError::Connection`].
    pub fn open(config: &StoreConfig) -> StoreResult<Self> {
        let backend: Arc<dyn KvBackend> = match config {
            StoreConfig::Redis(redis) => {
                Arc::new(RedisBackend::connect(redis).map_err(connection_error)?)
            }
            StoreConfig::Redb { path } => {
                Arc::new(RedbBackend::open(path).map_err(connection_error)?)
            }
            StoreConfig::Memory => {
                Arc::new(RedbBackend::open_in_memory().map_err(connection_error)?)
            }
        };
        debug!(backend = backend.name(), "node inventory store opened");
        Ok(Self { backend })
    }

    /// Create an ephemeral in-memory store (for testing).
    pub fn open_in_memory() -> StoreResult<Self> {
        Self::open(&StoreConfig::Memory)
    }

    /// Wrap an already constructed backend.
    pub fn with_backend(backend: Arc<dyn KvBackend>) -> Self {
        Self { backend }
    }

    /// Check that the backing store still answers.
    pub fn ping(&self) -> StoreResult<()> {
        self.backend.ping().map_err(connection_error)
    }

    // ── Writes ─────────────────────────────────────────────────────

    /// Persist logical nodes one at a time, in order.
    ///
    /// Stops at the first failure. Nodes before the failing one stay written
    /// and are immediately visible; nodes after it are not attempted. On error
    /// the inventory state is unknown and the caller should re-issue the whole
    /// batch.
    pub fn persist_nodes(&self, nodes: &[LogicalNode]) -> StoreResult<()> {
        for (written, node) in nodes.iter().enumerate() {
            self.write(&node.store_key(), node, written)?;
        }
        debug!(count = nodes.len(), "logical nodes persisted");
        Ok(())
    }

    /// Replace the stored node store status.
    pub fn persist_node_store_status(&self, status: &NodeStoreStatus) -> StoreResult<()> {
        self.persist_singleton(status)
    }

    /// Replace the stored virtual node assignment.
    pub fn persist_virtual_node_assignment(
        &self,
        assignment: &VirtualNodeAssignment,
    ) -> StoreResult<()> {
        self.persist_singleton(assignment)
    }

    fn persist_singleton<T: SingletonRecord>(&self, record: &T) -> StoreResult<()> {
        self.write(T::STORE_KEY, record, 0)?;
        debug!(kind = T::KIND, key = T::STORE_KEY, "singleton persisted");
        Ok(())
    }

    /// Encode and write a single record. `written` is the number of records
    /// the current call has already stored, reported on failure.
    fn write<T: Serialize>(&self, key: &str, record: &T, written: usize) -> StoreResult<()> {
        let value = codec::encode(record).map_err(|e| StoreError::Persist {
            key: key.to_string(),
            written,
            cause: PersistCause::Serialize(e.to_string()),
        })?;
        self.backend
            .set(key, &value)
            .map_err(|e| StoreError::Persist {
                key: key.to_string(),
                written,
                cause: PersistCause::Write(e.to_string()),
            })
    }

    // ── Reads ──────────────────────────────────────────────────────

    /// Read every stored logical node, reporting the ones left out.
    ///
    /// Order follows the backend's key enumeration. A key deleted between
    /// listing and fetching, holding bytes that do not decode, or refused by
    /// the server is skipped and recorded in [`NodeScan::skipped`]; one bad
    /// record never hides the rest of the inventory. A transport or storage
    /// failure aborts the scan.
    pub fn scan_nodes(&self) -> StoreResult<NodeScan> {
        let keys = self
            .backend
            .keys_with_prefix(NODE_KEY_PREFIX)
            .map_err(|e| read_error(NODE_KEY_PREFIX, e))?;

        let mut scan = NodeScan {
            nodes: Vec::with_capacity(keys.len()),
            skipped: Vec::new(),
        };
        for key in keys {
            let value = match self.backend.get(&key) {
                Ok(Some(value)) => value,
                Ok(None) => {
                    warn!(%key, "logical node vanished during scan");
                    scan.skipped.push(SkippedRecord {
                        key,
                        reason: SkipReason::Vanished,
                    });
                    continue;
                }
                Err(BackendError::Server(msg)) => {
                    warn!(%key, error = %msg, "backend refused logical node");
                    scan.skipped.push(SkippedRecord {
                        key,
                        reason: SkipReason::Rejected(msg),
                    });
                    continue;
                }
                Err(e) => return Err(read_error(&key, e)),
            };
            match codec::decode::<LogicalNode>(&value) {
                Ok(node) => scan.nodes.push(node),
                Err(e) => {
                    warn!(%key, error = %e, "skipping undecodable logical node");
                    scan.skipped.push(SkippedRecord {
                        key,
                        reason: SkipReason::Corrupt(e.to_string()),
                    });
                }
            }
        }

        debug!(
            nodes = scan.nodes.len(),
            skipped = scan.skipped.len(),
            "logical nodes loaded"
        );
        Ok(scan)
    }

    /// Read every stored logical node. Skipped keys are logged and dropped;
    /// use [`scan_nodes`](Self::scan_nodes) to see them.
    pub fn get_nodes(&self) -> StoreResult<Vec<LogicalNode>> {
        Ok(self.scan_nodes()?.nodes)
    }

    /// The stored node store status, or `None` if none was ever written.
    pub fn get_node_store_status(&self) -> StoreResult<Option<NodeStoreStatus>> {
        self.get_singleton()
    }

    /// The stored virtual node assignment, or `None` if none was ever written.
    pub fn get_virtual_node_assignment(&self) -> StoreResult<Option<VirtualNodeAssignment>> {
        self.get_singleton()
    }

    fn get_singleton<T: SingletonRecord>(&self) -> StoreResult<Option<T>> {
        let Some(value) = self
            .backend
            .get(T::STORE_KEY)
            .map_err(|e| read_error(T::STORE_KEY, e))?
        else {
            return Ok(None);
        };
        let record = codec::decode(&value).map_err(|e| StoreError::Read {
            key: T::STORE_KEY.to_string(),
            cause: ReadCause::Deserialize(format!("{}: {e}", T::KIND)),
        })?;
        Ok(Some(record))
    }
}

fn connection_error(e: BackendError) -> StoreError {
    StoreError::Connection(e.to_string())
}

fn read_error(key: &str, e: BackendError) -> StoreError {
    StoreError::Read {
        key: key.to_string(),
        cause: ReadCause::Read(e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BackendResult;
    use grs_core::{Location, NodeGeoInfo, VirtualNodeConfig};
    use std::collections::{BTreeMap, HashSet};

    /// Backend wrapper that injects failures around an in-memory redb.
    struct FaultyBackend {
        inner: RedbBackend,
        /// `set` on this key fails.
        fail_set: Option<String>,
        /// Listed by `keys_with_prefix` but never stored.
        phantom_keys: Vec<String>,
        /// `get` on this key is refused by the server.
        reject_get: Option<String>,
        fail_scan: bool,
        fail_get: bool,
    }

    impl FaultyBackend {
        fn new() -> Self {
            Self {
                inner: RedbBackend::open_in_memory().unwrap(),
                fail_set: None,
                phantom_keys: Vec::new(),
                reject_get: None,
                fail_scan: false,
                fail_get: false,
            }
        }
    }

    impl KvBackend for FaultyBackend {
        fn name(&self) -> &'static str {
            "faulty"
        }

        fn set(&self, key: &str, value: &[u8]) -> BackendResult<()> {
            if self.fail_set.as_deref() == Some(key) {
                return Err(BackendError::Io("connection reset".to_string()));
            }
            self.inner.set(key, value)
        }

        fn get(&self, key: &str) -> BackendResult<Option<Vec<u8>>> {
            if self.fail_get {
                return Err(BackendError::Io("read timed out".to_string()));
            }
            if self.reject_get.as_deref() == Some(key) {
                return Err(BackendError::Server(
                    "WRONGTYPE Operation against a key holding the wrong kind of value"
                        .to_string(),
                ));
            }
            self.inner.get(key)
        }

        fn keys_with_prefix(&self, prefix: &str) -> BackendResult<Vec<String>> {
            if self.fail_scan {
                return Err(BackendError::Io("scan interrupted".to_string()));
            }
            let mut keys = self.inner.keys_with_prefix(prefix)?;
            keys.extend(self.phantom_keys.iter().cloned());
            Ok(keys)
        }
    }

    fn test_store() -> NodeInventoryStore {
        NodeInventoryStore::open_in_memory().unwrap()
    }

    fn test_node(id: &str, region: i32) -> LogicalNode {
        LogicalNode {
            id: id.to_string(),
            resource_version: "1".to_string(),
            geo_info: NodeGeoInfo {
                region,
                ..NodeGeoInfo::default()
            },
            machine_type: "m5.large".to_string(),
            ..LogicalNode::default()
        }
    }

    fn ids(nodes: &[LogicalNode]) -> HashSet<String> {
        nodes.iter().map(|n| n.id.clone()).collect()
    }

    fn assignment(version: u64) -> VirtualNodeAssignment {
        VirtualNodeAssignment {
            version,
            virtual_node_assignment: BTreeMap::from([(
                "client-1".to_string(),
                vec![VirtualNodeConfig {
                    lowerbound: 0.0,
                    upperbound: 0.5,
                    location: Location {
                        region: 0,
                        partition: 1,
                    },
                }],
            )]),
        }
    }

    // ── Logical nodes ──────────────────────────────────────────────

    #[test]
    fn persist_and_get_nodes() {
        let store = test_store();
        let nodes = vec![test_node("n-1", 0), test_node("n-2", 1), test_node("n-3", 2)];

        store.persist_nodes(&nodes).unwrap();
        let mut loaded = store.get_nodes().unwrap();
        loaded.sort_by(|a, b| a.id.cmp(&b.id));

        assert_eq!(loaded, nodes);
    }

    #[test]
    fn persist_empty_batch_is_noop() {
        let store = test_store();
        store.persist_nodes(&[]).unwrap();
        assert!(store.get_nodes().unwrap().is_empty());
    }

    #[test]
    fn persisting_a_node_again_replaces_it() {
        let store = test_store();
        let mut node = test_node("n-1", 0);
        store.persist_nodes(std::slice::from_ref(&node)).unwrap();

        node.resource_version = "2".to_string();
        node.reserved = true;
        store.persist_nodes(std::slice::from_ref(&node)).unwrap();

        assert_eq!(store.get_nodes().unwrap(), vec![node]);
    }

    #[test]
    fn get_nodes_ignores_singletons() {
        let store = test_store();
        store.persist_nodes(&[test_node("n-1", 0)]).unwrap();
        store
            .persist_node_store_status(&NodeStoreStatus::default())
            .unwrap();
        store
            .persist_virtual_node_assignment(&assignment(1))
            .unwrap();

        assert_eq!(ids(&store.get_nodes().unwrap()), HashSet::from(["n-1".to_string()]));
    }

    #[test]
    fn failed_batch_keeps_earlier_nodes_and_skips_later_ones() {
        let mut backend = FaultyBackend::new();
        backend.fail_set = Some(test_node("n-2", 0).store_key());
        let store = NodeInventoryStore::with_backend(Arc::new(backend));

        let err = store
            .persist_nodes(&[test_node("n-1", 0), test_node("n-2", 0), test_node("n-3", 0)])
            .unwrap_err();

        match err {
            StoreError::Persist {
                key,
                written,
                cause: PersistCause::Write(_),
            } => {
                assert_eq!(key, "MinNoden-2");
                assert_eq!(written, 1);
            }
            other => panic!("expected write failure, got {other:?}"),
        }
        assert_eq!(ids(&store.get_nodes().unwrap()), HashSet::from(["n-1".to_string()]));
    }

    #[test]
    fn corrupt_node_is_skipped_not_fatal() {
        let backend = Arc::new(FaultyBackend::new());
        let store = NodeInventoryStore::with_backend(backend.clone());
        store
            .persist_nodes(&[test_node("n-1", 0), test_node("n-2", 0), test_node("n-3", 0)])
            .unwrap();
        backend.inner.set("MinNoden-2", b"\xde\xad{not json").unwrap();

        let scan = store.scan_nodes().unwrap();
        assert_eq!(
            ids(&scan.nodes),
            HashSet::from(["n-1".to_string(), "n-3".to_string()])
        );
        assert_eq!(scan.skipped.len(), 1);
        assert_eq!(scan.skipped[0].key, "MinNoden-2");
        assert!(matches!(scan.skipped[0].reason, SkipReason::Corrupt(_)));
        assert!(!scan.is_complete());

        assert_eq!(store.get_nodes().unwrap().len(), 2);
    }

    #[test]
    fn vanished_key_is_skipped() {
        let mut backend = FaultyBackend::new();
        backend.phantom_keys = vec!["MinNodegone".to_string()];
        let store = NodeInventoryStore::with_backend(Arc::new(backend));
        store.persist_nodes(&[test_node("n-1", 0)]).unwrap();

        let scan = store.scan_nodes().unwrap();
        assert_eq!(ids(&scan.nodes), HashSet::from(["n-1".to_string()]));
        assert_eq!(
            scan.skipped,
            vec![SkippedRecord {
                key: "MinNodegone".to_string(),
                reason: SkipReason::Vanished,
            }]
        );
    }

    #[test]
    fn refused_key_is_skipped() {
        let mut backend = FaultyBackend::new();
        backend.reject_get = Some("MinNodeforeign".to_string());
        backend.inner.set("MinNodeforeign", b"x").unwrap();
        let store = NodeInventoryStore::with_backend(Arc::new(backend));
        store.persist_nodes(&[test_node("n-1", 0), test_node("n-2", 0)]).unwrap();

        let scan = store.scan_nodes().unwrap();
        assert_eq!(
            ids(&scan.nodes),
            HashSet::from(["n-1".to_string(), "n-2".to_string()])
        );
        assert_eq!(scan.skipped.len(), 1);
        assert_eq!(scan.skipped[0].key, "MinNodeforeign");
        assert!(matches!(scan.skipped[0].reason, SkipReason::Rejected(_)));
    }

    #[test]
    fn scan_failure_is_a_read_error() {
        let mut backend = FaultyBackend::new();
        backend.fail_scan = true;
        let store = NodeInventoryStore::with_backend(Arc::new(backend));

        assert!(matches!(
            store.get_nodes(),
            Err(StoreError::Read {
                cause: ReadCause::Read(_),
                ..
            })
        ));
    }

    #[test]
    fn fetch_failure_aborts_scan() {
        let mut backend = FaultyBackend::new();
        backend.inner.set("MinNoden-1", b"{}").unwrap();
        backend.fail_get = true;
        let store = NodeInventoryStore::with_backend(Arc::new(backend));

        match store.scan_nodes() {
            Err(StoreError::Read { key, .. }) => assert_eq!(key, "MinNoden-1"),
            other => panic!("expected read error, got {other:?}"),
        }
    }

    // ── Singletons ─────────────────────────────────────────────────

    #[test]
    fn singletons_absent_before_first_write() {
        let store = test_store();
        assert_eq!(store.get_node_store_status().unwrap(), None);
        assert_eq!(store.get_virtual_node_assignment().unwrap(), None);
    }

    #[test]
    fn node_store_status_last_write_wins() {
        let store = test_store();
        let a = NodeStoreStatus {
            region_num: 1,
            ..NodeStoreStatus::default()
        };
        let b = NodeStoreStatus {
            region_num: 2,
            current_resource_version_map: BTreeMap::from([("0/0".to_string(), 9)]),
            ..NodeStoreStatus::default()
        };

        store.persist_node_store_status(&a).unwrap();
        store.persist_node_store_status(&b).unwrap();

        assert_eq!(store.get_node_store_status().unwrap(), Some(b));
    }

    #[test]
    fn writing_same_status_twice_is_idempotent() {
        let backend = Arc::new(FaultyBackend::new());
        let store = NodeInventoryStore::with_backend(backend.clone());
        let status = NodeStoreStatus {
            region_num: 3,
            partition_max_num: 8,
            virtual_node_num_per_rp: 100,
            current_resource_version_map: BTreeMap::from([
                ("0/1".to_string(), 5),
                ("2/3".to_string(), 6),
            ]),
        };

        store.persist_node_store_status(&status).unwrap();
        let once = backend.inner.get(NodeStoreStatus::STORE_KEY).unwrap();
        store.persist_node_store_status(&status).unwrap();
        let twice = backend.inner.get(NodeStoreStatus::STORE_KEY).unwrap();

        assert_eq!(once, twice);
        assert_eq!(store.get_node_store_status().unwrap(), Some(status));
    }

    #[test]
    fn virtual_node_assignment_last_write_wins() {
        let store = test_store();
        store.persist_virtual_node_assignment(&assignment(1)).unwrap();
        store.persist_virtual_node_assignment(&assignment(2)).unwrap();

        let stored = store.get_virtual_node_assignment().unwrap().unwrap();
        assert_eq!(stored.version, 2);
        assert_eq!(stored, assignment(2));
    }

    #[test]
    fn corrupt_singleton_is_deserialize_error() {
        let backend = Arc::new(FaultyBackend::new());
        backend
            .inner
            .set(VirtualNodeAssignment::STORE_KEY, b"[]")
            .unwrap();
        let store = NodeInventoryStore::with_backend(backend);

        assert!(matches!(
            store.get_virtual_node_assignment(),
            Err(StoreError::Read {
                cause: ReadCause::Deserialize(_),
                ..
            })
        ));
    }

    #[test]
    fn failed_singleton_write_reports_write_cause() {
        let mut backend = FaultyBackend::new();
        backend.fail_set = Some(NodeStoreStatus::STORE_KEY.to_string());
        let store = NodeInventoryStore::with_backend(Arc::new(backend));

        let err = store
            .persist_node_store_status(&NodeStoreStatus::default())
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::Persist {
                written: 0,
                cause: PersistCause::Write(_),
                ..
            }
        ));
        assert_eq!(store.get_node_store_status().unwrap(), None);
    }

    // ── Lifecycle & concurrency ────────────────────────────────────

    #[test]
    fn open_redb_in_missing_directory_is_connection_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = StoreConfig::Redb {
            path: dir.path().join("missing").join("inventory.redb"),
        };
        assert!(matches!(
            NodeInventoryStore::open(&config),
            Err(StoreError::Connection(_))
        ));
    }

    #[test]
    fn open_unreachable_redis_is_connection_error() {
        // Bind then drop to get a port nothing listens on.
        let address = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().to_string()
        };
        let config = StoreConfig::Redis(grs_core::RedisConfig {
            address,
            connect_timeout_ms: 500,
            ..grs_core::RedisConfig::default()
        });
        assert!(matches!(
            NodeInventoryStore::open(&config),
            Err(StoreError::Connection(_))
        ));
    }

    #[test]
    fn non_finite_assignment_is_refused_and_previous_value_kept() {
        let store = test_store();
        store.persist_virtual_node_assignment(&assignment(1)).unwrap();

        let mut bad = assignment(2);
        bad.virtual_node_assignment.insert(
            "client-2".to_string(),
            vec![VirtualNodeConfig {
                lowerbound: f64::NAN,
                upperbound: f64::INFINITY,
                location: Location::default(),
            }],
        );
        let err = store.persist_virtual_node_assignment(&bad).unwrap_err();

        assert!(matches!(
            err,
            StoreError::Persist {
                written: 0,
                cause: PersistCause::Serialize(_),
                ..
            }
        ));
        assert_eq!(store.get_virtual_node_assignment().unwrap(), Some(assignment(1)));
    }

    #[test]
    fn ping_in_memory() {
        test_store().ping().unwrap();
    }

    #[test]
    fn clones_share_backend() {
        let store = test_store();
        let other = store.clone();
        store.persist_nodes(&[test_node("n-1", 0)]).unwrap();
        assert_eq!(other.get_nodes().unwrap().len(), 1);
    }

    #[test]
    fn concurrent_writers_and_readers() {
        let store = test_store();
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let store = store.clone();
                std::thread::spawn(move || {
                    let nodes: Vec<_> = (0..25)
                        .map(|i| test_node(&format!("t{t}-n{i}"), t))
                        .collect();
                    store.persist_nodes(&nodes).unwrap();
                    store
                        .persist_node_store_status(&NodeStoreStatus {
                            region_num: t,
                            ..NodeStoreStatus::default()
                        })
                        .unwrap();
                    store.get_nodes().unwrap().len()
                })
            })
            .collect();

        for handle in handles {
            assert!(handle.join().unwrap() >= 25);
        }
        assert_eq!(store.get_nodes().unwrap().len(), 200);
        assert!(store.get_node_store_status().unwrap().is_some());
    }
}
