//! Node inventory records persisted by the resource-management service.
//!
//! Field names serialize in PascalCase, matching the JSON the service has
//! always written, so records stored by earlier builds keep decoding. Every
//! struct is `#[serde(default)]`: a field missing from stored bytes decodes
//! to its default instead of failing the whole record.
//!
//! Maps are `BTreeMap` so that encoding the same value twice yields the same
//! bytes.

use serde::ser::Error as _;
use serde::{Deserialize, Serialize, Serializer};
use std::collections::BTreeMap;

/// Unique identifier of a logical node.
pub type NodeId = String;

/// Identifier of a client that virtual nodes are assigned to.
pub type ClientId = String;

// ── Logical node ───────────────────────────────────────────────────

/// One physical or logical compute node known to the service.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "PascalCase")]
pub struct LogicalNode {
    pub id: NodeId,
    pub resource_version: String,
    pub geo_info: NodeGeoInfo,
    pub taints: NodeTaints,
    pub special_hardware_types: NodeSpecialHardwareTypes,
    pub allocatable_resource: NodeResource,
    /// Bit set of node conditions (ready, disk pressure, ...).
    pub conditions: u8,
    pub reserved: bool,
    pub machine_type: String,
    /// RFC 3339 timestamp of the last update seen by the service.
    pub last_updated_time: String,
}

/// Where a node lives in the region / partition hierarchy.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "PascalCase")]
pub struct NodeGeoInfo {
    pub region: i32,
    pub resource_partition: i32,
    pub data_center: i32,
    pub availability_zone: i32,
    pub fault_domain: i32,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "PascalCase")]
pub struct NodeTaints {
    pub no_schedule: bool,
    pub no_execute: bool,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "PascalCase")]
pub struct NodeSpecialHardwareTypes {
    pub has_gpu: bool,
    #[serde(rename = "HasFPGA")]
    pub has_fpga: bool,
}

/// Resources a node can hand out to workloads.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "PascalCase")]
pub struct NodeResource {
    #[serde(rename = "MilliCPU")]
    pub milli_cpu: i64,
    /// Memory in bytes.
    pub memory: i64,
    /// Ephemeral storage in bytes.
    pub ephemeral_storage: i64,
    pub allowed_pod_number: i32,
    /// Extended resources keyed by resource name.
    pub scalar_resources: BTreeMap<String, i64>,
}

impl LogicalNode {
    /// Create a node with the given identifier and default attributes.
    pub fn new(id: impl Into<NodeId>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }
}

// ── Node store status ──────────────────────────────────────────────

/// Aggregate state of the node inventory. Exactly one is stored at a time.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "PascalCase")]
pub struct NodeStoreStatus {
    /// Number of regions the inventory spans.
    pub region_num: i32,
    /// Upper bound of resource partitions per region.
    pub partition_max_num: i32,
    #[serde(rename = "VirtualNodeNumPerRP")]
    pub virtual_node_num_per_rp: i32,
    /// Latest resource version seen per `{region}/{partition}` location.
    pub current_resource_version_map: BTreeMap<String, u64>,
}

// ── Virtual node assignment ────────────────────────────────────────

/// How virtual partitions of the node hash space are assigned to clients.
/// Exactly one is stored at a time.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "PascalCase")]
pub struct VirtualNodeAssignment {
    /// Monotonic assignment version chosen by the service.
    pub version: u64,
    pub virtual_node_assignment: BTreeMap<ClientId, Vec<VirtualNodeConfig>>,
}

/// A half-open slice `[lowerbound, upperbound)` of the node hash ring.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "PascalCase")]
pub struct VirtualNodeConfig {
    #[serde(serialize_with = "finite_f64")]
    pub lowerbound: f64,
    #[serde(serialize_with = "finite_f64")]
    pub upperbound: f64,
    pub location: Location,
}

/// JSON has no NaN or infinity; encoders would silently write `null`, which
/// then fails to decode. Refuse to encode them instead.
fn finite_f64<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
    if !value.is_finite() {
        return Err(S::Error::custom(format!("non-finite float {value}")));
    }
    serializer.serialize_f64(*value)
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "PascalCase")]
pub struct Location {
    pub region: i32,
    pub partition: i32,
}
