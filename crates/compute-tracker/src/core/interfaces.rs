//! Collaborator interfaces the tracker consumes and produces.

use std::collections::HashMap;

use indexmap::IndexMap;
use uuid::Uuid;

use crate::core::device_pool::PciDevice;
use crate::core::error::TrackerError;
use crate::core::host_record::HostResourceRecord;
use crate::core::instance::{Instance, Migration, ResourceRequest};
use crate::core::numa::NumaTopology;

/// Raw host capacity as reported by the hypervisor driver.
#[derive(Clone, Debug, Default)]
pub struct DriverResources {
    pub vcpus: u32,
    pub memory_mb: u64,
    pub local_gb: u64,
    pub vcpus_used: u32,
    pub memory_mb_used: u64,
    pub local_gb_used: u64,
    pub numa_topology: Option<NumaTopology>,
    pub pci_devices: Vec<PciDevice>,
    pub stats: Option<DriverStats>,
}

/// Free-form driver stats: either an already-structured map or a JSON
/// string that must parse to an object.
#[derive(Clone, Debug)]
pub enum DriverStats {
    Map(IndexMap<String, serde_json::Value>),
    Json(String),
}

impl DriverStats {
    /// Coerces the stats into a text-valued map.
    ///
    /// Fails with [`TrackerError::MalformedDriverReport`] if a JSON string
    /// does not parse or does not yield an object.
    pub fn coerce(&self) -> Result<IndexMap<String, String>, TrackerError> {
        match self {
            DriverStats::Map(map) => {
                Ok(map.iter().map(|(k, v)| (k.clone(), coerce_value(v))).collect())
            }
            DriverStats::Json(raw) => {
                let value: serde_json::Value = serde_json::from_str(raw).map_err(|e| {
                    TrackerError::MalformedDriverReport(format!("stats do not parse as JSON: {e}"))
                })?;
                match value {
                    serde_json::Value::Object(map) => Ok(map
                        .iter()
                        .map(|(k, v)| (k.clone(), coerce_value(v)))
                        .collect()),
                    other => Err(TrackerError::MalformedDriverReport(format!(
                        "stats JSON is not an object: {other}"
                    ))),
                }
            }
        }
    }
}

fn coerce_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Per-instance resource usage reported by the driver, used to account
/// hypervisor-visible workloads unknown to the tracker.
#[derive(Clone, Debug, Default)]
pub struct InstanceUsage {
    pub memory_mb: u64,
}

/// Driver-estimated per-workload overhead.
#[derive(Clone, Copy, Debug, Default)]
pub struct Overhead {
    pub memory_mb: u64,
}

/// The hypervisor/driver report the tracker reconciles against.
pub trait HypervisorDriver: Send + Sync {
    /// Returns the raw capacity of the node, or `None` if the driver cannot
    /// describe it (resource tracking is then disabled for the node).
    fn available_resources(&self, node: &str) -> Option<DriverResources>;

    /// Estimates the per-workload overhead the hypervisor adds on top of
    /// the requested resources.
    fn estimate_overhead(&self, _request: &ResourceRequest) -> Overhead {
        Overhead::default()
    }

    /// Resource usage of every instance the hypervisor knows about, keyed
    /// by workload id. Used for orphan detection.
    fn per_instance_usage(&self) -> HashMap<Uuid, InstanceUsage> {
        HashMap::new()
    }
}

/// Census of workloads resident on a (host, node), plus the write-through
/// save used when a claim pins a workload to this host.
pub trait InstanceStore: Send + Sync {
    fn list_resident(&self, host: &str, node: &str) -> Vec<Instance>;
    fn save(&self, instance: &Instance) -> Result<(), TrackerError>;
}

/// Ledger of in-flight migrations.
pub trait MigrationStore: Send + Sync {
    /// Migrations touching this (host, node) whose status is not terminal.
    fn list_in_progress(&self, host: &str, node: &str) -> Vec<Migration>;
    fn create_or_update(&self, migration: &Migration) -> Result<(), TrackerError>;
}

/// Durable storage of host resource records.
pub trait HostRecordStore: Send + Sync {
    fn get(&self, host: &str, node: &str) -> Result<HostResourceRecord, TrackerError>;
    fn create(&self, record: &HostResourceRecord) -> Result<HostResourceRecord, TrackerError>;
    fn update(&self, id: u32, record: &HostResourceRecord) -> Result<(), TrackerError>;
    fn delete(&self, id: u32) -> Result<(), TrackerError>;
}

/// The scheduler-facing report. Best-effort, invoked only on change.
pub trait SchedulerReporter: Send + Sync {
    fn publish(&self, record: &HostResourceRecord);
}
