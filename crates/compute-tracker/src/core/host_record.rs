//! The host resource record: one per (host, node) pair.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::core::device_pool::DevicePoolSet;
use crate::core::numa::NumaTopology;

/// The authoritative accounting record for one (host, node) pair.
///
/// Mutated exclusively through claims and reconciliation. Compared by value
/// when deciding whether to publish an update, so every accounted field
/// (including nested NUMA cell usage and device pool counts) participates
/// in `PartialEq`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HostResourceRecord {
    /// Persistence id, assigned by the record store on create.
    pub id: Option<u32>,
    pub host: String,
    pub node: String,

    pub vcpus_total: u32,
    pub vcpus_used: u32,
    pub memory_mb_total: u64,
    pub memory_mb_used: u64,
    pub disk_gb_total: u64,
    pub disk_gb_used: u64,

    /// Derived: total minus used. May go negative, overhead is allowed to
    /// exceed free capacity under the permissive admission default.
    pub free_ram_mb: i64,
    pub free_disk_gb: i64,

    /// Count of workloads mid-transition.
    pub current_workload: u32,
    pub running_vms: u32,

    pub numa_topology: Option<NumaTopology>,
    pub device_pools: DevicePoolSet,

    /// Union of driver-reported and plugin-computed stats, all values
    /// coerced to text. Insertion order preserved across the merge layers.
    pub stats: IndexMap<String, String>,
}

impl HostResourceRecord {
    pub fn new(host: &str, node: &str) -> Self {
        Self {
            id: None,
            host: host.to_string(),
            node: node.to_string(),
            vcpus_total: 0,
            vcpus_used: 0,
            memory_mb_total: 0,
            memory_mb_used: 0,
            disk_gb_total: 0,
            disk_gb_used: 0,
            free_ram_mb: 0,
            free_disk_gb: 0,
            current_workload: 0,
            running_vms: 0,
            numa_topology: None,
            device_pools: DevicePoolSet::default(),
            stats: IndexMap::new(),
        }
    }

    /// Recomputes the derived free fields from totals and usage.
    pub fn refresh_free(&mut self) {
        self.free_ram_mb = self.memory_mb_total as i64 - self.memory_mb_used as i64;
        self.free_disk_gb = self.disk_gb_total as i64 - self.disk_gb_used as i64;
    }

    /// Adds a scalar footprint to the usage counters.
    pub fn add_usage(&mut self, memory_mb: u64, disk_gb: u64, vcpus: u32) {
        self.memory_mb_used += memory_mb;
        self.disk_gb_used += disk_gb;
        self.vcpus_used += vcpus;
        self.refresh_free();
    }

    /// Removes a scalar footprint from the usage counters.
    pub fn remove_usage(&mut self, memory_mb: u64, disk_gb: u64, vcpus: u32) {
        self.memory_mb_used = self.memory_mb_used.saturating_sub(memory_mb);
        self.disk_gb_used = self.disk_gb_used.saturating_sub(disk_gb);
        self.vcpus_used = self.vcpus_used.saturating_sub(vcpus);
        self.refresh_free();
    }
}
