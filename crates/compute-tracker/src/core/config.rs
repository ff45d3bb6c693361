//! Tracker configuration.

use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
struct TrackerConfigRaw {
    pub reserved_host_memory_mb: Option<u64>,
    pub reserved_host_disk_gb: Option<u64>,
    pub plugins: Option<Vec<String>>,
}

/// Static configuration of a tracker instance.
#[derive(Clone, Debug, PartialEq)]
pub struct TrackerConfig {
    /// Host memory charged as base usage during reconciliation.
    pub reserved_host_memory_mb: u64,
    /// Host disk charged as base usage during reconciliation.
    pub reserved_host_disk_gb: u64,
    /// Names of enabled resource plugins.
    pub plugins: Vec<String>,
}

impl TrackerConfig {
    /// Creates config with default parameter values.
    pub fn new() -> Self {
        Self {
            reserved_host_memory_mb: 0,
            reserved_host_disk_gb: 0,
            plugins: vec!["vcpu".to_string()],
        }
    }

    /// Creates config by reading parameter values from .yaml file
    /// (uses default values if some parameters are absent).
    pub fn from_file(file_name: &str) -> Self {
        let raw: TrackerConfigRaw = serde_yaml::from_str(
            &std::fs::read_to_string(file_name)
                .unwrap_or_else(|_| panic!("Can't read file {}", file_name)),
        )
        .unwrap_or_else(|_| panic!("Can't parse YAML from file {}", file_name));
        let default = TrackerConfig::new();
        Self {
            reserved_host_memory_mb: raw
                .reserved_host_memory_mb
                .unwrap_or(default.reserved_host_memory_mb),
            reserved_host_disk_gb: raw
                .reserved_host_disk_gb
                .unwrap_or(default.reserved_host_disk_gb),
            plugins: raw.plugins.unwrap_or(default.plugins),
        }
    }
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self::new()
    }
}
