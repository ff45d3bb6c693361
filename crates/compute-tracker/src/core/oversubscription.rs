//! Oversubscription policy.

use serde::{Deserialize, Serialize};

/// Returns the allowed virtual capacity for a physical total under the given
/// oversubscription ratio.
pub fn allowed(total: u64, ratio: f64) -> u64 {
    (total as f64 * ratio).floor() as u64
}

/// Per-cell oversubscription ratios applied during NUMA fitting.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct NumaLimits {
    pub cpu_allocation_ratio: f64,
    pub ram_allocation_ratio: f64,
}

impl Default for NumaLimits {
    fn default() -> Self {
        Self {
            cpu_allocation_ratio: 1.0,
            ram_allocation_ratio: 1.0,
        }
    }
}

/// Caller-supplied host limits for a claim.
///
/// A scalar limit left as `None` is not enforced: a claim without limits
/// always passes the scalar checks, matching the permissive admission
/// default. NUMA fitting is always enforced, with ratios defaulting to 1.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Limits {
    pub memory_mb: Option<u64>,
    pub disk_gb: Option<u64>,
    pub vcpus: Option<u32>,
    pub numa: Option<NumaLimits>,
}

impl Limits {
    pub fn numa_limits(&self) -> NumaLimits {
        self.numa.unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allowed_floors_the_product() {
        assert_eq!(allowed(5, 1.0), 5);
        assert_eq!(allowed(5, 1.5), 7);
        assert_eq!(allowed(5, 2.0), 10);
        assert_eq!(allowed(3, 0.5), 1);
        assert_eq!(allowed(0, 16.0), 0);
    }

    #[test]
    fn default_numa_limits_are_strict() {
        let limits = Limits::default();
        assert_eq!(limits.numa_limits().cpu_allocation_ratio, 1.0);
        assert_eq!(limits.numa_limits().ram_allocation_ratio, 1.0);
    }
}
