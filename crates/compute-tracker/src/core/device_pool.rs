//! Passthrough device pools.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::core::error::TrackerError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceStatus {
    Available,
    Claimed,
    Allocated,
}

/// A raw passthrough device as reported by the driver. Individual device
/// assignment stays with the driver; the tracker only aggregates counts.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PciDevice {
    pub address: String,
    pub vendor_id: String,
    pub product_id: String,
    pub numa_node: Option<u32>,
    pub status: DeviceStatus,
    pub tags: BTreeMap<String, String>,
}

/// A request for N devices of a given (vendor, product) signature.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceRequest {
    pub vendor_id: String,
    pub product_id: String,
    pub count: u64,
}

/// Devices aggregated by (vendor, product, NUMA affinity, tags), storing
/// only a free count per pool.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DevicePool {
    pub vendor_id: String,
    pub product_id: String,
    pub numa_node: Option<u32>,
    pub tags: BTreeMap<String, String>,
    pub count: u64,
}

impl DevicePool {
    fn covers(&self, device: &PciDevice) -> bool {
        self.vendor_id == device.vendor_id
            && self.product_id == device.product_id
            && self.numa_node == device.numa_node
            && self.tags == device.tags
    }

    fn matches(&self, request: &DeviceRequest) -> bool {
        self.vendor_id == request.vendor_id && self.product_id == request.product_id
    }
}

/// One slice of a planned claim: a count drawn from the pool with this
/// signature. Addressing by signature keeps the slice valid even after the
/// pool set has been re-aggregated in a different order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceSlice {
    pub vendor_id: String,
    pub product_id: String,
    pub numa_node: Option<u32>,
    pub tags: BTreeMap<String, String>,
    pub count: u64,
}

/// A planned claim against the pool set.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DeviceClaim {
    pub slices: Vec<DeviceSlice>,
}

/// The set of device pools on a host, in declaration order.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DevicePoolSet {
    pools: Vec<DevicePool>,
}

impl DevicePoolSet {
    /// Aggregates the driver's raw device list into pools. Only devices in
    /// `Available` status contribute to the free counts.
    pub fn from_devices(devices: &[PciDevice]) -> Self {
        let mut set = DevicePoolSet::default();
        for device in devices.iter().filter(|d| d.status == DeviceStatus::Available) {
            match set.pools.iter_mut().find(|p| p.covers(device)) {
                Some(pool) => pool.count += 1,
                None => set.pools.push(DevicePool {
                    vendor_id: device.vendor_id.clone(),
                    product_id: device.product_id.clone(),
                    numa_node: device.numa_node,
                    tags: device.tags.clone(),
                    count: 1,
                }),
            }
        }
        set
    }

    pub fn pools(&self) -> &[DevicePool] {
        &self.pools
    }

    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
    }

    /// Plans a claim for the requested devices without mutating the pools.
    ///
    /// Each request drains matching pools in declaration order. Fails if the
    /// total available across matching pools is insufficient for any
    /// request; the pool set is left untouched in that case.
    pub fn plan(&self, requests: &[DeviceRequest]) -> Result<DeviceClaim, TrackerError> {
        let mut remaining: Vec<u64> = self.pools.iter().map(|p| p.count).collect();
        let mut slices = Vec::new();

        for request in requests {
            let mut need = request.count;
            for (i, pool) in self.pools.iter().enumerate() {
                if need == 0 {
                    break;
                }
                if !pool.matches(request) || remaining[i] == 0 {
                    continue;
                }
                let take = need.min(remaining[i]);
                remaining[i] -= take;
                need -= take;
                slices.push(DeviceSlice {
                    vendor_id: pool.vendor_id.clone(),
                    product_id: pool.product_id.clone(),
                    numa_node: pool.numa_node,
                    tags: pool.tags.clone(),
                    count: take,
                });
            }
            if need > 0 {
                return Err(TrackerError::ResourceUnavailable {
                    resource: format!(
                        "pci device {}:{}",
                        request.vendor_id, request.product_id
                    ),
                    requested: request.count,
                    available: request.count - need,
                });
            }
        }
        Ok(DeviceClaim { slices })
    }

    /// Applies a planned claim, decrementing pool counts.
    pub fn apply(&mut self, claim: &DeviceClaim) {
        for slice in &claim.slices {
            if let Some(pool) = self.pool_for_slice_mut(slice) {
                pool.count = pool.count.saturating_sub(slice.count);
            }
        }
    }

    /// Releases a claim, incrementing pool counts back.
    pub fn release(&mut self, claim: &DeviceClaim) {
        for slice in &claim.slices {
            if let Some(pool) = self.pool_for_slice_mut(slice) {
                pool.count += slice.count;
            }
        }
    }

    fn pool_for_slice_mut(&mut self, slice: &DeviceSlice) -> Option<&mut DevicePool> {
        self.pools.iter_mut().find(|p| {
            p.vendor_id == slice.vendor_id
                && p.product_id == slice.product_id
                && p.numa_node == slice.numa_node
                && p.tags == slice.tags
        })
    }
}
