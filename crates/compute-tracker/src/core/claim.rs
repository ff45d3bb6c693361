//! Two-phase resource claims.

use std::fmt;
use std::sync::Arc;

use log::warn;
use uuid::Uuid;

use crate::core::device_pool::DeviceClaim;
use crate::core::instance::{Migration, MigrationStatus};
use crate::core::numa::NumaAssignment;
use crate::core::tracker::{recompute_workload, Footprint, TrackerInner};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ClaimKind {
    /// Admission of a new workload.
    Instance,
    /// Destination side of a resize or migration.
    Move,
    /// Zero-resource claim issued while the host is disabled.
    Nop,
}

/// A pending reservation of host resources for one workload transition.
///
/// The deltas are applied when the claim is issued. `commit` leaves them in
/// place; `abort` (or dropping the claim without committing) reverses every
/// delta. The consuming signatures make double-abort and commit-after-abort
/// unrepresentable.
pub struct Claim {
    inner: Arc<TrackerInner>,
    instance_id: Uuid,
    footprint: Footprint,
    numa: Option<NumaAssignment>,
    devices: Option<DeviceClaim>,
    kind: ClaimKind,
    finished: bool,
}

impl fmt::Debug for Claim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Claim")
            .field("instance_id", &self.instance_id)
            .field("footprint", &self.footprint)
            .field("numa", &self.numa)
            .field("devices", &self.devices)
            .field("kind", &self.kind)
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}

impl Claim {
    pub(crate) fn new(
        inner: Arc<TrackerInner>,
        instance_id: Uuid,
        footprint: Footprint,
        numa: Option<NumaAssignment>,
        devices: Option<DeviceClaim>,
        kind: ClaimKind,
    ) -> Self {
        Self {
            inner,
            instance_id,
            footprint,
            numa,
            devices,
            kind,
            finished: false,
        }
    }

    pub(crate) fn nop(inner: Arc<TrackerInner>, instance_id: Uuid) -> Self {
        Self::new(
            inner,
            instance_id,
            Footprint::default(),
            None,
            None,
            ClaimKind::Nop,
        )
    }

    pub fn instance_id(&self) -> Uuid {
        self.instance_id
    }

    /// Claimed memory in MB, including driver overhead.
    pub fn memory_mb(&self) -> u64 {
        self.footprint.memory_mb
    }

    pub fn disk_gb(&self) -> u64 {
        self.footprint.disk_gb
    }

    pub fn vcpus(&self) -> u32 {
        self.footprint.vcpus
    }

    /// Makes the reservation permanent. The deltas are already applied, so
    /// this only disarms the abort-on-drop guard.
    pub fn commit(mut self) {
        self.finished = true;
    }

    /// Reverses every delta applied when the claim was issued.
    pub fn abort(mut self) {
        self.revert();
    }

    fn revert(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        if self.kind == ClaimKind::Nop {
            return;
        }

        let mut reverted: Option<Migration> = None;
        if let Ok(mut guard) = self.inner.state.lock() {
            let state = &mut *guard;
            if let Some(record) = state.compute_node.as_mut() {
                record.remove_usage(
                    self.footprint.memory_mb,
                    self.footprint.disk_gb,
                    self.footprint.vcpus,
                );
                if let (Some(topology), Some(assignment)) =
                    (record.numa_topology.as_mut(), self.numa.as_ref())
                {
                    topology.revert(assignment);
                }
                if let Some(devices) = &self.devices {
                    record.device_pools.release(devices);
                }
                match self.kind {
                    ClaimKind::Instance => {
                        record.running_vms = record.running_vms.saturating_sub(1);
                        state.tracked_instances.remove(&self.instance_id);
                    }
                    ClaimKind::Move => {
                        if let Some(tracked) = state.tracked_migrations.remove(&self.instance_id) {
                            let mut migration = tracked.migration;
                            migration.status = MigrationStatus::Reverted;
                            reverted = Some(migration);
                        }
                    }
                    ClaimKind::Nop => {}
                }
                recompute_workload(record, &state.tracked_instances);
            }
        }

        if let Some(migration) = reverted {
            if let Err(err) = self.inner.migrations.create_or_update(&migration) {
                warn!("failed to mark migration {} reverted: {}", migration.id, err);
            }
        }
        if let Err(err) = self.inner.sync_to_store() {
            warn!(
                "failed to sync host record after aborting claim for instance {}: {}",
                self.instance_id, err
            );
        }
    }
}

impl Drop for Claim {
    fn drop(&mut self) {
        self.revert();
    }
}

/// A claim associated with a migration record: the destination side of a
/// resize, cold migration, live migration or evacuation.
pub struct MoveClaim {
    pub migration: Migration,
    claim: Claim,
}

impl MoveClaim {
    pub(crate) fn new(migration: Migration, claim: Claim) -> Self {
        Self { migration, claim }
    }

    pub fn memory_mb(&self) -> u64 {
        self.claim.memory_mb()
    }

    pub fn disk_gb(&self) -> u64 {
        self.claim.disk_gb()
    }

    pub fn vcpus(&self) -> u32 {
        self.claim.vcpus()
    }

    pub fn commit(self) {
        self.claim.commit();
    }

    pub fn abort(self) {
        self.claim.abort();
    }
}
