//! Per-host resource accounting and reconciliation.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use log::{debug, info, warn};
use uuid::Uuid;

use crate::core::claim::{Claim, ClaimKind, MoveClaim};
use crate::core::config::TrackerConfig;
use crate::core::device_pool::{DeviceClaim, DevicePoolSet};
use crate::core::error::TrackerError;
use crate::core::host_record::HostResourceRecord;
use crate::core::instance::{
    Instance, Migration, MigrationStatus, MigrationType, ResourceRequest, TaskState, VmState,
};
use crate::core::interfaces::{
    HostRecordStore, HypervisorDriver, InstanceStore, MigrationStore, SchedulerReporter,
};
use crate::core::numa::{NumaAssignment, NumaRequest};
use crate::core::oversubscription::Limits;
use crate::core::plugins::PluginRegistry;

/// The resources one workload occupies on this host: scalars with driver
/// overhead folded into memory, plus the NUMA demand if any.
#[derive(Clone, Debug, Default)]
pub(crate) struct Footprint {
    pub memory_mb: u64,
    pub disk_gb: u64,
    pub vcpus: u32,
    pub numa: Option<NumaRequest>,
}

impl Footprint {
    pub(crate) fn from_request(request: &ResourceRequest, overhead_mb: u64) -> Self {
        Self {
            memory_mb: request.memory_mb + overhead_mb,
            disk_gb: request.disk_gb(),
            vcpus: request.vcpus,
            numa: request.numa.clone(),
        }
    }
}

/// A workload whose usage is currently accounted in the host record.
pub(crate) struct TrackedInstance {
    pub footprint: Footprint,
    pub task_state: Option<TaskState>,
}

/// An in-flight move whose usage is currently accounted in the host record,
/// keyed by instance id. Holds every footprint charged for the move so that
/// dropping the claim reverses exactly what was applied.
pub(crate) struct TrackedMigration {
    pub migration: Migration,
    pub footprints: Vec<Footprint>,
}

/// Mutable tracker state, guarded by one mutex per tracker.
pub(crate) struct TrackerState {
    /// The in-memory accounting record. `None` until the first successful
    /// reconciliation, or while the driver cannot describe the node.
    pub compute_node: Option<HostResourceRecord>,
    pub tracked_instances: HashMap<Uuid, TrackedInstance>,
    pub tracked_migrations: HashMap<Uuid, TrackedMigration>,
    /// Last record written out, used to suppress no-op publications.
    pub last_published: Option<HostResourceRecord>,
}

pub(crate) struct TrackerInner {
    pub host: String,
    pub nodename: String,
    pub driver: Arc<dyn HypervisorDriver>,
    pub instances: Arc<dyn InstanceStore>,
    pub migrations: Arc<dyn MigrationStore>,
    pub host_records: Arc<dyn HostRecordStore>,
    pub scheduler: Arc<dyn SchedulerReporter>,
    pub plugins: PluginRegistry,
    pub config: TrackerConfig,
    pub state: Mutex<TrackerState>,
}

/// Recomputes the mid-transition workload count from the tracked set.
pub(crate) fn recompute_workload(
    record: &mut HostResourceRecord,
    tracked: &HashMap<Uuid, TrackedInstance>,
) {
    record.current_workload = tracked.values().filter(|t| t.task_state.is_some()).count() as u32;
}

impl TrackerInner {
    /// Writes the in-memory record to the store and scheduler, but only when
    /// it differs from the last written copy. Create-then-update race with a
    /// concurrent registrar is resolved by re-fetching the persisted id.
    pub(crate) fn sync_to_store(&self) -> Result<(), TrackerError> {
        let pending = {
            let state = self.state.lock().unwrap();
            match (&state.compute_node, &state.last_published) {
                (Some(record), Some(published)) if record == published => None,
                (Some(record), _) => Some(record.clone()),
                (None, _) => None,
            }
        };
        let Some(mut record) = pending else {
            return Ok(());
        };

        match record.id {
            Some(id) => self.host_records.update(id, &record)?,
            None => match self.host_records.create(&record) {
                Ok(created) => {
                    record.id = created.id;
                    info!(
                        "created resource record for {}/{}",
                        record.host, record.node
                    );
                }
                Err(err) => {
                    warn!(
                        "creating resource record for {}/{} failed ({}), re-fetching",
                        record.host, record.node, err
                    );
                    let existing = self.host_records.get(&record.host, &record.node)?;
                    record.id = existing.id;
                    if let Some(id) = record.id {
                        self.host_records.update(id, &record)?;
                    }
                }
            },
        }

        info!(
            "publishing resources for {}/{}: {}/{} MB ram, {}/{} GB disk, {}/{} vcpus, {} vms",
            record.host,
            record.node,
            record.memory_mb_used,
            record.memory_mb_total,
            record.disk_gb_used,
            record.disk_gb_total,
            record.vcpus_used,
            record.vcpus_total,
            record.running_vms
        );
        self.scheduler.publish(&record);

        let mut state = self.state.lock().unwrap();
        if let Some(node) = state.compute_node.as_mut() {
            node.id = record.id;
        }
        state.last_published = Some(record);
        Ok(())
    }
}

fn test_scalar(
    resource: &str,
    requested: u64,
    used: u64,
    limit: Option<u64>,
) -> Result<(), TrackerError> {
    let Some(limit) = limit else {
        // No limit supplied means the check is not enforced.
        return Ok(());
    };
    let available = limit.saturating_sub(used);
    if requested > available {
        return Err(TrackerError::ResourceUnavailable {
            resource: resource.to_string(),
            requested,
            available,
        });
    }
    Ok(())
}

/// Charges a request against the record unconditionally. Reconciliation must
/// account every resident workload even past the oversubscription limits.
fn audit_request(
    driver: &dyn HypervisorDriver,
    record: &mut HostResourceRecord,
    request: &ResourceRequest,
) -> Footprint {
    let overhead = driver.estimate_overhead(request).memory_mb;
    let footprint = Footprint::from_request(request, overhead);
    record.add_usage(footprint.memory_mb, footprint.disk_gb, footprint.vcpus);
    if let (Some(topology), Some(numa)) = (record.numa_topology.as_mut(), footprint.numa.as_ref()) {
        topology.add_usage(numa);
    }
    footprint
}

/// Tracks resource usage of one (host, node) pair: admits new workloads
/// through two-phase claims and periodically reconciles its accounting
/// against the hypervisor, the instance census and the migration ledger.
///
/// Cheap to clone; all clones share one state.
#[derive(Clone)]
pub struct ResourceTracker {
    inner: Arc<TrackerInner>,
}

impl ResourceTracker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        host: &str,
        nodename: &str,
        driver: Arc<dyn HypervisorDriver>,
        instances: Arc<dyn InstanceStore>,
        migrations: Arc<dyn MigrationStore>,
        host_records: Arc<dyn HostRecordStore>,
        scheduler: Arc<dyn SchedulerReporter>,
        config: TrackerConfig,
    ) -> Self {
        let plugins = PluginRegistry::from_names(&config.plugins);
        Self {
            inner: Arc::new(TrackerInner {
                host: host.to_string(),
                nodename: nodename.to_string(),
                driver,
                instances,
                migrations,
                host_records,
                scheduler,
                plugins,
                config,
                state: Mutex::new(TrackerState {
                    compute_node: None,
                    tracked_instances: HashMap::new(),
                    tracked_migrations: HashMap::new(),
                    last_published: None,
                }),
            }),
        }
    }

    pub fn host(&self) -> &str {
        &self.inner.host
    }

    pub fn nodename(&self) -> &str {
        &self.inner.nodename
    }

    /// Whether resource tracking is currently disabled for this node, i.e.
    /// the driver could not describe it on the last reconciliation.
    pub fn disabled(&self) -> bool {
        self.inner.state.lock().unwrap().compute_node.is_none()
    }

    /// A copy of the current accounting record, if tracking is enabled.
    pub fn compute_node(&self) -> Option<HostResourceRecord> {
        self.inner.state.lock().unwrap().compute_node.clone()
    }

    pub fn tracked_instance_count(&self) -> usize {
        self.inner.state.lock().unwrap().tracked_instances.len()
    }

    pub fn tracked_migration_count(&self) -> usize {
        self.inner.state.lock().unwrap().tracked_migrations.len()
    }

    /// Claims resources for admitting a new workload on this host.
    ///
    /// On success the usage deltas are already applied and the returned
    /// claim guards them: committing keeps them, aborting or dropping the
    /// claim reverses them. The instance is pinned to this host either way.
    /// While the host is disabled a zero-resource claim is returned so that
    /// admission still succeeds.
    pub fn instance_claim(
        &self,
        instance: &mut Instance,
        limits: &Limits,
    ) -> Result<Claim, TrackerError> {
        let overhead = self.inner.driver.estimate_overhead(&instance.request).memory_mb;
        let mut footprint = Footprint::from_request(&instance.request, overhead);

        let claim = {
            let mut guard = self.inner.state.lock().unwrap();
            let state = &mut *guard;
            match state.compute_node.as_mut() {
                None => {
                    debug!(
                        "no resource view for {}/{}, issuing zero claim for instance {}",
                        self.inner.host, self.inner.nodename, instance.id
                    );
                    Claim::nop(Arc::clone(&self.inner), instance.id)
                }
                Some(record) => {
                    debug!(
                        "claiming {} MB ram (incl. {} MB overhead), {} GB disk, {} vcpus for instance {}",
                        footprint.memory_mb, overhead, footprint.disk_gb, footprint.vcpus, instance.id
                    );
                    let (numa, devices) =
                        Self::test_claim(record, &instance.request, &footprint, limits)?;
                    // The persisted request carries the fitted placement, so
                    // later audits charge the cells this claim reserved.
                    if let Some(assignment) = numa.as_ref() {
                        if let Some(requested) = instance.request.numa.as_mut() {
                            assignment.pin(requested);
                        }
                        footprint.numa = instance.request.numa.clone();
                    }
                    Self::apply_claim(record, &footprint, numa.as_ref(), devices.as_ref());
                    record.running_vms += 1;
                    state.tracked_instances.insert(
                        instance.id,
                        TrackedInstance {
                            footprint: footprint.clone(),
                            task_state: instance.task_state,
                        },
                    );
                    recompute_workload(record, &state.tracked_instances);
                    Claim::new(
                        Arc::clone(&self.inner),
                        instance.id,
                        footprint,
                        numa,
                        devices,
                        ClaimKind::Instance,
                    )
                }
            }
        };

        // A failed placement write-through drops the claim, which reverts
        // the deltas just applied.
        self.set_instance_host_and_node(instance)?;
        if let Err(err) = self.inner.sync_to_store() {
            warn!("failed to sync host record after claim: {}", err);
        }
        Ok(claim)
    }

    /// Claims resources on this host as the destination of a resize or
    /// migration, creating the migration ledger record alongside.
    ///
    /// The source-side allocation is untouched; until the move reaches a
    /// terminal status both sides stay accounted.
    pub fn resize_claim(
        &self,
        instance: &mut Instance,
        new_request: &ResourceRequest,
        migration_type: MigrationType,
        limits: &Limits,
    ) -> Result<MoveClaim, TrackerError> {
        let overhead = self.inner.driver.estimate_overhead(new_request).memory_mb;
        let mut footprint = Footprint::from_request(new_request, overhead);
        let mut claimed = new_request.clone();

        let mut migration = Migration {
            id: Uuid::new_v4(),
            instance_id: instance.id,
            migration_type,
            status: MigrationStatus::PreMigrating,
            source_host: instance.host.clone().unwrap_or_else(|| self.inner.host.clone()),
            source_node: instance.node.clone().unwrap_or_else(|| self.inner.nodename.clone()),
            dest_host: self.inner.host.clone(),
            dest_node: self.inner.nodename.clone(),
            old_request: Some(instance.request.clone()),
            new_request: Some(new_request.clone()),
        };

        let claim = {
            let mut guard = self.inner.state.lock().unwrap();
            let state = &mut *guard;
            match state.compute_node.as_mut() {
                None => {
                    debug!(
                        "no resource view for {}/{}, issuing zero move claim for instance {}",
                        self.inner.host, self.inner.nodename, instance.id
                    );
                    Claim::nop(Arc::clone(&self.inner), instance.id)
                }
                Some(record) => {
                    debug!(
                        "move claim of {} MB ram, {} GB disk, {} vcpus for instance {} ({})",
                        footprint.memory_mb,
                        footprint.disk_gb,
                        footprint.vcpus,
                        instance.id,
                        migration.migration_type
                    );
                    let (numa, devices) =
                        Self::test_claim(record, new_request, &footprint, limits)?;
                    if let Some(assignment) = numa.as_ref() {
                        if let Some(requested) = claimed.numa.as_mut() {
                            assignment.pin(requested);
                        }
                        footprint.numa = claimed.numa.clone();
                        migration.new_request = Some(claimed.clone());
                    }
                    Self::apply_claim(record, &footprint, numa.as_ref(), devices.as_ref());
                    state.tracked_migrations.insert(
                        instance.id,
                        TrackedMigration {
                            migration: migration.clone(),
                            footprints: vec![footprint.clone()],
                        },
                    );
                    Claim::new(
                        Arc::clone(&self.inner),
                        instance.id,
                        footprint,
                        numa,
                        devices,
                        ClaimKind::Move,
                    )
                }
            }
        };

        // Ledger or census write failures drop the claim, reverting the
        // deltas just applied.
        self.inner.migrations.create_or_update(&migration)?;
        instance.old_request = Some(instance.request.clone());
        instance.new_request = Some(claimed);
        self.inner.instances.save(instance)?;
        if let Err(err) = self.inner.sync_to_store() {
            warn!("failed to sync host record after move claim: {}", err);
        }
        Ok(MoveClaim::new(migration, claim))
    }

    /// Removes the tracked move of an instance, reversing its accounted
    /// usage and marking the migration reverted. No-op if no move of the
    /// instance is tracked here.
    pub fn drop_move_claim(&self, instance_id: Uuid) {
        let reverted = {
            let mut guard = self.inner.state.lock().unwrap();
            let state = &mut *guard;
            match state.tracked_migrations.remove(&instance_id) {
                None => None,
                Some(tracked) => {
                    if let Some(record) = state.compute_node.as_mut() {
                        for footprint in &tracked.footprints {
                            record.remove_usage(
                                footprint.memory_mb,
                                footprint.disk_gb,
                                footprint.vcpus,
                            );
                            if let (Some(topology), Some(numa)) =
                                (record.numa_topology.as_mut(), footprint.numa.as_ref())
                            {
                                topology.remove_usage(numa);
                            }
                        }
                        recompute_workload(record, &state.tracked_instances);
                    }
                    let mut migration = tracked.migration;
                    migration.status = MigrationStatus::Reverted;
                    Some(migration)
                }
            }
        };

        if let Some(migration) = reverted {
            if let Err(err) = self.inner.migrations.create_or_update(&migration) {
                warn!("failed to mark migration {} reverted: {}", migration.id, err);
            }
            if let Err(err) = self.inner.sync_to_store() {
                warn!("failed to sync host record after dropping move claim: {}", err);
            }
        }
    }

    /// Folds a state change of a tracked workload into the accounting:
    /// deletion releases its footprint, any other change refreshes the task
    /// state feeding the workload counter. Untracked workloads are ignored,
    /// only claimed or audited usage may be released.
    pub fn update_usage(&self, instance: &Instance) {
        {
            let mut guard = self.inner.state.lock().unwrap();
            let state = &mut *guard;
            let Some(record) = state.compute_node.as_mut() else {
                return;
            };
            let Some(tracked) = state.tracked_instances.get_mut(&instance.id) else {
                return;
            };
            if instance.vm_state == VmState::Deleted {
                let footprint = tracked.footprint.clone();
                record.remove_usage(footprint.memory_mb, footprint.disk_gb, footprint.vcpus);
                if let (Some(topology), Some(numa)) =
                    (record.numa_topology.as_mut(), footprint.numa.as_ref())
                {
                    topology.remove_usage(numa);
                }
                record.running_vms = record.running_vms.saturating_sub(1);
                state.tracked_instances.remove(&instance.id);
            } else {
                tracked.task_state = instance.task_state;
            }
            recompute_workload(record, &state.tracked_instances);
        }

        if let Err(err) = self.inner.sync_to_store() {
            warn!("failed to sync host record after usage update: {}", err);
        }
    }

    /// Rebuilds the host record from scratch against the driver report, the
    /// instance census and the migration ledger, then publishes it if it
    /// changed. Never adjusts incrementally: any accounting drift is healed
    /// by the recomputation.
    pub fn reconcile(&self) -> Result<(), TrackerError> {
        let inner = &self.inner;
        let Some(resources) = inner.driver.available_resources(&inner.nodename) else {
            info!(
                "driver reports no resources for {}/{}, disabling resource tracking",
                inner.host, inner.nodename
            );
            return self.disable();
        };

        // Malformed driver stats abort the pass before any state is touched;
        // the previously published record stays authoritative.
        let driver_stats = match &resources.stats {
            Some(stats) => Some(stats.coerce()?),
            None => None,
        };

        debug!(
            "hypervisor view of {}/{}: {} vcpus, {} MB ram, {} GB disk",
            inner.host, inner.nodename, resources.vcpus, resources.memory_mb, resources.local_gb
        );

        let prior_id = match self.known_record_id() {
            Some(id) => Some(id),
            None => match inner.host_records.get(&inner.host, &inner.nodename) {
                Ok(existing) => existing.id,
                Err(TrackerError::HostNotFound { .. }) => None,
                Err(err) => return Err(err),
            },
        };

        // The audit holds the state lock from census read to swap: a
        // concurrent claim lands either before the recompute (and is seen by
        // the census) or after the new record is installed, never in between
        // where the swap would erase it.
        let mut guard = inner.state.lock().unwrap();

        let resident = inner.instances.list_resident(&inner.host, &inner.nodename);
        let migrations = inner.migrations.list_in_progress(&inner.host, &inner.nodename);
        let hypervisor_usage = inner.driver.per_instance_usage();

        let mut record = HostResourceRecord::new(&inner.host, &inner.nodename);
        record.id = prior_id;
        record.vcpus_total = resources.vcpus;
        record.memory_mb_total = resources.memory_mb;
        record.disk_gb_total = resources.local_gb;
        record.memory_mb_used = inner.config.reserved_host_memory_mb;
        record.disk_gb_used = inner.config.reserved_host_disk_gb;
        record.numa_topology = resources.numa_topology.as_ref().map(|t| t.zeroed());
        record.device_pools = DevicePoolSet::from_devices(&resources.pci_devices);
        record.refresh_free();

        let mut tracked_instances: HashMap<Uuid, TrackedInstance> = HashMap::new();
        let mut tracked_migrations: HashMap<Uuid, TrackedMigration> = HashMap::new();
        let mut by_id: HashMap<Uuid, Instance> = HashMap::new();

        for instance in resident {
            if instance.vm_state == VmState::Deleted {
                // Stale census row, already released.
                continue;
            }
            record.running_vms += 1;
            // Mid-resize workloads are charged through the migration ledger
            // below; here they only contribute their presence.
            let footprint = if instance.in_resize_state() {
                Footprint::default()
            } else {
                audit_request(inner.driver.as_ref(), &mut record, &instance.request)
            };
            tracked_instances.insert(
                instance.id,
                TrackedInstance {
                    footprint,
                    task_state: instance.task_state,
                },
            );
            by_id.insert(instance.id, instance);
        }

        for migration in migrations {
            if migration.status.is_terminal() {
                continue;
            }
            if tracked_migrations.contains_key(&migration.instance_id) {
                // One tracked move per instance; later ledger rows are stale.
                continue;
            }
            let instance = by_id.get(&migration.instance_id);
            let mut footprints = Vec::new();

            let incoming = migration.dest_host == inner.host && migration.dest_node == inner.nodename;
            let outgoing =
                migration.source_host == inner.host && migration.source_node == inner.nodename;

            if incoming {
                let request = instance
                    .and_then(|i| i.new_request.clone())
                    .or_else(|| migration.new_request.clone());
                match request {
                    Some(request) => {
                        footprints.push(audit_request(inner.driver.as_ref(), &mut record, &request))
                    }
                    None => warn!(
                        "migration {} has no usable destination demand for instance {}, skipping",
                        migration.id, migration.instance_id
                    ),
                }
            }
            if outgoing {
                let request = instance
                    .and_then(|i| i.old_request.clone())
                    .or_else(|| migration.old_request.clone());
                match request {
                    Some(request) => {
                        footprints.push(audit_request(inner.driver.as_ref(), &mut record, &request))
                    }
                    None => warn!(
                        "migration {} has no usable source demand for instance {}, skipping",
                        migration.id, migration.instance_id
                    ),
                }
            }

            if !footprints.is_empty() {
                tracked_migrations.insert(
                    migration.instance_id,
                    TrackedMigration {
                        migration,
                        footprints,
                    },
                );
            }
        }

        // Workloads the hypervisor runs but nothing else knows about still
        // consume memory; charge them so capacity is not overstated.
        for (id, usage) in &hypervisor_usage {
            if tracked_instances.contains_key(id) {
                continue;
            }
            let orphan_request = ResourceRequest {
                memory_mb: usage.memory_mb,
                ..ResourceRequest::default()
            };
            let overhead = inner.driver.estimate_overhead(&orphan_request).memory_mb;
            warn!(
                "orphan instance {} occupies {} MB ram on {}/{}",
                id,
                usage.memory_mb + overhead,
                inner.host,
                inner.nodename
            );
            record.add_usage(usage.memory_mb + overhead, 0, 0);
        }

        recompute_workload(&mut record, &tracked_instances);

        let mut stats = driver_stats.unwrap_or_default();
        stats.insert(
            "num_instances".to_string(),
            tracked_instances.len().to_string(),
        );
        let mut counters: BTreeMap<String, u32> = BTreeMap::new();
        for instance in by_id.values() {
            *counters
                .entry(format!("num_vm_{}", instance.vm_state))
                .or_insert(0) += 1;
            if let Some(task) = instance.task_state {
                *counters.entry(format!("num_task_{}", task)).or_insert(0) += 1;
            }
        }
        for (key, count) in counters {
            stats.insert(key, count.to_string());
        }
        stats.insert(
            "io_workload".to_string(),
            record.current_workload.to_string(),
        );
        record.stats = stats;

        inner.plugins.write_all(&mut record);

        guard.compute_node = Some(record);
        guard.tracked_instances = tracked_instances;
        guard.tracked_migrations = tracked_migrations;
        drop(guard);

        inner.sync_to_store()
    }

    fn known_record_id(&self) -> Option<u32> {
        let state = self.inner.state.lock().unwrap();
        state.compute_node.as_ref().and_then(|r| r.id)
    }

    fn disable(&self) -> Result<(), TrackerError> {
        let prior_id = {
            let mut state = self.inner.state.lock().unwrap();
            let id = state.compute_node.take().and_then(|r| r.id);
            state.tracked_instances.clear();
            state.tracked_migrations.clear();
            state.last_published = None;
            id
        };
        let prior_id = prior_id.or_else(|| {
            self.inner
                .host_records
                .get(&self.inner.host, &self.inner.nodename)
                .ok()
                .and_then(|r| r.id)
        });
        if let Some(id) = prior_id {
            info!(
                "deleting resource record {} for unreported node {}/{}",
                id, self.inner.host, self.inner.nodename
            );
            self.inner.host_records.delete(id)?;
        }
        Ok(())
    }

    /// Runs the admission checks for a claim against the current record.
    /// Read-only: returns the planned NUMA and device reservations.
    fn test_claim(
        record: &HostResourceRecord,
        request: &ResourceRequest,
        footprint: &Footprint,
        limits: &Limits,
    ) -> Result<(Option<NumaAssignment>, Option<DeviceClaim>), TrackerError> {
        test_scalar(
            "memory",
            footprint.memory_mb,
            record.memory_mb_used,
            limits.memory_mb,
        )?;
        test_scalar(
            "disk",
            footprint.disk_gb,
            record.disk_gb_used,
            limits.disk_gb,
        )?;
        test_scalar(
            "vcpus",
            footprint.vcpus as u64,
            record.vcpus_used as u64,
            limits.vcpus.map(|v| v as u64),
        )?;

        let numa = match (&request.numa, record.numa_topology.as_ref()) {
            (Some(requested), Some(topology)) => Some(
                topology
                    .fit(requested, &limits.numa_limits())
                    .ok_or_else(|| TrackerError::ResourceUnavailable {
                        resource: "numa topology".to_string(),
                        requested: requested.cells.len() as u64,
                        available: 0,
                    })?,
            ),
            _ => None,
        };

        let devices = if request.devices.is_empty() {
            None
        } else {
            Some(record.device_pools.plan(&request.devices)?)
        };

        Ok((numa, devices))
    }

    /// Applies a tested claim's deltas to the record.
    fn apply_claim(
        record: &mut HostResourceRecord,
        footprint: &Footprint,
        numa: Option<&NumaAssignment>,
        devices: Option<&DeviceClaim>,
    ) {
        record.add_usage(footprint.memory_mb, footprint.disk_gb, footprint.vcpus);
        if let (Some(topology), Some(assignment)) = (record.numa_topology.as_mut(), numa) {
            topology.apply(assignment);
        }
        if let Some(claim) = devices {
            record.device_pools.apply(claim);
        }
    }

    /// Pins an instance to this host and persists the placement.
    fn set_instance_host_and_node(&self, instance: &mut Instance) -> Result<(), TrackerError> {
        instance.host = Some(self.inner.host.clone());
        instance.node = Some(self.inner.nodename.clone());
        if instance.launched_on.is_none() {
            instance.launched_on = Some(self.inner.host.clone());
        }
        self.inner.instances.save(instance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn footprint_folds_overhead_into_memory() {
        let request = ResourceRequest {
            memory_mb: 1024,
            vcpus: 2,
            root_gb: 10,
            ephemeral_gb: 5,
            ..ResourceRequest::default()
        };
        let footprint = Footprint::from_request(&request, 100);
        assert_eq!(footprint.memory_mb, 1124);
        assert_eq!(footprint.disk_gb, 15);
        assert_eq!(footprint.vcpus, 2);
    }

    #[test]
    fn absent_scalar_limit_is_not_enforced() {
        assert!(test_scalar("memory", 1 << 40, 0, None).is_ok());
    }

    #[test]
    fn scalar_limit_accounts_for_usage() {
        assert!(test_scalar("memory", 4, 3, Some(8)).is_ok());
        let err = test_scalar("memory", 6, 3, Some(8)).unwrap_err();
        match err {
            TrackerError::ResourceUnavailable {
                requested,
                available,
                ..
            } => {
                assert_eq!(requested, 6);
                assert_eq!(available, 5);
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
