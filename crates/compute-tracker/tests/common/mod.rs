#![allow(dead_code)]

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, Mutex};

use uuid::Uuid;

use compute_tracker::core::config::TrackerConfig;
use compute_tracker::core::device_pool::{DeviceStatus, PciDevice};
use compute_tracker::core::error::TrackerError;
use compute_tracker::core::host_record::HostResourceRecord;
use compute_tracker::core::instance::{Instance, Migration, ResourceRequest, VmState};
use compute_tracker::core::interfaces::{
    DriverResources, DriverStats, HostRecordStore, HypervisorDriver, InstanceStore, InstanceUsage,
    MigrationStore, Overhead, SchedulerReporter,
};
use compute_tracker::core::numa::{NumaCell, NumaRequest, NumaRequestCell, NumaTopology};
use compute_tracker::core::tracker::ResourceTracker;

pub const HOST: &str = "fake-host";
pub const NODE: &str = "fake-node";

pub const TOTAL_MEMORY_MB: u64 = 5;
pub const TOTAL_DISK_GB: u64 = 6;
pub const TOTAL_VCPUS: u32 = 1;
pub const OVERHEAD_MB: u64 = 1;
pub const CELL_MEMORY_MB: u64 = 3072;

/// Scripted hypervisor driver: fixed totals, per-instance overhead and an
/// optional set of hypervisor-only (orphan) workloads.
pub struct FakeDriver {
    resources: Mutex<Option<DriverResources>>,
    overhead_mb: u64,
    usage: Mutex<HashMap<Uuid, InstanceUsage>>,
}

impl FakeDriver {
    pub fn new() -> Self {
        Self {
            resources: Mutex::new(Some(Self::default_resources())),
            overhead_mb: OVERHEAD_MB,
            usage: Mutex::new(HashMap::new()),
        }
    }

    /// A driver that cannot describe the node at all.
    pub fn unsupported() -> Self {
        Self {
            resources: Mutex::new(None),
            overhead_mb: 0,
            usage: Mutex::new(HashMap::new()),
        }
    }

    pub fn default_resources() -> DriverResources {
        DriverResources {
            vcpus: TOTAL_VCPUS,
            memory_mb: TOTAL_MEMORY_MB,
            local_gb: TOTAL_DISK_GB,
            vcpus_used: 0,
            memory_mb_used: 0,
            local_gb_used: 0,
            numa_topology: Some(NumaTopology {
                cells: vec![
                    NumaCell::new(0, BTreeSet::from([1, 2]), CELL_MEMORY_MB),
                    NumaCell::new(1, BTreeSet::from([3, 4]), CELL_MEMORY_MB),
                ],
            }),
            pci_devices: Vec::new(),
            stats: None,
        }
    }

    pub fn with_overhead(mut self, memory_mb: u64) -> Self {
        self.overhead_mb = memory_mb;
        self
    }

    pub fn with_stats(self, stats: DriverStats) -> Self {
        if let Some(resources) = self.resources.lock().unwrap().as_mut() {
            resources.stats = Some(stats);
        }
        self
    }

    pub fn with_devices(self, devices: Vec<PciDevice>) -> Self {
        if let Some(resources) = self.resources.lock().unwrap().as_mut() {
            resources.pci_devices = devices;
        }
        self
    }

    pub fn set_resources(&self, resources: Option<DriverResources>) {
        *self.resources.lock().unwrap() = resources;
    }

    pub fn update_resources(&self, f: impl FnOnce(&mut DriverResources)) {
        if let Some(resources) = self.resources.lock().unwrap().as_mut() {
            f(resources);
        }
    }

    pub fn add_orphan(&self, id: Uuid, memory_mb: u64) {
        self.usage
            .lock()
            .unwrap()
            .insert(id, InstanceUsage { memory_mb });
    }
}

impl HypervisorDriver for FakeDriver {
    fn available_resources(&self, _node: &str) -> Option<DriverResources> {
        self.resources.lock().unwrap().clone()
    }

    fn estimate_overhead(&self, _request: &ResourceRequest) -> Overhead {
        Overhead {
            memory_mb: self.overhead_mb,
        }
    }

    fn per_instance_usage(&self) -> HashMap<Uuid, InstanceUsage> {
        self.usage.lock().unwrap().clone()
    }
}

#[derive(Default)]
pub struct FakeInstanceStore {
    saved: Mutex<HashMap<Uuid, Instance>>,
}

impl FakeInstanceStore {
    pub fn add(&self, instance: Instance) {
        self.saved.lock().unwrap().insert(instance.id, instance);
    }

    pub fn get(&self, id: Uuid) -> Option<Instance> {
        self.saved.lock().unwrap().get(&id).cloned()
    }

    pub fn remove(&self, id: Uuid) {
        self.saved.lock().unwrap().remove(&id);
    }

    pub fn clear(&self) {
        self.saved.lock().unwrap().clear();
    }
}

impl InstanceStore for FakeInstanceStore {
    fn list_resident(&self, host: &str, node: &str) -> Vec<Instance> {
        self.saved
            .lock()
            .unwrap()
            .values()
            .filter(|i| i.host.as_deref() == Some(host) && i.node.as_deref() == Some(node))
            .cloned()
            .collect()
    }

    fn save(&self, instance: &Instance) -> Result<(), TrackerError> {
        self.add(instance.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeMigrationStore {
    migrations: Mutex<HashMap<Uuid, Migration>>,
    hold: Mutex<Option<(Arc<Barrier>, Arc<Barrier>)>>,
}

impl FakeMigrationStore {
    pub fn add(&self, migration: Migration) {
        self.migrations
            .lock()
            .unwrap()
            .insert(migration.id, migration);
    }

    pub fn get(&self, id: Uuid) -> Option<Migration> {
        self.migrations.lock().unwrap().get(&id).cloned()
    }

    /// Parks the next `list_in_progress` call: it signals `entered`, then
    /// waits on `release`. Lets a test freeze a reconciliation mid-pass.
    pub fn hold_next_list(&self, entered: Arc<Barrier>, release: Arc<Barrier>) {
        *self.hold.lock().unwrap() = Some((entered, release));
    }
}

impl MigrationStore for FakeMigrationStore {
    fn list_in_progress(&self, host: &str, node: &str) -> Vec<Migration> {
        let hold = self.hold.lock().unwrap().take();
        if let Some((entered, release)) = hold {
            entered.wait();
            release.wait();
        }
        self.migrations
            .lock()
            .unwrap()
            .values()
            .filter(|m| !m.status.is_terminal())
            .filter(|m| {
                (m.source_host == host && m.source_node == node)
                    || (m.dest_host == host && m.dest_node == node)
            })
            .cloned()
            .collect()
    }

    fn create_or_update(&self, migration: &Migration) -> Result<(), TrackerError> {
        self.add(migration.clone());
        Ok(())
    }
}

pub struct FakeHostRecordStore {
    records: Mutex<HashMap<u32, HostResourceRecord>>,
    next_id: AtomicU32,
    fail_next_create: AtomicBool,
    fail_next_update: AtomicBool,
    update_calls: AtomicUsize,
}

impl Default for FakeHostRecordStore {
    fn default() -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            next_id: AtomicU32::new(1),
            fail_next_create: AtomicBool::new(false),
            fail_next_update: AtomicBool::new(false),
            update_calls: AtomicUsize::new(0),
        }
    }
}

impl FakeHostRecordStore {
    pub fn seed(&self, record: HostResourceRecord) -> u32 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let mut stored = record;
        stored.id = Some(id);
        self.records.lock().unwrap().insert(id, stored);
        id
    }

    pub fn fail_next_create(&self) {
        self.fail_next_create.store(true, Ordering::SeqCst);
    }

    pub fn fail_next_update(&self) {
        self.fail_next_update.store(true, Ordering::SeqCst);
    }

    pub fn update_count(&self) -> usize {
        self.update_calls.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    pub fn get_by_id(&self, id: u32) -> Option<HostResourceRecord> {
        self.records.lock().unwrap().get(&id).cloned()
    }
}

impl HostRecordStore for FakeHostRecordStore {
    fn get(&self, host: &str, node: &str) -> Result<HostResourceRecord, TrackerError> {
        self.records
            .lock()
            .unwrap()
            .values()
            .find(|r| r.host == host && r.node == node)
            .cloned()
            .ok_or(TrackerError::HostNotFound {
                host: host.to_string(),
                node: node.to_string(),
            })
    }

    fn create(&self, record: &HostResourceRecord) -> Result<HostResourceRecord, TrackerError> {
        if self.fail_next_create.swap(false, Ordering::SeqCst) {
            // Simulate a rival registrar winning the race: its copy lands in
            // the store and our create bounces off it.
            self.seed(record.clone());
            return Err(TrackerError::Persistence {
                host: record.host.clone(),
                node: record.node.clone(),
                reason: "duplicate record".to_string(),
            });
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let mut stored = record.clone();
        stored.id = Some(id);
        self.records.lock().unwrap().insert(id, stored.clone());
        Ok(stored)
    }

    fn update(&self, id: u32, record: &HostResourceRecord) -> Result<(), TrackerError> {
        if self.fail_next_update.swap(false, Ordering::SeqCst) {
            return Err(TrackerError::Persistence {
                host: record.host.clone(),
                node: record.node.clone(),
                reason: "update failed".to_string(),
            });
        }
        self.update_calls.fetch_add(1, Ordering::SeqCst);
        let mut stored = record.clone();
        stored.id = Some(id);
        self.records.lock().unwrap().insert(id, stored);
        Ok(())
    }

    fn delete(&self, id: u32) -> Result<(), TrackerError> {
        self.records.lock().unwrap().remove(&id);
        Ok(())
    }
}

#[derive(Default)]
pub struct CountingScheduler {
    published: Mutex<Vec<HostResourceRecord>>,
}

impl CountingScheduler {
    pub fn count(&self) -> usize {
        self.published.lock().unwrap().len()
    }

    pub fn last(&self) -> Option<HostResourceRecord> {
        self.published.lock().unwrap().last().cloned()
    }
}

impl SchedulerReporter for CountingScheduler {
    fn publish(&self, record: &HostResourceRecord) {
        self.published.lock().unwrap().push(record.clone());
    }
}

pub struct TestBed {
    pub tracker: ResourceTracker,
    pub driver: Arc<FakeDriver>,
    pub instances: Arc<FakeInstanceStore>,
    pub migrations: Arc<FakeMigrationStore>,
    pub records: Arc<FakeHostRecordStore>,
    pub scheduler: Arc<CountingScheduler>,
}

pub fn test_bed() -> TestBed {
    test_bed_with(FakeDriver::new(), TrackerConfig::new())
}

pub fn test_bed_with(driver: FakeDriver, config: TrackerConfig) -> TestBed {
    let _ = env_logger::builder().is_test(true).try_init();
    let driver = Arc::new(driver);
    let instances = Arc::new(FakeInstanceStore::default());
    let migrations = Arc::new(FakeMigrationStore::default());
    let records = Arc::new(FakeHostRecordStore::default());
    let scheduler = Arc::new(CountingScheduler::default());
    let tracker = ResourceTracker::new(
        HOST,
        NODE,
        driver.clone(),
        instances.clone(),
        migrations.clone(),
        records.clone(),
        scheduler.clone(),
        config,
    );
    TestBed {
        tracker,
        driver,
        instances,
        migrations,
        records,
        scheduler,
    }
}

pub fn request(memory_mb: u64, vcpus: u32, root_gb: u64, ephemeral_gb: u64) -> ResourceRequest {
    ResourceRequest {
        memory_mb,
        vcpus,
        root_gb,
        ephemeral_gb,
        numa: None,
        devices: Vec::new(),
    }
}

pub fn instance(request: ResourceRequest) -> Instance {
    Instance::new(Uuid::new_v4(), request)
}

/// An instance already placed and running on the test host.
pub fn resident_instance(request: ResourceRequest) -> Instance {
    let mut inst = instance(request);
    inst.host = Some(HOST.to_string());
    inst.node = Some(NODE.to_string());
    inst.launched_on = Some(HOST.to_string());
    inst.vm_state = VmState::Active;
    inst
}

/// A two-cell demand matching the fake host topology, one CPU and
/// `cell_memory` MB per cell.
pub fn numa_request(cell_memory: u64) -> NumaRequest {
    NumaRequest {
        cells: vec![
            NumaRequestCell {
                id: 0,
                cpuset: BTreeSet::from([1]),
                memory: cell_memory,
            },
            NumaRequestCell {
                id: 1,
                cpuset: BTreeSet::from([3]),
                memory: cell_memory,
            },
        ],
    }
}

pub fn pci_device(address: &str, vendor: &str, product: &str) -> PciDevice {
    PciDevice {
        address: address.to_string(),
        vendor_id: vendor.to_string(),
        product_id: product.to_string(),
        numa_node: None,
        status: DeviceStatus::Available,
        tags: std::collections::BTreeMap::new(),
    }
}
