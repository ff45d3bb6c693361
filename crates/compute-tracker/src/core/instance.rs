//! Representations of workloads and migrations as the tracker sees them.

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::device_pool::DeviceRequest;
use crate::core::numa::NumaRequest;

/// Lifecycle state of a workload's virtual machine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum VmState {
    Building,
    Active,
    Paused,
    Stopped,
    Resized,
    Deleted,
    Error,
}

impl Display for VmState {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            VmState::Building => write!(f, "building"),
            VmState::Active => write!(f, "active"),
            VmState::Paused => write!(f, "paused"),
            VmState::Stopped => write!(f, "stopped"),
            VmState::Resized => write!(f, "resized"),
            VmState::Deleted => write!(f, "deleted"),
            VmState::Error => write!(f, "error"),
        }
    }
}

/// In-progress transition of a workload, if any.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskState {
    Scheduling,
    Spawning,
    Rebuilding,
    Migrating,
    ResizePrep,
    ResizeMigrating,
    ResizeMigrated,
    ResizeFinish,
}

impl TaskState {
    /// Task states that are part of the resize sequence.
    pub fn is_resize(&self) -> bool {
        matches!(
            self,
            TaskState::ResizePrep
                | TaskState::ResizeMigrating
                | TaskState::ResizeMigrated
                | TaskState::ResizeFinish
        )
    }
}

impl Display for TaskState {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            TaskState::Scheduling => write!(f, "scheduling"),
            TaskState::Spawning => write!(f, "spawning"),
            TaskState::Rebuilding => write!(f, "rebuilding"),
            TaskState::Migrating => write!(f, "migrating"),
            TaskState::ResizePrep => write!(f, "resize_prep"),
            TaskState::ResizeMigrating => write!(f, "resize_migrating"),
            TaskState::ResizeMigrated => write!(f, "resize_migrated"),
            TaskState::ResizeFinish => write!(f, "resize_finish"),
        }
    }
}

/// Immutable snapshot of a workload's resource demand, taken at claim time.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRequest {
    pub memory_mb: u64,
    pub vcpus: u32,
    pub root_gb: u64,
    pub ephemeral_gb: u64,
    pub numa: Option<NumaRequest>,
    pub devices: Vec<DeviceRequest>,
}

impl ResourceRequest {
    pub fn disk_gb(&self) -> u64 {
        self.root_gb + self.ephemeral_gb
    }
}

/// A workload as reported by the instance census.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Instance {
    pub id: Uuid,
    pub host: Option<String>,
    pub node: Option<String>,
    pub launched_on: Option<String>,
    pub vm_state: VmState,
    pub task_state: Option<TaskState>,
    pub request: ResourceRequest,
    /// Pre-resize demand, retained while a resize is in flight.
    pub old_request: Option<ResourceRequest>,
    /// Post-resize demand, set when a resize claim is made.
    pub new_request: Option<ResourceRequest>,
}

impl Instance {
    pub fn new(id: Uuid, request: ResourceRequest) -> Self {
        Self {
            id,
            host: None,
            node: None,
            launched_on: None,
            vm_state: VmState::Building,
            task_state: None,
            request,
            old_request: None,
            new_request: None,
        }
    }

    /// Whether this workload is mid-resize: its usage is audited through the
    /// migration ledger rather than the plain resident list.
    pub fn in_resize_state(&self) -> bool {
        if self.vm_state == VmState::Resized {
            return true;
        }
        matches!(self.task_state, Some(state) if state.is_resize())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MigrationType {
    Resize,
    ColdMigration,
    LiveMigration,
    Evacuation,
}

impl Display for MigrationType {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            MigrationType::Resize => write!(f, "resize"),
            MigrationType::ColdMigration => write!(f, "cold-migration"),
            MigrationType::LiveMigration => write!(f, "live-migration"),
            MigrationType::Evacuation => write!(f, "evacuation"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MigrationStatus {
    Pending,
    Queued,
    PreMigrating,
    Migrating,
    PostMigrating,
    Finished,
    Confirmed,
    Reverted,
    Error,
}

impl MigrationStatus {
    /// Terminal migrations no longer count toward double-accounting.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            MigrationStatus::Confirmed | MigrationStatus::Reverted | MigrationStatus::Error
        )
    }
}

impl Display for MigrationStatus {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            MigrationStatus::Pending => write!(f, "pending"),
            MigrationStatus::Queued => write!(f, "queued"),
            MigrationStatus::PreMigrating => write!(f, "pre-migrating"),
            MigrationStatus::Migrating => write!(f, "migrating"),
            MigrationStatus::PostMigrating => write!(f, "post-migrating"),
            MigrationStatus::Finished => write!(f, "finished"),
            MigrationStatus::Confirmed => write!(f, "confirmed"),
            MigrationStatus::Reverted => write!(f, "reverted"),
            MigrationStatus::Error => write!(f, "error"),
        }
    }
}

/// Persisted record of an in-flight move.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Migration {
    pub id: Uuid,
    pub instance_id: Uuid,
    pub migration_type: MigrationType,
    pub status: MigrationStatus,
    pub source_host: String,
    pub source_node: String,
    pub dest_host: String,
    pub dest_node: String,
    /// Demand snapshots carried on the record so that a migration whose
    /// workload is unknown locally can still be accounted.
    pub old_request: Option<ResourceRequest>,
    pub new_request: Option<ResourceRequest>,
}
