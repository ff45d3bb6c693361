//! NUMA topology model and cell allocator.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::core::oversubscription::{allowed, NumaLimits};

/// Memory page accounting for one page size within a cell.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryPages {
    pub size_kb: u64,
    pub total: u64,
    pub used: u64,
}

/// One host NUMA cell: its own CPU set and local memory, scheduled as an
/// atomic placement target.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NumaCell {
    pub id: u32,
    pub cpuset: BTreeSet<u32>,
    /// Local memory in MB.
    pub memory: u64,
    pub cpu_usage: u32,
    pub memory_usage: u64,
    pub pinned_cpus: BTreeSet<u32>,
    pub mempages: Vec<MemoryPages>,
}

impl NumaCell {
    pub fn new(id: u32, cpuset: BTreeSet<u32>, memory: u64) -> Self {
        Self {
            id,
            cpuset,
            memory,
            cpu_usage: 0,
            memory_usage: 0,
            pinned_cpus: BTreeSet::new(),
            mempages: Vec::new(),
        }
    }
}

/// Host NUMA topology: an ordered sequence of cells. The declaration order
/// is significant, cells are scanned in this order during fitting.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NumaTopology {
    pub cells: Vec<NumaCell>,
}

/// One requested cell of a workload's NUMA topology.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NumaRequestCell {
    pub id: u32,
    pub cpuset: BTreeSet<u32>,
    /// Requested memory in MB.
    pub memory: u64,
}

/// A workload's NUMA request: a sequence of cells each needing a CPU count
/// and a memory amount.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NumaRequest {
    pub cells: Vec<NumaRequestCell>,
}

/// Usage delta against one host cell, recorded by cell id so that a claim
/// can be reverted as the exact numeric inverse on the same cells even after
/// the topology has been rebuilt in between.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CellUsage {
    pub cell_id: u32,
    pub cpus: u32,
    pub memory: u64,
}

/// The outcome of fitting a request: one host cell per requested cell.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NumaAssignment {
    pub pairs: Vec<CellUsage>,
}

impl NumaAssignment {
    /// Rewrites the request's cell ids to the host cells the fit chose, so
    /// that a persisted request carries the actual placement and later
    /// audits charge the same cells this assignment reserved.
    pub fn pin(&self, request: &mut NumaRequest) {
        for (requested, pair) in request.cells.iter_mut().zip(&self.pairs) {
            requested.id = pair.cell_id;
        }
    }
}

impl NumaTopology {
    /// Returns a copy of this topology with all usage counters reset.
    pub fn zeroed(&self) -> NumaTopology {
        let mut topology = self.clone();
        for cell in &mut topology.cells {
            cell.cpu_usage = 0;
            cell.memory_usage = 0;
            for pages in &mut cell.mempages {
                pages.used = 0;
            }
        }
        topology
    }

    /// Fits a workload request onto this topology.
    ///
    /// Each requested cell is placed on the first feasible host cell in
    /// declaration order, one-to-one (a host cell takes at most one
    /// requested cell per fit). A host cell is feasible if both its CPU and
    /// memory usage stay within `allowed(total, ratio)`. Returns `None` if
    /// any requested cell cannot be placed; nothing is mutated.
    pub fn fit(&self, request: &NumaRequest, limits: &NumaLimits) -> Option<NumaAssignment> {
        let mut taken = vec![false; self.cells.len()];
        let mut pairs = Vec::with_capacity(request.cells.len());

        for requested in &request.cells {
            let cpus = requested.cpuset.len() as u32;
            let mut placed = false;
            for (i, cell) in self.cells.iter().enumerate() {
                if taken[i] {
                    continue;
                }
                let cpu_limit = allowed(cell.cpuset.len() as u64, limits.cpu_allocation_ratio);
                let ram_limit = allowed(cell.memory, limits.ram_allocation_ratio);
                if (cell.cpu_usage + cpus) as u64 <= cpu_limit
                    && cell.memory_usage + requested.memory <= ram_limit
                {
                    taken[i] = true;
                    pairs.push(CellUsage {
                        cell_id: cell.id,
                        cpus,
                        memory: requested.memory,
                    });
                    placed = true;
                    break;
                }
            }
            if !placed {
                return None;
            }
        }
        Some(NumaAssignment { pairs })
    }

    /// Applies a fitted assignment to this topology, addressing cells by id.
    pub fn apply(&mut self, assignment: &NumaAssignment) {
        for pair in &assignment.pairs {
            if let Some(cell) = self.cells.iter_mut().find(|c| c.id == pair.cell_id) {
                cell.cpu_usage += pair.cpus;
                cell.memory_usage += pair.memory;
            }
        }
    }

    /// Reverts a previously applied assignment.
    pub fn revert(&mut self, assignment: &NumaAssignment) {
        for pair in &assignment.pairs {
            if let Some(cell) = self.cells.iter_mut().find(|c| c.id == pair.cell_id) {
                cell.cpu_usage = cell.cpu_usage.saturating_sub(pair.cpus);
                cell.memory_usage = cell.memory_usage.saturating_sub(pair.memory);
            }
        }
    }

    /// Unconditionally accounts a request against this topology, matching
    /// request cells to host cells by id and falling back to position.
    ///
    /// Used by the reconciliation audit, which must account every resident
    /// workload even when the host is oversubscribed beyond its limits.
    pub fn add_usage(&mut self, request: &NumaRequest) {
        for (i, requested) in request.cells.iter().enumerate() {
            let cpus = requested.cpuset.len() as u32;
            if let Some(cell) = self.cell_for_request_mut(requested.id, i) {
                cell.cpu_usage += cpus;
                cell.memory_usage += requested.memory;
            }
        }
    }

    /// Numeric inverse of [`NumaTopology::add_usage`].
    pub fn remove_usage(&mut self, request: &NumaRequest) {
        for (i, requested) in request.cells.iter().enumerate() {
            let cpus = requested.cpuset.len() as u32;
            if let Some(cell) = self.cell_for_request_mut(requested.id, i) {
                cell.cpu_usage = cell.cpu_usage.saturating_sub(cpus);
                cell.memory_usage = cell.memory_usage.saturating_sub(requested.memory);
            }
        }
    }

    fn cell_for_request_mut(&mut self, id: u32, index: usize) -> Option<&mut NumaCell> {
        if let Some(pos) = self.cells.iter().position(|c| c.id == id) {
            return self.cells.get_mut(pos);
        }
        self.cells.get_mut(index)
    }
}
