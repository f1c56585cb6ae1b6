//! CPU-core binding and per-queue share reservation.
//!
//! Grounded on the original core-affinity routines: `find_free_core`,
//! `bind_to_core`, `free_core`, `find_bound_core`, `get_core_shares`.
//! The actual affinity syscalls sit behind the `Affinity` trait so the
//! allocation bookkeeping can be tested without touching the scheduler.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::warn;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("failed to set CPU affinity for pid {pid}: {reason}")]
    SetAffinity { pid: u32, reason: String },
    #[error("failed to read CPU affinity for pid {pid}: {reason}")]
    GetAffinity { pid: u32, reason: String },
}

/// Seam for the actual `sched_setaffinity`/`sched_getaffinity` calls.
/// A `numa`-feature build would substitute a NUMA-node-aware allocator
/// behind the same trait; no such allocator is implemented in this port.
pub trait Affinity: Send + Sync {
    fn set_affinity(&self, pid: u32, cores: &[u32]) -> Result<(), CoreError>;
    fn get_affinity(&self, pid: u32) -> Result<Vec<u32>, CoreError>;
}

pub struct NixAffinity;

impl Affinity for NixAffinity {
    fn set_affinity(&self, pid: u32, cores: &[u32]) -> Result<(), CoreError> {
        use nix::sched::{sched_setaffinity, CpuSet};
        use nix::unistd::Pid;

        let mut set = CpuSet::new();
        for &c in cores {
            set.set(c as usize).map_err(|e| CoreError::SetAffinity { pid, reason: e.to_string() })?;
        }
        sched_setaffinity(Pid::from_raw(pid as i32), &set)
            .map_err(|e| CoreError::SetAffinity { pid, reason: e.to_string() })
    }

    fn get_affinity(&self, pid: u32) -> Result<Vec<u32>, CoreError> {
        use nix::sched::{sched_getaffinity, CpuSet};
        use nix::unistd::Pid;

        let set = sched_getaffinity(Pid::from_raw(pid as i32))
            .map_err(|e| CoreError::GetAffinity { pid, reason: e.to_string() })?;
        let mut v = Vec::new();
        for i in 0..CpuSet::count() {
            if set.is_set(i).unwrap_or(false) {
                v.push(i as u32);
            }
        }
        Ok(v)
    }
}

struct Core {
    bound: u32,
}

pub struct CoreTable {
    cores: Vec<Core>,
    affinity: Arc<dyn Affinity>,
}

impl CoreTable {
    pub fn new(num_cores: u32, affinity: Arc<dyn Affinity>) -> Self {
        CoreTable { cores: (0..num_cores).map(|_| Core { bound: 0 }).collect(), affinity }
    }

    pub fn num_cores(&self) -> u32 {
        self.cores.len() as u32
    }

    pub fn bound_count(&self, core: u32) -> u32 {
        self.cores[core as usize].bound
    }

    /// Return `n` core ids with `bound == 0`, or `None` if fewer than `n`
    /// are currently free.
    pub fn find_free(&self, n: usize) -> Option<Vec<u32>> {
        let free: Vec<u32> =
            self.cores.iter().enumerate().filter(|(_, c)| c.bound == 0).map(|(i, _)| i as u32).collect();
        if free.len() >= n {
            Some(free.into_iter().take(n).collect())
        } else {
            None
        }
    }

    pub fn bind(&mut self, pid: u32, cores: &[u32]) -> Result<(), CoreError> {
        self.affinity.set_affinity(pid, cores)?;
        for &c in cores {
            self.cores[c as usize].bound += 1;
        }
        Ok(())
    }

    pub fn free(&mut self, cores: &[u32], reset: bool) {
        for &c in cores {
            let slot = &mut self.cores[c as usize];
            slot.bound = if reset { 0 } else { slot.bound.saturating_sub(1) };
        }
    }

    /// Read a process's current affinity mask and re-claim those cores,
    /// used on daemon restart to recover bindings made before the crash.
    pub fn find_bound(&mut self, pid: u32) -> Result<Vec<u32>, CoreError> {
        let cores = self.affinity.get_affinity(pid)?;
        for &c in &cores {
            self.cores[c as usize].bound += 1;
        }
        Ok(cores)
    }
}

struct ShareEntry {
    shares: f64,
    cores: Vec<u32>,
}

/// Per-queue core-share reservations. Rebinding a queue to a different
/// share fraction fully releases its prior cores before reselecting.
#[derive(Default)]
pub struct QueueShareTable {
    entries: HashMap<String, ShareEntry>,
}

impl QueueShareTable {
    pub fn new() -> Self {
        QueueShareTable::default()
    }

    pub fn get_core_shares(&mut self, cores: &mut CoreTable, queue: &str, shares: f64) -> Option<Vec<u32>> {
        if let Some(existing) = self.entries.get(queue) {
            if (existing.shares - shares).abs() < f64::EPSILON {
                return Some(existing.cores.clone());
            }
        }

        if let Some(existing) = self.entries.remove(queue) {
            cores.free(&existing.cores, true);
        }

        let deserve = (shares * cores.num_cores() as f64).ceil() as usize;
        if deserve == 0 {
            return None;
        }

        let mut want = deserve;
        let selected = loop {
            if let Some(c) = cores.find_free(want) {
                break c;
            }
            want -= 1;
            if want == 0 {
                return None;
            }
        };

        if selected.len() < deserve {
            warn!(queue, deserve, got = selected.len(), "under-allocated core shares");
        }

        self.entries.insert(queue.to_string(), ShareEntry { shares, cores: selected.clone() });
        Some(selected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeAffinity;
    impl Affinity for FakeAffinity {
        fn set_affinity(&self, _pid: u32, _cores: &[u32]) -> Result<(), CoreError> {
            Ok(())
        }
        fn get_affinity(&self, _pid: u32) -> Result<Vec<u32>, CoreError> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn bind_then_free_returns_core_to_zero() {
        let mut table = CoreTable::new(4, Arc::new(FakeAffinity));
        table.bind(100, &[0, 1]).unwrap();
        assert_eq!(table.bound_count(0), 1);
        table.free(&[0, 1], false);
        assert_eq!(table.bound_count(0), 0);
        assert_eq!(table.bound_count(1), 0);
    }

    #[test]
    fn find_free_respects_already_bound_cores() {
        let mut table = CoreTable::new(4, Arc::new(FakeAffinity));
        table.bind(100, &[0, 1]).unwrap();
        let free = table.find_free(2).unwrap();
        assert_eq!(free, vec![2, 3]);
        assert!(table.find_free(3).is_none());
    }

    #[test]
    fn core_share_allocation_matches_fractions_then_warns_on_exhaustion() {
        let mut table = CoreTable::new(16, Arc::new(FakeAffinity));
        let mut shares = QueueShareTable::new();

        let q1 = shares.get_core_shares(&mut table, "Q1", 0.25).unwrap();
        assert_eq!(q1.len(), 4);

        let q2 = shares.get_core_shares(&mut table, "Q2", 0.75).unwrap();
        assert_eq!(q2.len(), 12);

        assert!(shares.get_core_shares(&mut table, "Q3", 0.25).is_none());
    }

    #[test]
    fn rebinding_a_queue_releases_its_prior_cores() {
        let mut table = CoreTable::new(8, Arc::new(FakeAffinity));
        let mut shares = QueueShareTable::new();

        let first = shares.get_core_shares(&mut table, "Q1", 0.5).unwrap();
        assert_eq!(first.len(), 4);

        let second = shares.get_core_shares(&mut table, "Q1", 0.25).unwrap();
        assert_eq!(second.len(), 2);
        assert_eq!(table.find_free(8).unwrap().len(), 6);
    }
}
