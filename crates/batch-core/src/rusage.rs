//! Resource-usage aggregation shared by the launcher's task monitor and
//! the host daemon's per-job accounting.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PidInfo {
    pub pid: i32,
    pub ppid: i32,
    pub pgid: i32,
}

/// Aggregate resource usage for a job or a single remote task.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JRusage {
    pub mem_kb: u64,
    pub swap_mb: u64,
    pub utime_s: f64,
    pub stime_s: f64,
    pub pids: Vec<PidInfo>,
    pub pgids: Vec<i32>,
}

impl JRusage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold `other`'s totals and process records into `self`. Pgids are
    /// deduplicated; pid records are not, since the same pid can
    /// legitimately appear once per reporting task.
    pub fn merge(&mut self, other: &JRusage) {
        self.mem_kb += other.mem_kb;
        self.swap_mb += other.swap_mb;
        self.utime_s += other.utime_s;
        self.stime_s += other.stime_s;
        self.pids.extend(other.pids.iter().cloned());
        for g in &other.pgids {
            if !self.pgids.contains(g) {
                self.pgids.push(*g);
            }
        }
    }

    /// Build one compacted aggregate from many per-task snapshots.
    pub fn compact<'a, I>(parts: I) -> JRusage
    where
        I: IntoIterator<Item = &'a JRusage>,
    {
        let mut out = JRusage::default();
        for p in parts {
            out.merge(p);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compact_sums_and_preserves_records() {
        let a = JRusage {
            mem_kb: 100,
            swap_mb: 1,
            utime_s: 1.5,
            stime_s: 0.5,
            pids: vec![PidInfo { pid: 10, ppid: 1, pgid: 10 }],
            pgids: vec![10],
        };
        let b = JRusage {
            mem_kb: 50,
            swap_mb: 0,
            utime_s: 0.25,
            stime_s: 0.25,
            pids: vec![PidInfo { pid: 11, ppid: 1, pgid: 10 }],
            pgids: vec![10],
        };
        let out = JRusage::compact([&a, &b]);
        assert_eq!(out.mem_kb, 150);
        assert_eq!(out.swap_mb, 1);
        assert!((out.utime_s - 1.75).abs() < 1e-9);
        assert!((out.stime_s - 0.75).abs() < 1e-9);
        assert_eq!(out.pids.len(), 2);
        assert_eq!(out.pgids, vec![10]);
    }
}
