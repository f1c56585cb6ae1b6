//! Process-tree resource harvest.
//!
//! Grounded on the launcher's `ls_getrusage`/`compact_rusage` pair: given a
//! task's pid, walk the process table for everything the task directly
//! owns plus anything sharing a process group with one of those
//! processes but not already counted (a "detached" descendant that
//! reparented to init but kept the job's pgid).

use std::collections::HashSet;
use std::fs;

use batch_core::{JRusage, PidInfo};

const PAGE_SIZE_KB: u64 = 4;
const CLK_TCK: f64 = 100.0;

#[derive(Debug, Clone, Copy)]
pub struct ProcessInfo {
    pub pid: i32,
    pub ppid: i32,
    pub pgid: i32,
    pub utime_s: f64,
    pub stime_s: f64,
    pub vsize_mb: u64,
    pub rss_kb: u64,
}

/// Parse `/proc/[pid]/stat` for every process currently visible. Entries
/// that disappear or are unreadable mid-scan (raced exit) are skipped
/// rather than failing the whole harvest.
pub fn read_proc_table() -> Vec<ProcessInfo> {
    let mut out = Vec::new();
    let Ok(entries) = fs::read_dir("/proc") else {
        return out;
    };
    for entry in entries.flatten() {
        let Some(pid) = entry.file_name().to_str().and_then(|s| s.parse::<i32>().ok()) else {
            continue;
        };
        if let Some(info) = read_stat(pid) {
            out.push(info);
        }
    }
    out
}

fn read_stat(pid: i32) -> Option<ProcessInfo> {
    let raw = fs::read_to_string(format!("/proc/{pid}/stat")).ok()?;
    // Fields after the `(comm)` field are space separated and comm itself
    // may contain spaces, so split on the closing paren rather than on
    // whitespace alone.
    let close = raw.rfind(')')?;
    let rest: Vec<&str> = raw[close + 1..].split_whitespace().collect();

    // rest[0] is state (field 3); ppid is field 4 => rest[1].
    let ppid: i32 = rest.get(1)?.parse().ok()?;
    let pgid: i32 = rest.get(2)?.parse().ok()?;
    let utime: u64 = rest.get(11)?.parse().ok()?;
    let stime: u64 = rest.get(12)?.parse().ok()?;
    let vsize: u64 = rest.get(20)?.parse().ok()?;
    let rss: i64 = rest.get(21)?.parse().ok()?;

    Some(ProcessInfo {
        pid,
        ppid,
        pgid,
        utime_s: utime as f64 / CLK_TCK,
        stime_s: stime as f64 / CLK_TCK,
        vsize_mb: vsize / (1024 * 1024),
        rss_kb: (rss.max(0) as u64 * PAGE_SIZE_KB),
    })
}

/// Aggregate usage rooted at pid `p`: `p` itself, its direct children, and
/// any other process sharing a wanted pgid that was not already counted.
pub fn harvest_for_pid(table: &[ProcessInfo], p: i32) -> JRusage {
    let wanted: Vec<&ProcessInfo> = table.iter().filter(|q| q.pid == p || q.ppid == p).collect();
    let wanted_pids: HashSet<i32> = wanted.iter().map(|q| q.pid).collect();

    let mut wanted_pgids = HashSet::new();
    for q in &wanted {
        wanted_pgids.insert(q.pgid);
    }

    let detached: Vec<&ProcessInfo> = table
        .iter()
        .filter(|q| q.pid != p && !wanted_pids.contains(&q.pid) && wanted_pgids.contains(&q.pgid))
        .collect();

    let mut usage = JRusage::new();
    let mut pgids = HashSet::new();
    for q in wanted.iter().chain(detached.iter()) {
        usage.mem_kb += q.rss_kb;
        usage.swap_mb += q.vsize_mb;
        usage.utime_s += q.utime_s;
        usage.stime_s += q.stime_s;
        usage.pids.push(PidInfo { pid: q.pid, ppid: q.ppid, pgid: q.pgid });
        pgids.insert(q.pgid);
    }
    usage.pgids = pgids.into_iter().collect();
    usage
}

#[cfg(test)]
mod tests {
    use super::*;

    fn proc(pid: i32, ppid: i32, pgid: i32) -> ProcessInfo {
        ProcessInfo { pid, ppid, pgid, utime_s: 1.0, stime_s: 0.5, vsize_mb: 10, rss_kb: 100 }
    }

    #[test]
    fn harvest_includes_self_and_direct_children() {
        let table = vec![proc(1, 0, 1), proc(2, 1, 1), proc(3, 1, 1), proc(99, 50, 50)];
        let usage = harvest_for_pid(&table, 1);
        assert_eq!(usage.pids.len(), 3);
        assert_eq!(usage.mem_kb, 300);
    }

    #[test]
    fn harvest_includes_detached_pgid_siblings() {
        // pid 5 reparented to init (ppid 1 belongs to someone else) but
        // kept the job's process group 1.
        let table = vec![proc(1, 0, 1), proc(2, 1, 1), proc(5, 1, 1)];
        let usage = harvest_for_pid(&table, 1);
        assert_eq!(usage.pids.len(), 3);
        assert_eq!(usage.pgids, vec![1]);
    }

    #[test]
    fn harvest_excludes_unrelated_process_groups() {
        let table = vec![proc(1, 0, 1), proc(2, 1, 1), proc(99, 98, 98)];
        let usage = harvest_for_pid(&table, 1);
        assert_eq!(usage.pids.len(), 2);
    }
}
