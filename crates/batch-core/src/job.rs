use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};

use crate::rusage::JRusage;

bitflags::bitflags! {
    /// Dynamic job status bits. Exactly one of {PEND, RUN, DONE, EXIT} is
    /// dominant at any time; PSUSP layers on PEND, SSUSP/USUSP layer on RUN.
    #[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
    pub struct JobStatus: u32 {
        const PEND   = 1 << 0;
        const PSUSP  = 1 << 1;
        const RUN    = 1 << 2;
        const SSUSP  = 1 << 3;
        const USUSP  = 1 << 4;
        const DONE   = 1 << 5;
        const EXIT   = 1 << 6;
        const SIGNAL = 1 << 7;
        const PDONE  = 1 << 8;
        const PERR   = 1 << 9;
    }
}

impl JobStatus {
    const DOMINANT: [JobStatus; 4] = [JobStatus::PEND, JobStatus::RUN, JobStatus::DONE, JobStatus::EXIT];

    pub fn is_suspended(self) -> bool {
        self.intersects(JobStatus::PSUSP | JobStatus::SSUSP | JobStatus::USUSP)
    }

    fn invariants_hold(self) -> bool {
        let dominant_count = Self::DOMINANT.iter().filter(|d| self.contains(**d)).count();
        if dominant_count != 1 {
            return false;
        }
        if self.contains(JobStatus::PSUSP) && !self.contains(JobStatus::PEND) {
            return false;
        }
        if (self.contains(JobStatus::SSUSP) || self.contains(JobStatus::USUSP))
            && !self.contains(JobStatus::RUN)
        {
            return false;
        }
        true
    }
}

/// 64-bit composite job identifier: a base id in the low 32 bits, an
/// optional array-element index (1-based internally, `None` when absent)
/// packed into the high 32 bits.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(u64);

impl JobId {
    pub fn new(base: u32, array_idx: Option<u32>) -> Self {
        let idx_field = array_idx.map(|i| i as u64 + 1).unwrap_or(0);
        JobId((idx_field << 32) | base as u64)
    }

    pub fn base(self) -> u32 {
        (self.0 & 0xFFFF_FFFF) as u32
    }

    pub fn array_idx(self) -> Option<u32> {
        let idx_field = self.0 >> 32;
        if idx_field == 0 {
            None
        } else {
            Some((idx_field - 1) as u32)
        }
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "JobId({})", self)
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.array_idx() {
            Some(i) => write!(f, "{}[{}]", self.base(), i),
            None => write!(f, "{}", self.base()),
        }
    }
}

/// Pend-reason code. The distilled reason catalog is out of scope; only
/// the two rusage bands the preemption elector consults are named.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct PendReason(pub u32);

impl PendReason {
    pub const HOST_QUEUE_RUSAGE_LO: u32 = 1_000;
    pub const HOST_JOB_RUSAGE_LO: u32 = 2_000;

    pub fn is_host_queue_rusage_band(self) -> bool {
        (Self::HOST_QUEUE_RUSAGE_LO..Self::HOST_JOB_RUSAGE_LO).contains(&self.0)
    }

    pub fn is_host_job_rusage_band(self) -> bool {
        self.0 >= Self::HOST_JOB_RUSAGE_LO
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceLimitKind {
    Cpu,
    Run,
    Memory,
    Stack,
    Process,
    Fsize,
}

/// One time-of-day run window, expressed in fractional hours (`13.5` == 13:30).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Window {
    pub start_hour: f64,
    pub end_hour: f64,
}

impl Window {
    pub fn contains(&self, hour: f64) -> bool {
        hour >= self.start_hour && hour < self.end_hour
    }
}

#[derive(Debug, Clone)]
pub struct JobSpec {
    pub command: Vec<String>,
    pub job_name: Option<String>,
    pub num_processors: u32,
    pub limits: HashMap<ResourceLimitKind, f64>,
    pub dependency_expr: Option<String>,
    pub mail_user: Option<String>,
    pub project: Option<String>,
    pub group: Option<String>,
    /// One window list per day of the week, `[Sun..Sat]`. An empty day
    /// list means "no restriction, always active".
    pub windows: [Vec<Window>; 7],
    /// Resource names (e.g. a license feature) the job has requested a
    /// nonzero reservation of, used by resource-driven preemption.
    pub rusage_resources: Vec<String>,
}

impl JobSpec {
    pub fn new(command: Vec<String>, num_processors: u32) -> Self {
        JobSpec {
            command,
            job_name: None,
            num_processors,
            limits: HashMap::new(),
            dependency_expr: None,
            mail_user: None,
            project: None,
            group: None,
            windows: Default::default(),
            rusage_resources: Vec::new(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("job {0} is not pending, cannot dispatch")]
    NotPending(JobId),
    #[error("job {0} is not running, cannot suspend for preemption")]
    NotRunning(JobId),
    #[error("job {0} has no active preemption to resume from")]
    NotPreempted(JobId),
}

#[derive(Debug, Clone)]
pub struct Job {
    pub id: JobId,
    pub user: String,
    pub queue: String,
    pub spec: JobSpec,
    status: JobStatus,
    pub pend_reasons: Vec<PendReason>,
    /// The reason code assigned by the most recent dispatch attempt, or
    /// `None` if the job is blocked purely on slot availability. Distinct
    /// from `pend_reasons`, which accumulates historical reason codes.
    pub new_reason: Option<PendReason>,
    pub submit_time: DateTime<Utc>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub cpu_time: f64,
    pub usage: JRusage,
    pub exec_hosts: Vec<String>,
    pub predicted_start: Option<DateTime<Utc>>,
    pub preempted_by: Option<JobId>,
    pub preempted_hosts: Vec<String>,
}

impl Job {
    pub fn new(id: JobId, user: impl Into<String>, queue: impl Into<String>, spec: JobSpec, now: DateTime<Utc>) -> Self {
        Job {
            id,
            user: user.into(),
            queue: queue.into(),
            spec,
            status: JobStatus::PEND,
            pend_reasons: Vec::new(),
            new_reason: None,
            submit_time: now,
            start_time: None,
            end_time: None,
            cpu_time: 0.0,
            usage: JRusage::new(),
            exec_hosts: Vec::new(),
            predicted_start: None,
            preempted_by: None,
            preempted_hosts: Vec::new(),
        }
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    fn set_status(&mut self, status: JobStatus) {
        debug_assert!(status.invariants_hold(), "invalid job status combination: {status:?}");
        self.status = status;
    }

    pub fn dispatch(&mut self, hosts: Vec<String>, now: DateTime<Utc>) -> Result<(), JobError> {
        if !self.status.contains(JobStatus::PEND) {
            return Err(JobError::NotPending(self.id));
        }
        self.exec_hosts = hosts;
        self.start_time = Some(now);
        self.set_status(JobStatus::RUN);
        Ok(())
    }

    pub fn suspend_for_preemption(&mut self, trigger: JobId, hosts: impl IntoIterator<Item = String>) -> Result<(), JobError> {
        if !self.status.contains(JobStatus::RUN) || self.status.is_suspended() {
            return Err(JobError::NotRunning(self.id));
        }
        self.preempted_by = Some(trigger);
        self.preempted_hosts.extend(hosts);
        self.set_status(self.status | JobStatus::SSUSP);
        Ok(())
    }

    pub fn resume_from_preemption(&mut self) -> Result<(), JobError> {
        if self.preempted_by.is_none() {
            return Err(JobError::NotPreempted(self.id));
        }
        self.preempted_by = None;
        self.preempted_hosts.clear();
        self.set_status(self.status - JobStatus::SSUSP);
        Ok(())
    }

    pub fn finish(&mut self, succeeded: bool, now: DateTime<Utc>) {
        self.end_time = Some(now);
        let terminal = if succeeded { JobStatus::DONE } else { JobStatus::EXIT };
        self.set_status(terminal);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> JobSpec {
        JobSpec::new(vec!["/bin/true".into()], 4)
    }

    #[test]
    fn job_id_round_trips_base_and_array_idx() {
        let id = JobId::new(42, Some(3));
        assert_eq!(id.base(), 42);
        assert_eq!(id.array_idx(), Some(3));
        let plain = JobId::new(7, None);
        assert_eq!(plain.array_idx(), None);
    }

    #[test]
    fn dispatch_then_preempt_then_resume() {
        let now = Utc::now();
        let mut j = Job::new(JobId::new(1, None), "alice", "normal", spec(), now);
        assert!(j.status().contains(JobStatus::PEND));
        j.dispatch(vec!["host1".into()], now).unwrap();
        assert!(j.status().contains(JobStatus::RUN));

        let trigger = JobId::new(2, None);
        j.suspend_for_preemption(trigger, vec!["host1".into()]).unwrap();
        assert!(j.status().contains(JobStatus::RUN));
        assert!(j.status().contains(JobStatus::SSUSP));
        assert_eq!(j.preempted_by, Some(trigger));

        j.resume_from_preemption().unwrap();
        assert!(j.status().contains(JobStatus::RUN));
        assert!(!j.status().contains(JobStatus::SSUSP));
        assert!(j.preempted_by.is_none());
        assert!(j.preempted_hosts.is_empty());
    }

    #[test]
    fn cannot_dispatch_twice() {
        let now = Utc::now();
        let mut j = Job::new(JobId::new(1, None), "alice", "normal", spec(), now);
        j.dispatch(vec!["host1".into()], now).unwrap();
        assert!(matches!(j.dispatch(vec!["host2".into()], now), Err(JobError::NotPending(_))));
    }

    #[test]
    fn cannot_preempt_a_pending_job() {
        let now = Utc::now();
        let mut j = Job::new(JobId::new(1, None), "alice", "normal", spec(), now);
        assert!(matches!(
            j.suspend_for_preemption(JobId::new(2, None), vec![]),
            Err(JobError::NotRunning(_))
        ));
    }

    #[test]
    fn finish_sets_terminal_state() {
        let now = Utc::now();
        let mut j = Job::new(JobId::new(1, None), "alice", "normal", spec(), now);
        j.dispatch(vec!["host1".into()], now).unwrap();
        j.finish(true, now);
        assert!(j.status().contains(JobStatus::DONE));
    }
}
