use chrono::{DateTime, Utc};

use batch_core::{JRusage, JobId, JobSpec};

/// A job's host-local materialisation: the daemon's own bookkeeping for a
/// job the master has dispatched here, separate from the master's `Job`.
#[derive(Debug, Clone)]
pub struct JobCard {
    pub job_id: JobId,
    pub spec: JobSpec,
    pub active: bool,
    /// Wallclock of the next window transition; cached so `window_ok`
    /// only recomputes when the edge is actually crossed.
    pub wind_edge: DateTime<Utc>,
    pub job_pid: Option<u32>,
    pub exit_pid: Option<u32>,
    pub collected_child: bool,
    pub not_reported: bool,
    pub need_checkfinish: bool,
    /// When set, `need_checkfinish` should not flip true until this
    /// instant — the `LSB_SBD_FINISH_SLEEP` completion-fanout throttle.
    pub finish_ready_at: Option<DateTime<Utc>>,
    pub usage: JRusage,
    pub last_window_warning: Option<DateTime<Utc>>,
    pub bound_cores: Vec<u32>,
}

impl JobCard {
    pub fn new(job_id: JobId, spec: JobSpec) -> Self {
        JobCard {
            job_id,
            spec,
            active: true,
            wind_edge: DateTime::<Utc>::MIN_UTC,
            job_pid: None,
            exit_pid: None,
            collected_child: false,
            not_reported: false,
            need_checkfinish: false,
            finish_ready_at: None,
            usage: JRusage::new(),
            last_window_warning: None,
            bound_cores: Vec::new(),
        }
    }
}
