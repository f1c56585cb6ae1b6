use std::collections::HashMap;

use batch_core::{Host, Job, JobId, Queue};
use batch_list::{Handle, IntrusiveList};

/// Cluster-wide scheduling policy knobs.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Upper bound on how many victims the elector may collect per tick.
    pub max_preempt_jobs: u32,
    /// Resource names eligible to trigger resource-driven preemption. An
    /// empty list means preemption is purely slot-driven.
    pub preemptable_resources: Vec<String>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        SchedulerConfig { max_preempt_jobs: 1, preemptable_resources: Vec::new() }
    }
}

/// The master's whole view of the cluster: job lists, queue and host
/// inventory, and policy. Passed by reference into every scheduling
/// operation rather than hidden behind process-wide statics, so the
/// scheduler and its tests can run several independent instances.
pub struct MasterState {
    pub jobs: HashMap<JobId, Job>,
    pjl: IntrusiveList<JobId>,
    pjl_handles: HashMap<JobId, Handle>,
    sjl: IntrusiveList<JobId>,
    sjl_handles: HashMap<JobId, Handle>,
    pub queues: HashMap<String, Queue>,
    pub hosts: HashMap<String, Host>,
    pub config: SchedulerConfig,
}

impl MasterState {
    pub fn new(config: SchedulerConfig) -> Self {
        MasterState {
            jobs: HashMap::new(),
            pjl: IntrusiveList::new(),
            pjl_handles: HashMap::new(),
            sjl: IntrusiveList::new(),
            sjl_handles: HashMap::new(),
            queues: HashMap::new(),
            hosts: HashMap::new(),
            config,
        }
    }

    pub fn add_queue(&mut self, queue: Queue) {
        self.queues.insert(queue.name.clone(), queue);
    }

    pub fn add_host(&mut self, host: Host) {
        self.hosts.insert(host.name.clone(), host);
    }

    fn queue_priority(&self, job_id: JobId) -> i32 {
        let job = &self.jobs[&job_id];
        self.queues.get(&job.queue).map(|q| q.priority).unwrap_or(i32::MIN)
    }

    /// Submit a new job: insert it into the job table and the PJL at the
    /// position that keeps the list sorted so walking backwards yields
    /// descending queue priority, with older same-priority jobs staying
    /// closer to the back (first considered).
    pub fn submit(&mut self, job: Job) {
        let id = job.id;
        let priority = self.queues.get(&job.queue).map(|q| q.priority).unwrap_or(i32::MIN);
        self.jobs.insert(id, job);
        if let Some(q) = self.queues.get_mut(&self.jobs[&id].queue) {
            q.num_pend += 1;
        }

        let mut cursor = self.pjl.cursor_back();
        let mut insert_before: Option<Handle> = None;
        while let Some(h) = cursor.next(&self.pjl) {
            let other = *self.pjl.get(h).unwrap();
            if self.queue_priority(other) <= priority {
                insert_before = Some(h);
                break;
            }
        }
        let handle = match insert_before {
            Some(h) => self.pjl.insert_before(h, id),
            None => self.pjl.push_front(id),
        };
        self.pjl_handles.insert(id, handle);
    }

    /// Cursor-style traversal of PJL in descending dispatch-priority
    /// order: highest priority (and, within a priority, oldest) first.
    pub fn iterate_by_priority_desc(&self) -> PjlCursor<'_> {
        PjlCursor { state: self, cursor: self.pjl.cursor_back() }
    }

    pub fn pjl_len(&self) -> usize {
        self.pjl.len()
    }

    pub fn sjl_len(&self) -> usize {
        self.sjl.len()
    }

    pub fn sjl_iter(&self) -> Vec<JobId> {
        let mut cursor = self.sjl.cursor_front();
        let mut out = Vec::new();
        while let Some(h) = cursor.next(&self.sjl) {
            out.push(*self.sjl.get(h).unwrap());
        }
        out
    }

    /// Move a job from PJL to SJL, typically after a successful dispatch.
    pub fn move_pend_to_run(&mut self, job_id: JobId) {
        if let Some(h) = self.pjl_handles.remove(&job_id) {
            self.pjl.remove(h);
        }
        if let Some(q) = self.jobs.get(&job_id).map(|j| j.queue.clone()) {
            if let Some(q) = self.queues.get_mut(&q) {
                q.num_pend = q.num_pend.saturating_sub(1);
                q.num_run += 1;
            }
        }
        let handle = self.sjl.push_back(job_id);
        self.sjl_handles.insert(job_id, handle);
    }

    /// Register a job as already-running in SJL without touching PJL or
    /// queue counters. Used when a job's running state is constructed
    /// directly rather than produced by `move_pend_to_run`.
    pub fn sjl_push(&mut self, job_id: JobId) {
        let handle = self.sjl.push_back(job_id);
        self.sjl_handles.insert(job_id, handle);
    }

    /// Remove a job from SJL entirely (it has reached a terminal state).
    pub fn remove_from_sjl(&mut self, job_id: JobId) {
        if let Some(h) = self.sjl_handles.remove(&job_id) {
            self.sjl.remove(h);
        }
        if let Some(q) = self.jobs.get(&job_id).map(|j| j.queue.clone()) {
            if let Some(q) = self.queues.get_mut(&q) {
                q.num_run = q.num_run.saturating_sub(1);
            }
        }
    }
}

/// Forward-owning cursor over PJL in descending-priority order, yielding
/// `JobId`s. Kept separate from `batch_list::Cursor` so callers never need
/// to juggle the raw list alongside the job table.
pub struct PjlCursor<'a> {
    state: &'a MasterState,
    cursor: batch_list::Cursor,
}

impl<'a> PjlCursor<'a> {
    pub fn next(&mut self) -> Option<JobId> {
        let h = self.cursor.next(&self.state.pjl)?;
        self.state.pjl.get(h).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use batch_core::JobSpec;
    use chrono::Utc;

    fn job(id: u32, queue: &str) -> Job {
        Job::new(JobId::new(id, None), "alice", queue, JobSpec::new(vec!["/bin/true".into()], 1), Utc::now())
    }

    #[test]
    fn submit_orders_pjl_by_descending_priority_from_back() {
        let mut state = MasterState::new(SchedulerConfig::default());
        state.add_queue(Queue::new("low", 10));
        state.add_queue(Queue::new("high", 50));

        state.submit(job(1, "low"));
        state.submit(job(2, "high"));
        state.submit(job(3, "low"));

        let mut cur = state.iterate_by_priority_desc();
        let mut order = Vec::new();
        while let Some(id) = cur.next() {
            order.push(id.base());
        }
        // high-priority job first, then low-priority jobs oldest-first.
        assert_eq!(order, vec![2, 1, 3]);
    }

    #[test]
    fn move_to_run_updates_queue_counters_and_lists() {
        let mut state = MasterState::new(SchedulerConfig::default());
        state.add_queue(Queue::new("normal", 10));
        state.submit(job(1, "normal"));
        assert_eq!(state.queues["normal"].num_pend, 1);

        state.move_pend_to_run(JobId::new(1, None));
        assert_eq!(state.pjl_len(), 0);
        assert_eq!(state.sjl_len(), 1);
        assert_eq!(state.queues["normal"].num_pend, 0);
        assert_eq!(state.queues["normal"].num_run, 1);
    }
}
