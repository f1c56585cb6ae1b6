//! Priority preemption elector.
//!
//! Grounded on the original plugin's `prm_elect_preempt`: walk the
//! pending list backwards within one preemptive queue's priority band to
//! find trigger jobs, then for each trigger in turn walk its queue's
//! `preemptable` victim-queue list harvesting running jobs until enough
//! slots are freed or the triggers are exhausted.

use batch_core::{Job, JobId, JobStatus, PendReason, Queue};
use tracing::info;

use crate::state::MasterState;

/// A job eligible to trigger preemption because it is pending purely on
/// slot availability (no other blocking reason recorded this tick).
fn is_pend_for_slot(job: &Job) -> bool {
    job.status().contains(JobStatus::PEND) && job.new_reason.is_none()
}

fn is_preemptable_resource(name: &str, preemptable_resources: &[String]) -> bool {
    preemptable_resources.iter().any(|r| r == name)
}

/// A job eligible to trigger preemption because it wants a named
/// resource this queue is configured to preempt for, and the scheduler
/// has already recorded it as blocked on a host/queue rusage reason.
fn is_pend_for_license(job: &Job, queue: &Queue, preemptable_resources: &[String]) -> bool {
    let resources: &[String] =
        if !job.spec.rusage_resources.is_empty() { &job.spec.rusage_resources } else { &queue.rusage_resources };
    if resources.is_empty() {
        return false;
    }
    if !resources.iter().any(|r| is_preemptable_resource(r, preemptable_resources)) {
        return false;
    }
    if job.pend_reasons.is_empty() {
        return false;
    }
    job.pend_reasons.iter().any(|r: &PendReason| r.is_host_queue_rusage_band() || r.is_host_job_rusage_band())
}

/// Collect candidate trigger jobs. Finds the first pending job belonging
/// to `queue_name` walking PJL backwards (highest priority first), then
/// keeps walking backwards through jobs at the *same priority* — not
/// necessarily the same queue, matching the source's band-not-queue scan
/// — testing each for eligibility, until the priority changes, the front
/// of the list is reached, or `max` candidates have been collected.
fn collect_triggers(state: &MasterState, queue_name: &str, max: u32) -> Vec<JobId> {
    if !state.queues.contains_key(queue_name) {
        return Vec::new();
    }
    let preemptable_resources = &state.config.preemptable_resources;

    let order: Vec<JobId> = {
        let mut cursor = state.iterate_by_priority_desc();
        let mut v = Vec::new();
        while let Some(id) = cursor.next() {
            v.push(id);
        }
        v
    };

    let start_idx = match order.iter().position(|id| state.jobs[id].queue == queue_name) {
        Some(i) => i,
        None => return Vec::new(),
    };

    let mut triggers = Vec::new();
    let mut idx = start_idx;
    loop {
        let id = order[idx];
        let job = &state.jobs[&id];
        let priority = state.queues[&job.queue].priority;

        let eligible = if !preemptable_resources.is_empty() {
            is_pend_for_license(job, &state.queues[&job.queue], preemptable_resources)
        } else {
            is_pend_for_slot(job)
        };
        if eligible {
            triggers.push(id);
            if triggers.len() as u32 >= max {
                break;
            }
        }

        if idx + 1 >= order.len() {
            break;
        }
        let next_id = order[idx + 1];
        let next_priority = state.queues[&state.jobs[&next_id].queue].priority;
        if next_priority != priority {
            break;
        }
        idx += 1;
    }
    triggers
}

/// Run one election for `queue_name`. Mutates `state` by stamping
/// `preempted_by`/`preempted_hosts` on every selected victim and the
/// triggering job respectively. Returns the victim job ids, in the order
/// they were claimed. Never mutates state for a trigger that could not
/// harvest enough slots (that trigger's tentative claims are rolled back).
pub fn elect_preempt(state: &mut MasterState, queue_name: &str) -> Vec<JobId> {
    let max = state.config.max_preempt_jobs;
    let triggers = collect_triggers(state, queue_name, max);
    if triggers.is_empty() {
        return Vec::new();
    }

    let mut all_victims: Vec<JobId> = Vec::new();

    for trigger_id in triggers {
        if all_victims.len() as u32 >= max {
            break;
        }

        let num_slots = state.jobs[&trigger_id].spec.num_processors;
        let victim_queues = state.queues[&state.jobs[&trigger_id].queue].preemptable.clone();

        let mut claimed: Vec<JobId> = Vec::new();
        let mut harvested: u32 = 0;

        'queues: for vq_name in &victim_queues {
            let num_run = state.queues.get(vq_name).map(|q| q.num_run).unwrap_or(0);
            if num_run == 0 {
                continue;
            }

            for vid in state.sjl_iter() {
                let victim = &state.jobs[&vid];
                if &victim.queue != vq_name {
                    continue;
                }
                if victim.status().is_suspended() {
                    continue;
                }
                if victim.status().contains(JobStatus::SIGNAL) {
                    continue;
                }
                if victim.preempted_by.is_some() {
                    continue;
                }

                let slots = victim.spec.num_processors;
                let hosts = victim.exec_hosts.clone();
                harvested += slots;
                claimed.push(vid);

                let v = state.jobs.get_mut(&vid).unwrap();
                v.preempted_by = Some(trigger_id);
                let trigger = state.jobs.get_mut(&trigger_id).unwrap();
                trigger.preempted_hosts.extend(hosts);

                info!(
                    trigger = %trigger_id,
                    victim = %vid,
                    gave_up = slots,
                    harvested,
                    wanted = num_slots,
                    "job gives up slots for preemption"
                );

                if harvested >= num_slots {
                    break 'queues;
                }
            }
        }

        if harvested >= num_slots {
            info!(trigger = %trigger_id, wanted = num_slots, got = harvested, "harvested enough slots");
            all_victims.extend(claimed);
            log_job_preemption(trigger_id, &all_victims);
        } else {
            info!(trigger = %trigger_id, wanted = num_slots, got = harvested, "did not harvest enough slots");
            for vid in claimed {
                if let Some(v) = state.jobs.get_mut(&vid) {
                    v.preempted_by = None;
                }
            }
            if let Some(trigger) = state.jobs.get_mut(&trigger_id) {
                trigger.preempted_hosts.clear();
            }
        }
    }

    all_victims
}

fn log_job_preemption(trigger: JobId, victims: &[JobId]) {
    for v in victims {
        info!("PREEMPT {trigger} {v}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::SchedulerConfig;
    use batch_core::{Host, JobSpec};
    use chrono::Utc;

    fn make_job(id: u32, queue: &str, slots: u32) -> Job {
        Job::new(JobId::new(id, None), "alice", queue, JobSpec::new(vec!["/bin/true".into()], slots), Utc::now())
    }

    fn setup() -> MasterState {
        let mut state = MasterState::new(SchedulerConfig { max_preempt_jobs: 5, preemptable_resources: Vec::new() });
        let mut high = Queue::new("high", 50);
        high.preemptable = vec!["low".to_string()];
        state.add_queue(high);
        state.add_queue(Queue::new("low", 10));
        state.add_host(Host::new("h1", 8));
        state.add_host(Host::new("h2", 8));
        state
    }

    #[test]
    fn preemption_succeeds_when_enough_slots_can_be_harvested() {
        let mut state = setup();

        let mut trigger = make_job(1, "high", 8);
        trigger.new_reason = None;
        state.submit(trigger);

        let mut v1 = make_job(2, "low", 4);
        v1.exec_hosts = vec!["h1".into()];
        v1.dispatch(vec!["h1".into()], Utc::now()).unwrap();
        let mut v2 = make_job(3, "low", 4);
        v2.exec_hosts = vec!["h2".into()];
        v2.dispatch(vec!["h2".into()], Utc::now()).unwrap();
        state.jobs.insert(v1.id, v1);
        state.jobs.insert(v2.id, v2);
        state.queues.get_mut("low").unwrap().num_run = 2;
        let v1_id = JobId::new(2, None);
        let v2_id = JobId::new(3, None);
        state.sjl_push(v1_id);
        state.sjl_push(v2_id);

        let victims = elect_preempt(&mut state, "high");
        assert_eq!(victims.len(), 2);
        assert!(victims.contains(&v1_id));
        assert!(victims.contains(&v2_id));
        assert_eq!(state.jobs[&v1_id].preempted_by, Some(JobId::new(1, None)));
        assert_eq!(state.jobs[&v2_id].preempted_by, Some(JobId::new(1, None)));
        let trigger_hosts = &state.jobs[&JobId::new(1, None)].preempted_hosts;
        assert!(trigger_hosts.contains(&"h1".to_string()));
        assert!(trigger_hosts.contains(&"h2".to_string()));
    }

    #[test]
    fn preemption_rolls_back_when_harvest_insufficient() {
        let mut state = setup();

        let mut trigger = make_job(1, "high", 16);
        trigger.new_reason = None;
        state.submit(trigger);

        let mut v1 = make_job(2, "low", 4);
        v1.dispatch(vec!["h1".into()], Utc::now()).unwrap();
        state.jobs.insert(v1.id, v1);
        state.queues.get_mut("low").unwrap().num_run = 1;
        state.sjl_push(JobId::new(2, None));

        let victims = elect_preempt(&mut state, "high");
        assert!(victims.is_empty());
        assert_eq!(state.jobs[&JobId::new(2, None)].preempted_by, None);
        assert!(state.jobs[&JobId::new(1, None)].preempted_hosts.is_empty());
    }

    #[test]
    fn elector_is_idempotent_on_empty_pending_pool() {
        let mut state = setup();
        assert!(elect_preempt(&mut state, "high").is_empty());
        assert!(elect_preempt(&mut state, "high").is_empty());
    }
}
