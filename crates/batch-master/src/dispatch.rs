use chrono::Utc;
use tracing::info;

use batch_core::JobId;

use crate::notify::HostNotifier;
use crate::state::MasterState;

/// One scheduling pass: walk PJL in descending priority order and
/// dispatch each job whose requested slot count fits on a single host
/// with enough free capacity. Returns the ids dispatched this tick.
pub fn dispatch_tick(state: &mut MasterState) -> Vec<JobId> {
    let candidates: Vec<JobId> = {
        let mut cursor = state.iterate_by_priority_desc();
        let mut v = Vec::new();
        while let Some(id) = cursor.next() {
            v.push(id);
        }
        v
    };

    let mut dispatched = Vec::new();
    for id in candidates {
        let wanted = state.jobs[&id].spec.num_processors;
        let host_name = state
            .hosts
            .values()
            .find(|h| h.free_slots() >= wanted)
            .map(|h| h.name.clone());

        let Some(host_name) = host_name else {
            continue;
        };

        state.hosts.get_mut(&host_name).unwrap().used_slots += wanted;
        state.jobs.get_mut(&id).unwrap().dispatch(vec![host_name.clone()], Utc::now()).expect("job was PEND");
        state.move_pend_to_run(id);
        info!(job = %id, host = %host_name, "dispatched");
        dispatched.push(id);
    }
    dispatched
}

/// Commit the elector's tentative victim list: ask each victim's host
/// daemon to actually suspend it. On success the job transitions to
/// SSUSP; on failure its claim (both the victim's `preempted_by` stamp
/// and the trigger's accumulated `preempted_hosts`) is undone so the next
/// tick's election can try again.
pub async fn commit_preemption_signals(
    state: &mut MasterState,
    notifier: &dyn HostNotifier,
    victims: &[JobId],
) -> (Vec<JobId>, Vec<JobId>) {
    let mut confirmed = Vec::new();
    let mut failed = Vec::new();

    for &victim_id in victims {
        let (trigger_id, hosts) = {
            let v = &state.jobs[&victim_id];
            (v.preempted_by, v.exec_hosts.clone())
        };
        let Some(trigger_id) = trigger_id else { continue };

        let mut all_ok = true;
        for host in &hosts {
            if notifier.suspend_job(host, victim_id).await.is_err() {
                all_ok = false;
                break;
            }
        }

        if all_ok {
            let v = state.jobs.get_mut(&victim_id).unwrap();
            v.suspend_for_preemption(trigger_id, Vec::new()).expect("victim was RUN");
            confirmed.push(victim_id);
        } else {
            let v = state.jobs.get_mut(&victim_id).unwrap();
            v.preempted_by = None;
            if let Some(trigger) = state.jobs.get_mut(&trigger_id) {
                trigger.preempted_hosts.retain(|h| !hosts.contains(h));
            }
            failed.push(victim_id);
        }
    }

    (confirmed, failed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::SchedulerConfig;
    use batch_core::{Host, Job, JobSpec, Queue};

    fn job(id: u32, queue: &str, slots: u32) -> Job {
        Job::new(JobId::new(id, None), "alice", queue, JobSpec::new(vec!["/bin/true".into()], slots), Utc::now())
    }

    #[test]
    fn dispatch_picks_a_host_with_enough_free_slots() {
        let mut state = MasterState::new(SchedulerConfig::default());
        state.add_queue(Queue::new("normal", 10));
        state.add_host(Host::new("h1", 4));
        state.submit(job(1, "normal", 2));

        let dispatched = dispatch_tick(&mut state);
        assert_eq!(dispatched, vec![JobId::new(1, None)]);
        assert_eq!(state.sjl_len(), 1);
        assert_eq!(state.hosts["h1"].used_slots, 2);
    }

    #[test]
    fn dispatch_skips_jobs_that_do_not_fit_anywhere() {
        let mut state = MasterState::new(SchedulerConfig::default());
        state.add_queue(Queue::new("normal", 10));
        state.add_host(Host::new("h1", 2));
        state.submit(job(1, "normal", 4));

        let dispatched = dispatch_tick(&mut state);
        assert!(dispatched.is_empty());
        assert_eq!(state.pjl_len(), 1);
    }
}
