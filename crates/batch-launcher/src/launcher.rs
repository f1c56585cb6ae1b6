//! Parallel fan-out and usage aggregation.
//!
//! Grounded on `lsb_launch`: start a task on every host first, then poll
//! all of them in a single round, repeating with a configurable delay
//! until every task has exited, sending a compacted rusage report after
//! each round that still has work outstanding.

use std::future::Future;
use std::time::Duration;

use batch_core::JRusage;
use tracing::{error, info, warn};

use crate::remote::{RemoteExec, TaskId, TaskPoll};

pub const DEFAULT_SLEEP_SECS: u64 = 10;

pub struct LaunchOutcome {
    pub tasks_started: usize,
    pub tasks_failed: usize,
}

/// Run `command` on every host in `hosts`, forwarding a combined usage
/// report via `report` after each poll round while any task is still
/// live. Returns once every task has exited or failed to start.
pub async fn run_and_collect<E, R, Fut>(exec: &E, hosts: &[String], command: &[String], sleep: Duration, mut report: R) -> LaunchOutcome
where
    E: RemoteExec,
    R: FnMut(JRusage) -> Fut,
    Fut: Future<Output = ()>,
{
    let mut tasks: Vec<Option<TaskId>> = Vec::with_capacity(hosts.len());
    let mut failed = 0usize;

    for host in hosts {
        match exec.start_task(host, command).await {
            Ok(id) => {
                info!(host, task = id.0, "task started");
                tasks.push(Some(id));
            }
            Err(e) => {
                error!(host, error = %e, "failed to start task");
                tasks.push(None);
                failed += 1;
            }
        }
    }

    loop {
        let mut snapshots = Vec::new();
        let mut still_active = false;

        for slot in tasks.iter_mut() {
            let Some(id) = *slot else { continue };
            match exec.poll_task(id).await {
                Ok(TaskPoll::Running(usage)) => {
                    still_active = true;
                    snapshots.push(usage);
                }
                Ok(TaskPoll::Exited) => {
                    info!(task = id.0, "task done");
                    *slot = None;
                }
                Err(e) => {
                    warn!(task = id.0, error = %e, "poll failed, treating task as gone");
                    *slot = None;
                }
            }
        }

        if !still_active {
            info!(tasks = tasks.len(), "all tasks gone");
            break;
        }

        report(JRusage::compact(snapshots.iter())).await;
        tokio::time::sleep(sleep).await;
    }

    LaunchOutcome { tasks_started: tasks.len(), tasks_failed: failed }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::RemoteExecError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    struct ScriptedExec {
        rounds_remaining: Mutex<u32>,
        started: AtomicU32,
    }

    #[async_trait]
    impl RemoteExec for ScriptedExec {
        async fn start_task(&self, _host: &str, _command: &[String]) -> Result<TaskId, RemoteExecError> {
            self.started.fetch_add(1, Ordering::SeqCst);
            Ok(TaskId(self.started.load(Ordering::SeqCst)))
        }

        async fn poll_task(&self, _task: TaskId) -> Result<TaskPoll, RemoteExecError> {
            let mut remaining = self.rounds_remaining.lock().unwrap();
            if *remaining == 0 {
                Ok(TaskPoll::Exited)
            } else {
                *remaining -= 1;
                Ok(TaskPoll::Running(JRusage::new()))
            }
        }
    }

    #[tokio::test]
    async fn reports_while_active_then_stops() {
        let exec = ScriptedExec { rounds_remaining: Mutex::new(2), started: AtomicU32::new(0) };
        let hosts = vec!["h1".to_string(), "h2".to_string()];
        let mut reports = 0;

        let outcome = run_and_collect(&exec, &hosts, &["/bin/true".to_string()], Duration::from_millis(1), |_| {
            reports += 1;
            std::future::ready(())
        })
        .await;

        assert_eq!(outcome.tasks_started, 2);
        assert_eq!(outcome.tasks_failed, 0);
        assert!(reports >= 1);
    }
}
