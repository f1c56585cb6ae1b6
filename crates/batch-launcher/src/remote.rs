//! Remote execution boundary.
//!
//! Grounded on `ls_rtask`/`ls_rwaittid`: the launcher hands a command to a
//! remote-execution service and polls task handles for completion. The
//! real RES/PAM transport is an external collaborator; this crate only
//! names the seam and ships a local single-host implementation for
//! testing and for the (common in practice) single-host allocation case.

use async_trait::async_trait;
use batch_core::JRusage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId(pub u32);

#[derive(Debug, thiserror::Error)]
pub enum RemoteExecError {
    #[error("failed to start task on host {host}: {reason}")]
    Start { host: String, reason: String },
    #[error("no such task {0:?}")]
    UnknownTask(TaskId),
}

pub enum TaskPoll {
    Running(JRusage),
    Exited,
}

#[async_trait]
pub trait RemoteExec: Send + Sync {
    async fn start_task(&self, host: &str, command: &[String]) -> Result<TaskId, RemoteExecError>;
    async fn poll_task(&self, task: TaskId) -> Result<TaskPoll, RemoteExecError>;
}

/// Runs every task as a local child process, ignoring the requested host.
/// Suitable for a single-host allocation or for tests; a cluster-wide
/// implementation would dial the remote execution service on each host
/// instead of spawning locally.
pub struct LocalRemoteExec {
    children: tokio::sync::Mutex<std::collections::HashMap<u32, tokio::process::Child>>,
    next_id: std::sync::atomic::AtomicU32,
}

impl Default for LocalRemoteExec {
    fn default() -> Self {
        LocalRemoteExec { children: tokio::sync::Mutex::new(std::collections::HashMap::new()), next_id: std::sync::atomic::AtomicU32::new(1) }
    }
}

#[async_trait]
impl RemoteExec for LocalRemoteExec {
    async fn start_task(&self, host: &str, command: &[String]) -> Result<TaskId, RemoteExecError> {
        let Some((prog, args)) = command.split_first() else {
            return Err(RemoteExecError::Start { host: host.to_string(), reason: "empty command".into() });
        };
        let child = tokio::process::Command::new(prog)
            .args(args)
            .spawn()
            .map_err(|e| RemoteExecError::Start { host: host.to_string(), reason: e.to_string() })?;

        let id = self.next_id.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        self.children.lock().await.insert(id, child);
        Ok(TaskId(id))
    }

    async fn poll_task(&self, task: TaskId) -> Result<TaskPoll, RemoteExecError> {
        let mut guard = self.children.lock().await;
        let child = guard.get_mut(&task.0).ok_or(RemoteExecError::UnknownTask(task))?;

        match child.try_wait() {
            Ok(Some(_status)) => {
                guard.remove(&task.0);
                Ok(TaskPoll::Exited)
            }
            Ok(None) => {
                let pid = child.id().unwrap_or(0) as i32;
                drop(guard);
                let table = crate::harvest::read_proc_table();
                Ok(TaskPoll::Running(crate::harvest::harvest_for_pid(&table, pid)))
            }
            Err(_) => {
                guard.remove(&task.0);
                Ok(TaskPoll::Exited)
            }
        }
    }
}
