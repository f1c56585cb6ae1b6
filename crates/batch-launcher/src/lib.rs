pub mod harvest;
pub mod launcher;
pub mod remote;

pub use harvest::{harvest_for_pid, read_proc_table, ProcessInfo};
pub use launcher::{run_and_collect, LaunchOutcome, DEFAULT_SLEEP_SECS};
pub use remote::{LocalRemoteExec, RemoteExec, RemoteExecError, TaskId, TaskPoll};
