pub mod cores;
pub mod daemon;
pub mod jobcard;
pub mod liveness;
pub mod reap;
pub mod window;

pub use cores::{Affinity, CoreError, CoreTable, NixAffinity, QueueShareTable};
pub use daemon::{SbdConfig, SbdState};
pub use jobcard::JobCard;
pub use liveness::MasterLiveness;
pub use reap::{spawn_watcher, CompletionRecord, MASTER_RECONFIG, MAX_SAME_EXIT_STREAK};
pub use window::{window_ok, WindowOutcome, WARN_TIME_SECS};
