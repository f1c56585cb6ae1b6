pub mod dispatch;
pub mod notify;
pub mod preempt;
pub mod state;

pub use dispatch::{commit_preemption_signals, dispatch_tick};
pub use notify::{HostNotifier, NoopNotifier, NotifyError};
pub use preempt::elect_preempt;
pub use state::{MasterState, SchedulerConfig};
