pub mod host;
pub mod job;
pub mod queue;
pub mod rusage;

pub use host::Host;
pub use job::{Job, JobError, JobId, JobSpec, JobStatus, PendReason, ResourceLimitKind, Window};
pub use queue::Queue;
pub use rusage::{JRusage, PidInfo};
