use async_trait::async_trait;
use batch_core::JobId;

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("host daemon on {host} unreachable: {reason}")]
    Unreachable { host: String, reason: String },
}

/// Boundary to the host daemons. The real transport is the RPC/signal
/// path to each SBD; that wire path is an external collaborator here, so
/// this crate only names the operations the master's commit step needs.
#[async_trait]
pub trait HostNotifier: Send + Sync {
    async fn suspend_job(&self, host: &str, job: JobId) -> Result<(), NotifyError>;
}

/// Always-succeeds notifier for tests and single-process demos.
pub struct NoopNotifier;

#[async_trait]
impl HostNotifier for NoopNotifier {
    async fn suspend_job(&self, _host: &str, _job: JobId) -> Result<(), NotifyError> {
        Ok(())
    }
}
