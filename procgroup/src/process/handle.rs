//! The capability contract a group needs from each process it manages.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;
use crate::receiver::SharedReceiver;

/// A single managed process.
///
/// Implementations own the underlying OS resources; a [`Group`](crate::Group)
/// only drives them through this interface. All methods take `&self` so
/// handles can be shared between the coordinating task and dispatch workers.
#[async_trait]
pub trait Process: Send + Sync {
    /// Name used in logs, output attribution and errors.
    fn name(&self) -> &str;

    /// Start the process. Calling this on a started process does nothing.
    async fn start(&self);

    /// Stop the process. Always safe, in any state, any number of times.
    async fn stop(&self);

    /// Block until the process has terminated.
    async fn wait(&self);

    /// Block until the process has terminated, failing with
    /// [`GroupError::ProcessFailure`](crate::GroupError::ProcessFailure) on
    /// abnormal termination.
    async fn wait_checked(&self) -> Result<()>;

    /// Whether `start` has been invoked successfully.
    fn is_started(&self) -> bool;

    /// Whether the process is currently running.
    fn is_alive(&self) -> bool;

    /// Whether the process is ready for work.
    fn is_available(&self) -> bool;

    /// Block until the process is available, failing with
    /// [`GroupError::Timeout`](crate::GroupError::Timeout) after `timeout`.
    async fn wait_available(&self, timeout: Duration) -> Result<()>;

    /// Replace the sink this process writes its output to.
    fn set_receiver(&self, receiver: SharedReceiver);
}

/// Shared process handle, as stored by groups.
pub type ProcessHandle = Arc<dyn Process>;
