//! Unconditional teardown around a group run.

use crate::process::ProcessHandle;

/// Stop every process, in order.
pub(crate) async fn stop_all(processes: &[ProcessHandle]) {
    for process in processes {
        process.stop().await;
    }
}

/// Stops the captured processes when a run ends.
///
/// The normal path awaits [`StopGuard::release`]. If the run future is
/// dropped first, `Drop` hands the stop off to the runtime instead.
pub(crate) struct StopGuard {
    processes: Option<Vec<ProcessHandle>>,
}

impl StopGuard {
    pub(crate) fn arm(processes: &[ProcessHandle]) -> Self {
        Self {
            processes: Some(processes.to_vec()),
        }
    }

    /// Stop all captured processes and disarm.
    pub(crate) async fn release(mut self) {
        if let Some(processes) = self.processes.take() {
            stop_all(&processes).await;
        }
    }
}

impl Drop for StopGuard {
    fn drop(&mut self) {
        let Some(processes) = self.processes.take() else {
            return;
        };
        tracing::warn!(count = processes.len(), "run abandoned, stopping processes in background");
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move { stop_all(&processes).await });
            }
            Err(_) => tracing::error!("no runtime available, processes left running"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::process::fake::FakeProcess;

    #[tokio::test]
    async fn test_release_stops_once() {
        let fake = FakeProcess::new("a").shared();
        let guard = StopGuard::arm(&[Arc::clone(&fake) as ProcessHandle]);

        guard.release().await;
        assert_eq!(fake.stop_count(), 1);
    }

    #[tokio::test]
    async fn test_drop_stops_in_background() {
        let fake = FakeProcess::new("a").shared();
        drop(StopGuard::arm(&[Arc::clone(&fake) as ProcessHandle]));

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(fake.stop_count(), 1);
    }
}
