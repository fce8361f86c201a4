//! A collection of processes started, awaited and stopped as one unit.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::Instrument;

use super::cleanup::{stop_all, StopGuard};
use super::dispatch::{self, RunMode};
use crate::error::{GroupError, Result};
use crate::process::ProcessHandle;
use crate::receiver::SharedReceiver;

/// Deadline used by [`Group::wait_available`] when none is given.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Construction parameters for a [`Group`].
#[derive(Clone)]
pub struct GroupOptions {
    /// Sink handed to every process as it joins the group.
    pub receiver: SharedReceiver,
    /// Number of dispatch workers for `run`; `0` runs sequentially.
    pub partition: usize,
}

impl GroupOptions {
    /// Sequential options with the given receiver.
    pub fn new(receiver: SharedReceiver) -> Self {
        Self {
            receiver,
            partition: 0,
        }
    }

    /// Set the number of dispatch workers.
    #[must_use]
    pub const fn partition(mut self, partition: usize) -> Self {
        self.partition = partition;
        self
    }
}

/// An ordered collection of processes coordinated as a single unit.
///
/// Processes start in insertion order. With a partition of zero, `run`
/// starts everything and then waits for everything; with a partition of
/// `n`, `run` scatters the processes over `n` workers that each run one
/// process to completion at a time. Either way every process is stopped
/// once the run is over.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use std::time::Duration;
/// use procgroup::{ChildProcess, Group, GroupOptions, ProcessOptions, TracingReceiver};
///
/// #[tokio::main]
/// async fn main() -> procgroup::Result<()> {
///     let mut group = Group::new(GroupOptions::new(Arc::new(TracingReceiver)).partition(2));
///     for n in 1..=4 {
///         group.push(Arc::new(ChildProcess::new(ProcessOptions::new("sleep").arg(n.to_string())))).await;
///     }
///     group.run_checked(None, Some(Duration::from_secs(10))).await
/// }
/// ```
pub struct Group {
    processes: Vec<ProcessHandle>,
    receiver: SharedReceiver,
    partition: usize,
}

impl Group {
    /// Create an empty group.
    pub fn new(options: GroupOptions) -> Self {
        Self {
            processes: Vec::new(),
            receiver: options.receiver,
            partition: options.partition,
        }
    }

    /// Create an empty sequential group.
    pub fn sequential(receiver: SharedReceiver) -> Self {
        Self::new(GroupOptions::new(receiver))
    }

    /// Processes in insertion order.
    pub fn processes(&self) -> &[ProcessHandle] {
        &self.processes
    }

    /// Number of dispatch workers; `0` means sequential.
    pub const fn partition(&self) -> usize {
        self.partition
    }

    pub fn len(&self) -> usize {
        self.processes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processes.is_empty()
    }

    /// Receiver that will be assigned to processes added from now on.
    pub const fn receiver(&self) -> &SharedReceiver {
        &self.receiver
    }

    /// Replace the receiver for future additions. Existing processes keep theirs.
    pub fn set_receiver(&mut self, receiver: SharedReceiver) {
        self.receiver = receiver;
    }

    /// Append one process. See [`Group::add`].
    pub async fn push(&mut self, process: ProcessHandle) {
        self.add([process]).await;
    }

    /// Append processes in order, assigning each the group receiver.
    ///
    /// If the group is already started, each new process is started
    /// immediately.
    pub async fn add<I>(&mut self, processes: I)
    where
        I: IntoIterator<Item = ProcessHandle>,
    {
        let started = self.is_started();
        for process in processes {
            process.set_receiver(Arc::clone(&self.receiver));
            if started {
                tracing::debug!(process = process.name(), "joining running group");
                process.start().await;
            }
            self.processes.push(process);
        }
    }

    /// Start every process that is not already started, in order, sleeping
    /// `delay` after each start. Does not wait for completion.
    pub async fn start(&self, delay: Option<Duration>) {
        for process in &self.processes {
            if process.is_started() {
                continue;
            }
            tracing::debug!(process = process.name(), "starting");
            process.start().await;
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
        }
    }

    /// Stop every process regardless of state. Safe to call repeatedly.
    pub async fn stop(&self) {
        stop_all(&self.processes).await;
    }

    /// Wait for every process to terminate.
    ///
    /// With a timeout the whole wait is bounded and fails with
    /// [`GroupError::Timeout`]; processes are left running in that case.
    pub async fn wait(&self, timeout: Option<Duration>) -> Result<()> {
        bounded("wait", timeout, async {
            for process in &self.processes {
                process.wait().await;
            }
            Ok(())
        })
        .await
    }

    /// Like [`Group::wait`], but fails on the first abnormally terminated process.
    pub async fn wait_checked(&self, timeout: Option<Duration>) -> Result<()> {
        bounded("wait", timeout, async {
            for process in &self.processes {
                process.wait_checked().await?;
            }
            Ok::<(), GroupError>(())
        })
        .await
    }

    /// Run all processes to completion, then stop them.
    ///
    /// Process failures are not reported; a timeout is. In partitioned mode
    /// `delay` and `timeout` do not apply.
    pub async fn run(&self, delay: Option<Duration>, timeout: Option<Duration>) -> Result<()> {
        self.execute(RunMode::Lenient, delay, timeout).await
    }

    /// Run all processes to completion, then stop them, failing if any
    /// process terminates abnormally.
    ///
    /// In partitioned mode a failure ends only the worker that saw it, and
    /// which of several failures is returned is unspecified.
    pub async fn run_checked(&self, delay: Option<Duration>, timeout: Option<Duration>) -> Result<()> {
        self.execute(RunMode::Checked, delay, timeout).await
    }

    /// Whether at least one process has been started.
    pub fn is_started(&self) -> bool {
        self.processes.iter().any(|p| p.is_started())
    }

    /// Whether at least one process is running.
    pub fn is_alive(&self) -> bool {
        self.processes.iter().any(|p| p.is_alive())
    }

    /// Whether every process is available. Vacuously true when empty.
    pub fn is_available(&self) -> bool {
        self.processes.iter().all(|p| p.is_available())
    }

    /// Wait until every process is available, under one shared deadline
    /// (default [`DEFAULT_TIMEOUT`]). Never stops anything.
    pub async fn wait_available(&self, timeout: Option<Duration>) -> Result<()> {
        let timeout = timeout.unwrap_or(DEFAULT_TIMEOUT);
        // `None` when the deadline lies beyond what `Instant` can represent.
        let deadline = Instant::now().checked_add(timeout);

        let all = async {
            for process in &self.processes {
                let remaining = deadline.map_or(timeout, |d| d.saturating_duration_since(Instant::now()));
                process.wait_available(remaining).await?;
            }
            Ok::<(), GroupError>(())
        };
        let waited = match deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, all).await,
            None => Ok(all.await),
        };

        match waited {
            Ok(Err(e)) if e.is_timeout() => Err(GroupError::timeout("available", timeout)),
            Ok(result) => result,
            Err(_) => Err(GroupError::timeout("available", timeout)),
        }
    }

    async fn execute(&self, mode: RunMode, delay: Option<Duration>, timeout: Option<Duration>) -> Result<()> {
        let span = tracing::info_span!(
            "group.run",
            processes = self.processes.len(),
            partition = self.partition,
            checked = mode == RunMode::Checked
        );

        async {
            let guard = StopGuard::arm(&self.processes);

            let (result, panic) = if self.partition == 0 {
                (self.run_sequential(mode, delay, timeout).await, None)
            } else {
                if delay.is_some() || timeout.is_some() {
                    tracing::debug!("delay and timeout do not apply to partitioned runs");
                }
                let processes: Arc<[ProcessHandle]> = self.processes.clone().into();
                let scatter = dispatch::scatter(processes, self.partition, mode).await;
                (scatter.result, scatter.panic)
            };

            guard.release().await;

            if let Some(payload) = panic {
                std::panic::resume_unwind(payload);
            }
            match &result {
                Ok(()) => tracing::info!("run completed"),
                Err(e) => tracing::warn!(error = %e, "run failed"),
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn run_sequential(&self, mode: RunMode, delay: Option<Duration>, timeout: Option<Duration>) -> Result<()> {
        self.start(delay).await;
        match mode {
            RunMode::Lenient => self.wait(timeout).await,
            RunMode::Checked => self.wait_checked(timeout).await,
        }
    }
}

impl fmt::Debug for Group {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Group")
            .field("processes", &self.processes.iter().map(|p| p.name()).collect::<Vec<_>>())
            .field("partition", &self.partition)
            .finish_non_exhaustive()
    }
}

/// Bound `fut` by `timeout`, if one is given.
async fn bounded<F>(operation: &'static str, timeout: Option<Duration>, fut: F) -> Result<()>
where
    F: Future<Output = Result<()>>,
{
    let Some(after) = timeout else {
        return fut.await;
    };
    tokio::time::timeout(after, fut).await.unwrap_or_else(|_| {
        tracing::warn!(operation, ?after, "timed out");
        Err(GroupError::timeout(operation, after))
    })
}
