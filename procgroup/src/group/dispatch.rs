//! Partitioned dispatch: a fixed number of workers pulling processes from a
//! shared cursor until it is exhausted.
//!
//! Each worker runs one claimed process at a time, start then wait, before
//! claiming the next. In checked mode a failing process ends its worker's
//! loop; sibling workers keep going. Which failure is reported when several
//! workers fail depends on the order their tasks are joined, and is
//! deliberately left unspecified.

use std::any::Any;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::task::JoinSet;
use tracing::Instrument;

use crate::error::Result;
use crate::process::ProcessHandle;

/// How a run treats process failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RunMode {
    /// Wait for termination, ignore exit status.
    Lenient,
    /// Surface abnormal termination as an error.
    Checked,
}

/// Claim cursor shared by the workers of one partitioned run.
#[derive(Debug, Default)]
pub(crate) struct Cursor {
    next: Mutex<usize>,
}

impl Cursor {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Claim the next unclaimed index below `len`, or `None` once exhausted.
    pub(crate) fn claim(&self, len: usize) -> Option<usize> {
        let mut next = self.next.lock().unwrap_or_else(PoisonError::into_inner);
        if *next >= len {
            return None;
        }
        let index = *next;
        *next += 1;
        Some(index)
    }
}

/// What one partitioned run produced once every worker has joined.
pub(crate) struct Scatter {
    /// Number of processes each worker claimed, in join order.
    pub claims: Vec<usize>,
    /// First failure seen while joining, if any.
    pub result: Result<()>,
    /// Panic payload of a worker that panicked, to be re-raised after cleanup.
    pub panic: Option<Box<dyn Any + Send + 'static>>,
}

/// Run `processes` across exactly `partition` workers and join them all.
pub(crate) async fn scatter(processes: Arc<[ProcessHandle]>, partition: usize, mode: RunMode) -> Scatter {
    let cursor = Arc::new(Cursor::new());
    let mut workers = JoinSet::new();

    for id in 0..partition {
        let processes = Arc::clone(&processes);
        let cursor = Arc::clone(&cursor);
        let span = tracing::debug_span!("group.worker", worker = id);
        workers.spawn(work(processes, cursor, mode).instrument(span));
    }

    let mut scatter = Scatter {
        claims: Vec::with_capacity(partition),
        result: Ok(()),
        panic: None,
    };

    while let Some(joined) = workers.join_next().await {
        match joined {
            Ok((claims, result)) => {
                scatter.claims.push(claims);
                if scatter.result.is_ok() {
                    scatter.result = result;
                }
            }
            Err(e) if e.is_panic() => {
                tracing::error!("dispatch worker panicked");
                if scatter.panic.is_none() {
                    scatter.panic = Some(e.into_panic());
                }
            }
            Err(e) => tracing::warn!(error = %e, "dispatch worker cancelled"),
        }
    }

    scatter
}

/// Worker loop: claim, run, repeat until the cursor is exhausted.
async fn work(processes: Arc<[ProcessHandle]>, cursor: Arc<Cursor>, mode: RunMode) -> (usize, Result<()>) {
    let mut claims = 0;

    while let Some(index) = cursor.claim(processes.len()) {
        claims += 1;
        let process = &processes[index];
        tracing::debug!(index, process = process.name(), "claimed");

        process.start().await;
        match mode {
            RunMode::Lenient => process.wait().await,
            RunMode::Checked => {
                if let Err(e) = process.wait_checked().await {
                    tracing::warn!(process = process.name(), error = %e, "process failed, worker exiting");
                    return (claims, Err(e));
                }
            }
        }
    }

    tracing::debug!(claims, "worker finished");
    (claims, Ok(()))
}
