//! Fake process handle for testing group coordination.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::time::Instant;

use super::handle::Process;
use crate::error::{GroupError, Result};
use crate::receiver::{OutputLine, ProcessOutput, SharedReceiver};

/// Recorded process call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Start(String),
    Stop(String),
}

/// Shared journal of calls across several fakes, in the order they happened.
#[derive(Debug, Clone, Default)]
pub struct Journal {
    calls: Arc<Mutex<Vec<Call>>>,
}

impl Journal {
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn starts(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Start(name) => Some(name),
                Call::Stop(_) => None,
            })
            .collect()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).push(call);
    }
}

/// Tracks how many fakes are running at the same time.
#[derive(Debug, Default)]
pub struct Gauge {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl Gauge {
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn enter(&self) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn leave(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Fake process for testing
///
/// Runs for a fixed duration after `start` (or until stopped when no
/// duration is set), then exits with the configured outcome.
pub struct FakeProcess {
    name: String,
    run_for: Option<Duration>,
    fails: bool,
    ready: bool,
    journal: Journal,
    gauge: Option<Arc<Gauge>>,
    started_at: Mutex<Option<Instant>>,
    stopped: watch::Sender<bool>,
    exited: AtomicBool,
    starts: AtomicUsize,
    stops: AtomicUsize,
    receiver: Mutex<Option<SharedReceiver>>,
}

impl FakeProcess {
    pub fn new(name: &str) -> Self {
        let (stopped, _) = watch::channel(false);
        Self {
            name: name.to_string(),
            run_for: Some(Duration::ZERO),
            fails: false,
            ready: true,
            journal: Journal::default(),
            gauge: None,
            started_at: Mutex::new(None),
            stopped,
            exited: AtomicBool::new(false),
            starts: AtomicUsize::new(0),
            stops: AtomicUsize::new(0),
            receiver: Mutex::new(None),
        }
    }

    /// Exit after running this long.
    pub const fn running_for(mut self, duration: Duration) -> Self {
        self.run_for = Some(duration);
        self
    }

    /// Keep running until stopped.
    pub const fn forever(mut self) -> Self {
        self.run_for = None;
        self
    }

    /// Exit abnormally.
    pub const fn failing(mut self) -> Self {
        self.fails = true;
        self
    }

    /// Never report available.
    pub const fn never_ready(mut self) -> Self {
        self.ready = false;
        self
    }

    pub fn journal(mut self, journal: &Journal) -> Self {
        self.journal = journal.clone();
        self
    }

    pub fn gauge(mut self, gauge: &Arc<Gauge>) -> Self {
        self.gauge = Some(Arc::clone(gauge));
        self
    }

    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn start_count(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn stop_count(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    /// Push a stdout line through whatever receiver is currently assigned.
    pub fn emit(&self, text: &str) {
        let receiver = self
            .receiver
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(receiver) = receiver {
            receiver.receive(OutputLine::now(self.name.as_str(), ProcessOutput::Stdout(text.into())));
        }
    }

    fn started_at(&self) -> Option<Instant> {
        *self.started_at.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn finished(&self) -> bool {
        if *self.stopped.borrow() {
            return true;
        }
        match (self.started_at(), self.run_for) {
            (Some(at), Some(run_for)) => Instant::now() >= at + run_for,
            _ => false,
        }
    }
}

#[async_trait]
impl Process for FakeProcess {
    fn name(&self) -> &str {
        &self.name
    }

    async fn start(&self) {
        {
            let mut started_at = self.started_at.lock().unwrap_or_else(PoisonError::into_inner);
            if started_at.is_some() {
                return;
            }
            *started_at = Some(Instant::now());
        }
        self.starts.fetch_add(1, Ordering::SeqCst);
        self.journal.record(Call::Start(self.name.clone()));
        if let Some(gauge) = &self.gauge {
            gauge.enter();
        }
    }

    async fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.journal.record(Call::Stop(self.name.clone()));
        self.stopped.send_replace(true);
    }

    async fn wait(&self) {
        let Some(at) = self.started_at() else {
            return;
        };

        let mut stopped = self.stopped.subscribe();
        match self.run_for {
            Some(run_for) => {
                tokio::select! {
                    () = tokio::time::sleep_until(at + run_for) => {}
                    _ = stopped.wait_for(|s| *s) => {}
                }
            }
            None => {
                let _ = stopped.wait_for(|s| *s).await;
            }
        }

        if !self.exited.swap(true, Ordering::SeqCst) {
            if let Some(gauge) = &self.gauge {
                gauge.leave();
            }
        }
    }

    async fn wait_checked(&self) -> Result<()> {
        self.wait().await;
        if self.fails {
            return Err(GroupError::failure(&self.name, "exit status: 1"));
        }
        Ok(())
    }

    fn is_started(&self) -> bool {
        self.started_at().is_some()
    }

    fn is_alive(&self) -> bool {
        self.is_started() && !self.finished()
    }

    fn is_available(&self) -> bool {
        self.ready && self.is_alive()
    }

    async fn wait_available(&self, timeout: Duration) -> Result<()> {
        tokio::time::timeout(timeout, async {
            loop {
                if self.is_available() {
                    return Ok(());
                }
                if self.is_started() && self.finished() {
                    return Err(GroupError::failure(&self.name, "terminated before becoming available"));
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .map_err(|_| GroupError::timeout("available", timeout))?
    }

    fn set_receiver(&self, receiver: SharedReceiver) {
        *self.receiver.lock().unwrap_or_else(PoisonError::into_inner) = Some(receiver);
    }
}
