//! OS child processes driven through the [`Process`] contract.
//!
//! Provides [`ChildProcess`], an async process handle with:
//! - Configurable stdio handling
//! - Line-by-line stdout/stderr forwarding to the group receiver
//! - Optional readiness detection via a regex over output lines
//! - Optional per-process timeout
//! - Environment variable management
//! - Working directory configuration

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use uuid::Uuid;

use super::handle::Process;
use crate::error::{GroupError, Result};
use crate::receiver::{NullReceiver, OutputLine, ProcessOutput, SharedReceiver};

/// How long output readers may keep draining after the child exited.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Configuration options for spawning a process.
#[derive(Debug, Clone, Default)]
pub struct ProcessOptions {
    /// Display name; generated from the program when absent.
    pub name: Option<String>,

    /// The program to execute.
    pub program: String,

    /// Arguments to pass to the program.
    pub args: Vec<String>,

    /// Working directory for the process.
    pub working_dir: Option<PathBuf>,

    /// Environment variables to set (merged with current env).
    pub env: HashMap<String, String>,

    /// Environment variables to remove.
    pub env_remove: Vec<String>,

    /// Whether to clear the environment before adding env vars.
    pub env_clear: bool,

    /// Kill the process once it has run this long.
    pub timeout: Option<Duration>,

    /// Whether to capture stdout (default: true).
    pub capture_stdout: bool,

    /// Whether to capture stderr (default: true).
    pub capture_stderr: bool,

    /// Output line that marks the process as available.
    pub ready_pattern: Option<Regex>,
}

impl ProcessOptions {
    /// Create new options for the given program.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            name: None,
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
            env: HashMap::new(),
            env_remove: Vec::new(),
            env_clear: false,
            timeout: None,
            capture_stdout: true,
            capture_stderr: true,
            ready_pattern: None,
        }
    }

    /// Set the display name.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Add an argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Add multiple arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set the working directory.
    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Set an environment variable.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Set multiple environment variables.
    pub fn envs<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        for (k, v) in vars {
            self.env.insert(k.into(), v.into());
        }
        self
    }

    /// Remove an environment variable.
    pub fn env_remove(mut self, key: impl Into<String>) -> Self {
        self.env_remove.push(key.into());
        self
    }

    /// Clear the environment before setting variables.
    pub fn env_clear(mut self) -> Self {
        self.env_clear = true;
        self
    }

    /// Set a timeout for the process.
    pub fn timeout(mut self, duration: Duration) -> Self {
        self.timeout = Some(duration);
        self
    }

    /// Mark the process available once an output line matches `pattern`.
    pub fn ready_when(mut self, pattern: Regex) -> Self {
        self.ready_pattern = Some(pattern);
        self
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);

        if let Some(ref dir) = self.working_dir {
            cmd.current_dir(dir);
        }

        if self.env_clear {
            cmd.env_clear();
        }

        for key in &self.env_remove {
            cmd.env_remove(key);
        }

        for (key, value) in &self.env {
            cmd.env(key, value);
        }

        if self.capture_stdout {
            cmd.stdout(Stdio::piped());
        } else {
            cmd.stdout(Stdio::null());
        }

        if self.capture_stderr {
            cmd.stderr(Stdio::piped());
        } else {
            cmd.stderr(Stdio::null());
        }

        cmd.stdin(Stdio::null());

        cmd.kill_on_drop(true);
        cmd
    }
}

/// Lifecycle state of a [`ChildProcess`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessState {
    /// `start` has not been called.
    Idle,
    /// The child is running.
    Running {
        /// OS process id, if still known.
        pid: Option<u32>,
        /// Whether the readiness condition has been met.
        ready: bool,
    },
    /// The child has exited.
    Exited {
        /// Exit status reported by the OS.
        status: ExitStatus,
        /// Whether the process was killed for exceeding its timeout.
        timed_out: bool,
    },
    /// The child could not be spawned or reaped.
    Failed(String),
}

impl ProcessState {
    /// Whether the process has reached a final state.
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Exited { .. } | Self::Failed(_))
    }
}

/// A child process managed through the [`Process`] contract.
///
/// # Example
///
/// ```rust,no_run
/// use procgroup::{ChildProcess, Process, ProcessOptions};
///
/// #[tokio::main]
/// async fn main() -> procgroup::Result<()> {
///     let proc = ChildProcess::new(ProcessOptions::new("ls").arg("-la"));
///     proc.start().await;
///     proc.wait_checked().await
/// }
/// ```
pub struct ChildProcess {
    name: String,
    options: ProcessOptions,
    receiver: Arc<RwLock<SharedReceiver>>,
    state: Arc<watch::Sender<ProcessState>>,
    kill_tx: Mutex<Option<oneshot::Sender<()>>>,
}

impl ChildProcess {
    /// Create a handle; nothing is spawned until [`Process::start`].
    pub fn new(options: ProcessOptions) -> Self {
        let name = options.name.clone().unwrap_or_else(|| {
            let id = Uuid::now_v7().simple().to_string();
            format!("{}-{}", options.program, &id[id.len() - 8..])
        });
        let (state, _) = watch::channel(ProcessState::Idle);
        let receiver: SharedReceiver = Arc::new(NullReceiver);

        Self {
            name,
            options,
            receiver: Arc::new(RwLock::new(receiver)),
            state: Arc::new(state),
            kill_tx: Mutex::new(None),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ProcessState {
        self.state.borrow().clone()
    }

    /// OS process id while running.
    pub fn pid(&self) -> Option<u32> {
        match *self.state.borrow() {
            ProcessState::Running { pid, .. } => pid,
            _ => None,
        }
    }

    /// Spawn the child and its supervisor. Caller holds the kill lock.
    fn spawn(&self, kill_slot: &mut Option<oneshot::Sender<()>>) {
        let mut child = match self.options.command().spawn() {
            Ok(child) => child,
            Err(e) => {
                tracing::error!(process = %self.name, program = %self.options.program, error = %e, "spawn failed");
                self.state.send_replace(ProcessState::Failed(format!(
                    "failed to spawn {}: {e}",
                    self.options.program
                )));
                return;
            }
        };

        let pid = child.id();
        let ready = self.options.ready_pattern.is_none();
        self.state.send_replace(ProcessState::Running { pid, ready });
        tracing::debug!(process = %self.name, ?pid, "spawned");

        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            readers.push(self.spawn_reader(stdout, ProcessOutput::Stdout));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(self.spawn_reader(stderr, ProcessOutput::Stderr));
        }

        let (kill_tx, kill_rx) = oneshot::channel();
        *kill_slot = Some(kill_tx);

        tokio::spawn(supervise(Supervisor {
            name: self.name.clone(),
            child,
            readers,
            kill_rx,
            deadline: self.options.timeout.and_then(|t| Instant::now().checked_add(t)),
            receiver: Arc::clone(&self.receiver),
            state: Arc::clone(&self.state),
        }));
    }

    fn spawn_reader<R>(&self, stream: R, wrap: fn(String) -> ProcessOutput) -> JoinHandle<()>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let name = self.name.clone();
        let receiver = Arc::clone(&self.receiver);
        let state = Arc::clone(&self.state);
        let ready_pattern = self.options.ready_pattern.clone();

        tokio::spawn(async move {
            let mut lines = BufReader::new(stream).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if ready_pattern.as_ref().is_some_and(|re| re.is_match(&line)) {
                    mark_ready(&state, &name);
                }
                emit(&receiver, OutputLine::now(name.as_str(), wrap(line)));
            }
        })
    }
}

impl std::fmt::Debug for ChildProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChildProcess")
            .field("name", &self.name)
            .field("program", &self.options.program)
            .field("state", &*self.state.borrow())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Process for ChildProcess {
    fn name(&self) -> &str {
        &self.name
    }

    async fn start(&self) {
        let mut kill_slot = self.kill_tx.lock().unwrap_or_else(PoisonError::into_inner);
        if self.is_started() {
            return;
        }
        self.spawn(&mut kill_slot);
    }

    async fn stop(&self) {
        let kill_tx = self
            .kill_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(tx) = kill_tx {
            tracing::debug!(process = %self.name, "stopping");
            // The supervisor may already have reaped the child.
            let _ = tx.send(());
        }
        self.wait().await;
    }

    async fn wait(&self) {
        let mut rx = self.state.subscribe();
        // Unstarted processes have nothing to wait for.
        let _ = rx
            .wait_for(|s| matches!(s, ProcessState::Idle) || s.is_terminal())
            .await;
    }

    async fn wait_checked(&self) -> Result<()> {
        self.wait().await;
        match self.state() {
            ProcessState::Exited { timed_out: true, .. } => Err(GroupError::failure(
                &self.name,
                format!("killed after exceeding its {:?} timeout", self.options.timeout.unwrap_or_default()),
            )),
            ProcessState::Exited { status, .. } if !status.success() => {
                Err(GroupError::failure(&self.name, status.to_string()))
            }
            ProcessState::Failed(reason) => Err(GroupError::failure(&self.name, reason)),
            _ => Ok(()),
        }
    }

    fn is_started(&self) -> bool {
        !matches!(*self.state.borrow(), ProcessState::Idle)
    }

    fn is_alive(&self) -> bool {
        matches!(*self.state.borrow(), ProcessState::Running { .. })
    }

    fn is_available(&self) -> bool {
        matches!(*self.state.borrow(), ProcessState::Running { ready: true, .. })
    }

    async fn wait_available(&self, timeout: Duration) -> Result<()> {
        let mut rx = self.state.subscribe();
        let state = tokio::time::timeout(
            timeout,
            rx.wait_for(|s| s.is_terminal() || matches!(s, ProcessState::Running { ready: true, .. })),
        )
        .await
        .map_err(|_| GroupError::timeout("available", timeout))?
        .map(|s| (*s).clone())
        .map_err(|_| GroupError::failure(&self.name, "handle dropped"))?;

        match state {
            ProcessState::Running { .. } => Ok(()),
            _ => Err(GroupError::failure(&self.name, "terminated before becoming available")),
        }
    }

    fn set_receiver(&self, receiver: SharedReceiver) {
        *self.receiver.write().unwrap_or_else(PoisonError::into_inner) = receiver;
    }
}

/// Everything the supervisor task owns for one running child.
struct Supervisor {
    name: String,
    child: Child,
    readers: Vec<JoinHandle<()>>,
    kill_rx: oneshot::Receiver<()>,
    deadline: Option<Instant>,
    receiver: Arc<RwLock<SharedReceiver>>,
    state: Arc<watch::Sender<ProcessState>>,
}

enum Wake {
    Exited(std::io::Result<ExitStatus>),
    Kill,
    Deadline,
}

/// Reap the child, honoring stop requests and the timeout, then publish the outcome.
async fn supervise(mut sup: Supervisor) {
    let deadline_at = sup.deadline;
    let deadline = async move {
        match deadline_at {
            Some(at) => tokio::time::sleep_until(at).await,
            None => std::future::pending().await,
        }
    };

    let wake = tokio::select! {
        status = sup.child.wait() => Wake::Exited(status),
        _ = &mut sup.kill_rx => Wake::Kill,
        () = deadline => Wake::Deadline,
    };

    let timed_out = matches!(wake, Wake::Deadline);
    let status = match wake {
        Wake::Exited(status) => status,
        Wake::Kill | Wake::Deadline => {
            if timed_out {
                tracing::warn!(process = %sup.name, "timeout exceeded, killing");
            }
            let _ = sup.child.start_kill();
            sup.child.wait().await
        }
    };

    let drain = drain_readers(std::mem::take(&mut sup.readers));
    if tokio::time::timeout(DRAIN_TIMEOUT, drain).await.is_err() {
        tracing::debug!(process = %sup.name, "output still open after exit, detaching readers");
    }

    match status {
        Ok(status) => {
            tracing::debug!(process = %sup.name, %status, timed_out, "exited");
            emit(&sup.receiver, OutputLine::now(sup.name.as_str(), ProcessOutput::Exit(status)));
            sup.state.send_replace(ProcessState::Exited { status, timed_out });
        }
        Err(e) => {
            tracing::error!(process = %sup.name, error = %e, "failed to wait for process");
            sup.state
                .send_replace(ProcessState::Failed(format!("failed to wait for process to exit: {e}")));
        }
    }
}

async fn drain_readers(handles: Vec<JoinHandle<()>>) {
    for handle in handles {
        let _ = handle.await;
    }
}

fn mark_ready(state: &watch::Sender<ProcessState>, name: &str) {
    let changed = state.send_if_modified(|s| match s {
        ProcessState::Running { ready, .. } if !*ready => {
            *ready = true;
            true
        }
        _ => false,
    });
    if changed {
        tracing::info!(process = %name, "available");
    }
}

fn emit(receiver: &RwLock<SharedReceiver>, line: OutputLine) {
    let receiver = Arc::clone(&receiver.read().unwrap_or_else(PoisonError::into_inner));
    receiver.receive(line);
}
