//! Output sinks shared by the processes of a group.
//!
//! A [`Receiver`] is handed to every process when it joins a group. The
//! process pushes each line it reads from the child (and its final exit
//! status) into the receiver, tagged with the process name.

use std::fmt;
use std::process::ExitStatus;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

/// Output line from a spawned process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutput {
    /// Line from stdout.
    Stdout(String),
    /// Line from stderr.
    Stderr(String),
    /// Process has exited.
    Exit(ExitStatus),
}

/// A single piece of output, attributed to the process that produced it.
#[derive(Debug, Clone)]
pub struct OutputLine {
    /// Name of the producing process.
    pub process: String,
    /// The output itself.
    pub output: ProcessOutput,
    /// When the line was received.
    pub at: DateTime<Utc>,
}

impl OutputLine {
    /// Stamp a piece of output with the current time.
    pub fn now(process: impl Into<String>, output: ProcessOutput) -> Self {
        Self {
            process: process.into(),
            output,
            at: Utc::now(),
        }
    }
}

impl fmt::Display for OutputLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.output {
            ProcessOutput::Stdout(line) => write!(f, "[{}] {line}", self.process),
            ProcessOutput::Stderr(line) => write!(f, "[{}] ! {line}", self.process),
            ProcessOutput::Exit(status) => write!(f, "[{}] exited: {status}", self.process),
        }
    }
}

/// Sink for process output.
///
/// Implementations must not block: they are called from the tasks that
/// drain child stdout/stderr.
pub trait Receiver: Send + Sync {
    /// Accept one piece of output.
    fn receive(&self, line: OutputLine);
}

/// Shared receiver reference, as stored by groups and processes.
pub type SharedReceiver = Arc<dyn Receiver>;

/// Forwards output into an unbounded tokio channel.
#[derive(Debug, Clone)]
pub struct ChannelReceiver {
    tx: mpsc::UnboundedSender<OutputLine>,
}

impl ChannelReceiver {
    /// Create a receiver together with the channel end that yields its lines.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<OutputLine>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Convenience for `Arc::new` over [`ChannelReceiver::channel`].
    pub fn shared() -> (SharedReceiver, mpsc::UnboundedReceiver<OutputLine>) {
        let (receiver, rx) = Self::channel();
        let receiver: SharedReceiver = Arc::new(receiver);
        (receiver, rx)
    }
}

impl Receiver for ChannelReceiver {
    fn receive(&self, line: OutputLine) {
        // The consumer may have gone away; output is then dropped.
        let _ = self.tx.send(line);
    }
}

/// Emits every line as a `tracing` event.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingReceiver;

impl Receiver for TracingReceiver {
    fn receive(&self, line: OutputLine) {
        let process = line.process.as_str();
        match &line.output {
            ProcessOutput::Stdout(text) => tracing::info!(target: "procgroup::output", process, "{text}"),
            ProcessOutput::Stderr(text) => tracing::warn!(target: "procgroup::output", process, "{text}"),
            ProcessOutput::Exit(status) => {
                tracing::info!(target: "procgroup::output", process, code = ?status.code(), "exited");
            }
        }
    }
}

/// Discards all output.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullReceiver;

impl Receiver for NullReceiver {
    fn receive(&self, _line: OutputLine) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_channel_receiver_forwards() {
        let (receiver, mut rx) = ChannelReceiver::channel();
        receiver.receive(OutputLine::now("web", ProcessOutput::Stdout("ready".into())));

        let line = rx.recv().await.unwrap();
        assert_eq!(line.process, "web");
        assert_eq!(line.output, ProcessOutput::Stdout("ready".into()));
        assert_eq!(line.to_string(), "[web] ready");
    }

    #[test]
    fn test_channel_receiver_closed() {
        let (receiver, rx) = ChannelReceiver::channel();
        drop(rx);
        // Must not panic once the consumer is gone.
        receiver.receive(OutputLine::now("web", ProcessOutput::Stderr("late".into())));
    }
}
