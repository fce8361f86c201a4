//! Procgroup - coordinate a set of child processes as one unit.
//!
//! A [`Group`] holds processes in insertion order and drives them through
//! their lifecycle together:
//! - start them in order, optionally spaced by a delay
//! - wait for all of them, optionally bounded by a timeout
//! - query liveness and availability across the whole set
//! - run them through a bounded pool of dispatch workers ("partition")
//! - always stop everything once a run ends, whatever the outcome
//!
//! Processes are anything implementing [`Process`]; [`ChildProcess`]
//! covers OS child processes. Their output goes to the group's
//! [`Receiver`].

pub mod error;
pub mod group;
pub mod manifest;
pub mod process;
pub mod receiver;

pub use error::{GroupError, Result};
pub use group::{Group, GroupOptions, DEFAULT_TIMEOUT};
pub use manifest::{Manifest, ManifestError, ProcessSpec};
pub use process::{ChildProcess, Process, ProcessHandle, ProcessOptions, ProcessState};
pub use receiver::{
    ChannelReceiver, NullReceiver, OutputLine, ProcessOutput, Receiver, SharedReceiver, TracingReceiver,
};
