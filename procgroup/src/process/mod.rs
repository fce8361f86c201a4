//! Process handles managed by a group.
//!
//! [`Process`] is the contract a group drives; [`ChildProcess`] implements
//! it over tokio child processes with streaming output.

mod handle;
mod spawn;

#[cfg(test)]
pub(crate) mod fake;

pub use handle::{Process, ProcessHandle};
pub use spawn::{ChildProcess, ProcessOptions, ProcessState};
