//! Group coordination: membership, lifecycle and partitioned dispatch.

mod cleanup;
mod coordinator;
mod dispatch;

pub use coordinator::{Group, GroupOptions, DEFAULT_TIMEOUT};
