//! Recurrence Hook - Taskwarrior integration
//!
//! Connects the recurrence engine to a Taskwarrior installation:
//! - [`protocol`]: the on-add / on-modify / on-exit stdin/stdout contract
//! - [`taskwarrior`]: a [`TaskStore`](recur_engine::TaskStore) that shells
//!   out to the `task` binary
//! - [`logging`]: opt-in debug log in the data directory
//!
//! Install the binary once and link it under the host's hooks directory as
//! `on-add.recurrence`, `on-modify.recurrence` and `on-exit.recurrence`. The
//! mode is taken from the link name.

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod logging;
pub mod protocol;
pub mod taskwarrior;

pub use protocol::{run_hook, HookMode, HookResponse, HostArgs};
pub use taskwarrior::{ProcessRunner, TaskOutput, TaskRunner, TaskwarriorStore};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
