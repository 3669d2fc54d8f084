//! Command group execution engine
//!
//! Layers, outermost first: [`Engine`] sequences groups, [`GroupRunner`] runs one group's
//! commands serially or concurrently, [`RetryPolicy`] retries a command within its budget, and
//! [`CommandExecutor`] runs a single attempt as a child process.
//!
//! Cancellation flows down the same chain as a [`CancellationToken`](tokio_util::sync::CancellationToken):
//! the engine's token aborts everything, each group derives a child token that a failing
//! command may cancel to stop its siblings. Every layer publishes its transitions on a shared
//! [`EventBus`] as they happen.

pub mod engine;
pub mod event;
pub mod group;
pub mod outcome;
pub mod process;
pub mod retry;

pub use engine::Engine;
pub use event::{Event, EventBus, OutputStream};
pub use group::GroupRunner;
pub use outcome::{
    AttemptStatus, CommandAttempt, CommandOutcome, CommandState, CommandStatus, GroupOutcome,
    GroupStatus, RunOutcome, RunStatus,
};
pub use process::CommandExecutor;
pub use retry::RetryPolicy;
