//! Worker process management.
//!
//! # Data Flow
//! ```text
//! ProcessSupervisor::start
//!     → WorkerCommand::exec (own process group, inherited stdio)
//!     → wait task → WorkerExit channel → Controller
//!     → ProcessSupervisor::handle_exit (respawn or ignore)
//!
//! Orphan reaper (optional, Linux):
//!     zombie peek → skip worker pid → reap after one interval
//! ```
//!
//! # Design Decisions
//! - The worker runs in its own process group so terminal signals aimed at
//!   the controller do not reach it
//! - The exit channel is the only way the worker reports failure
//! - Reaping unrelated children is a separate task from supervision

use thiserror::Error;

pub mod command;
pub mod reaper;
pub mod supervisor;

pub use command::WorkerCommand;
pub use supervisor::{ExitDisposition, ProcessSupervisor, WorkerExit, WorkerState};

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("failed to spawn worker: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("worker exited before its pid could be read")]
    NoPid,

    #[error("worker is {0:?}")]
    InvalidState(WorkerState),

    #[error("ports still in use: {0:?}")]
    PortsBusy(Vec<u16>),

    #[error("failed to signal worker: {0}")]
    Signal(#[source] std::io::Error),
}
