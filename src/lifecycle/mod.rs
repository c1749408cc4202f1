//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Signals (signals.rs):
//!     SIGTERM/SIGINT/SIGQUIT → Controller::stop
//!
//! Shutdown (shutdown.rs):
//!     Controller::stop → Shutdown::trigger → every StopSignal resolves
//!     → accept loops, janitor, reaper and control loop exit
//! ```
//!
//! # Design Decisions
//! - The stop signal is latched: a task that starts after shutdown began
//!   still sees it
//! - Ordered shutdown: grace delay, queue drain, then the worker

pub mod shutdown;
pub mod signals;

pub use shutdown::{Shutdown, StopSignal};
pub use signals::wait_for_shutdown_signal;
