//! Control plane orchestration.
//!
//! # Data Flow
//! ```text
//! Store watchers / file watcher
//!     → event.rs (bounded broadcast channel, oldest dropped on overflow)
//!     → Controller::dispatch (skippable for object events)
//!     → RateLimitedQueue worker → Controller::sync_intent
//!         → ConfigRenderer → Applier → PassthroughProxy::update_servers
//!
//! Worker exits → ProcessSupervisor::handle_exit (respawn unless stopping)
//! ```
//!
//! # Responsibilities
//! - Own the explicit controller state (shutdown flag, running intent)
//! - Start and stop every subsystem in order
//! - Serve `/healthz` and `/status`

use std::net::SocketAddr;
use thiserror::Error;

use crate::apply::ApplyError;
use crate::net::ListenerError;
use crate::process::SupervisorError;
use crate::render::RenderError;

#[allow(clippy::module_inception)]
pub mod controller;
pub mod event;
pub mod status;

pub use controller::{Controller, ControllerStatus, ReloadStatus, SyncOutcome};
pub use event::Event;

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error(transparent)]
    Render(#[from] RenderError),

    #[error(transparent)]
    Apply(#[from] ApplyError),

    #[error(transparent)]
    Supervisor(#[from] SupervisorError),

    #[error(transparent)]
    Listener(#[from] ListenerError),

    #[error("invalid address {0:?}")]
    Address(String),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("controller already started")]
    AlreadyStarted,

    #[error("shutdown already in progress")]
    AlreadyStopping,
}
