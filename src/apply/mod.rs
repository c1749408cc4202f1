//! Configuration validation and activation.
//!
//! # Data Flow
//! ```text
//! RenderedArtifact
//!     → reject empty
//!     → scratch file (worker-cfg*) → worker test mode
//!         failure: keep scratch file, return Validation error
//!     → optional diff against the active file (log only)
//!     → atomic replace of the active file
//!     → reload command (signal mode) or publish (push mode)
//! ```
//!
//! Rejected scratch files stay on disk for inspection until the janitor
//! removes them after the retention period.

use std::path::PathBuf;
use thiserror::Error;

pub mod applier;
pub mod diff;
pub mod janitor;

pub use applier::{write_atomic, Applier};
pub use janitor::{clean_temp_files, run_janitor};

/// Prefix of validation scratch files.
pub const TEMP_PREFIX: &str = "worker-cfg";

#[derive(Debug, Error)]
pub enum ApplyError {
    #[error("rendered configuration is empty")]
    Empty,

    #[error("failed to run worker test: {0}")]
    Test(#[source] std::io::Error),

    #[error("configuration test failed (kept at {path:?}):\n{output}")]
    Validation { output: String, path: PathBuf },

    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to run reload: {0}")]
    ReloadSpawn(#[source] std::io::Error),

    #[error("reload failed: {0}")]
    Reload(String),
}
