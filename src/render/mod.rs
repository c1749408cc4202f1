//! Configuration rendering.
//!
//! # Data Flow
//! ```text
//! BackendConfiguration + RoutingIntent
//!     → header maps, DH parameters (store lookups, degrade on failure)
//!     → passthrough list, www redirects
//!     → hash sizing, worker capacity limits
//!     → TemplateConfig → TemplateWriter → RenderedArtifact
//! ```
//!
//! # Design Decisions
//! - Hash sizes are only ever raised, never shrunk below a configured value
//! - Store failures are logged and the affected feature skipped for the pass
//! - The template is a trait object so the worker's native syntax stays
//!   outside this crate

use thiserror::Error;

use crate::store::StoreError;

pub mod capacity;
pub mod hash;
pub mod passthrough;
pub mod redirects;
pub mod renderer;
pub mod template;

pub use renderer::{ConfigRenderer, DhParam, RenderSettings, Rendered};
pub use template::{JsonTemplate, RenderedArtifact, TemplateConfig, TemplateWriter};

/// Errors produced while rendering.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("secret {secret:?} has no {key:?} entry")]
    MissingSecretKey { secret: String, key: &'static str },

    #[error("template error: {0}")]
    Template(String),
}
