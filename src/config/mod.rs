//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! controller.toml
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → ControllerConfig (validated, immutable)
//!     → passed by value to each subsystem constructor
//!
//! Routing intent file / watched files:
//!     watcher.rs detects change
//!     → InMemoryStore::load_intent_file (intent file only)
//!     → Event::FileChange on the controller's event channel
//! ```
//!
//! # Design Decisions
//! - Controller config is immutable once loaded; changes require a restart
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    ControlLoopConfig, ControllerConfig, ListenConfig, ObservabilityConfig, PassthroughConfig,
    QueueConfig, ReloadMode, WorkerConfig,
};
pub use watcher::FileWatcher;
