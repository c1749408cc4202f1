//! Ingress control plane library.
//!
//! Renders a routing intent into a worker configuration file, validates and
//! activates it, supervises the worker process and routes TLS passthrough
//! traffic by SNI.

// Inputs
pub mod config;
pub mod model;
pub mod store;

// Reconciliation pipeline
pub mod apply;
pub mod controller;
pub mod queue;
pub mod render;

// Runtime
pub mod net;
pub mod process;

// Cross-cutting concerns
pub mod lifecycle;
pub mod observability;

pub use config::ControllerConfig;
pub use controller::{Controller, ControllerError, Event};
pub use lifecycle::Shutdown;
pub use store::{InMemoryStore, Store};
