//! Data model shared by the store, renderer and controller.
//!
//! ```text
//! Store snapshot
//!     → RoutingIntent (servers, backends, passthrough backends)
//!     → BackendConfiguration (global tuning, key/value sourced)
//!     → render → RenderedArtifact
//! ```

pub mod backend_config;
pub mod intent;

pub use backend_config::BackendConfiguration;
pub use intent::{
    Backend, Endpoint, Location, PassthroughBackend, PortRef, RoutingIntent, Server, Service,
    ServicePort,
};
