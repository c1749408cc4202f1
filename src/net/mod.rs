//! Network layer: the TLS passthrough proxy.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection (listener.rs)
//!     → connection.rs (id, active count)
//!     → proxy_protocol.rs (optional inbound PROXY v1 header)
//!     → sni.rs (server name from the ClientHello)
//!     → passthrough.rs (backend selection, PROXY header out, splice)
//! ```
//!
//! # Design Decisions
//! - TLS is never terminated here; only the cleartext preamble is read
//! - The backend list is an `ArcSwap`, replaced whole after each sync
//! - One task per connection, no concurrency cap

pub mod connection;
pub mod listener;
pub mod passthrough;
pub mod proxy_protocol;
pub mod sni;

pub use listener::{Listener, ListenerError};
pub use passthrough::{BackendList, PassthroughProxy, ProxyError, ProxySettings, TcpServer};
