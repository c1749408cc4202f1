//! SNI-routed TCP passthrough proxy.
//!
//! Each accepted connection is handled in its own task:
//!
//! 1. Optionally read a PROXY protocol header to learn the real client.
//! 2. Read the TLS ClientHello record and extract the server name.
//! 3. Pick the matching backend, or the default backend, or close.
//! 4. Connect, send a PROXY header if the backend wants one, replay the
//!    bytes already read, then splice both directions until either closes.
//!
//! The backend list is swapped as a whole; a connection keeps the backend it
//! selected regardless of later swaps.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use serde::Serialize;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use super::connection::ConnectionTracker;
use super::listener::Listener;
use super::proxy_protocol::{self, ProxyProtocolError};
use super::sni;
use crate::config::PassthroughConfig;
use crate::lifecycle::StopSignal;
use crate::observability::metrics;

/// Read size while collecting the preamble.
const READ_CHUNK: usize = 4096;

/// A raw TCP target for one hostname.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TcpServer {
    pub hostname: String,
    pub address: String,
    pub port: u16,
    /// Send a PROXY protocol header before the client's bytes.
    pub proxy_protocol: bool,
}

impl TcpServer {
    fn target(&self) -> String {
        if self.address.contains(':') && !self.address.starts_with('[') {
            format!("[{}]:{}", self.address, self.port)
        } else {
            format!("{}:{}", self.address, self.port)
        }
    }
}

/// Passthrough targets plus the fallback for unmatched connections.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BackendList {
    pub servers: Vec<TcpServer>,
    pub default: Option<TcpServer>,
}

impl BackendList {
    /// Backend for `hostname`, falling back to the default.
    pub fn select(&self, hostname: Option<&str>) -> Option<&TcpServer> {
        hostname
            .and_then(|h| self.servers.iter().find(|s| s.hostname.eq_ignore_ascii_case(h)))
            .or(self.default.as_ref())
    }
}

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("timed out waiting for the PROXY protocol header")]
    HeaderTimeout,

    #[error("invalid PROXY protocol header: {0}")]
    ProxyProtocol(#[from] ProxyProtocolError),

    #[error("no backend for {0:?} and no default backend")]
    NoBackend(Option<String>),

    #[error("timed out connecting to {0}")]
    ConnectTimeout(String),

    #[error("failed to connect to {target}: {source}")]
    Connect {
        target: String,
        #[source]
        source: std::io::Error,
    },
}

/// Timeouts and inbound header handling.
#[derive(Debug, Clone)]
pub struct ProxySettings {
    pub header_timeout: Duration,
    pub connect_timeout: Duration,
}

impl From<&PassthroughConfig> for ProxySettings {
    fn from(config: &PassthroughConfig) -> Self {
        Self {
            header_timeout: Duration::from_secs(config.header_timeout_secs),
            connect_timeout: Duration::from_secs(config.connect_timeout_secs),
        }
    }
}

/// What was learned from the start of a connection.
struct Preamble {
    client: SocketAddr,
    destination: SocketAddr,
    hostname: Option<String>,
    /// Bytes read from the client that must be replayed to the backend.
    buffered: Vec<u8>,
}

pub struct PassthroughProxy {
    backends: ArcSwap<BackendList>,
    accept_proxy_protocol: AtomicBool,
    /// Millis allowed for the inbound PROXY header; follows the backend
    /// configuration.
    proxy_header_timeout_ms: AtomicU64,
    settings: ProxySettings,
    tracker: ConnectionTracker,
}

impl PassthroughProxy {
    pub fn new(settings: ProxySettings, default: Option<TcpServer>) -> Self {
        Self {
            backends: ArcSwap::from_pointee(BackendList {
                servers: Vec::new(),
                default,
            }),
            accept_proxy_protocol: AtomicBool::new(false),
            proxy_header_timeout_ms: AtomicU64::new(settings.header_timeout.as_millis() as u64),
            settings,
            tracker: ConnectionTracker::new(),
        }
    }

    /// Replace the passthrough servers, keeping the default backend.
    pub fn update_servers(&self, servers: Vec<TcpServer>) {
        let default = self.backends.load().default.clone();
        tracing::info!(servers = servers.len(), "Passthrough backends updated");
        self.backends.store(Arc::new(BackendList { servers, default }));
    }

    pub fn backends(&self) -> Arc<BackendList> {
        self.backends.load_full()
    }

    /// Expect a PROXY protocol header on inbound connections.
    pub fn set_accept_proxy_protocol(&self, enabled: bool) {
        self.accept_proxy_protocol.store(enabled, Ordering::Relaxed);
    }

    /// Time allowed for the inbound PROXY header. Zero keeps the current value.
    pub fn set_proxy_protocol_header_timeout(&self, timeout: Duration) {
        if timeout.is_zero() {
            return;
        }
        self.proxy_header_timeout_ms
            .store(timeout.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn proxy_protocol_header_timeout(&self) -> Duration {
        Duration::from_millis(self.proxy_header_timeout_ms.load(Ordering::Relaxed))
    }

    pub fn active_connections(&self) -> u64 {
        self.tracker.active_count()
    }

    /// Accept connections until `stop` fires.
    pub async fn run(self: Arc<Self>, listener: Listener, mut stop: StopSignal) {
        let local = listener.local_addr().ok();
        tracing::info!(address = ?local, "Passthrough proxy accepting");

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(conn) => conn,
                        Err(e) => {
                            tracing::warn!(error = %e, "Accept failed");
                            continue;
                        }
                    };
                    let proxy = Arc::clone(&self);
                    tokio::spawn(async move {
                        if let Err(e) = proxy.handle(stream, peer).await {
                            tracing::debug!(peer = %peer, error = %e, "Passthrough connection ended");
                        }
                    });
                }
                _ = stop.wait() => {
                    tracing::info!(address = ?local, "Passthrough proxy stopped accepting");
                    break;
                }
            }
        }
    }

    /// Route one client connection and splice it to its backend.
    pub async fn handle(&self, mut client: TcpStream, peer: SocketAddr) -> Result<(), ProxyError> {
        let guard = self.tracker.track();
        let preamble = self.read_preamble(&mut client, peer).await?;

        let backends = self.backends.load();
        let target = match backends.select(preamble.hostname.as_deref()) {
            Some(t) => t.clone(),
            None => return Err(ProxyError::NoBackend(preamble.hostname)),
        };
        drop(backends);

        let route = if target.hostname.is_empty() { "default" } else { target.hostname.as_str() };
        metrics::record_passthrough_connection(route);
        tracing::debug!(
            connection_id = %guard.id(),
            client = %preamble.client,
            sni = ?preamble.hostname,
            backend = %target.target(),
            "Passthrough route selected"
        );

        let addr = target.target();
        let mut upstream = tokio::time::timeout(self.settings.connect_timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| ProxyError::ConnectTimeout(addr.clone()))?
            .map_err(|source| ProxyError::Connect {
                target: addr.clone(),
                source,
            })?;

        if target.proxy_protocol {
            let header = proxy_protocol::encode_v1(preamble.client, preamble.destination);
            upstream.write_all(header.as_bytes()).await?;
        }
        upstream.write_all(&preamble.buffered).await?;

        let (sent, received) = tokio::io::copy_bidirectional(&mut client, &mut upstream).await?;
        tracing::trace!(
            connection_id = %guard.id(),
            sent = sent + preamble.buffered.len() as u64,
            received = received,
            "Passthrough connection finished"
        );
        Ok(())
    }

    async fn read_preamble(
        &self,
        client: &mut TcpStream,
        peer: SocketAddr,
    ) -> Result<Preamble, ProxyError> {
        let mut buf = Vec::with_capacity(READ_CHUNK);
        let mut source = peer;
        let mut destination = client.local_addr()?;

        if self.accept_proxy_protocol.load(Ordering::Relaxed) {
            let timeout = self.proxy_protocol_header_timeout();
            let (header, used) = tokio::time::timeout(timeout, read_proxy_header(client, &mut buf))
                .await
                .map_err(|_| ProxyError::HeaderTimeout)??;
            buf.drain(..used);
            if let (Some(s), Some(d)) = (header.source, header.destination) {
                source = s;
                destination = d;
            }
        }

        // A slow or partial ClientHello falls back to the default backend.
        let complete =
            tokio::time::timeout(self.settings.header_timeout, read_client_hello(client, &mut buf))
                .await;
        let hostname = match complete {
            Ok(Ok(())) => sni::extract_sni(&buf),
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => {
                tracing::debug!(peer = %peer, "Timed out reading ClientHello");
                None
            }
        };

        Ok(Preamble {
            client: source,
            destination,
            hostname,
            buffered: buf,
        })
    }
}

async fn read_more(client: &mut TcpStream, buf: &mut Vec<u8>) -> std::io::Result<usize> {
    let mut chunk = [0u8; READ_CHUNK];
    let n = client.read(&mut chunk).await?;
    buf.extend_from_slice(&chunk[..n]);
    Ok(n)
}

async fn read_proxy_header(
    client: &mut TcpStream,
    buf: &mut Vec<u8>,
) -> Result<(proxy_protocol::ProxyHeader, usize), ProxyError> {
    loop {
        if let Some(parsed) = proxy_protocol::parse_v1(buf)? {
            return Ok(parsed);
        }
        if read_more(client, buf).await? == 0 {
            return Err(std::io::Error::from(std::io::ErrorKind::UnexpectedEof).into());
        }
    }
}

/// Read until the first TLS record is buffered, the data is clearly not
/// TLS, or the client stops sending.
async fn read_client_hello(client: &mut TcpStream, buf: &mut Vec<u8>) -> std::io::Result<()> {
    loop {
        if !buf.is_empty() && !sni::is_handshake(buf) {
            return Ok(());
        }
        if let Some(len) = sni::record_len(buf) {
            if buf.len() >= len {
                return Ok(());
            }
        }
        if buf.len() >= sni::MAX_RECORD_LEN || read_more(client, buf).await? == 0 {
            return Ok(());
        }
    }
}
