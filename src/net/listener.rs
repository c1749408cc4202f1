//! TCP listeners for the passthrough proxy.
//!
//! Concurrency is not capped here; every accepted connection gets its own
//! task and the OS limits are the only bound.

use std::net::{IpAddr, SocketAddr};

use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};

#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("invalid bind address {0:?}")]
    Address(String),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to accept: {0}")]
    Accept(#[source] std::io::Error),
}

/// A bound TCP listener.
pub struct Listener {
    inner: TcpListener,
}

impl Listener {
    pub async fn bind(addr: SocketAddr) -> Result<Self, ListenerError> {
        let inner = TcpListener::bind(addr)
            .await
            .map_err(|source| ListenerError::Bind { addr, source })?;

        let local = inner.local_addr().unwrap_or(addr);
        tracing::info!(address = %local, "Listener bound");

        Ok(Self { inner })
    }

    /// Bind `port` on each of `addresses` (bare IPs, IPv6 optionally bracketed).
    pub async fn bind_all(addresses: &[String], port: u16) -> Result<Vec<Self>, ListenerError> {
        let mut listeners = Vec::with_capacity(addresses.len());
        for raw in addresses {
            let ip: IpAddr = raw
                .trim_start_matches('[')
                .trim_end_matches(']')
                .parse()
                .map_err(|_| ListenerError::Address(raw.clone()))?;
            listeners.push(Self::bind(SocketAddr::new(ip, port)).await?);
        }
        Ok(listeners)
    }

    pub async fn accept(&self) -> Result<(TcpStream, SocketAddr), ListenerError> {
        self.inner.accept().await.map_err(ListenerError::Accept)
    }

    pub fn local_addr(&self) -> Result<SocketAddr, std::io::Error> {
        self.inner.local_addr()
    }
}
