//! Structured worker configuration and the templating seam.
//!
//! The renderer assembles a [`TemplateConfig`]; a [`TemplateWriter`] turns it
//! into the byte-exact text the worker loads. [`JsonTemplate`] is the built-in
//! writer.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::model::{Backend, BackendConfiguration, Server};
use crate::net::TcpServer;

use super::redirects::Redirect;
use super::RenderError;

/// Prefix of the first line of every rendered artifact.
///
/// The diff step ignores lines starting with it.
pub const CHECKSUM_LINE_PREFIX: &str = "# Configuration checksum:";

/// Ports the worker listens on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ListenPorts {
    pub http: u16,
    pub https: u16,
    pub status: u16,
    pub default: u16,
    pub ssl_proxy: u16,
}

/// Everything the template needs to produce the worker configuration.
#[derive(Debug, Clone, Serialize)]
pub struct TemplateConfig {
    /// Checksum of the routing intent this configuration was built from.
    pub intent_checksum: String,
    pub backend: BackendConfiguration,
    pub proxy_set_headers: BTreeMap<String, String>,
    pub add_headers: BTreeMap<String, String>,
    pub backlog_size: usize,
    pub backends: Vec<Backend>,
    pub servers: Vec<Server>,
    pub redirects: Vec<Redirect>,
    pub passthrough_backends: Vec<TcpServer>,
    pub bind_addresses: Vec<String>,
    pub listen_ports: ListenPorts,
    pub is_ipv6_enabled: bool,
    pub is_ssl_passthrough_enabled: bool,
    pub dh_param_file: Option<PathBuf>,
    pub health_path: String,
    pub status_path: String,
}

/// Turns a [`TemplateConfig`] into configuration text.
pub trait TemplateWriter: Send + Sync {
    fn write(&self, cfg: &TemplateConfig) -> Result<Vec<u8>, RenderError>;
}

/// Writes the configuration as pretty JSON behind a checksum comment line.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonTemplate;

impl TemplateWriter for JsonTemplate {
    fn write(&self, cfg: &TemplateConfig) -> Result<Vec<u8>, RenderError> {
        let mut out = format!("{} {}\n", CHECKSUM_LINE_PREFIX, cfg.intent_checksum).into_bytes();
        serde_json::to_writer_pretty(&mut out, cfg)
            .map_err(|e| RenderError::Template(e.to_string()))?;
        out.push(b'\n');
        Ok(out)
    }
}

/// Configuration text plus its content checksum.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedArtifact {
    pub content: Vec<u8>,
    pub checksum: String,
}

impl RenderedArtifact {
    pub fn new(content: Vec<u8>) -> Self {
        let checksum = hex::encode(Sha256::digest(&content));
        Self { content, checksum }
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }
}
