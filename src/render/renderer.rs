//! Routing intent to worker configuration.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use sha2::{Digest, Sha256};

use crate::config::ControllerConfig;
use crate::model::{BackendConfiguration, RoutingIntent};
use crate::net::TcpServer;
use crate::store::Store;

use super::capacity::{derive_worker_limits, is_ipv6_enabled, rlimit_max_num_files, somaxconn};
use super::hash::adjust_hash_sizes;
use super::passthrough::build_passthrough_servers;
use super::redirects::build_redirects;
use super::template::{ListenPorts, RenderedArtifact, TemplateConfig, TemplateWriter};
use super::RenderError;

/// Key inside the DH parameter secret.
const DH_PARAM_KEY: &str = "dhparam.pem";

/// DH parameters the rendered configuration refers to.
///
/// Nothing is written while rendering; the file is placed only when the
/// configuration is about to be activated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DhParam {
    pub path: PathBuf,
    pub pem: Vec<u8>,
}

/// Output of one render pass.
#[derive(Debug, Clone)]
pub struct Rendered {
    pub artifact: RenderedArtifact,
    /// Resolved passthrough targets, swapped into the proxy after apply.
    pub passthrough: Vec<TcpServer>,
    pub dh_param: Option<DhParam>,
}

/// Static inputs to rendering taken from the controller configuration.
#[derive(Debug, Clone)]
pub struct RenderSettings {
    pub bind_addresses: Vec<String>,
    pub listen_ports: ListenPorts,
    pub passthrough_enabled: bool,
    pub ssl_dir: PathBuf,
    pub health_path: String,
    pub status_path: String,
}

impl RenderSettings {
    pub fn from_config(config: &ControllerConfig) -> Self {
        let listen = &config.listen;
        Self {
            bind_addresses: listen.bind_addresses.clone(),
            listen_ports: ListenPorts {
                http: listen.http_port,
                https: listen.https_port,
                status: listen.status_port,
                default: listen.default_server_port,
                ssl_proxy: listen.ssl_proxy_port,
            },
            passthrough_enabled: config.passthrough.enabled,
            ssl_dir: config.worker.ssl_dir.clone(),
            health_path: "/healthz".to_string(),
            status_path: "/nginx_status".to_string(),
        }
    }
}

/// Builds [`RenderedArtifact`]s from the current intent.
///
/// Store lookups that fail degrade the matching feature for this pass only;
/// only template failures abort the render.
pub struct ConfigRenderer {
    store: Arc<dyn Store>,
    template: Box<dyn TemplateWriter>,
    settings: RenderSettings,
}

impl ConfigRenderer {
    pub fn new(
        store: Arc<dyn Store>,
        template: Box<dyn TemplateWriter>,
        settings: RenderSettings,
    ) -> Self {
        Self {
            store,
            template,
            settings,
        }
    }

    pub fn render(
        &self,
        mut cfg: BackendConfiguration,
        intent: &RoutingIntent,
    ) -> Result<Rendered, RenderError> {
        let proxy_set_headers = self.header_map(cfg.proxy_set_headers.as_deref());
        let add_headers = self.header_map(cfg.add_headers.as_deref());

        let dh_param = match cfg.ssl_dh_param.as_deref() {
            Some(name) => match self.dh_param(name) {
                Ok(dh) => Some(dh),
                Err(e) => {
                    tracing::warn!(secret = %name, error = %e, "DH parameters disabled for this sync");
                    None
                }
            },
            None => None,
        };

        let passthrough = if self.settings.passthrough_enabled {
            build_passthrough_servers(intent)
        } else {
            Vec::new()
        };

        let redirects = build_redirects(&intent.servers);
        adjust_hash_sizes(&mut cfg, &intent.servers);
        derive_worker_limits(&mut cfg, rlimit_max_num_files());

        let is_ipv6_enabled = !cfg.disable_ipv6 && is_ipv6_enabled();

        let template_cfg = TemplateConfig {
            intent_checksum: intent.checksum(),
            backend: cfg,
            proxy_set_headers,
            add_headers,
            backlog_size: somaxconn(),
            backends: intent.backends.clone(),
            servers: intent.servers.clone(),
            redirects,
            passthrough_backends: passthrough.clone(),
            bind_addresses: self.settings.bind_addresses.clone(),
            listen_ports: self.settings.listen_ports.clone(),
            is_ipv6_enabled,
            is_ssl_passthrough_enabled: self.settings.passthrough_enabled,
            dh_param_file: dh_param.as_ref().map(|dh| dh.path.clone()),
            health_path: self.settings.health_path.clone(),
            status_path: self.settings.status_path.clone(),
        };

        let content = self.template.write(&template_cfg)?;
        let artifact = RenderedArtifact::new(content);

        tracing::debug!(
            checksum = %artifact.checksum,
            bytes = artifact.content.len(),
            servers = template_cfg.servers.len(),
            "Configuration rendered"
        );

        Ok(Rendered {
            artifact,
            passthrough,
            dh_param,
        })
    }

    /// Header map referenced by name; empty when absent or missing.
    fn header_map(&self, name: Option<&str>) -> BTreeMap<String, String> {
        let Some(name) = name else {
            return BTreeMap::new();
        };

        match self.store.get_config_map(name) {
            Ok(data) => data.into_iter().collect(),
            Err(e) => {
                tracing::warn!(config_map = %name, error = %e, "Using empty header map");
                BTreeMap::new()
            }
        }
    }

    /// DH parameters from the named secret.
    fn dh_param(&self, name: &str) -> Result<DhParam, RenderError> {
        let secret = self.store.get_secret(name)?;
        let pem = secret.get(DH_PARAM_KEY).ok_or_else(|| RenderError::MissingSecretKey {
            secret: name.to_string(),
            key: DH_PARAM_KEY,
        })?;

        Ok(DhParam {
            path: dh_param_path(&self.settings.ssl_dir, name, pem),
            pem: pem.clone(),
        })
    }
}

/// File a DH parameter secret is written to.
///
/// The name carries a digest of the content, so a candidate with new
/// parameters never overwrites the file the active configuration uses.
pub fn dh_param_path(ssl_dir: &Path, secret: &str, pem: &[u8]) -> PathBuf {
    let digest = hex::encode(Sha256::digest(pem));
    ssl_dir.join(format!("{}-{}.pem", secret.replace('/', "-"), &digest[..12]))
}
