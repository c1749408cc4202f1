//! Read-only view of the declarative state.
//!
//! The watch/cache layer that keeps this view current lives outside the
//! controller; the reconciliation path only ever reads snapshots through the
//! [`Store`] trait.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use arc_swap::ArcSwap;
use dashmap::DashMap;
use serde::Deserialize;
use thiserror::Error;

use crate::model::{BackendConfiguration, RoutingIntent};

/// Errors returned by store lookups.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("config map {0:?} not found")]
    ConfigMapNotFound(String),

    #[error("secret {0:?} not found")]
    SecretNotFound(String),

    #[error("failed to read intent file {path:?}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse intent file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Snapshot access to config maps, secrets and the routing intent.
pub trait Store: Send + Sync {
    fn get_config_map(&self, name: &str) -> Result<HashMap<String, String>, StoreError>;

    fn get_secret(&self, name: &str) -> Result<HashMap<String, Vec<u8>>, StoreError>;

    fn get_backend_configuration(&self) -> BackendConfiguration;

    /// Currently known servers, backends and passthrough entries.
    fn routing_intent(&self) -> RoutingIntent;
}

/// Store backed by concurrent maps, fed by the caller.
pub struct InMemoryStore {
    config_maps: DashMap<String, HashMap<String, String>>,
    secrets: DashMap<String, HashMap<String, Vec<u8>>>,
    backend_config: ArcSwap<BackendConfiguration>,
    intent: ArcSwap<RoutingIntent>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self {
            config_maps: DashMap::new(),
            secrets: DashMap::new(),
            backend_config: ArcSwap::from_pointee(BackendConfiguration::default()),
            intent: ArcSwap::from_pointee(RoutingIntent::default()),
        }
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_config_map(&self, name: impl Into<String>, data: HashMap<String, String>) {
        self.config_maps.insert(name.into(), data);
    }

    pub fn set_secret(&self, name: impl Into<String>, data: HashMap<String, Vec<u8>>) {
        self.secrets.insert(name.into(), data);
    }

    pub fn set_backend_configuration(&self, cfg: BackendConfiguration) {
        self.backend_config.store(Arc::new(cfg));
    }

    pub fn set_routing_intent(&self, intent: RoutingIntent) {
        self.intent.store(Arc::new(intent));
    }

    /// Replace the store's contents with those of an intent file.
    ///
    /// Nothing is changed if the file cannot be read or parsed.
    pub fn load_intent_file(&self, path: &Path) -> Result<(), StoreError> {
        let content = std::fs::read_to_string(path).map_err(|source| StoreError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let file: IntentFile = toml::from_str(&content)?;

        tracing::info!(
            path = %path.display(),
            servers = file.intent.servers.len(),
            backends = file.intent.backends.len(),
            passthrough = file.intent.passthrough_backends.len(),
            config_maps = file.config_maps.len(),
            secrets = file.secrets.len(),
            "Routing intent loaded"
        );

        self.set_backend_configuration(BackendConfiguration::from_map(&file.configuration));
        self.config_maps.clear();
        for (name, data) in file.config_maps {
            self.set_config_map(name, data);
        }
        self.secrets.clear();
        for (name, data) in file.secrets {
            let data = data
                .into_iter()
                .map(|(k, v)| (k, v.into_bytes()))
                .collect();
            self.set_secret(name, data);
        }
        self.set_routing_intent(file.intent);
        Ok(())
    }
}

/// On-disk layout of the intent file.
///
/// ```toml
/// [configuration]
/// server-name-hash-bucket-size = "128"
///
/// [config_maps."ingress/custom-headers"]
/// X-Request-Start = "t=${msec}"
///
/// [[servers]]
/// hostname = "app.example.com"
/// ```
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct IntentFile {
    #[serde(flatten)]
    intent: RoutingIntent,

    /// Global options, kebab-case keys as in the configuration map.
    configuration: HashMap<String, String>,

    config_maps: HashMap<String, HashMap<String, String>>,

    /// Secret values as text.
    secrets: HashMap<String, HashMap<String, String>>,
}

impl Store for InMemoryStore {
    fn get_config_map(&self, name: &str) -> Result<HashMap<String, String>, StoreError> {
        self.config_maps
            .get(name)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| StoreError::ConfigMapNotFound(name.to_string()))
    }

    fn get_secret(&self, name: &str) -> Result<HashMap<String, Vec<u8>>, StoreError> {
        self.secrets
            .get(name)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| StoreError::SecretNotFound(name.to_string()))
    }

    fn get_backend_configuration(&self) -> BackendConfiguration {
        self.backend_config.load().as_ref().clone()
    }

    fn routing_intent(&self) -> RoutingIntent {
        self.intent.load().as_ref().clone()
    }
}
