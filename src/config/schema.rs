//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the
//! controller process. All types derive Serde traits for deserialization
//! from the TOML config file.

use std::path::PathBuf;
use serde::{Deserialize, Serialize};

/// Root configuration for the ingress controller.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ControllerConfig {
    /// Bind addresses and listen ports handed to the worker.
    pub listen: ListenConfig,

    /// Worker binary and file layout.
    pub worker: WorkerConfig,

    /// Sync queue pacing.
    pub queue: QueueConfig,

    /// Control loop behaviour.
    pub controller: ControlLoopConfig,

    /// TLS passthrough proxy settings.
    pub passthrough: PassthroughConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ListenConfig {
    /// Addresses the worker and the passthrough proxy bind to.
    pub bind_addresses: Vec<String>,

    /// Plain HTTP port served by the worker.
    pub http_port: u16,

    /// Public HTTPS port. Owned by the passthrough proxy when it is enabled.
    pub https_port: u16,

    /// Worker status page port.
    pub status_port: u16,

    /// Catch-all server port.
    pub default_server_port: u16,

    /// Internal port the worker terminates TLS on behind the passthrough proxy.
    pub ssl_proxy_port: u16,

    /// Controller health/status surface.
    pub health_address: String,
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            bind_addresses: vec!["0.0.0.0".to_string()],
            http_port: 80,
            https_port: 443,
            status_port: 18080,
            default_server_port: 8181,
            ssl_proxy_port: 442,
            health_address: "0.0.0.0:10254".to_string(),
        }
    }
}

impl ListenConfig {
    /// Ports the worker process listens on, used to wait for them to free up
    /// before a respawn.
    pub fn worker_ports(&self, passthrough_enabled: bool) -> Vec<u16> {
        let mut ports = vec![self.http_port, self.status_port, self.default_server_port];
        if passthrough_enabled {
            ports.push(self.ssl_proxy_port);
        } else {
            ports.push(self.https_port);
        }
        ports
    }
}

/// How a validated configuration is activated in the worker.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ReloadMode {
    /// Run the worker binary's reload command after the file is replaced.
    #[default]
    Signal,
    /// Publish the artifact on a side channel; no reload is issued.
    Push,
}

/// Worker binary configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Path to the worker binary.
    pub binary: PathBuf,

    /// Arguments placed before the control arguments on every invocation.
    pub base_args: Vec<String>,

    /// Active configuration file.
    pub config_path: PathBuf,

    /// Directory for validation and diff scratch files.
    pub temp_dir: PathBuf,

    /// Directory DH parameter files are written to.
    pub ssl_dir: PathBuf,

    /// Reload strategy.
    pub reload_mode: ReloadMode,

    /// Seconds to wait for listen ports to free up before a respawn.
    pub port_wait_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("/usr/sbin/nginx"),
            base_args: Vec::new(),
            config_path: PathBuf::from("/etc/nginx/nginx.conf"),
            temp_dir: std::env::temp_dir().join("ingress"),
            ssl_dir: PathBuf::from("/etc/ingress-controller/ssl"),
            reload_mode: ReloadMode::Signal,
            port_wait_secs: 30,
        }
    }
}

/// Sync queue configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Reconciliations permitted per second.
    pub sync_rate_limit: f64,

    /// Token bucket capacity.
    pub burst: u32,

    /// Base delay before a failed key is retried, in milliseconds.
    pub retry_base_delay_ms: u64,

    /// Maximum retry delay, in milliseconds.
    pub retry_max_delay_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            sync_rate_limit: 0.3,
            burst: 1,
            retry_base_delay_ms: 1000,
            retry_max_delay_ms: 30_000,
        }
    }
}

/// Control loop configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ControlLoopConfig {
    /// Seconds to wait before signalling the worker on shutdown.
    pub shutdown_grace_period_secs: u64,

    /// Log a diff of every configuration change.
    pub verbose_diff: bool,

    /// Age after which leftover scratch files are removed, in seconds.
    pub temp_retention_secs: u64,

    /// How often the scratch janitor runs, in seconds.
    pub janitor_interval_secs: u64,

    /// Routing intent file loaded into the store and watched for changes.
    pub intent_file: Option<PathBuf>,

    /// Additional files whose changes trigger a reconciliation.
    pub watch_files: Vec<PathBuf>,

    /// Capacity of the change-notification buffer.
    pub event_buffer: usize,

    /// Reap orphaned child processes other than the worker.
    pub reap_orphans: bool,
}

impl Default for ControlLoopConfig {
    fn default() -> Self {
        Self {
            shutdown_grace_period_secs: 0,
            verbose_diff: false,
            temp_retention_secs: 300,
            janitor_interval_secs: 300,
            intent_file: None,
            watch_files: Vec::new(),
            event_buffer: 1024,
            reap_orphans: false,
        }
    }
}

/// TLS passthrough configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PassthroughConfig {
    /// Route TLS by SNI on the HTTPS port.
    pub enabled: bool,

    /// Seconds allowed for the proxy-protocol header and ClientHello to arrive.
    pub header_timeout_secs: u64,

    /// Seconds allowed to connect to the selected backend.
    pub connect_timeout_secs: u64,
}

impl Default for PassthroughConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            header_timeout_secs: 5,
            connect_timeout_secs: 5,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Emit JSON log lines.
    pub json_logs: bool,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
