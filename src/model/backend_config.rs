//! Global worker tuning read from a key/value configuration source.

use std::collections::HashMap;
use std::str::FromStr;
use serde::{Deserialize, Serialize};

/// Read-only snapshot of the global worker options.
///
/// Zero means "not configured" for the sizing and capacity options; the
/// renderer derives a value for those.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct BackendConfiguration {
    pub server_name_hash_bucket_size: usize,
    pub server_name_hash_max_size: usize,
    pub max_worker_open_files: usize,
    pub max_worker_connections: usize,

    /// "auto" or a number.
    pub worker_processes: String,

    /// Config map holding headers set on proxied requests.
    pub proxy_set_headers: Option<String>,

    /// Config map holding headers added to responses.
    pub add_headers: Option<String>,

    /// Secret holding `dhparam.pem`.
    pub ssl_dh_param: Option<String>,

    pub use_proxy_protocol: bool,
    pub proxy_protocol_header_timeout_secs: u64,
    pub disable_ipv6: bool,
}

impl Default for BackendConfiguration {
    fn default() -> Self {
        Self {
            server_name_hash_bucket_size: 0,
            server_name_hash_max_size: 1024,
            max_worker_open_files: 0,
            max_worker_connections: 16384,
            worker_processes: "auto".to_string(),
            proxy_set_headers: None,
            add_headers: None,
            ssl_dh_param: None,
            use_proxy_protocol: false,
            proxy_protocol_header_timeout_secs: 5,
            disable_ipv6: false,
        }
    }
}

impl BackendConfiguration {
    /// Build from the kebab-case key/value options.
    ///
    /// Unknown keys and malformed values are logged and the default kept.
    pub fn from_map(data: &HashMap<String, String>) -> Self {
        let mut cfg = Self::default();

        for (key, value) in data {
            let value = value.trim();
            match key.as_str() {
                "server-name-hash-bucket-size" => {
                    parse_into(key, value, &mut cfg.server_name_hash_bucket_size)
                }
                "server-name-hash-max-size" => {
                    parse_into(key, value, &mut cfg.server_name_hash_max_size)
                }
                "max-worker-open-files" => parse_into(key, value, &mut cfg.max_worker_open_files),
                "max-worker-connections" => {
                    parse_into(key, value, &mut cfg.max_worker_connections)
                }
                "worker-processes" => cfg.worker_processes = value.to_string(),
                "proxy-set-headers" => cfg.proxy_set_headers = non_empty(value),
                "add-headers" => cfg.add_headers = non_empty(value),
                "ssl-dh-param" => cfg.ssl_dh_param = non_empty(value),
                "use-proxy-protocol" => parse_into(key, value, &mut cfg.use_proxy_protocol),
                "proxy-protocol-header-timeout" => {
                    parse_into(key, value, &mut cfg.proxy_protocol_header_timeout_secs)
                }
                "disable-ipv6" => parse_into(key, value, &mut cfg.disable_ipv6),
                _ => tracing::debug!(key = %key, "Ignoring unknown configuration option"),
            }
        }

        cfg
    }
}

fn parse_into<T: FromStr>(key: &str, value: &str, slot: &mut T) {
    match value.parse::<T>() {
        Ok(v) => *slot = v,
        Err(_) => tracing::warn!(key = %key, value = %value, "Invalid configuration value, keeping default"),
    }
}

fn non_empty(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}
