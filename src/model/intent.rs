//! Routing intent: the desired state the controller reconciles toward.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// The full desired state. Replaced wholesale on every reconciliation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct RoutingIntent {
    /// Virtual hosts, in declaration order.
    pub servers: Vec<Server>,

    /// Backend pools referenced by server locations.
    pub backends: Vec<Backend>,

    /// Hostnames routed as raw TLS without termination.
    pub passthrough_backends: Vec<PassthroughBackend>,
}

impl RoutingIntent {
    /// SHA-256 of the serialised intent, hex encoded.
    pub fn checksum(&self) -> String {
        // Serialising plain data structures cannot fail.
        let bytes = serde_json::to_vec(self).unwrap_or_default();
        hex::encode(Sha256::digest(&bytes))
    }

    /// Look up a backend pool by name.
    pub fn backend(&self, name: &str) -> Option<&Backend> {
        self.backends.iter().find(|b| b.name == name)
    }
}

/// A virtual host.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct Server {
    pub hostname: String,

    /// Name of the secret holding the certificate, if TLS is terminated here.
    pub tls_secret: Option<String>,

    pub locations: Vec<Location>,

    /// Extra names answered by this server.
    pub aliases: Vec<String>,

    /// Redirect between `example.com` and `www.example.com`.
    pub redirect_from_to_www: bool,
}

/// Path to backend mapping inside a server.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct Location {
    pub path: String,
    pub backend: String,
}

/// A named pool of endpoints.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct Backend {
    pub name: String,
    pub endpoints: Vec<Endpoint>,

    /// The service fronting the pool, used to resolve passthrough ports.
    pub service: Option<Service>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Endpoint {
    pub address: String,
    pub port: u16,
}

/// Stable address and declared ports of a backend.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct Service {
    pub cluster_ip: String,
    pub ports: Vec<ServicePort>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct ServicePort {
    #[serde(default)]
    pub name: String,
    pub port: u16,
}

/// A port given either by number or by declared name.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum PortRef {
    Number(u16),
    Name(String),
}

impl PortRef {
    /// Resolve against a service's declared ports.
    ///
    /// Numbers (including numeric strings) resolve to themselves; names must
    /// match a declared port.
    pub fn resolve(&self, service: &Service) -> Option<u16> {
        let number = match self {
            PortRef::Number(n) => Some(*n),
            PortRef::Name(s) => s.parse::<u16>().ok(),
        };

        match number {
            Some(n) => Some(
                service
                    .ports
                    .iter()
                    .find(|sp| sp.port == n)
                    .map(|sp| sp.port)
                    .unwrap_or(n),
            ),
            None => {
                let name = match self {
                    PortRef::Name(s) => s.as_str(),
                    PortRef::Number(_) => return None,
                };
                service.ports.iter().find(|sp| sp.name == name).map(|sp| sp.port)
            }
        }
    }
}

impl std::fmt::Display for PortRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PortRef::Number(n) => write!(f, "{}", n),
            PortRef::Name(s) => f.write_str(s),
        }
    }
}

/// Hostname routed to a backend as raw TCP.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct PassthroughBackend {
    pub hostname: String,

    /// Backend pool name.
    pub backend: String,

    pub port: PortRef,
}
