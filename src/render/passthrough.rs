//! Passthrough backend list construction.

use crate::model::RoutingIntent;
use crate::net::TcpServer;

/// Resolve passthrough entries to concrete TCP targets.
///
/// Entries whose backend, service or port cannot be resolved are skipped.
pub fn build_passthrough_servers(intent: &RoutingIntent) -> Vec<TcpServer> {
    let mut servers = Vec::with_capacity(intent.passthrough_backends.len());

    for pb in &intent.passthrough_backends {
        let Some(service) = intent.backend(&pb.backend).and_then(|b| b.service.as_ref()) else {
            tracing::warn!(
                hostname = %pb.hostname,
                backend = %pb.backend,
                "Missing service for passthrough backend"
            );
            continue;
        };

        let Some(port) = pb.port.resolve(service) else {
            tracing::warn!(
                hostname = %pb.hostname,
                backend = %pb.backend,
                port = %pb.port,
                "Passthrough port not declared by service"
            );
            continue;
        };

        servers.push(TcpServer {
            hostname: pb.hostname.clone(),
            address: service.cluster_ip.clone(),
            port,
            proxy_protocol: false,
        });
    }

    servers
}
