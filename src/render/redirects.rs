//! `www.` redirect pairing.

use std::collections::HashSet;
use serde::Serialize;

use crate::model::Server;

/// A server that only redirects `from` to `to`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Redirect {
    pub from: String,
    pub to: String,
    pub tls_secret: Option<String>,
}

/// Hostname with a leading `www.` added or removed.
pub fn toggle_www(hostname: &str) -> String {
    match hostname.strip_prefix("www.") {
        Some(bare) => bare.to_string(),
        None => format!("www.{}", hostname),
    }
}

/// Build redirect servers for hosts flagged `redirect_from_to_www`.
///
/// A pair is skipped when a server already exists for the paired name, and
/// each paired name is used once (first server wins).
pub fn build_redirects(servers: &[Server]) -> Vec<Redirect> {
    let mut names: HashSet<String> = HashSet::new();
    let mut redirects = Vec::new();

    for srv in servers.iter().filter(|s| s.redirect_from_to_www) {
        let to = srv.hostname.clone();
        let from = toggle_www(&to);

        if servers.iter().any(|s| s.hostname == from) {
            tracing::warn!(
                from = %from,
                to = %to,
                "Server already exists for redirect source, skipping redirect"
            );
            continue;
        }

        if !names.insert(from.clone()) {
            continue;
        }

        tracing::debug!(from = %from, to = %to, "Creating redirect");
        redirects.push(Redirect {
            from,
            to,
            tls_secret: srv.tls_secret.clone(),
        });
    }

    redirects
}
