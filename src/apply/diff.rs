//! Configuration diff logging.
//!
//! Purely informational: any failure here is logged and ignored.

use std::path::Path;

use tokio::process::Command;

use crate::render::template::CHECKSUM_LINE_PREFIX;

/// Log a unified diff between the active configuration and a candidate.
///
/// Lines carrying the configuration checksum are ignored.
pub async fn log_diff(active: &Path, candidate: &Path) {
    if !active.exists() {
        tracing::info!(path = %active.display(), "No active configuration to diff against");
        return;
    }

    let ignore = format!("^{}.*", CHECKSUM_LINE_PREFIX);
    let output = Command::new("diff")
        .arg("-u")
        .arg("-I")
        .arg(&ignore)
        .arg(active)
        .arg(candidate)
        .output()
        .await;

    let output = match output {
        Ok(o) => o,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to run diff");
            return;
        }
    };

    // 0: identical, 1: differences, anything else: trouble.
    match output.status.code() {
        Some(0) => tracing::info!("Configuration unchanged"),
        Some(1) => tracing::info!(
            diff = %String::from_utf8_lossy(&output.stdout),
            "Configuration changes"
        ),
        _ => tracing::warn!(
            stderr = %String::from_utf8_lossy(&output.stderr),
            "diff failed"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn diff_never_fails() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a");
        let b = dir.path().join("b");
        std::fs::write(&a, "# Configuration checksum: 1\nx\n").unwrap();
        std::fs::write(&b, "# Configuration checksum: 2\ny\n").unwrap();

        log_diff(&a, &b).await;
        log_diff(&dir.path().join("missing"), &b).await;
        log_diff(&a, &dir.path().join("missing")).await;
    }
}
