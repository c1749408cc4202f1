//! Removal of stale scratch files.

use std::path::Path;
use std::time::{Duration, SystemTime};

use crate::lifecycle::StopSignal;

use super::TEMP_PREFIX;

/// Remove scratch files in `dir` older than `retention`.
///
/// Returns the number of files removed. A missing directory is not an error.
pub fn clean_temp_files(dir: &Path, retention: Duration) -> std::io::Result<usize> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e),
    };

    let now = SystemTime::now();
    let mut removed = 0;

    for entry in entries {
        let entry = entry?;
        if !entry.file_name().to_string_lossy().starts_with(TEMP_PREFIX) {
            continue;
        }

        let meta = entry.metadata()?;
        if !meta.is_file() {
            continue;
        }

        let age = now
            .duration_since(meta.modified()?)
            .unwrap_or(Duration::ZERO);
        if age > retention {
            std::fs::remove_file(entry.path())?;
            tracing::debug!(path = %entry.path().display(), "Removed stale scratch file");
            removed += 1;
        }
    }

    Ok(removed)
}

/// Periodically clean `dir` until `stop` fires.
pub async fn run_janitor(
    dir: std::path::PathBuf,
    retention: Duration,
    interval: Duration,
    mut stop: StopSignal,
) {
    let mut ticker = tokio::time::interval(interval);
    // The first tick completes immediately; files are at most seconds old then.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match clean_temp_files(&dir, retention) {
                    Ok(0) => {}
                    Ok(n) => tracing::info!(removed = n, "Scratch files cleaned"),
                    Err(e) => tracing::error!(error = %e, "Unexpected error removing scratch files"),
                }
            }
            _ = stop.wait() => {
                tracing::debug!("Janitor stopping");
                break;
            }
        }
    }
}
