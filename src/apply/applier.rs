//! Validate, write and activate a rendered configuration.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::watch;

use crate::config::{ControllerConfig, ReloadMode};
use crate::process::command::{output_text, WorkerCommand};
use crate::render::RenderedArtifact;

use super::diff::log_diff;
use super::{ApplyError, TEMP_PREFIX};

/// Commits rendered configurations to the worker.
///
/// The active file is only ever replaced with content the worker binary has
/// already accepted in test mode.
pub struct Applier {
    command: WorkerCommand,
    temp_dir: PathBuf,
    verbose_diff: bool,
    mode: ReloadMode,
    pushed: watch::Sender<Option<Arc<RenderedArtifact>>>,
}

impl Applier {
    pub fn new(command: WorkerCommand, temp_dir: PathBuf, verbose_diff: bool, mode: ReloadMode) -> Self {
        let (pushed, _) = watch::channel(None);
        Self {
            command,
            temp_dir,
            verbose_diff,
            mode,
            pushed,
        }
    }

    pub fn from_config(config: &ControllerConfig) -> Self {
        Self::new(
            WorkerCommand::from_config(&config.worker),
            config.worker.temp_dir.clone(),
            config.controller.verbose_diff,
            config.worker.reload_mode,
        )
    }

    /// Artifacts published in push mode.
    pub fn subscribe_pushes(&self) -> watch::Receiver<Option<Arc<RenderedArtifact>>> {
        self.pushed.subscribe()
    }

    pub async fn apply(&self, candidate: &RenderedArtifact) -> Result<(), ApplyError> {
        if candidate.is_empty() {
            return Err(ApplyError::Empty);
        }

        let scratch = self.write_scratch(&candidate.content)?;

        let output = self
            .command
            .test(scratch.path())
            .await
            .map_err(ApplyError::Test)?;
        if !output.status.success() {
            let output = output_text(&output);
            let path = match scratch.keep() {
                Ok((_, path)) => path,
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to keep rejected configuration");
                    e.file.path().to_path_buf()
                }
            };
            tracing::warn!(path = %path.display(), "Configuration rejected by worker test");
            return Err(ApplyError::Validation { output, path });
        }

        if self.verbose_diff {
            log_diff(self.command.config_path(), scratch.path()).await;
        }

        write_atomic(self.command.config_path(), &candidate.content)?;
        drop(scratch);

        match self.mode {
            ReloadMode::Signal => {
                let output = self.command.reload().await.map_err(ApplyError::ReloadSpawn)?;
                if !output.status.success() {
                    return Err(ApplyError::Reload(output_text(&output)));
                }
                tracing::info!(checksum = %candidate.checksum, "Worker reloaded");
            }
            ReloadMode::Push => {
                self.pushed.send_replace(Some(Arc::new(candidate.clone())));
                tracing::info!(checksum = %candidate.checksum, "Configuration pushed");
            }
        }

        Ok(())
    }

    fn write_scratch(&self, content: &[u8]) -> Result<tempfile::NamedTempFile, ApplyError> {
        let io_err = |source| ApplyError::Io {
            path: self.temp_dir.clone(),
            source,
        };

        std::fs::create_dir_all(&self.temp_dir).map_err(io_err)?;
        let mut file = tempfile::Builder::new()
            .prefix(TEMP_PREFIX)
            .tempfile_in(&self.temp_dir)
            .map_err(io_err)?;
        file.write_all(content).map_err(io_err)?;
        file.flush().map_err(io_err)?;
        Ok(file)
    }
}

/// Replace `path` with `content` through a rename in the same directory.
pub fn write_atomic(path: &Path, content: &[u8]) -> Result<(), ApplyError> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let io_err = |source| ApplyError::Io {
        path: path.to_path_buf(),
        source,
    };

    let mut file = tempfile::Builder::new()
        .prefix(".worker-cfg")
        .tempfile_in(dir)
        .map_err(io_err)?;
    file.write_all(content).map_err(io_err)?;
    file.as_file().sync_all().map_err(io_err)?;
    file.persist(path).map_err(|e| io_err(e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Worker whose test mode rejects files containing `INVALID` and whose
    /// reload appends to `<config>.reloads`.
    fn fake_worker(dir: &Path) -> WorkerCommand {
        let script = dir.join("worker.sh");
        std::fs::write(
            &script,
            r#"cfg="$2"
case "$3" in
  -t) if grep -q INVALID "$cfg"; then echo "syntax error in $cfg" >&2; exit 1; fi; exit 0 ;;
  -s) echo "$4" >> "$cfg.reloads"; exit 0 ;;
esac
"#,
        )
        .unwrap();
        WorkerCommand::new("/bin/sh", vec![script.display().to_string()], dir.join("worker.conf"))
    }

    fn applier(dir: &Path, mode: ReloadMode) -> Applier {
        Applier::new(fake_worker(dir), dir.join("tmp"), true, mode)
    }

    fn artifact(text: &str) -> RenderedArtifact {
        RenderedArtifact::new(text.as_bytes().to_vec())
    }

    #[tokio::test]
    async fn empty_candidate_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let err = applier(dir.path(), ReloadMode::Signal)
            .apply(&artifact(""))
            .await
            .unwrap_err();
        assert!(matches!(err, ApplyError::Empty));
    }

    #[tokio::test]
    async fn valid_candidate_written_and_reloaded() {
        let dir = tempfile::tempdir().unwrap();
        let a = applier(dir.path(), ReloadMode::Signal);

        a.apply(&artifact("# Configuration checksum: 1\nserver a\n")).await.unwrap();

        let active = std::fs::read_to_string(dir.path().join("worker.conf")).unwrap();
        assert_eq!(active, "# Configuration checksum: 1\nserver a\n");
        let reloads = std::fs::read_to_string(dir.path().join("worker.conf.reloads")).unwrap();
        assert_eq!(reloads.trim(), "reload");

        let leftovers = std::fs::read_dir(dir.path().join("tmp")).unwrap().count();
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn rejected_candidate_leaves_active_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let active = dir.path().join("worker.conf");
        std::fs::write(&active, "known good\n").unwrap();

        let err = applier(dir.path(), ReloadMode::Signal)
            .apply(&artifact("INVALID\n"))
            .await
            .unwrap_err();

        let (output, path) = match err {
            ApplyError::Validation { output, path } => (output, path),
            other => panic!("expected validation error, got {other:?}"),
        };
        assert!(output.contains("syntax error"));
        assert!(path.exists(), "rejected file kept for inspection");
        assert_eq!(std::fs::read_to_string(&active).unwrap(), "known good\n");
        assert!(!dir.path().join("worker.conf.reloads").exists());
    }

    #[tokio::test]
    async fn push_mode_skips_reload() {
        let dir = tempfile::tempdir().unwrap();
        let a = applier(dir.path(), ReloadMode::Push);
        let mut pushes = a.subscribe_pushes();

        let candidate = artifact("server b\n");
        a.apply(&candidate).await.unwrap();

        assert!(pushes.has_changed().unwrap());
        let pushed = pushes.borrow_and_update().clone().unwrap();
        assert_eq!(pushed.checksum, candidate.checksum);
        assert!(!dir.path().join("worker.conf.reloads").exists());
        assert_eq!(
            std::fs::read_to_string(dir.path().join("worker.conf")).unwrap(),
            "server b\n"
        );
    }

    #[tokio::test]
    async fn failed_reload_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("worker.sh");
        std::fs::write(
            &script,
            "case \"$3\" in -t) exit 0 ;; -s) echo 'no worker running' >&2; exit 1 ;; esac\n",
        )
        .unwrap();
        let command = WorkerCommand::new(
            "/bin/sh",
            vec![script.display().to_string()],
            dir.path().join("worker.conf"),
        );
        let a = Applier::new(command, dir.path().join("tmp"), false, ReloadMode::Signal);

        let err = a.apply(&artifact("server c\n")).await.unwrap_err();
        assert!(matches!(err, ApplyError::Reload(ref out) if out.contains("no worker running")));
    }
}
