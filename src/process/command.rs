//! Worker binary control surface.

use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};

use tokio::process::Command;

use crate::config::WorkerConfig;

/// Builds invocations of the worker binary.
///
/// Every invocation is `binary base_args... -c <config> [control args]`.
#[derive(Debug, Clone)]
pub struct WorkerCommand {
    binary: PathBuf,
    base_args: Vec<String>,
    config_path: PathBuf,
}

impl WorkerCommand {
    pub fn new(binary: impl Into<PathBuf>, base_args: Vec<String>, config_path: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            base_args,
            config_path: config_path.into(),
        }
    }

    pub fn from_config(config: &WorkerConfig) -> Self {
        Self::new(
            config.binary.clone(),
            config.base_args.clone(),
            config.config_path.clone(),
        )
    }

    /// Active configuration file.
    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    fn command(&self, config: &Path) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.args(&self.base_args).arg("-c").arg(config);
        cmd
    }

    /// Foreground worker in its own process group, sharing our stdout/stderr.
    pub fn exec(&self) -> Command {
        let mut cmd = self.command(&self.config_path);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .process_group(0);
        cmd
    }

    /// Check a candidate configuration file without loading it.
    pub async fn test(&self, file: &Path) -> std::io::Result<Output> {
        self.command(file).arg("-t").stdin(Stdio::null()).output().await
    }

    /// Ask the running worker to reload the active configuration.
    pub async fn reload(&self) -> std::io::Result<Output> {
        self.signal("reload").await
    }

    /// Ask the running worker to finish in-flight work and exit.
    pub async fn quit(&self) -> std::io::Result<Output> {
        self.signal("quit").await
    }

    async fn signal(&self, name: &str) -> std::io::Result<Output> {
        self.command(&self.config_path)
            .args(["-s", name])
            .stdin(Stdio::null())
            .output()
            .await
    }
}

/// Combined stdout and stderr of a finished invocation.
pub fn output_text(output: &Output) -> String {
    let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
    text.push_str(&String::from_utf8_lossy(&output.stderr));
    text.trim_end().to_string()
}
