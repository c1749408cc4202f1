//! Worker process supervision.
//!
//! # State Machine
//! ```text
//! NotStarted → Running → (Crashed → Restarting → Running)* → Stopping → Stopped
//! ```
//!
//! An exit is unexpected unless it happens while stopping or while the
//! controller is shutting down. Only unexpected exits lead to a respawn.

use std::process::ExitStatus;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, watch};

use super::command::{output_text, WorkerCommand};
use super::SupervisorError;
use crate::observability::metrics;

/// Interval between liveness checks while stopping.
const STOP_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Interval between port checks before a respawn.
const PORT_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    NotStarted,
    Running,
    Crashed,
    Restarting,
    Stopping,
    Stopped,
}

/// Exit notification sent by the task waiting on a worker.
#[derive(Debug)]
pub struct WorkerExit {
    pub pid: u32,
    /// `None` if waiting on the child failed.
    pub status: Option<ExitStatus>,
}

/// What the supervisor did about an exit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitDisposition {
    /// Caused by us or by shutdown; nothing was started.
    Expected,
    /// Unexpected exit, a replacement is running.
    Restarted { pid: u32 },
}

struct Inner {
    state: WorkerState,
    pid: Option<u32>,
    restarts: u64,
}

/// Starts, stops and respawns the worker process.
pub struct ProcessSupervisor {
    command: WorkerCommand,
    ports: Vec<u16>,
    port_wait: Duration,
    inner: Mutex<Inner>,
    exits: mpsc::UnboundedSender<WorkerExit>,
    pid_tx: watch::Sender<Option<u32>>,
}

impl ProcessSupervisor {
    /// Create a supervisor and the channel its worker exits are reported on.
    ///
    /// `ports` must be free before a crashed worker is replaced.
    pub fn new(
        command: WorkerCommand,
        ports: Vec<u16>,
        port_wait: Duration,
    ) -> (Self, mpsc::UnboundedReceiver<WorkerExit>) {
        let (exits, exits_rx) = mpsc::unbounded_channel();
        let (pid_tx, _) = watch::channel(None);
        let supervisor = Self {
            command,
            ports,
            port_wait,
            inner: Mutex::new(Inner {
                state: WorkerState::NotStarted,
                pid: None,
                restarts: 0,
            }),
            exits,
            pid_tx,
        };
        (supervisor, exits_rx)
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> WorkerState {
        self.lock().state
    }

    pub fn pid(&self) -> Option<u32> {
        self.lock().pid
    }

    pub fn restarts(&self) -> u64 {
        self.lock().restarts
    }

    /// Follow the live worker pid.
    pub fn subscribe_pid(&self) -> watch::Receiver<Option<u32>> {
        self.pid_tx.subscribe()
    }

    pub fn command(&self) -> &WorkerCommand {
        &self.command
    }

    /// Launch the worker.
    pub fn start(&self) -> Result<u32, SupervisorError> {
        let mut inner = self.lock();
        match inner.state {
            WorkerState::NotStarted | WorkerState::Crashed | WorkerState::Restarting => {}
            state => return Err(SupervisorError::InvalidState(state)),
        }

        let mut child = self.command.exec().spawn().map_err(SupervisorError::Spawn)?;
        let Some(pid) = child.id() else {
            return Err(SupervisorError::NoPid);
        };

        let exits = self.exits.clone();
        tokio::spawn(async move {
            let status = match child.wait().await {
                Ok(status) => Some(status),
                Err(e) => {
                    tracing::error!(pid = pid, error = %e, "Failed to wait for worker");
                    None
                }
            };
            let _ = exits.send(WorkerExit { pid, status });
        });

        inner.state = WorkerState::Running;
        inner.pid = Some(pid);
        let _ = self.pid_tx.send(Some(pid));

        tracing::info!(pid = pid, "Worker started");
        Ok(pid)
    }

    /// Classify an exit and respawn the worker if it was unexpected.
    ///
    /// `shutting_down` is the controller's shutdown flag; any exit observed
    /// while it is set is expected.
    pub async fn handle_exit(
        &self,
        exit: WorkerExit,
        shutting_down: bool,
    ) -> Result<ExitDisposition, SupervisorError> {
        {
            let mut inner = self.lock();

            if inner.pid != Some(exit.pid) {
                tracing::debug!(pid = exit.pid, "Ignoring exit of previous worker");
                return Ok(ExitDisposition::Expected);
            }

            if shutting_down
                || matches!(inner.state, WorkerState::Stopping | WorkerState::Stopped)
            {
                tracing::info!(pid = exit.pid, status = ?exit.status, "Worker exited during shutdown");
                return Ok(ExitDisposition::Expected);
            }

            tracing::warn!(pid = exit.pid, status = ?exit.status, "Worker exited unexpectedly");
            inner.state = WorkerState::Crashed;
            inner.pid = None;
            let _ = self.pid_tx.send(None);
            inner.state = WorkerState::Restarting;
        }

        if let Err(e) = wait_for_ports(&self.ports, self.port_wait).await {
            self.lock().state = WorkerState::Crashed;
            return Err(e);
        }

        let pid = match self.start() {
            Ok(pid) => pid,
            Err(e) => {
                self.lock().state = WorkerState::Crashed;
                return Err(e);
            }
        };

        self.lock().restarts += 1;
        metrics::record_worker_restart();
        tracing::info!(pid = pid, "Worker restarted");

        Ok(ExitDisposition::Restarted { pid })
    }

    /// Ask the worker to quit and wait until it is gone.
    pub async fn stop(&self) -> Result<(), SupervisorError> {
        let pid = {
            let mut inner = self.lock();
            match inner.state {
                WorkerState::NotStarted | WorkerState::Stopped => return Ok(()),
                _ => inner.state = WorkerState::Stopping,
            }
            inner.pid
        };

        let Some(pid) = pid else {
            self.lock().state = WorkerState::Stopped;
            return Ok(());
        };

        tracing::info!(pid = pid, "Stopping worker");
        match self.command.quit().await {
            Ok(out) if out.status.success() => {}
            Ok(out) => {
                tracing::warn!(output = %output_text(&out), "Quit command failed, signalling worker");
                send_signal(pid, libc::SIGQUIT)?;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Quit command failed, signalling worker");
                send_signal(pid, libc::SIGQUIT)?;
            }
        }

        let mut ticker = tokio::time::interval(STOP_POLL_INTERVAL);
        while is_alive(pid) {
            ticker.tick().await;
        }

        let mut inner = self.lock();
        inner.state = WorkerState::Stopped;
        inner.pid = None;
        let _ = self.pid_tx.send(None);
        tracing::info!(pid = pid, "Worker stopped");

        Ok(())
    }
}

fn send_signal(pid: u32, signal: libc::c_int) -> Result<(), SupervisorError> {
    let pid = libc::pid_t::try_from(pid).map_err(|_| SupervisorError::NoPid)?;
    // SAFETY: kill has no memory-safety preconditions.
    let rc = unsafe { libc::kill(pid, signal) };
    if rc != 0 {
        return Err(SupervisorError::Signal(std::io::Error::last_os_error()));
    }
    Ok(())
}

/// Whether a process with `pid` still exists.
pub fn is_alive(pid: u32) -> bool {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    // SAFETY: signal 0 only performs the existence and permission check.
    let rc = unsafe { libc::kill(pid, 0) };
    rc == 0 || std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

/// Whether some listener already holds `port` on any address.
fn port_in_use(port: u16) -> bool {
    match std::net::TcpListener::bind(("0.0.0.0", port)) {
        Ok(_) => false,
        Err(e) => e.kind() == std::io::ErrorKind::AddrInUse,
    }
}

/// Wait until none of `ports` is held by a listener.
pub async fn wait_for_ports(ports: &[u16], timeout: Duration) -> Result<(), SupervisorError> {
    let deadline = tokio::time::Instant::now() + timeout;

    loop {
        let busy: Vec<u16> = ports.iter().copied().filter(|p| port_in_use(*p)).collect();
        if busy.is_empty() {
            return Ok(());
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(SupervisorError::PortsBusy(busy));
        }
        tracing::debug!(ports = ?busy, "Waiting for worker ports to be released");
        tokio::time::sleep(PORT_POLL_INTERVAL).await;
    }
}
