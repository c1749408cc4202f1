//! Reaping of orphaned child processes.
//!
//! When the controller runs as the container's init process, orphans of
//! tools spawned by the worker are re-parented to us and linger as zombies.
//! The reaper collects them without touching the worker's exit status, which
//! belongs to the supervisor.

#[cfg(target_os = "linux")]
use std::collections::HashSet;
use std::time::Duration;

use tokio::sync::watch;

use crate::lifecycle::StopSignal;

/// How often the reaper looks for zombies.
pub const REAP_INTERVAL: Duration = Duration::from_secs(1);

/// Pid of some exited child that has not been waited for, without reaping it.
#[cfg(target_os = "linux")]
fn peek_zombie() -> Option<libc::pid_t> {
    // SAFETY: siginfo_t is plain data; waitid fills it in.
    let mut info: libc::siginfo_t = unsafe { std::mem::zeroed() };
    let rc = unsafe {
        libc::waitid(
            libc::P_ALL,
            0,
            &mut info,
            libc::WEXITED | libc::WNOHANG | libc::WNOWAIT,
        )
    };
    if rc != 0 {
        return None;
    }
    // SAFETY: waitid succeeded, so si_pid is initialised (0 if nothing exited).
    let pid = unsafe { info.si_pid() };
    (pid > 0).then_some(pid)
}

#[cfg(target_os = "linux")]
fn reap(pid: libc::pid_t) -> bool {
    let mut status = 0;
    // SAFETY: waitpid only writes the status word.
    unsafe { libc::waitpid(pid, &mut status, libc::WNOHANG) == pid }
}

/// Reap zombies other than the worker until `stop` fires.
///
/// Our own short-lived commands are reaped by the runtime as soon as they
/// exit, so a zombie is only collected once it has survived a full interval.
#[cfg(target_os = "linux")]
pub async fn run_reaper(worker_pid: watch::Receiver<Option<u32>>, mut stop: StopSignal) {
    let mut seen: HashSet<libc::pid_t> = HashSet::new();
    let mut ticker = tokio::time::interval(REAP_INTERVAL);

    tracing::info!("Orphan reaper started");
    loop {
        tokio::select! {
            _ = stop.wait() => break,
            _ = ticker.tick() => {}
        }

        let worker = (*worker_pid.borrow()).and_then(|p| libc::pid_t::try_from(p).ok());
        let mut lingering = HashSet::new();

        while let Some(pid) = peek_zombie() {
            if Some(pid) == worker || !seen.contains(&pid) {
                lingering.insert(pid);
                break;
            }
            if reap(pid) {
                tracing::debug!(pid = pid, "Reaped orphaned process");
            } else {
                break;
            }
        }

        seen = lingering;
    }
    tracing::info!("Orphan reaper stopped");
}

#[cfg(not(target_os = "linux"))]
pub async fn run_reaper(_worker_pid: watch::Receiver<Option<u32>>, mut stop: StopSignal) {
    tracing::warn!("Orphan reaping is only supported on Linux");
    stop.wait().await;
}
