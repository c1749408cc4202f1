//! Worker capacity limits and host probes.

use crate::model::BackendConfiguration;

/// File descriptors left for the controller itself.
const RESERVED_FILES: u64 = 1024;

/// Floor for the per-worker open file limit.
const MIN_OPEN_FILES: u64 = 1024;

/// Fallback listen backlog when the kernel value cannot be read.
const DEFAULT_BACKLOG: usize = 511;

/// Fill in open-file and connection limits that were not configured.
///
/// `fd_limit` is the process's hard `RLIMIT_NOFILE`.
pub fn derive_worker_limits(cfg: &mut BackendConfiguration, fd_limit: u64) {
    if cfg.max_worker_open_files == 0 {
        let max_open_files = fd_limit.saturating_sub(RESERVED_FILES).max(MIN_OPEN_FILES);
        tracing::debug!(value = max_open_files, "Adjusting max_worker_open_files");
        cfg.max_worker_open_files = usize::try_from(max_open_files).unwrap_or(usize::MAX);
    }

    if cfg.max_worker_connections == 0 {
        let connections = cfg.max_worker_open_files.saturating_mul(3) / 4;
        tracing::debug!(value = connections, "Adjusting max_worker_connections");
        cfg.max_worker_connections = connections;
    }
}

/// Hard limit on open file descriptors for this process.
pub fn rlimit_max_num_files() -> u64 {
    let mut limit = libc::rlimit {
        rlim_cur: 0,
        rlim_max: 0,
    };
    // SAFETY: getrlimit only writes into the struct we pass.
    let rc = unsafe { libc::getrlimit(libc::RLIMIT_NOFILE, &mut limit) };
    if rc != 0 {
        tracing::warn!(
            error = %std::io::Error::last_os_error(),
            "Failed to read RLIMIT_NOFILE"
        );
        return 0;
    }
    limit.rlim_max as u64
}

/// Kernel listen backlog limit.
pub fn somaxconn() -> usize {
    std::fs::read_to_string("/proc/sys/net/core/somaxconn")
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(DEFAULT_BACKLOG)
}

/// Whether the host can bind IPv6 sockets.
pub fn is_ipv6_enabled() -> bool {
    std::net::TcpListener::bind("[::1]:0").is_ok()
}
