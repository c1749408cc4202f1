//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use ingress_reconciler::config::{ControllerConfig, ReloadMode};

/// Hostname the fake worker refuses during its config test.
pub const REJECTED_HOST: &str = "reject.example.com";

/// Reserve an unused local port.
pub fn free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

/// Start a backend that greets every connection with `tag` and reports the
/// first bytes it receives.
pub async fn start_tagged_backend(tag: &'static str) -> (SocketAddr, mpsc::UnboundedReceiver<Vec<u8>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let tx = tx.clone();
            tokio::spawn(async move {
                let mut buf = vec![0u8; 4096];
                let mut received = Vec::new();
                // The proxy may deliver its preamble in more than one write.
                while let Ok(Ok(n)) =
                    tokio::time::timeout(Duration::from_millis(200), socket.read(&mut buf)).await
                {
                    if n == 0 {
                        break;
                    }
                    received.extend_from_slice(&buf[..n]);
                }
                let _ = tx.send(received);
                let _ = socket.write_all(tag.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    (addr, rx)
}

/// Write a shell script that behaves like the worker binary.
///
/// Every control invocation is appended to `worker.log` in `dir`:
/// `start`, `test`, `reload`, `quit`. The config test fails for any file
/// mentioning [`REJECTED_HOST`].
pub fn write_fake_worker(dir: &Path) -> PathBuf {
    let script = dir.join("worker.sh");
    let log = dir.join("worker.log");
    let pid = dir.join("worker.pid");
    std::fs::write(
        &script,
        format!(
            r#"log="{log}"
case "$3" in
  -t)
    echo test >> "$log"
    if grep -q "{rejected}" "$2"; then echo "invalid server name" >&2; exit 1; fi
    exit 0 ;;
  -s)
    echo "$4" >> "$log"
    if [ "$4" = quit ]; then kill -QUIT "$(cat "{pid}")"; fi
    exit 0 ;;
esac
echo $$ > "{pid}"
echo start >> "$log"
trap 'exit 0' QUIT TERM
while :; do sleep 1 & wait $!; done
"#,
            log = log.display(),
            pid = pid.display(),
            rejected = REJECTED_HOST,
        ),
    )
    .unwrap();
    script
}

/// Lines of the fake worker's log matching `entry`.
pub fn log_count(dir: &Path, entry: &str) -> usize {
    std::fs::read_to_string(dir.join("worker.log"))
        .unwrap_or_default()
        .lines()
        .filter(|l| *l == entry)
        .count()
}

/// Controller config pointing every path and port at `dir` and free ports.
pub fn test_config(dir: &Path) -> ControllerConfig {
    let mut config = ControllerConfig::default();

    config.listen.bind_addresses = vec!["127.0.0.1".to_string()];
    config.listen.http_port = free_port();
    config.listen.https_port = free_port();
    config.listen.status_port = free_port();
    config.listen.default_server_port = free_port();
    config.listen.ssl_proxy_port = free_port();
    config.listen.health_address = format!("127.0.0.1:{}", free_port());

    config.worker.binary = PathBuf::from("/bin/sh");
    config.worker.base_args = vec![write_fake_worker(dir).display().to_string()];
    config.worker.config_path = dir.join("worker.conf");
    config.worker.temp_dir = dir.join("tmp");
    config.worker.ssl_dir = dir.join("ssl");
    config.worker.reload_mode = ReloadMode::Signal;
    config.worker.port_wait_secs = 5;

    config.queue.sync_rate_limit = 50.0;
    config.queue.burst = 5;
    config.queue.retry_base_delay_ms = 50;
    config.queue.retry_max_delay_ms = 200;

    std::fs::create_dir_all(&config.worker.temp_dir).unwrap();
    config
}

/// Poll `check` every 20ms for up to five seconds.
pub async fn eventually<F: FnMut() -> bool>(what: &str, mut check: F) {
    for _ in 0..250 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("timed out waiting for {what}");
}
