//! End-to-end reconciliation against a fake worker process.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use ingress_reconciler::config::ControllerConfig;
use ingress_reconciler::controller::{ControllerError, Event};
use ingress_reconciler::model::{BackendConfiguration, RoutingIntent};
use ingress_reconciler::process::WorkerState;
use ingress_reconciler::{Controller, InMemoryStore, Store};

mod common;
use common::{eventually, log_count, test_config, REJECTED_HOST};

fn intent(hosts: &[&str]) -> RoutingIntent {
    let text: String = hosts
        .iter()
        .map(|h| format!("[[servers]]\nhostname = \"{h}\"\n"))
        .collect();
    toml::from_str(&text).unwrap()
}

/// Servers plus a `db` backend whose `tls` port carries each passthrough host.
fn passthrough_intent(hosts: &[&str], passthrough: &[&str]) -> RoutingIntent {
    let mut text: String = hosts
        .iter()
        .map(|h| format!("[[servers]]\nhostname = \"{h}\"\n"))
        .collect();
    text.push_str(
        "[[backends]]\nname = \"db\"\n\
         [backends.service]\ncluster_ip = \"10.1.2.3\"\n\
         ports = [{ name = \"tls\", port = 8443 }]\n",
    );
    for h in passthrough {
        text.push_str(&format!(
            "[[passthrough_backends]]\nhostname = \"{h}\"\nbackend = \"db\"\nport = \"tls\"\n"
        ));
    }
    toml::from_str(&text).unwrap()
}

fn passthrough_hosts(controller: &Controller) -> Vec<String> {
    controller
        .status()
        .passthrough
        .map(|list| list.servers.into_iter().map(|s| s.hostname).collect())
        .unwrap_or_default()
}

async fn wait_for_rejection(controller: &Controller) {
    eventually("failed apply", || {
        controller
            .status()
            .last_reload
            .is_some_and(|r| !r.success)
    })
    .await;
}

fn active_config(dir: &std::path::Path) -> String {
    std::fs::read_to_string(dir.join("worker.conf")).unwrap_or_default()
}

async fn started(dir: &std::path::Path, store: Arc<InMemoryStore>) -> Arc<Controller> {
    started_with(test_config(dir), dir, store).await
}

async fn started_with(
    config: ControllerConfig,
    dir: &std::path::Path,
    store: Arc<InMemoryStore>,
) -> Arc<Controller> {
    let controller = Controller::new(config, store as Arc<dyn Store>);
    tokio::spawn(Arc::clone(&controller).start());

    eventually("initial sync", || active_config(dir).contains("app.example.com")).await;
    eventually("running checksum", || controller.status().running_checksum.is_some()).await;
    controller
}

#[tokio::test]
async fn initial_sync_activates_config_and_reports_status() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(InMemoryStore::new());
    store.set_routing_intent(intent(&["app.example.com"]));

    let controller = started(dir.path(), store).await;
    eventually("reload", || log_count(dir.path(), "reload") == 1).await;

    assert!(active_config(dir.path()).starts_with("# Configuration checksum:"));
    assert_eq!(log_count(dir.path(), "start"), 1);
    assert_eq!(log_count(dir.path(), "test"), 1);

    let status = controller.status();
    assert_eq!(status.worker_state, WorkerState::Running);
    assert!(status.worker_pid.is_some());
    assert!(status.last_reload.as_ref().is_some_and(|r| r.success));
    assert_eq!(
        status.running_checksum,
        status.last_reload.map(|r| r.checksum)
    );

    controller.stop().await.unwrap();
    assert_eq!(log_count(dir.path(), "quit"), 1);
    assert_eq!(controller.supervisor().state(), WorkerState::Stopped);
}

#[tokio::test]
async fn repeated_triggers_apply_once() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(InMemoryStore::new());
    store.set_routing_intent(intent(&["app.example.com"]));

    let controller = started(dir.path(), Arc::clone(&store)).await;
    eventually("reload", || log_count(dir.path(), "reload") == 1).await;

    // Unchanged intent: nothing to do.
    controller.dispatch(Event::Object { key: "default/web".into() });
    controller.dispatch(Event::Object { key: "default/web".into() });
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(log_count(dir.path(), "test"), 1);

    store.set_routing_intent(intent(&["app.example.com", "api.example.com"]));
    controller.dispatch(Event::Object { key: "default/api".into() });
    controller.dispatch(Event::Object { key: "default/api".into() });

    eventually("second apply", || active_config(dir.path()).contains("api.example.com")).await;
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(log_count(dir.path(), "test"), 2);
    assert_eq!(log_count(dir.path(), "reload"), 2);

    controller.stop().await.unwrap();
}

#[tokio::test]
async fn rejected_config_leaves_active_file_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(InMemoryStore::new());
    store.set_routing_intent(intent(&["app.example.com"]));

    let controller = started(dir.path(), Arc::clone(&store)).await;
    eventually("reload", || log_count(dir.path(), "reload") == 1).await;
    let before = active_config(dir.path());
    let checksum = controller.status().running_checksum;

    store.set_routing_intent(intent(&["app.example.com", REJECTED_HOST]));
    controller.dispatch(Event::Configuration);

    wait_for_rejection(&controller).await;

    assert_eq!(active_config(dir.path()), before);
    assert_eq!(controller.status().running_checksum, checksum);
    assert_eq!(log_count(dir.path(), "reload"), 1);

    controller.stop().await.unwrap();
}

#[tokio::test]
async fn crashed_worker_is_respawned() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(InMemoryStore::new());
    store.set_routing_intent(intent(&["app.example.com"]));

    let controller = started(dir.path(), store).await;
    let pid = controller.status().worker_pid.unwrap();

    // SAFETY: pid belongs to the worker this test started.
    unsafe { libc::kill(pid as libc::pid_t, libc::SIGKILL) };

    eventually("restart", || controller.status().worker_restarts == 1).await;
    let status = controller.status();
    assert_eq!(status.worker_state, WorkerState::Running);
    assert_ne!(status.worker_pid, Some(pid));
    eventually("second start", || log_count(dir.path(), "start") == 2).await;

    controller.stop().await.unwrap();
}

#[tokio::test]
async fn second_stop_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(InMemoryStore::new());
    store.set_routing_intent(intent(&["app.example.com"]));

    let controller = started(dir.path(), store).await;
    controller.stop().await.unwrap();

    assert!(matches!(
        controller.stop().await,
        Err(ControllerError::AlreadyStopping)
    ));
    assert!(controller.is_shutting_down());
}

#[tokio::test]
async fn status_surface_serves_health_and_status() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    let base = format!("http://{}", config.listen.health_address);

    let store = Arc::new(InMemoryStore::new());
    store.set_routing_intent(intent(&["app.example.com"]));
    let controller = Controller::new(config, store as Arc<dyn Store>);
    tokio::spawn(Arc::clone(&controller).start());
    eventually("initial sync", || active_config(dir.path()).contains("app.example.com")).await;
    eventually("running checksum", || controller.status().running_checksum.is_some()).await;

    let client = reqwest::Client::builder().no_proxy().build().unwrap();

    let health = client.get(format!("{base}/healthz")).send().await.unwrap();
    assert_eq!(health.status(), 200);

    let status: serde_json::Value = client
        .get(format!("{base}/status"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["worker_state"], "running");
    assert_eq!(status["shutting_down"], false);
    assert!(status["running_checksum"].is_string());
    assert_eq!(status["last_reload"]["success"], true);

    controller.stop().await.unwrap();
}

#[tokio::test]
async fn referenced_config_map_edit_is_applied() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(InMemoryStore::new());
    store.set_routing_intent(intent(&["app.example.com"]));
    store.set_config_map(
        "ingress/headers",
        HashMap::from([("X-Env".to_string(), "env-before".to_string())]),
    );
    store.set_backend_configuration(BackendConfiguration {
        add_headers: Some("ingress/headers".into()),
        ..Default::default()
    });

    let controller = started(dir.path(), Arc::clone(&store)).await;
    eventually("reload", || log_count(dir.path(), "reload") == 1).await;
    assert!(active_config(dir.path()).contains("env-before"));

    // Same intent and backend configuration; only the map content moves.
    store.set_config_map(
        "ingress/headers",
        HashMap::from([("X-Env".to_string(), "env-after".to_string())]),
    );
    controller.dispatch(Event::Configuration);

    eventually("header update", || active_config(dir.path()).contains("env-after")).await;
    assert!(!active_config(dir.path()).contains("env-before"));
    eventually("second reload", || log_count(dir.path(), "reload") == 2).await;

    controller.stop().await.unwrap();
}

#[tokio::test]
async fn bind_failure_leaves_no_worker() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(InMemoryStore::new());
    store.set_routing_intent(intent(&["app.example.com"]));

    let mut config = test_config(dir.path());
    config.passthrough.enabled = true;
    let _taken = std::net::TcpListener::bind(("127.0.0.1", config.listen.https_port)).unwrap();

    let controller = Controller::new(config, store as Arc<dyn Store>);
    let result = Arc::clone(&controller).start().await;

    assert!(matches!(result, Err(ControllerError::Listener(_))));
    assert_eq!(controller.supervisor().pid(), None);
    assert_eq!(controller.supervisor().state(), WorkerState::NotStarted);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(log_count(dir.path(), "start"), 0);
}

#[tokio::test]
async fn status_bind_failure_leaves_no_worker() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(InMemoryStore::new());
    store.set_routing_intent(intent(&["app.example.com"]));

    let config = test_config(dir.path());
    let _taken = std::net::TcpListener::bind(config.listen.health_address.as_str()).unwrap();

    let controller = Controller::new(config, store as Arc<dyn Store>);
    let result = Arc::clone(&controller).start().await;

    assert!(matches!(result, Err(ControllerError::Bind { .. })));
    assert_eq!(controller.supervisor().pid(), None);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(log_count(dir.path(), "start"), 0);
}

#[tokio::test]
async fn passthrough_list_follows_successful_applies_only() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(InMemoryStore::new());
    store.set_routing_intent(passthrough_intent(&["app.example.com"], &["db.example.com"]));

    let mut config = test_config(dir.path());
    config.passthrough.enabled = true;
    let ssl_proxy_port = config.listen.ssl_proxy_port;

    let controller = started_with(config, dir.path(), Arc::clone(&store)).await;
    eventually("passthrough list", || passthrough_hosts(&controller) == ["db.example.com"]).await;

    let list = controller.status().passthrough.unwrap();
    assert_eq!(list.servers[0].address, "10.1.2.3");
    assert_eq!(list.servers[0].port, 8443);
    let default = list.default.unwrap();
    assert_eq!(default.hostname, "localhost");
    assert_eq!(default.port, ssl_proxy_port);

    // Rejected by the worker: the proxy keeps routing the old list.
    store.set_routing_intent(passthrough_intent(
        &["app.example.com", REJECTED_HOST],
        &["db.example.com", "cache.example.com"],
    ));
    controller.dispatch(Event::Configuration);
    wait_for_rejection(&controller).await;
    assert_eq!(passthrough_hosts(&controller), ["db.example.com"]);

    store.set_routing_intent(passthrough_intent(
        &["app.example.com"],
        &["db.example.com", "cache.example.com"],
    ));
    controller.dispatch(Event::Configuration);
    eventually("swapped list", || {
        passthrough_hosts(&controller) == ["db.example.com", "cache.example.com"]
    })
    .await;
    assert!(controller
        .status()
        .passthrough
        .and_then(|l| l.default)
        .is_some_and(|d| d.port == ssl_proxy_port));

    controller.stop().await.unwrap();
}

#[tokio::test]
async fn rejected_candidate_keeps_dh_parameters() {
    let dir = tempfile::tempdir().unwrap();
    let ssl_dir = dir.path().join("ssl");
    let store = Arc::new(InMemoryStore::new());
    store.set_routing_intent(intent(&["app.example.com"]));
    store.set_secret(
        "ingress/dh",
        HashMap::from([("dhparam.pem".to_string(), b"params-v1".to_vec())]),
    );
    store.set_backend_configuration(BackendConfiguration {
        ssl_dh_param: Some("ingress/dh".into()),
        ..Default::default()
    });

    let pem_files = || -> Vec<std::path::PathBuf> {
        std::fs::read_dir(&ssl_dir)
            .map(|entries| entries.filter_map(|e| e.ok()).map(|e| e.path()).collect())
            .unwrap_or_default()
    };

    let controller = started(dir.path(), Arc::clone(&store)).await;
    let active = pem_files();
    assert_eq!(active.len(), 1);
    assert_eq!(std::fs::read(&active[0]).unwrap(), b"params-v1");
    assert!(active_config(dir.path()).contains(&active[0].display().to_string()));

    store.set_secret(
        "ingress/dh",
        HashMap::from([("dhparam.pem".to_string(), b"params-v2".to_vec())]),
    );
    store.set_routing_intent(intent(&["app.example.com", REJECTED_HOST]));
    controller.dispatch(Event::Configuration);
    wait_for_rejection(&controller).await;

    // Stopping drains the retrying sync, so nothing is mid-write below.
    controller.stop().await.unwrap();

    assert_eq!(pem_files(), active);
    assert_eq!(std::fs::read(&active[0]).unwrap(), b"params-v1");
}
