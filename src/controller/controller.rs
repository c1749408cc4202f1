//! The reconciliation control loop.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use serde::Serialize;
use tokio::sync::{broadcast, mpsc};

use super::event::{self, Event, INITIAL_SYNC_KEY};
use super::status;
use super::ControllerError;
use crate::apply::{run_janitor, write_atomic, Applier, ApplyError};
use crate::config::ControllerConfig;
use crate::lifecycle::{Shutdown, StopSignal};
use crate::model::RoutingIntent;
use crate::net::{BackendList, Listener, PassthroughProxy, ProxySettings, TcpServer};
use crate::observability::metrics;
use crate::process::{
    reaper, ExitDisposition, ProcessSupervisor, WorkerCommand, WorkerExit, WorkerState,
};
use crate::queue::{RateLimitedQueue, RetryPolicy, TokenBucket};
use crate::render::{
    ConfigRenderer, DhParam, JsonTemplate, RenderSettings, Rendered, TemplateWriter,
};
use crate::store::Store;

/// Result of one reconciliation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The rendered configuration matches what is running.
    Unchanged,
    /// A new configuration was validated and activated.
    Applied { checksum: String },
}

/// Outcome of the most recent apply.
#[derive(Debug, Clone, Serialize)]
pub struct ReloadStatus {
    pub success: bool,
    pub checksum: String,
    pub error: Option<String>,
    pub unix_time_secs: u64,
}

/// Snapshot served by the status surface.
#[derive(Debug, Clone, Serialize)]
pub struct ControllerStatus {
    pub shutting_down: bool,
    pub worker_state: WorkerState,
    pub worker_pid: Option<u32>,
    pub worker_restarts: u64,
    pub running_checksum: Option<String>,
    pub intent_checksum: Option<String>,
    pub last_reload: Option<ReloadStatus>,
    pub queue_depth: usize,
    pub passthrough: Option<BackendList>,
    pub passthrough_active_connections: u64,
}

struct RunningConfig {
    intent: RoutingIntent,
    checksum: String,
}

/// Mutable controller state, behind one lock.
#[derive(Default)]
struct ControllerState {
    shutting_down: bool,
    running: Option<RunningConfig>,
    last_reload: Option<ReloadStatus>,
}

/// Receivers consumed by [`Controller::start`].
struct StartChannels {
    exits: mpsc::UnboundedReceiver<WorkerExit>,
    events: broadcast::Receiver<Event>,
}

/// Wires the event channel, sync queue, renderer, applier, supervisor and
/// passthrough proxy into one control loop.
pub struct Controller {
    config: ControllerConfig,
    store: Arc<dyn Store>,
    renderer: ConfigRenderer,
    applier: Applier,
    supervisor: ProcessSupervisor,
    queue: Arc<RateLimitedQueue<Event>>,
    proxy: Option<Arc<PassthroughProxy>>,
    events: broadcast::Sender<Event>,
    shutdown: Shutdown,
    state: Mutex<ControllerState>,
    stop_lock: tokio::sync::Mutex<()>,
    channels: Mutex<Option<StartChannels>>,
}

impl Controller {
    pub fn new(config: ControllerConfig, store: Arc<dyn Store>) -> Arc<Self> {
        Self::with_template(config, store, Box::new(JsonTemplate))
    }

    pub fn with_template(
        config: ControllerConfig,
        store: Arc<dyn Store>,
        template: Box<dyn TemplateWriter>,
    ) -> Arc<Self> {
        let renderer = ConfigRenderer::new(
            Arc::clone(&store),
            template,
            RenderSettings::from_config(&config),
        );
        let applier = Applier::from_config(&config);

        let (supervisor, exits) = ProcessSupervisor::new(
            WorkerCommand::from_config(&config.worker),
            config.listen.worker_ports(config.passthrough.enabled),
            Duration::from_secs(config.worker.port_wait_secs),
        );

        let queue = Arc::new(RateLimitedQueue::new(
            TokenBucket::new(config.queue.sync_rate_limit, config.queue.burst),
            RetryPolicy::new(config.queue.retry_base_delay_ms, config.queue.retry_max_delay_ms),
        ));

        let proxy = config.passthrough.enabled.then(|| {
            let default = TcpServer {
                hostname: "localhost".to_string(),
                address: "127.0.0.1".to_string(),
                port: config.listen.ssl_proxy_port,
                proxy_protocol: true,
            };
            Arc::new(PassthroughProxy::new(
                ProxySettings::from(&config.passthrough),
                Some(default),
            ))
        });

        let (events, events_rx) = event::channel(config.controller.event_buffer);

        Arc::new(Self {
            config,
            store,
            renderer,
            applier,
            supervisor,
            queue,
            proxy,
            events,
            shutdown: Shutdown::new(),
            state: Mutex::new(ControllerState::default()),
            stop_lock: tokio::sync::Mutex::new(()),
            channels: Mutex::new(Some(StartChannels {
                exits,
                events: events_rx,
            })),
        })
    }

    fn lock_state(&self) -> MutexGuard<'_, ControllerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Sender for change notifications.
    pub fn events(&self) -> broadcast::Sender<Event> {
        self.events.clone()
    }

    /// Resolves once [`stop`](Self::stop) has begun tearing things down.
    pub fn stop_signal(&self) -> StopSignal {
        self.shutdown.subscribe()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.lock_state().shutting_down
    }

    pub fn supervisor(&self) -> &ProcessSupervisor {
        &self.supervisor
    }

    pub fn applier(&self) -> &Applier {
        &self.applier
    }

    pub fn proxy(&self) -> Option<&Arc<PassthroughProxy>> {
        self.proxy.as_ref()
    }

    pub fn status(&self) -> ControllerStatus {
        let (shutting_down, running_checksum, intent_checksum, last_reload) = {
            let state = self.lock_state();
            (
                state.shutting_down,
                state.running.as_ref().map(|r| r.checksum.clone()),
                state.running.as_ref().map(|r| r.intent.checksum()),
                state.last_reload.clone(),
            )
        };

        ControllerStatus {
            shutting_down,
            worker_state: self.supervisor.state(),
            worker_pid: self.supervisor.pid(),
            worker_restarts: self.supervisor.restarts(),
            running_checksum,
            intent_checksum,
            last_reload,
            queue_depth: self.queue.len(),
            passthrough: self.proxy.as_ref().map(|p| p.backends().as_ref().clone()),
            passthrough_active_connections: self
                .proxy
                .as_ref()
                .map_or(0, |p| p.active_connections()),
        }
    }

    /// Start the worker and all background tasks, then run the control loop
    /// until [`stop`](Self::stop) is called.
    ///
    /// Every listener is bound before the worker is spawned, so a startup
    /// failure never leaves a worker behind. Errors returned here are startup
    /// failures.
    pub async fn start(self: Arc<Self>) -> Result<(), ControllerError> {
        let channels = self
            .channels
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(ControllerError::AlreadyStarted)?;
        let StartChannels {
            mut exits,
            events: mut events_rx,
        } = channels;

        let passthrough = self.bind_passthrough().await?;
        let status_listener = self.bind_status().await?;

        tracing::info!(binary = %self.config.worker.binary.display(), "Starting worker process");
        self.supervisor.start()?;

        if let Some(proxy) = &self.proxy {
            for listener in passthrough {
                tokio::spawn(Arc::clone(proxy).run(listener, self.stop_signal()));
            }
        }
        tokio::spawn(status::serve(status_listener, Arc::clone(&self), self.stop_signal()));

        let ctrl = Arc::clone(&self);
        tokio::spawn(Arc::clone(&self.queue).run(move |_key, _event| {
            let ctrl = Arc::clone(&ctrl);
            async move { ctrl.sync_intent().await.map(|_| ()) }
        }));
        self.queue.enqueue(INITIAL_SYNC_KEY, Event::InitialSync);

        tokio::spawn(run_janitor(
            self.config.worker.temp_dir.clone(),
            Duration::from_secs(self.config.controller.temp_retention_secs),
            Duration::from_secs(self.config.controller.janitor_interval_secs),
            self.stop_signal(),
        ));

        if self.config.controller.reap_orphans {
            tokio::spawn(reaper::run_reaper(
                self.supervisor.subscribe_pid(),
                self.stop_signal(),
            ));
        }

        let mut stop = self.stop_signal();
        loop {
            tokio::select! {
                Some(exit) = exits.recv() => {
                    let shutting_down = self.is_shutting_down();
                    match self.supervisor.handle_exit(exit, shutting_down).await {
                        Ok(ExitDisposition::Expected) if shutting_down => break,
                        Ok(_) => {}
                        Err(e) => tracing::error!(error = %e, "Worker could not be restarted"),
                    }
                }
                received = events_rx.recv() => match received {
                    Ok(event) => self.dispatch(event),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(dropped = n, "Event buffer overflowed, oldest events dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                _ = stop.wait() => break,
            }
        }

        tracing::info!("Control loop exited");
        Ok(())
    }

    /// Route an event into the sync queue.
    pub fn dispatch(&self, event: Event) {
        if self.is_shutting_down() {
            tracing::debug!(event = ?event, "Ignoring event during shutdown");
            return;
        }

        tracing::debug!(event = ?event, "Event received");
        let key = event.queue_key();
        if event.is_skippable() {
            self.queue.enqueue_skippable(key, event);
        } else {
            self.queue.enqueue(key, event);
        }
    }

    /// Render and apply the store's current intent.
    ///
    /// Skips validation and reload when the rendered configuration matches
    /// the running one byte for byte. Rendering always happens, since
    /// referenced config maps and secrets can change without the intent
    /// changing.
    pub async fn sync_intent(&self) -> Result<SyncOutcome, ControllerError> {
        let started = Instant::now();
        let intent = self.store.routing_intent();
        let backend = self.store.get_backend_configuration();

        if let Some(proxy) = &self.proxy {
            proxy.set_accept_proxy_protocol(backend.use_proxy_protocol);
            proxy.set_proxy_protocol_header_timeout(Duration::from_secs(
                backend.proxy_protocol_header_timeout_secs,
            ));
        }

        let rendered = match self.renderer.render(backend, &intent) {
            Ok(r) => r,
            Err(e) => {
                metrics::record_reconcile("render_error", started);
                return Err(e.into());
            }
        };
        let checksum = rendered.artifact.checksum.clone();

        {
            let state = self.lock_state();
            if state.running.as_ref().is_some_and(|r| r.checksum == checksum) {
                tracing::debug!(checksum = %checksum, "No configuration change detected, skipping reload");
                metrics::record_reconcile("unchanged", started);
                return Ok(SyncOutcome::Unchanged);
            }
        }

        if let Err(e) = self.activate(&rendered).await {
            metrics::record_reconcile("apply_error", started);
            metrics::record_reload_success(false);
            self.lock_state().last_reload = Some(ReloadStatus {
                success: false,
                checksum,
                error: Some(e.to_string()),
                unix_time_secs: unix_now(),
            });
            return Err(e.into());
        }

        if let Some(proxy) = &self.proxy {
            proxy.update_servers(rendered.passthrough);
        }

        metrics::record_reload_success(true);
        metrics::record_reconcile("success", started);
        tracing::info!(
            checksum = %checksum,
            servers = intent.servers.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Backend successfully reloaded"
        );

        let mut state = self.lock_state();
        state.last_reload = Some(ReloadStatus {
            success: true,
            checksum: checksum.clone(),
            error: None,
            unix_time_secs: unix_now(),
        });
        state.running = Some(RunningConfig {
            intent,
            checksum: checksum.clone(),
        });

        Ok(SyncOutcome::Applied { checksum })
    }

    /// Place the files the candidate refers to, then validate and activate
    /// it. Files placed here are removed again if the worker rejects it.
    async fn activate(&self, rendered: &Rendered) -> Result<(), ApplyError> {
        let placed = match &rendered.dh_param {
            Some(dh) => place_dh_param(dh)?,
            None => None,
        };

        let result = self.applier.apply(&rendered.artifact).await;
        if result.is_err() {
            if let Some(path) = placed {
                if let Err(e) = std::fs::remove_file(&path) {
                    tracing::warn!(path = %path.display(), error = %e, "Failed to remove DH parameters");
                }
            }
        }
        result
    }

    /// Stop dispatching, drain the queue and stop the worker.
    ///
    /// A second call while a stop is in progress is rejected.
    pub async fn stop(&self) -> Result<(), ControllerError> {
        self.lock_state().shutting_down = true;

        let _guard = self.stop_lock.lock().await;
        if self.queue.is_shutting_down() {
            return Err(ControllerError::AlreadyStopping);
        }

        let grace = Duration::from_secs(self.config.controller.shutdown_grace_period_secs);
        if !grace.is_zero() {
            tracing::info!(seconds = grace.as_secs(), "Waiting before shutting down");
            tokio::time::sleep(grace).await;
        }

        tracing::info!("Shutting down controller queues");
        self.shutdown.trigger();
        self.queue.shutdown().await;

        tracing::info!("Stopping worker process");
        self.supervisor.stop().await?;
        Ok(())
    }

    async fn bind_passthrough(&self) -> Result<Vec<Listener>, ControllerError> {
        let Some(proxy) = &self.proxy else {
            return Ok(Vec::new());
        };
        let backend = self.store.get_backend_configuration();
        proxy.set_accept_proxy_protocol(backend.use_proxy_protocol);
        proxy.set_proxy_protocol_header_timeout(Duration::from_secs(
            backend.proxy_protocol_header_timeout_secs,
        ));

        let listeners =
            Listener::bind_all(&self.config.listen.bind_addresses, self.config.listen.https_port)
                .await?;
        Ok(listeners)
    }

    async fn bind_status(&self) -> Result<tokio::net::TcpListener, ControllerError> {
        let addr: SocketAddr = self
            .config
            .listen
            .health_address
            .parse()
            .map_err(|_| ControllerError::Address(self.config.listen.health_address.clone()))?;
        tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|source| ControllerError::Bind { addr, source })
    }
}

/// Write DH parameters unless an identical file is already in place.
///
/// Returns the path when this call created the file.
fn place_dh_param(dh: &DhParam) -> Result<Option<PathBuf>, ApplyError> {
    if dh.path.exists() {
        return Ok(None);
    }
    if let Some(dir) = dh.path.parent() {
        std::fs::create_dir_all(dir).map_err(|source| ApplyError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }
    write_atomic(&dh.path, &dh.pem)?;
    Ok(Some(dh.path.clone()))
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
