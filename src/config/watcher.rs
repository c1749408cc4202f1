//! File watcher that turns on-disk changes into reconciliation events.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify::{Config, Event as NotifyEvent, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::broadcast;

use crate::controller::Event;
use crate::store::InMemoryStore;

/// Watches the routing intent file and any extra files.
///
/// When the intent file changes it is reloaded into the store before the
/// event is sent, so the sync that follows sees the new intent. A file that
/// fails to parse leaves the previous intent in place.
pub struct FileWatcher {
    intent_file: Option<PathBuf>,
    extra: Vec<PathBuf>,
    store: Arc<InMemoryStore>,
    events: broadcast::Sender<Event>,
}

impl FileWatcher {
    pub fn new(
        intent_file: Option<PathBuf>,
        extra: Vec<PathBuf>,
        store: Arc<InMemoryStore>,
        events: broadcast::Sender<Event>,
    ) -> Self {
        Self {
            intent_file,
            extra,
            store,
            events,
        }
    }

    /// Start watching in notify's background thread.
    ///
    /// The returned watcher must be kept alive for events to flow.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let paths: Vec<PathBuf> = self
            .intent_file
            .iter()
            .chain(self.extra.iter())
            .cloned()
            .collect();

        let intent_file = self.intent_file.clone();
        let store = Arc::clone(&self.store);
        let events = self.events.clone();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<NotifyEvent>| match res {
                Ok(event) => {
                    if !(event.kind.is_modify() || event.kind.is_create()) {
                        return;
                    }
                    for path in &event.paths {
                        handle_change(path, intent_file.as_deref(), &store, &events);
                    }
                }
                Err(e) => tracing::error!(error = %e, "Watch error"),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        for path in &paths {
            watcher.watch(path, RecursiveMode::NonRecursive)?;
            tracing::info!(path = %path.display(), "Watching file");
        }

        Ok(watcher)
    }
}

fn handle_change(
    path: &Path,
    intent_file: Option<&Path>,
    store: &InMemoryStore,
    events: &broadcast::Sender<Event>,
) {
    if intent_file.is_some_and(|f| same_file(f, path)) {
        if let Err(e) = store.load_intent_file(path) {
            tracing::error!(
                path = %path.display(),
                error = %e,
                "Failed to reload routing intent, keeping current intent"
            );
            return;
        }
    }

    tracing::info!(path = %path.display(), "File change detected");
    // No receiver means the controller is not running yet or has stopped.
    let _ = events.send(Event::FileChange {
        path: path.to_path_buf(),
    });
}

fn same_file(a: &Path, b: &Path) -> bool {
    if a == b {
        return true;
    }
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}
