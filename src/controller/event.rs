//! Change notifications feeding the control loop.

use std::path::PathBuf;

use tokio::sync::broadcast;

/// Key used for the sync enqueued at startup.
pub const INITIAL_SYNC_KEY: &str = "initial-sync";

/// Key used for backend configuration changes.
pub const CONFIGURATION_KEY: &str = "configmap-change";

/// A change that may require a reconciliation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Global backend configuration changed.
    Configuration,
    /// A routing object changed; `key` identifies it.
    Object { key: String },
    /// A watched file changed.
    FileChange { path: PathBuf },
    /// First reconciliation after start.
    InitialSync,
}

impl Event {
    /// Deduplication key in the sync queue.
    pub fn queue_key(&self) -> String {
        match self {
            Event::Configuration => CONFIGURATION_KEY.to_string(),
            Event::Object { key } => key.clone(),
            Event::FileChange { path } => format!("file:{}", path.display()),
            Event::InitialSync => INITIAL_SYNC_KEY.to_string(),
        }
    }

    /// Object events may be skipped once a later sync has covered them.
    pub fn is_skippable(&self) -> bool {
        matches!(self, Event::Object { .. })
    }
}

/// Bounded event channel. A lagging receiver loses the oldest events, never
/// blocks producers.
pub fn channel(capacity: usize) -> (broadcast::Sender<Event>, broadcast::Receiver<Event>) {
    broadcast::channel(capacity.max(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_and_skippability() {
        let object = Event::Object { key: "default/web".into() };
        assert_eq!(object.queue_key(), "default/web");
        assert!(object.is_skippable());

        assert_eq!(Event::Configuration.queue_key(), CONFIGURATION_KEY);
        assert!(!Event::Configuration.is_skippable());
        assert!(!Event::InitialSync.is_skippable());

        let file = Event::FileChange { path: "/etc/intent.toml".into() };
        assert_eq!(file.queue_key(), "file:/etc/intent.toml");
        assert!(!file.is_skippable());
    }

    #[tokio::test]
    async fn lagging_receiver_keeps_newest() {
        let (tx, mut rx) = channel(2);
        for i in 0..4 {
            tx.send(Event::Object { key: format!("k{i}") }).unwrap();
        }

        assert!(matches!(rx.recv().await, Err(broadcast::error::RecvError::Lagged(2))));
        assert_eq!(rx.recv().await.unwrap(), Event::Object { key: "k2".into() });
        assert_eq!(rx.recv().await.unwrap(), Event::Object { key: "k3".into() });
    }
}
