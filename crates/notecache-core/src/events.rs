//! Broadcast event bus and store change events.
//!
//! Each subscriber gets an independent stream. Events emitted with no
//! subscribers are dropped.

use tokio::sync::broadcast;

use crate::content::ContentProviderType;

/// Change notification raised by the record store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    /// New or changed records were written by the diff pass.
    FilesWritten { paths: Vec<String> },
    /// A provider committed content for one path.
    ContentUpdated {
        path: String,
        provider: ContentProviderType,
    },
    /// Records were removed.
    FilesRemoved { paths: Vec<String> },
    /// A record moved to a new path.
    FileRenamed { old_path: String, new_path: String },
    /// The whole store was cleared.
    Cleared,
}

impl StoreEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            StoreEvent::FilesWritten { .. } => "files_written",
            StoreEvent::ContentUpdated { .. } => "content_updated",
            StoreEvent::FilesRemoved { .. } => "files_removed",
            StoreEvent::FileRenamed { .. } => "file_renamed",
            StoreEvent::Cleared => "cleared",
        }
    }

    /// Whether the event can change the tag or property trees.
    pub fn affects_trees(&self) -> bool {
        match self {
            StoreEvent::ContentUpdated { provider, .. } => matches!(
                provider,
                ContentProviderType::Tags | ContentProviderType::Markdown
            ),
            _ => true,
        }
    }
}

/// Typed broadcast bus.
#[derive(Debug)]
pub struct EventBus<T: Clone> {
    tx: broadcast::Sender<T>,
}

impl<T: Clone + std::fmt::Debug> EventBus<T> {
    /// Create a new event bus with the given buffer capacity.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Emit an event to all subscribers.
    pub fn emit(&self, event: T) {
        let subscriber_count = self.tx.receiver_count();
        tracing::trace!(?event, subscriber_count, "EventBus emit");
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<T> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Sender handle for producers that outlive a borrow of the bus.
    pub fn sender(&self) -> broadcast::Sender<T> {
        self.tx.clone()
    }
}

impl<T: Clone + std::fmt::Debug> Default for EventBus<T> {
    fn default() -> Self {
        Self::new(crate::defaults::EVENT_BUS_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_emit_and_receive() {
        let bus = EventBus::new(32);
        let mut rx = bus.subscribe();

        bus.emit(StoreEvent::Cleared);
        let received = rx.recv().await.unwrap();
        assert_eq!(received, StoreEvent::Cleared);
    }

    #[tokio::test]
    async fn test_multiple_subscribers() {
        let bus = EventBus::new(32);
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        bus.emit(StoreEvent::FilesRemoved {
            paths: vec!["a.md".into()],
        });

        assert_eq!(rx1.recv().await.unwrap().event_type(), "files_removed");
        assert_eq!(rx2.recv().await.unwrap().event_type(), "files_removed");
    }

    #[test]
    fn test_emit_without_subscribers_does_not_panic() {
        let bus: EventBus<StoreEvent> = EventBus::default();
        bus.emit(StoreEvent::Cleared);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_tree_relevance() {
        let metadata = StoreEvent::ContentUpdated {
            path: "a.md".into(),
            provider: ContentProviderType::Metadata,
        };
        let tags = StoreEvent::ContentUpdated {
            path: "a.md".into(),
            provider: ContentProviderType::Tags,
        };
        assert!(!metadata.affects_trees());
        assert!(tags.affects_trees());
        assert!(StoreEvent::Cleared.affects_trees());
    }
}
