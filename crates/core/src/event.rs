//! Domain events — memory writes, ingest transitions and review decisions.
//!
//! The broker and the enrichment worker publish here; observers (the CLI
//! daemon, tests) subscribe without coupling to either.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::ingest::IngestState;

/// All domain events in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DomainEvent {
    /// A memory was written (or skipped as a duplicate)
    MemoryStored {
        scope: String,
        id: String,
        duplicate: bool,
        timestamp: DateTime<Utc>,
    },

    /// An ingest item moved between states
    IngestStateChanged {
        item_id: String,
        from: IngestState,
        to: IngestState,
        timestamp: DateTime<Utc>,
    },

    /// A review candidate was approved or rejected
    ReviewDecided {
        review_id: String,
        item_id: String,
        approved: bool,
        timestamp: DateTime<Utc>,
    },

    /// A session lease expired and its partition was cleaned up
    SessionExpired {
        tenant: String,
        session_id: String,
        timestamp: DateTime<Utc>,
    },

    /// An error occurred
    ErrorOccurred {
        context: String,
        error_message: String,
        timestamp: DateTime<Utc>,
    },
}

/// A broadcast-based event bus for domain events.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub.
/// Components can subscribe to receive all events and filter for what they care about.
pub struct EventBus {
    sender: broadcast::Sender<Arc<DomainEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: DomainEvent) {
        // Ignore send errors (no subscribers = that's fine)
        let _ = self.sender.send(Arc::new(event));
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<DomainEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
