//! Event types for the cardcat event system
//!
//! Provides the shared event definitions and the EventBus used to fan
//! catalog activity out to SSE clients and background listeners.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Catalog event types
///
/// Events are broadcast via EventBus and serialized for SSE transmission.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum CatalogEvent {
    /// A card finished verification (initial pass plus optional confirmation)
    CardVerified {
        /// Human-readable label, e.g. "2020 Panini Prizm #88 Justin Jefferson"
        card_label: String,
        /// Overall confidence tier ("High", "Medium", "Low", "Conflict")
        overall_confidence: String,
        /// Whether a targeted re-ask ran for this card
        confirmation_ran: bool,
        timestamp: DateTime<Utc>,
    },

    /// A lookup found no checklist; the missing tracker was bumped
    ChecklistMissing {
        manufacturer: String,
        brand: String,
        year: i32,
        sport: Option<String>,
        hit_count: i64,
        timestamp: DateTime<Utc>,
    },

    /// A checklist was created for a previously unseen set
    ChecklistLearned {
        checklist_id: i64,
        manufacturer: String,
        brand: String,
        year: i32,
        sport: Option<String>,
        /// Provenance of the new checklist ("seed" or "learned")
        data_source: String,
        timestamp: DateTime<Utc>,
    },

    /// An existing checklist gained cards and/or variations
    ChecklistEnriched {
        checklist_id: i64,
        cards_added: usize,
        variations_added: usize,
        data_source: String,
        timestamp: DateTime<Utc>,
    },

    /// An import document was merged into the corpus
    ChecklistsImported {
        checklists_created: usize,
        cards_added: usize,
        variations_added: usize,
        timestamp: DateTime<Utc>,
    },

    /// Batch scan progress
    BatchProgress {
        batch_id: Uuid,
        completed: usize,
        total: usize,
        timestamp: DateTime<Utc>,
    },
}

impl CatalogEvent {
    /// Event type name used as the SSE `event:` field
    pub fn event_type(&self) -> &'static str {
        match self {
            CatalogEvent::CardVerified { .. } => "CardVerified",
            CatalogEvent::ChecklistMissing { .. } => "ChecklistMissing",
            CatalogEvent::ChecklistLearned { .. } => "ChecklistLearned",
            CatalogEvent::ChecklistEnriched { .. } => "ChecklistEnriched",
            CatalogEvent::ChecklistsImported { .. } => "ChecklistsImported",
            CatalogEvent::BatchProgress { .. } => "BatchProgress",
        }
    }
}

/// Broadcast channel for catalog events
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<CatalogEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with the given channel capacity
    ///
    /// Slow subscribers lose the oldest events once `capacity` is exceeded.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<CatalogEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: CatalogEvent,
    ) -> Result<usize, broadcast::error::SendError<CatalogEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: CatalogEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
