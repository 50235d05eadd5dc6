//! Checklist learning and enrichment
//!
//! Every saved card feeds the corpus. Saves put a `CardSaved` event on an
//! unbounded queue and return immediately; a background worker drains it.
//!
//! Writes are append-only and race-safe:
//! - checklist creation is find-or-create on the unique normalized key
//! - cards and variations are inserted with `ON CONFLICT DO NOTHING`
//! - provenance moves through `DataSource::join` with a compare-and-set
//!
//! Learning failures are logged and dropped. They never reach the caller
//! that saved the card.

use crate::db::{checklists, missing, settings};
use crate::models::{ChecklistCard, ChecklistKey, DataSource, ExtractedCard, SetChecklist};
use crate::seed::SeedCorpus;
use crate::services::verifier::checklist_key;
use crate::utils::db_retry::{retry_on_lock, DEFAULT_MAX_LOCK_WAIT_MS};
use cardcat_common::events::{CatalogEvent, EventBus};
use cardcat_common::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Current export document version
pub const EXPORT_VERSION: u32 = 1;

/// A card the user accepted and saved
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardSaved {
    pub card_id: String,
    pub card: ExtractedCard,
    #[serde(default = "Utc::now")]
    pub saved_at: DateTime<Utc>,
}

impl CardSaved {
    pub fn new(card_id: impl Into<String>, card: ExtractedCard) -> Self {
        Self {
            card_id: card_id.into(),
            card,
            saved_at: Utc::now(),
        }
    }
}

/// What learning one card did to the corpus
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LearnOutcome {
    /// Manufacturer, brand or year missing
    Skipped,
    /// Checklist created for a previously unseen set
    Created {
        checklist_id: i64,
        data_source: DataSource,
        cards_added: usize,
        variations_added: usize,
    },
    /// Existing checklist gained entries
    Enriched {
        checklist_id: i64,
        data_source: DataSource,
        cards_added: usize,
        variations_added: usize,
    },
    /// Everything was already known
    Unchanged { checklist_id: i64 },
}

impl LearnOutcome {
    pub fn checklist_id(&self) -> Option<i64> {
        match self {
            LearnOutcome::Skipped => None,
            LearnOutcome::Created { checklist_id, .. }
            | LearnOutcome::Enriched { checklist_id, .. }
            | LearnOutcome::Unchanged { checklist_id } => Some(*checklist_id),
        }
    }
}

/// Portable corpus document used by export and import
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChecklistExport {
    #[serde(default = "default_export_version")]
    pub version: u32,
    #[serde(default = "Utc::now")]
    pub exported_at: DateTime<Utc>,
    #[serde(default)]
    pub checklists: Vec<SetChecklist>,
}

fn default_export_version() -> u32 {
    EXPORT_VERSION
}

/// Counts of what an import actually added
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportReport {
    pub checklists_created: usize,
    pub checklists_updated: usize,
    pub checklists_skipped: usize,
    pub cards_added: usize,
    pub variations_added: usize,
}

/// Writes accepted cards back into the checklist corpus
#[derive(Clone)]
pub struct ChecklistLearner {
    db: SqlitePool,
    seed: Arc<SeedCorpus>,
    event_bus: Option<EventBus>,
    max_lock_wait_ms: u64,
}

impl ChecklistLearner {
    pub fn new(db: SqlitePool, seed: Arc<SeedCorpus>) -> Self {
        Self {
            db,
            seed,
            event_bus: None,
            max_lock_wait_ms: DEFAULT_MAX_LOCK_WAIT_MS,
        }
    }

    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn with_max_lock_wait_ms(mut self, max_lock_wait_ms: u64) -> Self {
        self.max_lock_wait_ms = max_lock_wait_ms;
        self
    }

    fn emit(&self, event: CatalogEvent) {
        if let Some(bus) = &self.event_bus {
            bus.emit_lossy(event);
        }
    }

    /// Learn from one accepted card
    pub async fn learn_from_card(&self, card: &ExtractedCard) -> Result<LearnOutcome> {
        let key = match checklist_key(card) {
            Some(key) => key,
            None => {
                tracing::debug!(card = %card.label(), "Card lacks identity fields, nothing to learn");
                return Ok(LearnOutcome::Skipped);
            }
        };
        let wait = self.max_lock_wait_ms;

        let existing = retry_on_lock("find checklist", wait, || {
            checklists::find_checklist(&self.db, &key)
        })
        .await?;

        let (checklist_id, created, data_source) = match existing {
            Some(checklist) => (checklist.id, false, checklist.data_source),
            None => self.create_checklist(&key).await?,
        };

        let mut cards_added = 0;
        let mut variations_added = 0;

        if let Some(number) = card.card_number() {
            let entry = ChecklistCard {
                card_number: number.to_string(),
                player_name: card.player().unwrap_or_default().to_string(),
                team: card.team.clone(),
                is_rookie: card.is_rookie,
                source: DataSource::Learned,
            };
            if retry_on_lock("append card", wait, || {
                checklists::append_card(&self.db, checklist_id, &entry)
            })
            .await?
            {
                cards_added += 1;
            }
        }

        let variation = card.parallel().or(if card.is_base() { Some("Base") } else { None });
        if let Some(variation) = variation {
            if retry_on_lock("append variation", wait, || {
                checklists::append_variation(&self.db, checklist_id, variation, DataSource::Learned)
            })
            .await?
            {
                variations_added += 1;
            }
        }

        let retired = retry_on_lock("retire missing checklist", wait, || {
            missing::delete_missing(&self.db, &key)
        })
        .await?;
        if retired > 0 {
            tracing::debug!(checklist = %key, "Missing checklist record retired");
        }

        if created {
            tracing::info!(
                checklist = %key,
                checklist_id,
                data_source = %data_source,
                cards_added,
                variations_added,
                "Checklist learned"
            );
            self.emit(CatalogEvent::ChecklistLearned {
                checklist_id,
                manufacturer: key.manufacturer.clone(),
                brand: key.brand.clone(),
                year: key.year,
                sport: key.sport.clone(),
                data_source: data_source.to_string(),
                timestamp: Utc::now(),
            });
            return Ok(LearnOutcome::Created {
                checklist_id,
                data_source,
                cards_added,
                variations_added,
            });
        }

        if cards_added + variations_added == 0 {
            return Ok(LearnOutcome::Unchanged { checklist_id });
        }

        let data_source = retry_on_lock("mark checklist enriched", wait, || {
            checklists::mark_enriched(&self.db, checklist_id, DataSource::Learned, Utc::now())
        })
        .await?;

        tracing::info!(
            checklist = %key,
            checklist_id,
            data_source = %data_source,
            cards_added,
            variations_added,
            "Checklist enriched"
        );
        self.emit(CatalogEvent::ChecklistEnriched {
            checklist_id,
            cards_added,
            variations_added,
            data_source: data_source.to_string(),
            timestamp: Utc::now(),
        });

        Ok(LearnOutcome::Enriched {
            checklist_id,
            data_source,
            cards_added,
            variations_added,
        })
    }

    /// Create the checklist for an unseen key, adopting the seed copy if one exists
    ///
    /// Returns `(id, created, provenance)`. `created` is false when a
    /// concurrent learner won the insert.
    async fn create_checklist(&self, key: &ChecklistKey) -> Result<(i64, bool, DataSource)> {
        let wait = self.max_lock_wait_ms;

        let seed = match self.seed.find_exact(key) {
            Some(seed) => seed,
            None => {
                let (id, created) = retry_on_lock("create checklist", wait, || {
                    checklists::find_or_create(&self.db, key, DataSource::Learned, 0)
                })
                .await?;
                return Ok((id, created, DataSource::Learned));
            }
        };

        let (id, created) = retry_on_lock("adopt seed checklist", wait, || {
            checklists::adopt_seed_checklist(&self.db, seed)
        })
        .await?;
        if created {
            tracing::debug!(checklist = %seed.key(), cards = seed.cards.len(), "Adopted seed checklist");
        }

        Ok((id, created, DataSource::Seed))
    }

    /// Process one queued save, honouring the `learning_enabled` toggle
    pub async fn handle(&self, event: &CardSaved) -> Option<LearnOutcome> {
        match settings::is_learning_enabled(&self.db).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::debug!(card_id = %event.card_id, "Learning disabled, skipping saved card");
                return None;
            }
            Err(e) => {
                tracing::warn!(card_id = %event.card_id, error = %e, "Could not read learning setting, skipping");
                return None;
            }
        }

        match self.learn_from_card(&event.card).await {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                tracing::warn!(
                    card_id = %event.card_id,
                    card = %event.card.label(),
                    error = %e,
                    "Checklist learning failed"
                );
                None
            }
        }
    }

    /// Merge an export document into the corpus, tagging new entries `imported`
    pub async fn import_checklists(&self, document: &ChecklistExport) -> Result<ImportReport> {
        let mut report = ImportReport::default();

        if document.version > EXPORT_VERSION {
            tracing::warn!(
                version = document.version,
                supported = EXPORT_VERSION,
                "Importing checklist document from a newer version"
            );
        }

        for checklist in &document.checklists {
            if checklist.manufacturer.trim().is_empty() || checklist.brand.trim().is_empty() {
                tracing::warn!(year = checklist.year, "Skipping imported checklist without manufacturer/brand");
                report.checklists_skipped += 1;
                continue;
            }

            let outcome = retry_on_lock("import checklist", self.max_lock_wait_ms, || {
                checklists::merge_checklist(&self.db, checklist, DataSource::Imported)
            })
            .await?;

            if outcome.created {
                report.checklists_created += 1;
            } else if outcome.changed() {
                report.checklists_updated += 1;
            }
            report.cards_added += outcome.cards_added;
            report.variations_added += outcome.variations_added;
        }

        tracing::info!(
            checklists_created = report.checklists_created,
            checklists_updated = report.checklists_updated,
            cards_added = report.cards_added,
            variations_added = report.variations_added,
            "Checklist import complete"
        );
        self.emit(CatalogEvent::ChecklistsImported {
            checklists_created: report.checklists_created,
            cards_added: report.cards_added,
            variations_added: report.variations_added,
            timestamp: Utc::now(),
        });

        Ok(report)
    }

    /// Full corpus as an export document
    pub async fn export_checklists(&self) -> Result<ChecklistExport> {
        Ok(ChecklistExport {
            version: EXPORT_VERSION,
            exported_at: Utc::now(),
            checklists: checklists::load_all(&self.db).await?,
        })
    }
}

/// Sending half of the learning queue
///
/// Enqueueing never blocks.
#[derive(Clone)]
pub struct LearningQueue {
    tx: mpsc::UnboundedSender<CardSaved>,
}

impl LearningQueue {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<CardSaved>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Queue a saved card; false when no worker is running
    pub fn enqueue(&self, event: CardSaved) -> bool {
        let card_id = event.card_id.clone();
        match self.tx.send(event) {
            Ok(()) => true,
            Err(_) => {
                tracing::warn!(card_id = %card_id, "Learning worker stopped, saved card not learned");
                false
            }
        }
    }
}

/// Drain the learning queue until it closes or `cancel` fires
///
/// On cancel the queue is closed to new saves and whatever is already
/// queued is still learned before the worker exits.
pub fn spawn_learning_worker(
    learner: ChecklistLearner,
    mut rx: mpsc::UnboundedReceiver<CardSaved>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tracing::info!("Learning worker started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                event = rx.recv() => match event {
                    Some(event) => {
                        learner.handle(&event).await;
                    }
                    None => break,
                },
            }
        }

        rx.close();
        let mut drained = 0usize;
        while let Some(event) = rx.recv().await {
            learner.handle(&event).await;
            drained += 1;
        }
        if drained > 0 {
            tracing::info!(drained, "Learned queued saves before shutdown");
        }
        tracing::info!("Learning worker stopped");
    })
}
