//! Scan pipeline
//!
//! extraction → verification → optional confirmation, for one card or a
//! batch. Only a failed extraction is an error; everything after it is
//! advisory and degrades to warnings.
//!
//! Batches run through `futures::StreamExt::buffered`, which bounds the
//! number of cards in flight and yields results in input order.

use crate::db::settings::VerificationSettings;
use crate::models::{CardImage, ExtractedCard, VerificationResult};
use crate::services::confirmation::{needs_confirmation, run_confirmation_pass};
use crate::services::extractor::{Extractor, ExtractorError};
use crate::services::verifier::{apply_suggestions, CardVerifier};
use cardcat_common::events::{CatalogEvent, EventBus};
use chrono::Utc;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("Extraction failed: {0}")]
    Extraction(#[from] ExtractorError),

    #[error("Extraction timed out after {0:?}")]
    Timeout(Duration),

    #[error("Scan cancelled")]
    Cancelled,
}

/// Pipeline timing
#[derive(Debug, Clone, Copy)]
pub struct PipelineOptions {
    pub extraction_timeout: Duration,
    pub confirmation_timeout: Duration,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            extraction_timeout: Duration::from_secs(60),
            confirmation_timeout: Duration::from_secs(30),
        }
    }
}

/// Everything known about one scanned card
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanReport {
    pub card: ExtractedCard,
    pub field_hints: HashMap<String, f64>,
    /// Absent when verification is switched off
    pub verification: Option<VerificationResult>,
    pub confirmation_ran: bool,
    /// Card with high-confidence suggestions applied (auto-apply toggle)
    pub corrected_card: Option<ExtractedCard>,
}

/// One card through extraction, verification and confirmation
#[derive(Clone)]
pub struct CardPipeline {
    db: SqlitePool,
    extractor: Arc<dyn Extractor>,
    verifier: CardVerifier,
    options: PipelineOptions,
}

impl CardPipeline {
    pub fn new(
        db: SqlitePool,
        extractor: Arc<dyn Extractor>,
        verifier: CardVerifier,
        options: PipelineOptions,
    ) -> Self {
        Self {
            db,
            extractor,
            verifier,
            options,
        }
    }

    pub async fn process(
        &self,
        image: &CardImage,
        back: Option<&CardImage>,
        cancel: &CancellationToken,
    ) -> Result<ScanReport, ScanError> {
        let settings = VerificationSettings::load(&self.db).await.unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Could not read verification settings, using defaults");
            VerificationSettings::default()
        });

        let timeout = self.options.extraction_timeout;
        let outcome = tokio::select! {
            _ = cancel.cancelled() => return Err(ScanError::Cancelled),
            scanned = tokio::time::timeout(timeout, self.extractor.scan(image, back)) => {
                scanned.map_err(|_| ScanError::Timeout(timeout))??
            }
        };
        let card = outcome.card;

        if !settings.verification_enabled {
            return Ok(ScanReport {
                card,
                field_hints: outcome.field_hints,
                verification: None,
                confirmation_ran: false,
                corrected_card: None,
            });
        }

        let mut result = self.verifier.verify(&card).await;

        let mut confirmation_ran = false;
        if settings.confirmation_pass_enabled && needs_confirmation(&result) {
            confirmation_ran = true;
            run_confirmation_pass(
                self.extractor.as_ref(),
                image,
                back,
                &card,
                &mut result,
                self.options.confirmation_timeout,
                cancel,
            )
            .await;
        }

        let corrected_card = settings
            .auto_apply_suggestions
            .then(|| apply_suggestions(&card, &result))
            .filter(|corrected| corrected != &card);

        self.verifier.announce(&card, &result, confirmation_ran);

        Ok(ScanReport {
            card,
            field_hints: outcome.field_hints,
            verification: Some(result),
            confirmation_ran,
            corrected_card,
        })
    }
}

/// Front image plus optional back
#[derive(Debug, Clone)]
pub struct BatchItem {
    pub front: CardImage,
    pub back: Option<CardImage>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum BatchItemResult {
    Completed { report: Box<ScanReport> },
    Failed { error: String },
    Cancelled,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchReport {
    pub batch_id: Uuid,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    /// One entry per input, in input order
    pub results: Vec<BatchItemResult>,
}

/// Bounded-concurrency batch scanning
pub struct BatchScanner {
    pipeline: CardPipeline,
    max_in_flight: usize,
    event_bus: Option<EventBus>,
}

impl BatchScanner {
    /// `max_in_flight` of zero is treated as one
    pub fn new(pipeline: CardPipeline, max_in_flight: usize) -> Self {
        Self {
            pipeline,
            max_in_flight: max_in_flight.max(1),
            event_bus: None,
        }
    }

    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    /// Scan every item; items not started before `cancel` fires are reported cancelled
    pub async fn scan(&self, items: Vec<BatchItem>, cancel: CancellationToken) -> BatchReport {
        let batch_id = Uuid::new_v4();
        let total = items.len();
        let finished = Arc::new(AtomicUsize::new(0));

        tracing::info!(%batch_id, total, max_in_flight = self.max_in_flight, "Batch scan started");

        let results: Vec<BatchItemResult> = stream::iter(items)
            .map(|item| {
                scan_item(
                    self.pipeline.clone(),
                    item,
                    cancel.clone(),
                    BatchProgress {
                        batch_id,
                        total,
                        finished: finished.clone(),
                        event_bus: self.event_bus.clone(),
                    },
                )
            })
            .buffered(self.max_in_flight)
            .collect()
            .await;

        let mut report = BatchReport {
            batch_id,
            completed: 0,
            failed: 0,
            cancelled: 0,
            results,
        };
        for result in &report.results {
            match result {
                BatchItemResult::Completed { .. } => report.completed += 1,
                BatchItemResult::Failed { .. } => report.failed += 1,
                BatchItemResult::Cancelled => report.cancelled += 1,
            }
        }

        tracing::info!(
            %batch_id,
            completed = report.completed,
            failed = report.failed,
            cancelled = report.cancelled,
            "Batch scan finished"
        );

        report
    }
}

/// Shared counter for progress events
struct BatchProgress {
    batch_id: Uuid,
    total: usize,
    finished: Arc<AtomicUsize>,
    event_bus: Option<EventBus>,
}

async fn scan_item(
    pipeline: CardPipeline,
    item: BatchItem,
    cancel: CancellationToken,
    progress: BatchProgress,
) -> BatchItemResult {
    if cancel.is_cancelled() {
        return BatchItemResult::Cancelled;
    }

    let batch_id = progress.batch_id;
    let result = match pipeline.process(&item.front, item.back.as_ref(), &cancel).await {
        Ok(report) => BatchItemResult::Completed {
            report: Box::new(report),
        },
        Err(ScanError::Cancelled) => BatchItemResult::Cancelled,
        Err(e) => {
            tracing::warn!(%batch_id, error = %e, "Batch item failed");
            BatchItemResult::Failed {
                error: e.to_string(),
            }
        }
    };

    let completed = progress.finished.fetch_add(1, Ordering::SeqCst) + 1;
    if let Some(bus) = &progress.event_bus {
        bus.emit_lossy(CatalogEvent::BatchProgress {
            batch_id,
            completed,
            total: progress.total,
            timestamp: Utc::now(),
        });
    }

    result
}
