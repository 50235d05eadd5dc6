//! cardcat-verify library interface
//!
//! Verification of extracted trading cards against a self-enriching
//! checklist corpus, exposed over HTTP by the `cardcat-verify` binary.

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod matcher;
pub mod models;
pub mod seed;
pub mod services;
pub mod utils;

pub use crate::error::{ApiError, ApiResult};

use crate::seed::SeedCorpus;
use crate::services::learning::{ChecklistLearner, LearningQueue};
use crate::services::scan_pipeline::{CardPipeline, PipelineOptions};
use crate::services::{CardVerifier, Extractor};
use axum::Router;
use cardcat_common::config::ExtractorConfig;
use cardcat_common::events::EventBus;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool
    pub db: SqlitePool,
    /// Event bus for SSE broadcasting
    pub event_bus: EventBus,
    /// Sending half of the learning queue
    pub learning_queue: LearningQueue,
    /// Packaged seed corpus
    pub seed: Arc<SeedCorpus>,
    /// Vision extractor, absent until an endpoint and key are configured
    pub extractor: Arc<RwLock<Option<Arc<dyn Extractor>>>>,
    /// `[extractor]` section of the TOML config
    pub extractor_config: ExtractorConfig,
    /// TOML file API key changes are synced to
    pub toml_path: Option<PathBuf>,
    /// Cancelled on shutdown; batch scans derive child tokens from it
    pub shutdown: CancellationToken,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
    /// Last error for diagnostic purposes
    pub last_error: Arc<RwLock<Option<String>>>,
}

impl AppState {
    pub fn new(db: SqlitePool, event_bus: EventBus, learning_queue: LearningQueue, seed: Arc<SeedCorpus>) -> Self {
        Self {
            db,
            event_bus,
            learning_queue,
            seed,
            extractor: Arc::new(RwLock::new(None)),
            extractor_config: ExtractorConfig::default(),
            toml_path: None,
            shutdown: CancellationToken::new(),
            startup_time: Utc::now(),
            last_error: Arc::new(RwLock::new(None)),
        }
    }

    pub fn with_extractor(mut self, extractor: Option<Arc<dyn Extractor>>) -> Self {
        self.extractor = Arc::new(RwLock::new(extractor));
        self
    }

    pub fn with_extractor_config(mut self, config: ExtractorConfig) -> Self {
        self.extractor_config = config;
        self
    }

    pub fn with_toml_path(mut self, path: Option<PathBuf>) -> Self {
        self.toml_path = path;
        self
    }

    pub fn verifier(&self) -> CardVerifier {
        CardVerifier::new(self.db.clone()).with_event_bus(self.event_bus.clone())
    }

    pub fn learner(&self) -> ChecklistLearner {
        ChecklistLearner::new(self.db.clone(), self.seed.clone()).with_event_bus(self.event_bus.clone())
    }

    /// Scan pipeline over the current extractor, `None` when scanning is disabled
    pub async fn pipeline(&self) -> Option<CardPipeline> {
        let extractor = self.extractor.read().await.clone()?;
        let options = PipelineOptions {
            extraction_timeout: Duration::from_secs(self.extractor_config.timeout_secs),
            confirmation_timeout: Duration::from_secs(self.extractor_config.confirmation_timeout_secs),
        };
        Some(CardPipeline::new(self.db.clone(), extractor, self.verifier(), options))
    }

    /// Remember an error for /health
    pub async fn record_error(&self, message: impl Into<String>) {
        *self.last_error.write().await = Some(message.into());
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::card_routes())
        .merge(api::checklist_routes())
        .merge(api::settings_routes())
        .merge(api::health_routes())
        .merge(api::event_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
