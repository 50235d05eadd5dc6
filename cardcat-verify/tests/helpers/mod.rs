//! Shared fixtures for cardcat-verify integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use cardcat_verify::db::checklists::merge_checklist;
use cardcat_verify::models::{
    CardImage, ChecklistCard, DataSource, ExtractedCard, ScanOutcome, SetChecklist,
};
use cardcat_verify::services::{Extractor, ExtractorError};
use chrono::Utc;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Single-connection in-memory database with the full schema
pub async fn memory_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("Failed to create in-memory database");
    cardcat_verify::db::init_tables(&pool)
        .await
        .expect("Failed to initialize schema");
    pool
}

/// File-backed multi-connection pool, for tests that need real concurrency
pub async fn file_pool(dir: &Path) -> SqlitePool {
    cardcat_verify::db::init_database_pool(&dir.join("cardcat.db"))
        .await
        .expect("Failed to create database file")
}

pub fn entry(number: &str, player: &str, source: DataSource) -> ChecklistCard {
    ChecklistCard {
        card_number: number.to_string(),
        player_name: player.to_string(),
        team: None,
        is_rookie: false,
        source,
    }
}

/// 2020 Panini Prizm Football with #88 Justin Jefferson
pub fn prizm_checklist(known_variations: &[&str]) -> SetChecklist {
    SetChecklist {
        id: 0,
        manufacturer: "Panini".to_string(),
        brand: "Prizm".to_string(),
        year: 2020,
        sport: Some("Football".to_string()),
        cards: vec![
            entry("88", "Justin Jefferson", DataSource::Seed),
            entry("307", "Joe Burrow", DataSource::Seed),
        ],
        known_variations: known_variations.iter().map(|v| v.to_string()).collect(),
        total_base_cards: 300,
        data_source: DataSource::Seed,
        cached_at: Utc::now(),
        last_enriched_at: None,
    }
}

/// Store a checklist and return its id
pub async fn store_checklist(pool: &SqlitePool, checklist: &SetChecklist) -> i64 {
    merge_checklist(pool, checklist, checklist.data_source)
        .await
        .expect("Failed to store checklist")
        .checklist_id
}

pub fn prizm_card(number: &str, player: &str, parallel: Option<&str>) -> ExtractedCard {
    ExtractedCard {
        manufacturer: Some("Panini".to_string()),
        brand: Some("Prizm".to_string()),
        year: Some(2020),
        sport: Some("Football".to_string()),
        card_number: Some(number.to_string()),
        player_name: Some(player.to_string()),
        parallel_name: parallel.map(str::to_string),
        variation_type: Some(if parallel.is_some() { "Parallel" } else { "Base" }.to_string()),
        ..Default::default()
    }
}

pub fn card_in_set(manufacturer: &str, brand: &str, year: i32, number: &str, player: &str) -> ExtractedCard {
    ExtractedCard {
        manufacturer: Some(manufacturer.to_string()),
        brand: Some(brand.to_string()),
        year: Some(year),
        sport: Some("Baseball".to_string()),
        card_number: Some(number.to_string()),
        player_name: Some(player.to_string()),
        ..Default::default()
    }
}

pub fn test_image() -> CardImage {
    CardImage::new(vec![0xFF, 0xD8, 0xFF, 0xE0], "image/jpeg")
}

/// Scripted extractor
///
/// `scan` returns the configured card (or error) after `scan_delay`;
/// `send_prompt` pops scripted responses, falling back to `default_prompt`.
pub struct MockExtractor {
    scan_result: Mutex<Result<ExtractedCard, ExtractorError>>,
    prompt_responses: Mutex<VecDeque<Result<String, ExtractorError>>>,
    default_prompt: String,
    scan_delay: Duration,
    prompt_delay: Duration,
    pub scan_calls: AtomicUsize,
    pub prompt_calls: AtomicUsize,
    in_flight: AtomicUsize,
    pub peak_in_flight: AtomicUsize,
}

impl MockExtractor {
    pub fn returning(card: ExtractedCard) -> Self {
        Self {
            scan_result: Mutex::new(Ok(card)),
            prompt_responses: Mutex::new(VecDeque::new()),
            default_prompt: "{}".to_string(),
            scan_delay: Duration::ZERO,
            prompt_delay: Duration::ZERO,
            scan_calls: AtomicUsize::new(0),
            prompt_calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn failing(error: ExtractorError) -> Self {
        let mock = Self::returning(ExtractedCard::default());
        *mock.scan_result.lock().unwrap() = Err(error);
        mock
    }

    pub fn with_prompt_response(self, response: impl Into<String>) -> Self {
        self.prompt_responses
            .lock()
            .unwrap()
            .push_back(Ok(response.into()));
        self
    }

    pub fn with_prompt_error(self, error: ExtractorError) -> Self {
        self.prompt_responses.lock().unwrap().push_back(Err(error));
        self
    }

    pub fn with_scan_delay(mut self, delay: Duration) -> Self {
        self.scan_delay = delay;
        self
    }

    pub fn with_prompt_delay(mut self, delay: Duration) -> Self {
        self.prompt_delay = delay;
        self
    }

    pub fn scans(&self) -> usize {
        self.scan_calls.load(Ordering::SeqCst)
    }

    pub fn prompts(&self) -> usize {
        self.prompt_calls.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }
}

fn clone_error(error: &ExtractorError) -> ExtractorError {
    match error {
        ExtractorError::NotConfigured(m) => ExtractorError::NotConfigured(m.clone()),
        ExtractorError::Network(m) => ExtractorError::Network(m.clone()),
        ExtractorError::Timeout => ExtractorError::Timeout,
        ExtractorError::RateLimited => ExtractorError::RateLimited,
        ExtractorError::Api(code, m) => ExtractorError::Api(*code, m.clone()),
        ExtractorError::Parse(m) => ExtractorError::Parse(m.clone()),
    }
}

#[async_trait]
impl Extractor for MockExtractor {
    fn source_id(&self) -> &'static str {
        "mock"
    }

    async fn scan(&self, _image: &CardImage, _back: Option<&CardImage>) -> Result<ScanOutcome, ExtractorError> {
        self.scan_calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);

        if !self.scan_delay.is_zero() {
            tokio::time::sleep(self.scan_delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let scripted = match &*self.scan_result.lock().unwrap() {
            Ok(card) => Ok(card.clone()),
            Err(e) => Err(clone_error(e)),
        };
        scripted.map(|card| ScanOutcome {
            card,
            field_hints: Default::default(),
        })
    }

    async fn send_prompt(
        &self,
        _image: &CardImage,
        _prompt: &str,
        _back: Option<&CardImage>,
    ) -> Result<String, ExtractorError> {
        self.prompt_calls.fetch_add(1, Ordering::SeqCst);
        if !self.prompt_delay.is_zero() {
            tokio::time::sleep(self.prompt_delay).await;
        }
        let next = self.prompt_responses.lock().unwrap().pop_front();
        next.unwrap_or_else(|| Ok(self.default_prompt.clone()))
    }
}
