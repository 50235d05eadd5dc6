//! Packaged seed corpus
//!
//! A read-only set of checklists compiled into the binary. The learning
//! engine consults it on first sight of an unseen set; `seed_database`
//! optionally bulk-loads it at startup.

use crate::db::checklists::{merge_checklist, MergeOutcome};
use crate::models::{ChecklistKey, DataSource, SetChecklist};
use cardcat_common::Result;
use sqlx::SqlitePool;

const PACKAGED_SEED: &str = include_str!("../seed/checklists.json");

#[derive(Debug, Clone, Default)]
pub struct SeedCorpus {
    checklists: Vec<SetChecklist>,
}

impl SeedCorpus {
    /// Corpus compiled into the binary
    pub fn packaged() -> Result<Self> {
        Self::from_json(PACKAGED_SEED)
    }

    /// Parse a JSON array of checklists; every entry is tagged `seed`
    pub fn from_json(json: &str) -> Result<Self> {
        let mut checklists: Vec<SetChecklist> = serde_json::from_str(json)?;
        for checklist in &mut checklists {
            checklist.data_source = DataSource::Seed;
            for card in &mut checklist.cards {
                card.source = DataSource::Seed;
            }
        }
        Ok(Self { checklists })
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// Exact case-insensitive lookup
    pub fn find_exact(&self, key: &ChecklistKey) -> Option<&SetChecklist> {
        self.checklists
            .iter()
            .find(|checklist| key.matches_exactly(&checklist.key()))
    }

    pub fn checklists(&self) -> &[SetChecklist] {
        &self.checklists
    }

    pub fn len(&self) -> usize {
        self.checklists.len()
    }

    pub fn is_empty(&self) -> bool {
        self.checklists.is_empty()
    }
}

/// Totals from a startup seeding run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeedReport {
    pub checklists_created: usize,
    pub cards_added: usize,
    pub variations_added: usize,
}

impl SeedReport {
    fn absorb(&mut self, outcome: MergeOutcome) {
        if outcome.created {
            self.checklists_created += 1;
        }
        self.cards_added += outcome.cards_added;
        self.variations_added += outcome.variations_added;
    }
}

/// Merge every seed checklist into the database
///
/// Safe to run on every startup: entries already present are skipped.
pub async fn seed_database(pool: &SqlitePool, corpus: &SeedCorpus) -> Result<SeedReport> {
    let mut report = SeedReport::default();

    for checklist in corpus.checklists() {
        let outcome = merge_checklist(pool, checklist, DataSource::Seed).await?;
        tracing::debug!(
            checklist = %checklist.key(),
            created = outcome.created,
            cards_added = outcome.cards_added,
            "Seeded checklist"
        );
        report.absorb(outcome);
    }

    tracing::info!(
        checklists_created = report.checklists_created,
        cards_added = report.cards_added,
        variations_added = report.variations_added,
        "Seed corpus loaded"
    );

    Ok(report)
}
