//! Reference corpus entities
//!
//! A `SetChecklist` is keyed by (manufacturer, brand, year, sport). Keys are
//! compared after normalization, and an absent sport on either side acts as a
//! wildcard.

use crate::matcher::{normalize, normalize_card_number, normalize_parallel_name};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Provenance of a checklist or of a single entry
///
/// Checklists move through a small lattice: any two different provenances
/// join to `Mixed`, and `Mixed` absorbs everything. Individual entries are
/// never `Mixed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataSource {
    Seed,
    Learned,
    Imported,
    Mixed,
}

impl DataSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataSource::Seed => "seed",
            DataSource::Learned => "learned",
            DataSource::Imported => "imported",
            DataSource::Mixed => "mixed",
        }
    }

    /// Provenance after entries from `contribution` were added
    pub fn join(self, contribution: DataSource) -> DataSource {
        if self == contribution {
            self
        } else {
            DataSource::Mixed
        }
    }

    /// True when `next` is reachable from `self` in the lattice
    pub fn can_transition_to(self, next: DataSource) -> bool {
        self == next || next == DataSource::Mixed
    }
}

impl std::fmt::Display for DataSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "seed" => Ok(DataSource::Seed),
            "learned" => Ok(DataSource::Learned),
            "imported" => Ok(DataSource::Imported),
            "mixed" => Ok(DataSource::Mixed),
            other => Err(format!("unknown data source: {}", other)),
        }
    }
}

/// Identity of one print run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChecklistKey {
    pub manufacturer: String,
    pub brand: String,
    pub year: i32,
    pub sport: Option<String>,
}

impl ChecklistKey {
    pub fn new(
        manufacturer: impl Into<String>,
        brand: impl Into<String>,
        year: i32,
        sport: Option<String>,
    ) -> Self {
        Self {
            manufacturer: manufacturer.into().trim().to_string(),
            brand: brand.into().trim().to_string(),
            year,
            sport: sport
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty()),
        }
    }

    pub fn norm_manufacturer(&self) -> String {
        normalize(&self.manufacturer)
    }

    pub fn norm_brand(&self) -> String {
        normalize(&self.brand)
    }

    /// Normalized sport, "" when absent (stored form of the wildcard)
    pub fn sport_key(&self) -> String {
        self.sport.as_deref().map(normalize).unwrap_or_default()
    }

    /// Lookup semantics: normalized manufacturer/brand, exact year, sport wildcard
    pub fn matches(&self, other: &ChecklistKey) -> bool {
        if self.year != other.year
            || self.norm_manufacturer() != other.norm_manufacturer()
            || self.norm_brand() != other.norm_brand()
        {
            return false;
        }

        let (mine, theirs) = (self.sport_key(), other.sport_key());
        mine.is_empty() || theirs.is_empty() || mine == theirs
    }

    /// Seed-corpus semantics: trimmed case-insensitive equality
    ///
    /// A missing sport on the query still matches any sport.
    pub fn matches_exactly(&self, other: &ChecklistKey) -> bool {
        self.year == other.year
            && self.manufacturer.eq_ignore_ascii_case(&other.manufacturer)
            && self.brand.eq_ignore_ascii_case(&other.brand)
            && match (&self.sport, &other.sport) {
                (Some(a), Some(b)) => a.eq_ignore_ascii_case(b),
                _ => true,
            }
    }
}

impl std::fmt::Display for ChecklistKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} {}", self.year, self.manufacturer, self.brand)?;
        if let Some(sport) = &self.sport {
            write!(f, " ({})", sport)?;
        }
        Ok(())
    }
}

/// One card of a checklist
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChecklistCard {
    /// Card number as printed
    pub card_number: String,
    pub player_name: String,
    #[serde(default)]
    pub team: Option<String>,
    #[serde(default)]
    pub is_rookie: bool,
    #[serde(default = "default_entry_source")]
    pub source: DataSource,
}

fn default_entry_source() -> DataSource {
    DataSource::Imported
}

impl ChecklistCard {
    pub fn normalized_number(&self) -> String {
        normalize_card_number(&self.card_number)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetChecklist {
    #[serde(default)]
    pub id: i64,
    pub manufacturer: String,
    pub brand: String,
    pub year: i32,
    #[serde(default)]
    pub sport: Option<String>,
    #[serde(default)]
    pub cards: Vec<ChecklistCard>,
    /// Raw parallel/variation names as first recorded
    #[serde(default)]
    pub known_variations: Vec<String>,
    #[serde(default)]
    pub total_base_cards: i64,
    #[serde(default = "default_checklist_source")]
    pub data_source: DataSource,
    #[serde(default = "Utc::now")]
    pub cached_at: DateTime<Utc>,
    #[serde(default)]
    pub last_enriched_at: Option<DateTime<Utc>>,
}

fn default_checklist_source() -> DataSource {
    DataSource::Imported
}

impl SetChecklist {
    pub fn key(&self) -> ChecklistKey {
        ChecklistKey::new(
            self.manufacturer.clone(),
            self.brand.clone(),
            self.year,
            self.sport.clone(),
        )
    }

    /// Cards whose normalized number equals `card_number`'s
    pub fn cards_with_number(&self, card_number: &str) -> Vec<&ChecklistCard> {
        let wanted = normalize_card_number(card_number);
        self.cards
            .iter()
            .filter(|c| c.normalized_number().eq_ignore_ascii_case(&wanted))
            .collect()
    }

    pub fn has_card_number(&self, card_number: &str) -> bool {
        !self.cards_with_number(card_number).is_empty()
    }

    /// Known variation equal to `name` after alias resolution
    pub fn known_variation(&self, name: &str) -> Option<&str> {
        let wanted = normalize_parallel_name(name);
        self.known_variations
            .iter()
            .map(String::as_str)
            .find(|v| normalize_parallel_name(v) == wanted)
    }

    pub fn summary(&self) -> ChecklistSummary {
        ChecklistSummary {
            id: self.id,
            manufacturer: self.manufacturer.clone(),
            brand: self.brand.clone(),
            year: self.year,
            sport: self.sport.clone(),
            card_count: self.cards.len(),
            variation_count: self.known_variations.len(),
            total_base_cards: self.total_base_cards,
            data_source: self.data_source,
            cached_at: self.cached_at,
            last_enriched_at: self.last_enriched_at,
        }
    }
}

/// Pick the checklist for `key` out of `corpus`
///
/// A checklist whose sport equals the query's wins over a sport-less one;
/// `None` when nothing matches.
pub fn select_checklist<'a>(corpus: &'a [SetChecklist], key: &ChecklistKey) -> Option<&'a SetChecklist> {
    let wanted_sport = key.sport_key();
    let mut fallback = None;

    for checklist in corpus.iter().filter(|c| c.key().matches(key)) {
        if checklist.key().sport_key() == wanted_sport {
            return Some(checklist);
        }
        if fallback.is_none() {
            fallback = Some(checklist);
        }
    }

    fallback
}

/// Listing row without card/variation payloads
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChecklistSummary {
    pub id: i64,
    pub manufacturer: String,
    pub brand: String,
    pub year: i32,
    pub sport: Option<String>,
    pub card_count: usize,
    pub variation_count: usize,
    pub total_base_cards: i64,
    pub data_source: DataSource,
    pub cached_at: DateTime<Utc>,
    pub last_enriched_at: Option<DateTime<Utc>>,
}

/// A key that was looked up while no checklist existed for it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MissingChecklist {
    pub manufacturer: String,
    pub brand: String,
    pub year: i32,
    pub sport: Option<String>,
    pub hit_count: i64,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}
