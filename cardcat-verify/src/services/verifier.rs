//! Card Verification Service
//!
//! Reconciles an extracted card against its set checklist and grades every
//! field it can judge. Verification is advisory: storage problems are logged
//! and reported as warnings, never returned as errors.
//!
//! Checks, in order:
//! 1. Identity (manufacturer, brand, year) must be present
//! 2. Checklist lookup, recording a miss when none exists
//! 3. Card number against the checklist
//! 4. Player name, exact entry first, then fuzzy across the set
//! 5. Parallel/variation name against known variations
//! 6. Visual cues against the extracted flags
//! 7. Grading fields for internal consistency

use crate::db::{checklists, missing};
use crate::matcher::{
    best_match, normalize_parallel_name, percent, PLAYER_MATCH_THRESHOLD,
    VARIATION_MATCH_THRESHOLD,
};
use crate::models::verification::fields;
use crate::models::{
    ChecklistKey, Confidence, ExtractedCard, FieldConfidence, SetChecklist, VerificationResult,
};
use cardcat_common::events::{CatalogEvent, EventBus};
use cardcat_common::Result;
use chrono::Utc;
use sqlx::SqlitePool;

/// Checklist-backed card verifier
#[derive(Clone)]
pub struct CardVerifier {
    db: SqlitePool,
    event_bus: Option<EventBus>,
}

impl CardVerifier {
    pub fn new(db: SqlitePool) -> Self {
        Self { db, event_bus: None }
    }

    /// Emit `ChecklistMissing` / `CardVerified` on this bus
    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    /// Verify one card
    ///
    /// Always returns a result. A storage error mid-way is recorded as a
    /// warning on whatever was evaluated so far.
    pub async fn verify(&self, card: &ExtractedCard) -> VerificationResult {
        let mut result = VerificationResult::default();

        if let Err(e) = self.verify_into(card, &mut result).await {
            tracing::warn!(card = %card.label(), error = %e, "Checklist verification incomplete");
            result
                .warnings
                .push(format!("Checklist verification incomplete: {}", e));
            result.recompute_overall();
        }

        result
    }

    async fn verify_into(&self, card: &ExtractedCard, result: &mut VerificationResult) -> Result<()> {
        let key = match checklist_key(card) {
            Some(key) => key,
            None => {
                let missing = card.missing_identity_fields();
                result.warnings.push(format!(
                    "Missing identity fields ({}); cannot look up checklist",
                    missing.join(", ")
                ));
                result.overall_confidence = Confidence::Low;
                return Ok(());
            }
        };

        let checklist = match checklists::find_checklist(&self.db, &key).await? {
            Some(checklist) => checklist,
            None => {
                result
                    .warnings
                    .push(format!("No checklist available for {}", key));
                check_visual_cues(card, result);
                check_grading(card, result);
                result.overall_confidence = Confidence::Low;

                let record = missing::record_miss(&self.db, &key).await?;
                tracing::debug!(checklist = %key, hit_count = record.hit_count, "Checklist lookup miss");
                if let Some(bus) = &self.event_bus {
                    bus.emit_lossy(CatalogEvent::ChecklistMissing {
                        manufacturer: record.manufacturer,
                        brand: record.brand,
                        year: record.year,
                        sport: record.sport,
                        hit_count: record.hit_count,
                        timestamp: Utc::now(),
                    });
                }
                return Ok(());
            }
        };

        *result = evaluate_against_checklist(card, &checklist);
        tracing::debug!(
            card = %card.label(),
            checklist_id = checklist.id,
            overall = %result.overall_confidence,
            "Card verified against checklist"
        );
        Ok(())
    }

    /// Announce a finished verification on the event bus
    pub fn announce(&self, card: &ExtractedCard, result: &VerificationResult, confirmation_ran: bool) {
        if let Some(bus) = &self.event_bus {
            bus.emit_lossy(CatalogEvent::CardVerified {
                card_label: card.label(),
                overall_confidence: result.overall_confidence.to_string(),
                confirmation_ran,
                timestamp: Utc::now(),
            });
        }
    }
}

/// Checklist key for a card, `None` unless manufacturer, brand and year are present
pub fn checklist_key(card: &ExtractedCard) -> Option<ChecklistKey> {
    let manufacturer = card.manufacturer.as_deref()?.trim();
    let brand = card.brand.as_deref()?.trim();
    let year = card.year?;
    if manufacturer.is_empty() || brand.is_empty() {
        return None;
    }
    Some(ChecklistKey::new(manufacturer, brand, year, card.sport.clone()))
}

/// Run every field check against a found checklist
pub fn evaluate_against_checklist(card: &ExtractedCard, checklist: &SetChecklist) -> VerificationResult {
    let mut result = VerificationResult {
        checklist_match: true,
        ..Default::default()
    };

    check_card_and_player(card, checklist, &mut result);
    check_variation(card, checklist, &mut result);
    check_visual_cues(card, &mut result);
    check_grading(card, &mut result);

    result.recompute_overall();
    result
}

/// Card number and player name checks
pub fn check_card_and_player(card: &ExtractedCard, checklist: &SetChecklist, result: &mut VerificationResult) {
    let number = card.card_number();

    let entries = number
        .map(|n| checklist.cards_with_number(n))
        .unwrap_or_default();

    match number {
        Some(n) if !entries.is_empty() => {
            result.card_number_verified = true;
            result.push_field(FieldConfidence::new(
                fields::CARD_NUMBER,
                n,
                Confidence::High,
                "Card number found in checklist",
            ));
        }
        Some(n) => {
            result.push_field(FieldConfidence::new(
                fields::CARD_NUMBER,
                n,
                Confidence::Low,
                format!(
                    "Card #{} not found in checklist ({} cards known)",
                    n.trim_start_matches('#'),
                    checklist.cards.len()
                ),
            ));
        }
        None => {
            result.push_field(FieldConfidence::new(
                fields::CARD_NUMBER,
                "",
                Confidence::Low,
                "No card number extracted",
            ));
        }
    }

    if !entries.is_empty() {
        // Several entries can share a number (short-print variants); judge
        // against the closest one.
        let player = card.player().unwrap_or("");
        let best = best_match(player, entries.iter().map(|e| e.player_name.as_str()));
        let (expected, score) = match best {
            Some(m) => (m.value, m.score),
            None => return,
        };

        if score >= PLAYER_MATCH_THRESHOLD {
            result.player_verified = true;
            result.push_field(FieldConfidence::new(
                fields::PLAYER_NAME,
                player,
                Confidence::High,
                format!("Matches checklist entry ({})", percent(score)),
            ));
        } else {
            let number = number.unwrap_or_default().trim_start_matches('#');
            let reason = if player.is_empty() {
                format!("No player name extracted; checklist lists #{} as {}", number, expected)
            } else {
                format!("Checklist lists #{} as {}", number, expected)
            };
            let confidence = if player.is_empty() {
                Confidence::Low
            } else {
                Confidence::Conflict
            };
            result.push_field(FieldConfidence::new(fields::PLAYER_NAME, player, confidence, reason));
            result.suggested_player_name = Some(expected.to_string());
            result.suggestions.push(format!(
                "Card #{} is {} in the checklist; accept the correction?",
                number, expected
            ));
        }
        return;
    }

    let player = match card.player() {
        Some(player) => player,
        None => return,
    };

    match best_match(player, checklist.cards.iter().map(|c| c.player_name.as_str())) {
        Some(m) if m.score >= PLAYER_MATCH_THRESHOLD => {
            result.push_field(FieldConfidence::new(
                fields::PLAYER_NAME,
                player,
                Confidence::Medium,
                format!("Fuzzy match to {} ({})", m.value, percent(m.score)),
            ));
        }
        _ => {
            result.push_field(FieldConfidence::new(
                fields::PLAYER_NAME,
                player,
                Confidence::Low,
                "Player not found in checklist",
            ));
        }
    }
}

/// Parallel/variation check (field `parallel`)
pub fn check_variation(card: &ExtractedCard, checklist: &SetChecklist, result: &mut VerificationResult) {
    let parallel = match card.parallel() {
        Some(parallel) => parallel,
        None => {
            if card.is_base() {
                if checklist.known_variation("base").is_some() {
                    result.variation_verified = true;
                    result.push_field(FieldConfidence::new(
                        fields::PARALLEL,
                        "Base",
                        Confidence::High,
                        "Base is a known variation",
                    ));
                } else {
                    result.push_field(FieldConfidence::new(
                        fields::PARALLEL,
                        "Base",
                        Confidence::Medium,
                        "Base assumed",
                    ));
                }
            }
            return;
        }
    };

    if let Some(known) = checklist.known_variation(parallel) {
        result.variation_verified = true;
        result.push_field(FieldConfidence::new(
            fields::PARALLEL,
            parallel,
            Confidence::High,
            format!("Known variation: {}", known),
        ));
        return;
    }

    let wanted = normalize_parallel_name(parallel);
    let resolved: Vec<String> = checklist
        .known_variations
        .iter()
        .map(|v| normalize_parallel_name(v))
        .collect();
    let best = best_match(&wanted, resolved.iter().map(String::as_str));

    match best {
        Some(m) if m.score >= VARIATION_MATCH_THRESHOLD => {
            let suggestion = checklist.known_variations[m.index].clone();
            result.push_field(FieldConfidence::new(
                fields::PARALLEL,
                parallel,
                Confidence::Medium,
                format!("Close to known variation {} ({})", suggestion, percent(m.score)),
            ));
            result.suggestions.push(format!(
                "Parallel: did you mean '{}'? ({} match)",
                suggestion,
                percent(m.score)
            ));
            result.suggested_variation = Some(suggestion);
        }
        _ => {
            let score = best.map(|m| m.score).unwrap_or(0.0);
            result.push_field(FieldConfidence::new(
                fields::PARALLEL,
                parallel,
                Confidence::Conflict,
                format!("Not a known variation (closest {})", percent(score)),
            ));
            result.warnings.push(format!(
                "'{}' is not a known variation for {} {} {} (possible hallucination)",
                parallel, checklist.year, checklist.manufacturer, checklist.brand
            ));
        }
    }
}

/// Cross-check visual cues against the extracted flags
///
/// Adds warnings and suggestions only.
pub fn check_visual_cues(card: &ExtractedCard, result: &mut VerificationResult) {
    let cues = match &card.visual_cues {
        Some(cues) => cues,
        None => return,
    };

    if cues.serial_number_visible && !card.is_numbered {
        let location = cues
            .serial_number_location
            .as_deref()
            .map(|l| format!(" ({})", l))
            .unwrap_or_default();
        result.warnings.push(format!(
            "Serial number visible{} but card not marked as numbered",
            location
        ));
        result
            .suggestions
            .push("Mark the card as serial numbered".to_string());
    }

    if card.is_numbered && !cues.serial_number_visible {
        result
            .warnings
            .push("Card marked as numbered but no serial number visible".to_string());
    }

    if (cues.has_foil || cues.has_refractor_pattern) && card.is_base() && card.parallel().is_none() {
        let finish = if cues.has_refractor_pattern {
            "Refractor"
        } else {
            "Foil"
        };
        result.warnings.push(format!(
            "{} finish detected on a Base card with no parallel",
            finish
        ));
        result
            .suggestions
            .push("Check whether this is a parallel rather than Base".to_string());
    }

    if cues.rookie_logo_visible && !card.is_rookie {
        result
            .warnings
            .push("Rookie logo visible but card not marked as rookie".to_string());
    }

    if cues.autograph_sticker_visible && !card.is_autograph {
        result
            .warnings
            .push("Autograph sticker visible but card not marked as autographed".to_string());
    }

    if cues.relic_swatch_visible && !card.is_relic {
        result
            .warnings
            .push("Relic swatch visible but card not marked as relic".to_string());
    }
}

/// Grading fields must agree with each other
///
/// Mixed grading data records a Low `grading` field.
pub fn check_grading(card: &ExtractedCard, result: &mut VerificationResult) {
    let company = card
        .grading_company
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty());
    let grade = card.grade.as_deref().map(str::trim).filter(|g| !g.is_empty());

    let problem = if card.is_graded && company.is_none() {
        Some("Card marked as graded but no grading company extracted")
    } else if !card.is_graded && (company.is_some() || grade.is_some()) {
        Some("Grading company or grade present but card not marked as graded")
    } else {
        None
    };

    if let Some(problem) = problem {
        let value = match (company, grade) {
            (Some(c), Some(g)) => format!("{} {}", c, g),
            (Some(c), None) => c.to_string(),
            (None, Some(g)) => g.to_string(),
            (None, None) => String::new(),
        };
        result.push_field(FieldConfidence::new(fields::GRADING, value, Confidence::Low, problem));
        result.warnings.push(problem.to_string());
    }
}

/// Apply high-confidence suggestions to a copy of the card
///
/// Player name is replaced only when the card number was verified; the
/// parallel only when its field is Medium.
pub fn apply_suggestions(card: &ExtractedCard, result: &VerificationResult) -> ExtractedCard {
    let mut corrected = card.clone();

    if result.card_number_verified {
        if let Some(player) = &result.suggested_player_name {
            corrected.player_name = Some(player.clone());
        }
    }

    let parallel_medium = result
        .field(fields::PARALLEL)
        .map(|f| f.confidence == Confidence::Medium)
        .unwrap_or(false);
    if parallel_medium {
        if let Some(variation) = &result.suggested_variation {
            corrected.parallel_name = Some(variation.clone());
        }
    }

    corrected
}
