//! Checklist verification against a stored corpus

mod helpers;

use cardcat_common::events::{CatalogEvent, EventBus};
use cardcat_verify::db::{checklists, missing};
use cardcat_verify::models::verification::fields;
use cardcat_verify::models::{Confidence, ExtractedCard, VisualCues};
use cardcat_verify::services::verifier::apply_suggestions;
use cardcat_verify::services::CardVerifier;
use helpers::*;

#[tokio::test]
async fn test_padded_number_and_exact_player_verify() {
    let pool = memory_pool().await;
    store_checklist(&pool, &prizm_checklist(&["Silver"])).await;

    let result = CardVerifier::new(pool)
        .verify(&prizm_card("088", "Justin Jefferson", None))
        .await;

    assert!(result.checklist_match);
    assert!(result.card_number_verified);
    assert!(result.player_verified);
    assert_ne!(result.overall_confidence, Confidence::Conflict);
    assert_eq!(
        result.field(fields::CARD_NUMBER).map(|f| f.confidence),
        Some(Confidence::High)
    );
}

#[tokio::test]
async fn test_wrong_player_for_number_is_conflict_with_correction() {
    let pool = memory_pool().await;
    store_checklist(&pool, &prizm_checklist(&["Silver"])).await;

    let result = CardVerifier::new(pool)
        .verify(&prizm_card("88", "Joe Nobody", None))
        .await;

    assert!(result.card_number_verified);
    assert!(!result.player_verified);
    assert_eq!(
        result.field(fields::PLAYER_NAME).map(|f| f.confidence),
        Some(Confidence::Conflict)
    );
    assert_eq!(result.suggested_player_name.as_deref(), Some("Justin Jefferson"));
    assert!(!result.suggestions.is_empty());
    assert_eq!(result.overall_confidence, Confidence::Conflict);
}

#[tokio::test]
async fn test_misspelled_parallel_gets_suggestion() {
    let pool = memory_pool().await;
    store_checklist(&pool, &prizm_checklist(&["Silver"])).await;

    let result = CardVerifier::new(pool)
        .verify(&prizm_card("88", "Justin Jefferson", Some("Silverr")))
        .await;

    let parallel = result.field(fields::PARALLEL).expect("parallel field");
    assert_eq!(parallel.confidence, Confidence::Medium);
    assert_eq!(result.suggested_variation.as_deref(), Some("Silver"));
    assert!(result.suggestions.iter().any(|s| s.contains("Silver")));
}

#[tokio::test]
async fn test_unknown_parallel_flagged_as_hallucination() {
    let pool = memory_pool().await;
    store_checklist(&pool, &prizm_checklist(&["Silver", "Gold"])).await;

    let result = CardVerifier::new(pool)
        .verify(&prizm_card("88", "Justin Jefferson", Some("Mojo Refractor Rainbow")))
        .await;

    assert_eq!(
        result.field(fields::PARALLEL).map(|f| f.confidence),
        Some(Confidence::Conflict)
    );
    assert!(result.warning_mentions("possible hallucination"));
    assert_eq!(result.overall_confidence, Confidence::Conflict);
}

#[tokio::test]
async fn test_missing_identity_short_circuits_without_bookkeeping() {
    let pool = memory_pool().await;
    let card = ExtractedCard {
        brand: Some("Prizm".to_string()),
        year: Some(2020),
        card_number: Some("88".to_string()),
        ..Default::default()
    };

    let result = CardVerifier::new(pool.clone()).verify(&card).await;

    assert_eq!(result.overall_confidence, Confidence::Low);
    assert!(result.warning_mentions("missing identity fields"));
    assert!(result.warning_mentions("manufacturer"));
    assert!(missing::list_missing(&pool).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_lookup_miss_counts_hits_and_emits_event() {
    let pool = memory_pool().await;
    let bus = EventBus::new(16);
    let mut rx = bus.subscribe();
    let verifier = CardVerifier::new(pool.clone()).with_event_bus(bus);
    let card = card_in_set("Bowman", "Chrome", 2019, "BCP-1", "Wander Franco");

    let first = verifier.verify(&card).await;
    verifier.verify(&card).await;

    assert_eq!(first.overall_confidence, Confidence::Low);
    assert!(!first.checklist_match);
    assert!(first.warning_mentions("no checklist available"));

    let records = missing::list_missing(&pool).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].hit_count, 2);

    match rx.try_recv().expect("event emitted") {
        CatalogEvent::ChecklistMissing { brand, hit_count, .. } => {
            assert_eq!(brand, "Chrome");
            assert_eq!(hit_count, 1);
        }
        other => panic!("unexpected event: {:?}", other),
    }
}

#[tokio::test]
async fn test_sportless_checklist_matches_any_sport() {
    let pool = memory_pool().await;
    let mut checklist = prizm_checklist(&[]);
    checklist.sport = None;
    store_checklist(&pool, &checklist).await;

    let result = CardVerifier::new(pool)
        .verify(&prizm_card("307", "Joe Burrow", None))
        .await;

    assert!(result.checklist_match);
    assert!(result.card_number_verified);
}

#[tokio::test]
async fn test_unknown_number_with_fuzzy_player_is_medium() {
    let pool = memory_pool().await;
    store_checklist(&pool, &prizm_checklist(&[])).await;

    let result = CardVerifier::new(pool)
        .verify(&prizm_card("999", "Justin Jeffersen", None))
        .await;

    assert!(!result.card_number_verified);
    let number = result.field(fields::CARD_NUMBER).unwrap();
    assert_eq!(number.confidence, Confidence::Low);
    assert!(number.reason.contains("2 cards known"));

    let player = result.field(fields::PLAYER_NAME).unwrap();
    assert_eq!(player.confidence, Confidence::Medium);
    assert!(player.reason.contains("Justin Jefferson"));
}

#[tokio::test]
async fn test_visual_cue_and_grading_mismatches_warn() {
    let pool = memory_pool().await;
    store_checklist(&pool, &prizm_checklist(&["Silver"])).await;

    let mut card = prizm_card("88", "Justin Jefferson", None);
    card.visual_cues = Some(VisualCues {
        has_refractor_pattern: true,
        serial_number_visible: true,
        rookie_logo_visible: true,
        ..Default::default()
    });
    card.grading_company = Some("PSA".to_string());
    card.grade = Some("10".to_string());

    let result = CardVerifier::new(pool).verify(&card).await;

    assert!(result.warning_mentions("serial number visible"));
    assert!(result.warning_mentions("refractor finish"));
    assert!(result.warning_mentions("rookie logo"));
    let grading = result.field(fields::GRADING).expect("grading field");
    assert_eq!(grading.confidence, Confidence::Low);
    assert_eq!(grading.value, "PSA 10");
}

#[tokio::test]
async fn test_apply_suggestions_corrects_player() {
    let pool = memory_pool().await;
    store_checklist(&pool, &prizm_checklist(&["Silver"])).await;
    let card = prizm_card("88", "Joe Nobody", Some("Silverr"));

    let result = CardVerifier::new(pool).verify(&card).await;
    let corrected = apply_suggestions(&card, &result);

    assert_eq!(corrected.player_name.as_deref(), Some("Justin Jefferson"));
    assert_eq!(corrected.parallel_name.as_deref(), Some("Silver"));
    assert_eq!(corrected.card_number, card.card_number);
}

#[tokio::test]
async fn test_storage_failure_degrades_to_warning() {
    let pool = memory_pool().await;
    store_checklist(&pool, &prizm_checklist(&["Silver"])).await;
    assert_eq!(checklists::count_checklists(&pool).await.unwrap(), 1);
    pool.close().await;

    let result = CardVerifier::new(pool)
        .verify(&prizm_card("88", "Justin Jefferson", None))
        .await;

    assert!(result.warning_mentions("checklist verification incomplete"));
    assert_eq!(result.overall_confidence, Confidence::Low);
}
