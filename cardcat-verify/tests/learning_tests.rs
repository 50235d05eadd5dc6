//! Checklist learning, enrichment, and import/export

mod helpers;

use cardcat_verify::db::settings::VerificationSettings;
use cardcat_verify::db::{checklists, missing};
use cardcat_verify::models::{ChecklistKey, DataSource, ExtractedCard};
use cardcat_verify::seed::SeedCorpus;
use cardcat_verify::services::learning::{ChecklistExport, LearnOutcome};
use cardcat_verify::services::{spawn_learning_worker, CardSaved, CardVerifier, ChecklistLearner, LearningQueue};
use helpers::*;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn learner(pool: &sqlx::SqlitePool) -> ChecklistLearner {
    ChecklistLearner::new(pool.clone(), Arc::new(SeedCorpus::empty()))
}

fn gold_card(number: &str, player: &str) -> ExtractedCard {
    let mut card = card_in_set("Topps", "Finest", 2021, number, player);
    card.parallel_name = Some("Gold Refractor".to_string());
    card
}

#[tokio::test]
async fn test_learning_same_card_twice_never_duplicates() {
    let pool = memory_pool().await;
    let learner = learner(&pool);
    let card = gold_card("12", "Shohei Ohtani");

    let first = learner.learn_from_card(&card).await.unwrap();
    let second = learner.learn_from_card(&card).await.unwrap();

    let id = match first {
        LearnOutcome::Created {
            checklist_id,
            data_source,
            cards_added,
            variations_added,
        } => {
            assert_eq!(data_source, DataSource::Learned);
            assert_eq!(cards_added, 1);
            assert_eq!(variations_added, 1);
            checklist_id
        }
        other => panic!("expected Created, got {:?}", other),
    };
    assert_eq!(second, LearnOutcome::Unchanged { checklist_id: id });

    // "#012" normalizes to the same number
    let mut padded = card.clone();
    padded.card_number = Some("#012".to_string());
    padded.parallel_name = Some("gold refractor".to_string());
    assert_eq!(
        learner.learn_from_card(&padded).await.unwrap(),
        LearnOutcome::Unchanged { checklist_id: id }
    );

    let stored = checklists::get_checklist(&pool, id).await.unwrap().unwrap();
    assert_eq!(stored.cards.len(), 1);
    assert_eq!(stored.known_variations, vec!["Gold Refractor".to_string()]);
}

#[tokio::test]
async fn test_enrichment_joins_provenance_and_never_reverts() {
    let pool = memory_pool().await;
    let id = store_checklist(&pool, &prizm_checklist(&["Silver"])).await;
    let learner = learner(&pool);

    let outcome = learner
        .learn_from_card(&prizm_card("400", "Chase Young", None))
        .await
        .unwrap();
    match outcome {
        LearnOutcome::Enriched {
            checklist_id,
            data_source,
            cards_added,
            ..
        } => {
            assert_eq!(checklist_id, id);
            assert_eq!(data_source, DataSource::Mixed);
            assert_eq!(cards_added, 1);
        }
        other => panic!("expected Enriched, got {:?}", other),
    }

    // A later learned-only contribution must not move it back
    learner
        .learn_from_card(&prizm_card("401", "Tee Higgins", Some("Gold")))
        .await
        .unwrap();

    let stored = checklists::get_checklist(&pool, id).await.unwrap().unwrap();
    assert_eq!(stored.data_source, DataSource::Mixed);
    assert!(stored.last_enriched_at.is_some());
    assert_eq!(stored.cards.len(), 4);
    assert!(stored.known_variation("gold").is_some());
}

#[tokio::test]
async fn test_missing_record_retired_once_learned() {
    let pool = memory_pool().await;
    let verifier = CardVerifier::new(pool.clone());
    let card = gold_card("7", "Mike Trout");

    verifier.verify(&card).await;
    verifier.verify(&card).await;
    verifier.verify(&card).await;
    let records = missing::list_missing(&pool).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].hit_count, 3);

    learner(&pool).learn_from_card(&card).await.unwrap();
    assert!(missing::list_missing(&pool).await.unwrap().is_empty());

    // The learned checklist now answers the lookup
    let result = verifier.verify(&card).await;
    assert!(result.checklist_match);
    assert!(result.card_number_verified);
    assert!(missing::list_missing(&pool).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_unseen_seed_set_adopts_seed_copy() {
    let pool = memory_pool().await;
    let seed = Arc::new(SeedCorpus::packaged().unwrap());
    let key = ChecklistKey::new("Panini", "Prizm", 2020, Some("Football".to_string()));
    let seed_cards = seed.find_exact(&key).unwrap().cards.len();
    let learner = ChecklistLearner::new(pool.clone(), seed);

    let mut card = prizm_card("999", "Practice Squad", None);
    card.manufacturer = Some("PANINI".to_string());
    let outcome = learner.learn_from_card(&card).await.unwrap();

    let id = match outcome {
        LearnOutcome::Created {
            checklist_id,
            data_source,
            ..
        } => {
            assert_eq!(data_source, DataSource::Seed);
            checklist_id
        }
        other => panic!("expected Created, got {:?}", other),
    };

    let stored = checklists::get_checklist(&pool, id).await.unwrap().unwrap();
    assert_eq!(stored.cards.len(), seed_cards + 1);
    assert!(stored.has_card_number("88"));
    assert!(stored.known_variation("Silver").is_some());
}

#[tokio::test]
async fn test_concurrent_learning_of_unseen_set_yields_one_checklist() {
    let dir = tempfile::tempdir().unwrap();
    let pool = file_pool(dir.path()).await;

    let a = learner(&pool);
    let b = learner(&pool);
    let card_a = gold_card("1", "Player One");
    let card_b = gold_card("2", "Player Two");

    let (ra, rb) = tokio::join!(
        tokio::spawn(async move { a.learn_from_card(&card_a).await }),
        tokio::spawn(async move { b.learn_from_card(&card_b).await }),
    );
    let ra = ra.unwrap().unwrap();
    let rb = rb.unwrap().unwrap();
    assert_eq!(ra.checklist_id(), rb.checklist_id());

    assert_eq!(checklists::count_checklists(&pool).await.unwrap(), 1);
    let stored = checklists::get_checklist(&pool, ra.checklist_id().unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.cards.len(), 2);
    assert_eq!(stored.known_variations.len(), 1);
    assert_eq!(stored.data_source, DataSource::Learned);
}

#[tokio::test]
async fn test_sportless_and_tagged_cards_share_one_new_checklist() {
    let dir = tempfile::tempdir().unwrap();
    let pool = file_pool(dir.path()).await;

    let a = learner(&pool);
    let b = learner(&pool);
    let tagged = gold_card("1", "Player One");
    let mut sportless = gold_card("2", "Player Two");
    sportless.sport = None;

    let (ra, rb) = tokio::join!(
        tokio::spawn(async move { a.learn_from_card(&tagged).await }),
        tokio::spawn(async move { b.learn_from_card(&sportless).await }),
    );
    let ra = ra.unwrap().unwrap();
    let rb = rb.unwrap().unwrap();

    assert_eq!(ra.checklist_id(), rb.checklist_id());
    assert_eq!(checklists::count_checklists(&pool).await.unwrap(), 1);
    let stored = checklists::get_checklist(&pool, ra.checklist_id().unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.cards.len(), 2);
}

#[tokio::test]
async fn test_failed_seed_copy_leaves_no_partial_checklist() {
    let pool = memory_pool().await;
    let learner = ChecklistLearner::new(pool.clone(), Arc::new(SeedCorpus::packaged().unwrap()));
    let card = prizm_card("999", "Practice Squad", None);

    // Let the first seed card in, refuse the second
    sqlx::query(
        "CREATE TRIGGER refuse_second_seed_card BEFORE INSERT ON checklist_cards
         WHEN NEW.source = 'seed'
          AND (SELECT COUNT(*) FROM checklist_cards WHERE checklist_id = NEW.checklist_id) >= 1
         BEGIN SELECT RAISE(ABORT, 'seed copy refused'); END",
    )
    .execute(&pool)
    .await
    .unwrap();

    assert!(learner.learn_from_card(&card).await.is_err());
    assert_eq!(checklists::count_checklists(&pool).await.unwrap(), 0);

    sqlx::query("DROP TRIGGER refuse_second_seed_card")
        .execute(&pool)
        .await
        .unwrap();

    let outcome = learner.learn_from_card(&card).await.unwrap();
    assert!(matches!(
        outcome,
        LearnOutcome::Created {
            data_source: DataSource::Seed,
            ..
        }
    ));
    let stored = checklists::get_checklist(&pool, outcome.checklist_id().unwrap())
        .await
        .unwrap()
        .unwrap();
    assert!(stored.has_card_number("88"));
    assert!(stored.has_card_number("307"));
    assert!(stored.has_card_number("999"));
}

#[tokio::test]
async fn test_learning_toggle_gates_saved_cards() {
    let pool = memory_pool().await;
    let learner = learner(&pool);
    let event = CardSaved::new("card-1", gold_card("3", "Someone"));

    let settings = VerificationSettings {
        learning_enabled: false,
        ..Default::default()
    };
    settings.save(&pool).await.unwrap();
    assert!(learner.handle(&event).await.is_none());
    assert_eq!(checklists::count_checklists(&pool).await.unwrap(), 0);

    VerificationSettings::default().save(&pool).await.unwrap();
    assert!(matches!(
        learner.handle(&event).await,
        Some(LearnOutcome::Created { .. })
    ));
}

#[tokio::test]
async fn test_worker_drains_queue_until_cancelled() {
    let pool = memory_pool().await;
    let (queue, rx) = LearningQueue::channel();
    let cancel = CancellationToken::new();
    let worker = spawn_learning_worker(learner(&pool), rx, cancel.clone());

    assert!(queue.enqueue(CardSaved::new("a", gold_card("10", "Ten"))));
    assert!(queue.enqueue(CardSaved::new("b", gold_card("11", "Eleven"))));

    let mut learned = 0;
    for _ in 0..100 {
        let all = checklists::load_all(&pool).await.unwrap();
        learned = all.first().map(|c| c.cards.len()).unwrap_or(0);
        if learned == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(learned, 2);

    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(2), worker)
        .await
        .expect("worker stops on cancel")
        .unwrap();
    assert!(!queue.enqueue(CardSaved::new("c", gold_card("12", "Twelve"))));
}

#[tokio::test]
async fn test_cancelled_worker_still_learns_queued_saves() {
    let pool = memory_pool().await;
    let (queue, rx) = LearningQueue::channel();
    for n in 1..=20 {
        assert!(queue.enqueue(CardSaved::new(format!("card-{}", n), gold_card(&n.to_string(), "Queued"))));
    }

    let cancel = CancellationToken::new();
    cancel.cancel();
    let worker = spawn_learning_worker(learner(&pool), rx, cancel);
    tokio::time::timeout(Duration::from_secs(5), worker)
        .await
        .expect("worker finishes draining")
        .unwrap();

    let all = checklists::load_all(&pool).await.unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].cards.len(), 20);
    assert!(!queue.enqueue(CardSaved::new("late", gold_card("21", "Late"))));
}

#[tokio::test]
async fn test_export_then_import_counts_only_additions() {
    let source = memory_pool().await;
    store_checklist(&source, &prizm_checklist(&["Silver", "Gold"])).await;
    learner(&source)
        .learn_from_card(&gold_card("5", "Five"))
        .await
        .unwrap();
    let export = learner(&source).export_checklists().await.unwrap();
    assert_eq!(export.checklists.len(), 2);

    // Round-trip through JSON as a client would
    let json = serde_json::to_string(&export).unwrap();
    let document: ChecklistExport = serde_json::from_str(&json).unwrap();

    let target = memory_pool().await;
    store_checklist(&target, &prizm_checklist(&["Silver"])).await;
    let importer = learner(&target);

    let report = importer.import_checklists(&document).await.unwrap();
    assert_eq!(report.checklists_created, 1);
    assert_eq!(report.checklists_updated, 1);
    assert_eq!(report.cards_added, 1);
    assert_eq!(report.variations_added, 2);

    let again = importer.import_checklists(&document).await.unwrap();
    assert_eq!(again.checklists_created, 0);
    assert_eq!(again.checklists_updated, 0);
    assert_eq!(again.cards_added, 0);
    assert_eq!(again.variations_added, 0);

    let summaries = checklists::list_checklists(&target).await.unwrap();
    let prizm = summaries.iter().find(|s| s.brand == "Prizm").unwrap();
    assert_eq!(prizm.data_source, DataSource::Mixed);
}

#[tokio::test]
async fn test_import_skips_checklists_without_identity() {
    let pool = memory_pool().await;
    let mut blank = prizm_checklist(&[]);
    blank.manufacturer = "  ".to_string();
    let document = ChecklistExport {
        version: 1,
        exported_at: chrono::Utc::now(),
        checklists: vec![blank],
    };

    let report = learner(&pool).import_checklists(&document).await.unwrap();
    assert_eq!(report.checklists_skipped, 1);
    assert_eq!(checklists::count_checklists(&pool).await.unwrap(), 0);
}
