//! Checklist corpus persistence
//!
//! Writes are append-only: cards and variations are inserted with
//! `ON CONFLICT DO NOTHING` against per-checklist unique keys, so two
//! learners racing on the same set can only ever add entries.

use crate::matcher::{normalize_card_number, normalize_parallel_name};
use crate::models::checklist::select_checklist;
use crate::models::{ChecklistCard, ChecklistKey, ChecklistSummary, DataSource, SetChecklist};
use cardcat_common::{Error, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{Executor, FromRow, Sqlite, SqlitePool};

/// Attempts at the provenance compare-and-set before giving up
const MAX_PROVENANCE_RETRIES: usize = 5;

#[derive(Debug, FromRow)]
struct ChecklistRow {
    id: i64,
    manufacturer: String,
    brand: String,
    year: i32,
    sport: Option<String>,
    total_base_cards: i64,
    data_source: String,
    cached_at: DateTime<Utc>,
    last_enriched_at: Option<DateTime<Utc>>,
}

impl ChecklistRow {
    fn into_checklist(self) -> Result<SetChecklist> {
        Ok(SetChecklist {
            id: self.id,
            manufacturer: self.manufacturer,
            brand: self.brand,
            year: self.year,
            sport: self.sport,
            cards: Vec::new(),
            known_variations: Vec::new(),
            total_base_cards: self.total_base_cards,
            data_source: parse_source(&self.data_source)?,
            cached_at: self.cached_at,
            last_enriched_at: self.last_enriched_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct CardRow {
    card_number: String,
    player_name: String,
    team: Option<String>,
    is_rookie: bool,
    source: String,
}

#[derive(Debug, FromRow)]
struct SummaryRow {
    id: i64,
    manufacturer: String,
    brand: String,
    year: i32,
    sport: Option<String>,
    total_base_cards: i64,
    data_source: String,
    cached_at: DateTime<Utc>,
    last_enriched_at: Option<DateTime<Utc>>,
    card_count: i64,
    variation_count: i64,
}

const CHECKLIST_COLUMNS: &str =
    "id, manufacturer, brand, year, sport, total_base_cards, data_source, cached_at, last_enriched_at";

fn parse_source(value: &str) -> Result<DataSource> {
    value
        .parse()
        .map_err(|e: String| Error::Internal(format!("Corrupt checklist provenance: {}", e)))
}

/// Find the checklist for a key
///
/// Manufacturer and brand are compared normalized, year exactly, and an
/// absent sport on either side is a wildcard. `Ok(None)` when nothing
/// matches.
pub async fn find_checklist(pool: &SqlitePool, key: &ChecklistKey) -> Result<Option<SetChecklist>> {
    let rows: Vec<ChecklistRow> = sqlx::query_as(&format!(
        "SELECT {} FROM set_checklists
         WHERE norm_manufacturer = ? AND norm_brand = ? AND year = ?
         ORDER BY id",
        CHECKLIST_COLUMNS
    ))
    .bind(key.norm_manufacturer())
    .bind(key.norm_brand())
    .bind(key.year)
    .fetch_all(pool)
    .await?;

    let candidates = rows
        .into_iter()
        .map(ChecklistRow::into_checklist)
        .collect::<Result<Vec<_>>>()?;

    match select_checklist(&candidates, key) {
        Some(header) => {
            let mut checklist = header.clone();
            load_entries(pool, &mut checklist).await?;
            Ok(Some(checklist))
        }
        None => Ok(None),
    }
}

/// Fetch one checklist with its cards and variations
pub async fn get_checklist(pool: &SqlitePool, id: i64) -> Result<Option<SetChecklist>> {
    let row: Option<ChecklistRow> = sqlx::query_as(&format!(
        "SELECT {} FROM set_checklists WHERE id = ?",
        CHECKLIST_COLUMNS
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;

    match row {
        Some(row) => {
            let mut checklist = row.into_checklist()?;
            load_entries(pool, &mut checklist).await?;
            Ok(Some(checklist))
        }
        None => Ok(None),
    }
}

/// Every checklist with full payloads (export)
pub async fn load_all(pool: &SqlitePool) -> Result<Vec<SetChecklist>> {
    let rows: Vec<ChecklistRow> = sqlx::query_as(&format!(
        "SELECT {} FROM set_checklists ORDER BY year, manufacturer, brand, id",
        CHECKLIST_COLUMNS
    ))
    .fetch_all(pool)
    .await?;

    let mut checklists = Vec::with_capacity(rows.len());
    for row in rows {
        let mut checklist = row.into_checklist()?;
        load_entries(pool, &mut checklist).await?;
        checklists.push(checklist);
    }

    Ok(checklists)
}

/// Listing with entry counts
pub async fn list_checklists(pool: &SqlitePool) -> Result<Vec<ChecklistSummary>> {
    let rows: Vec<SummaryRow> = sqlx::query_as(
        r#"
        SELECT c.id, c.manufacturer, c.brand, c.year, c.sport, c.total_base_cards,
               c.data_source, c.cached_at, c.last_enriched_at,
               (SELECT COUNT(*) FROM checklist_cards k WHERE k.checklist_id = c.id) AS card_count,
               (SELECT COUNT(*) FROM checklist_variations v WHERE v.checklist_id = c.id) AS variation_count
        FROM set_checklists c
        ORDER BY c.year DESC, c.manufacturer, c.brand
        "#,
    )
    .fetch_all(pool)
    .await?;

    rows.into_iter()
        .map(|row| {
            Ok(ChecklistSummary {
                id: row.id,
                manufacturer: row.manufacturer,
                brand: row.brand,
                year: row.year,
                sport: row.sport,
                card_count: row.card_count.max(0) as usize,
                variation_count: row.variation_count.max(0) as usize,
                total_base_cards: row.total_base_cards,
                data_source: parse_source(&row.data_source)?,
                cached_at: row.cached_at,
                last_enriched_at: row.last_enriched_at,
            })
        })
        .collect()
}

async fn load_entries(pool: &SqlitePool, checklist: &mut SetChecklist) -> Result<()> {
    let cards: Vec<CardRow> = sqlx::query_as(
        "SELECT card_number, player_name, team, is_rookie, source
         FROM checklist_cards WHERE checklist_id = ? ORDER BY id",
    )
    .bind(checklist.id)
    .fetch_all(pool)
    .await?;

    checklist.cards = cards
        .into_iter()
        .map(|row| {
            Ok(ChecklistCard {
                card_number: row.card_number,
                player_name: row.player_name,
                team: row.team,
                is_rookie: row.is_rookie,
                source: parse_source(&row.source)?,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    checklist.known_variations = sqlx::query_scalar(
        "SELECT variation FROM checklist_variations WHERE checklist_id = ? ORDER BY id",
    )
    .bind(checklist.id)
    .fetch_all(pool)
    .await?;

    Ok(())
}

/// Find the checklist for `key`, inserting a header if none is compatible
///
/// Compatibility follows lookup semantics, so a sportless key never creates
/// a second row beside a sport-tagged one (and vice versa). Returns
/// `(id, created)`.
pub async fn find_or_create(
    pool: &SqlitePool,
    key: &ChecklistKey,
    data_source: DataSource,
    total_base_cards: i64,
) -> Result<(i64, bool)> {
    let created = insert_header(pool, key, data_source, total_base_cards).await?;
    let id = resolve_checklist_id(pool, key).await?;
    Ok((id, created))
}

/// Insert a checklist header unless a wildcard-compatible one exists
///
/// One statement, so concurrent writers cannot both pass the existence check.
async fn insert_header<'e, E>(
    executor: E,
    key: &ChecklistKey,
    data_source: DataSource,
    total_base_cards: i64,
) -> Result<bool>
where
    E: Executor<'e, Database = Sqlite>,
{
    let sport_key = key.sport_key();

    let inserted = sqlx::query(
        r#"
        INSERT INTO set_checklists
            (manufacturer, brand, year, sport, norm_manufacturer, norm_brand, sport_key,
             total_base_cards, data_source, cached_at)
        SELECT ?, ?, ?, ?, ?, ?, ?, ?, ?, ?
        WHERE NOT EXISTS (
            SELECT 1 FROM set_checklists
            WHERE norm_manufacturer = ? AND norm_brand = ? AND year = ?
              AND (sport_key = ? OR sport_key = '' OR ? = '')
        )
        "#,
    )
    .bind(&key.manufacturer)
    .bind(&key.brand)
    .bind(key.year)
    .bind(&key.sport)
    .bind(key.norm_manufacturer())
    .bind(key.norm_brand())
    .bind(&sport_key)
    .bind(total_base_cards)
    .bind(data_source.as_str())
    .bind(Utc::now())
    .bind(key.norm_manufacturer())
    .bind(key.norm_brand())
    .bind(key.year)
    .bind(&sport_key)
    .bind(&sport_key)
    .execute(executor)
    .await?;

    Ok(inserted.rows_affected() > 0)
}

/// Id of the stored checklist `key` resolves to: exact sport first, then any compatible
async fn resolve_checklist_id<'e, E>(executor: E, key: &ChecklistKey) -> Result<i64>
where
    E: Executor<'e, Database = Sqlite>,
{
    let rows: Vec<(i64, String)> = sqlx::query_as(
        "SELECT id, sport_key FROM set_checklists
         WHERE norm_manufacturer = ? AND norm_brand = ? AND year = ?
         ORDER BY id",
    )
    .bind(key.norm_manufacturer())
    .bind(key.norm_brand())
    .bind(key.year)
    .fetch_all(executor)
    .await?;

    let wanted = key.sport_key();
    let compatible = |stored: &str| stored.is_empty() || wanted.is_empty() || stored == wanted;

    rows.iter()
        .find(|(_, stored)| *stored == wanted)
        .or_else(|| rows.iter().find(|(_, stored)| compatible(stored)))
        .map(|(id, _)| *id)
        .ok_or_else(|| Error::NotFound(format!("checklist {}", key)))
}

/// Create a checklist from a seed copy in one transaction
///
/// Header, cards and variations commit together, so a failure leaves no
/// partially seeded set behind. When a compatible checklist already exists
/// nothing is copied and `created` is false.
pub async fn adopt_seed_checklist(pool: &SqlitePool, seed: &SetChecklist) -> Result<(i64, bool)> {
    let key = seed.key();
    let mut tx = pool.begin().await?;

    let created = insert_header(&mut *tx, &key, DataSource::Seed, seed.total_base_cards).await?;
    let id = resolve_checklist_id(&mut *tx, &key).await?;

    if created {
        for entry in &seed.cards {
            append_card(&mut *tx, id, entry).await?;
        }
        for variation in &seed.known_variations {
            append_variation(&mut *tx, id, variation, DataSource::Seed).await?;
        }
    }

    tx.commit().await?;
    Ok((id, created))
}

/// Append a card unless its normalized number is already present
///
/// Returns true when the card was added.
pub async fn append_card<'e, E>(executor: E, checklist_id: i64, card: &ChecklistCard) -> Result<bool>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query(
        r#"
        INSERT INTO checklist_cards
            (checklist_id, card_number, norm_number, player_name, team, is_rookie, source)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT (checklist_id, norm_number) DO NOTHING
        "#,
    )
    .bind(checklist_id)
    .bind(card.card_number.trim())
    .bind(normalize_card_number(&card.card_number).to_uppercase())
    .bind(card.player_name.trim())
    .bind(&card.team)
    .bind(card.is_rookie)
    .bind(card.source.as_str())
    .execute(executor)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Append a variation unless an alias-equivalent name is already present
///
/// Blank names are ignored. Returns true when the variation was added.
pub async fn append_variation<'e, E>(
    executor: E,
    checklist_id: i64,
    variation: &str,
    source: DataSource,
) -> Result<bool>
where
    E: Executor<'e, Database = Sqlite>,
{
    let norm_variation = normalize_parallel_name(variation);
    if norm_variation.is_empty() {
        return Ok(false);
    }

    let result = sqlx::query(
        r#"
        INSERT INTO checklist_variations (checklist_id, variation, norm_variation, source)
        VALUES (?, ?, ?, ?)
        ON CONFLICT (checklist_id, norm_variation) DO NOTHING
        "#,
    )
    .bind(checklist_id)
    .bind(variation.trim())
    .bind(norm_variation)
    .bind(source.as_str())
    .execute(executor)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Record that `contribution` entries were added to a checklist
///
/// Bumps `last_enriched_at`, raises `total_base_cards` to at least the stored
/// card count, and joins provenance through the lattice with a
/// compare-and-set so concurrent enrichers cannot move it backwards.
pub async fn mark_enriched(
    pool: &SqlitePool,
    checklist_id: i64,
    contribution: DataSource,
    at: DateTime<Utc>,
) -> Result<DataSource> {
    for attempt in 1..=MAX_PROVENANCE_RETRIES {
        let current: Option<String> =
            sqlx::query_scalar("SELECT data_source FROM set_checklists WHERE id = ?")
                .bind(checklist_id)
                .fetch_optional(pool)
                .await?;

        let current = match current {
            Some(value) => parse_source(&value)?,
            None => return Err(Error::NotFound(format!("checklist {}", checklist_id))),
        };
        let next = current.join(contribution);

        let updated = sqlx::query(
            r#"
            UPDATE set_checklists
            SET data_source = ?,
                last_enriched_at = ?,
                total_base_cards = MAX(
                    total_base_cards,
                    (SELECT COUNT(*) FROM checklist_cards WHERE checklist_id = ?)
                )
            WHERE id = ? AND data_source = ?
            "#,
        )
        .bind(next.as_str())
        .bind(at)
        .bind(checklist_id)
        .bind(checklist_id)
        .bind(current.as_str())
        .execute(pool)
        .await?;

        if updated.rows_affected() > 0 {
            return Ok(next);
        }

        tracing::debug!(checklist_id, attempt, "Provenance changed underneath, retrying");
    }

    Err(Error::Internal(format!(
        "Provenance update for checklist {} kept racing",
        checklist_id
    )))
}

/// Entries a merge actually added
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeOutcome {
    pub checklist_id: i64,
    pub created: bool,
    pub cards_added: usize,
    pub variations_added: usize,
}

impl MergeOutcome {
    pub fn changed(&self) -> bool {
        self.cards_added + self.variations_added > 0
    }
}

/// Merge a whole checklist into the corpus with append-only semantics
///
/// Used by seeding and import. Every entry is tagged `source`; entries
/// already present (by normalized number or variation name) are skipped.
/// An existing checklist that gained entries has its provenance joined with
/// `source`. Any missing record for the key is retired.
pub async fn merge_checklist(
    pool: &SqlitePool,
    incoming: &SetChecklist,
    source: DataSource,
) -> Result<MergeOutcome> {
    let key = incoming.key();

    let (checklist_id, created) = match find_checklist(pool, &key).await? {
        Some(existing) => (existing.id, false),
        None => find_or_create(pool, &key, source, incoming.total_base_cards).await?,
    };

    let mut outcome = MergeOutcome {
        checklist_id,
        created,
        ..Default::default()
    };

    for card in &incoming.cards {
        let entry = ChecklistCard {
            source,
            ..card.clone()
        };
        if append_card(pool, checklist_id, &entry).await? {
            outcome.cards_added += 1;
        }
    }

    for variation in &incoming.known_variations {
        if append_variation(pool, checklist_id, variation, source).await? {
            outcome.variations_added += 1;
        }
    }

    if !created && outcome.changed() {
        mark_enriched(pool, checklist_id, source, Utc::now()).await?;
    }

    crate::db::missing::delete_missing(pool, &key).await?;

    Ok(outcome)
}

/// Delete a checklist and its entries (explicit user action only)
pub async fn delete_checklist(pool: &SqlitePool, id: i64) -> Result<bool> {
    let mut tx = pool.begin().await?;

    sqlx::query("DELETE FROM checklist_cards WHERE checklist_id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM checklist_variations WHERE checklist_id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    let result = sqlx::query("DELETE FROM set_checklists WHERE id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(result.rows_affected() > 0)
}

/// Number of stored checklists
pub async fn count_checklists(pool: &SqlitePool) -> Result<i64> {
    let count = sqlx::query_scalar("SELECT COUNT(*) FROM set_checklists")
        .fetch_one(pool)
        .await?;
    Ok(count)
}
