//! Missing-checklist tracker
//!
//! One row per key that was looked up while no checklist existed. Rows are
//! upserted on every miss and retired once the key gets a checklist.

use crate::models::{ChecklistKey, MissingChecklist};
use cardcat_common::Result;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, SqlitePool};

#[derive(Debug, FromRow)]
struct MissingRow {
    manufacturer: String,
    brand: String,
    year: i32,
    sport: Option<String>,
    hit_count: i64,
    first_seen: DateTime<Utc>,
    last_seen: DateTime<Utc>,
}

impl From<MissingRow> for MissingChecklist {
    fn from(row: MissingRow) -> Self {
        MissingChecklist {
            manufacturer: row.manufacturer,
            brand: row.brand,
            year: row.year,
            sport: row.sport,
            hit_count: row.hit_count,
            first_seen: row.first_seen,
            last_seen: row.last_seen,
        }
    }
}

/// Record a lookup miss for `key`
///
/// Inserts with hit_count 1 or increments the existing row and refreshes
/// `last_seen`. Returns the row as stored.
pub async fn record_miss(pool: &SqlitePool, key: &ChecklistKey) -> Result<MissingChecklist> {
    let now = Utc::now();

    let row: MissingRow = sqlx::query_as(
        r#"
        INSERT INTO missing_checklists
            (manufacturer, brand, year, sport, norm_manufacturer, norm_brand, sport_key,
             hit_count, first_seen, last_seen)
        VALUES (?, ?, ?, ?, ?, ?, ?, 1, ?, ?)
        ON CONFLICT (norm_manufacturer, norm_brand, year, sport_key) DO UPDATE SET
            hit_count = hit_count + 1,
            last_seen = excluded.last_seen
        RETURNING manufacturer, brand, year, sport, hit_count, first_seen, last_seen
        "#,
    )
    .bind(&key.manufacturer)
    .bind(&key.brand)
    .bind(key.year)
    .bind(&key.sport)
    .bind(key.norm_manufacturer())
    .bind(key.norm_brand())
    .bind(key.sport_key())
    .bind(now)
    .bind(now)
    .fetch_one(pool)
    .await?;

    Ok(row.into())
}

/// Retire missing records answered by a checklist for `key`
///
/// A key without a sport retires every sport of that set; a key with a sport
/// retires its own row and the sport-less one. Returns rows deleted.
pub async fn delete_missing(pool: &SqlitePool, key: &ChecklistKey) -> Result<u64> {
    let result = sqlx::query(
        r#"
        DELETE FROM missing_checklists
        WHERE norm_manufacturer = ? AND norm_brand = ? AND year = ?
          AND (? = '' OR sport_key = '' OR sport_key = ?)
        "#,
    )
    .bind(key.norm_manufacturer())
    .bind(key.norm_brand())
    .bind(key.year)
    .bind(key.sport_key())
    .bind(key.sport_key())
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

/// Missing records, most requested first
pub async fn list_missing(pool: &SqlitePool) -> Result<Vec<MissingChecklist>> {
    let rows: Vec<MissingRow> = sqlx::query_as(
        "SELECT manufacturer, brand, year, sport, hit_count, first_seen, last_seen
         FROM missing_checklists
         ORDER BY hit_count DESC, last_seen DESC",
    )
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(MissingChecklist::from).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;

    fn key(sport: Option<&str>) -> ChecklistKey {
        ChecklistKey::new("Topps", "Chrome", 2018, sport.map(str::to_string))
    }

    #[tokio::test]
    async fn test_record_miss_increments() {
        let pool = test_pool().await;

        let first = record_miss(&pool, &key(Some("Baseball"))).await.unwrap();
        assert_eq!(first.hit_count, 1);

        let again = ChecklistKey::new("TOPPS", "chrome", 2018, Some("baseball".to_string()));
        let second = record_miss(&pool, &again).await.unwrap();
        assert_eq!(second.hit_count, 2);
        assert_eq!(second.first_seen, first.first_seen);
        assert!(second.last_seen >= first.last_seen);
        // Original spelling is kept
        assert_eq!(second.manufacturer, "Topps");

        assert_eq!(list_missing(&pool).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_delete_missing_sport_wildcard() {
        let pool = test_pool().await;
        record_miss(&pool, &key(Some("Baseball"))).await.unwrap();
        record_miss(&pool, &key(None)).await.unwrap();
        record_miss(&pool, &key(Some("Football"))).await.unwrap();

        let deleted = delete_missing(&pool, &key(Some("Baseball"))).await.unwrap();
        assert_eq!(deleted, 2);

        let remaining = list_missing(&pool).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].sport.as_deref(), Some("Football"));

        assert_eq!(delete_missing(&pool, &key(None)).await.unwrap(), 1);
        assert!(list_missing(&pool).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_missing_orders_by_hits() {
        let pool = test_pool().await;
        let popular = ChecklistKey::new("Upper Deck", "Young Guns", 2015, None);
        record_miss(&pool, &key(None)).await.unwrap();
        for _ in 0..3 {
            record_miss(&pool, &popular).await.unwrap();
        }

        let missing = list_missing(&pool).await.unwrap();
        assert_eq!(missing[0].brand, "Young Guns");
        assert_eq!(missing[0].hit_count, 3);
    }
}
