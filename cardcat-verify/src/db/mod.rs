//! Database access for cardcat-verify
//!
//! SQLite holds the checklist corpus, the missing-checklist tracker and the
//! settings table. Uniqueness of a checklist key is enforced by the schema
//! (normalized manufacturer, normalized brand, year, normalized sport), so
//! concurrent writers never need check-then-insert.

pub mod checklists;
pub mod missing;
pub mod settings;

use anyhow::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Initialize database connection pool
///
/// Creates the file if missing and ensures every table exists.
pub async fn init_database_pool(db_path: &Path) -> Result<SqlitePool> {
    // Ensure parent directory exists
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    tracing::debug!("Connecting to database: {}", db_url);

    let options = SqliteConnectOptions::from_str(&db_url)?
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(5))
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(8)
        .connect_with(options)
        .await?;

    init_tables(&pool).await?;

    Ok(pool)
}

/// Create cardcat tables if they don't exist
pub async fn init_tables(pool: &SqlitePool) -> sqlx::Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS set_checklists (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            manufacturer TEXT NOT NULL,
            brand TEXT NOT NULL,
            year INTEGER NOT NULL,
            sport TEXT,
            norm_manufacturer TEXT NOT NULL,
            norm_brand TEXT NOT NULL,
            sport_key TEXT NOT NULL DEFAULT '',
            total_base_cards INTEGER NOT NULL DEFAULT 0,
            data_source TEXT NOT NULL,
            cached_at TEXT NOT NULL,
            last_enriched_at TEXT,
            UNIQUE (norm_manufacturer, norm_brand, year, sport_key)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS checklist_cards (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            checklist_id INTEGER NOT NULL REFERENCES set_checklists(id) ON DELETE CASCADE,
            card_number TEXT NOT NULL,
            norm_number TEXT NOT NULL,
            player_name TEXT NOT NULL,
            team TEXT,
            is_rookie INTEGER NOT NULL DEFAULT 0,
            source TEXT NOT NULL,
            UNIQUE (checklist_id, norm_number)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS checklist_variations (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            checklist_id INTEGER NOT NULL REFERENCES set_checklists(id) ON DELETE CASCADE,
            variation TEXT NOT NULL,
            norm_variation TEXT NOT NULL,
            source TEXT NOT NULL,
            UNIQUE (checklist_id, norm_variation)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS missing_checklists (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            manufacturer TEXT NOT NULL,
            brand TEXT NOT NULL,
            year INTEGER NOT NULL,
            sport TEXT,
            norm_manufacturer TEXT NOT NULL,
            norm_brand TEXT NOT NULL,
            sport_key TEXT NOT NULL DEFAULT '',
            hit_count INTEGER NOT NULL DEFAULT 1,
            first_seen TEXT NOT NULL,
            last_seen TEXT NOT NULL,
            UNIQUE (norm_manufacturer, norm_brand, year, sport_key)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_checklist_cards_checklist ON checklist_cards(checklist_id)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_checklist_variations_checklist ON checklist_variations(checklist_id)",
    )
    .execute(pool)
    .await?;

    tracing::info!(
        "Database tables initialized (settings, set_checklists, checklist_cards, checklist_variations, missing_checklists)"
    );

    Ok(())
}

/// In-memory pool for tests
///
/// Pinned to a single connection: every `:memory:` connection would
/// otherwise see its own empty database.
#[cfg(test)]
pub(crate) async fn test_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    init_tables(&pool).await.unwrap();
    pool
}
