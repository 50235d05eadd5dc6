//! Settings database operations
//!
//! Key-value accessors over the `settings` table, plus the typed
//! verification toggles.

use cardcat_common::{Error, Result};
use serde::{Deserialize, Serialize};
use sqlx::{Pool, Sqlite};

const VERIFICATION_ENABLED: &str = "verification_enabled";
const AUTO_APPLY_SUGGESTIONS: &str = "auto_apply_suggestions";
const CONFIRMATION_PASS_ENABLED: &str = "confirmation_pass_enabled";
const LEARNING_ENABLED: &str = "learning_enabled";
const EXTRACTOR_API_KEY: &str = "extractor_api_key";

/// User-facing verification toggles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationSettings {
    pub verification_enabled: bool,
    pub auto_apply_suggestions: bool,
    pub confirmation_pass_enabled: bool,
    pub learning_enabled: bool,
}

impl Default for VerificationSettings {
    fn default() -> Self {
        Self {
            verification_enabled: true,
            auto_apply_suggestions: false,
            confirmation_pass_enabled: true,
            learning_enabled: true,
        }
    }
}

impl VerificationSettings {
    /// Load toggles, falling back to defaults for unset keys
    pub async fn load(db: &Pool<Sqlite>) -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            verification_enabled: get_setting(db, VERIFICATION_ENABLED)
                .await?
                .unwrap_or(defaults.verification_enabled),
            auto_apply_suggestions: get_setting(db, AUTO_APPLY_SUGGESTIONS)
                .await?
                .unwrap_or(defaults.auto_apply_suggestions),
            confirmation_pass_enabled: get_setting(db, CONFIRMATION_PASS_ENABLED)
                .await?
                .unwrap_or(defaults.confirmation_pass_enabled),
            learning_enabled: get_setting(db, LEARNING_ENABLED)
                .await?
                .unwrap_or(defaults.learning_enabled),
        })
    }

    pub async fn save(&self, db: &Pool<Sqlite>) -> Result<()> {
        set_setting(db, VERIFICATION_ENABLED, self.verification_enabled).await?;
        set_setting(db, AUTO_APPLY_SUGGESTIONS, self.auto_apply_suggestions).await?;
        set_setting(db, CONFIRMATION_PASS_ENABLED, self.confirmation_pass_enabled).await?;
        set_setting(db, LEARNING_ENABLED, self.learning_enabled).await?;
        Ok(())
    }
}

/// Single toggle read used by the learning worker
pub async fn is_learning_enabled(db: &Pool<Sqlite>) -> Result<bool> {
    Ok(get_setting(db, LEARNING_ENABLED)
        .await?
        .unwrap_or(VerificationSettings::default().learning_enabled))
}

/// Get extractor API key from database
///
/// **Returns:** Some(key) if exists, None if not set
pub async fn get_extractor_api_key(db: &Pool<Sqlite>) -> Result<Option<String>> {
    get_setting::<String>(db, EXTRACTOR_API_KEY).await
}

pub async fn set_extractor_api_key(db: &Pool<Sqlite>, key: String) -> Result<()> {
    set_setting(db, EXTRACTOR_API_KEY, key).await
}

/// Generic setting getter
pub async fn get_setting<T>(db: &Pool<Sqlite>, key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let row: Option<(String,)> = sqlx::query_as("SELECT value FROM settings WHERE key = ?")
        .bind(key)
        .fetch_optional(db)
        .await
        .map_err(Error::Database)?;

    match row {
        Some((value,)) => {
            let parsed = value
                .parse::<T>()
                .map_err(|e| Error::Config(format!("Parse setting {} failed: {}", key, e)))?;
            Ok(Some(parsed))
        }
        None => Ok(None),
    }
}

/// Generic setting setter (upsert)
pub async fn set_setting<T>(db: &Pool<Sqlite>, key: &str, value: T) -> Result<()>
where
    T: std::fmt::Display,
{
    sqlx::query(
        "INSERT INTO settings (key, value) VALUES (?, ?)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
    )
    .bind(key)
    .bind(value.to_string())
    .execute(db)
    .await
    .map_err(Error::Database)?;

    Ok(())
}
