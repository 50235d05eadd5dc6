//! Configuration resolution for cardcat-verify
//!
//! The extractor API key is resolved Database → ENV → TOML. The endpoint and
//! limits come from the TOML `[extractor]` section.

use crate::services::extractor::HttpExtractor;
use crate::services::Extractor;
use cardcat_common::config::TomlConfig;
use cardcat_common::{Error, Result};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Environment variable holding the extractor API key
pub const ENV_EXTRACTOR_API_KEY: &str = "CARDCAT_EXTRACTOR_API_KEY";

/// Resolve the extractor API key
///
/// **Priority:** Database → ENV → TOML
pub async fn resolve_extractor_api_key(db: &Pool<Sqlite>, toml_config: &TomlConfig) -> Result<String> {
    let db_key = crate::db::settings::get_extractor_api_key(db)
        .await?
        .filter(|k| is_valid_key(k));
    let env_key = std::env::var(ENV_EXTRACTOR_API_KEY)
        .ok()
        .filter(|k| is_valid_key(k));
    let toml_key = toml_config
        .extractor_api_key
        .clone()
        .filter(|k| is_valid_key(k));

    let sources: Vec<&str> = [
        (db_key.is_some(), "database"),
        (env_key.is_some(), "environment"),
        (toml_key.is_some(), "TOML"),
    ]
    .iter()
    .filter(|(present, _)| *present)
    .map(|(_, name)| *name)
    .collect();

    if sources.len() > 1 {
        warn!(
            "Extractor API key found in multiple sources: {}. Using {} (highest priority).",
            sources.join(", "),
            sources[0]
        );
    }

    if let Some(key) = db_key {
        info!("Extractor API key loaded from database");
        return Ok(key);
    }
    if let Some(key) = env_key {
        info!("Extractor API key loaded from environment variable");
        return Ok(key);
    }
    if let Some(key) = toml_key {
        info!("Extractor API key loaded from TOML config");
        return Ok(key);
    }

    Err(Error::Config(format!(
        "Extractor API key not configured. Set it with one of:\n\
         1. POST /api/settings/extractor_api_key\n\
         2. Environment: {}=your-key\n\
         3. TOML config: extractor_api_key = \"your-key\"",
        ENV_EXTRACTOR_API_KEY
    )))
}

/// Validate API key (non-empty, non-whitespace)
pub fn is_valid_key(key: &str) -> bool {
    !key.trim().is_empty()
}

/// Build the HTTP extractor from configuration
///
/// `None` when no endpoint or key is configured; scanning endpoints then
/// answer 503 while verification of supplied cards keeps working.
pub async fn build_extractor(db: &Pool<Sqlite>, toml_config: &TomlConfig) -> Option<Arc<dyn Extractor>> {
    let settings = &toml_config.extractor;
    let endpoint = match settings.endpoint.as_deref().filter(|e| !e.trim().is_empty()) {
        Some(endpoint) => endpoint,
        None => {
            info!("No extractor endpoint configured; scanning disabled");
            return None;
        }
    };

    let api_key = match resolve_extractor_api_key(db, toml_config).await {
        Ok(key) => key,
        Err(e) => {
            warn!("Scanning disabled: {}", e);
            return None;
        }
    };

    match HttpExtractor::new(
        endpoint,
        api_key,
        settings.requests_per_minute,
        Duration::from_secs(settings.timeout_secs),
    ) {
        Ok(extractor) => {
            info!(endpoint, requests_per_minute = settings.requests_per_minute, "Extractor client ready");
            Some(Arc::new(extractor))
        }
        Err(e) => {
            warn!("Scanning disabled: {}", e);
            None
        }
    }
}

/// Write the API key back to the TOML file (best effort)
pub fn sync_api_key_to_toml(key: &str, toml_path: &Path) -> Result<()> {
    let mut config = cardcat_common::config::load_toml_config(toml_path)?;
    config.extractor_api_key = Some(key.to_string());

    match cardcat_common::config::write_toml_config(&config, toml_path) {
        Ok(()) => {
            info!("Settings synced to TOML: {}", toml_path.display());
            Ok(())
        }
        Err(e) => {
            warn!("TOML write failed (database write succeeded): {}", e);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;
    use serial_test::serial;

    #[tokio::test]
    #[serial]
    async fn test_database_key_wins() {
        let pool = test_pool().await;
        crate::db::settings::set_extractor_api_key(&pool, "db-key".to_string())
            .await
            .unwrap();
        std::env::set_var(ENV_EXTRACTOR_API_KEY, "env-key");
        let toml = TomlConfig {
            extractor_api_key: Some("toml-key".to_string()),
            ..Default::default()
        };

        let key = resolve_extractor_api_key(&pool, &toml).await.unwrap();
        std::env::remove_var(ENV_EXTRACTOR_API_KEY);
        assert_eq!(key, "db-key");
    }

    #[tokio::test]
    #[serial]
    async fn test_env_then_toml() {
        let pool = test_pool().await;
        std::env::remove_var(ENV_EXTRACTOR_API_KEY);
        let toml = TomlConfig {
            extractor_api_key: Some("toml-key".to_string()),
            ..Default::default()
        };
        assert_eq!(resolve_extractor_api_key(&pool, &toml).await.unwrap(), "toml-key");

        std::env::set_var(ENV_EXTRACTOR_API_KEY, "env-key");
        let key = resolve_extractor_api_key(&pool, &toml).await.unwrap();
        std::env::remove_var(ENV_EXTRACTOR_API_KEY);
        assert_eq!(key, "env-key");
    }

    #[tokio::test]
    #[serial]
    async fn test_whitespace_keys_ignored() {
        let pool = test_pool().await;
        std::env::set_var(ENV_EXTRACTOR_API_KEY, "   ");
        let toml = TomlConfig {
            extractor_api_key: Some("".to_string()),
            ..Default::default()
        };
        let result = resolve_extractor_api_key(&pool, &toml).await;
        std::env::remove_var(ENV_EXTRACTOR_API_KEY);
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[tokio::test]
    #[serial]
    async fn test_build_extractor_requires_endpoint() {
        let pool = test_pool().await;
        let toml = TomlConfig {
            extractor_api_key: Some("key".to_string()),
            ..Default::default()
        };
        assert!(build_extractor(&pool, &toml).await.is_none());

        let mut with_endpoint = toml.clone();
        with_endpoint.extractor.endpoint = Some("http://127.0.0.1:9".to_string());
        std::env::remove_var(ENV_EXTRACTOR_API_KEY);
        let extractor = build_extractor(&pool, &with_endpoint).await.unwrap();
        assert_eq!(extractor.source_id(), "http");
    }

    #[test]
    fn test_sync_api_key_to_toml() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("cardcat-verify.toml");

        sync_api_key_to_toml("abc", &path).unwrap();
        let config = cardcat_common::config::load_toml_config(&path).unwrap();
        assert_eq!(config.extractor_api_key.as_deref(), Some("abc"));
    }
}
