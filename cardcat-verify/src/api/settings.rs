//! Settings API endpoints
//!
//! - GET/POST /api/settings/verification: the four verification toggles
//! - POST /api/settings/extractor_api_key: store the key and rebuild the client

use crate::db::settings::VerificationSettings;
use crate::{ApiError, ApiResult, AppState};
use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Partial update; omitted toggles keep their stored value
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationSettingsUpdate {
    pub verification_enabled: Option<bool>,
    pub auto_apply_suggestions: Option<bool>,
    pub confirmation_pass_enabled: Option<bool>,
    pub learning_enabled: Option<bool>,
}

impl VerificationSettingsUpdate {
    fn apply(&self, current: VerificationSettings) -> VerificationSettings {
        VerificationSettings {
            verification_enabled: self.verification_enabled.unwrap_or(current.verification_enabled),
            auto_apply_suggestions: self.auto_apply_suggestions.unwrap_or(current.auto_apply_suggestions),
            confirmation_pass_enabled: self
                .confirmation_pass_enabled
                .unwrap_or(current.confirmation_pass_enabled),
            learning_enabled: self.learning_enabled.unwrap_or(current.learning_enabled),
        }
    }
}

/// GET /api/settings/verification
pub async fn get_verification_settings(State(state): State<AppState>) -> ApiResult<Json<VerificationSettings>> {
    Ok(Json(VerificationSettings::load(&state.db).await?))
}

/// POST /api/settings/verification
pub async fn set_verification_settings(
    State(state): State<AppState>,
    Json(update): Json<VerificationSettingsUpdate>,
) -> ApiResult<Json<VerificationSettings>> {
    let current = VerificationSettings::load(&state.db).await?;
    let updated = update.apply(current);
    updated.save(&state.db).await?;
    info!(?updated, "Verification settings updated");
    Ok(Json(updated))
}

#[derive(Debug, Deserialize)]
pub struct SetApiKeyRequest {
    pub api_key: String,
}

#[derive(Debug, Serialize)]
pub struct SetApiKeyResponse {
    pub success: bool,
    /// Whether scanning is available after the change
    pub scanning_available: bool,
    pub message: String,
}

/// POST /api/settings/extractor_api_key
///
/// **Request:** `{"api_key": "..."}`
///
/// Database write is authoritative; the TOML copy is best effort.
pub async fn set_extractor_api_key(
    State(state): State<AppState>,
    Json(payload): Json<SetApiKeyRequest>,
) -> ApiResult<Json<SetApiKeyResponse>> {
    if !crate::config::is_valid_key(&payload.api_key) {
        return Err(ApiError::BadRequest(
            "API key cannot be empty or whitespace-only".to_string(),
        ));
    }

    crate::db::settings::set_extractor_api_key(&state.db, payload.api_key.clone())
        .await
        .map_err(|e| ApiError::Internal(format!("Failed to save API key to database: {}", e)))?;
    info!("Extractor API key configured via API");

    if let Some(path) = &state.toml_path {
        if let Err(e) = crate::config::sync_api_key_to_toml(&payload.api_key, path) {
            warn!("TOML sync failed (database write succeeded): {}", e);
        }
    }

    let toml_config = cardcat_common::config::TomlConfig {
        extractor: state.extractor_config.clone(),
        ..Default::default()
    };
    let extractor = crate::config::build_extractor(&state.db, &toml_config).await;
    let scanning_available = extractor.is_some();
    *state.extractor.write().await = extractor;

    let message = if scanning_available {
        "Extractor API key configured".to_string()
    } else {
        "Extractor API key stored; configure [extractor].endpoint to enable scanning".to_string()
    };

    Ok(Json(SetApiKeyResponse {
        success: true,
        scanning_available,
        message,
    }))
}

/// Build settings routes
pub fn settings_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/api/settings/verification",
            get(get_verification_settings).post(set_verification_settings),
        )
        .route("/api/settings/extractor_api_key", post(set_extractor_api_key))
}
