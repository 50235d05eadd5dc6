//! Card endpoints: verify, scan, batch scan, saved-card learning hook

use crate::models::{CardImage, ExtractedCard, VerificationResult};
use crate::services::learning::CardSaved;
use crate::services::scan_pipeline::{BatchItem, BatchReport, BatchScanner, ScanError, ScanReport};
use crate::{ApiError, ApiResult, AppState};
use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use serde::{Deserialize, Serialize};
use tracing::info;

fn default_media_type() -> String {
    "image/jpeg".to_string()
}

/// Base64-encoded card photo(s)
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanRequest {
    pub image: String,
    #[serde(default = "default_media_type")]
    pub media_type: String,
    #[serde(default)]
    pub back_image: Option<String>,
}

impl ScanRequest {
    fn decode(&self) -> ApiResult<BatchItem> {
        let front = CardImage::from_base64(&self.image, self.media_type.clone())
            .map_err(|e| ApiError::BadRequest(format!("image is not valid base64: {}", e)))?;
        if front.data.is_empty() {
            return Err(ApiError::BadRequest("image is empty".to_string()));
        }
        let back = self
            .back_image
            .as_deref()
            .map(|b| CardImage::from_base64(b, self.media_type.clone()))
            .transpose()
            .map_err(|e| ApiError::BadRequest(format!("backImage is not valid base64: {}", e)))?;
        Ok(BatchItem { front, back })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchScanRequest {
    pub items: Vec<ScanRequest>,
    /// Overrides `batch_max_in_flight` from config
    #[serde(default)]
    pub max_in_flight: Option<usize>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedResponse {
    pub queued: bool,
}

/// POST /api/cards/verify
///
/// **Request:** an `ExtractedCard`
/// **Response:** `VerificationResult`
pub async fn verify_card(
    State(state): State<AppState>,
    Json(card): Json<ExtractedCard>,
) -> ApiResult<Json<VerificationResult>> {
    let verifier = state.verifier();
    let result = verifier.verify(&card).await;
    verifier.announce(&card, &result, false);
    Ok(Json(result))
}

fn scan_error(e: ScanError) -> ApiError {
    match e {
        ScanError::Cancelled => ApiError::ServiceUnavailable("service shutting down".to_string()),
        other => ApiError::Extraction(other.to_string()),
    }
}

/// POST /api/cards/scan
///
/// Extraction, verification and (when warranted) the confirmation pass.
/// 503 when no extractor is configured, 502 when extraction fails.
pub async fn scan_card(
    State(state): State<AppState>,
    Json(request): Json<ScanRequest>,
) -> ApiResult<Json<ScanReport>> {
    let item = request.decode()?;
    let pipeline = state
        .pipeline()
        .await
        .ok_or_else(|| ApiError::ServiceUnavailable("no extractor configured".to_string()))?;

    let cancel = state.shutdown.child_token();
    match pipeline.process(&item.front, item.back.as_ref(), &cancel).await {
        Ok(report) => Ok(Json(report)),
        Err(e) => {
            state.record_error(e.to_string()).await;
            Err(scan_error(e))
        }
    }
}

/// POST /api/cards/scan/batch
pub async fn scan_batch(
    State(state): State<AppState>,
    Json(request): Json<BatchScanRequest>,
) -> ApiResult<Json<BatchReport>> {
    if request.items.is_empty() {
        return Err(ApiError::BadRequest("items must not be empty".to_string()));
    }
    let items = request
        .items
        .iter()
        .map(ScanRequest::decode)
        .collect::<ApiResult<Vec<_>>>()?;

    let pipeline = state
        .pipeline()
        .await
        .ok_or_else(|| ApiError::ServiceUnavailable("no extractor configured".to_string()))?;

    let max_in_flight = request
        .max_in_flight
        .unwrap_or(state.extractor_config.batch_max_in_flight);
    let scanner = BatchScanner::new(pipeline, max_in_flight).with_event_bus(state.event_bus.clone());

    let report = scanner.scan(items, state.shutdown.child_token()).await;
    Ok(Json(report))
}

/// POST /api/cards/saved
///
/// Queues the saved card for checklist learning and returns 202 at once.
pub async fn card_saved(
    State(state): State<AppState>,
    Json(event): Json<CardSaved>,
) -> (StatusCode, Json<SavedResponse>) {
    let card_id = event.card_id.clone();
    let queued = state.learning_queue.enqueue(event);
    info!(card_id = %card_id, queued, "Saved card queued for learning");
    (StatusCode::ACCEPTED, Json(SavedResponse { queued }))
}

/// Build card routes
pub fn card_routes() -> Router<AppState> {
    Router::new()
        .route("/api/cards/verify", post(verify_card))
        .route("/api/cards/scan", post(scan_card))
        .route("/api/cards/scan/batch", post(scan_batch))
        .route("/api/cards/saved", post(card_saved))
}
