//! Checklist corpus endpoints

use crate::db::{checklists, missing};
use crate::models::{ChecklistSummary, MissingChecklist, SetChecklist};
use crate::services::learning::{ChecklistExport, ImportReport};
use crate::{ApiError, ApiResult, AppState};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use tracing::info;

/// GET /api/checklists
pub async fn list_checklists(State(state): State<AppState>) -> ApiResult<Json<Vec<ChecklistSummary>>> {
    Ok(Json(checklists::list_checklists(&state.db).await?))
}

/// GET /api/checklists/:id
pub async fn get_checklist(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<SetChecklist>> {
    checklists::get_checklist(&state.db, id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("checklist {}", id)))
}

/// DELETE /api/checklists/:id
pub async fn delete_checklist(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<StatusCode> {
    if checklists::delete_checklist(&state.db, id).await? {
        info!(checklist_id = id, "Checklist deleted by user");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound(format!("checklist {}", id)))
    }
}

/// GET /api/checklists/missing
pub async fn list_missing(State(state): State<AppState>) -> ApiResult<Json<Vec<MissingChecklist>>> {
    Ok(Json(missing::list_missing(&state.db).await?))
}

/// GET /api/checklists/export
pub async fn export_checklists(State(state): State<AppState>) -> ApiResult<Json<ChecklistExport>> {
    Ok(Json(state.learner().export_checklists().await?))
}

/// POST /api/checklists/import
///
/// Append-only merge; the response counts only entries actually added.
pub async fn import_checklists(
    State(state): State<AppState>,
    Json(document): Json<ChecklistExport>,
) -> ApiResult<Json<ImportReport>> {
    let report = state.learner().import_checklists(&document).await.map_err(|e| {
        tracing::error!(error = %e, "Checklist import failed");
        ApiError::from(e)
    })?;
    Ok(Json(report))
}

/// Build checklist routes
pub fn checklist_routes() -> Router<AppState> {
    Router::new()
        .route("/api/checklists", get(list_checklists))
        .route("/api/checklists/missing", get(list_missing))
        .route("/api/checklists/export", get(export_checklists))
        .route("/api/checklists/import", post(import_checklists))
        .route(
            "/api/checklists/:id",
            get(get_checklist).delete(delete_checklist),
        )
}
