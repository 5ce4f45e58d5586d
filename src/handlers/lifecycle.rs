use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};

use crate::AppState;
use crate::handlers::engine_error;
use crate::lifecycle;
use crate::models::audit::DecisionRequest;

pub async fn decide(
    State(state): State<AppState>,
    Path(service_id): Path<String>,
    Json(req): Json<DecisionRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    if req.actor.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "actor must not be empty".to_string()));
    }
    let active_slo = lifecycle::decide(&state.store, &service_id, &req, chrono::Utc::now())
        .map_err(engine_error)?;
    Ok(Json(serde_json::json!({
        "action": req.action,
        "active_slo": active_slo,
    })))
}

pub async fn list_active_slos(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let slos = state
        .store
        .list_active_slos()
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    Ok(Json(serde_json::json!({ "active_slos": slos })))
}

pub async fn audit_history(
    State(state): State<AppState>,
    Path(service_id): Path<String>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let entries = state
        .store
        .audit_history(&service_id)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    Ok(Json(serde_json::json!({ "entries": entries })))
}
