use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;

use crate::AppState;
use crate::handlers::engine_error;
use crate::models::dependency::{CycleStatus, Direction, IngestPayload};
use crate::{ingest, traversal};

pub async fn ingest_graph(
    State(state): State<AppState>,
    Json(payload): Json<IngestPayload>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let now = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string();
    let report = ingest::ingest_graph(&state.store, payload, &now).map_err(engine_error)?;
    Ok((StatusCode::CREATED, Json(report)))
}

#[derive(Debug, Deserialize)]
pub struct SubgraphParams {
    #[serde(default = "default_direction")]
    pub direction: String,
    #[serde(default = "default_depth")]
    pub depth: u32,
    #[serde(default)]
    pub include_stale: bool,
}

pub async fn query_subgraph(
    State(state): State<AppState>,
    Path(service_id): Path<String>,
    Query(params): Query<SubgraphParams>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let direction = Direction::parse(&params.direction).ok_or_else(|| {
        (
            StatusCode::BAD_REQUEST,
            format!("invalid direction: {}", params.direction),
        )
    })?;
    if params.depth < 1 || params.depth > state.config.max_traversal_depth {
        return Err((
            StatusCode::BAD_REQUEST,
            format!(
                "depth must be between 1 and {}",
                state.config.max_traversal_depth
            ),
        ));
    }

    let subgraph = traversal::traverse(
        &state.store,
        &service_id,
        direction,
        params.depth,
        params.include_stale,
    )
    .map_err(engine_error)?;
    Ok(Json(subgraph))
}

pub async fn list_cycles(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let cycles = state
        .store
        .list_cycles()
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    Ok(Json(serde_json::json!({ "cycles": cycles })))
}

#[derive(Debug, Deserialize)]
pub struct UpdateCycleRequest {
    pub status: String,
}

pub async fn update_cycle(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<UpdateCycleRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let status = CycleStatus::parse(&req.status).ok_or_else(|| {
        (
            StatusCode::BAD_REQUEST,
            format!("invalid cycle status: {}", req.status),
        )
    })?;
    let updated = state
        .store
        .update_cycle_status(&id, status)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    if !updated {
        return Err((StatusCode::NOT_FOUND, "cycle record not found".to_string()));
    }
    Ok(StatusCode::NO_CONTENT)
}

fn default_direction() -> String {
    "downstream".to_string()
}

fn default_depth() -> u32 {
    3
}
