use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Deserialize;

use crate::AppState;
use crate::constraints;
use crate::handlers::engine_error;

#[derive(Debug, Deserialize)]
pub struct ConstraintRequest {
    pub service_id: String,
    pub desired_target_pct: f64,
    pub lookback_days: Option<u32>,
    pub max_depth: Option<u32>,
}

pub async fn analyze_constraints(
    State(state): State<AppState>,
    Json(req): Json<ConstraintRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let analysis = constraints::analyze_constraints(
        &state.store,
        state.telemetry.as_ref(),
        &state.config,
        &req.service_id,
        req.desired_target_pct,
        req.lookback_days,
        req.max_depth,
        chrono::Utc::now(),
    )
    .await
    .map_err(engine_error)?;
    Ok(Json(analysis))
}

#[derive(Debug, Deserialize)]
pub struct BudgetRequest {
    pub service_id: String,
    pub slo_target_pct: f64,
    pub lookback_days: Option<u32>,
}

pub async fn budget_breakdown(
    State(state): State<AppState>,
    Json(req): Json<BudgetRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let breakdown = constraints::error_budget_breakdown(
        &state.store,
        state.telemetry.as_ref(),
        &state.config,
        &req.service_id,
        req.slo_target_pct,
        req.lookback_days,
        chrono::Utc::now(),
    )
    .await
    .map_err(engine_error)?;
    Ok(Json(breakdown))
}

#[derive(Debug, Deserialize)]
pub struct ImpactRequest {
    pub service_id: String,
    /// Proposed availability as a ratio in [0, 1].
    pub proposed_target: f64,
    pub max_depth: Option<u32>,
}

pub async fn analyze_impact(
    State(state): State<AppState>,
    Json(req): Json<ImpactRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let impact = constraints::analyze_impact(
        &state.store,
        state.telemetry.as_ref(),
        &state.config,
        &req.service_id,
        req.proposed_target,
        req.max_depth,
        chrono::Utc::now(),
    )
    .await
    .map_err(engine_error)?;
    Ok(Json(impact))
}
