use axum::{Json, extract::State, response::IntoResponse};

use crate::AppState;
use crate::batch;

pub async fn run_batch(State(state): State<AppState>) -> impl IntoResponse {
    let result = batch::run_batch(&state.store, &state.telemetry, &state.config).await;
    Json(result)
}
