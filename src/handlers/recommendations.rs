use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};

use crate::AppState;
use crate::handlers::engine_error;
use crate::models::recommendation::{GenerateParams, RecommendationSet};
use crate::models::sli::SliType;
use crate::recommender;

fn requested_types(sli_type: Option<&str>) -> Result<Vec<SliType>, (StatusCode, String)> {
    match sli_type {
        None => Ok(vec![SliType::Availability, SliType::Latency]),
        Some(raw) => {
            let parsed = SliType::parse(raw)
                .ok_or_else(|| (StatusCode::BAD_REQUEST, format!("invalid sli_type: {raw}")))?;
            Ok(vec![parsed])
        }
    }
}

pub async fn generate(
    State(state): State<AppState>,
    Path(service_id): Path<String>,
    Json(params): Json<GenerateParams>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let requested = requested_types(params.sli_type.as_deref())?;
    if let Some(days) = params.lookback_days {
        if days < 1 || days > state.config.lookback_extended_days {
            return Err((
                StatusCode::BAD_REQUEST,
                format!(
                    "lookback_days must be between 1 and {}",
                    state.config.lookback_extended_days
                ),
            ));
        }
    }

    let set = recommender::generate_recommendations(
        &state.store,
        state.telemetry.as_ref(),
        &state.config,
        &service_id,
        &requested,
        params.lookback_days,
        chrono::Utc::now(),
    )
    .await
    .map_err(engine_error)?;
    Ok((StatusCode::CREATED, Json(set)))
}

pub async fn get(
    State(state): State<AppState>,
    Path(service_id): Path<String>,
    Query(params): Query<GenerateParams>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let requested = requested_types(params.sli_type.as_deref())?;

    if params.force_regenerate {
        let set = recommender::generate_recommendations(
            &state.store,
            state.telemetry.as_ref(),
            &state.config,
            &service_id,
            &requested,
            params.lookback_days,
            chrono::Utc::now(),
        )
        .await
        .map_err(engine_error)?;
        return Ok(Json(serde_json::to_value(set).unwrap_or_default()));
    }

    let sli_filter = if requested.len() == 1 {
        Some(requested[0])
    } else {
        None
    };
    let recommendations = state
        .store
        .get_active_recommendations(&service_id, sli_filter)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    if recommendations.is_empty() {
        return Ok(Json(serde_json::Value::Null));
    }
    let set = RecommendationSet {
        service_id,
        recommendations,
        notes: Vec::new(),
    };
    Ok(Json(serde_json::to_value(set).unwrap_or_default()))
}
