use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};

use crate::AppState;
use crate::models::service::{ListServicesParams, RegisterServiceRequest, ServiceType};
use crate::store::NodeUpsert;

pub async fn register_service(
    State(state): State<AppState>,
    Json(req): Json<RegisterServiceRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    if req.service_id.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "service_id must not be empty".to_string()));
    }
    if let Some(sla) = req.published_sla {
        if req.service_type != ServiceType::External {
            return Err((
                StatusCode::BAD_REQUEST,
                "published_sla is only valid for external services".to_string(),
            ));
        }
        if !(sla > 0.0 && sla <= 1.0) {
            return Err((
                StatusCode::BAD_REQUEST,
                format!("published_sla {sla} out of (0, 1]"),
            ));
        }
    }

    state
        .store
        .register_service(&NodeUpsert {
            service_id: req.service_id.clone(),
            team: req.team,
            criticality: req.criticality,
            service_type: req.service_type,
            published_sla: req.published_sla,
            metadata: req.metadata,
            explicit: true,
        })
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    let service = state
        .store
        .get_service(&req.service_id)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?
        .ok_or_else(|| {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "failed to read registered service".to_string(),
            )
        })?;
    Ok((StatusCode::CREATED, Json(service)))
}

pub async fn list_services(
    State(state): State<AppState>,
    Query(params): Query<ListServicesParams>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let services = state
        .store
        .list_services(
            params.skip.max(0),
            params.limit.clamp(1, 1000),
            params.team.as_deref(),
            params.criticality.as_deref(),
            params.discovered,
        )
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    Ok(Json(serde_json::json!({ "services": services })))
}

pub async fn get_service(
    State(state): State<AppState>,
    Path(service_id): Path<String>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let service = state
        .store
        .get_service(&service_id)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?
        .ok_or_else(|| (StatusCode::NOT_FOUND, "service not found".to_string()))?;
    Ok(Json(service))
}
