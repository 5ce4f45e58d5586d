pub mod analysis;
pub mod batch;
pub mod graph;
pub mod health;
pub mod lifecycle;
pub mod recommendations;
pub mod services;

use axum::http::StatusCode;

use crate::error::EngineError;

/// Shared error shape: HTTP status from the taxonomy, body carrying the
/// machine-readable kind next to the human message.
pub(crate) fn engine_error(e: EngineError) -> (StatusCode, String) {
    (
        e.status(),
        serde_json::json!({ "kind": e.kind(), "message": e.to_string() }).to_string(),
    )
}
