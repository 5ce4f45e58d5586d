use axum::http::StatusCode;

/// Failure taxonomy shared by the ingest, recommendation and analysis paths.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("service not found: {0}")]
    ServiceNotFound(String),

    #[error("insufficient data: {0}")]
    InsufficientData(String),

    #[error("telemetry unavailable: {0}")]
    TelemetryUnavailable(String),

    #[error("storage failure: {0}")]
    StorageFailure(String),
}

impl EngineError {
    /// Machine-readable kind, stable across message wording changes.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::InvalidInput(_) => "invalid_input",
            EngineError::ServiceNotFound(_) => "service_not_found",
            EngineError::InsufficientData(_) => "insufficient_data",
            EngineError::TelemetryUnavailable(_) => "telemetry_unavailable",
            EngineError::StorageFailure(_) => "storage_failure",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            EngineError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            EngineError::ServiceNotFound(_) => StatusCode::NOT_FOUND,
            EngineError::InsufficientData(_) => StatusCode::UNPROCESSABLE_ENTITY,
            EngineError::TelemetryUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            EngineError::StorageFailure(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Wrap a store-layer failure.
    pub fn storage(e: anyhow::Error) -> Self {
        EngineError::StorageFailure(e.to_string())
    }
}
