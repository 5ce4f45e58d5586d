pub mod attribution;
pub mod batch;
pub mod composite;
pub mod config;
pub mod constraints;
pub mod cycles;
pub mod error;
pub mod handlers;
pub mod ingest;
pub mod lifecycle;
pub mod models;
pub mod recommender;
pub mod stats;
pub mod store;
pub mod telemetry;
pub mod traversal;

use std::sync::Arc;

use config::EngineConfig;
use store::Store;
use telemetry::TelemetryQuery;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<Store>,
    pub telemetry: Arc<dyn TelemetryQuery>,
    pub config: Arc<EngineConfig>,
}
