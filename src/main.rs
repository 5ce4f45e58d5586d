use std::net::SocketAddr;
use std::sync::Arc;

use axum::{Router, routing::get, routing::post, routing::put};
use clickhouse::Client;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use slo_advisor::AppState;
use slo_advisor::config::EngineConfig;
use slo_advisor::store::Store;
use slo_advisor::telemetry::{ClickhouseTelemetry, TelemetryQuery};
use slo_advisor::{batch, handlers};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("slo_advisor=debug,tower_http=debug")
        }))
        .init();

    let clickhouse_url =
        std::env::var("CLICKHOUSE_URL").unwrap_or_else(|_| "http://localhost:8123".to_string());
    let clickhouse_db =
        std::env::var("CLICKHOUSE_DATABASE").unwrap_or_else(|_| "observability".to_string());
    let clickhouse_user =
        std::env::var("CLICKHOUSE_USER").unwrap_or_else(|_| "default".to_string());
    let clickhouse_password = std::env::var("CLICKHOUSE_PASSWORD").unwrap_or_default();

    let ch = Client::default()
        .with_url(&clickhouse_url)
        .with_database(&clickhouse_db)
        .with_user(&clickhouse_user)
        .with_password(&clickhouse_password);

    let store_path =
        std::env::var("SLO_ADVISOR_DB").unwrap_or_else(|_| "./slo_advisor.db".to_string());
    let store = Arc::new(Store::open(&store_path)?);
    tracing::info!("graph store opened at {store_path}");

    let config_path =
        std::env::var("SLO_ADVISOR_CONFIG").unwrap_or_else(|_| "./slo_advisor.toml".to_string());
    let config = Arc::new(EngineConfig::load(&config_path)?);

    let telemetry: Arc<dyn TelemetryQuery> = Arc::new(ClickhouseTelemetry::new(ch));

    // Spawn the maintenance sweeper; batch recompute runs in the dedicated
    // batch-engine binary so the fleet pass happens exactly once.
    batch::spawn_maintenance_sweeper(store.clone(), config.clone());

    let state = AppState {
        store,
        telemetry,
        config,
    };

    let app = Router::new()
        // Graph ingest and queries
        .route("/api/v1/graph/ingest", post(handlers::graph::ingest_graph))
        .route(
            "/api/v1/graph/{service_id}/subgraph",
            get(handlers::graph::query_subgraph),
        )
        .route("/api/v1/graph/cycles", get(handlers::graph::list_cycles))
        .route("/api/v1/graph/cycles/{id}", put(handlers::graph::update_cycle))
        // Service registry
        .route(
            "/api/v1/services",
            get(handlers::services::list_services).post(handlers::services::register_service),
        )
        .route("/api/v1/services/{id}", get(handlers::services::get_service))
        // Recommendations
        .route(
            "/api/v1/recommendations/{service_id}/generate",
            post(handlers::recommendations::generate),
        )
        .route(
            "/api/v1/recommendations/{service_id}",
            get(handlers::recommendations::get),
        )
        // Batch
        .route("/api/v1/batch/run", post(handlers::batch::run_batch))
        // Constraint and impact analysis
        .route(
            "/api/v1/analysis/constraints",
            post(handlers::analysis::analyze_constraints),
        )
        .route(
            "/api/v1/analysis/budget",
            post(handlers::analysis::budget_breakdown),
        )
        .route(
            "/api/v1/analysis/impact",
            post(handlers::analysis::analyze_impact),
        )
        // Lifecycle
        .route(
            "/api/v1/slos/{service_id}/decision",
            post(handlers::lifecycle::decide),
        )
        .route("/api/v1/slos", get(handlers::lifecycle::list_active_slos))
        .route("/api/v1/audit/{service_id}", get(handlers::lifecycle::audit_history))
        // Health
        .route("/healthz", get(handlers::health::healthz))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], 8080));
    tracing::info!("slo-advisor listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
