use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use slo_advisor::batch;
use slo_advisor::config::EngineConfig;
use slo_advisor::store::Store;
use slo_advisor::telemetry::{ClickhouseTelemetry, TelemetryQuery};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("slo_advisor=debug")),
        )
        .init();

    let clickhouse_url =
        std::env::var("CLICKHOUSE_URL").unwrap_or_else(|_| "http://localhost:8123".to_string());
    let clickhouse_db =
        std::env::var("CLICKHOUSE_DATABASE").unwrap_or_else(|_| "observability".to_string());
    let clickhouse_user =
        std::env::var("CLICKHOUSE_USER").unwrap_or_else(|_| "default".to_string());
    let clickhouse_password = std::env::var("CLICKHOUSE_PASSWORD").unwrap_or_default();

    let ch = clickhouse::Client::default()
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

    // The maintenance sweeper lives with the HTTP server; this binary owns
    // the fleet recompute loop alone.
    batch::run_batch_engine(store, telemetry, config).await;

    Ok(())
}
