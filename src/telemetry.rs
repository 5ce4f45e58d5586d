//! Narrow query interface over the telemetry store, plus the ClickHouse
//! adapter used in production. Every method may report "no data" (`None` /
//! empty) without that being an error; transport failures surface as
//! `TelemetryUnavailable`.

use async_trait::async_trait;
use clickhouse::Client;

use crate::error::EngineError;
use crate::models::sli::{AvailabilitySli, LatencySli, Window};

#[async_trait]
pub trait TelemetryQuery: Send + Sync {
    async fn availability_sli(
        &self,
        service_id: &str,
        window: &Window,
    ) -> Result<Option<AvailabilitySli>, EngineError>;

    async fn latency_percentiles(
        &self,
        service_id: &str,
        window: &Window,
    ) -> Result<Option<LatencySli>, EngineError>;

    /// One availability ratio per bucket, oldest first. Empty when the
    /// service emitted nothing in the window.
    async fn rolling_availability(
        &self,
        service_id: &str,
        window: &Window,
        bucket_hours: u32,
    ) -> Result<Vec<f64>, EngineError>;

    /// Fraction of buckets in the window that contain any samples.
    async fn data_completeness(
        &self,
        service_id: &str,
        window: &Window,
    ) -> Result<f64, EngineError>;
}

pub struct ClickhouseTelemetry {
    ch: Client,
}

#[derive(clickhouse::Row, serde::Deserialize)]
struct CountsRow {
    good: u64,
    total: u64,
}

#[derive(clickhouse::Row, serde::Deserialize)]
struct PercentilesRow {
    p50: f64,
    p95: f64,
    p99: f64,
    p999: f64,
    sample_count: u64,
}

#[derive(clickhouse::Row, serde::Deserialize)]
struct BucketRow {
    ratio: f64,
}

#[derive(clickhouse::Row, serde::Deserialize)]
struct BucketCountRow {
    buckets: u64,
}

impl ClickhouseTelemetry {
    pub fn new(ch: Client) -> Self {
        Self { ch }
    }
}

fn query_failed(context: &str, e: clickhouse::error::Error) -> EngineError {
    tracing::warn!("telemetry query failed ({context}): {e}");
    EngineError::TelemetryUnavailable(format!("{context}: {e}"))
}

#[async_trait]
impl TelemetryQuery for ClickhouseTelemetry {
    async fn availability_sli(
        &self,
        service_id: &str,
        window: &Window,
    ) -> Result<Option<AvailabilitySli>, EngineError> {
        let row = self
            .ch
            .query(
                "SELECT \
                    countIf(http_status_code < 500 AND status != 'ERROR') AS good, \
                    count() AS total \
                 FROM wide_events \
                 WHERE service_name = ? \
                   AND timestamp >= parseDateTimeBestEffort(?) \
                   AND timestamp < parseDateTimeBestEffort(?)",
            )
            .bind(service_id)
            .bind(&window.start)
            .bind(&window.end)
            .fetch_one::<CountsRow>()
            .await
            .map_err(|e| query_failed("availability_sli", e))?;

        if row.total == 0 {
            return Ok(None);
        }
        Ok(AvailabilitySli::new(row.good, row.total, window.clone()))
    }

    async fn latency_percentiles(
        &self,
        service_id: &str,
        window: &Window,
    ) -> Result<Option<LatencySli>, EngineError> {
        let row = self
            .ch
            .query(
                "SELECT \
                    quantile(0.5)(duration_ns) / 1000000.0 AS p50, \
                    quantile(0.95)(duration_ns) / 1000000.0 AS p95, \
                    quantile(0.99)(duration_ns) / 1000000.0 AS p99, \
                    quantile(0.999)(duration_ns) / 1000000.0 AS p999, \
                    count() AS sample_count \
                 FROM wide_events \
                 WHERE service_name = ? \
                   AND timestamp >= parseDateTimeBestEffort(?) \
                   AND timestamp < parseDateTimeBestEffort(?)",
            )
            .bind(service_id)
            .bind(&window.start)
            .bind(&window.end)
            .fetch_one::<PercentilesRow>()
            .await
            .map_err(|e| query_failed("latency_percentiles", e))?;

        if row.sample_count == 0 {
            return Ok(None);
        }
        Ok(LatencySli::new(
            row.p50,
            row.p95,
            row.p99,
            row.p999,
            window.clone(),
            row.sample_count,
        ))
    }

    async fn rolling_availability(
        &self,
        service_id: &str,
        window: &Window,
        bucket_hours: u32,
    ) -> Result<Vec<f64>, EngineError> {
        let sql = format!(
            "SELECT \
                countIf(http_status_code < 500 AND status != 'ERROR') / count() AS ratio \
             FROM wide_events \
             WHERE service_name = ? \
               AND timestamp >= parseDateTimeBestEffort(?) \
               AND timestamp < parseDateTimeBestEffort(?) \
             GROUP BY toStartOfInterval(timestamp, INTERVAL {bucket_hours} HOUR) AS bucket \
             ORDER BY bucket"
        );
        let rows = self
            .ch
            .query(&sql)
            .bind(service_id)
            .bind(&window.start)
            .bind(&window.end)
            .fetch_all::<BucketRow>()
            .await
            .map_err(|e| query_failed("rolling_availability", e))?;
        Ok(rows.into_iter().map(|r| r.ratio).collect())
    }

    async fn data_completeness(
        &self,
        service_id: &str,
        window: &Window,
    ) -> Result<f64, EngineError> {
        let row = self
            .ch
            .query(
                "SELECT uniqExact(toStartOfInterval(timestamp, INTERVAL 24 HOUR)) AS buckets \
                 FROM wide_events \
                 WHERE service_name = ? \
                   AND timestamp >= parseDateTimeBestEffort(?) \
                   AND timestamp < parseDateTimeBestEffort(?)",
            )
            .bind(service_id)
            .bind(&window.start)
            .bind(&window.end)
            .fetch_one::<BucketCountRow>()
            .await
            .map_err(|e| query_failed("data_completeness", e))?;

        let expected = expected_daily_buckets(window);
        if expected == 0 {
            return Ok(0.0);
        }
        Ok((row.buckets as f64 / expected as f64).min(1.0))
    }
}

fn expected_daily_buckets(window: &Window) -> u64 {
    let parse = |s: &str| chrono::DateTime::parse_from_rfc3339(s).ok();
    match (parse(&window.start), parse(&window.end)) {
        (Some(start), Some(end)) if end > start => {
            let hours = (end - start).num_hours().max(0) as u64;
            hours.div_ceil(24)
        }
        _ => 0,
    }
}

#[cfg(test)]
pub mod stub {
    use super::*;

    /// Canned telemetry for pipeline tests.
    #[derive(Default, Clone)]
    pub struct StubTelemetry {
        pub availability: std::collections::HashMap<String, AvailabilitySli>,
        pub latency: std::collections::HashMap<String, LatencySli>,
        pub rolling: std::collections::HashMap<String, Vec<f64>>,
        pub completeness: std::collections::HashMap<String, f64>,
        pub fail_for: Option<String>,
    }

    #[async_trait]
    impl TelemetryQuery for StubTelemetry {
        async fn availability_sli(
            &self,
            service_id: &str,
            _window: &Window,
        ) -> Result<Option<AvailabilitySli>, EngineError> {
            if self.fail_for.as_deref() == Some(service_id) {
                return Err(EngineError::TelemetryUnavailable("stub outage".to_string()));
            }
            Ok(self.availability.get(service_id).cloned())
        }

        async fn latency_percentiles(
            &self,
            service_id: &str,
            _window: &Window,
        ) -> Result<Option<LatencySli>, EngineError> {
            if self.fail_for.as_deref() == Some(service_id) {
                return Err(EngineError::TelemetryUnavailable("stub outage".to_string()));
            }
            Ok(self.latency.get(service_id).cloned())
        }

        async fn rolling_availability(
            &self,
            service_id: &str,
            _window: &Window,
            _bucket_hours: u32,
        ) -> Result<Vec<f64>, EngineError> {
            if self.fail_for.as_deref() == Some(service_id) {
                return Err(EngineError::TelemetryUnavailable("stub outage".to_string()));
            }
            Ok(self.rolling.get(service_id).cloned().unwrap_or_default())
        }

        async fn data_completeness(
            &self,
            service_id: &str,
            _window: &Window,
        ) -> Result<f64, EngineError> {
            Ok(self.completeness.get(service_id).copied().unwrap_or(1.0))
        }
    }
}
