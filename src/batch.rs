//! Batch recomputation of the whole fleet plus the periodic maintenance
//! sweeps. Every engine here is fire-and-forget: ticks log their failures
//! and the loops never die.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::StreamExt;
use serde::Serialize;

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::models::audit::{AuditAction, AuditEntry};
use crate::models::recommendation::RecommendationSet;
use crate::models::sli::SliType;
use crate::recommender;
use crate::store::Store;
use crate::telemetry::TelemetryQuery;

#[derive(Debug, Clone, Serialize)]
pub struct BatchFailure {
    pub service_id: String,
    pub error: String,
    pub detail: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchResult {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    /// Services with no telemetry at all; nothing to recommend yet.
    pub skipped: usize,
    pub duration_ms: u64,
    pub failures: Vec<BatchFailure>,
}

/// Regenerate recommendations for every eligible service, at most
/// `batch_concurrency` pipelines in flight. Per-service failures are
/// captured in the result; this function itself never errors.
pub async fn run_batch(
    store: &Arc<Store>,
    telemetry: &Arc<dyn TelemetryQuery>,
    config: &Arc<EngineConfig>,
) -> BatchResult {
    let started = std::time::Instant::now();

    let eligible = match store.list_batch_eligible(config.batch_include_discovered) {
        Ok(ids) => ids,
        Err(e) => {
            tracing::error!("batch: could not list eligible services: {e}");
            return BatchResult {
                total: 0,
                successful: 0,
                failed: 0,
                skipped: 0,
                duration_ms: started.elapsed().as_millis() as u64,
                failures: Vec::new(),
            };
        }
    };
    let total = eligible.len();
    tracing::info!(
        "batch: recomputing {} service(s), concurrency {}",
        total,
        config.batch_concurrency
    );

    let outcomes: Vec<(String, Result<RecommendationSet, EngineError>)> =
        futures_util::stream::iter(eligible.into_iter().map(|service_id| {
            let store = store.clone();
            let telemetry = telemetry.clone();
            let config = config.clone();
            async move {
                let result = recommender::generate_recommendations(
                    &store,
                    telemetry.as_ref(),
                    &config,
                    &service_id,
                    &[SliType::Availability, SliType::Latency],
                    None,
                    Utc::now(),
                )
                .await;
                (service_id, result)
            }
        }))
        .buffer_unordered(config.batch_concurrency.max(1))
        .collect()
        .await;

    let mut successful = 0usize;
    let mut skipped = 0usize;
    let mut failures = Vec::new();
    for (service_id, outcome) in outcomes {
        match outcome {
            Ok(set) => {
                successful += 1;
                note_drift(store, config, &set);
            }
            Err(EngineError::InsufficientData(_)) => skipped += 1,
            Err(e) => {
                tracing::warn!("batch: {service_id} failed: {e}");
                failures.push(BatchFailure {
                    service_id,
                    error: e.kind().to_string(),
                    detail: e.to_string(),
                });
            }
        }
    }

    let result = BatchResult {
        total,
        successful,
        failed: failures.len(),
        skipped,
        duration_ms: started.elapsed().as_millis() as u64,
        failures,
    };
    tracing::info!(
        "batch: done in {}ms ({} ok, {} failed, {} skipped)",
        result.duration_ms,
        result.successful,
        result.failed,
        result.skipped
    );
    result
}

/// Compare each freshly computed balanced target against the accepted
/// active SLO for the pair; relative deviation past the configured
/// threshold is recorded as drift so operators can revisit the target.
fn note_drift(store: &Store, config: &EngineConfig, set: &RecommendationSet) {
    for rec in &set.recommendations {
        let active = match store.get_active_slo(&set.service_id, rec.sli_type) {
            Ok(Some(slo)) => slo,
            Ok(None) => continue,
            Err(e) => {
                tracing::warn!("drift check failed for {}: {e}", set.service_id);
                continue;
            }
        };
        if active.target <= 0.0 {
            continue;
        }
        let balanced = rec.tiers.balanced.target;
        let deviation = (active.target - balanced).abs() / active.target;
        if deviation <= config.drift_threshold_ratio {
            continue;
        }

        let entry = AuditEntry {
            id: uuid::Uuid::new_v4().to_string(),
            service_id: set.service_id.clone(),
            recommendation_id: Some(rec.id.clone()),
            action: AuditAction::DriftTriggered,
            actor: "system".to_string(),
            previous_state: Some(serde_json::json!({
                "accepted_target": active.target,
                "tier": active.tier,
            })),
            new_state: Some(serde_json::json!({
                "recommended_balanced_target": balanced,
            })),
            rationale: format!(
                "balanced target drifted {:.1}% from the accepted {} target",
                deviation * 100.0,
                rec.sli_type.as_str()
            ),
            created_at: Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string(),
        };
        if let Err(e) = store.append_audit(&entry) {
            tracing::warn!("drift audit append failed for {}: {e}", set.service_id);
        } else {
            tracing::info!(
                "{}: {} target drift {:.1}% recorded",
                set.service_id,
                rec.sli_type.as_str(),
                deviation * 100.0
            );
        }
    }
}

/// Run the batch engine loop forever. Call this directly from the
/// standalone binary. Skipped ticks coalesce, so a run that overshoots the
/// interval is followed by exactly one catch-up run.
pub async fn run_batch_engine(
    store: Arc<Store>,
    telemetry: Arc<dyn TelemetryQuery>,
    config: Arc<EngineConfig>,
) {
    // Wait 60s on startup so ingest and telemetry settle first.
    tokio::time::sleep(Duration::from_secs(60)).await;
    tracing::info!(
        "batch engine: started (interval={}h)",
        config.batch_interval_hours
    );

    let mut interval =
        tokio::time::interval(Duration::from_secs(config.batch_interval_hours * 3600));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        interval.tick().await;
        run_batch(&store, &telemetry, &config).await;
    }
}

/// Spawn the maintenance sweeper: expires recommendations past their TTL
/// and marks edges stale once unobserved for the configured threshold.
pub fn spawn_maintenance_sweeper(store: Arc<Store>, config: Arc<EngineConfig>) {
    tokio::spawn(async move {
        tracing::info!(
            "maintenance sweeper: started (interval={}s, stale edge threshold={}h)",
            config.sweep_interval_secs,
            config.stale_edge_threshold_hours
        );

        let mut interval = tokio::time::interval(Duration::from_secs(config.sweep_interval_secs));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            let now = Utc::now();
            let now_str = now.format("%Y-%m-%dT%H:%M:%SZ").to_string();

            match store.expire_stale_recommendations(&now_str) {
                Ok(expired) if !expired.is_empty() => {
                    tracing::info!("sweeper: expired {} recommendation(s)", expired.len());
                }
                Ok(_) => {}
                Err(e) => tracing::error!("sweeper: expiry failed: {e}"),
            }

            let threshold = (now - chrono::Duration::hours(config.stale_edge_threshold_hours))
                .format("%Y-%m-%dT%H:%M:%SZ")
                .to_string();
            match store.mark_stale_older_than(&threshold) {
                Ok(marked) if marked > 0 => {
                    tracing::info!("sweeper: marked {marked} edge(s) stale");
                }
                Ok(_) => {}
                Err(e) => tracing::error!("sweeper: stale edge sweep failed: {e}"),
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::service::{Criticality, ServiceType};
    use crate::models::sli::{AvailabilitySli, Window};
    use crate::store::NodeUpsert;
    use crate::telemetry::stub::StubTelemetry;

    fn register(store: &Store, service_id: &str) {
        store
            .register_service(&NodeUpsert {
                service_id: service_id.to_string(),
                team: "fleet".to_string(),
                criticality: Criticality::Medium,
                service_type: ServiceType::Internal,
                published_sla: None,
                metadata: serde_json::json!({}),
                explicit: true,
            })
            .unwrap();
    }

    fn availability(ratio: f64) -> AvailabilitySli {
        let total = 100_000u64;
        AvailabilitySli::new(
            (ratio * total as f64).round() as u64,
            total,
            Window {
                start: "2026-06-01T00:00:00Z".to_string(),
                end: "2026-07-01T00:00:00Z".to_string(),
            },
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_batch_isolates_per_service_failures() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        for id in ["good", "quiet", "broken"] {
            register(&store, id);
        }
        let mut stub = StubTelemetry::default();
        stub.availability.insert("good".to_string(), availability(0.999));
        stub.rolling.insert("good".to_string(), vec![0.999; 30]);
        stub.fail_for = Some("broken".to_string());
        let telemetry: Arc<dyn TelemetryQuery> = Arc::new(stub);
        let config = Arc::new(EngineConfig::default());

        let result = run_batch(&store, &telemetry, &config).await;

        assert_eq!(result.total, 3);
        assert_eq!(result.successful, 1);
        assert_eq!(result.failed, 1);
        assert_eq!(result.skipped, 1);
        assert_eq!(result.failures.len(), 1);
        assert_eq!(result.failures[0].service_id, "broken");
        assert_eq!(result.failures[0].error, "telemetry_unavailable");

        // The successful pipeline persisted its recommendation.
        assert_eq!(store.get_active_recommendations("good", None).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_batch_excludes_discovered_placeholders_by_default() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        register(&store, "registered");
        // Placeholder arrives through edge ingestion only.
        store
            .apply_ingest(
                &[],
                &[crate::store::EdgeUpsert {
                    source_id: "registered".to_string(),
                    target_id: "ghost".to_string(),
                    discovery_source: crate::models::dependency::DiscoverySource::Kubernetes,
                    communication_mode: crate::models::dependency::CommunicationMode::Sync,
                    criticality: crate::models::dependency::EdgeCriticality::Hard,
                    protocol: String::new(),
                    timeout_ms: None,
                    retry_config: None,
                    redundancy_group: None,
                    confidence_score: 0.5,
                }],
                "2026-07-01T00:00:00Z",
            )
            .unwrap();

        let telemetry: Arc<dyn TelemetryQuery> = Arc::new(StubTelemetry::default());
        let config = Arc::new(EngineConfig::default());
        let result = run_batch(&store, &telemetry, &config).await;

        // Only the explicitly registered service is eligible.
        assert_eq!(result.total, 1);
    }

    #[tokio::test]
    async fn test_batch_records_drift_against_accepted_slo() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        register(&store, "drifting");
        let mut stub = StubTelemetry::default();
        stub.availability.insert("drifting".to_string(), availability(0.999));
        stub.rolling.insert("drifting".to_string(), vec![0.999; 30]);
        let telemetry: Arc<dyn TelemetryQuery> = Arc::new(stub);
        let config = Arc::new(EngineConfig::default());

        // Accepted long ago at a target far from what the data now supports.
        store
            .record_decision(
                Some(&crate::models::audit::ActiveSlo {
                    id: "s1".to_string(),
                    service_id: "drifting".to_string(),
                    sli_type: SliType::Availability,
                    metric: "error_rate".to_string(),
                    target: 90.0,
                    tier: "balanced".to_string(),
                    recommendation_id: "old".to_string(),
                    approved_by: "sre".to_string(),
                    rationale: String::new(),
                    created_at: "2026-01-01T00:00:00Z".to_string(),
                }),
                &AuditEntry {
                    id: "a0".to_string(),
                    service_id: "drifting".to_string(),
                    recommendation_id: Some("old".to_string()),
                    action: AuditAction::Accept,
                    actor: "sre".to_string(),
                    previous_state: None,
                    new_state: None,
                    rationale: String::new(),
                    created_at: "2026-01-01T00:00:00Z".to_string(),
                },
            )
            .unwrap();

        let result = run_batch(&store, &telemetry, &config).await;
        assert_eq!(result.successful, 1);

        let history = store.audit_history("drifting").unwrap();
        let drift: Vec<_> = history
            .iter()
            .filter(|e| e.action == AuditAction::DriftTriggered)
            .collect();
        assert_eq!(drift.len(), 1);
        assert_eq!(drift[0].actor, "system");
        assert_eq!(
            drift[0].previous_state.as_ref().unwrap()["accepted_target"],
            90.0
        );
    }

    #[tokio::test]
    async fn test_empty_fleet_is_a_noop() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let telemetry: Arc<dyn TelemetryQuery> = Arc::new(StubTelemetry::default());
        let config = Arc::new(EngineConfig::default());
        let result = run_batch(&store, &telemetry, &config).await;
        assert_eq!(result.total, 0);
        assert_eq!(result.failed, 0);
    }
}
