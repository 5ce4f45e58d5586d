//! The recommendation pipeline: for one service, derive three-tier SLO
//! targets per SLI type from historical telemetry, cap them by what the
//! dependency chain can actually deliver, and persist the result.

use chrono::{DateTime, Duration, Utc};
use futures_util::future::join_all;

use crate::composite::{
    self, CompositeResult, DepAvailability, collapse_cycles, composite_availability,
    effective_external_availability,
};
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::models::dependency::Direction;
use crate::models::recommendation::{
    DataQuality, Explanation, Recommendation, RecommendationSet, RecommendationStatus, Tier,
    TierSet,
};
use crate::models::service::{Service, ServiceType};
use crate::models::sli::{AvailabilitySli, LatencySli, SliType, Window};
use crate::store::Store;
use crate::telemetry::TelemetryQuery;
use crate::{attribution, stats, traversal};

const MINUTES_PER_MONTH: f64 = 43200.0;

/// Quantile positions of the availability tiers: the pessimistic tail
/// floor, p99 and p95 of the rolling series.
const CONSERVATIVE_Q: f64 = 0.001;
const BALANCED_Q: f64 = 0.01;
const AGGRESSIVE_Q: f64 = 0.05;

fn ts(t: DateTime<Utc>) -> String {
    t.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

/// Dependency picture shared by the pipeline and the constraint analyzer.
pub(crate) struct DependencyContext {
    pub composite: CompositeResult,
    /// Deps after cycle members collapsed into supernodes; what the
    /// composite product actually ran over.
    pub deps: Vec<DepAvailability>,
    /// Deps before collapsing, one entry per service. Impact analysis
    /// substitutes proposals here and re-collapses.
    pub raw_deps: Vec<DepAvailability>,
    pub reached_depth: u32,
    /// Weakest effective availability among external dependencies, if any.
    pub worst_external: Option<f64>,
}

/// Resolve the hard-sync dependency closure of `service_id`, fetch each
/// dependency's availability over `window`, and fold the composite bound.
/// Missing dependency telemetry falls back to the configured default and is
/// never fatal.
pub(crate) async fn dependency_context(
    store: &Store,
    telemetry: &dyn TelemetryQuery,
    config: &EngineConfig,
    service_id: &str,
    r_self: f64,
    window: &Window,
    depth: u32,
) -> Result<DependencyContext, EngineError> {
    let sub = traversal::traverse(store, service_id, Direction::Downstream, depth, false)?;

    let hard_ids = composite::hard_sync_closure(&sub.edges, service_id);
    let direct = store
        .edges_from(service_id, false)
        .map_err(EngineError::storage)?;
    let soft_direct: Vec<&crate::models::dependency::DependencyEdge> =
        direct.iter().filter(|e| !e.is_hard_sync()).collect();

    let fetches = hard_ids.iter().map(|dep_id| async move {
        let service = store.get_service(dep_id).map_err(EngineError::storage)?;
        let observed = match telemetry.availability_sli(dep_id, window).await {
            Ok(sli) => sli.map(|s| s.availability_ratio),
            Err(e) => {
                tracing::warn!("dependency {dep_id}: telemetry fetch failed, using default: {e}");
                None
            }
        };
        Ok::<(Option<Service>, Option<f64>), EngineError>((service, observed))
    });
    let fetched = join_all(fetches).await;

    let mut deps = Vec::with_capacity(hard_ids.len());
    let mut worst_external: Option<f64> = None;
    for (dep_id, fetched) in hard_ids.iter().zip(fetched) {
        let (service, observed) = fetched?;
        let is_external = service
            .as_ref()
            .map(|s| s.service_type == ServiceType::External)
            .unwrap_or(false);
        let availability = if is_external {
            let published = service.as_ref().and_then(|s| s.published_sla);
            let effective = effective_external_availability(
                observed,
                published,
                config.external_buffer_k,
                config.dep_default_availability,
            );
            worst_external = Some(worst_external.map_or(effective, |w: f64| w.min(effective)));
            effective
        } else {
            observed.unwrap_or(config.dep_default_availability)
        };
        let redundancy_group = direct
            .iter()
            .find(|e| e.target_id == *dep_id && e.is_hard_sync())
            .and_then(|e| e.redundancy_group.clone());
        deps.push(DepAvailability {
            service_id: dep_id.clone(),
            availability,
            hard_sync: true,
            redundancy_group,
        });
    }

    // Soft deps ride along for risk reporting only.
    let soft_fetches = soft_direct.iter().map(|edge| async move {
        let observed = telemetry
            .availability_sli(&edge.target_id, window)
            .await
            .ok()
            .flatten()
            .map(|s| s.availability_ratio);
        (edge.target_id.clone(), observed)
    });
    for (dep_id, observed) in join_all(soft_fetches).await {
        deps.push(DepAvailability {
            service_id: dep_id,
            availability: observed.unwrap_or(config.dep_default_availability),
            hard_sync: false,
            redundancy_group: None,
        });
    }

    let open_cycles = store.open_cycles().map_err(EngineError::storage)?;
    let raw_deps = deps.clone();
    let collapsed = collapse_cycles(deps, &open_cycles);
    let composite = composite_availability(r_self, &collapsed);

    Ok(DependencyContext {
        composite,
        deps: collapsed,
        raw_deps,
        reached_depth: sub.reached_depth,
        worst_external,
    })
}

pub async fn generate_recommendations(
    store: &Store,
    telemetry: &dyn TelemetryQuery,
    config: &EngineConfig,
    service_id: &str,
    requested: &[SliType],
    lookback_override: Option<u32>,
    now: DateTime<Utc>,
) -> Result<RecommendationSet, EngineError> {
    // Step 1: resolve the service.
    let service = store
        .get_service(service_id)
        .map_err(EngineError::storage)?
        .ok_or_else(|| EngineError::ServiceNotFound(service_id.to_string()))?;

    // Step 2: choose the lookback window, extending it on sparse data.
    let mut lookback_days = lookback_override.unwrap_or(config.lookback_default_days);
    let mut is_cold_start = false;
    let mut window = lookback_window(now, lookback_days);
    let mut completeness = telemetry.data_completeness(service_id, &window).await?;
    if lookback_override.is_none() && completeness < config.completeness_threshold {
        lookback_days = config.lookback_extended_days;
        is_cold_start = true;
        window = lookback_window(now, lookback_days);
        completeness = telemetry.data_completeness(service_id, &window).await?;
        tracing::debug!(
            "{service_id}: sparse telemetry, extended lookback to {lookback_days}d \
             (completeness now {completeness:.2})"
        );
    }

    // Step 3: fetch telemetry concurrently.
    let (availability, latency, rolling) = tokio::join!(
        telemetry.availability_sli(service_id, &window),
        telemetry.latency_percentiles(service_id, &window),
        telemetry.rolling_availability(service_id, &window, 24),
    );
    let availability = availability?;
    let latency = latency?;
    let rolling = rolling?;

    // Steps 4-6: subgraph, dependency availabilities, composite bound.
    let r_self = availability
        .as_ref()
        .map(|s| s.availability_ratio)
        .unwrap_or(config.dep_default_availability);
    let dep_ctx = dependency_context(
        store,
        telemetry,
        config,
        service_id,
        r_self,
        &window,
        config.pipeline_subgraph_depth,
    )
    .await?;

    let mut recommendations = Vec::new();
    let mut notes = Vec::new();

    for sli_type in requested {
        // Steps 7-11 per SLI type, isolated so one missing signal does not
        // sink the other.
        let built = match sli_type {
            SliType::Availability => match (&availability, rolling.is_empty()) {
                (Some(sli), false) => Some(availability_recommendation(
                    config,
                    service_id,
                    sli,
                    &rolling,
                    &dep_ctx,
                    &window,
                    lookback_days,
                    completeness,
                    is_cold_start,
                    now,
                )?),
                _ => {
                    notes.push("availability: no telemetry in window, skipped".to_string());
                    None
                }
            },
            SliType::Latency => match &latency {
                Some(sli) => Some(latency_recommendation(
                    config,
                    service_id,
                    &service,
                    sli,
                    &rolling,
                    &dep_ctx,
                    &window,
                    lookback_days,
                    completeness,
                    is_cold_start,
                    now,
                )?),
                None => {
                    notes.push("latency: no telemetry in window, skipped".to_string());
                    None
                }
            },
        };
        if let Some(rec) = built {
            recommendations.push(rec);
        }
    }

    if recommendations.is_empty() {
        return Err(EngineError::InsufficientData(format!(
            "no telemetry for any requested SLI type on {service_id}"
        )));
    }

    // Step 12: persist, superseding the previous active rows. One
    // transaction covers every SLI type produced by this invocation.
    store
        .save_recommendations(&recommendations)
        .map_err(EngineError::storage)?;
    tracing::info!(
        "{service_id}: generated {} recommendation(s), lookback {lookback_days}d",
        recommendations.len()
    );

    Ok(RecommendationSet {
        service_id: service_id.to_string(),
        recommendations,
        notes,
    })
}

fn lookback_window(now: DateTime<Utc>, days: u32) -> Window {
    Window {
        start: ts(now - Duration::days(days as i64)),
        end: ts(now),
    }
}

fn budget_minutes(target_pct: f64) -> f64 {
    (1.0 - target_pct / 100.0) * MINUTES_PER_MONTH
}

#[allow(clippy::too_many_arguments)]
fn availability_recommendation(
    config: &EngineConfig,
    service_id: &str,
    sli: &AvailabilitySli,
    rolling: &[f64],
    dep_ctx: &DependencyContext,
    window: &Window,
    lookback_days: u32,
    completeness: f64,
    is_cold_start: bool,
    now: DateTime<Utc>,
) -> Result<Recommendation, EngineError> {
    let mut sorted = rolling.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let r_comp = dep_ctx.composite.composite;

    // Step 7: tier targets. The dependency cap binds the conservative and
    // balanced tiers; aggressive deliberately shows the service's own
    // potential absent dependencies.
    let conservative_ratio = stats::percentile(&sorted, CONSERVATIVE_Q).min(r_comp);
    let balanced_ratio = stats::percentile(&sorted, BALANCED_Q).min(r_comp);
    let aggressive_ratio = stats::percentile(&sorted, AGGRESSIVE_Q);

    // Steps 8-9: breach probability against the rolling buckets, bootstrap
    // interval on each tier's quantile statistic.
    let tier = |ratio: f64, q: f64| -> Tier {
        let ci = stats::bootstrap_quantile_ci(
            &sorted,
            q,
            config.bootstrap_resamples,
            config.bootstrap_seed,
        );
        Tier {
            target: ratio * 100.0,
            breach_probability: stats::fraction_below(rolling, ratio),
            confidence_interval_lower: ci.lower * 100.0,
            confidence_interval_upper: ci.upper * 100.0,
            error_budget_minutes: Some(budget_minutes(ratio * 100.0)),
        }
    };
    let tiers = TierSet {
        conservative: tier(conservative_ratio, CONSERVATIVE_Q),
        balanced: tier(balanced_ratio, BALANCED_Q),
        aggressive: tier(aggressive_ratio, AGGRESSIVE_Q),
    };

    // Step 10: weighted attribution.
    let inputs = [
        ("historical_availability", sli.availability_ratio),
        ("downstream_risk", 1.0 - r_comp),
        ("external_reliability", dep_ctx.worst_external.unwrap_or(0.0)),
        ("deployment_freq", 0.0),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect();
    let attributions = attribution::attribute(SliType::Availability, &inputs)?;

    // Step 11: deterministic explanation.
    let observed_pct = sli.availability_ratio * 100.0;
    let balanced_pct = balanced_ratio * 100.0;
    let mut summary = format!(
        "Observed availability {observed_pct:.4}% over {lookback_days} day(s); \
         balanced target {balanced_pct:.4}% leaves {:.4} points of margin.",
        observed_pct - balanced_pct
    );
    let dependency_impact = if dep_ctx.composite.hard_count > 0 {
        summary.push_str(&format!(
            " {} hard dependencies bound the composite availability at {:.4}%.",
            dep_ctx.composite.hard_count,
            r_comp * 100.0
        ));
        dep_ctx.composite.bottleneck.as_ref().map(|bn| {
            format!(
                "bottleneck {} costs {:.4} points of achievable availability",
                bn.name,
                bn.delta * 100.0
            )
        })
    } else {
        None
    };

    Ok(Recommendation {
        id: uuid::Uuid::new_v4().to_string(),
        service_id: service_id.to_string(),
        sli_type: SliType::Availability,
        metric: "error_rate".to_string(),
        tiers,
        explanation: Explanation {
            summary,
            attributions,
            dependency_impact,
        },
        data_quality: data_quality(rolling.len(), lookback_days, completeness, is_cold_start, config),
        lookback_window_start: window.start.clone(),
        lookback_window_end: window.end.clone(),
        generated_at: ts(now),
        expires_at: ts(now + Duration::hours(config.recommendation_ttl_hours)),
        status: RecommendationStatus::Active,
    })
}

/// Breach probability read off the percentile ladder: the complement of the
/// highest quantile whose value fits under the threshold.
fn latency_breach_probability(sli: &LatencySli, threshold_ms: f64) -> f64 {
    if threshold_ms >= sli.p999_ms {
        0.001
    } else if threshold_ms >= sli.p99_ms {
        0.01
    } else if threshold_ms >= sli.p95_ms {
        0.05
    } else if threshold_ms >= sli.p50_ms {
        0.5
    } else {
        1.0
    }
}

#[allow(clippy::too_many_arguments)]
fn latency_recommendation(
    config: &EngineConfig,
    service_id: &str,
    service: &Service,
    sli: &LatencySli,
    rolling: &[f64],
    dep_ctx: &DependencyContext,
    window: &Window,
    lookback_days: u32,
    completeness: f64,
    is_cold_start: bool,
    now: DateTime<Utc>,
) -> Result<Recommendation, EngineError> {
    let margin = if service.uses_shared_infra() {
        config.noise_margin_shared
    } else {
        config.noise_margin_default
    };

    let conservative_ms = (sli.p999_ms * (1.0 + margin)).ceil();
    let balanced_ms = (sli.p99_ms * (1.0 + margin)).ceil();
    let aggressive_ms = sli.p95_ms;

    // Only the percentile summary exists for latency, so the interval is
    // the threshold itself.
    let tier = |threshold_ms: f64| Tier {
        target: threshold_ms,
        breach_probability: latency_breach_probability(sli, threshold_ms),
        confidence_interval_lower: threshold_ms,
        confidence_interval_upper: threshold_ms,
        error_budget_minutes: None,
    };
    let tiers = TierSet {
        conservative: tier(conservative_ms),
        balanced: tier(balanced_ms),
        aggressive: tier(aggressive_ms),
    };

    let inputs = [
        (
            "p99_historical",
            if sli.p999_ms > 0.0 {
                sli.p99_ms / sli.p999_ms
            } else {
                0.0
            },
        ),
        (
            "call_chain_depth",
            dep_ctx.reached_depth as f64 / config.max_traversal_depth as f64,
        ),
        (
            "noisy_neighbor",
            if service.uses_shared_infra() { 1.0 } else { 0.0 },
        ),
        ("traffic_seasonality", stats::stddev(rolling)),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect();
    let attributions = attribution::attribute(SliType::Latency, &inputs)?;

    let mut summary = format!(
        "Observed p99 latency {:.1}ms over {lookback_days} day(s); balanced threshold \
         {balanced_ms:.0}ms includes a {:.0}% noise margin.",
        sli.p99_ms,
        margin * 100.0
    );
    if dep_ctx.composite.hard_count > 0 {
        summary.push_str(&format!(
            " Call chain spans {} hard dependencies.",
            dep_ctx.composite.hard_count
        ));
    }

    Ok(Recommendation {
        id: uuid::Uuid::new_v4().to_string(),
        service_id: service_id.to_string(),
        sli_type: SliType::Latency,
        metric: "p99_response_time_ms".to_string(),
        tiers,
        explanation: Explanation {
            summary,
            attributions,
            dependency_impact: None,
        },
        data_quality: data_quality(rolling.len(), lookback_days, completeness, is_cold_start, config),
        lookback_window_start: window.start.clone(),
        lookback_window_end: window.end.clone(),
        generated_at: ts(now),
        expires_at: ts(now + Duration::hours(config.recommendation_ttl_hours)),
        status: RecommendationStatus::Active,
    })
}

fn data_quality(
    buckets_present: usize,
    lookback_days: u32,
    completeness: f64,
    is_cold_start: bool,
    config: &EngineConfig,
) -> DataQuality {
    let mut gaps = Vec::new();
    if (buckets_present as u32) < lookback_days {
        gaps.push(format!(
            "{buckets_present} of {lookback_days} daily buckets present"
        ));
    }
    let confidence_note = if is_cold_start && completeness < config.completeness_threshold {
        "low confidence: extended lookback still below completeness threshold".to_string()
    } else if is_cold_start {
        "reduced confidence: extended lookback used to reach completeness".to_string()
    } else {
        "normal confidence".to_string()
    };
    DataQuality {
        completeness,
        gaps,
        confidence_note,
        is_cold_start,
        lookback_days_actual: lookback_days,
    }
}
