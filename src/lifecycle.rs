//! Lifecycle decisions over recommendations: accept, modify or reject, each
//! recorded in the append-only audit trail together with value snapshots of
//! the state it replaced.

use chrono::{DateTime, Utc};

use crate::error::EngineError;
use crate::models::audit::{ActiveSlo, AuditAction, AuditEntry, DecisionRequest};
use crate::models::recommendation::{Recommendation, Tier};
use crate::store::Store;

fn ts(t: DateTime<Utc>) -> String {
    t.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

fn tier_of<'a>(rec: &'a Recommendation, name: &str) -> Option<&'a Tier> {
    match name {
        "conservative" => Some(&rec.tiers.conservative),
        "balanced" => Some(&rec.tiers.balanced),
        "aggressive" => Some(&rec.tiers.aggressive),
        _ => None,
    }
}

fn slo_snapshot(slo: &ActiveSlo) -> serde_json::Value {
    serde_json::json!({
        "target": slo.target,
        "tier": slo.tier,
        "recommendation_id": slo.recommendation_id,
        "approved_by": slo.approved_by,
    })
}

/// Apply an accept / modify / reject decision. Returns the resulting active
/// SLO (none for reject). The audit entry and the SLO row commit together.
pub fn decide(
    store: &Store,
    service_id: &str,
    req: &DecisionRequest,
    now: DateTime<Utc>,
) -> Result<Option<ActiveSlo>, EngineError> {
    store
        .get_service(service_id)
        .map_err(EngineError::storage)?
        .ok_or_else(|| EngineError::ServiceNotFound(service_id.to_string()))?;

    let rec = store
        .get_recommendation(&req.recommendation_id)
        .map_err(EngineError::storage)?
        .ok_or_else(|| {
            EngineError::InvalidInput(format!(
                "recommendation {} not found",
                req.recommendation_id
            ))
        })?;
    if rec.service_id != service_id {
        return Err(EngineError::InvalidInput(format!(
            "recommendation {} belongs to {}, not {service_id}",
            rec.id, rec.service_id
        )));
    }

    let previous = store
        .get_active_slo(service_id, rec.sli_type)
        .map_err(EngineError::storage)?;
    let previous_state = previous.as_ref().map(slo_snapshot);

    let (active_slo, new_state) = match req.action {
        AuditAction::Accept => {
            let tier_name = req.tier.as_deref().ok_or_else(|| {
                EngineError::InvalidInput("accept requires a tier selection".to_string())
            })?;
            let tier = tier_of(&rec, tier_name).ok_or_else(|| {
                EngineError::InvalidInput(format!("unknown tier '{tier_name}'"))
            })?;
            let slo = build_active_slo(service_id, &rec, tier.target, tier_name, req, now);
            let snapshot = slo_snapshot(&slo);
            (Some(slo), Some(snapshot))
        }
        AuditAction::Modify => {
            let target = req.modified_target.ok_or_else(|| {
                EngineError::InvalidInput("modify requires modified_target".to_string())
            })?;
            if target <= 0.0 {
                return Err(EngineError::InvalidInput(format!(
                    "modified_target {target} must be positive"
                )));
            }
            let slo = build_active_slo(service_id, &rec, target, "modified", req, now);
            let mut snapshot = slo_snapshot(&slo);
            snapshot["modified_from"] =
                serde_json::json!({"balanced_target": rec.tiers.balanced.target});
            (Some(slo), Some(snapshot))
        }
        AuditAction::Reject => (None, None),
        other => {
            return Err(EngineError::InvalidInput(format!(
                "action '{}' is not a caller decision",
                other.as_str()
            )));
        }
    };

    let entry = AuditEntry {
        id: uuid::Uuid::new_v4().to_string(),
        service_id: service_id.to_string(),
        recommendation_id: Some(rec.id.clone()),
        action: req.action,
        actor: req.actor.clone(),
        previous_state,
        new_state,
        rationale: req.rationale.clone(),
        created_at: ts(now),
    };
    store
        .record_decision(active_slo.as_ref(), &entry)
        .map_err(EngineError::storage)?;

    tracing::info!(
        "{service_id}: {} by {} on recommendation {}",
        req.action.as_str(),
        req.actor,
        rec.id
    );
    Ok(active_slo)
}

fn build_active_slo(
    service_id: &str,
    rec: &Recommendation,
    target: f64,
    tier: &str,
    req: &DecisionRequest,
    now: DateTime<Utc>,
) -> ActiveSlo {
    ActiveSlo {
        id: uuid::Uuid::new_v4().to_string(),
        service_id: service_id.to_string(),
        sli_type: rec.sli_type,
        metric: rec.metric.clone(),
        target,
        tier: tier.to_string(),
        recommendation_id: rec.id.clone(),
        approved_by: req.actor.clone(),
        rationale: req.rationale.clone(),
        created_at: ts(now),
    }
}
