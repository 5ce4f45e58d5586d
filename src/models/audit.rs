use serde::{Deserialize, Serialize};

use crate::models::sli::SliType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Accept,
    Modify,
    Reject,
    AutoApprove,
    DriftTriggered,
    Expire,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Accept => "accept",
            AuditAction::Modify => "modify",
            AuditAction::Reject => "reject",
            AuditAction::AutoApprove => "auto_approve",
            AuditAction::DriftTriggered => "drift_triggered",
            AuditAction::Expire => "expire",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "accept" => Some(AuditAction::Accept),
            "modify" => Some(AuditAction::Modify),
            "reject" => Some(AuditAction::Reject),
            "auto_approve" => Some(AuditAction::AutoApprove),
            "drift_triggered" => Some(AuditAction::DriftTriggered),
            "expire" => Some(AuditAction::Expire),
            _ => None,
        }
    }
}

/// Append-only record of a lifecycle action. State snapshots are stored as
/// JSON values so the history survives schema drift in the live rows.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEntry {
    pub id: String,
    pub service_id: String,
    pub recommendation_id: Option<String>,
    pub action: AuditAction,
    pub actor: String,
    pub previous_state: Option<serde_json::Value>,
    pub new_state: Option<serde_json::Value>,
    pub rationale: String,
    pub created_at: String,
}

/// The operating target a human (or auto-approval) accepted.
#[derive(Debug, Clone, Serialize)]
pub struct ActiveSlo {
    pub id: String,
    pub service_id: String,
    pub sli_type: SliType,
    pub metric: String,
    pub target: f64,
    pub tier: String,
    pub recommendation_id: String,
    pub approved_by: String,
    pub rationale: String,
    pub created_at: String,
}

#[derive(Debug, Deserialize)]
pub struct DecisionRequest {
    pub recommendation_id: String,
    pub action: AuditAction,
    /// Tier selected on accept: `conservative`, `balanced` or `aggressive`.
    pub tier: Option<String>,
    /// Target override applied on modify.
    pub modified_target: Option<f64>,
    #[serde(default)]
    pub rationale: String,
    pub actor: String,
}
