use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Criticality {
    Critical,
    High,
    Medium,
    Low,
}

impl Criticality {
    pub fn as_str(&self) -> &'static str {
        match self {
            Criticality::Critical => "critical",
            Criticality::High => "high",
            Criticality::Medium => "medium",
            Criticality::Low => "low",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "critical" => Some(Criticality::Critical),
            "high" => Some(Criticality::High),
            "medium" => Some(Criticality::Medium),
            "low" => Some(Criticality::Low),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceType {
    Internal,
    External,
}

impl ServiceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceType::Internal => "internal",
            ServiceType::External => "external",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "internal" => Some(ServiceType::Internal),
            "external" => Some(ServiceType::External),
            _ => None,
        }
    }
}

/// A registered participant in the dependency graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Service {
    pub service_id: String,
    pub team: String,
    pub criticality: Criticality,
    pub service_type: ServiceType,
    /// Contract availability for external services, as a ratio in (0, 1].
    pub published_sla: Option<f64>,
    /// True when the row was auto-created by edge ingestion before any
    /// explicit registration arrived.
    pub discovered: bool,
    pub metadata: serde_json::Value,
    pub created_at: String,
    pub updated_at: String,
}

impl Service {
    /// Shared-infrastructure marker used by the latency noise margin.
    pub fn uses_shared_infra(&self) -> bool {
        self.metadata
            .get("shared_infrastructure")
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }
}

#[derive(Debug, Deserialize)]
pub struct RegisterServiceRequest {
    pub service_id: String,
    #[serde(default)]
    pub team: String,
    #[serde(default = "default_criticality")]
    pub criticality: Criticality,
    #[serde(default = "default_service_type")]
    pub service_type: ServiceType,
    pub published_sla: Option<f64>,
    #[serde(default = "default_metadata")]
    pub metadata: serde_json::Value,
}

#[derive(Debug, Deserialize)]
pub struct ListServicesParams {
    #[serde(default)]
    pub skip: i64,
    #[serde(default = "default_limit")]
    pub limit: i64,
    pub team: Option<String>,
    pub criticality: Option<String>,
    pub discovered: Option<bool>,
}

fn default_criticality() -> Criticality {
    Criticality::Medium
}

fn default_service_type() -> ServiceType {
    ServiceType::Internal
}

fn default_metadata() -> serde_json::Value {
    serde_json::json!({})
}

fn default_limit() -> i64 {
    100
}
