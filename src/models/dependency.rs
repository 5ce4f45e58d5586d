use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscoverySource {
    Manual,
    ServiceMesh,
    OtelServiceGraph,
    Kubernetes,
}

impl DiscoverySource {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiscoverySource::Manual => "manual",
            DiscoverySource::ServiceMesh => "service_mesh",
            DiscoverySource::OtelServiceGraph => "otel_service_graph",
            DiscoverySource::Kubernetes => "kubernetes",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "manual" => Some(DiscoverySource::Manual),
            "service_mesh" => Some(DiscoverySource::ServiceMesh),
            "otel_service_graph" => Some(DiscoverySource::OtelServiceGraph),
            "kubernetes" => Some(DiscoverySource::Kubernetes),
            _ => None,
        }
    }

    /// Merge precedence: higher wins when the same (source, target) pair is
    /// reported by more than one discovery source.
    pub fn priority(&self) -> i64 {
        match self {
            DiscoverySource::Manual => 4,
            DiscoverySource::ServiceMesh => 3,
            DiscoverySource::OtelServiceGraph => 2,
            DiscoverySource::Kubernetes => 1,
        }
    }

    /// Default confidence assigned at ingest when the payload carries none.
    pub fn default_confidence(&self) -> f64 {
        match self {
            DiscoverySource::Manual => 1.0,
            DiscoverySource::ServiceMesh => 0.9,
            DiscoverySource::OtelServiceGraph => 0.7,
            DiscoverySource::Kubernetes => 0.5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommunicationMode {
    Sync,
    Async,
}

impl CommunicationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommunicationMode::Sync => "sync",
            CommunicationMode::Async => "async",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "sync" => Some(CommunicationMode::Sync),
            "async" => Some(CommunicationMode::Async),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeCriticality {
    Hard,
    Soft,
}

impl EdgeCriticality {
    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeCriticality::Hard => "hard",
            EdgeCriticality::Soft => "soft",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "hard" => Some(EdgeCriticality::Hard),
            "soft" => Some(EdgeCriticality::Soft),
            _ => None,
        }
    }
}

/// A directed dependency as stored: one row per (source, target, discovery
/// source). The merged view picks the highest-priority row per pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependencyEdge {
    pub id: String,
    pub source_id: String,
    pub target_id: String,
    pub discovery_source: DiscoverySource,
    pub communication_mode: CommunicationMode,
    pub criticality: EdgeCriticality,
    pub protocol: String,
    pub timeout_ms: Option<i64>,
    pub retry_config: Option<serde_json::Value>,
    /// Edges sharing a group label at the same caller are treated as
    /// redundant replicas rather than serial dependencies.
    pub redundancy_group: Option<String>,
    pub confidence_score: f64,
    pub last_observed_at: String,
    pub is_stale: bool,
    pub created_at: String,
}

impl DependencyEdge {
    pub fn is_hard_sync(&self) -> bool {
        self.criticality == EdgeCriticality::Hard
            && self.communication_mode == CommunicationMode::Sync
    }
}

// ── Ingest payload ──

#[derive(Debug, Clone, Deserialize)]
pub struct IngestNode {
    pub service_id: String,
    #[serde(default)]
    pub team: String,
    pub criticality: Option<crate::models::service::Criticality>,
    pub service_type: Option<crate::models::service::ServiceType>,
    pub published_sla: Option<f64>,
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IngestEdge {
    pub source: String,
    pub target: String,
    #[serde(default = "default_mode")]
    pub communication_mode: CommunicationMode,
    #[serde(default = "default_edge_criticality")]
    pub criticality: EdgeCriticality,
    #[serde(default)]
    pub protocol: String,
    pub timeout_ms: Option<i64>,
    pub retry_config: Option<serde_json::Value>,
    pub redundancy_group: Option<String>,
    pub confidence_score: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct IngestPayload {
    pub source: DiscoverySource,
    #[serde(default)]
    pub nodes: Vec<IngestNode>,
    #[serde(default)]
    pub edges: Vec<IngestEdge>,
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub nodes_upserted: usize,
    pub edges_upserted: usize,
    pub newly_detected_cycles: Vec<Vec<String>>,
    pub warnings: Vec<String>,
    pub conflicts: Vec<String>,
}

// ── Cycle records ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleStatus {
    Open,
    Acknowledged,
    Resolved,
}

impl CycleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CycleStatus::Open => "open",
            CycleStatus::Acknowledged => "acknowledged",
            CycleStatus::Resolved => "resolved",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "open" => Some(CycleStatus::Open),
            "acknowledged" => Some(CycleStatus::Acknowledged),
            "resolved" => Some(CycleStatus::Resolved),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CycleRecord {
    pub id: String,
    pub members: Vec<String>,
    pub status: CycleStatus,
    pub detected_at: String,
    pub updated_at: String,
}

// ── Traversal ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Downstream,
    Upstream,
    Both,
}

impl Direction {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "downstream" => Some(Direction::Downstream),
            "upstream" => Some(Direction::Upstream),
            "both" => Some(Direction::Both),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Subgraph {
    pub nodes: Vec<String>,
    pub edges: Vec<DependencyEdge>,
    pub reached_depth: u32,
    pub has_cycle: bool,
}

fn default_mode() -> CommunicationMode {
    CommunicationMode::Sync
}

fn default_edge_criticality() -> EdgeCriticality {
    EdgeCriticality::Hard
}
