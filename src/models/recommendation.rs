use serde::{Deserialize, Serialize};

use crate::models::sli::SliType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationStatus {
    Active,
    Superseded,
    Expired,
}

impl RecommendationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecommendationStatus::Active => "active",
            RecommendationStatus::Superseded => "superseded",
            RecommendationStatus::Expired => "expired",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(RecommendationStatus::Active),
            "superseded" => Some(RecommendationStatus::Superseded),
            "expired" => Some(RecommendationStatus::Expired),
            _ => None,
        }
    }
}

/// One of the three recommended targets. `target` is a percentage for
/// availability SLIs and a millisecond threshold for latency SLIs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tier {
    pub target: f64,
    pub breach_probability: f64,
    pub confidence_interval_lower: f64,
    pub confidence_interval_upper: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_budget_minutes: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierSet {
    pub conservative: Tier,
    pub balanced: Tier,
    pub aggressive: Tier,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureContribution {
    pub feature: String,
    pub contribution: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Explanation {
    pub summary: String,
    pub attributions: Vec<FeatureContribution>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dependency_impact: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataQuality {
    pub completeness: f64,
    pub gaps: Vec<String>,
    pub confidence_note: String,
    pub is_cold_start: bool,
    pub lookback_days_actual: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recommendation {
    pub id: String,
    pub service_id: String,
    pub sli_type: SliType,
    pub metric: String,
    pub tiers: TierSet,
    pub explanation: Explanation,
    pub data_quality: DataQuality,
    pub lookback_window_start: String,
    pub lookback_window_end: String,
    pub generated_at: String,
    pub expires_at: String,
    pub status: RecommendationStatus,
}

/// What the generate/get operations hand back: one recommendation per SLI
/// type that could be computed, plus notes for the types that could not.
#[derive(Debug, Clone, Serialize)]
pub struct RecommendationSet {
    pub service_id: String,
    pub recommendations: Vec<Recommendation>,
    pub notes: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct GenerateParams {
    pub sli_type: Option<String>,
    pub lookback_days: Option<u32>,
    #[serde(default)]
    pub force_regenerate: bool,
}
