use serde::Deserialize;
use std::path::Path;

/// Engine tunables loaded from `slo_advisor.toml`. Every field has a
/// default so a missing file or empty table still yields a working config.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Standard telemetry lookback window in days.
    #[serde(default = "default_lookback_default_days")]
    pub lookback_default_days: u32,
    /// Cold-start cap when the standard window is too sparse.
    #[serde(default = "default_lookback_extended_days")]
    pub lookback_extended_days: u32,
    /// Completeness below this triggers the extended lookback.
    #[serde(default = "default_completeness_threshold")]
    pub completeness_threshold: f64,
    /// Assumed availability for dependencies without telemetry.
    #[serde(default = "default_dep_default_availability")]
    pub dep_default_availability: f64,
    /// Pessimism multiplier applied to published external SLAs.
    #[serde(default = "default_external_buffer_k")]
    pub external_buffer_k: f64,
    #[serde(default = "default_recommendation_ttl_hours")]
    pub recommendation_ttl_hours: i64,
    #[serde(default = "default_noise_margin_default")]
    pub noise_margin_default: f64,
    #[serde(default = "default_noise_margin_shared")]
    pub noise_margin_shared: f64,
    #[serde(default = "default_bootstrap_resamples")]
    pub bootstrap_resamples: u32,
    #[serde(default = "default_bootstrap_seed")]
    pub bootstrap_seed: u64,
    #[serde(default = "default_batch_concurrency")]
    pub batch_concurrency: usize,
    #[serde(default = "default_batch_interval_hours")]
    pub batch_interval_hours: u64,
    #[serde(default)]
    pub batch_include_discovered: bool,
    #[serde(default = "default_stale_edge_threshold_hours")]
    pub stale_edge_threshold_hours: i64,
    #[serde(default = "default_max_traversal_depth")]
    pub max_traversal_depth: u32,
    /// Depth used when the pipeline fetches a service's downstream chain.
    #[serde(default = "default_pipeline_subgraph_depth")]
    pub pipeline_subgraph_depth: u32,
    /// Relative deviation between an accepted target and a freshly computed
    /// balanced target that counts as drift.
    #[serde(default = "default_drift_threshold_ratio")]
    pub drift_threshold_ratio: f64,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        toml::from_str("").expect("empty config must deserialize")
    }
}

impl EngineConfig {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        if !Path::new(path).exists() {
            tracing::info!("config file {path} not found, using defaults");
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)?;
        let config: EngineConfig = toml::from_str(&contents)?;
        Ok(config)
    }
}

fn default_lookback_default_days() -> u32 {
    30
}

fn default_lookback_extended_days() -> u32 {
    90
}

fn default_completeness_threshold() -> f64 {
    0.90
}

fn default_dep_default_availability() -> f64 {
    0.999
}

fn default_external_buffer_k() -> f64 {
    11.0
}

fn default_recommendation_ttl_hours() -> i64 {
    24
}

fn default_noise_margin_default() -> f64 {
    0.05
}

fn default_noise_margin_shared() -> f64 {
    0.10
}

fn default_bootstrap_resamples() -> u32 {
    1000
}

fn default_bootstrap_seed() -> u64 {
    42
}

fn default_batch_concurrency() -> usize {
    20
}

fn default_batch_interval_hours() -> u64 {
    24
}

fn default_stale_edge_threshold_hours() -> i64 {
    168
}

fn default_max_traversal_depth() -> u32 {
    10
}

fn default_pipeline_subgraph_depth() -> u32 {
    3
}

fn default_drift_threshold_ratio() -> f64 {
    0.05
}

fn default_sweep_interval_secs() -> u64 {
    3600
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_values() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.lookback_default_days, 30);
        assert_eq!(cfg.lookback_extended_days, 90);
        assert!((cfg.completeness_threshold - 0.90).abs() < 1e-12);
        assert!((cfg.dep_default_availability - 0.999).abs() < 1e-12);
        assert!((cfg.external_buffer_k - 11.0).abs() < 1e-12);
        assert_eq!(cfg.recommendation_ttl_hours, 24);
        assert_eq!(cfg.batch_concurrency, 20);
        assert_eq!(cfg.stale_edge_threshold_hours, 168);
        assert_eq!(cfg.max_traversal_depth, 10);
        assert_eq!(cfg.pipeline_subgraph_depth, 3);
        assert!((cfg.drift_threshold_ratio - 0.05).abs() < 1e-12);
    }

    #[test]
    fn test_partial_toml_overrides_only_named_fields() {
        let cfg: EngineConfig =
            toml::from_str("batch_concurrency = 4\nbootstrap_seed = 7\n").unwrap();
        assert_eq!(cfg.batch_concurrency, 4);
        assert_eq!(cfg.bootstrap_seed, 7);
        assert_eq!(cfg.lookback_default_days, 30);
    }
}
