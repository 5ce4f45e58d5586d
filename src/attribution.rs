//! Weighted feature attribution for recommendation explanations. Weights
//! are fixed per SLI type; no model training happens here.

use std::collections::BTreeMap;

use crate::error::EngineError;
use crate::models::recommendation::FeatureContribution;
use crate::models::sli::SliType;

const AVAILABILITY_WEIGHTS: [(&str, f64); 4] = [
    ("historical_availability", 0.40),
    ("downstream_risk", 0.30),
    ("external_reliability", 0.15),
    ("deployment_freq", 0.15),
];

const LATENCY_WEIGHTS: [(&str, f64); 4] = [
    ("p99_historical", 0.50),
    ("call_chain_depth", 0.22),
    ("noisy_neighbor", 0.15),
    ("traffic_seasonality", 0.13),
];

pub fn weight_table(sli_type: SliType) -> &'static [(&'static str, f64)] {
    match sli_type {
        SliType::Availability => &AVAILABILITY_WEIGHTS,
        SliType::Latency => &LATENCY_WEIGHTS,
    }
}

/// Weighted contributions, normalized to sum 1.0 and sorted by absolute
/// contribution descending. Inputs must carry exactly the keys of the
/// weight table; all-zero inputs distribute uniformly.
pub fn attribute(
    sli_type: SliType,
    inputs: &BTreeMap<String, f64>,
) -> Result<Vec<FeatureContribution>, EngineError> {
    let table = weight_table(sli_type);

    if inputs.len() != table.len() {
        return Err(EngineError::InvalidInput(format!(
            "attribution inputs for {} must have exactly {} features, got {}",
            sli_type.as_str(),
            table.len(),
            inputs.len()
        )));
    }
    for (key, _) in table {
        if !inputs.contains_key(*key) {
            return Err(EngineError::InvalidInput(format!(
                "attribution inputs missing feature '{key}'"
            )));
        }
    }

    let raw: Vec<(String, f64)> = table
        .iter()
        .map(|(key, weight)| (key.to_string(), inputs[*key] * weight))
        .collect();

    let total: f64 = raw.iter().map(|(_, c)| c.abs()).sum();
    let mut contributions: Vec<FeatureContribution> = if total == 0.0 {
        let uniform = 1.0 / table.len() as f64;
        raw.into_iter()
            .map(|(feature, _)| FeatureContribution {
                feature,
                contribution: uniform,
            })
            .collect()
    } else {
        raw.into_iter()
            .map(|(feature, c)| FeatureContribution {
                feature,
                contribution: c / total,
            })
            .collect()
    };

    contributions.sort_by(|a, b| {
        b.contribution
            .abs()
            .partial_cmp(&a.contribution.abs())
            .unwrap()
    });
    Ok(contributions)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inputs(pairs: &[(&str, f64)]) -> BTreeMap<String, f64> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    fn availability_inputs(a: f64, b: f64, c: f64, d: f64) -> BTreeMap<String, f64> {
        inputs(&[
            ("historical_availability", a),
            ("downstream_risk", b),
            ("external_reliability", c),
            ("deployment_freq", d),
        ])
    }

    #[test]
    fn test_weight_tables_sum_to_one() {
        for sli in [SliType::Availability, SliType::Latency] {
            let sum: f64 = weight_table(sli).iter().map(|(_, w)| w).sum();
            assert!((sum - 1.0).abs() < 1e-9, "{} weights sum {sum}", sli.as_str());
        }
    }

    #[test]
    fn test_contributions_sum_to_one() {
        let out = attribute(SliType::Availability, &availability_inputs(0.99, 0.3, 0.1, 0.7)).unwrap();
        let sum: f64 = out.iter().map(|c| c.contribution).sum();
        assert!((sum - 1.0).abs() < 1e-6, "sum was {sum}");
    }

    #[test]
    fn test_sorted_by_abs_contribution_desc() {
        let out = attribute(SliType::Availability, &availability_inputs(1.0, 0.01, 0.9, 0.02)).unwrap();
        for pair in out.windows(2) {
            assert!(pair[0].contribution.abs() >= pair[1].contribution.abs());
        }
        assert_eq!(out[0].feature, "historical_availability");
    }

    #[test]
    fn test_all_zero_inputs_distribute_uniformly() {
        let out = attribute(SliType::Latency, &inputs(&[
            ("p99_historical", 0.0),
            ("call_chain_depth", 0.0),
            ("noisy_neighbor", 0.0),
            ("traffic_seasonality", 0.0),
        ]))
        .unwrap();
        for c in &out {
            assert!((c.contribution - 0.25).abs() < 1e-12);
        }
    }

    #[test]
    fn test_missing_key_rejected() {
        let err = attribute(SliType::Availability, &inputs(&[
            ("historical_availability", 0.9),
            ("downstream_risk", 0.1),
            ("external_reliability", 0.0),
        ]))
        .unwrap_err();
        assert_eq!(err.kind(), "invalid_input");
    }

    #[test]
    fn test_extra_key_rejected() {
        let mut bad = availability_inputs(0.9, 0.1, 0.0, 0.0);
        bad.insert("surprise".to_string(), 1.0);
        let err = attribute(SliType::Availability, &bad).unwrap_err();
        assert_eq!(err.kind(), "invalid_input");
    }
}
