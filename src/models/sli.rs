use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SliType {
    Availability,
    Latency,
}

impl SliType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SliType::Availability => "availability",
            SliType::Latency => "latency",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "availability" => Some(SliType::Availability),
            "latency" => Some(SliType::Latency),
            _ => None,
        }
    }
}

/// Closed interval of wall-clock time the SLI was measured over.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Window {
    pub start: String,
    pub end: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AvailabilitySli {
    pub good_events: u64,
    pub total_events: u64,
    pub availability_ratio: f64,
    pub window: Window,
    pub sample_count: u64,
}

impl AvailabilitySli {
    /// Rejects negative counts by construction; `good > total` is a data
    /// error from the telemetry store.
    pub fn new(good_events: u64, total_events: u64, window: Window) -> Option<Self> {
        if good_events > total_events {
            return None;
        }
        let ratio = if total_events == 0 {
            0.0
        } else {
            good_events as f64 / total_events as f64
        };
        Some(Self {
            good_events,
            total_events,
            availability_ratio: ratio,
            window,
            sample_count: total_events,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LatencySli {
    pub p50_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
    pub p999_ms: f64,
    pub window: Window,
    pub sample_count: u64,
}

impl LatencySli {
    /// Percentiles must be non-negative and monotonically ordered.
    pub fn new(
        p50_ms: f64,
        p95_ms: f64,
        p99_ms: f64,
        p999_ms: f64,
        window: Window,
        sample_count: u64,
    ) -> Option<Self> {
        if p50_ms < 0.0 || p50_ms > p95_ms || p95_ms > p99_ms || p99_ms > p999_ms {
            return None;
        }
        Some(Self {
            p50_ms,
            p95_ms,
            p99_ms,
            p999_ms,
            window,
            sample_count,
        })
    }
}
