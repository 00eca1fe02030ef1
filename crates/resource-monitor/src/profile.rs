//! Resource metric, per-node profile, and ring-buffer trend tracking
//! (spec §3 Resource Metric / Resource Profile).

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const DEFAULT_HISTORY_CAPACITY: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResourceType {
    Cpu,
    Memory,
    Disk,
    Network,
    Gpu,
    Custom,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MetricStatus {
    Normal,
    Warning,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Trend {
    Increasing,
    Decreasing,
    Stable,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceMetric {
    pub name: String,
    pub resource_type: ResourceType,
    pub value: f64,
    pub unit: String,
    pub timestamp: DateTime<Utc>,
    pub warning_threshold: f64,
    pub critical_threshold: f64,
}

impl ResourceMetric {
    pub fn status(&self) -> MetricStatus {
        if self.value >= self.critical_threshold {
            MetricStatus::Critical
        } else if self.value >= self.warning_threshold {
            MetricStatus::Warning
        } else {
            MetricStatus::Normal
        }
    }
}

/// Bounded history for one metric name on one node.
#[derive(Debug, Clone)]
struct MetricHistory {
    capacity: usize,
    samples: VecDeque<ResourceMetric>,
}

impl MetricHistory {
    fn new(capacity: usize) -> Self {
        Self { capacity, samples: VecDeque::with_capacity(capacity) }
    }

    fn push(&mut self, metric: ResourceMetric) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(metric);
    }

    /// Compares the mean of the most recent half of the window against
    /// the mean of the older half: `> 1.05x` is increasing, `< 0.95x`
    /// decreasing, otherwise stable (spec §3).
    fn trend(&self) -> Trend {
        if self.samples.len() < 2 {
            return Trend::Stable;
        }
        let values: Vec<f64> = self.samples.iter().map(|m| m.value).collect();
        let mid = values.len() / 2;
        let older_avg = average(&values[..mid]);
        let recent_avg = average(&values[mid..]);
        if older_avg == 0.0 {
            return Trend::Stable;
        }
        if recent_avg > 1.05 * older_avg {
            Trend::Increasing
        } else if recent_avg < 0.95 * older_avg {
            Trend::Decreasing
        } else {
            Trend::Stable
        }
    }
}

fn average(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

/// Per-node metric-name → latest value + bounded history (spec §3
/// Resource Profile).
#[derive(Debug, Clone)]
pub struct ResourceProfile {
    pub node_id: String,
    capacity: usize,
    latest: HashMap<String, ResourceMetric>,
    history: HashMap<String, MetricHistory>,
}

impl ResourceProfile {
    pub fn new(node_id: impl Into<String>) -> Self {
        Self::with_capacity(node_id, DEFAULT_HISTORY_CAPACITY)
    }

    pub fn with_capacity(node_id: impl Into<String>, capacity: usize) -> Self {
        Self { node_id: node_id.into(), capacity, latest: HashMap::new(), history: HashMap::new() }
    }

    pub fn record(&mut self, metric: ResourceMetric) {
        let name = metric.name.clone();
        self.history.entry(name.clone()).or_insert_with(|| MetricHistory::new(self.capacity)).push(metric.clone());
        self.latest.insert(name, metric);
    }

    pub fn latest(&self, name: &str) -> Option<&ResourceMetric> {
        self.latest.get(name)
    }

    pub fn latest_all(&self) -> impl Iterator<Item = &ResourceMetric> {
        self.latest.values()
    }

    pub fn trend(&self, name: &str) -> Trend {
        self.history.get(name).map(MetricHistory::trend).unwrap_or(Trend::Stable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metric(name: &str, value: f64) -> ResourceMetric {
        ResourceMetric {
            name: name.to_string(),
            resource_type: ResourceType::Cpu,
            value,
            unit: "percent".to_string(),
            timestamp: Utc::now(),
            warning_threshold: 70.0,
            critical_threshold: 90.0,
        }
    }

    #[test]
    fn status_classification_follows_thresholds() {
        assert_eq!(metric("cpu", 50.0).status(), MetricStatus::Normal);
        assert_eq!(metric("cpu", 75.0).status(), MetricStatus::Warning);
        assert_eq!(metric("cpu", 95.0).status(), MetricStatus::Critical);
    }

    #[test]
    fn ring_buffer_evicts_oldest_beyond_capacity() {
        let mut profile = ResourceProfile::with_capacity("n1", 3);
        for i in 0..5 {
            profile.record(metric("cpu", i as f64));
        }
        assert_eq!(profile.latest("cpu").unwrap().value, 4.0);
    }

    #[test]
    fn trend_detects_increasing_load() {
        let mut profile = ResourceProfile::with_capacity("n1", 10);
        for v in [10.0, 10.0, 10.0, 30.0, 30.0, 30.0] {
            profile.record(metric("cpu", v));
        }
        assert_eq!(profile.trend("cpu"), Trend::Increasing);
    }
}
