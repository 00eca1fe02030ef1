//! Resource Monitor: periodic per-node sampling, alerting, and
//! remediation recommendations (spec §4.5).
//!
//! Grounded on `layer1::system_monitor::SystemMonitor`'s periodic
//! `tokio::spawn` loop shape, generalized from a fixed health-check set
//! to user-registered per-node metric samplers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::profile::{MetricStatus, ResourceMetric, ResourceProfile, ResourceType};

#[derive(Debug, Clone, serde::Serialize)]
pub struct Alert {
    pub node_id: String,
    pub metric: String,
    pub value: f64,
    pub status: MetricStatus,
    pub timestamp: chrono::DateTime<Utc>,
    pub warning_threshold: f64,
    pub critical_threshold: f64,
}

/// User-registered custom metric sampler (spec §4.5 "custom metrics via
/// user-registered callables").
#[async_trait]
pub trait MetricSampler: Send + Sync {
    /// Returns `(metric_name, value, unit, warning, critical)` tuples to
    /// record for `node_id`.
    async fn sample(&self, node_id: &str) -> Vec<(String, f64, String, f64, f64)>;
}

/// Alert callback (spec §6): invoked with an alert record; must not
/// block. Failures are logged and swallowed.
pub type AlertCallback = dyn Fn(&Alert) + Send + Sync;

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub update_interval: Duration,
    pub history_size: usize,
    pub enable_gpu: bool,
    pub cpu_warning: f64,
    pub cpu_critical: f64,
    pub memory_warning: f64,
    pub memory_critical: f64,
    pub disk_warning: f64,
    pub disk_critical: f64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            update_interval: Duration::from_secs(1),
            history_size: crate::profile::DEFAULT_HISTORY_CAPACITY,
            enable_gpu: false,
            cpu_warning: 70.0,
            cpu_critical: 90.0,
            memory_warning: 75.0,
            memory_critical: 90.0,
            disk_warning: 80.0,
            disk_critical: 95.0,
        }
    }
}

pub struct ResourceMonitor {
    config: MonitorConfig,
    profiles: RwLock<HashMap<String, ResourceProfile>>,
    samplers: RwLock<HashMap<String, Arc<dyn MetricSampler>>>,
    alert_callbacks: RwLock<Vec<Arc<AlertCallback>>>,
    alerts: RwLock<Vec<Alert>>,
    shutdown: Arc<AtomicBool>,
}

impl ResourceMonitor {
    pub fn new(config: MonitorConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            profiles: RwLock::new(HashMap::new()),
            samplers: RwLock::new(HashMap::new()),
            alert_callbacks: RwLock::new(Vec::new()),
            alerts: RwLock::new(Vec::new()),
            shutdown: Arc::new(AtomicBool::new(false)),
        })
    }

    pub async fn register_node(&self, node_id: impl Into<String>) {
        let node_id = node_id.into();
        self.profiles.write().await.entry(node_id.clone()).or_insert_with(|| ResourceProfile::with_capacity(node_id, self.config.history_size));
    }

    pub async fn unregister_node(&self, node_id: &str) {
        self.profiles.write().await.remove(node_id);
    }

    pub async fn register_sampler(&self, node_id: impl Into<String>, sampler: Arc<dyn MetricSampler>) {
        self.samplers.write().await.insert(node_id.into(), sampler);
    }

    pub async fn register_alert_callback(&self, callback: Arc<AlertCallback>) {
        self.alert_callbacks.write().await.push(callback);
    }

    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }

    pub fn spawn(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            info!("resource monitor starting");
            while !this.shutdown.load(Ordering::Relaxed) {
                this.sample_all().await;
                tokio::time::sleep(this.config.update_interval).await;
            }
            info!("resource monitor stopped");
        })
    }

    async fn sample_all(&self) {
        let node_ids: Vec<String> = self.profiles.read().await.keys().cloned().collect();
        for node_id in node_ids {
            self.sample_node(&node_id).await;
        }
    }

    async fn sample_node(&self, node_id: &str) {
        let mut metrics = self.builtin_metrics(node_id);
        if let Some(sampler) = self.samplers.read().await.get(node_id).cloned() {
            for (name, value, unit, warning, critical) in sampler.sample(node_id).await {
                metrics.push(ResourceMetric {
                    name,
                    resource_type: ResourceType::Custom,
                    value,
                    unit,
                    timestamp: Utc::now(),
                    warning_threshold: warning,
                    critical_threshold: critical,
                });
            }
        }

        for metric in metrics {
            let status;
            {
                let mut profiles = self.profiles.write().await;
                let Some(profile) = profiles.get_mut(node_id) else { return };
                status = metric.status();
                profile.record(metric.clone());
            }
            if status != MetricStatus::Normal {
                self.raise_alert(Alert {
                    node_id: node_id.to_string(),
                    metric: metric.name.clone(),
                    value: metric.value,
                    status,
                    timestamp: metric.timestamp,
                    warning_threshold: metric.warning_threshold,
                    critical_threshold: metric.critical_threshold,
                })
                .await;
            }
        }
    }

    /// Placeholder sampler for the signals spec §4.5 names (CPU%,
    /// memory%, disk%, network Mbps); a real deployment wires an actual
    /// OS sampler in here via `register_sampler` instead. Out of scope
    /// per spec §1 ("resource-metric collection details beyond the
    /// signals the scheduler consumes").
    fn builtin_metrics(&self, _node_id: &str) -> Vec<ResourceMetric> {
        Vec::new()
    }

    async fn raise_alert(&self, alert: Alert) {
        warn!(node_id = %alert.node_id, metric = %alert.metric, value = alert.value, ?alert.status, "resource alert");
        self.alerts.write().await.push(alert.clone());
        let callbacks = self.alert_callbacks.read().await.clone();
        for callback in callbacks {
            callback(&alert);
        }
    }

    pub async fn alerts(&self) -> Vec<Alert> {
        self.alerts.read().await.clone()
    }

    /// One entry per CRITICAL/WARNING metric with remediation text
    /// (spec §4.5 "Recommendations API").
    pub async fn recommendations(&self, node_id: &str) -> Vec<String> {
        let profiles = self.profiles.read().await;
        let Some(profile) = profiles.get(node_id) else { return Vec::new() };
        profile
            .latest_all()
            .filter(|m| m.status() != MetricStatus::Normal)
            .map(|m| remediation_text(m))
            .collect()
    }
}

fn remediation_text(metric: &ResourceMetric) -> String {
    let severity = match metric.status() {
        MetricStatus::Critical => "critical",
        MetricStatus::Warning => "warning",
        MetricStatus::Normal => "normal",
    };
    match metric.resource_type {
        ResourceType::Cpu => format!("{severity}: CPU at {:.1}% — consider rebalancing load or scaling out", metric.value),
        ResourceType::Memory => format!("{severity}: memory at {:.1}% — investigate leaks or increase node memory", metric.value),
        ResourceType::Disk => format!("{severity}: disk at {:.1}% — reclaim space or expand storage", metric.value),
        ResourceType::Network => format!("{severity}: network throughput at {:.1} Mbps — check for saturation", metric.value),
        ResourceType::Gpu => format!("{severity}: GPU metric '{}' at {:.1} — check workload placement", metric.name, metric.value),
        ResourceType::Custom => format!("{severity}: metric '{}' at {:.1}", metric.name, metric.value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct ConstantSampler;
    #[async_trait]
    impl MetricSampler for ConstantSampler {
        async fn sample(&self, _node_id: &str) -> Vec<(String, f64, String, f64, f64)> {
            vec![("cpu".to_string(), 95.0, "percent".to_string(), 70.0, 90.0)]
        }
    }

    #[tokio::test]
    async fn sampling_records_metric_and_raises_alert() {
        let monitor = ResourceMonitor::new(MonitorConfig::default());
        monitor.register_node("n1").await;
        monitor.register_sampler("n1", Arc::new(ConstantSampler)).await;

        let fired = Arc::new(AtomicUsize::new(0));
        let fired_clone = fired.clone();
        monitor.register_alert_callback(Arc::new(move |_alert: &Alert| {
            fired_clone.fetch_add(1, Ordering::Relaxed);
        })).await;

        monitor.sample_node("n1").await;

        assert_eq!(fired.load(Ordering::Relaxed), 1);
        let recs = monitor.recommendations("n1").await;
        assert_eq!(recs.len(), 1);
    }
}
