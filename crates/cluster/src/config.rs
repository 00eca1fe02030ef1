//! Cluster-wide configuration, aggregating every subsystem's config
//! into one TOML-loadable document.
//!
//! Grounded on `platform::config::PlatformConfig` (`#[serde(default)]`
//! per-section `...Settings` structs, `Config::builder()` with a
//! `File` source plus an `Environment` override source, `try_deserialize`).
//! Durations are expressed in seconds/milliseconds on the wire since
//! `std::time::Duration` has no native TOML representation; each
//! `...Settings` struct carries a `to_*_config()` conversion into the
//! real subsystem config type.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use taskfabric_db_pool::{FailoverConfig, FailoverMode, FailoverPolicy, PoolConfig};
use taskfabric_fault_tolerance::{HeartbeatConfig, RecoveryConfig};
use taskfabric_resource_monitor::MonitorConfig;
use taskfabric_scheduler::{PlacementStrategy, SchedulerConfig};

const DEFAULT_CONFIG_PATH: &str = "configs/taskfabric.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    pub node: NodeSettings,
    pub scheduler: SchedulerSettings,
    pub heartbeat: HeartbeatSettings,
    pub recovery: RecoverySettings,
    pub monitor: MonitorSettings,
    pub pool: PoolSettings,
    pub failover: FailoverSettings,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            node: NodeSettings::default(),
            scheduler: SchedulerSettings::default(),
            heartbeat: HeartbeatSettings::default(),
            recovery: RecoverySettings::default(),
            monitor: MonitorSettings::default(),
            pool: PoolSettings::default(),
            failover: FailoverSettings::default(),
        }
    }
}

impl ClusterConfig {
    pub fn load() -> Result<Self> {
        Self::load_from_path(None::<PathBuf>)
    }

    pub fn load_from_path<P: AsRef<Path>>(path: Option<P>) -> Result<Self> {
        let mut builder = Config::builder().add_source(
            File::from(PathBuf::from(DEFAULT_CONFIG_PATH)).format(FileFormat::Toml).required(false),
        );

        if let Some(path) = path {
            builder = builder.add_source(File::from(path.as_ref()).format(FileFormat::Toml).required(true));
        }

        builder = builder.add_source(Environment::with_prefix("TASKFABRIC").separator("__"));

        let config = builder.build()?;
        config.try_deserialize().context("invalid cluster configuration")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeSettings {
    pub id: String,
    pub display_name: String,
    pub address: String,
    pub port: u16,
}

impl Default for NodeSettings {
    fn default() -> Self {
        Self { id: "node-0".to_string(), display_name: "node-0".to_string(), address: "127.0.0.1".to_string(), port: 7000 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerSettings {
    pub strategy: PlacementStrategy,
    pub max_workers: usize,
    pub task_timeout_secs: u64,
    pub task_timeout_check_interval_secs: u64,
    pub retry_base_delay_secs: f64,
    pub max_retries: u32,
    pub idle_sleep_secs: u64,
    pub empty_candidates_sleep_secs: u64,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        let d = SchedulerConfig::default();
        Self {
            strategy: d.strategy,
            max_workers: d.max_workers,
            task_timeout_secs: d.task_timeout.as_secs(),
            task_timeout_check_interval_secs: d.task_timeout_check_interval.as_secs(),
            retry_base_delay_secs: d.retry_base_delay_secs,
            max_retries: d.max_retries,
            idle_sleep_secs: d.idle_sleep.as_secs(),
            empty_candidates_sleep_secs: d.empty_candidates_sleep.as_secs(),
        }
    }
}

impl SchedulerSettings {
    pub fn to_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            strategy: self.strategy,
            max_workers: self.max_workers,
            task_timeout: Duration::from_secs(self.task_timeout_secs),
            task_timeout_check_interval: Duration::from_secs(self.task_timeout_check_interval_secs),
            retry_base_delay_secs: self.retry_base_delay_secs,
            max_retries: self.max_retries,
            idle_sleep: Duration::from_secs(self.idle_sleep_secs),
            empty_candidates_sleep: Duration::from_secs(self.empty_candidates_sleep_secs),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatSettings {
    pub interval_secs: u64,
    pub heartbeat_timeout_secs: u64,
    pub max_node_failures: u32,
}

impl Default for HeartbeatSettings {
    fn default() -> Self {
        let d = HeartbeatConfig::default();
        Self { interval_secs: d.interval.as_secs(), heartbeat_timeout_secs: d.heartbeat_timeout.as_secs(), max_node_failures: d.max_node_failures }
    }
}

impl HeartbeatSettings {
    pub fn to_config(&self) -> HeartbeatConfig {
        HeartbeatConfig {
            interval: Duration::from_secs(self.interval_secs),
            heartbeat_timeout: Duration::from_secs(self.heartbeat_timeout_secs),
            max_node_failures: self.max_node_failures,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoverySettings {
    pub check_interval_secs: u64,
    pub max_recovery_attempts: u32,
    pub backoff_base: f64,
}

impl Default for RecoverySettings {
    fn default() -> Self {
        let d = RecoveryConfig::default();
        Self { check_interval_secs: d.check_interval.as_secs(), max_recovery_attempts: d.max_recovery_attempts, backoff_base: d.backoff_base }
    }
}

impl RecoverySettings {
    pub fn to_config(&self) -> RecoveryConfig {
        RecoveryConfig {
            check_interval: Duration::from_secs(self.check_interval_secs),
            max_recovery_attempts: self.max_recovery_attempts,
            backoff_base: self.backoff_base,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorSettings {
    pub update_interval_secs: u64,
    pub history_size: usize,
    pub enable_gpu: bool,
    pub cpu_warning: f64,
    pub cpu_critical: f64,
    pub memory_warning: f64,
    pub memory_critical: f64,
    pub disk_warning: f64,
    pub disk_critical: f64,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        let d = MonitorConfig::default();
        Self {
            update_interval_secs: d.update_interval.as_secs(),
            history_size: d.history_size,
            enable_gpu: d.enable_gpu,
            cpu_warning: d.cpu_warning,
            cpu_critical: d.cpu_critical,
            memory_warning: d.memory_warning,
            memory_critical: d.memory_critical,
            disk_warning: d.disk_warning,
            disk_critical: d.disk_critical,
        }
    }
}

impl MonitorSettings {
    pub fn to_config(&self) -> MonitorConfig {
        MonitorConfig {
            update_interval: Duration::from_secs(self.update_interval_secs),
            history_size: self.history_size,
            enable_gpu: self.enable_gpu,
            cpu_warning: self.cpu_warning,
            cpu_critical: self.cpu_critical,
            memory_warning: self.memory_warning,
            memory_critical: self.memory_critical,
            disk_warning: self.disk_warning,
            disk_critical: self.disk_critical,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolSettings {
    pub max_connections: usize,
    pub timeout_secs: u64,
    pub validation_interval_secs: u64,
    pub validate_connections: bool,
}

impl Default for PoolSettings {
    fn default() -> Self {
        let d = PoolConfig::default();
        Self {
            max_connections: d.max_connections,
            timeout_secs: d.timeout.as_secs(),
            validation_interval_secs: d.validation_interval.as_secs(),
            validate_connections: d.validate_connections,
        }
    }
}

impl PoolSettings {
    pub fn to_config(&self) -> PoolConfig {
        PoolConfig {
            max_connections: self.max_connections,
            timeout: Duration::from_secs(self.timeout_secs),
            validation_interval: Duration::from_secs(self.validation_interval_secs),
            validate_connections: self.validate_connections,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FailoverSettings {
    pub mode: FailoverMode,
    pub policy: FailoverPolicy,
    pub max_failure_count: u32,
    pub failure_timeout_secs: u64,
    pub response_time_threshold_ms: u64,
    pub health_check_interval_secs: u64,
    pub failover_timeout_secs: u64,
    pub max_recovery_attempts: u32,
    pub recovery_check_interval_secs: u64,
}

impl Default for FailoverSettings {
    fn default() -> Self {
        let d = FailoverConfig::default();
        Self {
            mode: d.mode,
            policy: d.policy,
            max_failure_count: d.max_failure_count,
            failure_timeout_secs: d.failure_timeout.as_secs(),
            response_time_threshold_ms: d.response_time_threshold.as_millis() as u64,
            health_check_interval_secs: d.health_check_interval.as_secs(),
            failover_timeout_secs: d.failover_timeout.as_secs(),
            max_recovery_attempts: d.max_recovery_attempts,
            recovery_check_interval_secs: d.recovery_check_interval.as_secs(),
        }
    }
}

impl FailoverSettings {
    pub fn to_config(&self) -> FailoverConfig {
        FailoverConfig {
            mode: self.mode,
            policy: self.policy,
            max_failure_count: self.max_failure_count,
            failure_timeout: Duration::from_secs(self.failure_timeout_secs),
            response_time_threshold: Duration::from_millis(self.response_time_threshold_ms),
            health_check_interval: Duration::from_secs(self.health_check_interval_secs),
            failover_timeout: Duration::from_secs(self.failover_timeout_secs),
            max_recovery_attempts: self.max_recovery_attempts,
            recovery_check_interval: Duration::from_secs(self.recovery_check_interval_secs),
        }
    }
}
