use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::broadcast::BusSettings;
use crate::worker::{PoolSettings, RunnerSettings};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_path: Option<PathBuf>,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub provider: ProviderConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            database_path: None,
            worker: WorkerConfig::default(),
            stream: StreamConfig::default(),
            provider: ProviderConfig::default(),
        }
    }
}

impl Config {
    /// Configured database path, or the per-user default.
    pub fn resolved_database_path(&self) -> Option<PathBuf> {
        self.database_path
            .clone()
            .or_else(crate::db::default_database_path)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_lease_ttl_secs")]
    pub lease_ttl_secs: u64,
    #[serde(default = "default_renew_interval_secs")]
    pub renew_interval_secs: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_concurrency() -> usize {
    num_cpus::get()
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_lease_ttl_secs() -> u64 {
    30
}

fn default_renew_interval_secs() -> u64 {
    10
}

fn default_max_attempts() -> u32 {
    3
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            poll_interval_ms: default_poll_interval_ms(),
            lease_ttl_secs: default_lease_ttl_secs(),
            renew_interval_secs: default_renew_interval_secs(),
            max_attempts: default_max_attempts(),
        }
    }
}

impl WorkerConfig {
    pub fn runner_settings(&self) -> RunnerSettings {
        RunnerSettings {
            lease_ttl: Duration::from_secs(self.lease_ttl_secs),
            renew_interval: Duration::from_secs(self.renew_interval_secs),
        }
    }

    pub fn pool_settings(&self) -> PoolSettings {
        PoolSettings {
            concurrency: self.concurrency,
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            claim_batch: (self.concurrency * 2).min(u32::MAX as usize) as u32,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    #[serde(default = "default_subscriber_buffer")]
    pub subscriber_buffer: usize,
    #[serde(default = "default_grace_period_secs")]
    pub grace_period_secs: u64,
    #[serde(default = "default_gc_interval_secs")]
    pub gc_interval_secs: u64,
}

fn default_subscriber_buffer() -> usize {
    256
}

fn default_grace_period_secs() -> u64 {
    60
}

fn default_gc_interval_secs() -> u64 {
    15
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            subscriber_buffer: default_subscriber_buffer(),
            grace_period_secs: default_grace_period_secs(),
            gc_interval_secs: default_gc_interval_secs(),
        }
    }
}

impl StreamConfig {
    pub fn bus_settings(&self) -> BusSettings {
        BusSettings {
            subscriber_buffer: self.subscriber_buffer,
            grace_period: Duration::from_secs(self.grace_period_secs),
        }
    }

    pub fn gc_interval(&self) -> Duration {
        Duration::from_secs(self.gc_interval_secs)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// CC-CEDICT dictionary for the offline provider.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dictionary_path: Option<PathBuf>,
}
