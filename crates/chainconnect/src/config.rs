//! Client configuration.
//!
//! Every field has a serde default so a partial YAML/JSON document (or an
//! empty one) is a valid configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::telemetry::LogConfig;

/// Top-level client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Reconnect the last-used connector on `Client::start`.
    #[serde(default)]
    pub autoconnect: bool,
    /// Block polling interval when no WebSocket provider is available.
    #[serde(default = "default_polling_interval_ms")]
    pub polling_interval_ms: u64,
    /// Prefix for every key written through the storage backend.
    #[serde(default = "default_storage_key")]
    pub storage_key: String,
    #[serde(default)]
    pub fallback: FallbackConfig,
    #[serde(default)]
    pub eviction: EvictionConfig,
    #[serde(default)]
    pub multicall: BatchConfig,
    #[serde(default)]
    pub log: LogConfig,
}

fn default_polling_interval_ms() -> u64 { 4_000 }
fn default_storage_key() -> String { "chainconnect".into() }

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            autoconnect: false,
            polling_interval_ms: default_polling_interval_ms(),
            storage_key: default_storage_key(),
            fallback: FallbackConfig::default(),
            eviction: EvictionConfig::default(),
            multicall: BatchConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl ClientConfig {
    pub fn from_yaml(yaml: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(yaml)
    }

    pub fn polling_interval(&self) -> Duration {
        Duration::from_millis(self.polling_interval_ms.max(1))
    }
}

/// Fallback policy across the endpoints of one chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FallbackConfig {
    /// Per-endpoint request timeout.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Consecutive failures before an endpoint is deprioritized.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    /// How long a deprioritized endpoint is skipped.
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u64,
}

fn default_request_timeout_ms() -> u64 { 10_000 }
fn default_failure_threshold() -> u32 { 1 }
fn default_cooldown_ms() -> u64 { 30_000 }

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: default_request_timeout_ms(),
            failure_threshold: default_failure_threshold(),
            cooldown_ms: default_cooldown_ms(),
        }
    }
}

impl FallbackConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }
}

/// When a cached provider handle is thrown away and rebuilt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvictionConfig {
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,
    /// Hard-failure rate above which the handle is evicted.
    #[serde(default = "default_max_failure_rate")]
    pub max_failure_rate: f64,
    /// Samples required inside the window before the rate counts.
    #[serde(default = "default_min_samples")]
    pub min_samples: usize,
}

fn default_window_ms() -> u64 { 60_000 }
fn default_max_failure_rate() -> f64 { 0.5 }
fn default_min_samples() -> usize { 10 }

impl Default for EvictionConfig {
    fn default() -> Self {
        Self {
            window_ms: default_window_ms(),
            max_failure_rate: default_max_failure_rate(),
            min_samples: default_min_samples(),
        }
    }
}

impl EvictionConfig {
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

/// Multicall batching.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Maximum calls per aggregate call.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Extra delay before a batch window flushes. `0` flushes after one
    /// scheduler yield.
    #[serde(default)]
    pub wait_ms: u64,
    /// Default for `read_contracts` / `multicall` when the call leaves it unset.
    #[serde(default = "bool_true")]
    pub allow_failure: bool,
}

fn default_batch_size() -> usize { 1_024 }
fn bool_true() -> bool { true }

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            wait_ms: 0,
            allow_failure: true,
        }
    }
}

impl BatchConfig {
    pub fn wait(&self) -> Duration {
        Duration::from_millis(self.wait_ms)
    }

    pub(crate) fn chunk_size(&self) -> usize {
        self.batch_size.max(1)
    }
}
