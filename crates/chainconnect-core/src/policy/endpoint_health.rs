//! Per-endpoint health: Healthy → Cooling → Probing.
//!
//! State transitions:
//! - `Healthy` → `Cooling`:  `failure_threshold` consecutive failures
//! - `Cooling` → `Probing`:  `cooldown` has elapsed
//! - `Probing` → `Healthy`:  a request succeeds
//! - `Probing` → `Cooling`:  a request fails (cooldown restarts)
//!
//! A cooling endpoint is never removed; the fallback provider skips it until
//! the cooldown is over.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointStatus {
    /// Normal operation.
    Healthy,
    /// Skipped until the cooldown elapses.
    Cooling,
    /// Cooldown elapsed; eligible again at its own priority.
    Probing,
}

impl std::fmt::Display for EndpointStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Cooling => write!(f, "cooling"),
            Self::Probing => write!(f, "probing"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EndpointHealthConfig {
    /// Consecutive failures before the endpoint is deprioritized.
    pub failure_threshold: u32,
    /// How long a deprioritized endpoint is skipped.
    pub cooldown: Duration,
}

impl Default for EndpointHealthConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 1,
            cooldown: Duration::from_secs(30),
        }
    }
}

struct HealthInner {
    status: EndpointStatus,
    consecutive_failures: u32,
    degraded_at: Option<Instant>,
}

/// Thread-safe endpoint health tracker.
#[derive(Clone)]
pub struct EndpointHealth {
    config: EndpointHealthConfig,
    inner: Arc<Mutex<HealthInner>>,
}

impl EndpointHealth {
    pub fn new(config: EndpointHealthConfig) -> Self {
        Self {
            config,
            inner: Arc::new(Mutex::new(HealthInner {
                status: EndpointStatus::Healthy,
                consecutive_failures: 0,
                degraded_at: None,
            })),
        }
    }

    /// Current status, moving `Cooling → Probing` once the cooldown is over.
    pub fn status(&self) -> EndpointStatus {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if inner.status == EndpointStatus::Cooling {
            if let Some(at) = inner.degraded_at {
                if at.elapsed() >= self.config.cooldown {
                    inner.status = EndpointStatus::Probing;
                    tracing::debug!("endpoint cooldown over → probing");
                }
            }
        }
        inner.status
    }

    /// When the endpoint was last deprioritized.
    pub fn degraded_at(&self) -> Option<Instant> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .degraded_at
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if inner.status != EndpointStatus::Healthy {
            tracing::info!("endpoint recovered → healthy");
        }
        inner.status = EndpointStatus::Healthy;
        inner.consecutive_failures = 0;
        inner.degraded_at = None;
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.consecutive_failures += 1;
        match inner.status {
            EndpointStatus::Healthy => {
                if inner.consecutive_failures >= self.config.failure_threshold {
                    inner.status = EndpointStatus::Cooling;
                    inner.degraded_at = Some(Instant::now());
                    tracing::warn!(
                        failures = inner.consecutive_failures,
                        cooldown_ms = self.config.cooldown.as_millis() as u64,
                        "endpoint deprioritized → cooling"
                    );
                }
            }
            EndpointStatus::Probing | EndpointStatus::Cooling => {
                inner.status = EndpointStatus::Cooling;
                inner.degraded_at = Some(Instant::now());
            }
        }
    }
}

impl std::fmt::Debug for EndpointHealth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EndpointHealth")
            .field("status", &self.status())
            .finish()
    }
}
