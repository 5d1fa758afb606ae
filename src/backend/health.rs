//! Health Monitor: per-backend reachability, latency, and circuit-breaker state.

use crate::backend::types::BackendKey;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Circuit breaker state for one backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Healthy,
    Degraded,
    Open,
}

/// A backend's current health record. Mutated only by the Health Monitor;
/// readable by everyone else.
#[derive(Debug, Clone)]
pub struct HealthRecord {
    pub state: BreakerState,
    pub last_probe: DateTime<Utc>,
    pub failure_count: u32,
    pub last_latency_ms: Option<u64>,
    opened_at: Option<DateTime<Utc>>,
    recent_failures: Vec<DateTime<Utc>>,
}

impl HealthRecord {
    fn new() -> Self {
        Self {
            state: BreakerState::Healthy,
            last_probe: Utc::now(),
            failure_count: 0,
            last_latency_ms: None,
            opened_at: None,
            recent_failures: Vec::new(),
        }
    }

    pub fn is_available_for_routing(&self) -> bool {
        self.state != BreakerState::Open
    }
}

/// Config for the Health Monitor's breaker behaviour.
#[derive(Debug, Clone)]
pub struct HealthConfig {
    /// Failures within `rolling_window` before the breaker opens.
    pub failure_threshold: u32,
    pub rolling_window: Duration,
    pub cooldown: Duration,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            rolling_window: Duration::from_secs(60),
            cooldown: Duration::from_secs(30),
        }
    }
}

/// Tracks reachability, latency, and breaker state for every registered backend.
pub struct HealthMonitor {
    config: HealthConfig,
    records: Arc<RwLock<HashMap<BackendKey, HealthRecord>>>,
}

impl HealthMonitor {
    pub fn new(config: HealthConfig) -> Self {
        Self {
            config,
            records: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Record a successful probe or request. Half-closes an open breaker on
    /// probe success; a real successful request closes it fully.
    pub async fn record_success(&self, key: &BackendKey, latency_ms: u64, from_real_request: bool) {
        let mut records = self.records.write().await;
        let record = records.entry(key.clone()).or_insert_with(HealthRecord::new);
        record.last_probe = Utc::now();
        record.last_latency_ms = Some(latency_ms);
        record.recent_failures.clear();
        record.failure_count = 0;

        match record.state {
            BreakerState::Open if from_real_request => {
                record.state = BreakerState::Healthy;
                record.opened_at = None;
                debug!(backend = %key, "circuit closed after successful request");
            }
            BreakerState::Open => {
                record.state = BreakerState::Degraded;
                debug!(backend = %key, "circuit half-closed after successful probe");
            }
            BreakerState::Degraded if from_real_request => {
                record.state = BreakerState::Healthy;
            }
            _ => {}
        }
    }

    /// Record a transport failure. Opens the breaker after `failure_threshold`
    /// failures within `rolling_window`.
    pub async fn record_failure(&self, key: &BackendKey) {
        let mut records = self.records.write().await;
        let record = records.entry(key.clone()).or_insert_with(HealthRecord::new);
        let now = Utc::now();
        record.last_probe = now;

        let window = chrono::Duration::from_std(self.config.rolling_window).unwrap_or(chrono::Duration::seconds(60));
        record.recent_failures.retain(|t| now - *t < window);
        record.recent_failures.push(now);
        record.failure_count = record.recent_failures.len() as u32;

        if record.failure_count >= self.config.failure_threshold && record.state != BreakerState::Open {
            record.state = BreakerState::Open;
            record.opened_at = Some(now);
            warn!(backend = %key, failures = record.failure_count, "circuit breaker opened");
        } else if record.state == BreakerState::Healthy {
            record.state = BreakerState::Degraded;
        }
    }

    /// Re-evaluate cooldowns: an Open breaker past its cooldown window
    /// becomes eligible for a probe (Degraded), allowing the next successful
    /// probe to half-close it.
    pub async fn tick_cooldowns(&self) {
        let mut records = self.records.write().await;
        let now = Utc::now();
        let cooldown = chrono::Duration::from_std(self.config.cooldown).unwrap_or(chrono::Duration::seconds(30));

        for (key, record) in records.iter_mut() {
            if record.state == BreakerState::Open {
                if let Some(opened_at) = record.opened_at {
                    if now - opened_at >= cooldown {
                        record.state = BreakerState::Degraded;
                        debug!(backend = %key, "breaker cooldown elapsed, eligible for probe");
                    }
                }
            }
        }
    }

    pub async fn snapshot(&self, key: &BackendKey) -> Option<HealthRecord> {
        self.records.read().await.get(key).cloned()
    }

    /// The "alive set": backends whose breaker is not open.
    pub async fn alive_set(&self, known_keys: &[BackendKey]) -> Vec<BackendKey> {
        let records = self.records.read().await;
        known_keys
            .iter()
            .filter(|k| {
                records
                    .get(k)
                    .map(|r| r.is_available_for_routing())
                    .unwrap_or(true)
            })
            .cloned()
            .collect()
    }

    pub async fn is_open(&self, key: &BackendKey) -> bool {
        self.records
            .read()
            .await
            .get(key)
            .map(|r| r.state == BreakerState::Open)
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn breaker_opens_after_threshold_failures() {
        let monitor = HealthMonitor::new(HealthConfig {
            failure_threshold: 3,
            ..Default::default()
        });
        let key = BackendKey::new("local-a");

        for _ in 0..2 {
            monitor.record_failure(&key).await;
        }
        assert!(!monitor.is_open(&key).await);

        monitor.record_failure(&key).await;
        assert!(monitor.is_open(&key).await);
    }

    #[tokio::test]
    async fn open_breaker_excludes_backend_from_alive_set() {
        let monitor = HealthMonitor::new(HealthConfig {
            failure_threshold: 1,
            ..Default::default()
        });
        let key = BackendKey::new("local-a");
        monitor.record_failure(&key).await;

        let alive = monitor.alive_set(&[key.clone()]).await;
        assert!(alive.is_empty());
    }

    #[tokio::test]
    async fn successful_real_request_closes_breaker() {
        let monitor = HealthMonitor::new(HealthConfig {
            failure_threshold: 1,
            ..Default::default()
        });
        let key = BackendKey::new("local-a");
        monitor.record_failure(&key).await;
        assert!(monitor.is_open(&key).await);

        monitor.record_success(&key, 120, true).await;
        assert!(!monitor.is_open(&key).await);
    }

    #[tokio::test]
    async fn unknown_backend_is_treated_as_alive() {
        let monitor = HealthMonitor::new(HealthConfig::default());
        let key = BackendKey::new("never-seen");
        let alive = monitor.alive_set(&[key.clone()]).await;
        assert_eq!(alive, vec![key]);
    }
}
