//! Circuit breaker for unhealthy downstream dependencies.
//!
//! This module provides:
//! - Error-ratio tracking over a rolling sample of call outcomes
//! - A fixed cool-down once the ratio trips, failing fast while open
//! - Automatic close after the cool-down elapses
//!
//! State lives in the shared key-value store (`circuit_breaker:{name}`),
//! not in-process, so every worker instance observes the same breaker.

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::cache::{keys, KeyValueCache};
use crate::errors::{EngineError, EngineResult};

/// Circuit breaker configuration.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Error ratio over the rolling sample that opens the circuit
    pub error_ratio_threshold: f64,
    /// Minimum samples before the ratio is meaningful
    pub min_samples: usize,
    /// Rolling sample size
    pub sample_window: usize,
    /// How long the circuit stays open before auto-close
    pub cooldown_secs: i64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            error_ratio_threshold: 0.75,
            min_samples: 5,
            sample_window: 10,
            cooldown_secs: 15 * 60,
        }
    }
}

/// Persisted breaker state. `samples` holds the most recent outcomes,
/// `true` meaning an error.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BreakerState {
    pub samples: Vec<bool>,
    pub opened_at: Option<DateTime<Utc>>,
}

impl BreakerState {
    pub fn error_ratio(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let errors = self.samples.iter().filter(|e| **e).count();
        errors as f64 / self.samples.len() as f64
    }
}

/// Breaker over externalized state. Cheap to construct per use.
pub struct CircuitBreaker<'a> {
    name: String,
    config: CircuitBreakerConfig,
    cache: &'a dyn KeyValueCache,
}

impl<'a> CircuitBreaker<'a> {
    pub fn new(name: &str, config: CircuitBreakerConfig, cache: &'a dyn KeyValueCache) -> Self {
        Self {
            name: name.to_string(),
            config,
            cache,
        }
    }

    pub fn with_defaults(name: &str, cache: &'a dyn KeyValueCache) -> Self {
        Self::new(name, CircuitBreakerConfig::default(), cache)
    }

    /// Fail fast if the circuit is open; auto-close once the cool-down has
    /// elapsed.
    pub async fn guard(&self) -> EngineResult<()> {
        let mut state = self.load().await?;

        if let Some(opened_at) = state.opened_at {
            let elapsed = Utc::now() - opened_at;
            if elapsed < Duration::seconds(self.config.cooldown_secs) {
                return Err(EngineError::CircuitOpen(self.name.clone()));
            }
            info!(
                "circuit breaker '{}' closing after {}s cool-down",
                self.name,
                elapsed.num_seconds()
            );
            state = BreakerState::default();
            self.save(&state).await?;
        }

        Ok(())
    }

    pub async fn record_success(&self) -> Result<()> {
        self.record(false).await
    }

    pub async fn record_failure(&self) -> Result<()> {
        self.record(true).await
    }

    async fn record(&self, is_error: bool) -> Result<()> {
        let mut state = self.load().await?;

        state.samples.push(is_error);
        let window = self.config.sample_window;
        if state.samples.len() > window {
            let excess = state.samples.len() - window;
            state.samples.drain(0..excess);
        }

        if state.opened_at.is_none()
            && state.samples.len() >= self.config.min_samples
            && state.error_ratio() >= self.config.error_ratio_threshold
        {
            warn!(
                "circuit breaker '{}' OPENED: {:.0}% errors over {} samples",
                self.name,
                state.error_ratio() * 100.0,
                state.samples.len()
            );
            state.opened_at = Some(Utc::now());
        }

        self.save(&state).await
    }

    /// Current state, for reporting.
    pub async fn state(&self) -> Result<BreakerState> {
        self.load().await
    }

    async fn load(&self) -> Result<BreakerState> {
        let raw = self.cache.get(&keys::circuit_breaker(&self.name)).await?;
        Ok(raw
            .and_then(|v| serde_json::from_str(&v).ok())
            .unwrap_or_default())
    }

    async fn save(&self, state: &BreakerState) -> Result<()> {
        let ttl = (self.config.cooldown_secs as u64) * 2;
        self.cache
            .put(
                &keys::circuit_breaker(&self.name),
                &serde_json::to_string(state)?,
                ttl,
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::memory::InMemoryCache;

    #[tokio::test]
    async fn test_opens_at_error_ratio() {
        let cache = InMemoryCache::new();
        let cb = CircuitBreaker::with_defaults("enrichment", &cache);

        // 8 errors out of 10 samples
        for i in 0..10 {
            if i < 8 {
                cb.record_failure().await.unwrap();
            } else {
                cb.record_success().await.unwrap();
            }
        }

        let state = cb.state().await.unwrap();
        assert!(state.opened_at.is_some());
        assert!(matches!(
            cb.guard().await,
            Err(EngineError::CircuitOpen(_))
        ));
    }

    #[tokio::test]
    async fn test_stays_closed_below_min_samples() {
        let cache = InMemoryCache::new();
        let cb = CircuitBreaker::with_defaults("enrichment", &cache);

        for _ in 0..4 {
            cb.record_failure().await.unwrap();
        }

        assert!(cb.guard().await.is_ok());
    }

    #[tokio::test]
    async fn test_closes_after_cooldown() {
        let cache = InMemoryCache::new();
        let cb = CircuitBreaker::with_defaults("enrichment", &cache);

        // Opened 16 minutes ago: cool-down elapsed, next guard closes it
        let state = BreakerState {
            samples: vec![true; 8],
            opened_at: Some(Utc::now() - Duration::minutes(16)),
        };
        cache
            .put(
                &keys::circuit_breaker("enrichment"),
                &serde_json::to_string(&state).unwrap(),
                1800,
            )
            .await
            .unwrap();

        assert!(cb.guard().await.is_ok());
        let state = cb.state().await.unwrap();
        assert!(state.opened_at.is_none());
        assert!(state.samples.is_empty());
    }

    #[tokio::test]
    async fn test_still_open_mid_cooldown() {
        let cache = InMemoryCache::new();
        let cb = CircuitBreaker::with_defaults("enrichment", &cache);

        // Opened 5 minutes ago: still inside the 15 minute cool-down
        let state = BreakerState {
            samples: vec![true; 8],
            opened_at: Some(Utc::now() - Duration::minutes(5)),
        };
        cache
            .put(
                &keys::circuit_breaker("enrichment"),
                &serde_json::to_string(&state).unwrap(),
                1800,
            )
            .await
            .unwrap();

        assert!(matches!(
            cb.guard().await,
            Err(EngineError::CircuitOpen(_))
        ));
    }

    #[tokio::test]
    async fn test_rolling_window_drops_old_samples() {
        let cache = InMemoryCache::new();
        let cb = CircuitBreaker::with_defaults("enrichment", &cache);

        for _ in 0..4 {
            cb.record_failure().await.unwrap();
        }
        // A run of successes pushes the failures out of the window
        for _ in 0..10 {
            cb.record_success().await.unwrap();
        }

        let state = cb.state().await.unwrap();
        assert_eq!(state.samples.len(), 10);
        assert_eq!(state.error_ratio(), 0.0);
        assert!(cb.guard().await.is_ok());
    }

    #[tokio::test]
    async fn test_shared_state_across_instances() {
        let cache = InMemoryCache::new();

        {
            let cb = CircuitBreaker::with_defaults("enrichment", &cache);
            for _ in 0..8 {
                cb.record_failure().await.unwrap();
            }
        }

        // A different worker constructing its own breaker sees the trip
        let other = CircuitBreaker::with_defaults("enrichment", &cache);
        assert!(other.guard().await.is_err());
    }
}
