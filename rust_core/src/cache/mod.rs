//! Cache tier for live/prematch match lists and engine bookkeeping.
//!
//! This module provides:
//! - The `KeyValueCache` trait the engine consumes (the transport behind
//!   it is an external collaborator; redis in production)
//! - Canonical key naming for every cached record
//! - The match-list cache with "stale shadow" fallback: before each
//!   overwrite the previous value is copied to a longer-TTL shadow key so
//!   a failed refresh cycle degrades to slightly older data instead of an
//!   empty list
//! - Chunk progress checkpoints for resumable batch passes

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

use crate::models::CanonicalMatch;

/// Key-value store consumed by the engine. Values are JSON strings;
/// last-write-wins semantics with TTL bounds.
#[async_trait]
pub trait KeyValueCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn put(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<()>;
    async fn forget(&self, key: &str) -> Result<()>;
}

pub type SharedCache = Arc<dyn KeyValueCache>;

// ============================================================================
// Key naming & TTLs
// ============================================================================

pub mod keys {
    pub fn live_matches(sport_id: i32, league: &str) -> String {
        format!("live_matches:{}:{}", sport_id, league)
    }

    pub fn live_matches_stale(sport_id: i32, league: &str) -> String {
        format!("live_matches_stale:{}:{}", sport_id, league)
    }

    pub fn prematch_matches(sport_id: i32, league: &str) -> String {
        format!("prematch_matches:{}:{}", sport_id, league)
    }

    pub fn prematch_matches_stale(sport_id: i32, league: &str) -> String {
        format!("prematch_matches_stale:{}:{}", sport_id, league)
    }

    pub fn team_resolution(provider: &str, hash: u64) -> String {
        format!("team_resolution:{}:{:x}", provider, hash)
    }

    pub fn circuit_breaker(name: &str) -> String {
        format!("circuit_breaker:{}", name)
    }

    pub fn chunk_progress(task: &str) -> String {
        format!("chunk_progress:{}", task)
    }

    /// Raw feed blobs deposited by the fetch harness.
    pub fn feed(kind: &str, sport_id: i32) -> String {
        format!("feed:{}:{}", kind, sport_id)
    }
}

pub const LIVE_TTL_SECS: u64 = 180;
pub const LIVE_STALE_TTL_SECS: u64 = 300;
pub const PREMATCH_TTL_SECS: u64 = 1200;
pub const PREMATCH_STALE_TTL_SECS: u64 = 7200;
pub const TEAM_RESOLUTION_TTL_SECS: u64 = 3600;
pub const CHUNK_PROGRESS_TTL_SECS: u64 = 6 * 3600;

// ============================================================================
// Match list cache
// ============================================================================

/// Read-through cache for per-(sport, league) match lists.
#[derive(Clone)]
pub struct MatchListCache {
    cache: SharedCache,
}

impl MatchListCache {
    pub fn new(cache: SharedCache) -> Self {
        Self { cache }
    }

    /// Overwrite the live list, shadowing the previous value first.
    pub async fn store_live(
        &self,
        sport_id: i32,
        league: &str,
        matches: &[CanonicalMatch],
    ) -> Result<()> {
        let key = keys::live_matches(sport_id, league);
        let shadow = keys::live_matches_stale(sport_id, league);
        self.shadow_then_write(&key, &shadow, matches, LIVE_TTL_SECS, LIVE_STALE_TTL_SECS)
            .await
    }

    /// Live list with stale-shadow fallback.
    pub async fn get_live(
        &self,
        sport_id: i32,
        league: &str,
    ) -> Result<Option<Vec<CanonicalMatch>>> {
        self.read_with_fallback(
            &keys::live_matches(sport_id, league),
            &keys::live_matches_stale(sport_id, league),
        )
        .await
    }

    /// Incremental prematch refresh: new batch ∪ cached entries, deduped
    /// by identity key, keeping the most recently updated per identity.
    pub async fn store_prematch(
        &self,
        sport_id: i32,
        league: &str,
        batch: &[CanonicalMatch],
    ) -> Result<()> {
        let key = keys::prematch_matches(sport_id, league);
        let shadow = keys::prematch_matches_stale(sport_id, league);

        let existing = self
            .read_with_fallback(&key, &shadow)
            .await?
            .unwrap_or_default();

        let mut by_identity: std::collections::HashMap<String, CanonicalMatch> =
            existing
                .into_iter()
                .map(|m| (m.identity_key.clone(), m))
                .collect();
        for m in batch {
            match by_identity.get(&m.identity_key) {
                Some(current) if current.last_updated > m.last_updated => {}
                _ => {
                    by_identity.insert(m.identity_key.clone(), m.clone());
                }
            }
        }

        let mut merged: Vec<CanonicalMatch> = by_identity.into_values().collect();
        merged.sort_by(|a, b| a.identity_key.cmp(&b.identity_key));

        self.shadow_then_write(
            &key,
            &shadow,
            &merged,
            PREMATCH_TTL_SECS,
            PREMATCH_STALE_TTL_SECS,
        )
        .await
    }

    /// Prematch list with stale-shadow fallback.
    pub async fn get_prematch(
        &self,
        sport_id: i32,
        league: &str,
    ) -> Result<Option<Vec<CanonicalMatch>>> {
        self.read_with_fallback(
            &keys::prematch_matches(sport_id, league),
            &keys::prematch_matches_stale(sport_id, league),
        )
        .await
    }

    async fn shadow_then_write(
        &self,
        key: &str,
        shadow_key: &str,
        matches: &[CanonicalMatch],
        ttl: u64,
        shadow_ttl: u64,
    ) -> Result<()> {
        if let Some(previous) = self.cache.get(key).await? {
            self.cache.put(shadow_key, &previous, shadow_ttl).await?;
        }
        let payload = serde_json::to_string(matches)?;
        self.cache.put(key, &payload, ttl).await
    }

    async fn read_with_fallback(
        &self,
        key: &str,
        shadow_key: &str,
    ) -> Result<Option<Vec<CanonicalMatch>>> {
        let raw = match self.cache.get(key).await? {
            Some(raw) => Some(raw),
            None => self.cache.get(shadow_key).await?,
        };
        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }
}

// ============================================================================
// Chunk progress checkpoints
// ============================================================================

/// Next unprocessed chunk index for a task, if a prior run was interrupted.
pub async fn get_checkpoint(cache: &dyn KeyValueCache, task: &str) -> Result<Option<usize>> {
    let raw = cache.get(&keys::chunk_progress(task)).await?;
    Ok(raw.and_then(|v| v.parse().ok()))
}

pub async fn set_checkpoint(cache: &dyn KeyValueCache, task: &str, chunk: usize) -> Result<()> {
    cache
        .put(
            &keys::chunk_progress(task),
            &chunk.to_string(),
            CHUNK_PROGRESS_TTL_SECS,
        )
        .await
}

pub async fn clear_checkpoint(cache: &dyn KeyValueCache, task: &str) -> Result<()> {
    cache.forget(&keys::chunk_progress(task)).await
}
