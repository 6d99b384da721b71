//! The reconciliation pass: raw provider payloads in, canonical records
//! and refreshed cache lists out.
//!
//! Pipeline per chunk: normalize (skip malformed records) -> aggregate
//! (dedup/merge) -> resolve teams -> upsert with transition guards.
//! Chunks are bounded and the next-chunk index is checkpointed in the
//! cache tier, so an interrupted run resumes instead of reprocessing, and
//! peak memory stays independent of batch size. Safe under at-least-once
//! invocation: every write is an idempotent upsert by identity key.

use anyhow::Result;
use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::aggregator::{aggregate, AggregatedMatch};
use crate::cache::{
    clear_checkpoint, get_checkpoint, set_checkpoint, MatchListCache, SharedCache,
};
use crate::db::{MatchStore, TeamStore};
use crate::lifecycle::{apply_transition, Transition, TransitionSource};
use crate::models::{BatchOutcome, CanonicalMatch, MatchStatus};
use crate::providers::{normalize_all, RawProviderMatch};
use crate::team_resolver::{ResolveRequest, TeamResolver};
use crate::utils::normalize::normalize_league_name;

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct ReconcileConfig {
    /// Records per chunk; bounds peak memory and checkpoint granularity
    pub chunk_size: usize,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self { chunk_size: 200 }
    }
}

pub struct ReconcileEngine {
    matches: Arc<dyn MatchStore>,
    teams: Arc<dyn TeamStore>,
    cache: SharedCache,
    config: ReconcileConfig,
}

impl ReconcileEngine {
    pub fn new(
        matches: Arc<dyn MatchStore>,
        teams: Arc<dyn TeamStore>,
        cache: SharedCache,
        config: ReconcileConfig,
    ) -> Self {
        Self {
            matches,
            teams,
            cache,
            config,
        }
    }

    /// Run one reconciliation pass over a raw provider batch.
    ///
    /// `task` names the logical scheduler task; the chunk checkpoint is
    /// keyed by it so a retried invocation resumes where the interrupted
    /// one stopped.
    pub async fn reconcile_batch(
        &self,
        task: &str,
        raw: &[RawProviderMatch],
        now: DateTime<Utc>,
    ) -> Result<BatchOutcome> {
        let mut outcome = BatchOutcome::default();
        let mut touched: Vec<CanonicalMatch> = Vec::new();

        let resume_from = get_checkpoint(self.cache.as_ref(), task)
            .await?
            .unwrap_or(0);
        if resume_from > 0 {
            info!(
                "task {}: resuming from chunk {} of {}",
                task,
                resume_from,
                raw.chunks(self.config.chunk_size).count()
            );
        }

        for (idx, chunk) in raw.chunks(self.config.chunk_size).enumerate() {
            if idx < resume_from {
                continue;
            }

            let (normalized, failures) = normalize_all(chunk);
            for failure in failures {
                outcome.record_error(failure.to_string());
            }

            for agg in aggregate(&normalized) {
                match self.persist_aggregate(&agg, now, &mut outcome).await {
                    Ok(record) => touched.push(record),
                    Err(e) => {
                        // A bad record or a transient store hiccup skips the
                        // record, never the pass
                        outcome.record_error(format!("{}: {}", agg.identity_key, e));
                    }
                }
            }

            set_checkpoint(self.cache.as_ref(), task, idx + 1).await?;
        }

        clear_checkpoint(self.cache.as_ref(), task).await?;
        self.refresh_cache_lists(&touched).await;

        info!(
            "task {}: created={} updated={} skipped={} errored={}",
            task, outcome.created, outcome.updated, outcome.skipped, outcome.errored
        );
        Ok(outcome)
    }

    async fn persist_aggregate(
        &self,
        agg: &AggregatedMatch,
        now: DateTime<Utc>,
        outcome: &mut BatchOutcome,
    ) -> Result<CanonicalMatch> {
        let resolver = TeamResolver::new(self.teams.as_ref(), self.cache.as_ref());

        let home = resolver
            .resolve_or_none(&ResolveRequest {
                provider: agg.resolution_provider,
                raw_name: &agg.home_team_name,
                raw_id: agg.home_team_provider_id.as_deref(),
                sport_id: agg.sport_id,
                league_id: agg.league_id,
            })
            .await;
        let away = resolver
            .resolve_or_none(&ResolveRequest {
                provider: agg.resolution_provider,
                raw_name: &agg.away_team_name,
                raw_id: agg.away_team_provider_id.as_deref(),
                sport_id: agg.sport_id,
                league_id: agg.league_id,
            })
            .await;

        match self.matches.get_by_identity(&agg.identity_key).await? {
            None => {
                let mut record = new_canonical(agg, now);
                record.home_team_id = home.map(|r| r.team_id);
                record.away_team_id = away.map(|r| r.team_id);
                record.id = self.matches.upsert(&record).await?;
                outcome.record_created();
                Ok(record)
            }
            Some(mut record) => {
                merge_into_existing(&mut record, agg, now);
                if record.home_team_id.is_none() {
                    record.home_team_id = home.map(|r| r.team_id);
                }
                if record.away_team_id.is_none() {
                    record.away_team_id = away.map(|r| r.team_id);
                }
                record.id = self.matches.upsert(&record).await?;
                outcome.record_updated();
                Ok(record)
            }
        }
    }

    /// Best-effort cache refresh; a cache failure degrades read freshness,
    /// not correctness.
    async fn refresh_cache_lists(&self, touched: &[CanonicalMatch]) {
        let lists = MatchListCache::new(self.cache.clone());

        let mut by_scope: FxHashMap<(i32, String), Vec<&CanonicalMatch>> = FxHashMap::default();
        for record in touched {
            by_scope
                .entry((record.sport_id, league_cache_key(&record.league_name)))
                .or_default()
                .push(record);
        }

        for ((sport_id, league), records) in by_scope {
            let live: Vec<CanonicalMatch> = records
                .iter()
                .filter(|m| m.status == MatchStatus::Live)
                .map(|m| (*m).clone())
                .collect();
            let prematch: Vec<CanonicalMatch> = records
                .iter()
                .filter(|m| m.status == MatchStatus::Scheduled)
                .map(|m| (*m).clone())
                .collect();

            if let Err(e) = lists.store_live(sport_id, &league, &live).await {
                warn!("live list refresh failed for {}:{}: {}", sport_id, league, e);
            }
            if !prematch.is_empty() {
                if let Err(e) = lists.store_prematch(sport_id, &league, &prematch).await {
                    warn!(
                        "prematch list refresh failed for {}:{}: {}",
                        sport_id, league, e
                    );
                }
            }
        }
    }
}

/// League segment of the cache key, stable across provider spellings.
pub fn league_cache_key(league_name: &str) -> String {
    let normalized = normalize_league_name(league_name);
    if normalized.is_empty() {
        "unknown".to_string()
    } else {
        normalized.replace(' ', "-")
    }
}

fn new_canonical(agg: &AggregatedMatch, now: DateTime<Utc>) -> CanonicalMatch {
    CanonicalMatch {
        id: 0,
        identity_key: agg.identity_key.clone(),
        providers: agg.providers.clone(),
        sport_id: agg.sport_id,
        league_id: agg.league_id,
        league_name: agg.league_name.clone(),
        home_team_id: None,
        away_team_id: None,
        home_team_name: agg.home_team_name.clone(),
        away_team_name: agg.away_team_name.clone(),
        scheduled_time: agg.start_time,
        status: agg.derive_status(now),
        home_score: agg.home_score,
        away_score: agg.away_score,
        match_clock: agg.match_clock.clone(),
        period: agg.period,
        has_open_markets: agg.has_open_markets,
        last_updated: agg.last_updated,
    }
}

/// Fold a fresh aggregate into the persisted record, honoring the
/// transition guards and the freshest-score rule.
fn merge_into_existing(record: &mut CanonicalMatch, agg: &AggregatedMatch, now: DateTime<Utc>) {
    for provider_ref in &agg.providers {
        record.attach_provider(provider_ref.provider, &provider_ref.provider_event_id);
    }

    if record.scheduled_time.is_none() {
        record.scheduled_time = agg.start_time;
    }
    if record.league_id.is_none() {
        record.league_id = agg.league_id;
    }

    if agg.last_updated >= record.last_updated {
        let incoming_nonzero =
            agg.home_score.unwrap_or(0) != 0 || agg.away_score.unwrap_or(0) != 0;
        let current_nonzero =
            record.home_score.unwrap_or(0) != 0 || record.away_score.unwrap_or(0) != 0;
        if incoming_nonzero || !current_nonzero {
            record.home_score = agg.home_score;
            record.away_score = agg.away_score;
            record.match_clock = agg.match_clock.clone();
            record.period = agg.period;
        }
        record.has_open_markets = agg.has_open_markets;
    }

    let desired = agg.derive_status(now);
    let routine = apply_transition(record, desired, TransitionSource::Reconciliation);
    if let Transition::Rejected { from, .. } = routine {
        // The only sanctioned terminal re-entry: a later pass whose merged
        // liveness carries the authoritative provider's own assertion.
        if desired == MatchStatus::Live && from.is_terminal() && agg.live_from_authoritative {
            apply_transition(record, desired, TransitionSource::AggregationOverride);
        }
    }

    record.touch(agg.last_updated);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::identity_key;
    use crate::models::{Provider, ProviderRef, SPORT_FOOTBALL};
    use chrono::Duration;

    fn aggregated(live: bool, from_authoritative: bool) -> AggregatedMatch {
        let now = Utc::now();
        let matches = vec![crate::models::NormalizedMatch {
            provider: if from_authoritative {
                Provider::Sportmonks
            } else {
                Provider::Betsapi
            },
            provider_event_id: "ev-1".to_string(),
            home_team_name: "Arsenal".to_string(),
            away_team_name: "Chelsea".to_string(),
            home_team_provider_id: None,
            away_team_provider_id: None,
            league_id: Some(8),
            league_name: "Premier League".to_string(),
            sport_id: SPORT_FOOTBALL,
            start_time: Some(now - Duration::hours(1)),
            live,
            home_score: Some(1),
            away_score: Some(0),
            match_clock: None,
            period: Some(2),
            has_open_markets: true,
            provider_updated_at: now,
        }];
        aggregate(&matches).pop().unwrap()
    }

    fn existing(status: MatchStatus) -> CanonicalMatch {
        let now = Utc::now();
        CanonicalMatch {
            id: 11,
            identity_key: identity_key(
                "Arsenal",
                "Chelsea",
                "Premier League",
                Some(now - Duration::hours(1)),
            ),
            providers: vec![ProviderRef {
                provider: Provider::Sportmonks,
                provider_event_id: "ev-1".to_string(),
            }],
            sport_id: SPORT_FOOTBALL,
            league_id: Some(8),
            league_name: "Premier League".to_string(),
            home_team_id: Some(1),
            away_team_id: Some(2),
            home_team_name: "Arsenal".to_string(),
            away_team_name: "Chelsea".to_string(),
            scheduled_time: Some(now - Duration::hours(1)),
            status,
            home_score: Some(2),
            away_score: Some(2),
            match_clock: None,
            period: None,
            has_open_markets: true,
            last_updated: now - Duration::minutes(30),
        }
    }

    #[test]
    fn test_live_record_not_demoted_by_quiet_pass() {
        let mut record = existing(MatchStatus::Live);
        let agg = aggregated(false, false);
        merge_into_existing(&mut record, &agg, Utc::now());
        assert_eq!(record.status, MatchStatus::Live);
    }

    #[test]
    fn test_terminal_reentry_requires_authoritative_liveness() {
        // Secondary-only liveness must not resurrect a finished match
        let mut record = existing(MatchStatus::Finished);
        let agg = aggregated(true, false);
        merge_into_existing(&mut record, &agg, Utc::now());
        assert_eq!(record.status, MatchStatus::Finished);

        // The authoritative assertion takes the override path
        let mut record = existing(MatchStatus::Finished);
        let agg = aggregated(true, true);
        merge_into_existing(&mut record, &agg, Utc::now());
        assert_eq!(record.status, MatchStatus::Live);
    }

    #[test]
    fn test_fresh_zero_keeps_existing_score() {
        let mut record = existing(MatchStatus::Live);
        let mut agg = aggregated(true, true);
        agg.home_score = Some(0);
        agg.away_score = Some(0);
        merge_into_existing(&mut record, &agg, Utc::now());
        assert_eq!(record.home_score, Some(2));
        assert_eq!(record.away_score, Some(2));
    }

    #[test]
    fn test_last_updated_never_regresses() {
        let mut record = existing(MatchStatus::Live);
        let before = record.last_updated;
        let mut agg = aggregated(true, true);
        agg.last_updated = before - Duration::hours(2);
        merge_into_existing(&mut record, &agg, Utc::now());
        assert_eq!(record.last_updated, before);
    }

    #[test]
    fn test_league_cache_key() {
        assert_eq!(league_cache_key("English Premier League"), "english");
        assert_eq!(league_cache_key("UEFA Champions League"), "uefa-champions");
        assert_eq!(league_cache_key(""), "unknown");
    }
}
