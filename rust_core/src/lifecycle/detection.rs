//! Multi-layer finished-match detection.
//!
//! Four layers run over persisted, non-terminal records in order of
//! decreasing precision:
//!
//! - L1 authoritative status feed ("finished fixtures" for the last k days)
//! - L2 feed-absence / market-availability verification
//! - L3 time-based confidence scoring
//! - L4 staleness safety net, bounding worst-case staleness even when
//!   L1-L3 all miss
//!
//! Each layer is independently fail-soft: an error in one is logged and
//! the remainder still execute. "Aggressive" tightens thresholds, it is
//! not a different algorithm.

use anyhow::Result;
use chrono::{Duration, Utc};
use rustc_hash::FxHashMap;
use tracing::{debug, error, info};

use crate::aggregator::team_pair_key;
use crate::cache::KeyValueCache;
use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
use crate::db::MatchStore;
use crate::errors::EngineError;
use crate::league_config::{coverage_for_league, CoverageTier};
use crate::lifecycle::{apply_transition, TransitionSource};
use crate::models::{
    CanonicalMatch, CleanupReport, MatchStatus, SPORT_BASKETBALL, SPORT_FOOTBALL,
    SPORT_ICE_HOCKEY, SPORT_TENNIS,
};
use crate::providers::{live_pair_keys, FixtureStatus, StatsFeed};

/// Name of the breaker guarding market-availability enrichment calls.
const ENRICHMENT_BREAKER: &str = "enrichment";

/// Detection thresholds. `aggressive` tightens them across the board.
#[derive(Debug, Clone)]
pub struct DetectionConfig {
    pub aggressive: bool,
    /// Days of finished fixtures to pull from the authoritative feed
    pub finished_lookback_days: u32,
    pub breaker: CircuitBreakerConfig,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            aggressive: false,
            finished_lookback_days: 4,
            breaker: CircuitBreakerConfig::default(),
        }
    }
}

impl DetectionConfig {
    pub fn aggressive() -> Self {
        Self {
            aggressive: true,
            ..Self::default()
        }
    }

    fn confidence_threshold(&self) -> i32 {
        if self.aggressive {
            15
        } else {
            30
        }
    }

    fn staleness_hours(&self) -> i64 {
        if self.aggressive {
            12
        } else {
            24
        }
    }
}

pub struct FinishedMatchDetector<'a> {
    matches: &'a dyn MatchStore,
    feed: &'a dyn StatsFeed,
    cache: &'a dyn KeyValueCache,
    config: DetectionConfig,
}

impl<'a> FinishedMatchDetector<'a> {
    pub fn new(
        matches: &'a dyn MatchStore,
        feed: &'a dyn StatsFeed,
        cache: &'a dyn KeyValueCache,
        config: DetectionConfig,
    ) -> Self {
        Self {
            matches,
            feed,
            cache,
            config,
        }
    }

    /// L1 — authoritative status feed. Fixtures reported terminal by the
    /// statistics provider retire the corresponding canonical match,
    /// matched by normalized team names.
    pub async fn run_authoritative_filter(&self, sport_id: Option<i32>) -> Result<u32> {
        let mut retired = 0;

        for sport in sports(sport_id) {
            let fixtures = match self
                .feed
                .finished_fixtures(sport, self.config.finished_lookback_days)
                .await
            {
                Ok(fixtures) => fixtures,
                Err(e) => {
                    // One unreachable feed must not starve the other sports
                    error!("finished-fixtures feed failed for sport {}: {}", sport, e);
                    continue;
                }
            };
            if fixtures.is_empty() {
                continue;
            }

            let mut terminal_by_pair: FxHashMap<String, FixtureStatus> = FxHashMap::default();
            for fixture in &fixtures {
                terminal_by_pair.insert(
                    team_pair_key(&fixture.home_team_name, &fixture.away_team_name),
                    fixture.status,
                );
            }

            for mut record in self.matches.list_non_terminal(Some(sport)).await? {
                let pair = team_pair_key(&record.home_team_name, &record.away_team_name);
                let Some(status) = terminal_by_pair.get(&pair) else {
                    continue;
                };
                let target = if status.is_cancellation() {
                    MatchStatus::Cancelled
                } else {
                    MatchStatus::Finished
                };
                if apply_transition(&mut record, target, TransitionSource::Detection).applied() {
                    self.matches
                        .set_status(
                            record.id,
                            target,
                            &format!("authoritative feed reported {:?}", status),
                        )
                        .await?;
                    retired += 1;
                }
            }
        }

        info!("authoritative filter retired {} matches", retired);
        Ok(retired)
    }

    /// L2 — feed absence and market availability. Records that claim to be
    /// bettable but no longer appear in the authoritative live feed (or
    /// appear with no open markets) are finished.
    pub async fn run_feed_verification(&self, sport_id: Option<i32>) -> Result<u32> {
        let breaker = CircuitBreaker::new(ENRICHMENT_BREAKER, self.config.breaker.clone(), self.cache);
        if let Err(EngineError::CircuitOpen(name)) = breaker.guard().await {
            info!("feed verification skipped: circuit '{}' open", name);
            return Ok(0);
        }

        let now = Utc::now();
        let mut retired = 0;

        for sport in sports(sport_id) {
            let live_entries = match self.feed.live_feed(sport).await {
                Ok(entries) => entries,
                Err(e) => {
                    error!("live feed failed for sport {}: {}", sport, e);
                    breaker.record_failure().await.ok();
                    continue;
                }
            };
            let live_pairs = live_pair_keys(&live_entries);

            for mut record in self.matches.list_non_terminal(Some(sport)).await? {
                // Scope: not live, still quoted for betting, touched within
                // 48h, and actually past kickoff.
                if record.status == MatchStatus::Live
                    || !record.has_open_markets
                    || now - record.last_updated > Duration::hours(48)
                {
                    continue;
                }
                let started = record.scheduled_time.map(|t| t <= now).unwrap_or(false);
                if !started {
                    continue;
                }

                let pair = team_pair_key(&record.home_team_name, &record.away_team_name);
                let reason = if !live_pairs.contains(&pair) {
                    Some("absent from authoritative live feed")
                } else {
                    match self.feed.open_market_count(sport, &pair).await {
                        Ok(Some(0)) => {
                            breaker.record_success().await.ok();
                            Some("present in live feed with no open markets")
                        }
                        Ok(_) => {
                            breaker.record_success().await.ok();
                            None
                        }
                        Err(e) => {
                            debug!("open-market lookup failed for {}: {}", pair, e);
                            breaker.record_failure().await.ok();
                            None
                        }
                    }
                };

                if let Some(reason) = reason {
                    if apply_transition(&mut record, MatchStatus::Finished, TransitionSource::Detection)
                        .applied()
                    {
                        self.matches
                            .set_status(record.id, MatchStatus::Finished, reason)
                            .await?;
                        retired += 1;
                    }
                }
            }
        }

        info!("feed verification retired {} matches", retired);
        Ok(retired)
    }

    /// L3 — time-based confidence scoring over staleness indicators.
    pub async fn run_time_based_cleanup(&self, sport_id: Option<i32>) -> Result<u32> {
        let now = Utc::now();
        let threshold = self.config.confidence_threshold();
        let mut retired = 0;

        for sport in sports(sport_id) {
            for mut record in self.matches.list_non_terminal(Some(sport)).await? {
                let (confidence, forced) = finish_confidence(&record, now);
                if confidence < threshold {
                    continue;
                }

                let target = if forced
                    || coverage_for_league(&record.league_name) == CoverageTier::Major
                {
                    MatchStatus::Finished
                } else {
                    MatchStatus::SoftFinished
                };

                if apply_transition(&mut record, target, TransitionSource::Detection).applied() {
                    self.matches
                        .set_status(
                            record.id,
                            target,
                            &format!("time-based confidence {} >= {}", confidence, threshold),
                        )
                        .await?;
                    retired += 1;
                }
            }
        }

        info!("time-based cleanup retired {} matches", retired);
        Ok(retired)
    }

    /// L4 — staleness safety net: any non-live record beyond the rolling
    /// update threshold is retired unconditionally.
    pub async fn run_staleness_purge(&self, sport_id: Option<i32>) -> Result<u32> {
        let now = Utc::now();
        let cutoff = Duration::hours(self.config.staleness_hours());
        let mut retired = 0;

        for sport in sports(sport_id) {
            for mut record in self.matches.list_non_terminal(Some(sport)).await? {
                if record.status == MatchStatus::Live || now - record.last_updated <= cutoff {
                    continue;
                }
                if apply_transition(&mut record, MatchStatus::SoftFinished, TransitionSource::Detection)
                    .applied()
                {
                    self.matches
                        .set_status(
                            record.id,
                            MatchStatus::SoftFinished,
                            &format!("no update in {}h", self.config.staleness_hours()),
                        )
                        .await?;
                    retired += 1;
                }
            }
        }

        info!("staleness purge retired {} matches", retired);
        Ok(retired)
    }

    /// Comprehensive run: L1 through L4, each fail-soft, with per-layer
    /// counts.
    pub async fn run_comprehensive(&self, sport_id: Option<i32>) -> CleanupReport {
        let mut report = CleanupReport::default();

        match self.run_authoritative_filter(sport_id).await {
            Ok(n) => report.authoritative = n,
            Err(e) => error!("authoritative filter failed: {}", e),
        }
        match self.run_feed_verification(sport_id).await {
            Ok(n) => report.feed_verification = n,
            Err(e) => error!("feed verification failed: {}", e),
        }
        match self.run_time_based_cleanup(sport_id).await {
            Ok(n) => report.time_based = n,
            Err(e) => error!("time-based cleanup failed: {}", e),
        }
        match self.run_staleness_purge(sport_id).await {
            Ok(n) => report.staleness = n,
            Err(e) => error!("staleness purge failed: {}", e),
        }

        info!("comprehensive cleanup retired {} matches total", report.total());
        report
    }
}

fn sports(sport_id: Option<i32>) -> Vec<i32> {
    match sport_id {
        Some(sport) => vec![sport],
        None => vec![
            SPORT_FOOTBALL,
            SPORT_BASKETBALL,
            SPORT_TENNIS,
            SPORT_ICE_HOCKEY,
        ],
    }
}

/// Additive confidence over staleness indicators. The second value is
/// true when the 48h-live indicator fired, which forces a hard `Finished`
/// regardless of league coverage.
fn finish_confidence(record: &CanonicalMatch, now: chrono::DateTime<Utc>) -> (i32, bool) {
    let mut confidence = 0;
    let mut forced = false;

    let since_kickoff = record.scheduled_time.map(|t| now - t);
    let since_update = now - record.last_updated;

    if since_kickoff.map(|d| d > Duration::hours(2)).unwrap_or(false) {
        confidence += 20;
    }
    if since_update > Duration::hours(6) {
        confidence += 15;
    }
    if record.has_open_markets && record.status != MatchStatus::Live {
        confidence += 10;
    }
    if record.status == MatchStatus::Live {
        if let Some(elapsed) = since_kickoff {
            if elapsed > Duration::hours(3) && since_update > Duration::hours(2) {
                confidence += 30;
            }
            if elapsed > Duration::hours(48) {
                confidence += 50;
                forced = true;
            }
        }
    }

    (confidence, forced)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Provider, ProviderRef, SPORT_FOOTBALL};

    fn record(status: MatchStatus, kickoff_hours_ago: i64, updated_hours_ago: i64) -> CanonicalMatch {
        let now = Utc::now();
        CanonicalMatch {
            id: 1,
            identity_key: "arsenal|chelsea|english|0".to_string(),
            providers: vec![ProviderRef {
                provider: Provider::Sportmonks,
                provider_event_id: "18001".to_string(),
            }],
            sport_id: SPORT_FOOTBALL,
            league_id: Some(8),
            league_name: "English Premier League".to_string(),
            home_team_id: Some(1),
            away_team_id: Some(2),
            home_team_name: "Arsenal".to_string(),
            away_team_name: "Chelsea".to_string(),
            scheduled_time: Some(now - Duration::hours(kickoff_hours_ago)),
            status,
            home_score: Some(1),
            away_score: Some(1),
            match_clock: None,
            period: None,
            has_open_markets: true,
            last_updated: now - Duration::hours(updated_hours_ago),
        }
    }

    #[test]
    fn test_confidence_past_kickoff_and_stale() {
        // Kicked off 3h ago, last update 7h ago, markets open, not live
        let r = record(MatchStatus::Scheduled, 3, 7);
        let (conf, forced) = finish_confidence(&r, Utc::now());
        // 20 (past kickoff) + 15 (stale) + 10 (available, not live)
        assert_eq!(conf, 45);
        assert!(!forced);
    }

    #[test]
    fn test_confidence_live_stale_and_old_forces_finish() {
        // Live for 50h, no update in 3h
        let r = record(MatchStatus::Live, 50, 3);
        let (conf, forced) = finish_confidence(&r, Utc::now());
        // 20 + 30 (live, stale, old) + 50 (live > 48h)
        assert!(conf >= 80);
        assert!(forced);
    }

    #[test]
    fn test_confidence_fresh_match_is_quiet() {
        let r = record(MatchStatus::Live, 1, 0);
        let (conf, forced) = finish_confidence(&r, Utc::now());
        assert_eq!(conf, 0);
        assert!(!forced);
    }

    #[test]
    fn test_confidence_unknown_kickoff_never_uses_time_indicators() {
        let mut r = record(MatchStatus::Live, 50, 3);
        r.scheduled_time = None;
        let (conf, forced) = finish_confidence(&r, Utc::now());
        assert!(!forced);
        assert!(conf < 30);
    }

    #[test]
    fn test_thresholds() {
        assert_eq!(DetectionConfig::default().confidence_threshold(), 30);
        assert_eq!(DetectionConfig::aggressive().confidence_threshold(), 15);
        assert_eq!(DetectionConfig::default().staleness_hours(), 24);
        assert_eq!(DetectionConfig::aggressive().staleness_hours(), 12);
    }
}
