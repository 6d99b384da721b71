//! Cross-provider match deduplication and merge.
//!
//! This module provides:
//! - The order-invariant identity key that decides two provider records
//!   describe the same real-world event
//! - Single-pass aggregation of normalized matches from all providers into
//!   merged working records
//!
//! No provider is treated as primary for *presence*: the first record seen
//! for a key seeds the merged record and later ones enrich it, whatever
//! order the feeds arrived in.

use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;

use crate::models::{MatchStatus, NormalizedMatch, Provider, ProviderRef};
use crate::utils::normalize::{normalize_league_name, normalize_team_name};

/// Start times are bucketed to a 5-minute floor so small scheduling
/// disagreements between providers still collapse to one identity.
const TIME_BUCKET_SECS: i64 = 300;

/// Bucket a start time, or the literal token for "we don't know".
pub fn time_bucket(start: Option<DateTime<Utc>>) -> String {
    match start {
        Some(t) => {
            let secs = t.timestamp();
            (secs - secs.rem_euclid(TIME_BUCKET_SECS)).to_string()
        }
        None => "unknown".to_string(),
    }
}

/// Order-invariant identity key over normalized names and the time bucket.
/// Symmetric in home/away so it does not matter which side a provider
/// calls "home".
pub fn identity_key(
    home: &str,
    away: &str,
    league: &str,
    start: Option<DateTime<Utc>>,
) -> String {
    let h = normalize_team_name(home);
    let a = normalize_team_name(away);
    let l = normalize_league_name(league);
    let tb = time_bucket(start);

    let forward = format!("{}|{}|{}|{}", h, a, l, tb);
    let reverse = format!("{}|{}|{}|{}", a, h, l, tb);
    if forward <= reverse {
        forward
    } else {
        reverse
    }
}

/// Side-invariant normalized team pair, for presence checks against feeds
/// that have no reliable kickoff time attached.
pub fn team_pair_key(home: &str, away: &str) -> String {
    let h = normalize_team_name(home);
    let a = normalize_team_name(away);
    if h <= a {
        format!("{}|{}", h, a)
    } else {
        format!("{}|{}", a, h)
    }
}

/// A merged working record for one identity key, ready for team resolution
/// and persistence.
#[derive(Debug, Clone)]
pub struct AggregatedMatch {
    pub identity_key: String,
    pub providers: Vec<ProviderRef>,
    pub sport_id: i32,
    pub league_id: Option<i64>,
    pub league_name: String,
    pub home_team_name: String,
    pub away_team_name: String,
    pub start_time: Option<DateTime<Utc>>,
    /// Sticky: once any contributor asserts live, enrichers never demote.
    pub live_asserted: bool,
    /// Whether the authoritative feed itself asserted liveness; required
    /// for the terminal-status override path.
    pub live_from_authoritative: bool,
    pub home_score: Option<i32>,
    pub away_score: Option<i32>,
    pub match_clock: Option<String>,
    pub period: Option<i32>,
    pub has_open_markets: bool,
    pub last_updated: DateTime<Utc>,
    /// Which provider's raw names/ids the team resolver should use.
    pub resolution_provider: Provider,
    pub home_team_provider_id: Option<String>,
    pub away_team_provider_id: Option<String>,
    /// Provider timestamp backing the current score/clock values.
    score_updated_at: DateTime<Utc>,
    /// Whether the display names/league came from the authoritative feed.
    display_authoritative: bool,
}

impl AggregatedMatch {
    fn seed(m: &NormalizedMatch) -> Self {
        Self {
            identity_key: identity_key(
                &m.home_team_name,
                &m.away_team_name,
                &m.league_name,
                m.start_time,
            ),
            providers: vec![ProviderRef {
                provider: m.provider,
                provider_event_id: m.provider_event_id.clone(),
            }],
            sport_id: m.sport_id,
            league_id: m.league_id,
            league_name: m.league_name.clone(),
            home_team_name: m.home_team_name.clone(),
            away_team_name: m.away_team_name.clone(),
            start_time: m.start_time,
            live_asserted: m.live,
            live_from_authoritative: m.live && m.provider.is_authoritative(m.sport_id),
            home_score: m.home_score,
            away_score: m.away_score,
            match_clock: m.match_clock.clone(),
            period: m.period,
            has_open_markets: m.has_open_markets,
            last_updated: m.provider_updated_at,
            resolution_provider: m.provider,
            home_team_provider_id: m.home_team_provider_id.clone(),
            away_team_provider_id: m.away_team_provider_id.clone(),
            score_updated_at: m.provider_updated_at,
            display_authoritative: m.provider.is_authoritative(m.sport_id),
        }
    }

    fn merge(&mut self, m: &NormalizedMatch) {
        let already = self.providers.iter().any(|p| {
            p.provider == m.provider && p.provider_event_id == m.provider_event_id
        });
        if !already {
            self.providers.push(ProviderRef {
                provider: m.provider,
                provider_event_id: m.provider_event_id.clone(),
            });
        }

        // Secondary providers enrich, they never demote liveness.
        self.live_asserted |= m.live;
        self.live_from_authoritative |= m.live && m.provider.is_authoritative(m.sport_id);
        self.has_open_markets |= m.has_open_markets;

        // The authoritative feed owns display names, league and kickoff.
        if m.provider.is_authoritative(m.sport_id) && !self.display_authoritative {
            self.home_team_name = m.home_team_name.clone();
            self.away_team_name = m.away_team_name.clone();
            self.resolution_provider = m.provider;
            self.home_team_provider_id = m.home_team_provider_id.clone();
            self.away_team_provider_id = m.away_team_provider_id.clone();
            self.league_name = m.league_name.clone();
            if m.league_id.is_some() {
                self.league_id = m.league_id;
            }
            if m.start_time.is_some() {
                self.start_time = m.start_time;
            }
            self.display_authoritative = true;
        } else {
            if self.league_id.is_none() {
                self.league_id = m.league_id;
            }
            if self.start_time.is_none() {
                self.start_time = m.start_time;
            }
        }

        // Score/clock arbitration: freshest contributor wins, except that a
        // 0-0 placeholder never replaces a real score.
        let incoming_nonzero = m.has_nonzero_score();
        let current_nonzero =
            self.home_score.unwrap_or(0) != 0 || self.away_score.unwrap_or(0) != 0;
        let take_score = if m.provider_updated_at > self.score_updated_at {
            incoming_nonzero || !current_nonzero
        } else {
            incoming_nonzero && !current_nonzero
        };
        if take_score {
            self.home_score = m.home_score;
            self.away_score = m.away_score;
            self.match_clock = m.match_clock.clone();
            self.period = m.period;
            self.score_updated_at = m.provider_updated_at;
        }

        if m.provider_updated_at > self.last_updated {
            self.last_updated = m.provider_updated_at;
        }
    }

    /// Status a fresh record would get, applying the not-yet-started guard:
    /// a "live" flag on a match scheduled in the future means "live betting
    /// open", not "match started".
    pub fn derive_status(&self, now: DateTime<Utc>) -> MatchStatus {
        if self.live_asserted && self.start_time.map(|t| t <= now).unwrap_or(true) {
            MatchStatus::Live
        } else {
            MatchStatus::Scheduled
        }
    }

    /// Whether the authoritative provider for this sport contributed.
    pub fn has_authoritative(&self) -> bool {
        let authority = Provider::authoritative_for(self.sport_id);
        self.providers.iter().any(|p| p.provider == authority)
    }
}

/// Deduplicate and merge normalized matches from all providers.
///
/// Single pass: the first occurrence of an identity key seeds the record,
/// each subsequent occurrence merges. Output order is deterministic
/// (sorted by identity key) so repeated aggregation of the same input is
/// byte-for-byte identical.
pub fn aggregate(matches: &[NormalizedMatch]) -> Vec<AggregatedMatch> {
    let mut by_key: FxHashMap<String, AggregatedMatch> = FxHashMap::default();

    for m in matches {
        let key = identity_key(
            &m.home_team_name,
            &m.away_team_name,
            &m.league_name,
            m.start_time,
        );
        match by_key.get_mut(&key) {
            Some(existing) => existing.merge(m),
            None => {
                by_key.insert(key, AggregatedMatch::seed(m));
            }
        }
    }

    let mut merged: Vec<AggregatedMatch> = by_key.into_values().collect();
    merged.sort_by(|a, b| a.identity_key.cmp(&b.identity_key));
    merged
}
