//! Provider payload shapes and boundary normalization.
//!
//! Each provider gets an explicit struct with its own field names and
//! liveness encoding; payloads are normalized into `NormalizedMatch`
//! immediately at this boundary and untyped maps never travel further.
//! Normalization is fallible per record: a malformed record is a
//! `DataIntegrity` error that skips that record, never the batch.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::aggregator::team_pair_key;
use crate::cache::{keys, KeyValueCache};
use crate::errors::{EngineError, EngineResult};
use crate::models::{NormalizedMatch, Provider};

// ============================================================================
// Sportmonks (authoritative statistics feed)
// ============================================================================

/// One fixture as Sportmonks reports it. Liveness is a status code.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SportmonksFixture {
    pub id: i64,
    pub localteam_name: String,
    pub visitorteam_name: String,
    pub league_id: Option<i64>,
    pub league_name: String,
    pub sport_id: i32,
    /// NS, 1H, HT, 2H, ET, PEN_LIVE, BREAK, FT, AET, FT_PEN, CANCL, POSTP, AWARDED
    pub status: String,
    pub starting_at: Option<DateTime<Utc>>,
    pub minute: Option<i32>,
    pub localteam_score: Option<i32>,
    pub visitorteam_score: Option<i32>,
    pub updated_at: DateTime<Utc>,
}

impl SportmonksFixture {
    fn is_live(&self) -> bool {
        matches!(
            self.status.as_str(),
            "1H" | "HT" | "2H" | "ET" | "PEN_LIVE" | "BREAK"
        )
    }
}

// ============================================================================
// Betsapi (odds feed)
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BetsapiTeam {
    pub id: Option<String>,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BetsapiLeague {
    pub id: Option<i64>,
    pub name: String,
}

/// One event as Betsapi reports it. Liveness is a digit string and the
/// score is a packed "h-a" string.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BetsapiEvent {
    pub id: String,
    pub sport_id: i32,
    pub home: BetsapiTeam,
    pub away: BetsapiTeam,
    pub league: BetsapiLeague,
    /// Kickoff as unix seconds; 0 means unknown
    #[serde(default)]
    pub time: i64,
    /// "0" prematch, "1" in play, "3" ended
    pub time_status: String,
    /// Packed score, e.g. "2-1"
    pub ss: Option<String>,
    pub timer: Option<String>,
    /// Present while the book still quotes the event
    pub bet365_id: Option<String>,
    /// Last provider update as unix seconds
    pub updated_at: i64,
}

impl BetsapiEvent {
    fn parse_score(&self) -> (Option<i32>, Option<i32>) {
        match self.ss.as_deref().and_then(|ss| ss.split_once('-')) {
            Some((h, a)) => (h.trim().parse().ok(), a.trim().parse().ok()),
            None => (None, None),
        }
    }
}

// ============================================================================
// Flashlive (live-score feed)
// ============================================================================

/// One event as Flashlive reports it. Liveness is a plain bool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlashliveEvent {
    pub event_id: String,
    pub sport_id: i32,
    pub home_participant: String,
    pub away_participant: String,
    pub tournament_name: String,
    pub start_utc: Option<DateTime<Utc>>,
    pub live: bool,
    pub home_score: Option<i32>,
    pub away_score: Option<i32>,
    /// "1ST_HALF", "HALF_TIME", ...
    pub stage: Option<String>,
    #[serde(default)]
    pub has_open_markets: bool,
    pub updated_at: DateTime<Utc>,
}

impl FlashliveEvent {
    fn period(&self) -> Option<i32> {
        match self.stage.as_deref() {
            Some("1ST_HALF") => Some(1),
            Some("2ND_HALF") => Some(2),
            Some("HALF_TIME") => Some(1),
            Some("EXTRA_TIME") => Some(3),
            _ => None,
        }
    }
}

// ============================================================================
// Tagged raw payload
// ============================================================================

/// A raw match payload from any provider, tagged by source.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "provider", rename_all = "lowercase")]
pub enum RawProviderMatch {
    Sportmonks(SportmonksFixture),
    Betsapi(BetsapiEvent),
    Flashlive(FlashliveEvent),
}

impl RawProviderMatch {
    pub fn provider(&self) -> Provider {
        match self {
            RawProviderMatch::Sportmonks(_) => Provider::Sportmonks,
            RawProviderMatch::Betsapi(_) => Provider::Betsapi,
            RawProviderMatch::Flashlive(_) => Provider::Flashlive,
        }
    }

    /// Map this payload into the common shape. Fails with `DataIntegrity`
    /// when required identity fields are missing.
    pub fn normalize(&self) -> EngineResult<NormalizedMatch> {
        match self {
            RawProviderMatch::Sportmonks(f) => {
                require_name(Provider::Sportmonks, "localteam_name", &f.localteam_name)?;
                require_name(Provider::Sportmonks, "visitorteam_name", &f.visitorteam_name)?;
                Ok(NormalizedMatch {
                    provider: Provider::Sportmonks,
                    provider_event_id: f.id.to_string(),
                    home_team_name: f.localteam_name.clone(),
                    away_team_name: f.visitorteam_name.clone(),
                    home_team_provider_id: None,
                    away_team_provider_id: None,
                    league_id: f.league_id,
                    league_name: f.league_name.clone(),
                    sport_id: f.sport_id,
                    start_time: f.starting_at,
                    live: f.is_live(),
                    home_score: f.localteam_score,
                    away_score: f.visitorteam_score,
                    match_clock: f.minute.map(|m| format!("{}'", m)),
                    period: match f.status.as_str() {
                        "1H" | "HT" => Some(1),
                        "2H" => Some(2),
                        "ET" | "PEN_LIVE" => Some(3),
                        _ => None,
                    },
                    has_open_markets: false,
                    provider_updated_at: f.updated_at,
                })
            }
            RawProviderMatch::Betsapi(e) => {
                require_name(Provider::Betsapi, "home.name", &e.home.name)?;
                require_name(Provider::Betsapi, "away.name", &e.away.name)?;
                let (home_score, away_score) = e.parse_score();
                Ok(NormalizedMatch {
                    provider: Provider::Betsapi,
                    provider_event_id: e.id.clone(),
                    home_team_name: e.home.name.clone(),
                    away_team_name: e.away.name.clone(),
                    home_team_provider_id: e.home.id.clone(),
                    away_team_provider_id: e.away.id.clone(),
                    league_id: e.league.id,
                    league_name: e.league.name.clone(),
                    sport_id: e.sport_id,
                    start_time: if e.time > 0 {
                        Utc.timestamp_opt(e.time, 0).single()
                    } else {
                        None
                    },
                    live: e.time_status == "1",
                    home_score,
                    away_score,
                    match_clock: e.timer.clone(),
                    period: None,
                    has_open_markets: e.bet365_id.is_some(),
                    provider_updated_at: Utc
                        .timestamp_opt(e.updated_at, 0)
                        .single()
                        .ok_or_else(|| {
                            EngineError::data_integrity(
                                Provider::Betsapi.as_str(),
                                format!("event {}: bad updated_at {}", e.id, e.updated_at),
                            )
                        })?,
                })
            }
            RawProviderMatch::Flashlive(e) => {
                require_name(Provider::Flashlive, "home_participant", &e.home_participant)?;
                require_name(Provider::Flashlive, "away_participant", &e.away_participant)?;
                Ok(NormalizedMatch {
                    provider: Provider::Flashlive,
                    provider_event_id: e.event_id.clone(),
                    home_team_name: e.home_participant.clone(),
                    away_team_name: e.away_participant.clone(),
                    home_team_provider_id: None,
                    away_team_provider_id: None,
                    league_id: None,
                    league_name: e.tournament_name.clone(),
                    sport_id: e.sport_id,
                    start_time: e.start_utc,
                    live: e.live,
                    home_score: e.home_score,
                    away_score: e.away_score,
                    match_clock: None,
                    period: e.period(),
                    has_open_markets: e.has_open_markets,
                    provider_updated_at: e.updated_at,
                })
            }
        }
    }
}

fn require_name(provider: Provider, field: &str, value: &str) -> EngineResult<()> {
    if value.trim().len() < 2 {
        return Err(EngineError::data_integrity(
            provider.as_str(),
            format!("missing or too-short {}", field),
        ));
    }
    Ok(())
}

/// Normalize a whole raw batch, collecting per-record failures instead of
/// aborting.
pub fn normalize_all(raw: &[RawProviderMatch]) -> (Vec<NormalizedMatch>, Vec<EngineError>) {
    let mut ok = Vec::with_capacity(raw.len());
    let mut failed = Vec::new();
    for record in raw {
        match record.normalize() {
            Ok(normalized) => ok.push(normalized),
            Err(e) => failed.push(e),
        }
    }
    (ok, failed)
}

// ============================================================================
// Authoritative stats feed (consumed by finished-match detection)
// ============================================================================

/// Terminal fixture status as the statistics provider reports it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FixtureStatus {
    FullTime,
    AfterExtraTime,
    Penalties,
    Awarded,
    Cancelled,
    Postponed,
}

impl FixtureStatus {
    /// Cancellation-class statuses map to `Cancelled`, the rest to
    /// `Finished`.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, FixtureStatus::Cancelled | FixtureStatus::Postponed)
    }
}

/// One entry from the "finished fixtures" feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinishedFixture {
    pub home_team_name: String,
    pub away_team_name: String,
    pub league_name: String,
    pub status: FixtureStatus,
    pub finished_at: DateTime<Utc>,
}

/// One entry from the current live feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiveFeedEntry {
    pub provider_event_id: String,
    pub home_team_name: String,
    pub away_team_name: String,
    /// Open market count, when the book exposes it
    pub open_markets: Option<u32>,
}

/// Read access to the authoritative provider's status feeds.
#[async_trait]
pub trait StatsFeed: Send + Sync {
    /// Fixtures that reached a terminal status within the last `days_back`
    /// days.
    async fn finished_fixtures(
        &self,
        sport_id: i32,
        days_back: u32,
    ) -> Result<Vec<FinishedFixture>>;

    /// The current live feed.
    async fn live_feed(&self, sport_id: i32) -> Result<Vec<LiveFeedEntry>>;

    /// Open market count for one event; the error-prone enrichment call
    /// guarded by the circuit breaker.
    async fn open_market_count(&self, sport_id: i32, pair_key: &str) -> Result<Option<u32>>;
}

/// Normalized team-pair presence set for a live feed.
pub fn live_pair_keys(entries: &[LiveFeedEntry]) -> HashSet<String> {
    entries
        .iter()
        .map(|e| team_pair_key(&e.home_team_name, &e.away_team_name))
        .collect()
}

// ============================================================================
// Cache-fed stats feed
// ============================================================================

/// `StatsFeed` over blobs the fetch harness deposits in the KV tier
/// (`feed:finished:{sport}`, `feed:live:{sport}`). The engine never makes
/// provider HTTP calls itself.
pub struct CachedStatsFeed<'a> {
    cache: &'a dyn KeyValueCache,
}

impl<'a> CachedStatsFeed<'a> {
    pub fn new(cache: &'a dyn KeyValueCache) -> Self {
        Self { cache }
    }
}

#[async_trait]
impl<'a> StatsFeed for CachedStatsFeed<'a> {
    async fn finished_fixtures(
        &self,
        sport_id: i32,
        days_back: u32,
    ) -> Result<Vec<FinishedFixture>> {
        let raw = self.cache.get(&keys::feed("finished", sport_id)).await?;
        let fixtures: Vec<FinishedFixture> = match raw {
            Some(raw) => serde_json::from_str(&raw)?,
            None => return Ok(Vec::new()),
        };
        let cutoff = Utc::now() - Duration::days(days_back as i64);
        Ok(fixtures
            .into_iter()
            .filter(|f| f.finished_at >= cutoff)
            .collect())
    }

    async fn live_feed(&self, sport_id: i32) -> Result<Vec<LiveFeedEntry>> {
        let raw = self.cache.get(&keys::feed("live", sport_id)).await?;
        match raw {
            Some(raw) => Ok(serde_json::from_str(&raw)?),
            None => Ok(Vec::new()),
        }
    }

    async fn open_market_count(&self, sport_id: i32, pair_key: &str) -> Result<Option<u32>> {
        let entries = self.live_feed(sport_id).await?;
        Ok(entries
            .iter()
            .find(|e| team_pair_key(&e.home_team_name, &e.away_team_name) == pair_key)
            .and_then(|e| e.open_markets))
    }
}
