// Shared models for Fixturesync services
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Provider & Sport
// ============================================================================

/// Known sport identifiers as used by the upstream feeds.
pub const SPORT_FOOTBALL: i32 = 1;
pub const SPORT_BASKETBALL: i32 = 2;
pub const SPORT_TENNIS: i32 = 3;
pub const SPORT_ICE_HOCKEY: i32 = 4;

/// Whether a sport id is one this deployment ingests.
pub fn is_known_sport(sport_id: i32) -> bool {
    matches!(
        sport_id,
        SPORT_FOOTBALL | SPORT_BASKETBALL | SPORT_TENNIS | SPORT_ICE_HOCKEY
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Sportmonks,
    Betsapi,
    Flashlive,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Sportmonks => "sportmonks",
            Provider::Betsapi => "betsapi",
            Provider::Flashlive => "flashlive",
        }
    }

    pub fn from_str(s: &str) -> Option<Provider> {
        match s.to_lowercase().as_str() {
            "sportmonks" => Some(Provider::Sportmonks),
            "betsapi" => Some(Provider::Betsapi),
            "flashlive" => Some(Provider::Flashlive),
            _ => None,
        }
    }

    /// The provider treated as ground truth for match existence and the
    /// primary liveness signal for a given sport.
    pub fn authoritative_for(sport_id: i32) -> Provider {
        match sport_id {
            SPORT_FOOTBALL | SPORT_BASKETBALL | SPORT_ICE_HOCKEY => Provider::Sportmonks,
            SPORT_TENNIS => Provider::Betsapi,
            _ => Provider::Sportmonks,
        }
    }

    pub fn is_authoritative(&self, sport_id: i32) -> bool {
        *self == Provider::authoritative_for(sport_id)
    }

    /// Trust bonus added to team-mapping confidence scores.
    pub fn trust_bonus(&self, sport_id: i32) -> f64 {
        if self.is_authoritative(sport_id) {
            0.4
        } else {
            0.2
        }
    }
}

// ============================================================================
// Match Status
// ============================================================================

/// Lifecycle status of a canonical match.
///
/// `Finished`, `SoftFinished` and `Cancelled` are terminal; re-entry is
/// rejected everywhere except the explicit aggregation override in the
/// lifecycle module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStatus {
    Scheduled,
    Live,
    Finished,
    SoftFinished,
    Cancelled,
}

impl MatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchStatus::Scheduled => "scheduled",
            MatchStatus::Live => "live",
            MatchStatus::Finished => "finished",
            MatchStatus::SoftFinished => "soft_finished",
            MatchStatus::Cancelled => "cancelled",
        }
    }

    pub fn from_str(s: &str) -> Option<MatchStatus> {
        match s {
            "scheduled" => Some(MatchStatus::Scheduled),
            "live" => Some(MatchStatus::Live),
            "finished" => Some(MatchStatus::Finished),
            "soft_finished" => Some(MatchStatus::SoftFinished),
            "cancelled" => Some(MatchStatus::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            MatchStatus::Finished | MatchStatus::SoftFinished | MatchStatus::Cancelled
        )
    }
}

// ============================================================================
// Canonical Match
// ============================================================================

/// One `(provider, providerEventId)` contribution to a canonical match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderRef {
    pub provider: Provider,
    pub provider_event_id: String,
}

/// The reconciled truth for one real-world event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalMatch {
    /// Store-assigned id; 0 until first persisted.
    pub id: i64,
    /// Order-invariant identity key (see aggregator).
    pub identity_key: String,
    pub providers: Vec<ProviderRef>,
    pub sport_id: i32,
    pub league_id: Option<i64>,
    pub league_name: String,
    pub home_team_id: Option<i64>,
    pub away_team_id: Option<i64>,
    pub home_team_name: String,
    pub away_team_name: String,
    /// "Unknown start" is a valid value.
    pub scheduled_time: Option<DateTime<Utc>>,
    pub status: MatchStatus,
    pub home_score: Option<i32>,
    pub away_score: Option<i32>,
    pub match_clock: Option<String>,
    pub period: Option<i32>,
    pub has_open_markets: bool,
    pub last_updated: DateTime<Utc>,
}

impl CanonicalMatch {
    pub fn has_provider(&self, provider: Provider) -> bool {
        self.providers.iter().any(|p| p.provider == provider)
    }

    /// Merge a provider reference into the contributing set.
    pub fn attach_provider(&mut self, provider: Provider, provider_event_id: &str) {
        let already = self.providers.iter().any(|p| {
            p.provider == provider && p.provider_event_id == provider_event_id
        });
        if !already {
            self.providers.push(ProviderRef {
                provider,
                provider_event_id: provider_event_id.to_string(),
            });
        }
    }

    /// Advance `last_updated`, never letting it move backwards.
    pub fn touch(&mut self, ts: DateTime<Utc>) {
        if ts > self.last_updated {
            self.last_updated = ts;
        }
    }
}

// ============================================================================
// Teams
// ============================================================================

/// Canonical team. Never deleted by this engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamEntity {
    pub id: i64,
    pub sport_id: i32,
    pub league_id: Option<i64>,
    pub name: String,
    pub mapping_confidence: f64,
}

/// A provider's view of a canonical team.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderTeamMapping {
    pub team_id: i64,
    pub provider: Provider,
    pub provider_team_id: Option<String>,
    pub provider_team_name: String,
    pub confidence: f64,
    pub is_primary: bool,
}

// ============================================================================
// Normalized provider match (transient, not persisted)
// ============================================================================

/// A provider's raw match record mapped into the common shape. Produced at
/// the ingestion boundary; untyped maps never travel past it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedMatch {
    pub provider: Provider,
    pub provider_event_id: String,
    pub home_team_name: String,
    pub away_team_name: String,
    /// Provider-side team ids, when the provider exposes them.
    pub home_team_provider_id: Option<String>,
    pub away_team_provider_id: Option<String>,
    pub league_id: Option<i64>,
    pub league_name: String,
    pub sport_id: i32,
    pub start_time: Option<DateTime<Utc>>,
    pub live: bool,
    pub home_score: Option<i32>,
    pub away_score: Option<i32>,
    pub match_clock: Option<String>,
    pub period: Option<i32>,
    pub has_open_markets: bool,
    /// Provider-reported update timestamp, used for freshness arbitration.
    pub provider_updated_at: DateTime<Utc>,
}

impl NormalizedMatch {
    pub fn has_nonzero_score(&self) -> bool {
        self.home_score.unwrap_or(0) != 0 || self.away_score.unwrap_or(0) != 0
    }
}

// ============================================================================
// Batch outcome & cleanup report
// ============================================================================

/// Accumulating outcome of one reconciliation pass. Replaces
/// exception-driven "skip this record" control flow.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchOutcome {
    pub created: u32,
    pub updated: u32,
    pub skipped: u32,
    pub errored: u32,
    /// Short per-record notes for operator visibility, bounded.
    pub notes: Vec<String>,
}

impl BatchOutcome {
    const MAX_NOTES: usize = 50;

    pub fn record_created(&mut self) {
        self.created += 1;
    }

    pub fn record_updated(&mut self) {
        self.updated += 1;
    }

    pub fn record_skipped(&mut self, note: impl Into<String>) {
        self.skipped += 1;
        self.push_note(note.into());
    }

    pub fn record_error(&mut self, note: impl Into<String>) {
        self.errored += 1;
        self.push_note(note.into());
    }

    pub fn merge(&mut self, other: &BatchOutcome) {
        self.created += other.created;
        self.updated += other.updated;
        self.skipped += other.skipped;
        self.errored += other.errored;
        for note in &other.notes {
            self.push_note(note.clone());
        }
    }

    pub fn total(&self) -> u32 {
        self.created + self.updated + self.skipped + self.errored
    }

    fn push_note(&mut self, note: String) {
        if self.notes.len() < Self::MAX_NOTES {
            self.notes.push(note);
        }
    }
}

/// Per-layer counts for a finished-match detection run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CleanupReport {
    pub authoritative: u32,
    pub feed_verification: u32,
    pub time_based: u32,
    pub staleness: u32,
}

impl CleanupReport {
    pub fn total(&self) -> u32 {
        self.authoritative + self.feed_verification + self.time_based + self.staleness
    }
}

// ============================================================================
// Trigger contract (from the external scheduler)
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CleanupOperation {
    AuthoritativeFilter,
    FeedVerification,
    TimeBasedCleanup,
    StalenessPurge,
    Comprehensive,
}

/// One trigger message as delivered by the scheduler. Retries, backoff and
/// timeouts are the scheduler's responsibility.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerRequest {
    pub operation: CleanupOperation,
    #[serde(default)]
    pub sport_id: Option<i32>,
    #[serde(default)]
    pub aggressive: bool,
}
