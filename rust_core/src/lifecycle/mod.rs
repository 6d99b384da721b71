//! Canonical match status transitions.
//!
//! This module provides:
//! - The transition guards: a `Live` record never regresses to
//!   `Scheduled`, and terminal records only re-enter `Live` through the
//!   explicit, separately logged aggregation override
//! - `apply_transition`, the single place every status write goes through
//!
//! Finished-match detection lives in `detection`.

pub mod detection;

use tracing::{info, warn};

use crate::models::{CanonicalMatch, MatchStatus};

/// Who is asking for the status change. The override path is only
/// reachable from aggregation, and only when the merged liveness carries
/// the authoritative provider's own assertion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionSource {
    /// Routine reconciliation pass
    Reconciliation,
    /// Finished-match detection layers
    Detection,
    /// Aggregation override: full-confidence merged liveness on a later pass
    AggregationOverride,
}

/// Outcome of a requested status change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    Applied { from: MatchStatus, to: MatchStatus },
    Rejected { from: MatchStatus, to: MatchStatus, reason: &'static str },
    Noop,
}

impl Transition {
    pub fn applied(&self) -> bool {
        matches!(self, Transition::Applied { .. })
    }
}

/// Validate and apply a status change on a canonical record.
pub fn apply_transition(
    record: &mut CanonicalMatch,
    to: MatchStatus,
    source: TransitionSource,
) -> Transition {
    let from = record.status;

    if from == to {
        return Transition::Noop;
    }

    // Cancellation/postponement is accepted from anywhere.
    if to == MatchStatus::Cancelled {
        record.status = to;
        info!("match {} ({}): {} -> cancelled", record.id, record.identity_key, from.as_str());
        return Transition::Applied { from, to };
    }

    if from == MatchStatus::Live && to == MatchStatus::Scheduled {
        return Transition::Rejected {
            from,
            to,
            reason: "live record may not regress to scheduled",
        };
    }

    if from.is_terminal() {
        if to == MatchStatus::Live && source == TransitionSource::AggregationOverride {
            warn!(
                "AGGREGATION OVERRIDE: match {} ({}) re-entering live from {}",
                record.id,
                record.identity_key,
                from.as_str()
            );
            record.status = to;
            return Transition::Applied { from, to };
        }
        return Transition::Rejected {
            from,
            to,
            reason: "terminal status re-entry is forbidden",
        };
    }

    record.status = to;
    Transition::Applied { from, to }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Provider, ProviderRef, SPORT_FOOTBALL};
    use chrono::Utc;

    fn record(status: MatchStatus) -> CanonicalMatch {
        CanonicalMatch {
            id: 7,
            identity_key: "arsenal|chelsea|english|0".to_string(),
            providers: vec![ProviderRef {
                provider: Provider::Sportmonks,
                provider_event_id: "18001".to_string(),
            }],
            sport_id: SPORT_FOOTBALL,
            league_id: Some(8),
            league_name: "Premier League".to_string(),
            home_team_id: None,
            away_team_id: None,
            home_team_name: "Arsenal".to_string(),
            away_team_name: "Chelsea".to_string(),
            scheduled_time: Some(Utc::now()),
            status,
            home_score: None,
            away_score: None,
            match_clock: None,
            period: None,
            has_open_markets: true,
            last_updated: Utc::now(),
        }
    }

    #[test]
    fn test_scheduled_to_live() {
        let mut m = record(MatchStatus::Scheduled);
        let t = apply_transition(&mut m, MatchStatus::Live, TransitionSource::Reconciliation);
        assert!(t.applied());
        assert_eq!(m.status, MatchStatus::Live);
    }

    #[test]
    fn test_live_never_regresses_to_scheduled() {
        let mut m = record(MatchStatus::Live);
        let t = apply_transition(&mut m, MatchStatus::Scheduled, TransitionSource::Reconciliation);
        assert!(matches!(t, Transition::Rejected { .. }));
        assert_eq!(m.status, MatchStatus::Live);
    }

    #[test]
    fn test_terminal_reentry_forbidden_routinely() {
        for terminal in [MatchStatus::Finished, MatchStatus::SoftFinished] {
            let mut m = record(terminal);
            let t = apply_transition(&mut m, MatchStatus::Live, TransitionSource::Reconciliation);
            assert!(matches!(t, Transition::Rejected { .. }));
            assert_eq!(m.status, terminal);
        }
    }

    #[test]
    fn test_aggregation_override_is_the_only_reentry() {
        let mut m = record(MatchStatus::Finished);
        let t = apply_transition(&mut m, MatchStatus::Live, TransitionSource::AggregationOverride);
        assert!(t.applied());
        assert_eq!(m.status, MatchStatus::Live);

        // Detection cannot use the override
        let mut m = record(MatchStatus::SoftFinished);
        let t = apply_transition(&mut m, MatchStatus::Live, TransitionSource::Detection);
        assert!(matches!(t, Transition::Rejected { .. }));
    }

    #[test]
    fn test_cancellation_from_any_state() {
        for status in [
            MatchStatus::Scheduled,
            MatchStatus::Live,
            MatchStatus::Finished,
            MatchStatus::SoftFinished,
        ] {
            let mut m = record(status);
            let t = apply_transition(&mut m, MatchStatus::Cancelled, TransitionSource::Detection);
            assert!(t.applied());
            assert_eq!(m.status, MatchStatus::Cancelled);
        }
    }

    #[test]
    fn test_same_status_is_noop() {
        let mut m = record(MatchStatus::Live);
        let t = apply_transition(&mut m, MatchStatus::Live, TransitionSource::Reconciliation);
        assert_eq!(t, Transition::Noop);
    }

    #[test]
    fn test_detection_finishes_from_scheduled_and_live() {
        for from in [MatchStatus::Scheduled, MatchStatus::Live] {
            let mut m = record(from);
            let t = apply_transition(&mut m, MatchStatus::Finished, TransitionSource::Detection);
            assert!(t.applied());
        }
        let mut m = record(MatchStatus::Live);
        let t = apply_transition(&mut m, MatchStatus::SoftFinished, TransitionSource::Detection);
        assert!(t.applied());
    }
}
