//! League configuration for supported competitions.
//!
//! This module provides:
//! - Static configuration for the leagues we track closely
//! - Coverage tiers that drive the finished-detection Finished vs
//!   SoftFinished branch

use crate::models::{SPORT_BASKETBALL, SPORT_FOOTBALL, SPORT_ICE_HOCKEY};
use crate::utils::normalize::normalize_league_name;

/// How much we trust our feeds for a league. "Major" coverage means the
/// authoritative provider reliably reports finals, so time-based detection
/// may assert a hard `Finished`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoverageTier {
    Major,
    Standard,
}

/// Configuration for a single league.
#[derive(Debug, Clone)]
pub struct LeagueConfig {
    /// League code (e.g., "epl", "laliga")
    pub league_code: &'static str,
    pub sport_id: i32,
    pub coverage: CoverageTier,
    /// Normalized league-name aliases that map to this league
    pub aliases: &'static [&'static str],
}

/// Static configuration for all closely-tracked leagues.
pub static LEAGUE_CONFIGS: &[LeagueConfig] = &[
    LeagueConfig {
        league_code: "epl",
        sport_id: SPORT_FOOTBALL,
        coverage: CoverageTier::Major,
        aliases: &["english", "epl", "england"],
    },
    LeagueConfig {
        league_code: "laliga",
        sport_id: SPORT_FOOTBALL,
        coverage: CoverageTier::Major,
        aliases: &["laliga", "la liga", "spain", "spanish"],
    },
    LeagueConfig {
        league_code: "bundesliga",
        sport_id: SPORT_FOOTBALL,
        coverage: CoverageTier::Major,
        aliases: &["germany", "german"],
    },
    LeagueConfig {
        league_code: "seriea",
        sport_id: SPORT_FOOTBALL,
        coverage: CoverageTier::Major,
        aliases: &["italy", "italian", "a"],
    },
    LeagueConfig {
        league_code: "ligue1",
        sport_id: SPORT_FOOTBALL,
        coverage: CoverageTier::Major,
        aliases: &["ligue 1", "france", "french"],
    },
    LeagueConfig {
        league_code: "ucl",
        sport_id: SPORT_FOOTBALL,
        coverage: CoverageTier::Major,
        aliases: &["champions", "uefa champions"],
    },
    LeagueConfig {
        league_code: "uel",
        sport_id: SPORT_FOOTBALL,
        coverage: CoverageTier::Major,
        aliases: &["europa", "uefa europa"],
    },
    LeagueConfig {
        league_code: "mls",
        sport_id: SPORT_FOOTBALL,
        coverage: CoverageTier::Standard,
        aliases: &["mls", "major soccer"],
    },
    LeagueConfig {
        league_code: "eredivisie",
        sport_id: SPORT_FOOTBALL,
        coverage: CoverageTier::Standard,
        aliases: &["eredivisie", "dutch", "netherlands"],
    },
    LeagueConfig {
        league_code: "euroleague",
        sport_id: SPORT_BASKETBALL,
        coverage: CoverageTier::Major,
        aliases: &["euroleague"],
    },
    LeagueConfig {
        league_code: "nhl",
        sport_id: SPORT_ICE_HOCKEY,
        coverage: CoverageTier::Major,
        aliases: &["nhl", "national hockey"],
    },
];

/// Get league configuration by code.
pub fn get_league_config(league: &str) -> Option<&'static LeagueConfig> {
    LEAGUE_CONFIGS
        .iter()
        .find(|c| c.league_code.eq_ignore_ascii_case(league))
}

/// Coverage tier for a raw league name, via normalized-alias lookup.
/// Unknown leagues get `Standard` coverage.
pub fn coverage_for_league(league_name: &str) -> CoverageTier {
    let normalized = normalize_league_name(league_name);
    if normalized.is_empty() {
        return CoverageTier::Standard;
    }

    for config in LEAGUE_CONFIGS {
        if normalized == config.league_code {
            return config.coverage;
        }
        for alias in config.aliases {
            let hit = if alias.contains(' ') {
                normalized.contains(alias)
            } else {
                normalized.split_whitespace().any(|w| w == *alias)
            };
            if hit {
                return config.coverage;
            }
        }
    }

    CoverageTier::Standard
}

/// Get list of all league codes.
pub fn get_all_league_codes() -> Vec<&'static str> {
    LEAGUE_CONFIGS.iter().map(|c| c.league_code).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_league_config() {
        let epl = get_league_config("epl").unwrap();
        assert_eq!(epl.league_code, "epl");
        assert_eq!(epl.coverage, CoverageTier::Major);
    }

    #[test]
    fn test_case_insensitivity() {
        assert!(get_league_config("EPL").is_some());
        assert!(get_league_config("Epl").is_some());
    }

    #[test]
    fn test_missing_league() {
        assert!(get_league_config("nonexistent").is_none());
    }

    #[test]
    fn test_coverage_for_raw_names() {
        assert_eq!(
            coverage_for_league("English Premier League"),
            CoverageTier::Major
        );
        assert_eq!(
            coverage_for_league("UEFA Champions League"),
            CoverageTier::Major
        );
        assert_eq!(
            coverage_for_league("Regionalliga Nordost"),
            CoverageTier::Standard
        );
    }

    #[test]
    fn test_all_league_codes() {
        let codes = get_all_league_codes();
        assert!(codes.contains(&"epl"));
        assert!(codes.contains(&"nhl"));
    }
}
