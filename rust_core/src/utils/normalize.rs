//! Team and league name canonicalization.
//!
//! This module provides:
//! - `normalize_team_name` / `normalize_league_name`, the pure functions
//!   every identity decision in the engine is built on
//! - `similarity`, the normalized Levenshtein ratio used for fuzzy team
//!   resolution
//!
//! Providers disagree on spelling, club-type suffixes and betting-market
//! annotations; two names that normalize equal are treated as the same
//! identity everywhere downstream.

use regex::Regex;
use std::collections::HashMap;
use std::sync::OnceLock;

/// Club-type tokens that carry no identity information.
const CLUB_TOKENS: &[&str] = &[
    "fc", "ac", "cf", "sc", "club", "united", "utd", "city", "town", "athletic",
    "wanderers", "rovers", "hotspur", "albion", "villa", "villans",
];

/// Generic league-type tokens stripped from league names.
const LEAGUE_TOKENS: &[&str] = &[
    "league", "division", "championship", "premier", "bundesliga", "serie",
];

static PAREN_RE: OnceLock<Regex> = OnceLock::new();
static AGE_GROUP_RE: OnceLock<Regex> = OnceLock::new();

fn paren_re() -> &'static Regex {
    // Betting-market annotations like "(Esports)" or "(W)"
    PAREN_RE.get_or_init(|| Regex::new(r"\([^)]*\)").expect("valid regex"))
}

fn age_group_re() -> &'static Regex {
    // Runs after `clean`, so "U-21" has already become "u 21"
    AGE_GROUP_RE.get_or_init(|| Regex::new(r"\bu ?(1[4-9]|2[0-3])s?\b").expect("valid regex"))
}

/// Known short forms mapped to the full name before token stripping.
fn short_forms() -> &'static HashMap<&'static str, &'static str> {
    static SHORT_FORMS: OnceLock<HashMap<&'static str, &'static str>> = OnceLock::new();
    SHORT_FORMS.get_or_init(|| {
        let mut map = HashMap::new();
        map.insert("man utd", "manchester united");
        map.insert("man united", "manchester united");
        map.insert("man city", "manchester city");
        map.insert("spurs", "tottenham hotspur");
        map.insert("wolves", "wolverhampton wanderers");
        map.insert("psg", "paris saint germain");
        map.insert("barca", "barcelona");
        map.insert("atleti", "atletico madrid");
        map.insert("inter", "inter milan");
        map.insert("newcastle utd", "newcastle united");
        map.insert("sheff utd", "sheffield united");
        map.insert("nottm forest", "nottingham forest");
        map
    })
}

/// Lowercase, drop everything non-alphanumeric, collapse whitespace.
fn clean(s: &str) -> String {
    s.to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Canonicalize a provider team name for identity comparison.
pub fn normalize_team_name(name: &str) -> String {
    let no_parens = paren_re().replace_all(name, " ");
    let cleaned = clean(&no_parens);
    if cleaned.is_empty() {
        return cleaned;
    }

    let expanded = match short_forms().get(cleaned.as_str()) {
        Some(full) => (*full).to_string(),
        None => cleaned,
    };

    let no_age = clean(&age_group_re().replace_all(&expanded, " "));

    let stripped = no_age
        .split_whitespace()
        .filter(|token| !CLUB_TOKENS.contains(token))
        .collect::<Vec<_>>()
        .join(" ");

    // A name made only of club tokens ("City", "United") keeps its
    // pre-strip form rather than collapsing to nothing.
    if stripped.is_empty() {
        no_age
    } else {
        stripped
    }
}

/// Canonicalize a provider league name.
pub fn normalize_league_name(name: &str) -> String {
    let cleaned = clean(name);
    if cleaned.is_empty() {
        return cleaned;
    }

    // "la liga" is two tokens; drop the phrase before token filtering.
    let without_phrases = cleaned.replace("la liga", " ");

    let stripped = without_phrases
        .split_whitespace()
        .filter(|token| !LEAGUE_TOKENS.contains(token))
        .collect::<Vec<_>>()
        .join(" ");

    if stripped.is_empty() {
        cleaned
    } else {
        stripped
    }
}

/// Normalized Levenshtein similarity: `1 - distance / max(len)`.
/// Symmetric and reflexive; 0 when exactly one side is empty.
pub fn similarity(a: &str, b: &str) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    strsim::normalized_levenshtein(a, b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strips_club_tokens() {
        assert_eq!(normalize_team_name("Arsenal FC"), "arsenal");
        assert_eq!(normalize_team_name("AC Milan"), "milan");
        assert_eq!(normalize_team_name("Tottenham Hotspur"), "tottenham");
        assert_eq!(normalize_team_name("West Ham United"), "west ham");
        assert_eq!(normalize_team_name("Wolverhampton Wanderers"), "wolverhampton");
    }

    #[test]
    fn test_strips_parenthesized_annotations() {
        assert_eq!(normalize_team_name("Arsenal (Esports)"), "arsenal");
        assert_eq!(normalize_team_name("Chelsea FC (W)"), "chelsea");
    }

    #[test]
    fn test_strips_age_groups() {
        assert_eq!(
            normalize_team_name("Borussia Dortmund U19"),
            "borussia dortmund"
        );
        assert_eq!(normalize_team_name("Ajax U-21"), "ajax");
    }

    #[test]
    fn test_short_forms_align_with_full_names() {
        assert_eq!(
            normalize_team_name("Man Utd"),
            normalize_team_name("Manchester United")
        );
        assert_eq!(
            normalize_team_name("Spurs"),
            normalize_team_name("Tottenham Hotspur")
        );
        assert_eq!(
            normalize_team_name("Wolves"),
            normalize_team_name("Wolverhampton Wanderers")
        );
    }

    #[test]
    fn test_club_token_only_name_survives() {
        // "City" alone must not normalize to the empty string
        assert_eq!(normalize_team_name("City"), "city");
        assert_eq!(normalize_team_name("United"), "united");
    }

    #[test]
    fn test_punctuation_and_case() {
        assert_eq!(normalize_team_name("St. Pauli"), "st pauli");
        assert_eq!(
            normalize_team_name("PARIS SAINT-GERMAIN"),
            "paris saint germain"
        );
    }

    #[test]
    fn test_league_normalization() {
        assert_eq!(normalize_league_name("English Premier League"), "english");
        assert_eq!(normalize_league_name("La Liga"), "la liga");
        assert_eq!(normalize_league_name("Serie A"), "a");
        assert_eq!(normalize_league_name("2. Bundesliga"), "2");
    }

    #[test]
    fn test_similarity_bounds() {
        assert_eq!(similarity("arsenal", "arsenal"), 1.0);
        assert_eq!(similarity("", ""), 1.0);
        assert_eq!(similarity("arsenal", ""), 0.0);
        assert_eq!(similarity("", "arsenal"), 0.0);

        let s = similarity("arsenal", "arsnal");
        assert!(s > 0.8 && s < 1.0);
    }

    #[test]
    fn test_similarity_is_symmetric() {
        let ab = similarity("borussia dortmund", "borussia dortmond");
        let ba = similarity("borussia dortmond", "borussia dortmund");
        assert!((ab - ba).abs() < f64::EPSILON);
    }
}
