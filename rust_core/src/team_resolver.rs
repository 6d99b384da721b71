//! Team identity resolution across providers.
//!
//! This module provides:
//! - `TeamResolver::resolve`, mapping a (provider, raw name/id) pair to a
//!   canonical team id with a confidence score
//! - The confidence ladder: exact provider-id/name mappings, then
//!   authoritative creation, then league- and sport-scoped fuzzy matching
//! - A bounded read-through cache over the KV tier; the persisted mapping
//!   table stays the source of truth
//!
//! Any resolver failure degrades gracefully: the caller proceeds with a
//! null team id and resolution is retried on a later pass.

use serde::{Deserialize, Serialize};
use std::hash::Hasher;
use tracing::{debug, warn};

use crate::cache::{keys, KeyValueCache, TEAM_RESOLUTION_TTL_SECS};
use crate::db::TeamStore;
use crate::errors::{EngineError, EngineResult};
use crate::models::{is_known_sport, Provider, ProviderTeamMapping, TeamEntity};
use crate::utils::normalize::{normalize_team_name, similarity};

/// Fuzzy threshold when candidates share the league.
pub const LEAGUE_FUZZY_THRESHOLD: f64 = 0.85;
/// Stricter threshold for same-sport candidates: cross-league fuzzy
/// matches are riskier, so bias precision.
pub const SPORT_FUZZY_THRESHOLD: f64 = 0.90;
/// Confidence for the normalized-name-equality fast path.
const NORMALIZED_EQUALITY_CONFIDENCE: f64 = 0.9;

/// Result of one resolution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolvedTeam {
    pub team_id: i64,
    pub confidence: f64,
    pub created: bool,
}

/// One resolution request.
#[derive(Debug, Clone)]
pub struct ResolveRequest<'a> {
    pub provider: Provider,
    pub raw_name: &'a str,
    pub raw_id: Option<&'a str>,
    pub sport_id: i32,
    pub league_id: Option<i64>,
}

pub struct TeamResolver<'a> {
    store: &'a dyn TeamStore,
    cache: &'a dyn KeyValueCache,
}

impl<'a> TeamResolver<'a> {
    pub fn new(store: &'a dyn TeamStore, cache: &'a dyn KeyValueCache) -> Self {
        Self { store, cache }
    }

    /// Resolve a provider team reference to a canonical team.
    pub async fn resolve(&self, req: &ResolveRequest<'_>) -> EngineResult<ResolvedTeam> {
        // Validation fails fast with no side effect.
        let raw_name = req.raw_name.trim();
        if raw_name.len() < 2 {
            return Err(EngineError::validation(format!(
                "team name too short: {:?}",
                req.raw_name
            )));
        }
        if !is_known_sport(req.sport_id) {
            return Err(EngineError::validation(format!(
                "unknown sport id {}",
                req.sport_id
            )));
        }

        let cache_key = keys::team_resolution(req.provider.as_str(), request_hash(raw_name, req.raw_id));
        if let Ok(Some(raw)) = self.cache.get(&cache_key).await {
            if let Ok(mut cached) = serde_json::from_str::<ResolvedTeam>(&raw) {
                cached.created = false;
                return Ok(cached);
            }
        }

        let resolved = self.resolve_uncached(req, raw_name).await?;

        if let Ok(payload) = serde_json::to_string(&resolved) {
            if let Err(e) = self
                .cache
                .put(&cache_key, &payload, TEAM_RESOLUTION_TTL_SECS)
                .await
            {
                debug!("team resolution cache write failed: {}", e);
            }
        }

        Ok(resolved)
    }

    /// Resolution with graceful degradation: any error leaves the caller
    /// with no team id, to retry on a later pass.
    pub async fn resolve_or_none(&self, req: &ResolveRequest<'_>) -> Option<ResolvedTeam> {
        match self.resolve(req).await {
            Ok(resolved) => Some(resolved),
            Err(e) => {
                warn!(
                    "team resolution failed for {} {:?}: {}",
                    req.provider.as_str(),
                    req.raw_name,
                    e
                );
                None
            }
        }
    }

    async fn resolve_uncached(
        &self,
        req: &ResolveRequest<'_>,
        raw_name: &str,
    ) -> EngineResult<ResolvedTeam> {
        // 1. Exact mapping by (provider, providerTeamId)
        if let Some(raw_id) = req.raw_id {
            if let Some(mapping) = self
                .store
                .mapping_by_provider_id(req.provider, raw_id)
                .await?
            {
                return Ok(self.refresh_existing(req, raw_name, true, &mapping).await?);
            }
        }

        // 2. Exact mapping by (provider, providerTeamName)
        if let Some(mapping) = self
            .store
            .mapping_by_provider_name(req.provider, raw_name)
            .await?
        {
            return Ok(self.refresh_existing(req, raw_name, false, &mapping).await?);
        }

        // 3. Authoritative provider creates with full confidence
        if req.provider.is_authoritative(req.sport_id) {
            let team_id = self.create_team(req, raw_name, 1.0, true).await?;
            return Ok(ResolvedTeam {
                team_id,
                confidence: 1.0,
                created: true,
            });
        }

        // 4. Fuzzy match: league scope first, then sport scope with a
        // stricter threshold
        let normalized = normalize_team_name(raw_name);
        let league_candidates = match req.league_id {
            Some(league_id) => self.store.teams_by_league(req.sport_id, league_id).await?,
            None => Vec::new(),
        };

        let mut found = best_candidate(&league_candidates, &normalized, LEAGUE_FUZZY_THRESHOLD);
        if found.is_none() {
            let sport_candidates = self.store.teams_by_sport(req.sport_id).await?;
            found = best_candidate(&sport_candidates, &normalized, SPORT_FUZZY_THRESHOLD);
        }

        if let Some(matched) = found {
            let confidence = if matched.normalized_equal {
                NORMALIZED_EQUALITY_CONFIDENCE
            } else {
                weighted_confidence(req.provider, req.sport_id, req.raw_id.is_some(), false, false)
                    * matched.similarity
            };
            let mapping = ProviderTeamMapping {
                team_id: matched.team_id,
                provider: req.provider,
                provider_team_id: req.raw_id.map(|s| s.to_string()),
                provider_team_name: raw_name.to_string(),
                confidence,
                is_primary: false,
            };
            self.store.add_mapping(&mapping).await?;
            debug!(
                "fuzzy-mapped {} {:?} -> team {} (sim {:.2}, confidence {:.2})",
                req.provider.as_str(),
                raw_name,
                matched.team_id,
                matched.similarity,
                confidence
            );
            return Ok(ResolvedTeam {
                team_id: matched.team_id,
                confidence,
                created: false,
            });
        }

        // 5. Create from the secondary provider
        let confidence =
            weighted_confidence(req.provider, req.sport_id, req.raw_id.is_some(), false, false);
        let team_id = self.create_team(req, raw_name, confidence, true).await?;
        Ok(ResolvedTeam {
            team_id,
            confidence,
            created: true,
        })
    }

    /// Re-resolution of an existing mapping: recompute the evidence score
    /// and raise the stored confidence if it improved. Never lowered.
    async fn refresh_existing(
        &self,
        req: &ResolveRequest<'_>,
        raw_name: &str,
        matched_by_id: bool,
        mapping: &ProviderTeamMapping,
    ) -> EngineResult<ResolvedTeam> {
        let exact_name = mapping.provider_team_name == raw_name;
        let normalized_name =
            normalize_team_name(&mapping.provider_team_name) == normalize_team_name(raw_name);
        let score = weighted_confidence(
            req.provider,
            req.sport_id,
            matched_by_id,
            exact_name,
            normalized_name,
        );

        if score > mapping.confidence {
            self.store
                .raise_mapping_confidence(
                    mapping.team_id,
                    mapping.provider,
                    &mapping.provider_team_name,
                    score,
                )
                .await?;
        }

        Ok(ResolvedTeam {
            team_id: mapping.team_id,
            confidence: score.max(mapping.confidence),
            created: false,
        })
    }

    async fn create_team(
        &self,
        req: &ResolveRequest<'_>,
        raw_name: &str,
        confidence: f64,
        is_primary: bool,
    ) -> EngineResult<i64> {
        let team = TeamEntity {
            id: 0,
            sport_id: req.sport_id,
            league_id: req.league_id,
            name: raw_name.to_string(),
            mapping_confidence: confidence,
        };
        let mapping = ProviderTeamMapping {
            team_id: 0,
            provider: req.provider,
            provider_team_id: req.raw_id.map(|s| s.to_string()),
            provider_team_name: raw_name.to_string(),
            confidence,
            is_primary,
        };
        Ok(self.store.create_team(&team, &mapping).await?)
    }
}

/// Weighted evidence score, provider trust bonus added then capped at 1.0.
fn weighted_confidence(
    provider: Provider,
    sport_id: i32,
    has_provider_id: bool,
    exact_name: bool,
    normalized_name: bool,
) -> f64 {
    let mut score = 0.0;
    if has_provider_id {
        score += 0.3;
    }
    if exact_name {
        score += 0.4;
    }
    if normalized_name {
        score += 0.2;
    }
    // Sport context always matched: candidates are scoped by sport
    score += 0.1;
    score += provider.trust_bonus(sport_id);
    score.min(1.0)
}

struct CandidateMatch {
    team_id: i64,
    similarity: f64,
    normalized_equal: bool,
}

fn best_candidate(
    candidates: &[TeamEntity],
    normalized_name: &str,
    threshold: f64,
) -> Option<CandidateMatch> {
    if normalized_name.is_empty() {
        return None;
    }

    let mut best: Option<CandidateMatch> = None;
    for candidate in candidates {
        let candidate_normalized = normalize_team_name(&candidate.name);
        if candidate_normalized == normalized_name {
            return Some(CandidateMatch {
                team_id: candidate.id,
                similarity: 1.0,
                normalized_equal: true,
            });
        }
        let sim = similarity(normalized_name, &candidate_normalized);
        if sim >= threshold && best.as_ref().map(|b| sim > b.similarity).unwrap_or(true) {
            best = Some(CandidateMatch {
                team_id: candidate.id,
                similarity: sim,
                normalized_equal: false,
            });
        }
    }
    best
}

fn request_hash(raw_name: &str, raw_id: Option<&str>) -> u64 {
    let mut hasher = rustc_hash::FxHasher::default();
    hasher.write(raw_name.as_bytes());
    hasher.write(b"\0");
    if let Some(id) = raw_id {
        hasher.write(id.as_bytes());
    }
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::memory::InMemoryCache;
    use crate::models::{SPORT_FOOTBALL, SPORT_TENNIS};
    use anyhow::Result;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    /// In-memory TeamStore double mirroring the Postgres semantics.
    #[derive(Default)]
    struct MemTeamStore {
        teams: Mutex<Vec<TeamEntity>>,
        mappings: Mutex<Vec<ProviderTeamMapping>>,
    }

    #[async_trait]
    impl TeamStore for MemTeamStore {
        async fn mapping_by_provider_id(
            &self,
            provider: Provider,
            provider_team_id: &str,
        ) -> Result<Option<ProviderTeamMapping>> {
            Ok(self
                .mappings
                .lock()
                .iter()
                .find(|m| {
                    m.provider == provider
                        && m.provider_team_id.as_deref() == Some(provider_team_id)
                })
                .cloned())
        }

        async fn mapping_by_provider_name(
            &self,
            provider: Provider,
            provider_team_name: &str,
        ) -> Result<Option<ProviderTeamMapping>> {
            Ok(self
                .mappings
                .lock()
                .iter()
                .find(|m| m.provider == provider && m.provider_team_name == provider_team_name)
                .cloned())
        }

        async fn create_team(
            &self,
            team: &TeamEntity,
            mapping: &ProviderTeamMapping,
        ) -> Result<i64> {
            let mut teams = self.teams.lock();
            let id = teams.len() as i64 + 1;
            let mut team = team.clone();
            team.id = id;
            teams.push(team);

            let mut mapping = mapping.clone();
            mapping.team_id = id;
            self.mappings.lock().push(mapping);
            Ok(id)
        }

        async fn add_mapping(&self, mapping: &ProviderTeamMapping) -> Result<()> {
            self.mappings.lock().push(mapping.clone());
            Ok(())
        }

        async fn teams_by_league(&self, sport_id: i32, league_id: i64) -> Result<Vec<TeamEntity>> {
            Ok(self
                .teams
                .lock()
                .iter()
                .filter(|t| t.sport_id == sport_id && t.league_id == Some(league_id))
                .cloned()
                .collect())
        }

        async fn teams_by_sport(&self, sport_id: i32) -> Result<Vec<TeamEntity>> {
            Ok(self
                .teams
                .lock()
                .iter()
                .filter(|t| t.sport_id == sport_id)
                .cloned()
                .collect())
        }

        async fn raise_mapping_confidence(
            &self,
            team_id: i64,
            provider: Provider,
            provider_team_name: &str,
            confidence: f64,
        ) -> Result<()> {
            for m in self.mappings.lock().iter_mut() {
                if m.team_id == team_id
                    && m.provider == provider
                    && m.provider_team_name == provider_team_name
                    && confidence > m.confidence
                {
                    m.confidence = confidence;
                }
            }
            Ok(())
        }
    }

    fn request<'a>(provider: Provider, name: &'a str, id: Option<&'a str>) -> ResolveRequest<'a> {
        ResolveRequest {
            provider,
            raw_name: name,
            raw_id: id,
            sport_id: SPORT_FOOTBALL,
            league_id: Some(8),
        }
    }

    #[tokio::test]
    async fn test_validation_rejects_short_name_and_bad_sport() {
        let store = MemTeamStore::default();
        let cache = InMemoryCache::new();
        let resolver = TeamResolver::new(&store, &cache);

        let err = resolver
            .resolve(&request(Provider::Sportmonks, "A", None))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));

        let mut req = request(Provider::Sportmonks, "Arsenal", None);
        req.sport_id = 999;
        let err = resolver.resolve(&req).await.unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));

        // No side effect
        assert!(store.teams.lock().is_empty());
    }

    #[tokio::test]
    async fn test_authoritative_creates_with_full_confidence() {
        let store = MemTeamStore::default();
        let cache = InMemoryCache::new();
        let resolver = TeamResolver::new(&store, &cache);

        let resolved = resolver
            .resolve(&request(Provider::Sportmonks, "Manchester United", Some("sm-14")))
            .await
            .unwrap();

        assert!(resolved.created);
        assert_eq!(resolved.confidence, 1.0);
        let mappings = store.mappings.lock();
        assert!(mappings[0].is_primary);
    }

    #[tokio::test]
    async fn test_short_form_resolves_to_existing_team() {
        let store = MemTeamStore::default();
        let cache = InMemoryCache::new();
        let resolver = TeamResolver::new(&store, &cache);

        let created = resolver
            .resolve(&request(Provider::Sportmonks, "Manchester United", Some("sm-14")))
            .await
            .unwrap();

        // Secondary provider shows up later with the short form
        let resolved = resolver
            .resolve(&request(Provider::Betsapi, "Man Utd", None))
            .await
            .unwrap();

        assert!(!resolved.created);
        assert_eq!(resolved.team_id, created.team_id);
        assert!(resolved.confidence >= 0.85);
    }

    #[tokio::test]
    async fn test_secondary_creation_confidence_in_bounds() {
        let store = MemTeamStore::default();
        let cache = InMemoryCache::new();
        let resolver = TeamResolver::new(&store, &cache);

        let resolved = resolver
            .resolve(&request(Provider::Betsapi, "FC Midtjylland", Some("b-77")))
            .await
            .unwrap();

        assert!(resolved.created);
        assert!(resolved.confidence > 0.0 && resolved.confidence <= 1.0);
        // id (0.3) + sport (0.1) + secondary trust (0.2)
        assert!((resolved.confidence - 0.6).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_existing_mapping_confidence_is_raise_only() {
        let store = MemTeamStore::default();
        store.teams.lock().push(TeamEntity {
            id: 1,
            sport_id: SPORT_FOOTBALL,
            league_id: Some(8),
            name: "Arsenal".to_string(),
            mapping_confidence: 1.0,
        });
        store.mappings.lock().push(ProviderTeamMapping {
            team_id: 1,
            provider: Provider::Betsapi,
            provider_team_id: Some("b-1".to_string()),
            provider_team_name: "Arsenal".to_string(),
            confidence: 0.4,
            is_primary: false,
        });

        let cache = InMemoryCache::new();
        let resolver = TeamResolver::new(&store, &cache);

        // Strong evidence: id + exact name + normalized + sport + trust
        let resolved = resolver
            .resolve(&request(Provider::Betsapi, "Arsenal", Some("b-1")))
            .await
            .unwrap();
        assert!(resolved.confidence > 0.4);
        assert!(store.mappings.lock()[0].confidence > 0.4);

        // A later, weaker resolution must not lower it
        let raised = store.mappings.lock()[0].confidence;
        cache.expire_now(&keys::team_resolution(
            "betsapi",
            request_hash("Arsenal", None),
        ));
        let again = resolver
            .resolve(&request(Provider::Betsapi, "Arsenal", None))
            .await
            .unwrap();
        assert!(again.confidence >= raised - 1e-9);
        assert!(store.mappings.lock()[0].confidence >= raised);
    }

    #[tokio::test]
    async fn test_fuzzy_league_scope_beats_sport_scope() {
        let store = MemTeamStore::default();
        store.teams.lock().push(TeamEntity {
            id: 1,
            sport_id: SPORT_FOOTBALL,
            league_id: Some(8),
            name: "Borussia Dortmund".to_string(),
            mapping_confidence: 1.0,
        });

        let cache = InMemoryCache::new();
        let resolver = TeamResolver::new(&store, &cache);

        // Misspelled name from a secondary provider, same league
        let resolved = resolver
            .resolve(&request(Provider::Flashlive, "Borussia Dortmond", None))
            .await
            .unwrap();

        assert!(!resolved.created);
        assert_eq!(resolved.team_id, 1);
        assert!(resolved.confidence > 0.0 && resolved.confidence <= 1.0);
    }

    #[tokio::test]
    async fn test_normalized_equality_fast_path() {
        let store = MemTeamStore::default();
        store.teams.lock().push(TeamEntity {
            id: 3,
            sport_id: SPORT_FOOTBALL,
            league_id: Some(8),
            name: "Tottenham Hotspur".to_string(),
            mapping_confidence: 1.0,
        });

        let cache = InMemoryCache::new();
        let resolver = TeamResolver::new(&store, &cache);

        let resolved = resolver
            .resolve(&request(Provider::Betsapi, "Tottenham", None))
            .await
            .unwrap();

        assert_eq!(resolved.team_id, 3);
        assert!((resolved.confidence - 0.9).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_cache_hit_skips_store() {
        let store = MemTeamStore::default();
        let cache = InMemoryCache::new();
        let resolver = TeamResolver::new(&store, &cache);

        let first = resolver
            .resolve(&request(Provider::Sportmonks, "Arsenal", Some("sm-1")))
            .await
            .unwrap();
        assert!(first.created);

        // Second resolution hits the cache; created is not replayed
        let second = resolver
            .resolve(&request(Provider::Sportmonks, "Arsenal", Some("sm-1")))
            .await
            .unwrap();
        assert!(!second.created);
        assert_eq!(second.team_id, first.team_id);
        assert_eq!(store.teams.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_tennis_authority_differs() {
        let store = MemTeamStore::default();
        let cache = InMemoryCache::new();
        let resolver = TeamResolver::new(&store, &cache);

        let mut req = request(Provider::Betsapi, "Carlos Alcaraz", Some("p-1"));
        req.sport_id = SPORT_TENNIS;
        req.league_id = None;

        let resolved = resolver.resolve(&req).await.unwrap();
        assert!(resolved.created);
        assert_eq!(resolved.confidence, 1.0);
    }
}
