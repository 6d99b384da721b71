//! Persistence seams and Postgres implementations.
//!
//! The engine consumes the `MatchStore` / `TeamStore` traits; schema
//! management belongs to the external store. All writes are idempotent
//! upserts keyed by canonical identity so a retried or resumed pass never
//! creates duplicates.

pub mod matches;
pub mod pool;
pub mod retry;
pub mod teams;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{CanonicalMatch, MatchStatus, Provider, ProviderTeamMapping, TeamEntity};

/// Canonical match persistence, upsert-by-identity semantics.
#[async_trait]
pub trait MatchStore: Send + Sync {
    async fn get_by_identity(&self, identity_key: &str) -> Result<Option<CanonicalMatch>>;

    /// Insert or update by identity key; returns the store-assigned id.
    async fn upsert(&self, record: &CanonicalMatch) -> Result<i64>;

    /// All non-terminal records, optionally restricted to one sport.
    async fn list_non_terminal(&self, sport_id: Option<i32>) -> Result<Vec<CanonicalMatch>>;

    /// Status write with an audit reason. Records are retired by status,
    /// never hard-deleted.
    async fn set_status(&self, id: i64, status: MatchStatus, reason: &str) -> Result<()>;

    async fn set_team_ids(
        &self,
        id: i64,
        home_team_id: Option<i64>,
        away_team_id: Option<i64>,
    ) -> Result<()>;
}

/// Canonical team and provider-mapping persistence.
#[async_trait]
pub trait TeamStore: Send + Sync {
    async fn mapping_by_provider_id(
        &self,
        provider: Provider,
        provider_team_id: &str,
    ) -> Result<Option<ProviderTeamMapping>>;

    async fn mapping_by_provider_name(
        &self,
        provider: Provider,
        provider_team_name: &str,
    ) -> Result<Option<ProviderTeamMapping>>;

    /// Create a team together with its first mapping; returns the team id.
    async fn create_team(
        &self,
        team: &TeamEntity,
        mapping: &ProviderTeamMapping,
    ) -> Result<i64>;

    async fn add_mapping(&self, mapping: &ProviderTeamMapping) -> Result<()>;

    async fn teams_by_league(&self, sport_id: i32, league_id: i64) -> Result<Vec<TeamEntity>>;

    async fn teams_by_sport(&self, sport_id: i32) -> Result<Vec<TeamEntity>>;

    /// Raise-only confidence update for an existing mapping.
    async fn raise_mapping_confidence(
        &self,
        team_id: i64,
        provider: Provider,
        provider_team_name: &str,
        confidence: f64,
    ) -> Result<()>;
}
