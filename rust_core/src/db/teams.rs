//! Postgres implementation of `TeamStore`.
//!
//! Mapping invariants are enforced by the schema: a unique index on
//! (provider, provider_team_id) where the id is present, and a partial
//! unique index allowing one primary mapping per (team_id, provider).
//! Confidence updates go through GREATEST so they are raise-only even
//! under concurrent writers.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

use super::TeamStore;
use crate::models::{Provider, ProviderTeamMapping, TeamEntity};

pub struct PgTeamStore {
    pool: PgPool,
}

impl PgTeamStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn row_to_mapping(row: &PgRow) -> Result<ProviderTeamMapping> {
    let provider: String = row.try_get("provider")?;
    Ok(ProviderTeamMapping {
        team_id: row.try_get("team_id")?,
        provider: Provider::from_str(&provider)
            .ok_or_else(|| anyhow!("unknown provider '{}'", provider))?,
        provider_team_id: row.try_get("provider_team_id")?,
        provider_team_name: row.try_get("provider_team_name")?,
        confidence: row.try_get("confidence")?,
        is_primary: row.try_get("is_primary")?,
    })
}

fn row_to_team(row: &PgRow) -> Result<TeamEntity> {
    Ok(TeamEntity {
        id: row.try_get("id")?,
        sport_id: row.try_get("sport_id")?,
        league_id: row.try_get("league_id")?,
        name: row.try_get("name")?,
        mapping_confidence: row.try_get("mapping_confidence")?,
    })
}

const MAPPING_COLUMNS: &str =
    "team_id, provider, provider_team_id, provider_team_name, confidence, is_primary";
const TEAM_COLUMNS: &str = "id, sport_id, league_id, name, mapping_confidence";

#[async_trait]
impl TeamStore for PgTeamStore {
    async fn mapping_by_provider_id(
        &self,
        provider: Provider,
        provider_team_id: &str,
    ) -> Result<Option<ProviderTeamMapping>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM provider_team_mappings WHERE provider = $1 AND provider_team_id = $2",
            MAPPING_COLUMNS
        ))
        .bind(provider.as_str())
        .bind(provider_team_id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch mapping by provider id")?;

        row.as_ref().map(row_to_mapping).transpose()
    }

    async fn mapping_by_provider_name(
        &self,
        provider: Provider,
        provider_team_name: &str,
    ) -> Result<Option<ProviderTeamMapping>> {
        let row = sqlx::query(&format!(
            r#"
            SELECT {} FROM provider_team_mappings
            WHERE provider = $1 AND provider_team_name = $2
            ORDER BY confidence DESC
            LIMIT 1
            "#,
            MAPPING_COLUMNS
        ))
        .bind(provider.as_str())
        .bind(provider_team_name)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch mapping by provider name")?;

        row.as_ref().map(row_to_mapping).transpose()
    }

    async fn create_team(
        &self,
        team: &TeamEntity,
        mapping: &ProviderTeamMapping,
    ) -> Result<i64> {
        let mut tx = self.pool.begin().await.context("Failed to open transaction")?;

        let team_id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO team_entities (sport_id, league_id, name, mapping_confidence)
            VALUES ($1, $2, $3, $4)
            RETURNING id
            "#,
        )
        .bind(team.sport_id)
        .bind(team.league_id)
        .bind(&team.name)
        .bind(team.mapping_confidence)
        .fetch_one(&mut *tx)
        .await
        .context("Failed to insert team entity")?;

        sqlx::query(
            r#"
            INSERT INTO provider_team_mappings
                (team_id, provider, provider_team_id, provider_team_name, confidence, is_primary)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(team_id)
        .bind(mapping.provider.as_str())
        .bind(&mapping.provider_team_id)
        .bind(&mapping.provider_team_name)
        .bind(mapping.confidence)
        .bind(mapping.is_primary)
        .execute(&mut *tx)
        .await
        .context("Failed to insert provider mapping")?;

        tx.commit().await.context("Failed to commit team creation")?;
        Ok(team_id)
    }

    async fn add_mapping(&self, mapping: &ProviderTeamMapping) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO provider_team_mappings
                (team_id, provider, provider_team_id, provider_team_name, confidence, is_primary)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(mapping.team_id)
        .bind(mapping.provider.as_str())
        .bind(&mapping.provider_team_id)
        .bind(&mapping.provider_team_name)
        .bind(mapping.confidence)
        .bind(mapping.is_primary)
        .execute(&self.pool)
        .await
        .context("Failed to insert provider mapping")?;
        Ok(())
    }

    async fn teams_by_league(&self, sport_id: i32, league_id: i64) -> Result<Vec<TeamEntity>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM team_entities WHERE sport_id = $1 AND league_id = $2",
            TEAM_COLUMNS
        ))
        .bind(sport_id)
        .bind(league_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch teams by league")?;

        rows.iter().map(row_to_team).collect()
    }

    async fn teams_by_sport(&self, sport_id: i32) -> Result<Vec<TeamEntity>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM team_entities WHERE sport_id = $1",
            TEAM_COLUMNS
        ))
        .bind(sport_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch teams by sport")?;

        rows.iter().map(row_to_team).collect()
    }

    async fn raise_mapping_confidence(
        &self,
        team_id: i64,
        provider: Provider,
        provider_team_name: &str,
        confidence: f64,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE provider_team_mappings
            SET confidence = GREATEST(confidence, $4)
            WHERE team_id = $1 AND provider = $2 AND provider_team_name = $3
            "#,
        )
        .bind(team_id)
        .bind(provider.as_str())
        .bind(provider_team_name)
        .bind(confidence)
        .execute(&self.pool)
        .await
        .context("Failed to raise mapping confidence")?;
        Ok(())
    }
}
