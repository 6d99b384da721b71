//! Postgres implementation of `MatchStore`.
//!
//! Writes are idempotent upserts keyed by `identity_key`; `last_updated`
//! can only move forward at the database level, so a replayed pass never
//! regresses a record.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::debug;

use super::retry::execute_with_retry;
use super::MatchStore;
use crate::models::{CanonicalMatch, MatchStatus};

pub struct PgMatchStore {
    pool: PgPool,
}

impl PgMatchStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn row_to_match(row: &PgRow) -> Result<CanonicalMatch> {
    let providers: serde_json::Value = row.try_get("providers")?;
    let status: String = row.try_get("status")?;
    Ok(CanonicalMatch {
        id: row.try_get("id")?,
        identity_key: row.try_get("identity_key")?,
        providers: serde_json::from_value(providers).context("bad providers column")?,
        sport_id: row.try_get("sport_id")?,
        league_id: row.try_get("league_id")?,
        league_name: row.try_get("league_name")?,
        home_team_id: row.try_get("home_team_id")?,
        away_team_id: row.try_get("away_team_id")?,
        home_team_name: row.try_get("home_team_name")?,
        away_team_name: row.try_get("away_team_name")?,
        scheduled_time: row.try_get("scheduled_time")?,
        status: MatchStatus::from_str(&status)
            .ok_or_else(|| anyhow!("unknown match status '{}'", status))?,
        home_score: row.try_get("home_score")?,
        away_score: row.try_get("away_score")?,
        match_clock: row.try_get("match_clock")?,
        period: row.try_get("period")?,
        has_open_markets: row.try_get("has_open_markets")?,
        last_updated: row.try_get("last_updated")?,
    })
}

const MATCH_COLUMNS: &str = "id, identity_key, providers, sport_id, league_id, league_name, \
     home_team_id, away_team_id, home_team_name, away_team_name, scheduled_time, status, \
     home_score, away_score, match_clock, period, has_open_markets, last_updated";

#[async_trait]
impl MatchStore for PgMatchStore {
    async fn get_by_identity(&self, identity_key: &str) -> Result<Option<CanonicalMatch>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM canonical_matches WHERE identity_key = $1",
            MATCH_COLUMNS
        ))
        .bind(identity_key)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch match by identity")?;

        row.as_ref().map(row_to_match).transpose()
    }

    async fn upsert(&self, record: &CanonicalMatch) -> Result<i64> {
        let providers = serde_json::to_value(&record.providers)?;

        execute_with_retry(
            || {
                let providers = providers.clone();
                async move {
                    let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO canonical_matches (
                identity_key, providers, sport_id, league_id, league_name,
                home_team_id, away_team_id, home_team_name, away_team_name,
                scheduled_time, status, home_score, away_score, match_clock,
                period, has_open_markets, last_updated
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
            ON CONFLICT (identity_key) DO UPDATE SET
                providers = EXCLUDED.providers,
                league_id = COALESCE(EXCLUDED.league_id, canonical_matches.league_id),
                league_name = EXCLUDED.league_name,
                home_team_id = COALESCE(EXCLUDED.home_team_id, canonical_matches.home_team_id),
                away_team_id = COALESCE(EXCLUDED.away_team_id, canonical_matches.away_team_id),
                home_team_name = EXCLUDED.home_team_name,
                away_team_name = EXCLUDED.away_team_name,
                scheduled_time = COALESCE(EXCLUDED.scheduled_time, canonical_matches.scheduled_time),
                status = EXCLUDED.status,
                home_score = EXCLUDED.home_score,
                away_score = EXCLUDED.away_score,
                match_clock = EXCLUDED.match_clock,
                period = EXCLUDED.period,
                has_open_markets = EXCLUDED.has_open_markets,
                last_updated = GREATEST(canonical_matches.last_updated, EXCLUDED.last_updated)
            RETURNING id
            "#,
        )
                    .bind(&record.identity_key)
                    .bind(providers)
                    .bind(record.sport_id)
                    .bind(record.league_id)
                    .bind(&record.league_name)
                    .bind(record.home_team_id)
                    .bind(record.away_team_id)
                    .bind(&record.home_team_name)
                    .bind(&record.away_team_name)
                    .bind(record.scheduled_time)
                    .bind(record.status.as_str())
                    .bind(record.home_score)
                    .bind(record.away_score)
                    .bind(&record.match_clock)
                    .bind(record.period)
                    .bind(record.has_open_markets)
                    .bind(record.last_updated)
                    .fetch_one(&self.pool)
                    .await
                    .context("Failed to upsert canonical match")?;
                    Ok(id)
                }
            },
            3,
        )
        .await
    }

    async fn list_non_terminal(&self, sport_id: Option<i32>) -> Result<Vec<CanonicalMatch>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {} FROM canonical_matches
            WHERE status NOT IN ('finished', 'soft_finished', 'cancelled')
              AND ($1::int IS NULL OR sport_id = $1)
            ORDER BY scheduled_time NULLS LAST
            "#,
            MATCH_COLUMNS
        ))
        .bind(sport_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list non-terminal matches")?;

        rows.iter().map(row_to_match).collect()
    }

    async fn set_status(&self, id: i64, status: MatchStatus, reason: &str) -> Result<()> {
        debug!("match {}: status -> {} ({})", id, status.as_str(), reason);
        sqlx::query(
            r#"
            UPDATE canonical_matches
            SET status = $2,
                status_reason = $3,
                last_updated = GREATEST(last_updated, NOW())
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(status.as_str())
        .bind(reason)
        .execute(&self.pool)
        .await
        .context("Failed to update match status")?;
        Ok(())
    }

    async fn set_team_ids(
        &self,
        id: i64,
        home_team_id: Option<i64>,
        away_team_id: Option<i64>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE canonical_matches
            SET home_team_id = COALESCE($2, home_team_id),
                away_team_id = COALESCE($3, away_team_id)
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(home_team_id)
        .bind(away_team_id)
        .execute(&self.pool)
        .await
        .context("Failed to update match team ids")?;
        Ok(())
    }
}
