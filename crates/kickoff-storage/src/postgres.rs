use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use kickoff_core::{
    AnalysisNarrative, AnalysisRecord, Score, TeamRef, TournamentRef,
};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::Row;
use tracing::info;

use crate::{AnalysisFilter, AnalysisStore, DailyCount, StoreError};

const SELECT_COLUMNS: &str = r#"
    match_id, home_team, away_team, score_home, score_away, tournament,
    venue, match_date, status, narrative, generator_model,
    processing_time_ms, created_at
"#;

/// Postgres-backed store. The `match_id` primary key is the only
/// serialization point between concurrent pipeline replicas.
#[derive(Debug, Clone)]
pub struct PgAnalysisStore {
    pool: PgPool,
}

impl PgAnalysisStore {
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .context("connecting to analysis database")?;
        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .context("applying analysis migrations")?;
        info!("analysis schema is up to date");
        Ok(())
    }
}

/// `%needle%` for ILIKE with the pattern metacharacters escaped.
fn contains_pattern(needle: &str) -> String {
    let mut pattern = String::with_capacity(needle.len() + 2);
    pattern.push('%');
    for ch in needle.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(ch);
    }
    pattern.push('%');
    pattern
}

fn sql_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

fn records(rows: &[PgRow]) -> Result<Vec<AnalysisRecord>, StoreError> {
    Ok(rows
        .iter()
        .map(record_from_row)
        .collect::<Result<Vec<_>, _>>()?)
}

fn record_from_row(row: &PgRow) -> Result<AnalysisRecord, sqlx::Error> {
    let Json(home_team): Json<TeamRef> = row.try_get("home_team")?;
    let Json(away_team): Json<TeamRef> = row.try_get("away_team")?;
    let Json(tournament): Json<TournamentRef> = row.try_get("tournament")?;
    let Json(narrative): Json<AnalysisNarrative> = row.try_get("narrative")?;
    Ok(AnalysisRecord {
        match_id: row.try_get("match_id")?,
        home_team,
        away_team,
        score: Score {
            home: row.try_get("score_home")?,
            away: row.try_get("score_away")?,
        },
        tournament,
        venue: row.try_get("venue")?,
        date: row.try_get("match_date")?,
        status: row.try_get("status")?,
        narrative,
        generator_model: row.try_get("generator_model")?,
        processing_time_ms: row.try_get("processing_time_ms")?,
        created_at: row.try_get("created_at")?,
    })
}

#[async_trait]
impl AnalysisStore for PgAnalysisStore {
    async fn exists(&self, match_id: &str) -> Result<bool, StoreError> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM match_analyses WHERE match_id = $1)",
        )
        .bind(match_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn insert(&self, record: &AnalysisRecord) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO match_analyses (
                match_id, home_team, away_team, score_home, score_away, tournament,
                venue, match_date, status, narrative, generator_model,
                processing_time_ms, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT (match_id) DO NOTHING
            "#,
        )
        .bind(&record.match_id)
        .bind(Json(&record.home_team))
        .bind(Json(&record.away_team))
        .bind(record.score.home)
        .bind(record.score.away)
        .bind(Json(&record.tournament))
        .bind(&record.venue)
        .bind(record.date)
        .bind(&record.status)
        .bind(Json(&record.narrative))
        .bind(&record.generator_model)
        .bind(record.processing_time_ms)
        .bind(record.created_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Duplicate {
                match_id: record.match_id.clone(),
            });
        }
        Ok(())
    }

    async fn get(&self, match_id: &str) -> Result<Option<AnalysisRecord>, StoreError> {
        let sql = format!("SELECT {SELECT_COLUMNS} FROM match_analyses WHERE match_id = $1");
        let row = sqlx::query(&sql)
            .bind(match_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(record_from_row).transpose()?)
    }

    async fn list_recent(
        &self,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<AnalysisRecord>, StoreError> {
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM match_analyses \
             ORDER BY created_at DESC, match_id LIMIT $1 OFFSET $2"
        );
        let rows = sqlx::query(&sql)
            .bind(sql_limit(limit))
            .bind(sql_limit(offset))
            .fetch_all(&self.pool)
            .await?;
        records(&rows)
    }

    async fn count(&self) -> Result<u64, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM match_analyses")
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as u64)
    }

    async fn latest_created_at(&self) -> Result<Option<DateTime<Utc>>, StoreError> {
        let latest: Option<DateTime<Utc>> =
            sqlx::query_scalar("SELECT MAX(created_at) FROM match_analyses")
                .fetch_one(&self.pool)
                .await?;
        Ok(latest)
    }

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<AnalysisRecord>, StoreError> {
        let needle = query.trim();
        if needle.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM match_analyses \
             WHERE home_team->>'name' ILIKE $1 \
                OR away_team->>'name' ILIKE $1 \
                OR tournament->>'name' ILIKE $1 \
                OR narrative->>'summary' ILIKE $1 \
             ORDER BY created_at DESC, match_id LIMIT $2"
        );
        let rows = sqlx::query(&sql)
            .bind(contains_pattern(needle))
            .bind(sql_limit(limit))
            .fetch_all(&self.pool)
            .await?;
        records(&rows)
    }

    async fn filter(
        &self,
        filter: &AnalysisFilter,
        limit: usize,
    ) -> Result<Vec<AnalysisRecord>, StoreError> {
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM match_analyses \
             WHERE ($1::text IS NULL OR home_team->>'name' = $1 OR away_team->>'name' = $1) \
               AND ($2::text IS NULL OR tournament->>'name' = $2) \
               AND ($3::timestamptz IS NULL OR match_date >= $3) \
             ORDER BY created_at DESC, match_id LIMIT $4"
        );
        let rows = sqlx::query(&sql)
            .bind(filter.team.as_deref())
            .bind(filter.tournament.as_deref())
            .bind(filter.since)
            .bind(sql_limit(limit))
            .fetch_all(&self.pool)
            .await?;
        records(&rows)
    }

    async fn daily_counts(&self, days: usize) -> Result<Vec<DailyCount>, StoreError> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            r#"
            SELECT to_char(created_at AT TIME ZONE 'UTC', 'YYYY-MM-DD') AS day, COUNT(*)
            FROM match_analyses
            GROUP BY day
            ORDER BY day DESC
            LIMIT $1
            "#,
        )
        .bind(sql_limit(days))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(date, count)| DailyCount {
                date,
                count: count.max(0) as u64,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_pattern_escapes_like_metacharacters() {
        assert_eq!(contains_pattern("ahly"), "%ahly%");
        assert_eq!(contains_pattern("100%_fit"), "%100\\%\\_fit%");
        assert_eq!(contains_pattern("a\\b"), "%a\\\\b%");
    }
}
