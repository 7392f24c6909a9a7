//! Durable analysis storage, HTTP client construction and retry utilities.

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use kickoff_core::AnalysisRecord;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Mutex;

mod postgres;
mod retry;

pub use postgres::PgAnalysisStore;
pub use retry::{with_retry, BackoffPolicy};

pub const CRATE_NAME: &str = "kickoff-storage";

#[derive(Debug, Error)]
pub enum StoreError {
    /// Another writer (possibly another replica) already stored this match.
    #[error("analysis for match {match_id} already exists")]
    Duplicate { match_id: String },
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub fn is_duplicate(&self) -> bool {
        matches!(self, StoreError::Duplicate { .. })
    }
}

/// Exact-match criteria for [`AnalysisStore::filter`]. Unset fields match
/// everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnalysisFilter {
    /// Home or away team name.
    pub team: Option<String>,
    pub tournament: Option<String>,
    /// Lower bound on the match kickoff date; undated records never match.
    pub since: Option<DateTime<Utc>>,
}

impl AnalysisFilter {
    fn matches(&self, record: &AnalysisRecord) -> bool {
        let team = self.team.as_deref().is_none_or(|team| {
            record.home_team.name == team || record.away_team.name == team
        });
        let tournament = self
            .tournament
            .as_deref()
            .is_none_or(|name| record.tournament.name.as_deref() == Some(name));
        let since = self
            .since
            .is_none_or(|since| record.date.is_some_and(|date| date >= since));
        team && tournament && since
    }
}

/// Records created on one UTC calendar day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DailyCount {
    /// `YYYY-MM-DD`
    pub date: String,
    pub count: u64,
}

/// Keyed by canonical match id. Uniqueness is the store's job: `insert` on an
/// existing key returns [`StoreError::Duplicate`] and leaves the stored record
/// untouched.
#[async_trait]
pub trait AnalysisStore: Send + Sync {
    async fn exists(&self, match_id: &str) -> Result<bool, StoreError>;

    async fn insert(&self, record: &AnalysisRecord) -> Result<(), StoreError>;

    async fn get(&self, match_id: &str) -> Result<Option<AnalysisRecord>, StoreError>;

    /// Newest first.
    async fn list_recent(
        &self,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<AnalysisRecord>, StoreError>;

    async fn count(&self) -> Result<u64, StoreError>;

    async fn latest_created_at(&self) -> Result<Option<DateTime<Utc>>, StoreError>;

    /// Case-insensitive substring match on team names, tournament name and
    /// narrative summary. Newest first.
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<AnalysisRecord>, StoreError>;

    /// Newest first.
    async fn filter(
        &self,
        filter: &AnalysisFilter,
        limit: usize,
    ) -> Result<Vec<AnalysisRecord>, StoreError>;

    /// Per-day creation counts, most recent day first.
    async fn daily_counts(&self, days: usize) -> Result<Vec<DailyCount>, StoreError>;
}

/// Process-local store for tests and `--in-memory` runs.
#[derive(Debug, Default)]
pub struct MemoryAnalysisStore {
    records: Mutex<BTreeMap<String, AnalysisRecord>>,
}

impl MemoryAnalysisStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn match_ids(&self) -> Vec<String> {
        self.records.lock().await.keys().cloned().collect()
    }

    async fn newest_first(&self) -> Vec<AnalysisRecord> {
        let mut all = self.records.lock().await.values().cloned().collect::<Vec<_>>();
        all.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| a.match_id.cmp(&b.match_id))
        });
        all
    }
}

fn mentions(record: &AnalysisRecord, needle: &str) -> bool {
    [
        Some(record.home_team.name.as_str()),
        Some(record.away_team.name.as_str()),
        record.tournament.name.as_deref(),
        record.narrative.summary.as_deref(),
    ]
    .into_iter()
    .flatten()
    .any(|field| field.to_lowercase().contains(needle))
}

#[async_trait]
impl AnalysisStore for MemoryAnalysisStore {
    async fn exists(&self, match_id: &str) -> Result<bool, StoreError> {
        Ok(self.records.lock().await.contains_key(match_id))
    }

    async fn insert(&self, record: &AnalysisRecord) -> Result<(), StoreError> {
        let mut records = self.records.lock().await;
        if records.contains_key(&record.match_id) {
            return Err(StoreError::Duplicate {
                match_id: record.match_id.clone(),
            });
        }
        records.insert(record.match_id.clone(), record.clone());
        Ok(())
    }

    async fn get(&self, match_id: &str) -> Result<Option<AnalysisRecord>, StoreError> {
        Ok(self.records.lock().await.get(match_id).cloned())
    }

    async fn list_recent(
        &self,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<AnalysisRecord>, StoreError> {
        let all = self.newest_first().await;
        Ok(all.into_iter().skip(offset).take(limit).collect())
    }

    async fn count(&self) -> Result<u64, StoreError> {
        Ok(self.records.lock().await.len() as u64)
    }

    async fn latest_created_at(&self) -> Result<Option<DateTime<Utc>>, StoreError> {
        Ok(self.records.lock().await.values().map(|r| r.created_at).max())
    }

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<AnalysisRecord>, StoreError> {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return Ok(Vec::new());
        }
        let all = self.newest_first().await;
        Ok(all
            .into_iter()
            .filter(|record| mentions(record, &needle))
            .take(limit)
            .collect())
    }

    async fn filter(
        &self,
        filter: &AnalysisFilter,
        limit: usize,
    ) -> Result<Vec<AnalysisRecord>, StoreError> {
        let all = self.newest_first().await;
        Ok(all
            .into_iter()
            .filter(|record| filter.matches(record))
            .take(limit)
            .collect())
    }

    async fn daily_counts(&self, days: usize) -> Result<Vec<DailyCount>, StoreError> {
        let mut per_day = BTreeMap::<String, u64>::new();
        for record in self.records.lock().await.values() {
            *per_day
                .entry(record.created_at.format("%Y-%m-%d").to_string())
                .or_default() += 1;
        }
        Ok(per_day
            .into_iter()
            .rev()
            .take(days)
            .map(|(date, count)| DailyCount { date, count })
            .collect())
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(15),
            user_agent: None,
        }
    }
}

/// Every outbound call carries a request-level timeout so one stuck call
/// cannot stall a cycle indefinitely.
pub fn build_http_client(config: &HttpClientConfig) -> anyhow::Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder()
        .gzip(true)
        .brotli(true)
        .timeout(config.timeout);

    if let Some(user_agent) = &config.user_agent {
        builder = builder.user_agent(user_agent.clone());
    }

    builder.build().context("building reqwest client")
}
