use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Counters owned by one pipeline instance; reset on process start.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunStats {
    pub total_checks: u64,
    pub matches_analyzed: u64,
    pub errors: u64,
    pub last_check: Option<DateTime<Utc>>,
    pub last_analysis: Option<DateTime<Utc>>,
}

/// Read-only view served by the stats endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
    pub total_checks: u64,
    pub matches_analyzed: u64,
    pub errors: u64,
    pub last_check: Option<DateTime<Utc>>,
    pub last_analysis: Option<DateTime<Utc>>,
    pub is_running: bool,
    pub enabled: bool,
    pub interval_minutes: u64,
}

impl StatsSnapshot {
    pub fn from_stats(stats: &RunStats, is_running: bool, enabled: bool, interval_minutes: u64) -> Self {
        Self {
            total_checks: stats.total_checks,
            matches_analyzed: stats.matches_analyzed,
            errors: stats.errors,
            last_check: stats.last_check,
            last_analysis: stats.last_analysis,
            is_running,
            enabled,
            interval_minutes,
        }
    }

    /// Snapshot reported when no pipeline could be built.
    pub fn disabled(interval_minutes: u64) -> Self {
        Self::from_stats(&RunStats::default(), false, false, interval_minutes)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub fetched_events: usize,
    pub finished_events: usize,
    pub unresolvable: usize,
    pub already_analyzed: usize,
    pub analyzed: usize,
    pub fallbacks: usize,
    pub duplicates: usize,
    pub errors: usize,
}

impl CycleSummary {
    pub fn new(run_id: Uuid, started_at: DateTime<Utc>) -> Self {
        Self {
            run_id,
            started_at,
            finished_at: started_at,
            fetched_events: 0,
            finished_events: 0,
            unresolvable: 0,
            already_analyzed: 0,
            analyzed: 0,
            fallbacks: 0,
            duplicates: 0,
            errors: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CycleOutcome {
    Completed(CycleSummary),
    /// Another cycle held the run guard.
    Skipped,
    #[serde(rename_all = "camelCase")]
    Aborted { run_id: Uuid, reason: String },
}

impl CycleOutcome {
    pub fn summary(&self) -> Option<&CycleSummary> {
        match self {
            CycleOutcome::Completed(summary) => Some(summary),
            _ => None,
        }
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, CycleOutcome::Skipped)
    }
}
