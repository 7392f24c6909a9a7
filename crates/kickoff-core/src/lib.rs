//! Core domain model for the Kickoff match-analysis pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

pub mod completion;
pub mod identity;

pub use completion::{is_finished, status_code, TERMINAL_STATUSES};
pub use identity::{resolve, IdentitySource, ResolvedIdentity};

pub const CRATE_NAME: &str = "kickoff-core";

pub const UNKNOWN_HOME_TEAM: &str = "Home team";
pub const UNKNOWN_AWAY_TEAM: &str = "Away team";

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("match {match_id} has no {side} team name")]
    MissingTeam {
        match_id: String,
        side: &'static str,
    },
}

/// Event object as delivered by the match feed. Every field is optional so a
/// partially populated event still deserializes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawEvent {
    #[serde(default)]
    pub match_id: Option<JsonValue>,
    #[serde(default)]
    pub api_id: Option<JsonValue>,
    #[serde(default, rename = "_id")]
    pub record_id: Option<JsonValue>,
    #[serde(default)]
    pub fixture: Option<RawFixture>,
    #[serde(default)]
    pub home_team: Option<RawTeam>,
    #[serde(default)]
    pub away_team: Option<RawTeam>,
    #[serde(default)]
    pub score: Option<RawScore>,
    #[serde(default)]
    pub score_a: Option<i64>,
    #[serde(default)]
    pub score_b: Option<i64>,
    #[serde(default)]
    pub tournament: Option<RawTournament>,
    #[serde(default)]
    pub venue: Option<String>,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawFixture {
    #[serde(default)]
    pub id: Option<JsonValue>,
    #[serde(default)]
    pub status: Option<RawFixtureStatus>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawFixtureStatus {
    #[serde(default)]
    pub short: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawTeam {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub logo: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawScore {
    #[serde(default)]
    pub home: Option<i64>,
    #[serde(default)]
    pub away: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawTournament {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub logo: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamRef {
    pub id: Option<i64>,
    pub name: String,
    pub logo: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TournamentRef {
    pub id: Option<i64>,
    pub name: Option<String>,
    pub country: Option<String>,
    pub logo: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Score {
    pub home: i32,
    pub away: i32,
}

/// Validated facts about a finished match; the only input the generator and
/// the fallback template are allowed to see.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventFacts {
    pub match_id: String,
    pub home_team: TeamRef,
    pub away_team: TeamRef,
    pub score: Score,
    pub tournament: TournamentRef,
    pub venue: Option<String>,
    pub date: Option<DateTime<Utc>>,
    pub status: String,
}

impl EventFacts {
    /// Blank or missing team names are replaced by [`UNKNOWN_HOME_TEAM`] and
    /// [`UNKNOWN_AWAY_TEAM`], so any finished event can still be recorded.
    pub fn from_raw(match_id: impl Into<String>, event: &RawEvent) -> Self {
        let match_id = match_id.into();
        let home_team = team_ref(event.home_team.as_ref(), UNKNOWN_HOME_TEAM);
        let away_team = team_ref(event.away_team.as_ref(), UNKNOWN_AWAY_TEAM);

        let nested = event.score.as_ref();
        let score = Score {
            home: goals(nested.and_then(|s| s.home).or(event.score_a)),
            away: goals(nested.and_then(|s| s.away).or(event.score_b)),
        };

        let tournament = event
            .tournament
            .as_ref()
            .map(|t| TournamentRef {
                id: t.id,
                name: non_empty(t.name.as_deref()),
                country: non_empty(t.country.as_deref()),
                logo: non_empty(t.logo.as_deref()),
            })
            .unwrap_or_default();

        let date = event
            .date
            .as_deref()
            .and_then(|d| DateTime::parse_from_rfc3339(d.trim()).ok())
            .map(|d| d.with_timezone(&Utc));

        Self {
            match_id,
            home_team,
            away_team,
            score,
            tournament,
            venue: non_empty(event.venue.as_deref()),
            date,
            status: status_code(event).unwrap_or_default(),
        }
    }

    /// Strict variant for caller-submitted match data: both team names
    /// must be present.
    pub fn from_complete(match_id: impl Into<String>, event: &RawEvent) -> Result<Self, CoreError> {
        let match_id = match_id.into();
        if let Some(side) = missing_team(event) {
            return Err(CoreError::MissingTeam { match_id, side });
        }
        Ok(Self::from_raw(match_id, event))
    }

    pub fn title(&self) -> String {
        format!("{} vs {}", self.home_team.name, self.away_team.name)
    }

    pub fn score_line(&self) -> String {
        format!("{} - {}", self.score.home, self.score.away)
    }
}

/// First side ("home" or "away") without a usable team name.
pub fn missing_team(event: &RawEvent) -> Option<&'static str> {
    let named = |team: Option<&RawTeam>| team.and_then(|t| non_empty(t.name.as_deref())).is_some();
    if !named(event.home_team.as_ref()) {
        Some("home")
    } else if !named(event.away_team.as_ref()) {
        Some("away")
    } else {
        None
    }
}

fn team_ref(team: Option<&RawTeam>, placeholder: &str) -> TeamRef {
    TeamRef {
        id: team.and_then(|t| t.id),
        name: team
            .and_then(|t| non_empty(t.name.as_deref()))
            .unwrap_or_else(|| placeholder.to_string()),
        logo: team.and_then(|t| non_empty(t.logo.as_deref())),
    }
}

fn goals(value: Option<i64>) -> i32 {
    value.and_then(|v| i32::try_from(v).ok()).unwrap_or(0)
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(ToString::to_string)
}

/// Generated analysis body. `full_text` is always populated; the remaining
/// sections are best-effort extractions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisNarrative {
    pub full_text: String,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub performance: Option<String>,
    #[serde(default)]
    pub key_players: Option<String>,
    #[serde(default)]
    pub tactics: Option<String>,
    #[serde(default)]
    pub statistics: Option<String>,
    #[serde(default)]
    pub strengths: Option<String>,
    #[serde(default)]
    pub weaknesses: Option<String>,
}

/// Persisted analysis, one per finished match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisRecord {
    pub match_id: String,
    pub home_team: TeamRef,
    pub away_team: TeamRef,
    pub score: Score,
    pub tournament: TournamentRef,
    pub venue: Option<String>,
    pub date: Option<DateTime<Utc>>,
    pub status: String,
    pub narrative: AnalysisNarrative,
    pub generator_model: String,
    pub processing_time_ms: i64,
    pub created_at: DateTime<Utc>,
}

impl AnalysisRecord {
    pub fn from_facts(
        facts: EventFacts,
        narrative: AnalysisNarrative,
        generator_model: impl Into<String>,
        processing_time_ms: i64,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            match_id: facts.match_id,
            home_team: facts.home_team,
            away_team: facts.away_team,
            score: facts.score,
            tournament: facts.tournament,
            venue: facts.venue,
            date: facts.date,
            status: facts.status,
            narrative,
            generator_model: generator_model.into(),
            processing_time_ms,
            created_at,
        }
    }
}
