//! Generative narrative client for finished matches.
//!
//! The client sends one chat completion per match to an OpenAI-compatible
//! endpoint and never retries on its own; retry policy belongs to the caller.

use std::time::Duration;

use async_trait::async_trait;
use kickoff_core::{AnalysisNarrative, EventFacts};
use kickoff_storage::{build_http_client, HttpClientConfig};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

pub const DEFAULT_BASE_URL: &str = "https://api.groq.com/openai/v1";
pub const DEFAULT_MODEL: &str = "llama-3.3-70b-versatile";
/// Model label recorded for narratives built by [`fallback_narrative`].
pub const FALLBACK_MODEL: &str = "fallback-template";

const SYSTEM_PROMPT: &str =
    "You are a professional football analyst. Write a detailed, factual post-match analysis.";
const SUMMARY_FALLBACK_CHARS: usize = 300;

#[derive(Debug, Error)]
pub enum GeneratorError {
    #[error("generator request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("generator returned http status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("generator returned an empty completion")]
    EmptyCompletion,
}

#[async_trait]
pub trait NarrativeGenerator: Send + Sync {
    /// Recorded on every stored analysis.
    fn model(&self) -> &str;

    async fn generate(&self, facts: &EventFacts) -> Result<AnalysisNarrative, GeneratorError>;
}

#[derive(Debug, Clone)]
pub struct GeneratorConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub timeout: Duration,
    pub user_agent: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
    pub top_p: f32,
}

impl GeneratorConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            timeout: Duration::from_secs(60),
            user_agent: None,
            temperature: 0.7,
            max_tokens: 3000,
            top_p: 0.9,
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage>,
    temperature: f32,
    max_tokens: u32,
    top_p: f32,
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

pub struct ChatCompletionGenerator {
    client: reqwest::Client,
    config: GeneratorConfig,
}

impl ChatCompletionGenerator {
    pub fn new(config: GeneratorConfig) -> anyhow::Result<Self> {
        let client = build_http_client(&HttpClientConfig {
            timeout: config.timeout,
            user_agent: config.user_agent.clone(),
        })?;
        Ok(Self { client, config })
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl NarrativeGenerator for ChatCompletionGenerator {
    fn model(&self) -> &str {
        &self.config.model
    }

    async fn generate(&self, facts: &EventFacts) -> Result<AnalysisNarrative, GeneratorError> {
        let request = ChatRequest {
            model: &self.config.model,
            messages: vec![
                WireMessage {
                    role: "system",
                    content: SYSTEM_PROMPT.to_string(),
                },
                WireMessage {
                    role: "user",
                    content: build_prompt(facts),
                },
            ],
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
            top_p: self.config.top_p,
        };

        debug!(model = %self.config.model, match_id = %facts.match_id, "chat completion request");

        let response = self
            .client
            .post(self.completions_url())
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GeneratorError::Status {
                status: status.as_u16(),
                body: truncate_to_char_boundary(&body, 512).to_string(),
            });
        }

        let completion: ChatResponse = response.json().await?;
        let full_text = completion
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|text| !text.trim().is_empty())
            .ok_or(GeneratorError::EmptyCompletion)?;

        Ok(parse_narrative(&full_text))
    }
}

/// User prompt grounded only in the match facts.
pub fn build_prompt(facts: &EventFacts) -> String {
    let competition = match (&facts.tournament.name, &facts.tournament.country) {
        (Some(name), Some(country)) => format!("{name} ({country})"),
        (Some(name), None) => name.clone(),
        _ => "unknown competition".to_string(),
    };
    let date = facts
        .date
        .map(|d| d.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| "unknown date".to_string());
    let venue = facts.venue.as_deref().unwrap_or("not specified");

    format!(
        "Analyze this match:\n\n\
         {home} vs {away}\n\
         Final score: {score}\n\
         Competition: {competition}\n\
         Venue: {venue}\n\
         Date: {date}\n\n\
         Cover, in separate sections: summary, performance of both teams, key players, \
         tactics, statistics, strengths and weaknesses.",
        home = facts.home_team.name,
        away = facts.away_team.name,
        score = facts.score_line(),
    )
}

/// Best-effort section extraction. `full_text` is kept verbatim; a section is
/// the set of lines mentioning one of its keywords.
pub fn parse_narrative(full_text: &str) -> AnalysisNarrative {
    let summary = extract_section(full_text, &["summary", "ملخص"]).or_else(|| {
        let head = truncate_to_char_boundary(full_text.trim(), SUMMARY_FALLBACK_CHARS).trim();
        (!head.is_empty()).then(|| head.to_string())
    });

    AnalysisNarrative {
        full_text: full_text.to_string(),
        summary,
        performance: extract_section(full_text, &["performance", "الأداء"]),
        key_players: extract_section(full_text, &["key player", "player", "لاعب"]),
        tactics: extract_section(full_text, &["tactic", "formation", "تكتيك", "خطة"]),
        statistics: extract_section(full_text, &["statistic", "possession", "إحصائ"]),
        strengths: extract_section(full_text, &["strength", "قوة"]),
        weaknesses: extract_section(full_text, &["weakness", "ضعف"]),
    }
}

fn extract_section(text: &str, keywords: &[&str]) -> Option<String> {
    let found = text
        .lines()
        .filter(|line| {
            let lower = line.to_lowercase();
            keywords.iter().any(|k| lower.contains(k))
        })
        .map(str::trim)
        .collect::<Vec<_>>()
        .join("\n");
    (!found.trim().is_empty()).then_some(found)
}

/// Templated narrative built from team names and the final score only. Used
/// when generation is exhausted so every finished match still gets a record.
pub fn fallback_narrative(facts: &EventFacts) -> AnalysisNarrative {
    let text = format!(
        "Full time: {home} {home_goals} - {away_goals} {away}. \
         A detailed analysis of this match is not available yet.",
        home = facts.home_team.name,
        away = facts.away_team.name,
        home_goals = facts.score.home,
        away_goals = facts.score.away,
    );
    AnalysisNarrative {
        summary: Some(text.clone()),
        full_text: text,
        ..Default::default()
    }
}

fn truncate_to_char_boundary(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while !s.is_char_boundary(end) && end > 0 {
        end -= 1;
    }
    &s[..end]
}
