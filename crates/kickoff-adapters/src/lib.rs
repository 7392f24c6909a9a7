//! Match feed adapters and the generative narrative client.

use std::fmt;
use std::path::PathBuf;

use async_trait::async_trait;
use kickoff_core::RawEvent;
use kickoff_storage::{build_http_client, HttpClientConfig};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{debug, warn};

pub mod generator;

pub use generator::{
    build_prompt, fallback_narrative, parse_narrative, ChatCompletionGenerator, GeneratorConfig,
    GeneratorError, NarrativeGenerator, FALLBACK_MODEL,
};

pub const CRATE_NAME: &str = "kickoff-adapters";

/// Relative day the feed is asked about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DayWindow {
    Today,
    Yesterday,
}

impl DayWindow {
    /// Both windows are polled every cycle so events finishing just after
    /// midnight are still picked up.
    pub const ALL: [DayWindow; 2] = [DayWindow::Today, DayWindow::Yesterday];

    pub fn as_str(&self) -> &'static str {
        match self {
            DayWindow::Today => "today",
            DayWindow::Yesterday => "yesterday",
        }
    }
}

impl fmt::Display for DayWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
    #[error("payload from {origin} is not an event list: {source}")]
    Payload {
        origin: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

#[async_trait]
pub trait EventSource: Send + Sync {
    fn source_id(&self) -> &'static str;

    async fn try_fetch(
        &self,
        window: DayWindow,
        timezone: &str,
    ) -> Result<Vec<RawEvent>, AdapterError>;

    /// Failures are logged and yield an empty list; a missed poll is picked
    /// up by the next scheduled cycle.
    async fn fetch(&self, window: DayWindow, timezone: &str) -> Vec<RawEvent> {
        match self.try_fetch(window, timezone).await {
            Ok(events) => {
                debug!(source = self.source_id(), %window, count = events.len(), "fetched events");
                events
            }
            Err(err) => {
                warn!(source = self.source_id(), %window, error = %err, "event feed unavailable");
                Vec::new()
            }
        }
    }
}

/// Accepts a bare JSON array or an object wrapping one under `data`,
/// `matches` or `response`. Elements that do not look like events are
/// skipped individually.
pub fn parse_event_list(bytes: &[u8], origin: &str) -> Result<Vec<RawEvent>, AdapterError> {
    let value: JsonValue = serde_json::from_slice(bytes).map_err(|source| AdapterError::Payload {
        origin: origin.to_string(),
        source,
    })?;

    let items = match value {
        JsonValue::Null => return Ok(Vec::new()),
        JsonValue::Array(items) => items,
        JsonValue::Object(mut map) => {
            let wrapped = ["data", "matches", "response"]
                .iter()
                .find_map(|key| match map.remove(*key) {
                    Some(JsonValue::Array(items)) => Some(items),
                    _ => None,
                });
            match wrapped {
                Some(items) => items,
                None => return Err(not_a_list(origin)),
            }
        }
        _ => return Err(not_a_list(origin)),
    };

    let mut events = Vec::with_capacity(items.len());
    for (index, item) in items.into_iter().enumerate() {
        match serde_json::from_value::<RawEvent>(item) {
            Ok(event) => events.push(event),
            Err(err) => warn!(origin, index, error = %err, "skipping malformed event"),
        }
    }
    Ok(events)
}

fn not_a_list(origin: &str) -> AdapterError {
    AdapterError::Payload {
        origin: origin.to_string(),
        source: serde::de::Error::custom("expected an array of events"),
    }
}

/// `GET <base>/today` and `GET <base>/yesterday` with a `timezone` query
/// parameter.
#[derive(Debug, Clone)]
pub struct HttpEventFeed {
    client: reqwest::Client,
    base_url: String,
}

impl HttpEventFeed {
    pub fn new(base_url: impl Into<String>, http: HttpClientConfig) -> anyhow::Result<Self> {
        Ok(Self {
            client: build_http_client(&http)?,
            base_url: base_url.into(),
        })
    }

    pub fn window_url(&self, window: DayWindow) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), window.as_str())
    }
}

#[async_trait]
impl EventSource for HttpEventFeed {
    fn source_id(&self) -> &'static str {
        "http-feed"
    }

    async fn try_fetch(
        &self,
        window: DayWindow,
        timezone: &str,
    ) -> Result<Vec<RawEvent>, AdapterError> {
        let url = self.window_url(window);
        let mut request = self.client.get(&url);
        if !timezone.trim().is_empty() {
            request = request.query(&[("timezone", timezone.trim())]);
        }

        let resp = request.send().await.map_err(|source| AdapterError::Request {
            url: url.clone(),
            source,
        })?;
        let status = resp.status();
        if !status.is_success() {
            return Err(AdapterError::HttpStatus {
                status: status.as_u16(),
                url,
            });
        }

        let body = resp.bytes().await.map_err(|source| AdapterError::Request {
            url: url.clone(),
            source,
        })?;
        parse_event_list(&body, &url)
    }
}

/// Reads `<dir>/today.json` and `<dir>/yesterday.json`. A missing file means
/// the window has no events.
#[derive(Debug, Clone)]
pub struct FixtureEventFeed {
    dir: PathBuf,
}

impl FixtureEventFeed {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn window_path(&self, window: DayWindow) -> PathBuf {
        self.dir.join(format!("{}.json", window.as_str()))
    }
}

#[async_trait]
impl EventSource for FixtureEventFeed {
    fn source_id(&self) -> &'static str {
        "fixture-feed"
    }

    async fn try_fetch(
        &self,
        window: DayWindow,
        _timezone: &str,
    ) -> Result<Vec<RawEvent>, AdapterError> {
        let path = self.window_path(window);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no fixture for window");
                return Ok(Vec::new());
            }
            Err(source) => {
                return Err(AdapterError::Io {
                    path: path.display().to_string(),
                    source,
                })
            }
        };
        parse_event_list(&bytes, &path.display().to_string())
    }
}
