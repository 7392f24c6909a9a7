//! Canonical match identity from the several id fields feeds use.

use serde::Serialize;
use serde_json::Value as JsonValue;

use crate::RawEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentitySource {
    AnalysisId,
    ProviderId,
    RecordId,
    FixtureId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedIdentity {
    pub match_id: String,
    pub source: IdentitySource,
}

type Extractor = fn(&RawEvent) -> Option<&JsonValue>;

/// Tried in order; the first non-empty value wins.
const STRATEGIES: [(IdentitySource, Extractor); 4] = [
    (IdentitySource::AnalysisId, analysis_id),
    (IdentitySource::ProviderId, provider_id),
    (IdentitySource::RecordId, record_id),
    (IdentitySource::FixtureId, fixture_id),
];

fn analysis_id(event: &RawEvent) -> Option<&JsonValue> {
    event.match_id.as_ref()
}

fn provider_id(event: &RawEvent) -> Option<&JsonValue> {
    event.api_id.as_ref()
}

fn record_id(event: &RawEvent) -> Option<&JsonValue> {
    event.record_id.as_ref()
}

fn fixture_id(event: &RawEvent) -> Option<&JsonValue> {
    event.fixture.as_ref().and_then(|f| f.id.as_ref())
}

pub fn resolve(event: &RawEvent) -> Option<ResolvedIdentity> {
    STRATEGIES.iter().find_map(|(source, extract)| {
        extract(event).and_then(id_text).map(|match_id| ResolvedIdentity {
            match_id,
            source: *source,
        })
    })
}

fn id_text(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::String(s) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        JsonValue::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
