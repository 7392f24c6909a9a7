//! Axum JSON surface for stored analyses and the auto-analysis pipeline.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, NaiveDate, Utc};
use kickoff_core::{AnalysisRecord, RawEvent};
use kickoff_storage::{AnalysisFilter, AnalysisStore, StoreError};
use kickoff_sync::{AnalysisPipeline, CycleOutcome, StatsSnapshot, SubmitError, Submission};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

pub const CRATE_NAME: &str = "kickoff-web";

const DEFAULT_PAGE_SIZE: usize = 20;
const MAX_PAGE_SIZE: usize = 100;
const SEARCH_LIMIT: usize = 50;
const FILTER_LIMIT: usize = 50;
const DAILY_STATS_DAYS: usize = 30;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn AnalysisStore>,
    /// `None` when the pipeline could not be built (no generator credentials).
    pub pipeline: Option<Arc<AnalysisPipeline>>,
    pub interval_minutes: u64,
}

impl AppState {
    pub fn new(
        store: Arc<dyn AnalysisStore>,
        pipeline: Option<Arc<AnalysisPipeline>>,
        interval_minutes: u64,
    ) -> Self {
        Self {
            store,
            pipeline,
            interval_minutes,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
struct ListQuery {
    page: Option<usize>,
    limit: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
struct SearchQuery {
    q: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct FilterQuery {
    team: Option<String>,
    tournament: Option<String>,
    date: Option<String>,
}

#[derive(Debug, Serialize)]
struct AnalysisPage {
    success: bool,
    total: u64,
    page: usize,
    pages: u64,
    data: Vec<AnalysisRecord>,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/analysis", get(list_handler))
        .route("/analysis/test", get(health_handler))
        .route("/analysis/search/query", get(search_handler))
        .route("/analysis/filter/options", get(filter_handler))
        .route("/analysis/stats/daily", get(daily_handler))
        .route("/analysis/generate", post(generate_handler))
        .route("/analysis/auto/stats", get(stats_handler))
        .route("/analysis/auto/trigger", post(trigger_handler))
        .route("/analysis/{match_id}", get(detail_handler))
        .with_state(Arc::new(state))
}

pub fn port_from_env() -> u16 {
    std::env::var("KICKOFF_WEB_PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(8000)
}

pub async fn serve(state: AppState, port: u16) -> anyhow::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "web surface listening");
    axum::serve(listener, app(state)).await?;
    Ok(())
}

async fn stats_handler(State(state): State<Arc<AppState>>) -> Json<StatsSnapshot> {
    let snapshot = match &state.pipeline {
        Some(pipeline) => pipeline.stats().await,
        None => StatsSnapshot::disabled(state.interval_minutes),
    };
    Json(snapshot)
}

async fn trigger_handler(State(state): State<Arc<AppState>>) -> Response {
    let Some(pipeline) = &state.pipeline else {
        return message(StatusCode::SERVICE_UNAVAILABLE, "auto-analysis is disabled");
    };
    if pipeline.is_running() {
        return message(StatusCode::CONFLICT, "an analysis cycle is already running");
    }

    info!("manual analysis cycle requested");
    // Detached from the request so a disconnecting client cannot cancel the cycle.
    let pipeline = Arc::clone(pipeline);
    let outcome = match tokio::spawn(async move { pipeline.run_once().await }).await {
        Ok(outcome) => outcome,
        Err(err) => {
            error!(error = %err, "manual analysis cycle task failed");
            return failure(err.to_string());
        }
    };
    let status = match &outcome {
        CycleOutcome::Completed(_) => StatusCode::OK,
        CycleOutcome::Skipped => StatusCode::CONFLICT,
        CycleOutcome::Aborted { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    };
    let success = status == StatusCode::OK;
    (status, Json(json!({ "success": success, "data": outcome }))).into_response()
}

async fn generate_handler(
    State(state): State<Arc<AppState>>,
    Json(event): Json<RawEvent>,
) -> Response {
    let Some(pipeline) = &state.pipeline else {
        return message(StatusCode::SERVICE_UNAVAILABLE, "analysis generation is disabled");
    };

    let pipeline = Arc::clone(pipeline);
    let submitted = tokio::spawn(async move { pipeline.analyze_submitted(&event).await }).await;
    match submitted {
        Ok(Ok(Submission::Created { record, .. })) => Json(json!({
            "success": true,
            "message": "Analysis created",
            "data": record,
        }))
        .into_response(),
        Ok(Ok(Submission::Existing(record))) => Json(json!({
            "success": true,
            "message": "Analysis already exists",
            "data": record,
        }))
        .into_response(),
        Ok(Err(SubmitError::Incomplete(err))) => {
            warn!(error = %err, "rejected incomplete match data");
            message(StatusCode::BAD_REQUEST, "Match data incomplete")
        }
        Ok(Err(SubmitError::Unidentified)) => {
            message(StatusCode::BAD_REQUEST, "Match data has no usable identifier")
        }
        Ok(Err(SubmitError::Store(err))) => store_error(err),
        Err(err) => {
            error!(error = %err, "analysis generation task failed");
            failure(err.to_string())
        }
    }
}

async fn health_handler(State(state): State<Arc<AppState>>) -> Response {
    let total = match state.store.count().await {
        Ok(total) => total,
        Err(err) => return store_error(err),
    };
    match state.store.list_recent(0, 1).await {
        Ok(latest) => Json(json!({
            "success": true,
            "message": "Analysis API is working",
            "totalAnalyses": total,
            "latestAnalysis": latest.into_iter().next(),
            "timestamp": Utc::now().to_rfc3339(),
        }))
        .into_response(),
        Err(err) => store_error(err),
    }
}

async fn search_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SearchQuery>,
) -> Response {
    let Some(q) = non_blank(query.q) else {
        return data(Vec::<AnalysisRecord>::new());
    };
    match state.store.search(&q, SEARCH_LIMIT).await {
        Ok(records) => data(records),
        Err(err) => store_error(err),
    }
}

async fn filter_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<FilterQuery>,
) -> Response {
    let since = match non_blank(query.date) {
        Some(raw) => match parse_since(&raw) {
            Some(since) => Some(since),
            None => return message(StatusCode::BAD_REQUEST, &format!("invalid date: {raw}")),
        },
        None => None,
    };
    let filter = AnalysisFilter {
        team: non_blank(query.team),
        tournament: non_blank(query.tournament),
        since,
    };
    match state.store.filter(&filter, FILTER_LIMIT).await {
        Ok(records) => data(records),
        Err(err) => store_error(err),
    }
}

async fn daily_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.store.daily_counts(DAILY_STATS_DAYS).await {
        Ok(days) => data(days),
        Err(err) => store_error(err),
    }
}

async fn list_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> Response {
    let page = query.page.filter(|p| *p > 0).unwrap_or(1);
    let limit = query
        .limit
        .filter(|l| *l > 0)
        .unwrap_or(DEFAULT_PAGE_SIZE)
        .min(MAX_PAGE_SIZE);
    let offset = (page - 1).saturating_mul(limit);

    let total = match state.store.count().await {
        Ok(total) => total,
        Err(err) => return store_error(err),
    };
    match state.store.list_recent(offset, limit).await {
        Ok(data) => Json(AnalysisPage {
            success: true,
            total,
            page,
            pages: total.div_ceil(limit as u64),
            data,
        })
        .into_response(),
        Err(err) => store_error(err),
    }
}

async fn detail_handler(
    State(state): State<Arc<AppState>>,
    Path(match_id): Path<String>,
) -> Response {
    match state.store.get(&match_id).await {
        Ok(Some(record)) => Json(json!({ "success": true, "data": record })).into_response(),
        Ok(None) => message(
            StatusCode::NOT_FOUND,
            &format!("No analysis found for match: {match_id}"),
        ),
        Err(err) => store_error(err),
    }
}

/// RFC 3339 timestamp or a bare `YYYY-MM-DD` (midnight UTC).
fn parse_since(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|d| d.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .map(|d| d.and_utc())
        })
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn data<T: Serialize>(data: T) -> Response {
    Json(json!({ "success": true, "data": data })).into_response()
}

fn message(status: StatusCode, text: &str) -> Response {
    (status, Json(json!({ "success": false, "message": text }))).into_response()
}

fn failure(error: String) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "success": false, "error": error })),
    )
        .into_response()
}

fn store_error(err: StoreError) -> Response {
    error!(error = %err, "analysis store request failed");
    failure(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use chrono::{Duration as ChronoDuration, TimeZone, Utc};
    use http_body_util::BodyExt;
    use kickoff_adapters::{
        AdapterError, DayWindow, EventSource, GeneratorError, NarrativeGenerator,
    };
    use kickoff_core::{AnalysisNarrative, EventFacts, RawEvent};
    use kickoff_storage::{BackoffPolicy, MemoryAnalysisStore};
    use kickoff_sync::PipelineSettings;
    use serde_json::Value;
    use std::time::Duration;
    use tower::ServiceExt;

    struct OneFinishedMatch;

    #[async_trait]
    impl EventSource for OneFinishedMatch {
        fn source_id(&self) -> &'static str {
            "one"
        }

        async fn try_fetch(&self, window: DayWindow, _tz: &str) -> Result<Vec<RawEvent>, AdapterError> {
            if window == DayWindow::Yesterday {
                return Ok(Vec::new());
            }
            Ok(vec![serde_json::from_value(json!({
                "matchId": "777",
                "status": "FT",
                "homeTeam": {"name": "Al Ahly"},
                "awayTeam": {"name": "Zamalek"},
                "score": {"home": 1, "away": 0}
            }))
            .expect("event")])
        }
    }

    struct EchoGenerator;

    #[async_trait]
    impl NarrativeGenerator for EchoGenerator {
        fn model(&self) -> &str {
            "echo"
        }

        async fn generate(&self, facts: &EventFacts) -> Result<AnalysisNarrative, GeneratorError> {
            Ok(AnalysisNarrative {
                full_text: facts.title(),
                ..Default::default()
            })
        }
    }

    /// Sleeps before answering so a request can give up first.
    struct SlowGenerator;

    #[async_trait]
    impl NarrativeGenerator for SlowGenerator {
        fn model(&self) -> &str {
            "slow"
        }

        async fn generate(&self, facts: &EventFacts) -> Result<AnalysisNarrative, GeneratorError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(AnalysisNarrative {
                full_text: facts.title(),
                ..Default::default()
            })
        }
    }

    struct ExplodingSource;

    #[async_trait]
    impl EventSource for ExplodingSource {
        fn source_id(&self) -> &'static str {
            "exploding"
        }

        async fn try_fetch(&self, _window: DayWindow, _tz: &str) -> Result<Vec<RawEvent>, AdapterError> {
            panic!("feed decoder crashed");
        }
    }

    fn record(match_id: &str, minutes_ago: i64) -> AnalysisRecord {
        named_record(match_id, "Home", "Away", "League", minutes_ago)
    }

    fn named_record(
        match_id: &str,
        home: &str,
        away: &str,
        tournament: &str,
        minutes_ago: i64,
    ) -> AnalysisRecord {
        let raw: RawEvent = serde_json::from_value(json!({
            "homeTeam": {"name": home},
            "awayTeam": {"name": away},
            "tournament": {"name": tournament},
            "date": "2026-02-20T18:00:00Z",
            "status": "FT"
        }))
        .expect("raw");
        let facts = EventFacts::from_raw(match_id, &raw);
        AnalysisRecord::from_facts(
            facts,
            AnalysisNarrative {
                full_text: format!("analysis {match_id}"),
                ..Default::default()
            },
            "echo",
            5,
            Utc::now() - ChronoDuration::minutes(minutes_ago),
        )
    }

    fn state_with_pipeline(store: Arc<MemoryAnalysisStore>) -> AppState {
        state_with(store, Arc::new(OneFinishedMatch), Arc::new(EchoGenerator))
    }

    fn state_with(
        store: Arc<MemoryAnalysisStore>,
        source: Arc<dyn EventSource>,
        generator: Arc<dyn NarrativeGenerator>,
    ) -> AppState {
        let pipeline = AnalysisPipeline::new(
            PipelineSettings {
                pacing: Duration::ZERO,
                backoff: BackoffPolicy::new(1, Duration::from_millis(1)),
                ..Default::default()
            },
            source,
            store.clone(),
            generator,
        );
        AppState::new(store, Some(Arc::new(pipeline)), 10)
    }

    async fn send(app: Router, method: &str, uri: &str) -> (StatusCode, Value) {
        let request = Request::builder().method(method).uri(uri).body(Body::empty()).unwrap();
        respond(app, request).await
    }

    async fn post_json(app: Router, uri: &str, body: Value) -> (StatusCode, Value) {
        let request = Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        respond(app, request).await
    }

    async fn respond(app: Router, request: Request<Body>) -> (StatusCode, Value) {
        let resp = app.oneshot(request).await.unwrap();
        let status = resp.status();
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn disabled_pipeline_reports_stats_and_refuses_trigger() {
        let state = AppState::new(Arc::new(MemoryAnalysisStore::new()), None, 15);
        let app = app(state);

        let (status, body) = send(app.clone(), "GET", "/analysis/auto/stats").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["enabled"], false);
        assert_eq!(body["intervalMinutes"], 15);
        assert_eq!(body["totalChecks"], 0);

        let (status, _) = send(app, "POST", "/analysis/auto/trigger").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn trigger_runs_a_cycle_and_updates_stats() {
        let store = Arc::new(MemoryAnalysisStore::new());
        let app = app(state_with_pipeline(store.clone()));

        let (status, body) = send(app.clone(), "POST", "/analysis/auto/trigger").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["outcome"], "completed");
        assert_eq!(body["data"]["analyzed"], 1);

        let (_, stats) = send(app.clone(), "GET", "/analysis/auto/stats").await;
        assert_eq!(stats["totalChecks"], 1);
        assert_eq!(stats["matchesAnalyzed"], 1);
        assert_eq!(stats["isRunning"], false);
        assert!(stats["lastAnalysis"].is_string());

        let (status, detail) = send(app, "GET", "/analysis/777").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(detail["data"]["matchId"], "777");
        assert_eq!(detail["data"]["narrative"]["fullText"], "Al Ahly vs Zamalek");
        assert_eq!(detail["data"]["generatorModel"], "echo");
    }

    #[tokio::test]
    async fn unknown_match_is_not_found() {
        let app = app(AppState::new(Arc::new(MemoryAnalysisStore::new()), None, 10));
        let (status, body) = send(app, "GET", "/analysis/missing").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["success"], false);
        assert_eq!(body["message"], "No analysis found for match: missing");
    }

    #[tokio::test]
    async fn list_is_paginated_newest_first() {
        let store = Arc::new(MemoryAnalysisStore::new());
        for (id, age) in [("old", 30), ("mid", 20), ("new", 10)] {
            store.insert(&record(id, age)).await.expect("insert");
        }
        let app = app(AppState::new(store, None, 10));

        let (status, body) = send(app.clone(), "GET", "/analysis?page=1&limit=2").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total"], 3);
        assert_eq!(body["pages"], 2);
        assert_eq!(body["data"][0]["matchId"], "new");
        assert_eq!(body["data"][1]["matchId"], "mid");

        let (_, body) = send(app.clone(), "GET", "/analysis?page=2&limit=2").await;
        assert_eq!(body["page"], 2);
        assert_eq!(body["data"].as_array().map(Vec::len), Some(1));
        assert_eq!(body["data"][0]["matchId"], "old");

        let (_, body) = send(app, "GET", "/analysis?page=0&limit=0").await;
        assert_eq!(body["page"], 1);
        assert_eq!(body["data"].as_array().map(Vec::len), Some(3));
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_trigger_request_still_completes_the_cycle() {
        let store = Arc::new(MemoryAnalysisStore::new());
        let app = app(state_with(store.clone(), Arc::new(OneFinishedMatch), Arc::new(SlowGenerator)));

        let request = app.clone().oneshot(
            Request::builder()
                .method("POST")
                .uri("/analysis/auto/trigger")
                .body(Body::empty())
                .unwrap(),
        );
        assert!(tokio::time::timeout(Duration::from_secs(1), request).await.is_err());
        assert_eq!(store.count().await.unwrap(), 0);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(store.count().await.unwrap(), 1);

        let (_, stats) = send(app, "GET", "/analysis/auto/stats").await;
        assert_eq!(stats["totalChecks"], 1);
        assert_eq!(stats["matchesAnalyzed"], 1);
        assert_eq!(stats["isRunning"], false);
    }

    #[tokio::test]
    async fn crashed_cycle_is_a_server_error_and_frees_the_pipeline() {
        let store = Arc::new(MemoryAnalysisStore::new());
        let state = state_with(store, Arc::new(ExplodingSource), Arc::new(EchoGenerator));
        let pipeline = state.pipeline.clone().expect("pipeline");
        let app = app(state);

        let (status, body) = send(app, "POST", "/analysis/auto/trigger").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["success"], false);
        assert!(body["error"].is_string());
        assert!(!pipeline.is_running());
    }

    #[tokio::test]
    async fn generate_creates_then_returns_existing_analysis() {
        let store = Arc::new(MemoryAnalysisStore::new());
        let app = app(state_with_pipeline(store.clone()));
        let payload = json!({
            "matchId": "g-1",
            "homeTeam": {"name": "Al Ahly"},
            "awayTeam": {"name": "Zamalek"},
            "score": {"home": 2, "away": 0},
            "status": "FT"
        });

        let (status, body) = post_json(app.clone(), "/analysis/generate", payload.clone()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Analysis created");
        assert_eq!(body["data"]["matchId"], "g-1");
        assert_eq!(body["data"]["narrative"]["fullText"], "Al Ahly vs Zamalek");

        let (status, body) = post_json(app.clone(), "/analysis/generate", payload).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Analysis already exists");
        assert_eq!(store.count().await.unwrap(), 1);

        let (_, stats) = send(app, "GET", "/analysis/auto/stats").await;
        assert_eq!(stats["totalChecks"], 0);
    }

    #[tokio::test]
    async fn generate_rejects_incomplete_match_data() {
        let store = Arc::new(MemoryAnalysisStore::new());
        let app = app(state_with_pipeline(store.clone()));

        let (status, body) = post_json(
            app.clone(),
            "/analysis/generate",
            json!({"matchId": "g-2", "homeTeam": {"name": "Al Ahly"}}),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "Match data incomplete");

        let (status, body) = post_json(
            app,
            "/analysis/generate",
            json!({"homeTeam": {"name": "Al Ahly"}, "awayTeam": {"name": "Zamalek"}}),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "Match data has no usable identifier");
        assert_eq!(store.count().await.unwrap(), 0);

        let disabled = app_without_pipeline(Arc::new(MemoryAnalysisStore::new()));
        let (status, _) = post_json(
            disabled,
            "/analysis/generate",
            json!({"matchId": "g-3", "homeTeam": {"name": "A"}, "awayTeam": {"name": "B"}}),
        )
        .await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    fn app_without_pipeline(store: Arc<MemoryAnalysisStore>) -> Router {
        app(AppState::new(store, None, 10))
    }

    #[tokio::test]
    async fn search_matches_names_case_insensitively() {
        let store = Arc::new(MemoryAnalysisStore::new());
        store.insert(&named_record("1", "Al Ahly", "Zamalek", "Premier League", 30)).await.unwrap();
        store.insert(&named_record("2", "Pyramids", "Al Masry", "Egypt Cup", 20)).await.unwrap();
        store.insert(&named_record("3", "Ismaily", "ENPPI", "Premier League", 10)).await.unwrap();
        let app = app_without_pipeline(store);

        let (status, body) = send(app.clone(), "GET", "/analysis/search/query?q=premier").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        let ids = body["data"]
            .as_array()
            .unwrap()
            .iter()
            .map(|r| r["matchId"].as_str().unwrap().to_string())
            .collect::<Vec<_>>();
        assert_eq!(ids, vec!["3", "1"]);

        let (_, body) = send(app.clone(), "GET", "/analysis/search/query?q=AL%20MASRY").await;
        assert_eq!(body["data"][0]["matchId"], "2");

        let (status, body) = send(app, "GET", "/analysis/search/query").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"], json!([]));
    }

    #[tokio::test]
    async fn filter_narrows_by_team_tournament_and_date() {
        let store = Arc::new(MemoryAnalysisStore::new());
        store.insert(&named_record("1", "Al Ahly", "Zamalek", "Premier League", 30)).await.unwrap();
        store.insert(&named_record("2", "Zamalek", "Pyramids", "Egypt Cup", 20)).await.unwrap();
        store.insert(&named_record("3", "Ismaily", "ENPPI", "Premier League", 10)).await.unwrap();
        let app = app_without_pipeline(store);

        let (_, body) = send(app.clone(), "GET", "/analysis/filter/options?team=Zamalek").await;
        assert_eq!(body["data"].as_array().map(Vec::len), Some(2));
        assert_eq!(body["data"][0]["matchId"], "2");

        let (_, body) = send(
            app.clone(),
            "GET",
            "/analysis/filter/options?team=Zamalek&tournament=Premier%20League&date=2026-02-20",
        )
        .await;
        assert_eq!(body["data"].as_array().map(Vec::len), Some(1));
        assert_eq!(body["data"][0]["matchId"], "1");

        let (_, body) = send(app.clone(), "GET", "/analysis/filter/options?date=2026-03-01").await;
        assert_eq!(body["data"], json!([]));

        let (status, body) = send(app, "GET", "/analysis/filter/options?date=someday").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "invalid date: someday");
    }

    #[tokio::test]
    async fn daily_stats_and_health_report_stored_analyses() {
        let store = Arc::new(MemoryAnalysisStore::new());
        let app = app_without_pipeline(store.clone());

        let (status, body) = send(app.clone(), "GET", "/analysis/test").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Analysis API is working");
        assert_eq!(body["totalAnalyses"], 0);
        assert!(body["latestAnalysis"].is_null());
        assert!(body["timestamp"].is_string());

        let day = |d: u32, h: u32| Utc.with_ymd_and_hms(2026, 2, d, h, 0, 0).single().unwrap();
        for (id, created) in [("a", day(21, 8)), ("b", day(21, 22)), ("c", day(23, 12))] {
            let mut r = record(id, 0);
            r.created_at = created;
            store.insert(&r).await.unwrap();
        }

        let (_, body) = send(app.clone(), "GET", "/analysis/stats/daily").await;
        assert_eq!(
            body["data"],
            json!([
                {"date": "2026-02-23", "count": 1},
                {"date": "2026-02-21", "count": 2}
            ])
        );

        let (_, body) = send(app, "GET", "/analysis/test").await;
        assert_eq!(body["totalAnalyses"], 3);
        assert_eq!(body["latestAnalysis"]["matchId"], "c");
    }

    #[test]
    fn since_accepts_timestamps_and_plain_dates() {
        let midnight = parse_since("2026-02-20").expect("date");
        assert_eq!(midnight.to_rfc3339(), "2026-02-20T00:00:00+00:00");
        let stamp = parse_since("2026-02-20T18:00:00+02:00").expect("timestamp");
        assert_eq!(stamp.to_rfc3339(), "2026-02-20T16:00:00+00:00");
        assert!(parse_since("20/02/2026").is_none());
    }
}
