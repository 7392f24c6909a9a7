//! Scheduled discovery and analysis of finished matches.

use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use futures::FutureExt;
use kickoff_adapters::{
    fallback_narrative, ChatCompletionGenerator, DayWindow, EventSource, HttpEventFeed,
    NarrativeGenerator, FALLBACK_MODEL,
};
use kickoff_core::{
    is_finished, missing_team, resolve, AnalysisRecord, CoreError, EventFacts, RawEvent,
};
use kickoff_storage::{AnalysisStore, BackoffPolicy, StoreError};
use thiserror::Error;
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

pub mod config;
pub mod stats;

pub use config::AnalysisConfig;
pub use stats::{CycleOutcome, CycleSummary, RunStats, StatsSnapshot};

pub const CRATE_NAME: &str = "kickoff-sync";

/// Days covered by one discovery pass (today and yesterday).
pub const DISCOVERY_WINDOW_DAYS: i64 = 2;

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub enabled: bool,
    pub interval: Duration,
    pub startup_delay: Duration,
    pub timezone: String,
    pub pacing: Duration,
    pub backoff: BackoffPolicy,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(600),
            startup_delay: Duration::from_secs(10),
            timezone: "Africa/Cairo".to_string(),
            pacing: Duration::from_secs(3),
            backoff: BackoffPolicy::default(),
        }
    }
}

impl From<&AnalysisConfig> for PipelineSettings {
    fn from(config: &AnalysisConfig) -> Self {
        Self {
            enabled: config.enabled,
            interval: config.interval(),
            startup_delay: config.startup_delay(),
            timezone: config.feed_timezone.clone(),
            pacing: config.pacing(),
            backoff: config.backoff(),
        }
    }
}

/// Why caller-submitted match data could not be analyzed.
#[derive(Debug, Error)]
pub enum SubmitError {
    #[error(transparent)]
    Incomplete(#[from] CoreError),
    #[error("match data has no usable identifier")]
    Unidentified,
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Result of an on-demand analysis request.
#[derive(Debug, Clone)]
pub enum Submission {
    /// A new record was generated and stored.
    Created { record: AnalysisRecord, fallback: bool },
    /// The match already had a record; it is returned untouched.
    Existing(AnalysisRecord),
}

impl Submission {
    pub fn record(&self) -> &AnalysisRecord {
        match self {
            Self::Created { record, .. } | Self::Existing(record) => record,
        }
    }
}

enum EventOutcome {
    Inserted { fallback: bool },
    Duplicate,
}

struct Candidate {
    match_id: String,
    event: RawEvent,
}

/// Released on drop so a failed cycle never leaves the pipeline wedged.
struct RunGuard<'a>(&'a AtomicBool);

impl<'a> RunGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct AnalysisPipeline {
    settings: PipelineSettings,
    source: Arc<dyn EventSource>,
    store: Arc<dyn AnalysisStore>,
    generator: Arc<dyn NarrativeGenerator>,
    running: AtomicBool,
    gap_checked: AtomicBool,
    stats: Mutex<RunStats>,
}

impl AnalysisPipeline {
    pub fn new(
        settings: PipelineSettings,
        source: Arc<dyn EventSource>,
        store: Arc<dyn AnalysisStore>,
        generator: Arc<dyn NarrativeGenerator>,
    ) -> Self {
        Self {
            settings,
            source,
            store,
            generator,
            running: AtomicBool::new(false),
            gap_checked: AtomicBool::new(false),
            stats: Mutex::new(RunStats::default()),
        }
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub async fn stats(&self) -> StatsSnapshot {
        let stats = self.stats.lock().await.clone();
        StatsSnapshot::from_stats(
            &stats,
            self.is_running(),
            self.settings.enabled,
            self.settings.interval.as_secs() / 60,
        )
    }

    /// One discovery and analysis cycle. Returns [`CycleOutcome::Skipped`]
    /// without touching the feed, generator or store when a cycle is already
    /// in flight.
    pub async fn run_once(&self) -> CycleOutcome {
        let Some(_guard) = RunGuard::acquire(&self.running) else {
            info!("analysis cycle already running; skipping");
            return CycleOutcome::Skipped;
        };

        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        {
            let mut stats = self.stats.lock().await;
            stats.total_checks += 1;
            stats.last_check = Some(started_at);
        }

        self.run_cycle(run_id, started_at)
            .instrument(info_span!("analysis_cycle", %run_id))
            .await
    }

    async fn run_cycle(&self, run_id: Uuid, started_at: DateTime<Utc>) -> CycleOutcome {
        let mut summary = CycleSummary::new(run_id, started_at);
        self.warn_on_catch_up_gap().await;

        let worklist = match self.discover(&mut summary).await {
            Ok(worklist) => worklist,
            Err(err) => {
                self.stats.lock().await.errors += 1;
                error!(error = %err, "analysis cycle aborted during discovery");
                return CycleOutcome::Aborted {
                    run_id,
                    reason: err.to_string(),
                };
            }
        };

        info!(
            fetched = summary.fetched_events,
            finished = summary.finished_events,
            already_analyzed = summary.already_analyzed,
            pending = worklist.len(),
            "discovery complete"
        );

        for (index, candidate) in worklist.into_iter().enumerate() {
            if index > 0 && !self.settings.pacing.is_zero() {
                tokio::time::sleep(self.settings.pacing).await;
            }

            let match_id = candidate.match_id.clone();
            let result = AssertUnwindSafe(self.process(candidate)).catch_unwind().await;
            match result {
                Ok(Ok(EventOutcome::Inserted { fallback })) => {
                    summary.analyzed += 1;
                    if fallback {
                        summary.fallbacks += 1;
                    }
                    let mut stats = self.stats.lock().await;
                    stats.matches_analyzed += 1;
                    stats.last_analysis = Some(Utc::now());
                }
                Ok(Ok(EventOutcome::Duplicate)) => summary.duplicates += 1,
                Ok(Err(err)) => {
                    summary.errors += 1;
                    self.stats.lock().await.errors += 1;
                    error!(%match_id, error = %err, "failed to analyze match");
                }
                Err(panic) => {
                    summary.errors += 1;
                    self.stats.lock().await.errors += 1;
                    error!(%match_id, panic = %panic_message(&*panic), "match analysis panicked");
                }
            }
        }

        summary.finished_at = Utc::now();
        info!(
            analyzed = summary.analyzed,
            fallbacks = summary.fallbacks,
            duplicates = summary.duplicates,
            errors = summary.errors,
            unresolvable = summary.unresolvable,
            "analysis cycle complete"
        );
        CycleOutcome::Completed(summary)
    }

    async fn discover(&self, summary: &mut CycleSummary) -> Result<Vec<Candidate>, StoreError> {
        let mut seen = HashSet::new();
        let mut candidates = Vec::new();

        for window in DayWindow::ALL {
            let events = self.source.fetch(window, &self.settings.timezone).await;
            summary.fetched_events += events.len();

            for event in events {
                if !is_finished(&event) {
                    continue;
                }
                summary.finished_events += 1;

                let Some(identity) = resolve(&event) else {
                    summary.unresolvable += 1;
                    warn!(
                        %window,
                        home = event.home_team.as_ref().and_then(|t| t.name.as_deref()).unwrap_or("?"),
                        away = event.away_team.as_ref().and_then(|t| t.name.as_deref()).unwrap_or("?"),
                        "finished event has no usable identifier; dropping"
                    );
                    continue;
                };
                if !seen.insert(identity.match_id.clone()) {
                    debug!(match_id = %identity.match_id, %window, "event already seen this cycle");
                    continue;
                }
                debug!(match_id = %identity.match_id, source = ?identity.source, %window, "resolved match identity");
                candidates.push(Candidate {
                    match_id: identity.match_id,
                    event,
                });
            }
        }

        let mut worklist = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            if self.store.exists(&candidate.match_id).await? {
                summary.already_analyzed += 1;
            } else {
                worklist.push(candidate);
            }
        }
        Ok(worklist)
    }

    async fn process(&self, candidate: Candidate) -> Result<EventOutcome, StoreError> {
        if let Some(side) = missing_team(&candidate.event) {
            warn!(match_id = %candidate.match_id, side, "finished event has no team name; using placeholder");
        }
        let facts = EventFacts::from_raw(candidate.match_id, &candidate.event);
        let (record, fallback) = self.analyze(facts).await;
        match self.store.insert(&record).await {
            Ok(()) => {
                info!(match_id = %record.match_id, model = %record.generator_model, elapsed_ms = record.processing_time_ms, "analysis stored");
                Ok(EventOutcome::Inserted { fallback })
            }
            Err(StoreError::Duplicate { match_id }) => {
                info!(%match_id, "analysis already stored by another writer");
                Ok(EventOutcome::Duplicate)
            }
            Err(err) => Err(err),
        }
    }

    /// Generates with retry, falling back to the template narrative once the
    /// attempts are exhausted. Never fails.
    async fn analyze(&self, facts: EventFacts) -> (AnalysisRecord, bool) {
        let started = Instant::now();
        info!(match_id = %facts.match_id, title = %facts.title(), score = %facts.score_line(), "analyzing match");

        let generator = &self.generator;
        let facts_ref = &facts;
        let generated = self
            .settings
            .backoff
            .retry(move |attempt| {
                debug!(match_id = %facts_ref.match_id, attempt, "requesting narrative");
                generator.generate(facts_ref)
            })
            .await;

        let (narrative, model, fallback) = match generated {
            Ok(narrative) => (narrative, self.generator.model().to_string(), false),
            Err(err) => {
                warn!(match_id = %facts.match_id, error = %err, "generation exhausted; storing fallback narrative");
                (fallback_narrative(&facts), FALLBACK_MODEL.to_string(), true)
            }
        };

        let elapsed_ms = i64::try_from(started.elapsed().as_millis()).unwrap_or(i64::MAX);
        let record = AnalysisRecord::from_facts(facts, narrative, model, elapsed_ms, Utc::now());
        (record, fallback)
    }

    /// Analyzes caller-supplied match data outside the scheduled cycle. The
    /// run guard and cycle counters are left alone; an already stored match
    /// is returned as is.
    pub async fn analyze_submitted(&self, event: &RawEvent) -> Result<Submission, SubmitError> {
        let identity = resolve(event).ok_or(SubmitError::Unidentified)?;
        let facts = EventFacts::from_complete(identity.match_id, event)?;

        if let Some(existing) = self.store.get(&facts.match_id).await? {
            info!(match_id = %facts.match_id, "analysis already exists; returning stored record");
            return Ok(Submission::Existing(existing));
        }

        let (record, fallback) = self.analyze(facts).await;
        match self.store.insert(&record).await {
            Ok(()) => {
                info!(match_id = %record.match_id, model = %record.generator_model, "submitted analysis stored");
                Ok(Submission::Created { record, fallback })
            }
            Err(StoreError::Duplicate { match_id }) => match self.store.get(&match_id).await? {
                Some(existing) => Ok(Submission::Existing(existing)),
                None => Err(StoreError::Unavailable(format!(
                    "analysis for match {match_id} reported as duplicate but not found"
                ))
                .into()),
            },
            Err(err) => Err(err.into()),
        }
    }

    /// Warns once per process when the newest stored analysis predates the
    /// discovery window, meaning matches finished during downtime are gone.
    async fn warn_on_catch_up_gap(&self) {
        if self.gap_checked.swap(true, Ordering::AcqRel) {
            return;
        }
        match self.store.latest_created_at().await {
            Ok(Some(latest)) => {
                if let Some(gap) = catch_up_gap(latest, Utc::now()) {
                    warn!(
                        %latest,
                        gap_hours = gap.num_hours(),
                        "newest stored analysis is older than the discovery window; earlier matches will not be analyzed"
                    );
                }
            }
            Ok(None) => debug!("no stored analyses yet"),
            Err(err) => debug!(error = %err, "could not read analysis high-water mark"),
        }
    }

    /// Initial cycle after the startup delay, then one every interval.
    /// `None` when the pipeline is disabled.
    pub async fn maybe_build_scheduler(self: &Arc<Self>) -> Result<Option<JobScheduler>> {
        if !self.settings.enabled {
            return Ok(None);
        }

        let sched = JobScheduler::new().await.context("creating scheduler")?;

        let pipeline = Arc::clone(self);
        let startup = Job::new_one_shot_async(self.settings.startup_delay, move |_uuid, _l| {
            let pipeline = Arc::clone(&pipeline);
            Box::pin(async move {
                pipeline.run_once().await;
            })
        })
        .context("creating startup analysis job")?;
        sched.add(startup).await.context("adding startup analysis job")?;

        let pipeline = Arc::clone(self);
        let repeated = Job::new_repeated_async(self.settings.interval, move |_uuid, _l| {
            let pipeline = Arc::clone(&pipeline);
            Box::pin(async move {
                pipeline.run_once().await;
            })
        })
        .with_context(|| format!("creating analysis job every {:?}", self.settings.interval))?;
        sched.add(repeated).await.context("adding analysis job")?;

        info!(
            interval_minutes = self.settings.interval.as_secs() / 60,
            startup_delay_secs = self.settings.startup_delay.as_secs(),
            "analysis scheduler configured"
        );
        Ok(Some(sched))
    }
}

/// Gap between the newest stored analysis and `now`, if it exceeds the
/// discovery window.
pub fn catch_up_gap(latest: DateTime<Utc>, now: DateTime<Utc>) -> Option<chrono::Duration> {
    let gap = now - latest;
    (gap > chrono::Duration::days(DISCOVERY_WINDOW_DAYS)).then_some(gap)
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(text) = panic.downcast_ref::<&str>() {
        (*text).to_string()
    } else if let Some(text) = panic.downcast_ref::<String>() {
        text.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Builds the HTTP-backed pipeline. `Ok(None)` when the generator has no
/// credentials; the reason is logged.
pub fn build_pipeline(
    config: &AnalysisConfig,
    store: Arc<dyn AnalysisStore>,
    source: Option<Arc<dyn EventSource>>,
) -> Result<Option<AnalysisPipeline>> {
    let Some(generator_config) = config.generator_config() else {
        warn!("GROQ_API_KEY is not set; match analysis disabled");
        return Ok(None);
    };
    let generator = ChatCompletionGenerator::new(generator_config)
        .context("building narrative generator")?;

    let source: Arc<dyn EventSource> = match source {
        Some(source) => source,
        None => Arc::new(
            HttpEventFeed::new(config.feed_base_url.clone(), config.feed_http())
                .context("building event feed client")?,
        ),
    };

    Ok(Some(AnalysisPipeline::new(
        PipelineSettings::from(config),
        source,
        store,
        Arc::new(generator),
    )))
}
