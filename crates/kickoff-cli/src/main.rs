use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use kickoff_adapters::{EventSource, FixtureEventFeed};
use kickoff_storage::{AnalysisStore, MemoryAnalysisStore, PgAnalysisStore};
use kickoff_sync::{build_pipeline, AnalysisConfig, CycleOutcome};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "kickoff-cli")]
#[command(about = "Kickoff match analysis pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the scheduler and the web surface (default).
    Serve(StoreArgs),
    /// Run a single analysis cycle and print its outcome.
    Check {
        /// Read `today.json` / `yesterday.json` from this directory instead of the live feed.
        #[arg(long)]
        fixtures: Option<PathBuf>,
        #[command(flatten)]
        store: StoreArgs,
    },
    /// Apply database migrations.
    Migrate,
}

#[derive(Debug, Args, Default)]
struct StoreArgs {
    /// Keep analyses in process memory instead of Postgres.
    #[arg(long)]
    in_memory: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("kickoff=info".parse()?))
        .init();

    let cli = Cli::parse();
    let config = AnalysisConfig::from_env();

    match cli.command.unwrap_or(Commands::Serve(StoreArgs::default())) {
        Commands::Serve(args) => serve(&config, args).await?,
        Commands::Check { fixtures, store } => {
            let store = open_store(&config, store.in_memory).await?;
            let source = fixtures.map(|dir| Arc::new(FixtureEventFeed::new(dir)) as Arc<dyn EventSource>);
            let pipeline = build_pipeline(&config, store, source)?
                .context("GROQ_API_KEY is required to run an analysis cycle")?;

            let outcome = pipeline.run_once().await;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
            if let CycleOutcome::Aborted { reason, .. } = outcome {
                anyhow::bail!("analysis cycle aborted: {reason}");
            }
        }
        Commands::Migrate => {
            let url = config
                .database_url
                .as_deref()
                .context("DATABASE_URL is required for migrate")?;
            let store = PgAnalysisStore::connect(url).await?;
            store.migrate().await?;
            println!("migrations applied");
        }
    }

    Ok(())
}

async fn serve(config: &AnalysisConfig, args: StoreArgs) -> Result<()> {
    let store = open_store(config, args.in_memory).await?;
    let pipeline = build_pipeline(config, store.clone(), None)?.map(Arc::new);

    // Held until the web server exits; dropping it would stop the jobs.
    let mut scheduler = None;
    match (&pipeline, config.disabled_reason()) {
        (Some(pipeline), None) => {
            if let Some(sched) = pipeline.maybe_build_scheduler().await? {
                sched.start().await.context("starting analysis scheduler")?;
                scheduler = Some(sched);
            }
        }
        (_, reason) => {
            warn!(reason = reason.unwrap_or("pipeline unavailable"), "auto-analysis scheduler not started");
        }
    }

    let state = kickoff_web::AppState::new(store, pipeline, config.interval_minutes);
    let served = kickoff_web::serve(state, kickoff_web::port_from_env()).await;

    if let Some(mut sched) = scheduler {
        info!("stopping analysis scheduler");
        sched.shutdown().await.context("stopping analysis scheduler")?;
    }
    served
}

async fn open_store(config: &AnalysisConfig, in_memory: bool) -> Result<Arc<dyn AnalysisStore>> {
    if in_memory {
        info!("using in-memory analysis store");
        return Ok(Arc::new(MemoryAnalysisStore::new()));
    }
    let url = config
        .database_url
        .as_deref()
        .context("DATABASE_URL is required (or pass --in-memory)")?;
    let store = PgAnalysisStore::connect(url).await?;
    store.migrate().await?;
    Ok(Arc::new(store))
}
