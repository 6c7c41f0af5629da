mod config;
mod coverage;
mod db;
mod delta_detector;
mod dependencies;
mod error;
mod http_client;
mod jobs;
mod live_loop;
mod rate_limiter;
mod scheduler;
mod scope_policy;
mod transforms;

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::jobs::{JobContext, LeagueSeason};

#[derive(Parser)]
#[command(name = "fixture-ingest")]
#[command(about = "Football fixture ingestion service: scheduled jobs, a live polling loop, and ad-hoc job runs")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the cron/interval job catalogue until signalled.
    Scheduler,
    /// Run the live-fixtures polling loop until signalled.
    LiveLoop {
        #[arg(long, default_value_t = 15)]
        poll_interval_seconds: u64,
        #[arg(long)]
        dry_run: bool,
    },
    /// Execute one catalogue job once, by job id, for manual backfills or ops.
    RunJob { job_id: String },
    /// Load and validate all YAML configuration without making network calls.
    CheckConfig,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("LOG_LEVEL").unwrap_or_else(|_| EnvFilter::new("info"));

    match std::env::var("LOG_FILE") {
        Ok(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .unwrap_or_else(|e| panic!("opening LOG_FILE {path}: {e}"));
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .json()
                .with_writer(move || file.try_clone().expect("clone LOG_FILE handle"))
                .init();
        }
        Err(_) => {
            tracing_subscriber::fmt().with_env_filter(filter).json().init();
        }
    }
}

async fn build_job_context() -> Result<JobContext> {
    let api_cfg = config::load_api_config(None).context("loading api config")?;
    let rl_cfg = config::load_rate_limiter_config(None).context("loading rate limiter config")?;
    let coverage_cfg = config::load_coverage_config(None).context("loading coverage config")?;
    let scope_cfg = config::load_scope_policy_config(None).context("loading scope policy config")?;

    let pool = db::create_pool().await.context("creating database pool")?;
    let client = http_client::ApiClient::new(api_cfg.base_url, api_cfg.timeout_seconds, &api_cfg.api_key_env)
        .context("building API client")?;
    let limiter = Arc::new(rate_limiter::RateLimiter::new(
        rl_cfg.minute_soft_limit,
        rl_cfg.token_bucket_per_minute as f64 / 60.0,
        Some(rl_cfg.emergency_stop_threshold),
    ));
    let redis_url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
    let delta_detector = delta_detector::DeltaDetector::new(&redis_url).context("connecting to redis")?;

    Ok(JobContext { pool, client, limiter, delta_detector, scope_policy: scope_cfg, coverage_config: coverage_cfg })
}

/// Derives the tracked (league, season) pairs for a single ad-hoc job run
/// the same way the scheduler would for its scheduled firing.
fn tracked_pairs_for_run_job(job: &config::JobDef, jobs_dir: &std::path::Path) -> Vec<LeagueSeason> {
    let explicit_ids: Vec<i64> = job
        .filters
        .get("tracked_leagues")
        .or_else(|| job.mode.get("tracked_leagues"))
        .and_then(|v| v.as_sequence())
        .map(|seq| seq.iter().filter_map(|x| x.as_i64()).collect())
        .unwrap_or_default();
    let explicit_season = job.params.get("season").and_then(|v| v.as_i64());

    let (daily_ids, daily_season) = config::daily_tracked_leagues(jobs_dir);
    let ids: Vec<i64> = if explicit_ids.is_empty() { daily_ids.into_iter().collect() } else { explicit_ids };
    let season = explicit_season.or(daily_season);

    match season {
        Some(s) => ids.into_iter().map(|id| LeagueSeason { league_id: id, season: s }).collect(),
        None => Vec::new(),
    }
}

async fn run_job_once(job_id: &str) -> Result<()> {
    let ctx = build_job_context().await?;
    let jobs_dir = config::jobs_dir();

    let mut job_def = None;
    for file in ["static.yaml", "daily.yaml"] {
        let path = jobs_dir.join(file);
        if let Ok(jf) = config::load_job_file(&path) {
            if let Some(found) = jf.jobs.into_iter().find(|j| j.job_id == job_id) {
                job_def = Some(found);
                break;
            }
        }
    }
    let job_def = job_def.with_context(|| format!("no job with id '{job_id}' in {}", jobs_dir.display()))?;
    let pairs = tracked_pairs_for_run_job(&job_def, &jobs_dir);

    tracing::info!(job_id, "run_job_started");
    scheduler::dispatch(&ctx, &job_def, &pairs).await?;
    tracing::info!(job_id, "run_job_complete");
    Ok(())
}

async fn check_config() -> Result<()> {
    config::load_api_config(None).context("api config")?;
    config::load_rate_limiter_config(None).context("rate limiter config")?;
    config::load_coverage_config(None).context("coverage config")?;
    config::load_scope_policy_config(None).context("scope policy config")?;

    let jobs_dir = config::jobs_dir();
    for file in ["static.yaml", "daily.yaml"] {
        let path = jobs_dir.join(file);
        config::load_job_file(&path).with_context(|| format!("job file {}", path.display()))?;
    }
    println!("config OK");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();

    match cli.command {
        Commands::Scheduler => {
            let ctx = build_job_context().await?;
            scheduler::run(ctx).await?;
        }
        Commands::LiveLoop { poll_interval_seconds, dry_run } => {
            let ctx = build_job_context().await?;
            let jobs_dir = config::jobs_dir();
            let (tracked_ids, _season) = config::daily_tracked_leagues(&jobs_dir);
            let tracked_league_ids: HashSet<i64> = tracked_ids;
            if tracked_league_ids.is_empty() {
                tracing::warn!("live_loop_no_tracked_leagues_polling_everything");
            }
            let venues_backfill_max_per_run = std::env::var("VENUES_BACKFILL_MAX_PER_RUN")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(0);
            let cfg = live_loop::LiveLoopConfig { poll_interval_seconds, tracked_league_ids, dry_run, venues_backfill_max_per_run };
            live_loop::run(&ctx, cfg).await?;
        }
        Commands::RunJob { job_id } => run_job_once(&job_id).await?,
        Commands::CheckConfig => {
            if let Err(e) = check_config().await {
                eprintln!("config invalid: {e:#}");
                std::process::exit(1);
            }
        }
    }

    Ok(())
}
