//! Scheduler (C10): reads the static + daily job catalogue from YAML,
//! attaches each enabled job to a cron or fixed-interval trigger, and runs
//! until SIGINT/SIGTERM. Every job body is guarded so an invocation that's
//! still running when its trigger fires again is skipped rather than
//! allowed to overlap (`tokio-cron-scheduler` has no built-in max_instances,
//! so the guard is a plain per-job-id running set).

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::signal::unix::{signal, SignalKind};
use tokio_cron_scheduler::{Job, JobScheduler};

use crate::config::{self, JobDef, JobTrigger};
use crate::jobs::{self, JobContext, LeagueSeason};

fn env_flag(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(v) => matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}

/// Inherits tracked leagues/season from the daily config for any
/// `bootstrap_leagues`/`bootstrap_teams` job whose own filters/mode don't
/// name them explicitly — mirroring how the daily list is the source of
/// truth for what's tracked at all.
fn tracked_pairs_for_job(job: &JobDef, jobs_dir: &Path) -> Vec<LeagueSeason> {
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

async fn bootstrap_static_on_start(ctx: &JobContext) {
    if !env_flag("BOOTSTRAP_STATIC_ON_START", true) {
        tracing::info!("bootstrap_static_on_start_disabled");
        return;
    }
    if jobs::bootstrap::countries_table_empty(&ctx.pool).await {
        tracing::info!("bootstrap_countries_on_start");
        if let Err(e) = jobs::bootstrap::bootstrap_countries(ctx).await {
            tracing::warn!(err = %e, "bootstrap_countries_on_start_failed");
        }
    }
    if jobs::bootstrap::timezones_table_empty(&ctx.pool).await {
        tracing::info!("bootstrap_timezones_on_start");
        if let Err(e) = jobs::bootstrap::bootstrap_timezones(ctx).await {
            tracing::warn!(err = %e, "bootstrap_timezones_on_start_failed");
        }
    }
}

/// Dispatches one job invocation by id, skipping silently (with a log line)
/// if the previous invocation of the same job id hasn't finished yet.
async fn run_job_by_id(ctx: Arc<JobContext>, job: JobDef, pairs: Vec<LeagueSeason>) {
    tracing::info!(job_id = %job.job_id, job_type = %job.job_type, "job_started");
    let result = dispatch(&ctx, &job, &pairs).await;
    match result {
        Ok(()) => tracing::info!(job_id = %job.job_id, "job_complete"),
        Err(e) => tracing::error!(job_id = %job.job_id, err = %e, "job_failed"),
    }
}

pub(crate) async fn dispatch(ctx: &JobContext, job: &JobDef, pairs: &[LeagueSeason]) -> Result<()> {
    match job.job_id.as_str() {
        "bootstrap_countries" => jobs::bootstrap::bootstrap_countries(ctx).await,
        "bootstrap_timezones" => jobs::bootstrap::bootstrap_timezones(ctx).await,
        "bootstrap_leagues" => {
            let season = job.params.get("season").and_then(|v| v.as_i64()).context("bootstrap_leagues requires params.season")?;
            let tracked: HashSet<i64> = pairs.iter().map(|p| p.league_id).collect();
            jobs::bootstrap::bootstrap_leagues(ctx, season, &tracked).await
        }
        "bootstrap_teams" => {
            let season = job.params.get("season").and_then(|v| v.as_i64()).context("bootstrap_teams requires params.season")?;
            let tracked: HashSet<i64> = pairs.iter().map(|p| p.league_id).collect();
            jobs::bootstrap::bootstrap_teams(ctx, season, &tracked).await
        }
        "daily_fixtures_by_date" => jobs::daily_fixtures::run_global_by_date(ctx).await,
        "daily_fixtures_per_league" => jobs::daily_fixtures::run_per_league(ctx, pairs).await,
        "daily_standings" => {
            let batch_size = job.mode.get("max_leagues_per_run").and_then(|v| v.as_i64());
            match batch_size {
                Some(n) => jobs::daily_standings::run_round_robin(ctx, &job.job_id, pairs, n as usize).await,
                None => jobs::daily_standings::run_full(ctx, pairs).await,
            }
        }
        "injuries_hourly" => jobs::injuries_hourly::run(ctx, pairs).await,
        "top_scorers_daily" => jobs::leaderboards::top_scorers_daily(ctx, pairs).await,
        "team_statistics_refresh" => {
            let refresh_hours = job.mode.get("refresh_interval_hours").and_then(|v| v.as_i64()).unwrap_or(24);
            let max_per_run = job.mode.get("max_per_run").and_then(|v| v.as_i64()).unwrap_or(50);
            jobs::leaderboards::team_statistics_refresh(ctx, pairs, refresh_hours, max_per_run).await
        }
        "fixture_details_recent_finalize" => jobs::fixture_details::run(ctx, jobs::fixture_details::Window::RecentFinalize, 200).await,
        "fixture_details_backfill_90d" => jobs::fixture_details::run(ctx, jobs::fixture_details::Window::RollingDays(90), 100).await,
        "fixture_details_backfill_season" => {
            for pair in pairs {
                jobs::fixture_details::run(ctx, jobs::fixture_details::Window::WholeSeason { league_id: pair.league_id, season: pair.season }, 100).await?;
            }
            Ok(())
        }
        "fixtures_backfill_league_season" => {
            for pair in pairs {
                jobs::backfill::fixtures_backfill_league_season(ctx, &job.job_id, pair.league_id, pair.season).await?;
            }
            Ok(())
        }
        "standings_backfill_league_season" => {
            for pair in pairs {
                jobs::backfill::standings_backfill_league_season(ctx, &job.job_id, pair.league_id, pair.season).await?;
            }
            Ok(())
        }
        "season_rollover_watch" => jobs::season_rollover::run(ctx, pairs).await,
        "stale_live_refresh" => {
            let stale_after = job.mode.get("stale_after_minutes").and_then(|v| v.as_i64()).unwrap_or(10);
            let max_per_run = job.mode.get("max_per_run").and_then(|v| v.as_i64()).unwrap_or(100);
            jobs::stale_live_refresh::run(ctx, stale_after, max_per_run).await
        }
        "stale_scheduled_finalize" => {
            let overdue_after = job.mode.get("overdue_after_minutes").and_then(|v| v.as_i64()).unwrap_or(180);
            let max_per_run = job.mode.get("max_per_run").and_then(|v| v.as_i64()).unwrap_or(100);
            jobs::stale_scheduled_finalize::run(ctx, overdue_after, max_per_run).await
        }
        "auto_finish_stale_fixtures" => {
            let threshold_hours = job.mode.get("threshold_hours").and_then(|v| v.as_i64()).unwrap_or(3);
            let safety_lag_hours = job.mode.get("safety_lag_hours").and_then(|v| v.as_i64()).unwrap_or(1);
            let max_per_run = job.mode.get("max_per_run").and_then(|v| v.as_i64()).unwrap_or(50);
            let refetch_enabled = job.mode.get("refetch_enabled").and_then(|v| v.as_bool()).unwrap_or(true);
            jobs::auto_finish::auto_finish_stale_fixtures(ctx, threshold_hours, safety_lag_hours, max_per_run, refetch_enabled).await
        }
        "auto_finish_verification" => {
            let daily_quota = job.mode.get("daily_quota").and_then(|v| v.as_i64()).unwrap_or(200);
            jobs::auto_finish::auto_finish_verification(ctx, daily_quota, 0).await
        }
        other => anyhow::bail!("unknown job id: {other}"),
    }
}

fn to_trigger_spec(trigger: &JobTrigger) -> (Option<String>, Option<u64>) {
    match trigger {
        JobTrigger::Cron { cron } => (Some(cron.clone()), None),
        JobTrigger::Interval { seconds } => (None, Some(*seconds)),
    }
}

pub async fn run(ctx: JobContext) -> Result<()> {
    let ctx = Arc::new(ctx);
    bootstrap_static_on_start(&ctx).await;

    let jobs_dir = config::jobs_dir();
    let mut job_defs = Vec::new();
    for file in ["static.yaml", "daily.yaml"] {
        let path = jobs_dir.join(file);
        if let Ok(jf) = config::load_job_file(&path) {
            job_defs.extend(jf.jobs);
        }
    }

    let enabled: Vec<JobDef> = job_defs.into_iter().filter(|j| j.enabled && j.job_type != "live_loop").collect();
    if enabled.is_empty() {
        tracing::warn!("no_enabled_jobs");
    }

    let sched = JobScheduler::new().await.context("creating job scheduler")?;
    let running: Arc<Mutex<HashMap<String, Arc<AtomicBool>>>> = Arc::new(Mutex::new(HashMap::new()));

    for job_def in enabled {
        let Some(trigger) = job_def.interval.as_ref() else {
            tracing::warn!(job_id = %job_def.job_id, "job_missing_interval_skipped");
            continue;
        };
        let (cron, interval_secs) = to_trigger_spec(trigger);
        let pairs = tracked_pairs_for_job(&job_def, &jobs_dir);

        let job_id_label = job_def.job_id.clone();
        let flag = running.lock().unwrap().entry(job_id_label.clone()).or_insert_with(|| Arc::new(AtomicBool::new(false))).clone();

        let ctx_for_job = ctx.clone();
        let job_def_for_closure = job_def.clone();
        let pairs_for_closure = pairs.clone();

        let make_body = move || {
            let ctx = ctx_for_job.clone();
            let job_def = job_def_for_closure.clone();
            let pairs = pairs_for_closure.clone();
            let flag = flag.clone();
            Box::pin(async move {
                if flag.swap(true, Ordering::SeqCst) {
                    tracing::info!(job_id = %job_def.job_id, "job_skipped_still_running");
                    return;
                }
                run_job_by_id(ctx, job_def, pairs).await;
                flag.store(false, Ordering::SeqCst);
            }) as std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>>
        };

        let scheduled_job = match (cron, interval_secs) {
            (Some(expr), _) => Job::new_async(expr.as_str(), move |_uuid, _l| make_body())
                .with_context(|| format!("invalid cron expression for job {}", job_id_label))?,
            (None, Some(secs)) => Job::new_repeated_async(Duration::from_secs(secs), move |_uuid, _l| make_body()),
            (None, None) => {
                tracing::warn!(job_id = %job_id_label, "job_invalid_interval_skipped");
                continue;
            }
        };

        sched.add(scheduled_job).await.context("adding job to scheduler")?;
        tracing::info!(job_id = %job_id_label, "job_scheduled");
    }

    sched.start().await.context("starting scheduler")?;
    tracing::info!("scheduler_started");

    let mut sigterm = signal(SignalKind::terminate()).context("installing SIGTERM handler")?;
    tokio::select! {
        _ = tokio::signal::ctrl_c() => tracing::info!("shutdown_signal_received (SIGINT)"),
        _ = sigterm.recv() => tracing::info!("shutdown_signal_received (SIGTERM)"),
    }

    sched.shutdown().await.context("stopping scheduler")?;
    tracing::info!("scheduler_stopped");
    Ok(())
}
