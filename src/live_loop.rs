//! Live loop (C10): an independent long-running poll of `/fixtures?live=all`,
//! separate from the scheduler's trigger-driven jobs since it runs on its own
//! tight cadence rather than a cron/interval trigger.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use serde_json::Value;
use tokio::time::sleep;

use crate::db::{self, CoreRow};
use crate::delta_detector::CompareState;
use crate::error::{IngestError, Result};
use crate::jobs::JobContext;
use crate::transforms::fixtures;

const HARD_FLOOR_SECONDS: u64 = 15;
const MAX_BACKOFF_SECONDS: u64 = 60;

pub struct LiveLoopConfig {
    pub poll_interval_seconds: u64,
    pub tracked_league_ids: HashSet<i64>,
    pub dry_run: bool,
    /// Per-iteration cap on `/venues?id=` enrichment calls for fixtures whose
    /// venue landed as a minimal FK-safety stub. `0` disables the pass.
    pub venues_backfill_max_per_run: i64,
}

fn compare_state_from_item(item: &Value) -> CompareState {
    CompareState {
        status: item["fixture"]["status"]["short"].as_str().unwrap_or_default().to_string(),
        goals_home: item["goals"]["home"].as_i64(),
        goals_away: item["goals"]["away"].as_i64(),
        elapsed: item["fixture"]["status"]["elapsed"].as_i64(),
    }
}

fn fixture_row_to_core(r: &fixtures::FixtureRow) -> CoreRow {
    vec![
        ("id".to_string(), Value::from(r.fixture_id)),
        ("league_id".to_string(), Value::from(r.league_id)),
        ("season".to_string(), Value::from(r.season)),
        ("home_team_id".to_string(), Value::from(r.home_team_id)),
        ("away_team_id".to_string(), Value::from(r.away_team_id)),
        ("venue_id".to_string(), r.venue_id.map(Value::from).unwrap_or(Value::Null)),
        ("status_short".to_string(), Value::from(r.status_short.clone())),
        ("status_long".to_string(), Value::from(r.status_long.clone())),
        ("elapsed".to_string(), r.elapsed.map(Value::from).unwrap_or(Value::Null)),
        ("goals_home".to_string(), r.goals_home.map(Value::from).unwrap_or(Value::Null)),
        ("goals_away".to_string(), r.goals_away.map(Value::from).unwrap_or(Value::Null)),
        ("score".to_string(), r.score.clone()),
        ("kickoff_utc".to_string(), r.kickoff_utc.map(|t| Value::from(t.to_rfc3339())).unwrap_or(Value::Null)),
        ("needs_score_verification".to_string(), Value::from(r.needs_score_verification)),
    ]
}

const FIXTURE_UPDATE_COLS: &[&str] = &[
    "league_id", "season", "home_team_id", "away_team_id", "venue_id", "status_short", "status_long",
    "elapsed", "goals_home", "goals_away", "score", "kickoff_utc", "needs_score_verification",
];

const FIXTURE_DETAILS_UPDATE_COLS: &[&str] = &["events", "lineups", "statistics", "players"];

fn fixture_details_row_to_core(r: &fixtures::FixtureDetailsRow) -> CoreRow {
    vec![
        ("fixture_id".to_string(), Value::from(r.fixture_id)),
        ("events".to_string(), r.events.clone().unwrap_or(Value::Null)),
        ("lineups".to_string(), r.lineups.clone().unwrap_or(Value::Null)),
        ("statistics".to_string(), r.statistics.clone().unwrap_or(Value::Null)),
        ("players".to_string(), r.players.clone().unwrap_or(Value::Null)),
    ]
}

/// One polling iteration. Returns the number of fixtures that changed, or an
/// error the caller's backoff policy acts on.
async fn poll_once(ctx: &JobContext, cfg: &LiveLoopConfig) -> Result<usize> {
    let mut params = HashMap::new();
    params.insert("live".to_string(), "all".to_string());

    ctx.limiter.acquire_token().await?;
    let result = ctx.client.get("/fixtures", &params).await?;
    ctx.limiter.update_from_headers(&result.headers)?;

    let body = serde_json::json!({
        "get": result.data.get,
        "parameters": result.data.parameters,
        "errors": result.data.errors,
        "results": result.data.results,
        "response": result.data.response,
    });

    if !cfg.dry_run {
        let requested_params = serde_json::to_value(&params).map_err(|e| IngestError::Transform(e.to_string()))?;
        let headers_value = serde_json::to_value(&result.headers).map_err(|e| IngestError::Transform(e.to_string()))?;
        db::upsert_raw(&ctx.pool, "/fixtures", &requested_params, result.status as i32, &headers_value, &body)
            .await
            .map_err(|e| IngestError::Database(e.to_string()))?;
    }

    let items: Vec<Value> = body
        .get("response")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    // Deliberate: an empty tracked set polls everything rather than nothing,
    // since the call already costs one token regardless of how we filter.
    let relevant: Vec<Value> = if cfg.tracked_league_ids.is_empty() {
        items
    } else {
        items
            .into_iter()
            .filter(|item| item["league"]["id"].as_i64().map(|id| cfg.tracked_league_ids.contains(&id)).unwrap_or(false))
            .collect()
    };

    let mut changed_by_pair: HashMap<(i64, i64), Vec<Value>> = HashMap::new();
    for item in &relevant {
        let Some(fixture_id) = item["fixture"]["id"].as_i64() else { continue };
        let state = compare_state_from_item(item);
        if !ctx.delta_detector.has_changed(fixture_id, &state).await {
            continue;
        }
        let league_id = item["league"]["id"].as_i64().unwrap_or_default();
        let season = item["league"]["season"].as_i64().unwrap_or_default();
        changed_by_pair.entry((league_id, season)).or_default().push(item.clone());
    }

    if changed_by_pair.is_empty() {
        tracing::info!(polled = relevant.len(), changed = 0, "live_loop_snapshot");
        return Ok(0);
    }

    let mut total_changed = 0usize;
    for ((league_id, season), items) in changed_by_pair {
        let envelope = serde_json::json!({"response": items.clone()});

        if !cfg.dry_run {
            crate::dependencies::ensure_fixtures_dependencies(&ctx.pool, &ctx.client, &ctx.limiter, league_id, Some(season), &envelope)
                .await
                .map_err(|e| IngestError::Dependency(e.to_string()))?;
        }

        let rows = fixtures::transform_fixtures(&envelope);
        if rows.is_empty() {
            continue;
        }

        if !cfg.dry_run && cfg.venues_backfill_max_per_run > 0 {
            if let Err(e) = crate::dependencies::backfill_venue_details(&ctx.pool, &ctx.client, &ctx.limiter, cfg.venues_backfill_max_per_run).await {
                tracing::warn!(league_id, season, err = %e, "live_loop_venues_backfill_failed");
            }
        }

        let detail_rows: Vec<fixtures::FixtureDetailsRow> = items
            .iter()
            .filter_map(|item| {
                let fixture_id = item["fixture"]["id"].as_i64()?;
                fixtures::transform_fixture_details(
                    fixture_id,
                    item.get("events"),
                    item.get("lineups"),
                    item.get("statistics"),
                    item.get("players"),
                )
            })
            .collect();

        if !cfg.dry_run {
            let mut tx = db::begin_scope(&ctx.pool).await.map_err(|e| IngestError::Database(e.to_string()))?;
            let write_result: Result<()> = async {
                let core_rows: Vec<CoreRow> = rows.iter().map(fixture_row_to_core).collect();
                db::upsert_core_in_tx(&mut tx, "core.fixtures", &core_rows, &["id"], FIXTURE_UPDATE_COLS)
                    .await
                    .map_err(|e| IngestError::Database(e.to_string()))?;

                let detail_core_rows: Vec<CoreRow> = detail_rows.iter().map(fixture_details_row_to_core).collect();
                db::upsert_core_in_tx(&mut tx, "core.fixture_details", &detail_core_rows, &["fixture_id"], FIXTURE_DETAILS_UPDATE_COLS)
                    .await
                    .map_err(|e| IngestError::Database(e.to_string()))?;

                Ok(())
            }
            .await;

            match write_result {
                Ok(()) => {
                    db::commit_scope(tx).await.map_err(|e| IngestError::Database(e.to_string()))?;
                    for item in &items {
                        if let Some(fixture_id) = item["fixture"]["id"].as_i64() {
                            let state = compare_state_from_item(item);
                            if let Err(e) = ctx.delta_detector.update_cache(fixture_id, &state).await {
                                tracing::warn!(fixture_id, err = %e, "live_loop_delta_cache_update_failed");
                            }
                        }
                    }
                }
                Err(e) => {
                    db::rollback_scope(tx).await;
                    return Err(e);
                }
            }
        }

        total_changed += rows.len();
    }

    tracing::info!(polled = relevant.len(), changed = total_changed, "live_loop_snapshot");
    Ok(total_changed)
}

/// Backoff policy: 429 doubles the sleep each consecutive failure (capped),
/// server/transport errors sleep one normal interval, and an emergency stop
/// ends the loop outright rather than sleeping at all.
pub async fn run(ctx: &JobContext, cfg: LiveLoopConfig) -> Result<()> {
    let interval = cfg.poll_interval_seconds.max(HARD_FLOOR_SECONDS);
    let mut backoff_secs = interval;

    loop {
        match poll_once(ctx, &cfg).await {
            Ok(_) => {
                backoff_secs = interval;
                sleep(Duration::from_secs(interval)).await;
            }
            Err(e) if e.is_fatal() => {
                tracing::error!(err = %e, "live_loop_emergency_stop");
                return Err(e);
            }
            Err(IngestError::RateLimited(msg)) => {
                tracing::warn!(err = %msg, backoff_secs, "live_loop_rate_limited");
                sleep(Duration::from_secs(backoff_secs)).await;
                backoff_secs = (backoff_secs * 2).min(MAX_BACKOFF_SECONDS);
            }
            Err(e) => {
                tracing::warn!(err = %e, interval, "live_loop_transient_error");
                sleep(Duration::from_secs(interval)).await;
            }
        }
    }
}
