//! `daily_standings`: one (league, season) pair per call to
//! `/standings`, replacing `core.standings` wholesale. Supports an optional
//! round-robin cursor so a single run only touches a bounded slice of a large
//! tracked set.

use std::collections::HashMap;

use anyhow::Result;
use serde_json::Value;

use crate::db::{self, progress};
use crate::transforms::standings;

use super::{filter_in_scope, JobContext, LeagueSeason};

async fn fetch(ctx: &JobContext, league_id: i64, season: i64) -> Result<Value> {
    let mut params = HashMap::new();
    params.insert("league".to_string(), league_id.to_string());
    params.insert("season".to_string(), season.to_string());

    ctx.limiter.acquire_token().await?;
    let result = ctx.client.get("/standings", &params).await?;
    ctx.limiter.update_from_headers(&result.headers)?;
    let requested_params = serde_json::to_value(&params)?;
    let headers_value = serde_json::to_value(&result.headers)?;
    let body = serde_json::json!({
        "get": result.data.get,
        "parameters": result.data.parameters,
        "errors": result.data.errors,
        "results": result.data.results,
        "response": result.data.response,
    });
    db::upsert_raw(&ctx.pool, "/standings", &requested_params, result.status as i32, &headers_value, &body).await?;
    Ok(body)
}

async fn refresh_one(ctx: &JobContext, pair: LeagueSeason) -> Result<()> {
    let body = fetch(ctx, pair.league_id, pair.season).await?;
    crate::dependencies::ensure_standings_dependencies(&ctx.pool, &ctx.client, &ctx.limiter, pair.league_id, pair.season, &body).await?;

    let rows = standings::transform_standings(&body);
    if rows.is_empty() {
        return Ok(());
    }

    let team_ids: Vec<i64> = rows.iter().map(|r| r.team_id).collect();
    let missing = progress::missing_team_ids(&ctx.pool, &team_ids).await?;
    if !missing.is_empty() {
        tracing::warn!(league_id = pair.league_id, season = pair.season, missing = ?missing, "daily_standings_skipped_missing_teams");
        return Ok(());
    }

    db::standings::replace_standings(&ctx.pool, pair.league_id, pair.season, &rows).await?;
    Ok(())
}

/// Processes every in-scope pair, oldest-first with no cursor state — used
/// when the tracked set is small enough to refresh in full each run.
pub async fn run_full(ctx: &JobContext, pairs: &[LeagueSeason]) -> Result<()> {
    let in_scope = filter_in_scope(ctx, "/standings", pairs).await;
    for pair in in_scope {
        if let Err(e) = refresh_one(ctx, pair).await {
            tracing::warn!(league_id = pair.league_id, season = pair.season, err = %e, "daily_standings_refresh_failed");
        }
    }
    Ok(())
}

/// Processes at most `batch_size` pairs starting from the persisted cursor;
/// wrapping past the end of the tracked set advances the lap counter.
pub async fn run_round_robin(ctx: &JobContext, job_id: &str, pairs: &[LeagueSeason], batch_size: usize) -> Result<()> {
    let in_scope = filter_in_scope(ctx, "/standings", pairs).await;
    if in_scope.is_empty() {
        return Ok(());
    }

    let mut cursor = progress::get_standings_refresh_progress(&ctx.pool, job_id).await?;
    let mut index = cursor.cursor_index as usize % in_scope.len();

    for _ in 0..batch_size.min(in_scope.len()) {
        let pair = in_scope[index];
        if let Err(e) = refresh_one(ctx, pair).await {
            tracing::warn!(league_id = pair.league_id, season = pair.season, err = %e, "daily_standings_round_robin_failed");
        }
        index += 1;
        if index >= in_scope.len() {
            index = 0;
            cursor.lap += 1;
        }
    }

    progress::save_standings_refresh_progress(&ctx.pool, job_id, index as i64, cursor.lap).await?;
    Ok(())
}
