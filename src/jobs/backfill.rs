//! `fixtures_backfill_league_season` and `standings_backfill_league_season`:
//! page-cursor-driven historical backfill for one (league, season) pair,
//! resumable via `core.backfill_progress` so a crash mid-backfill picks up
//! from the last successful page rather than restarting.

use std::collections::HashMap;

use anyhow::Result;
use serde_json::Value;

use crate::db::{self, progress, CoreRow};
use crate::transforms::{fixtures, standings};

use super::JobContext;

async fn fetch_page(ctx: &JobContext, endpoint: &str, params: &HashMap<String, String>) -> Result<Value> {
    ctx.limiter.acquire_token().await?;
    let result = ctx.client.get(endpoint, params).await?;
    ctx.limiter.update_from_headers(&result.headers)?;
    let requested_params = serde_json::to_value(params)?;
    let headers_value = serde_json::to_value(&result.headers)?;
    let body = serde_json::json!({
        "get": result.data.get,
        "parameters": result.data.parameters,
        "errors": result.data.errors,
        "results": result.data.results,
        "response": result.data.response,
        "paging": result.data.paging.map(|p| serde_json::json!({"current": p.current, "total": p.total})),
    });
    db::upsert_raw(&ctx.pool, endpoint, &requested_params, result.status as i32, &headers_value, &body).await?;
    Ok(body)
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

/// Advances one page per call. A run is done for this pair either when a
/// page comes back empty or once `next_page` exceeds the upstream's reported
/// `paging.total` — whichever happens first.
pub async fn fixtures_backfill_league_season(ctx: &JobContext, job_id: &str, league_id: i64, season: i64) -> Result<bool> {
    let existing = progress::get_backfill_progress(&ctx.pool, job_id, league_id, season).await?;
    if existing.as_ref().is_some_and(|p| p.completed) {
        return Ok(true);
    }
    let page = existing.as_ref().map(|p| p.next_page).unwrap_or(1);

    let mut params = HashMap::new();
    params.insert("league".to_string(), league_id.to_string());
    params.insert("season".to_string(), season.to_string());
    params.insert("page".to_string(), page.to_string());

    let body = match fetch_page(ctx, "/fixtures", &params).await {
        Ok(b) => b,
        Err(e) => {
            progress::upsert_backfill_progress(&ctx.pool, job_id, league_id, season, page, false, Some(&e.to_string())).await?;
            return Err(e);
        }
    };

    crate::dependencies::ensure_fixtures_dependencies(&ctx.pool, &ctx.client, &ctx.limiter, league_id, Some(season), &body).await?;

    let rows = fixtures::transform_fixtures(&body);
    if !rows.is_empty() {
        let core_rows: Vec<CoreRow> = rows.iter().map(fixture_row_to_core).collect();
        db::upsert_core(&ctx.pool, "core.fixtures", &core_rows, &["id"], FIXTURE_UPDATE_COLS).await?;
    }

    let total_pages = body.get("paging").and_then(|p| p["total"].as_i64()).unwrap_or(1).max(1);
    let done = rows.is_empty() || page >= total_pages;
    progress::upsert_backfill_progress(&ctx.pool, job_id, league_id, season, page + 1, done, None).await?;
    Ok(done)
}

/// `/standings` has no pagination; one call either completes the backfill
/// for the pair or fails outright, so `next_page` just tracks attempt count
/// for observability.
pub async fn standings_backfill_league_season(ctx: &JobContext, job_id: &str, league_id: i64, season: i64) -> Result<bool> {
    let existing = progress::get_backfill_progress(&ctx.pool, job_id, league_id, season).await?;
    if existing.as_ref().is_some_and(|p| p.completed) {
        return Ok(true);
    }
    let attempt = existing.as_ref().map(|p| p.next_page).unwrap_or(1);

    let mut params = HashMap::new();
    params.insert("league".to_string(), league_id.to_string());
    params.insert("season".to_string(), season.to_string());

    let body = match fetch_page(ctx, "/standings", &params).await {
        Ok(b) => b,
        Err(e) => {
            progress::upsert_backfill_progress(&ctx.pool, job_id, league_id, season, attempt + 1, false, Some(&e.to_string())).await?;
            return Err(e);
        }
    };

    crate::dependencies::ensure_standings_dependencies(&ctx.pool, &ctx.client, &ctx.limiter, league_id, season, &body).await?;

    let rows = standings::transform_standings(&body);
    if !rows.is_empty() {
        db::standings::replace_standings(&ctx.pool, league_id, season, &rows).await?;
    }

    progress::upsert_backfill_progress(&ctx.pool, job_id, league_id, season, attempt + 1, true, None).await?;
    Ok(true)
}
