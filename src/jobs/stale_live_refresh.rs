//! `stale_live_refresh`: fixtures sitting in a live-looking status whose
//! `core.fixtures` row hasn't been touched recently — almost always because
//! the live loop missed a tick (backoff, a dropped poll, a restart window).
//! Batch-refetched in groups of 20 via the upstream's `ids` filter rather
//! than one call per fixture.

use anyhow::Result;
use serde_json::Value;

use crate::db::{self, CoreRow};
use crate::transforms::fixtures;

use super::JobContext;

const LIVE_STATUSES: [&str; 7] = ["1H", "HT", "2H", "ET", "BT", "P", "LIVE"];

async fn stale_live_fixture_ids(ctx: &JobContext, stale_after_minutes: i64, limit: i64) -> Result<Vec<i64>> {
    let rows: Vec<i64> = sqlx::query_scalar(
        "SELECT id FROM core.fixtures \
         WHERE status_short = ANY($1) AND updated_at < NOW() - ($2 || ' minutes')::interval \
         ORDER BY updated_at ASC LIMIT $3",
    )
    .bind(&LIVE_STATUSES[..])
    .bind(stale_after_minutes.to_string())
    .bind(limit)
    .fetch_all(&ctx.pool)
    .await?;
    Ok(rows)
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

pub async fn run(ctx: &JobContext, stale_after_minutes: i64, max_per_run: i64) -> Result<()> {
    let ids = stale_live_fixture_ids(ctx, stale_after_minutes, max_per_run).await?;
    if ids.is_empty() {
        return Ok(());
    }

    for chunk in ids.chunks(20) {
        ctx.limiter.acquire_token().await?;
        let result = match ctx.client.get_fixtures_by_ids(chunk).await {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(ids = ?chunk, err = %e, "stale_live_refresh_fetch_failed");
                continue;
            }
        };
        ctx.limiter.update_from_headers(&result.headers)?;

        let body = serde_json::json!({
            "get": result.data.get,
            "parameters": result.data.parameters,
            "errors": result.data.errors,
            "results": result.data.results,
            "response": result.data.response,
        });
        let requested_params = serde_json::json!({"ids": chunk});
        let headers_value = serde_json::to_value(&result.headers)?;
        db::upsert_raw(&ctx.pool, "/fixtures", &requested_params, result.status as i32, &headers_value, &body).await?;

        let rows = fixtures::transform_fixtures(&body);
        if rows.is_empty() {
            continue;
        }
        let core_rows: Vec<CoreRow> = rows.iter().map(fixture_row_to_core).collect();
        db::upsert_core(&ctx.pool, "core.fixtures", &core_rows, &["id"], FIXTURE_UPDATE_COLS).await?;
    }
    Ok(())
}
