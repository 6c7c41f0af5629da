//! `fixture_details_backfill_90d`, `fixture_details_backfill_season`, and
//! `fixture_details_recent_finalize` all scan `core.fixtures` for completed
//! matches lacking a `/fixtures/players` raw call and fetch the four
//! per-fixture endpoints (events, lineups, statistics, players); they differ
//! only in the window they scan. Each fetch writes to its own per-team or
//! per-fixture core table (`fixture_events`, `fixture_players`,
//! `fixture_statistics`, `fixture_lineups`) as well as the consolidated
//! `fixture_details` blob used for quick whole-fixture reads.

use std::collections::HashMap;

use anyhow::Result;
use serde_json::Value;
use sqlx::PgPool;

use crate::coverage;
use crate::db::{self, CoreRow};
use crate::transforms::fixtures;

use super::JobContext;

const FINISHED_STATUSES: [&str; 3] = ["FT", "AET", "PEN"];

pub enum Window {
    /// Completed fixtures within the last `days` days.
    RollingDays(i64),
    /// The whole tracked season — used once after onboarding a league.
    WholeSeason { league_id: i64, season: i64 },
    /// Completed in the last 24h, plus a narrow pre/post-kickoff lineup band.
    RecentFinalize,
}

/// (endpoint, core table) pairs the per-fixture coverage pass scores,
/// mirroring the four endpoints `backfill_one_fixture` fetches.
const COVERAGE_ENDPOINTS: [(&str, &str); 4] = [
    ("/fixtures/events", "core.fixture_events"),
    ("/fixtures/lineups", "core.fixture_lineups"),
    ("/fixtures/statistics", "core.fixture_statistics"),
    ("/fixtures/players", "core.fixture_players"),
];

/// The coverage window mirrors the same span the backfill itself scanned.
fn coverage_window_days(window: &Window) -> i64 {
    match window {
        Window::RollingDays(days) => *days,
        Window::WholeSeason { .. } => 365,
        Window::RecentFinalize => 1,
    }
}

async fn pending_fixture_ids(pool: &PgPool, window: &Window, limit: i64) -> Result<Vec<i64>> {
    let rows: Vec<i64> = match window {
        Window::RollingDays(days) => {
            sqlx::query_scalar(
                "SELECT f.id FROM core.fixtures f \
                 WHERE f.status_short = ANY($1) AND f.kickoff_utc >= NOW() - ($2 || ' days')::interval \
                 AND NOT EXISTS (SELECT 1 FROM raw.api_responses r WHERE r.endpoint = '/fixtures/players' AND (r.requested_params->>'fixture')::bigint = f.id) \
                 ORDER BY f.kickoff_utc DESC LIMIT $3",
            )
            .bind(&FINISHED_STATUSES[..])
            .bind(days.to_string())
            .bind(limit)
            .fetch_all(pool)
            .await?
        }
        Window::WholeSeason { league_id, season } => {
            sqlx::query_scalar(
                "SELECT f.id FROM core.fixtures f \
                 WHERE f.league_id = $1 AND f.season = $2 AND f.status_short = ANY($3) \
                 AND NOT EXISTS (SELECT 1 FROM raw.api_responses r WHERE r.endpoint = '/fixtures/players' AND (r.requested_params->>'fixture')::bigint = f.id) \
                 ORDER BY f.kickoff_utc ASC LIMIT $4",
            )
            .bind(league_id)
            .bind(season)
            .bind(&FINISHED_STATUSES[..])
            .bind(limit)
            .fetch_all(pool)
            .await?
        }
        Window::RecentFinalize => {
            sqlx::query_scalar(
                "SELECT f.id FROM core.fixtures f \
                 WHERE (f.status_short = ANY($1) AND f.kickoff_utc >= NOW() - INTERVAL '24 hours') \
                    OR (f.kickoff_utc BETWEEN NOW() - INTERVAL '2 hours' AND NOW() + INTERVAL '1 hour') \
                 ORDER BY f.kickoff_utc DESC LIMIT $2",
            )
            .bind(&FINISHED_STATUSES[..])
            .bind(limit)
            .fetch_all(pool)
            .await?
        }
    };
    Ok(rows)
}

async fn fetch_fixture_endpoint(ctx: &JobContext, endpoint: &str, fixture_id: i64) -> Result<Value> {
    let mut params = HashMap::new();
    params.insert("fixture".to_string(), fixture_id.to_string());

    ctx.limiter.acquire_token().await?;
    let result = ctx.client.get(endpoint, &params).await?;
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
    db::upsert_raw(&ctx.pool, endpoint, &requested_params, result.status as i32, &headers_value, &body).await?;
    Ok(body)
}

async fn backfill_one_fixture(ctx: &JobContext, fixture_id: i64) -> Result<()> {
    let events_body = fetch_fixture_endpoint(ctx, "/fixtures/events", fixture_id).await?;
    let lineups_body = fetch_fixture_endpoint(ctx, "/fixtures/lineups", fixture_id).await?;
    let statistics_body = fetch_fixture_endpoint(ctx, "/fixtures/statistics", fixture_id).await?;
    let players_body = fetch_fixture_endpoint(ctx, "/fixtures/players", fixture_id).await?;

    if let Some(detail_row) = fixtures::transform_fixture_details(
        fixture_id,
        Some(events_body.get("response").unwrap_or(&Value::Null)),
        Some(lineups_body.get("response").unwrap_or(&Value::Null)),
        Some(statistics_body.get("response").unwrap_or(&Value::Null)),
        Some(players_body.get("response").unwrap_or(&Value::Null)),
    ) {
        let core_row: CoreRow = vec![
            ("fixture_id".to_string(), Value::from(detail_row.fixture_id)),
            ("events".to_string(), detail_row.events.unwrap_or(Value::Null)),
            ("lineups".to_string(), detail_row.lineups.unwrap_or(Value::Null)),
            ("statistics".to_string(), detail_row.statistics.unwrap_or(Value::Null)),
            ("players".to_string(), detail_row.players.unwrap_or(Value::Null)),
        ];
        db::upsert_core(&ctx.pool, "core.fixture_details", &[core_row], &["fixture_id"], &["events", "lineups", "statistics", "players"]).await?;
    }

    let event_rows = fixtures::transform_fixture_events(fixture_id, &events_body);
    if !event_rows.is_empty() {
        let core_rows: Vec<CoreRow> = event_rows
            .iter()
            .map(|r| {
                vec![
                    ("event_key".to_string(), Value::from(r.event_key.clone())),
                    ("fixture_id".to_string(), Value::from(r.fixture_id)),
                    ("elapsed".to_string(), r.elapsed.map(Value::from).unwrap_or(Value::Null)),
                    ("extra".to_string(), r.extra.map(Value::from).unwrap_or(Value::Null)),
                    ("team_id".to_string(), r.team_id.map(Value::from).unwrap_or(Value::Null)),
                    ("player_id".to_string(), r.player_id.map(Value::from).unwrap_or(Value::Null)),
                    ("assist_id".to_string(), r.assist_id.map(Value::from).unwrap_or(Value::Null)),
                    ("event_type".to_string(), r.event_type.clone().map(Value::from).unwrap_or(Value::Null)),
                    ("detail".to_string(), r.detail.clone().map(Value::from).unwrap_or(Value::Null)),
                    ("comments".to_string(), r.comments.clone().map(Value::from).unwrap_or(Value::Null)),
                ]
            })
            .collect();
        db::upsert_core(
            &ctx.pool,
            "core.fixture_events",
            &core_rows,
            &["event_key"],
            &["fixture_id", "elapsed", "extra", "team_id", "player_id", "assist_id", "event_type", "detail", "comments"],
        )
        .await?;
    }

    let statistics_rows = fixtures::transform_fixture_statistics(fixture_id, &statistics_body);
    if !statistics_rows.is_empty() {
        let core_rows: Vec<CoreRow> = statistics_rows
            .iter()
            .map(|r| {
                vec![
                    ("fixture_id".to_string(), Value::from(r.fixture_id)),
                    ("team_id".to_string(), Value::from(r.team_id)),
                    ("statistics".to_string(), r.statistics.clone()),
                ]
            })
            .collect();
        db::upsert_core(&ctx.pool, "core.fixture_statistics", &core_rows, &["fixture_id", "team_id"], &["statistics"]).await?;
    }

    let lineup_rows = fixtures::transform_fixture_lineups(fixture_id, &lineups_body);
    if !lineup_rows.is_empty() {
        let core_rows: Vec<CoreRow> = lineup_rows
            .iter()
            .map(|r| {
                vec![
                    ("fixture_id".to_string(), Value::from(r.fixture_id)),
                    ("team_id".to_string(), Value::from(r.team_id)),
                    ("formation".to_string(), r.formation.clone().map(Value::from).unwrap_or(Value::Null)),
                    ("start_xi".to_string(), r.start_xi.clone()),
                    ("substitutes".to_string(), r.substitutes.clone()),
                    ("coach".to_string(), r.coach.clone()),
                    ("colors".to_string(), r.colors.clone()),
                ]
            })
            .collect();
        db::upsert_core(
            &ctx.pool,
            "core.fixture_lineups",
            &core_rows,
            &["fixture_id", "team_id"],
            &["formation", "start_xi", "substitutes", "coach", "colors"],
        )
        .await?;
    }

    let player_rows = fixtures::transform_fixture_players(fixture_id, &players_body);
    if !player_rows.is_empty() {
        let core_rows: Vec<CoreRow> = player_rows
            .iter()
            .map(|r| {
                vec![
                    ("fixture_id".to_string(), Value::from(r.fixture_id)),
                    ("team_id".to_string(), Value::from(r.team_id)),
                    ("player_id".to_string(), Value::from(r.player_id)),
                    ("player_name".to_string(), r.player_name.clone().map(Value::from).unwrap_or(Value::Null)),
                ]
            })
            .collect();
        db::upsert_core(&ctx.pool, "core.fixture_players", &core_rows, &["fixture_id", "team_id", "player_id"], &["player_name"]).await?;
    }

    Ok(())
}

async fn league_season_pairs_for(pool: &PgPool, fixture_ids: &[i64]) -> Result<Vec<(i64, i64)>> {
    if fixture_ids.is_empty() {
        return Ok(Vec::new());
    }
    let rows: Vec<(i64, i64)> = sqlx::query_as("SELECT DISTINCT league_id, season FROM core.fixtures WHERE id = ANY($1)")
        .bind(fixture_ids)
        .fetch_all(pool)
        .await?;
    Ok(rows)
}

async fn record_endpoint_coverage(ctx: &JobContext, league_id: i64, season: i64, days: i64) {
    for (endpoint, core_table) in COVERAGE_ENDPOINTS {
        let report = match coverage::calculate_fixture_endpoint_coverage(&ctx.pool, &ctx.coverage_config, league_id, season, endpoint, core_table, days).await {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(league_id, season, endpoint, err = %e, "fixture_details_coverage_calc_failed");
                continue;
            }
        };
        if let Err(e) = db::upsert_mart_coverage(&ctx.pool, &report).await {
            tracing::warn!(league_id, season, endpoint, err = %e, "fixture_details_coverage_upsert_failed");
        }
    }
}

pub async fn run(ctx: &JobContext, window: Window, max_per_run: i64) -> Result<()> {
    let ids = pending_fixture_ids(&ctx.pool, &window, max_per_run).await?;
    let count = ids.len();
    for &fixture_id in &ids {
        if let Err(e) = backfill_one_fixture(ctx, fixture_id).await {
            tracing::warn!(fixture_id, err = %e, "fixture_details_backfill_failed");
        }
    }

    let days = coverage_window_days(&window);
    for (league_id, season) in league_season_pairs_for(&ctx.pool, &ids).await? {
        record_endpoint_coverage(ctx, league_id, season, days).await;
    }

    tracing::info!(scanned = count, "fixture_details_backfill_completed");
    Ok(())
}
