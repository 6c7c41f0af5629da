//! `auto_finish_stale_fixtures` and `auto_finish_verification`: fixtures that
//! never receive a terminal status update from the upstream — kickoffs the
//! live loop polled through but that silently dropped off the live feed
//! without ever reporting FT. Double-threshold gate: both the scheduled
//! kickoff and the last core update must be old enough before a fixture is
//! considered abandoned rather than merely delayed.

use anyhow::Result;
use serde_json::Value;

use crate::db::{self, CoreRow};
use crate::transforms::fixtures;

use super::JobContext;

const LIVE_STATUSES: [&str; 7] = ["1H", "HT", "2H", "ET", "BT", "P", "LIVE"];

struct StaleCandidate {
    fixture_id: i64,
    league_id: i64,
    season: i64,
    home_team_id: i64,
    away_team_id: i64,
    venue_id: Option<i64>,
    goals_home: Option<i64>,
    goals_away: Option<i64>,
}

async fn stale_candidates(ctx: &JobContext, threshold_hours: i64, safety_lag_hours: i64, max_per_run: i64) -> Result<Vec<StaleCandidate>> {
    let rows: Vec<(i64, i64, i64, i64, i64, Option<i64>, Option<i64>, Option<i64>)> = sqlx::query_as(
        "SELECT id, league_id, season, home_team_id, away_team_id, venue_id, goals_home, goals_away \
         FROM core.fixtures \
         WHERE status_short = ANY($1) \
           AND kickoff_utc < NOW() - ($2 || ' hours')::interval \
           AND updated_at < NOW() - ($3 || ' hours')::interval \
         ORDER BY kickoff_utc ASC LIMIT $4",
    )
    .bind(&LIVE_STATUSES[..])
    .bind(threshold_hours.to_string())
    .bind(safety_lag_hours.to_string())
    .bind(max_per_run)
    .fetch_all(&ctx.pool)
    .await?;
    Ok(rows
        .into_iter()
        .map(|(fixture_id, league_id, season, home_team_id, away_team_id, venue_id, goals_home, goals_away)| StaleCandidate {
            fixture_id,
            league_id,
            season,
            home_team_id,
            away_team_id,
            venue_id,
            goals_home,
            goals_away,
        })
        .collect())
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

/// Synthesizes a terminal row in place, without calling upstream: status FT,
/// elapsed 90, `score.fulltime` pinned to the current goal tally, flagged for
/// later verification.
fn synthesize_finished_row(c: &StaleCandidate) -> CoreRow {
    let score = serde_json::json!({
        "fulltime": {"home": c.goals_home, "away": c.goals_away},
    });
    vec![
        ("id".to_string(), Value::from(c.fixture_id)),
        ("league_id".to_string(), Value::from(c.league_id)),
        ("season".to_string(), Value::from(c.season)),
        ("home_team_id".to_string(), Value::from(c.home_team_id)),
        ("away_team_id".to_string(), Value::from(c.away_team_id)),
        ("venue_id".to_string(), c.venue_id.map(Value::from).unwrap_or(Value::Null)),
        ("status_short".to_string(), Value::from("FT")),
        ("status_long".to_string(), Value::from("Match Finished (Auto-finished)")),
        ("elapsed".to_string(), Value::from(90)),
        ("goals_home".to_string(), c.goals_home.map(Value::from).unwrap_or(Value::Null)),
        ("goals_away".to_string(), c.goals_away.map(Value::from).unwrap_or(Value::Null)),
        ("score".to_string(), score),
        ("kickoff_utc".to_string(), Value::Null),
        ("needs_score_verification".to_string(), Value::from(true)),
    ]
}

pub async fn auto_finish_stale_fixtures(ctx: &JobContext, threshold_hours: i64, safety_lag_hours: i64, max_per_run: i64, refetch_enabled: bool) -> Result<()> {
    let candidates = stale_candidates(ctx, threshold_hours, safety_lag_hours, max_per_run).await?;
    if candidates.is_empty() {
        return Ok(());
    }

    if refetch_enabled {
        let ids: Vec<i64> = candidates.iter().map(|c| c.fixture_id).collect();
        for chunk in ids.chunks(20) {
            ctx.limiter.acquire_token().await?;
            let result = match ctx.client.get_fixtures_by_ids(chunk).await {
                Ok(r) => r,
                Err(e) => {
                    tracing::warn!(ids = ?chunk, err = %e, "auto_finish_refetch_failed");
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
    } else {
        let core_rows: Vec<CoreRow> = candidates.iter().map(synthesize_finished_row).collect();
        db::upsert_core(&ctx.pool, "core.fixtures", &core_rows, &["id"], FIXTURE_UPDATE_COLS).await?;
        tracing::warn!(count = core_rows.len(), "auto_finish_synthesized_without_refetch");
    }
    Ok(())
}

async fn flagged_fixture_ids(ctx: &JobContext, limit: i64) -> Result<Vec<i64>> {
    let rows: Vec<i64> = sqlx::query_scalar("SELECT id FROM core.fixtures WHERE needs_score_verification = TRUE ORDER BY kickoff_utc ASC LIMIT $1")
        .bind(limit)
        .fetch_all(&ctx.pool)
        .await?;
    Ok(rows)
}

/// `daily_quota` bounds how many verification refetches this job may spend
/// today, independent of the rate limiter's own budget, so a verification
/// backlog can never starve the rest of the day's jobs.
pub async fn auto_finish_verification(ctx: &JobContext, daily_quota: i64, already_spent_today: i64) -> Result<()> {
    let remaining = daily_quota - already_spent_today;
    if remaining <= 0 {
        tracing::info!(daily_quota, already_spent_today, "auto_finish_verification_quota_exhausted");
        return Ok(());
    }

    let ids = flagged_fixture_ids(ctx, remaining).await?;
    if ids.is_empty() {
        return Ok(());
    }

    for chunk in ids.chunks(20) {
        ctx.limiter.acquire_token().await?;
        let result = match ctx.client.get_fixtures_by_ids(chunk).await {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(ids = ?chunk, err = %e, "auto_finish_verification_fetch_failed");
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

        let mut rows = fixtures::transform_fixtures(&body);
        for row in &mut rows {
            row.needs_score_verification = false;
        }
        if rows.is_empty() {
            continue;
        }
        let core_rows: Vec<CoreRow> = rows.iter().map(fixture_row_to_core).collect();
        db::upsert_core(&ctx.pool, "core.fixtures", &core_rows, &["id"], FIXTURE_UPDATE_COLS).await?;
    }

    Ok(())
}
