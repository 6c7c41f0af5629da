//! `top_scorers_daily` and `team_statistics_refresh`. The latter is
//! distributed: rather than refetching every tracked team every run, it
//! discovers the team set from `core.fixtures`, tracks a per-team last-fetch
//! timestamp, and only pulls entries that have gone stale, bounded by a
//! per-run ceiling so one run never floods the rate limiter.

use std::collections::HashMap;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::db::{self, CoreRow};
use crate::transforms::{team_statistics, top_scorers};

use super::{filter_in_scope, JobContext, LeagueSeason};

async fn fetch(ctx: &JobContext, endpoint: &str, params: &HashMap<String, String>) -> Result<Value> {
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
    });
    db::upsert_raw(&ctx.pool, endpoint, &requested_params, result.status as i32, &headers_value, &body).await?;
    Ok(body)
}

pub async fn top_scorers_daily(ctx: &JobContext, pairs: &[LeagueSeason]) -> Result<()> {
    let in_scope = filter_in_scope(ctx, "/players/topscorers", pairs).await;

    for pair in in_scope {
        let mut params = HashMap::new();
        params.insert("league".to_string(), pair.league_id.to_string());
        params.insert("season".to_string(), pair.season.to_string());

        let body = match fetch(ctx, "/players/topscorers", &params).await {
            Ok(b) => b,
            Err(e) => {
                tracing::warn!(league_id = pair.league_id, season = pair.season, err = %e, "top_scorers_fetch_failed");
                continue;
            }
        };

        let rows = top_scorers::transform_top_scorers(pair.league_id, pair.season, &body);
        if rows.is_empty() {
            continue;
        }
        let core_rows: Vec<CoreRow> = rows
            .iter()
            .map(|r| {
                vec![
                    ("league_id".to_string(), Value::from(r.league_id)),
                    ("season".to_string(), Value::from(r.season)),
                    ("player_id".to_string(), Value::from(r.player_id)),
                    ("rank".to_string(), Value::from(r.rank)),
                    ("team_id".to_string(), r.team_id.map(Value::from).unwrap_or(Value::Null)),
                    ("goals".to_string(), r.goals.map(Value::from).unwrap_or(Value::Null)),
                    ("assists".to_string(), r.assists.map(Value::from).unwrap_or(Value::Null)),
                ]
            })
            .collect();
        if let Err(e) = db::upsert_core(&ctx.pool, "core.top_scorers", &core_rows, &["league_id", "season", "player_id"], &["rank", "team_id", "goals", "assists"]).await {
            tracing::warn!(league_id = pair.league_id, season = pair.season, err = %e, "top_scorers_upsert_failed");
        }
    }
    Ok(())
}

struct TeamStatTarget {
    team_id: i64,
    league_id: i64,
    season: i64,
}

async fn discover_and_register_targets(ctx: &JobContext, pairs: &[LeagueSeason]) -> Result<()> {
    for pair in pairs {
        sqlx::query(
            r#"
            INSERT INTO core.team_statistics_progress (team_id, league_id, season, last_fetched_at)
            SELECT DISTINCT team_id, $1, $2, NULL::timestamptz FROM (
                SELECT home_team_id AS team_id FROM core.fixtures WHERE league_id = $1 AND season = $2
                UNION
                SELECT away_team_id AS team_id FROM core.fixtures WHERE league_id = $1 AND season = $2
            ) teams
            ON CONFLICT (team_id, league_id, season) DO NOTHING
            "#,
        )
        .bind(pair.league_id)
        .bind(pair.season)
        .execute(&ctx.pool)
        .await?;
    }
    Ok(())
}

async fn stale_targets(ctx: &JobContext, refresh_interval_hours: i64, max_per_run: i64) -> Result<Vec<TeamStatTarget>> {
    let rows: Vec<(i64, i64, i64)> = sqlx::query_as(
        r#"
        SELECT team_id, league_id, season FROM core.team_statistics_progress
        WHERE last_fetched_at IS NULL OR last_fetched_at < NOW() - ($1 || ' hours')::interval
        ORDER BY last_fetched_at ASC NULLS FIRST
        LIMIT $2
        "#,
    )
    .bind(refresh_interval_hours.to_string())
    .bind(max_per_run)
    .fetch_all(&ctx.pool)
    .await?;
    Ok(rows.into_iter().map(|(team_id, league_id, season)| TeamStatTarget { team_id, league_id, season }).collect())
}

pub async fn team_statistics_refresh(ctx: &JobContext, pairs: &[LeagueSeason], refresh_interval_hours: i64, max_per_run: i64) -> Result<()> {
    let in_scope = filter_in_scope(ctx, "/teams/statistics", pairs).await;
    discover_and_register_targets(ctx, &in_scope).await?;

    let targets = stale_targets(ctx, refresh_interval_hours, max_per_run).await?;
    for target in targets {
        let mut params = HashMap::new();
        params.insert("team".to_string(), target.team_id.to_string());
        params.insert("league".to_string(), target.league_id.to_string());
        params.insert("season".to_string(), target.season.to_string());

        let body = match fetch(ctx, "/teams/statistics", &params).await {
            Ok(b) => b,
            Err(e) => {
                tracing::warn!(team_id = target.team_id, league_id = target.league_id, err = %e, "team_statistics_fetch_failed");
                continue;
            }
        };

        if let Some(row) = team_statistics::transform_team_statistics(target.team_id, target.league_id, target.season, &body) {
            let core_row: CoreRow = vec![
                ("team_id".to_string(), Value::from(row.team_id)),
                ("league_id".to_string(), Value::from(row.league_id)),
                ("season".to_string(), Value::from(row.season)),
                ("form".to_string(), row.form.map(Value::from).unwrap_or(Value::Null)),
                ("statistics".to_string(), row.statistics),
            ];
            db::upsert_core(&ctx.pool, "core.team_statistics", &[core_row], &["team_id", "league_id", "season"], &["form", "statistics"]).await?;
        }

        let now: DateTime<Utc> = Utc::now();
        sqlx::query("UPDATE core.team_statistics_progress SET last_fetched_at = $1 WHERE team_id = $2 AND league_id = $3 AND season = $4")
            .bind(now)
            .bind(target.team_id)
            .bind(target.league_id)
            .bind(target.season)
            .execute(&ctx.pool)
            .await?;
    }
    Ok(())
}
