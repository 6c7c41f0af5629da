//! `injuries_hourly`: per (league, season), `/injuries`, upserted on the
//! composite content-hash key since the upstream has no stable injury id.

use std::collections::HashMap;

use anyhow::Result;
use serde_json::Value;

use crate::coverage;
use crate::db::{self, CoreRow};
use crate::transforms::injuries;

use super::{filter_in_scope, JobContext, LeagueSeason};

async fn fetch(ctx: &JobContext, league_id: i64, season: i64) -> Result<Value> {
    let mut params = HashMap::new();
    params.insert("league".to_string(), league_id.to_string());
    params.insert("season".to_string(), season.to_string());

    ctx.limiter.acquire_token().await?;
    let result = ctx.client.get("/injuries", &params).await?;
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
    db::upsert_raw(&ctx.pool, "/injuries", &requested_params, result.status as i32, &headers_value, &body).await?;
    Ok(body)
}

pub async fn run(ctx: &JobContext, pairs: &[LeagueSeason]) -> Result<()> {
    let in_scope = filter_in_scope(ctx, "/injuries", pairs).await;

    for pair in in_scope {
        let body = match fetch(ctx, pair.league_id, pair.season).await {
            Ok(b) => b,
            Err(e) => {
                tracing::warn!(league_id = pair.league_id, season = pair.season, err = %e, "injuries_hourly_fetch_failed");
                continue;
            }
        };

        let rows = injuries::transform_injuries(&body);
        if !rows.is_empty() {
            let core_rows: Vec<CoreRow> = rows
                .iter()
                .map(|r| {
                    vec![
                        ("injury_key".to_string(), Value::from(r.injury_key.clone())),
                        ("league_id".to_string(), Value::from(pair.league_id)),
                        ("season".to_string(), Value::from(pair.season)),
                        ("fixture_id".to_string(), r.fixture_id.map(Value::from).unwrap_or(Value::Null)),
                        ("player_id".to_string(), r.player_id.map(Value::from).unwrap_or(Value::Null)),
                        ("team_id".to_string(), r.team_id.map(Value::from).unwrap_or(Value::Null)),
                        ("injury_type".to_string(), r.injury_type.clone().map(Value::from).unwrap_or(Value::Null)),
                        ("reason".to_string(), r.reason.clone().map(Value::from).unwrap_or(Value::Null)),
                    ]
                })
                .collect();

            if let Err(e) = db::upsert_core(
                &ctx.pool,
                "core.injuries",
                &core_rows,
                &["injury_key"],
                &["league_id", "season", "fixture_id", "player_id", "team_id", "injury_type", "reason"],
            )
            .await
            {
                tracing::warn!(league_id = pair.league_id, season = pair.season, err = %e, "injuries_hourly_upsert_failed");
            }
        }

        let report = match coverage::calculate_injuries_coverage(&ctx.pool, &ctx.coverage_config, pair.league_id, pair.season).await {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(league_id = pair.league_id, season = pair.season, err = %e, "injuries_hourly_coverage_calc_failed");
                continue;
            }
        };
        if let Err(e) = db::upsert_mart_coverage(&ctx.pool, &report).await {
            tracing::warn!(league_id = pair.league_id, season = pair.season, err = %e, "injuries_hourly_coverage_upsert_failed");
        }
    }
    Ok(())
}
