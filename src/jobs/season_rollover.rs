//! `season_rollover_watch`: once per distinct tracked season, checks whether
//! the upstream has published the next season for any tracked league. This
//! only ever emits a warning event — it never rewrites the tracked
//! configuration, since promoting a league to a new season is an operator
//! decision.

use std::collections::{HashMap, HashSet};

use anyhow::Result;
use serde_json::Value;

use crate::db;

use super::{JobContext, LeagueSeason};

async fn fetch_leagues_for_season(ctx: &JobContext, season: i64) -> Result<Value> {
    let mut params = HashMap::new();
    params.insert("season".to_string(), season.to_string());

    ctx.limiter.acquire_token().await?;
    let result = ctx.client.get("/leagues", &params).await?;
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
    db::upsert_raw(&ctx.pool, "/leagues", &requested_params, result.status as i32, &headers_value, &body).await?;
    Ok(body)
}

fn league_ids_in_response(body: &Value) -> HashSet<i64> {
    body.get("response")
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(|item| item["league"]["id"].as_i64()).collect())
        .unwrap_or_default()
}

pub async fn run(ctx: &JobContext, pairs: &[LeagueSeason]) -> Result<()> {
    let mut seasons: HashMap<i64, HashSet<i64>> = HashMap::new();
    for pair in pairs {
        seasons.entry(pair.season).or_default().insert(pair.league_id);
    }

    for (season, tracked_league_ids) in seasons {
        let next_season = season + 1;
        let body = match fetch_leagues_for_season(ctx, next_season).await {
            Ok(b) => b,
            Err(e) => {
                tracing::warn!(season, next_season, err = %e, "season_rollover_fetch_failed");
                continue;
            }
        };

        let published = league_ids_in_response(&body);
        for league_id in &tracked_league_ids {
            if published.contains(league_id) {
                tracing::warn!(league_id, current_season = season, next_season, "season_rollover_next_season_available");
            }
        }
    }
    Ok(())
}
