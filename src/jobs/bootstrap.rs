//! Static and per-league bootstrap jobs: countries, timezones, leagues,
//! teams. These are the only jobs with no (league, season) loop of their own
//! at the top level — `bootstrap_leagues`/`bootstrap_teams` loop over the
//! tracked set internally.

use std::collections::HashMap;

use anyhow::Result;
use serde_json::Value;

use crate::db::{self, CoreRow};
use crate::transforms::{countries, leagues, teams, timezones, venues};

use super::JobContext;

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

pub async fn bootstrap_countries(ctx: &JobContext) -> Result<()> {
    let body = fetch(ctx, "/countries", &HashMap::new()).await?;
    let rows = countries::transform_countries(&body);
    let core_rows: Vec<CoreRow> = rows
        .iter()
        .map(|r| {
            vec![
                ("code".to_string(), Value::from(r.code.clone())),
                ("name".to_string(), Value::from(r.name.clone())),
                ("flag".to_string(), r.flag_url.clone().map(Value::from).unwrap_or(Value::Null)),
            ]
        })
        .collect();
    db::upsert_core(&ctx.pool, "core.countries", &core_rows, &["code"], &["name", "flag"]).await?;
    tracing::info!(count = core_rows.len(), "bootstrap_countries_completed");
    Ok(())
}

pub async fn bootstrap_timezones(ctx: &JobContext) -> Result<()> {
    let body = fetch(ctx, "/timezone", &HashMap::new()).await?;
    let zones = timezones::transform_timezones(&body);
    let core_rows: Vec<CoreRow> = zones.iter().map(|z| vec![("name".to_string(), Value::from(z.clone()))]).collect();
    db::upsert_core(&ctx.pool, "core.timezones", &core_rows, &["name"], &["name"]).await?;
    tracing::info!(count = core_rows.len(), "bootstrap_timezones_completed");
    Ok(())
}

pub async fn countries_table_empty(pool: &sqlx::PgPool) -> bool {
    sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM core.countries").fetch_one(pool).await.map(|c| c == 0).unwrap_or(true)
}

pub async fn timezones_table_empty(pool: &sqlx::PgPool) -> bool {
    sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM core.timezones").fetch_one(pool).await.map(|c| c == 0).unwrap_or(true)
}

/// `/leagues?season=Y`, then upserts only the tracked subset.
pub async fn bootstrap_leagues(ctx: &JobContext, season: i64, tracked_league_ids: &std::collections::HashSet<i64>) -> Result<()> {
    let mut params = HashMap::new();
    params.insert("season".to_string(), season.to_string());
    let body = fetch(ctx, "/leagues", &params).await?;

    let rows = leagues::transform_leagues(&body);
    let tracked: Vec<_> = rows.into_iter().filter(|r| tracked_league_ids.contains(&r.league_id)).collect();
    let core_rows: Vec<CoreRow> = tracked
        .iter()
        .map(|r| {
            vec![
                ("id".to_string(), Value::from(r.league_id)),
                ("name".to_string(), Value::from(r.name.clone())),
                ("type".to_string(), r.league_type.clone().map(Value::from).unwrap_or(Value::Null)),
                ("logo".to_string(), r.logo_url.clone().map(Value::from).unwrap_or(Value::Null)),
                ("country_name".to_string(), r.country_name.clone().map(Value::from).unwrap_or(Value::Null)),
                ("country_code".to_string(), r.country_code.clone().map(Value::from).unwrap_or(Value::Null)),
                ("country_flag".to_string(), r.country_flag_url.clone().map(Value::from).unwrap_or(Value::Null)),
            ]
        })
        .collect();
    if !core_rows.is_empty() {
        db::upsert_core(&ctx.pool, "core.leagues", &core_rows, &["id"], &["name", "type", "logo", "country_name", "country_code", "country_flag"]).await?;
    }
    tracing::info!(season, upserted = core_rows.len(), "bootstrap_leagues_completed");
    Ok(())
}

/// Per tracked league: `/teams?league=L&season=Y`; venues are extracted and
/// upserted first so `core.teams.venue_id`'s FK is always satisfiable.
pub async fn bootstrap_teams(ctx: &JobContext, season: i64, tracked_league_ids: &std::collections::HashSet<i64>) -> Result<()> {
    for &league_id in tracked_league_ids {
        let mut params = HashMap::new();
        params.insert("league".to_string(), league_id.to_string());
        params.insert("season".to_string(), season.to_string());

        let body = match fetch(ctx, "/teams", &params).await {
            Ok(b) => b,
            Err(e) => {
                tracing::warn!(league_id, season, err = %e, "bootstrap_teams_league_failed");
                continue;
            }
        };

        let venue_rows: Vec<CoreRow> = body
            .get("response")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(venues::venue_row_from_team_item)
            .map(|v| {
                vec![
                    ("id".to_string(), Value::from(v.venue_id)),
                    ("name".to_string(), v.name.map(Value::from).unwrap_or(Value::Null)),
                    ("address".to_string(), v.address.map(Value::from).unwrap_or(Value::Null)),
                    ("city".to_string(), v.city.map(Value::from).unwrap_or(Value::Null)),
                    ("country".to_string(), v.country.map(Value::from).unwrap_or(Value::Null)),
                    ("capacity".to_string(), v.capacity.map(Value::from).unwrap_or(Value::Null)),
                    ("surface".to_string(), v.surface.map(Value::from).unwrap_or(Value::Null)),
                    ("image".to_string(), v.image_url.map(Value::from).unwrap_or(Value::Null)),
                ]
            })
            .collect();
        if !venue_rows.is_empty() {
            db::upsert_core(&ctx.pool, "core.venues", &venue_rows, &["id"], &["name", "address", "city", "country", "capacity", "surface", "image"]).await?;
        }

        let team_rows = teams::transform_teams(&body);
        let core_rows: Vec<CoreRow> = team_rows
            .iter()
            .map(|t| {
                vec![
                    ("id".to_string(), Value::from(t.team_id)),
                    ("name".to_string(), Value::from(t.name.clone())),
                    ("code".to_string(), t.code.clone().map(Value::from).unwrap_or(Value::Null)),
                    ("country".to_string(), t.country.clone().map(Value::from).unwrap_or(Value::Null)),
                    ("founded".to_string(), t.founded.map(Value::from).unwrap_or(Value::Null)),
                    ("national".to_string(), Value::from(t.national)),
                    ("logo".to_string(), t.logo_url.clone().map(Value::from).unwrap_or(Value::Null)),
                    ("venue_id".to_string(), t.venue_id.map(Value::from).unwrap_or(Value::Null)),
                ]
            })
            .collect();
        if !core_rows.is_empty() {
            db::upsert_core(&ctx.pool, "core.teams", &core_rows, &["id"], &["name", "code", "country", "founded", "national", "logo", "venue_id"]).await?;
        }

        tracing::info!(league_id, season, teams = core_rows.len(), "bootstrap_teams_league_completed");
    }
    Ok(())
}
