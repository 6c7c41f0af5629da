//! Dependency resolver (C6): ensures a league, its teams, and referenced
//! venues exist in `core.*` before a job writes rows that carry a foreign key
//! into them. Every `ensure_*` function is idempotent — safe to call on every
//! job run, not just the first.

use std::collections::HashSet;

use anyhow::{bail, Result};
use serde_json::Value;

use crate::db::{self, progress, CoreRow};
use crate::http_client::ApiClient;
use crate::rate_limiter::RateLimiter;
use crate::transforms::{leagues, teams, venues};
use sqlx::PgPool;

/// Fetches one endpoint, persists it to `raw.api_responses`, and returns a
/// `{"response": ...}`-shaped value suitable for the `transforms::*`
/// functions (which all expect that envelope shape).
async fn fetch_and_store(client: &ApiClient, limiter: &RateLimiter, pool: &PgPool, endpoint: &str, params: &std::collections::HashMap<String, String>) -> Result<Value> {
    limiter.acquire_token().await?;
    let result = client.get(endpoint, params).await?;
    limiter.update_from_headers(&result.headers)?;

    let requested_params = serde_json::to_value(params)?;
    let headers_value = serde_json::to_value(&result.headers)?;
    let body = serde_json::json!({
        "get": result.data.get,
        "parameters": result.data.parameters,
        "errors": result.data.errors,
        "results": result.data.results,
        "response": result.data.response,
    });
    db::upsert_raw(pool, endpoint, &requested_params, result.status as i32, &headers_value, &body).await?;

    if !result.data.errors.is_null() && result.data.errors != Value::Array(vec![]) && result.data.errors != Value::Object(Default::default()) {
        bail!("api_errors:{endpoint}:{:?}", result.data.errors);
    }
    Ok(body)
}

fn league_has_season_metadata(seasons_json: &Value, season: i64) -> bool {
    let Some(items) = seasons_json.as_array() else { return false };
    items.iter().any(|item| {
        item["year"].as_i64() == Some(season) && item["start"].is_string() && item["end"].is_string()
    })
}

fn league_row_to_core(row: &leagues::LeagueRow, seasons_json: Value) -> CoreRow {
    vec![
        ("id".into(), Value::from(row.league_id)),
        ("name".into(), Value::from(row.name.clone())),
        ("type".into(), row.league_type.clone().map(Value::from).unwrap_or(Value::Null)),
        ("logo".into(), row.logo_url.clone().map(Value::from).unwrap_or(Value::Null)),
        ("country_name".into(), row.country_name.clone().map(Value::from).unwrap_or(Value::Null)),
        ("country_code".into(), row.country_code.clone().map(Value::from).unwrap_or(Value::Null)),
        ("country_flag".into(), row.country_flag_url.clone().map(Value::from).unwrap_or(Value::Null)),
        ("seasons".into(), seasons_json),
    ]
}

fn team_row_to_core(row: &teams::TeamRow) -> CoreRow {
    vec![
        ("id".into(), Value::from(row.team_id)),
        ("name".into(), Value::from(row.name.clone())),
        ("code".into(), row.code.clone().map(Value::from).unwrap_or(Value::Null)),
        ("country".into(), row.country.clone().map(Value::from).unwrap_or(Value::Null)),
        ("founded".into(), row.founded.map(Value::from).unwrap_or(Value::Null)),
        ("national".into(), Value::from(row.national)),
        ("logo".into(), row.logo_url.clone().map(Value::from).unwrap_or(Value::Null)),
        ("venue_id".into(), row.venue_id.map(Value::from).unwrap_or(Value::Null)),
    ]
}

fn venue_row_to_core(row: &venues::VenueRow) -> CoreRow {
    vec![
        ("id".into(), Value::from(row.venue_id)),
        ("name".into(), row.name.clone().map(Value::from).unwrap_or(Value::Null)),
        ("address".into(), row.address.clone().map(Value::from).unwrap_or(Value::Null)),
        ("city".into(), row.city.clone().map(Value::from).unwrap_or(Value::Null)),
        ("country".into(), row.country.clone().map(Value::from).unwrap_or(Value::Null)),
        ("capacity".into(), row.capacity.map(Value::from).unwrap_or(Value::Null)),
        ("surface".into(), row.surface.clone().map(Value::from).unwrap_or(Value::Null)),
        ("image".into(), row.image_url.clone().map(Value::from).unwrap_or(Value::Null)),
    ]
}

/// Upserts `core.leagues` only when missing, or present but lacking the
/// requested season's start/end metadata (backfill windowing needs both).
pub async fn ensure_league_exists(pool: &PgPool, client: &ApiClient, limiter: &RateLimiter, league_id: i64, season: Option<i64>) -> Result<()> {
    let existing: Option<Value> = sqlx::query_scalar("SELECT seasons FROM core.leagues WHERE id = $1")
        .bind(league_id)
        .fetch_optional(pool)
        .await?;

    if let Some(seasons) = &existing {
        match season {
            None | Some(0) => return Ok(()),
            Some(s) if league_has_season_metadata(seasons, s) => return Ok(()),
            _ => {}
        }
    }

    let mut params = std::collections::HashMap::new();
    params.insert("id".to_string(), league_id.to_string());
    let body = fetch_and_store(client, limiter, pool, "/leagues", &params).await?;

    let rows = leagues::transform_leagues(&body);
    let Some(row) = rows.into_iter().find(|r| r.league_id == league_id) else {
        bail!("league_not_found:league_id={league_id}");
    };
    let seasons_rows = leagues::transform_league_seasons(&body);
    let seasons_json = serde_json::to_value(
        seasons_rows
            .into_iter()
            .filter(|s| s.league_id == league_id)
            .map(|s| serde_json::json!({"year": s.season, "start": s.start_date, "end": s.end_date, "current": s.is_current}))
            .collect::<Vec<_>>(),
    )?;

    db::upsert_core(
        pool,
        "core.leagues",
        &[league_row_to_core(&row, seasons_json)],
        &["id"],
        &["name", "type", "logo", "country_name", "country_code", "country_flag", "seasons"],
    )
    .await?;

    tracing::info!(league_id, ?season, "league_upserted_dependency");
    Ok(())
}

/// DB-backed cache: once `/teams` succeeds for (league, season), later calls
/// in the same season skip the upstream request entirely — unless a team id
/// we actually need turns out to be missing from `core.teams`, in which case
/// the cache is treated as stale and refreshed.
pub async fn ensure_teams_exist_for_league(pool: &PgPool, client: &ApiClient, limiter: &RateLimiter, league_id: i64, season: i64, team_ids: &HashSet<i64>) -> Result<()> {
    if team_ids.is_empty() {
        return Ok(());
    }

    let ids: Vec<i64> = team_ids.iter().copied().collect();
    if progress::get_team_bootstrap_completed(pool, league_id, season).await?.unwrap_or(false) {
        let missing = progress::missing_team_ids(pool, &ids).await?;
        if missing.is_empty() {
            return Ok(());
        }
        tracing::warn!(league_id, season, missing_count = missing.len(), "teams_bootstrap_cache_incomplete_refreshing");
        let _ = progress::upsert_team_bootstrap_progress(pool, league_id, season, false, Some(&format!("cache_incomplete_missing_teams:{}", missing.len()))).await;
    }

    let _ = progress::upsert_team_bootstrap_progress(pool, league_id, season, false, None).await;

    let mut params = std::collections::HashMap::new();
    params.insert("league".to_string(), league_id.to_string());
    params.insert("season".to_string(), season.to_string());

    let body = match fetch_and_store(client, limiter, pool, "/teams", &params).await {
        Ok(body) => body,
        Err(e) => {
            let _ = progress::upsert_team_bootstrap_progress(pool, league_id, season, false, Some(&e.to_string())).await;
            return Err(e);
        }
    };

    let venue_rows: Vec<CoreRow> = body
        .get("response")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(venues::venue_row_from_team_item)
        .map(|v| venue_row_to_core(&v))
        .collect();
    if !venue_rows.is_empty() {
        db::upsert_core(pool, "core.venues", &venue_rows, &["id"], &["name", "address", "city", "country", "capacity", "surface", "image"]).await?;
    }

    let team_rows = teams::transform_teams(&body);
    let team_core_rows: Vec<CoreRow> = team_rows.iter().map(team_row_to_core).collect();
    if !team_core_rows.is_empty() {
        db::upsert_core(pool, "core.teams", &team_core_rows, &["id"], &["name", "code", "country", "founded", "national", "logo", "venue_id"]).await?;
    }

    let missing_after = progress::missing_team_ids(pool, &ids).await?;
    let last_error = if missing_after.is_empty() { None } else { Some(format!("teams_still_missing_after_refresh:{}", missing_after.len())) };
    let _ = progress::upsert_team_bootstrap_progress(pool, league_id, season, true, last_error.as_deref()).await;

    tracing::info!(league_id, season, requested = ids.len(), upserted = team_rows.len(), "teams_upserted_dependency");
    Ok(())
}

fn team_ids_from_fixtures_envelope(envelope: &Value) -> HashSet<i64> {
    let mut ids = HashSet::new();
    if let Some(items) = envelope.get("response").and_then(Value::as_array) {
        for item in items {
            if let Some(id) = item["teams"]["home"]["id"].as_i64() {
                ids.insert(id);
            }
            if let Some(id) = item["teams"]["away"]["id"].as_i64() {
                ids.insert(id);
            }
        }
    }
    ids
}

fn team_ids_from_standings_envelope(envelope: &Value) -> HashSet<i64> {
    let mut ids = HashSet::new();
    if let Some(groups) = envelope["response"][0]["league"]["standings"].as_array() {
        for group in groups {
            if let Some(entries) = group.as_array() {
                for entry in entries {
                    if let Some(id) = entry["team"]["id"].as_i64() {
                        ids.insert(id);
                    }
                }
            }
        }
    }
    ids
}

/// Minimal venue rows built straight from a fixtures envelope (name/city
/// only) so `core.fixtures.venue_id`'s FK is satisfied without an extra
/// `/venues` round trip.
fn venue_rows_from_fixtures_envelope(envelope: &Value) -> Vec<CoreRow> {
    let mut by_id: std::collections::BTreeMap<i64, CoreRow> = std::collections::BTreeMap::new();
    if let Some(items) = envelope.get("response").and_then(Value::as_array) {
        for item in items {
            let venue = &item["fixture"]["venue"];
            let Some(id) = venue["id"].as_i64() else { continue };
            if id <= 0 {
                continue;
            }
            by_id.insert(
                id,
                vec![
                    ("id".into(), Value::from(id)),
                    ("name".into(), venue["name"].as_str().map(Value::from).unwrap_or(Value::Null)),
                    ("city".into(), venue["city"].as_str().map(Value::from).unwrap_or(Value::Null)),
                ],
            );
        }
    }
    by_id.into_values().collect()
}

pub async fn ensure_fixtures_dependencies(pool: &PgPool, client: &ApiClient, limiter: &RateLimiter, league_id: i64, season: Option<i64>, fixtures_envelope: &Value) -> Result<()> {
    ensure_league_exists(pool, client, limiter, league_id, season).await?;
    let Some(season) = season else { bail!("season_required_for_teams_bootstrap") };

    let team_ids = team_ids_from_fixtures_envelope(fixtures_envelope);
    ensure_teams_exist_for_league(pool, client, limiter, league_id, season, &team_ids).await?;

    let venue_rows = venue_rows_from_fixtures_envelope(fixtures_envelope);
    if !venue_rows.is_empty() {
        let count = venue_rows.len();
        db::upsert_core(pool, "core.venues", &venue_rows, &["id"], &["name", "city"]).await?;
        tracing::info!(league_id, season, venues_upserted = count, "venues_upserted_dependency");
    }
    Ok(())
}

pub async fn ensure_standings_dependencies(pool: &PgPool, client: &ApiClient, limiter: &RateLimiter, league_id: i64, season: i64, standings_envelope: &Value) -> Result<()> {
    ensure_league_exists(pool, client, limiter, league_id, Some(season)).await?;
    let team_ids = team_ids_from_standings_envelope(standings_envelope);
    ensure_teams_exist_for_league(pool, client, limiter, league_id, season, &team_ids).await
}

/// Venue ids inserted as the minimal `(id, name, city)` FK-safety stub in
/// `ensure_fixtures_dependencies`, still missing the rest of `/venues`'s
/// fields.
async fn stub_venue_ids(pool: &PgPool, limit: i64) -> Result<Vec<i64>> {
    let rows: Vec<i64> = sqlx::query_scalar("SELECT id FROM core.venues WHERE address IS NULL AND country IS NULL ORDER BY id LIMIT $1")
        .bind(limit)
        .fetch_all(pool)
        .await?;
    Ok(rows)
}

/// Enriches minimal venue stubs with the full `/venues?id=` record, bounded
/// by `max_per_run` so a large stub backlog can't eat a whole run's token
/// budget. `max_per_run <= 0` disables the pass entirely.
pub async fn backfill_venue_details(pool: &PgPool, client: &ApiClient, limiter: &RateLimiter, max_per_run: i64) -> Result<usize> {
    if max_per_run <= 0 {
        return Ok(0);
    }
    let ids = stub_venue_ids(pool, max_per_run).await?;
    let mut enriched = 0usize;
    for id in ids {
        let mut params = std::collections::HashMap::new();
        params.insert("id".to_string(), id.to_string());
        let body = match fetch_and_store(client, limiter, pool, "/venues", &params).await {
            Ok(b) => b,
            Err(e) => {
                tracing::warn!(venue_id = id, err = %e, "venues_backfill_fetch_failed");
                continue;
            }
        };
        let rows = venues::transform_venues(&body);
        if rows.is_empty() {
            continue;
        }
        let core_rows: Vec<CoreRow> = rows.iter().map(venue_row_to_core).collect();
        db::upsert_core(pool, "core.venues", &core_rows, &["id"], &["name", "address", "city", "country", "capacity", "surface", "image"]).await?;
        enriched += 1;
    }
    if enriched > 0 {
        tracing::info!(enriched, "venues_backfill_enriched");
    }
    Ok(enriched)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn season_metadata_requires_both_start_and_end() {
        let seasons = json!([{"year": 2024, "start": "2024-08-01", "end": "2025-05-31"}]);
        assert!(league_has_season_metadata(&seasons, 2024));
        assert!(!league_has_season_metadata(&seasons, 2023));

        let incomplete = json!([{"year": 2024, "start": null, "end": null}]);
        assert!(!league_has_season_metadata(&incomplete, 2024));
    }

    #[test]
    fn extracts_team_ids_from_fixtures_envelope() {
        let envelope = json!({"response": [{"teams": {"home": {"id": 1}, "away": {"id": 2}}}]});
        let ids = team_ids_from_fixtures_envelope(&envelope);
        assert_eq!(ids, HashSet::from([1, 2]));
    }

    #[test]
    fn venue_rows_from_fixtures_envelope_skip_zero_id() {
        let envelope = json!({"response": [
            {"fixture": {"venue": {"id": 0, "name": "Unknown"}}},
            {"fixture": {"venue": {"id": 5, "name": "Stadium", "city": "Town"}}},
        ]});
        let rows = venue_rows_from_fixtures_envelope(&envelope);
        assert_eq!(rows.len(), 1);
    }
}
