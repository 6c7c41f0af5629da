//! Coverage calculator (C8): per-league completeness metrics blending a
//! count ratio, a freshness decay, and a pipeline (raw→core) conversion rate
//! into one weighted score, stored to `mart.coverage_status`.

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::PgPool;

use crate::config::CoverageConfig;
use crate::db::safe_identifier;

const LAG_MINUTES_UNKNOWN: i64 = 9999;
const FINISHED_STATUSES: [&str; 3] = ["FT", "AET", "PEN"];

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CoverageReport {
    pub league_id: i64,
    pub league_name: Option<String>,
    pub season: i64,
    pub endpoint: String,
    pub expected_count: Option<i64>,
    pub actual_count: i64,
    pub count_coverage: Option<f64>,
    pub last_update: Option<DateTime<Utc>>,
    pub lag_minutes: i64,
    pub freshness_coverage: f64,
    pub raw_count: i64,
    pub core_count: i64,
    pub pipeline_coverage: f64,
    pub overall_coverage: f64,
}

fn lag_minutes(last_update: Option<DateTime<Utc>>) -> i64 {
    match last_update {
        None => LAG_MINUTES_UNKNOWN,
        Some(t) => (Utc::now() - t).num_minutes().max(0),
    }
}

fn freshness_coverage(lag_minutes: i64, max_lag: i64) -> f64 {
    if max_lag <= 0 {
        return 0.0;
    }
    (100.0 - (lag_minutes as f64 / max_lag as f64 * 100.0)).max(0.0)
}

/// When the expected count is configured, the overall score blends all three
/// terms. When it isn't, count_coverage would be a meaningless 0%, so the
/// weighted sum renormalizes over freshness and pipeline only.
fn overall_coverage(count_cov: Option<f64>, freshness_cov: f64, pipeline_cov: f64, weights: (f64, f64, f64)) -> f64 {
    let (w_count, w_fresh, w_pipe) = weights;
    match count_cov {
        Some(c) => c * w_count + freshness_cov * w_fresh + pipeline_cov * w_pipe,
        None => {
            let denom = if w_fresh + w_pipe == 0.0 { 1.0 } else { w_fresh + w_pipe };
            (freshness_cov * w_fresh + pipeline_cov * w_pipe) / denom
        }
    }
}

async fn league_name(pool: &PgPool, league_id: i64) -> Option<String> {
    sqlx::query_scalar("SELECT name FROM core.leagues WHERE id = $1").bind(league_id).fetch_optional(pool).await.ok().flatten()
}

pub async fn calculate_fixtures_coverage(pool: &PgPool, config: &CoverageConfig, league_id: i64, season: i64) -> Result<CoverageReport> {
    let expected_raw = config.expected_fixtures.get(&league_id.to_string()).copied();
    let expected_known = expected_raw.is_some_and(|v| v > 0);
    let expected = expected_raw.unwrap_or(0);

    let actual: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM core.fixtures WHERE league_id = $1 AND season = $2")
        .bind(league_id)
        .bind(season)
        .fetch_one(pool)
        .await?;

    let count_cov = if expected_known { Some(actual as f64 / expected as f64 * 100.0) } else { None };

    let last_update: Option<DateTime<Utc>> = sqlx::query_scalar("SELECT MAX(updated_at) FROM core.fixtures WHERE league_id = $1 AND season = $2")
        .bind(league_id)
        .bind(season)
        .fetch_one(pool)
        .await?;
    let lag = lag_minutes(last_update);
    let freshness_cov = freshness_coverage(lag, config.max_lag_minutes.daily);

    let raw_count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM raw.api_responses WHERE endpoint = '/fixtures' AND fetched_at > NOW() - INTERVAL '24 hours' \
         AND requested_params->>'league' = $1 AND requested_params->>'season' = $2",
    )
    .bind(league_id.to_string())
    .bind(season.to_string())
    .fetch_one(pool)
    .await?;
    let pipeline_cov = if raw_count > 0 { actual as f64 / raw_count as f64 * 100.0 } else { 0.0 };

    let w = (config.weights.count, config.weights.freshness, config.weights.pipeline);
    let overall = overall_coverage(count_cov, freshness_cov, pipeline_cov, w);

    Ok(CoverageReport {
        league_id,
        league_name: league_name(pool, league_id).await,
        season,
        endpoint: "/fixtures".to_string(),
        expected_count: expected_known.then_some(expected),
        actual_count: actual,
        count_coverage: count_cov.map(round2),
        last_update,
        lag_minutes: lag,
        freshness_coverage: round2(freshness_cov),
        raw_count,
        core_count: actual,
        pipeline_coverage: round2(pipeline_cov),
        overall_coverage: round2(overall),
    })
}

/// Current-only coverage: `/injuries` has no stable "expected" shape, so
/// expected is pinned at 1 ("any current rows on file") and actual is a
/// presence flag rather than a real count.
pub async fn calculate_injuries_coverage(pool: &PgPool, config: &CoverageConfig, league_id: i64, season: i64) -> Result<CoverageReport> {
    let core_total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM core.injuries WHERE league_id = $1 AND season = $2")
        .bind(league_id)
        .bind(season)
        .fetch_one(pool)
        .await?;
    let actual = if core_total > 0 { 1 } else { 0 };
    let count_cov = if actual >= 1 { 100.0 } else { 0.0 };

    let last_update: Option<DateTime<Utc>> = sqlx::query_scalar("SELECT MAX(updated_at) FROM core.injuries WHERE league_id = $1 AND season = $2")
        .bind(league_id)
        .bind(season)
        .fetch_one(pool)
        .await?;
    let lag = lag_minutes(last_update);
    let freshness_cov = freshness_coverage(lag, config.max_lag_minutes.daily);

    let raw_count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM raw.api_responses WHERE endpoint = '/injuries' AND fetched_at > NOW() - INTERVAL '24 hours' \
         AND requested_params->>'league' = $1 AND requested_params->>'season' = $2",
    )
    .bind(league_id.to_string())
    .bind(season.to_string())
    .fetch_one(pool)
    .await?;
    let pipeline_cov = if raw_count > 0 { 100.0 } else { 0.0 };

    let w = (config.weights.count, config.weights.freshness, config.weights.pipeline);
    let overall = count_cov * w.0 + freshness_cov * w.1 + pipeline_cov * w.2;

    Ok(CoverageReport {
        league_id,
        league_name: league_name(pool, league_id).await,
        season,
        endpoint: "/injuries".to_string(),
        expected_count: Some(1),
        actual_count: actual,
        count_coverage: Some(round2(count_cov)),
        last_update,
        lag_minutes: lag,
        freshness_coverage: round2(freshness_cov),
        raw_count,
        core_count: core_total,
        pipeline_coverage: round2(pipeline_cov),
        overall_coverage: round2(overall),
    })
}

/// Coverage for per-fixture endpoints (players/events/statistics/lineups)
/// over a rolling `days`-day window of completed fixtures. `core_table` must
/// carry a `fixture_id` column joinable to `core.fixtures`.
pub async fn calculate_fixture_endpoint_coverage(pool: &PgPool, config: &CoverageConfig, league_id: i64, season: i64, endpoint: &str, core_table: &str, days: i64) -> Result<CoverageReport> {
    if !safe_identifier(core_table) {
        bail!("unsafe core table name: {core_table}");
    }

    let expected: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM core.fixtures WHERE league_id = $1 AND season = $2 \
         AND kickoff_utc >= NOW() - ($3 || ' days')::interval AND status_short = ANY($4)",
    )
    .bind(league_id)
    .bind(season)
    .bind(days.to_string())
    .bind(&FINISHED_STATUSES[..])
    .fetch_one(pool)
    .await?;

    let raw_fixtures: i64 = sqlx::query_scalar(
        "SELECT COUNT(DISTINCT f.id) FROM raw.api_responses r \
         JOIN core.fixtures f ON f.id = (r.requested_params->>'fixture')::bigint \
         WHERE r.endpoint = $1 AND f.league_id = $2 AND f.season = $3 \
         AND f.kickoff_utc >= NOW() - ($4 || ' days')::interval AND f.status_short = ANY($5)",
    )
    .bind(endpoint)
    .bind(league_id)
    .bind(season)
    .bind(days.to_string())
    .bind(&FINISHED_STATUSES[..])
    .fetch_one(pool)
    .await?;

    let core_fixtures_query = format!(
        "SELECT COUNT(DISTINCT t.fixture_id) FROM {core_table} t \
         JOIN core.fixtures f ON f.id = t.fixture_id \
         WHERE f.league_id = $1 AND f.season = $2 \
         AND f.kickoff_utc >= NOW() - ($3 || ' days')::interval AND f.status_short = ANY($4)"
    );
    let core_fixtures: i64 = sqlx::query_scalar(&core_fixtures_query)
        .bind(league_id)
        .bind(season)
        .bind(days.to_string())
        .bind(&FINISHED_STATUSES[..])
        .fetch_one(pool)
        .await?;

    let count_cov = if expected > 0 { raw_fixtures as f64 / expected as f64 * 100.0 } else { 0.0 };

    let last_update: Option<DateTime<Utc>> = sqlx::query_scalar(
        "SELECT MAX(r.fetched_at) FROM raw.api_responses r \
         JOIN core.fixtures f ON f.id = (r.requested_params->>'fixture')::bigint \
         WHERE r.endpoint = $1 AND f.league_id = $2 AND f.season = $3",
    )
    .bind(endpoint)
    .bind(league_id)
    .bind(season)
    .fetch_one(pool)
    .await?;
    let lag = lag_minutes(last_update);
    let freshness_cov = freshness_coverage(lag, config.max_lag_minutes.daily);

    let raw_count_24h: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM raw.api_responses r \
         JOIN core.fixtures f ON f.id = (r.requested_params->>'fixture')::bigint \
         WHERE r.endpoint = $1 AND r.fetched_at > NOW() - INTERVAL '24 hours' AND f.league_id = $2 AND f.season = $3",
    )
    .bind(endpoint)
    .bind(league_id)
    .bind(season)
    .fetch_one(pool)
    .await?;

    let pipeline_cov = if raw_fixtures > 0 { core_fixtures as f64 / raw_fixtures as f64 * 100.0 } else { 0.0 };

    let w = (config.weights.count, config.weights.freshness, config.weights.pipeline);
    let overall = count_cov * w.0 + freshness_cov * w.1 + pipeline_cov * w.2;

    Ok(CoverageReport {
        league_id,
        league_name: league_name(pool, league_id).await,
        season,
        endpoint: endpoint.to_string(),
        expected_count: Some(expected),
        actual_count: raw_fixtures,
        count_coverage: Some(round2(count_cov)),
        last_update,
        lag_minutes: lag,
        freshness_coverage: round2(freshness_cov),
        raw_count: raw_count_24h,
        core_count: core_fixtures,
        pipeline_coverage: round2(pipeline_cov),
        overall_coverage: round2(overall),
    })
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lag_minutes_is_sentinel_when_never_updated() {
        assert_eq!(lag_minutes(None), LAG_MINUTES_UNKNOWN);
    }

    #[test]
    fn freshness_coverage_floors_at_zero_past_max_lag() {
        assert_eq!(freshness_coverage(5000, 1440), 0.0);
        assert_eq!(freshness_coverage(0, 1440), 100.0);
    }

    #[test]
    fn freshness_coverage_is_zero_when_max_lag_non_positive() {
        assert_eq!(freshness_coverage(10, 0), 0.0);
    }

    #[test]
    fn overall_coverage_renormalizes_when_count_unknown() {
        let weights = (0.5, 0.3, 0.2);
        let with_count = overall_coverage(Some(80.0), 90.0, 70.0, weights);
        let without_count = overall_coverage(None, 90.0, 70.0, weights);
        assert!((with_count - (80.0 * 0.5 + 90.0 * 0.3 + 70.0 * 0.2)).abs() < 1e-9);
        assert!((without_count - (90.0 * 0.3 + 70.0 * 0.2) / 0.5).abs() < 1e-9);
    }

    #[test]
    fn rejects_unsafe_core_table_identifier() {
        assert!(!safe_identifier("core.fixture_events; DROP TABLE x"));
    }
}
