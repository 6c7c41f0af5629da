//! Progress-table helpers. Every multi-run job resumes from a row here
//! instead of in-memory state, so the core is restart-safe.

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct BackfillProgress {
    pub job_id: String,
    pub league_id: i64,
    pub season: i64,
    pub next_page: i64,
    pub completed: bool,
    pub last_error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

pub async fn get_backfill_progress(pool: &PgPool, job_id: &str, league_id: i64, season: i64) -> Result<Option<BackfillProgress>> {
    let row = sqlx::query_as::<_, BackfillProgress>(
        "SELECT job_id, league_id, season, next_page, completed, last_error, updated_at \
         FROM core.backfill_progress WHERE job_id = $1 AND league_id = $2 AND season = $3",
    )
    .bind(job_id)
    .bind(league_id)
    .bind(season)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

pub async fn upsert_backfill_progress(
    pool: &PgPool,
    job_id: &str,
    league_id: i64,
    season: i64,
    next_page: i64,
    completed: bool,
    last_error: Option<&str>,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO core.backfill_progress (job_id, league_id, season, next_page, completed, last_error, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, NOW())
        ON CONFLICT (job_id, league_id, season) DO UPDATE SET
          next_page = EXCLUDED.next_page,
          completed = EXCLUDED.completed,
          last_error = EXCLUDED.last_error,
          updated_at = NOW()
        "#,
    )
    .bind(job_id)
    .bind(league_id)
    .bind(season)
    .bind(next_page)
    .bind(completed)
    .bind(last_error)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn get_team_bootstrap_completed(pool: &PgPool, league_id: i64, season: i64) -> Result<Option<bool>> {
    let completed: Option<bool> = sqlx::query_scalar(
        "SELECT completed FROM core.team_bootstrap_progress WHERE league_id = $1 AND season = $2",
    )
    .bind(league_id)
    .bind(season)
    .fetch_optional(pool)
    .await?
    .flatten();
    Ok(completed)
}

pub async fn upsert_team_bootstrap_progress(pool: &PgPool, league_id: i64, season: i64, completed: bool, last_error: Option<&str>) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO core.team_bootstrap_progress (league_id, season, completed, last_error, updated_at)
        VALUES ($1, $2, $3, $4, NOW())
        ON CONFLICT (league_id, season) DO UPDATE SET
          completed = EXCLUDED.completed,
          last_error = EXCLUDED.last_error,
          updated_at = NOW()
        "#,
    )
    .bind(league_id)
    .bind(season)
    .bind(completed)
    .bind(last_error)
    .execute(pool)
    .await?;
    Ok(())
}

/// Finds team ids referenced by `team_ids` that are absent from `core.teams`,
/// used as a safety check before writing FK-constrained tables.
pub async fn missing_team_ids(pool: &PgPool, team_ids: &[i64]) -> Result<Vec<i64>> {
    if team_ids.is_empty() {
        return Ok(vec![]);
    }
    let existing: Vec<i64> = sqlx::query_scalar("SELECT id FROM core.teams WHERE id = ANY($1)")
        .bind(team_ids)
        .fetch_all(pool)
        .await?;
    let existing_set: std::collections::HashSet<i64> = existing.into_iter().collect();
    Ok(team_ids.iter().copied().filter(|id| !existing_set.contains(id)).collect())
}

/// Single-cursor round-robin progress for `daily_standings`: advances through
/// (league, season) pairs in a deterministic order, wrapping to a new lap.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StandingsRefreshProgress {
    pub job_id: String,
    pub cursor_index: i64,
    pub lap: i64,
}

pub async fn get_standings_refresh_progress(pool: &PgPool, job_id: &str) -> Result<StandingsRefreshProgress> {
    let row = sqlx::query_as::<_, StandingsRefreshProgress>(
        "SELECT job_id, cursor_index, lap FROM core.standings_refresh_progress WHERE job_id = $1",
    )
    .bind(job_id)
    .fetch_optional(pool)
    .await?;
    Ok(row.unwrap_or(StandingsRefreshProgress { job_id: job_id.to_string(), cursor_index: 0, lap: 0 }))
}

pub async fn save_standings_refresh_progress(pool: &PgPool, job_id: &str, cursor_index: i64, lap: i64) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO core.standings_refresh_progress (job_id, cursor_index, lap, updated_at)
        VALUES ($1, $2, $3, NOW())
        ON CONFLICT (job_id) DO UPDATE SET
          cursor_index = EXCLUDED.cursor_index,
          lap = EXCLUDED.lap,
          updated_at = NOW()
        "#,
    )
    .bind(job_id)
    .bind(cursor_index)
    .bind(lap)
    .execute(pool)
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    /// Round-robin wrap: with 3 pairs and a cursor at index 2 (last), the
    /// next index wraps to 0 and the lap counter advances.
    #[test]
    fn round_robin_cursor_wraps_and_advances_lap() {
        let len = 3i64;
        let cursor = 2i64;
        let (next_cursor, lap_delta) = if cursor + 1 >= len { (0, 1) } else { (cursor + 1, 0) };
        assert_eq!(next_cursor, 0);
        assert_eq!(lap_delta, 1);
    }
}
