//! Job catalogue (C10 behaviors). Every job is a plain async function over a
//! shared `JobContext` — the scheduler and the `run-job` CLI subcommand both
//! call into these directly, so there is exactly one code path per job
//! regardless of what triggered it.

pub mod auto_finish;
pub mod backfill;
pub mod bootstrap;
pub mod daily_fixtures;
pub mod daily_standings;
pub mod fixture_details;
pub mod injuries_hourly;
pub mod leaderboards;
pub mod season_rollover;
pub mod stale_live_refresh;
pub mod stale_scheduled_finalize;

use std::sync::Arc;

use sqlx::PgPool;

use crate::config::{CoverageConfig, ScopePolicyConfig};
use crate::delta_detector::DeltaDetector;
use crate::http_client::ApiClient;
use crate::rate_limiter::RateLimiter;

/// Bundles everything a job needs: the connection pool, the upstream client,
/// the shared rate limiter (one bucket per process, not per job), and the
/// two policy documents that gate scope and coverage scoring.
pub struct JobContext {
    pub pool: PgPool,
    pub client: ApiClient,
    pub limiter: Arc<RateLimiter>,
    pub delta_detector: DeltaDetector,
    pub scope_policy: ScopePolicyConfig,
    pub coverage_config: CoverageConfig,
}

/// A (league, season) pair tracked by the daily job configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LeagueSeason {
    pub league_id: i64,
    pub season: i64,
}

/// Splits tracked pairs into (in_scope, skipped) for one endpoint, logging
/// the skipped set for observability rather than silently dropping it.
pub async fn filter_in_scope(ctx: &JobContext, endpoint: &str, pairs: &[LeagueSeason]) -> Vec<LeagueSeason> {
    let mut in_scope = Vec::new();
    let mut skipped = Vec::new();
    for pair in pairs {
        let decision = crate::scope_policy::decide_scope_for_league(&ctx.pool, &ctx.scope_policy, pair.league_id, pair.season, endpoint).await;
        if decision.in_scope {
            in_scope.push(*pair);
        } else {
            skipped.push((*pair, decision.reason));
        }
    }
    if !skipped.is_empty() {
        tracing::info!(endpoint, skipped = ?skipped, "scope_policy_skipped_pairs");
    }
    in_scope
}

pub(crate) fn today_utc_date() -> chrono::NaiveDate {
    chrono::Utc::now().date_naive()
}
