//! Static YAML configuration (C1). Every loader resolves a path with the same
//! precedence: explicit argument, then an env override, then a project-relative
//! default under `config/`. A missing required key is a startup-time fatal
//! error naming the file and key, not a silent default.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::Deserialize;

fn project_root() -> PathBuf {
    std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
}

fn resolve_path(explicit: Option<&Path>, env_var: &str, default_rel: &str) -> PathBuf {
    if let Some(p) = explicit {
        return p.to_path_buf();
    }
    if let Ok(p) = std::env::var(env_var) {
        return PathBuf::from(p);
    }
    project_root().join(default_rel)
}

fn load_yaml(path: &Path) -> Result<serde_yaml::Value> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading config file {}", path.display()))?;
    let value: serde_yaml::Value = serde_yaml::from_str(&text)
        .with_context(|| format!("parsing YAML in {}", path.display()))?;
    Ok(value)
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub base_url: String,
    pub api_key_env: String,
    pub timeout_seconds: f64,
    #[serde(default = "default_timezone")]
    pub default_timezone: String,
}

fn default_timezone() -> String {
    "UTC".to_string()
}

pub fn load_api_config(path: Option<&Path>) -> Result<ApiConfig> {
    let cfg_path = resolve_path(path, "API_FOOTBALL_API_CONFIG", "config/api.yaml");
    let root = load_yaml(&cfg_path)?;
    let api = root
        .get("api")
        .cloned()
        .with_context(|| format!("missing `api` section in {}", cfg_path.display()))?;
    let cfg: ApiConfig = serde_yaml::from_value(api)
        .with_context(|| format!("invalid `api` section in {}", cfg_path.display()))?;
    if cfg.base_url.is_empty() {
        bail!("missing api.base_url in {}", cfg_path.display());
    }
    if cfg.api_key_env.is_empty() {
        bail!("missing api.api_key_env in {}", cfg_path.display());
    }
    Ok(cfg)
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimiterConfig {
    pub token_bucket_per_minute: u32,
    pub minute_soft_limit: u32,
    pub daily_limit: i64,
    pub emergency_stop_threshold: i64,
}

pub fn load_rate_limiter_config(path: Option<&Path>) -> Result<RateLimiterConfig> {
    let cfg_path = resolve_path(path, "API_FOOTBALL_RATE_LIMITER_CONFIG", "config/rate_limiter.yaml");
    let root = load_yaml(&cfg_path)?;
    let rl = root
        .get("rate_limiter")
        .cloned()
        .with_context(|| format!("missing `rate_limiter` section in {}", cfg_path.display()))?;
    let cfg: RateLimiterConfig = serde_yaml::from_value(rl)
        .with_context(|| format!("invalid `rate_limiter` section in {}", cfg_path.display()))?;
    Ok(cfg)
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct MaxLagMinutes {
    pub daily: i64,
    pub live: i64,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct CoverageWeights {
    pub count: f64,
    pub freshness: f64,
    pub pipeline: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CoverageConfig {
    #[serde(default)]
    pub expected_fixtures: HashMap<String, i64>,
    #[serde(default)]
    pub max_lag_minutes: MaxLagMinutes,
    #[serde(default)]
    pub weights: CoverageWeights,
}

impl Default for CoverageConfig {
    fn default() -> Self {
        Self {
            expected_fixtures: HashMap::new(),
            max_lag_minutes: MaxLagMinutes { daily: 1440, live: 5 },
            weights: CoverageWeights { count: 0.5, freshness: 0.3, pipeline: 0.2 },
        }
    }
}

pub fn load_coverage_config(path: Option<&Path>) -> Result<CoverageConfig> {
    let cfg_path = resolve_path(path, "API_FOOTBALL_COVERAGE_CONFIG", "config/coverage.yaml");
    if !cfg_path.exists() {
        return Ok(CoverageConfig::default());
    }
    let root = load_yaml(&cfg_path)?;
    let coverage = root.get("coverage").cloned().unwrap_or(serde_yaml::Value::Null);
    let cfg: CoverageConfig = serde_yaml::from_value(coverage).unwrap_or_default();
    Ok(cfg)
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ScopeOverride {
    pub league_id: i64,
    pub season: i64,
    #[serde(default)]
    pub enabled_endpoints: Vec<String>,
    #[serde(default)]
    pub disabled_endpoints: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct CompetitionTypeScope {
    #[serde(default)]
    pub enabled_endpoints: Vec<String>,
    #[serde(default)]
    pub disabled_endpoints: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ScopePolicyConfig {
    #[serde(default)]
    pub version: i64,
    #[serde(default)]
    pub baseline_enabled_endpoints: Vec<String>,
    #[serde(default)]
    pub by_competition_type: HashMap<String, CompetitionTypeScope>,
    #[serde(default)]
    pub overrides: Vec<ScopeOverride>,
}

pub fn load_scope_policy_config(path: Option<&Path>) -> Result<ScopePolicyConfig> {
    let cfg_path = resolve_path(path, "API_FOOTBALL_SCOPE_POLICY_CONFIG", "config/scope_policy.yaml");
    if !cfg_path.exists() {
        return Ok(ScopePolicyConfig::default());
    }
    let root = load_yaml(&cfg_path)?;
    let cfg: ScopePolicyConfig = serde_yaml::from_value(root)
        .with_context(|| format!("invalid scope policy document in {}", cfg_path.display()))?;
    Ok(cfg)
}

#[derive(Debug, Clone, Deserialize)]
pub struct TrackedLeague {
    pub id: i64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub season: Option<i64>,
}

/// `interval` triggers can be either a cron expression or a fixed-seconds repeat.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum JobTrigger {
    Cron { cron: String },
    Interval { seconds: u64 },
}

#[derive(Debug, Clone, Deserialize)]
pub struct JobDef {
    pub job_id: String,
    #[serde(default)]
    pub enabled: bool,
    #[serde(rename = "type")]
    pub job_type: String,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub params: serde_yaml::Mapping,
    #[serde(default)]
    pub interval: Option<JobTrigger>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub filters: serde_yaml::Mapping,
    #[serde(default)]
    pub mode: serde_yaml::Mapping,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct JobFile {
    #[serde(default)]
    pub jobs: Vec<JobDef>,
    #[serde(default)]
    pub tracked_leagues: Vec<TrackedLeague>,
    #[serde(default)]
    pub season: Option<i64>,
}

pub fn jobs_dir() -> PathBuf {
    resolve_path(None, "API_FOOTBALL_JOBS_DIR", "config/jobs")
}

pub fn load_job_file(path: &Path) -> Result<JobFile> {
    if !path.exists() {
        return Ok(JobFile::default());
    }
    let root = load_yaml(path)?;
    let file: JobFile = serde_yaml::from_value(root)
        .with_context(|| format!("invalid job file {}", path.display()))?;
    Ok(file)
}

/// Union of tracked league ids from `jobs/daily.yaml`, plus an inferred season
/// when it is unambiguous: either an explicit top-level `season`, or every
/// tracked entry sharing a single non-null season.
pub fn daily_tracked_leagues(jobs_dir: &Path) -> (std::collections::HashSet<i64>, Option<i64>) {
    let daily_path = jobs_dir.join("daily.yaml");
    let file = match load_job_file(&daily_path) {
        Ok(f) => f,
        Err(_) => return (Default::default(), None),
    };
    let mut ids = std::collections::HashSet::new();
    let mut seasons = std::collections::HashSet::new();
    for tl in &file.tracked_leagues {
        ids.insert(tl.id);
        if let Some(s) = tl.season {
            seasons.insert(s);
        }
    }
    let inferred = file.season.or_else(|| {
        if seasons.len() == 1 {
            seasons.into_iter().next()
        } else {
            None
        }
    });
    (ids, inferred)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn daily_tracked_leagues_infers_unambiguous_season() {
        let dir = std::env::temp_dir().join(format!("ingest_cfg_test_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join("daily.yaml"),
            "tracked_leagues:\n  - id: 39\n    season: 2024\n  - id: 140\n    season: 2024\n",
        )
        .unwrap();
        let (ids, season) = daily_tracked_leagues(&dir);
        assert_eq!(ids, [39, 140].into_iter().collect());
        assert_eq!(season, Some(2024));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn daily_tracked_leagues_is_none_when_ambiguous() {
        let dir = std::env::temp_dir().join(format!("ingest_cfg_test2_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join("daily.yaml"),
            "tracked_leagues:\n  - id: 39\n    season: 2024\n  - id: 140\n    season: 2023\n",
        )
        .unwrap();
        let (_, season) = daily_tracked_leagues(&dir);
        assert_eq!(season, None);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn default_coverage_weights_match_spec() {
        let cfg = CoverageConfig::default();
        assert_eq!(cfg.weights.count, 0.5);
        assert_eq!(cfg.weights.freshness, 0.3);
        assert_eq!(cfg.weights.pipeline, 0.2);
        assert_eq!(cfg.max_lag_minutes.daily, 1440);
        assert_eq!(cfg.max_lag_minutes.live, 5);
    }
}
