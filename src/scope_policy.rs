//! Scope policy decision tree (C9): decides whether an endpoint is in scope
//! for a given (league, season), layering baseline → overrides →
//! type-based allow/deny → default-allow, with an explicit fail-open when the
//! league's competition type is unknown.

use std::collections::HashSet;

use sqlx::PgPool;

use crate::config::ScopePolicyConfig;

#[derive(Debug, Clone, PartialEq)]
pub struct ScopeDecision {
    pub in_scope: bool,
    pub reason: String,
    pub policy_version: i64,
    pub league_type: Option<String>,
}

fn apply_overrides(policy: &ScopePolicyConfig, league_id: i64, season: i64, endpoint: &str) -> Option<(bool, &'static str)> {
    for o in &policy.overrides {
        if o.league_id != league_id {
            continue;
        }
        if o.season != 0 && o.season != season {
            continue;
        }
        let disabled: HashSet<&str> = o.disabled_endpoints.iter().map(String::as_str).collect();
        let enabled: HashSet<&str> = o.enabled_endpoints.iter().map(String::as_str).collect();
        if disabled.contains(endpoint) {
            return Some((false, "override_disabled"));
        }
        if enabled.contains(endpoint) {
            return Some((true, "override_enabled"));
        }
    }
    None
}

/// Baseline endpoints are always enabled, regardless of type or overrides.
/// Overrides win next (deny wins within one matching override entry; the
/// first matching override entry wins across entries). Unknown league type
/// fails open. Otherwise the type's denylist wins, then its allowlist (if
/// present, absence from it is a deny), and default allow when the type has
/// neither list configured.
pub fn decide_scope(policy: &ScopePolicyConfig, league_id: i64, season: i64, endpoint: &str, league_type: Option<&str>) -> ScopeDecision {
    let baseline: HashSet<&str> = policy.baseline_enabled_endpoints.iter().map(String::as_str).collect();
    if baseline.contains(endpoint) {
        return ScopeDecision { in_scope: true, reason: "baseline_enabled".to_string(), policy_version: policy.version, league_type: None };
    }

    if let Some((forced, reason)) = apply_overrides(policy, league_id, season, endpoint) {
        return ScopeDecision { in_scope: forced, reason: reason.to_string(), policy_version: policy.version, league_type: None };
    }

    let Some(league_type) = league_type else {
        return ScopeDecision { in_scope: true, reason: "league_type_unknown_fail_open".to_string(), policy_version: policy.version, league_type: None };
    };

    let type_cfg = policy.by_competition_type.get(league_type);
    let disabled: HashSet<&str> = type_cfg.map(|c| c.disabled_endpoints.iter().map(String::as_str).collect()).unwrap_or_default();
    let enabled: HashSet<&str> = type_cfg.map(|c| c.enabled_endpoints.iter().map(String::as_str).collect()).unwrap_or_default();

    if disabled.contains(endpoint) {
        return ScopeDecision {
            in_scope: false,
            reason: format!("type_{league_type}_disabled"),
            policy_version: policy.version,
            league_type: Some(league_type.to_string()),
        };
    }

    if !enabled.is_empty() {
        return if enabled.contains(endpoint) {
            ScopeDecision {
                in_scope: true,
                reason: format!("type_{league_type}_enabled"),
                policy_version: policy.version,
                league_type: Some(league_type.to_string()),
            }
        } else {
            ScopeDecision {
                in_scope: false,
                reason: format!("type_{league_type}_not_in_enabled_list"),
                policy_version: policy.version,
                league_type: Some(league_type.to_string()),
            }
        };
    }

    ScopeDecision {
        in_scope: true,
        reason: format!("type_{league_type}_default_allow"),
        policy_version: policy.version,
        league_type: Some(league_type.to_string()),
    }
}

pub async fn league_type_from_core(pool: &PgPool, league_id: i64) -> Option<String> {
    sqlx::query_scalar::<_, Option<String>>("SELECT type FROM core.leagues WHERE id = $1")
        .bind(league_id)
        .fetch_optional(pool)
        .await
        .ok()
        .flatten()
        .flatten()
}

pub async fn decide_scope_for_league(pool: &PgPool, policy: &ScopePolicyConfig, league_id: i64, season: i64, endpoint: &str) -> ScopeDecision {
    let league_type = league_type_from_core(pool, league_id).await;
    decide_scope(policy, league_id, season, endpoint, league_type.as_deref())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CompetitionTypeScope, ScopeOverride};

    fn policy() -> ScopePolicyConfig {
        ScopePolicyConfig {
            version: 3,
            baseline_enabled_endpoints: vec!["/fixtures".to_string()],
            by_competition_type: [
                (
                    "Cup".to_string(),
                    CompetitionTypeScope { enabled_endpoints: vec![], disabled_endpoints: vec!["/standings".to_string()] },
                ),
                (
                    "League".to_string(),
                    CompetitionTypeScope { enabled_endpoints: vec!["/injuries".to_string()], disabled_endpoints: vec![] },
                ),
            ]
            .into_iter()
            .collect(),
            overrides: vec![ScopeOverride { league_id: 99, season: 2024, enabled_endpoints: vec!["/standings".to_string()], disabled_endpoints: vec![] }],
        }
    }

    #[test]
    fn baseline_endpoint_always_in_scope() {
        let d = decide_scope(&policy(), 1, 2024, "/fixtures", None);
        assert!(d.in_scope);
        assert_eq!(d.reason, "baseline_enabled");
    }

    #[test]
    fn override_wins_over_type_denylist() {
        let d = decide_scope(&policy(), 99, 2024, "/standings", Some("Cup"));
        assert!(d.in_scope);
        assert_eq!(d.reason, "override_enabled");
    }

    #[test]
    fn unknown_league_type_fails_open() {
        let d = decide_scope(&policy(), 5, 2024, "/standings", None);
        assert!(d.in_scope);
        assert_eq!(d.reason, "league_type_unknown_fail_open");
    }

    #[test]
    fn type_denylist_blocks_non_baseline_endpoint() {
        let d = decide_scope(&policy(), 5, 2024, "/standings", Some("Cup"));
        assert!(!d.in_scope);
        assert_eq!(d.reason, "type_Cup_disabled");
    }

    #[test]
    fn type_allowlist_present_blocks_endpoints_not_listed() {
        let d = decide_scope(&policy(), 5, 2024, "/top_scorers", Some("League"));
        assert!(!d.in_scope);
        assert_eq!(d.reason, "type_League_not_in_enabled_list");

        let allowed = decide_scope(&policy(), 5, 2024, "/injuries", Some("League"));
        assert!(allowed.in_scope);
    }

    #[test]
    fn default_allow_when_type_has_no_lists() {
        let d = decide_scope(&policy(), 5, 2024, "/teams", Some("Amateur"));
        assert!(d.in_scope);
        assert_eq!(d.reason, "type_Amateur_default_allow");
    }
}
