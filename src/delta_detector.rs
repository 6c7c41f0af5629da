//! Redis-backed delta detector (C7): a short-TTL cache of last-seen live
//! fixture compare-state, used to avoid rewriting fixtures whose live state
//! hasn't changed since the previous poll. Fails open: any Redis error is
//! treated the same as "never seen before".

use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use serde_json::Value;

const DEFAULT_TTL_SECONDS: u64 = 7200;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CompareState {
    pub status: String,
    pub goals_home: Option<i64>,
    pub goals_away: Option<i64>,
    pub elapsed: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FieldDiff {
    pub old: Value,
    pub new: Value,
}

pub struct DeltaDetector {
    client: redis::Client,
    ttl_seconds: u64,
}

fn cache_key(fixture_id: i64) -> String {
    format!("fixture:{fixture_id}")
}

/// Distinguishes a fixture never seen before from a cache the detector
/// couldn't reach, so callers that care (`get_diff`) can surface the
/// difference instead of treating both as "no prior state".
enum CacheLookup {
    FirstSeen,
    Found(CompareState),
    Unavailable,
}

impl DeltaDetector {
    pub fn new(redis_url: &str) -> redis::RedisResult<Self> {
        Ok(Self { client: redis::Client::open(redis_url)?, ttl_seconds: DEFAULT_TTL_SECONDS })
    }

    pub fn with_ttl(redis_url: &str, ttl_seconds: u64) -> redis::RedisResult<Self> {
        Ok(Self { client: redis::Client::open(redis_url)?, ttl_seconds })
    }

    /// EXISTS before GET so a first-seen key and an unreachable store never
    /// collapse into the same outcome.
    async fn fetch_cached(&self, fixture_id: i64) -> CacheLookup {
        let Ok(mut conn) = self.client.get_multiplexed_async_connection().await else {
            return CacheLookup::Unavailable;
        };
        let Ok(exists) = conn.exists::<_, bool>(cache_key(fixture_id)).await else {
            return CacheLookup::Unavailable;
        };
        if !exists {
            return CacheLookup::FirstSeen;
        }
        match conn.get::<_, Option<String>>(cache_key(fixture_id)).await {
            Ok(Some(raw)) => match serde_json::from_str(&raw) {
                Ok(state) => CacheLookup::Found(state),
                Err(_) => CacheLookup::Unavailable,
            },
            Ok(None) => CacheLookup::FirstSeen,
            Err(_) => CacheLookup::Unavailable,
        }
    }

    /// Fail-open: unreachable cache or a first-seen key both count as changed.
    pub async fn has_changed(&self, fixture_id: i64, state: &CompareState) -> bool {
        match self.fetch_cached(fixture_id).await {
            CacheLookup::Found(cached) => &cached != state,
            CacheLookup::FirstSeen | CacheLookup::Unavailable => true,
        }
    }

    /// Field-by-field diff. Every field is reported when the fixture is
    /// first-seen (old=null); only differing fields are reported when cached
    /// state exists. When the store itself errored, returns a single
    /// `_cache` marker rather than guessing at field-level differences.
    pub async fn get_diff(&self, fixture_id: i64, state: &CompareState) -> std::collections::HashMap<String, FieldDiff> {
        let mut diff = std::collections::HashMap::new();

        let cached = match self.fetch_cached(fixture_id).await {
            CacheLookup::Unavailable => {
                diff.insert("_cache".to_string(), FieldDiff { old: Value::Null, new: Value::String("unavailable".to_string()) });
                None
            }
            CacheLookup::FirstSeen => None,
            CacheLookup::Found(c) => Some(c),
        };

        macro_rules! compare {
            ($field:ident, $to_value:expr) => {
                let new_v = $to_value(&state.$field);
                match &cached {
                    None => {
                        diff.insert(stringify!($field).to_string(), FieldDiff { old: Value::Null, new: new_v });
                    }
                    Some(c) if c.$field != state.$field => {
                        diff.insert(
                            stringify!($field).to_string(),
                            FieldDiff { old: $to_value(&c.$field), new: new_v },
                        );
                    }
                    Some(_) => {}
                }
            };
        }

        compare!(status, |v: &String| Value::String(v.clone()));
        compare!(goals_home, |v: &Option<i64>| v.map(Value::from).unwrap_or(Value::Null));
        compare!(goals_away, |v: &Option<i64>| v.map(Value::from).unwrap_or(Value::Null));
        compare!(elapsed, |v: &Option<i64>| v.map(Value::from).unwrap_or(Value::Null));

        diff
    }

    /// Best-effort; failures are logged by the caller and never fatal.
    pub async fn update_cache(&self, fixture_id: i64, state: &CompareState) -> redis::RedisResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let payload = serde_json::to_string(state).unwrap_or_default();
        let _: () = conn.set_ex(cache_key(fixture_id), payload, self.ttl_seconds).await?;
        Ok(())
    }

    pub async fn clear_cache(&self, fixture_id: i64) {
        if let Ok(mut conn) = self.client.get_multiplexed_async_connection().await {
            let _: redis::RedisResult<()> = conn.del(cache_key(fixture_id)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(status: &str, home: i64, away: i64, elapsed: i64) -> CompareState {
        CompareState {
            status: status.to_string(),
            goals_home: Some(home),
            goals_away: Some(away),
            elapsed: Some(elapsed),
        }
    }

    #[test]
    fn equal_states_are_not_changed_by_value_comparison() {
        let a = state("1H", 0, 0, 10);
        let b = state("1H", 0, 0, 10);
        assert_eq!(a, b);
    }

    #[test]
    fn score_change_is_detected_by_value_comparison() {
        let a = state("1H", 0, 0, 10);
        let b = state("1H", 1, 0, 10);
        assert_ne!(a, b);
    }

    #[test]
    fn cache_key_format_is_fixture_colon_id() {
        assert_eq!(cache_key(1234567), "fixture:1234567");
    }
}
