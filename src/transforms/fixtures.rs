//! Fixtures, fixture_details, fixture_events, fixture_players, fixture_statistics,
//! and fixture_lineups transforms.

use chrono::{DateTime, Utc};
use serde_json::Value;

use super::{content_hash, json_utc};

#[derive(Debug, Clone, PartialEq)]
pub struct FixtureRow {
    pub fixture_id: i64,
    pub league_id: i64,
    pub season: i64,
    pub home_team_id: i64,
    pub away_team_id: i64,
    pub venue_id: Option<i64>,
    pub status_short: String,
    pub status_long: String,
    pub elapsed: Option<i64>,
    pub goals_home: Option<i64>,
    pub goals_away: Option<i64>,
    pub score: Value,
    pub kickoff_utc: Option<DateTime<Utc>>,
    pub needs_score_verification: bool,
}

#[derive(Debug, Clone)]
pub struct FixtureDetailsRow {
    pub fixture_id: i64,
    pub events: Option<Value>,
    pub lineups: Option<Value>,
    pub statistics: Option<Value>,
    pub players: Option<Value>,
}

/// `0` is the upstream's "unknown venue" sentinel; it must never reach
/// `core.fixtures.venue_id`, which enforces a real FK.
fn coerce_venue_id(v: Option<i64>) -> Option<i64> {
    match v {
        Some(0) | None => None,
        Some(id) => Some(id),
    }
}

pub fn transform_fixtures(envelope: &Value) -> Vec<FixtureRow> {
    let mut out = Vec::new();
    let Some(items) = envelope.get("response").and_then(Value::as_array) else {
        return out;
    };

    for item in items {
        let normalized = json_utc::normalize_value(item);
        let fixture = &normalized["fixture"];
        let Some(fixture_id) = fixture.get("id").and_then(Value::as_i64) else {
            continue;
        };
        let league = &normalized["league"];
        let teams = &normalized["teams"];
        let goals = &normalized["goals"];
        let status = &fixture["status"];

        out.push(FixtureRow {
            fixture_id,
            league_id: league.get("id").and_then(Value::as_i64).unwrap_or_default(),
            season: league.get("season").and_then(Value::as_i64).unwrap_or_default(),
            home_team_id: teams["home"]["id"].as_i64().unwrap_or_default(),
            away_team_id: teams["away"]["id"].as_i64().unwrap_or_default(),
            venue_id: coerce_venue_id(fixture["venue"]["id"].as_i64()),
            status_short: status["short"].as_str().unwrap_or_default().to_string(),
            status_long: status["long"].as_str().unwrap_or_default().to_string(),
            elapsed: status.get("elapsed").and_then(Value::as_i64),
            goals_home: goals.get("home").and_then(Value::as_i64),
            goals_away: goals.get("away").and_then(Value::as_i64),
            score: normalized["score"].clone(),
            kickoff_utc: fixture.get("date").and_then(Value::as_str).and_then(|s| {
                DateTime::parse_from_rfc3339(s).ok().map(|d| d.with_timezone(&Utc))
            }),
            needs_score_verification: false,
        });
    }

    out
}

/// A `fixture_details` row is only produced when at least one of the four
/// per-fixture sub-resources is present in the envelope (this transform is
/// reused for `/fixtures/events`, `/fixtures/lineups`, `/fixtures/statistics`,
/// and `/fixtures/players`, which each populate one field at a time).
pub fn transform_fixture_details(fixture_id: i64, events: Option<&Value>, lineups: Option<&Value>, statistics: Option<&Value>, players: Option<&Value>) -> Option<FixtureDetailsRow> {
    if events.is_none() && lineups.is_none() && statistics.is_none() && players.is_none() {
        return None;
    }
    Some(FixtureDetailsRow {
        fixture_id,
        events: events.map(json_utc::normalize_value),
        lineups: lineups.map(json_utc::normalize_value),
        statistics: statistics.map(json_utc::normalize_value),
        players: players.map(json_utc::normalize_value),
    })
}

#[derive(Debug, Clone, PartialEq)]
pub struct FixtureEventRow {
    pub fixture_id: i64,
    pub event_key: String,
    pub elapsed: Option<i64>,
    pub extra: Option<i64>,
    pub team_id: Option<i64>,
    pub player_id: Option<i64>,
    pub assist_id: Option<i64>,
    pub event_type: Option<String>,
    pub detail: Option<String>,
    pub comments: Option<String>,
}

/// `event_key` hashes (fixture, elapsed, extra, team, player, assist, type,
/// detail, comments, ordinal). The ordinal — the item's position in the
/// `/fixtures/events` response array — guarantees uniqueness even when every
/// other field collides (e.g. two unrelated "Yellow Card" events in the same
/// minute with no named player).
pub fn transform_fixture_events(fixture_id: i64, envelope: &Value) -> Vec<FixtureEventRow> {
    let mut out = Vec::new();
    let Some(items) = envelope.get("response").and_then(Value::as_array) else {
        return out;
    };

    for (ordinal, item) in items.iter().enumerate() {
        let elapsed = item["time"]["elapsed"].as_i64();
        let extra = item["time"]["extra"].as_i64();
        let team_id = item["team"]["id"].as_i64();
        let player_id = item["player"]["id"].as_i64();
        let assist_id = item["assist"]["id"].as_i64();
        let event_type = item["type"].as_str().map(str::to_string);
        let detail = item["detail"].as_str().map(str::to_string);
        let comments = item["comments"].as_str().map(str::to_string);
        let ordinal_str = ordinal.to_string();

        let event_key = content_hash(&[
            Some(fixture_id.to_string().as_str()),
            elapsed.map(|v| v.to_string()).as_deref(),
            extra.map(|v| v.to_string()).as_deref(),
            team_id.map(|v| v.to_string()).as_deref(),
            player_id.map(|v| v.to_string()).as_deref(),
            assist_id.map(|v| v.to_string()).as_deref(),
            event_type.as_deref(),
            detail.as_deref(),
            comments.as_deref(),
            Some(&ordinal_str),
        ]);

        out.push(FixtureEventRow {
            fixture_id,
            event_key,
            elapsed,
            extra,
            team_id,
            player_id,
            assist_id,
            event_type,
            detail,
            comments,
        });
    }

    out
}

#[derive(Debug, Clone, PartialEq)]
pub struct FixturePlayerRow {
    pub fixture_id: i64,
    pub team_id: i64,
    pub player_id: i64,
    pub player_name: Option<String>,
}

/// When a player id is missing or zero, allocates a deterministic negative
/// synthetic id from (fixture, team, name, ordinal) so repeated transforms of
/// the same envelope produce identical ids and the bulk UPSERT never
/// self-conflicts within one batch.
pub fn transform_fixture_players(fixture_id: i64, envelope: &Value) -> Vec<FixturePlayerRow> {
    let mut out = Vec::new();
    let Some(teams) = envelope.get("response").and_then(Value::as_array) else {
        return out;
    };

    for team_entry in teams {
        let team_id = team_entry["team"]["id"].as_i64().unwrap_or_default();
        let Some(players) = team_entry.get("players").and_then(Value::as_array) else {
            continue;
        };
        for (ordinal, player_entry) in players.iter().enumerate() {
            let player_name = player_entry["player"]["name"].as_str().map(str::to_string);
            let raw_id = player_entry["player"]["id"].as_i64();
            let player_id = match raw_id {
                Some(id) if id != 0 => id,
                _ => synthetic_player_id(fixture_id, team_id, player_name.as_deref(), ordinal),
            };
            out.push(FixturePlayerRow { fixture_id, team_id, player_id, player_name });
        }
    }

    out
}

#[derive(Debug, Clone, PartialEq)]
pub struct FixtureStatisticsRow {
    pub fixture_id: i64,
    pub team_id: i64,
    pub statistics: Value,
}

/// `/fixtures/statistics?fixture=<id>` -> one row per team, `statistics`
/// keeping the upstream per-team stat-type/value array as-is.
pub fn transform_fixture_statistics(fixture_id: i64, envelope: &Value) -> Vec<FixtureStatisticsRow> {
    let mut out = Vec::new();
    let Some(items) = envelope.get("response").and_then(Value::as_array) else {
        return out;
    };

    for item in items {
        let Some(team_id) = item["team"]["id"].as_i64() else {
            continue;
        };
        out.push(FixtureStatisticsRow {
            fixture_id,
            team_id,
            statistics: item.get("statistics").cloned().unwrap_or(Value::Null),
        });
    }

    out
}

#[derive(Debug, Clone, PartialEq)]
pub struct FixtureLineupRow {
    pub fixture_id: i64,
    pub team_id: i64,
    pub formation: Option<String>,
    pub start_xi: Value,
    pub substitutes: Value,
    pub coach: Value,
    pub colors: Value,
}

/// `/fixtures/lineups?fixture=<id>` -> one row per team.
pub fn transform_fixture_lineups(fixture_id: i64, envelope: &Value) -> Vec<FixtureLineupRow> {
    let mut out = Vec::new();
    let Some(items) = envelope.get("response").and_then(Value::as_array) else {
        return out;
    };

    for item in items {
        let Some(team_id) = item["team"]["id"].as_i64() else {
            continue;
        };
        out.push(FixtureLineupRow {
            fixture_id,
            team_id,
            formation: item["formation"].as_str().map(str::to_string),
            start_xi: item.get("startXI").cloned().unwrap_or(Value::Null),
            substitutes: item.get("substitutes").cloned().unwrap_or(Value::Null),
            coach: item.get("coach").cloned().unwrap_or(Value::Null),
            colors: item.get("colors").cloned().unwrap_or(Value::Null),
        });
    }

    out
}

fn synthetic_player_id(fixture_id: i64, team_id: i64, name: Option<&str>, ordinal: usize) -> i64 {
    let key = content_hash(&[
        Some(fixture_id.to_string().as_str()),
        Some(team_id.to_string().as_str()),
        name,
        Some(ordinal.to_string().as_str()),
    ]);
    // Fold the first 15 hex chars of the hash into a negative i64 so synthetic
    // ids can never collide with a real (positive) upstream player id.
    let folded = i64::from_str_radix(&key[..15], 16).unwrap_or(ordinal as i64);
    -(folded.abs() + 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn venue_id_zero_is_coerced_to_null() {
        assert_eq!(coerce_venue_id(Some(0)), None);
        assert_eq!(coerce_venue_id(Some(42)), Some(42));
        assert_eq!(coerce_venue_id(None), None);
    }

    #[test]
    fn transform_fixtures_extracts_core_fields() {
        let envelope = json!({
            "response": [{
                "fixture": {"id": 1, "date": "2024-05-01T12:00:00Z", "venue": {"id": 0}, "status": {"short": "FT", "long": "Match Finished", "elapsed": 90}},
                "league": {"id": 39, "season": 2024},
                "teams": {"home": {"id": 10}, "away": {"id": 20}},
                "goals": {"home": 2, "away": 1},
                "score": {"fulltime": {"home": 2, "away": 1}}
            }]
        });
        let rows = transform_fixtures(&envelope);
        assert_eq!(rows.len(), 1);
        let row = &rows[0];
        assert_eq!(row.fixture_id, 1);
        assert_eq!(row.venue_id, None);
        assert_eq!(row.goals_home, Some(2));
        assert_eq!(row.status_short, "FT");
    }

    #[test]
    fn event_key_is_unique_per_ordinal_when_fields_collide() {
        let envelope = json!({"response": [
            {"time": {"elapsed": 10}, "team": {"id": 1}, "type": "Card", "detail": "Yellow Card"},
            {"time": {"elapsed": 10}, "team": {"id": 1}, "type": "Card", "detail": "Yellow Card"},
        ]});
        let rows = transform_fixture_events(1234567, &envelope);
        assert_eq!(rows.len(), 2);
        assert_ne!(rows[0].event_key, rows[1].event_key);
    }

    #[test]
    fn fixture_players_with_missing_id_get_stable_synthetic_ids() {
        let envelope = json!({"response": [
            {"team": {"id": 10}, "players": [
                {"player": {"id": 0, "name": "Unknown Player"}},
            ]}
        ]});
        let first = transform_fixture_players(1, &envelope);
        let second = transform_fixture_players(1, &envelope);
        assert_eq!(first[0].player_id, second[0].player_id);
        assert!(first[0].player_id < 0);
    }

    #[test]
    fn fixture_statistics_one_row_per_team() {
        let envelope = json!({"response": [
            {"team": {"id": 10}, "statistics": [{"type": "Shots on Goal", "value": 5}]},
            {"team": {"id": 20}, "statistics": [{"type": "Shots on Goal", "value": 3}]},
        ]});
        let rows = transform_fixture_statistics(1, &envelope);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].team_id, 10);
        assert_eq!(rows[1].team_id, 20);
    }

    #[test]
    fn fixture_lineups_captures_formation_and_sides() {
        let envelope = json!({"response": [
            {"team": {"id": 10}, "formation": "4-3-3", "startXI": [{"player": {"id": 1}}], "substitutes": [], "coach": {"id": 5}, "colors": {}},
        ]});
        let rows = transform_fixture_lineups(1, &envelope);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].formation.as_deref(), Some("4-3-3"));
        assert_eq!(rows[0].team_id, 10);
    }

    #[test]
    fn fixture_players_no_duplicates_for_same_triple() {
        let envelope = json!({"response": [
            {"team": {"id": 10}, "players": [
                {"player": {"id": 55, "name": "Real Player"}},
            ]}
        ]});
        let rows = transform_fixture_players(1, &envelope);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].player_id, 55);
    }
}
