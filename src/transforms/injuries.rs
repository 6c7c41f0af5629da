//! Injuries transform. The upstream has no stable injury id, so `injury_key`
//! hashes (fixture, player, team, type, reason) to give each report a
//! deterministic identity for upserting.

use serde_json::Value;

use super::content_hash;

#[derive(Debug, Clone, PartialEq)]
pub struct InjuryRow {
    pub injury_key: String,
    pub fixture_id: Option<i64>,
    pub player_id: Option<i64>,
    pub team_id: Option<i64>,
    pub injury_type: Option<String>,
    pub reason: Option<String>,
}

pub fn transform_injuries(envelope: &Value) -> Vec<InjuryRow> {
    let mut out = Vec::new();
    let Some(items) = envelope.get("response").and_then(Value::as_array) else {
        return out;
    };

    for item in items {
        let fixture_id = item["fixture"]["id"].as_i64();
        let player_id = item["player"]["id"].as_i64();
        let team_id = item["team"]["id"].as_i64();
        let injury_type = item["player"]["type"].as_str().map(str::to_string);
        let reason = item["player"]["reason"].as_str().map(str::to_string);

        let injury_key = content_hash(&[
            fixture_id.map(|v| v.to_string()).as_deref(),
            player_id.map(|v| v.to_string()).as_deref(),
            team_id.map(|v| v.to_string()).as_deref(),
            injury_type.as_deref(),
            reason.as_deref(),
        ]);

        out.push(InjuryRow { injury_key, fixture_id, player_id, team_id, injury_type, reason });
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn injury_key_is_stable_for_identical_reports() {
        let envelope = json!({"response": [
            {"fixture": {"id": 1}, "player": {"id": 10, "type": "Missing Fixture", "reason": "Hamstring"}, "team": {"id": 5}},
        ]});
        let a = transform_injuries(&envelope);
        let b = transform_injuries(&envelope);
        assert_eq!(a[0].injury_key, b[0].injury_key);
    }

    #[test]
    fn different_reasons_produce_different_keys() {
        let envelope = json!({"response": [
            {"fixture": {"id": 1}, "player": {"id": 10, "type": "Missing Fixture", "reason": "Hamstring"}, "team": {"id": 5}},
            {"fixture": {"id": 1}, "player": {"id": 10, "type": "Missing Fixture", "reason": "Knee"}, "team": {"id": 5}},
        ]});
        let rows = transform_injuries(&envelope);
        assert_ne!(rows[0].injury_key, rows[1].injury_key);
    }
}
