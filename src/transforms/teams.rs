//! Team transform. Used both for the dedicated `/teams` bootstrap endpoint
//! and for teams incidentally discovered inside `/fixtures` responses, so the
//! caller is expected to dedup by id across calls (rows here are not
//! deduplicated against each other beyond what a single envelope contains).

use serde_json::Value;

#[derive(Debug, Clone, PartialEq)]
pub struct TeamRow {
    pub team_id: i64,
    pub name: String,
    pub code: Option<String>,
    pub country: Option<String>,
    pub founded: Option<i64>,
    pub national: bool,
    pub logo_url: Option<String>,
    pub venue_id: Option<i64>,
}

pub fn transform_teams(envelope: &Value) -> Vec<TeamRow> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    let Some(items) = envelope.get("response").and_then(Value::as_array) else {
        return out;
    };

    for item in items {
        let team = &item["team"];
        let Some(team_id) = team["id"].as_i64() else { continue };
        if !seen.insert(team_id) {
            continue;
        }
        out.push(TeamRow {
            team_id,
            name: team["name"].as_str().unwrap_or_default().to_string(),
            code: team["code"].as_str().map(str::to_string),
            country: team["country"].as_str().map(str::to_string),
            founded: team["founded"].as_i64(),
            national: team["national"].as_bool().unwrap_or(false),
            logo_url: team["logo"].as_str().map(str::to_string),
            venue_id: match item["venue"]["id"].as_i64() {
                Some(0) | None => None,
                Some(id) => Some(id),
            },
        });
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn dedups_repeated_team_ids_within_one_envelope() {
        let envelope = json!({"response": [
            {"team": {"id": 1, "name": "A"}, "venue": {"id": 100}},
            {"team": {"id": 1, "name": "A"}, "venue": {"id": 100}},
            {"team": {"id": 2, "name": "B"}, "venue": {"id": 0}},
        ]});
        let rows = transform_teams(&envelope);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].venue_id, None);
    }
}
