//! Standings transform: walks the deeply nested `/standings` envelope down to
//! one row per team.

use serde_json::Value;

#[derive(Debug, Clone, PartialEq)]
pub struct StandingRow {
    pub team_id: i64,
    pub rank: i64,
    pub points: i64,
    pub goals_diff: i64,
    pub group_name: Option<String>,
    pub form: Option<String>,
    pub status: Option<String>,
    pub description: Option<String>,
    pub played: i64,
    pub win: i64,
    pub draw: i64,
    pub lose: i64,
    pub goals_for: i64,
    pub goals_against: i64,
}

/// The upstream shape is `response[0].league.standings[][]`: an outer array
/// per group/phase (e.g. one per conference) and an inner array per team.
/// Groups are flattened; `group_name` is carried over from `league.standings`
/// only if the upstream tags the nested array (most competitions leave it
/// null, which is faithfully preserved rather than synthesized).
pub fn transform_standings(envelope: &Value) -> Vec<StandingRow> {
    let mut out = Vec::new();
    let Some(groups) = envelope["response"][0]["league"]["standings"].as_array() else {
        return out;
    };

    for group in groups {
        let Some(entries) = group.as_array() else { continue };
        for entry in entries {
            let Some(team_id) = entry["team"]["id"].as_i64() else { continue };
            let all = &entry["all"];
            let goals = &all["goals"];

            out.push(StandingRow {
                team_id,
                rank: entry["rank"].as_i64().unwrap_or_default(),
                points: entry["points"].as_i64().unwrap_or_default(),
                goals_diff: entry["goalsDiff"].as_i64().unwrap_or_default(),
                group_name: entry["group"].as_str().map(str::to_string),
                form: entry["form"].as_str().map(str::to_string),
                status: entry["status"].as_str().map(str::to_string),
                description: entry["description"].as_str().map(str::to_string),
                played: all["played"].as_i64().unwrap_or_default(),
                win: all["win"].as_i64().unwrap_or_default(),
                draw: all["draw"].as_i64().unwrap_or_default(),
                lose: all["lose"].as_i64().unwrap_or_default(),
                goals_for: goals["for"].as_i64().unwrap_or_default(),
                goals_against: goals["against"].as_i64().unwrap_or_default(),
            });
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn flattens_grouped_standings_into_one_row_per_team() {
        let envelope = json!({"response": [{"league": {"standings": [
            [
                {"rank": 1, "team": {"id": 1}, "points": 10, "goalsDiff": 5, "group": "Group A", "form": "WWDLW",
                 "all": {"played": 6, "win": 3, "draw": 1, "lose": 0, "goals": {"for": 8, "against": 3}}},
            ],
            [
                {"rank": 1, "team": {"id": 2}, "points": 9, "goalsDiff": 3, "group": "Group B", "form": "WDWDW",
                 "all": {"played": 6, "win": 2, "draw": 3, "lose": 1, "goals": {"for": 7, "against": 4}}},
            ],
        ]}}]});

        let rows = transform_standings(&envelope);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].team_id, 1);
        assert_eq!(rows[0].group_name.as_deref(), Some("Group A"));
        assert_eq!(rows[1].team_id, 2);
    }

    #[test]
    fn missing_standings_array_yields_empty_rows() {
        let envelope = json!({"response": []});
        assert!(transform_standings(&envelope).is_empty());
    }
}
