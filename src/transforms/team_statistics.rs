//! Team statistics transform. Unlike the other endpoints, `/teams/statistics`
//! has no natural row boundary to decompose — the entire `response` object is
//! stored as one JSON blob per (team, league, season), with `form` pulled out
//! verbatim as its own column since jobs query it directly.

use serde_json::Value;

#[derive(Debug, Clone)]
pub struct TeamStatisticsRow {
    pub team_id: i64,
    pub league_id: i64,
    pub season: i64,
    pub form: Option<String>,
    pub statistics: Value,
}

pub fn transform_team_statistics(team_id: i64, league_id: i64, season: i64, envelope: &Value) -> Option<TeamStatisticsRow> {
    let response = envelope.get("response")?;
    if response.is_null() {
        return None;
    }
    Some(TeamStatisticsRow {
        team_id,
        league_id,
        season,
        form: response["form"].as_str().map(str::to_string),
        statistics: response.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn carries_entire_response_blob_and_extracts_form() {
        let envelope = json!({"response": {"form": "WWDLW", "fixtures": {"played": {"total": 10}}}});
        let row = transform_team_statistics(1, 39, 2024, &envelope).unwrap();
        assert_eq!(row.form.as_deref(), Some("WWDLW"));
        assert_eq!(row.statistics["fixtures"]["played"]["total"], json!(10));
    }

    #[test]
    fn null_response_yields_no_row() {
        let envelope = json!({"response": null});
        assert!(transform_team_statistics(1, 39, 2024, &envelope).is_none());
    }
}
