//! Top scorers transform for the leaderboard job. The upstream response is
//! already sorted by goals descending but carries no rank field, so rank is
//! assigned from the item's position in the array.

use serde_json::Value;

#[derive(Debug, Clone, PartialEq)]
pub struct TopScorerRow {
    pub league_id: i64,
    pub season: i64,
    pub rank: i64,
    pub player_id: i64,
    pub team_id: Option<i64>,
    pub goals: Option<i64>,
    pub assists: Option<i64>,
}

pub fn transform_top_scorers(league_id: i64, season: i64, envelope: &Value) -> Vec<TopScorerRow> {
    let mut out = Vec::new();
    let Some(items) = envelope.get("response").and_then(Value::as_array) else {
        return out;
    };

    for (ordinal, item) in items.iter().enumerate() {
        let Some(player_id) = item["player"]["id"].as_i64() else { continue };
        let statistics = item["statistics"].as_array().and_then(|s| s.first());
        out.push(TopScorerRow {
            league_id,
            season,
            rank: (ordinal + 1) as i64,
            player_id,
            team_id: statistics.and_then(|s| s["team"]["id"].as_i64()),
            goals: statistics.and_then(|s| s["goals"]["total"].as_i64()),
            assists: statistics.and_then(|s| s["goals"]["assists"].as_i64()),
        });
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn rank_follows_array_position_not_a_payload_field() {
        let envelope = json!({"response": [
            {"player": {"id": 1}, "statistics": [{"team": {"id": 10}, "goals": {"total": 20, "assists": 3}}]},
            {"player": {"id": 2}, "statistics": [{"team": {"id": 11}, "goals": {"total": 18, "assists": 5}}]},
        ]});
        let rows = transform_top_scorers(39, 2024, &envelope);
        assert_eq!(rows[0].rank, 1);
        assert_eq!(rows[1].rank, 2);
        assert_eq!(rows[1].goals, Some(18));
    }
}
