//! League (and nested season) transform for the `/leagues` bootstrap
//! endpoint.

use serde_json::Value;

#[derive(Debug, Clone, PartialEq)]
pub struct LeagueRow {
    pub league_id: i64,
    pub name: String,
    pub country_name: Option<String>,
    pub country_code: Option<String>,
    pub country_flag_url: Option<String>,
    pub league_type: Option<String>,
    pub logo_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LeagueSeasonRow {
    pub league_id: i64,
    pub season: i64,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub is_current: bool,
}

pub fn transform_leagues(envelope: &Value) -> Vec<LeagueRow> {
    let mut out = Vec::new();
    let Some(items) = envelope.get("response").and_then(Value::as_array) else {
        return out;
    };

    for item in items {
        let league = &item["league"];
        let Some(league_id) = league["id"].as_i64() else { continue };
        out.push(LeagueRow {
            league_id,
            name: league["name"].as_str().unwrap_or_default().to_string(),
            country_name: item["country"]["name"].as_str().map(str::to_string),
            country_code: item["country"]["code"].as_str().map(str::to_string),
            country_flag_url: item["country"]["flag"].as_str().map(str::to_string),
            league_type: league["type"].as_str().map(str::to_string),
            logo_url: league["logo"].as_str().map(str::to_string),
        });
    }

    out
}

pub fn transform_league_seasons(envelope: &Value) -> Vec<LeagueSeasonRow> {
    let mut out = Vec::new();
    let Some(items) = envelope.get("response").and_then(Value::as_array) else {
        return out;
    };

    for item in items {
        let Some(league_id) = item["league"]["id"].as_i64() else { continue };
        let Some(seasons) = item["seasons"].as_array() else { continue };
        for season in seasons {
            let Some(year) = season["year"].as_i64() else { continue };
            out.push(LeagueSeasonRow {
                league_id,
                season: year,
                start_date: season["start"].as_str().map(str::to_string),
                end_date: season["end"].as_str().map(str::to_string),
                is_current: season["current"].as_bool().unwrap_or(false),
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
    fn extracts_league_with_country_code() {
        let envelope = json!({"response": [{
            "league": {"id": 39, "name": "Premier League", "type": "League", "logo": "x.png"},
            "country": {"code": "GB"},
            "seasons": [{"year": 2024, "start": "2024-08-01", "end": "2025-05-31", "current": true}]
        }]});
        let leagues = transform_leagues(&envelope);
        assert_eq!(leagues.len(), 1);
        assert_eq!(leagues[0].country_code.as_deref(), Some("GB"));

        let seasons = transform_league_seasons(&envelope);
        assert_eq!(seasons.len(), 1);
        assert!(seasons[0].is_current);
    }
}
