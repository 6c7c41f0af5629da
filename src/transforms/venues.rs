//! Venue transform, extracted from both `/venues` and embedded `/teams`
//! venue sub-objects.

use serde_json::Value;

#[derive(Debug, Clone, PartialEq)]
pub struct VenueRow {
    pub venue_id: i64,
    pub name: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub country: Option<String>,
    pub capacity: Option<i64>,
    pub surface: Option<String>,
    pub image_url: Option<String>,
}

pub fn transform_venues(envelope: &Value) -> Vec<VenueRow> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    let Some(items) = envelope.get("response").and_then(Value::as_array) else {
        return out;
    };

    for item in items {
        if let Some(row) = venue_row_from_value(item) {
            if seen.insert(row.venue_id) {
                out.push(row);
            }
        }
    }

    out
}

/// Pulls a venue row out of a `/teams`-shaped item's nested `venue` object,
/// returning `None` for the `id: 0` sentinel that marks "no venue on file".
pub fn venue_row_from_team_item(item: &Value) -> Option<VenueRow> {
    venue_row_from_value(&item["venue"])
}

fn venue_row_from_value(value: &Value) -> Option<VenueRow> {
    let venue_id = value["id"].as_i64()?;
    if venue_id == 0 {
        return None;
    }
    Some(VenueRow {
        venue_id,
        name: value["name"].as_str().map(str::to_string),
        address: value["address"].as_str().map(str::to_string),
        city: value["city"].as_str().map(str::to_string),
        country: value["country"].as_str().map(str::to_string),
        capacity: value["capacity"].as_i64(),
        surface: value["surface"].as_str().map(str::to_string),
        image_url: value["image"].as_str().map(str::to_string),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn venue_id_zero_is_excluded() {
        let item = json!({"venue": {"id": 0, "name": "Unknown"}});
        assert!(venue_row_from_team_item(&item).is_none());
    }

    #[test]
    fn dedups_repeated_venues() {
        let envelope = json!({"response": [
            {"id": 555, "name": "Old Trafford", "city": "Manchester", "country": "England", "capacity": 74310, "surface": "grass"},
            {"id": 555, "name": "Old Trafford", "city": "Manchester", "country": "England", "capacity": 74310, "surface": "grass"},
        ]});
        let rows = transform_venues(&envelope);
        assert_eq!(rows.len(), 1);
    }
}
