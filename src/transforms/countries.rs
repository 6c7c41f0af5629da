//! Country transform for the `/countries` bootstrap endpoint. Rows with no
//! ISO code (the upstream's "World"/confederation pseudo-countries) are
//! dropped since `core.countries.code` is the primary key.

use serde_json::Value;

#[derive(Debug, Clone, PartialEq)]
pub struct CountryRow {
    pub code: String,
    pub name: String,
    pub flag_url: Option<String>,
}

pub fn transform_countries(envelope: &Value) -> Vec<CountryRow> {
    let mut out = Vec::new();
    let Some(items) = envelope.get("response").and_then(Value::as_array) else {
        return out;
    };

    for item in items {
        let Some(code) = item["code"].as_str().filter(|s| !s.is_empty()) else {
            continue;
        };
        out.push(CountryRow {
            code: code.to_string(),
            name: item["name"].as_str().unwrap_or_default().to_string(),
            flag_url: item["flag"].as_str().map(str::to_string),
        });
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn drops_rows_with_no_iso_code() {
        let envelope = json!({"response": [
            {"name": "World", "code": null, "flag": null},
            {"name": "England", "code": "GB", "flag": "gb.svg"},
        ]});
        let rows = transform_countries(&envelope);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].code, "GB");
    }
}
