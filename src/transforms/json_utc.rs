//! Recursive visitor that rewrites ISO-ish datetime strings found anywhere in
//! a JSON value to canonical UTC: naive strings get `+00:00` appended, `Z`
//! suffixes and explicit offsets are converted to `+00:00`. Non-datetime
//! strings pass through untouched.

use chrono::{DateTime, FixedOffset};
use serde_json::Value;

/// Matches values that look like `YYYY-MM-DDTHH:MM:SS` with an optional
/// fractional second and an optional `Z`/offset suffix.
fn looks_like_datetime(s: &str) -> bool {
    let bytes = s.as_bytes();
    if bytes.len() < 19 {
        return false;
    }
    bytes[4] == b'-' && bytes[7] == b'-' && (bytes[10] == b'T' || bytes[10] == b' ') && bytes[13] == b':' && bytes[16] == b':'
}

fn normalize_datetime_string(s: &str) -> String {
    if !looks_like_datetime(s) {
        return s.to_string();
    }

    // Already has an explicit offset or Z: reparse and re-render canonically.
    if s.ends_with('Z') || s[19.min(s.len())..].contains('+') || s[19.min(s.len())..].contains('-') {
        let normalized_z = if s.ends_with('Z') { s.replacen('Z', "+00:00", 1) } else { s.to_string() };
        if let Ok(dt) = DateTime::<FixedOffset>::parse_from_rfc3339(&normalized_z) {
            return dt.with_timezone(&chrono::Utc).to_rfc3339_opts(chrono::SecondsFormat::Secs, true).replace('Z', "+00:00");
        }
        return normalized_z;
    }

    // Naive: treat as UTC.
    format!("{s}+00:00")
}

pub fn normalize_value(value: &Value) -> Value {
    match value {
        Value::String(s) => Value::String(normalize_datetime_string(s)),
        Value::Array(items) => Value::Array(items.iter().map(normalize_value).collect()),
        Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (k, v) in map {
                out.insert(k.clone(), normalize_value(v));
            }
            Value::Object(out)
        }
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn appends_offset_to_naive_datetime() {
        let v = json!("2024-05-01T12:00:00");
        assert_eq!(normalize_value(&v), json!("2024-05-01T12:00:00+00:00"));
    }

    #[test]
    fn converts_z_suffix_to_explicit_offset() {
        let v = json!("2024-05-01T12:00:00Z");
        assert_eq!(normalize_value(&v), json!("2024-05-01T12:00:00+00:00"));
    }

    #[test]
    fn converts_non_utc_offset_to_utc() {
        let v = json!("2024-05-01T12:00:00+02:00");
        assert_eq!(normalize_value(&v), json!("2024-05-01T10:00:00+00:00"));
    }

    #[test]
    fn leaves_non_datetime_strings_untouched() {
        let v = json!("Manchester United");
        assert_eq!(normalize_value(&v), v);
    }

    #[test]
    fn recurses_into_nested_structures() {
        let v = json!({"fixture": {"date": "2024-05-01T12:00:00Z"}, "events": ["not a date"]});
        let out = normalize_value(&v);
        assert_eq!(out["fixture"]["date"], json!("2024-05-01T12:00:00+00:00"));
        assert_eq!(out["events"][0], json!("not a date"));
    }
}
