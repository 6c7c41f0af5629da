//! Timezone transform for the `/timezone` bootstrap endpoint, which returns a
//! flat array of IANA zone name strings rather than objects.

use serde_json::Value;

pub fn transform_timezones(envelope: &Value) -> Vec<String> {
    envelope
        .get("response")
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(Value::as_str).map(str::to_string).collect())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn extracts_flat_string_array() {
        let envelope = json!({"response": ["Europe/London", "America/New_York"]});
        let zones = transform_timezones(&envelope);
        assert_eq!(zones, vec!["Europe/London".to_string(), "America/New_York".to_string()]);
    }
}
