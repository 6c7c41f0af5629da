//! Transformers (C5): pure, side-effect-free functions from a raw envelope to
//! normalized row sets. Nothing in this module touches the network or the
//! database — every function here is a plain `Value -> Vec<Row>` mapping,
//! which is what makes them straightforward to unit test without fixtures
//! needing a live Postgres/Redis.

pub mod countries;
pub mod fixtures;
pub mod injuries;
pub mod json_utc;
pub mod leagues;
pub mod standings;
pub mod team_statistics;
pub mod teams;
pub mod timezones;
pub mod top_scorers;
pub mod venues;

use sha1::{Digest, Sha1};

/// Hashes a pipe-joined, lowercased/trimmed field list. Shared by the
/// `fixture_events.event_key` and `injuries.injury_key` content hashes; a
/// missing field contributes an empty segment rather than shifting the join.
pub fn content_hash(fields: &[Option<&str>]) -> String {
    let joined = fields
        .iter()
        .map(|f| f.unwrap_or("").trim().to_lowercase())
        .collect::<Vec<_>>()
        .join("|");
    let mut hasher = Sha1::new();
    hasher.update(joined.as_bytes());
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_hash_is_deterministic() {
        let a = content_hash(&[Some("1234"), Some("10"), None, Some("Goal")]);
        let b = content_hash(&[Some("1234"), Some("10"), None, Some("Goal")]);
        assert_eq!(a, b);
    }

    #[test]
    fn content_hash_is_case_and_whitespace_insensitive() {
        let a = content_hash(&[Some(" Goal "), Some("Team A")]);
        let b = content_hash(&[Some("goal"), Some("team a")]);
        assert_eq!(a, b);
    }

    #[test]
    fn content_hash_differs_when_ordinal_differs() {
        let a = content_hash(&[Some("1234"), Some("0")]);
        let b = content_hash(&[Some("1234"), Some("1")]);
        assert_ne!(a, b);
    }
}
