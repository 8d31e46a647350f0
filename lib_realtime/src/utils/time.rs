use chrono::{DateTime, Utc};

/// Current UTC time formatted the way the wire `timestamp` field expects,
/// e.g. `2026-10-18T07:47:03.120Z`.
pub fn current_datetime_rfc9557() -> String {
    let now: DateTime<Utc> = Utc::now();
    now.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

/// Milliseconds since the Unix epoch.
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rfc9557_has_millis_and_zulu_suffix() {
        let ts = current_datetime_rfc9557();
        assert!(ts.ends_with('Z'));
        assert!(DateTime::parse_from_rfc3339(&ts).is_ok());
        // 2026-10-18T07:47:03.120Z
        assert_eq!(ts.len(), 24);
    }
}
