//! Server-side admission timestamps.

use chrono::{Local, NaiveDateTime};

/// Format of every `timestamp` field the server emits.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// The current local time in [`TIMESTAMP_FORMAT`].
#[must_use]
pub fn now() -> String {
    Local::now().format(TIMESTAMP_FORMAT).to_string()
}

/// Parse a timestamp produced by [`now`].
///
/// Returns `None` if the string is not in [`TIMESTAMP_FORMAT`].
#[must_use]
pub fn parse(value: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(value, TIMESTAMP_FORMAT).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_now_is_parseable() {
        let stamp = now();
        assert_eq!(stamp.len(), "2024-01-01 00:00:00".len());
        assert!(parse(&stamp).is_some());
    }

    #[test]
    fn test_parse_rejects_other_formats() {
        assert!(parse("2024-01-01T00:00:00Z").is_none());
        assert!(parse("").is_none());
        assert!(parse("2024-01-01 12:30:45").is_some());
    }
}
