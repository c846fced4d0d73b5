//! Lenient timestamp parsing and serde helpers
//!
//! Timestamps are written as RFC 3339 UTC with millisecond precision. Reading
//! also accepts offsets, the `+00:00Z` double suffix found in older databases,
//! and naive timestamps (taken as UTC).

use chrono::{DateTime, NaiveDateTime, SecondsFormat, TimeZone, Utc};

/// Parse a timestamp in any of the accepted forms
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }

    let s = if s.contains('+') {
        s.trim_end_matches('Z')
    } else {
        s
    };

    if let Ok(parsed) = DateTime::parse_from_rfc3339(s) {
        return Some(parsed.with_timezone(&Utc));
    }

    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .map(|naive| Utc.from_utc_datetime(&naive))
}

/// Format a timestamp the way it is persisted
pub fn format_timestamp(time: &DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// `#[serde(with = "lenient")]` for `DateTime<Utc>` fields
pub mod lenient {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    pub fn serialize<S: Serializer>(time: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::format_timestamp(time))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        super::parse_timestamp(&raw)
            .ok_or_else(|| D::Error::custom(format!("invalid timestamp: {:?}", raw)))
    }
}

/// `#[serde(with = "lenient_option")]` for `Option<DateTime<Utc>>` fields.
///
/// Empty strings and nulls read as `None`.
pub mod lenient_option {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    pub fn serialize<S: Serializer>(
        time: &Option<DateTime<Utc>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match time {
            Some(time) => serializer.serialize_str(&super::format_timestamp(time)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<DateTime<Utc>>, D::Error> {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        match raw.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(s) => super::parse_timestamp(s)
                .map(Some)
                .ok_or_else(|| D::Error::custom(format!("invalid timestamp: {:?}", s))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_forms() {
        let expected = "2024-03-01T12:30:00.000Z";
        for input in [
            "2024-03-01T12:30:00Z",
            "2024-03-01T12:30:00.000Z",
            "2024-03-01T14:30:00+02:00",
            "2024-03-01T12:30:00+00:00Z",
            "2024-03-01T12:30:00",
        ] {
            let parsed = parse_timestamp(input).unwrap();
            assert_eq!(format_timestamp(&parsed), expected, "input {}", input);
        }
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_timestamp("").is_none());
        assert!(parse_timestamp("last tuesday").is_none());
    }
}
