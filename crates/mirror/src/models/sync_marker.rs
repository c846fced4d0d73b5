//! Watermark of the last completed sync pass

use chrono::{DateTime, Utc};
use log::warn;
use std::fmt;

use super::timestamp::{format_timestamp, parse_timestamp};

/// Timestamp boundary separating "already seen" from "possibly new" remote
/// changes.
///
/// Persisted as a single line of text. Only advanced once a pass has fully
/// completed, so an interrupted pass is picked up again on the next run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SyncMarker(DateTime<Utc>);

impl SyncMarker {
    /// The far-past marker used on the first run, guaranteeing full enumeration
    pub fn epoch() -> Self {
        Self(DateTime::<Utc>::UNIX_EPOCH)
    }

    /// Marker at `time`, truncated to the millisecond precision it is stored with
    pub fn at(time: DateTime<Utc>) -> Self {
        Self(DateTime::from_timestamp_millis(time.timestamp_millis()).unwrap_or(time))
    }

    pub fn time(&self) -> DateTime<Utc> {
        self.0
    }

    pub fn is_epoch(&self) -> bool {
        self.0 == DateTime::<Utc>::UNIX_EPOCH
    }

    /// Check whether a remote modification happened after this marker
    pub fn is_before(&self, modified: DateTime<Utc>) -> bool {
        modified > self.0
    }

    /// Parse a persisted marker
    pub fn parse(s: &str) -> Option<Self> {
        parse_timestamp(s).map(Self)
    }

    /// Parse a persisted marker, falling back to epoch when it is unreadable.
    ///
    /// Falling back forces a full enumeration, which is always correct.
    pub fn parse_or_epoch(s: &str) -> Self {
        Self::parse(s).unwrap_or_else(|| {
            warn!("Could not parse sync marker {:?}, starting from epoch", s);
            Self::epoch()
        })
    }
}

impl Default for SyncMarker {
    fn default() -> Self {
        Self::epoch()
    }
}

impl fmt::Display for SyncMarker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&format_timestamp(&self.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_epoch_display() {
        assert_eq!(SyncMarker::epoch().to_string(), "1970-01-01T00:00:00.000Z");
        assert!(SyncMarker::epoch().is_epoch());
    }

    #[test]
    fn test_parse_rfc3339() {
        let marker = SyncMarker::parse("2024-03-01T12:30:00.250Z").unwrap();
        assert_eq!(marker.to_string(), "2024-03-01T12:30:00.250Z");

        let offset = SyncMarker::parse("2024-03-01T14:30:00+02:00").unwrap();
        assert_eq!(offset.to_string(), "2024-03-01T12:30:00.000Z");
    }

    #[test]
    fn test_parse_legacy_double_suffix() {
        let marker = SyncMarker::parse("2024-03-01T12:30:00.123456+00:00Z").unwrap();
        assert_eq!(marker.to_string(), "2024-03-01T12:30:00.123Z");
    }

    #[test]
    fn test_parse_naive_as_utc() {
        let marker = SyncMarker::parse("2024-03-01T12:30:00.500").unwrap();
        assert_eq!(marker.to_string(), "2024-03-01T12:30:00.500Z");
    }

    #[test]
    fn test_parse_or_epoch_on_garbage() {
        assert!(SyncMarker::parse_or_epoch("yesterday-ish").is_epoch());
        assert!(SyncMarker::parse_or_epoch("").is_epoch());
    }

    #[test]
    fn test_is_before() {
        let marker = SyncMarker::parse("2024-03-01T00:00:00Z").unwrap();
        let later = SyncMarker::parse("2024-03-02T00:00:00Z").unwrap().time();
        let earlier = SyncMarker::parse("2024-02-28T00:00:00Z").unwrap().time();

        assert!(marker.is_before(later));
        assert!(!marker.is_before(earlier));
        assert!(!marker.is_before(marker.time()));
    }

    #[test]
    fn test_at_matches_persisted_form() {
        let time = DateTime::parse_from_rfc3339("2024-03-01T12:30:00.123456789Z")
            .unwrap()
            .with_timezone(&Utc);
        let marker = SyncMarker::at(time);

        assert_eq!(SyncMarker::parse(&marker.to_string()), Some(marker));
        assert!(marker.time() <= time);
    }
}
