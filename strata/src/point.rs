//! The point record persisted in segment files.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, WriteError};
use crate::tags::TagSet;

/// A single tagged sample.
///
/// On disk each point is one JSON line:
///
/// ```text
/// {"t":"2025-08-26T12:34:01.5Z","v":42.0,"tags":{"host":"game01"}}
/// ```
///
/// `tags` is omitted when empty and defaults to empty when absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Point {
    /// Sample time, always UTC.
    #[serde(rename = "t")]
    pub timestamp: DateTime<Utc>,
    /// Sample value.
    #[serde(rename = "v")]
    pub value: f64,
    /// Labels selecting the sub-stream within a series.
    #[serde(default, skip_serializing_if = "TagSet::is_empty")]
    pub tags: TagSet,
}

impl Point {
    /// Creates a point, normalizing the timestamp to UTC.
    pub fn new<Tz: TimeZone>(timestamp: DateTime<Tz>, value: f64, tags: TagSet) -> Self {
        Self {
            timestamp: timestamp.with_timezone(&Utc),
            value,
            tags,
        }
    }

    /// Creates an untagged point.
    pub fn at<Tz: TimeZone>(timestamp: DateTime<Tz>, value: f64) -> Self {
        Self::new(timestamp, value, TagSet::new())
    }

    /// Encodes the point as one newline-terminated JSON record.
    ///
    /// The record is built in memory so that an encode failure never leaves
    /// a partial line in a segment.
    ///
    /// # Errors
    ///
    /// Returns [`WriteError::Encode`] if serialization fails.
    pub fn encode_line(&self) -> Result<Vec<u8>> {
        let mut line = serde_json::to_vec(self).map_err(|source| WriteError::Encode { source })?;
        line.push(b'\n');
        Ok(line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::FixedOffset;

    #[test]
    fn test_new_normalizes_to_utc() {
        let jst = FixedOffset::east_opt(9 * 3600).unwrap();
        let local = jst.with_ymd_and_hms(2025, 8, 26, 21, 0, 0).unwrap();
        let point = Point::at(local, 1.0);

        assert_eq!(point.timestamp, Utc.with_ymd_and_hms(2025, 8, 26, 12, 0, 0).unwrap());
    }

    #[test]
    fn test_encode_line_omits_empty_tags() {
        let ts = Utc.with_ymd_and_hms(2025, 8, 26, 12, 0, 0).unwrap();
        let line = Point::at(ts, 2.5).encode_line().unwrap();
        let text = String::from_utf8(line).unwrap();

        assert!(text.ends_with('\n'));
        assert!(!text.contains("tags"));
        assert!(text.contains(r#""v":2.5"#));
        assert!(text.contains(r#""t":"2025-08-26T12:00:00Z""#));
    }

    #[test]
    fn test_decode_preserves_fractional_seconds() {
        let ts = Utc.timestamp_opt(1_756_211_640, 123_456_789).unwrap();
        let point = Point::new(ts, -67.89, TagSet::from([("player_id", "P:1")]));

        let line = point.encode_line().unwrap();
        let decoded: Point = serde_json::from_slice(&line).unwrap();

        assert_eq!(decoded, point);
    }

    #[test]
    fn test_decode_without_tags_field() {
        let decoded: Point =
            serde_json::from_str(r#"{"t":"2025-08-26T12:00:00.5+00:00","v":1}"#).unwrap();
        assert!(decoded.tags.is_empty());
        assert_eq!(decoded.value, 1.0);
        assert_eq!(decoded.timestamp.timestamp_subsec_millis(), 500);
    }
}
