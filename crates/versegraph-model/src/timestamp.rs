//! Recency timestamps with lenient decoding.

use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Modification timestamp used for last-writer-wins comparisons.
///
/// Serialized as RFC 3339 with millisecond precision. Decoding accepts RFC 3339
/// strings and integer epoch milliseconds; anything else decodes as the Unix
/// epoch so a malformed record always loses a recency comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Timestamp(pub DateTime<Utc>);

impl Timestamp {
    /// Current time truncated to milliseconds, the precision timestamps are stored at.
    pub fn now() -> Self {
        Self::from_millis(Utc::now().timestamp_millis())
    }

    /// The Unix epoch; the value every malformed timestamp collapses to.
    pub fn epoch() -> Self {
        Self(DateTime::<Utc>::default())
    }

    pub fn from_millis(millis: i64) -> Self {
        Utc.timestamp_millis_opt(millis)
            .single()
            .map(Self)
            .unwrap_or_else(Self::epoch)
    }

    pub fn as_millis(&self) -> i64 {
        self.0.timestamp_millis()
    }

    /// Parse an RFC 3339 string or a decimal millisecond count.
    pub fn parse_lenient(raw: &str) -> Self {
        let raw = raw.trim();
        if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
            return Self(parsed.with_timezone(&Utc));
        }
        raw.parse::<i64>()
            .map(Self::from_millis)
            .unwrap_or_else(|_| Self::epoch())
    }

    /// One millisecond earlier, saturating at the epoch.
    pub fn just_before(&self) -> Self {
        let millis = self.as_millis();
        if millis <= 0 {
            Self::epoch()
        } else {
            Self::from_millis(millis - 1)
        }
    }

    pub fn is_epoch(&self) -> bool {
        self.as_millis() == 0
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }
}

impl From<Timestamp> for DateTime<Utc> {
    fn from(ts: Timestamp) -> Self {
        ts.0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.to_rfc3339_opts(SecondsFormat::Millis, true))
    }
}

impl Serialize for Timestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawTimestamp {
    Text(String),
    Millis(i64),
    Float(f64),
    Other(serde::de::IgnoredAny),
}

impl<'de> Deserialize<'de> for Timestamp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = RawTimestamp::deserialize(deserializer)?;
        Ok(match raw {
            RawTimestamp::Text(text) => Self::parse_lenient(&text),
            RawTimestamp::Millis(millis) => Self::from_millis(millis),
            RawTimestamp::Float(millis) if millis.is_finite() => Self::from_millis(millis as i64),
            RawTimestamp::Float(_) | RawTimestamp::Other(_) => Self::epoch(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_rfc3339_and_millis() {
        let from_text: Timestamp = serde_json::from_value(json!("2024-03-01T12:00:00Z")).unwrap();
        let from_millis: Timestamp = serde_json::from_value(json!(1_709_294_400_000i64)).unwrap();
        assert_eq!(from_text, from_millis);
    }

    #[test]
    fn malformed_values_collapse_to_epoch() {
        for value in [json!("yesterday"), json!(null), json!({"at": 1}), json!(true)] {
            let ts: Timestamp = serde_json::from_value(value).unwrap();
            assert!(ts.is_epoch());
        }
        assert!(Timestamp::epoch() < Timestamp::now());
    }

    #[test]
    fn serializes_with_millisecond_precision() {
        let ts = Timestamp::from_millis(1_709_294_400_123);
        assert_eq!(
            serde_json::to_value(ts).unwrap(),
            json!("2024-03-01T12:00:00.123Z")
        );
    }

    #[test]
    fn just_before_saturates_at_epoch() {
        assert_eq!(Timestamp::from_millis(10).just_before().as_millis(), 9);
        assert!(Timestamp::epoch().just_before().is_epoch());
    }
}
