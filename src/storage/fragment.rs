//! Fragment metadata as returned by ListFragments.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One ingested media segment.
///
/// The canary never looks inside a fragment; it only counts and orders them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Fragment {
    /// Service-assigned identifier, unique within the stream.
    pub fragment_number: String,
    #[serde(default)]
    pub fragment_size_in_bytes: u64,
    #[serde(with = "epoch_seconds")]
    pub producer_timestamp: DateTime<Utc>,
    #[serde(with = "epoch_seconds")]
    pub server_timestamp: DateTime<Utc>,
    #[serde(default)]
    pub fragment_length_in_milliseconds: u64,
}

impl Fragment {
    /// A fragment with only identity and server time filled in.
    pub fn new(fragment_number: impl Into<String>, server_timestamp: DateTime<Utc>) -> Self {
        Self {
            fragment_number: fragment_number.into(),
            fragment_size_in_bytes: 0,
            producer_timestamp: server_timestamp,
            server_timestamp,
            fragment_length_in_milliseconds: 0,
        }
    }
}

/// Order by server timestamp, then by fragment number.
///
/// Fragment numbers are decimal strings of varying length, so shorter ones
/// sort first.
pub fn server_order(a: &Fragment, b: &Fragment) -> Ordering {
    a.server_timestamp
        .cmp(&b.server_timestamp)
        .then_with(|| a.fragment_number.len().cmp(&b.fragment_number.len()))
        .then_with(|| a.fragment_number.cmp(&b.fragment_number))
}

/// Timestamps travel as fractional epoch seconds.
pub(crate) mod epoch_seconds {
    use chrono::{DateTime, TimeZone, Utc};
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(ts.timestamp_millis() as f64 / 1_000.0)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        let secs = f64::deserialize(d)?;
        if !secs.is_finite() {
            return Err(de::Error::custom("timestamp is not a finite number"));
        }
        let millis = (secs * 1_000.0).round() as i64;
        Utc.timestamp_millis_opt(millis)
            .single()
            .ok_or_else(|| de::Error::custom(format!("timestamp {secs} out of range")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn deserializes_list_fragments_entry() {
        let json = r#"{
            "FragmentNumber": "91343852333181432392682062607743920146264005397",
            "FragmentSizeInBytes": 1543,
            "ProducerTimestamp": 1700000000.25,
            "ServerTimestamp": 1700000000.5,
            "FragmentLengthInMilliseconds": 2000
        }"#;
        let f: Fragment = serde_json::from_str(json).unwrap();
        assert_eq!(f.fragment_size_in_bytes, 1543);
        assert_eq!(f.fragment_length_in_milliseconds, 2000);
        assert_eq!(f.server_timestamp.timestamp_millis(), 1_700_000_000_500);
        assert_eq!(f.producer_timestamp.timestamp_millis(), 1_700_000_000_250);
    }

    #[test]
    fn missing_optional_sizes_default_to_zero() {
        let json = r#"{"FragmentNumber":"1","ProducerTimestamp":1.0,"ServerTimestamp":2.0}"#;
        let f: Fragment = serde_json::from_str(json).unwrap();
        assert_eq!(f.fragment_size_in_bytes, 0);
        assert_eq!(f.fragment_length_in_milliseconds, 0);
    }

    #[test]
    fn serializes_timestamps_as_epoch_seconds() {
        let ts = Utc.timestamp_millis_opt(1_500).unwrap();
        let v = serde_json::to_value(Fragment::new("7", ts)).unwrap();
        assert_eq!(v["ServerTimestamp"], 1.5);
        assert_eq!(v["FragmentNumber"], "7");
    }

    #[test]
    fn server_order_uses_time_then_number() {
        let t0 = Utc.timestamp_opt(100, 0).unwrap();
        let t1 = Utc.timestamp_opt(101, 0).unwrap();
        let mut frags = vec![
            Fragment::new("30", t1),
            Fragment::new("100", t0),
            Fragment::new("9", t0),
        ];
        frags.sort_by(server_order);
        let numbers: Vec<_> = frags.iter().map(|f| f.fragment_number.as_str()).collect();
        assert_eq!(numbers, ["9", "100", "30"]);
    }
}
