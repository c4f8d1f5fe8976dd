//! `HH:MM` wire format for times of day.
//!
//! Serialization always emits `HH:MM`. Deserialization also accepts the
//! `HH:MM:SS` form PostgreSQL `time` columns come back as.

use chrono::NaiveTime;
use serde::{Deserialize, Deserializer, Serializer};

pub const HHMM: &str = "%H:%M";

pub fn parse(raw: &str) -> Option<NaiveTime> {
    let raw = raw.trim();
    NaiveTime::parse_from_str(raw, HHMM)
        .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M:%S"))
        .ok()
}

pub fn serialize<S>(time: &NaiveTime, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&time.format(HHMM).to_string())
}

pub fn deserialize<'de, D>(deserializer: D) -> Result<NaiveTime, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse(&raw).ok_or_else(|| serde::de::Error::custom(format!("invalid time of day '{}'", raw)))
}
