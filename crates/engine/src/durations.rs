//! Duration parsing and serde glue.
//!
//! Durations are written either as humantime strings (`"90s"`, `"1h 30m"`)
//! or as integer seconds.

use std::time::Duration;

use serde::{Deserialize, Deserializer, Serializer};
use serde_json::Value;

/// Parse `"2h"`, `"45s"` or `"120"` (seconds).
pub fn parse(text: &str) -> Option<Duration> {
    let text = text.trim();
    if let Ok(secs) = text.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    humantime::parse_duration(text).ok()
}

/// Interpret a JSON value as a duration: a non-negative number of seconds or
/// a string accepted by [`parse`].
pub fn from_value(value: &Value) -> Option<Duration> {
    match value {
        Value::Number(n) => match n.as_u64() {
            Some(secs) => Some(Duration::from_secs(secs)),
            None => n
                .as_f64()
                .and_then(|secs| Duration::try_from_secs_f64(secs).ok()),
        },
        Value::String(s) => parse(s),
        _ => None,
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Raw {
    Secs(u64),
    Text(String),
}

impl Raw {
    fn into_duration<E: serde::de::Error>(self) -> Result<Duration, E> {
        match self {
            Raw::Secs(secs) => Ok(Duration::from_secs(secs)),
            Raw::Text(text) => {
                parse(&text).ok_or_else(|| E::custom(format!("invalid duration '{text}'")))
            }
        }
    }
}

pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&humantime::format_duration(*duration).to_string())
}

pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    Raw::deserialize(deserializer)?.into_duration()
}

/// Same as the parent module, for `Option<Duration>` fields.
pub mod option {
    use super::*;

    pub fn serialize<S: Serializer>(
        duration: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match duration {
            Some(d) => super::serialize(d, serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Option::<Raw>::deserialize(deserializer)?
            .map(Raw::into_duration)
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_humantime_and_seconds() {
        assert_eq!(parse("2h"), Some(Duration::from_secs(7200)));
        assert_eq!(parse("1m 30s"), Some(Duration::from_secs(90)));
        assert_eq!(parse("15"), Some(Duration::from_secs(15)));
        assert_eq!(parse("soon"), None);
    }

    #[test]
    fn json_numbers_are_seconds() {
        assert_eq!(from_value(&json!(60)), Some(Duration::from_secs(60)));
        assert_eq!(from_value(&json!(-1)), None);
        assert_eq!(from_value(&json!(true)), None);
        assert_eq!(from_value(&json!(1.5)), Some(Duration::from_millis(1500)));
    }

    #[test]
    fn out_of_range_numbers_are_rejected() {
        assert_eq!(from_value(&json!(1e20)), None);
        assert_eq!(from_value(&json!(-0.5)), None);
    }
}
