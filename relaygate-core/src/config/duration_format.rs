//! Duration parsing for configuration files.
//!
//! Durations are written in humantime form: `250ms`, `3s`, `15m`, `1h 30m`.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::time::Duration;

/// Parse a humantime duration string.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    humantime::parse_duration(s.trim())
        .map_err(|e| format!("invalid duration '{s}': {e} (expected e.g. 3s, 15m, 1h)"))
}

/// Deserialize an optional duration from a string.
pub fn deserialize_option<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    let opt: Option<String> = Option::deserialize(deserializer)?;
    match opt {
        Some(s) => parse_duration(&s)
            .map(Some)
            .map_err(serde::de::Error::custom),
        None => Ok(None),
    }
}

/// Serialize an optional duration to a humantime string.
pub fn serialize_option<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    match duration {
        Some(d) => {
            let s = humantime::format_duration(*d).to_string();
            serializer.serialize_some(&s)
        }
        None => serializer.serialize_none(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_humantime() {
        assert_eq!(parse_duration("3s").unwrap(), Duration::from_secs(3));
        assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_duration(" 15m ").unwrap(), Duration::from_secs(900));
        assert_eq!(parse_duration("1h 30m").unwrap(), Duration::from_secs(5400));
    }

    #[test]
    fn test_parse_invalid() {
        let err = parse_duration("soon").unwrap_err();
        assert!(err.contains("invalid duration 'soon'"));
    }

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Holder {
        #[serde(
            default,
            deserialize_with = "deserialize_option",
            serialize_with = "serialize_option"
        )]
        ttl: Option<Duration>,
    }

    #[test]
    fn test_optional_field() {
        let parsed: Holder = serde_yaml::from_str("ttl: 10m").unwrap();
        assert_eq!(parsed.ttl, Some(Duration::from_secs(600)));

        let reparsed: Holder =
            serde_yaml::from_str(&serde_yaml::to_string(&parsed).unwrap()).unwrap();
        assert_eq!(reparsed, parsed);

        let empty: Holder = serde_yaml::from_str("{}").unwrap();
        assert_eq!(empty.ttl, None);
    }
}
