// src/config/duration.rs
//! Human-readable durations for config files: "2s", "1h30m", "500ms", "7d".

use once_cell::sync::OnceCell;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serializer};
use std::time::Duration;

use crate::error::ConfigError;

pub fn parse_duration(raw: &str) -> Result<Duration, ConfigError> {
    static RE_PART: OnceCell<Regex> = OnceCell::new();
    let re = RE_PART.get_or_init(|| Regex::new(r"(\d+(?:\.\d+)?)(ms|s|m|h|d)").unwrap());

    let s = raw.trim().to_ascii_lowercase();
    if s.is_empty() {
        return Err(ConfigError::Duration(raw.to_string()));
    }
    // Bare integers are seconds.
    if let Ok(secs) = s.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }

    let mut total = 0f64;
    let mut consumed = 0usize;
    for caps in re.captures_iter(&s) {
        let whole = caps.get(0).map(|m| m.as_str()).unwrap_or_default();
        consumed += whole.len();
        let n: f64 = caps[1]
            .parse()
            .map_err(|_| ConfigError::Duration(raw.to_string()))?;
        total += match &caps[2] {
            "ms" => n / 1_000.0,
            "s" => n,
            "m" => n * 60.0,
            "h" => n * 3_600.0,
            _ => n * 86_400.0,
        };
    }
    if consumed != s.len() {
        return Err(ConfigError::Duration(raw.to_string()));
    }
    if !total.is_finite() {
        return Err(ConfigError::Duration(raw.to_string()));
    }
    Duration::try_from_secs_f64(total).map_err(|_| ConfigError::Duration(raw.to_string()))
}

pub fn format_duration(d: Duration) -> String {
    let ms = d.as_millis();
    if ms % 1_000 != 0 {
        return format!("{ms}ms");
    }
    let mut secs = d.as_secs();
    let mut out = String::new();
    for (unit, size) in [("h", 3_600u64), ("m", 60), ("s", 1)] {
        if secs >= size {
            out.push_str(&format!("{}{}", secs / size, unit));
            secs %= size;
        }
    }
    if out.is_empty() {
        out.push_str("0s");
    }
    out
}

/// `#[serde(with = "crate::config::duration::serde_str")]`
pub mod serde_str {
    use super::*;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&format_duration(*d))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(d)?;
        parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}
