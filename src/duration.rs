//! Human-readable durations ("60s", "10s", "1h") for config files and CLI flags.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{de, Deserialize, Deserializer};

const UNITS: &[(&str, u64)] = &[
    ("ms", 0),
    ("d", 24 * 60 * 60),
    ("h", 60 * 60),
    ("m", 60),
    ("s", 1),
];

/// Parse a duration such as `"250ms"`, `"10s"`, `"5m"`, `"1h"` or `"1d"`.
///
/// Input is trimmed and case-insensitive. Zero is accepted; callers that need
/// a positive duration validate that themselves.
///
/// ```
/// use coindash::duration::parse_duration;
/// use std::time::Duration;
///
/// assert_eq!(parse_duration("60s").unwrap(), Duration::from_secs(60));
/// assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
/// assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
/// ```
pub fn parse_duration(input: &str) -> Result<Duration> {
    let s = input.trim().to_lowercase();
    for (suffix, secs_per_unit) in UNITS {
        let Some(number) = s.strip_suffix(suffix) else {
            continue;
        };
        let value: u64 = number
            .trim()
            .parse()
            .with_context(|| format!("Invalid number in duration: {input:?}"))?;
        if *suffix == "ms" {
            return Ok(Duration::from_millis(value));
        }
        let secs = value
            .checked_mul(*secs_per_unit)
            .context("Duration is too large")?;
        return Ok(Duration::from_secs(secs));
    }
    bail!("Duration {input:?} must end with ms, s, m, h or d")
}

/// Render a duration with the largest unit that divides it evenly.
pub fn format_duration(d: Duration) -> String {
    if d.subsec_millis() != 0 || d.as_secs() == 0 {
        return format!("{}ms", d.as_millis());
    }
    let secs = d.as_secs();
    for (suffix, secs_per_unit) in UNITS.iter().filter(|(_, n)| *n > 0) {
        if secs % secs_per_unit == 0 {
            return format!("{}{suffix}", secs / secs_per_unit);
        }
    }
    format!("{secs}s")
}

/// Use with `#[serde(deserialize_with = "deserialize_duration")]`.
pub fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    parse_duration(&s).map_err(de::Error::custom)
}
