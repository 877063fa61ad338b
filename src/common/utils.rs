//! Utility functions for kvecs

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Parse duration string (e.g., "250ms", "30s", "5m", "1h").
/// A bare number is taken as milliseconds.
pub fn parse_duration(s: &str) -> crate::Result<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return Err(crate::Error::InvalidConfig("empty duration".into()));
    }

    let split = s
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(s.len());
    let (num_str, unit) = s.split_at(split);

    let num: u64 = num_str
        .parse()
        .map_err(|_| crate::Error::InvalidConfig(format!("invalid duration: {}", s)))?;

    let duration = match unit {
        "" | "ms" => Duration::from_millis(num),
        "s" => Duration::from_secs(num),
        "m" => Duration::from_secs(checked_secs(s, num, 60)?),
        "h" => Duration::from_secs(checked_secs(s, num, 3600)?),
        _ => {
            return Err(crate::Error::InvalidConfig(format!(
                "unknown duration unit: {}",
                unit
            )))
        }
    };

    Ok(duration)
}

fn checked_secs(s: &str, num: u64, scale: u64) -> crate::Result<u64> {
    num.checked_mul(scale)
        .ok_or_else(|| crate::Error::InvalidConfig(format!("duration too large: {}", s)))
}

/// [`parse_duration`] as whole milliseconds, rejecting values that do not
/// fit in a `u64`.
pub fn parse_duration_millis(s: &str) -> crate::Result<u64> {
    u64::try_from(parse_duration(s)?.as_millis())
        .map_err(|_| crate::Error::InvalidConfig(format!("duration too large: {}", s.trim())))
}

/// Get current Unix timestamp (milliseconds)
pub fn timestamp_now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
