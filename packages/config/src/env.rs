// ABOUTME: Typed environment variable parsing with fallbacks
// ABOUTME: Invalid or out-of-range values fall back to defaults with a warning

use std::fmt::Display;
use std::ops::RangeInclusive;
use std::str::FromStr;
use tracing::warn;

/// Read and parse an environment variable, returning `None` when unset or unparsable
pub fn parse_env<T: FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("Ignoring unparsable value for {}: {:?}", key, raw);
            None
        }
    }
}

/// Read a numeric variable and keep it only when it lies inside `range`
pub fn parse_env_in_range<T>(key: &str, range: RangeInclusive<T>, default: T) -> T
where
    T: FromStr + PartialOrd + Display + Copy,
{
    match parse_env::<T>(key) {
        Some(value) if range.contains(&value) => value,
        Some(value) => {
            warn!(
                "{}={} is outside {}..={}, using default {}",
                key,
                value,
                range.start(),
                range.end(),
                default
            );
            default
        }
        None => default,
    }
}
