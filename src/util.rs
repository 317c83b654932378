use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;

use crate::error::{DatasourceError, DatasourceResult};

static INTERVAL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d+(?:\.\d+)?)(ms|[Mwdhmsy])$").expect("interval pattern is valid")
});

/// `true` for `None`, empty and whitespace-only strings
pub fn is_blank(value: Option<&str>) -> bool {
    value.is_none_or(|v| v.trim().is_empty())
}

/// Parse a dashboard interval string (`"500ms"`, `"1s"`, `"10m"`, ...).
pub fn parse_interval(interval: &str) -> DatasourceResult<Duration> {
    let invalid = || DatasourceError::Config(format!("Invalid interval string '{interval}'"));

    let captures = INTERVAL_PATTERN
        .captures(interval.trim())
        .ok_or_else(invalid)?;

    let amount: f64 = captures[1].parse().map_err(|_| invalid())?;
    let unit_millis = match &captures[2] {
        "ms" => 1.0,
        "s" => 1_000.0,
        "m" => 60.0 * 1_000.0,
        "h" => 60.0 * 60.0 * 1_000.0,
        "d" => 24.0 * 60.0 * 60.0 * 1_000.0,
        "w" => 7.0 * 24.0 * 60.0 * 60.0 * 1_000.0,
        "M" => 30.0 * 24.0 * 60.0 * 60.0 * 1_000.0,
        "y" => 365.0 * 24.0 * 60.0 * 60.0 * 1_000.0,
        _ => return Err(invalid()),
    };

    // whole nanoseconds, so "123ms" is exactly 123ms
    Ok(Duration::from_nanos((amount * unit_millis * 1_000_000.0).round() as u64))
}
