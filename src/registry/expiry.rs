//! Retention text to absolute expiry

use chrono::{DateTime, Duration, Utc};

/// Retention applied when the requested value is unusable
pub const DEFAULT_RETENTION_MINUTES: i64 = 10;

/// Read a retention request as whole minutes.
///
/// Accepts a leading run of digits after optional whitespace and `+`, so
/// `"12abc"` reads as 12. Anything that does not yield a positive number,
/// or does not fit, falls back to [`DEFAULT_RETENTION_MINUTES`].
pub fn parse_retention_minutes(text: &str) -> i64 {
    let trimmed = text.trim_start();
    let trimmed = trimmed.strip_prefix('+').unwrap_or(trimmed);
    let digits: &str = match trimmed.find(|c: char| !c.is_ascii_digit()) {
        Some(end) => &trimmed[..end],
        None => trimmed,
    };

    match digits.parse::<u32>() {
        Ok(minutes) if minutes > 0 => i64::from(minutes),
        _ => DEFAULT_RETENTION_MINUTES,
    }
}

/// Absolute instant at which an object uploaded `now` with `retention` expires
pub fn compute_expiry(retention: &str, now: DateTime<Utc>) -> DateTime<Utc> {
    let minutes = parse_retention_minutes(retention);
    now.checked_add_signed(Duration::milliseconds(minutes * 60_000))
        .unwrap_or_else(|| now + Duration::minutes(DEFAULT_RETENTION_MINUTES))
}
