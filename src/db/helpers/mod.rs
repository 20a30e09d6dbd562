use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, TimeZone, Utc};

pub fn parse_datetime(value: &str, field: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("failed to parse {field}"))
}

/// Millisecond epoch column back into a UTC instant.
pub fn from_millis(value: i64, field: &str) -> Result<DateTime<Utc>> {
    Utc.timestamp_millis_opt(value)
        .single()
        .ok_or_else(|| anyhow!("{field} contains out-of-range timestamp {value}"))
}
