use chrono::{DateTime, SecondsFormat, Utc};

use crate::error::Result;

/// Parses a datetime command-line parameter.
///
/// Accepts either a base-10 integer interpreted as Unix nanoseconds, or an
/// RFC3339 string with optional fractional seconds.
pub fn parse_datetime_param(input: &str) -> Result<DateTime<Utc>> {
    if let Ok(nanos) = input.parse::<i64>() {
        return Ok(DateTime::from_timestamp_nanos(nanos));
    }
    let parsed = DateTime::parse_from_rfc3339(input)?;
    Ok(parsed.with_timezone(&Utc))
}

pub fn format_rfc3339(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}
