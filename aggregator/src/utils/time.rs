//! ISO-8601 duration and timestamp helpers
//!
//! Execution records carry their durations as ISO-8601 strings (`PT5M`, `P1DT2H`) and their
//! dates as ISO-8601 timestamps. Only the day-time subset of durations is accepted, with an
//! optional leading sign: years, months and weeks have no fixed length in seconds.

use crate::utils::{AggregatorError, AggregatorResult};
use chrono::{DateTime, NaiveDateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

static DURATION_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^([+-])?P(?:(\d+)D)?(T(?:(\d+)H)?(?:(\d+)M)?(?:(\d+(?:[.,]\d+)?)S)?)?$")
        .expect("duration pattern is valid")
});

const NAIVE_DATE_FORMATS: [&str; 3] =
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f UTC"];

/// Parse an ISO-8601 duration into seconds; a leading `-` yields a negative value
pub fn parse_duration_seconds(value: &str) -> AggregatorResult<f64> {
    let trimmed = value.trim();
    let captures = DURATION_PATTERN.captures(trimmed).ok_or_else(|| {
        AggregatorError::malformed_duration(value, "expected the form PnDTnHnMn.nS")
    })?;

    let sign = match captures.get(1).map(|m| m.as_str()) {
        Some("-") => -1.0,
        _ => 1.0,
    };
    let days = captures.get(2);
    let time_section = captures.get(3);
    let hours = captures.get(4);
    let minutes = captures.get(5);
    let seconds = captures.get(6);

    if days.is_none() && hours.is_none() && minutes.is_none() && seconds.is_none() {
        return Err(AggregatorError::malformed_duration(value, "no duration components"));
    }
    if time_section.is_some() && hours.is_none() && minutes.is_none() && seconds.is_none() {
        return Err(AggregatorError::malformed_duration(value, "empty time section"));
    }

    let component = |m: Option<regex::Match<'_>>, scale: f64| -> AggregatorResult<f64> {
        match m {
            Some(m) => m
                .as_str()
                .replace(',', ".")
                .parse::<f64>()
                .map(|n| n * scale)
                .map_err(|e| AggregatorError::malformed_duration(value, e.to_string())),
            None => Ok(0.0),
        }
    };

    let total = component(days, 86_400.0)?
        + component(hours, 3_600.0)?
        + component(minutes, 60.0)?
        + component(seconds, 1.0)?;
    Ok(sign * total)
}

/// Render seconds as an ISO-8601 duration (`PT150.5S`)
pub fn format_duration_seconds(seconds: f64) -> String {
    if seconds.fract() == 0.0 {
        format!("PT{}S", seconds as i64)
    } else {
        format!("PT{}S", seconds)
    }
}

/// Render whole minutes as an ISO-8601 duration (`PT12M`)
pub fn format_duration_minutes(minutes: i64) -> String {
    format!("PT{}M", minutes)
}

/// Parse an execution timestamp; offset-less timestamps are taken as UTC
pub fn parse_timestamp(value: &str) -> AggregatorResult<DateTime<Utc>> {
    let trimmed = value.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(parsed.with_timezone(&Utc));
    }
    for format in NAIVE_DATE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Ok(naive.and_utc());
        }
    }
    Err(AggregatorError::malformed_date(value))
}
