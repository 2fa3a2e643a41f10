//! Date calculus
//!
//! Duration parsing, absolute and relative date resolution, and the anchor
//! arithmetic used to place instances on a template's schedule.
//!
//! All durations are exact second counts: a month is [`DAYS_PER_MONTH`] days
//! and a year is [`DAYS_PER_YEAR`] days. Calendar-aware arithmetic is out of
//! scope.

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeDelta, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

/// Days counted for one month unit
pub const DAYS_PER_MONTH: i64 = 30;

/// Days counted for one year unit
pub const DAYS_PER_YEAR: i64 = 365;

/// Host wire format for dates (`20240131T120000Z`)
pub const WIRE_DATE_FORMAT: &str = "%Y%m%dT%H%M%SZ";

const SECS_PER_MINUTE: i64 = 60;
const SECS_PER_HOUR: i64 = 3_600;
const SECS_PER_DAY: i64 = 86_400;

static SIMPLE_DURATION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^(\d+)\s*(seconds?|secs?|s|minutes?|mins?|hours?|hrs?|h|days?|d|weeks?|wks?|w|months?|mos?|years?|yrs?|y)$",
    )
    .expect("static duration pattern")
});

static ISO_DURATION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^P(?:(\d+)Y)?(?:(\d+)M)?(?:(\d+)W)?(?:(\d+)D)?(?:T(?:(\d+)H)?(?:(\d+)M)?(?:(\d+)S)?)?$",
    )
    .expect("static ISO 8601 duration pattern")
});

static RELATIVE_EXPR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(due|scheduled|sched|wait|until)?\s*([+-])?\s*(.+)$")
        .expect("static relative expression pattern")
});

/// Date calculus errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DateError {
    /// Duration text not understood
    #[error("invalid duration: '{0}'")]
    InvalidDuration(String),

    /// Date text not understood
    #[error("invalid date: '{0}'")]
    InvalidDate(String),

    /// Relative expression not understood
    #[error("invalid relative date expression: '{0}'")]
    InvalidOffset(String),

    /// Arithmetic left the representable range
    #[error("date arithmetic overflow")]
    Overflow,
}

/// Parse a duration such as `7d`, `2w`, `1mo`, `3600s` or `P1DT2H`
///
/// # Errors
/// Returns [`DateError::InvalidDuration`] for unrecognised text and
/// [`DateError::Overflow`] if the value does not fit.
pub fn parse_duration(text: &str) -> Result<TimeDelta, DateError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(DateError::InvalidDuration(text.to_string()));
    }

    if let Some(caps) = SIMPLE_DURATION.captures(trimmed) {
        let count: i64 = caps[1]
            .parse()
            .map_err(|_| DateError::InvalidDuration(text.to_string()))?;
        let unit = caps[2].to_ascii_lowercase();
        let per_unit = unit_seconds(&unit).ok_or_else(|| DateError::InvalidDuration(text.to_string()))?;
        return seconds(count.checked_mul(per_unit).ok_or(DateError::Overflow)?);
    }

    if let Some(caps) = ISO_DURATION.captures(trimmed) {
        let factors = [
            DAYS_PER_YEAR * SECS_PER_DAY,
            DAYS_PER_MONTH * SECS_PER_DAY,
            7 * SECS_PER_DAY,
            SECS_PER_DAY,
            SECS_PER_HOUR,
            SECS_PER_MINUTE,
            1,
        ];
        let mut total: i64 = 0;
        let mut seen = false;
        for (slot, factor) in factors.iter().enumerate() {
            if let Some(m) = caps.get(slot + 1) {
                seen = true;
                let count: i64 = m
                    .as_str()
                    .parse()
                    .map_err(|_| DateError::InvalidDuration(text.to_string()))?;
                let part = count.checked_mul(*factor).ok_or(DateError::Overflow)?;
                total = total.checked_add(part).ok_or(DateError::Overflow)?;
            }
        }
        if seen {
            return seconds(total);
        }
    }

    Err(DateError::InvalidDuration(text.to_string()))
}

fn unit_seconds(unit: &str) -> Option<i64> {
    let secs = match unit {
        "s" | "sec" | "secs" | "second" | "seconds" => 1,
        "min" | "mins" | "minute" | "minutes" => SECS_PER_MINUTE,
        "h" | "hr" | "hrs" | "hour" | "hours" => SECS_PER_HOUR,
        "d" | "day" | "days" => SECS_PER_DAY,
        "w" | "wk" | "wks" | "week" | "weeks" => 7 * SECS_PER_DAY,
        "mo" | "mos" | "month" | "months" => DAYS_PER_MONTH * SECS_PER_DAY,
        "y" | "yr" | "yrs" | "year" | "years" => DAYS_PER_YEAR * SECS_PER_DAY,
        _ => return None,
    };
    Some(secs)
}

fn seconds(total: i64) -> Result<TimeDelta, DateError> {
    TimeDelta::try_seconds(total).ok_or(DateError::Overflow)
}

/// Render a duration in the compact form accepted by [`parse_duration`]
///
/// Whole days render as `Nd`, anything else as `Ns`. Negative values carry a
/// leading `-`.
#[must_use]
pub fn format_duration(duration: TimeDelta) -> String {
    let total = duration.num_seconds();
    let sign = if total < 0 { "-" } else { "" };
    let magnitude = total.unsigned_abs();
    if magnitude != 0 && magnitude % SECS_PER_DAY.unsigned_abs() == 0 {
        format!("{sign}{}d", magnitude / SECS_PER_DAY.unsigned_abs())
    } else {
        format!("{sign}{magnitude}s")
    }
}

/// Render a signed offset, always with an explicit sign (`+2d`, `-3600s`)
#[must_use]
pub fn format_offset(offset: TimeDelta) -> String {
    let rendered = format_duration(offset);
    if rendered.starts_with('-') {
        rendered
    } else {
        format!("+{rendered}")
    }
}

/// Parse an absolute date
///
/// Accepts the host wire format (`20240131T120000Z`, with or without the
/// trailing `Z`), RFC 3339, and a bare `YYYY-MM-DD` (midnight UTC).
///
/// # Errors
/// Returns [`DateError::InvalidDate`] if no format matches.
pub fn parse_date(text: &str) -> Result<DateTime<Utc>, DateError> {
    let trimmed = text.trim();

    if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, WIRE_DATE_FORMAT) {
        return Ok(naive.and_utc());
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, "%Y%m%dT%H%M%S") {
        return Ok(naive.and_utc());
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(parsed.with_timezone(&Utc));
    }
    if let Ok(day) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        if let Some(midnight) = day.and_hms_opt(0, 0, 0) {
            return Ok(midnight.and_utc());
        }
    }

    Err(DateError::InvalidDate(text.to_string()))
}

/// Render a date in the host wire format
#[must_use]
pub fn format_date(date: DateTime<Utc>) -> String {
    date.format(WIRE_DATE_FORMAT).to_string()
}

/// Parse a signed offset from an anchor
///
/// Accepts an optional reference prefix and sign: `due-2d`, `sched + 1w`,
/// `-172800s`, `+P1D`. A missing sign means a positive offset. The reference
/// prefix is informational; offsets always apply to the instance anchor.
///
/// # Errors
/// Returns [`DateError::InvalidOffset`] for unrecognised text.
pub fn parse_offset(text: &str) -> Result<TimeDelta, DateError> {
    let trimmed = text.trim();
    let caps = RELATIVE_EXPR
        .captures(trimmed)
        .ok_or_else(|| DateError::InvalidOffset(text.to_string()))?;

    let magnitude = parse_duration(&caps[3]).map_err(|err| match err {
        DateError::Overflow => DateError::Overflow,
        _ => DateError::InvalidOffset(text.to_string()),
    })?;

    match caps.get(2).map(|m| m.as_str()) {
        Some("-") => Ok(-magnitude),
        _ => Ok(magnitude),
    }
}

/// Whether text looks like a relative expression rather than an absolute date
#[must_use]
pub fn is_relative_expression(text: &str) -> bool {
    parse_date(text).is_err() && parse_offset(text).is_ok()
}

/// Resolve text that is either an absolute date or an offset from `anchor`
///
/// # Errors
/// Returns [`DateError::InvalidDate`] when the text is neither.
pub fn resolve_date(text: &str, anchor: DateTime<Utc>) -> Result<DateTime<Utc>, DateError> {
    if let Ok(date) = parse_date(text) {
        return Ok(date);
    }
    match parse_offset(text) {
        Ok(offset) => apply_offset(anchor, offset),
        Err(_) => Err(DateError::InvalidDate(text.to_string())),
    }
}

/// `anchor + offset`
///
/// # Errors
/// Returns [`DateError::Overflow`] if the result is out of range.
pub fn apply_offset(anchor: DateTime<Utc>, offset: TimeDelta) -> Result<DateTime<Utc>, DateError> {
    anchor.checked_add_signed(offset).ok_or(DateError::Overflow)
}

/// Signed offset of `date` from `anchor`
#[must_use]
pub fn offset_between(anchor: DateTime<Utc>, date: DateTime<Utc>) -> TimeDelta {
    date.signed_duration_since(anchor)
}

/// Anchor of periodic instance `index`: `base + period × (index − 1)`
///
/// # Errors
/// Returns [`DateError::Overflow`] if the product or sum is out of range.
pub fn periodic_anchor(
    base: DateTime<Utc>,
    period: TimeDelta,
    index: u32,
) -> Result<DateTime<Utc>, DateError> {
    let steps = i64::from(index.saturating_sub(1));
    let total = period
        .num_seconds()
        .checked_mul(steps)
        .ok_or(DateError::Overflow)?;
    apply_offset(base, seconds(total)?)
}

/// Anchor of the next chained instance: `terminal + period`
///
/// # Errors
/// Returns [`DateError::Overflow`] if the sum is out of range.
pub fn chained_anchor(terminal: DateTime<Utc>, period: TimeDelta) -> Result<DateTime<Utc>, DateError> {
    apply_offset(terminal, period)
}
