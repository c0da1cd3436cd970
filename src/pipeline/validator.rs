use chrono::{DateTime, NaiveDate, NaiveDateTime};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::constants::*;
use crate::error::{ValidationError, ValidationRule};
use crate::types::{DecodedRecord, GeoPoint, ValidatedRecord};

static POINT_WKT: Lazy<Regex> = Lazy::new(|| {
    let number = r"[+-]?(?:\d+(?:\.\d*)?|\.\d+)(?:[eE][+-]?\d+)?";
    Regex::new(&format!(r"(?i)^\s*POINT\s*\(\s*({number})\s+({number})\s*\)\s*$"))
        .expect("point pattern is a valid regex")
});

/// Naive layouts tried after RFC 3339. `%.f` also matches a missing fraction.
const NAIVE_LAYOUTS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

/// Check every field of a decoded record.
///
/// Fields are checked in record order and the first broken rule is reported.
/// Values are not rewritten; coordinates and the timestamp are only parsed
/// into the types the `events` table stores.
pub fn validate(record: DecodedRecord) -> Result<ValidatedRecord, ValidationError> {
    check_text(FIELD_REGION, &record.region)?;
    let origin = parse_point(ALIAS_ORIGIN, &record.origin_coordinate)?;
    let destination = parse_point(ALIAS_DESTINATION, &record.destination_coordinate)?;
    let event_time = parse_event_time(&record.event_time).ok_or_else(|| {
        ValidationError::new(
            ALIAS_EVENT_TIME,
            ValidationRule::InvalidTimestamp(record.event_time.clone()),
        )
    })?;
    check_text(ALIAS_DATA_SOURCE, &record.data_source)?;

    Ok(ValidatedRecord::new(
        record.region,
        origin,
        destination,
        event_time,
        record.data_source,
    ))
}

fn check_text(field: &'static str, value: &str) -> Result<(), ValidationError> {
    if value.is_empty() {
        return Err(ValidationError::new(field, ValidationRule::Empty));
    }
    if value.contains('\0') {
        return Err(ValidationError::new(field, ValidationRule::NulCharacter));
    }
    let len = value.chars().count();
    if len > MAX_TEXT_LEN {
        return Err(ValidationError::new(
            field,
            ValidationRule::TooLong {
                len,
                max: MAX_TEXT_LEN,
            },
        ));
    }
    Ok(())
}

/// Parse `POINT (x y)` well-known text. Both ordinates must be finite.
pub fn parse_point(field: &'static str, raw: &str) -> Result<GeoPoint, ValidationError> {
    let invalid = || ValidationError::new(field, ValidationRule::InvalidGeometry(raw.to_string()));

    let captures = POINT_WKT.captures(raw).ok_or_else(invalid)?;
    let x: f64 = captures[1].parse().map_err(|_| invalid())?;
    let y: f64 = captures[2].parse().map_err(|_| invalid())?;
    if !x.is_finite() || !y.is_finite() {
        return Err(invalid());
    }
    Ok(GeoPoint::new(x, y))
}

/// Parse an ISO-8601 timestamp into naive UTC.
pub fn parse_event_time(raw: &str) -> Option<NaiveDateTime> {
    if let Ok(with_offset) = DateTime::parse_from_rfc3339(raw) {
        return Some(with_offset.naive_utc());
    }
    for layout in NAIVE_LAYOUTS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, layout) {
            return Some(naive);
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|day| day.and_hms_opt(0, 0, 0))
}
