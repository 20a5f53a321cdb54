//! Value checks applied before rows reach the database.
//!
//! The table CHECKs only test shape (`LIKE '____-__-__'`, `LIKE '__:__'`) and
//! a lexical range, so `2024-13-40` or `23:99` would pass them. These helpers
//! are stricter: dates must exist on the calendar and times must be real
//! clock times, with `24:00` accepted as the end-of-day sentinel.

use chrono::NaiveDate;

use crate::db::models::{bike_type, BlockRecord, DaySummary, VisitRecord, Weather};
use crate::error::StoreError;

pub const DATE_MIN: &str = "2000-01-01";
pub const DATE_MAX: &str = "2100-01-01";
pub const END_OF_DAY: &str = "24:00";

/// `YYYY-MM-DD`, a real calendar date, within `[DATE_MIN, DATE_MAX]`.
pub fn is_valid_date(value: &str) -> bool {
    if !matches_shape(value, "dddd-dd-dd") {
        return false;
    }
    if NaiveDate::parse_from_str(value, "%Y-%m-%d").is_err() {
        return false;
    }
    (DATE_MIN..=DATE_MAX).contains(&value)
}

/// `HH:MM` between `00:00` and `24:00` inclusive.
pub fn is_valid_time(value: &str) -> bool {
    if !matches_shape(value, "dd:dd") {
        return false;
    }
    if value == END_OF_DAY {
        return true;
    }
    let (hours, minutes) = value.split_at(2);
    match (hours.parse::<u8>(), minutes[1..].parse::<u8>()) {
        (Ok(h), Ok(m)) => h < 24 && m < 60,
        _ => false,
    }
}

pub fn is_valid_bike_type(value: &str) -> bool {
    value == bike_type::REGULAR || value == bike_type::OVERSIZE
}

// 'd' is an ASCII digit, anything else must match literally.
fn matches_shape(value: &str, shape: &str) -> bool {
    value.len() == shape.len()
        && value.bytes().zip(shape.bytes()).all(|(v, s)| match s {
            b'd' => v.is_ascii_digit(),
            other => v == other,
        })
}

fn check_time(entity: &'static str, key: &str, field: &str, value: Option<&str>) -> Result<(), StoreError> {
    match value {
        Some(t) if !is_valid_time(t) => Err(StoreError::constraint(
            entity,
            key,
            format!("{} '{}' is not an HH:MM time between 00:00 and 24:00", field, t),
        )),
        _ => Ok(()),
    }
}

fn check_count(entity: &'static str, key: &str, field: &str, value: Option<i32>) -> Result<(), StoreError> {
    match value {
        Some(n) if n < 0 => Err(StoreError::constraint(entity, key, format!("{} must not be negative (got {})", field, n))),
        _ => Ok(()),
    }
}

pub fn check_date(key: &str, date: &str) -> Result<(), StoreError> {
    if is_valid_date(date) {
        Ok(())
    } else {
        Err(StoreError::constraint(
            "day",
            key,
            format!("date '{}' is not a YYYY-MM-DD date between {} and {}", date, DATE_MIN, DATE_MAX),
        ))
    }
}

pub fn check_summary(key: &str, summary: &DaySummary) -> Result<(), StoreError> {
    check_time("day", key, "time_open", summary.time_open.as_deref())?;
    check_time("day", key, "time_closed", summary.time_closed.as_deref())?;
    check_count("day", key, "num_parked_regular", summary.num_parked_regular)?;
    check_count("day", key, "num_parked_oversize", summary.num_parked_oversize)?;
    check_count("day", key, "num_parked_combined", summary.num_parked_combined)?;
    check_count("day", key, "num_registrations", summary.num_registrations)
}

pub fn check_weather(key: &str, weather: &Weather) -> Result<(), StoreError> {
    check_time("day", key, "dusk", weather.dusk.as_deref())?;
    match weather.precipitation {
        Some(p) if p < 0.0 || p.is_nan() => Err(StoreError::constraint(
            "day",
            key,
            format!("precipitation must not be negative (got {})", p),
        )),
        _ => Ok(()),
    }
}

pub fn check_visit(key: &str, index: usize, visit: &VisitRecord) -> Result<(), StoreError> {
    let row_key = format!("{} #{}", key, index + 1);
    check_time("visit", &row_key, "time_in", Some(&visit.time_in))?;
    check_count("visit", &row_key, "duration", visit.duration)?;
    if !is_valid_bike_type(&visit.bike_type) {
        return Err(StoreError::constraint(
            "visit",
            row_key,
            format!("bike_type '{}' must be 'R' or 'O'", visit.bike_type),
        ));
    }
    Ok(())
}

pub fn check_block(key: &str, block: &BlockRecord) -> Result<(), StoreError> {
    let row_key = format!("{} @{}", key, block.time_start);
    check_time("block", &row_key, "time_start", Some(&block.time_start))?;
    check_time("block", &row_key, "time_most_full", block.time_most_full.as_deref())?;
    for (field, value) in [
        ("num_regular_at_start", block.num_regular_at_start),
        ("num_oversize_at_start", block.num_oversize_at_start),
        ("num_regular_at_end", block.num_regular_at_end),
        ("num_oversize_at_end", block.num_oversize_at_end),
        ("num_bikes_at_start", block.num_bikes_at_start),
        ("num_bikes_at_end", block.num_bikes_at_end),
        ("num_most_full", block.num_most_full),
    ] {
        check_count("block", &row_key, field, Some(value))?;
    }
    Ok(())
}
