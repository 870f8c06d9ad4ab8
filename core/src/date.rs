//! Calendar dates as they cross the store boundary (`YYYY-MM-DD`).

use crate::{HistoryError, Result};
use time::format_description::FormatItem;
use time::macros::format_description;
use time::{Date, Duration};

const DATE_FORMAT: &[FormatItem<'static>] = format_description!("[year]-[month]-[day]");

/// Parses a `YYYY-MM-DD` calendar date. Anything else is a validation error.
pub fn parse_date(input: &str) -> Result<Date> {
    Date::parse(input.trim(), DATE_FORMAT)
        .map_err(|e| HistoryError::validation(format!("malformed date {input:?}, expected YYYY-MM-DD: {e}")))
}

pub fn format_date(date: Date) -> String {
    // a date-only description cannot lack components
    date.format(DATE_FORMAT).unwrap_or_else(|_| date.to_string())
}

/// Monday of the ISO week containing `date`.
pub fn week_start(date: Date) -> Date {
    let back = date.weekday().number_days_from_monday();
    date - Duration::days(i64::from(back))
}

pub fn month_start(date: Date) -> Date {
    date.replace_day(1).unwrap_or(date)
}
