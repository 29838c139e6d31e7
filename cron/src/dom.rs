//! Day-of-month field: plain value lists plus the `L`, `L-k`, `LW`, and `dW` modifiers.
use std::collections::BTreeSet;

use chrono::Datelike;
use chrono::NaiveDate;
use chrono::Weekday;

use crate::error::ParseError;
use crate::field;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DayOfMonth {
    /// `*` or `?`: no constraint.
    Any,
    /// Explicit values, ranges, steps, or lists thereof.
    List(BTreeSet<u32>),
    /// `L`: the last day of the month.
    Last,
    /// `L-k`: `k` days before the last day of the month.
    LastMinus(u32),
    /// `LW`: the last weekday (Mon-Fri) of the month.
    LastWeekday,
    /// `dW`: the weekday nearest to day `d`, without crossing into an adjacent month.
    NearestWeekday(u32),
}

impl DayOfMonth {
    pub fn parse(expr: &str) -> Result<DayOfMonth, ParseError> {
        if expr == "*" || expr == "?" {
            return Ok(DayOfMonth::Any);
        }
        if expr == "L" {
            return Ok(DayOfMonth::Last);
        }
        if expr == "LW" {
            return Ok(DayOfMonth::LastWeekday);
        }
        if let Some(rest) = expr.strip_prefix("L-") {
            let offset: u32 = rest.parse().map_err(|_| ParseError::InvalidValue { field: "day-of-month", value: expr.to_string() })?;
            return Ok(DayOfMonth::LastMinus(offset));
        }
        if let Some(day) = expr.strip_suffix('W') {
            let day: u32 = day.parse().map_err(|_| ParseError::InvalidValue { field: "day-of-month", value: expr.to_string() })?;
            return Ok(DayOfMonth::NearestWeekday(day));
        }
        Ok(DayOfMonth::List(field::parse_values(&field::DAYS_OF_MONTH, expr)?))
    }

    pub fn is_restricted(&self) -> bool {
        !matches!(self, DayOfMonth::Any)
    }

    /// A human-readable fragment describing this constraint.
    pub fn describe(&self) -> String {
        match self {
            DayOfMonth::Any => "any day-of-month".to_string(),
            DayOfMonth::List(values) => field::describe(&field::DAYS_OF_MONTH, values),
            DayOfMonth::Last => "the last day of the month".to_string(),
            DayOfMonth::LastMinus(offset) => format!("{offset} day(s) before the last day of the month"),
            DayOfMonth::LastWeekday => "the last weekday of the month".to_string(),
            DayOfMonth::NearestWeekday(day) => format!("the weekday nearest day {day}"),
        }
    }

    /// Whether `date` satisfies this constraint.
    pub fn matches(&self, date: NaiveDate) -> bool {
        match self {
            DayOfMonth::Any => true,
            DayOfMonth::List(values) => values.contains(&date.day()),
            DayOfMonth::Last => date.day() == last_day_of_month(date),
            DayOfMonth::LastMinus(offset) => date.day() + offset == last_day_of_month(date),
            DayOfMonth::LastWeekday => date.day() == last_weekday_of_month(date),
            DayOfMonth::NearestWeekday(day) => date.day() == nearest_weekday(date, *day),
        }
    }
}

fn last_day_of_month(date: NaiveDate) -> u32 {
    let (year, month) = (date.year(), date.month());
    let next_month = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)
    };
    next_month.expect("valid calendar month").pred_opt().expect("has a predecessor").day()
}

fn last_weekday_of_month(date: NaiveDate) -> u32 {
    let last = last_day_of_month(date);
    let mut day = last;
    loop {
        let candidate = NaiveDate::from_ymd_opt(date.year(), date.month(), day).expect("day within month");
        if !matches!(candidate.weekday(), Weekday::Sat | Weekday::Sun) {
            return day;
        }
        day -= 1;
    }
}

/// The weekday nearest to `day`, staying within the same month (never crossing into the
/// previous or next month).
fn nearest_weekday(date: NaiveDate, day: u32) -> u32 {
    let last = last_day_of_month(date);
    let day = day.min(last);
    let candidate = NaiveDate::from_ymd_opt(date.year(), date.month(), day).expect("day within month");
    match candidate.weekday() {
        Weekday::Sat if day > 1 => day - 1,
        Weekday::Sat => day + 2,
        Weekday::Sun if day < last => day + 1,
        Weekday::Sun => day - 2,
        _ => day,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_day_handles_leap_february() {
        let date = NaiveDate::from_ymd_opt(2024, 2, 1).unwrap();
        assert_eq!(last_day_of_month(date), 29);
    }

    #[test]
    fn last_weekday_skips_weekend() {
        // 2026-08-31 is a Monday, so the last weekday is the month's last day itself.
        let date = NaiveDate::from_ymd_opt(2026, 8, 1).unwrap();
        assert_eq!(last_weekday_of_month(date), 31);
    }

    #[test]
    fn nearest_weekday_pulls_saturday_back() {
        // 2026-08-01 is a Saturday; nearest weekday should be Friday the 31st of July logic
        // replaced here with a same-month case: 2026-08-15 is a Saturday.
        let date = NaiveDate::from_ymd_opt(2026, 8, 1).unwrap();
        assert_eq!(nearest_weekday(date, 15), 14);
    }

    #[test]
    fn nearest_weekday_never_crosses_month_boundary() {
        let date = NaiveDate::from_ymd_opt(2026, 8, 1).unwrap();
        // Day 1 is a Saturday; pulling back would cross into July, so it pushes forward instead.
        assert_eq!(nearest_weekday(date, 1), 3);
    }
}
