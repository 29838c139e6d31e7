//! Day-of-week field: plain value lists plus the `d#n` (nth occurrence) and `dL` (last
//! occurrence) modifiers.
use std::collections::BTreeSet;

use chrono::Datelike;
use chrono::NaiveDate;

use crate::error::ParseError;
use crate::field;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DayOfWeek {
    /// `*` or `?`: no constraint.
    Any,
    /// Explicit weekdays (`0`/`7` = Sunday), ranges, steps, or lists thereof.
    List(BTreeSet<u32>),
    /// `d#n`: the `n`-th occurrence of weekday `d` in the month.
    NthOccurrence(u32, u32),
    /// `dL`: the last occurrence of weekday `d` in the month.
    LastOccurrence(u32),
}

impl DayOfWeek {
    pub fn parse(expr: &str) -> Result<DayOfWeek, ParseError> {
        if expr == "*" || expr == "?" {
            return Ok(DayOfWeek::Any);
        }
        if let Some((weekday, n)) = expr.split_once('#') {
            let weekday = resolve_weekday(weekday)?;
            let n: u32 = n.parse().map_err(|_| ParseError::InvalidValue { field: "day-of-week", value: expr.to_string() })?;
            return Ok(DayOfWeek::NthOccurrence(weekday, n));
        }
        if let Some(weekday) = expr.strip_suffix('L') {
            if !weekday.is_empty() {
                let weekday = resolve_weekday(weekday)?;
                return Ok(DayOfWeek::LastOccurrence(weekday));
            }
        }
        Ok(DayOfWeek::List(field::parse_values(&field::DAYS_OF_WEEK, expr)?))
    }

    pub fn is_restricted(&self) -> bool {
        !matches!(self, DayOfWeek::Any)
    }

    pub fn matches(&self, date: NaiveDate) -> bool {
        let weekday = normalized_weekday(date);
        match self {
            DayOfWeek::Any => true,
            DayOfWeek::List(values) => values.contains(&weekday),
            DayOfWeek::NthOccurrence(target, n) => weekday == *target && occurrence_in_month(date) == *n,
            DayOfWeek::LastOccurrence(target) => weekday == *target && is_last_occurrence_in_month(date),
        }
    }

    /// A human-readable fragment describing this constraint.
    pub fn describe(&self) -> String {
        match self {
            DayOfWeek::Any => "any day-of-week".to_string(),
            DayOfWeek::List(values) => field::describe(&field::DAYS_OF_WEEK, values),
            DayOfWeek::NthOccurrence(weekday, n) => format!("the {} {} of the month", ordinal(*n), weekday_name(*weekday)),
            DayOfWeek::LastOccurrence(weekday) => format!("the last {} of the month", weekday_name(*weekday)),
        }
    }
}

fn weekday_name(value: u32) -> &'static str {
    field::DAYS_OF_WEEK
        .names
        .iter()
        .find(|(_, v)| *v == value)
        .map(|(name, _)| *name)
        .unwrap_or("day")
}

fn ordinal(n: u32) -> String {
    let suffix = match (n % 10, n % 100) {
        (1, 11) => "th",
        (1, _) => "st",
        (2, 12) => "th",
        (2, _) => "nd",
        (3, 13) => "th",
        (3, _) => "rd",
        _ => "th",
    };
    format!("{n}{suffix}")
}

fn resolve_weekday(token: &str) -> Result<u32, ParseError> {
    let values = field::parse_values(&field::DAYS_OF_WEEK, token)?;
    values.into_iter().next().ok_or_else(|| ParseError::InvalidValue { field: "day-of-week", value: token.to_string() })
}

fn normalized_weekday(date: NaiveDate) -> u32 {
    date.weekday().num_days_from_sunday()
}

/// Which occurrence of its weekday this date is within its month (1-indexed).
fn occurrence_in_month(date: NaiveDate) -> u32 {
    (date.day() - 1) / 7 + 1
}

fn is_last_occurrence_in_month(date: NaiveDate) -> bool {
    date.day() + 7 > days_in_month(date)
}

fn days_in_month(date: NaiveDate) -> u32 {
    let (year, month) = (date.year(), date.month());
    let next_month = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)
    };
    next_month.expect("valid calendar month").pred_opt().expect("has a predecessor").day()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nth_occurrence_matches_only_that_week() {
        let dow = DayOfWeek::parse("FRI#2").unwrap();
        // 2026-08-14 is the second Friday of August 2026.
        assert!(dow.matches(NaiveDate::from_ymd_opt(2026, 8, 14).unwrap()));
        assert!(!dow.matches(NaiveDate::from_ymd_opt(2026, 8, 7).unwrap()));
    }

    #[test]
    fn fifth_occurrence_is_skipped_when_absent() {
        let dow = DayOfWeek::parse("FRI#5").unwrap();
        // August 2026 has only four Fridays.
        let none_match = (1..=31).filter_map(|day| NaiveDate::from_ymd_opt(2026, 8, day)).any(|date| dow.matches(date));
        assert!(!none_match);
    }

    #[test]
    fn last_occurrence_matches_final_weekday_instance() {
        let dow = DayOfWeek::parse("MONL").unwrap();
        // 2026-08-31 is the last Monday of August 2026.
        assert!(dow.matches(NaiveDate::from_ymd_opt(2026, 8, 31).unwrap()));
        assert!(!dow.matches(NaiveDate::from_ymd_opt(2026, 8, 24).unwrap()));
    }
}
