//! Parses a cron expression and computes its occurrences.
use std::collections::BTreeSet;

use chrono::DateTime;
use chrono::Datelike;
use chrono::Duration;
use chrono::TimeZone;
use chrono::Timelike;
use chrono_tz::Tz;

use crate::dom::DayOfMonth;
use crate::dow::DayOfWeek;
use crate::error::ParseError;
use crate::field;

/// A safety bound on how far forward `next_occurrence`/`occurrences` will scan before
/// concluding a schedule never fires again (a `year` field restricted to the past, say).
const MAX_SCAN_YEARS: i32 = 5;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Schedule {
    source: String,
    seconds: BTreeSet<u32>,
    minutes: BTreeSet<u32>,
    hours: BTreeSet<u32>,
    day_of_month: DayOfMonth,
    months: BTreeSet<u32>,
    day_of_week: DayOfWeek,
    years: Option<BTreeSet<u32>>,
}

impl Schedule {
    /// Parse a 5-, 6-, or 7-field cron expression.
    ///
    /// 5 fields: `minute hour day-of-month month day-of-week`. 6 fields prepend `seconds`.
    /// 7 fields additionally append `year`.
    pub fn parse(expr: &str) -> Result<Schedule, ParseError> {
        let fields: Vec<&str> = expr.split_whitespace().collect();
        let (seconds, minute, hour, dom, month, dow, year) = match fields.len() {
            5 => ("0", fields[0], fields[1], fields[2], fields[3], fields[4], None),
            6 => (fields[0], fields[1], fields[2], fields[3], fields[4], fields[5], None),
            7 => (fields[0], fields[1], fields[2], fields[3], fields[4], fields[5], Some(fields[6])),
            n => return Err(ParseError::WrongFieldCount(n)),
        };

        Ok(Schedule {
            source: expr.to_string(),
            seconds: field::parse_values(&field::SECONDS, seconds)?,
            minutes: field::parse_values(&field::MINUTES, minute)?,
            hours: field::parse_values(&field::HOURS, hour)?,
            day_of_month: DayOfMonth::parse(dom)?,
            months: field::parse_values(&field::MONTHS, month)?,
            day_of_week: DayOfWeek::parse(dow)?,
            years: year.map(|year| field::parse_values(&field::YEARS, year)).transpose()?,
        })
    }

    /// Whether `at` satisfies every field of this schedule.
    ///
    /// When both day-of-month and day-of-week are restricted, a date matches if it satisfies
    /// either one (the traditional cron OR rule for that pair); when only one is restricted,
    /// only that one is enforced.
    pub fn matches<Tz2: TimeZone>(&self, at: &DateTime<Tz2>) -> bool {
        let date = at.date_naive();
        if !self.seconds.contains(&at.second()) {
            return false;
        }
        if !self.minutes.contains(&at.minute()) {
            return false;
        }
        if !self.hours.contains(&at.hour()) {
            return false;
        }
        if !self.months.contains(&at.month()) {
            return false;
        }
        if let Some(years) = &self.years {
            if !years.contains(&(at.year() as u32)) {
                return false;
            }
        }

        let dom_restricted = self.day_of_month.is_restricted();
        let dow_restricted = self.day_of_week.is_restricted();
        match (dom_restricted, dow_restricted) {
            (true, true) => self.day_of_month.matches(date) || self.day_of_week.matches(date),
            (true, false) => self.day_of_month.matches(date),
            (false, true) => self.day_of_week.matches(date),
            (false, false) => true,
        }
    }

    /// The next instant at or after `from` that this schedule fires, in `tz`.
    ///
    /// Nonexistent local times (spring-forward gaps) are skipped; ambiguous local times
    /// (fall-back overlaps) fire at their first occurrence, both handled by stepping through
    /// UTC instants and projecting into `tz` rather than iterating local wall-clock values.
    pub fn next_occurrence(&self, from: DateTime<Tz>) -> Option<DateTime<Tz>> {
        let deadline = from + Duration::days(365 * MAX_SCAN_YEARS as i64);

        if self.seconds.len() < 60 {
            let mut candidate = from + Duration::seconds(1);
            while candidate < deadline {
                if self.matches(&candidate) {
                    return Some(candidate);
                }
                candidate += Duration::seconds(1);
            }
            return None;
        }

        // Seconds unrestricted: every second within a matching minute qualifies, so the very
        // next instant is always worth testing on its own merits before falling back to
        // minute-granularity scanning. Without this check, stepping straight to the next whole
        // minute would skip any still-unexpired seconds left in the current minute.
        let first = from + Duration::seconds(1);
        if first >= deadline {
            return None;
        }
        if self.matches(&first) {
            return Some(first);
        }

        let naive = first.date_naive().and_hms_opt(first.hour(), first.minute(), 0).expect("valid time");
        let start_of_minute = first.timezone().from_local_datetime(&naive).earliest().unwrap_or_else(|| first.clone());
        let mut candidate = start_of_minute + Duration::minutes(1);
        while candidate < deadline {
            if self.matches(&candidate) {
                return Some(candidate);
            }
            candidate += Duration::minutes(1);
        }
        None
    }

    /// All occurrences in `[from, to)`, in `tz`.
    pub fn occurrences(&self, from: DateTime<Tz>, to: DateTime<Tz>) -> Vec<DateTime<Tz>> {
        let mut results = Vec::new();
        let mut cursor = from;
        while cursor < to {
            match self.next_occurrence(cursor) {
                Some(next) if next < to => {
                    results.push(next.clone());
                    cursor = next + Duration::seconds(1);
                }
                _ => break,
            }
        }
        results
    }

    /// A human-readable description of the parsed schedule, built field by field rather than
    /// echoing the raw expression back.
    pub fn describe(&self) -> String {
        let mut parts = vec![
            field::describe(&field::SECONDS, &self.seconds),
            field::describe(&field::MINUTES, &self.minutes),
            field::describe(&field::HOURS, &self.hours),
            self.day_of_month.describe(),
            field::describe(&field::MONTHS, &self.months),
            self.day_of_week.describe(),
        ];
        if let Some(years) = &self.years {
            parts.push(field::describe(&field::YEARS, years));
        }
        parts.join(", ")
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use chrono_tz::UTC;

    use super::*;

    #[test]
    fn five_field_expression_defaults_seconds_to_zero() {
        let schedule = Schedule::parse("30 9 * * *").unwrap();
        let at = UTC.with_ymd_and_hms(2026, 7, 28, 9, 30, 0).unwrap();
        assert!(schedule.matches(&at));
        let wrong_second = UTC.with_ymd_and_hms(2026, 7, 28, 9, 30, 1).unwrap();
        assert!(!schedule.matches(&wrong_second));
    }

    #[test]
    fn six_field_expression_restricts_seconds() {
        let schedule = Schedule::parse("15 30 9 * * *").unwrap();
        let at = UTC.with_ymd_and_hms(2026, 7, 28, 9, 30, 15).unwrap();
        assert!(schedule.matches(&at));
    }

    #[test]
    fn seven_field_expression_restricts_year() {
        let schedule = Schedule::parse("0 0 0 1 1 * 2030").unwrap();
        let in_2030 = UTC.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap();
        let in_2026 = UTC.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        assert!(schedule.matches(&in_2030));
        assert!(!schedule.matches(&in_2026));
    }

    #[test]
    fn dom_and_dow_both_restricted_are_ored() {
        // Fires on the 1st of the month OR on Mondays.
        let schedule = Schedule::parse("0 0 1 * MON").unwrap();
        let first_of_month_tuesday = UTC.with_ymd_and_hms(2026, 9, 1, 0, 0, 0).unwrap();
        let a_monday = UTC.with_ymd_and_hms(2026, 9, 7, 0, 0, 0).unwrap();
        let neither = UTC.with_ymd_and_hms(2026, 9, 8, 0, 0, 0).unwrap();
        assert!(schedule.matches(&first_of_month_tuesday));
        assert!(schedule.matches(&a_monday));
        assert!(!schedule.matches(&neither));
    }

    #[test]
    fn next_occurrence_finds_the_following_day_when_time_has_passed() {
        let schedule = Schedule::parse("0 9 * * *").unwrap();
        let from = UTC.with_ymd_and_hms(2026, 7, 28, 10, 0, 0).unwrap();
        let next = schedule.next_occurrence(from).unwrap();
        assert_eq!(next, UTC.with_ymd_and_hms(2026, 7, 29, 9, 0, 0).unwrap());
    }

    #[test]
    fn occurrences_enumerates_every_match_in_range() {
        let schedule = Schedule::parse("0 12 * * *").unwrap();
        let from = UTC.with_ymd_and_hms(2026, 7, 28, 0, 0, 0).unwrap();
        let to = UTC.with_ymd_and_hms(2026, 7, 31, 0, 0, 0).unwrap();
        let occurrences = schedule.occurrences(from, to);
        assert_eq!(occurrences.len(), 3);
    }

    #[test]
    fn unrestricted_seconds_step_one_second_at_a_time_within_the_minute() {
        let schedule = Schedule::parse("* * * * * *").unwrap();
        let from = UTC.with_ymd_and_hms(2026, 7, 28, 10, 0, 30).unwrap();
        let next = schedule.next_occurrence(from).unwrap();
        assert_eq!(next, UTC.with_ymd_and_hms(2026, 7, 28, 10, 0, 31).unwrap());
    }

    #[test]
    fn unrestricted_seconds_still_roll_over_into_the_next_matching_minute() {
        let schedule = Schedule::parse("* * 9 * * *").unwrap();
        let from = UTC.with_ymd_and_hms(2026, 7, 28, 10, 0, 30).unwrap();
        let next = schedule.next_occurrence(from).unwrap();
        assert_eq!(next, UTC.with_ymd_and_hms(2026, 7, 29, 9, 0, 0).unwrap());
    }

    #[test]
    fn describe_renders_every_field_of_the_parsed_schedule() {
        let schedule = Schedule::parse("30 9 * * MON-FRI").unwrap();
        let description = schedule.describe();
        assert!(description.contains("minute 30"));
        assert!(description.contains("hour 9"));
        assert!(description.contains("any day-of-month"));
        assert!(description.contains("every month"));
        assert!(!description.contains('`'), "description should not just echo the raw expression");
    }

    #[test]
    fn describe_renders_nth_occurrence_day_of_week_modifier() {
        let schedule = Schedule::parse("0 0 ? * FRI#2").unwrap();
        assert!(schedule.describe().contains("2nd FRI of the month"));
    }
}
