//! Parsing for the plain numeric fields: seconds, minutes, hours, month, and year.
//!
//! Day-of-month and day-of-week carry their own modifiers (`L`, `W`, `#`) and are parsed in
//! [`crate::dom`] and [`crate::dow`], which fall back to [`parse_values`] for their
//! comma/range/step list syntax.
use std::collections::BTreeSet;

use crate::error::ParseError;

/// The allowed value range and name aliases (`JAN`, `MON`, ...) for one field.
pub struct FieldSpec {
    pub name: &'static str,
    pub min: u32,
    pub max: u32,
    pub names: &'static [(&'static str, u32)],
}

pub const SECONDS: FieldSpec = FieldSpec { name: "second", min: 0, max: 59, names: &[] };
pub const MINUTES: FieldSpec = FieldSpec { name: "minute", min: 0, max: 59, names: &[] };
pub const HOURS: FieldSpec = FieldSpec { name: "hour", min: 0, max: 23, names: &[] };
pub const MONTHS: FieldSpec = FieldSpec {
    name: "month",
    min: 1,
    max: 12,
    names: &[
        ("JAN", 1), ("FEB", 2), ("MAR", 3), ("APR", 4), ("MAY", 5), ("JUN", 6),
        ("JUL", 7), ("AUG", 8), ("SEP", 9), ("OCT", 10), ("NOV", 11), ("DEC", 12),
    ],
};
pub const DAYS_OF_MONTH: FieldSpec = FieldSpec { name: "day-of-month", min: 1, max: 31, names: &[] };
pub const DAYS_OF_WEEK: FieldSpec = FieldSpec {
    name: "day-of-week",
    min: 0,
    max: 7,
    names: &[
        ("SUN", 0), ("MON", 1), ("TUE", 2), ("WED", 3), ("THU", 4), ("FRI", 5), ("SAT", 6),
    ],
};
pub const YEARS: FieldSpec = FieldSpec { name: "year", min: 1970, max: 2199, names: &[] };

/// Resolve a single token (numeric or a name alias) to its integer value.
fn resolve(spec: &FieldSpec, token: &str) -> Result<u32, ParseError> {
    let upper = token.to_ascii_uppercase();
    for (name, value) in spec.names {
        if *name == upper {
            return Ok(*value);
        }
    }
    token.parse::<u32>().map_err(|_| ParseError::InvalidValue { field: spec.name, value: token.to_string() })
}

/// Render a parsed field's value set as a human-readable fragment, e.g. `"every minute"`,
/// `"hour 9"`, or `"months JAN, JUL"`.
pub fn describe(spec: &FieldSpec, values: &BTreeSet<u32>) -> String {
    let full_range = (spec.max - spec.min + 1) as usize;
    if values.len() >= full_range {
        return format!("every {}", spec.name);
    }
    let rendered: Vec<String> = values.iter().map(|value| render_value(spec, *value)).collect();
    if rendered.len() == 1 {
        format!("{} {}", spec.name, rendered[0])
    } else {
        format!("{}s {}", spec.name, rendered.join(", "))
    }
}

fn render_value(spec: &FieldSpec, value: u32) -> String {
    spec.names
        .iter()
        .find(|(_, v)| *v == value)
        .map(|(name, _)| name.to_string())
        .unwrap_or_else(|| value.to_string())
}

/// Parse one comma-separated field into the set of values it selects.
///
/// Supports `*`, `a`, `a-b` (including reverse ranges, used by day-of-week wraparound),
/// `a/n`, `*/n`, and `a-b/n`, plus name aliases where the field defines them.
pub fn parse_values(spec: &FieldSpec, expr: &str) -> Result<BTreeSet<u32>, ParseError> {
    let mut values = BTreeSet::new();
    for token in expr.split(',') {
        values.extend(parse_token(spec, token)?);
    }
    for value in &values {
        if *value < spec.min || *value > spec.max {
            // Day-of-week allows the 7 alias for Sunday; normalize before range-checking.
            if !(spec.name == "day-of-week" && *value == 7) {
                return Err(ParseError::OutOfRange { field: spec.name, value: *value, min: spec.min, max: spec.max });
            }
        }
    }
    Ok(normalize_dow_alias(spec, values))
}

fn normalize_dow_alias(spec: &FieldSpec, values: BTreeSet<u32>) -> BTreeSet<u32> {
    if spec.name != "day-of-week" {
        return values;
    }
    values.into_iter().map(|value| if value == 7 { 0 } else { value }).collect()
}

fn parse_token(spec: &FieldSpec, token: &str) -> Result<BTreeSet<u32>, ParseError> {
    let (body, step) = match token.split_once('/') {
        Some((body, step)) => {
            let step: u32 = step.parse().map_err(|_| ParseError::InvalidStep(step.to_string()))?;
            if step == 0 {
                return Err(ParseError::InvalidStep(step.to_string()));
            }
            (body, Some(step))
        }
        None => (token, None),
    };

    let (start, end) = if body == "*" {
        (spec.min, spec.max)
    } else if let Some((start, end)) = body.split_once('-') {
        (resolve(spec, start)?, resolve(spec, end)?)
    } else {
        let value = resolve(spec, body)?;
        (value, value)
    };

    let range: Vec<u32> = if start <= end {
        (start..=end).collect()
    } else {
        // Reverse range: wraps across the field's max, used for day-of-week spans like FRI-MON.
        (start..=spec.max).chain(spec.min..=end).collect()
    };

    let step = step.unwrap_or(1);
    Ok(range.into_iter().step_by(step as usize).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcard_selects_full_range() {
        let values = parse_values(&HOURS, "*").unwrap();
        assert_eq!(values.len(), 24);
    }

    #[test]
    fn step_from_wildcard() {
        let values = parse_values(&MINUTES, "*/15").unwrap();
        assert_eq!(values, BTreeSet::from([0, 15, 30, 45]));
    }

    #[test]
    fn comma_list_and_range() {
        let values = parse_values(&HOURS, "1,3,5-7").unwrap();
        assert_eq!(values, BTreeSet::from([1, 3, 5, 6, 7]));
    }

    #[test]
    fn month_names_are_case_insensitive() {
        let values = parse_values(&MONTHS, "jan,Dec").unwrap();
        assert_eq!(values, BTreeSet::from([1, 12]));
    }

    #[test]
    fn reverse_range_wraps_day_of_week() {
        let values = parse_values(&DAYS_OF_WEEK, "FRI-MON").unwrap();
        assert_eq!(values, BTreeSet::from([0, 1, 5, 6]));
    }

    #[test]
    fn sunday_alias_seven_normalizes_to_zero() {
        let values = parse_values(&DAYS_OF_WEEK, "7").unwrap();
        assert_eq!(values, BTreeSet::from([0]));
    }
}
