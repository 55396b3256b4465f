//! Schedule expression validation.
//!
//! EventBridge accepts `rate(...)` and six-field `cron(...)` expressions:
//! minutes, hours, day-of-month, month, day-of-week, year. Exactly one of
//! day-of-month and day-of-week must be `?`.

use crate::error::{Error, Result};
use crate::rule::Rule;

const MONTHS: &[&str] = &[
    "JAN", "FEB", "MAR", "APR", "MAY", "JUN", "JUL", "AUG", "SEP", "OCT", "NOV", "DEC",
];
const WEEKDAYS: &[&str] = &["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Minutes,
    Hours,
    DayOfMonth,
    Month,
    DayOfWeek,
    Year,
}

impl Kind {
    const ALL: [Kind; 6] = [
        Kind::Minutes,
        Kind::Hours,
        Kind::DayOfMonth,
        Kind::Month,
        Kind::DayOfWeek,
        Kind::Year,
    ];

    fn label(self) -> &'static str {
        match self {
            Kind::Minutes => "minutes",
            Kind::Hours => "hours",
            Kind::DayOfMonth => "day-of-month",
            Kind::Month => "month",
            Kind::DayOfWeek => "day-of-week",
            Kind::Year => "year",
        }
    }

    fn bounds(self) -> (u32, u32) {
        match self {
            Kind::Minutes => (0, 59),
            Kind::Hours => (0, 23),
            Kind::DayOfMonth => (1, 31),
            Kind::Month => (1, 12),
            Kind::DayOfWeek => (1, 7),
            Kind::Year => (1970, 2199),
        }
    }

    fn names(self) -> &'static [&'static str] {
        match self {
            Kind::Month => MONTHS,
            Kind::DayOfWeek => WEEKDAYS,
            _ => &[],
        }
    }
}

/// Validate every rule's schedule, reporting all failures at once
///
/// The error lists one `rule "name": reason` line per invalid rule, in
/// config order.
pub fn validate_rules(rules: &[Rule]) -> Result<()> {
    let failures: Vec<String> = rules
        .iter()
        .filter_map(|rule| {
            validate_schedule(&rule.schedule_expression)
                .err()
                .map(|reason| format!("rule {:?}: {reason}", rule.name))
        })
        .collect();
    if failures.is_empty() {
        Ok(())
    } else {
        Err(Error::CronSyntax(failures.join("\n")))
    }
}

/// Validate one schedule expression
pub fn validate_schedule(expr: &str) -> std::result::Result<(), String> {
    if expr.starts_with("rate(") {
        return Ok(());
    }
    let Some(rest) = expr.strip_prefix("cron(") else {
        return Err(format!(
            "schedule expression {expr:?} must start with \"cron(\" or \"rate(\""
        ));
    };
    let Some(inner) = rest.strip_suffix(')') else {
        return Err(format!("cron expression {expr:?} must end with \")\""));
    };
    if inner.trim() != inner {
        return Err(format!(
            "cron expression {expr:?} must not have spaces just inside the parentheses"
        ));
    }

    let fields: Vec<&str> = inner.split_whitespace().collect();
    if fields.len() != Kind::ALL.len() {
        return Err(format!(
            "cron expression {expr:?} must have 6 fields, found {}",
            fields.len()
        ));
    }
    let (dom, dow) = (fields[2], fields[4]);
    if (dom == "?") == (dow == "?") {
        return Err(format!(
            "cron expression {expr:?} must use \"?\" in exactly one of day-of-month and day-of-week"
        ));
    }

    for (field, kind) in fields.iter().zip(Kind::ALL) {
        validate_field(field, kind)
            .map_err(|item| format!("invalid {} field {item:?} in {expr:?}", kind.label()))?;
    }
    Ok(())
}

/// Validate one field; on failure returns the offending item
fn validate_field(field: &str, kind: Kind) -> std::result::Result<(), String> {
    if field == "?" {
        return match kind {
            Kind::DayOfMonth | Kind::DayOfWeek => Ok(()),
            _ => Err(field.to_string()),
        };
    }
    for item in field.split(',') {
        if !valid_item(item, kind) {
            return Err(item.to_string());
        }
    }
    Ok(())
}

fn valid_item(item: &str, kind: Kind) -> bool {
    match kind {
        Kind::DayOfMonth => {
            if item == "L" || item == "LW" {
                return true;
            }
            if let Some(day) = item.strip_suffix('W') {
                return valid_value(day, kind);
            }
        }
        Kind::DayOfWeek => {
            if item == "L" {
                return true;
            }
            if let Some(day) = item.strip_suffix('L') {
                return valid_value(day, kind);
            }
            if let Some((day, nth)) = item.split_once('#') {
                return valid_value(day, kind) && nth.parse::<u32>().is_ok_and(|n| (1..=5).contains(&n));
            }
        }
        _ => {}
    }

    let (base, step) = match item.split_once('/') {
        Some((base, step)) => (base, Some(step)),
        None => (item, None),
    };
    if let Some(step) = step
        && !step.parse::<u32>().is_ok_and(|n| n >= 1)
    {
        return false;
    }
    if base == "*" {
        return true;
    }
    match base.split_once('-') {
        Some((from, to)) => valid_value(from, kind) && valid_value(to, kind),
        None => valid_value(base, kind),
    }
}

fn valid_value(value: &str, kind: Kind) -> bool {
    let (min, max) = kind.bounds();
    if let Ok(n) = value.parse::<u32>() {
        return (min..=max).contains(&n);
    }
    kind.names()
        .iter()
        .any(|name| name.eq_ignore_ascii_case(value))
}
