/// Timer calendar
///
/// Resolves ISO-8601 timer expressions to fire dates:
/// - dates: `2026-01-01T09:00:00Z`
/// - durations: `PT5M`, `P1DT12H`, `P2W`
/// - repeat cycles: `R3/PT10M`, `R/2026-01-01T00:00:00Z/P1D`, `R5/PT1H/2026-03-01T00:00:00Z`

use crate::definition::types::Activity;
use crate::error::{EngineError, EngineResult};
use chrono::{DateTime, Months, TimeDelta, Utc};
use std::fmt;

/// An ISO-8601 duration (`PnYnMnWnDTnHnMnS`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IsoDuration {
    months: u32,
    days: i64,
    millis: i64,
    source: String,
}

impl IsoDuration {
    pub fn parse(expression: &str) -> EngineResult<Self> {
        let body = expression
            .strip_prefix('P')
            .ok_or_else(|| EngineError::invalid_timer(expression, "duration must start with 'P'"))?;

        let (date_part, time_part) = match body.split_once('T') {
            Some((date, time)) => (date, Some(time)),
            None => (body, None),
        };

        let mut months: u32 = 0;
        let mut days: i64 = 0;
        let mut millis: i64 = 0;

        for (value, unit) in components(expression, date_part)? {
            let whole = whole_number(expression, value)?;
            match unit {
                'Y' => months = add_months(expression, months, whole, 12)?,
                'M' => months = add_months(expression, months, whole, 1)?,
                'W' => days = add_scaled(expression, days, whole, 7)?,
                'D' => days = add_scaled(expression, days, whole, 1)?,
                other => return Err(EngineError::invalid_timer(expression, format!("unknown date unit '{other}'"))),
            }
        }

        if let Some(time_part) = time_part {
            if time_part.is_empty() {
                return Err(EngineError::invalid_timer(expression, "empty time section"));
            }
            for (value, unit) in components(expression, time_part)? {
                match unit {
                    'H' => millis = add_scaled(expression, millis, whole_number(expression, value)?, 3_600_000)?,
                    'M' => millis = add_scaled(expression, millis, whole_number(expression, value)?, 60_000)?,
                    'S' => millis = add_scaled(expression, millis, seconds_as_millis(expression, value)?, 1)?,
                    other => return Err(EngineError::invalid_timer(expression, format!("unknown time unit '{other}'"))),
                }
            }
        }

        if months == 0 && days <= 0 && millis <= 0 {
            return Err(EngineError::invalid_timer(expression, "duration must be positive"));
        }

        // Both parts must be representable before they are ever applied to a date
        if TimeDelta::try_days(days).is_none() || TimeDelta::try_milliseconds(millis).is_none() {
            return Err(EngineError::invalid_timer(expression, OUT_OF_RANGE));
        }

        Ok(Self {
            months,
            days,
            millis,
            source: expression.to_string(),
        })
    }

    /// Add the duration to a point in time, using calendar months
    pub fn add_to(&self, start: DateTime<Utc>) -> EngineResult<DateTime<Utc>> {
        let days = TimeDelta::try_days(self.days);
        let millis = TimeDelta::try_milliseconds(self.millis);
        start
            .checked_add_months(Months::new(self.months))
            .zip(days)
            .and_then(|(dt, days)| dt.checked_add_signed(days))
            .zip(millis)
            .and_then(|(dt, millis)| dt.checked_add_signed(millis))
            .ok_or_else(|| EngineError::invalid_timer(&self.source, "date out of range"))
    }
}

impl fmt::Display for IsoDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// Split `3Y2M` into [("3", 'Y'), ("2", 'M')]
fn components<'a>(expression: &str, section: &'a str) -> EngineResult<Vec<(&'a str, char)>> {
    let mut parts = Vec::new();
    let mut start = 0;
    for (i, c) in section.char_indices() {
        if c.is_ascii_alphabetic() {
            let value = &section[start..i];
            if value.is_empty() {
                return Err(EngineError::invalid_timer(expression, format!("missing value before '{c}'")));
            }
            parts.push((value, c));
            start = i + c.len_utf8();
        }
    }
    if start != section.len() {
        return Err(EngineError::invalid_timer(expression, "trailing characters without unit"));
    }
    Ok(parts)
}

const OUT_OF_RANGE: &str = "duration out of range";

fn add_months(expression: &str, months: u32, value: i64, factor: u32) -> EngineResult<u32> {
    u32::try_from(value)
        .ok()
        .and_then(|v| v.checked_mul(factor))
        .and_then(|v| months.checked_add(v))
        .ok_or_else(|| EngineError::invalid_timer(expression, OUT_OF_RANGE))
}

fn add_scaled(expression: &str, total: i64, value: i64, factor: i64) -> EngineResult<i64> {
    value
        .checked_mul(factor)
        .and_then(|v| total.checked_add(v))
        .ok_or_else(|| EngineError::invalid_timer(expression, OUT_OF_RANGE))
}

/// Seconds may carry a fraction (`1.5`); signs and exponents are rejected
fn seconds_as_millis(expression: &str, value: &str) -> EngineResult<i64> {
    let invalid = || EngineError::invalid_timer(expression, format!("invalid seconds '{value}'"));
    if !value.chars().all(|c| c.is_ascii_digit() || c == '.') {
        return Err(invalid());
    }
    let seconds: f64 = value.parse().map_err(|_| invalid())?;
    let millis = (seconds * 1000.0).round();
    if !millis.is_finite() || millis < 0.0 || millis >= i64::MAX as f64 {
        return Err(EngineError::invalid_timer(expression, OUT_OF_RANGE));
    }
    Ok(millis as i64)
}

fn whole_number(expression: &str, value: &str) -> EngineResult<i64> {
    value
        .parse::<i64>()
        .ok()
        .filter(|n| *n >= 0)
        .ok_or_else(|| EngineError::invalid_timer(expression, format!("invalid number '{value}'")))
}

/// Parse an RFC-3339 date
pub fn resolve_date(expression: &str) -> EngineResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(expression)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| EngineError::invalid_timer(expression, e.to_string()))
}

/// An ISO-8601 repeating interval (`R[n]/[start/]duration[/end]`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepeatExpression {
    /// Remaining firings including the next one; `None` repeats forever
    pub repetitions: Option<u32>,
    pub start: Option<DateTime<Utc>>,
    pub duration: IsoDuration,
    pub end: Option<DateTime<Utc>>,
}

impl RepeatExpression {
    pub fn parse(expression: &str) -> EngineResult<Self> {
        let mut parts = expression.split('/');
        let head = parts.next().unwrap_or_default();
        let count = head
            .strip_prefix('R')
            .ok_or_else(|| EngineError::invalid_timer(expression, "cycle must start with 'R'"))?;

        let repetitions = if count.is_empty() {
            None
        } else {
            let n: u32 = count
                .parse()
                .map_err(|_| EngineError::invalid_timer(expression, format!("invalid repetition count '{count}'")))?;
            if n == 0 {
                return Err(EngineError::invalid_timer(expression, "repetition count must be positive"));
            }
            Some(n)
        };

        let rest: Vec<&str> = parts.collect();
        let (start, duration, end) = match rest.as_slice() {
            [duration] => (None, IsoDuration::parse(duration)?, None),
            [first, second] if first.starts_with('P') => {
                (None, IsoDuration::parse(first)?, Some(resolve_date(second)?))
            }
            [first, second] => (Some(resolve_date(first)?), IsoDuration::parse(second)?, None),
            _ => return Err(EngineError::invalid_timer(expression, "expected R[n]/[start/]duration[/end]")),
        };

        Ok(Self { repetitions, start, duration, end })
    }

    /// First fire date: the explicit start, or one period from now
    pub fn first_due(&self, now: DateTime<Utc>) -> EngineResult<DateTime<Utc>> {
        match self.start {
            Some(start) => Ok(start),
            None => self.duration.add_to(now),
        }
    }

    /// Next fire date after a firing at `previous`, with the remaining cycle
    ///
    /// Returns `None` once the repetitions are used up or the end date has passed.
    pub fn next_after(&self, previous: DateTime<Utc>) -> EngineResult<Option<(DateTime<Utc>, RepeatExpression)>> {
        let remaining = match self.repetitions {
            Some(1) => return Ok(None),
            Some(n) => Some(n - 1),
            None => None,
        };

        let next = self.duration.add_to(previous)?;
        if self.end.is_some_and(|end| next > end) {
            return Ok(None);
        }

        Ok(Some((
            next,
            RepeatExpression {
                repetitions: remaining,
                start: None,
                duration: self.duration.clone(),
                end: self.end,
            },
        )))
    }
}

impl fmt::Display for RepeatExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.repetitions {
            Some(n) => write!(f, "R{n}/")?,
            None => f.write_str("R/")?,
        }
        if let Some(start) = self.start {
            write!(f, "{}/", start.to_rfc3339())?;
        }
        write!(f, "{}", self.duration)?;
        if let Some(end) = self.end {
            write!(f, "/{}", end.to_rfc3339())?;
        }
        Ok(())
    }
}

/// Timer definition of a timer catch activity
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimerDeclaration {
    Date(String),
    Duration(String),
    Cycle(String),
}

impl TimerDeclaration {
    /// Read and validate the timer params of an activity
    pub fn from_activity(activity: &Activity) -> EngineResult<Self> {
        let declaration = if let Some(date) = activity.param_str("date") {
            TimerDeclaration::Date(date.to_string())
        } else if let Some(duration) = activity.param_str("duration") {
            TimerDeclaration::Duration(duration.to_string())
        } else if let Some(cycle) = activity.param_str("cycle") {
            TimerDeclaration::Cycle(cycle.to_string())
        } else {
            return Err(EngineError::IllegalArgument(format!(
                "timer '{}' requires one of 'date', 'duration' or 'cycle'",
                activity.id
            )));
        };

        declaration.validate()?;
        Ok(declaration)
    }

    fn validate(&self) -> EngineResult<()> {
        match self {
            TimerDeclaration::Date(expression) => resolve_date(expression).map(|_| ()),
            TimerDeclaration::Duration(_) | TimerDeclaration::Cycle(_) => {
                self.resolve_due_date(Utc::now()).map(|_| ())
            }
        }
    }

    pub fn resolve_due_date(&self, now: DateTime<Utc>) -> EngineResult<DateTime<Utc>> {
        match self {
            TimerDeclaration::Date(expression) => resolve_date(expression),
            TimerDeclaration::Duration(expression) => IsoDuration::parse(expression)?.add_to(now),
            TimerDeclaration::Cycle(expression) => RepeatExpression::parse(expression)?.first_due(now),
        }
    }

    /// Repeat expression stored on the job, for cycles
    pub fn repeat(&self) -> EngineResult<Option<RepeatExpression>> {
        match self {
            TimerDeclaration::Cycle(expression) => Ok(Some(RepeatExpression::parse(expression)?)),
            _ => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    #[test]
    fn parses_durations() {
        let start = at(2026, 1, 31, 10, 0);
        assert_eq!(IsoDuration::parse("PT5M").unwrap().add_to(start).unwrap(), at(2026, 1, 31, 10, 5));
        assert_eq!(IsoDuration::parse("P1DT2H").unwrap().add_to(start).unwrap(), at(2026, 2, 1, 12, 0));
        assert_eq!(IsoDuration::parse("P2W").unwrap().add_to(start).unwrap(), at(2026, 2, 14, 10, 0));
        // calendar months clamp to the end of the month
        assert_eq!(IsoDuration::parse("P1M").unwrap().add_to(start).unwrap(), at(2026, 2, 28, 10, 0));
        assert_eq!(
            IsoDuration::parse("PT1.5S").unwrap().add_to(start).unwrap(),
            start + TimeDelta::milliseconds(1500)
        );
    }

    #[test]
    fn rejects_malformed_durations() {
        for bad in ["5M", "P", "PT", "P1X", "PTM", "PT5", "P-1D", "P0D"] {
            assert!(IsoDuration::parse(bad).is_err(), "{bad} should be rejected");
        }
    }

    #[test]
    fn rejects_negative_and_empty_seconds() {
        for bad in ["PT-5S", "PT1M-60S", "PT+5S", "PT1e3S", "PTinfS", "PTNaNS", "PT0.0001S", "PT0S"] {
            assert!(IsoDuration::parse(bad).is_err(), "{bad} should be rejected");
        }
        assert!(IsoDuration::parse("PT0.5S").is_ok());
    }

    #[test]
    fn out_of_range_durations_are_errors() {
        for huge in ["P400000000Y", "P5000000000M", "PT9999999999999H", "PT999999999999999M", "P200000000000000D"] {
            match IsoDuration::parse(huge) {
                Err(EngineError::InvalidTimerExpression { reason, .. }) => {
                    assert_eq!(reason, "duration out of range", "{huge}")
                }
                other => panic!("{huge} should be out of range, got {other:?}"),
            }
        }

        // Representable on its own but not from a real date
        let far = TimerDeclaration::Duration("P1000000000M".to_string());
        assert!(far.resolve_due_date(at(2026, 1, 1, 0, 0)).is_err());
        assert!(far.validate().is_err());
        let cycle = RepeatExpression::parse("R/P100000000D").unwrap();
        assert!(cycle.next_after(at(2026, 1, 1, 0, 0)).is_err());
    }

    #[test]
    fn parses_repeat_cycles() {
        let bounded = RepeatExpression::parse("R3/PT10M").unwrap();
        assert_eq!(bounded.repetitions, Some(3));
        assert_eq!(bounded.start, None);
        assert_eq!(bounded.to_string(), "R3/PT10M");

        let started = RepeatExpression::parse("R/2026-01-01T00:00:00Z/P1D").unwrap();
        assert_eq!(started.repetitions, None);
        assert_eq!(started.first_due(at(2025, 6, 1, 0, 0)).unwrap(), at(2026, 1, 1, 0, 0));

        let ended = RepeatExpression::parse("R5/PT1H/2026-03-01T00:00:00Z").unwrap();
        assert_eq!(ended.end, Some(at(2026, 3, 1, 0, 0)));

        assert!(RepeatExpression::parse("PT10M").is_err());
        assert!(RepeatExpression::parse("R0/PT10M").is_err());
        assert!(RepeatExpression::parse("R3").is_err());
    }

    #[test]
    fn repeat_counts_down_to_exhaustion() {
        let cycle = RepeatExpression::parse("R3/PT10M").unwrap();
        let first = cycle.first_due(at(2026, 1, 1, 0, 0)).unwrap();
        assert_eq!(first, at(2026, 1, 1, 0, 10));

        let (second, cycle) = cycle.next_after(first).unwrap().unwrap();
        assert_eq!(second, at(2026, 1, 1, 0, 20));
        assert_eq!(cycle.to_string(), "R2/PT10M");

        let (third, cycle) = cycle.next_after(second).unwrap().unwrap();
        assert_eq!(third, at(2026, 1, 1, 0, 30));
        assert!(cycle.next_after(third).unwrap().is_none());
    }

    #[test]
    fn repeat_stops_after_end_date() {
        let cycle = RepeatExpression::parse("R/PT1H/2026-01-01T02:30:00Z").unwrap();
        let (next, cycle) = cycle.next_after(at(2026, 1, 1, 1, 0)).unwrap().unwrap();
        assert_eq!(next, at(2026, 1, 1, 2, 0));
        assert!(cycle.next_after(next).unwrap().is_none());
    }

    #[test]
    fn resolves_declarations() {
        let now = at(2026, 5, 1, 8, 0);
        assert_eq!(
            TimerDeclaration::Date("2026-05-02T00:00:00Z".to_string()).resolve_due_date(now).unwrap(),
            at(2026, 5, 2, 0, 0)
        );
        assert_eq!(
            TimerDeclaration::Duration("PT30M".to_string()).resolve_due_date(now).unwrap(),
            at(2026, 5, 1, 8, 30)
        );
        let cycle = TimerDeclaration::Cycle("R2/PT1H".to_string());
        assert_eq!(cycle.resolve_due_date(now).unwrap(), at(2026, 5, 1, 9, 0));
        assert!(cycle.repeat().unwrap().is_some());
    }
}
