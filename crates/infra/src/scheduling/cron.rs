//! Five-field crontab expressions
//!
//! `minute hour day-of-month month day-of-week`, translated to the
//! seconds-first form of the `cron` crate (the engine behind
//! `tokio-cron-scheduler`) and evaluated with [`cron::Schedule`].
//!
//! Two crontab rules need translation. Day-of-week counts Sunday as 0 or 7,
//! so it is rewritten as weekday names. When both day fields are restricted
//! a date matches if either one does, as in Vixie cron; such expressions are
//! kept as two schedules and a fire is due when either schedule has one.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, TimeZone, Timelike, Utc};
use cron::Schedule;
use thiserror::Error;

const WEEKDAY_NAMES: &[&str] = &["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT"];

/// Longest window scanned by [`CronExpression::latest_fire_between`].
const MAX_LOOKBACK_DAYS: i64 = 1;

/// Error type for cron parsing
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CronParseError {
    #[error("expected 5 fields (minute hour day-of-month month day-of-week), got {0}")]
    FieldCount(usize),

    #[error("invalid {field} field: '{value}'")]
    InvalidField { field: &'static str, value: String },

    #[error("step must be positive in '{0}'")]
    ZeroStep(String),

    #[error("{reason}")]
    Schedule { reason: String },
}

/// A parsed five-field cron expression
#[derive(Clone)]
pub struct CronExpression {
    source: String,
    engine: String,
    /// A fire is due when any of these has one.
    schedules: Vec<Schedule>,
}

impl CronExpression {
    pub fn parse(expr: &str) -> Result<Self, CronParseError> {
        let parts: Vec<&str> = expr.split_whitespace().collect();
        let [minute, hour, day, month, weekday] = parts[..] else {
            return Err(CronParseError::FieldCount(parts.len()));
        };
        if let Some(field) = parts.iter().find(|field| has_zero_step(field)) {
            return Err(CronParseError::ZeroStep((*field).to_string()));
        }

        let weekday_names = weekday_field(weekday)?;
        let day_filtered = !day.starts_with('*') && !weekday.starts_with('*');

        let (engine, schedules) = if day_filtered {
            (
                format!("0 {minute} {hour} * {month} *"),
                vec![
                    schedule(&format!("0 {minute} {hour} {day} {month} *"))?,
                    schedule(&format!("0 {minute} {hour} * {month} {weekday_names}"))?,
                ],
            )
        } else {
            let engine = format!("0 {minute} {hour} {day} {month} {weekday_names}");
            let full = schedule(&engine)?;
            (engine, vec![full])
        };

        Ok(Self { source: parts.join(" "), engine, schedules })
    }

    /// Normalised source text.
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Whether both day fields are restricted, which the job engine cannot
    /// express. Such schedules fire daily in the engine and are filtered with
    /// [`CronExpression::matches`].
    pub fn requires_day_filter(&self) -> bool {
        self.schedules.len() > 1
    }

    /// Whether the minute containing `at` is a fire, as seen in its own
    /// timezone.
    pub fn matches<Tz: TimeZone>(&self, at: &DateTime<Tz>) -> bool {
        let Some(minute) = at.with_second(0).and_then(|at| at.with_nanosecond(0)) else {
            return false;
        };
        let just_before = minute.clone() - Duration::seconds(1);
        self.schedules.iter().any(|schedule| schedule.after(&just_before).next().as_ref() == Some(&minute))
    }

    /// First fire strictly after `after`, evaluated in `tz`.
    pub fn next_after<Tz: TimeZone>(&self, after: &DateTime<Utc>, tz: &Tz) -> Option<DateTime<Utc>> {
        let local = after.with_timezone(tz);
        self.schedules
            .iter()
            .filter_map(|schedule| schedule.after(&local).next())
            .map(|fire| fire.with_timezone(&Utc))
            .min()
    }

    /// Latest fire in `(not_before, until]`, evaluated in `tz`. Only the most
    /// recent day of a longer window is scanned.
    pub fn latest_fire_between<Tz: TimeZone>(
        &self,
        not_before: &DateTime<Utc>,
        until: &DateTime<Utc>,
        tz: &Tz,
    ) -> Option<DateTime<Utc>> {
        let floor = (*until - Duration::days(MAX_LOOKBACK_DAYS)).max(*not_before).with_timezone(tz);
        self.schedules
            .iter()
            .filter_map(|schedule| {
                schedule
                    .after(&floor)
                    .map(|fire| fire.with_timezone(&Utc))
                    .take_while(|fire| fire <= until)
                    .last()
            })
            .max()
    }

    /// Seconds-first six-field form handed to the job engine.
    pub fn to_six_field(&self) -> String {
        self.engine.clone()
    }
}

impl FromStr for CronExpression {
    type Err = CronParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for CronExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl fmt::Debug for CronExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CronExpression")
            .field("source", &self.source)
            .field("engine", &self.engine)
            .finish()
    }
}

impl PartialEq for CronExpression {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl Eq for CronExpression {}

fn schedule(six_field: &str) -> Result<Schedule, CronParseError> {
    Schedule::from_str(six_field).map_err(|err| CronParseError::Schedule { reason: err.to_string() })
}

fn has_zero_step(field: &str) -> bool {
    field.split(',').any(|item| {
        item.split_once('/').is_some_and(|(_, step)| step.parse::<u32>().is_ok_and(|step| step == 0))
    })
}

/// Crontab day-of-week (0-7, Sunday twice) as a list of weekday names.
fn weekday_field(raw: &str) -> Result<String, CronParseError> {
    if raw == "*" {
        return Ok(raw.to_string());
    }
    let invalid = || CronParseError::InvalidField { field: "day-of-week", value: raw.to_string() };
    let day = |token: &str| -> Result<usize, CronParseError> {
        match token.parse::<usize>() {
            Ok(value) if value <= 7 => Ok(value),
            Ok(_) => Err(invalid()),
            Err(_) => WEEKDAY_NAMES
                .iter()
                .position(|name| name.eq_ignore_ascii_case(token))
                .ok_or_else(invalid),
        }
    };

    let mut days = [false; 7];
    for item in raw.split(',') {
        let (range, step) = match item.split_once('/') {
            Some((range, step)) => (range, step.parse::<usize>().map_err(|_| invalid())?),
            None => (item, 1),
        };
        let (first, last) = match range.split_once('-') {
            _ if range == "*" => (0, 7),
            Some((first, last)) => (day(first)?, day(last)?),
            None if item.contains('/') => (day(range)?, 7),
            None => {
                let value = day(range)?;
                (value, value)
            }
        };
        if first > last {
            return Err(invalid());
        }
        for value in (first..=last).step_by(step) {
            days[value % 7] = true;
        }
    }

    Ok(WEEKDAY_NAMES
        .iter()
        .zip(days)
        .filter_map(|(name, set)| set.then_some(*name))
        .collect::<Vec<_>>()
        .join(","))
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use chrono_tz::America::New_York;
    use chrono_tz::Europe::Berlin;

    use super::*;

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).single().expect("valid timestamp")
    }

    fn at_nine(date: NaiveDate) -> DateTime<Utc> {
        date.and_hms_opt(9, 0, 0).expect("valid time").and_utc()
    }

    #[test]
    fn parses_common_forms() {
        for expr in ["* * * * *", "*/15 * * * *", "0 9-17 * * 1-5", "30 8 1,15 * *", "0 0 * JAN sun"]
        {
            assert!(CronExpression::parse(expr).is_ok(), "{expr} should parse");
        }
    }

    #[test]
    fn rejects_malformed_expressions() {
        assert_eq!(CronExpression::parse("* * * *").err(), Some(CronParseError::FieldCount(4)));
        assert_eq!(CronExpression::parse("0 0 * * * *").err(), Some(CronParseError::FieldCount(6)));
        assert!(matches!(
            CronExpression::parse("60 * * * *"),
            Err(CronParseError::Schedule { .. })
        ));
        assert!(matches!(CronExpression::parse("*/0 * * * *"), Err(CronParseError::ZeroStep(_))));
        assert!(CronExpression::parse("0 0 0 * *").is_err());
        assert!(matches!(
            CronExpression::parse("0 0 * * funday"),
            Err(CronParseError::InvalidField { field: "day-of-week", .. })
        ));
        assert!(CronExpression::parse("0 0 * * 5-2").is_err());
        assert!(CronExpression::parse("").is_err());
    }

    #[test]
    fn sunday_is_zero_or_seven() {
        let zero = CronExpression::parse("0 12 * * 0").expect("parses");
        let seven = CronExpression::parse("0 12 * * 7").expect("parses");
        // 2024-06-02 is a Sunday.
        let sunday = utc(2024, 6, 2, 12, 0);

        assert!(zero.matches(&sunday));
        assert!(seven.matches(&sunday));
        assert_eq!(zero.to_six_field(), seven.to_six_field());
        assert_eq!(zero.to_six_field(), "0 0 12 * * SUN");
    }

    #[test]
    fn restricted_day_fields_match_either() {
        let expr = CronExpression::parse("0 9 13 * 5").expect("parses");
        assert!(expr.requires_day_filter());

        // Friday 2024-06-07, and Thursday 2024-06-13.
        assert!(expr.matches(&at_nine(NaiveDate::from_ymd_opt(2024, 6, 7).expect("date"))));
        assert!(expr.matches(&at_nine(NaiveDate::from_ymd_opt(2024, 6, 13).expect("date"))));
        assert!(!expr.matches(&at_nine(NaiveDate::from_ymd_opt(2024, 6, 12).expect("date"))));
        assert_eq!(expr.to_six_field(), "0 0 9 * * *");

        let next = expr.next_after(&utc(2024, 6, 8, 0, 0), &Utc).expect("next fire");
        assert_eq!(next, utc(2024, 6, 13, 9, 0));
    }

    #[test]
    fn stepped_weekday_is_still_restricted() {
        let expr = CronExpression::parse("0 8 * * */2").expect("parses");
        assert!(!expr.requires_day_filter());
        assert_eq!(expr.to_six_field(), "0 0 8 * * SUN,TUE,THU,SAT");
    }

    #[test]
    fn weekday_ranges_become_names() {
        let expr = CronExpression::parse("*/15 9-11 * * MON-FRI").expect("parses");
        assert_eq!(expr.to_six_field(), "0 */15 9-11 * * MON,TUE,WED,THU,FRI");
        let weekend = CronExpression::parse("0 10 * * 6-7").expect("parses");
        assert_eq!(weekend.to_six_field(), "0 0 10 * * SUN,SAT");
        assert_eq!(CronExpression::parse("* * * * *").expect("parses").to_six_field(), "0 * * * * *");
    }

    #[test]
    fn matches_ignores_seconds_within_the_minute() {
        let expr = CronExpression::parse("30 6 * * *").expect("parses");
        let late = Utc.with_ymd_and_hms(2024, 6, 1, 6, 30, 2).single().expect("valid");
        assert!(expr.matches(&late));
        assert!(!expr.matches(&utc(2024, 6, 1, 6, 31)));
    }

    #[test]
    fn next_after_respects_timezone() {
        let expr = CronExpression::parse("0 9 * * *").expect("parses");
        // 09:00 in Berlin during summer time is 07:00 UTC.
        let next = expr.next_after(&utc(2024, 6, 1, 8, 0), &Berlin).expect("next fire");
        assert_eq!(next, utc(2024, 6, 2, 7, 0));

        let same_day = expr.next_after(&utc(2024, 6, 1, 6, 59), &Berlin).expect("next fire");
        assert_eq!(same_day, utc(2024, 6, 1, 7, 0));
    }

    #[test]
    fn next_after_in_dst_zone_keeps_minute() {
        let expr = CronExpression::parse("30 2 * * *").expect("parses");
        let next = expr.next_after(&utc(2024, 3, 10, 0, 0), &New_York).expect("next fire");
        assert!(next > utc(2024, 3, 10, 0, 0));
        assert_eq!(next.with_timezone(&New_York).minute(), 30);
    }

    #[test]
    fn next_after_finds_leap_day() {
        let expr = CronExpression::parse("0 0 29 2 *").expect("parses");
        let next = expr.next_after(&utc(2024, 3, 1, 0, 0), &Utc).expect("next fire");
        assert_eq!(next, utc(2028, 2, 29, 0, 0));
    }

    #[test]
    fn latest_fire_between_is_bounded_by_both_ends() {
        let expr = CronExpression::parse("*/15 * * * *").expect("parses");
        let now = utc(2024, 6, 1, 10, 7);

        assert_eq!(
            expr.latest_fire_between(&(now - Duration::minutes(10)), &now, &Utc),
            Some(utc(2024, 6, 1, 10, 0))
        );
        // The lower bound is exclusive.
        assert_eq!(expr.latest_fire_between(&utc(2024, 6, 1, 10, 0), &now, &Utc), None);
        assert_eq!(expr.latest_fire_between(&(now - Duration::minutes(5)), &now, &Utc), None);
    }
}
