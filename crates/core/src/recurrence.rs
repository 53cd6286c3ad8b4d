use std::collections::BTreeSet;

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Default repetition interval ("every 1 unit").
fn default_interval() -> u32 {
    1
}

/// A recurrence specification, persisted as tagged JSON on the template row.
///
/// Each variant carries the optional hard stops (`end_date`,
/// `max_occurrences`) alongside its own shape-specific fields; the template
/// row's columns remain authoritative for scheduling, the copies here exist
/// so the pattern round-trips through the wire unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum RecurrencePattern {
    /// Every `interval` days.
    Daily {
        #[serde(default = "default_interval")]
        interval: u32,
        #[serde(default)]
        end_date: Option<DateTime<Utc>>,
        #[serde(default)]
        max_occurrences: Option<i32>,
    },
    /// Every `interval` weeks, on the given weekdays (0 = Monday .. 6 = Sunday).
    Weekly {
        #[serde(default = "default_interval")]
        interval: u32,
        weekdays: BTreeSet<u8>,
        #[serde(default)]
        end_date: Option<DateTime<Utc>>,
        #[serde(default)]
        max_occurrences: Option<i32>,
    },
    /// Every `interval` months on `day_of_month` (1..=31, or -1 for the last
    /// day of the month).
    Monthly {
        #[serde(default = "default_interval")]
        interval: u32,
        day_of_month: i32,
        #[serde(default)]
        end_date: Option<DateTime<Utc>>,
        #[serde(default)]
        max_occurrences: Option<i32>,
    },
    /// Every `90 * interval` days.
    Quarterly {
        #[serde(default = "default_interval")]
        interval: u32,
        #[serde(default)]
        end_date: Option<DateTime<Utc>>,
        #[serde(default)]
        max_occurrences: Option<i32>,
    },
    /// Every `365 * interval` days.
    Yearly {
        #[serde(default = "default_interval")]
        interval: u32,
        #[serde(default)]
        end_date: Option<DateTime<Utc>>,
        #[serde(default)]
        max_occurrences: Option<i32>,
    },
    /// Standard 5-field cron expression, evaluated in UTC.
    Custom {
        #[serde(alias = "cron")]
        cron_expression: String,
        #[serde(default)]
        end_date: Option<DateTime<Utc>>,
        #[serde(default)]
        max_occurrences: Option<i32>,
    },
}

impl RecurrencePattern {
    /// Short tag for logging (`"daily"`, `"weekly"`, ...).
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Daily { .. } => "daily",
            Self::Weekly { .. } => "weekly",
            Self::Monthly { .. } => "monthly",
            Self::Quarterly { .. } => "quarterly",
            Self::Yearly { .. } => "yearly",
            Self::Custom { .. } => "custom",
        }
    }

    /// Validate the pattern shape.
    ///
    /// # Errors
    ///
    /// Returns a [`RecurrenceError`] when the interval is zero, the weekday
    /// set is empty or out of range, `day_of_month` is outside `1..=31`
    /// (and not `-1`), or the cron expression does not parse.
    pub fn validate(&self) -> Result<(), RecurrenceError> {
        match self {
            Self::Daily { interval, .. }
            | Self::Quarterly { interval, .. }
            | Self::Yearly { interval, .. } => ensure_interval(*interval),
            Self::Weekly {
                interval, weekdays, ..
            } => {
                ensure_interval(*interval)?;
                if weekdays.is_empty() {
                    return Err(RecurrenceError::EmptyWeekdays);
                }
                if let Some(&bad) = weekdays.iter().find(|&&d| d > 6) {
                    return Err(RecurrenceError::InvalidWeekday(bad));
                }
                Ok(())
            }
            Self::Monthly {
                interval,
                day_of_month,
                ..
            } => {
                ensure_interval(*interval)?;
                if *day_of_month != -1 && !(1..=31).contains(day_of_month) {
                    return Err(RecurrenceError::InvalidDayOfMonth(*day_of_month));
                }
                Ok(())
            }
            Self::Custom {
                cron_expression, ..
            } => {
                parse_cron(cron_expression)?;
                Ok(())
            }
        }
    }

    /// The first firing instant for a template starting at `start`.
    ///
    /// The start date itself is the first occurrence; subsequent ones come
    /// from [`next_after`](Self::next_after).
    #[must_use]
    pub fn first_occurrence(&self, start: DateTime<Utc>) -> DateTime<Utc> {
        start
    }

    /// Compute the next firing instant after `base`, with `now` as the floor
    /// where the pattern requires a strictly-future result.
    ///
    /// Returns `None` when the pattern has no further occurrence (an
    /// exhausted weekday scan or a cron expression whose "next" collapses
    /// onto `base`).
    #[must_use]
    pub fn next_after(&self, base: DateTime<Utc>, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Self::Daily { interval, .. } => Some(base + Duration::days(i64::from(*interval))),
            Self::Quarterly { interval, .. } => {
                Some(base + Duration::days(90 * i64::from(*interval)))
            }
            Self::Yearly { interval, .. } => {
                Some(base + Duration::days(365 * i64::from(*interval)))
            }
            Self::Weekly {
                interval, weekdays, ..
            } => next_weekly(base, now, *interval, weekdays),
            Self::Monthly {
                interval,
                day_of_month,
                ..
            } => next_monthly(base, now, *interval, *day_of_month),
            Self::Custom {
                cron_expression, ..
            } => next_cron(cron_expression, base, now),
        }
    }
}

fn ensure_interval(interval: u32) -> Result<(), RecurrenceError> {
    if interval == 0 {
        return Err(RecurrenceError::ZeroInterval);
    }
    Ok(())
}

/// Parse a standard 5-field cron expression.
///
/// # Errors
///
/// Returns [`RecurrenceError::InvalidCron`] if the expression does not parse.
pub fn parse_cron(expr: &str) -> Result<croner::Cron, RecurrenceError> {
    croner::Cron::new(expr)
        .parse()
        .map_err(|e| RecurrenceError::InvalidCron(format!("{e}")))
}

/// Scan forward from `base` for the next enabled weekday strictly after
/// `now`; failing that, jump `interval` weeks ahead and take the first
/// enabled weekday there.
fn next_weekly(
    base: DateTime<Utc>,
    now: DateTime<Utc>,
    interval: u32,
    weekdays: &BTreeSet<u8>,
) -> Option<DateTime<Utc>> {
    let enabled = |candidate: DateTime<Utc>| {
        let day = u8::try_from(candidate.weekday().num_days_from_monday()).unwrap_or(u8::MAX);
        weekdays.contains(&day)
    };

    for offset in 0..7 {
        let candidate = base + Duration::days(offset);
        if enabled(candidate) && candidate > now {
            return Some(candidate);
        }
    }

    let next_week = base + Duration::weeks(i64::from(interval));
    (0..7)
        .map(|offset| next_week + Duration::days(offset))
        .find(|candidate| enabled(*candidate))
}

/// Advance month by month (in `interval` steps) until the candidate is
/// strictly after `max(base, now)`, clamping the requested day to the
/// length of each target month (`-1` selects the last day outright).
fn next_monthly(
    base: DateTime<Utc>,
    now: DateTime<Utc>,
    interval: u32,
    day_of_month: i32,
) -> Option<DateTime<Utc>> {
    let floor = base.max(now);
    // 100 years of monthly steps; far beyond any realistic catch-up window.
    for step in 1..=1200u32 {
        let candidate = month_offset(base, interval.checked_mul(step)?, day_of_month)?;
        if candidate > floor {
            return Some(candidate);
        }
    }
    None
}

/// The instant `months` calendar months after `base`, on `day_of_month`
/// (clamped; `-1` = last day), keeping the time of day.
fn month_offset(base: DateTime<Utc>, months: u32, day_of_month: i32) -> Option<DateTime<Utc>> {
    let naive = base.naive_utc();
    let total = i64::from(naive.month0()) + i64::from(months);
    let year = i32::try_from(i64::from(naive.year()) + total / 12).ok()?;
    let month = u32::try_from(total % 12).ok()? + 1;
    let last = days_in_month(year, month)?;
    let day = if day_of_month == -1 {
        last
    } else {
        u32::try_from(day_of_month).ok()?.min(last)
    };
    let date = NaiveDate::from_ymd_opt(year, month, day)?;
    Some(DateTime::from_naive_utc_and_offset(
        date.and_time(naive.time()),
        Utc,
    ))
}

/// Number of days in the given month.
fn days_in_month(year: i32, month: u32) -> Option<u32> {
    let first = NaiveDate::from_ymd_opt(year, month, 1)?;
    let next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)?
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)?
    };
    u32::try_from((next - first).num_days()).ok()
}

/// Cron "next" strictly after `max(base, now)`, evaluated in UTC.
fn next_cron(expr: &str, base: DateTime<Utc>, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let cron = parse_cron(expr).ok()?;
    let after = base.max(now);
    let next = cron.find_next_occurrence(&after, false).ok()?;
    // A pathological expression that collapses onto the base produces no
    // occurrence; the template stays active and is retried on a later scan.
    if next == base {
        return None;
    }
    Some(next)
}

/// Validate an IANA timezone name.
///
/// # Errors
///
/// Returns [`RecurrenceError::InvalidTimezone`] if the name is not in the
/// timezone database.
pub fn validate_timezone(tz: &str) -> Result<chrono_tz::Tz, RecurrenceError> {
    tz.parse::<chrono_tz::Tz>()
        .map_err(|_| RecurrenceError::InvalidTimezone(tz.to_owned()))
}

/// Errors from recurrence pattern validation and evaluation.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RecurrenceError {
    /// The repetition interval was zero.
    #[error("recurrence interval must be at least 1")]
    ZeroInterval,
    /// A weekly pattern had no weekdays.
    #[error("weekly recurrence requires a non-empty weekday set")]
    EmptyWeekdays,
    /// A weekday value was outside 0..=6.
    #[error("invalid weekday {0}: expected 0 (Monday) through 6 (Sunday)")]
    InvalidWeekday(u8),
    /// `day_of_month` was outside 1..=31 and not -1.
    #[error("invalid day_of_month {0}: expected 1..=31 or -1 for last day")]
    InvalidDayOfMonth(i32),
    /// The cron expression could not be parsed.
    #[error("invalid cron expression: {0}")]
    InvalidCron(String),
    /// The timezone string is not a valid IANA timezone.
    #[error("invalid timezone: {0}")]
    InvalidTimezone(String),
}
