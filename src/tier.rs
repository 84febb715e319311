//! Tier clock: pure due-ness evaluation
//!
//! Maps (tier configuration, last successful run, current time) to a due
//! boolean and the next due time. No I/O and no reads of the wall clock;
//! callers pass `now` explicitly, which also keeps evaluation deterministic
//! and testable.
//!
//! Due-ness is a boolean gate, not a counter: a window missed during
//! downtime fires exactly once on the next evaluation, it never catches up.

use chrono::{DateTime, Datelike, Days, NaiveDate, NaiveTime, TimeZone, Utc};

use crate::models::{TierConfig, TierSchedule};

/// Outcome of a due-ness evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DueStatus {
    /// Whether the tier is due right now
    pub due: bool,
    /// When the tier became due (if due) or will next come due (if not)
    pub next_due: DateTime<Utc>,
}

/// Evaluate whether a tier is due
///
/// `last_success` is the completion time of the most recent completed
/// attempt for the (target, tier) pair, or `None` if there has never been
/// one. All calendar math is UTC.
pub fn is_due(
    config: &TierConfig,
    last_success: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> DueStatus {
    match config.schedule {
        TierSchedule::EveryHours { interval } => hourly(interval, last_success, now),
        TierSchedule::DailyAt { at } => calendar(at, last_success, now, |_| true),
        TierSchedule::WeeklyAt { at, weekday } => calendar(at, last_success, now, |date| {
            date.weekday().num_days_from_monday() == u32::from(weekday)
        }),
        TierSchedule::MonthlyAt { at, day } => calendar(at, last_success, now, move |date| {
            date.day() == clamp_day(day, date)
        }),
        TierSchedule::YearlyAt { at, day, month } => calendar(at, last_success, now, move |date| {
            date.month() == month && date.day() == clamp_day(day, date)
        }),
    }
}

fn hourly(interval: u32, last_success: Option<DateTime<Utc>>, now: DateTime<Utc>) -> DueStatus {
    match last_success {
        None => DueStatus {
            due: true,
            next_due: now,
        },
        Some(last) => {
            let next_due = last + chrono::Duration::hours(i64::from(interval));
            DueStatus {
                due: now >= next_due,
                next_due,
            }
        }
    }
}

/// Shared logic for the calendar-gated tiers (daily/weekly/monthly/yearly)
///
/// Due when the gate is open for today's date, the configured time-of-day
/// has been reached, and the last successful run's calendar date is strictly
/// before today.
fn calendar<G>(
    at: NaiveTime,
    last_success: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    gate: G,
) -> DueStatus
where
    G: Fn(NaiveDate) -> bool,
{
    let today = now.date_naive();
    let ran_today = last_success.is_some_and(|last| last.date_naive() >= today);
    let due = gate(today) && now.time() >= at && !ran_today;

    let next_due = if due {
        to_utc(today, at)
    } else if gate(today) && !ran_today && now.time() < at {
        to_utc(today, at)
    } else {
        next_open_date(today, &gate)
            .map(|date| to_utc(date, at))
            // The gate shapes above all reoccur within 366 days; this arm is
            // unreachable for any valid TierSchedule.
            .unwrap_or(now)
    };

    DueStatus { due, next_due }
}

/// First date strictly after `today` for which the gate is open
fn next_open_date<G>(today: NaiveDate, gate: &G) -> Option<NaiveDate>
where
    G: Fn(NaiveDate) -> bool,
{
    (1..=366u64)
        .filter_map(|offset| today.checked_add_days(Days::new(offset)))
        .find(|date| gate(*date))
}

fn to_utc(date: NaiveDate, at: NaiveTime) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_time(at))
}

/// Clamp a configured day-of-month to the last day of `date`'s month
fn clamp_day(day: u32, date: NaiveDate) -> u32 {
    day.min(days_in_month(date.year(), date.month()))
}

fn days_in_month(year: i32, month: u32) -> u32 {
    let (next_year, next_month) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .and_then(|first| first.pred_opt())
        .map(|last| last.day())
        .unwrap_or(28)
}
