// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! ISO-8601 recurring intervals
//!
//! Schedules are written as `R[n]/<start>/<duration>` where the repeat
//! count and the start are both optional:
//!
//! - `PT1H`: every hour, starting when the schedule is created
//! - `R3/PT1H`: three times, hourly
//! - `2024-01-01T00:00:00Z/P1D`: daily from the given start
//! - `R5/2024-01-01T00:00:00Z/P1W`: five weekly runs from the given start
//!
//! Occurrence `k` is always computed from the anchor (`start + k * period`)
//! rather than by repeated addition, so month-based periods do not drift
//! after passing through a short month.

use chrono::{DateTime, Months, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Upper bound on the forward scan when searching for an occurrence
const MAX_SCAN_STEPS: u32 = 10_000;

/// Errors from parsing recurring-interval expressions
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IsoError {
    #[error("schedule expression is empty")]
    Empty,
    #[error("invalid ISO-8601 duration: {0}")]
    InvalidDuration(String),
    #[error("invalid start timestamp: {0}")]
    InvalidStart(String),
    #[error("invalid recurrence count: {0}")]
    InvalidRecurrence(String),
    #[error("schedule period must be longer than zero")]
    ZeroPeriod,
    #[error("malformed recurring interval: {0}")]
    Malformed(String),
}

/// An ISO-8601 duration (`P1Y2M3W4DT5H6M7.5S`)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IsoDuration {
    pub years: u32,
    pub months: u32,
    pub weeks: u32,
    pub days: u32,
    pub hours: u32,
    pub minutes: u32,
    pub seconds: u32,
    pub nanos: u32,
}

impl IsoDuration {
    pub fn is_zero(&self) -> bool {
        *self == IsoDuration::default()
    }

    fn calendar_months(&self) -> u64 {
        u64::from(self.years) * 12 + u64::from(self.months)
    }

    fn fixed_nanos(&self) -> i128 {
        let secs = i128::from(self.weeks) * 7 * 86_400
            + i128::from(self.days) * 86_400
            + i128::from(self.hours) * 3_600
            + i128::from(self.minutes) * 60
            + i128::from(self.seconds);
        secs * 1_000_000_000 + i128::from(self.nanos)
    }

    /// Rough length in seconds, used only to estimate occurrence indexes
    fn approx_seconds(&self) -> f64 {
        self.calendar_months() as f64 * 30.436_875 * 86_400.0
            + self.fixed_nanos() as f64 / 1e9
    }

    /// `base + n * self`, or `None` on overflow
    pub fn add_times(&self, base: DateTime<Utc>, n: u32) -> Option<DateTime<Utc>> {
        let months = u32::try_from(self.calendar_months().checked_mul(u64::from(n))?).ok()?;
        let shifted = base.checked_add_months(Months::new(months))?;
        let nanos = self.fixed_nanos().checked_mul(i128::from(n))?;
        let nanos = i64::try_from(nanos).ok()?;
        shifted.checked_add_signed(chrono::Duration::nanoseconds(nanos))
    }
}

impl FromStr for IsoDuration {
    type Err = IsoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || IsoError::InvalidDuration(s.to_string());
        let body = s.strip_prefix('P').ok_or_else(invalid)?;
        let (date_part, time_part) = match body.split_once('T') {
            Some((date, time)) => (date, Some(time)),
            None => (body, None),
        };

        let mut duration = IsoDuration::default();
        let mut components = 0;

        for (value, designator) in components_of(date_part).map_err(|_| invalid())? {
            let whole = whole_number(&value).ok_or_else(invalid)?;
            let slot = match designator {
                'Y' => &mut duration.years,
                'M' => &mut duration.months,
                'W' => &mut duration.weeks,
                'D' => &mut duration.days,
                _ => return Err(invalid()),
            };
            *slot = whole;
            components += 1;
        }
        check_order(date_part, "YMWD").map_err(|_| invalid())?;

        if let Some(time_part) = time_part {
            for (value, designator) in components_of(time_part).map_err(|_| invalid())? {
                match designator {
                    'H' => duration.hours = whole_number(&value).ok_or_else(invalid)?,
                    'M' => duration.minutes = whole_number(&value).ok_or_else(invalid)?,
                    'S' => {
                        let (secs, nanos) = fractional_seconds(&value).ok_or_else(invalid)?;
                        duration.seconds = secs;
                        duration.nanos = nanos;
                    }
                    _ => return Err(invalid()),
                }
                components += 1;
            }
            check_order(time_part, "HMS").map_err(|_| invalid())?;
        }

        // `P1DT` (empty time part) is accepted, a bare `P` or `PT` is not
        if components == 0 {
            return Err(invalid());
        }
        Ok(duration)
    }
}

/// Split `1Y2M` into `[("1", 'Y'), ("2", 'M')]`
fn components_of(part: &str) -> Result<Vec<(String, char)>, ()> {
    let mut out = Vec::new();
    let mut number = String::new();
    for c in part.chars() {
        if c.is_ascii_digit() || c == '.' || c == ',' {
            number.push(c);
        } else if c.is_ascii_uppercase() {
            if number.is_empty() {
                return Err(());
            }
            out.push((std::mem::take(&mut number), c));
        } else {
            return Err(());
        }
    }
    if !number.is_empty() {
        return Err(());
    }
    Ok(out)
}

/// Designators must appear at most once and in canonical order
fn check_order(part: &str, order: &str) -> Result<(), ()> {
    let mut last = None;
    for c in part.chars().filter(|c| c.is_ascii_uppercase()) {
        let position = order.find(c).ok_or(())?;
        if last.is_some_and(|l| position <= l) {
            return Err(());
        }
        last = Some(position);
    }
    Ok(())
}

fn whole_number(value: &str) -> Option<u32> {
    if value.chars().all(|c| c.is_ascii_digit()) {
        value.parse().ok()
    } else {
        None
    }
}

fn fractional_seconds(value: &str) -> Option<(u32, u32)> {
    let normalized = value.replace(',', ".");
    match normalized.split_once('.') {
        None => whole_number(&normalized).map(|s| (s, 0)),
        Some((whole, frac)) => {
            if frac.is_empty() || !frac.chars().all(|c| c.is_ascii_digit()) {
                return None;
            }
            let secs = whole_number(whole)?;
            let digits: String = frac.chars().chain(std::iter::repeat('0')).take(9).collect();
            Some((secs, digits.parse().ok()?))
        }
    }
}

fn parse_start(s: &str) -> Result<DateTime<Utc>, IsoError> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    // Timestamps without an offset are taken as UTC
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(|_| IsoError::InvalidStart(s.to_string()))
}

fn parse_recurrence(s: &str) -> Result<Option<u32>, IsoError> {
    let count = &s[1..];
    if count.is_empty() {
        return Ok(None);
    }
    match whole_number(count) {
        Some(0) | None => Err(IsoError::InvalidRecurrence(s.to_string())),
        Some(n) => Ok(Some(n)),
    }
}

/// A parsed `R[n]/<start>/<duration>` expression
///
/// The original text is kept so a schedule reads back exactly as written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct IsoSchedule {
    raw: String,
    recurrences: Option<u32>,
    start: Option<DateTime<Utc>>,
    period: IsoDuration,
}

impl IsoSchedule {
    pub fn parse(s: &str) -> Result<Self, IsoError> {
        let raw = s.trim();
        if raw.is_empty() {
            return Err(IsoError::Empty);
        }

        let parts: Vec<&str> = raw.split('/').collect();
        let (recurrence, start, duration) = match parts.as_slice() {
            [duration] => (None, None, *duration),
            [first, duration] if first.starts_with('R') => (Some(*first), None, *duration),
            [start, duration] => (None, Some(*start), *duration),
            [recurrence, start, duration] if recurrence.starts_with('R') => {
                (Some(*recurrence), Some(*start), *duration)
            }
            _ => return Err(IsoError::Malformed(raw.to_string())),
        };

        let period: IsoDuration = duration.parse()?;
        if period.is_zero() {
            return Err(IsoError::ZeroPeriod);
        }

        Ok(Self {
            raw: raw.to_string(),
            recurrences: recurrence.map(parse_recurrence).transpose()?.flatten(),
            start: start.map(parse_start).transpose()?,
            period,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Repeat count from the `R<n>` prefix; `None` means unbounded
    pub fn recurrences(&self) -> Option<u32> {
        self.recurrences
    }

    pub fn start(&self) -> Option<DateTime<Utc>> {
        self.start
    }

    pub fn period(&self) -> IsoDuration {
        self.period
    }

    /// The `k`-th occurrence counted from `anchor`
    pub fn occurrence(&self, anchor: DateTime<Utc>, k: u32) -> Option<DateTime<Utc>> {
        self.period.add_times(anchor, k)
    }

    /// Earliest occurrence anchored at `anchor` that is at or after `threshold`
    pub fn first_at_or_after(
        &self,
        anchor: DateTime<Utc>,
        threshold: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        self.scan(anchor, |t| t >= threshold, threshold)
    }

    /// Earliest occurrence anchored at `anchor` that is strictly after `threshold`
    pub fn first_after(
        &self,
        anchor: DateTime<Utc>,
        threshold: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        self.scan(anchor, |t| t > threshold, threshold)
    }

    fn scan(
        &self,
        anchor: DateTime<Utc>,
        accept: impl Fn(DateTime<Utc>) -> bool,
        threshold: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        if accept(anchor) {
            return Some(anchor);
        }

        // Jump close to the threshold, then settle on the exact index
        let elapsed = (threshold - anchor).num_milliseconds() as f64 / 1000.0;
        let estimate = (elapsed / self.period.approx_seconds()).floor().max(0.0);
        let mut k = if estimate >= f64::from(u32::MAX) {
            return None;
        } else {
            estimate as u32
        };

        while k > 0 && self.occurrence(anchor, k - 1).is_some_and(&accept) {
            k -= 1;
        }
        for _ in 0..MAX_SCAN_STEPS {
            let candidate = self.occurrence(anchor, k)?;
            if accept(candidate) {
                return Some(candidate);
            }
            k = k.checked_add(1)?;
        }
        None
    }
}

impl FromStr for IsoSchedule {
    type Err = IsoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for IsoSchedule {
    type Error = IsoError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<IsoSchedule> for String {
    fn from(schedule: IsoSchedule) -> Self {
        schedule.raw
    }
}

impl fmt::Display for IsoSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

#[cfg(test)]
#[path = "iso_tests.rs"]
mod tests;
