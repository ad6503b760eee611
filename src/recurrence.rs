//! Recurrence expansion.
//!
//! A pattern plus an anchor window produces a finite, ordered sequence of
//! occurrence windows. All calendar arithmetic is done in UTC; every
//! occurrence keeps the anchor's time of day and duration.
//!
//! The sequence is generated lazily and recomputed on every call. Pagination
//! slices a fresh expansion instead of caching one, so a pattern edited
//! mid-series never serves stale pages.

use std::collections::VecDeque;

use chrono::{DateTime, Datelike, Days, Months, NaiveDate, NaiveTime, Utc};
use serde::Serialize;

use crate::engine::{SchedError, validate_span};
use crate::limits::*;
use crate::model::*;

/// One page of an expansion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Expansion {
    pub occurrences: Vec<Occurrence>,
    pub total_instances: u32,
    pub page: u32,
    pub limit: u32,
    pub has_more: bool,
    pub total_pages: u32,
}

/// Check the pattern's own invariants (the `end` enum already guarantees
/// exactly one termination condition).
pub fn validate_pattern(pattern: &RecurrencePattern) -> Result<(), SchedError> {
    if !(MIN_RECURRENCE_INTERVAL..=MAX_RECURRENCE_INTERVAL).contains(&pattern.interval) {
        return Err(SchedError::InvalidPattern("interval must be between 1 and 12"));
    }
    if let RecurrenceEnd::Count(n) = pattern.end
        && !(MIN_OCCURRENCES..=MAX_OCCURRENCES).contains(&n)
    {
        return Err(SchedError::InvalidPattern(
            "occurrence count must be between 1 and 365",
        ));
    }
    match &pattern.frequency {
        Frequency::Daily => {}
        Frequency::Weekly { days_of_week } => {
            if days_of_week.is_empty() {
                return Err(SchedError::InvalidPattern("weekly pattern requires daysOfWeek"));
            }
            if days_of_week.iter().any(|d| *d > 6) {
                return Err(SchedError::InvalidPattern("daysOfWeek values must be 0-6"));
            }
        }
        Frequency::Monthly { month_day } => {
            if !(1..=31).contains(month_day) {
                return Err(SchedError::InvalidPattern("monthDay must be between 1 and 31"));
            }
        }
    }
    Ok(())
}

/// Lazily expand `pattern` from `anchor`. The pattern must already be valid.
pub fn occurrences<'a>(pattern: &'a RecurrencePattern, anchor: Span) -> Occurrences<'a> {
    let anchor_dt = to_datetime(anchor.start);
    Occurrences {
        pattern,
        anchor,
        anchor_date: anchor_dt.map(|d| d.date_naive()),
        anchor_time: anchor_dt.map(|d| d.time()),
        period: 0,
        emitted: 0,
        pending: VecDeque::new(),
        done: anchor_dt.is_none(),
    }
}

/// Validate, expand, and return one page of the result.
pub fn expand(
    pattern: &RecurrencePattern,
    anchor: Span,
    page: u32,
    limit: u32,
) -> Result<Expansion, SchedError> {
    validate_pattern(pattern)?;
    validate_span(&anchor)?;
    if page < MIN_PAGE {
        return Err(SchedError::InvalidPattern("page must be at least 1"));
    }
    if !(MIN_PAGE_LIMIT..=MAX_PAGE_LIMIT).contains(&limit) {
        return Err(SchedError::InvalidPattern("limit must be between 1 and 100"));
    }

    let all: Vec<Occurrence> = occurrences(pattern, anchor).collect();
    let total = all.len() as u32;
    let skip = (page as usize - 1).saturating_mul(limit as usize);
    let occurrences: Vec<Occurrence> = all.into_iter().skip(skip).take(limit as usize).collect();

    Ok(Expansion {
        occurrences,
        total_instances: total,
        page,
        limit,
        has_more: (page as u64) * (limit as u64) < total as u64,
        total_pages: total.div_ceil(limit),
    })
}

/// Iterator over a pattern's occurrences in start order.
///
/// Candidates are produced one period (day, week, or month step) at a time.
/// Candidates before the anchor are dropped without consuming an instance
/// number.
pub struct Occurrences<'a> {
    pattern: &'a RecurrencePattern,
    anchor: Span,
    anchor_date: Option<NaiveDate>,
    anchor_time: Option<NaiveTime>,
    period: u64,
    emitted: u32,
    pending: VecDeque<Ms>,
    done: bool,
}

impl Occurrences<'_> {
    fn refill(&mut self) -> bool {
        let (Some(anchor_date), Some(anchor_time)) = (self.anchor_date, self.anchor_time) else {
            return false;
        };
        let step = self.period * self.pattern.interval as u64;
        self.period += 1;

        match &self.pattern.frequency {
            Frequency::Daily => {
                let Some(offset) = (step as i64).checked_mul(DAY_MS) else {
                    return false;
                };
                self.pending.push_back(self.anchor.start + offset);
            }
            Frequency::Weekly { days_of_week } => {
                let back = anchor_date.weekday().num_days_from_sunday() as u64;
                let Some(week_start) = anchor_date
                    .checked_sub_days(Days::new(back))
                    .and_then(|d| d.checked_add_days(Days::new(step * 7)))
                else {
                    return false;
                };
                for &dow in days_of_week {
                    let Some(date) = week_start.checked_add_days(Days::new(dow as u64)) else {
                        return false;
                    };
                    if date >= anchor_date {
                        self.pending.push_back(at(date, anchor_time));
                    }
                }
            }
            Frequency::Monthly { month_day } => {
                let Some(first) = anchor_date
                    .with_day(1)
                    .and_then(|d| d.checked_add_months(Months::new(step as u32)))
                else {
                    return false;
                };
                let day = (*month_day).min(days_in_month(first));
                let Some(date) = first.with_day(day) else {
                    return false;
                };
                let start = at(date, anchor_time);
                if start >= self.anchor.start {
                    self.pending.push_back(start);
                }
            }
        }
        true
    }
}

impl Iterator for Occurrences<'_> {
    type Item = Occurrence;

    fn next(&mut self) -> Option<Occurrence> {
        while !self.done {
            let Some(start) = self.pending.pop_front() else {
                if !self.refill() {
                    self.done = true;
                }
                continue;
            };

            let limit_reached = match self.pattern.end {
                RecurrenceEnd::Count(n) => self.emitted >= n,
                RecurrenceEnd::Until(last) => date_of(start).is_none_or(|d| d > last),
            };
            if limit_reached || self.emitted >= MAX_OCCURRENCES {
                self.done = true;
                break;
            }

            self.emitted += 1;
            let is_exception = date_of(start).is_some_and(|d| self.pattern.exceptions.contains(&d));
            return Some(Occurrence {
                instance_number: self.emitted,
                span: Span::new(start, start + self.anchor.duration_ms()),
                is_exception,
            });
        }
        None
    }
}

pub(crate) fn to_datetime(ms: Ms) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
}

/// UTC calendar date of an instant.
pub fn date_of(ms: Ms) -> Option<NaiveDate> {
    to_datetime(ms).map(|d| d.date_naive())
}

fn at(date: NaiveDate, time: NaiveTime) -> Ms {
    date.and_time(time).and_utc().timestamp_millis()
}

fn days_in_month(first: NaiveDate) -> u32 {
    first
        .checked_add_months(Months::new(1))
        .and_then(|next| next.pred_opt())
        .map_or(28, |last| last.day())
}
