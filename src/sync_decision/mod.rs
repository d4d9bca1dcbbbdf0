//! Pure sync-decision function (C3). Takes no `&self` and performs no I/O,
//! matching the teacher's `SyncStrategy::calculate_time_bounds` style of
//! free functions over plain data.

use std::time::Duration;

use chrono::{DateTime, Datelike, Days, NaiveDate, Utc, Weekday};

/// A calendar's sync bookkeeping, as read from the store, reduced to the
/// fields the decision needs.
#[derive(Debug, Clone, Copy)]
pub struct CalendarState {
    pub low_water_mark: Option<NaiveDate>,
    pub high_water_mark: Option<NaiveDate>,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub needs_reauth: bool,
    pub sync_failure_count: u32,
}

/// An inclusive [start, end] calendar-week range, always Monday..Sunday UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WeekRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl WeekRange {
    pub fn containing(date: NaiveDate) -> Self {
        let offset = date.weekday().num_days_from_monday() as i64;
        let start = date - chrono::Duration::days(offset);
        let end = start + chrono::Duration::days(6);
        Self { start, end }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Calendar is blocked from background sync; serve cached data only.
    Blocked { reason: BlockedReason },
    /// No water marks yet: synchronously fetch the requested week and
    /// enqueue expansion to the default window.
    NoSyncedRange { expand_to: (NaiveDate, NaiveDate) },
    /// Within the cached window and fresh: serve from cache.
    Fresh,
    /// Within the cached window but stale: serve cached, then run a
    /// synchronous incremental refresh.
    StaleRefresh,
    /// Outside the cached window: synchronously fetch the requested week(s)
    /// and enqueue expansion covering the gap.
    OutsideWindow { missing: Vec<WeekRange>, expand_to: (NaiveDate, NaiveDate) },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockedReason {
    NeedsReauth,
    FailureThresholdReached,
}

/// Decide how to serve a request for `requested` (a single calendar week,
/// Monday..Sunday UTC) against `state`, at time `now`.
pub fn decide(
    state: CalendarState,
    requested: WeekRange,
    now: DateTime<Utc>,
    staleness: Duration,
    failure_threshold: u32,
    default_window_weeks: (i64, i64),
) -> Decision {
    if state.needs_reauth {
        return Decision::Blocked { reason: BlockedReason::NeedsReauth };
    }
    if state.sync_failure_count >= failure_threshold {
        return Decision::Blocked { reason: BlockedReason::FailureThresholdReached };
    }

    let (Some(low), Some(high)) = (state.low_water_mark, state.high_water_mark) else {
        return Decision::NoSyncedRange { expand_to: default_window(now, default_window_weeks) };
    };

    if requested.start >= low && requested.end <= high {
        let is_stale = match state.last_synced_at {
            Some(last) => (now - last).to_std().unwrap_or(Duration::MAX) >= staleness,
            None => true,
        };
        return if is_stale { Decision::StaleRefresh } else { Decision::Fresh };
    }

    // Outside the window: the whole requested range is missing relative to
    // the cached window (we only ever ask for one week at a time from C6's
    // callers, but compute the union in terms of weeks for the general case).
    let missing = missing_weeks(requested, low, high);
    let expand_low = low.min(requested.start);
    let expand_high = high.max(requested.end);
    Decision::OutsideWindow { missing, expand_to: (expand_low, expand_high) }
}

/// Decide across a multi-week span by deciding per-week and unioning the
/// resulting missing ranges, per the spec's tie-break rule.
pub fn decide_range(
    state: CalendarState,
    range_start: NaiveDate,
    range_end: NaiveDate,
    now: DateTime<Utc>,
    staleness: Duration,
    failure_threshold: u32,
    default_window_weeks: (i64, i64),
) -> Vec<(WeekRange, Decision)> {
    let mut results = Vec::new();
    let mut cursor = WeekRange::containing(range_start).start;
    while cursor <= range_end {
        let week = WeekRange::containing(cursor);
        let decision = decide(state, week, now, staleness, failure_threshold, default_window_weeks);
        results.push((week, decision));
        cursor = cursor.checked_add_days(Days::new(7)).expect("date arithmetic in range");
    }
    results
}

fn missing_weeks(requested: WeekRange, low: NaiveDate, high: NaiveDate) -> Vec<WeekRange> {
    let mut weeks = Vec::new();
    let mut cursor = requested.start;
    while cursor <= requested.end {
        if cursor < low || cursor > high {
            weeks.push(WeekRange::containing(cursor));
        }
        cursor = cursor.checked_add_days(Days::new(7)).expect("date arithmetic in range");
    }
    weeks
}

fn default_window(now: DateTime<Utc>, weeks: (i64, i64)) -> (NaiveDate, NaiveDate) {
    let today = now.date_naive();
    let this_week = WeekRange::containing(today);
    let low = this_week.start + chrono::Duration::weeks(weeks.0);
    let high = this_week.end + chrono::Duration::weeks(weeks.1);
    (low, high)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn dt(s: &str) -> DateTime<Utc> {
        Utc.datetime_from_str(&format!("{s} 00:00:00"), "%Y-%m-%d %H:%M:%S").unwrap()
    }

    fn week(start: &str) -> WeekRange {
        WeekRange { start: d(start), end: d(start) + chrono::Duration::days(6) }
    }

    // S1 — cached & fresh
    #[test]
    fn fresh_when_within_window_and_recent() {
        let now = dt("2025-01-14");
        let state = CalendarState {
            low_water_mark: Some(d("2025-01-06")),
            high_water_mark: Some(d("2025-01-26")),
            last_synced_at: Some(now - chrono::Duration::hours(1)),
            needs_reauth: false,
            sync_failure_count: 0,
        };
        let decision = decide(state, week("2025-01-13"), now, Duration::from_secs(24 * 3600), 3, (-4, 1));
        assert_eq!(decision, Decision::Fresh);
    }

    // S2 — outside window
    #[test]
    fn outside_window_reports_missing_and_expansion() {
        let state = CalendarState {
            low_water_mark: Some(d("2025-01-13")),
            high_water_mark: Some(d("2025-01-26")),
            last_synced_at: Some(dt("2025-01-20")),
            needs_reauth: false,
            sync_failure_count: 0,
        };
        let now = dt("2025-01-20");
        let decision = decide(state, week("2025-01-06"), now, Duration::from_secs(24 * 3600), 3, (-4, 1));
        match decision {
            Decision::OutsideWindow { missing, expand_to } => {
                assert_eq!(missing, vec![week("2025-01-06")]);
                assert_eq!(expand_to, (d("2025-01-06"), d("2025-01-26")));
            }
            other => panic!("expected OutsideWindow, got {other:?}"),
        }
    }

    // S3 — stale refresh
    #[test]
    fn stale_when_within_window_but_last_sync_too_old() {
        let state = CalendarState {
            low_water_mark: Some(d("2025-01-06")),
            high_water_mark: Some(d("2025-01-26")),
            last_synced_at: Some(dt("2025-01-13") - chrono::Duration::hours(1)),
            needs_reauth: false,
            sync_failure_count: 0,
        };
        let now = dt("2025-01-14") + chrono::Duration::hours(1);
        let decision = decide(state, week("2025-01-13"), now, Duration::from_secs(24 * 3600), 3, (-4, 1));
        assert_eq!(decision, Decision::StaleRefresh);
    }

    #[test]
    fn blocked_when_needs_reauth() {
        let state = CalendarState {
            low_water_mark: Some(d("2025-01-06")),
            high_water_mark: Some(d("2025-01-26")),
            last_synced_at: Some(dt("2025-01-14")),
            needs_reauth: true,
            sync_failure_count: 0,
        };
        let decision = decide(state, week("2025-01-13"), dt("2025-01-14"), Duration::from_secs(3600), 3, (-4, 1));
        assert_eq!(decision, Decision::Blocked { reason: BlockedReason::NeedsReauth });
    }

    #[test]
    fn blocked_when_failure_threshold_reached() {
        let state = CalendarState {
            low_water_mark: Some(d("2025-01-06")),
            high_water_mark: Some(d("2025-01-26")),
            last_synced_at: Some(dt("2025-01-14")),
            needs_reauth: false,
            sync_failure_count: 3,
        };
        let decision = decide(state, week("2025-01-13"), dt("2025-01-14"), Duration::from_secs(3600), 3, (-4, 1));
        assert_eq!(decision, Decision::Blocked { reason: BlockedReason::FailureThresholdReached });
    }

    #[test]
    fn no_synced_range_when_marks_absent() {
        let state = CalendarState {
            low_water_mark: None,
            high_water_mark: None,
            last_synced_at: None,
            needs_reauth: false,
            sync_failure_count: 0,
        };
        let now = dt("2025-01-14");
        let decision = decide(state, week("2025-01-13"), now, Duration::from_secs(3600), 3, (-4, 1));
        match decision {
            Decision::NoSyncedRange { expand_to } => {
                assert!(expand_to.0 < expand_to.1);
            }
            other => panic!("expected NoSyncedRange, got {other:?}"),
        }
    }

    #[test]
    fn week_range_aligns_to_monday_across_year_boundary() {
        let week = WeekRange::containing(d("2025-01-01"));
        assert_eq!(week.start.weekday(), Weekday::Mon);
        assert_eq!(week.end.weekday(), Weekday::Sun);
    }
}
