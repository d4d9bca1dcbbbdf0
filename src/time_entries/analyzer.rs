//! C6 pure analyzer: union overlapping same-project events, round to
//! configured granularity, and generate a title/description. Zero database
//! access, mirroring the free-function style of `sync_decision`.

use chrono::{DateTime, Utc};
use serde_json::json;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct ClassifiedEventView {
    pub event_id: Uuid,
    pub project_id: Uuid,
    pub title: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub is_skipped: bool,
    pub is_all_day: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ComputedEntry {
    pub project_id: Uuid,
    pub computed_hours: f64,
    pub computed_title: String,
    pub computed_description: String,
    pub calculation_details: serde_json::Value,
    pub contributing_event_ids: Vec<Uuid>,
}

/// Merges intervals that touch or overlap (`a.end >= b.start` after sorting
/// by start). Returns the merged ranges plus total covered minutes.
pub fn union_intervals(mut intervals: Vec<(DateTime<Utc>, DateTime<Utc>)>) -> (Vec<(DateTime<Utc>, DateTime<Utc>)>, i64) {
    if intervals.is_empty() {
        return (Vec::new(), 0);
    }
    intervals.sort_by_key(|(start, _)| *start);

    let mut merged = vec![intervals[0]];
    for &(start, end) in &intervals[1..] {
        let last = merged.last_mut().unwrap();
        if start <= last.1 {
            if end > last.1 {
                last.1 = end;
            }
        } else {
            merged.push((start, end));
        }
    }

    let total_minutes: i64 = merged.iter().map(|(s, e)| (*e - *s).num_minutes()).sum();
    (merged, total_minutes)
}

/// Rounds `minutes` to the nearest multiple of `granularity`, using `pivot`
/// as the remainder threshold: `remainder <= pivot - 1` rounds down,
/// `remainder >= pivot` rounds up. Defaults (granularity=15, pivot=7) give
/// "6 rounds down, 7 rounds up".
pub fn round_minutes(minutes: i64, granularity: i64, pivot: i64) -> i64 {
    if granularity <= 0 {
        return minutes;
    }
    let remainder = minutes.rem_euclid(granularity);
    let base = minutes - remainder;
    if remainder >= pivot {
        base + granularity
    } else {
        base
    }
}

fn build_title(events: &[&ClassifiedEventView]) -> String {
    let Some(first) = events.first() else { return String::new() };
    let distinct_titles: std::collections::HashSet<&str> = events.iter().map(|e| e.title.as_str()).collect();
    if distinct_titles.len() <= 1 || events.len() == 1 {
        first.title.clone()
    } else {
        format!("{} +{} more", first.title, events.len() - 1)
    }
}

fn build_description(events: &[&ClassifiedEventView]) -> String {
    let mut seen = String::new();
    let mut parts: Vec<&str> = Vec::new();
    for e in events {
        if seen != e.title {
            parts.push(&e.title);
            seen = e.title.clone();
        }
    }
    parts.join(", ")
}

/// Groups events for `date` by project, unions their intervals, applies
/// rounding, and produces one `ComputedEntry` per project with events
/// remaining after the skip filter.
pub fn analyze(events: &[ClassifiedEventView], granularity: i64, pivot: i64) -> Vec<ComputedEntry> {
    let mut by_project: std::collections::BTreeMap<Uuid, Vec<&ClassifiedEventView>> = std::collections::BTreeMap::new();
    for e in events {
        if e.is_skipped {
            continue;
        }
        by_project.entry(e.project_id).or_default().push(e);
    }

    by_project
        .into_iter()
        .map(|(project_id, mut group)| {
            group.sort_by_key(|e| e.start);
            let intervals: Vec<(DateTime<Utc>, DateTime<Utc>)> = group.iter().map(|e| (e.start, e.end)).collect();
            let (merged, union_minutes) = union_intervals(intervals);

            // A lone all-day event carries no meaningful duration signal —
            // Google's normalized start/end span the whole day — so it
            // contributes 0 computed hours unless the user overrides it.
            let is_lone_all_day = group.len() == 1 && group[0].is_all_day;
            let final_minutes = if is_lone_all_day { 0 } else { round_minutes(union_minutes, granularity, pivot) };

            ComputedEntry {
                project_id,
                computed_hours: final_minutes as f64 / 60.0,
                computed_title: build_title(&group),
                computed_description: build_description(&group),
                calculation_details: json!({
                    "raw_event_minutes": group.iter().map(|e| (e.end - e.start).num_minutes()).collect::<Vec<_>>(),
                    "merged_intervals": merged.iter().map(|(s, e)| json!({"start": s.to_rfc3339(), "end": e.to_rfc3339()})).collect::<Vec<_>>(),
                    "union_minutes": union_minutes,
                    "rounding_applied": final_minutes != union_minutes,
                    "final_minutes": final_minutes,
                    "is_all_day": is_lone_all_day,
                }),
                contributing_event_ids: group.iter().map(|e| e.event_id).collect(),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 2, h, m, 0).unwrap()
    }

    fn event(project: Uuid, title: &str, sh: u32, sm: u32, eh: u32, em: u32, skipped: bool) -> ClassifiedEventView {
        ClassifiedEventView {
            event_id: Uuid::new_v4(),
            project_id: project,
            title: title.into(),
            start: t(sh, sm),
            end: t(eh, em),
            is_skipped: skipped,
            is_all_day: false,
        }
    }

    #[test]
    fn union_of_overlapping_events_is_sixty_minutes() {
        let intervals = vec![(t(9, 0), t(9, 30)), (t(9, 15), t(10, 0))];
        let (_, minutes) = union_intervals(intervals);
        assert_eq!(minutes, 60);
    }

    #[test]
    fn disjoint_intervals_do_not_merge() {
        let intervals = vec![(t(9, 0), t(9, 30)), (t(10, 0), t(10, 30))];
        let (merged, minutes) = union_intervals(intervals);
        assert_eq!(merged.len(), 2);
        assert_eq!(minutes, 60);
    }

    #[test]
    fn remainder_six_rounds_down() {
        assert_eq!(round_minutes(36, 15, 7), 30);
    }

    #[test]
    fn remainder_seven_rounds_up() {
        assert_eq!(round_minutes(37, 15, 7), 45);
    }

    #[test]
    fn analyze_excludes_skipped_events() {
        let p = Uuid::new_v4();
        let events = vec![event(p, "standup", 9, 0, 9, 30, true)];
        let entries = analyze(&events, 15, 7);
        assert!(entries.is_empty());
    }

    #[test]
    fn analyze_produces_one_entry_per_project() {
        let p1 = Uuid::new_v4();
        let p2 = Uuid::new_v4();
        let events = vec![
            event(p1, "standup", 9, 0, 9, 30, false),
            event(p1, "planning", 9, 15, 10, 0, false),
            event(p2, "1:1", 11, 0, 11, 30, false),
        ];
        let entries = analyze(&events, 15, 7);
        assert_eq!(entries.len(), 2);
        let p1_entry = entries.iter().find(|e| e.project_id == p1).unwrap();
        assert_eq!(p1_entry.computed_hours, 1.0);
        assert!(p1_entry.computed_title.contains("+1 more"));
    }

    #[test]
    fn empty_event_list_yields_no_entries() {
        assert!(analyze(&[], 15, 7).is_empty());
    }

    #[test]
    fn lone_all_day_event_computes_to_zero_hours() {
        let p = Uuid::new_v4();
        let mut e = event(p, "Company holiday", 0, 0, 0, 0, false);
        e.end = e.start + chrono::Duration::days(1);
        e.is_all_day = true;
        let entries = analyze(&[e], 15, 7);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].computed_hours, 0.0);
        assert_eq!(entries[0].calculation_details["is_all_day"], true);
    }

    #[test]
    fn all_day_event_alongside_a_timed_event_is_not_zeroed() {
        let p = Uuid::new_v4();
        let mut all_day = event(p, "Company holiday", 0, 0, 0, 0, false);
        all_day.end = all_day.start + chrono::Duration::days(1);
        all_day.is_all_day = true;
        let timed = event(p, "standup", 9, 0, 9, 30, false);
        let entries = analyze(&[all_day, timed], 15, 7);
        assert_eq!(entries.len(), 1);
        assert!(entries[0].computed_hours > 0.0);
    }

    #[test]
    fn analyze_is_idempotent_across_repeated_runs() {
        let p = Uuid::new_v4();
        let events = vec![event(p, "standup", 9, 0, 9, 30, false)];
        let first = analyze(&events, 15, 7);
        let second = analyze(&events, 15, 7);
        assert_eq!(first[0].computed_hours, second[0].computed_hours);
        assert_eq!(first[0].calculation_details, second[0].calculation_details);
    }
}
