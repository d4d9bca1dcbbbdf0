//! Integration coverage for `EventStore`'s upsert and orphan-marking
//! behavior, run against a real Postgres instance. Skipped when
//! `DATABASE_URL` is unset.

mod support;

use chrono::{NaiveDate, TimeZone, Utc};
use timecore::event_store::{EventStore, FetchedEvent};

fn fetched(external_id: &str, start: chrono::DateTime<Utc>, end: chrono::DateTime<Utc>) -> FetchedEvent {
    FetchedEvent {
        external_id: external_id.to_string(),
        title: "Standup".to_string(),
        description: None,
        start_time: start,
        end_time: end,
        attendees: vec![],
        is_recurring: false,
        response_status: None,
        transparency: None,
        is_all_day: false,
    }
}

#[tokio::test]
async fn upsert_then_refetch_preserves_classification() {
    let Some(pool) = support::pool().await else { return };
    let (_user_id, _connection_id, calendar_id) = support::seed_calendar(&pool).await;
    let events = EventStore::new(pool.clone());

    let start = Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap();
    let end = Utc.with_ymd_and_hms(2026, 3, 2, 9, 30, 0).unwrap();

    let mut tx = events.begin().await.unwrap();
    let event_id = events.upsert_event_with_tx(&mut tx, calendar_id, &fetched("ext-1", start, end)).await.unwrap();
    tx.commit().await.unwrap();

    sqlx::query("UPDATE calendar_events SET classification_status = 'classified' WHERE id = $1")
        .bind(event_id)
        .execute(&pool)
        .await
        .unwrap();

    // Re-fetch with a changed title; classification fields must survive.
    let mut refetched = fetched("ext-1", start, end);
    refetched.title = "Standup (renamed)".to_string();
    let mut tx = events.begin().await.unwrap();
    let same_id = events.upsert_event_with_tx(&mut tx, calendar_id, &refetched).await.unwrap();
    tx.commit().await.unwrap();

    assert_eq!(event_id, same_id);

    let row: (String, String) =
        sqlx::query_as("SELECT title, classification_status FROM calendar_events WHERE id = $1")
            .bind(event_id)
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(row.0, "Standup (renamed)");
    assert_eq!(row.1, "classified");
}

#[tokio::test]
async fn orphan_marking_includes_events_starting_on_the_range_max() {
    let Some(pool) = support::pool().await else { return };
    let (_user_id, _connection_id, calendar_id) = support::seed_calendar(&pool).await;
    let events = EventStore::new(pool.clone());

    let min = NaiveDate::from_ymd_opt(2026, 3, 1).unwrap();
    let max = NaiveDate::from_ymd_opt(2026, 3, 7).unwrap();

    // Starts exactly on `max` at midnight — the boundary the off-by-one bug
    // used to exclude from ever being orphan-marked.
    let boundary_start = max.and_hms_opt(0, 0, 0).unwrap().and_utc();
    let boundary_end = boundary_start + chrono::Duration::hours(1);

    let mut tx = events.begin().await.unwrap();
    let event_id = events.upsert_event_with_tx(&mut tx, calendar_id, &fetched("ext-boundary", boundary_start, boundary_end)).await.unwrap();
    tx.commit().await.unwrap();

    // Simulate a fetch that no longer returns this event: kept set is empty,
    // and the fetch window is extended one day past `max` as the sync path
    // now does when calling `mark_orphaned_in_range_with_tx`.
    let kept = std::collections::HashSet::new();
    let mut tx = events.begin().await.unwrap();
    let affected = events
        .mark_orphaned_in_range_with_tx(&mut tx, calendar_id, &kept, min, max + chrono::Duration::days(1))
        .await
        .unwrap();
    tx.commit().await.unwrap();

    assert_eq!(affected, 1);

    let (is_orphaned,): (bool,) = sqlx::query_as("SELECT is_orphaned FROM calendar_events WHERE id = $1")
        .bind(event_id)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert!(is_orphaned, "event starting exactly on `max` must be orphan-marked");
}

#[tokio::test]
async fn orphan_marking_spares_kept_events() {
    let Some(pool) = support::pool().await else { return };
    let (_user_id, _connection_id, calendar_id) = support::seed_calendar(&pool).await;
    let events = EventStore::new(pool.clone());

    let min = NaiveDate::from_ymd_opt(2026, 3, 1).unwrap();
    let max = NaiveDate::from_ymd_opt(2026, 3, 7).unwrap();
    let start = min.and_hms_opt(10, 0, 0).unwrap().and_utc();
    let end = start + chrono::Duration::hours(1);

    let mut tx = events.begin().await.unwrap();
    let event_id = events.upsert_event_with_tx(&mut tx, calendar_id, &fetched("ext-kept", start, end)).await.unwrap();
    tx.commit().await.unwrap();

    let mut kept = std::collections::HashSet::new();
    kept.insert("ext-kept".to_string());

    let mut tx = events.begin().await.unwrap();
    events.mark_orphaned_in_range_with_tx(&mut tx, calendar_id, &kept, min, max + chrono::Duration::days(1)).await.unwrap();
    tx.commit().await.unwrap();

    let (is_orphaned,): (bool,) = sqlx::query_as("SELECT is_orphaned FROM calendar_events WHERE id = $1")
        .bind(event_id)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert!(!is_orphaned);
}
