//! Integration coverage for `TimeEntryStore`: materialization via
//! `reanalyze_one`, and the orphan-cleanup sweep's "never touch invoiced or
//! user-edited entries" guarantee. Skipped when `DATABASE_URL` is unset.

mod support;

use chrono::NaiveDate;
use serde_json::json;
use timecore::event_store::{EventStore, FetchedEvent};
use timecore::time_entries::analyzer::ComputedEntry;
use timecore::time_entries::store::TimeEntryStore;
use uuid::Uuid;

fn computed(project_id: Uuid, hours: f64, contributing: Vec<Uuid>) -> ComputedEntry {
    ComputedEntry {
        project_id,
        computed_hours: hours,
        computed_title: "Work".to_string(),
        computed_description: String::new(),
        calculation_details: json!({}),
        contributing_event_ids: contributing,
    }
}

#[tokio::test]
async fn reanalyze_one_inserts_then_updates_the_same_row() {
    let Some(pool) = support::pool().await else { return };
    let (user_id, _connection_id, _calendar_id) = support::seed_calendar(&pool).await;
    let project_id = support::seed_project(&pool, user_id).await;
    let store = TimeEntryStore::new(pool.clone());

    let date = NaiveDate::from_ymd_opt(2026, 3, 2).unwrap();
    store.reanalyze_one(user_id, date, &computed(project_id, 2.0, vec![]), &[]).await.unwrap();

    let entry = store.find(user_id, project_id, date).await.unwrap().unwrap();
    assert_eq!(entry.computed_hours, 2.0);
    assert!(!entry.is_materialized());

    store.reanalyze_one(user_id, date, &computed(project_id, 3.5, vec![]), &[]).await.unwrap();
    let same_entry = store.find(user_id, project_id, date).await.unwrap().unwrap();
    assert_eq!(same_entry.id, entry.id);
    assert_eq!(same_entry.computed_hours, 3.5);
}

#[tokio::test]
async fn orphan_cleanup_deletes_entries_whose_only_events_are_orphaned() {
    let Some(pool) = support::pool().await else { return };
    let (user_id, _connection_id, calendar_id) = support::seed_calendar(&pool).await;
    let project_id = support::seed_project(&pool, user_id).await;
    let events = EventStore::new(pool.clone());
    let store = TimeEntryStore::new(pool.clone());

    let start = chrono::Utc::now();
    let event = FetchedEvent {
        external_id: "ext-cleanup".to_string(),
        title: "Sync".to_string(),
        description: None,
        start_time: start,
        end_time: start + chrono::Duration::hours(1),
        attendees: vec![],
        is_recurring: false,
        response_status: None,
        transparency: None,
        is_all_day: false,
    };
    let mut tx = events.begin().await.unwrap();
    let event_id = events.upsert_event_with_tx(&mut tx, calendar_id, &event).await.unwrap();
    tx.commit().await.unwrap();

    let date = NaiveDate::from_ymd_opt(2026, 3, 2).unwrap();
    store.reanalyze_one(user_id, date, &computed(project_id, 1.0, vec![event_id]), &[event_id]).await.unwrap();

    // Not orphaned yet: the cleanup sweep must leave it alone.
    assert_eq!(store.run_orphan_cleanup(user_id).await.unwrap(), 0);

    sqlx::query("UPDATE calendar_events SET is_orphaned = true WHERE id = $1")
        .bind(event_id)
        .execute(&pool)
        .await
        .unwrap();

    let deleted = store.run_orphan_cleanup(user_id).await.unwrap();
    assert_eq!(deleted, 1);
    assert!(store.find(user_id, project_id, date).await.unwrap().is_none());
}

#[tokio::test]
async fn orphan_cleanup_spares_user_edited_and_invoiced_entries() {
    let Some(pool) = support::pool().await else { return };
    let (user_id, _connection_id, calendar_id) = support::seed_calendar(&pool).await;
    let project_id = support::seed_project(&pool, user_id).await;
    let events = EventStore::new(pool.clone());
    let store = TimeEntryStore::new(pool.clone());

    let start = chrono::Utc::now();
    let event = FetchedEvent {
        external_id: "ext-edited".to_string(),
        title: "Sync".to_string(),
        description: None,
        start_time: start,
        end_time: start + chrono::Duration::hours(1),
        attendees: vec![],
        is_recurring: false,
        response_status: None,
        transparency: None,
        is_all_day: false,
    };
    let mut tx = events.begin().await.unwrap();
    let event_id = events.upsert_event_with_tx(&mut tx, calendar_id, &event).await.unwrap();
    tx.commit().await.unwrap();

    let date = NaiveDate::from_ymd_opt(2026, 3, 3).unwrap();
    store.reanalyze_one(user_id, date, &computed(project_id, 1.0, vec![event_id]), &[event_id]).await.unwrap();

    let entry = store.find(user_id, project_id, date).await.unwrap().unwrap();
    store.set_user_values(entry.id, Some(1.5), None, None).await.unwrap();

    sqlx::query("UPDATE calendar_events SET is_orphaned = true WHERE id = $1")
        .bind(event_id)
        .execute(&pool)
        .await
        .unwrap();

    let deleted = store.run_orphan_cleanup(user_id).await.unwrap();
    assert_eq!(deleted, 0, "a user-edited entry must survive orphan cleanup even once its source event is gone");
}
