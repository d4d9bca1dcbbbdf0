//! Integration coverage for `JobQueue`'s enqueue coalescing and the
//! `SKIP LOCKED` claim disjointness under concurrent claims. Skipped when
//! `DATABASE_URL` is unset.

mod support;

use chrono::NaiveDate;
use std::collections::HashSet;
use timecore::jobs::models::JobType;
use timecore::jobs::JobQueue;

#[tokio::test]
async fn enqueue_coalesces_overlapping_pending_jobs_of_the_same_type() {
    let Some(pool) = support::pool().await else { return };
    let (_user_id, _connection_id, calendar_id) = support::seed_calendar(&pool).await;
    let queue = JobQueue::new(pool.clone());

    let d = |y, m, day| NaiveDate::from_ymd_opt(y, m, day).unwrap();

    queue.enqueue(calendar_id, JobType::ExpandWatermarks, d(2026, 3, 1), d(2026, 3, 7), 0).await.unwrap();
    // Overlaps the first job's range once extended by the 7-day coalesce
    // window, so it should replace it with a widened range rather than add
    // a second row.
    queue.enqueue(calendar_id, JobType::ExpandWatermarks, d(2026, 3, 10), d(2026, 3, 14), 0).await.unwrap();

    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM calendar_sync_jobs WHERE calendar_id = $1")
        .bind(calendar_id)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(count, 1);

    let (min, max): (NaiveDate, NaiveDate) =
        sqlx::query_as("SELECT target_min_date, target_max_date FROM calendar_sync_jobs WHERE calendar_id = $1")
            .bind(calendar_id)
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(min, d(2026, 3, 1));
    assert_eq!(max, d(2026, 3, 14));
}

#[tokio::test]
async fn enqueue_does_not_coalesce_across_job_types() {
    let Some(pool) = support::pool().await else { return };
    let (_user_id, _connection_id, calendar_id) = support::seed_calendar(&pool).await;
    let queue = JobQueue::new(pool.clone());

    let d = |y, m, day| NaiveDate::from_ymd_opt(y, m, day).unwrap();

    queue.enqueue(calendar_id, JobType::ExpandWatermarks, d(2026, 3, 1), d(2026, 3, 7), 0).await.unwrap();
    queue.enqueue(calendar_id, JobType::IncrementalSync, d(2026, 3, 1), d(2026, 3, 7), 0).await.unwrap();

    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM calendar_sync_jobs WHERE calendar_id = $1")
        .bind(calendar_id)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(count, 2);
}

#[tokio::test]
async fn concurrent_claims_never_return_the_same_job() {
    let Some(pool) = support::pool().await else { return };
    let (_user_id, _connection_id, calendar_id) = support::seed_calendar(&pool).await;
    let queue = JobQueue::new(pool.clone());

    let d = |y, m, day| NaiveDate::from_ymd_opt(y, m, day).unwrap();
    for i in 0..5 {
        queue
            .enqueue(calendar_id, JobType::IncrementalSync, d(2026, 1, 1 + i * 30), d(2026, 1, 2 + i * 30), 0)
            .await
            .unwrap();
    }

    let mut handles = Vec::new();
    for worker in 0..5 {
        let queue = queue.clone();
        handles.push(tokio::spawn(async move { queue.claim_next(&format!("worker-{worker}")).await.unwrap() }));
    }

    let mut claimed_ids = HashSet::new();
    for handle in handles {
        if let Some(job) = handle.await.unwrap() {
            assert!(claimed_ids.insert(job.id), "two workers claimed the same job");
        }
    }
    assert_eq!(claimed_ids.len(), 5);
}

#[tokio::test]
async fn mark_completed_then_retain_recent_removes_old_terminal_jobs() {
    let Some(pool) = support::pool().await else { return };
    let (_user_id, _connection_id, calendar_id) = support::seed_calendar(&pool).await;
    let queue = JobQueue::new(pool.clone());

    let d = |y, m, day| NaiveDate::from_ymd_opt(y, m, day).unwrap();
    let id = queue.enqueue(calendar_id, JobType::InitialSync, d(2026, 1, 1), d(2026, 1, 7), 0).await.unwrap();
    let job = queue.claim_next("worker-1").await.unwrap().unwrap();
    assert_eq!(job.id, id);
    queue.mark_completed(job.id).await.unwrap();

    let cutoff = chrono::Utc::now() + chrono::Duration::seconds(1);
    let deleted = queue.retain_recent(cutoff).await.unwrap();
    assert_eq!(deleted, 1);
}
