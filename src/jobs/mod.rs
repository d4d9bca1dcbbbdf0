//! C4 — durable sync job queue: enqueue with coalescing, claim with
//! `SELECT ... FOR UPDATE SKIP LOCKED`, and retention cleanup. Hand-written
//! `sqlx::query`/`query_as` throughout, following the style of the teacher's
//! job CRUD layer rather than a query builder.

pub mod executor;
pub mod models;

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::Result;
use models::{JobStatus, JobType, SyncJob};

#[derive(Clone)]
pub struct JobQueue {
    pool: PgPool,
}

impl JobQueue {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Enqueues a sync job for `calendar_id`, coalescing with any pending
    /// job of the same type whose range (extended seven days on each side)
    /// overlaps the new one. Runs in a single transaction so two concurrent
    /// enqueues never both insert overlapping jobs.
    pub async fn enqueue(
        &self,
        calendar_id: Uuid,
        job_type: JobType,
        target_min_date: NaiveDate,
        target_max_date: NaiveDate,
        priority: i32,
    ) -> Result<Uuid> {
        let mut tx = self.pool.begin().await?;

        let coalesce_window = chrono::Duration::days(7);
        let search_min = target_min_date - coalesce_window;
        let search_max = target_max_date + coalesce_window;

        let overlapping: Vec<SyncJob> = sqlx::query_as(
            r#"
            SELECT * FROM calendar_sync_jobs
            WHERE calendar_id = $1 AND status = 'pending' AND job_type = $2
              AND target_min_date <= $4 AND target_max_date >= $3
            FOR UPDATE
            "#,
        )
        .bind(calendar_id)
        .bind(job_type)
        .bind(search_min)
        .bind(search_max)
        .fetch_all(&mut *tx)
        .await?;

        let (min, max) = overlapping.iter().fold((target_min_date, target_max_date), |(min, max), job| {
            (min.min(job.target_min_date), max.max(job.target_max_date))
        });

        for job in &overlapping {
            sqlx::query("DELETE FROM calendar_sync_jobs WHERE id = $1").bind(job.id).execute(&mut *tx).await?;
        }

        let id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO calendar_sync_jobs (id, calendar_id, job_type, target_min_date, target_max_date, status, priority)
            VALUES ($1, $2, $3, $4, $5, 'pending', $6)
            "#,
        )
        .bind(id)
        .bind(calendar_id)
        .bind(job_type)
        .bind(min)
        .bind(max)
        .bind(priority)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(id)
    }

    /// Atomically claims the highest-priority, oldest pending job. Two
    /// concurrent callers are guaranteed disjoint results: `SKIP LOCKED`
    /// means a row already locked by another claim is invisible to this
    /// query rather than blocking on it.
    pub async fn claim_next(&self, worker_id: &str) -> Result<Option<SyncJob>> {
        let mut tx = self.pool.begin().await?;

        let job: Option<SyncJob> = sqlx::query_as(
            r#"
            SELECT * FROM calendar_sync_jobs
            WHERE status = 'pending'
            ORDER BY priority DESC, created_at ASC
            FOR UPDATE SKIP LOCKED
            LIMIT 1
            "#,
        )
        .fetch_optional(&mut *tx)
        .await?;

        let Some(job) = job else {
            tx.commit().await?;
            return Ok(None);
        };

        sqlx::query(
            "UPDATE calendar_sync_jobs SET status = 'running', claimed_at = NOW(), claimed_by = $2 WHERE id = $1",
        )
        .bind(job.id)
        .bind(worker_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(Some(SyncJob {
            status: JobStatus::Running,
            claimed_at: Some(Utc::now()),
            claimed_by: Some(worker_id.to_string()),
            ..job
        }))
    }

    pub async fn mark_completed(&self, job_id: Uuid) -> Result<()> {
        sqlx::query("UPDATE calendar_sync_jobs SET status = 'completed', completed_at = NOW() WHERE id = $1")
            .bind(job_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn mark_failed(&self, job_id: Uuid, error_message: &str) -> Result<()> {
        sqlx::query(
            "UPDATE calendar_sync_jobs SET status = 'failed', completed_at = NOW(), error_message = $2 WHERE id = $1",
        )
        .bind(job_id)
        .bind(error_message)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Deletes completed/failed jobs older than `older_than`, per the
    /// retention window. The queue never relies on terminal jobs for
    /// correctness, so this is safe to run at any cadence.
    pub async fn retain_recent(&self, older_than: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM calendar_sync_jobs WHERE status IN ('completed', 'failed') AND completed_at < $1",
        )
        .bind(older_than)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Coalescing and claim-disjointness (S7) require a live Postgres
    // instance and are exercised in an integration test, not here.
    #[test]
    fn job_type_is_bindable_as_sqlx_text() {
        let _ = JobType::ExpandWatermarks;
    }
}
