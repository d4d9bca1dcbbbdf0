//! Worker loop: claim a job, run it, commit or fail. Grounded on the
//! teacher's `JobExecutor::run_job` shape (fetch → mark running → timer →
//! dispatch on job type → record metrics/log → update terminal status), but
//! driven by `claim_next`'s `SKIP LOCKED` claim instead of a passed-in job id,
//! and with `sync_job`/`transform_job` dispatch replaced by the two sync job
//! kinds this core runs.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::NaiveDate;
use uuid::Uuid;

use crate::calendar_client::{CalendarClient, Credentials};
use crate::error::Result;
use crate::event_store::EventStore;
use crate::observability::JobTimer;
use crate::oauth::ConnectionCredentialStore;

use super::models::{JobType, SyncJob};
use super::JobQueue;

#[derive(Clone)]
pub struct JobExecutor {
    queue: JobQueue,
    events: EventStore,
    calendar_client: Arc<dyn CalendarClient>,
    credentials: ConnectionCredentialStore,
    failure_threshold: i32,
}

impl JobExecutor {
    pub fn new(
        queue: JobQueue,
        events: EventStore,
        calendar_client: Arc<dyn CalendarClient>,
        credentials: ConnectionCredentialStore,
        failure_threshold: i32,
    ) -> Self {
        Self { queue, events, calendar_client, credentials, failure_threshold }
    }

    /// Polls for work until `claim_next` returns `None`, then sleeps for
    /// `poll_interval`. Intended to be run as one of `job_worker_count`
    /// concurrently spawned tasks; `SKIP LOCKED` makes concurrent instances
    /// safe without further coordination.
    pub async fn run_loop(&self, worker_id: &str, poll_interval: std::time::Duration) -> ! {
        loop {
            match self.queue.claim_next(worker_id).await {
                Ok(Some(job)) => {
                    if let Err(e) = self.run_job(job).await {
                        tracing::error!(worker_id, error = %e, "job run returned an error after terminal status was recorded");
                    }
                }
                Ok(None) => tokio::time::sleep(poll_interval).await,
                Err(e) => {
                    tracing::error!(worker_id, error = %e, "failed to claim next job");
                    tokio::time::sleep(poll_interval).await;
                }
            }
        }
    }

    async fn run_job(&self, job: SyncJob) -> Result<()> {
        let timer = JobTimer::start(&job.job_type.to_string());
        tracing::info!(job_id = %job.id, job_type = %job.job_type, calendar_id = %job.calendar_id, "starting job execution");

        let result = match job.job_type {
            JobType::ExpandWatermarks | JobType::InitialSync => {
                self.sync_calendar_range(job.calendar_id, job.target_min_date, job.target_max_date).await
            }
            JobType::IncrementalSync => match self.sync_calendar_incremental(job.calendar_id).await {
                Err(crate::error::Error::DeltaTokenExpired) => {
                    let calendar = self.events.get_calendar(job.calendar_id).await?;
                    let (min, max) = match (calendar.low_water_mark, calendar.high_water_mark) {
                        (Some(low), Some(high)) => (low, high),
                        _ => (job.target_min_date, job.target_max_date),
                    };
                    self.sync_calendar_range(job.calendar_id, min, max).await
                }
                other => other,
            },
        };

        match result {
            Ok(()) => {
                timer.success();
                self.queue.mark_completed(job.id).await?;
            }
            Err(e) => {
                timer.failure(&e.to_string());
                self.events.record_sync_failure(job.calendar_id).await?;
                self.queue.mark_failed(job.id, &e.to_string()).await?;
                return Err(e);
            }
        }

        Ok(())
    }

    /// Fetches `[min, max]` for a calendar and applies the result
    /// transactionally: upsert events, mark the complement orphaned, widen
    /// water marks, and (if the provider gave one) store a fresh delta
    /// token. Used for both the initial-sync and watermark-expansion job
    /// types — they differ only in which range they target.
    pub async fn sync_calendar_range(&self, calendar_id: Uuid, min: NaiveDate, max: NaiveDate) -> Result<()> {
        let calendar = self.events.get_calendar(calendar_id).await?;
        if calendar.is_blocked(self.failure_threshold) {
            return Err(crate::error::Error::Precondition(format!(
                "calendar {calendar_id} is blocked from sync (needs_reauth or failure threshold reached)"
            )));
        }
        let creds = self.load_credentials(calendar_id).await?;

        let min_time = min.and_hms_opt(0, 0, 0).unwrap().and_utc();
        let max_time = (max + chrono::Duration::days(1)).and_hms_opt(0, 0, 0).unwrap().and_utc();

        let fetch = self.calendar_client.fetch_events(&creds, &calendar.external_id, min_time, max_time).await?;

        let mut tx = self.events.begin().await?;
        let mut kept = HashSet::with_capacity(fetch.events.len());
        for event in &fetch.events {
            self.events.upsert_event_with_tx(&mut tx, calendar_id, event).await?;
            kept.insert(event.external_id.clone());
        }
        self.events.mark_orphaned_in_range_with_tx(&mut tx, calendar_id, &kept, min, max + chrono::Duration::days(1)).await?;
        self.events.update_water_marks_with_tx(&mut tx, calendar_id, min, max).await?;
        self.events.update_delta_token_with_tx(&mut tx, calendar_id, fetch.next_delta_token.as_deref()).await?;
        tx.commit().await?;

        tracing::info!(calendar_id = %calendar_id, events = fetch.events.len(), %min, %max, "synced calendar range");
        Ok(())
    }

    /// Runs a delta-token-based incremental refresh. On `DeltaTokenExpired`
    /// the caller is expected to fall back to enqueuing a range-based sync
    /// job instead (the token is cleared here so a retry doesn't loop).
    pub async fn sync_calendar_incremental(&self, calendar_id: Uuid) -> Result<()> {
        let calendar = self.events.get_calendar(calendar_id).await?;
        if calendar.is_blocked(self.failure_threshold) {
            return Err(crate::error::Error::Precondition(format!(
                "calendar {calendar_id} is blocked from sync (needs_reauth or failure threshold reached)"
            )));
        }
        let Some(delta_token) = calendar.delta_token.clone() else {
            return Err(crate::error::Error::DeltaTokenExpired);
        };
        let creds = self.load_credentials(calendar_id).await?;

        let fetch = match self.calendar_client.fetch_events_incremental(&creds, &calendar.external_id, &delta_token).await {
            Ok(f) => f,
            Err(crate::error::Error::DeltaTokenExpired) => {
                self.events.clear_delta_token(calendar_id).await?;
                return Err(crate::error::Error::DeltaTokenExpired);
            }
            Err(e) => return Err(e),
        };

        let mut tx = self.events.begin().await?;
        for event in &fetch.upserted {
            self.events.upsert_event_with_tx(&mut tx, calendar_id, event).await?;
        }
        if !fetch.deleted_external_ids.is_empty() {
            self.events.mark_deleted_by_external_ids_with_tx(&mut tx, calendar_id, &fetch.deleted_external_ids).await?;
        }
        self.events.update_delta_token_with_tx(&mut tx, calendar_id, fetch.next_delta_token.as_deref()).await?;
        tx.commit().await?;

        tracing::info!(calendar_id = %calendar_id, upserted = fetch.upserted.len(), deleted = fetch.deleted_external_ids.len(), "incremental sync applied");
        Ok(())
    }

    async fn load_credentials(&self, calendar_id: Uuid) -> Result<Credentials> {
        let calendar = self.events.get_calendar(calendar_id).await?;
        match self.credentials.load(calendar.connection_id).await {
            Ok(creds) => Ok(creds),
            Err(crate::error::Error::NeedsReauth(reason)) => {
                self.events.set_needs_reauth(calendar.connection_id).await?;
                Err(crate::error::Error::NeedsReauth(reason))
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    // The worker loop and sync application require a live Postgres
    // instance and a CalendarClient double; covered by an integration test
    // rather than here.
}
