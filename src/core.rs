//! Core facade: a thin struct gluing the sync decision (C3), classification
//! (C5), and time entry (C6) components together behind the operation names
//! an API layer would call. Every operation takes an authenticated `user_id`
//! and scopes its queries to it; nothing here assumes a particular transport.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use sqlx::PgPool;
use uuid::Uuid;

use crate::calendar_client::CalendarClient;
use crate::classification::{ClassificationEngine, ClassificationRuleRow, PreviewResult};
use crate::error::{Error, Result};
use crate::event_store::{CalendarEvent, EventStore};
use crate::jobs::executor::JobExecutor;
use crate::jobs::models::JobType;
use crate::jobs::JobQueue;
use crate::models::{Invoice, InvoiceLineItem, InvoiceStatus, Project};
use crate::oauth::ConnectionCredentialStore;
use crate::sync_decision::{decide_range, CalendarState, Decision, WeekRange};
use crate::time_entries::store::TimeEntry;
use crate::time_entries::{ListedEntry, TimeEntryService};

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ConnectionSummary {
    pub id: Uuid,
    pub user_id: Uuid,
    pub provider: String,
    pub last_synced_at: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CalendarSummary {
    pub id: Uuid,
    pub connection_id: Uuid,
    pub display_name: String,
    pub is_selected: bool,
    pub needs_reauth: bool,
}

/// Runtime knobs the facade needs that would otherwise be threaded through
/// every call: the staleness/failure thresholds driving C3, and the scoring
/// floor/ceiling driving C5.
#[derive(Debug, Clone, Copy)]
pub struct CoreConfig {
    pub staleness_threshold: Duration,
    pub failure_threshold: u32,
    pub default_sync_window_weeks: (i64, i64),
    pub scoring_floor: f64,
    pub scoring_ceiling: f64,
}

#[derive(Clone)]
pub struct Core {
    pool: PgPool,
    events: EventStore,
    classification: ClassificationEngine,
    time_entries: TimeEntryService,
    queue: JobQueue,
    executor: JobExecutor,
    config: CoreConfig,
}

impl Core {
    pub fn new(
        pool: PgPool,
        calendar_client: Arc<dyn CalendarClient>,
        credentials: ConnectionCredentialStore,
        rounding_granularity_minutes: i64,
        rounding_pivot_minutes: i64,
        config: CoreConfig,
    ) -> Self {
        let events = EventStore::new(pool.clone());
        let queue = JobQueue::new(pool.clone());
        let executor = JobExecutor::new(
            queue.clone(),
            events.clone(),
            calendar_client,
            credentials,
            config.failure_threshold as i32,
        );
        Self {
            classification: ClassificationEngine::new(pool.clone()),
            time_entries: TimeEntryService::new(pool.clone(), rounding_granularity_minutes, rounding_pivot_minutes),
            events,
            queue,
            executor,
            pool,
            config,
        }
    }

    // ---- C1/C3/C4: events -------------------------------------------------

    /// Ensures every calendar week touching `[range_start, range_end]` is
    /// synced per the C3 decision table, then returns the events in range.
    /// `Blocked` calendars are served from cache with no sync attempt;
    /// `StaleRefresh`/`OutsideWindow`/`NoSyncedRange` trigger a synchronous
    /// fetch for the requested weeks before the read, plus a background
    /// expansion job for the rest of the default window.
    pub async fn list_events(&self, user_id: Uuid, range_start: NaiveDate, range_end: NaiveDate) -> Result<Vec<CalendarEvent>> {
        for calendar in self.calendars_for_user(user_id).await? {
            self.ensure_calendar_range_synced(&calendar, range_start, range_end).await?;
        }
        self.events.list_events(user_id, range_start, range_end, None, None).await
    }

    async fn ensure_calendar_range_synced(&self, calendar: &CalendarSummary, range_start: NaiveDate, range_end: NaiveDate) -> Result<()> {
        let full = self.events.get_calendar(calendar.id).await?;
        let state = CalendarState {
            low_water_mark: full.low_water_mark,
            high_water_mark: full.high_water_mark,
            last_synced_at: full.last_synced_at,
            needs_reauth: full.needs_reauth,
            sync_failure_count: full.sync_failure_count.max(0) as u32,
        };

        let decisions = decide_range(
            state,
            range_start,
            range_end,
            chrono::Utc::now(),
            self.config.staleness_threshold,
            self.config.failure_threshold,
            self.config.default_sync_window_weeks,
        );

        let mut synced_weeks: HashSet<(NaiveDate, NaiveDate)> = HashSet::new();
        let mut expansion: Option<(NaiveDate, NaiveDate)> = None;

        for (week, decision) in decisions {
            match decision {
                Decision::Blocked { .. } | Decision::Fresh => {}
                Decision::StaleRefresh => {
                    self.sync_incremental_or_range(calendar.id, week).await?;
                }
                Decision::NoSyncedRange { expand_to } => {
                    self.sync_week_once(calendar.id, week, &mut synced_weeks).await?;
                    expansion = Some(merge_range(expansion, expand_to));
                }
                Decision::OutsideWindow { missing, expand_to } => {
                    for missing_week in missing {
                        self.sync_week_once(calendar.id, missing_week, &mut synced_weeks).await?;
                    }
                    expansion = Some(merge_range(expansion, expand_to));
                }
            }
        }

        if let Some((min, max)) = expansion {
            self.queue.enqueue(calendar.id, JobType::ExpandWatermarks, min, max, 0).await?;
        }

        Ok(())
    }

    async fn sync_week_once(&self, calendar_id: Uuid, week: WeekRange, synced: &mut HashSet<(NaiveDate, NaiveDate)>) -> Result<()> {
        let key = (week.start, week.end);
        if synced.contains(&key) {
            return Ok(());
        }
        self.executor.sync_calendar_range(calendar_id, week.start, week.end).await?;
        synced.insert(key);
        Ok(())
    }

    async fn sync_incremental_or_range(&self, calendar_id: Uuid, week: WeekRange) -> Result<()> {
        match self.executor.sync_calendar_incremental(calendar_id).await {
            Ok(()) => Ok(()),
            Err(Error::DeltaTokenExpired) => self.executor.sync_calendar_range(calendar_id, week.start, week.end).await,
            Err(e) => Err(e),
        }
    }

    async fn calendars_for_user(&self, user_id: Uuid) -> Result<Vec<CalendarSummary>> {
        let rows: Vec<CalendarSummary> = sqlx::query_as(
            r#"
            SELECT cal.id, cal.connection_id, cal.display_name, cal.is_selected, cal.needs_reauth
            FROM calendars cal
            JOIN connections conn ON conn.id = cal.connection_id
            WHERE conn.user_id = $1 AND cal.is_selected = true
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn list_calendars(&self, user_id: Uuid) -> Result<Vec<CalendarSummary>> {
        let rows: Vec<CalendarSummary> = sqlx::query_as(
            r#"
            SELECT cal.id, cal.connection_id, cal.display_name, cal.is_selected, cal.needs_reauth
            FROM calendars cal
            JOIN connections conn ON conn.id = cal.connection_id
            WHERE conn.user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn update_calendar_selection(&self, user_id: Uuid, calendar_id: Uuid, is_selected: bool) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE calendars SET is_selected = $3
            WHERE id = $2 AND connection_id IN (SELECT id FROM connections WHERE user_id = $1)
            "#,
        )
        .bind(user_id)
        .bind(calendar_id)
        .bind(is_selected)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("calendar {calendar_id}")));
        }
        Ok(())
    }

    // ---- connections -------------------------------------------------------

    pub async fn list_connections(&self, user_id: Uuid) -> Result<Vec<ConnectionSummary>> {
        let rows: Vec<ConnectionSummary> =
            sqlx::query_as("SELECT id, user_id, provider, last_synced_at FROM connections WHERE user_id = $1")
                .bind(user_id)
                .fetch_all(&self.pool)
                .await?;
        Ok(rows)
    }

    /// Triggers an immediate sync for every calendar under a connection:
    /// incremental where a delta token exists, otherwise a full range fetch
    /// covering the default window.
    pub async fn sync_connection(&self, user_id: Uuid, connection_id: Uuid) -> Result<()> {
        let calendars: Vec<(Uuid,)> = sqlx::query_as(
            "SELECT cal.id FROM calendars cal JOIN connections conn ON conn.id = cal.connection_id WHERE conn.id = $1 AND conn.user_id = $2",
        )
        .bind(connection_id)
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        if calendars.is_empty() {
            return Err(Error::NotFound(format!("connection {connection_id}")));
        }

        let today = chrono::Utc::now().date_naive();
        for (calendar_id,) in calendars {
            match self.executor.sync_calendar_incremental(calendar_id).await {
                Ok(()) => {}
                Err(Error::DeltaTokenExpired) => {
                    let cal = self.events.get_calendar(calendar_id).await?;
                    let min = cal.low_water_mark.unwrap_or(today - chrono::Duration::weeks(4));
                    let max = cal.high_water_mark.unwrap_or(today + chrono::Duration::weeks(1));
                    self.executor.sync_calendar_range(calendar_id, min, max).await?;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    pub async fn disconnect(&self, user_id: Uuid, connection_id: Uuid) -> Result<()> {
        let result = sqlx::query("DELETE FROM connections WHERE id = $1 AND user_id = $2")
            .bind(connection_id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("connection {connection_id}")));
        }
        Ok(())
    }

    // ---- classification -----------------------------------------------------

    /// Records a manual classification decision for one event and reanalyzes
    /// the day it falls on so its time entry reflects the change immediately.
    pub async fn classify_event(&self, user_id: Uuid, event_id: Uuid, project_id: Option<Uuid>, skip: bool) -> Result<()> {
        let (event, owner) = self.events.get_event_with_owner(event_id).await?;
        if owner != user_id {
            return Err(Error::NotFound(format!("event {event_id}")));
        }
        self.classification.classify_manually(event_id, project_id, skip).await?;
        self.time_entries.reanalyze_day(user_id, event.start_time.date_naive()).await
    }

    pub async fn apply_rules(&self, user_id: Uuid, range_start: NaiveDate, range_end: NaiveDate, include_manual: bool) -> Result<usize> {
        let updated = self
            .classification
            .apply_rules(user_id, range_start, range_end, include_manual, self.config.scoring_floor, self.config.scoring_ceiling)
            .await?;
        let mut cursor = range_start;
        while cursor <= range_end {
            self.time_entries.reanalyze_day(user_id, cursor).await?;
            cursor = cursor.succ_opt().expect("date arithmetic within a bounded range");
        }
        Ok(updated)
    }

    pub async fn preview_rule(&self, user_id: Uuid, query: &str, project_id: Uuid, range_start: NaiveDate, range_end: NaiveDate) -> Result<PreviewResult> {
        self.classification.preview(user_id, query, project_id, range_start, range_end).await
    }

    pub async fn list_rules(&self, user_id: Uuid) -> Result<Vec<ClassificationRuleRow>> {
        self.classification.list_rules(user_id).await
    }

    pub async fn create_rule(&self, user_id: Uuid, query: &str, weight: f64, project_id: Option<Uuid>, attended: Option<bool>) -> Result<Uuid> {
        self.classification.create_rule(user_id, query, weight, project_id, attended).await
    }

    pub async fn update_rule(&self, user_id: Uuid, rule_id: Uuid, query: Option<&str>, weight: Option<f64>, is_enabled: Option<bool>) -> Result<()> {
        self.classification.update_rule(user_id, rule_id, query, weight, is_enabled).await
    }

    pub async fn delete_rule(&self, user_id: Uuid, rule_id: Uuid) -> Result<()> {
        self.classification.delete_rule(user_id, rule_id).await
    }

    // ---- time entries -------------------------------------------------------

    pub async fn list_time_entries(&self, user_id: Uuid, range_start: NaiveDate, range_end: NaiveDate) -> Result<Vec<ListedEntry>> {
        self.time_entries.list_entries(user_id, range_start, range_end).await
    }

    pub async fn create_time_entry(&self, user_id: Uuid, project_id: Uuid, date: NaiveDate, hours: f64, title: &str, description: &str) -> Result<Uuid> {
        self.time_entries.entries().create_manual(user_id, project_id, date, hours, title, description).await
    }

    pub async fn update_time_entry(&self, id: Uuid, hours: Option<f64>, title: Option<String>, description: Option<String>) -> Result<()> {
        self.time_entries.entries().set_user_values(id, hours, title, description).await
    }

    pub async fn delete_time_entry(&self, id: Uuid) -> Result<()> {
        self.time_entries.entries().delete(id).await
    }

    /// Sets `is_locked` on every event and materialized entry for `user_id`
    /// on `date`. Locking freezes both sides so a later sync or reanalysis
    /// cannot touch a day once it has been reviewed and closed out.
    pub async fn lock_day(&self, user_id: Uuid, date: NaiveDate) -> Result<()> {
        self.set_day_lock(user_id, date, date, true).await
    }

    pub async fn unlock_day(&self, user_id: Uuid, date: NaiveDate) -> Result<()> {
        self.set_day_lock(user_id, date, date, false).await
    }

    pub async fn lock_week(&self, user_id: Uuid, week_start: NaiveDate) -> Result<()> {
        self.set_day_lock(user_id, week_start, week_start + chrono::Duration::days(6), true).await
    }

    pub async fn unlock_week(&self, user_id: Uuid, week_start: NaiveDate) -> Result<()> {
        self.set_day_lock(user_id, week_start, week_start + chrono::Duration::days(6), false).await
    }

    async fn set_day_lock(&self, user_id: Uuid, range_start: NaiveDate, range_end: NaiveDate, locked: bool) -> Result<()> {
        let range_start_ts = range_start.and_hms_opt(0, 0, 0).unwrap().and_utc();
        let range_end_ts = (range_end + chrono::Duration::days(1)).and_hms_opt(0, 0, 0).unwrap().and_utc();

        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            UPDATE calendar_events ev
            SET is_locked = $4
            FROM calendars cal JOIN connections conn ON conn.id = cal.connection_id
            WHERE ev.calendar_id = cal.id AND conn.user_id = $1
              AND ev.start_time >= $2 AND ev.start_time < $3
            "#,
        )
        .bind(user_id)
        .bind(range_start_ts)
        .bind(range_end_ts)
        .bind(locked)
        .execute(&mut *tx)
        .await?;

        sqlx::query("UPDATE time_entries SET is_locked = $4 WHERE user_id = $1 AND entry_date >= $2 AND entry_date <= $3")
            .bind(user_id)
            .bind(range_start)
            .bind(range_end)
            .bind(locked)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    // ---- invoices -----------------------------------------------------------

    /// Materializes every day in `[period_start, period_end]` for `project_id`,
    /// then attaches every not-yet-invoiced, non-suppressed entry in range to
    /// a new draft invoice. Line items reference the entry directly rather
    /// than copying hours, since invoicing locks the entry (see `models`).
    pub async fn create_invoice(
        &self,
        project_id: Uuid,
        billing_period_id: Uuid,
        invoice_number: &str,
        period_start: NaiveDate,
        period_end: NaiveDate,
    ) -> Result<Uuid> {
        let (owner_user_id,): (Uuid,) = sqlx::query_as("SELECT user_id FROM projects WHERE id = $1")
            .bind(project_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::NotFound(format!("project {project_id}")))?;

        let mut cursor = period_start;
        while cursor <= period_end {
            self.time_entries.reanalyze_day(owner_user_id, cursor).await?;
            cursor = cursor.succ_opt().expect("date arithmetic within a bounded range");
        }

        let entries: Vec<TimeEntry> = sqlx::query_as::<_, TimeEntry>(
            r#"
            SELECT * FROM time_entries
            WHERE project_id = $1 AND entry_date >= $2 AND entry_date <= $3
              AND invoice_id IS NULL AND is_suppressed = false
            "#,
        )
        .bind(project_id)
        .bind(period_start)
        .bind(period_end)
        .fetch_all(&self.pool)
        .await?;

        let invoice_id = Uuid::new_v4();
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            INSERT INTO invoices (id, project_id, billing_period_id, invoice_number, period_start, period_end, status)
            VALUES ($1, $2, $3, $4, $5, $6, 'draft')
            "#,
        )
        .bind(invoice_id)
        .bind(project_id)
        .bind(billing_period_id)
        .bind(invoice_number)
        .bind(period_start)
        .bind(period_end)
        .execute(&mut *tx)
        .await?;

        for entry in &entries {
            sqlx::query("INSERT INTO invoice_line_items (id, invoice_id, time_entry_id) VALUES ($1, $2, $3)")
                .bind(Uuid::new_v4())
                .bind(invoice_id)
                .bind(entry.id)
                .execute(&mut *tx)
                .await?;
            sqlx::query(
                "UPDATE time_entries SET invoice_id = $2, snapshot_computed_hours = computed_hours, is_locked = true WHERE id = $1",
            )
            .bind(entry.id)
            .bind(invoice_id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(invoice_id)
    }

    pub async fn get_invoice(&self, invoice_id: Uuid) -> Result<(Invoice, Vec<InvoiceLineItem>)> {
        let invoice: Invoice = sqlx::query_as::<_, Invoice>("SELECT * FROM invoices WHERE id = $1")
            .bind(invoice_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::NotFound(format!("invoice {invoice_id}")))?;
        let line_items: Vec<InvoiceLineItem> = sqlx::query_as::<_, InvoiceLineItem>("SELECT * FROM invoice_line_items WHERE invoice_id = $1")
            .bind(invoice_id)
            .fetch_all(&self.pool)
            .await?;
        Ok((invoice, line_items))
    }

    pub async fn update_invoice_status(&self, invoice_id: Uuid, status: InvoiceStatus) -> Result<()> {
        let result = sqlx::query("UPDATE invoices SET status = $2 WHERE id = $1")
            .bind(invoice_id)
            .bind(status)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("invoice {invoice_id}")));
        }
        Ok(())
    }

    /// Only a draft invoice can be deleted: once `Sent`, the line items and
    /// the entries they lock are expected to stay put even if the invoice
    /// record itself is later voided by other means.
    pub async fn delete_invoice(&self, invoice_id: Uuid) -> Result<()> {
        let (invoice, _) = self.get_invoice(invoice_id).await?;
        if invoice.status != InvoiceStatus::Draft {
            return Err(Error::Precondition(format!("invoice {invoice_id} is not a draft")));
        }

        let mut tx = self.pool.begin().await?;
        sqlx::query("UPDATE time_entries SET invoice_id = NULL, is_locked = false WHERE invoice_id = $1")
            .bind(invoice_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM invoice_line_items WHERE invoice_id = $1").bind(invoice_id).execute(&mut *tx).await?;
        sqlx::query("DELETE FROM invoices WHERE id = $1").bind(invoice_id).execute(&mut *tx).await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn get_project(&self, project_id: Uuid) -> Result<Project> {
        sqlx::query_as::<_, Project>("SELECT * FROM projects WHERE id = $1")
            .bind(project_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::NotFound(format!("project {project_id}")))
    }
}

fn merge_range(existing: Option<(NaiveDate, NaiveDate)>, next: (NaiveDate, NaiveDate)) -> (NaiveDate, NaiveDate) {
    match existing {
        Some((min, max)) => (min.min(next.0), max.max(next.1)),
        None => next,
    }
}
