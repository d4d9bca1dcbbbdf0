//! Durable storage of connections, calendars, and calendar events.
//!
//! Grounded on `GoogleCalendarStream::sync_internal`'s transactional
//! upsert-then-mark-orphaned-then-bump-watermark pattern, and on the
//! hand-written `sqlx::query`/`query_as` style used throughout `jobs::mod`
//! rather than a query builder.

use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value;
use sqlx::{PgPool, Postgres, Transaction};
use std::collections::HashSet;
use uuid::Uuid;

use crate::error::{Error, Result};

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Connection {
    pub id: Uuid,
    pub user_id: Uuid,
    pub provider: String,
    pub encrypted_credentials: String,
    pub delta_token: Option<String>,
    pub last_synced_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Calendar {
    pub id: Uuid,
    pub connection_id: Uuid,
    pub external_id: String,
    pub display_name: String,
    pub color: Option<String>,
    pub is_primary: bool,
    pub is_selected: bool,
    pub delta_token: Option<String>,
    pub low_water_mark: Option<NaiveDate>,
    pub high_water_mark: Option<NaiveDate>,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub sync_failure_count: i32,
    pub needs_reauth: bool,
}

impl Calendar {
    pub fn is_blocked(&self, failure_threshold: i32) -> bool {
        self.needs_reauth || self.sync_failure_count >= failure_threshold
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
pub enum ClassificationStatus {
    Pending,
    Classified,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
pub enum ClassificationSource {
    Rule,
    Fingerprint,
    Manual,
    Llm,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CalendarEvent {
    pub id: Uuid,
    pub calendar_id: Uuid,
    pub external_id: String,
    pub title: String,
    pub description: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub attendees: Value,
    pub is_recurring: bool,
    pub response_status: Option<String>,
    pub transparency: Option<String>,
    pub is_orphaned: bool,
    pub is_suppressed: bool,
    pub is_locked: bool,
    pub is_skipped: bool,
    pub is_all_day: bool,
    pub classification_status: ClassificationStatus,
    pub classification_source: Option<ClassificationSource>,
    pub classification_confidence: Option<f64>,
    pub needs_review: bool,
    pub project_id: Option<Uuid>,
    pub classification_version: i32,
}

impl CalendarEvent {
    pub fn attendee_emails(&self) -> Vec<String> {
        self.attendees
            .as_array()
            .map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
            .unwrap_or_default()
    }
}

/// One event as fetched from a provider, before it is assigned a calendar
/// and stored. Provider-specific wire shapes are translated into this by
/// the calendar client adapter (see `calendar_client::google`).
#[derive(Debug, Clone)]
pub struct FetchedEvent {
    pub external_id: String,
    pub title: String,
    pub description: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub attendees: Vec<String>,
    pub is_recurring: bool,
    pub response_status: Option<String>,
    pub transparency: Option<String>,
    pub is_all_day: bool,
}

#[derive(Clone)]
pub struct EventStore {
    pool: PgPool,
}

impl EventStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Upsert a single event within a caller-managed transaction. Classification
    /// fields are deliberately excluded from the update clause: a re-fetch of
    /// an already-classified event must not clobber its classification.
    pub async fn upsert_event_with_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        calendar_id: Uuid,
        event: &FetchedEvent,
    ) -> Result<Uuid> {
        let attendees = serde_json::to_value(&event.attendees)?;
        let row: (Uuid,) = sqlx::query_as(
            r#"
            INSERT INTO calendar_events (
                id, calendar_id, external_id, title, description, start_time, end_time,
                attendees, is_recurring, response_status, transparency, is_all_day, is_orphaned,
                classification_status
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, false, 'pending')
            ON CONFLICT (calendar_id, external_id) DO UPDATE SET
                title = EXCLUDED.title,
                description = EXCLUDED.description,
                start_time = EXCLUDED.start_time,
                end_time = EXCLUDED.end_time,
                attendees = EXCLUDED.attendees,
                is_recurring = EXCLUDED.is_recurring,
                response_status = EXCLUDED.response_status,
                transparency = EXCLUDED.transparency,
                is_all_day = EXCLUDED.is_all_day,
                is_orphaned = false
            RETURNING id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(calendar_id)
        .bind(&event.external_id)
        .bind(&event.title)
        .bind(&event.description)
        .bind(event.start_time)
        .bind(event.end_time)
        .bind(attendees)
        .bind(event.is_recurring)
        .bind(&event.response_status)
        .bind(&event.transparency)
        .bind(event.is_all_day)
        .fetch_one(&mut **tx)
        .await?;

        Ok(row.0)
    }

    /// Marks events in `[min, max)` for the calendar orphaned unless their
    /// external id is in `kept_external_ids`. Run inside the same
    /// transaction as the upserts for the fetch that produced the kept set.
    pub async fn mark_orphaned_in_range_with_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        calendar_id: Uuid,
        kept_external_ids: &HashSet<String>,
        min: NaiveDate,
        max: NaiveDate,
    ) -> Result<u64> {
        let kept: Vec<String> = kept_external_ids.iter().cloned().collect();
        let result = sqlx::query(
            r#"
            UPDATE calendar_events
            SET is_orphaned = true
            WHERE calendar_id = $1
              AND start_time >= $2 AND start_time < $3
              AND NOT (external_id = ANY($4))
              AND is_orphaned = false
            "#,
        )
        .bind(calendar_id)
        .bind(min.and_hms_opt(0, 0, 0).unwrap().and_utc())
        .bind(max.and_hms_opt(0, 0, 0).unwrap().and_utc())
        .bind(&kept)
        .execute(&mut **tx)
        .await?;

        Ok(result.rows_affected())
    }

    /// Marks specific external ids orphaned regardless of their date, used
    /// for provider-reported deletions from an incremental (delta-token)
    /// fetch rather than a full-range reconciliation.
    pub async fn mark_deleted_by_external_ids_with_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        calendar_id: Uuid,
        external_ids: &[String],
    ) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE calendar_events SET is_orphaned = true WHERE calendar_id = $1 AND external_id = ANY($2)",
        )
        .bind(calendar_id)
        .bind(external_ids)
        .execute(&mut **tx)
        .await?;
        Ok(result.rows_affected())
    }

    /// Widens the water marks to cover `new_low..new_high`, taking the union
    /// with any existing marks. Monotonic, so concurrent callers (on-demand
    /// path and worker path) converge safely without coordination.
    pub async fn update_water_marks_with_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        calendar_id: Uuid,
        new_low: NaiveDate,
        new_high: NaiveDate,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE calendars
            SET low_water_mark = LEAST(COALESCE(low_water_mark, $2), $2),
                high_water_mark = GREATEST(COALESCE(high_water_mark, $3), $3),
                last_synced_at = NOW(),
                sync_failure_count = 0
            WHERE id = $1
            "#,
        )
        .bind(calendar_id)
        .bind(new_low)
        .bind(new_high)
        .execute(&mut **tx)
        .await?;

        Ok(())
    }

    pub async fn update_delta_token_with_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        calendar_id: Uuid,
        token: Option<&str>,
    ) -> Result<()> {
        sqlx::query("UPDATE calendars SET delta_token = $2 WHERE id = $1")
            .bind(calendar_id)
            .bind(token)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    pub async fn clear_delta_token(&self, calendar_id: Uuid) -> Result<()> {
        sqlx::query("UPDATE calendars SET delta_token = NULL WHERE id = $1")
            .bind(calendar_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn record_sync_failure(&self, calendar_id: Uuid) -> Result<()> {
        sqlx::query("UPDATE calendars SET sync_failure_count = sync_failure_count + 1 WHERE id = $1")
            .bind(calendar_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Blocks background sync for every calendar under the connection until
    /// the user reconnects.
    pub async fn set_needs_reauth(&self, connection_id: Uuid) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE calendars SET needs_reauth = true
            WHERE connection_id = $1
            "#,
        )
        .bind(connection_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_calendar(&self, calendar_id: Uuid) -> Result<Calendar> {
        sqlx::query_as::<_, Calendar>("SELECT * FROM calendars WHERE id = $1")
            .bind(calendar_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::NotFound(format!("calendar {calendar_id}")))
    }

    /// Fetches a single event together with the user id that owns it
    /// (through calendar → connection), for callers that only have an event
    /// id (e.g. a direct classification request) and need to scope a
    /// reanalysis to the owning user.
    pub async fn get_event_with_owner(&self, event_id: Uuid) -> Result<(CalendarEvent, Uuid)> {
        let event = sqlx::query_as::<_, CalendarEvent>("SELECT * FROM calendar_events WHERE id = $1")
            .bind(event_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::NotFound(format!("event {event_id}")))?;

        let (user_id,): (Uuid,) = sqlx::query_as(
            r#"
            SELECT conn.user_id FROM calendar_events ev
            JOIN calendars cal ON cal.id = ev.calendar_id
            JOIN connections conn ON conn.id = cal.connection_id
            WHERE ev.id = $1
            "#,
        )
        .bind(event_id)
        .fetch_one(&self.pool)
        .await?;

        Ok((event, user_id))
    }

    pub async fn begin(&self) -> Result<Transaction<'_, Postgres>> {
        Ok(self.pool.begin().await?)
    }

    /// Lists events for a user within a date range, excluding orphaned
    /// events and events on deselected calendars.
    pub async fn list_events(
        &self,
        user_id: Uuid,
        range_start: NaiveDate,
        range_end: NaiveDate,
        status: Option<ClassificationStatus>,
        connection_id: Option<Uuid>,
    ) -> Result<Vec<CalendarEvent>> {
        let range_start_ts = range_start.and_hms_opt(0, 0, 0).unwrap().and_utc();
        let range_end_ts = (range_end + chrono::Duration::days(1)).and_hms_opt(0, 0, 0).unwrap().and_utc();

        let rows = sqlx::query_as::<_, CalendarEvent>(
            r#"
            SELECT ev.* FROM calendar_events ev
            JOIN calendars cal ON cal.id = ev.calendar_id
            JOIN connections conn ON conn.id = cal.connection_id
            WHERE conn.user_id = $1
              AND cal.is_selected = true
              AND ev.is_orphaned = false
              AND ev.start_time < $3
              AND ev.end_time >= $2
              AND ($4::text IS NULL OR ev.classification_status = $4)
              AND ($5::uuid IS NULL OR conn.id = $5)
            ORDER BY ev.start_time
            "#,
        )
        .bind(user_id)
        .bind(range_start_ts)
        .bind(range_end_ts)
        .bind(status.map(|s| match s {
            ClassificationStatus::Pending => "pending",
            ClassificationStatus::Classified => "classified",
        }))
        .bind(connection_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn calendar_is_blocked_on_reauth() {
        let cal = Calendar {
            id: Uuid::new_v4(),
            connection_id: Uuid::new_v4(),
            external_id: "x".into(),
            display_name: "Work".into(),
            color: None,
            is_primary: true,
            is_selected: true,
            delta_token: None,
            low_water_mark: None,
            high_water_mark: None,
            last_synced_at: None,
            sync_failure_count: 0,
            needs_reauth: true,
        };
        assert!(cal.is_blocked(3));
    }

    #[test]
    fn calendar_is_blocked_on_failure_threshold() {
        let cal = Calendar {
            id: Uuid::new_v4(),
            connection_id: Uuid::new_v4(),
            external_id: "x".into(),
            display_name: "Work".into(),
            color: None,
            is_primary: true,
            is_selected: true,
            delta_token: None,
            low_water_mark: None,
            high_water_mark: None,
            last_synced_at: None,
            sync_failure_count: 3,
            needs_reauth: false,
        };
        assert!(cal.is_blocked(3));
        assert!(!cal.is_blocked(4));
    }
}
