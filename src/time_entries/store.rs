//! Materialization, staleness resolution, and reanalysis-protection rules
//! for time entries. Calls into `analyzer` for the pure computation and
//! applies the protection rules described in the component design when
//! writing results back.

use chrono::{NaiveDate, Utc};
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

use super::analyzer::ComputedEntry;
use crate::error::{Error, Result};

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct TimeEntry {
    pub id: Uuid,
    pub user_id: Uuid,
    pub project_id: Uuid,
    pub entry_date: NaiveDate,
    pub hours: Option<f64>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub computed_hours: f64,
    pub computed_title: String,
    pub computed_description: String,
    pub snapshot_computed_hours: Option<f64>,
    pub has_user_edits: bool,
    pub is_suppressed: bool,
    pub is_pinned: bool,
    pub is_locked: bool,
    pub invoice_id: Option<Uuid>,
    pub calculation_details: Value,
}

impl TimeEntry {
    /// `is_stale ⇔ hours ≠ null ∧ hours ≠ computed_hours ∧ computed_hours ≠ snapshot_computed_hours`
    pub fn is_stale(&self) -> bool {
        match (self.hours, self.snapshot_computed_hours) {
            (Some(hours), Some(snapshot)) => hours != self.computed_hours && self.computed_hours != snapshot,
            _ => false,
        }
    }

    /// Materialized entries participating in reanalysis-protection: pinned,
    /// locked, or invoiced entries only get their computed_* fields touched.
    pub fn is_protected(&self) -> bool {
        self.is_pinned || self.is_locked || self.invoice_id.is_some()
    }

    pub fn is_materialized(&self) -> bool {
        self.hours.is_some() || self.has_user_edits || self.is_suppressed || self.invoice_id.is_some()
    }
}

#[derive(Clone)]
pub struct TimeEntryStore {
    pool: PgPool,
}

impl TimeEntryStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn find(&self, user_id: Uuid, project_id: Uuid, date: NaiveDate) -> Result<Option<TimeEntry>> {
        let row = sqlx::query_as::<_, TimeEntry>(
            "SELECT * FROM time_entries WHERE user_id = $1 AND project_id = $2 AND entry_date = $3",
        )
        .bind(user_id)
        .bind(project_id)
        .bind(date)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    /// Writes a freshly computed entry into the store, applying the
    /// reanalysis-protection rules: an unlocked, non-materialized entry is
    /// fully replaced; a materialized-but-unprotected entry's computed_*
    /// fields are updated (staleness is then a function of the new values);
    /// a protected entry (pinned, locked, invoiced) has only computed_* and
    /// calculation_details refreshed, and never its user fields.
    pub async fn reanalyze_one(
        &self,
        user_id: Uuid,
        date: NaiveDate,
        computed: &ComputedEntry,
        contributing_event_ids: &[Uuid],
    ) -> Result<()> {
        let existing = self.find(user_id, computed.project_id, date).await?;
        let mut tx = self.pool.begin().await?;

        let entry_id = match existing {
            None => {
                let id = Uuid::new_v4();
                sqlx::query(
                    r#"
                    INSERT INTO time_entries (
                        id, user_id, project_id, entry_date, computed_hours, computed_title,
                        computed_description, calculation_details
                    ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                    "#,
                )
                .bind(id)
                .bind(user_id)
                .bind(computed.project_id)
                .bind(date)
                .bind(computed.computed_hours)
                .bind(&computed.computed_title)
                .bind(&computed.computed_description)
                .bind(&computed.calculation_details)
                .execute(&mut *tx)
                .await?;
                id
            }
            Some(entry) => {
                sqlx::query(
                    r#"
                    UPDATE time_entries
                    SET computed_hours = $2, computed_title = $3, computed_description = $4,
                        calculation_details = $5
                    WHERE id = $1
                    "#,
                )
                .bind(entry.id)
                .bind(computed.computed_hours)
                .bind(&computed.computed_title)
                .bind(&computed.computed_description)
                .bind(&computed.calculation_details)
                .execute(&mut *tx)
                .await?;
                // Protected entries (pinned/locked/invoiced) never have their
                // user-facing `hours`/`title`/`description` touched here.
                entry.id
            }
        };

        // Re-sync the contributing-events junction: clear then reinsert,
        // since each reanalysis fully replaces the prior set of sources.
        sqlx::query("DELETE FROM time_entry_events WHERE entry_id = $1").bind(entry_id).execute(&mut *tx).await?;
        for event_id in contributing_event_ids {
            sqlx::query("INSERT INTO time_entry_events (entry_id, event_id) VALUES ($1, $2)")
                .bind(entry_id)
                .bind(event_id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Materializes an entry via an explicit user edit: `hours`, `title`, or
    /// `description` set. Captures `snapshot_computed_hours` at the instant
    /// of materialization.
    pub async fn set_user_values(
        &self,
        id: Uuid,
        hours: Option<f64>,
        title: Option<String>,
        description: Option<String>,
    ) -> Result<()> {
        let entry = sqlx::query_as::<_, TimeEntry>("SELECT * FROM time_entries WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::NotFound(format!("time entry {id}")))?;

        if entry.invoice_id.is_some() {
            return Err(Error::Precondition("cannot edit a time entry that has been invoiced".to_string()));
        }

        sqlx::query(
            r#"
            UPDATE time_entries
            SET hours = COALESCE($2, hours), title = COALESCE($3, title), description = COALESCE($4, description),
                has_user_edits = true, snapshot_computed_hours = computed_hours
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(hours)
        .bind(title)
        .bind(description)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn suppress(&self, id: Uuid) -> Result<()> {
        sqlx::query("UPDATE time_entries SET is_suppressed = true, snapshot_computed_hours = computed_hours WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// "Accept computed": adopt the current computed value as the user
    /// value, clearing staleness.
    pub async fn accept_computed(&self, id: Uuid) -> Result<()> {
        sqlx::query(
            "UPDATE time_entries SET hours = computed_hours, snapshot_computed_hours = computed_hours WHERE id = $1",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// "Keep override": re-anchor the snapshot to the current computed value
    /// without changing the user's `hours`.
    pub async fn keep_override(&self, id: Uuid) -> Result<()> {
        sqlx::query("UPDATE time_entries SET snapshot_computed_hours = computed_hours WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn delete(&self, id: Uuid) -> Result<()> {
        let entry = sqlx::query_as::<_, TimeEntry>("SELECT * FROM time_entries WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::NotFound(format!("time entry {id}")))?;
        if entry.invoice_id.is_some() {
            return Err(Error::Precondition("cannot delete an invoiced time entry".to_string()));
        }
        sqlx::query("DELETE FROM time_entries WHERE id = $1").bind(id).execute(&self.pool).await?;
        Ok(())
    }

    pub async fn attach_to_invoice(&self, id: Uuid, invoice_id: Uuid) -> Result<()> {
        sqlx::query(
            "UPDATE time_entries SET invoice_id = $2, snapshot_computed_hours = computed_hours, is_locked = true WHERE id = $1",
        )
        .bind(id)
        .bind(invoice_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// A materialized entry whose only contributing events are now orphaned
    /// is deletable unless it is invoiced or has user edits. This only marks
    /// candidates; it never deletes an invoiced or user-edited entry.
    pub async fn mark_orphan_cleanup_candidates(&self, user_id: Uuid) -> Result<Vec<Uuid>> {
        let rows: Vec<(Uuid,)> = sqlx::query_as(
            r#"
            SELECT te.id FROM time_entries te
            WHERE te.user_id = $1
              AND te.invoice_id IS NULL
              AND te.has_user_edits = false
              AND NOT EXISTS (
                  SELECT 1 FROM time_entry_events tee
                  JOIN calendar_events ev ON ev.id = tee.event_id
                  WHERE tee.entry_id = te.id AND ev.is_orphaned = false
              )
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    /// Runs `mark_orphan_cleanup_candidates` and deletes the returned rows.
    /// Intended to be called periodically (from the scheduler tick) rather
    /// than from the sync path itself, since a cleanup pass only makes sense
    /// once orphaning from a sync has already been committed.
    pub async fn run_orphan_cleanup(&self, user_id: Uuid) -> Result<u64> {
        let candidates = self.mark_orphan_cleanup_candidates(user_id).await?;
        if candidates.is_empty() {
            return Ok(0);
        }
        let result = sqlx::query("DELETE FROM time_entries WHERE id = ANY($1)")
            .bind(&candidates)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Creates a user-entered time entry with no computed baseline (e.g. for
    /// a date with no classified calendar events at all). Materialized
    /// immediately since it originates entirely from user input.
    pub async fn create_manual(
        &self,
        user_id: Uuid,
        project_id: Uuid,
        date: NaiveDate,
        hours: f64,
        title: &str,
        description: &str,
    ) -> Result<Uuid> {
        if self.find(user_id, project_id, date).await?.is_some() {
            return Err(Error::Conflict(format!("a time entry already exists for project {project_id} on {date}")));
        }
        let id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO time_entries (
                id, user_id, project_id, entry_date, hours, title, description,
                computed_hours, computed_title, computed_description, snapshot_computed_hours,
                has_user_edits, calculation_details
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, 0, '', '', 0, true, '{}'::jsonb)
            "#,
        )
        .bind(id)
        .bind(user_id)
        .bind(project_id)
        .bind(date)
        .bind(hours)
        .bind(title)
        .bind(description)
        .execute(&self.pool)
        .await?;
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(hours: Option<f64>, computed_hours: f64, snapshot: Option<f64>) -> TimeEntry {
        TimeEntry {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            project_id: Uuid::new_v4(),
            entry_date: NaiveDate::from_ymd_opt(2025, 6, 2).unwrap(),
            hours,
            title: None,
            description: None,
            computed_hours,
            computed_title: String::new(),
            computed_description: String::new(),
            snapshot_computed_hours: snapshot,
            has_user_edits: hours.is_some(),
            is_suppressed: false,
            is_pinned: false,
            is_locked: false,
            invoice_id: None,
            calculation_details: Value::Null,
        }
    }

    // S6 — materialize and stale
    #[test]
    fn entry_is_stale_when_computed_drifts_from_both_user_and_snapshot() {
        let e = entry(Some(2.5), 3.0, Some(2.0));
        assert!(e.is_stale());
    }

    #[test]
    fn entry_is_not_stale_when_user_value_matches_computed() {
        let e = entry(Some(3.0), 3.0, Some(3.0));
        assert!(!e.is_stale());
    }

    #[test]
    fn ephemeral_entry_without_user_hours_is_never_stale() {
        let e = entry(None, 2.0, None);
        assert!(!e.is_stale());
    }

    #[test]
    fn protected_entry_flags() {
        let mut e = entry(Some(1.0), 1.0, Some(1.0));
        e.invoice_id = Some(Uuid::new_v4());
        assert!(e.is_protected());
    }
}
