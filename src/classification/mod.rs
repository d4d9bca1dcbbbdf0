//! C5 — Classification Engine: DSL, scoring, preview, and the apply-rules
//! operation. The DB-touching glue lives here; `dsl`, `eval`, and `scoring`
//! are pure and independently tested.

pub mod dsl;
pub mod eval;
pub mod scoring;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::event_store::{CalendarEvent, ClassificationSource, ClassificationStatus};
use eval::EventView;
use scoring::{classify, fingerprint_rules, Rule};

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ClassificationRuleRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub query: String,
    pub weight: f64,
    pub is_enabled: bool,
    /// Set for a project rule; null alongside `attended = false` for a skip rule.
    pub project_id: Option<Uuid>,
    pub attended: Option<bool>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PreviewResult {
    pub matched_event_ids: Vec<Uuid>,
    pub conflicts: Vec<Conflict>,
    pub total_candidates: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Conflict {
    pub event_id: Uuid,
    pub current_project_id: Option<Uuid>,
    pub current_source: Option<String>,
    pub proposed_project_id: Uuid,
}

#[derive(Clone)]
pub struct ClassificationEngine {
    pool: PgPool,
}

impl ClassificationEngine {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn load_enabled_rules(&self, user_id: Uuid) -> Result<Vec<Rule>> {
        let rows: Vec<ClassificationRuleRow> = sqlx::query_as(
            "SELECT id, user_id, query, weight, is_enabled, project_id, attended FROM classification_rules WHERE user_id = $1 AND is_enabled = true",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        let mut rules = Vec::with_capacity(rows.len());
        for row in rows {
            match Rule::compile(row.id, &row.query, row.weight, row.project_id, false) {
                Ok(rule) => rules.push(rule),
                Err(e) => {
                    tracing::warn!(rule_id = %row.id, error = %e, "skipping rule with unparseable query");
                }
            }
        }

        let projects: Vec<(Uuid, Vec<String>, Vec<String>, Vec<String>)> = sqlx::query_as(
            "SELECT id, fingerprint_domains, fingerprint_emails, fingerprint_keywords FROM projects WHERE user_id = $1 AND is_archived = false",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        for (project_id, domains, emails, keywords) in projects {
            rules.extend(fingerprint_rules(project_id, &domains, &emails, &keywords, 1.0));
        }

        Ok(rules)
    }

    pub fn event_view(event: &CalendarEvent, calendar_name: &str) -> EventView {
        EventView::from_start(
            event.title.clone(),
            event.description.clone().unwrap_or_default(),
            event.attendee_emails(),
            Vec::new(),
            event.response_status.clone(),
            event.is_recurring,
            event.is_all_day,
            event.transparency.clone(),
            calendar_name.to_string(),
            event.start_time,
        )
    }

    /// Preview what a (not-yet-saved) query would match, and which currently
    /// classified events would change project if it were saved as a rule.
    pub async fn preview(
        &self,
        user_id: Uuid,
        query_text: &str,
        proposed_project_id: Uuid,
        range_start: NaiveDate,
        range_end: NaiveDate,
    ) -> Result<PreviewResult> {
        let query = dsl::parse(query_text)?;

        let events: Vec<(CalendarEvent, String)> = self.events_with_calendar_name(user_id, range_start, range_end).await?;

        let mut matched = Vec::new();
        let mut conflicts = Vec::new();
        for (event, calendar_name) in &events {
            let view = Self::event_view(event, calendar_name);
            if eval::matches(&query, &view) {
                matched.push(event.id);
                if let Some(current_project) = event.project_id {
                    if current_project != proposed_project_id {
                        conflicts.push(Conflict {
                            event_id: event.id,
                            current_project_id: Some(current_project),
                            current_source: event.classification_source.map(|s| format!("{s:?}").to_lowercase()),
                            proposed_project_id,
                        });
                    }
                }
            }
        }

        Ok(PreviewResult { total_candidates: events.len(), matched_event_ids: matched, conflicts })
    }

    async fn events_with_calendar_name(
        &self,
        user_id: Uuid,
        range_start: NaiveDate,
        range_end: NaiveDate,
    ) -> Result<Vec<(CalendarEvent, String)>> {
        let range_start_ts = range_start.and_hms_opt(0, 0, 0).unwrap().and_utc();
        let range_end_ts = (range_end + chrono::Duration::days(1)).and_hms_opt(0, 0, 0).unwrap().and_utc();

        let events: Vec<CalendarEvent> = sqlx::query_as(
            r#"
            SELECT ev.* FROM calendar_events ev
            JOIN calendars cal ON cal.id = ev.calendar_id
            JOIN connections conn ON conn.id = cal.connection_id
            WHERE conn.user_id = $1
              AND ev.is_orphaned = false
              AND ev.start_time < $3 AND ev.end_time >= $2
            ORDER BY ev.start_time
            "#,
        )
        .bind(user_id)
        .bind(range_start_ts)
        .bind(range_end_ts)
        .fetch_all(&self.pool)
        .await?;

        let mut with_names = Vec::with_capacity(events.len());
        for event in events {
            let name: (String,) = sqlx::query_as("SELECT display_name FROM calendars WHERE id = $1")
                .bind(event.calendar_id)
                .fetch_one(&self.pool)
                .await?;
            with_names.push((event, name.0));
        }

        Ok(with_names)
    }

    /// Runs the skip + project passes for every in-scope event, atomically.
    /// `include_manual` opts into overwriting events whose current source is
    /// `manual` (default scope excludes them — manual overrides are sticky).
    ///
    /// Each write is conditioned on `classification_version` matching the
    /// value the event was read at, so a second `apply_rules` call (or a
    /// concurrent `classify_manually`) overlapping the same range cannot
    /// silently clobber the other's write: a version mismatch means someone
    /// else touched the row since we read it, so we skip it rather than
    /// overwrite a decision we didn't see.
    pub async fn apply_rules(
        &self,
        user_id: Uuid,
        range_start: NaiveDate,
        range_end: NaiveDate,
        include_manual: bool,
        floor: f64,
        ceiling: f64,
    ) -> Result<usize> {
        let rules = self.load_enabled_rules(user_id).await?;
        let events = self.events_with_calendar_name(user_id, range_start, range_end).await?;

        let mut tx = self.pool.begin().await?;
        let mut updated = 0usize;

        for (event, calendar_name) in &events {
            if event.classification_source == Some(ClassificationSource::Manual) && !include_manual {
                continue;
            }
            let view = Self::event_view(event, &calendar_name);
            let outcome = classify(&rules, &view, floor, ceiling);

            let rows_affected = match outcome.classification {
                Some(c) => {
                    sqlx::query(
                        r#"
                        UPDATE calendar_events
                        SET is_skipped = $2, project_id = $3, classification_status = 'classified',
                            classification_source = $4, classification_confidence = $5, needs_review = $6,
                            classification_version = classification_version + 1
                        WHERE id = $1 AND classification_version = $7
                        "#,
                    )
                    .bind(event.id)
                    .bind(outcome.is_skipped)
                    .bind(c.project_id)
                    .bind(c.source)
                    .bind(c.confidence)
                    .bind(c.needs_review)
                    .bind(event.classification_version)
                    .execute(&mut *tx)
                    .await?
                    .rows_affected()
                }
                None => {
                    sqlx::query(
                        r#"
                        UPDATE calendar_events
                        SET is_skipped = $2, classification_version = classification_version + 1
                        WHERE id = $1 AND classification_status = 'pending' AND classification_version = $3
                        "#,
                    )
                    .bind(event.id)
                    .bind(outcome.is_skipped)
                    .bind(event.classification_version)
                    .execute(&mut *tx)
                    .await?
                    .rows_affected()
                }
            };

            if rows_affected == 0 {
                tracing::debug!(event_id = %event.id, "skipping apply_rules write: classification_version changed since read");
                continue;
            }
            updated += 1;
        }

        tx.commit().await?;
        Ok(updated)
    }

    /// Records a single manual classification decision. Manual classification
    /// is immune to future `apply_rules` passes unless the caller explicitly
    /// opts into `include_manual`.
    pub async fn classify_manually(&self, event_id: Uuid, project_id: Option<Uuid>, skip: bool) -> Result<()> {
        let status = if project_id.is_some() { ClassificationStatus::Classified } else { ClassificationStatus::Pending };
        sqlx::query(
            r#"
            UPDATE calendar_events
            SET project_id = $2,
                is_skipped = $3,
                classification_status = $4,
                classification_source = 'manual',
                classification_confidence = NULL,
                needs_review = false,
                classification_version = classification_version + 1
            WHERE id = $1
            "#,
        )
        .bind(event_id)
        .bind(project_id)
        .bind(skip)
        .bind(match status {
            ClassificationStatus::Classified => "classified",
            ClassificationStatus::Pending => "pending",
        })
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn create_rule(&self, user_id: Uuid, query_text: &str, weight: f64, project_id: Option<Uuid>, attended: Option<bool>) -> Result<Uuid> {
        if project_id.is_none() && attended != Some(false) {
            return Err(Error::invalid_argument("a rule must target exactly one of project_id or a skip (attended=false)"));
        }
        dsl::parse(query_text)?; // validated eagerly; parse errors surface at creation time
        let id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO classification_rules (id, user_id, query, weight, is_enabled, project_id, attended) VALUES ($1, $2, $3, $4, true, $5, $6)",
        )
        .bind(id)
        .bind(user_id)
        .bind(query_text)
        .bind(weight)
        .bind(project_id)
        .bind(attended)
        .execute(&self.pool)
        .await?;
        Ok(id)
    }

    pub async fn list_rules(&self, user_id: Uuid) -> Result<Vec<ClassificationRuleRow>> {
        let rows = sqlx::query_as(
            "SELECT id, user_id, query, weight, is_enabled, project_id, attended FROM classification_rules WHERE user_id = $1 ORDER BY id",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn update_rule(
        &self,
        user_id: Uuid,
        rule_id: Uuid,
        query_text: Option<&str>,
        weight: Option<f64>,
        is_enabled: Option<bool>,
    ) -> Result<()> {
        if let Some(q) = query_text {
            dsl::parse(q)?;
        }
        let result = sqlx::query(
            r#"
            UPDATE classification_rules
            SET query = COALESCE($3, query),
                weight = COALESCE($4, weight),
                is_enabled = COALESCE($5, is_enabled)
            WHERE id = $1 AND user_id = $2
            "#,
        )
        .bind(rule_id)
        .bind(user_id)
        .bind(query_text)
        .bind(weight)
        .bind(is_enabled)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("classification rule {rule_id}")));
        }
        Ok(())
    }

    pub async fn delete_rule(&self, user_id: Uuid, rule_id: Uuid) -> Result<()> {
        let result = sqlx::query("DELETE FROM classification_rules WHERE id = $1 AND user_id = $2")
            .bind(rule_id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("classification rule {rule_id}")));
        }
        Ok(())
    }
}
