//! C6 — Time Entry Analyzer: pure computation (`analyzer`) plus the
//! materialization/staleness/reanalysis store layer (`store`).

pub mod analyzer;
pub mod store;

use chrono::NaiveDate;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::Result;
use crate::event_store::{CalendarEvent, ClassificationStatus, EventStore};
use analyzer::{analyze, ClassifiedEventView, ComputedEntry};
use store::{TimeEntry, TimeEntryStore};

#[derive(Debug, Clone)]
pub struct ListedEntry {
    pub project_id: Uuid,
    pub date: NaiveDate,
    pub materialized: Option<TimeEntry>,
    pub computed: ComputedEntry,
    pub is_stale: bool,
}

#[derive(Clone)]
pub struct TimeEntryService {
    events: EventStore,
    entries: TimeEntryStore,
    pool: PgPool,
    rounding_granularity: i64,
    rounding_pivot: i64,
}

impl TimeEntryService {
    pub fn new(pool: PgPool, rounding_granularity: i64, rounding_pivot: i64) -> Self {
        Self {
            events: EventStore::new(pool.clone()),
            entries: TimeEntryStore::new(pool.clone()),
            pool,
            rounding_granularity,
            rounding_pivot,
        }
    }

    fn classified_view(events: &[CalendarEvent]) -> Vec<ClassifiedEventView> {
        events
            .iter()
            .filter_map(|e| {
                e.project_id.map(|project_id| ClassifiedEventView {
                    event_id: e.id,
                    project_id,
                    title: e.title.clone(),
                    start: e.start_time,
                    end: e.end_time,
                    is_skipped: e.is_skipped,
                    is_all_day: e.is_all_day,
                })
            })
            .collect()
    }

    /// Computes ephemeral entries for every classified event in range, then
    /// merges in materialized entries (which take precedence), attaching
    /// freshly computed values and staleness to each.
    pub async fn list_entries(&self, user_id: Uuid, range_start: NaiveDate, range_end: NaiveDate) -> Result<Vec<ListedEntry>> {
        let mut cursor = range_start;
        let mut results = Vec::new();

        while cursor <= range_end {
            let day_events = self
                .events
                .list_events(user_id, cursor, cursor, Some(ClassificationStatus::Classified), None)
                .await?;
            let view = Self::classified_view(&day_events);
            let computed_entries = analyze(&view, self.rounding_granularity, self.rounding_pivot);

            for computed in computed_entries {
                let materialized = self.entries.find(user_id, computed.project_id, cursor).await?;
                let is_stale = materialized.as_ref().map(|m| m.is_stale()).unwrap_or(false);
                results.push(ListedEntry { project_id: computed.project_id, date: cursor, materialized, computed, is_stale });
            }

            cursor = cursor.succ_opt().expect("date arithmetic within a bounded range");
        }

        Ok(results)
    }

    /// Reruns the analyzer for a single (user, date) and writes results back
    /// through the reanalysis-protection rules in `store`.
    pub async fn reanalyze_day(&self, user_id: Uuid, date: NaiveDate) -> Result<()> {
        let events = self.events.list_events(user_id, date, date, Some(ClassificationStatus::Classified), None).await?;
        let view = Self::classified_view(&events);
        let computed_entries = analyze(&view, self.rounding_granularity, self.rounding_pivot);

        for computed in &computed_entries {
            self.entries
                .reanalyze_one(user_id, date, computed, &computed.contributing_event_ids)
                .await?;
        }
        Ok(())
    }

    pub fn entries(&self) -> &TimeEntryStore {
        &self.entries
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}
