//! Billing-side domain types shared across components: projects, billing
//! periods, and invoices. Calendar-side types live in `event_store`; job
//! types live in `jobs`.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Project {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub short_code: Option<String>,
    pub color: Option<String>,
    pub is_billable: bool,
    pub is_archived: bool,
    pub is_hidden_by_default: bool,
    pub does_not_accumulate_hours: bool,
    pub fingerprint_domains: Vec<String>,
    pub fingerprint_emails: Vec<String>,
    pub fingerprint_keywords: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct BillingPeriod {
    pub id: Uuid,
    pub project_id: Uuid,
    pub starts_on: NaiveDate,
    pub ends_on: Option<NaiveDate>,
    pub hourly_rate: Decimal,
}

impl BillingPeriod {
    /// Whether this period overlaps another, treating a null `ends_on` as
    /// unbounded. Used to enforce the "billing periods for a project must
    /// not overlap" invariant before insert/update.
    pub fn overlaps(&self, other: &BillingPeriod) -> bool {
        let self_end = self.ends_on.unwrap_or(NaiveDate::MAX);
        let other_end = other.ends_on.unwrap_or(NaiveDate::MAX);
        self.starts_on <= other_end && other.starts_on <= self_end
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
pub enum InvoiceStatus {
    Draft,
    Sent,
    Paid,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Invoice {
    pub id: Uuid,
    pub project_id: Uuid,
    pub billing_period_id: Uuid,
    pub invoice_number: String,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub status: InvoiceStatus,
    pub created_at: DateTime<Utc>,
}

/// Line items reference time entries directly; hours/amount are computed at
/// read time from the (now immutable, since invoicing locks them) referenced
/// entry rather than duplicated onto the line item.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct InvoiceLineItem {
    pub id: Uuid,
    pub invoice_id: Uuid,
    pub time_entry_id: Uuid,
}
