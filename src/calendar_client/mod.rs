//! C1 — Calendar Client. A provider-agnostic trait plus the one production
//! adapter for Google Calendar. Grounded on `sources::google::client::GoogleClient`
//! and `sources::base::oauth_client::OAuthHttpClient`, but credentials and the
//! refresh capability are received from the caller rather than looked up via a
//! `TokenManager`/`source_id`: OAuth token acquisition is out of scope for this
//! core (see the purpose & scope notes).

pub mod google;
pub mod retry;
pub mod types;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::event_store::FetchedEvent;

/// An opaque bearer credential plus whatever the caller needs to refresh it.
/// The core never performs the authorization-code exchange; it only ever
/// holds a current access token and an injected refresh capability.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub access_token: String,
    pub refresh_token: Option<String>,
}

/// Injected by the caller; invoked when the adapter sees a 401. Out of scope
/// concerns (token storage, OAuth app secrets) live entirely on the other
/// side of this trait.
#[async_trait]
pub trait RefreshCapability: Send + Sync {
    async fn refresh(&self, creds: &Credentials) -> Result<Credentials>;
}

#[derive(Debug, Clone)]
pub struct CalendarInfo {
    pub external_id: String,
    pub display_name: String,
    pub is_primary: bool,
}

#[derive(Debug, Clone)]
pub struct FetchResult {
    pub events: Vec<FetchedEvent>,
    pub next_delta_token: Option<String>,
}

/// Incremental fetch result distinguishes deletions from the provider's
/// delta stream, where available, from a plain additions/modifications list.
#[derive(Debug, Clone)]
pub struct IncrementalFetchResult {
    pub upserted: Vec<FetchedEvent>,
    pub deleted_external_ids: Vec<String>,
    pub next_delta_token: Option<String>,
}

#[async_trait]
pub trait CalendarClient: Send + Sync {
    async fn list_calendars(&self, creds: &Credentials) -> Result<Vec<CalendarInfo>>;

    async fn fetch_events(
        &self,
        creds: &Credentials,
        external_calendar_id: &str,
        min_time: DateTime<Utc>,
        max_time: DateTime<Utc>,
    ) -> Result<FetchResult>;

    /// Fails with `Error::DeltaTokenExpired` when the token is no longer
    /// honored by the provider; callers must fall back to `fetch_events`.
    async fn fetch_events_incremental(
        &self,
        creds: &Credentials,
        external_calendar_id: &str,
        delta_token: &str,
    ) -> Result<IncrementalFetchResult>;
}
