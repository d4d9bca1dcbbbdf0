//! Concrete `CalendarClient` adapter for the Google Calendar API v3.
//! Grounded on `sources::google::calendar::mod::GoogleCalendarStream` for the
//! fetch/paginate/translate shape, and on `sources::base::oauth_client::OAuthHttpClient`
//! for the retry loop, reimplemented here without a `TokenManager` dependency
//! since credentials are passed in by the caller.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;

use super::retry::{classify_error, should_retry, ErrorClass, RetryConfig};
use super::types::{CalendarListResponse, Event, EventsResponse};
use super::{CalendarClient, CalendarInfo, Credentials, FetchResult, IncrementalFetchResult, RefreshCapability};
use crate::error::{Error, Result};
use crate::event_store::FetchedEvent;

const BASE_URL: &str = "https://www.googleapis.com/calendar/v3";

pub struct GoogleCalendarClient {
    http: Client,
    retry: RetryConfig,
    refresher: Arc<dyn RefreshCapability>,
}

impl GoogleCalendarClient {
    pub fn new(refresher: Arc<dyn RefreshCapability>) -> Self {
        Self::with_retry_config(refresher, RetryConfig::default())
    }

    pub fn with_retry_config(refresher: Arc<dyn RefreshCapability>, retry: RetryConfig) -> Self {
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(60))
            .build()
            .expect("failed to build HTTP client");
        Self { http, retry, refresher }
    }

    async fn get_json(&self, creds: &Credentials, path: &str, params: &[(&str, String)]) -> Result<(serde_json::Value, Credentials)> {
        let mut creds = creds.clone();
        let url = format!("{BASE_URL}{path}");
        let mut refreshed_once = false;

        for attempt in 0..self.retry.max_retries {
            let response = self
                .http
                .get(&url)
                .bearer_auth(&creds.access_token)
                .query(params)
                .send()
                .await;

            let response = match response {
                Ok(r) => r,
                Err(e) => {
                    if attempt + 1 < self.retry.max_retries {
                        tokio::time::sleep(self.retry.calculate_backoff(attempt)).await;
                        continue;
                    }
                    return Err(Error::ExternalUnavailable(format!("request failed: {e}")));
                }
            };

            let status = response.status();
            if status.is_success() {
                let value: serde_json::Value = response.json().await?;
                return Ok((value, creds));
            }

            let body = response.text().await.unwrap_or_default();
            let class = classify_error(status, &body);

            if class == ErrorClass::DeltaTokenExpired {
                return Err(Error::DeltaTokenExpired);
            }

            if class == ErrorClass::AuthError && !refreshed_once {
                creds = self.refresher.refresh(&creds).await?;
                refreshed_once = true;
                continue;
            }

            if should_retry(class, attempt, self.retry.max_retries) {
                tokio::time::sleep(self.retry.calculate_backoff(attempt)).await;
                continue;
            }

            return Err(Error::ExternalUnavailable(format!("calendar API error ({status}): {body}")));
        }

        Err(Error::ExternalUnavailable(format!("exhausted {} retries", self.retry.max_retries)))
    }

    fn translate(event: &Event) -> Option<FetchedEvent> {
        if event.is_cancelled() {
            return None;
        }
        let start_wire = event.start.as_ref()?;
        let end_wire = event.end.as_ref()?;
        let (start, end) = (parse_event_time(start_wire)?, parse_event_time(end_wire)?);
        Some(FetchedEvent {
            external_id: event.id.clone(),
            title: event.summary.clone().unwrap_or_default(),
            description: event.description.clone(),
            start_time: start,
            end_time: end,
            attendees: event
                .attendees
                .iter()
                .filter_map(|a| a.email.clone())
                .collect(),
            is_recurring: event.is_recurring(),
            response_status: event.attendees.iter().find(|a| a.is_self).and_then(|a| a.response_status.clone()),
            transparency: event.transparency.clone(),
            is_all_day: is_all_day(start_wire),
        })
    }
}

/// Google represents all-day events with a bare `date` and timed events with
/// `dateTime`; an all-day event is normalized to midnight UTC.
fn parse_event_time(t: &super::types::EventTime) -> Option<DateTime<Utc>> {
    if let Some(dt) = &t.date_time {
        return DateTime::parse_from_rfc3339(dt).ok().map(|d| d.with_timezone(&Utc));
    }
    if let Some(date) = &t.date {
        let naive = NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()?;
        return Some(naive.and_hms_opt(0, 0, 0)?.and_utc());
    }
    None
}

/// `date` (no time component) marks an all-day event; `dateTime` marks a
/// timed one. This is the only reliable signal — a single-day all-day event
/// is normalized by Google to `start=D 00:00Z, end=(D+1) 00:00Z`, so the
/// start/end dates themselves cannot be compared to detect it.
fn is_all_day(t: &super::types::EventTime) -> bool {
    t.date.is_some()
}

#[async_trait]
impl CalendarClient for GoogleCalendarClient {
    async fn list_calendars(&self, creds: &Credentials) -> Result<Vec<CalendarInfo>> {
        let (value, _) = self.get_json(creds, "/users/me/calendarList", &[]).await?;
        let parsed: CalendarListResponse = serde_json::from_value(value)?;
        Ok(parsed
            .items
            .into_iter()
            .map(|c| CalendarInfo {
                external_id: c.id,
                display_name: c.summary,
                is_primary: c.primary,
            })
            .collect())
    }

    async fn fetch_events(
        &self,
        creds: &Credentials,
        external_calendar_id: &str,
        min_time: DateTime<Utc>,
        max_time: DateTime<Utc>,
    ) -> Result<FetchResult> {
        let path = format!("/calendars/{}/events", urlencoding_minimal(external_calendar_id));
        let mut events = Vec::new();
        let mut page_token: Option<String> = None;
        let mut next_sync_token = None;

        loop {
            let mut params = vec![
                ("timeMin".to_string(), min_time.to_rfc3339()),
                ("timeMax".to_string(), max_time.to_rfc3339()),
                ("singleEvents".to_string(), "true".to_string()),
            ];
            if let Some(token) = &page_token {
                params.push(("pageToken".to_string(), token.clone()));
            }
            let params_ref: Vec<(&str, String)> = params.iter().map(|(k, v)| (k.as_str(), v.clone())).collect();

            let (value, _) = self.get_json(creds, &path, &params_ref).await?;
            let page: EventsResponse = serde_json::from_value(value)?;

            events.extend(page.items.iter().filter_map(Self::translate));
            next_sync_token = page.next_sync_token.or(next_sync_token);

            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        Ok(FetchResult { events, next_delta_token: next_sync_token })
    }

    async fn fetch_events_incremental(
        &self,
        creds: &Credentials,
        external_calendar_id: &str,
        delta_token: &str,
    ) -> Result<IncrementalFetchResult> {
        let path = format!("/calendars/{}/events", urlencoding_minimal(external_calendar_id));
        let mut upserted = Vec::new();
        let mut deleted = Vec::new();
        let mut page_token: Option<String> = None;
        let mut next_sync_token = None;

        loop {
            let mut params = vec![("syncToken".to_string(), delta_token.to_string())];
            if let Some(token) = &page_token {
                params.push(("pageToken".to_string(), token.clone()));
            }
            let params_ref: Vec<(&str, String)> = params.iter().map(|(k, v)| (k.as_str(), v.clone())).collect();

            let (value, _) = self.get_json(creds, &path, &params_ref).await?;
            let page: EventsResponse = serde_json::from_value(value)?;

            for event in &page.items {
                if event.is_cancelled() {
                    deleted.push(event.id.clone());
                } else if let Some(fetched) = Self::translate(event) {
                    upserted.push(fetched);
                }
            }
            next_sync_token = page.next_sync_token.or(next_sync_token);

            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        Ok(IncrementalFetchResult { upserted, deleted_external_ids: deleted, next_delta_token: next_sync_token })
    }
}

fn urlencoding_minimal(s: &str) -> String {
    s.replace('@', "%40")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar_client::types::EventTime;

    #[test]
    fn all_day_event_time_normalizes_to_midnight_utc() {
        let t = EventTime { date: Some("2025-06-01".to_string()), date_time: None, time_zone: None };
        let parsed = parse_event_time(&t).unwrap();
        assert_eq!(parsed.to_rfc3339(), "2025-06-01T00:00:00+00:00");
    }

    #[test]
    fn timed_event_parses_rfc3339() {
        let t = EventTime {
            date: None,
            date_time: Some("2025-06-01T09:30:00-07:00".to_string()),
            time_zone: Some("America/Los_Angeles".to_string()),
        };
        let parsed = parse_event_time(&t).unwrap();
        assert_eq!(parsed.to_rfc3339(), "2025-06-01T16:30:00+00:00");
    }

    #[test]
    fn cancelled_event_translates_to_none() {
        let event = Event {
            id: "abc".into(),
            status: Some("cancelled".into()),
            summary: None,
            description: None,
            start: None,
            end: None,
            recurring_event_id: None,
            attendees: vec![],
            transparency: None,
            response_status: None,
        };
        assert!(GoogleCalendarClient::translate(&event).is_none());
    }
}
