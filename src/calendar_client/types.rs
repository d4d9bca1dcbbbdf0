//! Google Calendar wire shapes. Private to the adapter module; translated
//! into the provider-agnostic `FetchedEvent` before crossing into the event
//! store. Adapted from `sources::google::types`.

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct EventsResponse {
    #[serde(default)]
    pub items: Vec<Event>,
    #[serde(rename = "nextSyncToken")]
    pub next_sync_token: Option<String>,
    #[serde(rename = "nextPageToken")]
    pub next_page_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CalendarListResponse {
    #[serde(default)]
    pub items: Vec<CalendarListEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CalendarListEntry {
    pub id: String,
    pub summary: String,
    #[serde(default)]
    pub primary: bool,
    pub selected: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Event {
    pub id: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    pub start: Option<EventTime>,
    pub end: Option<EventTime>,
    #[serde(rename = "recurringEventId", default)]
    pub recurring_event_id: Option<String>,
    #[serde(default)]
    pub attendees: Vec<Attendee>,
    #[serde(default)]
    pub transparency: Option<String>,
    #[serde(rename = "responseStatus", default)]
    pub response_status: Option<String>,
}

impl Event {
    pub fn is_recurring(&self) -> bool {
        self.recurring_event_id.is_some()
    }

    pub fn is_cancelled(&self) -> bool {
        self.status.as_deref() == Some("cancelled")
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventTime {
    /// Present for all-day events; absent for timed events.
    pub date: Option<String>,
    #[serde(rename = "dateTime")]
    pub date_time: Option<String>,
    #[serde(rename = "timeZone")]
    pub time_zone: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Attendee {
    pub email: Option<String>,
    #[serde(rename = "displayName")]
    pub display_name: Option<String>,
    #[serde(rename = "responseStatus")]
    pub response_status: Option<String>,
    #[serde(default)]
    pub organizer: bool,
    #[serde(rename = "self", default)]
    pub is_self: bool,
}
