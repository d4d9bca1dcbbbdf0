//! Evaluates a parsed `Query` against an `EventView`. One matcher per
//! property, following the properties table; the only place property
//! semantics are defined, so the scoring accumulator and preview both
//! delegate here rather than re-implementing matching.

use chrono::{Datelike, Timelike};

use super::dsl::ast::{CompareOp, Property, Query, Term, TermValue};

/// A read-only projection of a calendar event for DSL evaluation. Decoupled
/// from `event_store::CalendarEvent` so the evaluator has no database
/// dependency and can be exercised with plain literals in tests.
#[derive(Debug, Clone)]
pub struct EventView {
    pub title: String,
    pub description: String,
    pub attendee_emails: Vec<String>,
    pub attendee_names: Vec<String>,
    pub response_status: Option<String>,
    pub is_recurring: bool,
    pub is_all_day: bool,
    pub transparency: Option<String>,
    pub calendar_name: String,
    pub start_hour: u32,
    pub start_minute: u32,
    pub weekday: chrono::Weekday,
}

impl EventView {
    pub fn from_start(
        title: String,
        description: String,
        attendee_emails: Vec<String>,
        attendee_names: Vec<String>,
        response_status: Option<String>,
        is_recurring: bool,
        is_all_day: bool,
        transparency: Option<String>,
        calendar_name: String,
        start: chrono::DateTime<chrono::Utc>,
    ) -> Self {
        Self {
            title,
            description,
            attendee_emails,
            attendee_names,
            response_status,
            is_recurring,
            is_all_day,
            transparency,
            calendar_name,
            start_hour: start.hour(),
            start_minute: start.minute(),
            weekday: start.weekday(),
        }
    }
}

pub fn matches(query: &Query, event: &EventView) -> bool {
    match query {
        Query::And(clauses) => clauses.iter().all(|c| matches(c, event)),
        Query::Or(clauses) => clauses.iter().any(|c| matches(c, event)),
        Query::Not(inner) => !matches(inner, event),
        Query::Term(term) => matches_term(term, event),
    }
}

fn contains_ci(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

fn domain_of(email: &str) -> Option<&str> {
    email.split('@').nth(1)
}

fn matches_term(term: &Term, event: &EventView) -> bool {
    match (term.property, &term.value) {
        (Property::Title, TermValue::Text(v)) => contains_ci(&event.title, v),
        (Property::Description, TermValue::Text(v)) => contains_ci(&event.description, v),
        (Property::Text, TermValue::Text(v)) => {
            contains_ci(&event.title, v)
                || contains_ci(&event.description, v)
                || event.attendee_emails.iter().any(|e| contains_ci(e, v))
                || event.attendee_names.iter().any(|n| contains_ci(n, v))
        }
        (Property::Attendees, TermValue::Text(v)) => {
            event.attendee_emails.iter().any(|e| contains_ci(e, v)) || event.attendee_names.iter().any(|n| contains_ci(n, v))
        }
        (Property::Domain, TermValue::Text(v)) => event
            .attendee_emails
            .iter()
            .filter_map(|e| domain_of(e))
            .any(|d| d.eq_ignore_ascii_case(v)),
        (Property::Email, TermValue::Text(v)) => event.attendee_emails.iter().any(|e| e.eq_ignore_ascii_case(v)),
        (Property::Response, TermValue::Text(v)) => event.response_status.as_deref() == Some(v.as_str()),
        (Property::Recurring, TermValue::Bool(b)) => event.is_recurring == *b,
        (Property::IsAllDay, TermValue::Bool(b)) => event.is_all_day == *b,
        (Property::HasAttendees, TermValue::Bool(b)) => (!event.attendee_emails.is_empty()) == *b,
        (Property::Transparency, TermValue::Text(v)) => event.transparency.as_deref() == Some(v.as_str()),
        (Property::DayOfWeek, TermValue::Text(v)) => weekday_matches(event.weekday, v),
        (Property::Calendar, TermValue::Text(v)) => contains_ci(&event.calendar_name, v),
        (Property::TimeOfDay, TermValue::Time { hour, minute }) => {
            let event_minutes = (event.start_hour * 60 + event.start_minute) as i64;
            let target_minutes = (*hour as i64) * 60 + *minute as i64;
            match term.op {
                CompareOp::Eq => event_minutes == target_minutes,
                CompareOp::Gt => event_minutes > target_minutes,
                CompareOp::Gte => event_minutes >= target_minutes,
                CompareOp::Lt => event_minutes < target_minutes,
                CompareOp::Lte => event_minutes <= target_minutes,
            }
        }
        _ => false,
    }
}

fn weekday_matches(weekday: chrono::Weekday, v: &str) -> bool {
    use chrono::Weekday::*;
    let expected = match v {
        "mon" => Mon,
        "tue" => Tue,
        "wed" => Wed,
        "thu" => Thu,
        "fri" => Fri,
        "sat" => Sat,
        "sun" => Sun,
        _ => return false,
    };
    weekday == expected
}
