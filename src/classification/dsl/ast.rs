//! Typed AST for the classification query DSL.

#[derive(Debug, Clone, PartialEq)]
pub enum Query {
    And(Vec<Query>),
    Or(Vec<Query>),
    Not(Box<Query>),
    Term(Term),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Property {
    Title,
    Description,
    Text,
    Attendees,
    Domain,
    Email,
    Response,
    Recurring,
    IsAllDay,
    HasAttendees,
    Transparency,
    DayOfWeek,
    TimeOfDay,
    Calendar,
}

impl Property {
    pub fn from_str(s: &str) -> Option<Self> {
        Some(match s {
            "title" => Property::Title,
            "description" => Property::Description,
            "text" => Property::Text,
            "attendees" => Property::Attendees,
            "domain" => Property::Domain,
            "email" => Property::Email,
            "response" => Property::Response,
            "recurring" => Property::Recurring,
            "is-all-day" => Property::IsAllDay,
            "has-attendees" => Property::HasAttendees,
            "transparency" => Property::Transparency,
            "day-of-week" => Property::DayOfWeek,
            "time-of-day" => Property::TimeOfDay,
            "calendar" => Property::Calendar,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Gt,
    Gte,
    Lt,
    Lte,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TermValue {
    Text(String),
    Bool(bool),
    Time { hour: u32, minute: u32 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Term {
    pub property: Property,
    pub op: CompareOp,
    pub value: TermValue,
}
