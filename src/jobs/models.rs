//! Sync job model. Adapted from the teacher's `jobs::models::{Job, JobType,
//! JobStatus}` shape (enum-with-`sqlx::Type`, `Display`/`FromStr`), narrowed
//! to the two job kinds this core actually runs.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
pub enum JobType {
    ExpandWatermarks,
    InitialSync,
    IncrementalSync,
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobType::ExpandWatermarks => write!(f, "expand_watermarks"),
            JobType::InitialSync => write!(f, "initial_sync"),
            JobType::IncrementalSync => write!(f, "incremental_sync"),
        }
    }
}

impl FromStr for JobType {
    type Err = crate::error::Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "expand_watermarks" => Ok(JobType::ExpandWatermarks),
            "initial_sync" => Ok(JobType::InitialSync),
            "incremental_sync" => Ok(JobType::IncrementalSync),
            other => Err(crate::error::Error::invalid_argument(format!("unknown job type '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "pending"),
            JobStatus::Running => write!(f, "running"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SyncJob {
    pub id: Uuid,
    pub calendar_id: Uuid,
    pub job_type: JobType,
    pub target_min_date: NaiveDate,
    pub target_max_date: NaiveDate,
    pub status: JobStatus,
    pub priority: i32,
    pub created_at: DateTime<Utc>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub claimed_by: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_type_round_trips_through_display_and_from_str() {
        for jt in [JobType::ExpandWatermarks, JobType::InitialSync, JobType::IncrementalSync] {
            let s = jt.to_string();
            assert_eq!(JobType::from_str(&s).unwrap(), jt);
        }
    }

    #[test]
    fn unknown_job_type_string_is_an_error() {
        assert!(JobType::from_str("bogus").is_err());
    }
}
