//! Job and work item data model — statuses, listing rows, terminal snapshots.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle status of a spawned process job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Child process is executing.
    Running,
    /// Process exited; `exit_code` carries whatever it reported.
    Finished,
    /// Process could not be started or faulted while being supervised.
    Error,
}

impl JobStatus {
    /// Whether this status admits no further transitions.
    pub fn is_terminal(self) -> bool {
        !matches!(self, JobStatus::Running)
    }
}

/// Listing row for a job — what [`JobRegistry::list`] returns.
///
/// [`JobRegistry::list`]: super::registry::JobRegistry::list
#[derive(Debug, Clone, Serialize)]
pub struct JobSummary {
    pub id: Uuid,
    pub command: String,
    /// Input label supplied at spawn time, if any.
    pub input: Option<String>,
    pub status: JobStatus,
    pub started_at: DateTime<Utc>,
    /// Present only once the job is terminal.
    pub exit_code: Option<i32>,
}

/// Terminal snapshot of a job, delivered once to each completion waiter.
#[derive(Debug, Clone)]
pub struct JobOutcome {
    pub id: Uuid,
    pub status: JobStatus,
    pub exit_code: Option<i32>,
    /// Full combined stdout/stderr transcript.
    pub output: String,
}

/// Lifecycle status of a queued work item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkStatus {
    /// Waiting for the serial execution slot.
    Queued,
    /// Holding the slot; its job is executing.
    Running,
    /// Job exited.
    Finished,
    /// Failed validation, or its job ended in error.
    Error,
}

impl WorkStatus {
    /// Whether this status admits no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, WorkStatus::Finished | WorkStatus::Error)
    }
}

/// A unit of work tracked by the serial queue.
///
/// Items are owned by the queue; listings and lookups hand out value copies.
/// `job_id` is the only link to the registry job that executes the item.
#[derive(Debug, Clone, Serialize)]
pub struct WorkItem {
    pub id: Uuid,
    /// Input reference, resolved against the configured inputs directory.
    pub input: String,
    /// Kind tag selecting which executable runs this item.
    pub kind: String,
    pub status: WorkStatus,
    /// Id of the registry job executing this item; `None` until dispatched.
    pub job_id: Option<Uuid>,
    /// Output artifact location scraped from the job transcript on success.
    pub result_path: Option<String>,
    /// Human-readable failure description, set when validation fails.
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_serialize_snake_case() {
        assert_eq!(
            serde_json::to_value(JobStatus::Running).unwrap(),
            serde_json::json!("running")
        );
        assert_eq!(
            serde_json::to_value(JobStatus::Finished).unwrap(),
            serde_json::json!("finished")
        );
        assert_eq!(
            serde_json::to_value(WorkStatus::Queued).unwrap(),
            serde_json::json!("queued")
        );
        assert_eq!(
            serde_json::to_value(WorkStatus::Error).unwrap(),
            serde_json::json!("error")
        );
    }

    #[test]
    fn terminal_statuses() {
        assert!(!JobStatus::Running.is_terminal());
        assert!(JobStatus::Finished.is_terminal());
        assert!(JobStatus::Error.is_terminal());

        assert!(!WorkStatus::Queued.is_terminal());
        assert!(!WorkStatus::Running.is_terminal());
        assert!(WorkStatus::Finished.is_terminal());
        assert!(WorkStatus::Error.is_terminal());
    }
}
