//! Error types for jobmux.
//!
//! Nothing here crosses the crate boundary as `Err` during normal operation:
//! failures are rendered onto job transcripts and work item records, and
//! callers observe them through statuses. The types exist so the rendering is
//! consistent and so embedders can match on them if they ever need to.

use std::path::PathBuf;

/// Top-level error type for the crate.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Job error: {0}")]
    Job(#[from] JobError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),
}

/// Process-level failures inside the job registry.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("Failed to spawn {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed waiting on child process: {0}")]
    Wait(#[source] std::io::Error),
}

/// Validation failures at the work queue layer.
///
/// These resolve a work item to `error` before any process is spawned.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Unrecognized work kind: {0}")]
    UnknownKind(String),

    #[error("Input file does not exist: {}", .0.display())]
    MissingInput(PathBuf),

    #[error("Executable does not exist: {}", .0.display())]
    MissingExecutable(PathBuf),
}
