//! Job execution core — process registry and the serial work queue on top.
//!
//! Components:
//! - `model` — statuses, listing rows, terminal snapshots
//! - `registry` — spawns and supervises child processes, fans their combined
//!   output out to attached sinks
//! - `queue` — serializes typed work items through the registry

pub mod model;
pub mod queue;
pub mod registry;

pub use model::{JobOutcome, JobStatus, JobSummary, WorkItem, WorkStatus};
pub use queue::WorkQueue;
pub use registry::{Job, JobRegistry, SpawnOptions};
