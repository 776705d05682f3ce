//! Serial work queue — typed work items driven through the job registry one
//! at a time, in arrival order.
//!
//! Items that fail validation (unrecognized kind, missing input or
//! executable) are resolved on the spot and never block the queue; draining
//! continues until a dispatchable item or an empty backlog is found.

use std::future::Future;
use std::path::Path;
use std::sync::{Arc, LazyLock, Weak};

use regex::Regex;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::QueueConfig;
use crate::error::QueueError;

use super::model::{JobOutcome, JobStatus, WorkItem, WorkStatus};
use super::registry::{JobRegistry, SpawnOptions};

/// Scraped from job transcripts to locate the output artifact; the tools this
/// queue fronts print a final `Final output saved to: <path>` line.
static RESULT_PATH_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)final output saved to:\s*(.+)").expect("valid regex"));

/// Serial work queue over a [`JobRegistry`].
///
/// At most one item executes at any instant; arrival order is processing
/// order. Full item history is retained for the process lifetime.
pub struct WorkQueue {
    registry: Arc<JobRegistry>,
    config: QueueConfig,
    state: Mutex<QueueState>,
    /// Self-handle for the completion task spawned per dispatch.
    weak: Weak<WorkQueue>,
}

struct QueueState {
    items: Vec<WorkItem>,
    /// Single-flight marker: id of the item currently holding the slot.
    current: Option<Uuid>,
}

impl WorkQueue {
    /// Create a queue that dispatches through `registry` using `config` to
    /// resolve kinds and input references.
    pub fn new(registry: Arc<JobRegistry>, config: QueueConfig) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            registry,
            config,
            state: Mutex::new(QueueState {
                items: Vec::new(),
                current: None,
            }),
            weak: weak.clone(),
        })
    }

    /// Append a work item and start it as soon as the slot frees up.
    ///
    /// Returns the item's snapshot after the queue has advanced, so a
    /// validation failure is already visible on the returned value.
    pub async fn enqueue(&self, input: impl Into<String>, kind: impl Into<String>) -> WorkItem {
        let item = WorkItem {
            id: Uuid::new_v4(),
            input: input.into(),
            kind: kind.into(),
            status: WorkStatus::Queued,
            job_id: None,
            result_path: None,
            error: None,
        };
        let created = item.clone();
        info!(item_id = %item.id, kind = %item.kind, input = %item.input, "Work item enqueued");

        self.state.lock().await.items.push(item);
        self.advance().await;

        self.get(created.id).await.unwrap_or(created)
    }

    /// Value copies of every item ever enqueued, in arrival order.
    pub async fn list(&self) -> Vec<WorkItem> {
        self.state.lock().await.items.clone()
    }

    /// Look up a single item by id.
    pub async fn get(&self, id: Uuid) -> Option<WorkItem> {
        self.state
            .lock()
            .await
            .items
            .iter()
            .find(|i| i.id == id)
            .cloned()
    }

    /// Drop an item from the queue. Returns `false` for unknown ids.
    ///
    /// Removing the running item kills its job; the slot frees up through
    /// the normal completion path once the child is gone.
    pub async fn remove(&self, id: Uuid) -> bool {
        let running_job = {
            let mut state = self.state.lock().await;
            let Some(idx) = state.items.iter().position(|i| i.id == id) else {
                return false;
            };
            let item = state.items.remove(idx);
            if item.status == WorkStatus::Running {
                item.job_id
            } else {
                None
            }
        };

        if let Some(job_id) = running_job {
            self.registry.stop(job_id).await;
        }
        info!(item_id = %id, "Work item removed");
        true
    }

    /// Advance the queue: dispatch the earliest queued item if the slot is
    /// free. Invalid items are failed on the spot and draining continues;
    /// at most one item is dispatched per call.
    // Returns a boxed future to break the `Send` inference cycle between
    // `advance`, the spawned completion task, and `complete`.
    fn advance(&self) -> std::pin::Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
        loop {
            let (item_id, input_ref, script, input_path) = {
                let mut state = self.state.lock().await;
                if state.current.is_some() {
                    return;
                }
                let Some(item) = state.items.iter_mut().find(|i| i.status == WorkStatus::Queued)
                else {
                    return;
                };

                let Some(script) = self.config.executable_for(&item.kind) else {
                    let err = QueueError::UnknownKind(item.kind.clone());
                    fail_item(item, err);
                    continue;
                };
                let script = script.to_path_buf();
                let input_path = self.config.resolve_input(&item.input);
                if !input_path.exists() {
                    fail_item(item, QueueError::MissingInput(input_path));
                    continue;
                }
                if !script.exists() {
                    fail_item(item, QueueError::MissingExecutable(script));
                    continue;
                }

                let reserved = (item.id, item.input.clone(), script, input_path);
                // Reserve the slot before releasing the lock so a concurrent
                // advance cannot double-dispatch.
                state.current = Some(reserved.0);
                reserved
            };

            let job = self
                .registry
                .start(
                    script.to_string_lossy().into_owned(),
                    vec![input_path.to_string_lossy().into_owned()],
                    SpawnOptions {
                        cwd: script.parent().map(Path::to_path_buf),
                        input: Some(input_ref),
                    },
                )
                .await;

            {
                let mut state = self.state.lock().await;
                if let Some(item) = state.items.iter_mut().find(|i| i.id == item_id) {
                    // job_id lands before the item reads as running.
                    item.job_id = Some(job.id());
                    item.status = WorkStatus::Running;
                }
            }
            debug!(item_id = %item_id, job_id = %job.id(), "Work item dispatched");

            // The upgrade cannot fail while a caller holds the queue.
            if let Some(queue) = self.weak.upgrade() {
                let job_id = job.id();
                tokio::spawn(async move {
                    if let Some(outcome) = queue.registry.wait(job_id).await {
                        queue.complete(item_id, outcome).await;
                    }
                });
            }

            return;
        }
        })
    }

    /// Record a job's terminal outcome onto its work item, free the slot,
    /// and keep the queue draining.
    async fn complete(&self, item_id: Uuid, outcome: JobOutcome) {
        {
            let mut state = self.state.lock().await;
            if let Some(item) = state.items.iter_mut().find(|i| i.id == item_id) {
                item.status = match outcome.status {
                    JobStatus::Finished => WorkStatus::Finished,
                    JobStatus::Running | JobStatus::Error => WorkStatus::Error,
                };
                if item.status == WorkStatus::Finished {
                    item.result_path = result_path(&outcome.output);
                }
                info!(item_id = %item_id, status = ?item.status, "Work item completed");
            }
            if state.current == Some(item_id) {
                state.current = None;
            }
        }
        self.advance().await;
    }
}

/// Resolve a work item as failed without dispatching it.
fn fail_item(item: &mut WorkItem, err: QueueError) {
    warn!(item_id = %item.id, "{err}");
    item.status = WorkStatus::Error;
    item.error = Some(err.to_string());
}

/// Last `Final output saved to:` line wins, matching the tools' own logging.
fn result_path(output: &str) -> Option<String> {
    RESULT_PATH_RE
        .captures_iter(output)
        .last()
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
}
