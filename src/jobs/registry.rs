//! Process job registry — spawns and supervises child processes, accumulates
//! their combined output into an append-only transcript, and fans that
//! transcript out live to any number of attached sinks.
//!
//! A sink is an `mpsc::UnboundedSender<String>`. On attach it receives the
//! whole transcript so far as one message, then every later chunk in
//! production order; the channel closes (sender dropped) when the job reaches
//! a terminal state. Snapshot-then-subscribe runs under the job's state lock,
//! so an append lands either entirely before or entirely after the snapshot —
//! a sink never misses a byte and never sees one twice.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::{Mutex, RwLock, oneshot, watch};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::JobError;

use super::model::{JobOutcome, JobStatus, JobSummary};

/// Read buffer size for child stdout/stderr pipes.
const PIPE_BUF_SIZE: usize = 4096;

/// Options for spawning a job.
#[derive(Debug, Clone, Default)]
pub struct SpawnOptions {
    /// Working directory for the child process.
    pub cwd: Option<PathBuf>,
    /// Input label carried on the job for listings.
    pub input: Option<String>,
}

/// A supervised child process with an append-only output transcript.
///
/// Owned by the registry for the process lifetime; collaborators hold the id.
pub struct Job {
    id: Uuid,
    command: String,
    args: Vec<String>,
    input: Option<String>,
    started_at: DateTime<Utc>,
    state: Mutex<JobState>,
    done: watch::Sender<bool>,
}

struct JobState {
    status: JobStatus,
    exit_code: Option<i32>,
    output: String,
    sinks: Vec<UnboundedSender<String>>,
    kill: Option<oneshot::Sender<()>>,
}

impl Job {
    fn new(command: String, args: Vec<String>, input: Option<String>) -> Arc<Self> {
        let (done, _) = watch::channel(false);
        Arc::new(Self {
            id: Uuid::new_v4(),
            command,
            args,
            input,
            started_at: Utc::now(),
            state: Mutex::new(JobState {
                status: JobStatus::Running,
                exit_code: None,
                output: String::new(),
                sinks: Vec::new(),
                kill: None,
            }),
            done,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Current listing row.
    pub async fn summary(&self) -> JobSummary {
        let state = self.state.lock().await;
        JobSummary {
            id: self.id,
            command: self.command.clone(),
            input: self.input.clone(),
            status: state.status,
            started_at: self.started_at,
            exit_code: state.exit_code,
        }
    }

    /// Current status.
    pub async fn status(&self) -> JobStatus {
        self.state.lock().await.status
    }

    /// Transcript accumulated so far.
    pub async fn output(&self) -> String {
        self.state.lock().await.output.clone()
    }

    /// Resolve once the job is terminal, with the terminal snapshot.
    ///
    /// May be awaited before or after the job finishes, by any number of
    /// waiters; each resolves exactly once with the same snapshot.
    pub async fn wait(&self) -> JobOutcome {
        let mut rx = self.done.subscribe();
        // The sender lives on this job, so this cannot fail while we hold a
        // reference; the flag is set strictly after the terminal transition.
        let _ = rx.wait_for(|done| *done).await;

        let state = self.state.lock().await;
        JobOutcome {
            id: self.id,
            status: state.status,
            exit_code: state.exit_code,
            output: state.output.clone(),
        }
    }

    /// Attach a live output sink.
    ///
    /// The sink immediately receives the whole transcript so far as one
    /// message. A terminal job gets no subscription: the sender is dropped
    /// right after the snapshot, closing the sink's channel.
    async fn attach(&self, sink: UnboundedSender<String>) {
        let mut state = self.state.lock().await;
        if !state.output.is_empty() {
            let _ = sink.send(state.output.clone());
        }
        if state.status.is_terminal() {
            return;
        }
        state.sinks.push(sink);
    }

    /// Append a chunk to the transcript and forward it to live sinks.
    ///
    /// A sink whose receiver is gone fails the send and is dropped here;
    /// disconnects never surface as job failures.
    async fn append(&self, chunk: &str) {
        let mut state = self.state.lock().await;
        state.output.push_str(chunk);
        state.sinks.retain(|sink| sink.send(chunk.to_string()).is_ok());
    }

    /// Transition to a terminal status: flush the trailer to the transcript
    /// and every sink, close all sinks, and resolve completion waiters.
    ///
    /// Idempotent; only the first terminal transition takes effect.
    async fn finish(&self, status: JobStatus, exit_code: Option<i32>, trailer: &str) {
        {
            let mut state = self.state.lock().await;
            if state.status.is_terminal() {
                return;
            }
            if !trailer.is_empty() {
                state.output.push_str(trailer);
                for sink in &state.sinks {
                    let _ = sink.send(trailer.to_string());
                }
            }
            state.status = status;
            state.exit_code = exit_code;
            state.sinks.clear();
            state.kill = None;
        }
        let _ = self.done.send(true);
    }

    /// Ask a running job's child to die. No-op once terminal.
    async fn stop(&self) {
        let kill = self.state.lock().await.kill.take();
        if let Some(tx) = kill {
            let _ = tx.send(());
        }
    }
}

/// Registry of spawned process jobs.
///
/// Full history is retained for the process lifetime, in spawn order.
pub struct JobRegistry {
    jobs: RwLock<Vec<Arc<Job>>>,
}

impl JobRegistry {
    /// Create an empty registry.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            jobs: RwLock::new(Vec::new()),
        })
    }

    /// Spawn `command args` and return the tracking job immediately.
    ///
    /// Never blocks on the child. A spawn failure is reported through the
    /// returned job's status (`error`, with the description on the
    /// transcript), not as an error from this call, and is never retried.
    pub async fn start(
        &self,
        command: impl Into<String>,
        args: Vec<String>,
        options: SpawnOptions,
    ) -> Arc<Job> {
        let command = command.into();
        let job = Job::new(command.clone(), args.clone(), options.input);
        self.jobs.write().await.push(Arc::clone(&job));

        let mut cmd = Command::new(&command);
        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(cwd) = &options.cwd {
            cmd.current_dir(cwd);
        }

        match cmd.spawn() {
            Ok(child) => {
                let (kill_tx, kill_rx) = oneshot::channel();
                job.state.lock().await.kill = Some(kill_tx);
                info!(job_id = %job.id, command = %command, "Spawned job");
                tokio::spawn(supervise(Arc::clone(&job), child, kill_rx));
            }
            Err(e) => {
                let err = JobError::Spawn {
                    command: command.clone(),
                    source: e,
                };
                warn!(job_id = %job.id, "{err}");
                job.append(&format!("[error] {err}")).await;
                job.finish(JobStatus::Error, None, "").await;
            }
        }

        job
    }

    /// Listing rows for every known job, in spawn order.
    pub async fn list(&self) -> Vec<JobSummary> {
        let jobs = self.jobs.read().await;
        let mut summaries = Vec::with_capacity(jobs.len());
        for job in jobs.iter() {
            summaries.push(job.summary().await);
        }
        summaries
    }

    /// Look up a job by id.
    pub async fn get(&self, id: Uuid) -> Option<Arc<Job>> {
        self.jobs.read().await.iter().find(|j| j.id == id).cloned()
    }

    /// Attach a live output sink to the job with the given id.
    ///
    /// Returns `false` if the id is unknown, with no side effect.
    pub async fn stream(&self, id: Uuid, sink: UnboundedSender<String>) -> bool {
        match self.get(id).await {
            Some(job) => {
                debug!(job_id = %id, "Sink attached");
                job.attach(sink).await;
                true
            }
            None => false,
        }
    }

    /// Await the terminal snapshot of the job with the given id.
    ///
    /// Returns `None` only for unknown ids.
    pub async fn wait(&self, id: Uuid) -> Option<JobOutcome> {
        let job = self.get(id).await?;
        Some(job.wait().await)
    }

    /// Kill the child of a running job. Returns `false` for unknown ids.
    pub async fn stop(&self, id: Uuid) -> bool {
        match self.get(id).await {
            Some(job) => {
                info!(job_id = %id, "Stop requested");
                job.stop().await;
                true
            }
            None => false,
        }
    }
}

/// Drive a child process: pump both pipes into the transcript, then record
/// the exit. The exit trailer is appended only after both pipes hit EOF, so
/// no output is lost.
async fn supervise(job: Arc<Job>, mut child: Child, mut kill_rx: oneshot::Receiver<()>) {
    let out_task = child
        .stdout
        .take()
        .map(|pipe| tokio::spawn(pump(Arc::clone(&job), pipe)));
    let err_task = child
        .stderr
        .take()
        .map(|pipe| tokio::spawn(pump(Arc::clone(&job), pipe)));

    let status = tokio::select! {
        status = child.wait() => status,
        _ = &mut kill_rx => {
            debug!(job_id = %job.id, "Killing child");
            let _ = child.start_kill();
            child.wait().await
        }
    };

    if let Some(task) = out_task {
        let _ = task.await;
    }
    if let Some(task) = err_task {
        let _ = task.await;
    }

    match status {
        Ok(exit) => {
            let code = exit.code();
            let rendered = code.map_or_else(|| "none".to_string(), |c| c.to_string());
            info!(job_id = %job.id, code = %rendered, "Job exited");
            job.finish(
                JobStatus::Finished,
                code,
                &format!("\n[process exited with code {rendered}]"),
            )
            .await;
        }
        Err(e) => {
            let err = JobError::Wait(e);
            warn!(job_id = %job.id, "{err}");
            job.append(&format!("[error] {err}")).await;
            job.finish(JobStatus::Error, None, "").await;
        }
    }
}

/// Read a child pipe to EOF, appending chunks as they arrive.
async fn pump(job: Arc<Job>, mut pipe: impl AsyncRead + Unpin) {
    let mut buf = [0u8; PIPE_BUF_SIZE];
    loop {
        match pipe.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => job.append(&String::from_utf8_lossy(&buf[..n])).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    async fn sh(registry: &JobRegistry, script: &str) -> Arc<Job> {
        registry
            .start(
                "sh",
                vec!["-c".to_string(), script.to_string()],
                SpawnOptions::default(),
            )
            .await
    }

    /// Collect everything a sink receives until its channel closes.
    async fn drain(mut rx: mpsc::UnboundedReceiver<String>) -> String {
        let mut transcript = String::new();
        while let Some(chunk) = rx.recv().await {
            transcript.push_str(&chunk);
        }
        transcript
    }

    #[tokio::test]
    async fn finished_job_records_exit_and_transcript() {
        let registry = JobRegistry::new();
        let job = sh(&registry, "echo hello").await;

        let outcome = job.wait().await;
        assert_eq!(outcome.status, JobStatus::Finished);
        assert_eq!(outcome.exit_code, Some(0));
        assert!(outcome.output.contains("hello"));
        assert!(outcome.output.contains("[process exited with code 0]"));
    }

    #[tokio::test]
    async fn stderr_feeds_the_same_transcript() {
        let registry = JobRegistry::new();
        let job = sh(&registry, "echo out; echo err >&2").await;

        let outcome = job.wait().await;
        assert_eq!(outcome.status, JobStatus::Finished);
        assert!(outcome.output.contains("out"));
        assert!(outcome.output.contains("err"));
    }

    #[tokio::test]
    async fn nonzero_exit_still_finishes() {
        let registry = JobRegistry::new();
        let job = sh(&registry, "exit 3").await;

        let outcome = job.wait().await;
        assert_eq!(outcome.status, JobStatus::Finished);
        assert_eq!(outcome.exit_code, Some(3));
        assert!(outcome.output.contains("[process exited with code 3]"));
    }

    #[tokio::test]
    async fn spawn_failure_marks_job_error() {
        let registry = JobRegistry::new();
        let job = registry
            .start(
                "/definitely/not/a/real/binary",
                vec![],
                SpawnOptions::default(),
            )
            .await;

        let outcome = job.wait().await;
        assert_eq!(outcome.status, JobStatus::Error);
        assert_eq!(outcome.exit_code, None);
        assert!(outcome.output.contains("[error]"));
        assert!(outcome.output.contains("Failed to spawn"));
    }

    #[tokio::test]
    async fn stream_on_terminal_job_replays_and_closes() {
        let registry = JobRegistry::new();
        let job = sh(&registry, "echo done").await;
        job.wait().await;

        let (tx, rx) = mpsc::unbounded_channel();
        assert!(registry.stream(job.id(), tx).await);

        let transcript = timeout(Duration::from_secs(5), drain(rx)).await.unwrap();
        assert!(transcript.contains("done"));
        assert!(transcript.contains("[process exited with code 0]"));
    }

    #[tokio::test]
    async fn late_subscriber_replays_missed_output() {
        let registry = JobRegistry::new();
        let job = sh(&registry, "echo A; sleep 0.3; echo B").await;

        let (tx1, rx1) = mpsc::unbounded_channel();
        assert!(registry.stream(job.id(), tx1).await);

        // Let "A" arrive before the second sink attaches.
        tokio::time::sleep(Duration::from_millis(150)).await;
        let (tx2, rx2) = mpsc::unbounded_channel();
        assert!(registry.stream(job.id(), tx2).await);

        let (t1, t2) = tokio::join!(
            timeout(Duration::from_secs(5), drain(rx1)),
            timeout(Duration::from_secs(5), drain(rx2)),
        );
        let (t1, t2) = (t1.unwrap(), t2.unwrap());

        assert_eq!(t1, t2);
        assert!(t1.find("A").unwrap() < t1.find("B").unwrap());
        assert!(t1.contains("[process exited with code 0]"));
    }

    #[tokio::test]
    async fn disconnected_sink_does_not_affect_the_job() {
        let registry = JobRegistry::new();
        let job = sh(&registry, "sleep 0.2; echo late").await;

        let (tx, rx) = mpsc::unbounded_channel();
        assert!(registry.stream(job.id(), tx).await);
        drop(rx);

        let outcome = job.wait().await;
        assert_eq!(outcome.status, JobStatus::Finished);
        assert!(outcome.output.contains("late"));
    }

    #[tokio::test]
    async fn stream_unknown_id_is_false() {
        let registry = JobRegistry::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        assert!(!registry.stream(Uuid::new_v4(), tx).await);
    }

    #[tokio::test]
    async fn list_preserves_spawn_order() {
        let registry = JobRegistry::new();
        let first = sh(&registry, "true").await;
        let second = sh(&registry, "true").await;

        let summaries = registry.list().await;
        let ids: Vec<Uuid> = summaries.iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![first.id(), second.id()]);
        assert_eq!(summaries[0].command, "sh");
    }

    #[tokio::test]
    async fn stop_kills_a_running_job() {
        let registry = JobRegistry::new();
        let job = sh(&registry, "sleep 30").await;

        assert!(registry.stop(job.id()).await);
        let outcome = timeout(Duration::from_secs(5), job.wait()).await.unwrap();
        assert_eq!(outcome.status, JobStatus::Finished);
        // Killed by signal, so no exit code.
        assert_eq!(outcome.exit_code, None);
    }

    #[tokio::test]
    async fn wait_resolves_for_late_waiters_too() {
        let registry = JobRegistry::new();
        let job = sh(&registry, "echo once").await;

        let first = job.wait().await;
        let second = job.wait().await;
        assert_eq!(first.status, second.status);
        assert_eq!(first.output, second.output);
    }
}
