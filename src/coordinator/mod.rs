//! Per-file download coordination
//!
//! A [`Download`] owns one plan and the workers that execute it. The
//! coordinator and its workers are decoupled by channels: speed shares
//! travel over a `watch` channel, stop over a [`CancellationToken`], and
//! worker outcomes return through the join set. Submodules:
//! - [`progress`] - the 500 ms progress sampler
//! - [`compose`] - final-file composition and work-dir cleanup

mod compose;
mod progress;

use crate::error::{Error, Result};
use crate::manifest::{self, LOG_FILE};
use crate::probe;
use crate::types::{Event, PartState, Plan, Range};
use crate::worker::{RangeWorker, WorkerOutcome, WorkerProgress};
use crate::worklog::WorkLog;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Bound on waiting for the work log to drain during stop and cleanup.
const LOG_DRAIN_TIMEOUT: Duration = Duration::from_millis(1_000);

/// Lifecycle state of a download.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DownloadState {
    /// Planned but not yet started
    Planned,
    /// Workers are running
    Running,
    /// Stop was requested; workers are winding down
    Stopping,
    /// Stopped before completion; parts remain on disk
    Stopped,
    /// All ranges complete; parts are being concatenated
    Composing,
    /// Composition done, work directory reclaimed
    Cleaned,
    /// Terminal success
    Finished,
}

/// How a [`Download::start`] call ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// The artifact was composed at the given path and the work
    /// directory reclaimed
    Completed(PathBuf),
    /// The download was stopped; the manifest and parts stay on disk
    /// for a later resume
    Stopped,
}

/// A single tracked download: plan, workers, and lifecycle.
///
/// Construction is synchronous and side-effect free; all I/O (including
/// URL revalidation) happens inside [`start`](Download::start).
#[derive(Debug)]
pub struct Download {
    url: String,
    name: String,
    size: u64,
    destination: PathBuf,
    work_dir: PathBuf,
    content_type: String,
    parts: Vec<Range>,
    resumed: bool,

    /// Aggregate bandwidth ceiling in bytes/second, mutable at runtime
    speed_bps: AtomicU64,
    /// Set when cleanup failed and the manifest was rewritten for GC
    finished_flag: AtomicBool,

    state: Mutex<DownloadState>,
    cancel: CancellationToken,
    /// Latest per-worker bandwidth share; workers subscribe at spawn
    speed_tx: tokio::sync::watch::Sender<u64>,
    event_tx: tokio::sync::broadcast::Sender<Event>,
    client: reqwest::Client,
    user_agent: String,

    /// Live worker counters, populated by `start` and read by the sampler
    workers: Mutex<Vec<Arc<WorkerProgress>>>,
    /// Log sink, live between `start` and cleanup
    worklog: Mutex<Option<WorkLog>>,
}

impl Download {
    /// Build a download from a plan (fresh or rehydrated from a manifest).
    pub(crate) fn from_plan(
        plan: Plan,
        event_tx: tokio::sync::broadcast::Sender<Event>,
        client: reqwest::Client,
        user_agent: String,
    ) -> Arc<Self> {
        let worker_count = plan.parts.len().max(1) as u64;
        let initial_share = (plan.speed_bps / worker_count).max(1);
        let (speed_tx, _) = tokio::sync::watch::channel(initial_share);

        Arc::new(Self {
            url: plan.url,
            name: plan.name,
            size: plan.size,
            destination: plan.destination,
            work_dir: plan.work_dir,
            content_type: plan.content_type,
            parts: plan.parts,
            resumed: plan.resumed,
            speed_bps: AtomicU64::new(plan.speed_bps),
            finished_flag: AtomicBool::new(plan.finished),
            state: Mutex::new(DownloadState::Planned),
            cancel: CancellationToken::new(),
            speed_tx,
            event_tx,
            client,
            user_agent,
            workers: Mutex::new(Vec::new()),
            worklog: Mutex::new(None),
        })
    }

    /// Download name (sanitized file name with extension).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Source URL.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Total artifact size in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Destination path the composed artifact is written to.
    pub fn destination(&self) -> &Path {
        &self.destination
    }

    /// Per-download working directory.
    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    /// True when this download was rehydrated from an on-disk manifest.
    pub fn is_resumed(&self) -> bool {
        self.resumed
    }

    /// Current lifecycle state.
    pub fn state(&self) -> DownloadState {
        *lock(&self.state)
    }

    /// Overall progress of the running session, rounded percent of the
    /// artifact present on disk. 0 before the workers have been spawned.
    pub fn progress(&self) -> u8 {
        let downloaded: u64 = lock(&self.workers)
            .iter()
            .map(|w| w.total_downloaded())
            .sum();
        if self.size == 0 {
            return 100;
        }
        ((downloaded as f64 / self.size as f64 * 100.0).round() as u64).min(100) as u8
    }

    /// Current aggregate bandwidth ceiling in bytes/second.
    pub fn speed_bps(&self) -> u64 {
        self.speed_bps.load(Ordering::Relaxed)
    }

    /// Update the aggregate ceiling and rebroadcast per-worker shares.
    pub fn set_speed(&self, total_bps: u64) {
        let total = total_bps.max(1);
        self.speed_bps.store(total, Ordering::Relaxed);

        let per_worker = (total / self.active_worker_count().max(1) as u64).max(1);
        self.speed_tx.send_replace(per_worker);
        self.emit(Event::SpeedChanged {
            name: self.name.clone(),
            per_worker_bps: per_worker,
        });
    }

    /// Run the download to completion (or until stopped).
    ///
    /// Transitions `Planned → Running`, revalidates the URL (failure is
    /// logged, not fatal), spawns one worker per range, samples progress
    /// every 500 ms, and once every worker is terminal either resolves
    /// `Outcome::Stopped` or verifies all parts on disk, composes the
    /// destination, and reclaims the work directory.
    pub async fn start(&self) -> Result<Outcome> {
        {
            let mut state = lock(&self.state);
            if *state != DownloadState::Planned {
                return Err(Error::InvalidArgument(format!(
                    "cannot start '{}' in state {:?}",
                    self.name, *state
                )));
            }
            *state = DownloadState::Running;
        }

        tracing::info!(
            name = %self.name,
            size = self.size,
            ranges = self.parts.len(),
            resumed = self.resumed,
            "Starting download"
        );
        self.emit(Event::Started {
            name: self.name.clone(),
        });

        tokio::fs::create_dir_all(&self.work_dir).await?;
        let worklog = WorkLog::spawn(self.work_dir.join(LOG_FILE));
        *lock(&self.worklog) = Some(worklog.clone());

        // Revalidate against the origin; a failed probe is worth a log
        // line but the range requests themselves decide the outcome
        if let Err(e) =
            probe::fetch_metadata(&self.client, &self.url, &self.user_agent).await
        {
            tracing::warn!(name = %self.name, error = %e, "URL revalidation failed");
            worklog.log(format!("revalidation failed: {e}"));
        }

        worklog.log(format!(
            "starting '{}': {} bytes over {} ranges{}",
            self.name,
            self.size,
            self.parts.len(),
            if self.resumed { " (resumed)" } else { "" }
        ));

        let (mut join_set, worker_progress) = self.spawn_workers(&worklog);
        *lock(&self.workers) = worker_progress.clone();

        let sampler_cancel = CancellationToken::new();
        let sampler = progress::spawn_sampler(progress::SamplerParams {
            name: self.name.clone(),
            size: self.size,
            workers: worker_progress,
            event_tx: self.event_tx.clone(),
            cancel: sampler_cancel.clone(),
        });

        let mut active = self.parts.len();
        let mut failures: Vec<String> = Vec::new();
        while let Some(joined) = join_set.join_next().await {
            active -= 1;
            match joined {
                Ok(WorkerOutcome::Done) | Ok(WorkerOutcome::Cancelled) => {}
                Ok(WorkerOutcome::Errored(message)) => failures.push(message),
                Err(e) => failures.push(format!("worker task failed: {e}")),
            }

            // Finished workers hand their bandwidth share to the rest
            if active > 0 && !self.cancel.is_cancelled() {
                let per_worker = (self.speed_bps() / active as u64).max(1);
                self.speed_tx.send_replace(per_worker);
                self.emit(Event::SpeedChanged {
                    name: self.name.clone(),
                    per_worker_bps: per_worker,
                });
            }
        }

        sampler_cancel.cancel();
        let _ = sampler.await;

        if self.cancel.is_cancelled() {
            let mut state = lock(&self.state);
            if *state == DownloadState::Stopping {
                *state = DownloadState::Stopped;
            }
            tracing::info!(name = %self.name, "Download stopped");
            return Ok(Outcome::Stopped);
        }

        self.verify_parts_complete(&failures).await?;

        *lock(&self.state) = DownloadState::Composing;
        self.emit(Event::Finished {
            name: self.name.clone(),
            destination: self.destination.clone(),
        });
        worklog.log(format!(
            "all ranges complete, composing '{}'",
            self.destination.display()
        ));

        compose::compose_file(&self.parts, &self.destination).await?;

        self.cleanup(&worklog).await;
        *lock(&self.state) = DownloadState::Finished;

        tracing::info!(
            name = %self.name,
            destination = %self.destination.display(),
            "Download finished"
        );
        Ok(Outcome::Completed(self.destination.clone()))
    }

    /// Request a stop. Idempotent: repeat calls and calls during
    /// composition or after a terminal state are no-ops.
    ///
    /// Waits for the work log to drain, bounded by a 1000 ms safety
    /// timeout, before emitting `Stopped`.
    pub async fn stop(&self) {
        let was_planned = {
            let mut state = lock(&self.state);
            match *state {
                DownloadState::Planned => {
                    *state = DownloadState::Stopped;
                    true
                }
                DownloadState::Running => {
                    *state = DownloadState::Stopping;
                    false
                }
                // Already stopping/stopped, or past the point of no return
                _ => return,
            }
        };

        tracing::info!(name = %self.name, "Stopping download");
        if was_planned {
            self.emit(Event::Stopped {
                name: self.name.clone(),
            });
            return;
        }

        self.cancel.cancel();

        let worklog = lock(&self.worklog).clone();
        if let Some(log) = worklog {
            log.log("stop requested");
            log.drain(LOG_DRAIN_TIMEOUT).await;
        }

        self.emit(Event::Stopped {
            name: self.name.clone(),
        });
    }

    /// Rebuild the current plan for persistence.
    pub(crate) fn plan_snapshot(&self) -> Plan {
        Plan {
            url: self.url.clone(),
            name: self.name.clone(),
            size: self.size,
            destination: self.destination.clone(),
            work_dir: self.work_dir.clone(),
            content_type: self.content_type.clone(),
            parts: self.parts.clone(),
            speed_bps: self.speed_bps(),
            finished: self.finished_flag.load(Ordering::Relaxed),
            resumed: self.resumed,
        }
    }

    pub(crate) fn emit(&self, event: Event) {
        // send() errs when nobody subscribes, which is fine
        self.event_tx.send(event).ok();
    }

    fn active_worker_count(&self) -> usize {
        let workers = lock(&self.workers);
        if workers.is_empty() {
            return self.parts.len();
        }
        workers.iter().filter(|w| !w.is_finished()).count()
    }

    fn spawn_workers(
        &self,
        worklog: &WorkLog,
    ) -> (JoinSet<WorkerOutcome>, Vec<Arc<WorkerProgress>>) {
        // Every worker gets an equal share of the ceiling up front; shares
        // are rebalanced as workers finish
        let initial_share = (self.speed_bps() / self.parts.len().max(1) as u64).max(1);
        self.speed_tx.send_replace(initial_share);

        let mut join_set = JoinSet::new();
        let mut progress = Vec::with_capacity(self.parts.len());
        for range in &self.parts {
            let worker_progress = Arc::new(WorkerProgress::new(range.len()));
            progress.push(Arc::clone(&worker_progress));

            let worker = RangeWorker {
                range: range.clone(),
                url: self.url.clone(),
                user_agent: self.user_agent.clone(),
                content_type: self.content_type.clone(),
                client: self.client.clone(),
                speed_rx: self.speed_tx.subscribe(),
                cancel: self.cancel.child_token(),
                progress: worker_progress,
                log: worklog.clone(),
            };
            join_set.spawn(worker.run());
        }
        (join_set, progress)
    }

    /// After every worker is terminal, the part files are the source of
    /// truth: proceed only if each range is complete on disk.
    async fn verify_parts_complete(&self, failures: &[String]) -> Result<()> {
        for range in &self.parts {
            let existing = match tokio::fs::metadata(&range.part_path).await {
                Ok(meta) => meta.len(),
                Err(_) => 0,
            };
            if !PartState::derive(range, existing).is_complete() {
                let detail = failures
                    .first()
                    .map(|f| format!(": {f}"))
                    .unwrap_or_default();
                return Err(Error::internal(format!(
                    "range {} of '{}' incomplete after download{detail}",
                    range.index, self.name
                )));
            }
        }
        Ok(())
    }

    /// Reclaim the work directory. Failures are not surfaced: the manifest
    /// is rewritten with `finished = true` so the next scan collects it.
    async fn cleanup(&self, worklog: &WorkLog) {
        worklog.close(LOG_DRAIN_TIMEOUT).await;
        *lock(&self.worklog) = None;

        if let Err(e) = tokio::fs::remove_dir_all(&self.work_dir).await {
            if !self.work_dir.exists() {
                return;
            }
            tracing::warn!(
                name = %self.name,
                work_dir = %self.work_dir.display(),
                error = %e,
                "Could not remove work directory, marking manifest finished for later collection"
            );
            self.finished_flag.store(true, Ordering::Relaxed);
            let plan = self.plan_snapshot();
            if let Err(write_err) = manifest::write(&self.work_dir, &plan).await {
                tracing::warn!(name = %self.name, error = %write_err, "Manifest rewrite failed");
            }
            return;
        }
        *lock(&self.state) = DownloadState::Cleaned;
    }
}

/// Lock a mutex, recovering the guard if a worker panicked mid-update.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}
