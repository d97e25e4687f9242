//! Range worker: downloads one byte range into one part file
//!
//! A worker is a single task owning its part-file handle, its HTTP
//! response stream, and its [`Throttle`]. It holds no reference back to
//! the coordinator: speed changes arrive over a `watch` channel, stop over
//! a [`CancellationToken`], and the terminal outcome travels back as the
//! task's return value. Network read → throttle → disk write form one
//! cooperative pipeline with end-to-end backpressure.

use crate::throttle::Throttle;
use crate::types::Range;
use crate::worklog::WorkLog;
use futures_util::StreamExt;
use reqwest::{StatusCode, header};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

/// Stream-error fragments that are the expected shape of cancellation.
/// Errors matching these are suppressed instead of reported.
const CANCELLATION_ARTIFACTS: [&str; 3] = ["closed", "Premature close", "canceled"];

/// Bytes admitted through the throttle per acquire. Bounds how long a
/// worker can sit inside one acquire, so stop and speed-change signals
/// are observed even when the origin hands over large chunks.
const THROTTLE_SLICE: usize = 2048;

/// Live progress counters for one worker, read by the coordinator's
/// sampler. All fields are monotonic within a session.
#[derive(Debug)]
pub(crate) struct WorkerProgress {
    /// Full range length in bytes (0 for degenerate ranges)
    pub range_len: u64,
    /// Bytes already on disk when the worker started
    pub existing: AtomicU64,
    /// Bytes received over the network this session
    pub bytes_received: AtomicU64,
    /// Set once the worker's range is complete
    pub finished: AtomicBool,
}

impl WorkerProgress {
    pub(crate) fn new(range_len: u64) -> Self {
        Self {
            range_len,
            existing: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            finished: AtomicBool::new(false),
        }
    }

    /// Bytes of this range present on disk: pre-existing plus received.
    pub(crate) fn total_downloaded(&self) -> u64 {
        self.existing.load(Ordering::Relaxed) + self.bytes_received.load(Ordering::Relaxed)
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Relaxed)
    }

    /// Fraction of the range on disk, as a percentage in 0.0..=100.0.
    pub(crate) fn percent(&self) -> f64 {
        if self.range_len == 0 {
            100.0
        } else {
            (self.total_downloaded() as f64 / self.range_len as f64 * 100.0).min(100.0)
        }
    }
}

/// Terminal outcome of one worker task.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum WorkerOutcome {
    /// The range is complete on disk
    Done,
    /// The worker observed the stop signal (or a cancellation artifact)
    Cancelled,
    /// The stream or disk failed; the part keeps its bytes for a later resume
    Errored(String),
}

/// Everything a worker needs, handed over at spawn time.
pub(crate) struct RangeWorker {
    pub range: Range,
    pub url: String,
    pub user_agent: String,
    /// Forwarded for logging only
    pub content_type: String,
    pub client: reqwest::Client,
    /// Latest per-worker bandwidth share in bytes/second
    pub speed_rx: tokio::sync::watch::Receiver<u64>,
    pub cancel: CancellationToken,
    pub progress: Arc<WorkerProgress>,
    pub log: WorkLog,
}

impl RangeWorker {
    /// Download the range, resuming from the part file's current length.
    pub(crate) async fn run(mut self) -> WorkerOutcome {
        let index = self.range.index;
        let range_len = self.range.len();

        let existing = match tokio::fs::metadata(&self.range.part_path).await {
            Ok(meta) => meta.len(),
            Err(_) => 0,
        };
        self.progress.existing.store(existing, Ordering::Relaxed);

        // Degenerate range, or a part already covering it: nothing to fetch
        if existing >= range_len {
            self.progress.finished.store(true, Ordering::Relaxed);
            self.log
                .log(format!("range {index} already complete ({existing} bytes on disk)"));
            return WorkerOutcome::Done;
        }

        let mut file = match tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.range.part_path)
            .await
        {
            Ok(f) => f,
            Err(e) => {
                let msg = format!("range {index}: cannot open part file: {e}");
                self.log.log(msg.clone());
                return WorkerOutcome::Errored(msg);
            }
        };

        let throttle = Throttle::new(*self.speed_rx.borrow_and_update());

        let request_start = self.range.start as u64 + existing;
        let range_header = format!("bytes={request_start}-{}", self.range.end);
        self.log.log(format!(
            "range {index}: GET {range_header} ({})",
            self.content_type
        ));

        let send = self
            .client
            .get(&self.url)
            .header(header::RANGE, range_header.as_str())
            .header(header::USER_AGENT, self.user_agent.as_str())
            .send();

        let response = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                self.log.log(format!("range {index}: destroyed before response"));
                return WorkerOutcome::Cancelled;
            }
            result = send => match result {
                Ok(resp) => resp,
                Err(e) => return self.stream_failure(index, e.to_string()),
            },
        };

        match response.status() {
            StatusCode::PARTIAL_CONTENT => {}
            StatusCode::RANGE_NOT_SATISFIABLE => {
                // The origin says there is nothing left to serve for this
                // range; trust the bytes already on disk
                self.progress.finished.store(true, Ordering::Relaxed);
                self.log
                    .log(format!("range {index}: 416, treating as complete"));
                return WorkerOutcome::Done;
            }
            status => {
                // A 200 full-body answer here would silently corrupt a
                // resumed part, so anything but 206 is fatal
                let msg = format!("range {index}: expected 206, origin answered {status}");
                self.log.log(msg.clone());
                return WorkerOutcome::Errored(msg);
            }
        }

        let mut remaining = range_len - existing;
        let mut stream = response.bytes_stream();
        let mut speed_watch_open = true;

        loop {
            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => {
                    let _ = file.flush().await;
                    self.log.log(format!("range {index}: destroyed"));
                    return WorkerOutcome::Cancelled;
                }

                changed = self.speed_rx.changed(), if speed_watch_open => {
                    match changed {
                        Ok(()) => throttle.set_rate(*self.speed_rx.borrow_and_update()),
                        // Sender gone: keep the last rate and stream on
                        Err(_) => speed_watch_open = false,
                    }
                }

                chunk = stream.next() => match chunk {
                    Some(Ok(mut bytes)) => {
                        // Clamp to the range boundary; an over-delivering
                        // origin must not grow the part past its range
                        if (bytes.len() as u64) > remaining {
                            bytes = bytes.split_to(remaining as usize);
                        }

                        let mut offset = 0;
                        while offset < bytes.len() {
                            let slice_len = (bytes.len() - offset).min(THROTTLE_SLICE);

                            if !self.admit(&throttle, slice_len as u64).await {
                                let _ = file.flush().await;
                                self.log.log(format!("range {index}: destroyed mid-throttle"));
                                return WorkerOutcome::Cancelled;
                            }

                            if let Err(e) =
                                file.write_all(&bytes[offset..offset + slice_len]).await
                            {
                                let msg = format!("range {index}: part write failed: {e}");
                                self.log.log(msg.clone());
                                return WorkerOutcome::Errored(msg);
                            }

                            offset += slice_len;
                            remaining -= slice_len as u64;
                            self.progress
                                .bytes_received
                                .fetch_add(slice_len as u64, Ordering::Relaxed);
                        }

                        if remaining == 0 {
                            let _ = file.flush().await;
                            self.progress.finished.store(true, Ordering::Relaxed);
                            self.log.log(format!("range {index}: finished"));
                            return WorkerOutcome::Done;
                        }
                    }
                    Some(Err(e)) => {
                        let _ = file.flush().await;
                        return self.stream_failure(index, e.to_string());
                    }
                    None => {
                        // EOF before the range filled up; the coordinator
                        // re-derives part state from disk and decides
                        let _ = file.flush().await;
                        if remaining == 0 {
                            self.progress.finished.store(true, Ordering::Relaxed);
                            self.log.log(format!("range {index}: finished"));
                            return WorkerOutcome::Done;
                        }
                        let msg = format!(
                            "range {index}: stream ended with {remaining} bytes remaining"
                        );
                        self.log.log(msg.clone());
                        return WorkerOutcome::Errored(msg);
                    }
                },
            }
        }
    }

    /// Admit `len` bytes through the throttle, reacting to stop and speed
    /// changes while waiting. Returns false when the stop signal fired.
    async fn admit(&mut self, throttle: &Throttle, len: u64) -> bool {
        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return false,
                changed = self.speed_rx.changed() => match changed {
                    // Re-arm the acquire at the new rate
                    Ok(()) => throttle.set_rate(*self.speed_rx.borrow_and_update()),
                    // Sender gone: keep the last rate and stop watching
                    Err(_) => {
                        tokio::select! {
                            biased;
                            _ = self.cancel.cancelled() => return false,
                            _ = throttle.acquire(len) => return true,
                        }
                    }
                },
                _ = throttle.acquire(len) => return true,
            }
        }
    }

    /// Classify a transport error: cancellation artifacts are suppressed,
    /// anything else is logged and reported as a failure.
    fn stream_failure(&self, index: u32, message: String) -> WorkerOutcome {
        if is_cancellation_artifact(&message) {
            self.log.log(format!("range {index}: destroyed ({message})"));
            return WorkerOutcome::Cancelled;
        }
        tracing::warn!(range = index, error = %message, "Range stream failed");
        self.log.log(format!("range {index}: stream error: {message}"));
        WorkerOutcome::Errored(message)
    }
}

fn is_cancellation_artifact(message: &str) -> bool {
    CANCELLATION_ARTIFACTS
        .iter()
        .any(|artifact| message.contains(artifact))
}
