//! Per-download text log sink
//!
//! Each work directory carries a `prometeo.log` with newline-delimited,
//! ISO-8601-timestamped lines. The coordinator and all of its workers write
//! through one handle; a single writer task serializes the appends so the
//! file never interleaves. The log is a debugging aid only: if the file
//! cannot be opened the sink degrades to discarding lines, and its absence
//! or corruption never affects resumption.

use chrono::{SecondsFormat, Utc};
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, oneshot};

enum Message {
    Line(String),
    Drain(oneshot::Sender<()>),
    Close(oneshot::Sender<()>),
}

/// Cloneable handle to a per-download log sink.
///
/// Lines are buffered through an unbounded channel and flushed by the
/// writer task; [`WorkLog::drain`] forces a flush and is bounded by the
/// caller's safety timeout so shutdown can never hang on a slow disk.
#[derive(Clone, Debug)]
pub(crate) struct WorkLog {
    tx: mpsc::UnboundedSender<Message>,
}

impl WorkLog {
    /// Spawn the writer task appending to `path`.
    pub(crate) fn spawn(path: PathBuf) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(writer_task(path, rx));
        Self { tx }
    }

    /// Queue one line. Never blocks; silently dropped after shutdown.
    pub(crate) fn log(&self, message: impl Into<String>) {
        self.tx.send(Message::Line(message.into())).ok();
    }

    /// Flush queued lines to disk, waiting at most `timeout`.
    ///
    /// Resolves unconditionally: if the writer cannot acknowledge within
    /// the window (or is already gone), drainage is abandoned and pending
    /// lines are lost, which is acceptable for a debugging artifact.
    pub(crate) async fn drain(&self, timeout: Duration) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.tx.send(Message::Drain(ack_tx)).is_err() {
            return;
        }
        let _ = tokio::time::timeout(timeout, ack_rx).await;
    }

    /// Flush and release the file handle, waiting at most `timeout`.
    ///
    /// The work directory can be removed once this returns; later `log`
    /// calls are discarded.
    pub(crate) async fn close(&self, timeout: Duration) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.tx.send(Message::Close(ack_tx)).is_err() {
            return;
        }
        let _ = tokio::time::timeout(timeout, ack_rx).await;
    }
}

async fn writer_task(path: PathBuf, mut rx: mpsc::UnboundedReceiver<Message>) {
    let mut file = match tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .await
    {
        Ok(f) => Some(f),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Work log unavailable, discarding lines");
            None
        }
    };

    while let Some(message) = rx.recv().await {
        match message {
            Message::Line(line) => {
                if let Some(f) = file.as_mut() {
                    let stamp = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
                    let entry = format!("{stamp} - {line}\n");
                    if let Err(e) = f.write_all(entry.as_bytes()).await {
                        tracing::warn!(path = %path.display(), error = %e, "Work log write failed, discarding further lines");
                        file = None;
                    }
                }
            }
            Message::Drain(ack) => {
                if let Some(f) = file.as_mut() {
                    let _ = f.flush().await;
                }
                let _ = ack.send(());
            }
            Message::Close(ack) => {
                if let Some(mut f) = file.take() {
                    let _ = f.flush().await;
                }
                let _ = ack.send(());
                return;
            }
        }
    }

    if let Some(mut f) = file {
        let _ = f.flush().await;
    }
}
