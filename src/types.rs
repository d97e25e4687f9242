//! Core types for prometeo-dl

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// One contiguous byte range of the target file, owned by a single worker.
///
/// `start` and `end` are inclusive byte offsets. They are signed because a
/// plan whose size is smaller than its connection count produces degenerate
/// ranges with `end == start - 1` (the partition rule keeps the part count
/// fixed and lets trailing ranges collapse to empty).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Range {
    /// Zero-based position of this range within the plan
    pub index: u32,
    /// Absolute path of the part file inside the work directory
    pub part_path: PathBuf,
    /// First byte offset of the range (inclusive)
    pub start: i64,
    /// Last byte offset of the range (inclusive; `start - 1` for empty ranges)
    pub end: i64,
}

impl Range {
    /// Number of bytes this range covers; 0 for degenerate (inverted) ranges.
    pub fn len(&self) -> u64 {
        if self.end < self.start {
            0
        } else {
            (self.end - self.start + 1) as u64
        }
    }

    /// True when the range covers no bytes.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Derived on-disk state of one range's part file. Never persisted; always
/// recomputed from the part file's current length.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PartState {
    /// Bytes already present in the part file (0 when the file is missing)
    pub existing: u64,
    /// Bytes still required to complete the range
    pub remaining: u64,
}

impl PartState {
    /// Compute the state of `range` given the current part-file length.
    pub fn derive(range: &Range, existing: u64) -> Self {
        Self {
            existing,
            remaining: range.len().saturating_sub(existing),
        }
    }

    /// A range is complete once nothing remains, which also covers
    /// degenerate ranges whose length is 0.
    pub fn is_complete(&self) -> bool {
        self.remaining == 0
    }
}

/// The persisted download plan. Immutable once written, except for
/// `speed_bps` (mutable at runtime) and `finished` (set when cleanup could
/// not remove the work directory, so a later scan garbage-collects it).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    /// Absolute source URL (http or https)
    pub url: String,
    /// Sanitized file name including extension
    pub name: String,
    /// Total size of the artifact in bytes
    pub size: u64,
    /// Absolute path the composed artifact is written to
    pub destination: PathBuf,
    /// Absolute per-download working directory
    pub work_dir: PathBuf,
    /// Content type reported by the origin (logging only)
    pub content_type: String,
    /// Ordered, contiguous, non-overlapping ranges covering `0..size`
    pub parts: Vec<Range>,
    /// Current aggregate bandwidth ceiling in bytes/second
    pub speed_bps: u64,
    /// True only after cleanup ran (or failed in a way a scan must reclaim)
    pub finished: bool,
    /// Set when the plan was rehydrated from disk after a restart
    pub resumed: bool,
}

/// Partition `size` bytes into `connections` contiguous inclusive ranges.
///
/// `slice = floor(size / n)`; every range but the last spans `slice` bytes,
/// the last absorbs the remainder. When `size < n` the leading ranges are
/// degenerate (`end < start`) and count as already complete.
pub fn partition_ranges(name: &str, work_dir: &Path, size: u64, connections: usize) -> Vec<Range> {
    let n = connections.max(1) as u64;
    let slice = (size / n) as i64;

    (0..n)
        .map(|i| {
            let start = i as i64 * slice;
            let end = if i == n - 1 {
                size as i64 - 1
            } else {
                start + slice - 1
            };
            Range {
                index: i as u32,
                part_path: work_dir.join(format!("{name}{i}")),
                start,
                end,
            }
        })
        .collect()
}

/// Event emitted during the download lifecycle.
///
/// All components publish into one broadcast channel; subscribers receive
/// every event independently and laggards are dropped, not blocked.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A download was registered, either freshly planned or rehydrated
    /// from a manifest found during the startup scan
    DownloadAdded {
        /// Download name
        name: String,
        /// True when the download was reconstructed from disk
        resumed: bool,
    },

    /// A download transitioned from planned to running
    Started {
        /// Download name
        name: String,
    },

    /// Periodic progress sample (every 500 ms while running)
    Progress {
        /// Download name
        name: String,
        /// Human-readable aggregate speed, e.g. `"1.23 MB/s"`
        speed: String,
        /// Mean progress of unfinished workers, rounded, clamped to 0..=100
        percent: u8,
        /// Estimated milliseconds to completion; `None` while speed is 0
        eta_ms: Option<u64>,
    },

    /// The per-worker bandwidth share changed (ceiling update, or a worker
    /// finished and its share was reclaimed by the remaining workers)
    SpeedChanged {
        /// Download name
        name: String,
        /// New per-worker ceiling in bytes/second
        per_worker_bps: u64,
    },

    /// The download was stopped before completion; parts stay on disk
    Stopped {
        /// Download name
        name: String,
    },

    /// All ranges completed; composition into the destination follows
    Finished {
        /// Download name
        name: String,
        /// Path the composed artifact is written to
        destination: PathBuf,
    },

    /// The download was removed from tracking and its work dir deleted
    DownloadRemoved {
        /// Download name
        name: String,
    },
}
