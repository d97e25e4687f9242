//! Final-file composition
//!
//! Concatenates part files into the destination in ascending range order.
//! Ranges are contiguous and sorted, so the concatenation reconstructs the
//! origin's byte stream exactly. Each part is deleted as soon as it has
//! been appended.

use crate::error::Result;
use crate::types::Range;
use std::path::Path;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Append every part into `destination` in index order, deleting parts as
/// they are consumed. Any I/O error aborts and propagates.
pub(super) async fn compose_file(parts: &[Range], destination: &Path) -> Result<()> {
    let mut output = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(destination)
        .await?;

    for range in parts {
        if range.is_empty() {
            // Degenerate ranges own no bytes; drop a stray part file if a
            // previous session left one behind
            let _ = tokio::fs::remove_file(&range.part_path).await;
            continue;
        }

        let part = tokio::fs::File::open(&range.part_path).await?;
        // Bound the copy at the range length so an over-long part can
        // never push later ranges out of position
        let mut bounded = part.take(range.len());
        tokio::io::copy(&mut bounded, &mut output).await?;
        drop(bounded);
        tokio::fs::remove_file(&range.part_path).await?;
    }

    output.flush().await?;
    Ok(())
}
