//! # prometeo-dl
//!
//! Parallel, resumable HTTP download engine.
//!
//! Given a source URL and a destination directory, prometeo-dl fetches a
//! file over multiple concurrent byte-range requests, writes each range to
//! an independent on-disk part, enforces an aggregate bandwidth ceiling
//! with per-worker token buckets, emits structured progress events, and
//! persists a manifest so interrupted downloads resume across process
//! restarts. When every range is complete the parts are concatenated into
//! the destination artifact and the working directory reclaimed.
//!
//! ## Design Philosophy
//!
//! - **Library-first** - no CLI or UI, purely a Rust crate for embedding
//! - **Event-driven** - consumers subscribe to events, no polling required
//! - **Resumable by construction** - every range owns a part file; the
//!   manifest plus the part lengths are the entire resume state
//! - **Cooperative** - workers observe stop and speed changes over
//!   channels and never block the executor
//!
//! ## Quick Start
//!
//! ```no_run
//! use prometeo_dl::{DownloadRequest, Manager, ManagerConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let manager = Manager::new(ManagerConfig::default()).await?;
//!
//!     // Subscribe to events
//!     let mut events = manager.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     let download = manager
//!         .download(DownloadRequest {
//!             url: "https://example.com/archive.tar.gz".to_string(),
//!             dir_path: "/home/user/downloads".into(),
//!             file_name: None,
//!         })
//!         .await?;
//!     download.start().await?;
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Configuration types
pub mod config;
/// Per-file download coordination
pub mod coordinator;
/// Error types
pub mod error;
/// Manifest encoding and persistence
pub mod manifest;
/// Process-level download management
pub mod manager;
/// URL metadata probing
pub mod probe;
/// Token-bucket byte-rate throttling
pub mod throttle;
/// Core types and events
pub mod types;
/// Naming and formatting helpers
pub mod utils;

mod worker;
mod worklog;

// Re-export commonly used types
pub use config::ManagerConfig;
pub use coordinator::{Download, DownloadState, Outcome};
pub use error::{Error, Result};
pub use manager::{DownloadRequest, GetDownloadQuery, Manager};
pub use probe::UrlMetadata;
pub use throttle::Throttle;
pub use types::{Event, Plan, Range};

/// Helper function to run the manager with graceful signal handling.
///
/// Waits for a termination signal, then stops every active download via
/// [`Manager::shutdown`]. Manifests and part files stay on disk, so the
/// next run resumes where this one stopped.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal
///   registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
pub async fn run_with_shutdown(manager: &Manager) {
    wait_for_signal().await;
    manager.shutdown().await;
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Signal registration can fail in restricted environments (containers, tests)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT signal (Ctrl+C)");
                }
            }
        }
        (Err(e), _) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            if let Ok(mut sigint) = signal(SignalKind::interrupt()) {
                sigint.recv().await;
                tracing::info!("Received SIGINT signal (Ctrl+C)");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
        (_, Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                sigterm.recv().await;
                tracing::info!("Received SIGTERM signal");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        }
    }
}
