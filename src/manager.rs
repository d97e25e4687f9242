//! Process-level download management
//!
//! The [`Manager`] owns configuration defaults, the temp-directory scan
//! that rehydrates interrupted downloads on startup, and the public
//! lifecycle: planning new downloads, looking up tracked ones, propagating
//! the global bandwidth ceiling, and stopping everything on shutdown.

use crate::config::{MBPS_TO_BPS, ManagerConfig};
use crate::coordinator::Download;
use crate::error::{Error, Result};
use crate::manifest::{self, MANIFEST_FILE};
use crate::probe;
use crate::types::{Event, Plan, partition_ranges};
use crate::utils::base_name_without_extension;
use futures_util::future::join_all;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{Mutex, broadcast};

/// Request for a new download.
#[derive(Clone, Debug)]
pub struct DownloadRequest {
    /// Absolute http(s) URL of the artifact
    pub url: String,
    /// Directory the composed artifact is written into (created if absent)
    pub dir_path: PathBuf,
    /// Explicit file name; `None` uses the probed name (or a random
    /// replacement when the probed name is unusable)
    pub file_name: Option<String>,
}

/// Lookup query for [`Manager::get_download`].
///
/// Matches are boolean-OR: a download is returned when its name equals
/// `file_name` or its URL equals `url`.
#[derive(Clone, Debug, Default)]
pub struct GetDownloadQuery {
    /// Match by download name
    pub file_name: Option<String>,
    /// Match by source URL
    pub url: Option<String>,
}

/// Download manager: configuration, tracking, and rehydration.
#[derive(Debug)]
pub struct Manager {
    config: ManagerConfig,
    temp_dir: PathBuf,
    client: reqwest::Client,
    event_tx: broadcast::Sender<Event>,
    downloads: Mutex<Vec<Arc<Download>>>,
    /// Global bandwidth ceiling in bytes/second
    speed_bps: AtomicU64,
}

impl Manager {
    /// Create a manager: validate configuration, ensure the temp directory
    /// exists, and scan it for manifests left by earlier runs.
    ///
    /// Every subdirectory with a decodable, unfinished manifest becomes a
    /// tracked download marked `resumed` (start it to continue). Finished
    /// or undecodable manifests are garbage-collected with their
    /// directories.
    pub async fn new(config: ManagerConfig) -> Result<Self> {
        let temp_dir = config.validate()?;
        tokio::fs::create_dir_all(&temp_dir).await.map_err(|e| {
            Error::InvalidArgument(format!(
                "cannot create tempdir '{}': {e}",
                temp_dir.display()
            ))
        })?;

        let (event_tx, _) = broadcast::channel(1_000);

        let manager = Self {
            speed_bps: AtomicU64::new(config.speed_limit_bps()),
            config,
            temp_dir,
            client: reqwest::Client::new(),
            event_tx,
            downloads: Mutex::new(Vec::new()),
        };

        manager.scan_temp_dir().await?;
        Ok(manager)
    }

    /// Subscribe to lifecycle events. Multiple subscribers each receive
    /// every event; a subscriber lagging more than 1000 events is dropped
    /// behind, not blocked on.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Root directory holding the per-download work directories.
    pub fn temp_dir(&self) -> &Path {
        &self.temp_dir
    }

    /// Snapshot of all tracked downloads (rehydrated ones included).
    pub async fn downloads(&self) -> Vec<Arc<Download>> {
        self.downloads.lock().await.clone()
    }

    /// Plan a new download and return its handle.
    ///
    /// Probes the URL, requires range support, resolves the final name,
    /// writes the manifest, and tracks the handle. The download does not
    /// run until [`Download::start`] is called.
    pub async fn download(&self, request: DownloadRequest) -> Result<Arc<Download>> {
        if request.url.trim().is_empty() {
            return Err(Error::InvalidArgument("url must be a non-empty string".to_string()));
        }
        if !probe::validate(&request.url) {
            return Err(Error::BadUrl(format!(
                "'{}' is not an absolute http(s) URL",
                request.url
            )));
        }
        if let Some(name) = &request.file_name
            && name.trim().is_empty()
        {
            return Err(Error::InvalidArgument(
                "filename must be a non-empty string when given".to_string(),
            ));
        }

        let metadata =
            probe::fetch_metadata(&self.client, &request.url, &self.config.user_agent).await?;
        if !metadata.accept_range {
            return Err(Error::BadUrl(format!(
                "'{}' does not accept byte-range requests",
                request.url
            )));
        }
        if metadata.size == 0 {
            return Err(Error::BadMetadata(format!(
                "'{}' reports no content length; cannot plan ranges",
                request.url
            )));
        }

        tokio::fs::create_dir_all(&request.dir_path).await?;

        let name = match request.file_name {
            Some(name) => name,
            None => metadata.file_name,
        };

        let destination = request.dir_path.join(&name);
        if tokio::fs::try_exists(&destination).await? {
            return Err(Error::InvalidArgument(format!(
                "destination '{}' already exists",
                destination.display()
            )));
        }

        {
            let downloads = self.downloads.lock().await;
            if downloads.iter().any(|d| d.name() == name) {
                return Err(Error::InvalidArgument(format!(
                    "a download named '{name}' is already tracked"
                )));
            }
        }

        let work_dir = self.temp_dir.join(base_name_without_extension(&name));
        let plan = Plan {
            url: request.url,
            name: name.clone(),
            size: metadata.size,
            destination,
            work_dir: work_dir.clone(),
            content_type: metadata.content_type,
            parts: partition_ranges(&name, &work_dir, metadata.size, self.config.connections),
            speed_bps: self.speed_bps.load(Ordering::Relaxed),
            finished: false,
            resumed: false,
        };
        manifest::write(&work_dir, &plan).await?;

        let download = Download::from_plan(
            plan,
            self.event_tx.clone(),
            self.client.clone(),
            self.config.user_agent.clone(),
        );
        self.downloads.lock().await.push(Arc::clone(&download));

        tracing::info!(name = %name, url = %download.url(), size = download.size(), "Download planned");
        self.emit(Event::DownloadAdded {
            name,
            resumed: false,
        });
        Ok(download)
    }

    /// First tracked download whose name matches `file_name` OR whose URL
    /// matches `url`. `None` when nothing matches (or the query is empty).
    pub async fn get_download(&self, query: GetDownloadQuery) -> Option<Arc<Download>> {
        let downloads = self.downloads.lock().await;
        downloads
            .iter()
            .find(|d| {
                query.file_name.as_deref() == Some(d.name())
                    || query.url.as_deref() == Some(d.url())
            })
            .cloned()
    }

    /// Update the global bandwidth ceiling (in Mbps) and propagate it to
    /// every tracked download.
    pub async fn set_speed(&self, mbps: f64) -> Result<()> {
        if !(mbps > 0.0) {
            return Err(Error::InvalidArgument(
                "speed must be a positive number of Mbps".to_string(),
            ));
        }
        let bps = (mbps * MBPS_TO_BPS) as u64;
        self.speed_bps.store(bps, Ordering::Relaxed);

        let downloads = self.downloads.lock().await;
        for download in downloads.iter() {
            download.set_speed(bps);
        }
        tracing::info!(speed_bps = bps, "Global speed limit changed");
        Ok(())
    }

    /// Stop (if running) and untrack a download, deleting its work
    /// directory. The composed artifact, if any, is left alone.
    pub async fn remove(&self, name: &str) -> Result<()> {
        let download = {
            let mut downloads = self.downloads.lock().await;
            let index = downloads
                .iter()
                .position(|d| d.name() == name)
                .ok_or_else(|| {
                    Error::InvalidArgument(format!("no tracked download named '{name}'"))
                })?;
            downloads.remove(index)
        };

        download.stop().await;
        if let Err(e) = tokio::fs::remove_dir_all(download.work_dir()).await
            && download.work_dir().exists()
        {
            tracing::warn!(name = %name, error = %e, "Could not remove work directory");
        }

        tracing::info!(name = %name, "Download removed");
        self.emit(Event::DownloadRemoved {
            name: name.to_string(),
        });
        Ok(())
    }

    /// Stop every tracked download and wait for each to drain its log.
    ///
    /// Manifests and part files stay on disk, so a later `Manager::new`
    /// over the same temp dir rehydrates everything that was in flight.
    pub async fn shutdown(&self) {
        let downloads = self.downloads.lock().await.clone();
        tracing::info!(count = downloads.len(), "Shutting down, stopping all downloads");
        join_all(downloads.iter().map(|d| d.stop())).await;
        tracing::info!("Shutdown complete");
    }

    fn emit(&self, event: Event) {
        // send() errs when nobody subscribes, which is fine
        self.event_tx.send(event).ok();
    }

    /// Rehydrate unfinished manifests; garbage-collect finished and
    /// invalid ones.
    async fn scan_temp_dir(&self) -> Result<()> {
        let mut entries = tokio::fs::read_dir(&self.temp_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let is_dir = entry
                .file_type()
                .await
                .map(|t| t.is_dir())
                .unwrap_or(false);
            if !is_dir || !path.join(MANIFEST_FILE).exists() {
                continue;
            }

            match manifest::read(&path).await {
                Ok(plan) if plan.finished => {
                    tracing::info!(work_dir = %path.display(), "Collecting finished work directory");
                    let _ = tokio::fs::remove_dir_all(&path).await;
                }
                Ok(mut plan) => {
                    plan.resumed = true;
                    let name = plan.name.clone();
                    tracing::info!(name = %name, work_dir = %path.display(), "Rehydrating download");
                    let download = Download::from_plan(
                        plan,
                        self.event_tx.clone(),
                        self.client.clone(),
                        self.config.user_agent.clone(),
                    );
                    self.downloads.lock().await.push(download);
                    self.emit(Event::DownloadAdded {
                        name,
                        resumed: true,
                    });
                }
                Err(e) => {
                    tracing::warn!(work_dir = %path.display(), error = %e, "Collecting work directory with invalid manifest");
                    let _ = tokio::fs::remove_dir_all(&path).await;
                }
            }
        }
        Ok(())
    }
}
