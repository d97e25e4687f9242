//! Configuration types for prometeo-dl

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Megabits-per-second to bytes-per-second conversion factor.
pub const MBPS_TO_BPS: f64 = 125_000.0;

/// Default number of concurrent range connections per download.
fn default_connections() -> usize {
    4
}

/// Default aggregate bandwidth ceiling, in Mbps.
fn default_speed_limit_mbps() -> f64 {
    10.0
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit".to_string()
}

/// Main configuration for [`Manager`](crate::Manager)
///
/// Every field has a working default; `ManagerConfig::default()` is a valid
/// configuration. Validation happens in [`Manager::new`](crate::Manager::new)
/// so a deserialized config is checked at the same choke point as a
/// hand-built one.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ManagerConfig {
    /// Number of range connections (workers) per download (default: 4, must be ≥ 1)
    #[serde(default = "default_connections")]
    pub connections: usize,

    /// Root directory for per-download work directories.
    ///
    /// `None` resolves to the platform user-data dir joined with `"Prometeo"`.
    /// Created if absent.
    #[serde(default)]
    pub temp_dir: Option<PathBuf>,

    /// User-Agent header sent on every probe and range request (must be non-empty)
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Aggregate bandwidth ceiling in Mbps (default: 10, must be > 0).
    ///
    /// Converted to bytes/second as `mbps * 125_000`.
    #[serde(default = "default_speed_limit_mbps")]
    pub speed_limit_mbps: f64,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            connections: default_connections(),
            temp_dir: None,
            user_agent: default_user_agent(),
            speed_limit_mbps: default_speed_limit_mbps(),
        }
    }
}

impl ManagerConfig {
    /// Validate field constraints and resolve the temp directory.
    ///
    /// Returns the resolved temp dir on success. Does not touch the
    /// filesystem; directory creation happens in `Manager::new`.
    pub(crate) fn validate(&self) -> Result<PathBuf> {
        if self.connections == 0 {
            return Err(Error::InvalidArgument(
                "connections must be greater than 0".to_string(),
            ));
        }
        if self.user_agent.trim().is_empty() {
            return Err(Error::InvalidArgument(
                "userAgent must be a non-empty string".to_string(),
            ));
        }
        if !(self.speed_limit_mbps > 0.0) {
            return Err(Error::InvalidArgument(
                "speedLimit must be a positive number of Mbps".to_string(),
            ));
        }

        match &self.temp_dir {
            Some(dir) => {
                if !dir.is_absolute() {
                    return Err(Error::InvalidArgument(format!(
                        "tempdir must be an absolute path, got '{}'",
                        dir.display()
                    )));
                }
                Ok(dir.clone())
            }
            None => dirs::data_dir()
                .map(|d| d.join("Prometeo"))
                .ok_or_else(|| {
                    Error::InvalidArgument(
                        "no platform user-data directory available; set tempdir explicitly"
                            .to_string(),
                    )
                }),
        }
    }

    /// The configured ceiling as bytes per second.
    pub fn speed_limit_bps(&self) -> u64 {
        (self.speed_limit_mbps * MBPS_TO_BPS) as u64
    }
}
