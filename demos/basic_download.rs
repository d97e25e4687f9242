//! Basic download example
//!
//! This example demonstrates the core functionality of prometeo-dl:
//! - Building a manager with custom settings
//! - Subscribing to events
//! - Planning and starting a parallel range download
//! - Resuming whatever an earlier run left behind

use prometeo_dl::{DownloadRequest, Event, Manager, ManagerConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing for logging (optional)
    // Uncomment if you add tracing-subscriber to your dependencies:
    // tracing_subscriber::fmt::init();

    // Build configuration; every field has a working default
    let config = ManagerConfig {
        connections: 4,
        speed_limit_mbps: 10.0,
        ..Default::default()
    };

    // Creating the manager scans the temp directory and rehydrates any
    // download that was interrupted in a previous run
    let manager = Manager::new(config).await?;

    // Subscribe to events
    let mut events = manager.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                Event::DownloadAdded { name, resumed } => {
                    println!("✓ Added {} (resumed: {})", name, resumed);
                }
                Event::Progress {
                    name,
                    speed,
                    percent,
                    eta_ms,
                } => {
                    let eta = eta_ms
                        .map(|ms| format!("{:.1}s", ms as f64 / 1000.0))
                        .unwrap_or_else(|| "∞".to_string());
                    println!("⬇ {}: {}% @ {} (eta {})", name, percent, speed, eta);
                }
                Event::Finished { name, destination } => {
                    println!("✓ {} finished: {:?}", name, destination);
                }
                Event::Stopped { name } => {
                    println!("■ {} stopped", name);
                }
                _ => {}
            }
        }
    });

    // Finish anything rehydrated from a previous run first
    for download in manager.downloads().await {
        download.start().await?;
    }

    // Plan and run a new download
    let download = manager
        .download(DownloadRequest {
            url: "https://proof.ovh.net/files/100Mb.dat".to_string(),
            dir_path: "downloads".into(),
            file_name: None,
        })
        .await?;

    println!("Planned {} ({} bytes)", download.name(), download.size());
    download.start().await?;

    Ok(())
}
