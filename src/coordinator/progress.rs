//! Periodic progress sampling
//!
//! Every 500 ms the sampler reads the workers' counters and publishes one
//! [`Event::Progress`]. Speed is measured over the sampling window itself
//! (bytes gained since the previous tick), so it reacts to throttle
//! changes within a tick instead of averaging over the whole session.

use crate::types::Event;
use crate::utils::format_rate;
use crate::worker::WorkerProgress;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Interval between progress samples.
const SAMPLE_INTERVAL: Duration = Duration::from_millis(500);

/// Inputs for one sampler task.
pub(super) struct SamplerParams {
    pub name: String,
    pub size: u64,
    pub workers: Vec<Arc<WorkerProgress>>,
    pub event_tx: tokio::sync::broadcast::Sender<Event>,
    pub cancel: CancellationToken,
}

/// Spawn the sampler; it runs until `cancel` fires.
pub(super) fn spawn_sampler(params: SamplerParams) -> JoinHandle<()> {
    let SamplerParams {
        name,
        size,
        workers,
        event_tx,
        cancel,
    } = params;

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(SAMPLE_INTERVAL);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        // The first tick fires immediately and only establishes the
        // baseline a delta can be measured against
        interval.tick().await;
        let mut previous_totals: Vec<u64> =
            workers.iter().map(|w| w.total_downloaded()).collect();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    let mut window_bytes = 0u64;
                    for (prev, worker) in previous_totals.iter_mut().zip(&workers) {
                        let total = worker.total_downloaded();
                        window_bytes += total.saturating_sub(*prev);
                        *prev = total;
                    }
                    let speed_bps =
                        (window_bytes as f64 / SAMPLE_INTERVAL.as_secs_f64()) as u64;

                    let unfinished: Vec<_> =
                        workers.iter().filter(|w| !w.is_finished()).collect();
                    let percent = if unfinished.is_empty() {
                        100
                    } else {
                        let mean = unfinished.iter().map(|w| w.percent()).sum::<f64>()
                            / unfinished.len() as f64;
                        mean.round().clamp(0.0, 100.0) as u8
                    };

                    let total_downloaded: u64 =
                        workers.iter().map(|w| w.total_downloaded()).sum();
                    let eta_ms = if total_downloaded >= size {
                        Some(0)
                    } else if speed_bps == 0 {
                        None
                    } else {
                        let remaining = size - total_downloaded;
                        Some((remaining as f64 / speed_bps as f64 * 1000.0).round() as u64)
                    };

                    event_tx
                        .send(Event::Progress {
                            name: name.clone(),
                            speed: format_rate(speed_bps),
                            percent,
                            eta_ms,
                        })
                        .ok();
                }
            }
        }
    })
}
