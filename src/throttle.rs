//! Byte-rate throttling using a token bucket
//!
//! Each range worker owns one [`Throttle`] interposed between its HTTP
//! response stream and its part file. The bucket capacity always equals the
//! refill rate, so at most one second of traffic can burst after an idle
//! period.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Token-bucket rate limiter for a single byte stream.
///
/// # Algorithm
///
/// - Tokens represent bytes that may pass through now
/// - Tokens refill continuously at `rate_bps`, capped at `rate_bps`
///   (bucket capacity == refill rate)
/// - `acquire(n)` consumes `n` tokens, suspending until enough accumulate
///
/// # Implementation
///
/// Lock-free `AtomicU64` state so `set_rate` from a signal delivery never
/// contends with an in-flight `acquire`. A rate of 0 is not valid; callers
/// clamp their per-worker share with `.max(1)`.
#[derive(Clone)]
pub struct Throttle {
    /// Target rate in bytes per second (also the bucket capacity)
    rate_bps: Arc<AtomicU64>,
    /// Available tokens (bytes admissible right now)
    tokens: Arc<AtomicU64>,
    /// Last refill timestamp (nanoseconds since an arbitrary process epoch)
    last_refill: Arc<AtomicU64>,
}

impl Throttle {
    /// Create a throttle targeting `rate_bps` bytes per second.
    ///
    /// The bucket starts full, so the first second of traffic is admitted
    /// immediately. A rate of 0 is clamped to 1.
    #[must_use]
    pub fn new(rate_bps: u64) -> Self {
        let rate = rate_bps.max(1);
        Self {
            rate_bps: Arc::new(AtomicU64::new(rate)),
            tokens: Arc::new(AtomicU64::new(rate)),
            last_refill: Arc::new(AtomicU64::new(Self::now_nanos())),
        }
    }

    /// Replace both the refill rate and the bucket capacity.
    ///
    /// Stored tokens are capped at the new capacity; bytes already admitted
    /// are never revoked. Takes effect on the next `acquire` iteration
    /// (within ~100 ms for a waiting reader).
    pub fn set_rate(&self, rate_bps: u64) {
        let rate = rate_bps.max(1);
        self.rate_bps.store(rate, Ordering::SeqCst);
        // Cap the bucket at the new capacity so a rate decrease does not
        // let a full old-capacity bucket burst through
        let _ = self
            .tokens
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |tokens| {
                (tokens > rate).then_some(rate)
            });
    }

    /// Current target rate in bytes per second.
    pub fn rate(&self) -> u64 {
        self.rate_bps.load(Ordering::Relaxed)
    }

    /// Acquire permission to pass `bytes` downstream.
    ///
    /// Suspends until sufficient tokens accumulate. Partial consumption is
    /// allowed internally, so a request larger than the bucket capacity
    /// drains the bucket across several refill cycles instead of stalling
    /// forever.
    pub async fn acquire(&self, bytes: u64) {
        if bytes == 0 {
            return;
        }

        let mut remaining = bytes;

        loop {
            self.refill_tokens();

            let current_tokens = self.tokens.load(Ordering::SeqCst);
            let to_consume = remaining.min(current_tokens);

            if to_consume > 0 {
                if self
                    .tokens
                    .compare_exchange(
                        current_tokens,
                        current_tokens - to_consume,
                        Ordering::SeqCst,
                        Ordering::SeqCst,
                    )
                    .is_ok()
                {
                    remaining -= to_consume;
                    if remaining == 0 {
                        return;
                    }
                }
                // CAS lost or bytes remain: retry immediately
                continue;
            }

            // Empty bucket. Sleep roughly until enough tokens exist, capped
            // at 100 ms so rate changes delivered mid-wait take effect soon.
            let rate = self.rate_bps.load(Ordering::Relaxed);
            let wait_ms = (remaining as f64 / rate as f64 * 1000.0) as u64;
            tokio::time::sleep(Duration::from_millis(wait_ms.clamp(10, 100))).await;
        }
    }

    /// Refill tokens for the time elapsed since the last refill, capped at
    /// the bucket capacity.
    fn refill_tokens(&self) {
        let rate = self.rate_bps.load(Ordering::Relaxed);
        let now = Self::now_nanos();
        let last = self.last_refill.load(Ordering::SeqCst);

        let elapsed_secs = now.saturating_sub(last) as f64 / 1_000_000_000.0;
        let tokens_to_add = (rate as f64 * elapsed_secs) as u64;

        if tokens_to_add > 0
            && self
                .last_refill
                .compare_exchange(last, now, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
        {
            let current = self.tokens.load(Ordering::SeqCst);
            self.tokens
                .store((current + tokens_to_add).min(rate), Ordering::SeqCst);
        }
    }

    /// Monotonic nanoseconds since an arbitrary per-process epoch.
    fn now_nanos() -> u64 {
        static START: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();
        let start = START.get_or_init(Instant::now);
        start.elapsed().as_nanos() as u64
    }
}
