//! Token-bucket rate limiter shared by every outbound request.

use std::future::Future;
use std::time::Duration;

use councilwatch_shared::{CouncilWatchError, Result};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Steady-rate limiter with a small burst allowance.
///
/// One instance is created per run and passed to every component that talks
/// to the network; each request takes one token.
pub struct RateLimiter {
    per_second: f64,
    burst: f64,
    bucket: Mutex<Bucket>,
}

struct Bucket {
    tokens: f64,
    refilled_at: Instant,
}

impl RateLimiter {
    /// A limiter that starts with a full bucket of `burst` tokens.
    pub fn new(per_second: f64, burst: u32) -> Self {
        let burst = f64::from(burst.max(1));
        Self {
            per_second: per_second.max(f64::MIN_POSITIVE),
            burst,
            bucket: Mutex::new(Bucket {
                tokens: burst,
                refilled_at: Instant::now(),
            }),
        }
    }

    /// Wait for a token, or fail with [`CouncilWatchError::Cancelled`] once
    /// `cancel` fires.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<()> {
        loop {
            if cancel.is_cancelled() {
                return Err(CouncilWatchError::Cancelled);
            }

            let wait = {
                let mut bucket = self.bucket.lock().await;
                let now = Instant::now();
                let elapsed = now.duration_since(bucket.refilled_at).as_secs_f64();
                bucket.tokens = (bucket.tokens + elapsed * self.per_second).min(self.burst);
                bucket.refilled_at = now;

                if bucket.tokens >= 1.0 {
                    bucket.tokens -= 1.0;
                    return Ok(());
                }
                Duration::try_from_secs_f64((1.0 - bucket.tokens) / self.per_second)
                    .unwrap_or(Duration::MAX)
            };

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(CouncilWatchError::Cancelled),
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }
}

/// Race `fut` against the run's cancellation token.
pub(crate) async fn cancellable<T>(
    cancel: &CancellationToken,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(CouncilWatchError::Cancelled),
        result = fut => result,
    }
}
