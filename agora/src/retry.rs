//! Retry schedules for adapter calls and stream reconnects.

use std::future::Future;
use std::time::Duration;

use agora_core::{AgoraError, BackoffConfig};
use rand::Rng;

/// Exponential schedule: `initial`, doubling, capped at `cap`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetrySchedule {
    /// Delay before the first retry.
    pub initial: Duration,
    /// Upper bound on any single delay.
    pub cap: Duration,
}

impl RetrySchedule {
    /// Order-manager schedule: 250 ms doubling up to 5 s.
    pub const ORDERS: Self = Self {
        initial: Duration::from_millis(250),
        cap: Duration::from_secs(5),
    };

    /// Delay before retry number `retry` (0-based).
    #[must_use]
    pub fn delay(&self, retry: u32) -> Duration {
        let factor = 1u32.checked_shl(retry).unwrap_or(u32::MAX);
        self.initial.saturating_mul(factor).min(self.cap)
    }
}

/// Run `op` once plus up to `budget` retries on retryable errors.
///
/// Non-retryable errors return immediately; when the budget is spent the last
/// error is returned.
#[cfg_attr(not(feature = "tracing"), allow(unused_variables))]
pub async fn with_retry<T, F, Fut>(
    what: &str,
    budget: u32,
    schedule: RetrySchedule,
    mut op: F,
) -> Result<T, AgoraError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, AgoraError>>,
{
    let mut retry = 0u32;
    loop {
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) if e.is_retryable() && retry < budget => {
                let delay = schedule.delay(retry);
                #[cfg(feature = "tracing")]
                tracing::debug!(op = what, attempt = retry + 1, delay_ms = delay.as_millis() as u64, error = %e, "retrying");
                tokio::time::sleep(delay).await;
                retry += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Reconnect delays for one stream session.
///
/// Starts at `min_backoff_ms`, grows by `factor` after every wait up to
/// `max_backoff_ms`, and adds up to `jitter_percent` of random spread on top.
#[derive(Debug, Clone)]
pub struct ReconnectBackoff {
    cfg: BackoffConfig,
    current_ms: u64,
}

impl ReconnectBackoff {
    /// Schedule at its minimum delay.
    #[must_use]
    pub fn new(cfg: BackoffConfig) -> Self {
        let current_ms = cfg.min_backoff_ms;
        Self { cfg, current_ms }
    }

    /// Back to the minimum after a session opened.
    pub fn reset(&mut self) {
        self.current_ms = self.cfg.min_backoff_ms;
    }

    /// Unjittered delay the next wait is based on.
    #[must_use]
    pub fn current(&self) -> Duration {
        Duration::from_millis(self.current_ms)
    }

    /// Delay to wait now; the base of the following one grows.
    pub fn next_wait(&mut self) -> Duration {
        let base = self.current_ms;
        let spread = base.saturating_mul(u64::from(self.cfg.jitter_percent.min(100))) / 100;
        let extra = if spread == 0 {
            0
        } else {
            rand::rng().random_range(0..spread)
        };
        self.current_ms = base
            .max(self.cfg.min_backoff_ms)
            .saturating_mul(u64::from(self.cfg.factor.max(1)))
            .min(self.cfg.max_backoff_ms);
        Duration::from_millis(base.saturating_add(extra))
    }
}
