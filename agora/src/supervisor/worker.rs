use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use agora_core::stream::StreamHandle;
use agora_core::{AgoraError, ErrorCategory};
use tokio::sync::oneshot;
use tokio::time::MissedTickBehavior;

use super::Lifecycle;

/// A single task owning an interval timer and a shutdown channel.
///
/// The first tick fires one `period` after spawning; subsystems run their
/// initial check inside `start` instead. A fatal-internal error from `tick`
/// ends the loop and flips the owning lifecycle to `stopped`.
pub struct PeriodicWorker {
    handle: StreamHandle,
}

impl PeriodicWorker {
    /// Spawn the loop.
    pub fn spawn<F, Fut>(lifecycle: Arc<Lifecycle>, period: Duration, mut tick: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), AgoraError>> + Send + 'static,
    {
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let start = tokio::time::Instant::now() + period;
            let mut interval = tokio::time::interval_at(start, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    _ = &mut stop_rx => break,
                    _ = interval.tick() => {
                        if let Err(e) = tick().await {
                            if e.category() == ErrorCategory::FatalInternal {
                                #[cfg(feature = "tracing")]
                                tracing::error!(subsystem = %lifecycle.name(), error = %e, "worker stopped on fatal error");
                                lifecycle.fail();
                                break;
                            }
                            #[cfg(feature = "tracing")]
                            tracing::debug!(subsystem = %lifecycle.name(), error = %e, "periodic check failed");
                        }
                    }
                }
            }
        });
        Self {
            handle: StreamHandle::new(task, stop_tx),
        }
    }

    /// Signal shutdown and wait for the loop to exit.
    pub async fn stop(self) {
        self.handle.stop().await;
    }

    /// True once the loop has exited.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}
