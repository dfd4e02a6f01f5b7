//! Uniform start/stop protocol for long-running services.

mod lifecycle;
mod worker;

use std::sync::Mutex;

use async_trait::async_trait;

use agora_core::sync::lock;
use agora_core::{AgoraError, SubsystemName, SubsystemStatus};

pub use lifecycle::Lifecycle;
pub use worker::PeriodicWorker;

/// A service controlled through the four-state lifecycle.
#[async_trait]
pub trait Subsystem: Send + Sync {
    /// Control-surface name.
    fn name(&self) -> SubsystemName {
        self.lifecycle().name()
    }

    /// Lifecycle backing `start`/`stop`.
    fn lifecycle(&self) -> &Lifecycle;

    /// `stopped -> running`; `already-started` unless stopped.
    async fn start(&self) -> Result<(), AgoraError>;

    /// `running -> stopped`; `not-started` unless running.
    async fn stop(&self) -> Result<(), AgoraError>;

    /// Status snapshot.
    fn status(&self) -> SubsystemStatus {
        self.lifecycle().status()
    }

    /// True while running.
    fn is_running(&self) -> bool {
        self.lifecycle().is_running()
    }
}

/// Holder for a subsystem's worker between `start` and `stop`.
#[derive(Default)]
pub(crate) struct WorkerSlot(Mutex<Option<PeriodicWorker>>);

impl WorkerSlot {
    pub(crate) fn put(&self, worker: PeriodicWorker) {
        // A worker that exited on a fatal error may still be parked here.
        let _ = lock(&self.0).replace(worker);
    }

    pub(crate) async fn stop(&self) {
        let worker = lock(&self.0).take();
        if let Some(w) = worker {
            w.stop().await;
        }
    }

    pub(crate) fn is_live(&self) -> bool {
        lock(&self.0).as_ref().is_some_and(|w| !w.is_finished())
    }
}
