use std::future::Future;
use std::sync::atomic::{AtomicI64, AtomicU8, AtomicU64, Ordering};

use agora_core::{AgoraError, DateTime, SubsystemName, SubsystemState, SubsystemStatus, Utc};

/// Four-state lifecycle shared by every subsystem.
///
/// All transitions are compare-and-swap on a single state byte, so two
/// concurrent `start` callers see exactly one success and one
/// `already-started`.
#[derive(Debug)]
pub struct Lifecycle {
    name: SubsystemName,
    state: AtomicU8,
    // Milliseconds since the epoch; 0 while not running.
    started_at: AtomicI64,
    starts: AtomicU64,
    stops: AtomicU64,
}

impl Lifecycle {
    /// A stopped lifecycle for `name`.
    #[must_use]
    pub const fn new(name: SubsystemName) -> Self {
        Self {
            name,
            state: AtomicU8::new(SubsystemState::Stopped.as_u8()),
            started_at: AtomicI64::new(0),
            starts: AtomicU64::new(0),
            stops: AtomicU64::new(0),
        }
    }

    /// Subsystem name.
    #[must_use]
    pub const fn name(&self) -> SubsystemName {
        self.name
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> SubsystemState {
        SubsystemState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// True while `Running`.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state() == SubsystemState::Running
    }

    /// Fail with `not-started` unless running.
    pub fn ensure_running(&self) -> Result<(), AgoraError> {
        if self.is_running() {
            Ok(())
        } else {
            Err(AgoraError::not_started(self.name.as_str()))
        }
    }

    fn cas(&self, from: SubsystemState, to: SubsystemState) -> bool {
        self.state
            .compare_exchange(from.as_u8(), to.as_u8(), Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// `stopped -> starting`.
    pub fn begin_start(&self) -> Result<(), AgoraError> {
        if self.cas(SubsystemState::Stopped, SubsystemState::Starting) {
            Ok(())
        } else {
            Err(AgoraError::already_started(self.name.as_str()))
        }
    }

    /// `starting -> running`.
    pub fn finish_start(&self) {
        self.started_at
            .store(Utc::now().timestamp_millis(), Ordering::Release);
        self.starts.fetch_add(1, Ordering::AcqRel);
        self.state
            .store(SubsystemState::Running.as_u8(), Ordering::Release);
    }

    /// `starting -> stopped` after a failed initialisation.
    pub fn abort_start(&self) {
        self.state
            .store(SubsystemState::Stopped.as_u8(), Ordering::Release);
    }

    /// `running -> stopping`.
    pub fn begin_stop(&self) -> Result<(), AgoraError> {
        if self.cas(SubsystemState::Running, SubsystemState::Stopping) {
            Ok(())
        } else {
            Err(AgoraError::not_started(self.name.as_str()))
        }
    }

    /// `stopping -> stopped`.
    pub fn finish_stop(&self) {
        self.started_at.store(0, Ordering::Release);
        self.stops.fetch_add(1, Ordering::AcqRel);
        self.state
            .store(SubsystemState::Stopped.as_u8(), Ordering::Release);
    }

    /// `running -> stopped` without a caller, after a fatal internal error.
    ///
    /// Returns false if the subsystem was not running.
    pub fn fail(&self) -> bool {
        if self.cas(SubsystemState::Running, SubsystemState::Stopped) {
            self.started_at.store(0, Ordering::Release);
            self.stops.fetch_add(1, Ordering::AcqRel);
            true
        } else {
            false
        }
    }

    /// Run `init` between `begin_start` and `finish_start`.
    ///
    /// On failure the state returns to `stopped` and the error is reported as
    /// `start-failed`.
    pub async fn start_with<T, F>(&self, init: F) -> Result<T, AgoraError>
    where
        F: Future<Output = Result<T, AgoraError>>,
    {
        self.begin_start()?;
        match init.await {
            Ok(v) => {
                self.finish_start();
                #[cfg(feature = "tracing")]
                tracing::info!(subsystem = %self.name, "started");
                Ok(v)
            }
            Err(e) => {
                self.abort_start();
                #[cfg(feature = "tracing")]
                tracing::warn!(subsystem = %self.name, error = %e, "start failed");
                Err(AgoraError::start_failed(self.name.as_str(), &e))
            }
        }
    }

    /// Run `cleanup` between `begin_stop` and `finish_stop`.
    ///
    /// The subsystem ends up `stopped` even when cleanup reports an error.
    pub async fn stop_with<T, F>(&self, cleanup: F) -> Result<T, AgoraError>
    where
        F: Future<Output = Result<T, AgoraError>>,
    {
        self.begin_stop()?;
        let out = cleanup.await;
        self.finish_stop();
        #[cfg(feature = "tracing")]
        tracing::info!(subsystem = %self.name, "stopped");
        out.map_err(|e| AgoraError::stop_failed(self.name.as_str(), &e))
    }

    /// Status snapshot.
    #[must_use]
    pub fn status(&self) -> SubsystemStatus {
        let ms = self.started_at.load(Ordering::Acquire);
        SubsystemStatus {
            name: self.name,
            state: self.state(),
            started_at: (ms != 0)
                .then(|| DateTime::<Utc>::from_timestamp_millis(ms))
                .flatten(),
            starts: self.starts.load(Ordering::Acquire),
            stops: self.stops.load(Ordering::Acquire),
        }
    }
}
