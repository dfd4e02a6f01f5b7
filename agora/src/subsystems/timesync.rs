use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU8, Ordering};

use async_trait::async_trait;
use chrono::TimeDelta;

use agora_core::{AgoraError, DriftLevel, SubsystemName, TimeSyncConfig};

use super::sntp;
use crate::supervisor::{Lifecycle, PeriodicWorker, Subsystem, WorkerSlot};

/// Operator answer to the first out-of-window drift at level `prompt-once`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriftChoice {
    /// Keep checking, log warnings.
    Warn,
    /// Keep checking, log errors and raise the drift flag.
    Alert,
    /// Stop checking for the rest of the run.
    Disable,
}

/// Interactive prompt piped in from outside the engine.
#[async_trait]
pub trait DriftPrompt: Send + Sync {
    /// Pick how to handle drift of `offset` from now on.
    async fn choose(&self, offset: TimeDelta) -> DriftChoice;
}

const fn encode(level: DriftLevel) -> u8 {
    match level {
        DriftLevel::Disabled => 0,
        DriftLevel::PromptOnce => 1,
        DriftLevel::Alert => 2,
        DriftLevel::Warn => 3,
    }
}

const fn decode(v: u8) -> DriftLevel {
    match v {
        0 => DriftLevel::Disabled,
        1 => DriftLevel::PromptOnce,
        2 => DriftLevel::Alert,
        _ => DriftLevel::Warn,
    }
}

struct Shared {
    config: TimeSyncConfig,
    prompt: Option<Arc<dyn DriftPrompt>>,
    level: AtomicU8,
    offset_ms: AtomicI64,
    measured: AtomicBool,
    drifting: AtomicBool,
}

impl Shared {
    async fn check(&self) -> Result<(), AgoraError> {
        if decode(self.level.load(Ordering::Acquire)) == DriftLevel::Disabled {
            return Ok(());
        }
        let offset = self.measure().await?;
        self.offset_ms
            .store(offset.num_milliseconds(), Ordering::Release);
        self.measured.store(true, Ordering::Release);

        let too_far_ahead = offset > TimeDelta::from_std(self.config.allowed_positive_drift).unwrap_or(TimeDelta::MAX);
        let too_far_behind = -offset > TimeDelta::from_std(self.config.allowed_negative_drift).unwrap_or(TimeDelta::MAX);
        if !(too_far_ahead || too_far_behind) {
            self.drifting.store(false, Ordering::Release);
            return Ok(());
        }
        self.drifting.store(true, Ordering::Release);

        let mut level = decode(self.level.load(Ordering::Acquire));
        if level == DriftLevel::PromptOnce {
            let choice = match &self.prompt {
                Some(p) => p.choose(offset).await,
                None => DriftChoice::Warn,
            };
            level = match choice {
                DriftChoice::Warn => DriftLevel::Warn,
                DriftChoice::Alert => DriftLevel::Alert,
                DriftChoice::Disable => DriftLevel::Disabled,
            };
            self.level.store(encode(level), Ordering::Release);
        }
        match level {
            DriftLevel::Alert => {
                #[cfg(feature = "tracing")]
                tracing::error!(offset_ms = offset.num_milliseconds(), "system clock drift outside allowed window");
            }
            DriftLevel::Warn => {
                #[cfg(feature = "tracing")]
                tracing::warn!(offset_ms = offset.num_milliseconds(), "system clock drift outside allowed window");
            }
            DriftLevel::Disabled | DriftLevel::PromptOnce => {
                self.drifting.store(false, Ordering::Release);
            }
        }
        Ok(())
    }

    async fn measure(&self) -> Result<TimeDelta, AgoraError> {
        let mut last = None;
        for server in &self.config.servers {
            match sntp::query(server, self.config.request_timeout).await {
                Ok(sample) => return Ok(sample.offset),
                Err(e) => {
                    #[cfg(feature = "tracing")]
                    tracing::debug!(server = %server, error = %e, "time server unreachable");
                    last = Some(e);
                }
            }
        }
        Err(last.unwrap_or_else(|| AgoraError::ConfigInvalid("time_sync.servers is empty".into())))
    }
}

/// `ntp_timekeeper` subsystem.
pub struct TimeKeeper {
    lifecycle: Arc<Lifecycle>,
    shared: Arc<Shared>,
    worker: WorkerSlot,
}

impl TimeKeeper {
    /// Probe with an optional interactive prompt.
    #[must_use]
    pub fn new(config: TimeSyncConfig, prompt: Option<Arc<dyn DriftPrompt>>) -> Self {
        let level = encode(config.level);
        Self {
            lifecycle: Arc::new(Lifecycle::new(SubsystemName::NtpTimekeeper)),
            shared: Arc::new(Shared {
                config,
                prompt,
                level: AtomicU8::new(level),
                offset_ms: AtomicI64::new(0),
                measured: AtomicBool::new(false),
                drifting: AtomicBool::new(false),
            }),
            worker: WorkerSlot::default(),
        }
    }

    /// Offset observed by the last successful check.
    #[must_use]
    pub fn last_offset(&self) -> Option<TimeDelta> {
        self.shared
            .measured
            .load(Ordering::Acquire)
            .then(|| TimeDelta::milliseconds(self.shared.offset_ms.load(Ordering::Acquire)))
    }

    /// Level in force; changes after a prompt.
    #[must_use]
    pub fn effective_level(&self) -> DriftLevel {
        decode(self.shared.level.load(Ordering::Acquire))
    }

    /// True while the last offset was out of window at level warn or alert.
    #[must_use]
    pub fn is_drifting(&self) -> bool {
        self.shared.drifting.load(Ordering::Acquire)
    }

    /// Run one check now.
    pub async fn check_now(&self) -> Result<(), AgoraError> {
        self.shared.check().await
    }

    async fn start_inner(&self) -> Result<(), AgoraError> {
        self.shared.config.validate()?;
        if let Err(_e) = self.shared.check().await {
            #[cfg(feature = "tracing")]
            tracing::warn!(error = %_e, "initial time check failed");
        }
        let shared = Arc::clone(&self.shared);
        self.worker.put(PeriodicWorker::spawn(
            Arc::clone(&self.lifecycle),
            self.shared.config.check_interval,
            move || {
                let shared = Arc::clone(&shared);
                async move { shared.check().await }
            },
        ));
        Ok(())
    }

    /// True while a worker task is alive.
    #[must_use]
    pub fn worker_running(&self) -> bool {
        self.worker.is_live()
    }
}

#[async_trait]
impl Subsystem for TimeKeeper {
    fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    async fn start(&self) -> Result<(), AgoraError> {
        self.lifecycle.start_with(self.start_inner()).await
    }

    async fn stop(&self) -> Result<(), AgoraError> {
        self.lifecycle
            .stop_with(async {
                self.worker.stop().await;
                Ok(())
            })
            .await
    }
}
