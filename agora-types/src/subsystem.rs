//! Subsystem names and lifecycle states.

use core::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::AgoraError;

/// The closed set of supervised subsystems.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubsystemName {
    /// Dispatcher workers.
    Dispatch,
    /// Database keepalive.
    Database,
    /// Connectivity probe.
    InternetMonitor,
    /// Time-sync probe.
    NtpTimekeeper,
    /// Venue market-data syncer.
    ExchangeSyncer,
    /// Order manager.
    Orders,
    /// Portfolio tracker.
    Portfolio,
    /// Event relay to communication sinks.
    Communications,
    /// Script VM pool.
    Gctscript,
}

impl SubsystemName {
    /// Every subsystem in start order.
    pub const ALL: [Self; 9] = [
        Self::Dispatch,
        Self::Database,
        Self::InternetMonitor,
        Self::NtpTimekeeper,
        Self::ExchangeSyncer,
        Self::Orders,
        Self::Portfolio,
        Self::Communications,
        Self::Gctscript,
    ];

    /// Name used on the control surface.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Dispatch => "dispatch",
            Self::Database => "database",
            Self::InternetMonitor => "internet_monitor",
            Self::NtpTimekeeper => "ntp_timekeeper",
            Self::ExchangeSyncer => "exchange_syncer",
            Self::Orders => "orders",
            Self::Portfolio => "portfolio",
            Self::Communications => "communications",
            Self::Gctscript => "gctscript",
        }
    }
}

impl fmt::Display for SubsystemName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubsystemName {
    type Err = AgoraError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|n| n.as_str() == needle)
            .ok_or_else(|| AgoraError::UnknownSubsystem(s.to_string()))
    }
}

/// Lifecycle state of a subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum SubsystemState {
    /// Not running; `start()` allowed.
    Stopped = 0,
    /// `start()` in progress.
    Starting = 1,
    /// Running; `stop()` allowed.
    Running = 2,
    /// `stop()` in progress.
    Stopping = 3,
}

impl SubsystemState {
    /// Decode from the atomic representation. Unknown values read as stopped.
    #[must_use]
    pub const fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Starting,
            2 => Self::Running,
            3 => Self::Stopping,
            _ => Self::Stopped,
        }
    }

    /// Encode for atomic storage.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Stable identifier.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
        }
    }
}

impl fmt::Display for SubsystemState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time view of a subsystem's lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubsystemStatus {
    /// Subsystem name.
    pub name: SubsystemName,
    /// Current state.
    pub state: SubsystemState,
    /// Time of the last successful start while running.
    pub started_at: Option<DateTime<Utc>>,
    /// Number of successful starts.
    pub starts: u64,
    /// Number of completed stops.
    pub stops: u64,
}

impl SubsystemStatus {
    /// True while `Running`.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state == SubsystemState::Running
    }
}
