use core::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Unified error type for the agora workspace.
///
/// Variants are grouped into the semantic categories returned by
/// [`AgoraError::category`]. Foreign errors are flattened into their message so
/// the enum stays cheap to clone and can cross serialization boundaries.
#[derive(Debug, Error, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum AgoraError {
    /// Malformed or contradictory configuration.
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    /// Invalid input argument supplied by the caller.
    #[error("invalid argument: {0}")]
    InvalidArg(String),

    /// The named subsystem is not part of the closed subsystem set.
    #[error("unknown subsystem: {0}")]
    UnknownSubsystem(String),

    /// No venue adapter is loaded (or enabled) under this name.
    #[error("unknown venue: {0}")]
    UnknownVenue(String),

    /// The instrument is not carried by the venue or the store.
    #[error("unknown instrument: {0}")]
    UnknownInstrument(String),

    /// A resource could not be found.
    #[error("not found: {what}")]
    NotFound {
        /// Description of the missing resource, e.g. "order 42 on kraken".
        what: String,
    },

    /// A venue with a case-insensitively equal name is already loaded.
    #[error("venue already loaded: {0}")]
    DuplicateVenue(String),

    /// `start()` was called on a subsystem that is not stopped.
    #[error("{subsystem} already started")]
    AlreadyStarted {
        /// Subsystem name.
        subsystem: String,
    },

    /// `stop()` was called on a subsystem that is not running.
    #[error("{subsystem} not started")]
    NotStarted {
        /// Subsystem name.
        subsystem: String,
    },

    /// Subsystem initialisation failed; the subsystem is back in `stopped`.
    #[error("{subsystem} failed to start: {reason}")]
    StartFailed {
        /// Subsystem name.
        subsystem: String,
        /// Message of the underlying error.
        reason: String,
    },

    /// Subsystem cleanup failed; the subsystem is nevertheless `stopped`.
    #[error("{subsystem} failed to stop: {reason}")]
    StopFailed {
        /// Subsystem name.
        subsystem: String,
        /// Message of the underlying error.
        reason: String,
    },

    /// The order was rejected by local policy before reaching the venue.
    #[error("policy violation: {0}")]
    PolicyViolation(String),

    /// The requested capability is not advertised by the venue.
    #[error("unsupported capability: {capability}")]
    Unsupported {
        /// Capability label, e.g. "submit-order".
        capability: String,
    },

    /// Network timeout, 5xx or websocket disconnect; safe to retry.
    #[error("{venue} transient failure: {msg}")]
    Transient {
        /// Venue (or probe target) that failed.
        venue: String,
        /// Human-readable message from the venue.
        msg: String,
    },

    /// 4xx, authentication failure, unknown order id; never retried.
    #[error("{venue} rejected request: {msg}")]
    Permanent {
        /// Venue that rejected the request.
        venue: String,
        /// Human-readable message from the venue.
        msg: String,
    },

    /// A bounded call exceeded its deadline.
    #[error("timed out: {what}")]
    Timeout {
        /// What timed out, e.g. "script ticker.gct".
        what: String,
    },

    /// A bounded resource (VM pool, dispatch queue) is full or closed.
    #[error("capacity exhausted: {0}")]
    CapacityExhausted(String),

    /// Orderbook invariant violation or merge inconsistency.
    #[error("integrity violation: {0}")]
    Integrity(String),

    /// The dispatcher is not running.
    #[error("dispatcher not running")]
    DispatcherNotRunning,

    /// Script validation rejected one or more files.
    #[error("script validation failed: {offenders:?}")]
    ScriptValidation {
        /// File names that failed validation.
        offenders: Vec<String>,
    },

    /// Filesystem failure.
    #[error("io error: {0}")]
    Io(String),

    /// Database driver failure.
    #[error("database error: {0}")]
    Database(String),

    /// Internal invariant broken.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Semantic error category used for retry and propagation decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCategory {
    /// Malformed or contradictory configuration.
    ConfigInvalid,
    /// Lookup miss (subsystem, venue, instrument, resource).
    Lookup,
    /// Lifecycle contract violation or start/stop failure.
    Lifecycle,
    /// Rejected by local policy or invalid input.
    Policy,
    /// Retryable failure.
    Transient,
    /// Non-retryable failure reported by the venue.
    Permanent,
    /// A bounded resource is exhausted.
    CapacityExhausted,
    /// Local state was found inconsistent.
    Integrity,
    /// The process is in a state it cannot serve the request from.
    FatalInternal,
}

impl ErrorCategory {
    /// Stable, kebab-case identifier for logs and status codes.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ConfigInvalid => "config-invalid",
            Self::Lookup => "lookup",
            Self::Lifecycle => "lifecycle",
            Self::Policy => "policy-violation",
            Self::Transient => "transient",
            Self::Permanent => "permanent",
            Self::CapacityExhausted => "capacity-exhausted",
            Self::Integrity => "integrity",
            Self::FatalInternal => "fatal-internal",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl AgoraError {
    /// Helper: build an `Unsupported` error for a capability label.
    #[must_use]
    pub fn unsupported(cap: impl Into<String>) -> Self {
        Self::Unsupported {
            capability: cap.into(),
        }
    }

    /// Helper: build a `NotFound` error.
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }

    /// Helper: build an `UnknownVenue` error.
    pub fn unknown_venue(name: impl Into<String>) -> Self {
        Self::UnknownVenue(name.into())
    }

    /// Helper: build a `Transient` error tagged with the venue name.
    pub fn transient(venue: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Transient {
            venue: venue.into(),
            msg: msg.into(),
        }
    }

    /// Helper: build a `Permanent` error tagged with the venue name.
    pub fn permanent(venue: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Permanent {
            venue: venue.into(),
            msg: msg.into(),
        }
    }

    /// Helper: build a `Timeout` error.
    pub fn timeout(what: impl Into<String>) -> Self {
        Self::Timeout { what: what.into() }
    }

    /// Helper: build an `AlreadyStarted` error.
    pub fn already_started(subsystem: impl Into<String>) -> Self {
        Self::AlreadyStarted {
            subsystem: subsystem.into(),
        }
    }

    /// Helper: build a `NotStarted` error.
    pub fn not_started(subsystem: impl Into<String>) -> Self {
        Self::NotStarted {
            subsystem: subsystem.into(),
        }
    }

    /// Helper: wrap an initialisation error as `StartFailed`.
    ///
    /// Lifecycle errors pass through unchanged so callers still see
    /// `already-started` / `not-started` verbatim.
    pub fn start_failed(subsystem: impl Into<String>, source: &Self) -> Self {
        match source {
            Self::AlreadyStarted { .. } | Self::NotStarted { .. } | Self::StartFailed { .. } => {
                source.clone()
            }
            other => Self::StartFailed {
                subsystem: subsystem.into(),
                reason: other.to_string(),
            },
        }
    }

    /// Helper: wrap a cleanup error as `StopFailed`.
    pub fn stop_failed(subsystem: impl Into<String>, source: &Self) -> Self {
        match source {
            Self::AlreadyStarted { .. } | Self::NotStarted { .. } | Self::StopFailed { .. } => {
                source.clone()
            }
            other => Self::StopFailed {
                subsystem: subsystem.into(),
                reason: other.to_string(),
            },
        }
    }

    /// Map this error to its semantic category.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::ConfigInvalid(_) => ErrorCategory::ConfigInvalid,
            Self::UnknownSubsystem(_)
            | Self::UnknownVenue(_)
            | Self::UnknownInstrument(_)
            | Self::NotFound { .. }
            | Self::Unsupported { .. } => ErrorCategory::Lookup,
            Self::AlreadyStarted { .. }
            | Self::NotStarted { .. }
            | Self::StartFailed { .. }
            | Self::StopFailed { .. } => ErrorCategory::Lifecycle,
            Self::PolicyViolation(_)
            | Self::InvalidArg(_)
            | Self::DuplicateVenue(_)
            | Self::ScriptValidation { .. } => ErrorCategory::Policy,
            Self::Transient { .. } | Self::Timeout { .. } => ErrorCategory::Transient,
            Self::Permanent { .. } | Self::Io(_) | Self::Database(_) => ErrorCategory::Permanent,
            Self::CapacityExhausted(_) => ErrorCategory::CapacityExhausted,
            Self::Integrity(_) => ErrorCategory::Integrity,
            Self::DispatcherNotRunning | Self::Internal(_) => ErrorCategory::FatalInternal,
        }
    }

    /// Returns true if a component may retry the failed call under its budget.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self.category(), ErrorCategory::Transient)
    }

    /// Status code reported on the subsystem control surface.
    #[must_use]
    pub const fn status_code(&self) -> &'static str {
        match self {
            Self::UnknownSubsystem(_) => "unknown-subsystem",
            Self::AlreadyStarted { .. } => "already-started",
            Self::NotStarted { .. } => "not-started",
            Self::StartFailed { .. } => "start-failed",
            Self::StopFailed { .. } => "stop-failed",
            other => other.category().as_str(),
        }
    }
}

impl From<std::io::Error> for AgoraError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}
