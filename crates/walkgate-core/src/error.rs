//! Core error types for walkgate-core.
//!
//! This module defines the error hierarchy using thiserror. None of these
//! errors is fatal to the process: the worst outcome of any of them is that
//! the shield does not reflect reality until the next reconciliation.

use std::path::PathBuf;
use thiserror::Error;

use crate::tasks::TaskKind;

/// Core error type for walkgate-core.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Preference store errors
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// An external collaborator call failed
    #[error("Service error: {0}")]
    Service(#[from] ServiceError),

    /// Background task submission was rejected
    #[error("Scheduling error: {0}")]
    Scheduling(#[from] SchedulingError),

    /// Task lifecycle violations
    #[error("Task error: {0}")]
    Task(#[from] TaskError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic errors with context
    #[error("{0}")]
    Custom(String),
}

/// Preference store errors.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Failed to open database connection
    #[error("Failed to open database at {path}: {source}")]
    OpenFailed {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    /// Query execution failed
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Database is locked
    #[error("Database is locked")]
    Locked,

    /// The in-process store lock was poisoned by a panicking writer
    #[error("Store lock poisoned")]
    Poisoned,
}

/// Configuration-specific errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to load configuration
    #[error("Failed to load configuration from {path}: {message}")]
    LoadFailed { path: PathBuf, message: String },

    /// Failed to save configuration
    #[error("Failed to save configuration to {path}: {message}")]
    SaveFailed { path: PathBuf, message: String },

    /// Invalid configuration value
    #[error("Invalid configuration value for '{key}': {message}")]
    InvalidValue { key: String, message: String },

    /// Unknown configuration key
    #[error("Unknown configuration key: {0}")]
    UnknownKey(String),

    /// Failed to parse configuration
    #[error("Failed to parse configuration: {0}")]
    ParseFailed(String),
}

/// Capability a collaborator needs the user to grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    StepObservation,
    ShieldEnforcement,
    Notifications,
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Capability::StepObservation => "step observation",
            Capability::ShieldEnforcement => "shield enforcement",
            Capability::Notifications => "notifications",
        };
        f.write_str(name)
    }
}

/// External collaborator failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServiceError {
    /// The service cannot be reached on this device
    #[error("{service} is unavailable")]
    Unavailable { service: String },

    /// The user declined the capability grant
    #[error("Authorization denied for {capability}")]
    AuthorizationDenied { capability: Capability },

    /// The call reached the service and failed
    #[error("{service} failed: {message}")]
    Failed { service: String, message: String },
}

impl ServiceError {
    pub fn failed(service: impl Into<String>, message: impl Into<String>) -> Self {
        ServiceError::Failed {
            service: service.into(),
            message: message.into(),
        }
    }
}

/// Background submission failures.
///
/// The known host codes map onto dedicated variants. Anything else lands in
/// `Unclassified` so new platform codes stay visible instead of being folded
/// into one of the known kinds.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchedulingError {
    #[error("Background task scheduler is unavailable")]
    Unavailable,

    #[error("Too many pending task requests")]
    TooManyPending,

    #[error("App is not permitted to schedule background tasks")]
    NotPermitted,

    #[error("Unclassified scheduler error {code}: {message}")]
    Unclassified { code: i64, message: String },
}

impl SchedulingError {
    pub const CODE_UNAVAILABLE: i64 = 1;
    pub const CODE_TOO_MANY_PENDING: i64 = 2;
    pub const CODE_NOT_PERMITTED: i64 = 3;

    /// Map a host scheduler error code.
    pub fn from_code(code: i64, message: impl Into<String>) -> Self {
        match code {
            Self::CODE_UNAVAILABLE => SchedulingError::Unavailable,
            Self::CODE_TOO_MANY_PENDING => SchedulingError::TooManyPending,
            Self::CODE_NOT_PERMITTED => SchedulingError::NotPermitted,
            _ => SchedulingError::Unclassified {
                code,
                message: message.into(),
            },
        }
    }

    /// Host code for this error (inverse of `from_code`).
    pub fn code(&self) -> i64 {
        match self {
            SchedulingError::Unavailable => Self::CODE_UNAVAILABLE,
            SchedulingError::TooManyPending => Self::CODE_TOO_MANY_PENDING,
            SchedulingError::NotPermitted => Self::CODE_NOT_PERMITTED,
            SchedulingError::Unclassified { code, .. } => *code,
        }
    }

    /// Whether a later submission can succeed without user action.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, SchedulingError::NotPermitted)
    }
}

/// Task lifecycle violations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TaskError {
    #[error("{0} task is already running")]
    AlreadyRunning(TaskKind),

    #[error("Invalid {kind} transition from {from} to {to}")]
    InvalidTransition {
        kind: TaskKind,
        from: &'static str,
        to: &'static str,
    },
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(e, _msg) => {
                if e.code == rusqlite::ErrorCode::DatabaseBusy
                    || e.code == rusqlite::ErrorCode::DatabaseLocked
                {
                    StoreError::Locked
                } else {
                    StoreError::QueryFailed(err.to_string())
                }
            }
            _ => StoreError::QueryFailed(err.to_string()),
        }
    }
}

impl From<rusqlite::Error> for CoreError {
    fn from(err: rusqlite::Error) -> Self {
        CoreError::Store(err.into())
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(err: toml::de::Error) -> Self {
        ConfigError::ParseFailed(err.to_string())
    }
}

/// Result type alias for CoreError
pub type Result<T, E = CoreError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_scheduler_codes_map_to_variants() {
        assert_eq!(SchedulingError::from_code(1, ""), SchedulingError::Unavailable);
        assert_eq!(SchedulingError::from_code(2, ""), SchedulingError::TooManyPending);
        assert_eq!(SchedulingError::from_code(3, ""), SchedulingError::NotPermitted);
    }

    #[test]
    fn unknown_scheduler_code_is_unclassified() {
        let err = SchedulingError::from_code(42, "new platform code");
        assert_eq!(
            err,
            SchedulingError::Unclassified {
                code: 42,
                message: "new platform code".into()
            }
        );
        assert_eq!(err.code(), 42);
        assert!(err.is_retryable());
    }

    #[test]
    fn not_permitted_is_not_retryable() {
        assert!(!SchedulingError::NotPermitted.is_retryable());
        assert!(SchedulingError::TooManyPending.is_retryable());
    }

    #[test]
    fn capability_display() {
        let err = ServiceError::AuthorizationDenied {
            capability: Capability::ShieldEnforcement,
        };
        assert_eq!(err.to_string(), "Authorization denied for shield enforcement");
    }
}
