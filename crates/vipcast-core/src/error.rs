//! Configuration error types.
//!
//! Every variant is an `InvalidConfiguration` failure: the offending
//! descriptor is rejected before it reaches the engine.

use thiserror::Error;

/// Result type alias for config and descriptor validation.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors raised while reading or validating configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid app name: must not be empty")]
    EmptyName,

    #[error("invalid VIP {vip:?} for app {app}: need ip/prefix")]
    InvalidVip { app: String, vip: String },

    #[error("invalid monitor {monitor:?} for app {app}: {reason}")]
    InvalidMonitor {
        app: String,
        monitor: String,
        reason: String,
    },

    #[error("unknown monitor kind {kind:?} for app {app}")]
    UnknownMonitorKind { app: String, kind: String },

    #[error("invalid community {0:?}: expected <asn>:<value>")]
    InvalidCommunity(String),

    #[error("duplicate app name: {0}")]
    DuplicateApp(String),

    #[error("invalid duration for {field}: {value:?}")]
    InvalidDuration { field: String, value: String },

    #[error("invalid setting {field}: {reason}")]
    InvalidSetting { field: String, reason: String },

    #[error("failed to read config {path}: {reason}")]
    Read { path: String, reason: String },

    #[error("failed to parse config: {0}")]
    Parse(String),
}
