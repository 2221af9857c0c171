//! Engine error types.

use thiserror::Error;

use vipcast_core::ConfigError;
use vipcast_routing::RoutingError;

use crate::reload::ReloadReport;
use crate::shutdown::ShutdownReport;
use crate::state::RouteAction;

/// Errors that can occur while reconciling or stopping the engine.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("{action:?} of {app} failed after {attempts} attempt(s): {source}")]
    RoutingCallFailed {
        app: String,
        action: RouteAction,
        attempts: u32,
        source: RoutingError,
    },

    #[error("reload partially applied: {} app(s) failed", .0.failures().count())]
    ReloadApplyFailed(Box<ReloadReport>),

    #[error("shutdown incomplete: {} route(s) may still be advertised", .0.failed.len())]
    ShutdownIncomplete(Box<ShutdownReport>),

    #[error("engine is shutting down")]
    ShuttingDown,
}

pub type EngineResult<T> = Result<T, EngineError>;
