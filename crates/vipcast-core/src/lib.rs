//! vipcast-core — shared types for the vipcast anycast daemon.
//!
//! Holds everything that is decided before the engine sees an
//! application: the config file model, validated application
//! descriptors, and the route model handed to the routing capability.

pub mod app;
pub mod config;
pub mod error;
pub mod route;
pub mod types;

pub use app::{AppSpec, PortProtocol, ProbeSpec};
pub use config::{AgentConfig, AppConfig, BgpConfig, VipConfig, VipcastConfig, parse_duration};
pub use error::{ConfigError, ConfigResult};
pub use route::{Community, Origin, Route};
pub use types::HealthStatus;
