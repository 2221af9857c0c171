//! Shared types used across vipcast crates.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Aggregate health verdict of an application.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    /// No verdict yet (fresh or redefined application).
    #[default]
    Unknown,
    /// Every probe passed on the last tick.
    Healthy,
    /// At least one probe failed or timed out on the last tick.
    Unhealthy,
}

impl HealthStatus {
    pub fn is_healthy(self) -> bool {
        self == HealthStatus::Healthy
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HealthStatus::Unknown => "unknown",
            HealthStatus::Healthy => "healthy",
            HealthStatus::Unhealthy => "unhealthy",
        };
        f.write_str(s)
    }
}
