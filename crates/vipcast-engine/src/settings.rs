//! Engine timing settings.

use std::net::IpAddr;
use std::time::Duration;

use vipcast_core::{AgentConfig, ConfigResult};

/// Timings read by the engine at the start of every scheduling cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSettings {
    /// Tick period.
    pub monitor_interval: Duration,
    /// Debounce window between the first failing verdict and the withdraw.
    pub cleanup_timer: Duration,
    /// Bound on each probe run.
    pub probe_timeout: Duration,
    /// Caller-side bound on each routing call.
    pub route_timeout: Duration,
    /// Extra withdraw attempts during reload and shutdown.
    pub withdraw_retries: u32,
    /// Delay between those attempts.
    pub retry_backoff: Duration,
    /// How long shutdown waits for in-flight ticks.
    pub shutdown_grace: Duration,
    /// Dial this host in port probes instead of the VIP.
    pub probe_host: Option<IpAddr>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            monitor_interval: Duration::from_secs(10),
            cleanup_timer: Duration::from_secs(15 * 60),
            probe_timeout: Duration::from_secs(2),
            route_timeout: Duration::from_secs(5),
            withdraw_retries: 3,
            retry_backoff: Duration::from_millis(500),
            shutdown_grace: Duration::from_secs(5),
            probe_host: None,
        }
    }
}

impl EngineSettings {
    pub fn from_agent(agent: &AgentConfig) -> ConfigResult<Self> {
        Ok(Self {
            monitor_interval: agent.monitor_interval()?,
            cleanup_timer: agent.cleanup_timer()?,
            probe_timeout: agent.probe_timeout()?,
            route_timeout: agent.route_timeout()?,
            withdraw_retries: agent.withdraw_retries,
            retry_backoff: agent.retry_backoff()?,
            shutdown_grace: agent.shutdown_grace()?,
            probe_host: agent.probe_host,
        })
    }

    /// Total withdraw attempts, the first one included.
    pub fn withdraw_attempts(&self) -> u32 {
        self.withdraw_retries.saturating_add(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_agent_defaults() {
        let from_agent = EngineSettings::from_agent(&AgentConfig::default()).unwrap();
        assert_eq!(from_agent, EngineSettings::default());
        assert_eq!(from_agent.withdraw_attempts(), 4);
    }

    #[test]
    fn invalid_agent_duration_is_rejected() {
        let agent = AgentConfig {
            probe_timeout: "never".to_string(),
            ..AgentConfig::default()
        };
        assert!(EngineSettings::from_agent(&agent).is_err());
    }
}
