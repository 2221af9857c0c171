//! vipcast.toml configuration parser.

use std::collections::HashSet;
use std::net::IpAddr;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::app::AppSpec;
use crate::error::{ConfigError, ConfigResult};
use crate::route::{self, Community, Origin};

/// Prefix for environment overrides of the `[agent]` section.
pub const ENV_PREFIX: &str = "VIPCAST_";

/// Upper bound on every agent duration (30 days).
pub const MAX_DURATION: Duration = Duration::from_secs(30 * 24 * 3600);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VipcastConfig {
    #[serde(default)]
    pub agent: AgentConfig,
    pub bgp: BgpConfig,
    #[serde(default)]
    pub apps: Vec<AppConfig>,
    /// Provenance tag copied into every descriptor.
    #[serde(skip, default = "default_source")]
    pub source: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    #[serde(default = "default_monitor_interval")]
    pub monitor_interval: String,
    #[serde(default = "default_cleanup_timer")]
    pub cleanup_timer: String,
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout: String,
    #[serde(default = "default_route_timeout")]
    pub route_timeout: String,
    #[serde(default = "default_withdraw_retries")]
    pub withdraw_retries: u32,
    #[serde(default = "default_retry_backoff")]
    pub retry_backoff: String,
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace: String,
    /// Fixed host dialed by port probes instead of the VIP.
    pub probe_host: Option<IpAddr>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BgpConfig {
    pub local_as: u32,
    pub remote_as: u32,
    pub local_ip: IpAddr,
    pub peer_ip: IpAddr,
    /// Communities attached to every VIP, in addition to per-VIP ones.
    #[serde(default)]
    pub communities: Vec<String>,
    #[serde(default)]
    pub origin: Origin,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VipConfig {
    #[serde(default)]
    pub bgp_communities: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    pub name: String,
    pub vip: String,
    #[serde(default)]
    pub vip_config: VipConfig,
    #[serde(default)]
    pub monitors: Vec<String>,
}

impl AppConfig {
    pub fn to_spec(&self, source: &str) -> ConfigResult<AppSpec> {
        AppSpec::new(
            &self.name,
            &self.vip,
            &self.vip_config.bgp_communities,
            &self.monitors,
            source,
        )
    }
}

/// Validate a list of app entries into descriptors, rejecting duplicate names.
pub fn app_specs_from(apps: &[AppConfig], source: &str) -> ConfigResult<Vec<AppSpec>> {
    let mut seen = HashSet::new();
    let mut specs = Vec::with_capacity(apps.len());
    for app in apps {
        let spec = app.to_spec(source)?;
        if !seen.insert(spec.name().to_string()) {
            return Err(ConfigError::DuplicateApp(spec.name().to_string()));
        }
        specs.push(spec);
    }
    Ok(specs)
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            monitor_interval: default_monitor_interval(),
            cleanup_timer: default_cleanup_timer(),
            probe_timeout: default_probe_timeout(),
            route_timeout: default_route_timeout(),
            withdraw_retries: default_withdraw_retries(),
            retry_backoff: default_retry_backoff(),
            shutdown_grace: default_shutdown_grace(),
            probe_host: None,
        }
    }
}

impl AgentConfig {
    pub fn monitor_interval(&self) -> ConfigResult<Duration> {
        nonzero("monitor_interval", &self.monitor_interval)
    }

    pub fn cleanup_timer(&self) -> ConfigResult<Duration> {
        duration("cleanup_timer", &self.cleanup_timer)
    }

    pub fn probe_timeout(&self) -> ConfigResult<Duration> {
        nonzero("probe_timeout", &self.probe_timeout)
    }

    pub fn route_timeout(&self) -> ConfigResult<Duration> {
        nonzero("route_timeout", &self.route_timeout)
    }

    pub fn retry_backoff(&self) -> ConfigResult<Duration> {
        duration("retry_backoff", &self.retry_backoff)
    }

    pub fn shutdown_grace(&self) -> ConfigResult<Duration> {
        duration("shutdown_grace", &self.shutdown_grace)
    }

    /// Apply overrides from a variable lookup (`VIPCAST_MONITOR_INTERVAL`, ...).
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(&format!("{ENV_PREFIX}{name}"));
        if let Some(v) = var("LISTEN_ADDR") {
            self.listen_addr = v;
        }
        if let Some(v) = var("MONITOR_INTERVAL") {
            self.monitor_interval = v;
        }
        if let Some(v) = var("CLEANUP_TIMER") {
            self.cleanup_timer = v;
        }
        if let Some(v) = var("PROBE_TIMEOUT") {
            self.probe_timeout = v;
        }
    }
}

impl BgpConfig {
    pub fn default_communities(&self) -> ConfigResult<Vec<Community>> {
        route::parse_communities(&self.communities)
    }
}

impl VipcastConfig {
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        let mut config = Self::from_toml_str(&content)?;
        config.source = format!("config:{}", path.display());
        Ok(config)
    }

    pub fn from_toml_str(s: &str) -> ConfigResult<Self> {
        toml::from_str(s).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Bind `VIPCAST_*` environment variables onto the agent section.
    pub fn apply_env_overrides(&mut self) {
        self.agent.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Check every value that is parsed lazily.
    pub fn validate(&self) -> ConfigResult<()> {
        self.agent.monitor_interval()?;
        self.agent.cleanup_timer()?;
        self.agent.probe_timeout()?;
        self.agent.route_timeout()?;
        self.agent.retry_backoff()?;
        self.agent.shutdown_grace()?;
        self.bgp.default_communities()?;
        self.app_specs()?;
        Ok(())
    }

    pub fn app_specs(&self) -> ConfigResult<Vec<AppSpec>> {
        app_specs_from(&self.apps, &self.source)
    }
}

/// Parse a duration string like "5s", "500ms", "2m", "1h".
///
/// A bare number is taken as seconds. Values that overflow are rejected.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    let (digits, scale) = if let Some(ms) = s.strip_suffix("ms") {
        return ms.parse::<u64>().ok().map(Duration::from_millis);
    } else if let Some(secs) = s.strip_suffix('s') {
        (secs, 1)
    } else if let Some(mins) = s.strip_suffix('m') {
        (mins, 60)
    } else if let Some(hours) = s.strip_suffix('h') {
        (hours, 3600)
    } else {
        (s, 1)
    };
    digits
        .parse::<u64>()
        .ok()
        .and_then(|n| n.checked_mul(scale))
        .map(Duration::from_secs)
}

fn duration(field: &str, value: &str) -> ConfigResult<Duration> {
    let d = parse_duration(value).ok_or_else(|| ConfigError::InvalidDuration {
        field: field.to_string(),
        value: value.to_string(),
    })?;
    if d > MAX_DURATION {
        return Err(ConfigError::InvalidSetting {
            field: field.to_string(),
            reason: format!("must be at most {}h", MAX_DURATION.as_secs() / 3600),
        });
    }
    Ok(d)
}

fn nonzero(field: &str, value: &str) -> ConfigResult<Duration> {
    let d = duration(field, value)?;
    if d.is_zero() {
        return Err(ConfigError::InvalidSetting {
            field: field.to_string(),
            reason: "must be greater than zero".to_string(),
        });
    }
    Ok(d)
}

fn default_source() -> String {
    "config".to_string()
}

fn default_listen_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_monitor_interval() -> String {
    "10s".to_string()
}

fn default_cleanup_timer() -> String {
    "15m".to_string()
}

fn default_probe_timeout() -> String {
    "2s".to_string()
}

fn default_route_timeout() -> String {
    "5s".to_string()
}

fn default_withdraw_retries() -> u32 {
    3
}

fn default_retry_backoff() -> String {
    "500ms".to_string()
}

fn default_shutdown_grace() -> String {
    "5s".to_string()
}
