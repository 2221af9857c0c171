//! Application descriptors.
//!
//! An `AppSpec` is the immutable, validated description of one
//! monitored unit: a name, a VIP prefix, per-VIP communities, and the
//! probes that decide whether the VIP is advertised. Monitor strings
//! use the colon syntax of the config file (`port:tcp:80`,
//! `exec:/usr/local/bin/check`) and are turned into a closed
//! `ProbeSpec` here; unknown kinds are rejected.

use std::fmt;

use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};
use crate::route::{self, Community, Route};

/// Transport dialed by a port probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortProtocol {
    Tcp,
}

impl PortProtocol {
    fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "tcp" => Some(PortProtocol::Tcp),
            _ => None,
        }
    }
}

impl fmt::Display for PortProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortProtocol::Tcp => f.write_str("tcp"),
        }
    }
}

/// One probe of an application.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProbeSpec {
    /// Connect to `protocol://target:port`.
    Port { protocol: PortProtocol, port: u16 },
    /// Run a command; exit status zero means healthy.
    Exec { command: String },
}

impl ProbeSpec {
    /// Parse a monitor string for the application `app`.
    pub fn parse(app: &str, raw: &str) -> ConfigResult<Self> {
        let invalid = |reason: &str| ConfigError::InvalidMonitor {
            app: app.to_string(),
            monitor: raw.to_string(),
            reason: reason.to_string(),
        };

        let (kind, rest) = raw.trim().split_once(':').unwrap_or((raw.trim(), ""));
        match kind {
            "port" => {
                let parts: Vec<&str> = rest.split(':').collect();
                if parts.len() != 2 {
                    return Err(invalid("must specify proto:port"));
                }
                let protocol =
                    PortProtocol::parse(parts[0]).ok_or_else(|| invalid("unsupported protocol"))?;
                let port = parts[1]
                    .parse::<u16>()
                    .ok()
                    .filter(|p| *p != 0)
                    .ok_or_else(|| invalid("port must be 1-65535"))?;
                Ok(ProbeSpec::Port { protocol, port })
            }
            "exec" => {
                let command = rest.trim();
                if command.is_empty() {
                    return Err(invalid("must specify command"));
                }
                Ok(ProbeSpec::Exec {
                    command: command.to_string(),
                })
            }
            other => Err(ConfigError::UnknownMonitorKind {
                app: app.to_string(),
                kind: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for ProbeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeSpec::Port { protocol, port } => write!(f, "port:{protocol}:{port}"),
            ProbeSpec::Exec { command } => write!(f, "exec:{command}"),
        }
    }
}

/// Validated description of one monitored application.
#[derive(Debug, Clone)]
pub struct AppSpec {
    name: String,
    vip: IpNetwork,
    communities: Vec<Community>,
    probes: Vec<ProbeSpec>,
    /// Where the descriptor came from, for diagnostics only.
    source: String,
}

impl AppSpec {
    /// Build a descriptor from config-file shaped input.
    pub fn new(
        name: &str,
        vip: &str,
        communities: &[String],
        monitors: &[String],
        source: &str,
    ) -> ConfigResult<Self> {
        if name.trim().is_empty() {
            return Err(ConfigError::EmptyName);
        }
        let vip = parse_vip(name, vip)?;
        let communities = route::parse_communities(communities)?;
        let probes = monitors
            .iter()
            .map(|m| ProbeSpec::parse(name, m))
            .collect::<ConfigResult<Vec<_>>>()?;
        Self::from_parts(name, vip, communities, probes, source)
    }

    /// Build a descriptor from already-typed parts.
    pub fn from_parts(
        name: &str,
        vip: IpNetwork,
        communities: Vec<Community>,
        probes: Vec<ProbeSpec>,
        source: &str,
    ) -> ConfigResult<Self> {
        if name.trim().is_empty() {
            return Err(ConfigError::EmptyName);
        }
        for probe in &probes {
            let bad = match probe {
                ProbeSpec::Port { port, .. } => *port == 0,
                ProbeSpec::Exec { command } => command.trim().is_empty(),
            };
            if bad {
                return Err(ConfigError::InvalidMonitor {
                    app: name.to_string(),
                    monitor: probe.to_string(),
                    reason: "missing required field".to_string(),
                });
            }
        }
        Ok(Self {
            name: name.trim().to_string(),
            vip: route::normalize(vip),
            communities,
            probes,
            source: source.to_string(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn vip(&self) -> IpNetwork {
        self.vip
    }

    pub fn communities(&self) -> &[Community] {
        &self.communities
    }

    pub fn probes(&self) -> &[ProbeSpec] {
        &self.probes
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// The route advertised while this application is healthy.
    pub fn route(&self) -> Route {
        Route::new(self.vip, self.communities.clone())
    }

    /// Structural equality used by reload: name, VIP, and the probe
    /// set compared without regard to order. Communities and source are
    /// ignored.
    pub fn same_definition(&self, other: &AppSpec) -> bool {
        self.name == other.name && self.vip == other.vip && probe_set(self) == probe_set(other)
    }

    /// Whether the per-VIP communities are identical (order-insensitive).
    pub fn same_attributes(&self, other: &AppSpec) -> bool {
        let mut a = self.communities.clone();
        let mut b = other.communities.clone();
        a.sort_unstable();
        b.sort_unstable();
        a == b
    }
}

impl fmt::Display for AppSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let probes: Vec<String> = self.probes.iter().map(|p| p.to_string()).collect();
        write!(
            f,
            "name: {}, vip: {}, probes: [{}], source: {}",
            self.name,
            self.vip,
            probes.join(", "),
            self.source
        )
    }
}

fn probe_set(spec: &AppSpec) -> Vec<&ProbeSpec> {
    let mut probes: Vec<&ProbeSpec> = spec.probes.iter().collect();
    probes.sort_unstable();
    probes
}

fn parse_vip(app: &str, vip: &str) -> ConfigResult<IpNetwork> {
    let invalid = || ConfigError::InvalidVip {
        app: app.to_string(),
        vip: vip.to_string(),
    };
    // A bare address would parse as a host route; require the prefix.
    if !vip.contains('/') {
        return Err(invalid());
    }
    vip.trim().parse::<IpNetwork>().map_err(|_| invalid())
}
