//! Probe strategies.
//!
//! A probe answers one question about a target address: is the
//! service there healthy right now. Probes never return errors; every
//! fault becomes `Unhealthy` with a reason.

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tracing::debug;

use vipcast_core::{PortProtocol, ProbeSpec};

/// Result of a single probe run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeResult {
    Healthy,
    Unhealthy,
}

/// Result plus the diagnostic reason for a failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeOutcome {
    pub result: ProbeResult,
    pub reason: Option<String>,
}

impl ProbeOutcome {
    pub fn healthy() -> Self {
        Self {
            result: ProbeResult::Healthy,
            reason: None,
        }
    }

    pub fn unhealthy(reason: impl Into<String>) -> Self {
        Self {
            result: ProbeResult::Unhealthy,
            reason: Some(reason.into()),
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.result == ProbeResult::Healthy
    }
}

/// A health check against a target address.
#[async_trait]
pub trait Probe: Send + Sync {
    /// Short label for logs and status, e.g. `port:tcp:80`.
    fn describe(&self) -> String;

    /// Run the check once. Callers bound this with a timeout.
    async fn run(&self, target: IpAddr) -> ProbeOutcome;
}

/// Builds live probes from validated specs.
///
/// The engine takes a builder by injection so probes can be replaced
/// in tests.
pub trait ProbeBuilder: Send + Sync {
    fn build(&self, spec: &ProbeSpec) -> Arc<dyn Probe>;
}

/// Builder for the real port and exec probes.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemProbes;

impl ProbeBuilder for SystemProbes {
    fn build(&self, spec: &ProbeSpec) -> Arc<dyn Probe> {
        match spec {
            ProbeSpec::Port { protocol, port } => Arc::new(PortProbe::new(*protocol, *port)),
            ProbeSpec::Exec { command } => Arc::new(ExecProbe::new(command)),
        }
    }
}

/// Connects to `target:port`; success is a completed handshake.
#[derive(Debug, Clone)]
pub struct PortProbe {
    protocol: PortProtocol,
    port: u16,
}

impl PortProbe {
    pub fn new(protocol: PortProtocol, port: u16) -> Self {
        Self { protocol, port }
    }
}

#[async_trait]
impl Probe for PortProbe {
    fn describe(&self) -> String {
        format!("port:{}:{}", self.protocol, self.port)
    }

    async fn run(&self, target: IpAddr) -> ProbeOutcome {
        let addr = SocketAddr::new(target, self.port);
        match self.protocol {
            PortProtocol::Tcp => match tokio::net::TcpStream::connect(addr).await {
                Ok(_stream) => ProbeOutcome::healthy(),
                Err(e) => {
                    debug!(%addr, error = %e, "port probe connect failed");
                    ProbeOutcome::unhealthy(format!("connect {}://{addr}: {e}", self.protocol))
                }
            },
        }
    }
}

/// Runs an external command; exit status zero is healthy.
///
/// The command line is split on whitespace and run directly, not through
/// a shell: quotes are passed through literally, so an argument cannot
/// contain spaces. Wrap such checks in a script. The probed address is
/// passed in `VIPCAST_TARGET`.
#[derive(Clone)]
pub struct ExecProbe {
    command: String,
}

impl ExecProbe {
    pub fn new(command: &str) -> Self {
        Self {
            command: command.to_string(),
        }
    }
}

impl fmt::Debug for ExecProbe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecProbe").field("command", &self.command).finish()
    }
}

#[async_trait]
impl Probe for ExecProbe {
    fn describe(&self) -> String {
        format!("exec:{}", self.command)
    }

    async fn run(&self, target: IpAddr) -> ProbeOutcome {
        let mut parts = self.command.split_whitespace();
        let Some(program) = parts.next() else {
            return ProbeOutcome::unhealthy("empty command");
        };

        let status = tokio::process::Command::new(program)
            .args(parts)
            .env("VIPCAST_TARGET", target.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            // The child dies with the probe future on timeout or cancel.
            .kill_on_drop(true)
            .status()
            .await;

        match status {
            Ok(status) if status.success() => ProbeOutcome::healthy(),
            Ok(status) => {
                debug!(command = %self.command, %status, "exec probe failed");
                match status.code() {
                    Some(code) => ProbeOutcome::unhealthy(format!("exited with status {code}")),
                    None => ProbeOutcome::unhealthy("terminated by signal"),
                }
            }
            Err(e) => {
                debug!(command = %self.command, error = %e, "exec probe spawn failed");
                ProbeOutcome::unhealthy(format!("spawn {program}: {e}"))
            }
        }
    }
}
