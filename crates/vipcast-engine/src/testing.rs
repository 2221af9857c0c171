//! Test fixtures: scripted probes and a fault-injectable RIB.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use vipcast_core::{AppSpec, Origin, ProbeSpec};
use vipcast_health::{Probe, ProbeBuilder, ProbeOutcome};
use vipcast_routing::{LocalRib, RouteController, SpeakerConfig};

use crate::engine::Engine;
use crate::settings::EngineSettings;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Mode {
    Healthy,
    Unhealthy,
    Hang,
}

/// Builds probes whose result is flipped by name from the test.
///
/// `exec:<name>` specs are keyed by `<name>`; unset names are healthy.
#[derive(Clone, Default)]
pub(crate) struct ScriptedProbes {
    modes: Arc<Mutex<HashMap<String, Mode>>>,
    runs: Arc<Mutex<HashMap<String, usize>>>,
}

impl ScriptedProbes {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn set(&self, name: &str, mode: Mode) {
        self.modes.lock().unwrap().insert(name.to_string(), mode);
    }

    /// How many times the probe named `name` has started.
    pub(crate) fn runs(&self, name: &str) -> usize {
        self.runs.lock().unwrap().get(name).copied().unwrap_or(0)
    }
}

impl ProbeBuilder for ScriptedProbes {
    fn build(&self, spec: &ProbeSpec) -> Arc<dyn Probe> {
        let name = match spec {
            ProbeSpec::Exec { command } => command.clone(),
            ProbeSpec::Port { port, .. } => format!("port{port}"),
        };
        Arc::new(ScriptedProbe {
            name,
            modes: Arc::clone(&self.modes),
            runs: Arc::clone(&self.runs),
        })
    }
}

struct ScriptedProbe {
    name: String,
    modes: Arc<Mutex<HashMap<String, Mode>>>,
    runs: Arc<Mutex<HashMap<String, usize>>>,
}

#[async_trait]
impl Probe for ScriptedProbe {
    fn describe(&self) -> String {
        format!("exec:{}", self.name)
    }

    async fn run(&self, _target: IpAddr) -> ProbeOutcome {
        *self.runs.lock().unwrap().entry(self.name.clone()).or_default() += 1;
        let mode = self
            .modes
            .lock()
            .unwrap()
            .get(&self.name)
            .copied()
            .unwrap_or(Mode::Healthy);
        match mode {
            Mode::Healthy => ProbeOutcome::healthy(),
            Mode::Unhealthy => ProbeOutcome::unhealthy(format!("{} scripted failure", self.name)),
            Mode::Hang => {
                std::future::pending::<()>().await;
                ProbeOutcome::healthy()
            }
        }
    }
}

pub(crate) fn rib() -> Arc<LocalRib> {
    Arc::new(LocalRib::new(SpeakerConfig {
        local_as: 65001,
        peer_as: 65000,
        router_id: "192.0.2.10".parse().unwrap(),
        peer_address: "192.0.2.1".parse().unwrap(),
        next_hop: "192.0.2.10".parse().unwrap(),
        communities: vec![],
        origin: Origin::Igp,
    }))
}

/// One-second ticks with a three-second cleanup timer.
pub(crate) fn settings() -> EngineSettings {
    EngineSettings {
        monitor_interval: Duration::from_secs(1),
        cleanup_timer: Duration::from_secs(3),
        probe_timeout: Duration::from_millis(100),
        route_timeout: Duration::from_secs(1),
        withdraw_retries: 2,
        retry_backoff: Duration::from_millis(10),
        shutdown_grace: Duration::from_millis(200),
        probe_host: None,
    }
}

pub(crate) fn spec(name: &str, vip: &str, monitors: &[&str]) -> AppSpec {
    let monitors: Vec<String> = monitors.iter().map(|m| m.to_string()).collect();
    AppSpec::new(name, vip, &[], &monitors, "test").unwrap()
}

pub(crate) fn engine(rib: &Arc<LocalRib>, probes: &ScriptedProbes) -> Engine {
    engine_with(rib, probes, settings())
}

pub(crate) fn engine_with(
    rib: &Arc<LocalRib>,
    probes: &ScriptedProbes,
    settings: EngineSettings,
) -> Engine {
    let controller: Arc<dyn RouteController> = rib.clone();
    Engine::with_probes(controller, Arc::new(probes.clone()), settings)
}
