//! Per-application runtime state and the announce/withdraw state machine.
//!
//! The phase is derived from three fields:
//!
//! | health    | announced | deadline | phase            |
//! |-----------|-----------|----------|------------------|
//! | Unknown   | false     | none     | Unknown          |
//! | any       | true      | none     | Announced        |
//! | Unhealthy | true      | set      | PendingWithdraw  |
//! | known     | false     | none     | Withdrawn        |
//!
//! `observe` applies one verdict and returns the routing call the
//! engine has to make, if any. Health and `announced` only move past a
//! routing call once `route_succeeded` confirms it, so a failed call is
//! re-derived and retried on the next tick.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tracing::debug;

use vipcast_core::config::MAX_DURATION;
use vipcast_core::{AppSpec, HealthStatus};
use vipcast_health::{Probe, ProbeBuilder, ProbeOutcome, ProbeTracker};

/// Routing state of an application as seen by the operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutePhase {
    /// Never evaluated; nothing announced.
    Unknown,
    /// Route advertised, health good.
    Announced,
    /// Route still advertised, waiting out the cleanup timer.
    PendingWithdraw,
    /// Route not advertised.
    Withdrawn,
}

/// A routing call requested by the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteAction {
    Announce,
    Withdraw,
}

pub struct AppRuntime {
    spec: Arc<AppSpec>,
    probes: Vec<Arc<dyn Probe>>,
    trackers: Vec<ProbeTracker>,
    health: HealthStatus,
    announced: bool,
    pending_withdraw_deadline: Option<Instant>,
    /// Communities changed while announced and the re-announce failed.
    attributes_stale: bool,
    last_route_error: Option<String>,
    /// Set once the app has been removed; late ticks must not touch it.
    retired: bool,
}

impl AppRuntime {
    pub fn new(spec: Arc<AppSpec>, builder: &dyn ProbeBuilder) -> Self {
        let probes: Vec<Arc<dyn Probe>> = spec.probes().iter().map(|p| builder.build(p)).collect();
        let trackers = probes.iter().map(|p| ProbeTracker::new(p.describe())).collect();
        Self {
            spec,
            probes,
            trackers,
            health: HealthStatus::Unknown,
            announced: false,
            pending_withdraw_deadline: None,
            attributes_stale: false,
            last_route_error: None,
            retired: false,
        }
    }

    pub fn spec(&self) -> &Arc<AppSpec> {
        &self.spec
    }

    pub fn probes(&self) -> &[Arc<dyn Probe>] {
        &self.probes
    }

    pub fn trackers(&self) -> &[ProbeTracker] {
        &self.trackers
    }

    pub fn health(&self) -> HealthStatus {
        self.health
    }

    pub fn announced(&self) -> bool {
        self.announced
    }

    pub fn pending_withdraw_deadline(&self) -> Option<Instant> {
        self.pending_withdraw_deadline
    }

    pub fn last_route_error(&self) -> Option<&str> {
        self.last_route_error.as_deref()
    }

    pub fn is_retired(&self) -> bool {
        self.retired
    }

    pub fn retire(&mut self) {
        self.retired = true;
    }

    pub fn phase(&self) -> RoutePhase {
        match (self.announced, self.pending_withdraw_deadline, self.health) {
            (true, Some(_), _) => RoutePhase::PendingWithdraw,
            (true, None, _) => RoutePhase::Announced,
            (false, _, HealthStatus::Unknown) => RoutePhase::Unknown,
            (false, _, _) => RoutePhase::Withdrawn,
        }
    }

    /// Record this tick's probe outcomes, one per probe.
    pub fn record_probes(&mut self, outcomes: &[ProbeOutcome]) {
        for (tracker, outcome) in self.trackers.iter_mut().zip(outcomes) {
            tracker.record(outcome);
        }
    }

    /// Apply one aggregate verdict at `now`.
    pub fn observe(
        &mut self,
        verdict: HealthStatus,
        now: Instant,
        cleanup_timer: Duration,
    ) -> Option<RouteAction> {
        let phase = self.phase();
        let action = match (phase, verdict) {
            (_, HealthStatus::Unknown) => None,
            (RoutePhase::Unknown | RoutePhase::Withdrawn, HealthStatus::Healthy) => {
                Some(RouteAction::Announce)
            }
            (RoutePhase::Unknown, HealthStatus::Unhealthy) => {
                // Nothing was ever advertised, so there is nothing to debounce.
                self.health = HealthStatus::Unhealthy;
                None
            }
            (RoutePhase::Withdrawn, HealthStatus::Unhealthy) => None,
            (RoutePhase::Announced, HealthStatus::Healthy) => {
                self.health = HealthStatus::Healthy;
                self.attributes_stale.then_some(RouteAction::Announce)
            }
            (RoutePhase::Announced, HealthStatus::Unhealthy) => {
                self.pending_withdraw_deadline = Some(now + cleanup_timer.min(MAX_DURATION));
                self.health = HealthStatus::Unhealthy;
                None
            }
            (RoutePhase::PendingWithdraw, HealthStatus::Healthy) => {
                self.health = HealthStatus::Healthy;
                self.pending_withdraw_deadline = None;
                self.attributes_stale.then_some(RouteAction::Announce)
            }
            (RoutePhase::PendingWithdraw, HealthStatus::Unhealthy) => match self.pending_withdraw_deadline {
                Some(deadline) if now >= deadline => Some(RouteAction::Withdraw),
                _ => None,
            },
        };

        if self.phase() != phase {
            debug!(app = %self.spec.name(), from = ?phase, to = ?self.phase(), "phase changed");
        }
        debug_assert!(self.invariants_hold());
        action
    }

    /// The routing call for `action` completed.
    pub fn route_succeeded(&mut self, action: RouteAction) {
        match action {
            RouteAction::Announce => {
                self.announced = true;
                self.health = HealthStatus::Healthy;
                self.pending_withdraw_deadline = None;
                self.attributes_stale = false;
            }
            RouteAction::Withdraw => {
                self.announced = false;
                self.pending_withdraw_deadline = None;
                self.attributes_stale = false;
                if self.health == HealthStatus::Healthy {
                    // Withdrawn on request (reload, shutdown) rather than by verdict.
                    self.health = HealthStatus::Unknown;
                }
            }
        }
        self.last_route_error = None;
        debug_assert!(self.invariants_hold());
    }

    /// The routing call for `action` failed; state stays where it was.
    pub fn route_failed(&mut self, action: RouteAction, error: String) {
        debug!(app = %self.spec.name(), ?action, %error, "routing call failed");
        self.last_route_error = Some(error);
    }

    /// Swap in a descriptor that differs only in communities.
    ///
    /// Returns true when the route is currently advertised and must be
    /// re-announced to carry the new attributes.
    pub fn update_attributes(&mut self, spec: Arc<AppSpec>) -> bool {
        self.spec = spec;
        if self.announced {
            self.attributes_stale = true;
        }
        self.announced
    }

    /// An out-of-band re-announce carried the new attributes.
    ///
    /// Health and the withdraw deadline are left alone.
    pub fn attributes_announced(&mut self) {
        self.attributes_stale = false;
        self.last_route_error = None;
    }

    /// The deadline is armed exactly while an unhealthy route is still advertised.
    pub fn invariants_hold(&self) -> bool {
        let deadline_ok = self.pending_withdraw_deadline.is_some()
            == (self.health == HealthStatus::Unhealthy && self.announced);
        let announced_ok = !self.announced || self.health != HealthStatus::Unknown;
        deadline_ok && announced_ok
    }
}
