//! Read-only application status.
//!
//! Each slot publishes a snapshot after every mutation so status reads
//! never wait behind a tick that is still probing.

use std::sync::Arc;

use serde::Serialize;
use tokio::time::Instant;

use vipcast_core::{AppSpec, HealthStatus, Route};
use vipcast_health::ProbeTracker;

use crate::state::{AppRuntime, RoutePhase};

/// Status of one application as reported to operators.
#[derive(Debug, Clone, Serialize)]
pub struct AppStatus {
    pub name: String,
    pub vip: String,
    pub communities: Vec<String>,
    pub monitors: Vec<String>,
    /// Where the descriptor came from, e.g. `config:/etc/vipcast.toml`.
    pub source: String,
    pub health: HealthStatus,
    pub announced: bool,
    pub phase: RoutePhase,
    /// Time left before a pending withdraw fires.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending_withdraw_in_ms: Option<u64>,
    pub probes: Vec<ProbeTracker>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_route_error: Option<String>,
}

/// Last state written by the slot owner.
#[derive(Debug, Clone)]
pub(crate) struct Published {
    pub(crate) spec: Arc<AppSpec>,
    pub(crate) status: AppStatus,
    pub(crate) deadline: Option<Instant>,
    /// The route as last advertised, while it is.
    pub(crate) route: Option<Route>,
}

impl Published {
    pub(crate) fn from_runtime(rt: &AppRuntime) -> Self {
        let spec = Arc::clone(rt.spec());
        let status = AppStatus {
            name: spec.name().to_string(),
            vip: spec.vip().to_string(),
            communities: spec.communities().iter().map(ToString::to_string).collect(),
            monitors: spec.probes().iter().map(ToString::to_string).collect(),
            source: spec.source().to_string(),
            health: rt.health(),
            announced: rt.announced(),
            phase: rt.phase(),
            pending_withdraw_in_ms: None,
            probes: rt.trackers().to_vec(),
            last_route_error: rt.last_route_error().map(str::to_string),
        };
        Self {
            route: rt.announced().then(|| spec.route()),
            deadline: rt.pending_withdraw_deadline(),
            spec,
            status,
        }
    }

    /// The snapshot with the withdraw countdown taken at `now`.
    pub(crate) fn status_at(&self, now: Instant) -> AppStatus {
        let mut status = self.status.clone();
        status.pending_withdraw_in_ms = self.deadline.map(|deadline| {
            u64::try_from(deadline.saturating_duration_since(now).as_millis()).unwrap_or(u64::MAX)
        });
        status
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::state::RouteAction;
    use crate::testing::{ScriptedProbes, spec};

    #[tokio::test(start_paused = true)]
    async fn countdown_is_computed_at_read_time() {
        let mut rt = AppRuntime::new(
            Arc::new(spec("web", "10.0.0.1/32", &["exec:web"])),
            &ScriptedProbes::new(),
        );
        let t0 = Instant::now();
        rt.observe(HealthStatus::Healthy, t0, Duration::from_secs(3));
        rt.route_succeeded(RouteAction::Announce);
        rt.observe(HealthStatus::Unhealthy, t0, Duration::from_secs(3));

        let published = Published::from_runtime(&rt);
        assert!(published.route.is_some());
        assert_eq!(published.status.phase, RoutePhase::PendingWithdraw);
        assert_eq!(published.status_at(t0).pending_withdraw_in_ms, Some(3000));
        assert_eq!(
            published.status_at(t0 + Duration::from_secs(2)).pending_withdraw_in_ms,
            Some(1000)
        );
        assert_eq!(
            published.status_at(t0 + Duration::from_secs(10)).pending_withdraw_in_ms,
            Some(0)
        );
    }

    #[test]
    fn fresh_runtime_has_no_route() {
        let rt = AppRuntime::new(
            Arc::new(spec("web", "10.0.0.1/32", &[])),
            &ScriptedProbes::new(),
        );
        let published = Published::from_runtime(&rt);
        assert!(published.route.is_none());
        assert_eq!(published.status.health, HealthStatus::Unknown);
        assert_eq!(published.status.source, "test");

        let json = serde_json::to_value(published.status_at(Instant::now())).unwrap();
        assert_eq!(json["phase"], "unknown");
        assert!(json.get("pending_withdraw_in_ms").is_none());
    }
}
