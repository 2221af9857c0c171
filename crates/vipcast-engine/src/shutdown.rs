//! Orderly stop: cancel ticks, withdraw every route, close the session.

use std::sync::atomic::Ordering;

use futures_util::future::join_all;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::engine::{AppSlot, Engine};
use crate::error::{EngineError, EngineResult};
use crate::reload::AppApplyResult;
use crate::settings::EngineSettings;
use crate::state::RouteAction;

/// What shutdown did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ShutdownReport {
    /// Apps whose route was withdrawn.
    pub withdrawn: Vec<String>,
    /// Apps withdrawn from the last published state because a stuck
    /// tick still held their runtime.
    pub forced: Vec<String>,
    /// Apps whose route could not be withdrawn.
    pub failed: Vec<AppApplyResult>,
    pub session_closed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_error: Option<String>,
}

enum Drained {
    Idle,
    Withdrawn { forced: bool },
    Failed(String),
}

impl Engine {
    /// Withdraw everything and stop the routing session.
    ///
    /// Runs once; later calls return an empty report. Returns
    /// `ShutdownIncomplete` if any route may still be advertised.
    pub async fn shutdown(&self) -> EngineResult<ShutdownReport> {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            debug!("shutdown already performed");
            return Ok(ShutdownReport::default());
        }
        let settings = self.settings();
        info!(grace = ?settings.shutdown_grace, "shutdown started");

        self.cancel.cancel();
        self.tasks.close();
        if tokio::time::timeout(settings.shutdown_grace, self.tasks.wait())
            .await
            .is_err()
        {
            warn!(pending = self.tasks.len(), "ticks still running after grace period");
        }

        // Let an in-progress reload finish so no app appears behind us.
        let _reload = tokio::time::timeout(settings.shutdown_grace, self.reload_lock.lock())
            .await
            .ok();

        let slots = self.slots().await;
        let drained = join_all(slots.iter().map(|slot| self.drain_app(slot, &settings))).await;

        let mut report = ShutdownReport::default();
        for (slot, outcome) in slots.iter().zip(drained) {
            match outcome {
                Drained::Idle => {}
                Drained::Withdrawn { forced } => {
                    report.withdrawn.push(slot.name.clone());
                    if forced {
                        report.forced.push(slot.name.clone());
                    }
                }
                Drained::Failed(message) => {
                    report.failed.push(AppApplyResult::failed(&slot.name, message));
                }
            }
        }
        report.withdrawn.sort();
        report.forced.sort();
        report.failed.sort_by(|a, b| a.name.cmp(&b.name));

        match tokio::time::timeout(settings.route_timeout, self.controller().shutdown()).await {
            Ok(Ok(())) => report.session_closed = true,
            Ok(Err(e)) => report.session_error = Some(e.to_string()),
            Err(_) => {
                report.session_error =
                    Some(format!("session close timed out after {:?}", settings.route_timeout));
            }
        }
        if let Some(e) = &report.session_error {
            warn!(error = %e, "routing session did not close cleanly");
        }

        info!(
            withdrawn = report.withdrawn.len(),
            failed = report.failed.len(),
            session_closed = report.session_closed,
            "shutdown complete"
        );
        if report.failed.is_empty() {
            Ok(report)
        } else {
            Err(EngineError::ShutdownIncomplete(Box::new(report)))
        }
    }

    async fn drain_app(&self, slot: &AppSlot, settings: &EngineSettings) -> Drained {
        match tokio::time::timeout(settings.shutdown_grace, slot.runtime.lock()).await {
            Ok(mut rt) => {
                rt.retire();
                if !rt.announced() {
                    slot.publish(&rt);
                    return Drained::Idle;
                }
                let route = rt.spec().route();
                let result = self.withdraw_with_retries(&slot.name, &route, settings).await;
                let drained = match result {
                    Ok(()) => {
                        rt.route_succeeded(RouteAction::Withdraw);
                        Drained::Withdrawn { forced: false }
                    }
                    Err(e) => {
                        error!(app = %slot.name, error = %e, "route left advertised at shutdown");
                        rt.route_failed(RouteAction::Withdraw, e.to_string());
                        Drained::Failed(e.to_string())
                    }
                };
                slot.publish(&rt);
                drained
            }
            Err(_) => {
                warn!(app = %slot.name, "runtime still busy, withdrawing last published route");
                let Some(route) = slot.published().route else {
                    return Drained::Idle;
                };
                match self.withdraw_with_retries(&slot.name, &route, settings).await {
                    Ok(()) => Drained::Withdrawn { forced: true },
                    Err(e) => {
                        error!(app = %slot.name, error = %e, "route left advertised at shutdown");
                        Drained::Failed(e.to_string())
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use vipcast_routing::RibEvent;

    use super::*;
    use crate::testing::{Mode, ScriptedProbes, engine, rib, spec};

    #[tokio::test(start_paused = true)]
    async fn withdraws_everything_then_closes_session() {
        let rib = rib();
        let probes = ScriptedProbes::new();
        probes.set("down", Mode::Unhealthy);
        let engine = engine(&rib, &probes);
        engine
            .reload(vec![
                spec("web", "10.0.0.1/32", &[]),
                spec("api", "10.0.0.2/32", &[]),
                spec("down", "10.0.0.3/32", &["exec:down"]),
            ])
            .await
            .unwrap();
        engine.tick().await;
        assert_eq!(rib.paths().len(), 2);

        let report = engine.shutdown().await.unwrap();
        assert_eq!(report.withdrawn, vec!["api", "web"]);
        assert!(report.forced.is_empty());
        assert!(report.session_closed);
        assert!(rib.is_closed());

        // Every withdraw lands before the session closes.
        let events = rib.events();
        assert_eq!(events.last(), Some(&RibEvent::Shutdown));
        let withdraws = events
            .iter()
            .filter(|e| matches!(e, RibEvent::Withdraw { ok: true, .. }))
            .count();
        assert_eq!(withdraws, 2);
        assert!(engine.is_shutting_down());
    }

    #[tokio::test(start_paused = true)]
    async fn hung_probes_do_not_block_shutdown() {
        let rib = rib();
        let probes = ScriptedProbes::new();
        let mut settings = crate::testing::settings();
        settings.probe_timeout = Duration::from_secs(3600);
        let engine = Arc::new(crate::testing::engine_with(&rib, &probes, settings));
        engine.reload(vec![spec("web", "10.0.0.1/32", &["exec:web"])]).await.unwrap();
        engine.tick().await;

        probes.set("web", Mode::Hang);
        let runner = tokio::spawn(Arc::clone(&engine).run());
        tokio::time::sleep(Duration::from_millis(50)).await;

        let report = engine.shutdown().await.unwrap();
        assert_eq!(report.withdrawn, vec!["web"]);
        assert!(report.session_closed);
        runner.await.unwrap();
        assert!(rib.paths().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn withdraw_failure_is_reported_but_session_still_closes() {
        let rib = rib();
        let engine = engine(&rib, &ScriptedProbes::new());
        engine.reload(vec![spec("web", "10.0.0.1/32", &[])]).await.unwrap();
        engine.tick().await;
        rib.fail_withdraws(true);

        let err = engine.shutdown().await.unwrap_err();
        let EngineError::ShutdownIncomplete(report) = err else {
            panic!("expected ShutdownIncomplete, got {err:?}");
        };
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].name, "web");
        assert!(report.session_closed);
        assert_eq!(rib.withdraw_calls("10.0.0.1/32".parse().unwrap()), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn second_shutdown_is_a_noop() {
        let rib = rib();
        let engine = engine(&rib, &ScriptedProbes::new());
        engine.reload(vec![spec("web", "10.0.0.1/32", &[])]).await.unwrap();
        engine.tick().await;

        engine.shutdown().await.unwrap();
        let events = rib.events().len();
        let again = engine.shutdown().await.unwrap();
        assert_eq!(again, ShutdownReport::default());
        assert_eq!(rib.events().len(), events);
    }

    #[tokio::test(start_paused = true)]
    async fn ticks_after_shutdown_are_skipped() {
        let rib = rib();
        let engine = engine(&rib, &ScriptedProbes::new());
        engine.reload(vec![spec("web", "10.0.0.1/32", &[])]).await.unwrap();
        engine.shutdown().await.unwrap();

        let outcomes = engine.tick().await;
        assert_eq!(outcomes["web"], crate::engine::TickOutcome::Skipped);
        assert!(rib.paths().is_empty());
    }
}
