//! The scheduler: ticks every application and drives routing calls.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};
use std::time::Duration;

use futures_util::future::join_all;
use tokio::sync::{Mutex, RwLock, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use vipcast_core::{AppSpec, HealthStatus, Route};
use vipcast_health::{ProbeBuilder, SystemProbes, aggregate, run_all};
use vipcast_routing::{PeerStatus, RouteController, RoutingError, RoutingResult};

use crate::error::{EngineError, EngineResult};
use crate::settings::EngineSettings;
use crate::state::{AppRuntime, RouteAction, RoutePhase};
use crate::status::{AppStatus, Published};

/// Result of evaluating one application in one tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// The previous tick for this app is still running.
    Busy,
    /// The engine is stopping or the app was removed.
    Skipped,
    Evaluated {
        verdict: HealthStatus,
        phase: RoutePhase,
        action: Option<RouteAction>,
        route_error: Option<String>,
    },
}

/// One tracked application.
pub(crate) struct AppSlot {
    pub(crate) name: String,
    pub(crate) runtime: Mutex<AppRuntime>,
    published: StdMutex<Published>,
}

impl AppSlot {
    fn new(runtime: AppRuntime) -> Self {
        Self {
            name: runtime.spec().name().to_string(),
            published: StdMutex::new(Published::from_runtime(&runtime)),
            runtime: Mutex::new(runtime),
        }
    }

    pub(crate) fn publish(&self, rt: &AppRuntime) {
        *self.lock_published() = Published::from_runtime(rt);
    }

    pub(crate) fn published(&self) -> Published {
        self.lock_published().clone()
    }

    fn lock_published(&self) -> MutexGuard<'_, Published> {
        self.published.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Health-driven route announcer.
///
/// Holds the live application set and the injected routing and probe
/// capabilities. `run` drives periodic ticks; `reload` and `shutdown`
/// serialize against each other through `reload_lock`.
pub struct Engine {
    controller: Arc<dyn RouteController>,
    pub(crate) probes: Arc<dyn ProbeBuilder>,
    settings: watch::Sender<EngineSettings>,
    pub(crate) apps: RwLock<HashMap<String, Arc<AppSlot>>>,
    pub(crate) reload_lock: Mutex<()>,
    pub(crate) cancel: CancellationToken,
    pub(crate) tasks: TaskTracker,
    pub(crate) shut_down: AtomicBool,
}

impl Engine {
    /// Engine with the real port and exec probes.
    pub fn new(controller: Arc<dyn RouteController>, settings: EngineSettings) -> Self {
        Self::with_probes(controller, Arc::new(SystemProbes), settings)
    }

    pub fn with_probes(
        controller: Arc<dyn RouteController>,
        probes: Arc<dyn ProbeBuilder>,
        settings: EngineSettings,
    ) -> Self {
        let (settings, _) = watch::channel(settings);
        Self {
            controller,
            probes,
            settings,
            apps: RwLock::new(HashMap::new()),
            reload_lock: Mutex::new(()),
            cancel: CancellationToken::new(),
            tasks: TaskTracker::new(),
            shut_down: AtomicBool::new(false),
        }
    }

    pub fn settings(&self) -> EngineSettings {
        self.settings.borrow().clone()
    }

    /// Replace the timings. A running scheduler picks up the new interval
    /// for the wait it is in; everything else applies from the next tick.
    pub fn update_settings(&self, settings: EngineSettings) {
        info!(
            interval = ?settings.monitor_interval,
            cleanup = ?settings.cleanup_timer,
            "engine settings updated"
        );
        self.settings.send_replace(settings);
    }

    pub fn controller(&self) -> &Arc<dyn RouteController> {
        &self.controller
    }

    pub fn is_shutting_down(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Names of all tracked applications, sorted.
    pub async fn app_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.apps.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Status of every application, sorted by name.
    pub async fn status(&self) -> Vec<AppStatus> {
        let now = Instant::now();
        let mut all: Vec<AppStatus> = self
            .slots()
            .await
            .iter()
            .map(|slot| slot.published().status_at(now))
            .collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    pub async fn app_status(&self, name: &str) -> Option<AppStatus> {
        let slot = self.apps.read().await.get(name).cloned()?;
        Some(slot.published().status_at(Instant::now()))
    }

    /// Peer status from the routing capability, bounded by `route_timeout`.
    pub async fn peer_info(&self) -> RoutingResult<Option<PeerStatus>> {
        let timeout = self.settings().route_timeout;
        tokio::time::timeout(timeout, self.controller.peer_info())
            .await
            .map_err(|_| RoutingError::Timeout(timeout))?
    }

    /// Evaluate every application once and wait for all of them.
    pub async fn tick(&self) -> BTreeMap<String, TickOutcome> {
        let slots = self.slots().await;
        let outcomes = join_all(slots.iter().map(|slot| self.tick_slot(slot))).await;
        slots.iter().map(|slot| slot.name.clone()).zip(outcomes).collect()
    }

    /// Tick every `monitor_interval` until shutdown.
    ///
    /// Ticks are dispatched without waiting for the previous cycle; an
    /// app whose last tick is still running reports `Busy` and is skipped.
    /// A new interval re-arms the pending wait, measured from the last
    /// dispatch.
    pub async fn run(self: Arc<Self>) {
        let mut changes = self.settings.subscribe();
        info!(interval = ?changes.borrow_and_update().monitor_interval, "scheduler started");
        'cycles: while !self.cancel.is_cancelled() {
            self.dispatch().await;
            let dispatched = Instant::now();
            loop {
                let interval = changes.borrow_and_update().monitor_interval;
                let wait = interval.saturating_sub(dispatched.elapsed());
                tokio::select! {
                    _ = tokio::time::sleep(wait) => break,
                    Ok(()) = changes.changed() => {
                        debug!(interval = ?changes.borrow().monitor_interval, "rescheduling next tick");
                    }
                    _ = self.cancel.cancelled() => break 'cycles,
                }
            }
        }
        info!("scheduler stopped");
    }

    async fn dispatch(self: &Arc<Self>) {
        for slot in self.slots().await {
            let engine = Arc::clone(self);
            self.tasks.spawn(async move {
                engine.tick_slot(&slot).await;
            });
        }
    }

    pub(crate) async fn slots(&self) -> Vec<Arc<AppSlot>> {
        self.apps.read().await.values().cloned().collect()
    }

    pub(crate) fn new_slot(&self, spec: Arc<AppSpec>) -> Arc<AppSlot> {
        Arc::new(AppSlot::new(AppRuntime::new(spec, self.probes.as_ref())))
    }

    async fn tick_slot(&self, slot: &AppSlot) -> TickOutcome {
        let Ok(mut rt) = slot.runtime.try_lock() else {
            debug!(app = %slot.name, "previous tick still running, skipping");
            return TickOutcome::Busy;
        };
        if rt.is_retired() || self.cancel.is_cancelled() {
            return TickOutcome::Skipped;
        }

        let settings = self.settings();
        let target = settings.probe_host.unwrap_or_else(|| rt.spec().vip().ip());
        let outcomes = run_all(rt.probes(), target, settings.probe_timeout, &self.cancel).await;
        if self.cancel.is_cancelled() {
            debug!(app = %slot.name, "tick abandoned for shutdown");
            return TickOutcome::Skipped;
        }

        rt.record_probes(&outcomes);
        let verdict = aggregate(&outcomes);
        if verdict == HealthStatus::Unhealthy {
            let reasons: Vec<&str> = outcomes.iter().filter_map(|o| o.reason.as_deref()).collect();
            debug!(app = %slot.name, ?reasons, "probes failing");
        }

        let action = rt.observe(verdict, Instant::now(), settings.cleanup_timer);
        let mut route_error = None;
        if let Some(action) = action {
            let route = rt.spec().route();
            match self.route_call(action, &route, settings.route_timeout).await {
                Ok(()) => {
                    rt.route_succeeded(action);
                    info!(app = %slot.name, vip = %route.network, ?action, "route updated");
                }
                Err(e) => {
                    warn!(
                        app = %slot.name,
                        vip = %route.network,
                        ?action,
                        error = %e,
                        "routing call failed, retrying next tick"
                    );
                    route_error = Some(e.to_string());
                    rt.route_failed(action, e.to_string());
                }
            }
        }

        slot.publish(&rt);
        TickOutcome::Evaluated {
            verdict,
            phase: rt.phase(),
            action,
            route_error,
        }
    }

    /// One announce or withdraw, bounded by `timeout`.
    pub(crate) async fn route_call(
        &self,
        action: RouteAction,
        route: &Route,
        timeout: Duration,
    ) -> RoutingResult<()> {
        let call = async {
            match action {
                RouteAction::Announce => self.controller.announce(route).await,
                RouteAction::Withdraw => self.controller.withdraw(route).await,
            }
        };
        tokio::time::timeout(timeout, call)
            .await
            .map_err(|_| RoutingError::Timeout(timeout))?
    }

    /// Withdraw with up to `withdraw_retries` extra attempts.
    pub(crate) async fn withdraw_with_retries(
        &self,
        app: &str,
        route: &Route,
        settings: &EngineSettings,
    ) -> EngineResult<()> {
        let attempts = settings.withdraw_attempts();
        let mut last_error = RoutingError::Timeout(settings.route_timeout);
        for attempt in 1..=attempts {
            match self
                .route_call(RouteAction::Withdraw, route, settings.route_timeout)
                .await
            {
                Ok(()) => {
                    info!(app, vip = %route.network, attempt, "route withdrawn");
                    return Ok(());
                }
                Err(e) => {
                    warn!(app, vip = %route.network, attempt, attempts, error = %e, "withdraw failed");
                    last_error = e;
                }
            }
            if attempt < attempts {
                tokio::time::sleep(settings.retry_backoff).await;
            }
        }
        Err(EngineError::RoutingCallFailed {
            app: app.to_string(),
            action: RouteAction::Withdraw,
            attempts,
            source: last_error,
        })
    }
}
