//! Reconciling a new application set against the live one.
//!
//! Apply order is removals, redefinitions, attribute updates, then
//! additions. Unchanged apps keep their runtime state untouched.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::Serialize;
use tracing::{error, info, warn};

use vipcast_core::{AppSpec, ConfigError};

use crate::engine::{AppSlot, Engine};
use crate::error::{EngineError, EngineResult};
use crate::settings::EngineSettings;
use crate::state::{AppRuntime, RouteAction};

/// Classification of every app name in a reload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReloadPlan {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    /// VIP or probe set changed.
    pub redefined: Vec<String>,
    /// Only communities changed.
    pub attributes_changed: Vec<String>,
    pub unchanged: Vec<String>,
}

impl ReloadPlan {
    pub fn is_noop(&self) -> bool {
        self.added.is_empty()
            && self.removed.is_empty()
            && self.redefined.is_empty()
            && self.attributes_changed.is_empty()
    }
}

/// Diff the live descriptors against the desired set.
pub fn plan_reload(current: &HashMap<String, Arc<AppSpec>>, desired: &[AppSpec]) -> ReloadPlan {
    let mut plan = ReloadPlan::default();
    let desired_names: HashSet<&str> = desired.iter().map(AppSpec::name).collect();

    for spec in desired {
        let name = spec.name().to_string();
        match current.get(spec.name()) {
            None => plan.added.push(name),
            Some(live) if !live.same_definition(spec) => plan.redefined.push(name),
            Some(live) if !live.same_attributes(spec) => plan.attributes_changed.push(name),
            Some(_) => plan.unchanged.push(name),
        }
    }
    plan.removed = current
        .keys()
        .filter(|name| !desired_names.contains(name.as_str()))
        .cloned()
        .collect();

    plan.added.sort();
    plan.removed.sort();
    plan.redefined.sort();
    plan.attributes_changed.sort();
    plan.unchanged.sort();
    plan
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplyOutcome {
    Added,
    Removed,
    Redefined,
    AttributesUpdated,
    Unchanged,
    Failed,
}

/// What happened to one app during a reload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppApplyResult {
    pub name: String,
    pub outcome: ApplyOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl AppApplyResult {
    fn ok(name: &str, outcome: ApplyOutcome) -> Self {
        Self {
            name: name.to_string(),
            outcome,
            message: None,
        }
    }

    pub(crate) fn failed(name: &str, message: String) -> Self {
        Self {
            name: name.to_string(),
            outcome: ApplyOutcome::Failed,
            message: Some(message),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReloadReport {
    pub results: Vec<AppApplyResult>,
}

impl ReloadReport {
    pub fn failures(&self) -> impl Iterator<Item = &AppApplyResult> {
        self.results
            .iter()
            .filter(|r| r.outcome == ApplyOutcome::Failed)
    }

    pub fn outcome_of(&self, name: &str) -> Option<ApplyOutcome> {
        self.results.iter().find(|r| r.name == name).map(|r| r.outcome)
    }
}

impl Engine {
    /// Reconcile the live set with `desired`.
    ///
    /// Serialized with other reloads and with shutdown. On any per-app
    /// failure the rest of the plan is still applied and the report is
    /// returned inside `EngineError::ReloadApplyFailed`.
    pub async fn reload(&self, desired: Vec<AppSpec>) -> EngineResult<ReloadReport> {
        if self.cancel.is_cancelled() {
            return Err(EngineError::ShuttingDown);
        }
        let mut seen = HashSet::new();
        for spec in &desired {
            if !seen.insert(spec.name()) {
                return Err(ConfigError::DuplicateApp(spec.name().to_string()).into());
            }
        }

        let _guard = self.reload_lock.lock().await;
        if self.cancel.is_cancelled() {
            return Err(EngineError::ShuttingDown);
        }
        let settings = self.settings();
        let live: HashMap<String, Arc<AppSlot>> = self.apps.read().await.clone();
        let current: HashMap<String, Arc<AppSpec>> = live
            .iter()
            .map(|(name, slot)| (name.clone(), slot.published().spec))
            .collect();

        let plan = plan_reload(&current, &desired);
        info!(
            added = plan.added.len(),
            removed = plan.removed.len(),
            redefined = plan.redefined.len(),
            updated = plan.attributes_changed.len(),
            unchanged = plan.unchanged.len(),
            "applying reload"
        );

        let mut desired: HashMap<String, AppSpec> = desired
            .into_iter()
            .map(|spec| (spec.name().to_string(), spec))
            .collect();
        let mut report = ReloadReport::default();

        for name in &plan.removed {
            if let Some(slot) = live.get(name) {
                report.results.push(self.remove_app(slot, &settings).await);
            }
        }
        for name in &plan.redefined {
            if let (Some(slot), Some(spec)) = (live.get(name), desired.remove(name)) {
                report
                    .results
                    .push(self.redefine_app(slot, spec, &settings).await);
            }
        }
        for name in &plan.attributes_changed {
            if let (Some(slot), Some(spec)) = (live.get(name), desired.remove(name)) {
                report
                    .results
                    .push(self.update_app_attributes(slot, spec, &settings).await);
            }
        }
        for name in &plan.unchanged {
            report
                .results
                .push(AppApplyResult::ok(name, ApplyOutcome::Unchanged));
        }
        for name in &plan.added {
            if let Some(spec) = desired.remove(name) {
                info!(app = %name, vip = %spec.vip(), source = spec.source(), "app added");
                let slot = self.new_slot(Arc::new(spec));
                self.apps.write().await.insert(name.clone(), slot);
                report.results.push(AppApplyResult::ok(name, ApplyOutcome::Added));
            }
        }

        let failed = report.failures().count();
        if failed > 0 {
            warn!(failed, "reload partially applied");
            return Err(EngineError::ReloadApplyFailed(Box::new(report)));
        }
        Ok(report)
    }

    async fn remove_app(&self, slot: &AppSlot, settings: &EngineSettings) -> AppApplyResult {
        let mut rt = slot.runtime.lock().await;
        if rt.announced() {
            let route = rt.spec().route();
            if let Err(e) = self.withdraw_with_retries(&slot.name, &route, settings).await {
                error!(app = %slot.name, error = %e, "removal abandoned, route left announced");
                rt.route_failed(RouteAction::Withdraw, e.to_string());
                slot.publish(&rt);
                return AppApplyResult::failed(&slot.name, e.to_string());
            }
            rt.route_succeeded(RouteAction::Withdraw);
        }
        rt.retire();
        slot.publish(&rt);
        drop(rt);

        self.apps.write().await.remove(&slot.name);
        info!(app = %slot.name, "app removed");
        AppApplyResult::ok(&slot.name, ApplyOutcome::Removed)
    }

    async fn redefine_app(
        &self,
        slot: &AppSlot,
        spec: AppSpec,
        settings: &EngineSettings,
    ) -> AppApplyResult {
        let mut rt = slot.runtime.lock().await;
        if rt.announced() {
            let route = rt.spec().route();
            if let Err(e) = self.withdraw_with_retries(&slot.name, &route, settings).await {
                error!(app = %slot.name, error = %e, "redefinition abandoned, old route left announced");
                rt.route_failed(RouteAction::Withdraw, e.to_string());
                slot.publish(&rt);
                return AppApplyResult::failed(&slot.name, e.to_string());
            }
            rt.route_succeeded(RouteAction::Withdraw);
        }

        info!(app = %slot.name, vip = %spec.vip(), "app redefined, health reset");
        *rt = AppRuntime::new(Arc::new(spec), self.probes.as_ref());
        slot.publish(&rt);
        AppApplyResult::ok(&slot.name, ApplyOutcome::Redefined)
    }

    async fn update_app_attributes(
        &self,
        slot: &AppSlot,
        spec: AppSpec,
        settings: &EngineSettings,
    ) -> AppApplyResult {
        let mut rt = slot.runtime.lock().await;
        let mut result = AppApplyResult::ok(&slot.name, ApplyOutcome::AttributesUpdated);

        if rt.update_attributes(Arc::new(spec)) {
            let route = rt.spec().route();
            match self
                .route_call(RouteAction::Announce, &route, settings.route_timeout)
                .await
            {
                Ok(()) => {
                    rt.attributes_announced();
                    info!(app = %slot.name, route = %route, "route re-announced with new attributes");
                }
                Err(e) => {
                    warn!(app = %slot.name, error = %e, "re-announce failed, retrying on next healthy tick");
                    rt.route_failed(RouteAction::Announce, e.to_string());
                    result.message = Some(format!("re-announce pending: {e}"));
                }
            }
        }
        slot.publish(&rt);
        result
    }
}
