//! Concurrent probe execution and per-probe tracking.
//!
//! All probes of an application run at once, each bounded by the same
//! timeout. The verdict waits for every probe so that each probe's
//! tracked state stays current, then takes the logical AND.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use futures_util::future::join_all;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use vipcast_core::HealthStatus;

use crate::probe::{Probe, ProbeOutcome, ProbeResult};

/// Run every probe against `target` concurrently.
///
/// Returns one outcome per probe, in probe order. A probe that times
/// out, panics, or is cancelled reports `Unhealthy`.
pub async fn run_all(
    probes: &[Arc<dyn Probe>],
    target: IpAddr,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Vec<ProbeOutcome> {
    let handles: Vec<_> = probes
        .iter()
        .map(|probe| {
            let probe = Arc::clone(probe);
            let cancel = cancel.clone();
            tokio::spawn(async move { run_one(probe.as_ref(), target, timeout, &cancel).await })
        })
        .collect();

    join_all(handles)
        .await
        .into_iter()
        .zip(probes)
        .map(|(joined, probe)| match joined {
            Ok(outcome) => outcome,
            Err(e) if e.is_panic() => {
                warn!(probe = %probe.describe(), "probe panicked");
                ProbeOutcome::unhealthy("probe panicked")
            }
            Err(e) => ProbeOutcome::unhealthy(format!("probe task failed: {e}")),
        })
        .collect()
}

async fn run_one(
    probe: &dyn Probe,
    target: IpAddr,
    timeout: Duration,
    cancel: &CancellationToken,
) -> ProbeOutcome {
    tokio::select! {
        _ = cancel.cancelled() => ProbeOutcome::unhealthy("cancelled"),
        result = tokio::time::timeout(timeout, probe.run(target)) => match result {
            Ok(outcome) => outcome,
            Err(_) => {
                debug!(probe = %probe.describe(), %target, "probe timed out");
                ProbeOutcome::unhealthy(format!("timed out after {timeout:?}"))
            }
        },
    }
}

/// Logical AND of all outcomes. No probes means healthy.
pub fn aggregate(outcomes: &[ProbeOutcome]) -> HealthStatus {
    if outcomes.iter().all(ProbeOutcome::is_healthy) {
        HealthStatus::Healthy
    } else {
        HealthStatus::Unhealthy
    }
}

/// Tracks consecutive results for a single probe.
#[derive(Debug, Clone, Serialize)]
pub struct ProbeTracker {
    /// Probe label, e.g. `port:tcp:80`.
    probe: String,
    /// Result of the most recent run.
    last_result: Option<ProbeResult>,
    /// Failure reason of the most recent run.
    last_reason: Option<String>,
    /// Consecutive failure count.
    consecutive_failures: u32,
    /// Total runs recorded.
    checks: u64,
    /// Wall-clock time of the most recent run, Unix milliseconds.
    last_checked_ms: Option<u64>,
}

impl ProbeTracker {
    pub fn new(probe: String) -> Self {
        Self {
            probe,
            last_result: None,
            last_reason: None,
            consecutive_failures: 0,
            checks: 0,
            last_checked_ms: None,
        }
    }

    /// Record a probe outcome.
    pub fn record(&mut self, outcome: &ProbeOutcome) {
        self.checks += 1;
        self.last_checked_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .ok()
            .and_then(|d| u64::try_from(d.as_millis()).ok());
        self.last_result = Some(outcome.result);
        self.last_reason = outcome.reason.clone();
        match outcome.result {
            ProbeResult::Healthy => {
                if self.consecutive_failures > 0 {
                    debug!(
                        probe = %self.probe,
                        failures = self.consecutive_failures,
                        "probe recovered"
                    );
                }
                self.consecutive_failures = 0;
            }
            ProbeResult::Unhealthy => self.consecutive_failures += 1,
        }
    }

    pub fn probe(&self) -> &str {
        &self.probe
    }

    pub fn last_result(&self) -> Option<ProbeResult> {
        self.last_result
    }

    pub fn last_reason(&self) -> Option<&str> {
        self.last_reason.as_deref()
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn checks(&self) -> u64 {
        self.checks
    }

    pub fn last_checked_ms(&self) -> Option<u64> {
        self.last_checked_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    const TARGET: IpAddr = IpAddr::V4(std::net::Ipv4Addr::LOCALHOST);

    struct Fixed(ProbeResult);

    #[async_trait]
    impl Probe for Fixed {
        fn describe(&self) -> String {
            "fixed".to_string()
        }

        async fn run(&self, _target: IpAddr) -> ProbeOutcome {
            match self.0 {
                ProbeResult::Healthy => ProbeOutcome::healthy(),
                ProbeResult::Unhealthy => ProbeOutcome::unhealthy("fixed failure"),
            }
        }
    }

    struct Hangs;

    #[async_trait]
    impl Probe for Hangs {
        fn describe(&self) -> String {
            "hangs".to_string()
        }

        async fn run(&self, _target: IpAddr) -> ProbeOutcome {
            std::future::pending::<()>().await;
            ProbeOutcome::healthy()
        }
    }

    struct Panics;

    #[async_trait]
    impl Probe for Panics {
        fn describe(&self) -> String {
            "panics".to_string()
        }

        async fn run(&self, _target: IpAddr) -> ProbeOutcome {
            panic!("probe bug");
        }
    }

    #[test]
    fn tracker_starts_empty() {
        let tracker = ProbeTracker::new("port:tcp:80".to_string());
        assert_eq!(tracker.last_result(), None);
        assert_eq!(tracker.consecutive_failures(), 0);
        assert_eq!(tracker.checks(), 0);
        assert_eq!(tracker.last_checked_ms(), None);
    }

    #[test]
    fn tracker_counts_and_resets_failures() {
        let mut tracker = ProbeTracker::new("port:tcp:80".to_string());
        tracker.record(&ProbeOutcome::unhealthy("refused"));
        tracker.record(&ProbeOutcome::unhealthy("refused"));
        assert_eq!(tracker.consecutive_failures(), 2);
        assert_eq!(tracker.last_reason(), Some("refused"));

        tracker.record(&ProbeOutcome::healthy());
        assert_eq!(tracker.consecutive_failures(), 0);
        assert_eq!(tracker.last_result(), Some(ProbeResult::Healthy));
        assert_eq!(tracker.last_reason(), None);
        assert_eq!(tracker.checks(), 3);
        assert!(tracker.last_checked_ms().is_some());
    }

    #[test]
    fn aggregate_is_logical_and() {
        assert_eq!(aggregate(&[]), HealthStatus::Healthy);
        assert_eq!(
            aggregate(&[ProbeOutcome::healthy(), ProbeOutcome::healthy()]),
            HealthStatus::Healthy
        );
        assert_eq!(
            aggregate(&[ProbeOutcome::healthy(), ProbeOutcome::unhealthy("x")]),
            HealthStatus::Unhealthy
        );
    }

    #[tokio::test]
    async fn run_all_keeps_probe_order() {
        let list: Vec<Arc<dyn Probe>> = vec![
            Arc::new(Fixed(ProbeResult::Unhealthy)),
            Arc::new(Fixed(ProbeResult::Healthy)),
        ];
        let outcomes = run_all(&list, TARGET, Duration::from_secs(1), &CancellationToken::new()).await;
        assert_eq!(outcomes.len(), 2);
        assert_eq!(outcomes[0].result, ProbeResult::Unhealthy);
        assert_eq!(outcomes[1].result, ProbeResult::Healthy);
    }

    #[tokio::test(start_paused = true)]
    async fn hung_probe_times_out_without_short_circuit() {
        let list: Vec<Arc<dyn Probe>> = vec![Arc::new(Hangs), Arc::new(Fixed(ProbeResult::Healthy))];
        let outcomes =
            run_all(&list, TARGET, Duration::from_millis(200), &CancellationToken::new()).await;
        assert_eq!(outcomes[0].result, ProbeResult::Unhealthy);
        assert!(outcomes[0].reason.as_ref().unwrap().contains("timed out"));
        assert!(outcomes[1].is_healthy());
        assert_eq!(aggregate(&outcomes), HealthStatus::Unhealthy);
    }

    #[tokio::test]
    async fn panicking_probe_is_contained() {
        let list: Vec<Arc<dyn Probe>> = vec![Arc::new(Panics)];
        let outcomes = run_all(&list, TARGET, Duration::from_secs(1), &CancellationToken::new()).await;
        assert_eq!(outcomes[0], ProbeOutcome::unhealthy("probe panicked"));
    }

    #[tokio::test]
    async fn cancellation_aborts_hung_probe() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let list: Vec<Arc<dyn Probe>> = vec![Arc::new(Hangs)];
        let outcomes = run_all(&list, TARGET, Duration::from_secs(3600), &cancel).await;
        assert_eq!(outcomes[0], ProbeOutcome::unhealthy("cancelled"));
    }
}
