//! In-process routing information base.
//!
//! `LocalRib` implements `RouteController` without a wire protocol: it
//! keeps the paths that would be advertised to the configured peer and
//! a journal of every call it received. The daemon uses it when no
//! external speaker is attached; tests use its fault injection.

use std::collections::{BTreeSet, HashMap};
use std::net::IpAddr;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use ipnetwork::IpNetwork;
use tracing::{debug, info, warn};

use vipcast_core::{Community, Origin, Route};

use crate::controller::{PeerState, PeerStatus, RouteController, SpeakerConfig};
use crate::error::{RoutingError, RoutingResult};

/// A path as it would be sent to the peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Path {
    pub network: IpNetwork,
    pub communities: Vec<Community>,
    pub next_hop: IpAddr,
    pub origin: Origin,
}

/// One call received by the RIB, successful or not.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RibEvent {
    AddPeer(IpAddr),
    Announce { route: Route, ok: bool },
    Withdraw { route: Route, ok: bool },
    Shutdown,
}

#[derive(Debug, Default)]
struct Faults {
    announces: u32,
    withdraws: u32,
    always_withdraw: bool,
    delay: Option<Duration>,
}

#[derive(Debug, Default)]
struct RibInner {
    peers: BTreeSet<IpAddr>,
    paths: HashMap<IpNetwork, Path>,
    journal: Vec<RibEvent>,
    faults: Faults,
    closed: bool,
}

pub struct LocalRib {
    config: SpeakerConfig,
    inner: Mutex<RibInner>,
}

impl LocalRib {
    pub fn new(config: SpeakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(RibInner::default()),
        }
    }

    pub fn config(&self) -> &SpeakerConfig {
        &self.config
    }

    /// Currently advertised paths, sorted by prefix.
    pub fn paths(&self) -> Vec<Path> {
        let mut paths: Vec<Path> = self.lock().paths.values().cloned().collect();
        paths.sort_by_key(|p| p.network.to_string());
        paths
    }

    pub fn is_advertised(&self, network: IpNetwork) -> bool {
        self.lock().paths.contains_key(&network)
    }

    pub fn events(&self) -> Vec<RibEvent> {
        self.lock().journal.clone()
    }

    /// Announce attempts for `network`, failed ones included.
    pub fn announce_calls(&self, network: IpNetwork) -> usize {
        self.lock()
            .journal
            .iter()
            .filter(|e| matches!(e, RibEvent::Announce { route, .. } if route.network == network))
            .count()
    }

    /// Withdraw attempts for `network`, failed ones included.
    pub fn withdraw_calls(&self, network: IpNetwork) -> usize {
        self.lock()
            .journal
            .iter()
            .filter(|e| matches!(e, RibEvent::Withdraw { route, .. } if route.network == network))
            .count()
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Fail the next `n` announce calls.
    pub fn fail_next_announces(&self, n: u32) {
        self.lock().faults.announces = n;
    }

    /// Fail the next `n` withdraw calls.
    pub fn fail_next_withdraws(&self, n: u32) {
        self.lock().faults.withdraws = n;
    }

    /// Fail every withdraw until turned off.
    pub fn fail_withdraws(&self, on: bool) {
        self.lock().faults.always_withdraw = on;
    }

    /// Delay every announce and withdraw by `delay`.
    pub fn set_delay(&self, delay: Option<Duration>) {
        self.lock().faults.delay = delay;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RibInner> {
        // A poisoned journal is still a usable journal.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn pause(&self) {
        let delay = self.lock().faults.delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }

    fn rejected(route: &Route, reason: &str) -> RoutingError {
        RoutingError::Rejected {
            route: route.network.to_string(),
            reason: reason.to_string(),
        }
    }
}

#[async_trait]
impl RouteController for LocalRib {
    async fn add_peer(&self, peer: IpAddr) -> RoutingResult<()> {
        let mut inner = self.lock();
        if inner.closed {
            return Err(RoutingError::SessionClosed);
        }
        inner.journal.push(RibEvent::AddPeer(peer));
        if inner.peers.insert(peer) {
            info!(%peer, peer_as = self.config.peer_as, multihop = self.config.multihop(), "peer added");
        }
        Ok(())
    }

    async fn announce(&self, route: &Route) -> RoutingResult<()> {
        self.pause().await;
        let mut inner = self.lock();
        if inner.closed {
            return Err(RoutingError::SessionClosed);
        }

        if inner.faults.announces > 0 {
            inner.faults.announces -= 1;
            inner.journal.push(RibEvent::Announce {
                route: route.clone(),
                ok: false,
            });
            warn!(prefix = %route.network, "injected announce failure");
            return Err(Self::rejected(route, "injected failure"));
        }

        // The peer is added on first use, as a speaker would on demand.
        let peer = self.config.peer_address;
        if inner.peers.insert(peer) {
            inner.journal.push(RibEvent::AddPeer(peer));
            debug!(%peer, "peer added on announce");
        }

        let path = Path {
            network: route.network,
            communities: self.config.merged_communities(route),
            next_hop: self.config.next_hop,
            origin: self.config.origin,
        };
        inner.journal.push(RibEvent::Announce {
            route: route.clone(),
            ok: true,
        });
        if inner.paths.insert(route.network, path).is_none() {
            info!(prefix = %route.network, "path announced");
        } else {
            debug!(prefix = %route.network, "path re-announced");
        }
        Ok(())
    }

    async fn withdraw(&self, route: &Route) -> RoutingResult<()> {
        self.pause().await;
        let mut inner = self.lock();
        if inner.closed {
            return Err(RoutingError::SessionClosed);
        }

        let fail = if inner.faults.always_withdraw {
            true
        } else if inner.faults.withdraws > 0 {
            inner.faults.withdraws -= 1;
            true
        } else {
            false
        };
        inner.journal.push(RibEvent::Withdraw {
            route: route.clone(),
            ok: !fail,
        });
        if fail {
            warn!(prefix = %route.network, "injected withdraw failure");
            return Err(Self::rejected(route, "injected failure"));
        }

        if inner.paths.remove(&route.network).is_some() {
            info!(prefix = %route.network, "path withdrawn");
        } else {
            debug!(prefix = %route.network, "withdraw of absent path");
        }
        Ok(())
    }

    async fn peer_info(&self) -> RoutingResult<Option<PeerStatus>> {
        let inner = self.lock();
        let peer = self.config.peer_address;
        if !inner.peers.contains(&peer) {
            return Ok(None);
        }
        Ok(Some(PeerStatus {
            address: peer,
            peer_as: self.config.peer_as,
            local_as: self.config.local_as,
            multihop: self.config.multihop(),
            state: if inner.closed {
                PeerState::Down
            } else {
                PeerState::Configured
            },
            advertised: inner.paths.len(),
        }))
    }

    async fn shutdown(&self) -> RoutingResult<()> {
        let mut inner = self.lock();
        inner.journal.push(RibEvent::Shutdown);
        if inner.closed {
            return Ok(());
        }
        inner.closed = true;
        let remaining = inner.paths.len();
        inner.paths.clear();
        info!(peer = %self.config.peer_address, remaining, "routing session stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn speaker() -> SpeakerConfig {
        SpeakerConfig {
            local_as: 65001,
            peer_as: 65000,
            router_id: "192.0.2.10".parse().unwrap(),
            peer_address: "192.0.2.1".parse().unwrap(),
            next_hop: "192.0.2.10".parse().unwrap(),
            communities: vec![Community::new(65001, 100)],
            origin: Origin::Igp,
        }
    }

    fn route(net: &str) -> Route {
        Route::new(net.parse().unwrap(), vec![Community::new(65001, 200)])
    }

    #[tokio::test]
    async fn announce_adds_peer_and_path() {
        let rib = LocalRib::new(speaker());
        assert!(rib.peer_info().await.unwrap().is_none());

        let r = route("10.0.0.1/32");
        rib.announce(&r).await.unwrap();

        assert!(rib.is_advertised(r.network));
        let paths = rib.paths();
        assert_eq!(paths[0].communities.len(), 2);
        assert_eq!(paths[0].origin, Origin::Igp);

        let peer = rib.peer_info().await.unwrap().unwrap();
        assert_eq!(peer.advertised, 1);
        assert_eq!(peer.state, PeerState::Configured);
        assert!(peer.multihop);
    }

    #[tokio::test]
    async fn duplicate_calls_are_not_errors() {
        let rib = LocalRib::new(speaker());
        let r = route("10.0.0.1/32");
        rib.announce(&r).await.unwrap();
        rib.announce(&r).await.unwrap();
        assert_eq!(rib.paths().len(), 1);

        rib.withdraw(&r).await.unwrap();
        rib.withdraw(&r).await.unwrap();
        assert!(rib.paths().is_empty());
        assert_eq!(rib.announce_calls(r.network), 2);
        assert_eq!(rib.withdraw_calls(r.network), 2);
    }

    #[tokio::test]
    async fn injected_failures_are_counted() {
        let rib = LocalRib::new(speaker());
        let r = route("10.0.0.1/32");

        rib.fail_next_announces(1);
        assert!(rib.announce(&r).await.is_err());
        assert!(!rib.is_advertised(r.network));
        rib.announce(&r).await.unwrap();

        rib.fail_withdraws(true);
        assert!(rib.withdraw(&r).await.is_err());
        assert!(rib.withdraw(&r).await.is_err());
        assert!(rib.is_advertised(r.network));
        rib.fail_withdraws(false);
        rib.withdraw(&r).await.unwrap();

        assert_eq!(rib.announce_calls(r.network), 2);
        assert_eq!(rib.withdraw_calls(r.network), 3);
    }

    #[tokio::test]
    async fn shutdown_closes_session() {
        let rib = LocalRib::new(speaker());
        rib.add_peer(speaker().peer_address).await.unwrap();
        rib.announce(&route("10.0.0.1/32")).await.unwrap();

        rib.shutdown().await.unwrap();
        assert!(rib.is_closed());
        assert!(rib.paths().is_empty());
        assert_eq!(
            rib.announce(&route("10.0.0.2/32")).await,
            Err(RoutingError::SessionClosed)
        );
        let peer = rib.peer_info().await.unwrap().unwrap();
        assert_eq!(peer.state, PeerState::Down);

        // Second shutdown is a no-op.
        rib.shutdown().await.unwrap();
    }
}
