//! Routing capability trait and speaker settings.

use std::net::IpAddr;

use async_trait::async_trait;
use serde::Serialize;

use vipcast_core::{BgpConfig, Community, ConfigResult, Origin, Route};

use crate::error::RoutingResult;

/// Narrow interface to a routing session.
///
/// Calls are independent per route; implementations serialize their
/// own internal state.
#[async_trait]
pub trait RouteController: Send + Sync {
    /// Configure a neighbor.
    async fn add_peer(&self, peer: IpAddr) -> RoutingResult<()>;

    /// Start advertising `route`. Re-announcing replaces its attributes.
    async fn announce(&self, route: &Route) -> RoutingResult<()>;

    /// Stop advertising `route`. Withdrawing an absent route succeeds.
    async fn withdraw(&self, route: &Route) -> RoutingResult<()>;

    /// Status of the configured peer, if it has been added.
    async fn peer_info(&self) -> RoutingResult<Option<PeerStatus>>;

    /// Shut the peer down and stop the session.
    async fn shutdown(&self) -> RoutingResult<()>;
}

/// Session state of the configured peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PeerState {
    Configured,
    Down,
}

/// Snapshot returned by `peer_info`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PeerStatus {
    pub address: IpAddr,
    pub peer_as: u32,
    pub local_as: u32,
    pub multihop: bool,
    pub state: PeerState,
    /// Number of prefixes currently advertised to the peer.
    pub advertised: usize,
}

/// Speaker-wide settings derived from the `[bgp]` section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpeakerConfig {
    pub local_as: u32,
    pub peer_as: u32,
    pub router_id: IpAddr,
    pub peer_address: IpAddr,
    /// Next hop attached to every path.
    pub next_hop: IpAddr,
    /// Default communities merged into every announced route.
    pub communities: Vec<Community>,
    pub origin: Origin,
}

impl SpeakerConfig {
    pub fn from_bgp(cfg: &BgpConfig) -> ConfigResult<Self> {
        Ok(Self {
            local_as: cfg.local_as,
            peer_as: cfg.remote_as,
            router_id: cfg.local_ip,
            peer_address: cfg.peer_ip,
            next_hop: cfg.local_ip,
            communities: cfg.default_communities()?,
            origin: cfg.origin,
        })
    }

    /// eBGP peers are reached with multihop enabled.
    pub fn multihop(&self) -> bool {
        self.peer_as != self.local_as
    }

    /// Default communities followed by the route's own, without duplicates.
    pub fn merged_communities(&self, route: &Route) -> Vec<Community> {
        let mut merged = self.communities.clone();
        for c in &route.communities {
            if !merged.contains(c) {
                merged.push(*c);
            }
        }
        merged
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bgp() -> BgpConfig {
        BgpConfig {
            local_as: 65001,
            remote_as: 65000,
            local_ip: "192.0.2.10".parse().unwrap(),
            peer_ip: "192.0.2.1".parse().unwrap(),
            communities: vec!["65001:100".to_string()],
            origin: Origin::Igp,
        }
    }

    #[test]
    fn speaker_config_from_bgp() {
        let cfg = SpeakerConfig::from_bgp(&bgp()).unwrap();
        assert!(cfg.multihop());
        assert_eq!(cfg.next_hop, cfg.router_id);
        assert_eq!(cfg.communities, vec![Community::new(65001, 100)]);
    }

    #[test]
    fn ibgp_is_not_multihop() {
        let mut b = bgp();
        b.remote_as = b.local_as;
        assert!(!SpeakerConfig::from_bgp(&b).unwrap().multihop());
    }

    #[test]
    fn bad_default_community_is_rejected() {
        let mut b = bgp();
        b.communities = vec!["oops".to_string()];
        assert!(SpeakerConfig::from_bgp(&b).is_err());
    }

    #[test]
    fn merged_communities_dedup() {
        let cfg = SpeakerConfig::from_bgp(&bgp()).unwrap();
        let route = Route::new(
            "10.0.0.1/32".parse().unwrap(),
            vec![Community::new(65001, 100), Community::new(65001, 200)],
        );
        assert_eq!(
            cfg.merged_communities(&route),
            vec![Community::new(65001, 100), Community::new(65001, 200)]
        );
    }
}
