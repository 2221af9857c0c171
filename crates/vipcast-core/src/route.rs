//! Route model handed to the routing capability.
//!
//! A `Route` is a VIP prefix plus the per-VIP communities attached to
//! it. Engine-wide default communities are merged in by the speaker,
//! not here.

use std::fmt;
use std::str::FromStr;

use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// A standard community, `asn:value` packed as `(asn << 16) | value`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Community(u32);

impl Community {
    pub fn new(asn: u16, value: u16) -> Self {
        Community((u32::from(asn) << 16) | u32::from(value))
    }

    pub fn as_u32(self) -> u32 {
        self.0
    }

    pub fn asn(self) -> u16 {
        (self.0 >> 16) as u16
    }

    pub fn value(self) -> u16 {
        (self.0 & 0xffff) as u16
    }
}

impl FromStr for Community {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ConfigError::InvalidCommunity(s.to_string());
        let (asn, value) = s.trim().split_once(':').ok_or_else(invalid)?;
        let asn = asn.parse::<u16>().map_err(|_| invalid())?;
        let value = value.parse::<u16>().map_err(|_| invalid())?;
        Ok(Community::new(asn, value))
    }
}

impl TryFrom<String> for Community {
    type Error = ConfigError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Community> for String {
    fn from(c: Community) -> Self {
        c.to_string()
    }
}

impl fmt::Display for Community {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.asn(), self.value())
    }
}

/// Parse a list of `asn:value` strings.
pub fn parse_communities(raw: &[String]) -> Result<Vec<Community>, ConfigError> {
    raw.iter().map(|c| c.parse()).collect()
}

/// ORIGIN path attribute.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    Igp,
    Egp,
    #[default]
    Incomplete,
}

impl Origin {
    /// Wire value of the attribute.
    pub fn code(self) -> u8 {
        match self {
            Origin::Igp => 0,
            Origin::Egp => 1,
            Origin::Incomplete => 2,
        }
    }
}

/// A VIP prefix and its per-VIP attributes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub network: IpNetwork,
    pub communities: Vec<Community>,
}

impl Route {
    pub fn new(network: IpNetwork, communities: Vec<Community>) -> Self {
        Self {
            network: normalize(network),
            communities,
        }
    }

    pub fn is_ipv4(&self) -> bool {
        self.network.is_ipv4()
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.network)?;
        if !self.communities.is_empty() {
            let list: Vec<String> = self.communities.iter().map(|c| c.to_string()).collect();
            write!(f, " [{}]", list.join(" "))?;
        }
        Ok(())
    }
}

/// Mask host bits so `10.0.0.5/24` becomes `10.0.0.0/24`.
pub fn normalize(network: IpNetwork) -> IpNetwork {
    IpNetwork::new(network.network(), network.prefix()).unwrap_or(network)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn community_packs_asn_and_value() {
        let c: Community = "111:222".parse().unwrap();
        assert_eq!(c.as_u32(), (111 << 16) | 222);
        assert_eq!(c.asn(), 111);
        assert_eq!(c.value(), 222);
        assert_eq!(c.to_string(), "111:222");
    }

    #[test]
    fn community_rejects_malformed() {
        assert!("111".parse::<Community>().is_err());
        assert!("70000:1".parse::<Community>().is_err());
        assert!("a:b".parse::<Community>().is_err());
        assert!("1:2:3".parse::<Community>().is_err());
    }

    #[test]
    fn origin_codes() {
        assert_eq!(Origin::Igp.code(), 0);
        assert_eq!(Origin::Egp.code(), 1);
        assert_eq!(Origin::default().code(), 2);
    }

    #[test]
    fn route_masks_host_bits() {
        let net: IpNetwork = "10.0.0.5/24".parse().unwrap();
        let route = Route::new(net, vec![]);
        assert_eq!(route.network.to_string(), "10.0.0.0/24");
        assert!(route.is_ipv4());
    }

    #[test]
    fn route_display_lists_communities() {
        let net: IpNetwork = "10.0.0.1/32".parse().unwrap();
        let route = Route::new(net, vec![Community::new(65001, 200)]);
        assert_eq!(route.to_string(), "10.0.0.1/32 [65001:200]");
    }
}
