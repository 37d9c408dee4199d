//! Network identifier and per-network timing constants.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Identifies which network a node is connected to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NetworkId {
    /// The production network.
    Live,
    /// The public test network.
    Test,
    /// Local development network.
    Dev,
}

impl NetworkId {
    /// Default port for this network.
    pub fn default_port(&self) -> u16 {
        match self {
            Self::Live => 7075,
            Self::Test => 17075,
            Self::Dev => 44000,
        }
    }

    /// Two magic bytes opening every message header.
    pub fn magic(&self) -> [u8; 2] {
        match self {
            Self::Live => *b"LC",
            Self::Test => *b"LX",
            Self::Dev => *b"LA",
        }
    }

    pub fn from_magic(magic: [u8; 2]) -> Option<Self> {
        [Self::Live, Self::Test, Self::Dev]
            .into_iter()
            .find(|n| n.magic() == magic)
    }

    /// Human-readable name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Live => "live",
            Self::Test => "test",
            Self::Dev => "dev",
        }
    }

    pub fn is_dev(&self) -> bool {
        matches!(self, Self::Dev)
    }
}

impl std::str::FromStr for NetworkId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "live" => Ok(Self::Live),
            "test" => Ok(Self::Test),
            "dev" => Ok(Self::Dev),
            other => Err(format!("unknown network: {other}")),
        }
    }
}

/// Timing and sizing constants that differ between networks.
#[derive(Clone, Debug)]
pub struct NetworkConstants {
    pub network: NetworkId,
    pub default_port: u16,
    /// Round-trip estimate that paces elections and solicitation.
    pub base_latency: Duration,
    pub cleanup_period: Duration,
    pub keepalive_period: Duration,
    /// Close connections without traffic in either direction after this long.
    pub idle_timeout: Duration,
    /// Close connections that never sent anything after this long.
    pub silent_connection_tolerance_time: Duration,
    pub syn_cookie_cutoff: Duration,
    pub max_peers_per_ip: usize,
    pub max_peers_per_subnetwork: usize,
    pub telemetry_cache_cutoff: Duration,
}

impl NetworkConstants {
    pub fn new(network: NetworkId) -> Self {
        let is_dev = network.is_dev();
        let cleanup_period = if is_dev {
            Duration::from_secs(1)
        } else {
            Duration::from_secs(60)
        };
        Self {
            network,
            default_port: network.default_port(),
            base_latency: if is_dev {
                Duration::from_millis(25)
            } else {
                Duration::from_millis(1000)
            },
            cleanup_period,
            keepalive_period: if is_dev {
                Duration::from_secs(1)
            } else {
                Duration::from_secs(15)
            },
            idle_timeout: cleanup_period * 2,
            silent_connection_tolerance_time: Duration::from_secs(120),
            syn_cookie_cutoff: Duration::from_secs(5),
            max_peers_per_ip: if is_dev { 20 } else { 5 },
            max_peers_per_subnetwork: if is_dev { 40 } else { 16 },
            telemetry_cache_cutoff: if is_dev {
                Duration::from_secs(3)
            } else {
                Duration::from_secs(130)
            },
        }
    }

    pub fn dev() -> Self {
        Self::new(NetworkId::Dev)
    }

    pub fn is_dev(&self) -> bool {
        self.network.is_dev()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn magic_roundtrip() {
        for id in [NetworkId::Live, NetworkId::Test, NetworkId::Dev] {
            assert_eq!(NetworkId::from_magic(id.magic()), Some(id));
        }
        assert_eq!(NetworkId::from_magic(*b"ZZ"), None);
    }

    #[test]
    fn dev_network_is_fast() {
        let dev = NetworkConstants::dev();
        let live = NetworkConstants::new(NetworkId::Live);
        assert!(dev.base_latency < live.base_latency);
        assert_eq!(dev.idle_timeout, dev.cleanup_period * 2);
    }

    #[test]
    fn parse_network_name() {
        assert_eq!("test".parse::<NetworkId>(), Ok(NetworkId::Test));
        assert!("main".parse::<NetworkId>().is_err());
    }
}
