//! Connection caps per IP, per subnetwork and for inbound connections.

use std::net::{IpAddr, Ipv6Addr, SocketAddr, SocketAddrV6};

use lattice_utils::{DetailType, Direction as StatDirection, StatType, Stats};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Inbound,
    Outbound,
}

/// Normalise an address to IPv6, mapping IPv4 into `::ffff:0:0/96`.
pub fn map_to_v6(addr: SocketAddr) -> SocketAddrV6 {
    match addr {
        SocketAddr::V6(v6) => v6,
        SocketAddr::V4(v4) => SocketAddrV6::new(v4.ip().to_ipv6_mapped(), v4.port(), 0, 0),
    }
}

/// The subnetwork an address counts against: the /64 prefix for IPv6, the
/// whole mapped address for IPv4.
pub fn subnetwork(ip: &Ipv6Addr) -> Ipv6Addr {
    if ip.to_ipv4_mapped().is_some() {
        return *ip;
    }
    let segments = ip.segments();
    Ipv6Addr::new(segments[0], segments[1], segments[2], segments[3], 0, 0, 0, 0)
}

pub fn to_socket_addr(endpoint: SocketAddrV6) -> SocketAddr {
    match endpoint.ip().to_ipv4_mapped() {
        Some(v4) => SocketAddr::new(IpAddr::V4(v4), endpoint.port()),
        None => SocketAddr::V6(endpoint),
    }
}

#[derive(Clone, Debug)]
pub struct ConnectionLimits {
    pub max_inbound: usize,
    pub max_peers_per_ip: usize,
    pub max_peers_per_subnetwork: usize,
    /// Loopback connections ignore the per-IP and per-subnetwork caps.
    pub allow_local_peers: bool,
}

impl ConnectionLimits {
    /// Decide whether a new connection to or from `endpoint` is allowed
    /// given the endpoints already connected. Violations are counted.
    pub fn check<'a>(
        &self,
        endpoint: &SocketAddrV6,
        direction: Direction,
        existing: impl Iterator<Item = (&'a SocketAddrV6, Direction)>,
        stats: &Stats,
    ) -> Result<(), &'static str> {
        let ip = endpoint.ip();
        let subnet = subnetwork(ip);
        let (mut same_ip, mut same_subnet, mut inbound) = (0usize, 0usize, 0usize);
        for (other, other_direction) in existing {
            if other.ip() == ip {
                same_ip += 1;
            }
            if subnetwork(other.ip()) == subnet {
                same_subnet += 1;
            }
            if other_direction == Direction::Inbound {
                inbound += 1;
            }
        }

        let local = self.allow_local_peers && is_loopback(ip);
        if direction == Direction::Inbound && inbound >= self.max_inbound {
            stats.inc_dir(StatType::TcpListener, DetailType::TcpMaxInbound, StatDirection::In);
            return Err("max inbound connections reached");
        }
        if !local && same_ip >= self.max_peers_per_ip {
            stats.inc_dir(StatType::Tcp, DetailType::TcpMaxPerIp, stat_direction(direction));
            return Err("max peers per ip reached");
        }
        if !local && same_subnet >= self.max_peers_per_subnetwork {
            stats.inc_dir(StatType::Tcp, DetailType::TcpMaxPerSubnetwork, stat_direction(direction));
            return Err("max peers per subnetwork reached");
        }
        Ok(())
    }
}

fn stat_direction(direction: Direction) -> StatDirection {
    match direction {
        Direction::Inbound => StatDirection::In,
        Direction::Outbound => StatDirection::Out,
    }
}

fn is_loopback(ip: &Ipv6Addr) -> bool {
    ip.is_loopback() || ip.to_ipv4_mapped().map(|v4| v4.is_loopback()).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, SocketAddrV4};

    fn limits() -> ConnectionLimits {
        ConnectionLimits {
            max_inbound: 3,
            max_peers_per_ip: 2,
            max_peers_per_subnetwork: 3,
            allow_local_peers: false,
        }
    }

    fn v6(last: u16, prefix: u16) -> SocketAddrV6 {
        SocketAddrV6::new(Ipv6Addr::new(0x2001, 0xdb8, prefix, 0, 0, 0, 0, last), 7075, 0, 0)
    }

    #[test]
    fn ipv4_is_mapped() {
        let addr = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::new(10, 1, 2, 3), 80));
        let mapped = map_to_v6(addr);
        assert_eq!(mapped.ip().to_ipv4_mapped(), Some(Ipv4Addr::new(10, 1, 2, 3)));
        assert_eq!(to_socket_addr(mapped), addr);
        assert_eq!(subnetwork(mapped.ip()), *mapped.ip());
    }

    #[test]
    fn subnetwork_is_slash_64() {
        assert_eq!(subnetwork(v6(1, 5).ip()), subnetwork(v6(9, 5).ip()));
        assert_ne!(subnetwork(v6(1, 5).ip()), subnetwork(v6(1, 6).ip()));
    }

    #[test]
    fn per_ip_cap_is_counted() {
        let stats = Stats::new();
        let peer = v6(1, 1);
        let existing = [(peer, Direction::Outbound), (peer, Direction::Outbound)];
        let result = limits().check(
            &peer,
            Direction::Outbound,
            existing.iter().map(|(e, d)| (e, *d)),
            &stats,
        );
        assert!(result.is_err());
        assert_eq!(
            stats.count(StatType::Tcp, DetailType::TcpMaxPerIp, StatDirection::Out),
            1
        );
    }

    #[test]
    fn per_subnetwork_cap_is_counted() {
        let stats = Stats::new();
        let existing = [
            (v6(1, 1), Direction::Outbound),
            (v6(2, 1), Direction::Outbound),
            (v6(3, 1), Direction::Outbound),
        ];
        let result = limits().check(
            &v6(4, 1),
            Direction::Inbound,
            existing.iter().map(|(e, d)| (e, *d)),
            &stats,
        );
        assert!(result.is_err());
        assert_eq!(
            stats.count(StatType::Tcp, DetailType::TcpMaxPerSubnetwork, StatDirection::In),
            1
        );
        // A different /64 is unaffected.
        assert!(limits()
            .check(&v6(4, 2), Direction::Inbound, existing.iter().map(|(e, d)| (e, *d)), &stats)
            .is_ok());
    }

    #[test]
    fn inbound_cap() {
        let stats = Stats::new();
        let existing = [
            (v6(1, 1), Direction::Inbound),
            (v6(1, 2), Direction::Inbound),
            (v6(1, 3), Direction::Inbound),
        ];
        let iter = || existing.iter().map(|(e, d)| (e, *d));
        assert!(limits().check(&v6(1, 4), Direction::Inbound, iter(), &stats).is_err());
        assert!(limits().check(&v6(1, 4), Direction::Outbound, iter(), &stats).is_ok());
    }
}
