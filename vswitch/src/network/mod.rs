// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Virtual networks (VPCs) and their tables.

pub mod arp_table;
pub mod conntrack;
pub mod ips;
pub mod mac_table;
pub mod route_table;

use crate::config::{NetworkConfig, SwitchConfig};
use crate::errors::{ConfigError, NetworkError};
use arp_table::ArpTable;
use conntrack::Conntrack;
use ipnet::{Ipv4Net, Ipv6Net};
use ips::{IpMac, SyntheticIps};
use mac_table::MacTable;
use net::{Mac, Vni};
use rand::Rng;
use route_table::RouteTable;
use std::net::{IpAddr, SocketAddr};
use std::ops::Range;
use std::time::Instant;
use tracing::debug;

use tracectl::trace_target;
trace_target!("network", LevelFilter::WARN, &["vswitch"]);

/// Local ports handed out to flows originated by the switch.
pub const FREE_PORTS: Range<u16> = 30720..32768;
const FREE_PORT_ATTEMPTS: usize = 100;

/// An isolated L2/L3 domain.
#[derive(Debug)]
pub struct VirtualNetwork {
    pub vni: Vni,
    pub v4network: Ipv4Net,
    pub v6network: Option<Ipv6Net>,
    pub mac_table: MacTable,
    pub arp_table: ArpTable,
    pub route_table: RouteTable,
    pub ips: SyntheticIps,
    pub conntrack: Conntrack,
}

impl VirtualNetwork {
    #[must_use]
    pub fn new(
        vni: Vni,
        v4network: Ipv4Net,
        v6network: Option<Ipv6Net>,
        config: &SwitchConfig,
    ) -> Self {
        Self {
            vni,
            v4network,
            v6network,
            mac_table: MacTable::new(config.mac_timeout()),
            arp_table: ArpTable::new(config.arp_timeout()),
            route_table: RouteTable::new(vni, v4network, v6network),
            ips: SyntheticIps::default(),
            conntrack: Conntrack::new(
                config.max_syn_backlog,
                config.udp_recv_queue_capacity,
                config.conntrack_timeout(),
            ),
        }
    }

    /// Build a network with its synthetic ips and routes.
    ///
    /// # Errors
    ///
    /// Fails on an invalid ip or route.
    pub fn from_config(net: &NetworkConfig, config: &SwitchConfig) -> Result<Self, ConfigError> {
        let mut network = Self::new(net.vni, net.v4, net.v6, config);
        for ip in &net.ips {
            network.add_ip(ip.ip, ip.mac, ip.routing)?;
        }
        for route in &net.routes {
            network.route_table.add_rule(route.to_rule()?)?;
        }
        Ok(network)
    }

    /// Whether `ip` is inside one of the network ranges.
    #[must_use]
    pub fn contains_ip(&self, ip: IpAddr) -> bool {
        match ip {
            IpAddr::V4(ip) => self.v4network.contains(&ip),
            IpAddr::V6(ip) => self.v6network.is_some_and(|n| n.contains(&ip)),
        }
    }

    /// Add a synthetic ip.
    ///
    /// # Errors
    ///
    /// Fails if the ip is outside the network or already exists.
    pub fn add_ip(&mut self, ip: IpAddr, mac: Mac, routing: bool) -> Result<IpMac, NetworkError> {
        if !self.contains_ip(ip) {
            return Err(NetworkError::IpOutsideNetwork(ip));
        }
        let entry = self.ips.add(ip, mac, routing)?;
        debug!("vni {}: added synthetic ip {ip} with mac {mac}", self.vni);
        Ok(entry)
    }

    /// The mac answering for `ip`: a learned neighbor first, then our own addresses.
    #[must_use]
    pub fn lookup(&self, ip: IpAddr) -> Option<Mac> {
        self.arp_table.lookup(ip).or_else(|| self.ips.lookup(ip))
    }

    /// A synthetic ip to source routed or generated traffic towards `dst`.
    #[must_use]
    pub fn routed_src(&self, dst: IpAddr) -> Option<IpMac> {
        self.ips.find_any_for_routing(dst)
    }

    /// Evict stale mac, neighbor and connection tracking entries.
    pub fn expire(&mut self, now: Instant) {
        self.mac_table.expire(now);
        self.arp_table.expire(now);
        self.conntrack.expire(now);
    }

    /// A random local port with no tcp listener or connection to `remote`.
    #[must_use]
    pub fn find_free_tcp_port(&self, local: IpAddr, remote: SocketAddr) -> Option<u16> {
        Self::find_free_port(|port| {
            let local = SocketAddr::new(local, port);
            self.conntrack.lookup_tcp_listen(local).is_none()
                && self.conntrack.lookup_tcp(remote, local).is_none()
        })
    }

    /// A random local port with no udp listener or flow to `remote`.
    #[must_use]
    pub fn find_free_udp_port(&self, local: IpAddr, remote: SocketAddr) -> Option<u16> {
        Self::find_free_port(|port| {
            let local = SocketAddr::new(local, port);
            self.conntrack.lookup_udp_listen(local).is_none()
                && self.conntrack.lookup_udp(remote, local).is_none()
        })
    }

    fn find_free_port(is_free: impl Fn(u16) -> bool) -> Option<u16> {
        let mut rng = rand::rng();
        (0..FREE_PORT_ATTEMPTS)
            .map(|_| rng.random_range(FREE_PORTS))
            .find(|port| is_free(*port))
    }
}

impl std::fmt::Display for VirtualNetwork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "vni {} v4 {}", self.vni, self.v4network)?;
        if let Some(v6) = self.v6network {
            write!(f, " v6 {v6}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn network() -> VirtualNetwork {
        VirtualNetwork::new(
            Vni::new_checked(1).unwrap(),
            "10.1.0.0/24".parse().unwrap(),
            Some("fd01::/64".parse().unwrap()),
            &SwitchConfig::default(),
        )
    }

    #[test]
    fn ips_must_be_in_range() {
        let mut net = network();
        let mac = Mac([2, 0, 0, 0, 0, 1]);
        assert!(net.add_ip("10.1.0.1".parse().unwrap(), mac, true).is_ok());
        assert!(net.add_ip("fd01::1".parse().unwrap(), mac, true).is_ok());
        assert_eq!(
            net.add_ip("10.2.0.1".parse().unwrap(), mac, true),
            Err(NetworkError::IpOutsideNetwork("10.2.0.1".parse().unwrap()))
        );
        assert_eq!(
            net.add_ip("10.1.0.1".parse().unwrap(), mac, true),
            Err(NetworkError::DuplicateIp("10.1.0.1".parse().unwrap()))
        );
    }

    #[test]
    fn lookup_prefers_learned_neighbors() {
        let mut net = network();
        let ip: IpAddr = "10.1.0.1".parse().unwrap();
        net.add_ip(ip, Mac([2, 0, 0, 0, 0, 1]), true).unwrap();
        assert_eq!(net.lookup(ip), Some(Mac([2, 0, 0, 0, 0, 1])));
        net.arp_table.record(Mac([2, 0, 0, 0, 0, 9]), ip, Instant::now());
        assert_eq!(net.lookup(ip), Some(Mac([2, 0, 0, 0, 0, 9])));
        assert_eq!(net.lookup("10.1.0.2".parse().unwrap()), None);
    }

    #[test]
    fn free_ports_avoid_listeners() {
        let mut net = network();
        let local: IpAddr = "10.1.0.1".parse().unwrap();
        let remote: SocketAddr = "10.1.0.2:80".parse().unwrap();
        let port = net.find_free_tcp_port(local, remote).unwrap();
        assert!(FREE_PORTS.contains(&port));
        net.conntrack.listen_tcp(SocketAddr::new(local, port));
        for _ in 0..10 {
            assert_ne!(net.find_free_tcp_port(local, remote), Some(port));
        }
        assert!(net.find_free_udp_port(local, remote).is_some());
    }
}
