// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Addresses the switch owns and answers for inside a network.

use crate::errors::NetworkError;
use net::Mac;
use ordermap::{OrderMap, OrderSet};
use std::net::IpAddr;

/// A synthetic ip and the mac it answers with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IpMac {
    pub ip: IpAddr,
    pub mac: Mac,
    /// Whether the address may be used as source when routing.
    pub routing: bool,
}

#[derive(Debug, Clone, Default)]
pub struct SyntheticIps {
    ips: OrderMap<IpAddr, IpMac>,
}

impl SyntheticIps {
    /// Add an address. Range checks are done by the owning network.
    ///
    /// # Errors
    ///
    /// Fails if the address already exists.
    pub fn add(&mut self, ip: IpAddr, mac: Mac, routing: bool) -> Result<IpMac, NetworkError> {
        if self.ips.contains_key(&ip) {
            return Err(NetworkError::DuplicateIp(ip));
        }
        let entry = IpMac { ip, mac, routing };
        self.ips.insert(ip, entry);
        Ok(entry)
    }

    pub fn del(&mut self, ip: IpAddr) -> Option<IpMac> {
        self.ips.remove(&ip)
    }

    #[must_use]
    pub fn lookup(&self, ip: IpAddr) -> Option<Mac> {
        self.ips.get(&ip).map(|e| e.mac)
    }

    /// All addresses answered by `mac`, empty if the mac is not ours.
    #[must_use]
    pub fn lookup_by_mac(&self, mac: Mac) -> Vec<IpAddr> {
        self.ips
            .values()
            .filter(|e| e.mac == mac)
            .map(|e| e.ip)
            .collect()
    }

    pub fn all_ips(&self) -> impl Iterator<Item = IpAddr> + '_ {
        self.ips.keys().copied()
    }

    /// Every distinct mac, in insertion order.
    #[must_use]
    pub fn all_macs(&self) -> OrderSet<Mac> {
        self.ips.values().map(|e| e.mac).collect()
    }

    pub fn all_routable_ips(&self) -> impl Iterator<Item = IpAddr> + '_ {
        self.ips.values().filter(|e| e.routing).map(|e| e.ip)
    }

    #[must_use]
    pub fn find_any_ipv4_for_routing(&self) -> Option<IpMac> {
        self.ips
            .values()
            .find(|e| e.routing && e.ip.is_ipv4())
            .copied()
    }

    #[must_use]
    pub fn find_any_ipv6_for_routing(&self) -> Option<IpMac> {
        self.ips
            .values()
            .find(|e| e.routing && e.ip.is_ipv6())
            .copied()
    }

    /// A routable address of the same family as `dst`.
    #[must_use]
    pub fn find_any_for_routing(&self, dst: IpAddr) -> Option<IpMac> {
        match dst {
            IpAddr::V4(_) => self.find_any_ipv4_for_routing(),
            IpAddr::V6(_) => self.find_any_ipv6_for_routing(),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.ips.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ips.is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn routing_flag_filters_source_candidates() {
        let m1 = Mac([2, 0, 0, 0, 0, 1]);
        let m2 = Mac([2, 0, 0, 0, 0, 2]);
        let mut ips = SyntheticIps::default();
        ips.add("10.0.0.1".parse().unwrap(), m1, false).unwrap();
        ips.add("10.0.0.2".parse().unwrap(), m2, true).unwrap();
        ips.add("fd00::1".parse().unwrap(), m1, true).unwrap();

        assert_eq!(
            ips.find_any_ipv4_for_routing().map(|e| e.mac),
            Some(m2)
        );
        assert_eq!(ips.lookup_by_mac(m1).len(), 2);
        assert_eq!(ips.all_macs().into_iter().collect::<Vec<_>>(), vec![m1, m2]);
        assert_eq!(
            ips.add("10.0.0.2".parse().unwrap(), m1, true),
            Err(NetworkError::DuplicateIp("10.0.0.2".parse().unwrap()))
        );
    }
}
