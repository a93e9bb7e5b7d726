// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Ip to mac bindings of one network, learned from ARP and NDP.

use net::Mac;
use ordermap::OrderMap;
use std::net::IpAddr;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArpEntry {
    pub mac: Mac,
    pub last_seen: Instant,
}

#[derive(Debug, Clone)]
pub struct ArpTable {
    timeout: Duration,
    entries: OrderMap<IpAddr, ArpEntry>,
}

impl ArpTable {
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            entries: OrderMap::new(),
        }
    }

    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    pub fn record(&mut self, mac: Mac, ip: IpAddr, now: Instant) {
        self.entries.insert(ip, ArpEntry { mac, last_seen: now });
    }

    #[must_use]
    pub fn lookup(&self, ip: IpAddr) -> Option<Mac> {
        self.entries.get(&ip).map(|e| e.mac)
    }

    #[must_use]
    pub fn lookup_by_mac(&self, mac: Mac) -> Vec<IpAddr> {
        self.entries
            .iter()
            .filter(|(_, e)| e.mac == mac)
            .map(|(ip, _)| *ip)
            .collect()
    }

    pub fn expire(&mut self, now: Instant) {
        let timeout = self.timeout;
        self.entries
            .retain(|_, e| now.saturating_duration_since(e.last_seen) < timeout);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&IpAddr, &ArpEntry)> {
        self.entries.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn both_families_share_the_table() {
        let t0 = Instant::now();
        let mac = Mac([2, 0, 0, 0, 0, 7]);
        let v4: IpAddr = "10.0.0.7".parse().unwrap();
        let v6: IpAddr = "fd00::7".parse().unwrap();
        let mut table = ArpTable::new(Duration::from_secs(10));
        table.record(mac, v4, t0);
        table.record(mac, v6, t0 + Duration::from_secs(5));
        assert_eq!(table.lookup(v4), Some(mac));
        assert_eq!(table.lookup_by_mac(mac), vec![v4, v6]);
        table.expire(t0 + Duration::from_secs(12));
        assert_eq!(table.lookup(v4), None);
        assert_eq!(table.lookup(v6), Some(mac));
    }
}
