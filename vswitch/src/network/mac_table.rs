// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Learned mac to interface bindings of one network.

use crate::iface::IfaceIndex;
use net::Mac;
use ordermap::OrderMap;
use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MacEntry {
    pub iface: IfaceIndex,
    pub last_seen: Instant,
}

#[derive(Debug, Clone)]
pub struct MacTable {
    timeout: Duration,
    entries: OrderMap<Mac, MacEntry>,
}

impl MacTable {
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

    /// Learn (or refresh) where `mac` lives.
    pub fn record(&mut self, mac: Mac, iface: IfaceIndex, now: Instant) {
        let old = self.entries.insert(mac, MacEntry { iface, last_seen: now });
        if let Some(old) = old
            && old.iface != iface
        {
            debug!("mac {mac} moved from {} to {iface}", old.iface);
        }
    }

    #[must_use]
    pub fn lookup(&self, mac: Mac) -> Option<IfaceIndex> {
        self.entries.get(&mac).map(|e| e.iface)
    }

    /// Forget every mac learned on `iface`.
    pub fn disconnect(&mut self, iface: IfaceIndex) {
        self.entries.retain(|_, e| e.iface != iface);
    }

    /// Evict entries not refreshed within the timeout.
    pub fn expire(&mut self, now: Instant) {
        let timeout = self.timeout;
        self.entries
            .retain(|_, e| now.saturating_duration_since(e.last_seen) < timeout);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Mac, &MacEntry)> {
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
