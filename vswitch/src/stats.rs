// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Drop accounting

use ahash::RandomState;
use std::collections::HashMap;

/// Why a packet ended in the `error-drop` node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::IntoStaticStr, strum::EnumIter)]
#[strum(serialize_all = "kebab-case")]
pub enum DropReason {
    NoEgress,         /* no candidate accepted the packet on an egress */
    Malformed,        /* a layer failed to parse */
    SelfForward,      /* the destination is behind the ingress interface */
    NoRoute,          /* no route rule or no mac to route with */
    NoNetwork,        /* the vni does not map to a network */
    NdpNotRouted,     /* neighbor discovery is link local */
    NoListener,       /* nothing listens on the destination */
    BacklogFull,      /* syn backlog reached its capacity */
    QueueFull,        /* the receive queue of a listener is full */
    UnknownEtherType, /* neither arp nor ip */
    LoopDetected,     /* the overlay sent the frame back too many times */
    Unhandled,        /* the node has nothing to do with the packet */
    FamilyMismatch,   /* icmp and ip versions do not agree */
    IfaceGone,        /* the output interface was detached or is disabled */
    RouteLoop,        /* networks kept routing the packet to each other */
}

impl std::fmt::Display for DropReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name: &'static str = self.into();
        f.write_str(name)
    }
}

/// Per-reason drop counters.
#[derive(Debug, Clone)]
pub struct DropStats {
    reasons: HashMap<DropReason, u64, RandomState>,
}

impl Default for DropStats {
    fn default() -> Self {
        Self {
            reasons: HashMap::with_hasher(RandomState::with_seed(0)),
        }
    }
}

impl DropStats {
    pub fn incr(&mut self, reason: DropReason, value: u64) {
        self.reasons
            .entry(reason)
            .and_modify(|counter| *counter += value)
            .or_insert(value);
    }

    #[must_use]
    pub fn get(&self, reason: DropReason) -> u64 {
        self.reasons.get(&reason).copied().unwrap_or(0)
    }

    #[must_use]
    pub fn total(&self) -> u64 {
        self.reasons.values().sum()
    }

    /// Iterate over the reasons seen so far, in a stable order.
    pub fn iter(&self) -> impl Iterator<Item = (DropReason, u64)> + '_ {
        use strum::IntoEnumIterator;
        DropReason::iter().filter_map(|r| self.reasons.get(&r).map(|c| (r, *c)))
    }
}
