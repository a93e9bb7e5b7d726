// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Answers ARP requests for the synthetic ips.

use crate::graph::{EdgeBuilder, EgressId, EgressTable, HandleResult, Node, NodeContext};
use crate::nodes::{ARP_BROADCAST_INPUT, ARP_INPUT, ETHERNET_OUTPUT};
use crate::pkb::PacketBuffer;
use crate::stats::DropReason;
use net::arp::Arp;
use net::{EthPayload, Frame};
use std::net::IpAddr;
use tracing::debug;

use tracectl::trace_target;
trace_target!("arp", LevelFilter::WARN, &["vswitch", "neighbor"]);

/// The same logic serves requests sent to one of our macs and broadcast ones; only requests
/// for an ip in `pkb.matched_ips` are answered.
#[derive(Debug)]
pub struct ArpInput {
    name: &'static str,
    output: EgressId,
}

impl ArpInput {
    #[must_use]
    pub fn unicast() -> Self {
        Self {
            name: ARP_INPUT,
            output: EgressId::default(),
        }
    }

    #[must_use]
    pub fn broadcast() -> Self {
        Self {
            name: ARP_BROADCAST_INPUT,
            output: EgressId::default(),
        }
    }
}

impl Node for ArpInput {
    fn name(&self) -> &'static str {
        self.name
    }

    fn init_graph(&self, edges: &mut EdgeBuilder) {
        edges.add(ETHERNET_OUTPUT, "output", 0);
    }

    fn init_node(&mut self, egresses: &mut EgressTable) {
        self.output = egresses.resolve("output");
    }

    fn handle(&self, pkb: &mut PacketBuffer, ctx: &mut NodeContext<'_>) -> HandleResult {
        let nfi = self.name;
        let Some(arp) = pkb.frame().arp() else {
            return ctx.drop(pkb, DropReason::Malformed);
        };
        if arp.opcode != Arp::OPCODE_REQUEST || arp.protocol_type != Arp::PROTOCOL_IP {
            pkb.debugger.line("not an arp request");
            return HandleResult::Drop;
        }
        let (Some(target), Some(sender_ip), Some(sender_mac)) =
            (arp.target_ipv4(), arp.sender_ipv4(), arp.sender_mac())
        else {
            return ctx.drop(pkb, DropReason::Malformed);
        };
        if !pkb.matched_ips.contains(&IpAddr::V4(target)) {
            pkb.debugger.line(format_args!("{target} is not ours"));
            return HandleResult::Drop;
        }
        let Some(mac) = ctx
            .state
            .network(pkb.vni)
            .and_then(|network| network.ips.lookup(target.into()))
        else {
            return ctx.drop(pkb, DropReason::NoNetwork);
        };
        debug!("{nfi}: {target} is at {mac}, answering {sender_ip}");
        let reply = Arp::reply((mac, target), (sender_mac, sender_ip));
        let dst = pkb.frame().src();
        pkb.replace_frame(Frame::new(mac, dst, EthPayload::Arp(reply)));
        pkb.devin = None;
        ctx.next(pkb, self.output)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::config::SwitchConfig;
    use crate::testing::{GW1, Host, arp_request, ip, mac, two_networks, vni};
    use net::Mac;
    use pretty_assertions::assert_eq;

    #[test]
    fn answers_for_synthetic_ip() {
        let mut switch = two_networks(SwitchConfig::default());
        let a = Host::attach(&mut switch, "a", vni(1), mac(10), ip("10.1.0.10"));
        let b = Host::attach(&mut switch, "b", vni(1), mac(11), ip("10.1.0.11"));

        a.send(&mut switch, &arp_request(a.mac, a.ip, ip("10.1.0.1")));

        let replies = a.iface.take();
        assert_eq!(replies.len(), 1);
        assert_eq!((replies[0].src(), replies[0].dst()), (GW1, a.mac));
        let reply = replies[0].arp().unwrap();
        assert_eq!(reply.opcode, Arp::OPCODE_REPLY);
        assert_eq!(reply.sender_mac(), Some(GW1));
        assert_eq!(reply.sender_ipv4(), Some("10.1.0.1".parse().unwrap()));
        assert_eq!(reply.target_ipv4(), Some("10.1.0.10".parse().unwrap()));

        // the request itself is still broadcast to the other hosts
        let flooded = b.iface.take();
        assert_eq!(flooded.len(), 1);
        assert_eq!(flooded[0].dst(), Mac::BROADCAST);
    }

    #[test]
    fn ignores_requests_for_others() {
        let mut switch = two_networks(SwitchConfig::default());
        let a = Host::attach(&mut switch, "a", vni(1), mac(10), ip("10.1.0.10"));

        a.send(&mut switch, &arp_request(a.mac, a.ip, ip("10.1.0.77")));

        assert!(a.iface.take().is_empty());
        assert_eq!(switch.drop_stats().total(), 0);
    }

    #[test]
    fn requests_teach_the_sender() {
        let mut switch = two_networks(SwitchConfig::default());
        let a = Host::attach(&mut switch, "a", vni(1), mac(10), ip("10.1.0.10"));

        a.send(&mut switch, &arp_request(mac(42), ip("10.1.0.42"), ip("10.1.0.1")));

        let network = switch.network(vni(1)).unwrap();
        assert_eq!(network.arp_table.lookup(ip("10.1.0.42")), Some(mac(42)));
        assert_eq!(network.mac_table.lookup(mac(42)), Some(a.index));
    }
}
