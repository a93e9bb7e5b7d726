// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Ethernet switching: mac learning, neighbor snooping and dispatch by destination mac.

use crate::graph::{EdgeBuilder, EgressId, EgressTable, HandleResult, Node, NodeContext};
use crate::network::VirtualNetwork;
use crate::nodes::{
    ARP_BROADCAST_INPUT, ARP_INPUT, BROADCAST_OUTPUT, DEV_OUTPUT, ETHERNET_INPUT, ETHERNET_OUTPUT,
    ETHERNET_REINPUT, FLOOD_OUTPUT, IP_INPUT_ROUTE, LOCAL_BROADCAST_INPUT, LOCAL_UNICAST_INPUT,
    MULTICAST_INPUT, UNICAST_INPUT,
};
use crate::pkb::PacketBuffer;
use crate::stats::DropReason;
use net::arp::Arp;
use net::icmp::{LinkLayerOption, NdpKind};
use net::ip::PROTO_ICMPV6;
use net::{EthPayload, Mac, ParseLevel};
use std::net::IpAddr;
use std::time::Instant;
use tracing::{debug, trace};

use tracectl::trace_target;
trace_target!("ethernet", LevelFilter::WARN, &["vswitch", "l2"]);

#[derive(Debug, Default)]
pub struct EthernetInput {
    unicast: EgressId,
    multicast: EgressId,
}

impl EthernetInput {
    /// Learn neighbors from ARP and NDP traffic crossing the network.
    fn snoop_neighbors(network: &mut VirtualNetwork, pkb: &mut PacketBuffer, now: Instant) {
        let dst = pkb.frame().dst();
        let src = pkb.frame().src();
        let is_icmpv6 = pkb
            .ip()
            .is_some_and(|ip| ip.header.protocol() == PROTO_ICMPV6);
        if is_icmpv6 && pkb.ensure_parsed(ParseLevel::Transport).is_err() {
            return;
        }
        match pkb.frame().payload() {
            EthPayload::Arp(arp) => {
                if arp.protocol_type != Arp::PROTOCOL_IP
                    || !matches!(arp.opcode, Arp::OPCODE_REQUEST | Arp::OPCODE_REPLY)
                {
                    return;
                }
                let Some(ip) = arp.sender_ipv4() else {
                    return;
                };
                // outsiders are only trusted when answering someone directly
                if !network.v4network.contains(&ip)
                    && !(arp.opcode == Arp::OPCODE_REPLY && dst.is_unicast())
                {
                    return;
                }
                trace!("learned {ip} is at {src} from arp");
                network.arp_table.record(src, ip.into(), now);
            }
            EthPayload::Ip(ip) if is_icmpv6 => {
                let Some(nd) = ip.icmp().and_then(|icmp| icmp.neighbor_discovery()) else {
                    return;
                };
                let in_network = network.v6network.is_some_and(|n| n.contains(&nd.target));
                if !in_network && !(nd.kind == NdpKind::Advertisement && dst.is_unicast()) {
                    return;
                }
                let (mac, learned) = match nd.option {
                    Some(LinkLayerOption::Source(mac)) => (mac, ip.src()),
                    Some(LinkLayerOption::Target(mac)) => (mac, IpAddr::V6(nd.target)),
                    None => return,
                };
                if learned.is_unspecified() {
                    return;
                }
                trace!("learned {learned} is at {mac} from ndp");
                network.arp_table.record(mac, learned, now);
            }
            _ => {}
        }
    }
}

impl Node for EthernetInput {
    fn name(&self) -> &'static str {
        ETHERNET_INPUT
    }

    fn init_graph(&self, edges: &mut EdgeBuilder) {
        edges.add(UNICAST_INPUT, "unicast", 0);
        edges.add(MULTICAST_INPUT, "multicast", 0);
    }

    fn init_node(&mut self, egresses: &mut EgressTable) {
        self.unicast = egresses.resolve("unicast");
        self.multicast = egresses.resolve("multicast");
    }

    fn handle(&self, pkb: &mut PacketBuffer, ctx: &mut NodeContext<'_>) -> HandleResult {
        let now = ctx.now();
        let Some(network) = ctx.state.network_mut(pkb.vni) else {
            return ctx.drop(pkb, DropReason::NoNetwork);
        };
        let src = pkb.frame().src();
        if let Some(devin) = pkb.devin
            && src.is_unicast()
        {
            network.mac_table.record(src, devin, now);
        }
        Self::snoop_neighbors(network, pkb, now);
        if pkb.frame().dst().is_unicast() {
            ctx.next(pkb, self.unicast)
        } else {
            ctx.next(pkb, self.multicast)
        }
    }
}

#[derive(Debug, Default)]
pub struct UnicastInput {
    forward: EgressId,
    local: EgressId,
    flood: EgressId,
}

impl Node for UnicastInput {
    fn name(&self) -> &'static str {
        UNICAST_INPUT
    }

    fn init_graph(&self, edges: &mut EdgeBuilder) {
        edges.add(DEV_OUTPUT, "forward", 0);
        edges.add(LOCAL_UNICAST_INPUT, "local", 0);
        edges.add(FLOOD_OUTPUT, "flood", 0);
    }

    fn init_node(&mut self, egresses: &mut EgressTable) {
        self.forward = egresses.resolve("forward");
        self.local = egresses.resolve("local");
        self.flood = egresses.resolve("flood");
    }

    fn handle(&self, pkb: &mut PacketBuffer, ctx: &mut NodeContext<'_>) -> HandleResult {
        let nfi = self.name();
        let dst = pkb.frame().dst();
        let Some(network) = ctx.state.network(pkb.vni) else {
            return ctx.drop(pkb, DropReason::NoNetwork);
        };
        if let Some(iface) = network.mac_table.lookup(dst) {
            if pkb.devin == Some(iface) {
                debug!("{nfi}: {dst} is behind the ingress interface {iface}");
                return ctx.drop(pkb, DropReason::SelfForward);
            }
            pkb.devout = Some(iface);
            return ctx.next(pkb, self.forward);
        }
        let ips = network.ips.lookup_by_mac(dst);
        if !ips.is_empty() {
            pkb.matched_ips = ips;
            return ctx.next(pkb, self.local);
        }
        pkb.debugger.line(format_args!("{dst} is unknown, flooding"));
        ctx.next(pkb, self.flood)
    }
}

/// Frames addressed to one of our macs.
#[derive(Debug, Default)]
pub struct LocalUnicastInput {
    arp: EgressId,
    ip: EgressId,
}

impl Node for LocalUnicastInput {
    fn name(&self) -> &'static str {
        LOCAL_UNICAST_INPUT
    }

    fn init_graph(&self, edges: &mut EdgeBuilder) {
        edges.add(ARP_INPUT, "arp", 0);
        edges.add(IP_INPUT_ROUTE, "ip", 0);
    }

    fn init_node(&mut self, egresses: &mut EgressTable) {
        self.arp = egresses.resolve("arp");
        self.ip = egresses.resolve("ip");
    }

    fn handle(&self, pkb: &mut PacketBuffer, ctx: &mut NodeContext<'_>) -> HandleResult {
        match pkb.frame().payload() {
            EthPayload::Arp(_) => ctx.next(pkb, self.arp),
            EthPayload::Ip(_) => ctx.next(pkb, self.ip),
            EthPayload::Other { .. } => ctx.drop(pkb, DropReason::UnknownEtherType),
        }
    }
}

/// Broadcast and multicast frames: one copy for the switch itself, the frame for the others.
#[derive(Debug, Default)]
pub struct MulticastInput {
    broadcast: EgressId,
    local: EgressId,
}

impl Node for MulticastInput {
    fn name(&self) -> &'static str {
        MULTICAST_INPUT
    }

    fn init_graph(&self, edges: &mut EdgeBuilder) {
        edges.add(BROADCAST_OUTPUT, "broadcast", 0);
        edges.add(LOCAL_BROADCAST_INPUT, "local", 0);
    }

    fn init_node(&mut self, egresses: &mut EgressTable) {
        self.broadcast = egresses.resolve("broadcast");
        self.local = egresses.resolve("local");
    }

    fn handle(&self, pkb: &mut PacketBuffer, ctx: &mut NodeContext<'_>) -> HandleResult {
        let mut local = pkb.copy();
        ctx.next(&mut local, self.local);
        ctx.schedule(local);
        ctx.next(pkb, self.broadcast)
    }
}

/// Hands a broadcast frame to each of our macs in turn.
#[derive(Debug, Default)]
pub struct LocalBroadcastInput {
    arp: EgressId,
    ip: EgressId,
}

impl Node for LocalBroadcastInput {
    fn name(&self) -> &'static str {
        LOCAL_BROADCAST_INPUT
    }

    fn init_graph(&self, edges: &mut EdgeBuilder) {
        edges.add(ARP_BROADCAST_INPUT, "arp", 0);
        edges.add(IP_INPUT_ROUTE, "ip", 0);
    }

    fn init_node(&mut self, egresses: &mut EgressTable) {
        self.arp = egresses.resolve("arp");
        self.ip = egresses.resolve("ip");
    }

    fn handle(&self, pkb: &mut PacketBuffer, ctx: &mut NodeContext<'_>) -> HandleResult {
        let egress = match pkb.frame().payload() {
            EthPayload::Arp(_) => self.arp,
            EthPayload::Ip(_) => self.ip,
            EthPayload::Other { .. } => return HandleResult::Drop,
        };
        let Some(network) = ctx.state.network(pkb.vni) else {
            return ctx.drop(pkb, DropReason::NoNetwork);
        };
        let src = pkb.frame().src();
        let mut owners: Vec<(Mac, Vec<IpAddr>)> = network
            .ips
            .all_macs()
            .into_iter()
            .filter(|mac| *mac != src)
            .map(|mac| (mac, network.ips.lookup_by_mac(mac)))
            .collect();
        let Some((_, last)) = owners.pop() else {
            pkb.debugger.line("no local mac");
            return HandleResult::Drop;
        };
        for (_, ips) in owners {
            let mut copy = pkb.copy();
            copy.matched_ips = ips;
            ctx.next(&mut copy, egress);
            ctx.schedule(copy);
        }
        pkb.matched_ips = last;
        ctx.next(pkb, egress)
    }
}

/// Sends a frame built or routed by the switch according to its destination mac.
#[derive(Debug, Default)]
pub struct EthernetOutput {
    unicast: EgressId,
    local: EgressId,
    flood: EgressId,
    broadcast: EgressId,
    local_broadcast: EgressId,
}

impl Node for EthernetOutput {
    fn name(&self) -> &'static str {
        ETHERNET_OUTPUT
    }

    fn init_graph(&self, edges: &mut EdgeBuilder) {
        edges.add(DEV_OUTPUT, "unicast", 0);
        edges.add(LOCAL_UNICAST_INPUT, "local", 0);
        edges.add(FLOOD_OUTPUT, "flood", 0);
        edges.add(BROADCAST_OUTPUT, "broadcast", 0);
        edges.add(LOCAL_BROADCAST_INPUT, "local-broadcast", 0);
    }

    fn init_node(&mut self, egresses: &mut EgressTable) {
        self.unicast = egresses.resolve("unicast");
        self.local = egresses.resolve("local");
        self.flood = egresses.resolve("flood");
        self.broadcast = egresses.resolve("broadcast");
        self.local_broadcast = egresses.resolve("local-broadcast");
    }

    fn handle(&self, pkb: &mut PacketBuffer, ctx: &mut NodeContext<'_>) -> HandleResult {
        let dst = pkb.frame().dst();
        let Some(network) = ctx.state.network(pkb.vni) else {
            return ctx.drop(pkb, DropReason::NoNetwork);
        };
        if dst.is_unicast() {
            if let Some(iface) = network.mac_table.lookup(dst) {
                pkb.devout = Some(iface);
                return ctx.next(pkb, self.unicast);
            }
            let ips = network.ips.lookup_by_mac(dst);
            if !ips.is_empty() {
                pkb.matched_ips = ips;
                return ctx.next(pkb, self.local);
            }
            return ctx.next(pkb, self.flood);
        }
        let mut local = pkb.copy();
        local.devin = None;
        ctx.next(&mut local, self.local_broadcast);
        ctx.schedule(local);
        ctx.next(pkb, self.broadcast)
    }
}

/// Runs a frame routed into another network through that network's ethernet input.
#[derive(Debug, Default)]
pub struct EthernetReinput {
    ethernet: EgressId,
}

impl Node for EthernetReinput {
    fn name(&self) -> &'static str {
        ETHERNET_REINPUT
    }

    fn init_graph(&self, edges: &mut EdgeBuilder) {
        edges.add(ETHERNET_INPUT, "ethernet", 0);
    }

    fn init_node(&mut self, egresses: &mut EgressTable) {
        self.ethernet = egresses.resolve("ethernet");
    }

    fn handle(&self, pkb: &mut PacketBuffer, ctx: &mut NodeContext<'_>) -> HandleResult {
        pkb.devin = None;
        ctx.next(pkb, self.ethernet)
    }
}
