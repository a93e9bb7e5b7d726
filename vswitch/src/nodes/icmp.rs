// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Local ip delivery and the icmp messages the switch answers or originates.

use crate::graph::{EdgeBuilder, EgressId, EgressTable, HandleResult, Node, NodeContext};
use crate::nodes::{
    ETHERNET_OUTPUT, ICMP_INPUT, ICMP_NS_INPUT, ICMP_PORT_UNREACHABLE_OUTPUT, IP_INPUT, IP_OUTPUT,
    TCP_INPUT, UDP_INPUT,
};
use crate::pkb::PacketBuffer;
use crate::stats::DropReason;
use net::icmp::{Icmp, NdpKind, NeighborDiscovery};
use net::ip::DEFAULT_HOP_LIMIT;
use net::{EthPayload, Frame, IpPacket, Mac, ParseLevel, Transport};
use std::net::{IpAddr, Ipv6Addr};
use tracing::debug;

use tracectl::trace_target;
trace_target!("icmp", LevelFilter::WARN, &["vswitch", "l4"]);

/// Hop limit mandatory for neighbor discovery messages.
const NDP_HOP_LIMIT: u8 = 255;
const ALL_NODES: Ipv6Addr = Ipv6Addr::new(0xff02, 0, 0, 0, 0, 0, 0, 1);
/// Bytes of the offending packet quoted after its ip header.
const QUOTED_PAYLOAD: usize = 64;

/// The start of `ip` to quote in an icmp error.
pub(crate) fn quote(ip: &IpPacket) -> Vec<u8> {
    let header_len = ip.header.raw_bytes().len();
    let mut bytes = ip.to_bytes().unwrap_or_else(|e| {
        debug!("cannot serialize {} -> {}: {e}", ip.src(), ip.dst());
        ip.header.raw_bytes()
    });
    bytes.truncate(header_len + QUOTED_PAYLOAD);
    bytes
}

// Build an ip reply from `src` to `dst`; the macs are placeholders fixed by ip-output.
fn reply_frame(pkb: &PacketBuffer, src: IpAddr, dst: IpAddr, icmp: Icmp, hop: u8) -> Option<Frame> {
    let packet = IpPacket::new(src, dst, hop, Transport::Icmp(icmp))
        .inspect_err(|e| debug!("cannot build icmp {src} -> {dst}: {e}"))
        .ok()?;
    Some(Frame::new(Mac::ZERO, pkb.frame().src(), EthPayload::Ip(packet)))
}

/// Dispatches packets addressed to the switch by transport protocol.
#[derive(Debug, Default)]
pub struct IpInput {
    l4: EgressId,
}

impl Node for IpInput {
    fn name(&self) -> &'static str {
        IP_INPUT
    }

    fn init_graph(&self, edges: &mut EdgeBuilder) {
        edges.add(ICMP_NS_INPUT, "l4", 0);
        edges.add(ICMP_INPUT, "l4", 1);
        edges.add(TCP_INPUT, "l4", 2);
        edges.add(UDP_INPUT, "l4", 3);
    }

    fn init_node(&mut self, egresses: &mut EgressTable) {
        self.l4 = egresses.resolve("l4");
    }

    fn handle(&self, pkb: &mut PacketBuffer, ctx: &mut NodeContext<'_>) -> HandleResult {
        if let Err(e) = pkb.ensure_parsed(ParseLevel::Transport) {
            debug!("{}: {e}", self.name());
            return ctx.drop(pkb, DropReason::Malformed);
        }
        ctx.next(pkb, self.l4)
    }
}

fn solicitation(pkb: &PacketBuffer) -> Option<NeighborDiscovery> {
    pkb.ip()
        .and_then(IpPacket::icmp)
        .and_then(Icmp::neighbor_discovery)
        .filter(|nd| nd.kind == NdpKind::Solicitation)
}

/// Answers neighbor solicitations for the synthetic ipv6 addresses.
///
/// The advertisement is link local and goes straight back to the requester, it is never
/// routed.
#[derive(Debug, Default)]
pub struct IcmpNsInput {
    output: EgressId,
}

impl Node for IcmpNsInput {
    fn name(&self) -> &'static str {
        ICMP_NS_INPUT
    }

    fn init_graph(&self, edges: &mut EdgeBuilder) {
        edges.add(ETHERNET_OUTPUT, "output", 0);
    }

    fn init_node(&mut self, egresses: &mut EgressTable) {
        self.output = egresses.resolve("output");
    }

    fn pre_handle(&self, pkb: &PacketBuffer) -> HandleResult {
        if solicitation(pkb).is_some() {
            HandleResult::Pick
        } else {
            HandleResult::Continue
        }
    }

    fn handle(&self, pkb: &mut PacketBuffer, ctx: &mut NodeContext<'_>) -> HandleResult {
        let nfi = self.name();
        let (Some(ns), Some(requester)) = (solicitation(pkb), pkb.ip().map(IpPacket::src)) else {
            return ctx.drop(pkb, DropReason::Malformed);
        };
        let target = IpAddr::V6(ns.target);
        let IpAddr::V6(requester) = requester else {
            return ctx.drop(pkb, DropReason::FamilyMismatch);
        };
        if !pkb.matched_ips.contains(&target) {
            pkb.debugger.line(format_args!("{target} is not ours"));
            return HandleResult::Drop;
        }
        let Some(mac) = ctx
            .state
            .network(pkb.vni)
            .and_then(|network| network.ips.lookup(target))
        else {
            return ctx.drop(pkb, DropReason::NoNetwork);
        };
        debug!("{nfi}: {target} is at {mac}");
        let (dst, dst_mac) = if requester.is_unspecified() {
            (ALL_NODES, Mac::ipv6_multicast(ALL_NODES))
        } else {
            (requester, pkb.frame().src())
        };
        let na = NeighborDiscovery::advertisement(ns.target, mac).to_icmp();
        let Some(frame) = reply_frame(pkb, target, dst.into(), na, NDP_HOP_LIMIT) else {
            return ctx.drop(pkb, DropReason::FamilyMismatch);
        };
        pkb.replace_frame(frame);
        pkb.frame_mut().set_src(mac).set_dst(dst_mac);
        pkb.devin = None;
        ctx.next(pkb, self.output)
    }
}

/// Answers echo requests sent to the synthetic ips.
#[derive(Debug, Default)]
pub struct IcmpInput {
    output: EgressId,
}

impl Node for IcmpInput {
    fn name(&self) -> &'static str {
        ICMP_INPUT
    }

    fn init_graph(&self, edges: &mut EdgeBuilder) {
        edges.add(IP_OUTPUT, "output", 0);
    }

    fn init_node(&mut self, egresses: &mut EgressTable) {
        self.output = egresses.resolve("output");
    }

    fn pre_handle(&self, pkb: &PacketBuffer) -> HandleResult {
        match pkb.ip().and_then(IpPacket::icmp) {
            Some(_) => HandleResult::Pick,
            None => HandleResult::Continue,
        }
    }

    fn handle(&self, pkb: &mut PacketBuffer, ctx: &mut NodeContext<'_>) -> HandleResult {
        let Some(ip) = pkb.ip() else {
            return ctx.drop(pkb, DropReason::Malformed);
        };
        let Some(icmp) = ip.icmp() else {
            return ctx.drop(pkb, DropReason::Unhandled);
        };
        if icmp.is_v6() != ip.header.is_v6() {
            return ctx.drop(pkb, DropReason::FamilyMismatch);
        }
        if icmp.is_ndp_ns_or_na() {
            // advertisements were snooped on ethernet-input already
            return HandleResult::Drop;
        }
        if !icmp.is_echo_request() {
            debug!("{}: icmp type {} is not answered", self.name(), icmp.icmp_type);
            return ctx.drop(pkb, DropReason::Unhandled);
        }
        let reply = icmp.echo_reply();
        let (src, dst) = (ip.dst(), ip.src());
        let Some(frame) = reply_frame(pkb, src, dst, reply, DEFAULT_HOP_LIMIT) else {
            return ctx.drop(pkb, DropReason::FamilyMismatch);
        };
        pkb.replace_frame(frame);
        pkb.devin = None;
        ctx.next(pkb, self.output)
    }
}

/// Tells the sender of an undeliverable udp datagram that nothing listens.
#[derive(Debug, Default)]
pub struct IcmpPortUnreachableOutput {
    output: EgressId,
}

impl Node for IcmpPortUnreachableOutput {
    fn name(&self) -> &'static str {
        ICMP_PORT_UNREACHABLE_OUTPUT
    }

    fn init_graph(&self, edges: &mut EdgeBuilder) {
        edges.add(IP_OUTPUT, "output", 0);
    }

    fn init_node(&mut self, egresses: &mut EgressTable) {
        self.output = egresses.resolve("output");
    }

    fn handle(&self, pkb: &mut PacketBuffer, ctx: &mut NodeContext<'_>) -> HandleResult {
        let Some(ip) = pkb.ip() else {
            return ctx.drop(pkb, DropReason::Malformed);
        };
        let unreachable = Icmp::port_unreachable(ip.header.is_v6(), &quote(ip));
        let (src, dst) = (ip.dst(), ip.src());
        let Some(frame) = reply_frame(pkb, src, dst, unreachable, DEFAULT_HOP_LIMIT) else {
            return ctx.drop(pkb, DropReason::FamilyMismatch);
        };
        pkb.replace_frame(frame);
        pkb.devin = None;
        pkb.flow = None;
        ctx.next(pkb, self.output)
    }
}
