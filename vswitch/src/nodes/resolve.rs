// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Neighbor resolution: ARP requests for ipv4, neighbor solicitations for ipv6.

use crate::debugger::TraceDebugger;
use crate::graph::{EgressId, NodeContext};
use crate::network::VirtualNetwork;
use crate::pkb::PacketBuffer;
use crate::switch::SwitchState;
use net::arp::Arp;
use net::icmp::{NeighborDiscovery, solicited_node_multicast};
use net::{EthPayload, Frame, IpPacket, Mac, Transport, Vni};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use tracing::debug;

use tracectl::trace_target;
trace_target!("resolve", LevelFilter::WARN, &["vswitch", "neighbor"]);

/// Hop limit mandatory for neighbor discovery messages.
const NDP_HOP_LIMIT: u8 = 255;

/// Ask the network who owns `ip`.
///
/// The request is unicast when `known` is a mac that is still reachable through a live
/// interface, broadcast otherwise. The request enters the graph through `egress`.
pub(crate) fn resolve(
    ctx: &mut NodeContext<'_>,
    egress: EgressId,
    vni: Vni,
    ip: IpAddr,
    known: Option<Mac>,
    debugger: &TraceDebugger,
) {
    let Some(frame) = request_frame(ctx.state, vni, ip, known) else {
        return;
    };
    let mut pkb = PacketBuffer::from_frame(vni, frame);
    pkb.debugger = debugger.fork();
    pkb.debugger.line(format_args!("resolve {ip} in vni {vni}"));
    ctx.next(&mut pkb, egress);
    ctx.schedule(pkb);
}

fn reachable(state: &SwitchState, network: &VirtualNetwork, mac: Mac) -> bool {
    network
        .mac_table
        .lookup(mac)
        .is_some_and(|iface| state.live_iface(iface).is_some())
}

fn request_frame(state: &SwitchState, vni: Vni, ip: IpAddr, known: Option<Mac>) -> Option<Frame> {
    let network = state.network(vni)?;
    let unicast = known.filter(|mac| mac.is_unicast() && reachable(state, network, *mac));
    match ip {
        IpAddr::V4(target) => arp_request(network, target, unicast),
        IpAddr::V6(target) => neighbor_solicitation(network, target, unicast),
    }
}

fn arp_request(network: &VirtualNetwork, target: Ipv4Addr, unicast: Option<Mac>) -> Option<Frame> {
    let Some(src) = network.ips.find_any_ipv4_for_routing() else {
        debug!("vni {}: no ipv4 address to resolve {target} with", network.vni);
        return None;
    };
    let IpAddr::V4(src_ip) = src.ip else {
        return None;
    };
    let request = Arp::request(src.mac, src_ip, target);
    Some(Frame::new(
        src.mac,
        unicast.unwrap_or(Mac::BROADCAST),
        EthPayload::Arp(request),
    ))
}

fn neighbor_solicitation(
    network: &VirtualNetwork,
    target: Ipv6Addr,
    unicast: Option<Mac>,
) -> Option<Frame> {
    let Some(src) = network.ips.find_any_ipv6_for_routing() else {
        debug!("vni {}: no ipv6 address to resolve {target} with", network.vni);
        return None;
    };
    let (dst_ip, dst_mac) = match unicast {
        Some(mac) => (target, mac),
        None => {
            let group = solicited_node_multicast(target);
            (group, Mac::ipv6_multicast(group))
        }
    };
    let ns = NeighborDiscovery::solicitation(target, src.mac).to_icmp();
    let packet = IpPacket::new(src.ip, dst_ip.into(), NDP_HOP_LIMIT, Transport::Icmp(ns))
        .inspect_err(|e| debug!("cannot build solicitation for {target}: {e}"))
        .ok()?;
    Some(Frame::new(src.mac, dst_mac, EthPayload::Ip(packet)))
}
