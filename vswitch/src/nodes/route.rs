// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! IP routing, within a network, across networks and through gateways.

use crate::graph::{EdgeBuilder, EgressId, EgressTable, HandleResult, Node, NodeContext};
use crate::network::route_table::RouteTarget;
use crate::nodes::icmp::quote;
use crate::nodes::resolve::resolve;
use crate::nodes::{
    ETHERNET_OUTPUT, ETHERNET_REINPUT, IP_INPUT, IP_INPUT_ROUTE, IP_OUTPUT, IP_OUTPUT_ROUTE,
};
use crate::pkb::PacketBuffer;
use crate::stats::DropReason;
use net::icmp::Icmp;
use net::ip::{DEFAULT_HOP_LIMIT, PROTO_ICMPV6};
use net::{EthPayload, Frame, IpPacket, Mac, ParseLevel, Transport};
use std::net::IpAddr;
use tracing::debug;

use tracectl::trace_target;
trace_target!("route", LevelFilter::WARN, &["vswitch", "l3"]);

/// Network to network hand-overs a packet may go through before it is considered looping.
pub const MAX_REROUTES: u8 = 16;

/// Egresses shared by the two routing nodes.
#[derive(Debug, Default)]
struct Router {
    output: EgressId,
    reinput: EgressId,
    reroute: EgressId,
    resolve: EgressId,
}

impl Router {
    fn init_graph(edges: &mut EdgeBuilder) {
        edges.add(ETHERNET_OUTPUT, "output", 0);
        edges.add(ETHERNET_REINPUT, "reinput", 0);
        edges.add(IP_OUTPUT_ROUTE, "reroute", 0);
        edges.add(ETHERNET_OUTPUT, "resolve", 0);
    }

    fn init_node(&mut self, egresses: &mut EgressTable) {
        self.output = egresses.resolve("output");
        self.reinput = egresses.resolve("reinput");
        self.reroute = egresses.resolve("reroute");
        self.resolve = egresses.resolve("resolve");
    }

    fn set_macs(pkb: &mut PacketBuffer, src: Mac, dst: Mac) {
        pkb.frame_mut().set_src(src).set_dst(dst);
    }

    /// Resolve `ip` and give up on the packet; the sender will retry once the neighbor
    /// answers.
    fn unresolved(
        &self,
        nfi: &str,
        pkb: &mut PacketBuffer,
        ctx: &mut NodeContext<'_>,
        ip: IpAddr,
    ) -> HandleResult {
        let vni = pkb.vni;
        debug!("{nfi}: {ip} is unknown in vni {vni}, resolving");
        pkb.debugger.line(format_args!("{ip} unresolved"));
        resolve(ctx, self.resolve, vni, ip, None, &pkb.debugger);
        HandleResult::Drop
    }

    /// Route `pkb` with the route table of its network.
    fn route(&self, nfi: &str, pkb: &mut PacketBuffer, ctx: &mut NodeContext<'_>) -> HandleResult {
        let vni = pkb.vni;
        let Some(dst) = pkb.ip().map(IpPacket::dst) else {
            return ctx.drop(pkb, DropReason::Malformed);
        };
        let Some(network) = ctx.state.network(vni) else {
            return ctx.drop(pkb, DropReason::NoNetwork);
        };
        let Some(rule) = network.route_table.lookup(dst) else {
            debug!("{nfi}: no route to {dst} in vni {vni}");
            return ctx.drop(pkb, DropReason::NoRoute);
        };
        pkb.debugger.line(format_args!("route rule {rule}"));
        let target = rule.target;
        match target {
            RouteTarget::Vni(target) if target == vni => {
                let Some(mac) = network.lookup(dst) else {
                    return self.unresolved(nfi, pkb, ctx, dst);
                };
                let Some(src) = network.routed_src(dst) else {
                    return ctx.drop(pkb, DropReason::NoRoute);
                };
                Self::set_macs(pkb, src.mac, mac);
                ctx.next(pkb, self.output)
            }
            RouteTarget::Vni(target) => {
                let Some(target_net) = ctx.state.network(target) else {
                    debug!("{nfi}: route to vni {target} but there is no such network");
                    return ctx.drop(pkb, DropReason::NoNetwork);
                };
                let Some(src) = target_net.routed_src(dst) else {
                    return ctx.drop(pkb, DropReason::NoRoute);
                };
                let direct = target_net
                    .route_table
                    .lookup(dst)
                    .is_some_and(|r| r.is_local_direct(target));
                if !direct {
                    if pkb.reroutes >= MAX_REROUTES {
                        debug!("{nfi}: {dst} keeps being rerouted, last to vni {target}");
                        return ctx.drop(pkb, DropReason::RouteLoop);
                    }
                    pkb.reroutes += 1;
                    // the target network routes it further
                    pkb.set_network(target);
                    pkb.frame_mut().set_src(src.mac);
                    return ctx.next(pkb, self.reroute);
                }
                let Some(mac) = target_net.lookup(dst) else {
                    pkb.set_network(target);
                    return self.unresolved(nfi, pkb, ctx, dst);
                };
                Self::set_macs(pkb, src.mac, mac);
                pkb.set_network(target);
                ctx.next(pkb, self.reinput)
            }
            RouteTarget::Gateway(gateway) => {
                let Some(mac) = network.lookup(gateway) else {
                    return self.unresolved(nfi, pkb, ctx, gateway);
                };
                let Some(src) = network.routed_src(gateway) else {
                    return ctx.drop(pkb, DropReason::NoRoute);
                };
                Self::set_macs(pkb, src.mac, mac);
                ctx.next(pkb, self.output)
            }
        }
    }
}

/// Routes packets received from the network, or delivers them locally.
#[derive(Debug, Default)]
pub struct IpInputRoute {
    input: EgressId,
    router: Router,
}

impl IpInputRoute {
    fn is_ndp(pkb: &mut PacketBuffer) -> Result<bool, DropReason> {
        let is_icmpv6 = pkb
            .ip()
            .is_some_and(|ip| ip.header.protocol() == PROTO_ICMPV6);
        if !is_icmpv6 {
            return Ok(false);
        }
        pkb.ensure_parsed(ParseLevel::Transport)
            .map_err(|_| DropReason::Malformed)?;
        Ok(pkb
            .ip()
            .and_then(IpPacket::icmp)
            .is_some_and(Icmp::is_ndp_ns_or_na))
    }

    /// Answer a packet that ran out of hops with a time exceeded error.
    fn time_exceeded(&self, pkb: &mut PacketBuffer, ctx: &mut NodeContext<'_>) -> HandleResult {
        let Some(ip) = pkb.ip() else {
            return ctx.drop(pkb, DropReason::Malformed);
        };
        let (origin, v6) = (ip.src(), ip.header.is_v6());
        let quoted = quote(ip);
        let Some(src) = ctx
            .state
            .network(pkb.vni)
            .and_then(|network| network.routed_src(origin))
        else {
            return ctx.drop(pkb, DropReason::NoRoute);
        };
        let icmp = Icmp::time_exceeded(v6, &quoted);
        let Ok(packet) = IpPacket::new(src.ip, origin, DEFAULT_HOP_LIMIT, Transport::Icmp(icmp))
        else {
            return ctx.drop(pkb, DropReason::FamilyMismatch);
        };
        let dst = pkb.frame().src();
        pkb.replace_frame(Frame::new(src.mac, dst, EthPayload::Ip(packet)));
        pkb.devin = None;
        ctx.next(pkb, self.router.reroute)
    }
}

impl Node for IpInputRoute {
    fn name(&self) -> &'static str {
        IP_INPUT_ROUTE
    }

    fn init_graph(&self, edges: &mut EdgeBuilder) {
        edges.add(IP_INPUT, "input", 0);
        Router::init_graph(edges);
    }

    fn init_node(&mut self, egresses: &mut EgressTable) {
        self.input = egresses.resolve("input");
        self.router.init_node(egresses);
    }

    fn handle(&self, pkb: &mut PacketBuffer, ctx: &mut NodeContext<'_>) -> HandleResult {
        let nfi = self.name();
        let Some(dst) = pkb.ip().map(IpPacket::dst) else {
            return ctx.drop(pkb, DropReason::Malformed);
        };
        if pkb.matched_ips.contains(&dst) {
            return ctx.next(pkb, self.input);
        }
        let ndp = match Self::is_ndp(pkb) {
            Ok(ndp) => ndp,
            Err(reason) => return ctx.drop(pkb, reason),
        };
        if dst.is_multicast() {
            if ndp {
                return ctx.next(pkb, self.input);
            }
            return ctx.drop(pkb, DropReason::Unhandled);
        }
        if ndp {
            return ctx.drop(pkb, DropReason::NdpNotRouted);
        }
        let Some(ip) = pkb.ip_mut() else {
            return ctx.drop(pkb, DropReason::Malformed);
        };
        let hop_limit = ip.header.hop_limit();
        if hop_limit <= 1 {
            debug!("{nfi}: hop limit exhausted for {dst}");
            return self.time_exceeded(pkb, ctx);
        }
        ip.header.set_hop_limit(hop_limit - 1);
        self.router.route(nfi, pkb, ctx)
    }
}

/// Routes packets originated by the switch.
#[derive(Debug, Default)]
pub struct IpOutputRoute {
    router: Router,
}

impl Node for IpOutputRoute {
    fn name(&self) -> &'static str {
        IP_OUTPUT_ROUTE
    }

    fn init_graph(&self, edges: &mut EdgeBuilder) {
        Router::init_graph(edges);
    }

    fn init_node(&mut self, egresses: &mut EgressTable) {
        self.router.init_node(egresses);
    }

    fn handle(&self, pkb: &mut PacketBuffer, ctx: &mut NodeContext<'_>) -> HandleResult {
        self.router.route(self.name(), pkb, ctx)
    }
}

/// Picks the source mac of a locally built ip packet.
#[derive(Debug, Default)]
pub struct IpOutput {
    route: EgressId,
}

impl Node for IpOutput {
    fn name(&self) -> &'static str {
        IP_OUTPUT
    }

    fn init_graph(&self, edges: &mut EdgeBuilder) {
        edges.add(IP_OUTPUT_ROUTE, "route", 0);
    }

    fn init_node(&mut self, egresses: &mut EgressTable) {
        self.route = egresses.resolve("route");
    }

    fn handle(&self, pkb: &mut PacketBuffer, ctx: &mut NodeContext<'_>) -> HandleResult {
        let Some((src, dst)) = pkb.ip().map(|ip| (ip.src(), ip.dst())) else {
            return ctx.drop(pkb, DropReason::Malformed);
        };
        let Some(network) = ctx.state.network(pkb.vni) else {
            return ctx.drop(pkb, DropReason::NoNetwork);
        };
        let Some(mac) = network
            .ips
            .lookup(src)
            .or_else(|| network.routed_src(dst).map(|ip| ip.mac))
        else {
            debug!("{}: no mac to send from {src}", self.name());
            return ctx.drop(pkb, DropReason::NoRoute);
        };
        pkb.frame_mut().set_src(mac);
        ctx.next(pkb, self.route)
    }
}
