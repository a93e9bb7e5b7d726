// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Where frames enter and leave the graph.

use crate::graph::{EdgeBuilder, EgressId, EgressTable, HandleResult, Node, NodeContext};
use crate::iface::CsumRecalc;
use crate::network::conntrack::Fastpath;
use crate::nodes::{DEV_INPUT, DEV_OUTPUT, ERROR_DROP, ETHERNET_INPUT, VXLAN_LOOP_DETECT};
use crate::pkb::{Flow, PacketBuffer};
use crate::stats::DropReason;
use net::ParseLevel;
use net::ip::PROTO_TCP;
use net::tcp::TcpFlags;
use std::net::SocketAddr;
use tracing::debug;

use tracectl::trace_target;
trace_target!("dev", LevelFilter::WARN, &["vswitch", "l2"]);

/// Bytes of ip and tcp headers subtracted from the mtu to get the mss.
const MSS_HEADROOM: u16 = 40;

#[derive(Debug, Default)]
pub struct DevInput {
    vxlan: EgressId,
    ethernet: EgressId,
}

impl DevInput {
    // Hand the datagram of a known udp flow to its listener.
    fn deliver_udp(pkb: &mut PacketBuffer, ctx: &mut NodeContext<'_>) -> HandleResult {
        let Some(Flow::Udp(entry)) = &pkb.flow else {
            return ctx.drop(pkb, DropReason::Unhandled);
        };
        let Some((remote, payload)) = pkb.ip().and_then(|ip| {
            let udp = ip.udp()?;
            Some((SocketAddr::new(ip.src(), udp.src_port), udp.payload.clone()))
        }) else {
            return ctx.drop(pkb, DropReason::Malformed);
        };
        let listener = entry.lock().listener.clone();
        if listener.lock().store(remote, payload) {
            pkb.debugger.line("delivered to udp listener");
            HandleResult::Stolen
        } else {
            ctx.drop(pkb, DropReason::QueueFull)
        }
    }
}

impl Node for DevInput {
    fn name(&self) -> &'static str {
        DEV_INPUT
    }

    fn init_graph(&self, edges: &mut EdgeBuilder) {
        edges.add(VXLAN_LOOP_DETECT, "vxlan", 0);
        edges.add(ETHERNET_INPUT, "ethernet", 0);
    }

    fn init_node(&mut self, egresses: &mut EgressTable) {
        self.vxlan = egresses.resolve("vxlan");
        self.ethernet = egresses.resolve("ethernet");
    }

    fn handle(&self, pkb: &mut PacketBuffer, ctx: &mut NodeContext<'_>) -> HandleResult {
        let nfi = self.name();
        if let Some(devin) = pkb.devin {
            let Some(iface) = ctx.state.iface(devin).cloned() else {
                debug!("{nfi}: {devin} is not attached");
                return ctx.drop(pkb, DropReason::IfaceGone);
            };
            if iface.local_side_vrf(pkb.vrf) != pkb.vrf {
                debug!("{nfi}: {} does not carry vrf {}", iface.name(), pkb.vrf);
                return ctx.drop(pkb, DropReason::NoNetwork);
            }
            if iface.params().csum_recalc == CsumRecalc::All
                && pkb.ensure_parsed(ParseLevel::Transport).is_err()
            {
                return ctx.drop(pkb, DropReason::Malformed);
            }
        }
        if ctx.state.network(pkb.vni).is_none() {
            debug!("{nfi}: no network for vni {}", pkb.vni);
            return ctx.drop(pkb, DropReason::NoNetwork);
        }
        if pkb.fastpath {
            pkb.fastpath = false;
            return Self::deliver_udp(pkb, ctx);
        }
        if pkb.vxlan.is_some() {
            ctx.next(pkb, self.vxlan)
        } else {
            ctx.next(pkb, self.ethernet)
        }
    }
}

/// Sends frames out of `pkb.devout`.
#[derive(Debug, Default)]
pub struct DevOutput;

impl DevOutput {
    fn clamp_mss(pkb: &mut PacketBuffer, max: u16) {
        let is_tcp = pkb.ip().is_some_and(|ip| ip.header.protocol() == PROTO_TCP);
        if !is_tcp || pkb.ensure_parsed(ParseLevel::Transport).is_err() {
            return;
        }
        let Some(tcp) = pkb.ip_mut().and_then(|ip| ip.tcp_mut()) else {
            return;
        };
        if !tcp.flags().contains(TcpFlags::SYN) || tcp.mss().is_some_and(|mss| mss <= max) {
            return;
        }
        if let Err(e) = tcp.set_mss(max) {
            debug!("{DEV_OUTPUT}: failed to clamp mss to {max}: {e}");
        }
    }

    fn record_fastpath(pkb: &PacketBuffer) {
        let (Some(flow), Some(iface)) = (&pkb.flow, pkb.devout) else {
            return;
        };
        flow.set_fastpath(Some(Fastpath {
            iface,
            vni: pkb.vni,
            src: pkb.frame().src(),
            dst: pkb.frame().dst(),
        }));
    }
}

impl Node for DevOutput {
    fn name(&self) -> &'static str {
        DEV_OUTPUT
    }

    fn handle(&self, pkb: &mut PacketBuffer, ctx: &mut NodeContext<'_>) -> HandleResult {
        let nfi = self.name();
        let Some(devout) = pkb.devout else {
            debug!("{nfi}: no output interface for {pkb}");
            return ctx.drop(pkb, DropReason::NoEgress);
        };
        let Some(iface) = ctx.state.live_iface(devout).cloned() else {
            debug!("{nfi}: {devout} is gone or disabled");
            return ctx.drop(pkb, DropReason::IfaceGone);
        };
        if pkb.fastpath {
            pkb.fastpath = false;
            Self::record_fastpath(pkb);
            pkb.debugger.line(format_args!("fastpath recorded on {devout}"));
        }
        if let Some(mtu) = iface.params().mtu {
            let max = mtu.saturating_sub(iface.overhead()).saturating_sub(MSS_HEADROOM);
            Self::clamp_mss(pkb, max);
        }
        pkb.debugger.line(format_args!("send to {}", iface.name()));
        iface.send(pkb);
        HandleResult::Stolen
    }
}

/// Sink of all accounted drops.
#[derive(Debug, Default)]
pub struct ErrorDrop;

impl Node for ErrorDrop {
    fn name(&self) -> &'static str {
        ERROR_DROP
    }

    fn handle(&self, pkb: &mut PacketBuffer, ctx: &mut NodeContext<'_>) -> HandleResult {
        let reason = pkb.drop_reason().unwrap_or(DropReason::Unhandled);
        ctx.state.drop_stats.incr(reason, 1);
        debug!("{}: {pkb} dropped: {reason}", self.name());
        HandleResult::Drop
    }
}
