// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Fan-out to every interface of a network.

use crate::graph::{EdgeBuilder, EgressId, EgressTable, HandleResult, Node, NodeContext};
use crate::iface::IfaceIndex;
use crate::nodes::resolve::resolve;
use crate::nodes::{BROADCAST_OUTPUT, DEV_OUTPUT, ETHERNET_OUTPUT, FLOOD_OUTPUT};
use crate::pkb::PacketBuffer;
use crate::stats::DropReason;
use net::EthPayload;
use ordermap::OrderSet;

use tracectl::trace_target;
trace_target!("flood", LevelFilter::WARN, &["vswitch", "l2"]);

/// Send `pkb` to every interface of `targets` once, never back to where it came from.
///
/// The first interface gets the packet itself, the others a copy. A packet sent to more than
/// one interface never records a fastpath.
fn fan_out(
    pkb: &mut PacketBuffer,
    ctx: &mut NodeContext<'_>,
    dev: EgressId,
    targets: Vec<IfaceIndex>,
) -> HandleResult {
    let mut sent: OrderSet<IfaceIndex> = pkb.devin.into_iter().collect();
    let outputs: Vec<IfaceIndex> = targets.into_iter().filter(|i| sent.insert(*i)).collect();
    let Some((first, others)) = outputs.split_first() else {
        pkb.debugger.line("no interface to send to");
        return HandleResult::Drop;
    };
    if !others.is_empty() {
        pkb.fastpath = false;
    }
    for iface in others {
        let mut copy = pkb.copy();
        copy.devout = Some(*iface);
        ctx.next(&mut copy, dev);
        ctx.schedule(copy);
    }
    pkb.devout = Some(*first);
    ctx.next(pkb, dev)
}

/// Broadcast to every interface carrying the vni of the packet.
#[derive(Debug, Default)]
pub struct BroadcastOutput {
    dev: EgressId,
}

impl Node for BroadcastOutput {
    fn name(&self) -> &'static str {
        BROADCAST_OUTPUT
    }

    fn init_graph(&self, edges: &mut EdgeBuilder) {
        edges.add(DEV_OUTPUT, "dev", 0);
    }

    fn init_node(&mut self, egresses: &mut EgressTable) {
        self.dev = egresses.resolve("dev");
    }

    fn handle(&self, pkb: &mut PacketBuffer, ctx: &mut NodeContext<'_>) -> HandleResult {
        let vni = pkb.vni;
        let targets = ctx
            .state
            .ifaces()
            .filter(|(_, iface)| iface.local_side_vni(vni) == vni)
            .map(|(index, _)| index)
            .collect();
        fan_out(pkb, ctx, self.dev, targets)
    }
}

/// Flood a unicast frame whose destination is unknown, and try to learn where it lives.
#[derive(Debug, Default)]
pub struct FloodOutput {
    dev: EgressId,
    resolve: EgressId,
}

impl Node for FloodOutput {
    fn name(&self) -> &'static str {
        FLOOD_OUTPUT
    }

    fn init_graph(&self, edges: &mut EdgeBuilder) {
        edges.add(DEV_OUTPUT, "dev", 0);
        edges.add(ETHERNET_OUTPUT, "resolve", 0);
    }

    fn init_node(&mut self, egresses: &mut EgressTable) {
        self.dev = egresses.resolve("dev");
        self.resolve = egresses.resolve("resolve");
    }

    fn handle(&self, pkb: &mut PacketBuffer, ctx: &mut NodeContext<'_>) -> HandleResult {
        if matches!(pkb.frame().payload(), EthPayload::Other { .. }) {
            return ctx.drop(pkb, DropReason::UnknownEtherType);
        }
        let vni = pkb.vni;
        if let Some(dst) = pkb.ip().map(|ip| ip.dst())
            && ctx.state.network(vni).is_some_and(|n| n.contains_ip(dst))
        {
            let known = Some(pkb.frame().dst());
            resolve(ctx, self.resolve, vni, dst, known, &pkb.debugger);
        }
        let targets = ctx
            .state
            .ifaces()
            .filter(|(index, iface)| {
                Some(*index) != pkb.devin
                    && iface.local_side_vni(vni) == vni
                    && iface.params().flood_allowed
            })
            .map(|(index, _)| index)
            .collect();
        fan_out(pkb, ctx, self.dev, targets)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use crate::config::SwitchConfig;
    use crate::iface::IfaceParamsBuilder;
    use crate::nodes::L4_OUTPUT;
    use crate::pkb::{Flow, PacketBuffer};
    use crate::testing::{
        GW1, Host, RecordingIface, ip, mac, sock, tcp_frame, two_networks, udp_frame, vni,
    };
    use net::Mac;
    use net::tcp::TcpFlags;
    use pretty_assertions::assert_eq;
    use std::time::Instant;

    #[test]
    fn unknown_unicast_is_flooded_once_per_interface() {
        let mut switch = two_networks(SwitchConfig::default());
        let x = Host::attach(&mut switch, "x", vni(1), mac(10), ip("10.1.0.10"));
        let y = Host::attach(&mut switch, "y", vni(1), mac(11), ip("10.1.0.11"));
        let z = Host::attach(&mut switch, "z", vni(1), mac(12), ip("10.1.0.12"));

        let frame = udp_frame(x.mac, mac(99), x.addr(5000), sock("192.168.9.9:53"));
        x.send(&mut switch, &frame);

        assert!(x.iface.take().is_empty());
        for host in [&y, &z] {
            let sent = host.iface.take();
            assert_eq!(sent.len(), 1, "{}", host.ip);
            assert_eq!(sent[0].dst(), mac(99));
        }
    }

    #[test]
    fn flooding_skips_closed_interfaces() {
        let mut switch = two_networks(SwitchConfig::default());
        let x = Host::attach(&mut switch, "x", vni(1), mac(10), ip("10.1.0.10"));
        let params = IfaceParamsBuilder::default()
            .flood_allowed(false)
            .build()
            .unwrap();
        let closed = RecordingIface::with("closed", vec![vni(1)], params);
        switch.attach_iface(closed.clone());
        let other = RecordingIface::with("other", vec![vni(2)], Default::default());
        switch.attach_iface(other.clone());

        let frame = udp_frame(x.mac, mac(99), x.addr(5000), sock("192.168.9.9:53"));
        x.send(&mut switch, &frame);

        assert!(closed.take().is_empty());
        assert!(other.take().is_empty());
    }

    #[test]
    fn unknown_neighbor_in_network_is_resolved() {
        let mut switch = two_networks(SwitchConfig::default());
        let x = Host::attach(&mut switch, "x", vni(1), mac(10), ip("10.1.0.10"));
        let y = Host::attach(&mut switch, "y", vni(1), mac(11), ip("10.1.0.11"));

        let frame = udp_frame(x.mac, mac(99), x.addr(5000), sock("10.1.0.99:53"));
        x.send(&mut switch, &frame);

        let sent = y.iface.take();
        assert_eq!(sent.len(), 2);
        assert!(sent.iter().any(|f| f.dst() == mac(99) && f.ip().is_some()));
        let request = sent.iter().find_map(|f| f.arp().map(|arp| (f, arp))).unwrap();
        assert_eq!((request.0.src(), request.0.dst()), (GW1, Mac::BROADCAST));
        assert_eq!(request.1.target_ipv4(), Some("10.1.0.99".parse().unwrap()));
    }

    #[test]
    fn flooded_flow_records_no_fastpath() {
        let mut switch = two_networks(SwitchConfig::default());
        let x = Host::attach(&mut switch, "x", vni(1), mac(10), ip("10.1.0.10"));
        let y = Host::attach(&mut switch, "y", vni(1), mac(11), ip("10.1.0.11"));
        let (local, remote) = (sock("10.1.0.1:80"), sock("10.1.0.50:40000"));
        let now = Instant::now();
        let network = switch.network_mut(vni(1)).unwrap();
        // the neighbor is known, where it lives is not
        network.arp_table.record(mac(50), remote.ip(), now);
        let listener = network.conntrack.listen_tcp(local);
        let entry = network.conntrack.create_tcp(&listener, remote, local, 7, now);

        let frame = tcp_frame(GW1, mac(50), local, remote, TcpFlags::SYN | TcpFlags::ACK, 1, 8);
        let mut pkb = PacketBuffer::from_frame(vni(1), frame);
        pkb.flow = Some(Flow::Tcp(entry.clone()));
        switch.inject(pkb, L4_OUTPUT, now).unwrap();

        for host in [&x, &y] {
            let sent = host.iface.take();
            let segments = sent.iter().filter(|f| f.dst() == mac(50)).count();
            assert_eq!(segments, 1, "{}", host.ip);
        }
        assert!(entry.lock().fastpath.is_none());
    }
}
