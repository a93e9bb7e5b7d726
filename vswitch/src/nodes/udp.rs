// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

use crate::graph::{EdgeBuilder, EgressId, EgressTable, HandleResult, Node, NodeContext};
use crate::nodes::{ICMP_PORT_UNREACHABLE_OUTPUT, UDP_INPUT};
use crate::pkb::{Flow, PacketBuffer};
use crate::stats::DropReason;
use net::IpPacket;
use std::net::SocketAddr;
use tracing::debug;

use tracectl::trace_target;
trace_target!("udp", LevelFilter::WARN, &["vswitch", "l4"]);

/// Queues datagrams into the listener of their destination.
#[derive(Debug, Default)]
pub struct UdpInput {
    unreachable: EgressId,
}

impl Node for UdpInput {
    fn name(&self) -> &'static str {
        UDP_INPUT
    }

    fn init_graph(&self, edges: &mut EdgeBuilder) {
        edges.add(ICMP_PORT_UNREACHABLE_OUTPUT, "unreachable", 0);
    }

    fn init_node(&mut self, egresses: &mut EgressTable) {
        self.unreachable = egresses.resolve("unreachable");
    }

    fn pre_handle(&self, pkb: &PacketBuffer) -> HandleResult {
        match pkb.ip().and_then(IpPacket::udp) {
            Some(_) => HandleResult::Pick,
            None => HandleResult::Continue,
        }
    }

    fn handle(&self, pkb: &mut PacketBuffer, ctx: &mut NodeContext<'_>) -> HandleResult {
        let nfi = self.name();
        let Some((remote, local, payload)) = pkb.ip().and_then(|ip| {
            let udp = ip.udp()?;
            Some((
                SocketAddr::new(ip.src(), udp.src_port),
                SocketAddr::new(ip.dst(), udp.dst_port),
                udp.payload.clone(),
            ))
        }) else {
            return ctx.drop(pkb, DropReason::Malformed);
        };
        let now = ctx.now();
        let Some(network) = ctx.state.network_mut(pkb.vni) else {
            return ctx.drop(pkb, DropReason::NoNetwork);
        };
        let Some(listener) = network.conntrack.lookup_udp_listen(local) else {
            debug!("{nfi}: nothing listens on {local}");
            ctx.state.drop_stats.incr(DropReason::NoListener, 1);
            return ctx.next(pkb, self.unreachable);
        };
        let entry = network.conntrack.record_udp(remote, local, &listener, now);
        pkb.flow = Some(Flow::Udp(entry));
        if !listener.lock().store(remote, payload) {
            debug!("{nfi}: receive queue of {local} is full");
            return ctx.drop(pkb, DropReason::QueueFull);
        }
        pkb.debugger.line(format_args!("queued for {local}"));
        HandleResult::Stolen
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use crate::config::SwitchConfig;
    use crate::stats::DropReason;
    use crate::testing::{GW1, Host, ip, mac, sock, two_networks, udp_frame, vni};
    use net::icmp::{V4_DEST_UNREACHABLE, V4_PORT_UNREACHABLE_CODE};
    use pretty_assertions::assert_eq;

    #[test]
    fn datagrams_reach_the_listener() {
        let mut switch = two_networks(SwitchConfig::default());
        let a = Host::attach(&mut switch, "a", vni(1), mac(10), ip("10.1.0.10"));
        let listener = switch
            .network_mut(vni(1))
            .unwrap()
            .conntrack
            .listen_udp(sock("10.1.0.1:53"));

        let frame = udp_frame(a.mac, GW1, a.addr(5000), sock("10.1.0.1:53"));
        a.send(&mut switch, &frame);
        // the second one takes the fast path of the flow recorded by the first
        a.send(&mut switch, &frame);

        let conntrack = &switch.network(vni(1)).unwrap().conntrack;
        assert!(conntrack.lookup_udp(a.addr(5000), sock("10.1.0.1:53")).is_some());
        let mut listener = listener.lock();
        assert_eq!(listener.len(), 2);
        let datagram = listener.recv().unwrap();
        assert_eq!(datagram.remote, a.addr(5000));
        assert_eq!(datagram.payload, b"hello".to_vec());
        assert!(a.iface.take().is_empty());
    }

    #[test]
    fn full_queue_drops() {
        let config = SwitchConfig {
            udp_recv_queue_capacity: 1,
            ..SwitchConfig::default()
        };
        let mut switch = two_networks(config);
        let a = Host::attach(&mut switch, "a", vni(1), mac(10), ip("10.1.0.10"));
        let listener = switch
            .network_mut(vni(1))
            .unwrap()
            .conntrack
            .listen_udp(sock("10.1.0.1:53"));

        let frame = udp_frame(a.mac, GW1, a.addr(5000), sock("10.1.0.1:53"));
        a.send(&mut switch, &frame);
        a.send(&mut switch, &frame);

        assert_eq!(listener.lock().len(), 1);
        assert_eq!(switch.drop_stats().get(DropReason::QueueFull), 1);
    }

    #[test]
    fn closed_port_is_unreachable() {
        let mut switch = two_networks(SwitchConfig::default());
        let a = Host::attach(&mut switch, "a", vni(1), mac(10), ip("10.1.0.10"));

        let frame = udp_frame(a.mac, GW1, a.addr(5000), sock("10.1.0.1:9"));
        a.send(&mut switch, &frame);

        let sent = a.iface.take();
        assert_eq!(sent.len(), 1);
        assert_eq!((sent[0].src(), sent[0].dst()), (GW1, a.mac));
        let packet = sent[0].ip().unwrap();
        assert_eq!((packet.src(), packet.dst()), (ip("10.1.0.1"), a.ip));
        let icmp = packet.icmp().unwrap();
        assert_eq!(
            (icmp.icmp_type, icmp.code),
            (V4_DEST_UNREACHABLE, V4_PORT_UNREACHABLE_CODE)
        );
        // unused word, then the original header
        assert_eq!(icmp.body[4] >> 4, 4);
        assert_eq!(switch.drop_stats().get(DropReason::NoListener), 1);
    }
}
