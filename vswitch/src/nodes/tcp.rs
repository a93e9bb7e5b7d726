// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! TCP admission, resets and the passive open handshake.
//!
//! The switch only terminates connections that some local application listens for. A pure SYN
//! to a listener is admitted into its syn backlog and answered with a SYN-ACK; the final ACK
//! moves the connection to the accept backlog. Segments of established connections belong to
//! the application and are stolen from the graph.

use crate::graph::{EdgeBuilder, EgressId, EgressTable, HandleResult, Node, NodeContext};
use crate::network::conntrack::{RCV_MSS, TcpHandle, TcpState};
use crate::nodes::{L4_OUTPUT, TCP_INPUT, TCP_RESET, TCP_STACK};
use crate::pkb::{Flow, PacketBuffer};
use crate::stats::DropReason;
use net::ip::DEFAULT_HOP_LIMIT;
use net::tcp::{Tcp, TcpFlags};
use net::{EthPayload, Frame, IpPacket, Transport};
use std::net::SocketAddr;
use tracing::{debug, warn};

use tracectl::trace_target;
trace_target!("tcp", LevelFilter::WARN, &["vswitch", "l4"]);

const SYN_ACK_WINDOW: u16 = 65535;

/// The (remote, local) addresses of the segment carried by `pkb`.
fn endpoints(pkb: &PacketBuffer) -> Option<(SocketAddr, SocketAddr)> {
    let ip = pkb.ip()?;
    let tcp = ip.tcp()?;
    Some((
        SocketAddr::new(ip.src(), tcp.src_port()),
        SocketAddr::new(ip.dst(), tcp.dst_port()),
    ))
}

/// Swap `pkb`'s frame for a segment from `local` to `remote`, between the same two macs.
fn reply(pkb: &mut PacketBuffer, local: SocketAddr, remote: SocketAddr, tcp: Tcp) -> bool {
    let transport = Transport::Tcp(tcp);
    let packet = match IpPacket::new(local.ip(), remote.ip(), DEFAULT_HOP_LIMIT, transport) {
        Ok(packet) => packet,
        Err(e) => {
            debug!("cannot build tcp {local} -> {remote}: {e}");
            return false;
        }
    };
    let (src, dst) = (pkb.frame().dst(), pkb.frame().src());
    pkb.replace_frame(Frame::new(src, dst, EthPayload::Ip(packet)));
    pkb.devin = None;
    true
}

/// Looks up the connection of a segment, or admits a new one.
#[derive(Debug, Default)]
pub struct TcpInput {
    stack: EgressId,
    reset: EgressId,
}

impl Node for TcpInput {
    fn name(&self) -> &'static str {
        TCP_INPUT
    }

    fn init_graph(&self, edges: &mut EdgeBuilder) {
        edges.add(TCP_STACK, "stack", 0);
        edges.add(TCP_RESET, "reset", 0);
    }

    fn init_node(&mut self, egresses: &mut EgressTable) {
        self.stack = egresses.resolve("stack");
        self.reset = egresses.resolve("reset");
    }

    fn pre_handle(&self, pkb: &PacketBuffer) -> HandleResult {
        match pkb.ip().and_then(IpPacket::tcp) {
            Some(_) => HandleResult::Pick,
            None => HandleResult::Continue,
        }
    }

    fn handle(&self, pkb: &mut PacketBuffer, ctx: &mut NodeContext<'_>) -> HandleResult {
        let nfi = self.name();
        let (Some((remote, local)), Some(flags)) =
            (endpoints(pkb), pkb.ip().and_then(IpPacket::tcp).map(Tcp::flags))
        else {
            return ctx.drop(pkb, DropReason::Malformed);
        };
        let now = ctx.now();
        let Some(network) = ctx.state.network_mut(pkb.vni) else {
            return ctx.drop(pkb, DropReason::NoNetwork);
        };
        let conntrack = &mut network.conntrack;
        if let Some(entry) = conntrack.lookup_tcp(remote, local) {
            entry.lock().last_used = now;
            pkb.flow = Some(Flow::Tcp(entry));
            return ctx.next(pkb, self.stack);
        }
        if flags != TcpFlags::SYN {
            pkb.debugger.line(format_args!("no connection {remote} -> {local}"));
            return ctx.next(pkb, self.reset);
        }
        let Some(listener) = conntrack.lookup_tcp_listen(local) else {
            debug!("{nfi}: nothing listens on {local}");
            ctx.state.drop_stats.incr(DropReason::NoListener, 1);
            return ctx.next(pkb, self.reset);
        };
        if listener.lock().is_syn_backlog_full() {
            warn!("{nfi}: syn backlog of {local} is full, resetting {remote}");
            ctx.state.drop_stats.incr(DropReason::BacklogFull, 1);
            return ctx.next(pkb, self.reset);
        }
        let Some(isn) = pkb.ip().and_then(IpPacket::tcp).map(Tcp::seq) else {
            return ctx.drop(pkb, DropReason::Malformed);
        };
        let entry = conntrack.create_tcp(&listener, remote, local, isn, now);
        debug!("{nfi}: new connection {remote} -> {local}");
        pkb.flow = Some(Flow::Tcp(entry));
        ctx.next(pkb, self.stack)
    }
}

/// Answers a segment with a reset, using nothing but the segment's own fields.
#[derive(Debug, Default)]
pub struct TcpReset {
    output: EgressId,
}

impl Node for TcpReset {
    fn name(&self) -> &'static str {
        TCP_RESET
    }

    fn init_graph(&self, edges: &mut EdgeBuilder) {
        edges.add(L4_OUTPUT, "output", 0);
    }

    fn init_node(&mut self, egresses: &mut EgressTable) {
        self.output = egresses.resolve("output");
    }

    fn handle(&self, pkb: &mut PacketBuffer, ctx: &mut NodeContext<'_>) -> HandleResult {
        let (Some((remote, local)), Some(tcp)) =
            (endpoints(pkb), pkb.ip().and_then(IpPacket::tcp).cloned())
        else {
            return ctx.drop(pkb, DropReason::Malformed);
        };
        let flags = tcp.flags();
        if flags.contains(TcpFlags::RST) {
            pkb.debugger.line("never reset a reset");
            return HandleResult::Drop;
        }
        let ack = tcp
            .seq()
            .wrapping_add(u32::from(flags.contains(TcpFlags::SYN)));
        let mut rst = Tcp::new(local.port(), remote.port(), tcp.ack_number(), ack, 0);
        rst.set_flags(TcpFlags::RST | TcpFlags::ACK);
        if !reply(pkb, local, remote, rst) {
            return ctx.drop(pkb, DropReason::FamilyMismatch);
        }
        pkb.flow = None;
        ctx.next(pkb, self.output)
    }
}

/// The passive side of the three way handshake.
#[derive(Debug, Default)]
pub struct TcpStack {
    output: EgressId,
}

impl TcpStack {
    fn syn_ack(
        &self,
        pkb: &mut PacketBuffer,
        ctx: &mut NodeContext<'_>,
        entry: &TcpHandle,
    ) -> HandleResult {
        let (local, remote, seq, ack) = {
            let e = entry.lock();
            (e.local, e.remote, e.local_isn, e.remote_isn.wrapping_add(1))
        };
        let mut tcp = Tcp::new(local.port(), remote.port(), seq, ack, SYN_ACK_WINDOW);
        tcp.set_flags(TcpFlags::SYN | TcpFlags::ACK);
        if let Err(e) = tcp.set_mss(RCV_MSS) {
            debug!("{}: {e}", self.name());
        }
        if !reply(pkb, local, remote, tcp) {
            return ctx.drop(pkb, DropReason::FamilyMismatch);
        }
        ctx.next(pkb, self.output)
    }
}

impl Node for TcpStack {
    fn name(&self) -> &'static str {
        TCP_STACK
    }

    fn init_graph(&self, edges: &mut EdgeBuilder) {
        edges.add(L4_OUTPUT, "output", 0);
    }

    fn init_node(&mut self, egresses: &mut EgressTable) {
        self.output = egresses.resolve("output");
    }

    fn handle(&self, pkb: &mut PacketBuffer, ctx: &mut NodeContext<'_>) -> HandleResult {
        let nfi = self.name();
        let Some(Flow::Tcp(entry)) = pkb.flow.clone() else {
            return ctx.drop(pkb, DropReason::Unhandled);
        };
        let Some(tcp) = pkb.ip().and_then(IpPacket::tcp) else {
            return ctx.drop(pkb, DropReason::Malformed);
        };
        let (flags, seq, ack) = (tcp.flags(), tcp.seq(), tcp.ack_number());

        if flags.contains(TcpFlags::RST) {
            let (remote, local) = {
                let e = entry.lock();
                (e.remote, e.local)
            };
            if let Some(network) = ctx.state.network_mut(pkb.vni) {
                network.conntrack.remove_tcp(remote, local);
            }
            debug!("{nfi}: {remote} reset the connection");
            return HandleResult::Stolen;
        }

        let mut e = entry.lock();
        let state = e.state;
        match state {
            TcpState::Closed if flags == TcpFlags::SYN => {
                e.local_isn = rand::random::<u32>();
                e.state = TcpState::SynReceived;
                drop(e);
                self.syn_ack(pkb, ctx, &entry)
            }
            TcpState::SynReceived if flags.contains(TcpFlags::SYN) && seq == e.remote_isn => {
                drop(e);
                pkb.debugger.line("syn retransmission");
                self.syn_ack(pkb, ctx, &entry)
            }
            TcpState::SynReceived
                if flags.contains(TcpFlags::ACK) && ack == e.local_isn.wrapping_add(1) =>
            {
                e.state = TcpState::Established;
                let listener = e.listener().cloned();
                debug!("{nfi}: {} -> {} established", e.remote, e.local);
                drop(e);
                if let Some(listener) = listener {
                    listener.lock().establish(&entry);
                }
                HandleResult::Stolen
            }
            TcpState::Established => HandleResult::Stolen,
            state => {
                pkb.debugger
                    .line(format_args!("unexpected {flags:?} in state {state:?}"));
                HandleResult::Drop
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::config::SwitchConfig;
    use crate::switch::Switch;
    use crate::testing::{GW1, Host, ip, mac, sock, tcp_frame, tcp_of, two_networks, vni};
    use pretty_assertions::assert_eq;
    use std::time::{Duration, Instant};

    const SERVICE: &str = "10.1.0.1:80";

    fn listening(config: SwitchConfig) -> (Switch, Host) {
        let mut switch = two_networks(config);
        let a = Host::attach(&mut switch, "a", vni(1), mac(10), ip("10.1.0.10"));
        switch
            .network_mut(vni(1))
            .unwrap()
            .conntrack
            .listen_tcp(sock(SERVICE));
        (switch, a)
    }

    fn syn(host: &Host, port: u16, seq: u32) -> net::Frame {
        tcp_frame(host.mac, GW1, host.addr(port), sock(SERVICE), TcpFlags::SYN, seq, 0)
    }

    #[test]
    fn handshake() {
        let (mut switch, a) = listening(SwitchConfig::default());

        a.send(&mut switch, &syn(&a, 40000, 1000));
        let sent = a.iface.take();
        assert_eq!(sent.len(), 1);
        assert_eq!((sent[0].src(), sent[0].dst()), (GW1, a.mac));
        let syn_ack = tcp_of(&sent[0]);
        assert_eq!(syn_ack.flags(), TcpFlags::SYN | TcpFlags::ACK);
        assert_eq!(syn_ack.ack_number(), 1001);
        assert_eq!(syn_ack.mss(), Some(RCV_MSS));
        let isn = syn_ack.seq();

        let ack = tcp_frame(
            a.mac,
            GW1,
            a.addr(40000),
            sock(SERVICE),
            TcpFlags::ACK,
            1001,
            isn.wrapping_add(1),
        );
        a.send(&mut switch, &ack);
        assert!(a.iface.take().is_empty());

        let conntrack = &switch.network(vni(1)).unwrap().conntrack;
        let entry = conntrack.lookup_tcp(a.addr(40000), sock(SERVICE)).unwrap();
        assert_eq!(entry.lock().state, TcpState::Established);
        let listener = conntrack.lookup_tcp_listen(sock(SERVICE)).unwrap();
        assert_eq!(listener.lock().syn_backlog_len(), 0);
        assert!(listener.lock().accept().is_some());
    }

    #[test]
    fn full_syn_backlog_resets() {
        let config = SwitchConfig {
            max_syn_backlog: 2,
            ..SwitchConfig::default()
        };
        let (mut switch, a) = listening(config);

        for port in 40000..40003 {
            a.send(&mut switch, &syn(&a, port, 7));
        }
        let sent = a.iface.take();
        let flags: Vec<TcpFlags> = sent.iter().map(|f| tcp_of(f).flags()).collect();
        assert_eq!(
            flags,
            vec![
                TcpFlags::SYN | TcpFlags::ACK,
                TcpFlags::SYN | TcpFlags::ACK,
                TcpFlags::RST | TcpFlags::ACK,
            ]
        );
        let rst = tcp_of(&sent[2]);
        assert_eq!((rst.seq(), rst.ack_number()), (0, 8));
        assert_eq!(rst.dst_port(), 40002);

        let conntrack = &switch.network(vni(1)).unwrap().conntrack;
        let listener = conntrack.lookup_tcp_listen(sock(SERVICE)).unwrap();
        assert_eq!(listener.lock().syn_backlog_len(), 2);
        assert_eq!(switch.drop_stats().get(DropReason::BacklogFull), 1);
    }

    #[test]
    fn no_listener_resets() {
        let mut switch = two_networks(SwitchConfig::default());
        let a = Host::attach(&mut switch, "a", vni(1), mac(10), ip("10.1.0.10"));

        a.send(&mut switch, &syn(&a, 40000, 99));
        let sent = a.iface.take();
        assert_eq!(sent.len(), 1);
        let rst = tcp_of(&sent[0]);
        assert_eq!(rst.flags(), TcpFlags::RST | TcpFlags::ACK);
        assert_eq!(rst.ack_number(), 100);
        assert_eq!(switch.drop_stats().get(DropReason::NoListener), 1);

        // a reset is never answered
        let rst = tcp_frame(a.mac, GW1, a.addr(40000), sock(SERVICE), TcpFlags::RST, 100, 0);
        a.send(&mut switch, &rst);
        assert!(a.iface.take().is_empty());
    }

    #[test]
    fn reset_removes_the_connection() {
        let (mut switch, a) = listening(SwitchConfig::default());
        a.send(&mut switch, &syn(&a, 40000, 1000));
        a.iface.take();

        let rst = tcp_frame(a.mac, GW1, a.addr(40000), sock(SERVICE), TcpFlags::RST, 1001, 0);
        a.send(&mut switch, &rst);

        assert!(a.iface.take().is_empty());
        let conntrack = &switch.network(vni(1)).unwrap().conntrack;
        assert!(conntrack.lookup_tcp(a.addr(40000), sock(SERVICE)).is_none());
        let listener = conntrack.lookup_tcp_listen(sock(SERVICE)).unwrap();
        assert_eq!(listener.lock().syn_backlog_len(), 0);
    }

    #[test]
    fn stale_fastpath_is_replaced() {
        let (mut switch, a) = listening(SwitchConfig::default());
        a.send(&mut switch, &syn(&a, 40000, 1000));
        assert_eq!(a.iface.take().len(), 1);
        let entry = switch
            .network(vni(1))
            .unwrap()
            .conntrack
            .lookup_tcp(a.addr(40000), sock(SERVICE))
            .unwrap();
        assert_eq!(entry.lock().fastpath.map(|f| f.iface), Some(a.index));

        // the host moves to another interface and retransmits its syn
        switch.detach_iface(a.index);
        let moved = Host::attach(&mut switch, "moved", vni(1), a.mac, a.ip);
        moved.send(&mut switch, &syn(&moved, 40000, 1000));

        let sent = moved.iface.take();
        assert_eq!(sent.len(), 1);
        assert_eq!(tcp_of(&sent[0]).flags(), TcpFlags::SYN | TcpFlags::ACK);
        assert!(a.iface.take().is_empty());
        assert_eq!(entry.lock().fastpath.map(|f| f.iface), Some(moved.index));
    }

    #[test]
    fn fastpath_follows_a_host_moving_between_live_interfaces() {
        let (mut switch, a) = listening(SwitchConfig::default());
        a.send(&mut switch, &syn(&a, 40000, 1000));
        assert_eq!(a.iface.take().len(), 1);

        // the old interface stays attached
        let moved = Host::attach(&mut switch, "moved", vni(1), a.mac, a.ip);
        moved.send(&mut switch, &syn(&moved, 40000, 1000));

        assert!(a.iface.take().is_empty());
        let sent = moved.iface.take();
        assert_eq!(sent.len(), 1);
        assert_eq!(tcp_of(&sent[0]).flags(), TcpFlags::SYN | TcpFlags::ACK);
        let entry = switch
            .network(vni(1))
            .unwrap()
            .conntrack
            .lookup_tcp(a.addr(40000), sock(SERVICE))
            .unwrap();
        assert_eq!(entry.lock().fastpath.map(|f| f.iface), Some(moved.index));
    }

    #[test]
    fn idle_half_open_connections_free_the_syn_backlog() {
        let config = SwitchConfig {
            max_syn_backlog: 1,
            conntrack_timeout: 1000,
            ..SwitchConfig::default()
        };
        let (mut switch, a) = listening(config);

        a.send(&mut switch, &syn(&a, 40000, 7));
        a.send(&mut switch, &syn(&a, 40001, 7));
        let flags: Vec<TcpFlags> = a.iface.take().iter().map(|f| tcp_of(f).flags()).collect();
        assert_eq!(
            flags,
            vec![TcpFlags::SYN | TcpFlags::ACK, TcpFlags::RST | TcpFlags::ACK]
        );

        switch.expire(Instant::now() + Duration::from_secs(2));
        let conntrack = &switch.network(vni(1)).unwrap().conntrack;
        assert!(conntrack.lookup_tcp(a.addr(40000), sock(SERVICE)).is_none());

        a.send(&mut switch, &syn(&a, 40001, 7));
        let sent = a.iface.take();
        assert_eq!(sent.len(), 1);
        assert_eq!(tcp_of(&sent[0]).flags(), TcpFlags::SYN | TcpFlags::ACK);
    }
}
