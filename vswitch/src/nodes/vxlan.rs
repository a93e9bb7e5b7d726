// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Loop detection over the vxlan overlay.
//!
//! Every switch bumps the hop counter in the second reserved byte of the vxlan header. Once
//! it exceeds the threshold, two flags in the first reserved field are used as a handshake: the
//! first switch to notice marks the frame as a possible loop, the next one announces it will
//! disconnect, and a switch receiving a frame with both flags set cuts the ingress link.

use crate::graph::{EdgeBuilder, EgressId, EgressTable, HandleResult, Node, NodeContext};
use crate::nodes::{ETHERNET_INPUT, VXLAN_LOOP_DETECT};
use crate::pkb::PacketBuffer;
use crate::stats::DropReason;
use tracing::warn;

use tracectl::trace_target;
trace_target!("vxlan", LevelFilter::WARN, &["vswitch", "l2"]);

pub const POSSIBLE_LOOP: u32 = 0x80_0000;
pub const WILL_DISCONNECT: u32 = 0x40_0000;

#[derive(Debug, Default)]
pub struct VxlanLoopDetect {
    ethernet: EgressId,
}

impl Node for VxlanLoopDetect {
    fn name(&self) -> &'static str {
        VXLAN_LOOP_DETECT
    }

    fn init_graph(&self, edges: &mut EdgeBuilder) {
        edges.add(ETHERNET_INPUT, "ethernet", 0);
    }

    fn init_node(&mut self, egresses: &mut EgressTable) {
        self.ethernet = egresses.resolve("ethernet");
    }

    fn handle(&self, pkb: &mut PacketBuffer, ctx: &mut NodeContext<'_>) -> HandleResult {
        let nfi = self.name();
        let Some(mut vxlan) = pkb.vxlan else {
            return ctx.next(pkb, self.ethernet);
        };
        let mut flags = vxlan.reserved1();
        let hops = vxlan.reserved2();
        if hops > ctx.state.config.loop_detect_threshold {
            let possible = flags & POSSIBLE_LOOP != 0;
            let disconnect = flags & WILL_DISCONNECT != 0;
            if possible && disconnect {
                if let Some(devin) = pkb.devin {
                    warn!("{nfi}: loop detected on {devin} in vni {}, disconnecting", pkb.vni);
                    if let Some(network) = ctx.state.network_mut(pkb.vni) {
                        network.mac_table.disconnect(devin);
                    }
                }
                return ctx.drop(pkb, DropReason::LoopDetected);
            }
            if !possible && !disconnect {
                flags |= POSSIBLE_LOOP;
            } else {
                flags |= POSSIBLE_LOOP | WILL_DISCONNECT;
            }
            pkb.debugger
                .line(format_args!("hops {hops} over threshold, flags now {flags:#08x}"));
        }
        vxlan.set_reserved1(flags).set_reserved2(hops.saturating_add(1));
        pkb.vxlan = Some(vxlan);
        ctx.next(pkb, self.ethernet)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::config::SwitchConfig;
    use crate::testing::{Host, ip, mac, sock, two_networks, udp_frame, vni};
    use net::Vxlan;
    use pretty_assertions::assert_eq;

    fn overlay(flags: u32, hops: u8) -> Vxlan {
        let mut vxlan = Vxlan::new(vni(1));
        vxlan.set_reserved1(flags).set_reserved2(hops);
        vxlan
    }

    #[test]
    fn hop_count_grows_and_flags_escalate() {
        let mut switch = two_networks(SwitchConfig::default());
        let a = Host::attach(&mut switch, "a", vni(1), mac(10), ip("10.1.0.10"));
        let b = Host::attach(&mut switch, "b", vni(1), mac(11), ip("10.1.0.11"));
        let frame = udp_frame(a.mac, b.mac, sock("10.1.0.10:5000"), sock("10.1.0.11:53"));

        a.send_vxlan(&mut switch, &frame, Some(overlay(0, 3)));
        let sent = b.iface.take_with_vxlan();
        assert_eq!(sent.len(), 1);
        let vxlan = sent[0].1.unwrap();
        assert_eq!((vxlan.reserved1(), vxlan.reserved2()), (0, 4));

        a.send_vxlan(&mut switch, &frame, Some(overlay(0, 251)));
        let vxlan = b.iface.take_with_vxlan()[0].1.unwrap();
        assert_eq!((vxlan.reserved1(), vxlan.reserved2()), (POSSIBLE_LOOP, 252));

        a.send_vxlan(&mut switch, &frame, Some(overlay(POSSIBLE_LOOP, 251)));
        let vxlan = b.iface.take_with_vxlan()[0].1.unwrap();
        assert_eq!(vxlan.reserved1(), POSSIBLE_LOOP | WILL_DISCONNECT);

        a.send_vxlan(&mut switch, &frame, Some(overlay(0, u8::MAX)));
        let vxlan = b.iface.take_with_vxlan()[0].1.unwrap();
        assert_eq!(vxlan.reserved2(), u8::MAX);
    }

    #[test]
    fn both_flags_cut_the_ingress_link() {
        let mut switch = two_networks(SwitchConfig::default());
        let a = Host::attach(&mut switch, "a", vni(1), mac(10), ip("10.1.0.10"));
        let b = Host::attach(&mut switch, "b", vni(1), mac(11), ip("10.1.0.11"));
        let frame = udp_frame(a.mac, b.mac, sock("10.1.0.10:5000"), sock("10.1.0.11:53"));

        a.send_vxlan(&mut switch, &frame, Some(overlay(POSSIBLE_LOOP | WILL_DISCONNECT, 251)));
        assert!(b.iface.take().is_empty());
        assert_eq!(switch.drop_stats().get(DropReason::LoopDetected), 1);
        let network = switch.network(vni(1)).unwrap();
        assert_eq!(network.mac_table.lookup(a.mac), None);
        assert_eq!(network.mac_table.lookup(b.mac), Some(b.index));
    }

    #[test]
    fn under_threshold_flags_are_kept() {
        let mut switch = two_networks(SwitchConfig::default());
        let a = Host::attach(&mut switch, "a", vni(1), mac(10), ip("10.1.0.10"));
        let b = Host::attach(&mut switch, "b", vni(1), mac(11), ip("10.1.0.11"));
        let frame = udp_frame(a.mac, b.mac, sock("10.1.0.10:5000"), sock("10.1.0.11:53"));

        a.send_vxlan(&mut switch, &frame, Some(overlay(POSSIBLE_LOOP | WILL_DISCONNECT, 10)));
        let vxlan = b.iface.take_with_vxlan()[0].1.unwrap();
        assert_eq!(vxlan.reserved1(), POSSIBLE_LOOP | WILL_DISCONNECT);
        assert_eq!(vxlan.reserved2(), 11);
        assert_eq!(switch.drop_stats().get(DropReason::LoopDetected), 0);
    }
}
