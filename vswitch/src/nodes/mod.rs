// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The forwarding nodes and the standard graph they form.

mod arp;
mod dev;
mod ethernet;
mod flood;
mod icmp;
mod l4;
mod resolve;
mod route;
mod tcp;
mod udp;
mod vxlan;

pub use arp::ArpInput;
pub use dev::{DevInput, DevOutput, ErrorDrop};
pub use ethernet::{
    EthernetInput, EthernetOutput, EthernetReinput, LocalBroadcastInput, LocalUnicastInput,
    MulticastInput, UnicastInput,
};
pub use flood::{BroadcastOutput, FloodOutput};
pub use icmp::{IcmpInput, IcmpNsInput, IcmpPortUnreachableOutput, IpInput};
pub use l4::L4Output;
pub use route::{IpInputRoute, IpOutput, IpOutputRoute};
pub use tcp::{TcpInput, TcpReset, TcpStack};
pub use udp::UdpInput;
pub use vxlan::VxlanLoopDetect;

use crate::errors::GraphError;
use crate::graph::{GraphBuilder, Node, NodeGraph};

pub const DEV_INPUT: &str = "dev-input";
pub const DEV_OUTPUT: &str = "dev-output";
pub const ERROR_DROP: &str = crate::graph::ERROR_DROP;
pub const VXLAN_LOOP_DETECT: &str = "vxlan-loop-detect";
pub const ETHERNET_INPUT: &str = "ethernet-input";
pub const ETHERNET_OUTPUT: &str = "ethernet-output";
pub const ETHERNET_REINPUT: &str = "ethernet-reinput";
pub const UNICAST_INPUT: &str = "unicast-input";
pub const LOCAL_UNICAST_INPUT: &str = "local-unicast-input";
pub const MULTICAST_INPUT: &str = "multicast-input";
pub const LOCAL_BROADCAST_INPUT: &str = "local-broadcast-input";
pub const BROADCAST_OUTPUT: &str = "broadcast-output";
pub const FLOOD_OUTPUT: &str = "flood-output";
pub const ARP_INPUT: &str = "arp-input";
pub const ARP_BROADCAST_INPUT: &str = "arp-broadcast-input";
pub const IP_INPUT_ROUTE: &str = "ip-input-route";
pub const IP_OUTPUT_ROUTE: &str = "ip-output-route";
pub const IP_OUTPUT: &str = "ip-output";
pub const IP_INPUT: &str = "ip-input";
pub const ICMP_INPUT: &str = "icmp-input";
pub const ICMP_NS_INPUT: &str = "icmp-ns-input";
pub const ICMP_PORT_UNREACHABLE_OUTPUT: &str = "icmp-port-unreachable-output";
pub const TCP_INPUT: &str = "tcp-input";
pub const TCP_RESET: &str = "tcp-reset";
pub const TCP_STACK: &str = "tcp-stack";
pub const UDP_INPUT: &str = "udp-input";
pub const L4_OUTPUT: &str = "l4-output";

/// All the nodes of the standard graph.
#[must_use]
pub fn standard_nodes() -> Vec<Box<dyn Node>> {
    vec![
        Box::new(DevInput::default()),
        Box::new(VxlanLoopDetect::default()),
        Box::new(EthernetInput::default()),
        Box::new(UnicastInput::default()),
        Box::new(LocalUnicastInput::default()),
        Box::new(MulticastInput::default()),
        Box::new(LocalBroadcastInput::default()),
        Box::new(BroadcastOutput::default()),
        Box::new(FloodOutput::default()),
        Box::new(ArpInput::unicast()),
        Box::new(ArpInput::broadcast()),
        Box::new(IpInputRoute::default()),
        Box::new(IpInput::default()),
        Box::new(IcmpNsInput::default()),
        Box::new(IcmpInput::default()),
        Box::new(IcmpPortUnreachableOutput::default()),
        Box::new(TcpInput::default()),
        Box::new(TcpReset::default()),
        Box::new(TcpStack::default()),
        Box::new(UdpInput::default()),
        Box::new(L4Output::default()),
        Box::new(IpOutput::default()),
        Box::new(IpOutputRoute::default()),
        Box::new(EthernetOutput::default()),
        Box::new(EthernetReinput::default()),
        Box::new(DevOutput::default()),
        Box::new(ErrorDrop),
    ]
}

/// Build the standard graph.
///
/// # Errors
///
/// Fails only if the node set above is inconsistent.
pub fn build_graph() -> Result<NodeGraph, GraphError> {
    let mut builder = GraphBuilder::new();
    for node in standard_nodes() {
        builder.add_node(node)?;
    }
    builder.build()
}
