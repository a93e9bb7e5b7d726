// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The per-packet context threaded through the node graph.

use crate::debugger::TraceDebugger;
use crate::graph::NodeId;
use crate::iface::IfaceIndex;
use crate::network::conntrack::{Fastpath, TcpHandle, UdpHandle};
use crate::stats::DropReason;
use net::{Frame, IpPacket, ParseError, ParseLevel, Vni, Vxlan};
use std::net::IpAddr;

/// The connection tracking entry a packet belongs to.
#[derive(Debug, Clone)]
pub enum Flow {
    Tcp(TcpHandle),
    Udp(UdpHandle),
}

impl Flow {
    #[must_use]
    pub fn fastpath(&self) -> Option<Fastpath> {
        match self {
            Flow::Tcp(entry) => entry.lock().fastpath,
            Flow::Udp(entry) => entry.lock().fastpath,
        }
    }

    pub fn set_fastpath(&self, fastpath: Option<Fastpath>) {
        match self {
            Flow::Tcp(entry) => entry.lock().fastpath = fastpath,
            Flow::Udp(entry) => entry.lock().fastpath = fastpath,
        }
    }
}

/// A frame plus everything the switch learned about it so far.
///
/// A packet buffer has a single owner at any time. Fan-out nodes hand a [`PacketBuffer::copy`]
/// to every extra output.
#[derive(Debug)]
pub struct PacketBuffer {
    frame: Frame,
    /// Interface the frame came from, unset for frames built by the switch.
    pub devin: Option<IfaceIndex>,
    /// Interface `dev-output` sends to.
    pub devout: Option<IfaceIndex>,
    /// The network the frame is switched in.
    pub vni: Vni,
    pub vrf: Vni,
    /// Overlay header the frame was received with, reused on output.
    pub vxlan: Option<Vxlan>,
    /// Synthetic ips owned by the destination mac.
    pub matched_ips: Vec<IpAddr>,
    pub flow: Option<Flow>,
    /// On ingress: the frame belongs to a known udp flow and goes straight to its listener.
    /// On egress: record a fastpath binding on the flow when the frame is sent.
    pub fastpath: bool,
    /// Times the packet was handed from one network's route table to another's.
    pub reroutes: u8,
    pub debugger: TraceDebugger,
    pub(crate) next: Option<NodeId>,
    pub(crate) drop_reason: Option<DropReason>,
}

impl PacketBuffer {
    /// A packet received on `devin`.
    #[must_use]
    pub fn from_device(devin: IfaceIndex, vni: Vni, frame: Frame) -> Self {
        Self {
            devin: Some(devin),
            ..Self::from_frame(vni, frame)
        }
    }

    /// A packet built by the switch itself.
    #[must_use]
    pub fn from_frame(vni: Vni, frame: Frame) -> Self {
        Self {
            frame,
            devin: None,
            devout: None,
            vni,
            vrf: vni,
            vxlan: None,
            matched_ips: Vec::new(),
            flow: None,
            fastpath: false,
            reroutes: 0,
            debugger: TraceDebugger::default(),
            next: None,
            drop_reason: None,
        }
    }

    /// An independent copy for fan-out. Tracing is inherited, scheduling state and the flow
    /// are not.
    #[must_use]
    pub fn copy(&self) -> Self {
        Self {
            frame: self.frame.clone(),
            devin: self.devin,
            devout: self.devout,
            vni: self.vni,
            vrf: self.vrf,
            vxlan: self.vxlan,
            matched_ips: self.matched_ips.clone(),
            flow: None,
            fastpath: false,
            reroutes: self.reroutes,
            debugger: self.debugger.fork(),
            next: None,
            drop_reason: None,
        }
    }

    #[must_use]
    pub fn frame(&self) -> &Frame {
        &self.frame
    }

    pub fn frame_mut(&mut self) -> &mut Frame {
        &mut self.frame
    }

    /// Swap the frame for a newly built one, forgetting what was matched on the old one.
    pub fn replace_frame(&mut self, frame: Frame) {
        self.frame = frame;
        self.matched_ips.clear();
        self.vxlan = None;
    }

    /// Decode the frame up to `level`.
    ///
    /// # Errors
    ///
    /// Fails if a layer is malformed; the caller drops the packet.
    pub fn ensure_parsed(&mut self, level: ParseLevel) -> Result<(), ParseError> {
        self.frame.ensure_parsed(level)
    }

    #[must_use]
    pub fn ip(&self) -> Option<&IpPacket> {
        self.frame.ip()
    }

    pub fn ip_mut(&mut self) -> Option<&mut IpPacket> {
        self.frame.ip_mut()
    }

    /// Why the packet was dropped, if it was.
    #[must_use]
    pub fn drop_reason(&self) -> Option<DropReason> {
        self.drop_reason
    }

    /// Move into another network, e.g. after an inter-VPC route.
    pub fn set_network(&mut self, vni: Vni) {
        self.vni = vni;
        self.vrf = vni;
    }
}

impl std::fmt::Display for PacketBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "pkb{{vni={} {} -> {} type={:#06x}",
            self.vni,
            self.frame.src(),
            self.frame.dst(),
            self.frame.ether_type()
        )?;
        if let Some(ip) = self.ip() {
            write!(f, " {} -> {}", ip.src(), ip.dst())?;
        }
        if let Some(devin) = self.devin {
            write!(f, " devin={devin}")?;
        }
        write!(f, "}}")
    }
}
