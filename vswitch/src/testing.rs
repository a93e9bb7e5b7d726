// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Test fixtures: an interface recording what it is given, hooks recording terminal
//! outcomes, frame builders and a two network switch.

#![allow(clippy::unwrap_used)]

use crate::config::SwitchConfig;
use crate::graph::Outcome;
use crate::iface::{Iface, IfaceIndex, IfaceParams};
use crate::pkb::PacketBuffer;
use crate::scheduler::SchedulerHooks;
use crate::stats::DropReason;
use crate::switch::Switch;
use net::arp::Arp;
use net::ip::DEFAULT_HOP_LIMIT;
use net::tcp::{Tcp, TcpFlags};
use net::udp::Udp;
use net::{EthPayload, Frame, IpPacket, Mac, ParseLevel, Transport, Vni, Vxlan};
use parking_lot::Mutex;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

pub(crate) const GW1: Mac = Mac([2, 0, 0, 0, 1, 1]);
pub(crate) const GW2: Mac = Mac([2, 0, 0, 0, 2, 1]);

pub(crate) fn vni(vni: u32) -> Vni {
    Vni::new_checked(vni).unwrap()
}

pub(crate) fn mac(last: u8) -> Mac {
    Mac([2, 0, 0, 0, 0, last])
}

pub(crate) fn ip(s: &str) -> IpAddr {
    s.parse().unwrap()
}

pub(crate) fn sock(s: &str) -> SocketAddr {
    s.parse().unwrap()
}

/// An interface keeping every frame it is asked to send.
pub(crate) struct RecordingIface {
    name: String,
    vnis: Vec<Vni>,
    params: IfaceParams,
    disabled: AtomicBool,
    sent: Mutex<Vec<(Frame, Option<Vxlan>)>>,
}

impl RecordingIface {
    /// An interface carrying every network.
    pub(crate) fn new(name: &str) -> Arc<Self> {
        Self::with(name, Vec::new(), IfaceParams::default())
    }

    /// An interface carrying only `vnis`.
    pub(crate) fn with(name: &str, vnis: Vec<Vni>, params: IfaceParams) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_owned(),
            vnis,
            params,
            disabled: AtomicBool::new(false),
            sent: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn disable(&self) {
        self.disabled.store(true, Ordering::Relaxed);
    }

    /// Frames sent so far, transport decoded, and forget them.
    pub(crate) fn take(&self) -> Vec<Frame> {
        self.take_with_vxlan().into_iter().map(|(f, _)| f).collect()
    }

    pub(crate) fn take_with_vxlan(&self) -> Vec<(Frame, Option<Vxlan>)> {
        let mut sent = std::mem::take(&mut *self.sent.lock());
        for (frame, _) in &mut sent {
            frame.ensure_parsed(ParseLevel::Transport).unwrap();
        }
        sent
    }
}

impl Iface for RecordingIface {
    fn name(&self) -> &str {
        &self.name
    }

    fn local_side_vni(&self, vni: Vni) -> Vni {
        match self.vnis.first() {
            Some(first) if !self.vnis.contains(&vni) => *first,
            _ => vni,
        }
    }

    fn params(&self) -> IfaceParams {
        self.params.clone()
    }

    fn is_disabled(&self) -> bool {
        self.disabled.load(Ordering::Relaxed)
    }

    fn send(&self, pkb: &PacketBuffer) {
        self.sent.lock().push((pkb.frame().clone(), pkb.vxlan));
    }
}

/// Terminal outcomes, shared with the test after the hooks were handed to the switch.
#[derive(Clone, Default)]
pub(crate) struct RecordingHooks {
    pub(crate) outcomes: Arc<Mutex<Vec<(Outcome, Option<DropReason>)>>>,
    pub(crate) trace_all: bool,
}

impl SchedulerHooks for RecordingHooks {
    fn packet_dropped_or_stolen(&mut self, pkb: &PacketBuffer, outcome: Outcome) {
        self.outcomes.lock().push((outcome, pkb.drop_reason()));
    }

    fn trace_packet(&mut self, _pkb: &PacketBuffer) -> bool {
        self.trace_all
    }
}

pub(crate) fn ip_frame(
    src: Mac,
    dst: Mac,
    from: IpAddr,
    to: IpAddr,
    hop: u8,
    transport: Transport,
) -> Frame {
    let packet = IpPacket::new(from, to, hop, transport).unwrap();
    Frame::new(src, dst, EthPayload::Ip(packet))
}

pub(crate) fn udp_frame(src: Mac, dst: Mac, from: SocketAddr, to: SocketAddr) -> Frame {
    let udp = Udp::new(from.port(), to.port(), b"hello".to_vec());
    ip_frame(src, dst, from.ip(), to.ip(), DEFAULT_HOP_LIMIT, Transport::Udp(udp))
}

pub(crate) fn tcp_frame(
    src: Mac,
    dst: Mac,
    from: SocketAddr,
    to: SocketAddr,
    flags: TcpFlags,
    seq: u32,
    ack: u32,
) -> Frame {
    let mut tcp = Tcp::new(from.port(), to.port(), seq, ack, 1024);
    tcp.set_flags(flags);
    ip_frame(src, dst, from.ip(), to.ip(), DEFAULT_HOP_LIMIT, Transport::Tcp(tcp))
}

pub(crate) fn arp_request(src: Mac, from: IpAddr, target: IpAddr) -> Frame {
    let (IpAddr::V4(from), IpAddr::V4(target)) = (from, target) else {
        unreachable!("arp is ipv4 only");
    };
    Frame::new(src, Mac::BROADCAST, EthPayload::Arp(Arp::request(src, from, target)))
}

pub(crate) fn tcp_of(frame: &Frame) -> &Tcp {
    frame.ip().and_then(IpPacket::tcp).unwrap()
}

/// A switch with two networks:
/// - vni 1, 10.1.0.0/24, the switch answers 10.1.0.1 with [`GW1`]
/// - vni 2, 10.2.0.0/24 and fd02::/64, the switch answers 10.2.0.1 and fd02::1 with [`GW2`]
///
/// Vni 1 routes 10.2.0.0/24 to vni 2.
pub(crate) fn two_networks(config: SwitchConfig) -> Switch {
    let yaml = r"
networks:
  - vni: 1
    v4: 10.1.0.0/24
    ips:
      - { ip: 10.1.0.1, mac: '02:00:00:00:01:01' }
    routes:
      - { name: to-vpc2, network: 10.2.0.0/24, vni: 2 }
  - vni: 2
    v4: 10.2.0.0/24
    v6: fd02::/64
    ips:
      - { ip: 10.2.0.1, mac: '02:00:00:00:02:01' }
      - { ip: 'fd02::1', mac: '02:00:00:00:02:01' }
";
    let config = SwitchConfig {
        networks: SwitchConfig::from_yaml(yaml).unwrap().networks,
        ..config
    };
    Switch::from_config(config).unwrap()
}

/// A host: its interface, where it is attached and its addresses.
pub(crate) struct Host {
    pub(crate) iface: Arc<RecordingIface>,
    pub(crate) index: IfaceIndex,
    pub(crate) vni: Vni,
    pub(crate) mac: Mac,
    pub(crate) ip: IpAddr,
}

impl Host {
    /// Attach a host and make the switch know its mac and ip, as if it had talked before.
    pub(crate) fn attach(switch: &mut Switch, name: &str, vni: Vni, mac: Mac, ip: IpAddr) -> Host {
        let iface = RecordingIface::new(name);
        let index = switch.attach_iface(iface.clone());
        let now = Instant::now();
        let network = switch.network_mut(vni).unwrap();
        network.mac_table.record(mac, index, now);
        network.arp_table.record(mac, ip, now);
        Host {
            iface,
            index,
            vni,
            mac,
            ip,
        }
    }

    pub(crate) fn send(&self, switch: &mut Switch, frame: &Frame) {
        self.send_vxlan(switch, frame, None);
    }

    pub(crate) fn send_vxlan(&self, switch: &mut Switch, frame: &Frame, vxlan: Option<Vxlan>) {
        let bytes = frame.to_bytes().unwrap();
        switch.receive(self.index, self.vni, &bytes, vxlan, Instant::now());
    }

    pub(crate) fn addr(&self, port: u16) -> SocketAddr {
        SocketAddr::new(self.ip, port)
    }
}
