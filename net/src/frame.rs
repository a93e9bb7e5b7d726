// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Link layer frame with a lazily decoded transport layer.

use crate::arp::Arp;
use crate::checksum;
use crate::eth::Eth;
use crate::eth::mac::Mac;
use crate::icmp::Icmp;
use crate::ip::{IpHeader, PROTO_ICMP, PROTO_ICMPV6, PROTO_TCP, PROTO_UDP};
use crate::parse::{EmitError, ParseError, ParseLevel};
use crate::tcp::Tcp;
use crate::udp::Udp;
use std::net::IpAddr;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EthPayload {
    Arp(Arp),
    Ip(IpPacket),
    /// Any ether type the switch does not understand.
    Other { ether_type: u16, bytes: Vec<u8> },
}

impl EthPayload {
    fn ether_type(&self) -> u16 {
        match self {
            EthPayload::Arp(_) => Eth::ETHER_TYPE_ARP,
            EthPayload::Ip(ip) if ip.header.is_v6() => Eth::ETHER_TYPE_IPV6,
            EthPayload::Ip(_) => Eth::ETHER_TYPE_IPV4,
            EthPayload::Other { ether_type, .. } => *ether_type,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transport {
    /// Not decoded yet.
    Raw(Vec<u8>),
    Tcp(Tcp),
    Udp(Udp),
    Icmp(Icmp),
    /// Decoded, but not a protocol the switch understands.
    Other(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IpPacket {
    pub header: IpHeader,
    pub transport: Transport,
}

impl IpPacket {
    /// Build a packet originated by the switch.
    ///
    /// # Errors
    ///
    /// Fails if `src` and `dst` are not of the same family.
    pub fn new(
        src: IpAddr,
        dst: IpAddr,
        hop_limit: u8,
        transport: Transport,
    ) -> Result<IpPacket, EmitError> {
        let protocol = IpPacket::protocol_of(&transport).unwrap_or_default();
        Ok(IpPacket {
            header: IpHeader::new(src, dst, hop_limit, protocol)?,
            transport,
        })
    }

    fn protocol_of(transport: &Transport) -> Option<u8> {
        match transport {
            Transport::Tcp(_) => Some(PROTO_TCP),
            Transport::Udp(_) => Some(PROTO_UDP),
            Transport::Icmp(icmp) if icmp.is_v6() => Some(PROTO_ICMPV6),
            Transport::Icmp(_) => Some(PROTO_ICMP),
            Transport::Raw(_) | Transport::Other(_) => None,
        }
    }

    #[must_use]
    pub fn src(&self) -> IpAddr {
        self.header.src()
    }

    #[must_use]
    pub fn dst(&self) -> IpAddr {
        self.header.dst()
    }

    #[must_use]
    pub fn icmp(&self) -> Option<&Icmp> {
        match &self.transport {
            Transport::Icmp(icmp) => Some(icmp),
            _ => None,
        }
    }

    #[must_use]
    pub fn tcp(&self) -> Option<&Tcp> {
        match &self.transport {
            Transport::Tcp(tcp) => Some(tcp),
            _ => None,
        }
    }

    pub fn tcp_mut(&mut self) -> Option<&mut Tcp> {
        match &mut self.transport {
            Transport::Tcp(tcp) => Some(tcp),
            _ => None,
        }
    }

    #[must_use]
    pub fn udp(&self) -> Option<&Udp> {
        match &self.transport {
            Transport::Udp(udp) => Some(udp),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_transport_parsed(&self) -> bool {
        !matches!(self.transport, Transport::Raw(_))
    }

    fn parse_transport(&mut self) -> Result<(), ParseError> {
        let Transport::Raw(raw) = &self.transport else {
            return Ok(());
        };
        let transport = match self.header.protocol() {
            PROTO_TCP => Transport::Tcp(Tcp::parse(raw)?),
            PROTO_UDP => Transport::Udp(Udp::parse(raw)?),
            PROTO_ICMP => Transport::Icmp(Icmp::parse(false, raw)?),
            PROTO_ICMPV6 => Transport::Icmp(Icmp::parse(true, raw)?),
            _ => Transport::Other(raw.clone()),
        };
        self.transport = transport;
        Ok(())
    }

    fn emit_transport(&self, header: &IpHeader, out: &mut Vec<u8>) -> Result<(), EmitError> {
        match &self.transport {
            Transport::Raw(bytes) | Transport::Other(bytes) => out.extend_from_slice(bytes),
            Transport::Tcp(tcp) => tcp.emit(header, out)?,
            Transport::Udp(udp) => udp.emit(header, out)?,
            Transport::Icmp(icmp) => {
                let start = out.len();
                icmp.emit_unchecked(out);
                let sum = match (header, header.src(), header.dst()) {
                    (IpHeader::V6(_), IpAddr::V6(src), IpAddr::V6(dst)) if icmp.is_v6() => {
                        checksum::icmpv6(src, dst, &out[start..])
                    }
                    _ => checksum::icmpv4(&out[start..]),
                };
                out[start + 2..start + 4].copy_from_slice(&sum.to_be_bytes());
            }
        }
        Ok(())
    }

    /// Serialize the IP packet, with fresh lengths and checksums.
    ///
    /// # Errors
    ///
    /// Fails if the payload does not fit the header's length fields.
    pub fn to_bytes(&self) -> Result<Vec<u8>, EmitError> {
        let mut header = self.header.clone();
        if let Some(protocol) = IpPacket::protocol_of(&self.transport) {
            header.set_protocol(protocol);
        }
        let mut transport = Vec::new();
        self.emit_transport(&header, &mut transport)?;
        let mut out = Vec::with_capacity(60 + transport.len());
        header.emit(transport.len(), &mut out)?;
        out.extend_from_slice(&transport);
        Ok(out)
    }
}

/// An Ethernet frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    eth: Eth,
    payload: EthPayload,
}

impl Frame {
    #[must_use]
    pub fn new(src: Mac, dst: Mac, payload: EthPayload) -> Frame {
        Frame {
            eth: Eth::new(src, dst, payload.ether_type()),
            payload,
        }
    }

    /// Decode a frame up to [`ParseLevel::Ip`].
    ///
    /// # Errors
    ///
    /// Fails if the ethernet, arp or ip header is malformed.
    pub fn parse(buf: &[u8]) -> Result<Frame, ParseError> {
        let (eth, rest) = Eth::parse(buf)?;
        let payload = match eth.ether_type() {
            Eth::ETHER_TYPE_ARP => EthPayload::Arp(Arp::parse(rest)?),
            Eth::ETHER_TYPE_IPV4 => {
                let (header, payload) = IpHeader::parse_v4(rest)?;
                EthPayload::Ip(IpPacket {
                    header,
                    transport: Transport::Raw(payload.to_vec()),
                })
            }
            Eth::ETHER_TYPE_IPV6 => {
                let (header, payload) = IpHeader::parse_v6(rest)?;
                EthPayload::Ip(IpPacket {
                    header,
                    transport: Transport::Raw(payload.to_vec()),
                })
            }
            ether_type => EthPayload::Other {
                ether_type,
                bytes: rest.to_vec(),
            },
        };
        Ok(Frame { eth, payload })
    }

    /// Decode the frame further if needed. A failure leaves the frame untouched.
    ///
    /// # Errors
    ///
    /// Fails if the transport layer is malformed.
    pub fn ensure_parsed(&mut self, level: ParseLevel) -> Result<(), ParseError> {
        match (level, &mut self.payload) {
            (ParseLevel::Transport, EthPayload::Ip(ip)) => ip.parse_transport(),
            _ => Ok(()),
        }
    }

    #[must_use]
    pub fn parse_level(&self) -> ParseLevel {
        match &self.payload {
            EthPayload::Ip(ip) if !ip.is_transport_parsed() => ParseLevel::Ip,
            _ => ParseLevel::Transport,
        }
    }

    #[must_use]
    pub fn src(&self) -> Mac {
        self.eth.source()
    }

    #[must_use]
    pub fn dst(&self) -> Mac {
        self.eth.destination()
    }

    pub fn set_src(&mut self, mac: Mac) -> &mut Frame {
        self.eth.set_source(mac);
        self
    }

    pub fn set_dst(&mut self, mac: Mac) -> &mut Frame {
        self.eth.set_destination(mac);
        self
    }

    #[must_use]
    pub fn ether_type(&self) -> u16 {
        self.eth.ether_type()
    }

    #[must_use]
    pub fn payload(&self) -> &EthPayload {
        &self.payload
    }

    pub fn set_payload(&mut self, payload: EthPayload) -> &mut Frame {
        self.eth.set_ether_type(payload.ether_type());
        self.payload = payload;
        self
    }

    #[must_use]
    pub fn arp(&self) -> Option<&Arp> {
        match &self.payload {
            EthPayload::Arp(arp) => Some(arp),
            _ => None,
        }
    }

    #[must_use]
    pub fn ip(&self) -> Option<&IpPacket> {
        match &self.payload {
            EthPayload::Ip(ip) => Some(ip),
            _ => None,
        }
    }

    pub fn ip_mut(&mut self) -> Option<&mut IpPacket> {
        match &mut self.payload {
            EthPayload::Ip(ip) => Some(ip),
            _ => None,
        }
    }

    /// Serialize the frame.
    ///
    /// # Errors
    ///
    /// Fails if a payload does not fit its header's length fields.
    pub fn to_bytes(&self) -> Result<Vec<u8>, EmitError> {
        let mut out = Vec::with_capacity(128);
        self.eth.emit(&mut out);
        match &self.payload {
            EthPayload::Arp(arp) => arp.emit(&mut out),
            EthPayload::Ip(ip) => out.extend_from_slice(&ip.to_bytes()?),
            EthPayload::Other { bytes, .. } => out.extend_from_slice(bytes),
        }
        Ok(out)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::icmp::V4_ECHO_REQUEST;
    use crate::ip::DEFAULT_HOP_LIMIT;
    use crate::tcp::TcpFlags;
    use pretty_assertions::assert_eq;

    const A: Mac = Mac([2, 0, 0, 0, 0, 0xa]);
    const B: Mac = Mac([2, 0, 0, 0, 0, 0xb]);

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn transport_is_decoded_on_demand() {
        let udp = Transport::Udp(Udp::new(5000, 53, b"query".to_vec()));
        let pkt = IpPacket::new(ip("10.0.0.1"), ip("10.0.0.2"), DEFAULT_HOP_LIMIT, udp).unwrap();
        let bytes = Frame::new(A, B, EthPayload::Ip(pkt.clone())).to_bytes().unwrap();

        let mut frame = Frame::parse(&bytes).unwrap();
        assert_eq!(frame.parse_level(), ParseLevel::Ip);
        assert_eq!(frame.ip().unwrap().dst(), ip("10.0.0.2"));
        assert!(frame.ip().unwrap().udp().is_none());

        frame.ensure_parsed(ParseLevel::Transport).unwrap();
        assert_eq!(frame.parse_level(), ParseLevel::Transport);
        assert_eq!(frame.ip().unwrap().udp(), pkt.udp());
    }

    #[test]
    fn ethernet_padding_is_trimmed() {
        let icmp = Icmp::new(false, V4_ECHO_REQUEST, 0, vec![0, 1, 0, 1]);
        let pkt = IpPacket::new(ip("10.0.0.1"), ip("10.0.0.2"), 64, Transport::Icmp(icmp));
        let mut bytes = Frame::new(A, B, EthPayload::Ip(pkt.unwrap())).to_bytes().unwrap();
        bytes.extend_from_slice(&[0; 18]);
        let mut frame = Frame::parse(&bytes).unwrap();
        frame.ensure_parsed(ParseLevel::Transport).unwrap();
        assert_eq!(frame.ip().unwrap().icmp().unwrap().body, vec![0, 1, 0, 1]);
    }

    #[test]
    fn icmpv6_checksum_covers_pseudo_header() {
        let icmp = Icmp::new(true, crate::icmp::V6_ECHO_REQUEST, 0, vec![1, 2, 3, 4]);
        let pkt = IpPacket::new(ip("fd00::1"), ip("fd00::2"), 64, Transport::Icmp(icmp)).unwrap();
        let bytes = pkt.to_bytes().unwrap();
        let (IpAddr::V6(src), IpAddr::V6(dst)) = (pkt.src(), pkt.dst()) else {
            unreachable!()
        };
        assert_eq!(bytes[6], PROTO_ICMPV6);
        assert_eq!(checksum::icmpv6(src, dst, &bytes[40..]), 0);
    }

    #[test]
    fn tcp_checksum_matches_etherparse() {
        let mut tcp = Tcp::new(40000, 80, 7, 0, 1024);
        tcp.set_flags(TcpFlags::SYN);
        let pkt = IpPacket::new(ip("10.0.0.1"), ip("10.0.0.2"), 64, Transport::Tcp(tcp)).unwrap();
        let bytes = pkt.to_bytes().unwrap();
        let sliced = etherparse::SlicedPacket::from_ip(&bytes).unwrap();
        let Some(etherparse::TransportSlice::Tcp(seg)) = sliced.transport else {
            unreachable!()
        };
        let etherparse::NetSlice::Ipv4(v4) = sliced.net.unwrap() else {
            unreachable!()
        };
        let expected = seg
            .to_header()
            .calc_checksum_ipv4(&v4.header().to_header(), seg.payload())
            .unwrap();
        assert_eq!(seg.checksum(), expected);
    }

    #[test]
    fn unknown_ether_type_is_kept() {
        let mut bytes = vec![0xff; 6];
        bytes.extend_from_slice(&A.0);
        bytes.extend_from_slice(&[0x88, 0xcc, 1, 2, 3]);
        let frame = Frame::parse(&bytes).unwrap();
        assert!(matches!(frame.payload(), EthPayload::Other { ether_type: 0x88cc, .. }));
        assert_eq!(frame.to_bytes().unwrap(), bytes);
    }

    #[test]
    fn parse_noise_never_panics() {
        bolero::check!().for_each(|bytes: &[u8]| {
            if let Ok(mut frame) = Frame::parse(bytes) {
                let _ = frame.ensure_parsed(ParseLevel::Transport);
                let _ = frame.to_bytes();
            }
        });
    }
}
