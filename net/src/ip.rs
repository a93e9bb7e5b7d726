// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! IPv4 / IPv6 headers.

use crate::parse::{EmitError, Layer, ParseError};
use etherparse::{IpNumber, Ipv4Header, Ipv6Header};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

pub const PROTO_ICMP: u8 = IpNumber::ICMP.0;
pub const PROTO_TCP: u8 = IpNumber::TCP.0;
pub const PROTO_UDP: u8 = IpNumber::UDP.0;
pub const PROTO_ICMPV6: u8 = IpNumber::IPV6_ICMP.0;

/// Hop limit used for packets the switch originates.
pub const DEFAULT_HOP_LIMIT: u8 = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IpHeader {
    V4(Ipv4Header),
    V6(Ipv6Header),
}

impl IpHeader {
    /// Build a header for a locally originated packet.
    ///
    /// # Errors
    ///
    /// Fails if `src` and `dst` are not of the same family.
    pub fn new(src: IpAddr, dst: IpAddr, hop_limit: u8, protocol: u8) -> Result<Self, EmitError> {
        match (src, dst) {
            (IpAddr::V4(src), IpAddr::V4(dst)) => {
                Ipv4Header::new(0, hop_limit, IpNumber(protocol), src.octets(), dst.octets())
                    .map(IpHeader::V4)
                    .map_err(|_| EmitError::TooBig(0))
            }
            (IpAddr::V6(src), IpAddr::V6(dst)) => Ok(IpHeader::V6(Ipv6Header {
                next_header: IpNumber(protocol),
                hop_limit,
                source: src.octets(),
                destination: dst.octets(),
                ..Ipv6Header::default()
            })),
            _ => Err(EmitError::FamilyMismatch),
        }
    }

    #[must_use]
    pub fn is_v6(&self) -> bool {
        matches!(self, IpHeader::V6(_))
    }

    #[must_use]
    pub fn src(&self) -> IpAddr {
        match self {
            IpHeader::V4(h) => IpAddr::V4(Ipv4Addr::from(h.source)),
            IpHeader::V6(h) => IpAddr::V6(Ipv6Addr::from(h.source)),
        }
    }

    #[must_use]
    pub fn dst(&self) -> IpAddr {
        match self {
            IpHeader::V4(h) => IpAddr::V4(Ipv4Addr::from(h.destination)),
            IpHeader::V6(h) => IpAddr::V6(Ipv6Addr::from(h.destination)),
        }
    }

    /// Set the source address. Addresses of the other family are ignored.
    pub fn set_src(&mut self, ip: IpAddr) -> &mut Self {
        match (self as &mut IpHeader, ip) {
            (IpHeader::V4(h), IpAddr::V4(ip)) => h.source = ip.octets(),
            (IpHeader::V6(h), IpAddr::V6(ip)) => h.source = ip.octets(),
            _ => {}
        }
        self
    }

    /// Set the destination address. Addresses of the other family are ignored.
    pub fn set_dst(&mut self, ip: IpAddr) -> &mut Self {
        match (self as &mut IpHeader, ip) {
            (IpHeader::V4(h), IpAddr::V4(ip)) => h.destination = ip.octets(),
            (IpHeader::V6(h), IpAddr::V6(ip)) => h.destination = ip.octets(),
            _ => {}
        }
        self
    }

    /// TTL for v4, hop limit for v6.
    #[must_use]
    pub fn hop_limit(&self) -> u8 {
        match self {
            IpHeader::V4(h) => h.time_to_live,
            IpHeader::V6(h) => h.hop_limit,
        }
    }

    pub fn set_hop_limit(&mut self, hop: u8) -> &mut Self {
        match self {
            IpHeader::V4(h) => h.time_to_live = hop,
            IpHeader::V6(h) => h.hop_limit = hop,
        }
        self
    }

    /// Protocol (v4) or next header (v6).
    #[must_use]
    pub fn protocol(&self) -> u8 {
        match self {
            IpHeader::V4(h) => h.protocol.0,
            IpHeader::V6(h) => h.next_header.0,
        }
    }

    pub(crate) fn set_protocol(&mut self, protocol: u8) {
        match self {
            IpHeader::V4(h) => h.protocol = IpNumber(protocol),
            IpHeader::V6(h) => h.next_header = IpNumber(protocol),
        }
    }

    /// Parse a header and return it with its payload, trimmed to the length the header announces.
    pub(crate) fn parse_v4(buf: &[u8]) -> Result<(IpHeader, &[u8]), ParseError> {
        let (h, rest) =
            Ipv4Header::from_slice(buf).map_err(|e| ParseError::invalid(Layer::Ipv4, e))?;
        let payload_len = usize::from(h.total_len).saturating_sub(h.header_len());
        ParseError::check_len(Layer::Ipv4, rest, payload_len)?;
        Ok((IpHeader::V4(h), &rest[..payload_len]))
    }

    pub(crate) fn parse_v6(buf: &[u8]) -> Result<(IpHeader, &[u8]), ParseError> {
        let (h, rest) =
            Ipv6Header::from_slice(buf).map_err(|e| ParseError::invalid(Layer::Ipv6, e))?;
        let payload_len = usize::from(h.payload_length);
        ParseError::check_len(Layer::Ipv6, rest, payload_len)?;
        Ok((IpHeader::V6(h), &rest[..payload_len]))
    }

    /// Write the header for a payload of `payload_len` bytes, fixing lengths and checksum.
    pub(crate) fn emit(&self, payload_len: usize, out: &mut Vec<u8>) -> Result<(), EmitError> {
        match self {
            IpHeader::V4(h) => {
                let mut h = h.clone();
                h.set_payload_len(payload_len)
                    .map_err(|_| EmitError::TooBig(payload_len))?;
                h.header_checksum = h.calc_header_checksum();
                out.extend_from_slice(&h.to_bytes());
            }
            IpHeader::V6(h) => {
                let mut h = h.clone();
                h.set_payload_length(payload_len)
                    .map_err(|_| EmitError::TooBig(payload_len))?;
                out.extend_from_slice(&h.to_bytes());
            }
        }
        Ok(())
    }

    /// The header bytes as they were received, used when quoting a packet in an ICMP error.
    #[must_use]
    pub fn raw_bytes(&self) -> Vec<u8> {
        match self {
            IpHeader::V4(h) => h.to_bytes().to_vec(),
            IpHeader::V6(h) => h.to_bytes().to_vec(),
        }
    }
}
