// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! ICMP and ICMPv6 messages, including the neighbor discovery messages the switch speaks.

use crate::eth::mac::Mac;
use crate::parse::{Layer, ParseError};
use std::net::Ipv6Addr;

pub const V4_ECHO_REPLY: u8 = 0;
pub const V4_DEST_UNREACHABLE: u8 = 3;
pub const V4_ECHO_REQUEST: u8 = 8;
pub const V4_TIME_EXCEEDED: u8 = 11;
pub const V4_PORT_UNREACHABLE_CODE: u8 = 3;

pub const V6_DEST_UNREACHABLE: u8 = 1;
pub const V6_TIME_EXCEEDED: u8 = 3;
pub const V6_ECHO_REQUEST: u8 = 128;
pub const V6_ECHO_REPLY: u8 = 129;
pub const V6_NEIGHBOR_SOLICITATION: u8 = 135;
pub const V6_NEIGHBOR_ADVERTISEMENT: u8 = 136;
pub const V6_PORT_UNREACHABLE_CODE: u8 = 4;

const OPT_SOURCE_LINK_LAYER: u8 = 1;
const OPT_TARGET_LINK_LAYER: u8 = 2;

/// An ICMP message: type, code and everything after the checksum.
///
/// Whether this is ICMPv4 or ICMPv6 follows the IP protocol number it was carried with, which
/// is not necessarily the family of the enclosing IP header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Icmp {
    v6: bool,
    pub icmp_type: u8,
    pub code: u8,
    pub body: Vec<u8>,
}

impl Icmp {
    pub const HEADER_LEN: usize = 4;

    #[must_use]
    pub fn new(v6: bool, icmp_type: u8, code: u8, body: Vec<u8>) -> Icmp {
        Icmp {
            v6,
            icmp_type,
            code,
            body,
        }
    }

    #[must_use]
    pub fn is_v6(&self) -> bool {
        self.v6
    }

    #[must_use]
    pub fn is_echo_request(&self) -> bool {
        self.icmp_type
            == if self.v6 {
                V6_ECHO_REQUEST
            } else {
                V4_ECHO_REQUEST
            }
    }

    /// True for NDP neighbor solicitations and advertisements.
    #[must_use]
    pub fn is_ndp_ns_or_na(&self) -> bool {
        self.v6
            && matches!(
                self.icmp_type,
                V6_NEIGHBOR_SOLICITATION | V6_NEIGHBOR_ADVERTISEMENT
            )
    }

    /// Echo reply carrying the identifier, sequence and data of this request.
    #[must_use]
    pub fn echo_reply(&self) -> Icmp {
        let icmp_type = if self.v6 { V6_ECHO_REPLY } else { V4_ECHO_REPLY };
        Icmp::new(self.v6, icmp_type, 0, self.body.clone())
    }

    /// Time exceeded quoting `quoted` (the offending packet, already truncated).
    #[must_use]
    pub fn time_exceeded(v6: bool, quoted: &[u8]) -> Icmp {
        let icmp_type = if v6 { V6_TIME_EXCEEDED } else { V4_TIME_EXCEEDED };
        Icmp::new(v6, icmp_type, 0, Icmp::error_body(quoted))
    }

    /// Port unreachable quoting `quoted`.
    #[must_use]
    pub fn port_unreachable(v6: bool, quoted: &[u8]) -> Icmp {
        let (icmp_type, code) = if v6 {
            (V6_DEST_UNREACHABLE, V6_PORT_UNREACHABLE_CODE)
        } else {
            (V4_DEST_UNREACHABLE, V4_PORT_UNREACHABLE_CODE)
        };
        Icmp::new(v6, icmp_type, code, Icmp::error_body(quoted))
    }

    // 4 unused bytes, then the quoted packet
    fn error_body(quoted: &[u8]) -> Vec<u8> {
        let mut body = vec![0; 4];
        body.extend_from_slice(quoted);
        body
    }

    /// Decode the body as an NDP solicitation or advertisement.
    #[must_use]
    pub fn neighbor_discovery(&self) -> Option<NeighborDiscovery> {
        let kind = match (self.v6, self.icmp_type) {
            (true, V6_NEIGHBOR_SOLICITATION) => NdpKind::Solicitation,
            (true, V6_NEIGHBOR_ADVERTISEMENT) => NdpKind::Advertisement,
            _ => return None,
        };
        NeighborDiscovery::parse(kind, &self.body)
    }

    pub(crate) fn parse(v6: bool, buf: &[u8]) -> Result<Icmp, ParseError> {
        ParseError::check_len(Layer::Icmp, buf, Icmp::HEADER_LEN)?;
        Ok(Icmp::new(v6, buf[0], buf[1], buf[Icmp::HEADER_LEN..].to_vec()))
    }

    /// Write the message with a zero checksum; the caller fills it in.
    pub(crate) fn emit_unchecked(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&[self.icmp_type, self.code, 0, 0]);
        out.extend_from_slice(&self.body);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NdpKind {
    Solicitation,
    Advertisement,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkLayerOption {
    Source(Mac),
    Target(Mac),
}

/// An NDP neighbor solicitation or advertisement ([RFC4861] section 4.3 and 4.4).
///
/// Only a single 8 byte link layer address option is understood.
///
/// [RFC4861]: https://datatracker.ietf.org/doc/html/rfc4861
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NeighborDiscovery {
    pub kind: NdpKind,
    /// The R/S/O bits of an advertisement, zero for solicitations.
    pub flags: u8,
    pub target: Ipv6Addr,
    pub option: Option<LinkLayerOption>,
}

impl NeighborDiscovery {
    /// Router=0, Solicited=1, Override=1
    pub const SOLICITED_OVERRIDE: u8 = 0b0110_0000;
    const MIN_LEN: usize = 20;
    const WITH_OPTION_LEN: usize = 28;

    fn parse(kind: NdpKind, body: &[u8]) -> Option<NeighborDiscovery> {
        if body.len() < NeighborDiscovery::MIN_LEN {
            return None;
        }
        let target = Ipv6Addr::from(<[u8; 16]>::try_from(&body[4..20]).ok()?);
        let option = if body.len() >= NeighborDiscovery::WITH_OPTION_LEN && body[21] == 1 {
            let mac = Mac::try_from(&body[22..28]).ok()?;
            match body[20] {
                OPT_SOURCE_LINK_LAYER => Some(LinkLayerOption::Source(mac)),
                OPT_TARGET_LINK_LAYER => Some(LinkLayerOption::Target(mac)),
                _ => None,
            }
        } else {
            None
        };
        Some(NeighborDiscovery {
            kind,
            flags: body[0],
            target,
            option,
        })
    }

    #[must_use]
    pub fn solicitation(target: Ipv6Addr, source: Mac) -> NeighborDiscovery {
        NeighborDiscovery {
            kind: NdpKind::Solicitation,
            flags: 0,
            target,
            option: Some(LinkLayerOption::Source(source)),
        }
    }

    #[must_use]
    pub fn advertisement(target: Ipv6Addr, mac: Mac) -> NeighborDiscovery {
        NeighborDiscovery {
            kind: NdpKind::Advertisement,
            flags: NeighborDiscovery::SOLICITED_OVERRIDE,
            target,
            option: Some(LinkLayerOption::Target(mac)),
        }
    }

    #[must_use]
    pub fn to_icmp(&self) -> Icmp {
        let icmp_type = match self.kind {
            NdpKind::Solicitation => V6_NEIGHBOR_SOLICITATION,
            NdpKind::Advertisement => V6_NEIGHBOR_ADVERTISEMENT,
        };
        let mut body = vec![self.flags, 0, 0, 0];
        body.extend_from_slice(&self.target.octets());
        match self.option {
            Some(LinkLayerOption::Source(mac)) => {
                body.extend_from_slice(&[OPT_SOURCE_LINK_LAYER, 1]);
                body.extend_from_slice(&mac.0);
            }
            Some(LinkLayerOption::Target(mac)) => {
                body.extend_from_slice(&[OPT_TARGET_LINK_LAYER, 1]);
                body.extend_from_slice(&mac.0);
            }
            None => {}
        }
        Icmp::new(true, icmp_type, 0, body)
    }
}

/// The solicited-node multicast address of `ip` (`ff02::1:ffXX:XXXX`).
#[must_use]
pub fn solicited_node_multicast(ip: Ipv6Addr) -> Ipv6Addr {
    let o = ip.octets();
    Ipv6Addr::from([
        0xff, 0x02, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0x01, 0xff, o[13], o[14], o[15],
    ])
}
