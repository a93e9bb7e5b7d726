// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! ARP packets ([RFC826]).
//!
//! Addresses are kept with their on-wire length so that callers can check the hardware and
//! protocol address sizes before trusting them.
//!
//! [RFC826]: https://datatracker.ietf.org/doc/html/rfc826

use crate::eth::mac::Mac;
use crate::parse::{Layer, ParseError};
use arrayvec::ArrayVec;
use std::net::Ipv4Addr;

/// Longest hardware or protocol address accepted by the parser.
const MAX_ADDR_LEN: usize = 16;
const FIXED_LEN: usize = 8;

pub type ArpAddr = ArrayVec<u8, MAX_ADDR_LEN>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Arp {
    pub hardware_type: u16,
    pub protocol_type: u16,
    pub opcode: u16,
    pub sender_mac: ArpAddr,
    pub sender_ip: ArpAddr,
    pub target_mac: ArpAddr,
    pub target_ip: ArpAddr,
}

impl Arp {
    pub const HARDWARE_ETHERNET: u16 = 1;
    pub const PROTOCOL_IP: u16 = 0x0800;
    pub const OPCODE_REQUEST: u16 = 1;
    pub const OPCODE_REPLY: u16 = 2;

    fn ethernet_ipv4(opcode: u16, sender: (Mac, Ipv4Addr), target: (Mac, Ipv4Addr)) -> Arp {
        let addr = |b: &[u8]| b.iter().copied().collect::<ArpAddr>();
        Arp {
            hardware_type: Arp::HARDWARE_ETHERNET,
            protocol_type: Arp::PROTOCOL_IP,
            opcode,
            sender_mac: addr(&sender.0.0),
            sender_ip: addr(&sender.1.octets()),
            target_mac: addr(&target.0.0),
            target_ip: addr(&target.1.octets()),
        }
    }

    /// A who-has request. The target mac is left as zero.
    #[must_use]
    pub fn request(sender_mac: Mac, sender_ip: Ipv4Addr, target_ip: Ipv4Addr) -> Arp {
        Arp::ethernet_ipv4(
            Arp::OPCODE_REQUEST,
            (sender_mac, sender_ip),
            (Mac::ZERO, target_ip),
        )
    }

    #[must_use]
    pub fn reply(sender: (Mac, Ipv4Addr), target: (Mac, Ipv4Addr)) -> Arp {
        Arp::ethernet_ipv4(Arp::OPCODE_REPLY, sender, target)
    }

    fn ipv4(addr: &ArpAddr) -> Option<Ipv4Addr> {
        <[u8; 4]>::try_from(addr.as_slice()).ok().map(Ipv4Addr::from)
    }

    /// The sender protocol address, if it is 4 bytes long.
    #[must_use]
    pub fn sender_ipv4(&self) -> Option<Ipv4Addr> {
        Arp::ipv4(&self.sender_ip)
    }

    /// The target protocol address, if it is 4 bytes long.
    #[must_use]
    pub fn target_ipv4(&self) -> Option<Ipv4Addr> {
        Arp::ipv4(&self.target_ip)
    }

    #[must_use]
    pub fn sender_mac(&self) -> Option<Mac> {
        Mac::try_from(self.sender_mac.as_slice()).ok()
    }

    pub(crate) fn parse(buf: &[u8]) -> Result<Arp, ParseError> {
        ParseError::check_len(Layer::Arp, buf, FIXED_LEN)?;
        let u16_at = |i: usize| u16::from_be_bytes([buf[i], buf[i + 1]]);
        let hlen = usize::from(buf[4]);
        let plen = usize::from(buf[5]);
        if hlen > MAX_ADDR_LEN || plen > MAX_ADDR_LEN {
            return Err(ParseError::invalid(
                Layer::Arp,
                format!("address lengths {hlen}/{plen} are too large"),
            ));
        }
        ParseError::check_len(Layer::Arp, buf, FIXED_LEN + 2 * (hlen + plen))?;
        let mut cursor = FIXED_LEN;
        let mut take = |len: usize| {
            let addr: ArpAddr = buf[cursor..cursor + len].iter().copied().collect();
            cursor += len;
            addr
        };
        let sender_mac = take(hlen);
        let sender_ip = take(plen);
        let target_mac = take(hlen);
        let target_ip = take(plen);
        Ok(Arp {
            hardware_type: u16_at(0),
            protocol_type: u16_at(2),
            opcode: u16_at(6),
            sender_mac,
            sender_ip,
            target_mac,
            target_ip,
        })
    }

    pub(crate) fn emit(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.hardware_type.to_be_bytes());
        out.extend_from_slice(&self.protocol_type.to_be_bytes());
        // lengths are bounded by MAX_ADDR_LEN
        out.push(u8::try_from(self.sender_mac.len()).unwrap_or(u8::MAX));
        out.push(u8::try_from(self.sender_ip.len()).unwrap_or(u8::MAX));
        out.extend_from_slice(&self.opcode.to_be_bytes());
        out.extend_from_slice(&self.sender_mac);
        out.extend_from_slice(&self.sender_ip);
        out.extend_from_slice(&self.target_mac);
        out.extend_from_slice(&self.target_ip);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn request_layout() {
        let arp = Arp::request(
            Mac([2, 0, 0, 0, 0, 1]),
            Ipv4Addr::new(10, 0, 0, 1),
            Ipv4Addr::new(10, 0, 0, 2),
        );
        let mut buf = Vec::new();
        arp.emit(&mut buf);
        assert_eq!(buf.len(), 28);
        assert_eq!(&buf[..8], &[0, 1, 8, 0, 6, 4, 0, 1]);
        let parsed = Arp::parse(&buf).unwrap();
        assert_eq!(parsed.target_ipv4(), Some(Ipv4Addr::new(10, 0, 0, 2)));
        assert_eq!(parsed.sender_mac(), Some(Mac([2, 0, 0, 0, 0, 1])));
        assert_eq!(parsed.target_mac.as_slice(), &[0u8; 6]);
    }

    #[test]
    fn short_addresses_are_kept_as_is() {
        // hlen 6, plen 2: parses, but is not an ipv4 arp
        let mut buf = vec![0, 1, 8, 0, 6, 2, 0, 2];
        buf.extend_from_slice(&[1, 2, 3, 4, 5, 6, 10, 0, 7, 8, 9, 10, 11, 12, 10, 1]);
        let arp = Arp::parse(&buf).unwrap();
        assert_eq!(arp.opcode, Arp::OPCODE_REPLY);
        assert_eq!(arp.sender_ipv4(), None);
    }

    #[test]
    fn truncated_is_rejected() {
        let buf = [0, 1, 8, 0, 6, 4, 0, 1, 2, 2];
        assert!(matches!(Arp::parse(&buf), Err(ParseError::Length(_))));
    }
}
