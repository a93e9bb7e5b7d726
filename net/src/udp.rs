// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! UDP datagram (header plus payload).

use crate::ip::IpHeader;
use crate::parse::{EmitError, Layer, ParseError};
use etherparse::UdpHeader;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Udp {
    pub src_port: u16,
    pub dst_port: u16,
    pub payload: Vec<u8>,
}

impl Udp {
    #[must_use]
    pub fn new(src_port: u16, dst_port: u16, payload: Vec<u8>) -> Udp {
        Udp {
            src_port,
            dst_port,
            payload,
        }
    }

    pub(crate) fn parse(buf: &[u8]) -> Result<Udp, ParseError> {
        let (header, rest) =
            UdpHeader::from_slice(buf).map_err(|e| ParseError::invalid(Layer::Udp, e))?;
        let payload_len = usize::from(header.length).saturating_sub(UdpHeader::LEN);
        ParseError::check_len(Layer::Udp, rest, payload_len)?;
        Ok(Udp::new(
            header.source_port,
            header.destination_port,
            rest[..payload_len].to_vec(),
        ))
    }

    pub(crate) fn emit(&self, ip: &IpHeader, out: &mut Vec<u8>) -> Result<(), EmitError> {
        let too_big = EmitError::TooBig(self.payload.len());
        let length = u16::try_from(UdpHeader::LEN + self.payload.len())
            .map_err(|_| too_big.clone())?;
        let mut header = UdpHeader {
            source_port: self.src_port,
            destination_port: self.dst_port,
            length,
            checksum: 0,
        };
        header.checksum = match ip {
            IpHeader::V4(ip) => header.calc_checksum_ipv4(ip, &self.payload),
            IpHeader::V6(ip) => header.calc_checksum_ipv6(ip, &self.payload),
        }
        .map_err(|_| too_big)?;
        out.extend_from_slice(&header.to_bytes());
        out.extend_from_slice(&self.payload);
        Ok(())
    }
}
