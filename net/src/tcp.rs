// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! TCP segment (header plus payload).

use crate::ip::IpHeader;
use crate::parse::{EmitError, Layer, ParseError};
use etherparse::{TcpHeader, TcpOptionElement};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tcp {
    header: TcpHeader,
    pub payload: Vec<u8>,
}

impl Tcp {
    #[must_use]
    pub fn new(src_port: u16, dst_port: u16, seq: u32, ack: u32, window: u16) -> Tcp {
        let mut header = TcpHeader::new(src_port, dst_port, seq, window);
        header.acknowledgment_number = ack;
        Tcp {
            header,
            payload: Vec::new(),
        }
    }

    #[must_use]
    pub fn src_port(&self) -> u16 {
        self.header.source_port
    }

    #[must_use]
    pub fn dst_port(&self) -> u16 {
        self.header.destination_port
    }

    #[must_use]
    pub fn seq(&self) -> u32 {
        self.header.sequence_number
    }

    #[must_use]
    pub fn ack_number(&self) -> u32 {
        self.header.acknowledgment_number
    }

    #[must_use]
    pub fn window(&self) -> u16 {
        self.header.window_size
    }

    #[must_use]
    pub fn flags(&self) -> TcpFlags {
        let h = &self.header;
        [
            (h.fin, TcpFlags::FIN),
            (h.syn, TcpFlags::SYN),
            (h.rst, TcpFlags::RST),
            (h.psh, TcpFlags::PSH),
            (h.ack, TcpFlags::ACK),
            (h.urg, TcpFlags::URG),
        ]
        .into_iter()
        .filter(|(set, _)| *set)
        .fold(TcpFlags::empty(), |acc, (_, f)| acc | f)
    }

    pub fn set_flags(&mut self, flags: TcpFlags) -> &mut Tcp {
        let h = &mut self.header;
        h.fin = flags.contains(TcpFlags::FIN);
        h.syn = flags.contains(TcpFlags::SYN);
        h.rst = flags.contains(TcpFlags::RST);
        h.psh = flags.contains(TcpFlags::PSH);
        h.ack = flags.contains(TcpFlags::ACK);
        h.urg = flags.contains(TcpFlags::URG);
        self
    }

    /// The MSS option, if present.
    #[must_use]
    pub fn mss(&self) -> Option<u16> {
        self.header
            .options_iterator()
            .filter_map(Result::ok)
            .find_map(|opt| match opt {
                TcpOptionElement::MaximumSegmentSize(mss) => Some(mss),
                _ => None,
            })
    }

    /// Set the MSS option, replacing an existing one or appending it.
    ///
    /// # Errors
    ///
    /// Fails if the options no longer fit the header.
    pub fn set_mss(&mut self, mss: u16) -> Result<(), EmitError> {
        let mut options: Vec<TcpOptionElement> = self
            .header
            .options_iterator()
            .filter_map(Result::ok)
            .filter(|opt| !matches!(opt, TcpOptionElement::MaximumSegmentSize(_)))
            .collect();
        options.insert(0, TcpOptionElement::MaximumSegmentSize(mss));
        self.header
            .set_options(&options)
            .map_err(|e| EmitError::TcpOptions(e.to_string()))
    }

    pub(crate) fn parse(buf: &[u8]) -> Result<Tcp, ParseError> {
        let (header, rest) =
            TcpHeader::from_slice(buf).map_err(|e| ParseError::invalid(Layer::Tcp, e))?;
        Ok(Tcp {
            header,
            payload: rest.to_vec(),
        })
    }

    pub(crate) fn emit(&self, ip: &IpHeader, out: &mut Vec<u8>) -> Result<(), EmitError> {
        let mut header = self.header.clone();
        let too_big = |_| EmitError::TooBig(self.payload.len());
        header.checksum = match ip {
            IpHeader::V4(ip) => header.calc_checksum_ipv4(ip, &self.payload),
            IpHeader::V6(ip) => header.calc_checksum_ipv6(ip, &self.payload),
        }
        .map_err(too_big)?;
        out.extend_from_slice(&header.to_bytes());
        out.extend_from_slice(&self.payload);
        Ok(())
    }
}

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TcpFlags: u8 {
        const FIN = 0x01;
        const SYN = 0x02;
        const RST = 0x04;
        const PSH = 0x08;
        const ACK = 0x10;
        const URG = 0x20;
    }
}
