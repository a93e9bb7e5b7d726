// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Ethernet header.

pub mod mac;

use crate::parse::{Layer, ParseError};
use etherparse::{EtherType, Ethernet2Header};
use mac::Mac;

/// An Ethernet II header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Eth(Ethernet2Header);

impl Eth {
    pub const LEN: usize = Ethernet2Header::LEN;
    pub const ETHER_TYPE_ARP: u16 = EtherType::ARP.0;
    pub const ETHER_TYPE_IPV4: u16 = EtherType::IPV4.0;
    pub const ETHER_TYPE_IPV6: u16 = EtherType::IPV6.0;

    #[must_use]
    pub fn new(source: Mac, destination: Mac, ether_type: u16) -> Eth {
        Eth(Ethernet2Header {
            source: source.0,
            destination: destination.0,
            ether_type: EtherType(ether_type),
        })
    }

    #[must_use]
    pub fn source(&self) -> Mac {
        Mac(self.0.source)
    }

    #[must_use]
    pub fn destination(&self) -> Mac {
        Mac(self.0.destination)
    }

    #[must_use]
    pub fn ether_type(&self) -> u16 {
        self.0.ether_type.0
    }

    pub fn set_source(&mut self, mac: Mac) -> &mut Eth {
        self.0.source = mac.0;
        self
    }

    pub fn set_destination(&mut self, mac: Mac) -> &mut Eth {
        self.0.destination = mac.0;
        self
    }

    pub(crate) fn set_ether_type(&mut self, ether_type: u16) -> &mut Eth {
        self.0.ether_type = EtherType(ether_type);
        self
    }

    pub(crate) fn parse(buf: &[u8]) -> Result<(Eth, &[u8]), ParseError> {
        ParseError::check_len(Layer::Eth, buf, Eth::LEN)?;
        let (inner, rest) =
            Ethernet2Header::from_slice(buf).map_err(|e| ParseError::invalid(Layer::Eth, e))?;
        Ok((Eth(inner), rest))
    }

    pub(crate) fn emit(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.0.to_bytes());
    }
}
