// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! [VXLAN][RFC7348] header, including the reserved fields the switch uses between peers.
//!
//! [RFC7348]: https://datatracker.ietf.org/doc/html/rfc7348#section-5

mod vni;

use crate::parse::{Layer, ParseError};
pub use vni::{InvalidVni, Vni};

/// A VXLAN header.
///
/// Unlike a strict RFC parser, the reserved fields are preserved: switches in the same overlay
/// use `reserved1` for loop detection flags and `reserved2` as a hop counter.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Vxlan {
    flags: u8,
    reserved1: u32,
    vni: Vni,
    reserved2: u8,
}

impl Vxlan {
    pub const LEN: usize = 8;
    /// The I flag, which must be set for the VNI to be valid.
    pub const FLAG_VNI: u8 = 0b0000_1000;
    pub const MAX_RESERVED1: u32 = 0x00_FF_FF_FF;

    #[must_use]
    pub fn new(vni: Vni) -> Vxlan {
        Vxlan {
            flags: Vxlan::FLAG_VNI,
            reserved1: 0,
            vni,
            reserved2: 0,
        }
    }

    #[must_use]
    pub const fn vni(&self) -> Vni {
        self.vni
    }

    pub fn set_vni(&mut self, vni: Vni) -> &mut Vxlan {
        self.vni = vni;
        self
    }

    /// The 24 bit field between the flags and the VNI.
    #[must_use]
    pub const fn reserved1(&self) -> u32 {
        self.reserved1
    }

    /// Values are masked to 24 bits.
    pub fn set_reserved1(&mut self, value: u32) -> &mut Vxlan {
        self.reserved1 = value & Vxlan::MAX_RESERVED1;
        self
    }

    /// The last byte of the header.
    #[must_use]
    pub const fn reserved2(&self) -> u8 {
        self.reserved2
    }

    pub fn set_reserved2(&mut self, value: u8) -> &mut Vxlan {
        self.reserved2 = value;
        self
    }

    /// Parse the 8 byte header.
    ///
    /// # Errors
    ///
    /// Fails on short input, a missing I flag or an illegal VNI.
    pub fn parse(buf: &[u8]) -> Result<Vxlan, ParseError> {
        ParseError::check_len(Layer::Vxlan, buf, Vxlan::LEN)?;
        if buf[0] & Vxlan::FLAG_VNI == 0 {
            return Err(ParseError::invalid(Layer::Vxlan, "I flag is not set"));
        }
        let reserved1 = u32::from_be_bytes([0, buf[1], buf[2], buf[3]]);
        let vni = Vni::new_checked(u32::from_be_bytes([0, buf[4], buf[5], buf[6]]))
            .map_err(|e| ParseError::invalid(Layer::Vxlan, e))?;
        Ok(Vxlan {
            flags: buf[0],
            reserved1,
            vni,
            reserved2: buf[7],
        })
    }

    #[must_use]
    pub fn to_bytes(&self) -> [u8; Vxlan::LEN] {
        let r1 = self.reserved1.to_be_bytes();
        let vni = self.vni.as_u32().to_be_bytes();
        [
            self.flags, r1[1], r1[2], r1[3], vni[1], vni[2], vni[3], self.reserved2,
        ]
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn reserved_fields_survive() {
        let mut hdr = Vxlan::new(Vni::new_checked(0x12_34_56).unwrap());
        hdr.set_reserved1(0x80_00_01).set_reserved2(251);
        let bytes = hdr.to_bytes();
        assert_eq!(bytes, [0x08, 0x80, 0x00, 0x01, 0x12, 0x34, 0x56, 251]);
        assert_eq!(Vxlan::parse(&bytes).unwrap(), hdr);
    }

    #[test]
    fn reserved1_is_masked() {
        let mut hdr = Vxlan::new(Vni::new_checked(1).unwrap());
        hdr.set_reserved1(0xff_80_00_00);
        assert_eq!(hdr.reserved1(), 0x80_00_00);
    }

    #[test]
    fn invalid_headers() {
        assert!(Vxlan::parse(&[0, 0, 0, 0, 0, 0, 1, 0]).is_err());
        assert!(Vxlan::parse(&[8, 0, 0, 0, 0, 0, 0, 0]).is_err());
        assert!(Vxlan::parse(&[8, 0, 0]).is_err());
    }
}
