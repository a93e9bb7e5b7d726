// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Internet checksum ([RFC1071]) for the headers etherparse does not cover.
//!
//! [RFC1071]: https://datatracker.ietf.org/doc/html/rfc1071

use std::net::Ipv6Addr;

/// Accumulates 16 bit big endian words.
#[derive(Debug, Default, Clone, Copy)]
pub struct Sum16(u32);

impl Sum16 {
    #[must_use]
    pub fn add(self, bytes: &[u8]) -> Sum16 {
        let mut sum = self.0;
        let mut chunks = bytes.chunks_exact(2);
        for c in &mut chunks {
            sum = fold(sum + u32::from(u16::from_be_bytes([c[0], c[1]])));
        }
        if let [last] = chunks.remainder() {
            sum = fold(sum + (u32::from(*last) << 8));
        }
        Sum16(sum)
    }

    /// The ones complement of the folded sum.
    #[must_use]
    pub fn finish(self) -> u16 {
        // fold() keeps the sum within 17 bits
        #[allow(clippy::cast_possible_truncation)]
        let folded = fold(fold(self.0)) as u16;
        !folded
    }
}

fn fold(sum: u32) -> u32 {
    (sum & 0xffff) + (sum >> 16)
}

/// ICMPv4 checksum over the whole message.
#[must_use]
pub fn icmpv4(message: &[u8]) -> u16 {
    Sum16::default().add(message).finish()
}

/// ICMPv6 checksum, including the IPv6 pseudo header.
#[must_use]
pub fn icmpv6(src: Ipv6Addr, dst: Ipv6Addr, message: &[u8]) -> u16 {
    let len = u32::try_from(message.len()).unwrap_or(u32::MAX);
    Sum16::default()
        .add(&src.octets())
        .add(&dst.octets())
        .add(&len.to_be_bytes())
        .add(&[0, 0, 0, 58])
        .add(message)
        .finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rfc1071_example() {
        // the example from section 3 of the rfc sums to 0xddf2
        let data = [0x00, 0x01, 0xf2, 0x03, 0xf4, 0xf5, 0xf6, 0xf7];
        assert_eq!(Sum16::default().add(&data).finish(), !0xddf2);
    }

    #[test]
    fn valid_message_sums_to_zero() {
        let mut msg = vec![8, 0, 0, 0, 0x12, 0x34, 0, 1, b'h', b'i', b'!'];
        let sum = icmpv4(&msg);
        msg[2..4].copy_from_slice(&sum.to_be_bytes());
        assert_eq!(icmpv4(&msg), 0);
    }
}
