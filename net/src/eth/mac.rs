// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Mac address type and logic.

use arrayvec::ArrayVec;
use std::fmt::Display;
use std::net::Ipv6Addr;

/// A [MAC Address] type.
///
/// [MAC Address]: https://en.wikipedia.org/wiki/MAC_address
#[repr(transparent)]
#[derive(
    Debug,
    Default,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    serde::Serialize,
    serde::Deserialize,
)]
#[serde(try_from = "String", into = "String")]
pub struct Mac(pub [u8; 6]);

impl From<[u8; 6]> for Mac {
    fn from(value: [u8; 6]) -> Self {
        Mac(value)
    }
}

impl From<Mac> for [u8; 6] {
    fn from(value: Mac) -> Self {
        value.0
    }
}

impl AsRef<[u8; 6]> for Mac {
    fn as_ref(&self) -> &[u8; 6] {
        &self.0
    }
}

impl TryFrom<&[u8]> for Mac {
    type Error = MacFromStringError;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        <[u8; 6]>::try_from(value)
            .map(Mac)
            .map_err(|_| MacFromStringError::Invalid(format!("{value:02x?}")))
    }
}

/// Errors which can occur while converting to a [`Mac`]
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum MacFromStringError {
    #[error("invalid mac address: {0}")]
    Invalid(String),
}

impl TryFrom<&str> for Mac {
    type Error = MacFromStringError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let invalid = || MacFromStringError::Invalid(value.to_string());
        let octets = value
            .split(':')
            .try_fold(ArrayVec::<u8, 6>::new(), |mut acc, octet| {
                if octet.len() != 2 || !octet.chars().all(|c| c.is_ascii_hexdigit()) {
                    return Err(invalid());
                }
                let parsed = u8::from_str_radix(octet, 16).map_err(|_| invalid())?;
                acc.try_push(parsed).map_err(|_| invalid())?;
                Ok(acc)
            })?;
        octets.into_inner().map(Mac).map_err(|_| invalid())
    }
}

impl TryFrom<String> for Mac {
    type Error = MacFromStringError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Mac::try_from(value.as_str())
    }
}

impl From<Mac> for String {
    fn from(value: Mac) -> Self {
        value.to_string()
    }
}

impl Mac {
    /// The broadcast `Mac`
    pub const BROADCAST: Mac = Mac([u8::MAX; 6]);
    /// The zero `Mac`, used as the unknown target of ARP requests.
    pub const ZERO: Mac = Mac([0; 6]);

    /// The multicast `Mac` an IPv6 multicast address maps to (`33:33` + low 32 bits).
    #[must_use]
    pub fn ipv6_multicast(ip: Ipv6Addr) -> Mac {
        let o = ip.octets();
        Mac([0x33, 0x33, o[12], o[13], o[14], o[15]])
    }

    #[must_use]
    pub fn is_broadcast(&self) -> bool {
        self == &Mac::BROADCAST
    }

    /// Returns true iff the least significant bit of the first octet is one.
    #[must_use]
    pub fn is_multicast(&self) -> bool {
        self.0[0] & 0x01 == 0x01
    }

    #[must_use]
    pub fn is_unicast(&self) -> bool {
        !self.is_multicast()
    }

    #[must_use]
    pub fn is_zero(&self) -> bool {
        self == &Mac::ZERO
    }
}

impl Display for Mac {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let o = &self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            o[0], o[1], o[2], o[3], o[4], o[5]
        )
    }
}
