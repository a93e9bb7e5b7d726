// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Parse and emit errors.

use std::fmt::Display;

/// The protocol layer a [`ParseError`] refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layer {
    Eth,
    Arp,
    Ipv4,
    Ipv6,
    Icmp,
    Tcp,
    Udp,
    Vxlan,
}

impl Display for Layer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Layer::Eth => "ethernet",
            Layer::Arp => "arp",
            Layer::Ipv4 => "ipv4",
            Layer::Ipv6 => "ipv6",
            Layer::Icmp => "icmp",
            Layer::Tcp => "tcp",
            Layer::Udp => "udp",
            Layer::Vxlan => "vxlan",
        };
        f.write_str(s)
    }
}

/// How far a frame has been decoded.
///
/// Frames always come out of [`Frame::parse`] at [`ParseLevel::Ip`].
///
/// [`Frame::parse`]: crate::frame::Frame::parse
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ParseLevel {
    /// Ethernet plus ARP or the IP header.
    Ip,
    /// Everything above, plus TCP, UDP or ICMP.
    Transport,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("{layer}: expected at least {expected} bytes, got {actual}")]
pub struct LengthError {
    pub layer: Layer,
    pub expected: usize,
    pub actual: usize,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error(transparent)]
    Length(#[from] LengthError),
    #[error("invalid {layer} header: {reason}")]
    Invalid { layer: Layer, reason: String },
}

impl ParseError {
    pub(crate) fn invalid(layer: Layer, reason: impl Display) -> Self {
        ParseError::Invalid {
            layer,
            reason: reason.to_string(),
        }
    }

    pub(crate) fn check_len(layer: Layer, buf: &[u8], expected: usize) -> Result<(), Self> {
        if buf.len() < expected {
            return Err(ParseError::Length(LengthError {
                layer,
                expected,
                actual: buf.len(),
            }));
        }
        Ok(())
    }
}

/// Errors raised while serializing a frame.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum EmitError {
    #[error("payload of {0} bytes does not fit the header")]
    TooBig(usize),
    #[error("source and destination addresses are of different families")]
    FamilyMismatch,
    #[error("tcp options do not fit the header: {0}")]
    TcpOptions(String),
}
