// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Parsed packet model used by the switch.
//!
//! A [`Frame`] is an Ethernet header plus a typed payload. ARP and the IP headers are parsed
//! eagerly; the transport layer is left as raw bytes until [`Frame::ensure_parsed`] is asked for
//! [`ParseLevel::Transport`].
//!
//! [`Frame`]: frame::Frame
//! [`Frame::ensure_parsed`]: frame::Frame::ensure_parsed
//! [`ParseLevel::Transport`]: parse::ParseLevel::Transport

#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

pub mod arp;
pub mod checksum;
pub mod eth;
pub mod frame;
pub mod icmp;
pub mod ip;
pub mod parse;
pub mod tcp;
pub mod udp;
pub mod vxlan;

pub use eth::mac::Mac;
pub use frame::{EthPayload, Frame, IpPacket, Transport};
pub use parse::{EmitError, ParseError, ParseLevel};
pub use vxlan::{Vni, Vxlan};
