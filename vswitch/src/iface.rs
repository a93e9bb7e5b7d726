// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Interfaces the switch sends frames to and receives frames from.

use crate::pkb::PacketBuffer;
use net::Vni;

/// Handle of an [`Iface`] attached to a switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IfaceIndex(pub(crate) u32);

impl std::fmt::Display for IfaceIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "iface#{}", self.0)
    }
}

/// Checksum handling for frames received from an interface.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CsumRecalc {
    /// Trust the checksums carried by the frame.
    #[default]
    None,
    /// Recompute ip and transport checksums before forwarding.
    All,
}

#[derive(Debug, Clone, PartialEq, Eq, derive_builder::Builder)]
#[builder(default)]
pub struct IfaceParams {
    /// Unset when the link has no known mtu (no mss clamping then).
    #[builder(setter(strip_option))]
    pub mtu: Option<u16>,
    pub flood_allowed: bool,
    pub csum_recalc: CsumRecalc,
}

impl Default for IfaceParams {
    fn default() -> Self {
        Self {
            mtu: Some(1500),
            flood_allowed: true,
            csum_recalc: CsumRecalc::None,
        }
    }
}

/// A device, tunnel or virtual endpoint plugged into the switch.
pub trait Iface: Send + Sync {
    fn name(&self) -> &str;

    /// The vni a frame tagged with `vni` belongs to on this side of the interface.
    /// A mismatch means the interface does not carry that network.
    fn local_side_vni(&self, vni: Vni) -> Vni {
        vni
    }

    /// Same as [`Iface::local_side_vni`] for the routing domain.
    fn local_side_vrf(&self, vrf: Vni) -> Vni {
        vrf
    }

    fn params(&self) -> IfaceParams {
        IfaceParams::default()
    }

    /// Bytes of encapsulation added by the interface.
    fn overhead(&self) -> u16 {
        0
    }

    fn is_disabled(&self) -> bool {
        false
    }

    fn send(&self, pkb: &PacketBuffer);
}
