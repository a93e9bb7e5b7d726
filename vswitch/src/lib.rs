// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! A software virtual switch built as a graph of packet processing nodes.
//!
//! Frames enter through [`Switch::receive`] and walk the node graph until they are sent out
//! of an [`Iface`], handed to a local listener or dropped. Each virtual network (VPC) owns
//! its MAC, ARP/NDP, route and synthetic-ip tables plus a connection tracking table.

#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

pub mod config;
pub mod debugger;
pub mod errors;
pub mod graph;
pub mod iface;
pub mod network;
pub mod nodes;
pub mod pkb;
pub mod scheduler;
pub mod stats;
pub mod switch;

#[cfg(test)]
pub(crate) mod testing;

pub use config::{NetworkConfig, SwitchConfig};
pub use errors::{ConfigError, GraphError, NetworkError};
pub use iface::{CsumRecalc, Iface, IfaceIndex, IfaceParams};
pub use pkb::PacketBuffer;
pub use scheduler::{NodeGraphScheduler, SchedulerHooks};
pub use stats::{DropReason, DropStats};
pub use switch::{Switch, SwitchState};
