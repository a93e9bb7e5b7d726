// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The [`Node`] trait.

use crate::graph::builder::{EdgeBuilder, EgressTable};
use crate::graph::context::NodeContext;
use crate::graph::result::HandleResult;
use crate::pkb::PacketBuffer;

/// A named packet processing step.
///
/// A node is built in three phases. It is first added to a [`GraphBuilder`], then asked for
/// its outgoing edges with [`Node::init_graph`], and finally resolves the egresses it uses into
/// [`EgressId`]s in [`Node::init_node`]. After that the graph is sealed and the node is only
/// ever called through `&self`.
///
/// [`GraphBuilder`]: crate::graph::GraphBuilder
/// [`EgressId`]: crate::graph::EgressId
pub trait Node: Send + Sync {
    /// Unique name of the node in its graph.
    fn name(&self) -> &'static str;

    /// Declare the edges leaving this node.
    fn init_graph(&self, _edges: &mut EdgeBuilder) {}

    /// Resolve egress names into ids.
    fn init_node(&mut self, _egresses: &mut EgressTable) {}

    /// Cheap check run by the previous node while it picks a candidate on one of its
    /// egresses.
    fn pre_handle(&self, _pkb: &PacketBuffer) -> HandleResult {
        HandleResult::Pass
    }

    /// Process the packet. To forward it, set the successor with [`NodeContext::next`] and
    /// return what it returned.
    fn handle(&self, pkb: &mut PacketBuffer, ctx: &mut NodeContext<'_>) -> HandleResult;
}
