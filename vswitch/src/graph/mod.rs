// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The node graph.
//!
//! Nodes are stored in an arena and refer to each other through [`NodeId`]s. Every node
//! groups its outgoing edges into named egresses; the candidates of an egress are kept sorted
//! by distance and the first one whose `pre_handle` accepts the packet is chosen.

pub mod builder;
pub mod context;
pub mod node;
pub mod result;

pub use builder::{ERROR_DROP, EdgeBuilder, EgressTable, GraphBuilder};
pub use context::NodeContext;
pub use node::Node;
pub use result::{EdgeDecision, HandleResult, Outcome};

use ordermap::OrderMap;

use tracectl::trace_target;
trace_target!("graph", LevelFilter::WARN, &["vswitch", "graph"]);

/// Index of a node in its graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "node#{}", self.0)
    }
}

/// Index of a resolved egress in its graph.
///
/// The default value is not resolved and behaves as an egress without edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EgressId(usize);

impl Default for EgressId {
    fn default() -> Self {
        EgressId(usize::MAX)
    }
}

#[derive(Debug)]
pub(crate) struct Egress {
    name: &'static str,
    candidates: Vec<NodeId>,
}

/// A sealed graph.
pub struct NodeGraph {
    nodes: Vec<Box<dyn Node>>,
    names: OrderMap<&'static str, NodeId>,
    egresses: Vec<Egress>,
    error_drop: NodeId,
}

impl NodeGraph {
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<NodeId> {
        self.names.get(name).copied()
    }

    /// The node with the given id.
    ///
    /// # Panics
    ///
    /// Ids are only produced by the graph itself, an unknown id is a bug.
    #[must_use]
    pub fn node(&self, id: NodeId) -> &dyn Node {
        match self.nodes.get(id.0) {
            Some(node) => node.as_ref(),
            None => unreachable!("{id} is not in the graph"),
        }
    }

    #[must_use]
    pub fn name(&self, id: NodeId) -> &'static str {
        self.node(id).name()
    }

    #[must_use]
    pub fn error_drop(&self) -> NodeId {
        self.error_drop
    }

    /// Candidates of an egress, by increasing distance.
    #[must_use]
    pub fn candidates(&self, egress: EgressId) -> &[NodeId] {
        debug_assert!(
            egress == EgressId::default() || egress.0 < self.egresses.len(),
            "egress {egress:?} does not belong to this graph"
        );
        self.egresses
            .get(egress.0)
            .map_or(&[], |e| e.candidates.as_slice())
    }

    #[must_use]
    pub fn egress_name(&self, egress: EgressId) -> &'static str {
        self.egresses.get(egress.0).map_or("<unresolved>", |e| e.name)
    }

    pub fn node_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.names.keys().copied()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

impl std::fmt::Debug for NodeGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeGraph")
            .field("nodes", &self.names.keys().collect::<Vec<_>>())
            .field("egresses", &self.egresses.len())
            .finish_non_exhaustive()
    }
}
