// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Graph construction.

use crate::errors::GraphError;
use crate::graph::node::Node;
use crate::graph::{Egress, EgressId, NodeGraph, NodeId};
use ordermap::OrderMap;
use tracing::debug;

/// Name of the node every dropped packet is sent to.
pub const ERROR_DROP: &str = "error-drop";

#[derive(Debug, Clone, PartialEq, Eq)]
struct Edge {
    from: &'static str,
    to: &'static str,
    egress: &'static str,
    distance: u32,
}

/// Collects the edges declared by one node.
pub struct EdgeBuilder {
    from: &'static str,
    edges: Vec<Edge>,
}

impl EdgeBuilder {
    /// Add an edge from the current node to `to`, tried before edges of larger `distance` on
    /// the same egress.
    pub fn add(&mut self, to: &'static str, egress: &'static str, distance: u32) -> &mut Self {
        self.edges.push(Edge {
            from: self.from,
            to,
            egress,
            distance,
        });
        self
    }
}

/// Gives out the ids of the egresses of one node.
pub struct EgressTable<'a> {
    node: &'static str,
    candidates: &'a OrderMap<(&'static str, &'static str), Vec<NodeId>>,
    egresses: &'a mut Vec<Egress>,
    resolved: &'a mut Vec<(&'static str, &'static str)>,
}

impl EgressTable<'_> {
    /// The id of egress `name` of the current node. An egress without edges resolves to an
    /// empty candidate list and drops everything sent to it.
    pub fn resolve(&mut self, name: &'static str) -> EgressId {
        let key = (self.node, name);
        if let Some(pos) = self.resolved.iter().position(|k| *k == key) {
            return EgressId(pos);
        }
        let candidates = self.candidates.get(&key).cloned().unwrap_or_default();
        if candidates.is_empty() {
            debug!("{}: egress '{name}' has no edges", self.node);
        }
        self.egresses.push(Egress { name, candidates });
        self.resolved.push(key);
        EgressId(self.egresses.len() - 1)
    }
}

/// Builder of a [`NodeGraph`].
#[derive(Default)]
pub struct GraphBuilder {
    nodes: Vec<Box<dyn Node>>,
    names: OrderMap<&'static str, NodeId>,
    edges: Vec<Edge>,
}

impl GraphBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a node.
    ///
    /// # Errors
    ///
    /// Fails if a node with the same name exists.
    pub fn add_node(&mut self, node: Box<dyn Node>) -> Result<NodeId, GraphError> {
        let name = node.name();
        if self.names.contains_key(name) {
            return Err(GraphError::DuplicateNode(name));
        }
        let id = NodeId(self.nodes.len());
        self.names.insert(name, id);
        self.nodes.push(node);
        Ok(id)
    }

    /// Add an edge on top of the ones declared by the nodes themselves.
    pub fn add_edge(
        &mut self,
        from: &'static str,
        to: &'static str,
        egress: &'static str,
        distance: u32,
    ) -> &mut Self {
        self.edges.push(Edge {
            from,
            to,
            egress,
            distance,
        });
        self
    }

    fn node_id(&self, name: &'static str) -> Result<NodeId, GraphError> {
        self.names
            .get(name)
            .copied()
            .ok_or(GraphError::UnknownNode(name))
    }

    /// Collect the edges, resolve every egress and seal the graph.
    ///
    /// # Errors
    ///
    /// Fails if an edge names an unknown node, if edges are declared on an egress its node
    /// never resolves, or if there is no `error-drop` node.
    pub fn build(mut self) -> Result<NodeGraph, GraphError> {
        let error_drop = self.node_id(ERROR_DROP)?;

        let mut edges = std::mem::take(&mut self.edges);
        for node in &self.nodes {
            let mut builder = EdgeBuilder {
                from: node.name(),
                edges: Vec::new(),
            };
            node.init_graph(&mut builder);
            edges.extend(builder.edges);
        }

        // stable sort: equal distances keep declaration order
        edges.sort_by_key(|e| e.distance);
        let mut candidates: OrderMap<(&'static str, &'static str), Vec<NodeId>> = OrderMap::new();
        for edge in &edges {
            self.node_id(edge.from)?;
            let to = self.node_id(edge.to)?;
            let list = candidates.entry((edge.from, edge.egress)).or_default();
            if !list.contains(&to) {
                list.push(to);
            }
        }

        let mut egresses = Vec::new();
        let mut resolved = Vec::new();
        for node in &mut self.nodes {
            let mut table = EgressTable {
                node: node.name(),
                candidates: &candidates,
                egresses: &mut egresses,
                resolved: &mut resolved,
            };
            node.init_node(&mut table);
        }
        if let Some(&(node, egress)) = candidates.keys().find(|k| !resolved.contains(k)) {
            return Err(GraphError::UnresolvedEgress { node, egress });
        }

        debug!(
            "Built node graph with {} nodes and {} edges",
            self.nodes.len(),
            edges.len()
        );
        Ok(NodeGraph {
            nodes: self.nodes,
            names: self.names,
            egresses,
            error_drop,
        })
    }
}
