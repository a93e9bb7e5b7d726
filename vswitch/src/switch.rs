// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The switch: a node graph, its scheduler and the state the nodes work on.

use crate::config::SwitchConfig;
use crate::errors::{ConfigError, GraphError, NetworkError};
use crate::graph::{NodeGraph, NodeId};
use crate::iface::{Iface, IfaceIndex};
use crate::network::VirtualNetwork;
use crate::nodes::{self, DEV_INPUT};
use crate::pkb::{Flow, PacketBuffer};
use crate::scheduler::{NodeGraphScheduler, SchedulerHooks};
use crate::stats::{DropReason, DropStats};
use ipnet::{Ipv4Net, Ipv6Net};
use net::ip::PROTO_UDP;
use net::{Frame, ParseLevel, Vni, Vxlan};
use ordermap::OrderMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

use tracectl::trace_target;
trace_target!("switch", LevelFilter::WARN, &["vswitch"]);

/// Everything the nodes read and update: networks, interfaces and counters.
#[derive(Default)]
pub struct SwitchState {
    pub config: SwitchConfig,
    networks: OrderMap<Vni, VirtualNetwork>,
    ifaces: OrderMap<IfaceIndex, Arc<dyn Iface>>,
    next_iface: u32,
    pub drop_stats: DropStats,
}

impl SwitchState {
    #[must_use]
    pub fn new(config: SwitchConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn network(&self, vni: Vni) -> Option<&VirtualNetwork> {
        self.networks.get(&vni)
    }

    pub fn network_mut(&mut self, vni: Vni) -> Option<&mut VirtualNetwork> {
        self.networks.get_mut(&vni)
    }

    pub fn networks(&self) -> impl Iterator<Item = &VirtualNetwork> {
        self.networks.values()
    }

    #[must_use]
    pub fn iface(&self, index: IfaceIndex) -> Option<&Arc<dyn Iface>> {
        self.ifaces.get(&index)
    }

    pub fn ifaces(&self) -> impl Iterator<Item = (IfaceIndex, &Arc<dyn Iface>)> {
        self.ifaces.iter().map(|(index, iface)| (*index, iface))
    }

    /// An attached interface that is not disabled.
    #[must_use]
    pub fn live_iface(&self, index: IfaceIndex) -> Option<&Arc<dyn Iface>> {
        self.iface(index).filter(|iface| !iface.is_disabled())
    }
}

impl std::fmt::Debug for SwitchState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SwitchState")
            .field("networks", &self.networks.keys().collect::<Vec<_>>())
            .field(
                "ifaces",
                &self.ifaces.values().map(|i| i.name()).collect::<Vec<_>>(),
            )
            .field("drop_stats", &self.drop_stats)
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
pub struct Switch {
    scheduler: NodeGraphScheduler,
    state: SwitchState,
    dev_input: NodeId,
}

impl Switch {
    /// A switch with the standard node graph and no networks.
    ///
    /// # Errors
    ///
    /// Fails if the node graph cannot be built.
    pub fn new(config: SwitchConfig) -> Result<Self, GraphError> {
        Self::with_graph(nodes::build_graph()?, config)
    }

    /// A switch running a custom graph. The graph must have a `dev-input` node.
    ///
    /// # Errors
    ///
    /// Fails if there is no `dev-input` node.
    pub fn with_graph(graph: NodeGraph, config: SwitchConfig) -> Result<Self, GraphError> {
        let dev_input = graph
            .lookup(DEV_INPUT)
            .ok_or(GraphError::UnknownNode(DEV_INPUT))?;
        Ok(Self {
            scheduler: NodeGraphScheduler::new(Arc::new(graph)),
            state: SwitchState::new(config),
            dev_input,
        })
    }

    /// Build a switch and its networks from a configuration.
    ///
    /// # Errors
    ///
    /// Fails on an invalid network, route or trace setting.
    pub fn from_config(config: SwitchConfig) -> Result<Self, ConfigError> {
        config.apply_trace()?;
        let networks = config.networks.clone();
        let mut switch = Self::new(config)?;
        for net in &networks {
            let network = VirtualNetwork::from_config(net, &switch.state.config)?;
            switch.insert_network(network)?;
        }
        info!("Switch created with {} networks", networks.len());
        Ok(switch)
    }

    pub fn set_hooks(&mut self, hooks: Box<dyn SchedulerHooks>) {
        self.scheduler.set_hooks(hooks);
    }

    #[must_use]
    pub fn graph(&self) -> &NodeGraph {
        self.scheduler.graph()
    }

    #[must_use]
    pub fn state(&self) -> &SwitchState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut SwitchState {
        &mut self.state
    }

    #[must_use]
    pub fn drop_stats(&self) -> &DropStats {
        &self.state.drop_stats
    }

    /// Create an empty network.
    ///
    /// # Errors
    ///
    /// Fails if the vni is taken.
    pub fn add_network(
        &mut self,
        vni: Vni,
        v4network: Ipv4Net,
        v6network: Option<Ipv6Net>,
    ) -> Result<&mut VirtualNetwork, NetworkError> {
        let network = VirtualNetwork::new(vni, v4network, v6network, &self.state.config);
        self.insert_network(network)
    }

    fn insert_network(
        &mut self,
        network: VirtualNetwork,
    ) -> Result<&mut VirtualNetwork, NetworkError> {
        let vni = network.vni;
        if self.state.networks.contains_key(&vni) {
            return Err(NetworkError::DuplicateNetwork(vni));
        }
        debug!("Adding network {network}");
        Ok(self.state.networks.entry(vni).or_insert(network))
    }

    #[must_use]
    pub fn network(&self, vni: Vni) -> Option<&VirtualNetwork> {
        self.state.network(vni)
    }

    pub fn network_mut(&mut self, vni: Vni) -> Option<&mut VirtualNetwork> {
        self.state.network_mut(vni)
    }

    /// Remove a network with all its tables.
    ///
    /// # Errors
    ///
    /// Fails if there is no such network.
    pub fn del_network(&mut self, vni: Vni) -> Result<VirtualNetwork, NetworkError> {
        let network = self
            .state
            .networks
            .remove(&vni)
            .ok_or(NetworkError::UnknownNetwork(vni))?;
        debug!("Removed network {network}");
        Ok(network)
    }

    pub fn attach_iface(&mut self, iface: Arc<dyn Iface>) -> IfaceIndex {
        let index = IfaceIndex(self.state.next_iface);
        self.state.next_iface += 1;
        debug!("Attached interface {} as {index}", iface.name());
        self.state.ifaces.insert(index, iface);
        index
    }

    /// Detach an interface and forget every mac learned on it.
    pub fn detach_iface(&mut self, index: IfaceIndex) -> Option<Arc<dyn Iface>> {
        let iface = self.state.ifaces.remove(&index)?;
        for network in self.state.networks.values_mut() {
            network.mac_table.disconnect(index);
        }
        debug!("Detached interface {} ({index})", iface.name());
        Some(iface)
    }

    /// Feed a frame read from `iface`. `vni` is the network the frame belongs to, `vxlan` the
    /// overlay header it was received with, if any.
    pub fn receive(
        &mut self,
        iface: IfaceIndex,
        vni: Vni,
        bytes: &[u8],
        vxlan: Option<Vxlan>,
        now: Instant,
    ) {
        let frame = match Frame::parse(bytes) {
            Ok(frame) => frame,
            Err(e) => {
                debug!("Dropping frame from {iface}: {e}");
                self.state.drop_stats.incr(DropReason::Malformed, 1);
                return;
            }
        };
        let mut pkb = PacketBuffer::from_device(iface, vni, frame);
        pkb.vxlan = vxlan;
        self.mark_udp_fastpath(&mut pkb, now);
        pkb.next = Some(self.dev_input);
        self.scheduler.schedule(pkb, &mut self.state, now);
    }

    // Frames of a known udp flow skip the graph and go straight to the listener.
    fn mark_udp_fastpath(&self, pkb: &mut PacketBuffer, now: Instant) {
        if pkb.vxlan.is_some() || pkb.ip().is_none_or(|ip| ip.header.protocol() != PROTO_UDP) {
            return;
        }
        let Some(network) = self.state.network(pkb.vni) else {
            return;
        };
        if pkb.ensure_parsed(ParseLevel::Transport).is_err() {
            return;
        }
        let Some((remote, local)) = pkb.ip().and_then(|ip| {
            let udp = ip.udp()?;
            Some((
                SocketAddr::new(ip.src(), udp.src_port),
                SocketAddr::new(ip.dst(), udp.dst_port),
            ))
        }) else {
            return;
        };
        if let Some(entry) = network.conntrack.lookup_udp(remote, local) {
            entry.lock().last_used = now;
            pkb.flow = Some(Flow::Udp(entry));
            pkb.fastpath = true;
        }
    }

    /// Run a packet built by the application, starting at node `node`.
    ///
    /// # Errors
    ///
    /// Fails if there is no such node.
    pub fn inject(
        &mut self,
        mut pkb: PacketBuffer,
        node: &'static str,
        now: Instant,
    ) -> Result<(), GraphError> {
        let id = self
            .graph()
            .lookup(node)
            .ok_or(GraphError::UnknownNode(node))?;
        pkb.next = Some(id);
        self.scheduler.schedule(pkb, &mut self.state, now);
        Ok(())
    }

    /// Run a packet whose next node is already set, e.g. one received from another switch.
    pub fn schedule(&mut self, pkb: PacketBuffer, now: Instant) {
        self.scheduler.schedule(pkb, &mut self.state, now);
    }

    pub fn schedule_all(&mut self, pkbs: Vec<PacketBuffer>, now: Instant) {
        self.scheduler.schedule_all(pkbs, &mut self.state, now);
    }

    /// Evict stale entries from the tables of every network.
    pub fn expire(&mut self, now: Instant) {
        for network in self.state.networks.values_mut() {
            network.expire(now);
        }
    }
}
