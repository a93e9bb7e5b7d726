// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! What a node sees of the switch while it handles a packet, and the scheduling loops.

use crate::graph::result::{EdgeDecision, HandleResult, Outcome};
use crate::graph::{EgressId, NodeGraph, NodeId};
use crate::pkb::PacketBuffer;
use crate::scheduler::{PendingQueues, SchedulerHooks};
use crate::stats::DropReason;
use crate::switch::SwitchState;
use std::time::Instant;
use tracing::{info, trace};

use tracectl::custom_target;
/// Target of the per-packet traces.
pub const PACKET_TRACE: &str = "packet-trace";
custom_target!(PACKET_TRACE, LevelFilter::INFO, &["vswitch", "graph"]);

/// Scheduling context handed to [`Node::handle`].
///
/// A node cannot run another node directly: generated packets go through
/// [`NodeContext::schedule`] and are only processed once the current node returns. This keeps
/// the stack depth bounded whatever the fan-out.
///
/// [`Node::handle`]: crate::graph::Node::handle
pub struct NodeContext<'a> {
    graph: &'a NodeGraph,
    /// Networks and interfaces of the switch.
    pub state: &'a mut SwitchState,
    pending: &'a mut PendingQueues,
    hooks: &'a mut dyn SchedulerHooks,
    now: Instant,
}

impl<'a> NodeContext<'a> {
    pub(crate) fn new(
        graph: &'a NodeGraph,
        state: &'a mut SwitchState,
        pending: &'a mut PendingQueues,
        hooks: &'a mut dyn SchedulerHooks,
        now: Instant,
    ) -> Self {
        Self {
            graph,
            state,
            pending,
            hooks,
            now,
        }
    }

    #[must_use]
    pub fn graph(&self) -> &'a NodeGraph {
        self.graph
    }

    /// The time the current batch of packets is processed at.
    #[must_use]
    pub fn now(&self) -> Instant {
        self.now
    }

    /// Whether a packet was generated since the current node started handling its packet.
    #[must_use]
    pub fn generated(&self) -> bool {
        self.pending.generated
    }

    /// Pick the successor of `pkb` among the candidates of `egress`.
    ///
    /// Candidates are tried by increasing distance. The first one whose `pre_handle` picks the
    /// packet is selected; a candidate that merely passes is only selected if it is the last
    /// one. If nothing is selected the packet goes to `error-drop`.
    pub fn next(&mut self, pkb: &mut PacketBuffer, egress: EgressId) -> HandleResult {
        let graph = self.graph;
        let candidates = graph.candidates(egress);
        for (i, id) in candidates.iter().enumerate() {
            let decision = graph.node(*id).pre_handle(pkb).as_edge_decision();
            let last = i + 1 == candidates.len();
            match decision {
                EdgeDecision::Accept => return Self::select(pkb, graph, *id),
                EdgeDecision::AcceptIfLast if last => return Self::select(pkb, graph, *id),
                EdgeDecision::AcceptIfLast | EdgeDecision::Skip => {}
                EdgeDecision::Abort => break,
            }
        }
        pkb.debugger
            .line(format_args!("no candidate on egress {}", graph.egress_name(egress)));
        self.drop(pkb, DropReason::NoEgress)
    }

    fn select(pkb: &mut PacketBuffer, graph: &NodeGraph, id: NodeId) -> HandleResult {
        trace!("next node is {}", graph.name(id));
        pkb.next = Some(id);
        HandleResult::Pick
    }

    /// Send `pkb` to `error-drop`, accounted under `reason`.
    pub fn drop(&mut self, pkb: &mut PacketBuffer, reason: DropReason) -> HandleResult {
        pkb.debugger.line(format_args!("drop: {reason}"));
        pkb.drop_reason = Some(reason);
        pkb.next = Some(self.graph.error_drop());
        HandleResult::Pick
    }

    /// Queue a generated packet. Its successor must already be set with [`NodeContext::next`].
    pub fn schedule(&mut self, mut pkb: PacketBuffer) {
        let Some(next) = pkb.next else {
            trace!("generated packet without a next node: {pkb}");
            pkb.debugger.reset_indent();
            pkb.debugger.line("dropped: next node is not set");
            self.finish(pkb, Outcome::Drop);
            return;
        };
        self.set_trace(&mut pkb);
        self.pending.push(next, pkb);
    }

    pub(crate) fn set_trace(&mut self, pkb: &mut PacketBuffer) {
        if !pkb.debugger.is_on() && self.hooks.trace_packet(pkb) {
            pkb.debugger.set_on(true);
        }
    }

    fn finish(&mut self, mut pkb: PacketBuffer, outcome: Outcome) {
        if pkb.debugger.is_on() {
            info!(target: PACKET_TRACE, "{pkb} {outcome}\n{}", pkb.debugger.take());
        }
        self.hooks.packet_dropped_or_stolen(&pkb, outcome);
    }

    fn run_node(&mut self, id: NodeId, pkb: &mut PacketBuffer) -> HandleResult {
        let graph = self.graph;
        let node = graph.node(id);
        pkb.debugger.reset_indent();
        pkb.debugger.line(format_args!("node: {}", node.name()));
        pkb.debugger.inc_indent();
        pkb.debugger.inc_indent();
        self.pending.generated = false;
        pkb.next = None;
        let result = node.handle(pkb, self);
        pkb.debugger.dec_indent();
        pkb.debugger.line(format_args!("result: {result}"));
        result
    }

    /// Walk one packet through the graph until it stops, handling after each node the
    /// packets that were queued for that same node meanwhile.
    pub(crate) fn do_schedule(&mut self, mut pkb: PacketBuffer) {
        loop {
            let Some(id) = pkb.next else {
                pkb.debugger.reset_indent();
                pkb.debugger.line("dropped: next node is not set");
                self.finish(pkb, Outcome::Drop);
                return;
            };
            let outcome = self.run_node(id, &mut pkb).as_outcome();
            if outcome != Outcome::Forward {
                self.finish(pkb, outcome);
                self.schedule_next_map(id);
                return;
            }
            self.schedule_next_map(id);
        }
    }

    /// Handle the packets waiting for node `id`. Forwarded ones are queued for their next node.
    fn schedule_next_map(&mut self, id: NodeId) {
        while let Some(mut pkb) = self.pending.pop(id) {
            match self.run_node(id, &mut pkb).as_outcome() {
                Outcome::Forward => self.schedule(pkb),
                outcome => self.finish(pkb, outcome),
            }
        }
    }

    /// Drain all queues, one packet per queue and round, until they are all empty.
    pub(crate) fn post_handle(&mut self) {
        loop {
            let mut handled = false;
            for id in self.pending.node_ids() {
                if let Some(pkb) = self.pending.pop(id) {
                    self.do_schedule(pkb);
                    handled = true;
                }
            }
            if !handled {
                break;
            }
        }
    }
}
