// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Runs packets through the node graph.
//!
//! A packet injected with [`NodeGraphScheduler::schedule`] is walked node by node until it is
//! dropped, stolen or sent. Packets generated on the way (copies for a flood, ARP requests,
//! replies) are queued per target node and processed breadth first once the injected packet
//! stops, so the recursion depth never depends on the amount of fan-out.

use crate::graph::{NodeContext, NodeGraph, NodeId, Outcome};
use crate::pkb::PacketBuffer;
use crate::switch::SwitchState;
use ordermap::OrderMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

/// Callbacks for the application embedding the switch.
pub trait SchedulerHooks {
    /// Called once for every packet that was dropped or stolen.
    fn packet_dropped_or_stolen(&mut self, _pkb: &PacketBuffer, _outcome: Outcome) {}

    /// Whether to record a trace for this packet. Only asked for packets not traced yet.
    fn trace_packet(&mut self, _pkb: &PacketBuffer) -> bool {
        false
    }
}

/// Hooks that do nothing.
#[derive(Debug, Default)]
pub struct NoHooks;

impl SchedulerHooks for NoHooks {}

/// Packets waiting for a node, by node.
#[derive(Debug, Default)]
pub struct PendingQueues {
    queues: OrderMap<NodeId, VecDeque<PacketBuffer>>,
    pub(crate) generated: bool,
}

impl PendingQueues {
    pub(crate) fn push(&mut self, next: NodeId, pkb: PacketBuffer) {
        self.queues.entry(next).or_default().push_back(pkb);
        self.generated = true;
    }

    pub(crate) fn pop(&mut self, node: NodeId) -> Option<PacketBuffer> {
        self.queues.get_mut(&node)?.pop_front()
    }

    pub(crate) fn node_ids(&self) -> Vec<NodeId> {
        self.queues.keys().copied().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.queues.values().map(VecDeque::len).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queues.values().all(VecDeque::is_empty)
    }
}

pub struct NodeGraphScheduler {
    graph: Arc<NodeGraph>,
    pending: PendingQueues,
    hooks: Box<dyn SchedulerHooks>,
}

impl NodeGraphScheduler {
    #[must_use]
    pub fn new(graph: Arc<NodeGraph>) -> Self {
        Self::with_hooks(graph, Box::new(NoHooks))
    }

    #[must_use]
    pub fn with_hooks(graph: Arc<NodeGraph>, hooks: Box<dyn SchedulerHooks>) -> Self {
        Self {
            graph,
            pending: PendingQueues::default(),
            hooks,
        }
    }

    pub fn set_hooks(&mut self, hooks: Box<dyn SchedulerHooks>) {
        self.hooks = hooks;
    }

    #[must_use]
    pub fn graph(&self) -> &Arc<NodeGraph> {
        &self.graph
    }

    /// Run `pkb`, then everything it generated, to completion.
    pub fn schedule(&mut self, mut pkb: PacketBuffer, state: &mut SwitchState, now: Instant) {
        let graph = Arc::clone(&self.graph);
        let mut ctx = NodeContext::new(&graph, state, &mut self.pending, self.hooks.as_mut(), now);
        ctx.set_trace(&mut pkb);
        ctx.do_schedule(pkb);
        ctx.post_handle();
    }

    /// Run a batch: the first packet is walked first, the others are queued behind it.
    pub fn schedule_all(&mut self, pkbs: Vec<PacketBuffer>, state: &mut SwitchState, now: Instant) {
        let mut pkbs = pkbs.into_iter();
        let Some(first) = pkbs.next() else {
            return;
        };
        let graph = Arc::clone(&self.graph);
        let mut ctx = NodeContext::new(&graph, state, &mut self.pending, self.hooks.as_mut(), now);
        for pkb in pkbs {
            ctx.schedule(pkb);
        }
        drop(ctx);
        self.schedule(first, state, now);
    }
}

impl std::fmt::Debug for NodeGraphScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeGraphScheduler")
            .field("graph", &self.graph)
            .field("pending", &self.pending.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::graph::{EgressId, EgressTable, GraphBuilder, HandleResult, Node};
    use crate::nodes::ErrorDrop;
    use crate::stats::DropReason;
    use crate::testing::{RecordingHooks, mac, vni};
    use net::{EthPayload, Frame};
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;

    type Visits = Arc<Mutex<Vec<&'static str>>>;

    /// Sends everything to its `out` egress, after queueing `copies` copies on `side`.
    struct Source {
        copies: usize,
        out: EgressId,
        side: EgressId,
    }

    impl Node for Source {
        fn name(&self) -> &'static str {
            "source"
        }

        fn init_node(&mut self, egresses: &mut EgressTable) {
            self.out = egresses.resolve("out");
            self.side = egresses.resolve("side");
        }

        fn handle(&self, pkb: &mut PacketBuffer, ctx: &mut NodeContext<'_>) -> HandleResult {
            for _ in 0..self.copies {
                let mut copy = pkb.copy();
                ctx.next(&mut copy, self.side);
                ctx.schedule(copy);
            }
            ctx.next(pkb, self.out)
        }
    }

    /// Answers `pre_handle` with a fixed result and steals what it handles.
    struct Sink {
        name: &'static str,
        pre: HandleResult,
        visits: Visits,
    }

    impl Node for Sink {
        fn name(&self) -> &'static str {
            self.name
        }

        fn pre_handle(&self, _pkb: &PacketBuffer) -> HandleResult {
            self.pre
        }

        fn handle(&self, _pkb: &mut PacketBuffer, _ctx: &mut NodeContext<'_>) -> HandleResult {
            self.visits.lock().push(self.name);
            HandleResult::Stolen
        }
    }

    struct Run {
        visits: Vec<&'static str>,
        hooks: RecordingHooks,
        state: SwitchState,
    }

    /// Build `source` plus one sink per entry of `sinks`, the sinks being the candidates of
    /// `source`'s `out` egress in order. Side copies go to the sink named "side".
    fn run(sinks: &[(&'static str, HandleResult)], copies: usize) -> Run {
        let visits = Visits::default();
        let mut builder = GraphBuilder::new();
        builder
            .add_node(Box::new(Source {
                copies,
                out: EgressId::default(),
                side: EgressId::default(),
            }))
            .unwrap();
        builder.add_node(Box::new(ErrorDrop)).unwrap();
        for (distance, (name, pre)) in (0u32..).zip(sinks) {
            builder
                .add_node(Box::new(Sink {
                    name,
                    pre: *pre,
                    visits: visits.clone(),
                }))
                .unwrap();
            if *name == "side" {
                builder.add_edge("source", name, "side", 0);
            } else {
                builder.add_edge("source", name, "out", distance);
            }
        }
        let graph = Arc::new(builder.build().unwrap());
        let hooks = RecordingHooks::default();
        let mut scheduler = NodeGraphScheduler::with_hooks(graph.clone(), Box::new(hooks.clone()));
        let mut state = SwitchState::default();
        let frame = Frame::new(
            mac(1),
            mac(2),
            EthPayload::Other {
                ether_type: 0x88b5,
                bytes: vec![0; 46],
            },
        );
        let mut pkb = PacketBuffer::from_frame(vni(1), frame);
        pkb.next = graph.lookup("source");
        scheduler.schedule(pkb, &mut state, Instant::now());
        let visits = visits.lock().clone();
        Run {
            visits,
            hooks,
            state,
        }
    }

    #[test]
    fn empty_egress_drops() {
        let run = run(&[], 0);
        assert!(run.visits.is_empty());
        assert_eq!(run.state.drop_stats.get(DropReason::NoEgress), 1);
        assert_eq!(
            *run.hooks.outcomes.lock(),
            vec![(Outcome::Drop, Some(DropReason::NoEgress))]
        );
    }

    #[test]
    fn candidate_selection() {
        use HandleResult::{Continue, Drop, Pass, Pick, Stolen};
        let cases: [([HandleResult; 3], Option<&str>); 7] = [
            ([Pick, Pass, Pass], Some("a")),
            ([Pass, Pass, Pass], Some("c")),
            ([Continue, Continue, Pass], Some("c")),
            ([Pass, Continue, Pick], Some("c")),
            ([Continue, Stolen, Pass], Some("b")),
            ([Pass, Pass, Continue], None),
            ([Continue, Drop, Pick], None),
        ];
        for (pre, expected) in cases {
            let run = run(&[("a", pre[0]), ("b", pre[1]), ("c", pre[2])], 0);
            assert_eq!(run.visits.first().copied(), expected, "{pre:?}");
            let no_egress = u64::from(expected.is_none());
            assert_eq!(run.state.drop_stats.get(DropReason::NoEgress), no_egress, "{pre:?}");
        }
    }

    #[test]
    fn generated_packets_run_after_their_parent() {
        let run = run(&[("a", HandleResult::Pass), ("side", HandleResult::Pass)], 3);
        assert_eq!(run.visits, vec!["a", "side", "side", "side"]);
        let outcomes = run.hooks.outcomes.lock();
        assert_eq!(outcomes.len(), 4);
        assert!(outcomes.iter().all(|(o, _)| *o == Outcome::Stolen));
    }
}
