// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Output of segments built by the l4 nodes, through the fastpath of their flow if it still
//! holds.

use crate::graph::{EdgeBuilder, EgressId, EgressTable, HandleResult, Node, NodeContext};
use crate::network::conntrack::Fastpath;
use crate::nodes::{DEV_OUTPUT, IP_OUTPUT, L4_OUTPUT};
use crate::pkb::PacketBuffer;
use crate::switch::SwitchState;
use tracing::debug;

use tracectl::trace_target;
trace_target!("l4-output", LevelFilter::WARN, &["vswitch", "l4"]);

#[derive(Debug, Default)]
pub struct L4Output {
    dev: EgressId,
    ip: EgressId,
}

impl L4Output {
    // The interface is still up and the destination was not learned elsewhere since.
    fn is_valid(state: &SwitchState, fastpath: &Fastpath) -> bool {
        state.live_iface(fastpath.iface).is_some()
            && state
                .network(fastpath.vni)
                .is_some_and(|n| n.mac_table.lookup(fastpath.dst) == Some(fastpath.iface))
    }
}

impl Node for L4Output {
    fn name(&self) -> &'static str {
        L4_OUTPUT
    }

    fn init_graph(&self, edges: &mut EdgeBuilder) {
        edges.add(DEV_OUTPUT, "dev", 0);
        edges.add(IP_OUTPUT, "ip", 0);
    }

    fn init_node(&mut self, egresses: &mut EgressTable) {
        self.dev = egresses.resolve("dev");
        self.ip = egresses.resolve("ip");
    }

    fn handle(&self, pkb: &mut PacketBuffer, ctx: &mut NodeContext<'_>) -> HandleResult {
        let nfi = self.name();
        let Some(flow) = pkb.flow.clone() else {
            return ctx.next(pkb, self.ip);
        };
        match flow.fastpath() {
            Some(fastpath) if Self::is_valid(ctx.state, &fastpath) => {
                pkb.frame_mut().set_src(fastpath.src).set_dst(fastpath.dst);
                pkb.set_network(fastpath.vni);
                pkb.devout = Some(fastpath.iface);
                pkb.debugger.line(format_args!("fastpath {fastpath}"));
                return ctx.next(pkb, self.dev);
            }
            Some(fastpath) => {
                debug!("{nfi}: fastpath {fastpath} no longer holds");
                flow.set_fastpath(None);
            }
            None => {}
        }
        // record one on the way out
        pkb.fastpath = true;
        ctx.next(pkb, self.ip)
    }
}
