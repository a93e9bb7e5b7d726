// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Results returned by the node callbacks.
//!
//! The same [`HandleResult`] is returned by [`Node::pre_handle`] and [`Node::handle`], but the
//! two callers read it differently. [`HandleResult::as_edge_decision`] and
//! [`HandleResult::as_outcome`] spell out the two readings.
//!
//! [`Node::pre_handle`]: crate::graph::Node::pre_handle
//! [`Node::handle`]: crate::graph::Node::handle

use strum::IntoStaticStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoStaticStr)]
#[strum(serialize_all = "UPPERCASE")]
pub enum HandleResult {
    Pass,
    Continue,
    Pick,
    Drop,
    Stolen,
}

impl std::fmt::Display for HandleResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.into())
    }
}

/// How a candidate's `pre_handle` result affects the egress walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeDecision {
    /// Take this candidate.
    Accept,
    /// Take this candidate only if no other is left.
    AcceptIfLast,
    /// Try the next candidate.
    Skip,
    /// Stop the walk, nothing is selected.
    Abort,
}

/// What the scheduler does with a packet once `handle` returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub enum Outcome {
    /// Continue with the node in `pkb.next`.
    Forward,
    Drop,
    /// The node took the packet; the scheduler forgets about it.
    Stolen,
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.into())
    }
}

impl HandleResult {
    /// Reading used while walking the candidates of an egress.
    #[must_use]
    pub fn as_edge_decision(self) -> EdgeDecision {
        match self {
            HandleResult::Pass => EdgeDecision::AcceptIfLast,
            HandleResult::Continue => EdgeDecision::Skip,
            HandleResult::Pick | HandleResult::Stolen => EdgeDecision::Accept,
            HandleResult::Drop => EdgeDecision::Abort,
        }
    }

    /// Reading used by the scheduler after a node handled a packet.
    #[must_use]
    pub fn as_outcome(self) -> Outcome {
        match self {
            HandleResult::Pass | HandleResult::Pick => Outcome::Forward,
            HandleResult::Continue | HandleResult::Drop => Outcome::Drop,
            HandleResult::Stolen => Outcome::Stolen,
        }
    }
}
