// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Planning of the atomic link/unlink calls that realize a
//! [`MembershipDiff`](crate::MembershipDiff).
//!
//! The control plane enforces different call-target rules for the two
//! directions:
//!
//! * Force-link must be invoked on the node being added, and its payload is
//!   the full membership the group should have once that call lands.
//! * Force-unlink must be invoked on a node that stays in the group (a node
//!   cannot unlink itself), and its payload is the set of peers to drop.

use georep_types::Invocation;
use georep_types::NodeId;
use serde::Deserialize;
use serde::Serialize;

/// Plan one force-link call per node in `to_link`, in order.
///
/// Each call targets the node being added and carries every node that should
/// be linked after it: `remaining` followed by the nodes added so far.
pub fn plan_links(
    remaining: &[NodeId],
    to_link: &[NodeId],
) -> Vec<Invocation> {
    let mut members = remaining.to_vec();
    to_link
        .iter()
        .map(|id| {
            members.push(id.clone());
            Invocation::new(id.clone(), members.clone())
        })
        .collect()
}

/// Plan one force-unlink call per node in `to_unlink`, all issued through the
/// first remaining member.
///
/// If nothing remains, the group is being dissolved elsewhere and there is no
/// member left to issue the calls through.
pub fn plan_unlinks(
    remaining: &[NodeId],
    to_unlink: &[NodeId],
) -> Vec<Invocation> {
    let Some(anchor) = remaining.first() else {
        return Vec::new();
    };
    to_unlink
        .iter()
        .map(|id| Invocation::new(anchor.clone(), vec![id.clone()]))
        .collect()
}

/// Plan a single force-unlink call dropping every node in `to_unlink` at once.
///
/// Only appropriate against a control plane known to handle multi-node unlink
/// payloads reliably; see [`UnlinkStrategy::Batched`].
pub fn plan_unlinks_batched(
    remaining: &[NodeId],
    to_unlink: &[NodeId],
) -> Vec<Invocation> {
    match remaining.first() {
        Some(anchor) if !to_unlink.is_empty() => {
            vec![Invocation::new(anchor.clone(), to_unlink.to_vec())]
        }
        _ => Vec::new(),
    }
}

/// How unlinks are grouped into remote calls.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnlinkStrategy {
    /// One call per node being removed. Multi-node payloads have been seen to
    /// be unreliable, so this is the default.
    #[default]
    PerNode,
    /// One call for all nodes being removed.
    Batched,
}

impl UnlinkStrategy {
    pub fn plan(
        &self,
        remaining: &[NodeId],
        to_unlink: &[NodeId],
    ) -> Vec<Invocation> {
        match self {
            UnlinkStrategy::PerNode => plan_unlinks(remaining, to_unlink),
            UnlinkStrategy::Batched => {
                plan_unlinks_batched(remaining, to_unlink)
            }
        }
    }
}
