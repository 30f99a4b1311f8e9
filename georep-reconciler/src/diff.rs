// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Membership diffing.

use georep_types::NodeId;
use serde::Serialize;

/// The result of comparing a group's current membership with its desired
/// membership.
///
/// `to_unlink` and `remaining` partition the current membership, and
/// `remaining` and `to_link` partition the desired membership. Each list keeps
/// the order of the input it was drawn from.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct MembershipDiff {
    /// Currently linked, not desired.
    pub to_unlink: Vec<NodeId>,
    /// Currently linked and desired.
    pub remaining: Vec<NodeId>,
    /// Desired, not currently linked.
    pub to_link: Vec<NodeId>,
}

impl MembershipDiff {
    /// Returns true if the current membership already matches the desired
    /// membership.
    pub fn is_empty(&self) -> bool {
        self.to_unlink.is_empty() && self.to_link.is_empty()
    }
}

/// Compare the membership `from` with the membership `to`.
pub fn diff(from: &[NodeId], to: &[NodeId]) -> MembershipDiff {
    let (remaining, to_unlink): (Vec<NodeId>, Vec<NodeId>) =
        from.iter().cloned().partition(|id| to.contains(id));
    let to_link =
        to.iter().filter(|id| !from.contains(id)).cloned().collect();
    MembershipDiff { to_unlink, remaining, to_link }
}
