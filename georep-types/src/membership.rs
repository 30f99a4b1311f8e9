// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Node identity and replication group membership.

use serde::Deserialize;
use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Identifies one replica (a database instance) in a replication group.
///
/// This is an opaque string as far as reconciliation is concerned: two
/// `NodeId`s are the same node if and only if their strings are equal.
#[derive(
    Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for NodeId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// The caller attempted to build a [`MembershipSet`] that names the same node
/// more than once.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("node {id} appears more than once in membership")]
pub struct DuplicateNodeError {
    pub id: NodeId,
}

/// An ordered, duplicate-free sequence of nodes that are (or should be)
/// linked into one replication group.
///
/// Order is the order in which the caller supplied the nodes. It has no
/// bearing on set semantics ([`MembershipSet::same_members`] ignores it), but
/// it is preserved through diffing and planning so that the sequence of
/// remote calls is deterministic.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<NodeId>", into = "Vec<NodeId>")]
pub struct MembershipSet(Vec<NodeId>);

impl MembershipSet {
    /// Build a membership set, rejecting duplicates.
    pub fn new(
        ids: impl IntoIterator<Item = NodeId>,
    ) -> Result<Self, DuplicateNodeError> {
        let mut members: Vec<NodeId> = Vec::new();
        for id in ids {
            if members.contains(&id) {
                return Err(DuplicateNodeError { id });
            }
            members.push(id);
        }
        Ok(Self(members))
    }

    /// Build a membership set from a list reported by the control plane,
    /// keeping the first occurrence of any node that is listed twice.
    pub fn from_remote(ids: impl IntoIterator<Item = NodeId>) -> Self {
        let mut members: Vec<NodeId> = Vec::new();
        for id in ids {
            if !members.contains(&id) {
                members.push(id);
            }
        }
        Self(members)
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.0.contains(id)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, NodeId> {
        self.0.iter()
    }

    pub fn as_slice(&self) -> &[NodeId] {
        &self.0
    }

    /// Returns true if `self` and `other` contain the same nodes, in any
    /// order.
    pub fn same_members(&self, other: &MembershipSet) -> bool {
        self.len() == other.len() && self.iter().all(|id| other.contains(id))
    }
}

impl TryFrom<Vec<NodeId>> for MembershipSet {
    type Error = DuplicateNodeError;

    fn try_from(ids: Vec<NodeId>) -> Result<Self, Self::Error> {
        Self::new(ids)
    }
}

impl From<MembershipSet> for Vec<NodeId> {
    fn from(set: MembershipSet) -> Self {
        set.0
    }
}

impl<'a> IntoIterator for &'a MembershipSet {
    type Item = &'a NodeId;
    type IntoIter = std::slice::Iter<'a, NodeId>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl fmt::Display for MembershipSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", join_ids(&self.0))
    }
}

/// One atomic remote call: ask `target` to adopt (for a link) or drop (for an
/// unlink) the nodes in `payload`.
///
/// Invocations are produced by the planner and consumed exactly once by the
/// orchestrator.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invocation {
    pub target: NodeId,
    pub payload: Vec<NodeId>,
}

impl Invocation {
    pub fn new(target: NodeId, payload: Vec<NodeId>) -> Self {
        Self { target, payload }
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} <- [{}]", self.target, join_ids(&self.payload))
    }
}

fn join_ids(ids: &[NodeId]) -> String {
    ids.iter().map(NodeId::as_str).collect::<Vec<_>>().join(", ")
}

#[cfg(test)]
mod test {
    use super::*;
    use assert_matches::assert_matches;

    fn ids(names: &[&str]) -> Vec<NodeId> {
        names.iter().copied().map(NodeId::from).collect()
    }

    #[test]
    fn test_membership_rejects_duplicates() {
        let err = MembershipSet::new(ids(&["a", "b", "a"]))
            .expect_err("duplicate should be rejected");
        assert_eq!(err.id, NodeId::from("a"));
    }

    #[test]
    fn test_from_remote_keeps_first_occurrence() {
        let set = MembershipSet::from_remote(ids(&["b", "a", "b", "c"]));
        assert_eq!(set.as_slice(), ids(&["b", "a", "c"]).as_slice());
    }

    #[test]
    fn test_same_members_ignores_order() {
        let left = MembershipSet::new(ids(&["a", "b", "c"])).unwrap();
        let right = MembershipSet::new(ids(&["c", "a", "b"])).unwrap();
        assert!(left.same_members(&right));
        assert_ne!(left, right);

        let shorter = MembershipSet::new(ids(&["a", "b"])).unwrap();
        assert!(!left.same_members(&shorter));
        assert!(!shorter.same_members(&left));
    }

    #[test]
    fn test_membership_deserialize_validates() {
        let set: MembershipSet =
            serde_json::from_str(r#"["a", "b"]"#).expect("valid membership");
        assert_eq!(set.to_string(), "[a, b]");

        let result = serde_json::from_str::<MembershipSet>(r#"["a", "a"]"#);
        assert_matches!(result, Err(e) if e.to_string().contains("node a"));
    }

    #[test]
    fn test_invocation_display() {
        let invocation = Invocation::new("b".into(), ids(&["a", "b"]));
        assert_eq!(invocation.to_string(), "b <- [a, b]");
    }
}
