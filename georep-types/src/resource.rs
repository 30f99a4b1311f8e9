// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The control plane's view of clusters and databases.

use crate::NodeId;
use serde::Deserialize;
use serde::Serialize;
use std::fmt;

/// Identifies a cluster, the parent resource of one or more databases.
#[derive(
    Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ClusterId(String);

impl ClusterId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClusterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ClusterId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Label attached to a replication group.
///
/// Must already exist on a node before it can be force-linked; never computed
/// by the reconciler.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupNickname(String);

impl GroupNickname {
    pub fn new(nickname: impl Into<String>) -> Self {
        Self(nickname.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GroupNickname {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for GroupNickname {
    fn from(nickname: &str) -> Self {
        Self::new(nickname)
    }
}

/// A resource that can be fetched from the control plane.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum ResourceRef {
    Cluster(ClusterId),
    Database(NodeId),
}

impl ResourceRef {
    /// Returns a short name for the kind of resource, suitable for log keys.
    pub fn kind(&self) -> &'static str {
        match self {
            ResourceRef::Cluster(_) => "cluster",
            ResourceRef::Database(_) => "database",
        }
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = self.kind();
        match self {
            ResourceRef::Cluster(id) => write!(f, "{kind} {id}"),
            ResourceRef::Database(id) => write!(f, "{kind} {id}"),
        }
    }
}

impl From<NodeId> for ResourceRef {
    fn from(id: NodeId) -> Self {
        ResourceRef::Database(id)
    }
}

impl From<ClusterId> for ResourceRef {
    fn from(id: ClusterId) -> Self {
        ResourceRef::Cluster(id)
    }
}

/// Properties of a cluster or database, as returned by `Get`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceProperties {
    /// The raw `resourceState` label.
    ///
    /// This is kept as the control plane reported it; use
    /// [`ResourceProperties::parsed_state`] to interpret it.
    #[serde(rename = "resourceState", default)]
    pub resource_state: Option<String>,

    /// Geo-replication settings. Absent on clusters, and on databases that
    /// were never configured for replication.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replication: Option<ReplicationProperties>,
}

impl ResourceProperties {
    pub fn parsed_state(&self) -> Option<ResourceState> {
        self.resource_state.as_deref().map(ResourceState::parse)
    }
}

/// Geo-replication settings of one database.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicationProperties {
    pub group_nickname: GroupNickname,
    /// Every node in the group, including the database itself, in the order
    /// reported by the control plane.
    #[serde(default)]
    pub linked: Vec<LinkedPeer>,
}

impl ReplicationProperties {
    pub fn peer(&self, id: &NodeId) -> Option<&LinkedPeer> {
        self.linked.iter().find(|peer| &peer.id == id)
    }
}

/// One entry in a database's replication peer list.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkedPeer {
    pub id: NodeId,
    pub state: LinkState,
}

/// Link state of a replication peer.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
pub enum LinkState {
    Linked,
    Linking,
    Unlinking,
    LinkFailed,
    UnlinkFailed,
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LinkState::Linked => "Linked",
            LinkState::Linking => "Linking",
            LinkState::Unlinking => "Unlinking",
            LinkState::LinkFailed => "LinkFailed",
            LinkState::UnlinkFailed => "UnlinkFailed",
        };
        f.write_str(s)
    }
}

/// Interpretation of a `resourceState` label.
///
/// Labels outside the documented set parse as
/// [`ResourceState::Unrecognized`] rather than failing, so that callers can
/// report the offending value.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ResourceState {
    Running,
    Creating,
    Updating,
    Enabling,
    Deleting,
    Disabling,
    Moving,
    Scaling,
    CreateFailed,
    UpdateFailed,
    DeleteFailed,
    EnableFailed,
    DisableFailed,
    Disabled,
    Unrecognized(String),
}

impl ResourceState {
    /// Labels are matched exactly, as the control plane emits them.
    pub fn parse(label: &str) -> ResourceState {
        match label {
            "Running" => ResourceState::Running,
            "Creating" => ResourceState::Creating,
            "Updating" => ResourceState::Updating,
            "Enabling" => ResourceState::Enabling,
            "Deleting" => ResourceState::Deleting,
            "Disabling" => ResourceState::Disabling,
            "Moving" => ResourceState::Moving,
            "Scaling" => ResourceState::Scaling,
            "CreateFailed" => ResourceState::CreateFailed,
            "UpdateFailed" => ResourceState::UpdateFailed,
            "DeleteFailed" => ResourceState::DeleteFailed,
            "EnableFailed" => ResourceState::EnableFailed,
            "DisableFailed" => ResourceState::DisableFailed,
            "Disabled" => ResourceState::Disabled,
            other => ResourceState::Unrecognized(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            ResourceState::Running => "Running",
            ResourceState::Creating => "Creating",
            ResourceState::Updating => "Updating",
            ResourceState::Enabling => "Enabling",
            ResourceState::Deleting => "Deleting",
            ResourceState::Disabling => "Disabling",
            ResourceState::Moving => "Moving",
            ResourceState::Scaling => "Scaling",
            ResourceState::CreateFailed => "CreateFailed",
            ResourceState::UpdateFailed => "UpdateFailed",
            ResourceState::DeleteFailed => "DeleteFailed",
            ResourceState::EnableFailed => "EnableFailed",
            ResourceState::DisableFailed => "DisableFailed",
            ResourceState::Disabled => "Disabled",
            ResourceState::Unrecognized(label) => label,
        }
    }
}

impl fmt::Display for ResourceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
