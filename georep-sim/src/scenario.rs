// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Describing the initial state of a simulated control plane.

use georep_types::ClusterId;
use georep_types::GroupNickname;
use georep_types::NodeId;
use serde::Deserialize;
use serde::Serialize;

/// Tunables for the simulated control plane's propagation delays.
///
/// Delays are counted in observations (calls to `get`, on any resource)
/// rather than wall-clock time so that simulations are deterministic.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SimConfig {
    /// Number of observations for which a newly-added peer is reported as
    /// `Linking` before becoming `Linked`.
    pub link_lag: u32,
    /// Number of observations for which a removed peer is reported as
    /// `Unlinking` before disappearing.
    pub unlink_lag: u32,
}

/// A cluster present when the simulation starts.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClusterSpec {
    pub id: ClusterId,
    /// `resourceState` labels reported by successive `get`s. The last one
    /// sticks. Defaults to `Running`.
    #[serde(default)]
    pub states: Vec<String>,
}

/// A database present when the simulation starts.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DatabaseSpec {
    pub id: NodeId,
    pub cluster: ClusterId,
    #[serde(default)]
    pub states: Vec<String>,
    /// If set, the database has replication enabled under this nickname and
    /// starts out in a group of its own.
    #[serde(default)]
    pub nickname: Option<GroupNickname>,
}

/// A replication group that is already fully linked when the simulation
/// starts.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GroupSpec {
    pub members: Vec<NodeId>,
}

/// The complete initial state of a simulated control plane.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SimScenario {
    #[serde(default)]
    pub sim: SimConfig,
    #[serde(default)]
    pub clusters: Vec<ClusterSpec>,
    #[serde(default)]
    pub databases: Vec<DatabaseSpec>,
    #[serde(default)]
    pub groups: Vec<GroupSpec>,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_parse_scenario() {
        let scenario: SimScenario = toml::from_str(
            r#"
            [sim]
            link_lag = 2

            [[clusters]]
            id = "east"
            states = ["Creating", "Running"]

            [[databases]]
            id = "db-a"
            cluster = "east"
            nickname = "orders"

            [[databases]]
            id = "db-b"
            cluster = "east"

            [[groups]]
            members = ["db-a"]
            "#,
        )
        .expect("valid scenario");

        assert_eq!(scenario.sim, SimConfig { link_lag: 2, unlink_lag: 0 });
        assert_eq!(scenario.clusters[0].states, ["Creating", "Running"]);
        assert_eq!(
            scenario.databases[0].nickname,
            Some(GroupNickname::from("orders"))
        );
        assert_eq!(scenario.databases[1].nickname, None);
        assert!(scenario.databases[1].states.is_empty());
        assert_eq!(scenario.groups[0].members, [NodeId::from("db-a")]);
    }

    #[test]
    fn test_empty_scenario() {
        let scenario: SimScenario =
            toml::from_str("").expect("empty scenario is valid");
        assert_eq!(scenario, SimScenario::default());
    }
}
