// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Scenario files: a simulated control plane plus the reconciliation to run
//! against it.

use crate::config::LoadError;
use crate::config::load_toml;
use camino::Utf8Path;
use georep_sim::SimControlPlane;
use georep_sim::SimError;
use georep_sim::SimScenario;
use georep_types::MembershipSet;
use georep_types::NodeId;
use serde::Deserialize;
use slog::Logger;

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Scenario {
    pub reconcile: ReconcileTarget,
    pub control_plane: SimScenario,
}

/// The group to reconcile, identified by its primary, and the membership it
/// should end up with.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReconcileTarget {
    pub primary: NodeId,
    pub desired: MembershipSet,
}

impl Scenario {
    pub fn from_file(path: &Utf8Path) -> Result<Scenario, LoadError> {
        load_toml(path)
    }

    /// Build the simulated control plane described by this scenario.
    pub fn control_plane(
        &self,
        log: &Logger,
    ) -> Result<SimControlPlane, SimError> {
        SimControlPlane::from_scenario(log, &self.control_plane)
    }
}
