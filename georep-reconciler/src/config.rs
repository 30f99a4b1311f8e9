// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Reconciler configuration

use crate::plan::UnlinkStrategy;
use serde::Deserialize;
use serde::Serialize;
use serde_with::DurationSeconds;
use serde_with::serde_as;
use std::time::Duration;

/// Tunables for reconciliation and lifecycle waits.
///
/// Every field is optional when deserializing; missing fields take the values
/// in [`ReconcilerConfig::default`].
#[serde_as]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReconcilerConfig {
    /// How long probes ask the poller to wait between checks.
    #[serde_as(as = "DurationSeconds<u64>")]
    pub poll_interval_secs: Duration,

    /// How long to wait after a remote call before the first check.
    #[serde_as(as = "DurationSeconds<u64>")]
    pub initial_delay_secs: Duration,

    /// Upper bound on one whole reconciliation (or one lifecycle wait).
    #[serde_as(as = "DurationSeconds<u64>")]
    pub reconcile_timeout_secs: Duration,

    /// Whether to wait for the primary to report each newly-added peer as
    /// linked before adding the next one.
    ///
    /// The control plane can reject a force-link while an earlier one is
    /// still propagating. Turn this off only against a control plane known
    /// not to have that race.
    pub wait_for_link_convergence: bool,

    pub unlink_strategy: UnlinkStrategy,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: Duration::from_secs(15),
            initial_delay_secs: Duration::ZERO,
            reconcile_timeout_secs: Duration::from_secs(60 * 60),
            wait_for_link_convergence: true,
            unlink_strategy: UnlinkStrategy::PerNode,
        }
    }
}
