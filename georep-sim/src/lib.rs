// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Simulated geo-replication control plane, for tests and developer tools.
//!
//! [`SimControlPlane`] implements [`georep_client::RemoteResourceClient`]
//! against in-memory state. It models the behaviors reconciliation has to
//! cope with: resources that pass through transitional states, links and
//! unlinks that take a while to propagate, and a control plane that rejects
//! changes to a group while an earlier change is still propagating.
//!
//! Time in the simulation is counted in observations (`get` calls) rather
//! than wall-clock time, so runs are fully deterministic.

mod control_plane;
pub mod scenario;

pub use control_plane::SimCall;
pub use control_plane::SimCallKind;
pub use control_plane::SimControlPlane;
pub use control_plane::SimError;
pub use scenario::SimConfig;
pub use scenario::SimScenario;
