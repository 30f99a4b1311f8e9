// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Geo-replication topology reconciliation.
//!
//! The control plane only lets us add or remove one node at a time, and its
//! view of a replication group lags behind the calls that change it. This
//! crate turns "the group currently looks like X, we want it to look like Y"
//! into a sequence of single-node calls, and drives each one to observable
//! completion before issuing the next.
//!
//! The pieces, leaves first:
//!
//! * [`diff`]: which nodes leave, stay, and join.
//! * [`plan`]: the ordered link/unlink [`georep_types::Invocation`]s.
//! * [`poll`]: a generic wait-until-terminal loop driven by a [`StateProbe`].
//! * [`probes`]: the state probes for resource lifecycle and replication
//!   links.
//! * [`reconcile`]: the [`Reconciler`] that ties them together against a
//!   [`georep_client::RemoteResourceClient`].
//! * [`lifecycle`]: waiters for cluster and database create/update/delete.

pub mod config;
pub mod diff;
pub mod lifecycle;
pub mod plan;
pub mod poll;
pub mod probes;
pub mod reconcile;

pub use config::ReconcilerConfig;
pub use diff::MembershipDiff;
pub use plan::UnlinkStrategy;
pub use poll::PollContext;
pub use poll::PollError;
pub use poll::ProbeError;
pub use poll::ProbeResult;
pub use poll::StateProbe;
pub use poll::poll_until_done;
pub use reconcile::ReconcileError;
pub use reconcile::ReconcilePlan;
pub use reconcile::ReconcileStep;
pub use reconcile::ReconcileSummary;
pub use reconcile::Reconciler;
