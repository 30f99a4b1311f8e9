// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Types shared by the geo-replication reconciler, its client, and the
//! simulated control plane.
//!
//! The two halves of this crate are:
//!
//! * [`membership`]: node identity, membership sets, and the atomic
//!   [`Invocation`]s the planner emits.
//! * [`resource`]: the view of a remote cluster or database returned by the
//!   control plane's `Get` call.

pub mod membership;
pub mod resource;

pub use membership::DuplicateNodeError;
pub use membership::Invocation;
pub use membership::MembershipSet;
pub use membership::NodeId;
pub use resource::ClusterId;
pub use resource::GroupNickname;
pub use resource::LinkState;
pub use resource::LinkedPeer;
pub use resource::ReplicationProperties;
pub use resource::ResourceProperties;
pub use resource::ResourceRef;
pub use resource::ResourceState;
