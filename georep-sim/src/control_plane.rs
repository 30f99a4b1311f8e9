// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! In-memory control plane

use crate::scenario::SimConfig;
use crate::scenario::SimScenario;
use async_trait::async_trait;
use georep_client::ClientError;
use georep_client::OperationHandle;
use georep_client::RemoteResourceClient;
use georep_types::ClusterId;
use georep_types::GroupNickname;
use georep_types::LinkState;
use georep_types::LinkedPeer;
use georep_types::NodeId;
use georep_types::ReplicationProperties;
use georep_types::ResourceProperties;
use georep_types::ResourceRef;
use serde::Serialize;
use slog::Logger;
use slog::debug;
use slog::info;
use slog::o;
use slog::warn;
use std::collections::BTreeMap;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::MutexGuard;
use thiserror::Error;

/// Errors from setting up simulated state (as opposed to errors returned
/// through the [`RemoteResourceClient`] interface, which are
/// [`ClientError`]s).
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SimError {
    #[error("{0} already exists")]
    AlreadyExists(ResourceRef),

    #[error("{0} does not exist")]
    NoSuchResource(ResourceRef),

    #[error("database {0} does not have replication enabled")]
    ReplicationNotEnabled(NodeId),

    #[error("databases {first} and {second} have different group nicknames")]
    NicknameMismatch { first: NodeId, second: NodeId },
}

/// The kinds of call that faults can be injected into.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize,
)]
#[serde(rename_all = "snake_case")]
pub enum SimCallKind {
    Get,
    ForceLink,
    ForceUnlink,
    /// The operation envelope returned by a successful force-link or
    /// force-unlink.
    OperationEnvelope,
}

/// A call made through the [`RemoteResourceClient`] interface.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "call", rename_all = "snake_case")]
pub enum SimCall {
    Get { resource: ResourceRef },
    ForceLink { target: NodeId, nickname: GroupNickname, payload: Vec<NodeId> },
    ForceUnlink { target: NodeId, payload: Vec<NodeId> },
}

impl SimCall {
    pub fn is_mutation(&self) -> bool {
        !matches!(self, SimCall::Get { .. })
    }
}

/// The reported `resourceState` of a resource, plus what happens next.
#[derive(Debug)]
struct Lifecycle {
    /// Successive states; the front is current. The last one sticks.
    states: VecDeque<String>,
    /// If set, the resource disappears after this many more observations.
    gone_after: Option<u32>,
}

impl Lifecycle {
    fn new(states: impl IntoIterator<Item = String>) -> Self {
        let mut states: VecDeque<String> = states.into_iter().collect();
        if states.is_empty() {
            states.push_back("Running".to_string());
        }
        Self { states, gone_after: None }
    }

    /// Returns the state to report for one observation, advancing the script.
    fn observe(&mut self) -> Option<String> {
        if self.states.len() > 1 {
            self.states.pop_front()
        } else {
            self.states.front().cloned()
        }
    }
}

#[derive(Debug)]
struct SimPeer {
    id: NodeId,
    state: LinkState,
    /// Observation count at which a `Linking` or `Unlinking` entry settles.
    settles_at: Option<u64>,
}

impl SimPeer {
    fn linked(id: NodeId) -> Self {
        Self { id, state: LinkState::Linked, settles_at: None }
    }

    fn is_settled(&self) -> bool {
        self.settles_at.is_none()
    }
}

#[derive(Debug)]
struct SimReplication {
    nickname: GroupNickname,
    peers: Vec<SimPeer>,
}

impl SimReplication {
    fn peer(&self, id: &NodeId) -> Option<&SimPeer> {
        self.peers.iter().find(|peer| &peer.id == id)
    }
}

#[derive(Debug)]
struct SimCluster {
    lifecycle: Lifecycle,
}

#[derive(Debug)]
struct SimDatabase {
    cluster: ClusterId,
    lifecycle: Lifecycle,
    replication: Option<SimReplication>,
}

#[derive(Debug, Default)]
struct SimState {
    config: SimConfig,
    clusters: BTreeMap<ClusterId, SimCluster>,
    databases: BTreeMap<NodeId, SimDatabase>,
    /// Number of `get` calls made so far, on any resource.
    observations: u64,
    faults: BTreeMap<SimCallKind, VecDeque<ClientError>>,
    calls: Vec<SimCall>,
}

impl SimState {
    fn take_fault(&mut self, kind: SimCallKind) -> Option<ClientError> {
        self.faults.get_mut(&kind).and_then(|queue| queue.pop_front())
    }

    /// Complete every link and unlink due at or before observation `now`.
    fn settle(&mut self, now: u64) {
        for database in self.databases.values_mut() {
            let Some(replication) = &mut database.replication else {
                continue;
            };
            replication.peers.retain_mut(|peer| {
                match peer.settles_at {
                    Some(at) if at <= now => {}
                    _ => return true,
                }
                peer.settles_at = None;
                match peer.state {
                    LinkState::Unlinking => false,
                    _ => {
                        peer.state = LinkState::Linked;
                        true
                    }
                }
            });
        }
    }

    fn observe(
        &mut self,
        resource: &ResourceRef,
    ) -> Option<ResourceProperties> {
        match resource {
            ResourceRef::Cluster(id) => {
                let cluster = self.clusters.get_mut(id)?;
                match &mut cluster.lifecycle.gone_after {
                    Some(0) => {
                        self.clusters.remove(id);
                        self.databases
                            .retain(|_, database| &database.cluster != id);
                        return None;
                    }
                    Some(n) => *n -= 1,
                    None => {}
                }
                Some(ResourceProperties {
                    resource_state: cluster.lifecycle.observe(),
                    replication: None,
                })
            }
            ResourceRef::Database(id) => {
                let database = self.databases.get_mut(id)?;
                match &mut database.lifecycle.gone_after {
                    Some(0) => {
                        self.databases.remove(id);
                        return None;
                    }
                    Some(n) => *n -= 1,
                    None => {}
                }
                let replication =
                    database.replication.as_ref().map(|replication| {
                        ReplicationProperties {
                            group_nickname: replication.nickname.clone(),
                            linked: replication
                                .peers
                                .iter()
                                .map(|peer| LinkedPeer {
                                    id: peer.id.clone(),
                                    state: peer.state,
                                })
                                .collect(),
                        }
                    });
                Some(ResourceProperties {
                    resource_state: database.lifecycle.observe(),
                    replication,
                })
            }
        }
    }

    fn replication(
        &self,
        id: &NodeId,
    ) -> Result<&SimReplication, ClientError> {
        let database = self.databases.get(id).ok_or_else(|| {
            ClientError::api(404, format!("database {id} not found"))
        })?;
        database.replication.as_ref().ok_or_else(|| {
            ClientError::api(
                400,
                format!("database {id} does not have replication enabled"),
            )
        })
    }

    fn replication_mut(&mut self, id: &NodeId) -> Option<&mut SimReplication> {
        self.databases
            .get_mut(id)
            .and_then(|database| database.replication.as_mut())
    }

    /// Fail with a conflict if any peer list of `members` has a link or
    /// unlink still propagating.
    fn check_settled(&self, members: &[NodeId]) -> Result<(), ClientError> {
        for id in members {
            let replication = self.replication(id)?;
            if let Some(peer) =
                replication.peers.iter().find(|peer| !peer.is_settled())
            {
                return Err(ClientError::api(
                    409,
                    format!(
                        "database {id} has a replication operation in \
                         progress (peer {} is {})",
                        peer.id, peer.state
                    ),
                ));
            }
        }
        Ok(())
    }

    fn force_link(
        &mut self,
        target: &NodeId,
        nickname: &GroupNickname,
        payload: &[NodeId],
    ) -> Result<(), ClientError> {
        let replication = self.replication(target)?;
        if &replication.nickname != nickname {
            return Err(ClientError::api(
                400,
                format!(
                    "group nickname {nickname} does not match database \
                     {target} ({})",
                    replication.nickname
                ),
            ));
        }
        if !payload.contains(target) {
            return Err(ClientError::api(
                400,
                format!("payload does not include target database {target}"),
            ));
        }
        for id in payload.iter().filter(|id| *id != target) {
            if self.replication(id)?.peer(target).is_some() {
                return Err(ClientError::api(
                    400,
                    format!(
                        "database {target} is already linked to {id}; \
                         force-link must target the database being added"
                    ),
                ));
            }
        }
        self.check_settled(payload)?;

        let settles_at =
            self.observations + u64::from(self.config.link_lag) + 1;
        for member in payload {
            let Some(replication) = self.replication_mut(member) else {
                continue;
            };
            let peers = payload
                .iter()
                .map(|id| {
                    let already_linked = id == member
                        || replication.peer(id).is_some_and(|peer| {
                            peer.state == LinkState::Linked
                        });
                    if already_linked {
                        SimPeer::linked(id.clone())
                    } else {
                        SimPeer {
                            id: id.clone(),
                            state: LinkState::Linking,
                            settles_at: Some(settles_at),
                        }
                    }
                })
                .collect();
            replication.peers = peers;
        }
        Ok(())
    }

    fn force_unlink(
        &mut self,
        target: &NodeId,
        payload: &[NodeId],
    ) -> Result<(), ClientError> {
        if payload.contains(target) {
            return Err(ClientError::api(
                400,
                format!("database {target} cannot unlink itself"),
            ));
        }
        let replication = self.replication(target)?;
        let unknown = payload.iter().find(|id| replication.peer(id).is_none());
        if let Some(id) = unknown {
            return Err(ClientError::api(
                400,
                format!("database {id} is not linked to {target}"),
            ));
        }
        let remaining: Vec<NodeId> = replication
            .peers
            .iter()
            .map(|peer| peer.id.clone())
            .filter(|id| !payload.contains(id))
            .collect();
        self.check_settled(&remaining)?;

        let settles_at =
            self.observations + u64::from(self.config.unlink_lag) + 1;
        for member in &remaining {
            let Some(replication) = self.replication_mut(member) else {
                continue;
            };
            for peer in &mut replication.peers {
                if payload.contains(&peer.id) {
                    peer.state = LinkState::Unlinking;
                    peer.settles_at = Some(settles_at);
                }
            }
        }
        for removed in payload {
            if let Some(replication) = self.replication_mut(removed) {
                replication.peers = vec![SimPeer::linked(removed.clone())];
            }
        }
        Ok(())
    }
}

/// A simulated control plane, implementing [`RemoteResourceClient`] against
/// in-memory state.
///
/// Besides the client interface, a `SimControlPlane` exposes methods for
/// setting up state, injecting faults, and inspecting what callers did. The
/// setup and inspection methods never count as observations.
#[derive(Debug)]
pub struct SimControlPlane {
    log: Logger,
    state: Mutex<SimState>,
}

impl SimControlPlane {
    pub fn new(log: &Logger, config: SimConfig) -> Self {
        let log = log.new(o!("component" => "SimControlPlane"));
        let state = SimState { config, ..Default::default() };
        Self { log, state: Mutex::new(state) }
    }

    /// Build a control plane populated from `scenario`.
    pub fn from_scenario(
        log: &Logger,
        scenario: &SimScenario,
    ) -> Result<Self, SimError> {
        let sim = Self::new(log, scenario.sim);
        for cluster in &scenario.clusters {
            sim.add_cluster(cluster.id.clone(), cluster.states.clone())?;
        }
        for database in &scenario.databases {
            sim.add_database(
                &database.cluster,
                database.id.clone(),
                database.states.clone(),
            )?;
            if let Some(nickname) = &database.nickname {
                sim.enable_replication(&database.id, nickname.clone())?;
            }
        }
        for group in &scenario.groups {
            sim.link_group(&group.members)?;
        }
        info!(
            sim.log,
            "loaded scenario";
            "clusters" => scenario.clusters.len(),
            "databases" => scenario.databases.len(),
            "groups" => scenario.groups.len(),
        );
        Ok(sim)
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Add a cluster whose `get`s report `states` in turn.
    pub fn add_cluster(
        &self,
        id: ClusterId,
        states: impl IntoIterator<Item = String>,
    ) -> Result<(), SimError> {
        let mut state = self.state();
        if state.clusters.contains_key(&id) {
            return Err(SimError::AlreadyExists(id.into()));
        }
        state
            .clusters
            .insert(id, SimCluster { lifecycle: Lifecycle::new(states) });
        Ok(())
    }

    /// Add a database, without replication, to `cluster`.
    pub fn add_database(
        &self,
        cluster: &ClusterId,
        id: NodeId,
        states: impl IntoIterator<Item = String>,
    ) -> Result<(), SimError> {
        let mut state = self.state();
        if !state.clusters.contains_key(cluster) {
            return Err(SimError::NoSuchResource(cluster.clone().into()));
        }
        if state.databases.contains_key(&id) {
            return Err(SimError::AlreadyExists(id.into()));
        }
        state.databases.insert(
            id,
            SimDatabase {
                cluster: cluster.clone(),
                lifecycle: Lifecycle::new(states),
                replication: None,
            },
        );
        Ok(())
    }

    /// Enable replication on database `id`, in a group of its own.
    pub fn enable_replication(
        &self,
        id: &NodeId,
        nickname: GroupNickname,
    ) -> Result<(), SimError> {
        let mut state = self.state();
        let database = state
            .databases
            .get_mut(id)
            .ok_or_else(|| SimError::NoSuchResource(id.clone().into()))?;
        database.replication = Some(SimReplication {
            nickname,
            peers: vec![SimPeer::linked(id.clone())],
        });
        Ok(())
    }

    /// Link `members` into one fully-settled group, replacing whatever peer
    /// lists they had.
    pub fn link_group(&self, members: &[NodeId]) -> Result<(), SimError> {
        let mut state = self.state();
        let mut nickname: Option<(&NodeId, GroupNickname)> = None;
        for id in members {
            let database = state
                .databases
                .get(id)
                .ok_or_else(|| SimError::NoSuchResource(id.clone().into()))?;
            let replication = database
                .replication
                .as_ref()
                .ok_or_else(|| SimError::ReplicationNotEnabled(id.clone()))?;
            match &nickname {
                Some((first, expected))
                    if expected != &replication.nickname =>
                {
                    return Err(SimError::NicknameMismatch {
                        first: (*first).clone(),
                        second: id.clone(),
                    });
                }
                Some(_) => {}
                None => nickname = Some((id, replication.nickname.clone())),
            }
        }
        for id in members {
            if let Some(replication) = state.replication_mut(id) {
                replication.peers =
                    members.iter().cloned().map(SimPeer::linked).collect();
            }
        }
        Ok(())
    }

    /// Replace the scripted `resourceState` labels of `resource`.
    pub fn set_states(
        &self,
        resource: &ResourceRef,
        states: impl IntoIterator<Item = String>,
    ) -> Result<(), SimError> {
        let mut state = self.state();
        let lifecycle = match resource {
            ResourceRef::Cluster(id) => {
                state.clusters.get_mut(id).map(|c| &mut c.lifecycle)
            }
            ResourceRef::Database(id) => {
                state.databases.get_mut(id).map(|d| &mut d.lifecycle)
            }
        }
        .ok_or_else(|| SimError::NoSuchResource(resource.clone()))?;
        *lifecycle = Lifecycle::new(states);
        Ok(())
    }

    /// Begin deleting `resource`: it is reported as `Deleting` for
    /// `observations` more `get`s of it, then disappears. Deleting a cluster
    /// also deletes its databases.
    pub fn delete(
        &self,
        resource: &ResourceRef,
        observations: u32,
    ) -> Result<(), SimError> {
        let mut state = self.state();
        let lifecycle = match resource {
            ResourceRef::Cluster(id) => {
                state.clusters.get_mut(id).map(|c| &mut c.lifecycle)
            }
            ResourceRef::Database(id) => {
                state.databases.get_mut(id).map(|d| &mut d.lifecycle)
            }
        }
        .ok_or_else(|| SimError::NoSuchResource(resource.clone()))?;
        *lifecycle = Lifecycle::new(["Deleting".to_string()]);
        lifecycle.gone_after = Some(observations);
        Ok(())
    }

    /// Make the next call of kind `kind` fail with `error`. Faults of the
    /// same kind are consumed in the order they were injected.
    pub fn inject_fault(&self, kind: SimCallKind, error: ClientError) {
        self.state().faults.entry(kind).or_default().push_back(error);
    }

    /// Complete every in-flight link and unlink now.
    pub fn settle_all(&self) {
        self.state().settle(u64::MAX);
    }

    /// Returns `id`'s replication peer list as currently stored, or `None` if
    /// the database does not exist or does not have replication enabled.
    pub fn peers(&self, id: &NodeId) -> Option<Vec<LinkedPeer>> {
        let state = self.state();
        let replication = state.databases.get(id)?.replication.as_ref()?;
        Some(
            replication
                .peers
                .iter()
                .map(|peer| LinkedPeer {
                    id: peer.id.clone(),
                    state: peer.state,
                })
                .collect(),
        )
    }

    /// Returns every call made through the client interface, in order.
    pub fn calls(&self) -> Vec<SimCall> {
        self.state().calls.clone()
    }

    /// Returns the force-link and force-unlink calls made, in order.
    pub fn mutations(&self) -> Vec<SimCall> {
        self.state()
            .calls
            .iter()
            .filter(|call| call.is_mutation())
            .cloned()
            .collect()
    }

    /// Returns the number of `get` calls made so far.
    pub fn observations(&self) -> u64 {
        self.state().observations
    }

    fn operation_handle(&self, operation: String) -> OperationHandle {
        match self.state().take_fault(SimCallKind::OperationEnvelope) {
            Some(error) => {
                warn!(
                    self.log,
                    "injecting operation failure";
                    "operation" => &operation,
                );
                let result = Err(error);
                OperationHandle::new(operation, async move { result })
            }
            None => OperationHandle::completed(operation),
        }
    }
}

#[async_trait]
impl RemoteResourceClient for SimControlPlane {
    async fn get(
        &self,
        resource: &ResourceRef,
    ) -> Result<Option<ResourceProperties>, ClientError> {
        let mut state = self.state();
        state.calls.push(SimCall::Get { resource: resource.clone() });
        if let Some(error) = state.take_fault(SimCallKind::Get) {
            warn!(self.log, "injecting get failure"; "resource" => %resource);
            return Err(error);
        }
        state.observations += 1;
        let now = state.observations;
        state.settle(now);
        let properties = state.observe(resource);
        debug!(
            self.log,
            "get";
            "resource" => %resource,
            "found" => properties.is_some(),
            "observation" => state.observations,
        );
        Ok(properties)
    }

    async fn force_link(
        &self,
        target: &NodeId,
        nickname: &GroupNickname,
        payload: &[NodeId],
    ) -> Result<OperationHandle, ClientError> {
        {
            let mut state = self.state();
            state.calls.push(SimCall::ForceLink {
                target: target.clone(),
                nickname: nickname.clone(),
                payload: payload.to_vec(),
            });
            if let Some(error) = state.take_fault(SimCallKind::ForceLink) {
                warn!(self.log, "injecting force-link failure");
                return Err(error);
            }
            if let Err(error) = state.force_link(target, nickname, payload) {
                info!(
                    self.log,
                    "force-link rejected";
                    "target" => %target,
                    "error" => %error,
                );
                return Err(error);
            }
        }
        info!(
            self.log,
            "force-link";
            "target" => %target,
            "payload" => ?payload,
        );
        Ok(self.operation_handle(format!("force-link {target}")))
    }

    async fn force_unlink(
        &self,
        target: &NodeId,
        payload: &[NodeId],
    ) -> Result<OperationHandle, ClientError> {
        {
            let mut state = self.state();
            state.calls.push(SimCall::ForceUnlink {
                target: target.clone(),
                payload: payload.to_vec(),
            });
            if let Some(error) = state.take_fault(SimCallKind::ForceUnlink) {
                warn!(self.log, "injecting force-unlink failure");
                return Err(error);
            }
            if let Err(error) = state.force_unlink(target, payload) {
                info!(
                    self.log,
                    "force-unlink rejected";
                    "target" => %target,
                    "error" => %error,
                );
                return Err(error);
            }
        }
        info!(
            self.log,
            "force-unlink";
            "target" => %target,
            "payload" => ?payload,
        );
        Ok(self.operation_handle(format!("force-unlink {target}")))
    }
}
