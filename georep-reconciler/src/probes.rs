// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! [`StateProbe`] implementations for resource lifecycle and replication
//! links.

use crate::poll::ProbeError;
use crate::poll::ProbeResult;
use crate::poll::StateProbe;
use async_trait::async_trait;
use georep_client::RemoteResourceClient;
use georep_types::LinkState;
use georep_types::NodeId;
use georep_types::ReplicationProperties;
use georep_types::ResourceProperties;
use georep_types::ResourceRef;
use georep_types::ResourceState;
use std::sync::Arc;
use std::time::Duration;

/// Fetch `resource`, mapping a client failure to a probe error.
async fn fetch(
    client: &dyn RemoteResourceClient,
    resource: &ResourceRef,
) -> Result<Option<ResourceProperties>, ProbeError> {
    client
        .get(resource)
        .await
        .map_err(|err| ProbeError::Client { resource: resource.clone(), err })
}

/// Fetch database `id` and return its replication properties, failing if the
/// database is gone or was never configured for replication.
async fn fetch_replication(
    client: &dyn RemoteResourceClient,
    id: &NodeId,
) -> Result<ReplicationProperties, ProbeError> {
    let resource = ResourceRef::Database(id.clone());
    let Some(properties) = fetch(client, &resource).await? else {
        return Err(ProbeError::NotFound { resource });
    };
    properties
        .replication
        .ok_or_else(|| ProbeError::ReplicationNotConfigured { id: id.clone() })
}

/// Returns true if `state` is one that `resource` passes through on its way
/// to `Running`.
///
/// Databases can additionally be moved between clusters or scaled, both of
/// which also end in `Running`.
fn is_transitional(resource: &ResourceRef, state: &ResourceState) -> bool {
    match state {
        ResourceState::Creating
        | ResourceState::Updating
        | ResourceState::Enabling
        | ResourceState::Deleting
        | ResourceState::Disabling => true,
        ResourceState::Moving | ResourceState::Scaling => {
            matches!(resource, ResourceRef::Database(_))
        }
        _ => false,
    }
}

/// Waits for a cluster or database to reach `Running` after a create or
/// update.
pub struct CreateUpdateProbe {
    client: Arc<dyn RemoteResourceClient>,
    resource: ResourceRef,
    interval: Duration,
}

impl CreateUpdateProbe {
    pub fn new(
        client: Arc<dyn RemoteResourceClient>,
        resource: ResourceRef,
        interval: Duration,
    ) -> Self {
        Self { client, resource, interval }
    }
}

#[async_trait]
impl StateProbe for CreateUpdateProbe {
    fn describe(&self) -> String {
        format!("{} is running", self.resource)
    }

    async fn poll(&self) -> Result<ProbeResult, ProbeError> {
        let properties = fetch(&*self.client, &self.resource)
            .await?
            .ok_or_else(|| ProbeError::NotFound {
                resource: self.resource.clone(),
            })?;
        let state = properties.parsed_state().ok_or_else(|| {
            ProbeError::MissingResourceState {
                resource: self.resource.clone(),
            }
        })?;

        if state == ResourceState::Running {
            Ok(ProbeResult::succeeded())
        } else if is_transitional(&self.resource, &state) {
            Ok(ProbeResult::in_progress(self.interval))
        } else {
            Err(ProbeError::UnexpectedResourceState {
                resource: self.resource.clone(),
                state: state.to_string(),
            })
        }
    }
}

/// Waits for a child resource (or the parent that contains it) to disappear.
///
/// Deleting a parent takes its children with it, so either one being gone
/// counts as done. The child is checked first.
pub struct DeleteProbe {
    client: Arc<dyn RemoteResourceClient>,
    parent: ResourceRef,
    child: ResourceRef,
    interval: Duration,
}

impl DeleteProbe {
    pub fn new(
        client: Arc<dyn RemoteResourceClient>,
        parent: ResourceRef,
        child: ResourceRef,
        interval: Duration,
    ) -> Self {
        Self { client, parent, child, interval }
    }
}

#[async_trait]
impl StateProbe for DeleteProbe {
    fn describe(&self) -> String {
        format!("{} (in {}) is deleted", self.child, self.parent)
    }

    async fn poll(&self) -> Result<ProbeResult, ProbeError> {
        if fetch(&*self.client, &self.child).await?.is_none() {
            return Ok(ProbeResult::succeeded());
        }
        if fetch(&*self.client, &self.parent).await?.is_none() {
            return Ok(ProbeResult::succeeded());
        }
        Ok(ProbeResult::in_progress(self.interval))
    }
}

/// Waits for every node in `expected` to show as [`LinkState::Linked`] in
/// `node`'s replication peer list.
pub struct LinkConvergenceProbe {
    client: Arc<dyn RemoteResourceClient>,
    node: NodeId,
    expected: Vec<NodeId>,
    interval: Duration,
}

impl LinkConvergenceProbe {
    pub fn new(
        client: Arc<dyn RemoteResourceClient>,
        node: NodeId,
        expected: Vec<NodeId>,
        interval: Duration,
    ) -> Self {
        Self { client, node, expected, interval }
    }
}

#[async_trait]
impl StateProbe for LinkConvergenceProbe {
    fn describe(&self) -> String {
        format!(
            "{} peers are linked on database {}",
            self.expected.len(),
            self.node
        )
    }

    async fn poll(&self) -> Result<ProbeResult, ProbeError> {
        let replication = fetch_replication(&*self.client, &self.node).await?;
        let converged = self.expected.iter().all(|id| {
            replication
                .peer(id)
                .is_some_and(|peer| peer.state == LinkState::Linked)
        });
        if converged {
            Ok(ProbeResult::succeeded())
        } else {
            Ok(ProbeResult::in_progress(self.interval))
        }
    }
}

/// Waits for every node in `removed` to drop out of `anchor`'s replication
/// peer list entirely.
pub struct UnlinkSettledProbe {
    client: Arc<dyn RemoteResourceClient>,
    anchor: NodeId,
    removed: Vec<NodeId>,
    interval: Duration,
}

impl UnlinkSettledProbe {
    pub fn new(
        client: Arc<dyn RemoteResourceClient>,
        anchor: NodeId,
        removed: Vec<NodeId>,
        interval: Duration,
    ) -> Self {
        Self { client, anchor, removed, interval }
    }
}

#[async_trait]
impl StateProbe for UnlinkSettledProbe {
    fn describe(&self) -> String {
        format!(
            "{} peers are unlinked from database {}",
            self.removed.len(),
            self.anchor
        )
    }

    async fn poll(&self) -> Result<ProbeResult, ProbeError> {
        let replication =
            fetch_replication(&*self.client, &self.anchor).await?;
        if self.removed.iter().any(|id| replication.peer(id).is_some()) {
            Ok(ProbeResult::in_progress(self.interval))
        } else {
            Ok(ProbeResult::succeeded())
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::poll::PollContext;
    use crate::poll::PollError;
    use crate::poll::poll_until_done;
    use assert_matches::assert_matches;
    use georep_client::ClientError;
    use georep_client::OperationHandle;
    use georep_test_utils::dev::test_setup_log;
    use georep_types::ClusterId;
    use georep_types::GroupNickname;
    use georep_types::LinkedPeer;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    const INTERVAL: Duration = Duration::from_secs(15);

    type GetResult = Result<Option<ResourceProperties>, ClientError>;

    /// Answers `get` calls from a script, checking that each call asks for the
    /// resource the script expects.
    #[derive(Default)]
    struct ScriptedClient {
        script: Mutex<VecDeque<(ResourceRef, GetResult)>>,
    }

    impl ScriptedClient {
        fn new(
            script: impl IntoIterator<Item = (ResourceRef, GetResult)>,
        ) -> Arc<Self> {
            Arc::new(Self { script: Mutex::new(script.into_iter().collect()) })
        }

        fn remaining(&self) -> usize {
            self.script.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl RemoteResourceClient for ScriptedClient {
        async fn get(&self, resource: &ResourceRef) -> GetResult {
            let (expected, result) = self
                .script
                .lock()
                .unwrap()
                .pop_front()
                .expect("unexpected get");
            assert_eq!(&expected, resource);
            result
        }

        async fn force_link(
            &self,
            _target: &NodeId,
            _nickname: &GroupNickname,
            _payload: &[NodeId],
        ) -> Result<OperationHandle, ClientError> {
            panic!("probes never mutate");
        }

        async fn force_unlink(
            &self,
            _target: &NodeId,
            _payload: &[NodeId],
        ) -> Result<OperationHandle, ClientError> {
            panic!("probes never mutate");
        }
    }

    fn cluster() -> ResourceRef {
        ResourceRef::Cluster(ClusterId::from("cluster1"))
    }

    fn database(id: &str) -> ResourceRef {
        ResourceRef::Database(NodeId::from(id))
    }

    fn in_state(label: &str) -> GetResult {
        Ok(Some(ResourceProperties {
            resource_state: Some(label.to_string()),
            replication: None,
        }))
    }

    fn with_peers(peers: &[(&str, LinkState)]) -> GetResult {
        Ok(Some(ResourceProperties {
            resource_state: Some("Running".to_string()),
            replication: Some(ReplicationProperties {
                group_nickname: GroupNickname::from("group1"),
                linked: peers
                    .iter()
                    .map(|(id, state)| LinkedPeer {
                        id: NodeId::from(*id),
                        state: *state,
                    })
                    .collect(),
            }),
        }))
    }

    fn ids(names: &[&str]) -> Vec<NodeId> {
        names.iter().copied().map(NodeId::from).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_waits_through_transitional_states() {
        let logctx =
            test_setup_log("test_create_waits_through_transitional_states");
        let client = ScriptedClient::new([
            (cluster(), in_state("Creating")),
            (cluster(), in_state("Updating")),
            (cluster(), in_state("Running")),
        ]);
        let probe = CreateUpdateProbe::new(client.clone(), cluster(), INTERVAL);

        assert_eq!(
            probe.poll().await.unwrap(),
            ProbeResult::in_progress(INTERVAL)
        );
        assert_eq!(
            probe.poll().await.unwrap(),
            ProbeResult::in_progress(INTERVAL)
        );
        assert_eq!(probe.poll().await.unwrap(), ProbeResult::succeeded());
        assert_eq!(client.remaining(), 0);

        // The same sequence, driven by the poller, takes two full intervals.
        let client = ScriptedClient::new([
            (cluster(), in_state("Creating")),
            (cluster(), in_state("Updating")),
            (cluster(), in_state("Running")),
        ]);
        let probe = CreateUpdateProbe::new(client.clone(), cluster(), INTERVAL);
        let start = tokio::time::Instant::now();
        poll_until_done(
            &logctx.log,
            &probe,
            Duration::ZERO,
            &PollContext::new(),
        )
        .await
        .expect("cluster became ready");
        assert_eq!(start.elapsed(), INTERVAL * 2);
        assert_eq!(client.remaining(), 0);
        logctx.cleanup_successful();
    }

    #[tokio::test]
    async fn test_create_transitional_states_by_kind() {
        // Moving and Scaling only make sense for databases.
        for label in ["Moving", "Scaling"] {
            let client = ScriptedClient::new([
                (database("db1"), in_state(label)),
                (cluster(), in_state(label)),
            ]);
            let probe = CreateUpdateProbe::new(
                client.clone(),
                database("db1"),
                INTERVAL,
            );
            assert_eq!(
                probe.poll().await.unwrap(),
                ProbeResult::in_progress(INTERVAL)
            );
            let probe = CreateUpdateProbe::new(client, cluster(), INTERVAL);
            assert_matches!(
                probe.poll().await,
                Err(ProbeError::UnexpectedResourceState { state, .. })
                    if state == label
            );
        }

        for label in ["Enabling", "Deleting", "Disabling"] {
            let client = ScriptedClient::new([(cluster(), in_state(label))]);
            let probe = CreateUpdateProbe::new(client, cluster(), INTERVAL);
            assert_eq!(
                probe.poll().await.unwrap(),
                ProbeResult::in_progress(INTERVAL)
            );
        }
    }

    #[tokio::test]
    async fn test_create_fatal_conditions() {
        let client = ScriptedClient::new([
            (database("db1"), Ok(None)),
            (database("db1"), Ok(Some(ResourceProperties::default()))),
            (database("db1"), in_state("CreateFailed")),
            (database("db1"), in_state("Exploding")),
            (database("db1"), Err(ClientError::transport("reset"))),
        ]);
        let probe =
            CreateUpdateProbe::new(client.clone(), database("db1"), INTERVAL);

        assert_matches!(probe.poll().await, Err(ProbeError::NotFound { .. }));
        assert_matches!(
            probe.poll().await,
            Err(ProbeError::MissingResourceState { .. })
        );
        assert_matches!(
            probe.poll().await,
            Err(ProbeError::UnexpectedResourceState { state, .. })
                if state == "CreateFailed"
        );
        assert_matches!(
            probe.poll().await,
            Err(ProbeError::UnexpectedResourceState { state, .. })
                if state == "Exploding"
        );
        assert_matches!(
            probe.poll().await,
            Err(ProbeError::Client { err: ClientError::Transport { .. }, .. })
        );
        assert_eq!(client.remaining(), 0);
    }

    #[tokio::test]
    async fn test_delete_child_gone_on_first_poll() {
        // The parent is never fetched.
        let client = ScriptedClient::new([(database("db1"), Ok(None))]);
        let probe = DeleteProbe::new(
            client.clone(),
            cluster(),
            database("db1"),
            INTERVAL,
        );
        assert_eq!(probe.poll().await.unwrap(), ProbeResult::succeeded());
        assert_eq!(client.remaining(), 0);
    }

    #[tokio::test]
    async fn test_delete_waits_for_either_resource() {
        let client = ScriptedClient::new([
            (database("db1"), in_state("Deleting")),
            (cluster(), in_state("Running")),
            (database("db1"), in_state("Deleting")),
            (cluster(), Ok(None)),
        ]);
        let probe = DeleteProbe::new(
            client.clone(),
            cluster(),
            database("db1"),
            INTERVAL,
        );
        assert_eq!(
            probe.poll().await.unwrap(),
            ProbeResult::in_progress(INTERVAL)
        );
        assert_eq!(probe.poll().await.unwrap(), ProbeResult::succeeded());
        assert_eq!(client.remaining(), 0);
    }

    #[tokio::test]
    async fn test_delete_client_error_is_fatal() {
        let client = ScriptedClient::new([(
            database("db1"),
            Err(ClientError::api(500, "internal error")),
        )]);
        let probe =
            DeleteProbe::new(client, cluster(), database("db1"), INTERVAL);
        assert_matches!(
            probe.poll().await,
            Err(ProbeError::Client {
                err: ClientError::Api { status: 500, .. },
                ..
            })
        );
    }

    #[tokio::test]
    async fn test_link_convergence() {
        let client = ScriptedClient::new([
            (
                database("a"),
                with_peers(&[
                    ("a", LinkState::Linked),
                    ("b", LinkState::Linking),
                ]),
            ),
            (database("a"), with_peers(&[("a", LinkState::Linked)])),
            (
                database("a"),
                with_peers(&[
                    ("a", LinkState::Linked),
                    ("c", LinkState::Linking),
                    ("b", LinkState::Linked),
                ]),
            ),
        ]);
        let probe = LinkConvergenceProbe::new(
            client.clone(),
            NodeId::from("a"),
            ids(&["a", "b"]),
            INTERVAL,
        );

        // Linking, then missing entirely, then linked. Peers outside the
        // expected set are ignored whatever their state.
        assert_eq!(
            probe.poll().await.unwrap(),
            ProbeResult::in_progress(INTERVAL)
        );
        assert_eq!(
            probe.poll().await.unwrap(),
            ProbeResult::in_progress(INTERVAL)
        );
        assert_eq!(probe.poll().await.unwrap(), ProbeResult::succeeded());
        assert_eq!(client.remaining(), 0);
    }

    #[tokio::test]
    async fn test_link_convergence_fatal_conditions() {
        let client = ScriptedClient::new([
            (database("a"), in_state("Running")),
            (database("a"), Ok(None)),
        ]);
        let probe = LinkConvergenceProbe::new(
            client,
            NodeId::from("a"),
            ids(&["a"]),
            INTERVAL,
        );
        assert_matches!(
            probe.poll().await,
            Err(ProbeError::ReplicationNotConfigured { id })
                if id.as_str() == "a"
        );
        assert_matches!(probe.poll().await, Err(ProbeError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_unlink_settled() {
        let client = ScriptedClient::new([
            (
                database("a"),
                with_peers(&[
                    ("a", LinkState::Linked),
                    ("b", LinkState::Linked),
                ]),
            ),
            (
                database("a"),
                with_peers(&[
                    ("a", LinkState::Linked),
                    ("b", LinkState::Unlinking),
                ]),
            ),
            (
                database("a"),
                with_peers(&[
                    ("a", LinkState::Linked),
                    ("b", LinkState::UnlinkFailed),
                ]),
            ),
            (database("a"), with_peers(&[("a", LinkState::Linked)])),
        ]);
        let probe = UnlinkSettledProbe::new(
            client.clone(),
            NodeId::from("a"),
            ids(&["b"]),
            INTERVAL,
        );

        // Any entry for a removed node, in any state, means not settled.
        for _ in 0..3 {
            assert_eq!(
                probe.poll().await.unwrap(),
                ProbeResult::in_progress(INTERVAL)
            );
        }
        assert_eq!(probe.poll().await.unwrap(), ProbeResult::succeeded());
        assert_eq!(client.remaining(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_error_surfaces_through_poller() {
        let logctx = test_setup_log("test_probe_error_surfaces_through_poller");
        let client = ScriptedClient::new([
            (database("db1"), in_state("Updating")),
            (database("db1"), in_state("UpdateFailed")),
        ]);
        let probe = CreateUpdateProbe::new(client, database("db1"), INTERVAL);

        let err = poll_until_done(
            &logctx.log,
            &probe,
            Duration::ZERO,
            &PollContext::new(),
        )
        .await
        .expect_err("failed update is fatal");
        assert!(!err.is_timeout_or_cancel());
        assert_matches!(
            err,
            PollError::Probe {
                err: ProbeError::UnexpectedResourceState { .. },
                ..
            }
        );
        logctx.cleanup_successful();
    }
}
