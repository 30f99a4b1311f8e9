// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Interface to the remote control plane that owns clusters, databases, and
//! their replication links.
//!
//! The reconciler only ever talks to the control plane through
//! [`RemoteResourceClient`]. Production code provides an implementation backed
//! by the real REST API; tests and developer tools use the simulated control
//! plane in `georep-sim`.

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::BoxFuture;
use georep_types::GroupNickname;
use georep_types::NodeId;
use georep_types::ResourceProperties;
use georep_types::ResourceRef;
use slog_error_chain::SlogInlineError;
use std::sync::Arc;
use thiserror::Error;

/// Errors returned by the control plane or the transport in front of it.
///
/// These are propagated unchanged by the reconciler; classifying them or
/// retrying them is the transport layer's job.
#[derive(Clone, Debug, Error, PartialEq, Eq, SlogInlineError)]
pub enum ClientError {
    #[error("communication error: {message}")]
    Transport { message: String },

    #[error("error response from control plane (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("operation {operation:?} failed: {message}")]
    OperationFailed { operation: String, message: String },
}

impl ClientError {
    pub fn transport(message: impl Into<String>) -> Self {
        ClientError::Transport { message: message.into() }
    }

    pub fn api(status: u16, message: impl Into<String>) -> Self {
        ClientError::Api { status, message: message.into() }
    }
}

/// Handle to a long-running operation started by a mutating call.
///
/// [`OperationHandle::wait`] resolves when the control plane reports that its
/// operation envelope has finished. That is not the same as the resource
/// having reached its terminal state: callers that care about the latter must
/// follow up with a convergence poll.
pub struct OperationHandle {
    operation: String,
    completion: BoxFuture<'static, Result<(), ClientError>>,
}

impl OperationHandle {
    pub fn new<F>(operation: impl Into<String>, completion: F) -> Self
    where
        F: Future<Output = Result<(), ClientError>> + Send + 'static,
    {
        Self { operation: operation.into(), completion: completion.boxed() }
    }

    /// Returns a handle for an operation whose envelope has already finished.
    pub fn completed(operation: impl Into<String>) -> Self {
        Self::new(operation, futures::future::ready(Ok(())))
    }

    /// Describes the operation, for logging.
    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// Wait for the operation envelope to finish.
    pub async fn wait(self) -> Result<(), ClientError> {
        self.completion.await
    }
}

impl std::fmt::Debug for OperationHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationHandle")
            .field("operation", &self.operation)
            .finish_non_exhaustive()
    }
}

/// The subset of the control plane API used for geo-replication.
#[async_trait]
pub trait RemoteResourceClient: Send + Sync {
    /// Fetch a cluster or database.
    ///
    /// Returns `Ok(None)` if the control plane cleanly reports that the
    /// resource does not exist. Any other failure is an error.
    async fn get(
        &self,
        resource: &ResourceRef,
    ) -> Result<Option<ResourceProperties>, ClientError>;

    /// Ask `target` to adopt `payload` as the full membership of the group
    /// named `nickname`.
    ///
    /// The control plane requires `target` to be the node being added, and
    /// treats `payload` as the authoritative membership at that instant.
    async fn force_link(
        &self,
        target: &NodeId,
        nickname: &GroupNickname,
        payload: &[NodeId],
    ) -> Result<OperationHandle, ClientError>;

    /// Ask `target`, which must currently be a member of the group, to drop
    /// the nodes in `payload` from it.
    async fn force_unlink(
        &self,
        target: &NodeId,
        payload: &[NodeId],
    ) -> Result<OperationHandle, ClientError>;
}

#[async_trait]
impl<T: RemoteResourceClient + ?Sized> RemoteResourceClient for Arc<T> {
    async fn get(
        &self,
        resource: &ResourceRef,
    ) -> Result<Option<ResourceProperties>, ClientError> {
        (**self).get(resource).await
    }

    async fn force_link(
        &self,
        target: &NodeId,
        nickname: &GroupNickname,
        payload: &[NodeId],
    ) -> Result<OperationHandle, ClientError> {
        (**self).force_link(target, nickname, payload).await
    }

    async fn force_unlink(
        &self,
        target: &NodeId,
        payload: &[NodeId],
    ) -> Result<OperationHandle, ClientError> {
        (**self).force_unlink(target, payload).await
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use assert_matches::assert_matches;

    #[tokio::test]
    async fn test_operation_handle_reports_envelope_result() {
        let handle = OperationHandle::completed("force-link b");
        assert_eq!(handle.operation(), "force-link b");
        handle.wait().await.expect("completed handle succeeds");

        let handle = OperationHandle::new("force-unlink a", async {
            Err(ClientError::OperationFailed {
                operation: "force-unlink a".to_string(),
                message: "conflict".to_string(),
            })
        });
        assert_matches!(
            handle.wait().await,
            Err(ClientError::OperationFailed { message, .. })
                if message == "conflict"
        );
    }

    #[test]
    fn test_client_error_messages() {
        assert_eq!(
            ClientError::api(409, "group busy").to_string(),
            "error response from control plane (status 409): group busy"
        );
        assert_eq!(
            ClientError::transport("connection reset").to_string(),
            "communication error: connection reset"
        );
    }
}
