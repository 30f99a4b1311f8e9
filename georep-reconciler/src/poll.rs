// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Waiting for remote state machines to reach a terminal state.
//!
//! A remote operation finishing (its long-running-operation envelope
//! completing) does not mean the resource it touched has settled. The
//! [`poll_until_done`] loop closes that gap: it repeatedly asks a
//! [`StateProbe`] whether the resource has converged, sleeping for whatever
//! interval the probe recommends in between.
//!
//! Transient conditions are never errors here; a probe reports them as
//! [`ProbeResult::InProgress`]. A probe error is fatal and ends the wait at
//! once. The only bound on total wall-clock time is the [`PollContext`]'s
//! deadline and cancellation token.

use async_trait::async_trait;
use georep_client::ClientError;
use georep_types::NodeId;
use georep_types::ResourceRef;
use slog::Logger;
use slog::debug;
use slog::info;
use slog_error_chain::SlogInlineError;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// The outcome of one probe call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProbeResult {
    /// Not there yet; check again after `interval`.
    InProgress { interval: Duration },
    /// The resource reached the state the probe was waiting for.
    Succeeded,
}

impl ProbeResult {
    pub fn in_progress(interval: Duration) -> Self {
        ProbeResult::InProgress { interval }
    }

    pub fn succeeded() -> Self {
        ProbeResult::Succeeded
    }
}

/// A condition observed by a probe that waiting cannot fix.
#[derive(Debug, Error, SlogInlineError)]
pub enum ProbeError {
    #[error("{resource} not found")]
    NotFound { resource: ResourceRef },

    #[error("{resource} has no resource state")]
    MissingResourceState { resource: ResourceRef },

    #[error("{resource} is in unexpected state {state:?}")]
    UnexpectedResourceState { resource: ResourceRef, state: String },

    #[error("database {id} has no replication properties")]
    ReplicationNotConfigured { id: NodeId },

    #[error("failed to fetch {resource}")]
    Client {
        resource: ResourceRef,
        #[source]
        err: ClientError,
    },
}

/// Reads remote state and decides whether to keep waiting.
///
/// Implementations hold only immutable fields captured at construction (the
/// client handle, the identity of what they watch, and their recommended
/// interval).
#[async_trait]
pub trait StateProbe: Send + Sync {
    /// Describes what the probe is waiting for, for logs and errors.
    fn describe(&self) -> String;

    async fn poll(&self) -> Result<ProbeResult, ProbeError>;
}

#[derive(Debug, Error, SlogInlineError)]
pub enum PollError {
    #[error("wait was cancelled")]
    Cancelled,

    #[error("deadline exceeded")]
    DeadlineExceeded,

    #[error("checking whether {probe}")]
    Probe {
        probe: String,
        #[source]
        err: ProbeError,
    },
}

impl PollError {
    /// Returns true if the wait ended because the caller ran out of time or
    /// gave up, as opposed to the probe finding something wrong.
    pub fn is_timeout_or_cancel(&self) -> bool {
        matches!(self, PollError::Cancelled | PollError::DeadlineExceeded)
    }
}

/// Cancellation and deadline for a wait (or a whole reconciliation).
///
/// Cloning a `PollContext` shares its cancellation token: cancelling any clone
/// cancels all of them.
#[derive(Clone, Debug, Default)]
pub struct PollContext {
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl PollContext {
    /// A context with no deadline, ended only by cancellation.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_deadline(deadline: Instant) -> Self {
        Self { cancel: CancellationToken::new(), deadline: Some(deadline) }
    }

    /// A context that expires `timeout` from now. A timeout too large to
    /// represent as an [`Instant`] means no deadline.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            cancel: CancellationToken::new(),
            deadline: Instant::now().checked_add(timeout),
        }
    }

    /// Derive a context that is cancelled along with `self` and whose deadline
    /// is the earlier of `self`'s and `timeout` from now.
    pub fn child_with_timeout(&self, timeout: Duration) -> Self {
        let own = Instant::now().checked_add(timeout);
        let deadline = match (self.deadline, own) {
            (Some(parent), Some(own)) => Some(parent.min(own)),
            (parent, own) => parent.or(own),
        };
        Self { cancel: self.cancel.child_token(), deadline }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Fails if the context has been cancelled or its deadline has passed.
    pub fn check(&self) -> Result<(), PollError> {
        if self.cancel.is_cancelled() {
            return Err(PollError::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => {
                Err(PollError::DeadlineExceeded)
            }
            _ => Ok(()),
        }
    }

    /// Drive `fut` to completion unless the context is cancelled or its
    /// deadline passes first, in which case `fut` is dropped.
    pub async fn run<F>(&self, fut: F) -> Result<F::Output, PollError>
    where
        F: Future,
    {
        let deadline = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending().await,
            }
        };
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(PollError::Cancelled),
            _ = deadline => Err(PollError::DeadlineExceeded),
            output = fut => Ok(output),
        }
    }

    /// Sleep for `duration`, ending early with an error if the context is
    /// cancelled or its deadline passes first.
    pub async fn sleep(&self, duration: Duration) -> Result<(), PollError> {
        self.run(tokio::time::sleep(duration)).await?;
        self.check()
    }
}

/// Call `probe` until it reports success.
///
/// Waits `initial_delay` before the first call; after that, sleeps for the
/// interval returned with each [`ProbeResult::InProgress`]. The context is
/// checked before every probe call, so once it is cancelled or expired the
/// probe is never called again. Probe errors are returned immediately and not
/// retried.
pub async fn poll_until_done<P>(
    log: &Logger,
    probe: &P,
    initial_delay: Duration,
    ctx: &PollContext,
) -> Result<(), PollError>
where
    P: StateProbe + ?Sized,
{
    let started = Instant::now();
    if !initial_delay.is_zero() {
        ctx.sleep(initial_delay).await?;
    }

    let mut polls: u64 = 0;
    loop {
        ctx.check()?;
        polls += 1;
        let result = probe.poll().await.map_err(|err| PollError::Probe {
            probe: probe.describe(),
            err,
        })?;
        match result {
            ProbeResult::Succeeded => {
                info!(
                    log,
                    "converged";
                    "probe" => probe.describe(),
                    "polls" => polls,
                    "elapsed" => ?started.elapsed(),
                );
                return Ok(());
            }
            ProbeResult::InProgress { interval } => {
                debug!(
                    log,
                    "not yet converged";
                    "probe" => probe.describe(),
                    "polls" => polls,
                    "next_poll_in" => ?interval,
                );
                ctx.sleep(interval).await?;
            }
        }
    }
}
