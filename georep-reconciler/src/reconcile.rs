// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Driving a replication group from its current membership to a desired one.
//!
//! Reconciliation is strictly sequential. Each remote call is issued, its
//! operation envelope awaited, and its effect observed through a
//! [`StateProbe`] before the next call is made. The control plane can reject
//! a force-link while an earlier one is still propagating, and a node that
//! was just unlinked may still be listed as a peer for a while; issuing calls
//! back to back would race both.
//!
//! Any failure aborts the whole reconciliation. The group is left however far
//! it got, and the returned error names the step that failed. Calling
//! [`Reconciler::reconcile`] again recomputes the plan from scratch.

use crate::config::ReconcilerConfig;
use crate::diff::MembershipDiff;
use crate::diff::diff;
use crate::plan::plan_links;
use crate::poll::PollContext;
use crate::poll::PollError;
use crate::poll::StateProbe;
use crate::poll::poll_until_done;
use crate::probes::LinkConvergenceProbe;
use crate::probes::UnlinkSettledProbe;
use georep_client::ClientError;
use georep_client::RemoteResourceClient;
use georep_types::GroupNickname;
use georep_types::Invocation;
use georep_types::MembershipSet;
use georep_types::NodeId;
use georep_types::ResourceRef;
use serde::Serialize;
use slog::Logger;
use slog::debug;
use slog::info;
use slog::o;
use slog::warn;
use slog_error_chain::InlineErrorChain;
use slog_error_chain::SlogInlineError;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// One remote call made during reconciliation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ReconcileStep {
    Unlink(Invocation),
    Link(Invocation),
}

impl fmt::Display for ReconcileStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReconcileStep::Unlink(invocation) => {
                write!(f, "force-unlink {invocation}")
            }
            ReconcileStep::Link(invocation) => {
                write!(f, "force-link {invocation}")
            }
        }
    }
}

#[derive(Debug, Error, SlogInlineError)]
pub enum ReconcileError {
    #[error(
        "desired membership {desired} does not include primary database \
         {primary}"
    )]
    PrimaryNotInDesiredMembership { primary: NodeId, desired: MembershipSet },

    #[error("primary database {primary} not found")]
    ResourceNotFound { primary: NodeId },

    #[error("primary database {primary} does not have replication enabled")]
    ReplicationNotEnabled { primary: NodeId },

    #[error("failed to fetch primary database {primary}")]
    FetchPrimary {
        primary: NodeId,
        #[source]
        err: ClientError,
    },

    #[error("failed to {step}")]
    Client {
        step: ReconcileStep,
        #[source]
        err: ClientError,
    },

    #[error("waiting for {step} to take effect")]
    Wait {
        step: ReconcileStep,
        #[source]
        err: PollError,
    },

    #[error("reconciliation stopped before {before}")]
    Interrupted {
        before: String,
        #[source]
        err: PollError,
    },
}

impl ReconcileError {
    /// Returns true if reconciliation stopped because it was cancelled or ran
    /// out of time, rather than because something was wrong.
    pub fn is_timeout_or_cancel(&self) -> bool {
        match self {
            ReconcileError::Interrupted { .. } => true,
            ReconcileError::Wait { err, .. } => err.is_timeout_or_cancel(),
            _ => false,
        }
    }
}

/// What reconciling a group would do, computed from its current membership.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ReconcilePlan {
    pub primary: NodeId,
    pub nickname: GroupNickname,
    /// Membership as reported by the primary, in every link state.
    pub current: MembershipSet,
    pub diff: MembershipDiff,
    /// Unlinks first, then links, in the order they will be issued.
    pub steps: Vec<ReconcileStep>,
}

/// The outcome of a successful reconciliation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ReconcileSummary {
    pub diff: MembershipDiff,
    pub issued: Vec<ReconcileStep>,
}

/// Reconciles replication groups through a [`RemoteResourceClient`].
pub struct Reconciler {
    log: Logger,
    client: Arc<dyn RemoteResourceClient>,
    config: ReconcilerConfig,
    ctx: PollContext,
}

impl Reconciler {
    /// `ctx` bounds every reconciliation made through this `Reconciler`; each
    /// one is additionally limited to the configured timeout.
    pub fn new(
        log: &Logger,
        client: Arc<dyn RemoteResourceClient>,
        config: ReconcilerConfig,
        ctx: PollContext,
    ) -> Self {
        let log = log.new(o!("component" => "Reconciler"));
        Self { log, client, config, ctx }
    }

    /// Fetch `primary` and return the group's current membership and
    /// nickname, as the primary sees them.
    pub async fn current_membership(
        &self,
        primary: &NodeId,
    ) -> Result<(MembershipSet, GroupNickname), ReconcileError> {
        let properties = self
            .client
            .get(&ResourceRef::Database(primary.clone()))
            .await
            .map_err(|err| ReconcileError::FetchPrimary {
                primary: primary.clone(),
                err,
            })?
            .ok_or_else(|| ReconcileError::ResourceNotFound {
                primary: primary.clone(),
            })?;
        let replication = properties.replication.ok_or_else(|| {
            ReconcileError::ReplicationNotEnabled { primary: primary.clone() }
        })?;

        // Peers that are still linking or unlinking count as members: they
        // have to be driven to their final state like any other.
        let current = MembershipSet::from_remote(
            replication.linked.into_iter().map(|peer| peer.id),
        );
        Ok((current, replication.group_nickname))
    }

    /// Compute, without changing anything, the calls that would move the
    /// group containing `primary` to `desired`.
    pub async fn plan(
        &self,
        primary: &NodeId,
        desired: &MembershipSet,
    ) -> Result<ReconcilePlan, ReconcileError> {
        check_desired(primary, desired)?;
        let (current, nickname) = self.current_membership(primary).await?;
        let diff = diff(current.as_slice(), desired.as_slice());
        let steps = self
            .config
            .unlink_strategy
            .plan(&diff.remaining, &diff.to_unlink)
            .into_iter()
            .map(ReconcileStep::Unlink)
            .chain(
                plan_links(&diff.remaining, &diff.to_link)
                    .into_iter()
                    .map(ReconcileStep::Link),
            )
            .collect();
        Ok(ReconcilePlan {
            primary: primary.clone(),
            nickname,
            current,
            diff,
            steps,
        })
    }

    /// Move the group containing `primary` to exactly `desired`.
    ///
    /// Returns only once every call has been issued and observed to take
    /// effect.
    pub async fn reconcile(
        &self,
        primary: &NodeId,
        desired: &MembershipSet,
    ) -> Result<ReconcileSummary, ReconcileError> {
        let log = self.log.new(o!("primary" => primary.to_string()));
        let ctx =
            self.ctx.child_with_timeout(self.config.reconcile_timeout_secs);
        let result = self.reconcile_impl(&log, primary, desired, &ctx).await;
        if let Err(err) = &result {
            warn!(
                log,
                "reconciliation aborted";
                InlineErrorChain::new(err),
            );
        }
        result
    }

    async fn reconcile_impl(
        &self,
        log: &Logger,
        primary: &NodeId,
        desired: &MembershipSet,
        ctx: &PollContext,
    ) -> Result<ReconcileSummary, ReconcileError> {
        check_desired(primary, desired)?;
        ctx.check().map_err(|err| ReconcileError::Interrupted {
            before: format!("fetching primary database {primary}"),
            err,
        })?;
        let plan = ctx
            .run(self.plan(primary, desired))
            .await
            .map_err(|err| ReconcileError::Interrupted {
                before: format!("fetching primary database {primary}"),
                err,
            })??;

        info!(
            log,
            "computed membership diff";
            "current" => %plan.current,
            "desired" => %desired,
            "to_unlink" => plan.diff.to_unlink.len(),
            "to_link" => plan.diff.to_link.len(),
        );
        if plan.diff.remaining.is_empty() && !plan.diff.to_unlink.is_empty() {
            warn!(
                log,
                "no remaining member to unlink through; skipping unlinks";
                "to_unlink" => plan.diff.to_unlink.len(),
            );
        }

        let mut issued = Vec::with_capacity(plan.steps.len());
        for step in plan.steps {
            self.run_step(log, primary, &plan.nickname, &step, ctx).await?;
            issued.push(step);
        }

        info!(log, "reconciliation complete"; "calls" => issued.len());
        Ok(ReconcileSummary { diff: plan.diff, issued })
    }

    /// Issue one call and wait for it to take effect.
    async fn run_step(
        &self,
        log: &Logger,
        primary: &NodeId,
        nickname: &GroupNickname,
        step: &ReconcileStep,
        ctx: &PollContext,
    ) -> Result<(), ReconcileError> {
        let interrupted = |err: PollError| ReconcileError::Interrupted {
            before: step.to_string(),
            err,
        };
        let client_error = |err: ClientError| ReconcileError::Client {
            step: step.clone(),
            err,
        };

        ctx.check().map_err(interrupted)?;
        info!(log, "issuing call"; "step" => %step);

        let issue = async {
            match step {
                ReconcileStep::Unlink(invocation) => {
                    self.client
                        .force_unlink(&invocation.target, &invocation.payload)
                        .await
                }
                ReconcileStep::Link(invocation) => {
                    self.client
                        .force_link(
                            &invocation.target,
                            nickname,
                            &invocation.payload,
                        )
                        .await
                }
            }
        };
        let handle = ctx.run(issue).await.map_err(interrupted)?;
        let handle = handle.map_err(client_error)?;
        debug!(
            log,
            "waiting for operation";
            "operation" => handle.operation().to_string(),
        );
        ctx.run(handle.wait())
            .await
            .map_err(interrupted)?
            .map_err(client_error)?;

        let interval = self.config.poll_interval_secs;
        let probe: Box<dyn StateProbe> = match step {
            ReconcileStep::Unlink(invocation) => {
                Box::new(UnlinkSettledProbe::new(
                    self.client.clone(),
                    invocation.target.clone(),
                    invocation.payload.clone(),
                    interval,
                ))
            }
            ReconcileStep::Link(invocation) => {
                if !self.config.wait_for_link_convergence {
                    debug!(log, "not waiting for link convergence");
                    return Ok(());
                }
                Box::new(LinkConvergenceProbe::new(
                    self.client.clone(),
                    primary.clone(),
                    invocation.payload.clone(),
                    interval,
                ))
            }
        };
        poll_until_done(log, &*probe, self.config.initial_delay_secs, ctx)
            .await
            .map_err(|err| ReconcileError::Wait { step: step.clone(), err })
    }
}

/// Fails unless `desired` keeps `primary` in the group.
fn check_desired(
    primary: &NodeId,
    desired: &MembershipSet,
) -> Result<(), ReconcileError> {
    if desired.contains(primary) {
        Ok(())
    } else {
        Err(ReconcileError::PrimaryNotInDesiredMembership {
            primary: primary.clone(),
            desired: desired.clone(),
        })
    }
}
