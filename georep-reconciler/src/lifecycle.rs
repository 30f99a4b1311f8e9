// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Waiting for clusters and databases to finish being created, updated, or
//! deleted.

use crate::config::ReconcilerConfig;
use crate::poll::PollContext;
use crate::poll::PollError;
use crate::poll::poll_until_done;
use crate::probes::CreateUpdateProbe;
use crate::probes::DeleteProbe;
use georep_client::RemoteResourceClient;
use georep_types::ResourceRef;
use slog::Logger;
use slog::o;
use std::sync::Arc;

/// Wait for `resource` to be `Running` after a create or update call.
pub async fn wait_for_ready(
    log: &Logger,
    client: Arc<dyn RemoteResourceClient>,
    resource: ResourceRef,
    config: &ReconcilerConfig,
    ctx: &PollContext,
) -> Result<(), PollError> {
    let log = log.new(o!(
        "waiting_for" => "ready",
        "kind" => resource.kind(),
        "resource" => resource.to_string(),
    ));
    let ctx = ctx.child_with_timeout(config.reconcile_timeout_secs);
    let probe =
        CreateUpdateProbe::new(client, resource, config.poll_interval_secs);
    poll_until_done(&log, &probe, config.initial_delay_secs, &ctx).await
}

/// Wait for `child` to be gone after a delete call, treating the deletion of
/// `parent` as deleting `child` too.
pub async fn wait_for_deleted(
    log: &Logger,
    client: Arc<dyn RemoteResourceClient>,
    parent: ResourceRef,
    child: ResourceRef,
    config: &ReconcilerConfig,
    ctx: &PollContext,
) -> Result<(), PollError> {
    let log = log.new(o!(
        "waiting_for" => "deleted",
        "kind" => child.kind(),
        "resource" => child.to_string(),
    ));
    let ctx = ctx.child_with_timeout(config.reconcile_timeout_secs);
    let probe =
        DeleteProbe::new(client, parent, child, config.poll_interval_secs);
    poll_until_done(&log, &probe, config.initial_delay_secs, &ctx).await
}
