// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Lifecycle waits against the simulated control plane.

use assert_matches::assert_matches;
use georep_reconciler::PollContext;
use georep_reconciler::PollError;
use georep_reconciler::ProbeError;
use georep_reconciler::ReconcilerConfig;
use georep_reconciler::lifecycle::wait_for_deleted;
use georep_reconciler::lifecycle::wait_for_ready;
use georep_sim::SimConfig;
use georep_sim::SimControlPlane;
use georep_test_utils::dev::test_setup_log;
use georep_types::ClusterId;
use georep_types::NodeId;
use georep_types::ResourceRef;
use slog::Logger;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

fn states(labels: &[&str]) -> Vec<String> {
    labels.iter().map(|label| label.to_string()).collect()
}

fn cluster() -> ResourceRef {
    ResourceRef::Cluster(ClusterId::from("east"))
}

fn database() -> ResourceRef {
    ResourceRef::Database(NodeId::from("db1"))
}

/// One cluster containing one database, each reporting the given states.
fn setup_sim(
    log: &Logger,
    cluster_states: &[&str],
    database_states: &[&str],
) -> Arc<SimControlPlane> {
    let sim = SimControlPlane::new(log, SimConfig::default());
    sim.add_cluster(ClusterId::from("east"), states(cluster_states))
        .expect("cluster added");
    sim.add_database(
        &ClusterId::from("east"),
        NodeId::from("db1"),
        states(database_states),
    )
    .expect("database added");
    Arc::new(sim)
}

#[tokio::test(start_paused = true)]
async fn test_wait_for_ready() {
    let logctx = test_setup_log("test_wait_for_ready");
    let sim = setup_sim(
        &logctx.log,
        &["Creating", "Updating", "Running"],
        &["Creating", "Scaling", "Moving", "Running"],
    );
    let config = ReconcilerConfig::default();
    let start = Instant::now();

    wait_for_ready(
        &logctx.log,
        sim.clone(),
        cluster(),
        &config,
        &PollContext::new(),
    )
    .await
    .expect("cluster became ready");
    assert_eq!(start.elapsed(), config.poll_interval_secs * 2);

    wait_for_ready(
        &logctx.log,
        sim.clone(),
        database(),
        &config,
        &PollContext::new(),
    )
    .await
    .expect("database became ready");
    assert_eq!(sim.observations(), 3 + 4);
    logctx.cleanup_successful();
}

#[tokio::test(start_paused = true)]
async fn test_wait_for_ready_failed() {
    let logctx = test_setup_log("test_wait_for_ready_failed");
    let sim = setup_sim(&logctx.log, &["Updating", "UpdateFailed"], &[]);

    let err = wait_for_ready(
        &logctx.log,
        sim.clone(),
        cluster(),
        &ReconcilerConfig::default(),
        &PollContext::new(),
    )
    .await
    .expect_err("failed update is fatal");
    assert!(!err.is_timeout_or_cancel());
    assert_matches!(
        err,
        PollError::Probe {
            err: ProbeError::UnexpectedResourceState { state, .. },
            ..
        } if state == "UpdateFailed"
    );

    let err = wait_for_ready(
        &logctx.log,
        sim,
        ResourceRef::Database(NodeId::from("nope")),
        &ReconcilerConfig::default(),
        &PollContext::new(),
    )
    .await
    .expect_err("missing database is fatal");
    assert_matches!(
        err,
        PollError::Probe { err: ProbeError::NotFound { .. }, .. }
    );
    logctx.cleanup_successful();
}

#[tokio::test(start_paused = true)]
async fn test_wait_for_ready_timeout() {
    let logctx = test_setup_log("test_wait_for_ready_timeout");
    let sim = setup_sim(&logctx.log, &["Creating"], &[]);
    let config = ReconcilerConfig {
        poll_interval_secs: Duration::from_secs(10),
        initial_delay_secs: Duration::from_secs(5),
        reconcile_timeout_secs: Duration::from_secs(60),
        ..Default::default()
    };

    let err = wait_for_ready(
        &logctx.log,
        sim.clone(),
        cluster(),
        &config,
        &PollContext::new(),
    )
    .await
    .expect_err("cluster never becomes ready");
    assert_matches!(err, PollError::DeadlineExceeded);
    // Polls at 5, 15, 25, 35, 45 and 55 seconds.
    assert_eq!(sim.observations(), 6);
    logctx.cleanup_successful();
}

#[tokio::test(start_paused = true)]
async fn test_wait_for_deleted() {
    let logctx = test_setup_log("test_wait_for_deleted");
    let sim = setup_sim(&logctx.log, &[], &[]);
    sim.delete(&database(), 2).expect("deletion started");

    wait_for_deleted(
        &logctx.log,
        sim.clone(),
        cluster(),
        database(),
        &ReconcilerConfig::default(),
        &PollContext::new(),
    )
    .await
    .expect("database deleted");

    // While the database was still there, the cluster was checked too.
    assert_eq!(sim.observations(), 2 * 2 + 1);
    logctx.cleanup_successful();
}

#[tokio::test(start_paused = true)]
async fn test_wait_for_deleted_with_parent() {
    let logctx = test_setup_log("test_wait_for_deleted_with_parent");
    let sim = setup_sim(&logctx.log, &[], &[]);
    sim.delete(&cluster(), 0).expect("deletion started");

    wait_for_deleted(
        &logctx.log,
        sim.clone(),
        cluster(),
        database(),
        &ReconcilerConfig::default(),
        &PollContext::new(),
    )
    .await
    .expect("cluster deleted");
    assert_eq!(sim.observations(), 2);
    logctx.cleanup_successful();
}
