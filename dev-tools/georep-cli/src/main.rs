// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Developer tool for planning and running geo-replication reconciliation
//! against a simulated control plane.

use anyhow::Context;
use camino::Utf8PathBuf;
use clap::Args;
use clap::Parser;
use clap::Subcommand;
use georep_reconciler::PollContext;
use georep_reconciler::ReconcilePlan;
use georep_reconciler::ReconcileSummary;
use georep_reconciler::Reconciler;
use georep_types::LinkedPeer;
use georep_types::MembershipSet;
use slog::Logger;
use slog::info;
use std::sync::Arc;
use std::time::Duration;
use swrite::SWrite;
use swrite::swriteln;

mod config;
mod scenario;

use config::Config;
use scenario::Scenario;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = GeorepCli::parse();
    args.exec().await
}

/// Plan and run geo-replication reconciliation against a simulated control
/// plane.
#[derive(Clone, Debug, Parser)]
#[clap(version)]
struct GeorepCli {
    /// Configuration file with logging and reconciler settings
    #[clap(long, global = true, env = "GEOREP_CLI_CONFIG")]
    config: Option<Utf8PathBuf>,

    #[clap(subcommand)]
    command: GeorepCmd,
}

impl GeorepCli {
    async fn exec(&self) -> Result<(), anyhow::Error> {
        let config = match &self.config {
            Some(path) => Config::from_file(path)
                .with_context(|| format!("loading config {path}"))?,
            None => Config::default(),
        };
        let log = config
            .log
            .to_logger("georep-cli")
            .context("failed to create logger")?;

        match &self.command {
            GeorepCmd::Plan(args) => args.exec(&log, config).await,
            GeorepCmd::Reconcile(args) => args.exec(&log, config).await,
        }
    }
}

#[derive(Clone, Debug, Subcommand)]
enum GeorepCmd {
    /// Show the calls reconciliation would make, without making them
    Plan(PlanArgs),
    /// Reconcile the scenario's group and show the resulting membership
    Reconcile(ReconcileArgs),
}

#[derive(Clone, Debug, Args)]
struct PlanArgs {
    /// Scenario file describing the control plane and the desired membership
    scenario: Utf8PathBuf,

    /// Print the plan as JSON
    #[clap(long)]
    json: bool,
}

impl PlanArgs {
    async fn exec(
        &self,
        log: &Logger,
        config: Config,
    ) -> Result<(), anyhow::Error> {
        let scenario = Scenario::from_file(&self.scenario)
            .with_context(|| format!("loading scenario {}", self.scenario))?;
        let sim = Arc::new(scenario.control_plane(log)?);
        let reconciler =
            Reconciler::new(log, sim, config.reconciler, PollContext::new());

        let plan = reconciler
            .plan(&scenario.reconcile.primary, &scenario.reconcile.desired)
            .await?;
        if self.json {
            println!("{}", serde_json::to_string_pretty(&plan)?);
        } else {
            print!("{}", format_plan(&plan, &scenario.reconcile.desired));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Args)]
struct ReconcileArgs {
    /// Scenario file describing the control plane and the desired membership
    scenario: Utf8PathBuf,

    /// Override the configured interval between convergence checks
    #[clap(long)]
    poll_interval_secs: Option<u64>,
}

impl ReconcileArgs {
    async fn exec(
        &self,
        log: &Logger,
        mut config: Config,
    ) -> Result<(), anyhow::Error> {
        if let Some(secs) = self.poll_interval_secs {
            config.reconciler.poll_interval_secs = Duration::from_secs(secs);
        }
        let scenario = Scenario::from_file(&self.scenario)
            .with_context(|| format!("loading scenario {}", self.scenario))?;
        let sim = Arc::new(scenario.control_plane(log)?);

        // Stop cleanly, between polls, on ^C.
        let ctx = PollContext::new();
        let cancel = ctx.clone();
        let signal_log = log.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!(signal_log, "interrupted; cancelling reconciliation");
                cancel.cancel();
            }
        });

        let primary = &scenario.reconcile.primary;
        let reconciler =
            Reconciler::new(log, sim.clone(), config.reconciler, ctx);
        let summary = reconciler
            .reconcile(primary, &scenario.reconcile.desired)
            .await?;

        let peers = sim.peers(primary).unwrap_or_default();
        print!("{}", format_summary(&summary, &peers));
        Ok(())
    }
}

fn format_plan(plan: &ReconcilePlan, desired: &MembershipSet) -> String {
    let mut out = String::new();
    swriteln!(out, "primary:  {} (group {})", plan.primary, plan.nickname);
    swriteln!(out, "current:  {}", plan.current);
    swriteln!(out, "desired:  {desired}");
    if plan.steps.is_empty() {
        swriteln!(out, "nothing to do");
        return out;
    }
    swriteln!(out, "steps:");
    for (i, step) in plan.steps.iter().enumerate() {
        swriteln!(out, "  {:>2}. {step}", i + 1);
    }
    out
}

fn format_summary(summary: &ReconcileSummary, peers: &[LinkedPeer]) -> String {
    let mut out = String::new();
    if summary.issued.is_empty() {
        swriteln!(out, "already reconciled");
    } else {
        swriteln!(out, "issued:");
        for (i, step) in summary.issued.iter().enumerate() {
            swriteln!(out, "  {:>2}. {step}", i + 1);
        }
    }
    swriteln!(out, "membership:");
    for peer in peers {
        swriteln!(out, "  {} ({})", peer.id, peer.state);
    }
    out
}
