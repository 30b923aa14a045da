//! `chama sync [--push-only|--pull-only]`
//!
//! Goes through the daemon's job queue when the daemon is running;
//! otherwise runs in-process.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Args;
use serde::Deserialize;

use chama_core::settings;
use chama_daemon::{request_sync, DaemonError, SyncDirection};
use chama_sync::{pipeline, DirRemote, PullCounters, SyncMode, SyncSummary};

use super::home_dir;

/// Arguments for `chama sync`.
#[derive(Args, Debug)]
pub struct SyncArgs {
    /// Only push local changes.
    #[arg(long, conflicts_with = "pull_only")]
    pub push_only: bool,

    /// Only pull remote changes.
    #[arg(long)]
    pub pull_only: bool,

    /// Run in this process even if the daemon is up.
    #[arg(long)]
    pub no_daemon: bool,
}

/// The fields of a daemon job summary this command prints.
#[derive(Debug, Deserialize)]
struct ReportedSummary {
    pushed: usize,
    superseded: usize,
    failed: Vec<String>,
    pulled: ReportedPull,
    duration_ms: u64,
}

#[derive(Debug, Deserialize)]
struct ReportedPull {
    inserted: u64,
    applied: u64,
    kept_local: u64,
}

impl SyncArgs {
    fn direction(&self) -> SyncDirection {
        if self.push_only {
            SyncDirection::Push
        } else if self.pull_only {
            SyncDirection::Pull
        } else {
            SyncDirection::Both
        }
    }

    pub fn run(self) -> Result<()> {
        let home = home_dir()?;
        let direction = self.direction();

        if !self.no_daemon {
            match request_sync(&home, direction) {
                Ok(value) => {
                    let summary: ReportedSummary = serde_json::from_value(value)
                        .context("unexpected sync summary from daemon")?;
                    print_summary("daemon", &summary);
                    return finish(&summary.failed);
                }
                Err(DaemonError::DaemonNotRunning { .. }) => {}
                Err(err) => return Err(err).context("daemon sync failed"),
            }
        }

        let config = settings::load_at(&home).context("failed to read config.yaml")?;
        let Some(remote_root) = config.remote_root.clone() else {
            bail!("no remote configured; run `chama init --remote-root <dir>` first");
        };
        let ledger = super::open_ledger()?;
        let remote = DirRemote::new(remote_root);
        let timeout = Duration::from_millis(config.remote_timeout_ms);

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .context("failed to start async runtime")?;
        let summary = runtime
            .block_on(pipeline::run_with(
                ledger.store(),
                &remote,
                &ledger,
                SyncMode::from(direction),
                timeout,
            ))
            .context("sync failed")?;

        let reported = ReportedSummary::from(summary);
        print_summary("local", &reported);
        finish(&reported.failed)
    }
}

impl From<SyncSummary> for ReportedSummary {
    fn from(summary: SyncSummary) -> Self {
        let PullCounters {
            inserted,
            applied,
            kept_local,
            ..
        } = summary.pulled;
        Self {
            pushed: summary.pushed,
            superseded: summary.superseded,
            failed: summary.failed,
            pulled: ReportedPull {
                inserted,
                applied,
                kept_local,
            },
            duration_ms: u64::try_from(summary.duration_ms).unwrap_or(u64::MAX),
        }
    }
}

fn print_summary(via: &str, summary: &ReportedSummary) {
    println!(
        "✓ Sync ({via}) finished in {} ms: {} pushed, {} superseded, {} pulled, {} kept local",
        summary.duration_ms,
        summary.pushed,
        summary.superseded,
        summary.pulled.inserted + summary.pulled.applied,
        summary.pulled.kept_local,
    );
    for failure in &summary.failed {
        println!("  ✗ {failure}");
    }
}

fn finish(failed: &[String]) -> Result<()> {
    if failed.is_empty() {
        Ok(())
    } else {
        bail!("{} record(s) failed to push; they stay queued", failed.len())
    }
}
