//! Shared one-shot sync entrypoint used by the CLI and the daemon.

use std::time::{Duration, Instant};

use serde::Serialize;

use chama_core::types::Collection;
use chama_core::LocalStore;

use crate::error::SyncError;
use crate::pull::{pull_all, NoHook, PullCounters, PullHook, PullStats};
use crate::push::{push_unsynced, PushReport};
use crate::remote::RemoteStore;

/// Which directions a sync run covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncMode {
    #[default]
    Both,
    PushOnly,
    PullOnly,
}

impl SyncMode {
    fn pushes(self) -> bool {
        matches!(self, SyncMode::Both | SyncMode::PushOnly)
    }

    fn pulls(self) -> bool {
        matches!(self, SyncMode::Both | SyncMode::PullOnly)
    }
}

/// Outcome of [`run`], flattened for display and the daemon protocol.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncSummary {
    pub pushed: usize,
    pub superseded: usize,
    pub failed: Vec<String>,
    pub pulled: PullCounters,
    pub duration_ms: u128,
}

impl SyncSummary {
    fn absorb_push(&mut self, report: PushReport) {
        self.pushed += report.pushed.len();
        self.superseded += report.superseded.len();
        self.failed.extend(
            report
                .failed
                .into_iter()
                .map(|f| format!("{}/{}: {}", f.collection, f.key, f.error)),
        );
    }
}

/// [`run_with`] without ledger follow-ups beyond duplicate canonical-id
/// repair.
pub async fn run<S, R>(
    store: &S,
    remote: &R,
    mode: SyncMode,
    timeout: Duration,
) -> Result<SyncSummary, SyncError>
where
    S: LocalStore,
    R: RemoteStore + ?Sized,
{
    run_with(store, remote, &NoHook, mode, timeout).await
}

/// Push unsynced entities, then pull every collection once.
///
/// In [`SyncMode::Both`], local copies that the pull kept over an older
/// remote copy, or rewrote in a follow-up, are pushed again before
/// returning. A pull failure (remote unreachable) aborts the run; push
/// failures are per-entity and reported in the summary.
pub async fn run_with<S, R>(
    store: &S,
    remote: &R,
    hook: &dyn PullHook,
    mode: SyncMode,
    timeout: Duration,
) -> Result<SyncSummary, SyncError>
where
    S: LocalStore,
    R: RemoteStore + ?Sized,
{
    let started = Instant::now();
    let collections = Collection::all();
    let mut summary = SyncSummary::default();

    if mode.pushes() {
        let report = push_unsynced(store, remote, &collections, timeout).await?;
        summary.absorb_push(report);
    }

    if mode.pulls() {
        let stats = PullStats::default();
        for collection in &collections {
            tokio::time::timeout(timeout, pull_all(store, remote, hook, *collection, &stats))
                .await
                .map_err(|_| SyncError::Timeout(timeout.as_millis() as u64))??;
        }
        summary.pulled = stats.snapshot();
    }

    // Local copies that won against the remote, and follow-up writes, were
    // re-queued by the pull.
    if mode == SyncMode::Both && summary.pulled.kept_local + summary.pulled.settled > 0 {
        let report = push_unsynced(store, remote, &collections, timeout).await?;
        summary.absorb_push(report);
    }

    summary.duration_ms = started.elapsed().as_millis();
    Ok(summary)
}
