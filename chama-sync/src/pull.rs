//! Pull pipeline: remote change events → local store.
//!
//! Each event is applied to the local copy inside one atomic `modify`:
//!
//! | local copy | outcome                                                    |
//! |------------|------------------------------------------------------------|
//! | absent     | insert the remote copy, synced                             |
//! | same bytes | mark synced                                                |
//! | older/tied | overwrite with the remote copy, synced                     |
//! | newer      | keep local, unsynced, so the next push converges the remote |
//!
//! Remote removals are never applied: records and votes are append-only
//! once they have left the device.
//!
//! Inserted or applied changes get follow-ups: a pulled record whose
//! canonical id another local record already holds has the duplicate
//! repaired, and a [`PullHook`] may re-run the vote-driven transition of the
//! record the change touched.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use chama_core::types::{
    ApprovalVote, Collection, Entity, FinancialRecord, ProvisionalId, RecordStatus,
};
use chama_core::{LocalStore, MembershipProvider};
use chama_ledger::{reassign_duplicate_canonical, Ledger};

use crate::document::from_document;
use crate::error::SyncError;
use crate::remote::{ChangeEvent, ChangeKind, RemoteStore};
use crate::resolver::{resolve, Resolution};

/// What applying one change did locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PullOutcome {
    Inserted,
    /// The remote copy replaced the local one.
    Applied,
    /// The local copy is newer and was queued for push.
    KeptLocal,
    /// Same content; at most the sync flag changed.
    Unchanged,
    /// A remote removal, ignored.
    Retained,
}

/// Apply one change event for `collection` to the local store.
pub fn apply_change<S: LocalStore>(
    store: &S,
    collection: Collection,
    event: &ChangeEvent,
) -> Result<PullOutcome, SyncError> {
    match collection {
        Collection::Records(_) => apply_typed::<S, FinancialRecord>(store, collection, event),
        Collection::Votes => apply_typed::<S, ApprovalVote>(store, collection, event),
    }
}

fn apply_typed<S: LocalStore, E: Entity>(
    store: &S,
    collection: Collection,
    event: &ChangeEvent,
) -> Result<PullOutcome, SyncError> {
    if event.kind == ChangeKind::Removed {
        tracing::debug!("ignoring remote removal of {collection}/{}", event.key);
        return Ok(PullOutcome::Retained);
    }

    let remote: E = from_document(collection, &event.key, &event.document)?;

    store.modify::<E, _, SyncError, _>(collection, &event.key, |local| {
        let Some(mut local) = local else {
            return Ok((Some(remote), PullOutcome::Inserted));
        };
        match resolve(&local, &remote)? {
            Resolution::Identical => {
                if local.sync_flag() {
                    return Ok((None, PullOutcome::Unchanged));
                }
                local.set_sync_flag(true);
                Ok((Some(local), PullOutcome::Unchanged))
            }
            Resolution::RemoteWins => Ok((Some(remote), PullOutcome::Applied)),
            Resolution::LocalWins => {
                if !local.sync_flag() {
                    return Ok((None, PullOutcome::KeptLocal));
                }
                local.set_sync_flag(false);
                Ok((Some(local), PullOutcome::KeptLocal))
            }
        }
    })
}

/// Domain follow-up for changes a pull has written locally.
pub trait PullHook: Send + Sync {
    /// The record `entity_id` or one of its votes changed. Returns whether
    /// the hook wrote a local mutation.
    fn entity_changed(&self, entity_id: &ProvisionalId) -> Result<bool, SyncError>;
}

/// Hook that does nothing; for callers without a membership roster.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoHook;

impl PullHook for NoHook {
    fn entity_changed(&self, _entity_id: &ProvisionalId) -> Result<bool, SyncError> {
        Ok(false)
    }
}

/// Re-runs the quorum transition, so a record whose deciding vote was cast on
/// another device is approved (or rejected) here too.
impl<S: LocalStore, M: MembershipProvider> PullHook for Ledger<S, M> {
    fn entity_changed(&self, entity_id: &ProvisionalId) -> Result<bool, SyncError> {
        Ok(self.reevaluate(entity_id)?.is_some())
    }
}

/// [`apply_change`], counted in `stats`, followed by the local follow-ups.
///
/// Follow-up failures are logged; the change itself has landed and keeps
/// its outcome.
pub fn apply_and_settle<S: LocalStore>(
    store: &S,
    hook: &dyn PullHook,
    collection: Collection,
    event: &ChangeEvent,
    stats: &PullStats,
) -> Result<PullOutcome, SyncError> {
    let outcome = apply_change(store, collection, event);
    stats.record(&outcome);
    if let Ok(PullOutcome::Inserted | PullOutcome::Applied) = outcome {
        match follow_up(store, hook, collection, &event.key) {
            Ok(0) => {}
            Ok(writes) => {
                stats.settled.fetch_add(writes, Ordering::Relaxed);
            }
            Err(err) => {
                tracing::warn!("follow-up for {collection}/{} failed: {err}", event.key);
            }
        }
    }
    outcome
}

/// Local writes made in response to a landed change.
fn follow_up<S: LocalStore>(
    store: &S,
    hook: &dyn PullHook,
    collection: Collection,
    key: &str,
) -> Result<u64, SyncError> {
    match collection {
        Collection::Records(kind) => {
            let Some(record) = store.get::<FinancialRecord>(collection, key)? else {
                return Ok(0);
            };
            let mut writes = 0;
            if let Some(code) = &record.canonical_id {
                writes += reassign_duplicate_canonical(store, kind, code)?.len() as u64;
            }
            if record.status == RecordStatus::Pending && hook.entity_changed(&record.provisional_id)? {
                writes += 1;
            }
            Ok(writes)
        }
        Collection::Votes => {
            let Some(vote) = store.get::<ApprovalVote>(collection, key)? else {
                return Ok(0);
            };
            Ok(u64::from(hook.entity_changed(&vote.entity_id)?))
        }
    }
}

/// Shared counters for pull activity.
#[derive(Debug, Default)]
pub struct PullStats {
    inserted: AtomicU64,
    applied: AtomicU64,
    kept_local: AtomicU64,
    unchanged: AtomicU64,
    retained: AtomicU64,
    failed: AtomicU64,
    settled: AtomicU64,
}

/// Point-in-time copy of [`PullStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PullCounters {
    pub inserted: u64,
    pub applied: u64,
    pub kept_local: u64,
    pub unchanged: u64,
    pub retained: u64,
    pub failed: u64,
    /// Local writes made in response to pulled changes (duplicate
    /// canonical-id repairs, vote-driven transitions).
    pub settled: u64,
}

impl PullStats {
    pub fn record(&self, outcome: &Result<PullOutcome, SyncError>) {
        let counter = match outcome {
            Ok(PullOutcome::Inserted) => &self.inserted,
            Ok(PullOutcome::Applied) => &self.applied,
            Ok(PullOutcome::KeptLocal) => &self.kept_local,
            Ok(PullOutcome::Unchanged) => &self.unchanged,
            Ok(PullOutcome::Retained) => &self.retained,
            Err(_) => &self.failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> PullCounters {
        PullCounters {
            inserted: self.inserted.load(Ordering::Relaxed),
            applied: self.applied.load(Ordering::Relaxed),
            kept_local: self.kept_local.load(Ordering::Relaxed),
            unchanged: self.unchanged.load(Ordering::Relaxed),
            retained: self.retained.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            settled: self.settled.load(Ordering::Relaxed),
        }
    }
}

/// Apply every document currently in the remote collection.
///
/// Per-document failures are counted and logged, not returned.
pub async fn pull_all<S, R>(
    store: &S,
    remote: &R,
    hook: &dyn PullHook,
    collection: Collection,
    stats: &PullStats,
) -> Result<(), SyncError>
where
    S: LocalStore,
    R: RemoteStore + ?Sized,
{
    let documents = remote.fetch_all(collection).await?;
    let total = documents.len();
    for (key, document) in documents {
        let event = ChangeEvent {
            kind: ChangeKind::Added,
            key,
            document,
        };
        if let Err(err) = apply_and_settle(store, hook, collection, &event, stats) {
            tracing::warn!("initial pull of {collection}/{} failed: {err}", event.key);
        }
    }
    tracing::debug!("initial pull of {collection}: {total} document(s)");
    Ok(())
}
