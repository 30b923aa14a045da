//! Push pipeline: local unsynced entities → remote.
//!
//! ## Per-entity protocol
//!
//! 1. Snapshot the unsynced entity and build its document.
//! 2. `set` it under its permanent key, bounded by the remote timeout.
//! 3. Inside one atomic `modify`, set `sync_flag` only if `updated_at` still
//!    matches the snapshot. A newer local write stays unsynced and goes out
//!    on the next cycle.
//!
//! A failure for one entity is logged and reported; the rest of the batch
//! carries on.

use std::time::Duration;

use chama_core::types::{ApprovalVote, Collection, Entity, FinancialRecord};
use chama_core::LocalStore;

use crate::document::to_document;
use crate::error::SyncError;
use crate::remote::RemoteStore;

/// An entity that could not be pushed this cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushFailure {
    pub collection: Collection,
    pub key: String,
    pub error: String,
    pub transient: bool,
}

/// Outcome of one push cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PushReport {
    /// Written remotely and marked synced.
    pub pushed: Vec<(Collection, String)>,
    /// Written remotely, but mutated locally meanwhile; still unsynced.
    pub superseded: Vec<(Collection, String)>,
    pub failed: Vec<PushFailure>,
}

impl PushReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }

    fn merge(&mut self, other: PushReport) {
        self.pushed.extend(other.pushed);
        self.superseded.extend(other.superseded);
        self.failed.extend(other.failed);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Acknowledged {
    Synced,
    Superseded,
}

/// Push every unsynced entity in `collections`.
///
/// Only a failure to read the local store aborts the cycle.
pub async fn push_unsynced<S, R>(
    store: &S,
    remote: &R,
    collections: &[Collection],
    timeout: Duration,
) -> Result<PushReport, SyncError>
where
    S: LocalStore,
    R: RemoteStore + ?Sized,
{
    let mut report = PushReport::default();
    for collection in collections {
        let part = match collection {
            Collection::Records(_) => {
                push_collection::<S, R, FinancialRecord>(store, remote, *collection, timeout).await?
            }
            Collection::Votes => {
                push_collection::<S, R, ApprovalVote>(store, remote, *collection, timeout).await?
            }
        };
        report.merge(part);
    }
    if !report.pushed.is_empty() || !report.failed.is_empty() {
        tracing::info!(
            "push cycle: {} pushed, {} superseded, {} failed",
            report.pushed.len(),
            report.superseded.len(),
            report.failed.len()
        );
    }
    Ok(report)
}

async fn push_collection<S, R, E>(
    store: &S,
    remote: &R,
    collection: Collection,
    timeout: Duration,
) -> Result<PushReport, SyncError>
where
    S: LocalStore,
    R: RemoteStore + ?Sized,
    E: Entity,
{
    let mut report = PushReport::default();
    let unsynced: Vec<E> = store.list_unsynced(collection)?;

    for snapshot in unsynced {
        let key = snapshot.key();
        match push_one(store, remote, collection, &snapshot, timeout).await {
            Ok(Acknowledged::Synced) => report.pushed.push((collection, key)),
            Ok(Acknowledged::Superseded) => {
                tracing::debug!("{collection}/{key} changed during push; left unsynced");
                report.superseded.push((collection, key));
            }
            Err(err) => {
                tracing::warn!("push of {collection}/{key} failed: {err}");
                report.failed.push(PushFailure {
                    collection,
                    key,
                    transient: err.is_transient(),
                    error: err.to_string(),
                });
            }
        }
    }
    Ok(report)
}

async fn push_one<S, R, E>(
    store: &S,
    remote: &R,
    collection: Collection,
    snapshot: &E,
    timeout: Duration,
) -> Result<Acknowledged, SyncError>
where
    S: LocalStore,
    R: RemoteStore + ?Sized,
    E: Entity,
{
    let key = snapshot.key();
    let document = to_document(snapshot)?;
    tokio::time::timeout(timeout, remote.set(collection, &key, document))
        .await
        .map_err(|_| SyncError::Timeout(timeout.as_millis() as u64))??;

    let snapshot_at = snapshot.updated_at();
    store.modify::<E, _, SyncError, _>(collection, &key, |current| match current {
        Some(mut current) if current.updated_at() == snapshot_at => {
            if current.sync_flag() {
                return Ok((None, Acknowledged::Synced));
            }
            current.set_sync_flag(true);
            Ok((Some(current), Acknowledged::Synced))
        }
        _ => Ok((None, Acknowledged::Superseded)),
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;

    use chama_core::types::{EntityKind, ProvisionalId, RecordStatus, UserId};
    use chama_core::MemoryStore;

    use super::*;
    use crate::remote::MemoryRemote;

    const LOANS: Collection = Collection::Records(EntityKind::Borrowing);

    fn record(id: &str) -> FinancialRecord {
        let now = Utc::now();
        FinancialRecord {
            provisional_id: ProvisionalId::from(id),
            canonical_id: None,
            kind: EntityKind::Borrowing,
            status: RecordStatus::Pending,
            amount: 5000,
            created_by: UserId::from("alice"),
            notes: None,
            related_to: None,
            sync_flag: false,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn push_marks_synced_and_skips_synced() {
        let store = MemoryStore::new();
        let remote = MemoryRemote::new();
        store.insert(&record("p1")).unwrap();

        let first = push_unsynced(&store, &remote, &[LOANS], Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(first.pushed, vec![(LOANS, "p1".to_string())]);
        let stored: FinancialRecord = store.get(LOANS, "p1").unwrap().unwrap();
        assert!(stored.sync_flag);

        let second = push_unsynced(&store, &remote, &[LOANS], Duration::from_secs(1))
            .await
            .unwrap();
        assert!(second.pushed.is_empty());
        assert_eq!(remote.write_count(), 1);
    }

    #[tokio::test]
    async fn offline_push_leaves_records_unsynced() {
        let store = MemoryStore::new();
        let remote = MemoryRemote::new();
        store.insert(&record("p1")).unwrap();
        remote.set_offline(true);

        let report = push_unsynced(&store, &remote, &[LOANS], Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(report.failed.len(), 1);
        assert!(report.failed[0].transient);
        let stored: FinancialRecord = store.get(LOANS, "p1").unwrap().unwrap();
        assert!(!stored.sync_flag);
    }

    #[tokio::test]
    async fn mutation_during_push_is_superseded() {
        let store = Arc::new(MemoryStore::new());
        let remote = MemoryRemote::new();
        let snapshot = record("p1");
        store.insert(&snapshot).unwrap();

        let mut newer = snapshot.clone();
        newer.amount = 6000;
        newer.mark_mutated();
        store.update(&newer).unwrap();

        let outcome = push_one(&*store, &remote, LOANS, &snapshot, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(outcome, Acknowledged::Superseded);
        let stored: FinancialRecord = store.get(LOANS, "p1").unwrap().unwrap();
        assert!(!stored.sync_flag);
        assert_eq!(stored.amount, 6000);
    }
}
