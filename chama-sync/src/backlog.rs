//! Push backlog: what is still waiting to leave this device.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use chama_core::types::{ApprovalVote, Collection, Entity, FinancialRecord};
use chama_core::LocalStore;

use crate::error::SyncError;

/// Unsynced entities of one collection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CollectionBacklog {
    pub total: usize,
    pub unsynced: usize,
    pub oldest_unsynced: Option<DateTime<Utc>>,
}

/// Backlog of every collection, keyed by collection name.
pub type Backlog = BTreeMap<String, CollectionBacklog>;

pub fn scan<S: LocalStore>(store: &S) -> Result<Backlog, SyncError> {
    let mut backlog = Backlog::new();
    for collection in Collection::all() {
        let entry = match collection {
            Collection::Records(_) => scan_collection::<S, FinancialRecord>(store, collection)?,
            Collection::Votes => scan_collection::<S, ApprovalVote>(store, collection)?,
        };
        backlog.insert(collection.name().to_string(), entry);
    }
    Ok(backlog)
}

/// Sum of unsynced entities across collections.
pub fn pending_total(backlog: &Backlog) -> usize {
    backlog.values().map(|c| c.unsynced).sum()
}

fn scan_collection<S: LocalStore, E: Entity>(
    store: &S,
    collection: Collection,
) -> Result<CollectionBacklog, SyncError> {
    let all: Vec<E> = store.list(collection)?;
    let unsynced: Vec<&E> = all.iter().filter(|e| !e.sync_flag()).collect();
    Ok(CollectionBacklog {
        total: all.len(),
        unsynced: unsynced.len(),
        oldest_unsynced: unsynced.iter().map(|e| e.updated_at()).min(),
    })
}

/// Compact age such as `42s`, `5m`, `3h`, `2d`.
pub fn format_datetime_age(timestamp: DateTime<Utc>) -> String {
    let age = Utc::now().signed_duration_since(timestamp).num_seconds().max(0) as u64;
    format_seconds(age)
}

pub fn format_seconds(seconds: u64) -> String {
    if seconds < 60 {
        return format!("{seconds}s");
    }
    if seconds < 60 * 60 {
        return format!("{}m", seconds / 60);
    }
    if seconds < 60 * 60 * 24 {
        return format!("{}h", seconds / (60 * 60));
    }
    format!("{}d", seconds / (60 * 60 * 24))
}
