//! In-process [`RemoteStore`].

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::mpsc;

use chama_core::types::Collection;

use super::{ChangeEvent, ChangeKind, ChangeStream, RemoteStore};
use crate::document::Document;
use crate::error::SyncError;

#[derive(Debug, Default)]
struct Inner {
    offline: bool,
    documents: BTreeMap<Collection, BTreeMap<String, Document>>,
    subscribers: BTreeMap<Collection, Vec<mpsc::UnboundedSender<ChangeEvent>>>,
    writes: u64,
}

impl Inner {
    fn ensure_online(&self) -> Result<(), SyncError> {
        if self.offline {
            return Err(SyncError::TransientIo("remote is offline".to_string()));
        }
        Ok(())
    }

    fn notify(&mut self, collection: Collection, event: ChangeEvent) {
        if let Some(subscribers) = self.subscribers.get_mut(&collection) {
            subscribers.retain(|tx| tx.send(event.clone()).is_ok());
        }
    }
}

/// Documents held in memory, with subscriptions fanned out over channels.
///
/// Every successful `set` notifies every subscriber of the collection,
/// including the device that wrote it.
#[derive(Debug, Default)]
pub struct MemoryRemote {
    inner: Mutex<Inner>,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    fn guard(&self) -> Result<MutexGuard<'_, Inner>, SyncError> {
        self.inner
            .lock()
            .map_err(|_| SyncError::TransientIo("remote state poisoned".to_string()))
    }

    /// Simulate losing (or regaining) connectivity.
    pub fn set_offline(&self, offline: bool) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.offline = offline;
        }
    }

    pub fn get(&self, collection: Collection, key: &str) -> Option<Document> {
        let inner = self.inner.lock().ok()?;
        inner.documents.get(&collection)?.get(key).cloned()
    }

    /// Number of successful `set` calls so far.
    pub fn write_count(&self) -> u64 {
        self.inner.lock().map(|inner| inner.writes).unwrap_or(0)
    }

    /// Delete a document and notify subscribers with [`ChangeKind::Removed`].
    pub fn remove(&self, collection: Collection, key: &str) -> Result<bool, SyncError> {
        let mut inner = self.guard()?;
        inner.ensure_online()?;
        let removed = inner
            .documents
            .get_mut(&collection)
            .and_then(|docs| docs.remove(key))
            .is_some();
        if removed {
            inner.notify(
                collection,
                ChangeEvent {
                    kind: ChangeKind::Removed,
                    key: key.to_string(),
                    document: Document::new(),
                },
            );
        }
        Ok(removed)
    }
}

#[async_trait]
impl RemoteStore for MemoryRemote {
    async fn set(
        &self,
        collection: Collection,
        key: &str,
        document: Document,
    ) -> Result<(), SyncError> {
        let mut inner = self.guard()?;
        inner.ensure_online()?;
        let previous = inner
            .documents
            .entry(collection)
            .or_default()
            .insert(key.to_string(), document.clone());
        inner.writes += 1;
        let kind = if previous.is_some() {
            ChangeKind::Modified
        } else {
            ChangeKind::Added
        };
        inner.notify(
            collection,
            ChangeEvent {
                kind,
                key: key.to_string(),
                document,
            },
        );
        Ok(())
    }

    async fn subscribe(&self, collection: Collection) -> Result<ChangeStream, SyncError> {
        let mut inner = self.guard()?;
        inner.ensure_online()?;
        let (tx, rx) = mpsc::unbounded_channel();
        inner.subscribers.entry(collection).or_default().push(tx);
        Ok(ChangeStream::new(rx))
    }

    async fn fetch_all(&self, collection: Collection) -> Result<Vec<(String, Document)>, SyncError> {
        let inner = self.guard()?;
        inner.ensure_online()?;
        Ok(inner
            .documents
            .get(&collection)
            .map(|docs| {
                docs.iter()
                    .map(|(key, doc)| (key.clone(), doc.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }
}
