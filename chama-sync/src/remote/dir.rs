//! Shared-directory [`RemoteStore`].
//!
//! # Layout
//!
//! ```text
//! <root>/
//!   <collection>/
//!     <key>.json
//! ```
//!
//! The root is typically a mount or synced folder shared by every device.
//! Writes go through `<key>.json.tmp` + `rename`, so readers never observe a
//! partial document. A root that does not exist is reported as
//! [`SyncError::TransientIo`]: the mount may simply not be attached yet.

use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use notify::{recommended_watcher, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use chama_core::types::Collection;

use super::{ChangeEvent, ChangeKind, ChangeStream, RemoteStore};
use crate::document::Document;
use crate::error::{io_err, SyncError};

/// `<root>/<collection>/<key>.json` — pure, no I/O.
pub fn document_path(root: &Path, collection: Collection, key: &str) -> PathBuf {
    root.join(collection.name()).join(format!("{key}.json"))
}

#[derive(Debug, Clone)]
pub struct DirRemote {
    root: PathBuf,
}

impl DirRemote {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    async fn collection_dir(&self, collection: Collection) -> Result<PathBuf, SyncError> {
        if !tokio::fs::try_exists(&self.root).await.unwrap_or(false) {
            return Err(SyncError::TransientIo(format!(
                "remote root {} is not reachable",
                self.root.display()
            )));
        }
        let dir = self.root.join(collection.name());
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| io_err(&dir, e))?;
        Ok(dir)
    }
}

#[async_trait]
impl RemoteStore for DirRemote {
    async fn set(
        &self,
        collection: Collection,
        key: &str,
        document: Document,
    ) -> Result<(), SyncError> {
        let dir = self.collection_dir(collection).await?;
        let path = dir.join(format!("{key}.json"));
        let tmp = dir.join(format!("{key}.json.tmp"));

        let json = serde_json::to_vec_pretty(&document)?;
        tokio::fs::write(&tmp, &json)
            .await
            .map_err(|e| io_err(&tmp, e))?;
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(io_err(&path, e));
        }
        tracing::debug!("remote wrote {}", path.display());
        Ok(())
    }

    async fn subscribe(&self, collection: Collection) -> Result<ChangeStream, SyncError> {
        let dir = self.collection_dir(collection).await?;
        // FSEvents reports real paths (e.g. /private/var/... on macOS).
        let dir = tokio::fs::canonicalize(&dir).await.unwrap_or(dir);

        let known: HashSet<String> = read_collection(&dir)
            .await?
            .into_iter()
            .map(|(key, _)| key)
            .collect();

        let (raw_tx, raw_rx) = mpsc::unbounded_channel::<notify::Result<Event>>();
        let mut watcher: RecommendedWatcher = recommended_watcher(move |event| {
            let _ = raw_tx.send(event);
        })?;
        watcher.watch(&dir, RecursiveMode::NonRecursive)?;

        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(translate_events(watcher, dir, known, raw_rx, tx));
        Ok(ChangeStream::new(rx))
    }

    async fn fetch_all(&self, collection: Collection) -> Result<Vec<(String, Document)>, SyncError> {
        let dir = self.collection_dir(collection).await?;
        read_collection(&dir).await
    }
}

/// Turn raw watcher events for one collection directory into change
/// events. Owns the watcher; ends when the subscriber goes away.
async fn translate_events(
    _watcher: RecommendedWatcher,
    dir: PathBuf,
    mut known: HashSet<String>,
    mut raw_rx: mpsc::UnboundedReceiver<notify::Result<Event>>,
    tx: mpsc::UnboundedSender<ChangeEvent>,
) {
    loop {
        tokio::select! {
            _ = tx.closed() => break,
            event = raw_rx.recv() => {
                let Some(event) = event else { break };
                let event = match event {
                    Ok(event) => event,
                    Err(err) => {
                        tracing::warn!("remote watcher error: {err}");
                        continue;
                    }
                };
                if !is_relevant_event_kind(&event.kind) {
                    continue;
                }
                for path in event.paths {
                    let Some(key) = document_key(&path, &dir) else { continue };
                    let change = match read_document(&path).await {
                        Ok(Some(document)) => {
                            let kind = if known.insert(key.clone()) {
                                ChangeKind::Added
                            } else {
                                ChangeKind::Modified
                            };
                            ChangeEvent { kind, key, document }
                        }
                        Ok(None) => {
                            if !known.remove(&key) {
                                continue;
                            }
                            ChangeEvent {
                                kind: ChangeKind::Removed,
                                key,
                                document: Document::new(),
                            }
                        }
                        Err(err) => {
                            tracing::warn!("skipping unreadable remote document: {err}");
                            continue;
                        }
                    };
                    if tx.send(change).is_err() {
                        return;
                    }
                }
            }
        }
    }
}

fn is_relevant_event_kind(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    )
}

/// Key of a `<dir>/<key>.json` path; `None` for temp files and strays.
fn document_key(path: &Path, dir: &Path) -> Option<String> {
    if path.parent() != Some(dir) {
        return None;
    }
    let name = path.file_name()?.to_str()?;
    name.strip_suffix(".json").map(str::to_string)
}

async fn read_document(path: &Path) -> Result<Option<Document>, SyncError> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(io_err(path, err)),
    }
}

async fn read_collection(dir: &Path) -> Result<Vec<(String, Document)>, SyncError> {
    let mut entries = tokio::fs::read_dir(dir).await.map_err(|e| io_err(dir, e))?;
    let mut keys = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(|e| io_err(dir, e))? {
        let path = entry.path();
        if let Some(key) = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(|n| n.strip_suffix(".json"))
        {
            keys.push(key.to_string());
        }
    }
    keys.sort();

    let mut documents = Vec::with_capacity(keys.len());
    for key in keys {
        let path = dir.join(format!("{key}.json"));
        if let Some(document) = read_document(&path).await? {
            documents.push((key, document));
        }
    }
    Ok(documents)
}
