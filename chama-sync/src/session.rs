//! Sync session: owns every pull subscription of one device.
//!
//! `start` subscribes to each collection, runs the initial pull, then spawns
//! one task per collection. `teardown` cancels them as a group through a
//! broadcast channel and waits for each to finish. Notifications that race
//! the teardown may be dropped; the next session's initial pull picks them
//! up.

use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use chama_core::types::Collection;
use chama_core::LocalStore;

use crate::error::SyncError;
use crate::pull::{apply_and_settle, pull_all, NoHook, PullCounters, PullHook, PullStats};
use crate::remote::{ChangeStream, RemoteStore};

pub struct SyncSession {
    shutdown: broadcast::Sender<()>,
    tasks: Vec<(Collection, JoinHandle<()>)>,
    stats: Arc<PullStats>,
}

impl SyncSession {
    /// [`SyncSession::start_with`] and no ledger hook.
    pub async fn start<S, R>(
        store: Arc<S>,
        remote: Arc<R>,
        collections: &[Collection],
    ) -> Result<Self, SyncError>
    where
        S: LocalStore + 'static,
        R: RemoteStore + ?Sized + 'static,
    {
        Self::start_with(store, remote, Arc::new(NoHook), collections).await
    }

    /// Subscribe to `collections` and begin applying changes, with `hook`
    /// run after each landed change.
    ///
    /// Subscriptions are opened before the initial pull so nothing written in
    /// between is missed; replaying a change twice is harmless.
    pub async fn start_with<S, R>(
        store: Arc<S>,
        remote: Arc<R>,
        hook: Arc<dyn PullHook>,
        collections: &[Collection],
    ) -> Result<Self, SyncError>
    where
        S: LocalStore + 'static,
        R: RemoteStore + ?Sized + 'static,
    {
        let mut streams = Vec::with_capacity(collections.len());
        for collection in collections {
            streams.push((*collection, remote.subscribe(*collection).await?));
        }

        let stats = Arc::new(PullStats::default());
        for collection in collections {
            pull_all(&*store, &*remote, &*hook, *collection, &stats).await?;
        }

        let (shutdown, _) = broadcast::channel::<()>(4);
        let tasks = streams
            .into_iter()
            .map(|(collection, stream)| {
                let handle = tokio::spawn(pull_task(
                    Arc::clone(&store),
                    Arc::clone(&hook),
                    collection,
                    stream,
                    Arc::clone(&stats),
                    shutdown.subscribe(),
                ));
                (collection, handle)
            })
            .collect();

        tracing::info!("sync session started for {} collection(s)", collections.len());
        Ok(Self {
            shutdown,
            tasks,
            stats,
        })
    }

    pub fn stats(&self) -> PullCounters {
        self.stats.snapshot()
    }

    /// Collections with a live pull task.
    pub fn collections(&self) -> Vec<Collection> {
        self.tasks
            .iter()
            .filter(|(_, handle)| !handle.is_finished())
            .map(|(collection, _)| *collection)
            .collect()
    }

    /// Cancel every pull task and wait for them to exit.
    pub async fn teardown(self) {
        let _ = self.shutdown.send(());
        for (collection, handle) in self.tasks {
            if let Err(err) = handle.await {
                tracing::error!("pull task for {collection} failed: {err}");
            }
        }
        tracing::info!("sync session stopped");
    }
}

async fn pull_task<S: LocalStore>(
    store: Arc<S>,
    hook: Arc<dyn PullHook>,
    collection: Collection,
    mut stream: ChangeStream,
    stats: Arc<PullStats>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            event = stream.next() => {
                let Some(event) = event else {
                    tracing::warn!("remote closed the {collection} subscription");
                    break;
                };
                let outcome = apply_and_settle(&*store, &*hook, collection, &event, &stats);
                match &outcome {
                    Ok(applied) => {
                        tracing::debug!("{collection}/{}: {applied:?}", event.key);
                    }
                    Err(err) => {
                        tracing::warn!("applying {collection}/{} failed: {err}", event.key);
                    }
                }
            }
        }
    }
}
