//! Remote document store contract and its implementations.
//!
//! - [`DirRemote`] — shared directory of JSON documents, watched with `notify`
//! - [`MemoryRemote`] — in-process store with an offline switch

use async_trait::async_trait;
use tokio::sync::mpsc;

use chama_core::types::Collection;

use crate::document::Document;
use crate::error::SyncError;

pub mod dir;
pub mod memory;

pub use dir::DirRemote;
pub use memory::MemoryRemote;

/// What happened to a remote document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Added,
    Modified,
    Removed,
}

/// One notification from a collection subscription.
///
/// `document` is empty for [`ChangeKind::Removed`].
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub key: String,
    pub document: Document,
}

/// Receiving side of a subscription. Dropping it ends the subscription.
#[derive(Debug)]
pub struct ChangeStream {
    rx: mpsc::UnboundedReceiver<ChangeEvent>,
}

impl ChangeStream {
    pub fn new(rx: mpsc::UnboundedReceiver<ChangeEvent>) -> Self {
        Self { rx }
    }

    /// Next change, or `None` once the remote closed the subscription.
    pub async fn next(&mut self) -> Option<ChangeEvent> {
        self.rx.recv().await
    }
}

/// Collection-keyed document store shared by every device.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Full-document replace of `collection/key`.
    async fn set(
        &self,
        collection: Collection,
        key: &str,
        document: Document,
    ) -> Result<(), SyncError>;

    /// Stream of changes to `collection` from now on.
    async fn subscribe(&self, collection: Collection) -> Result<ChangeStream, SyncError>;

    /// Every document currently in `collection`, ordered by key.
    async fn fetch_all(&self, collection: Collection) -> Result<Vec<(String, Document)>, SyncError>;
}
