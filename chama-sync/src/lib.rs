//! # chama-sync
//!
//! Offline-first replication between the local store and a shared remote
//! document store.
//!
//! - [`push`] sends unsynced entities and acknowledges them atomically
//! - [`pull`] applies remote changes through the [`resolver`], then repairs
//!   duplicate canonical ids and runs the optional [`PullHook`]
//! - [`session`] owns the live pull subscriptions
//! - [`pipeline::run`] is the one-shot entrypoint used by the CLI and daemon

pub mod backlog;
pub mod document;
pub mod error;
pub mod pipeline;
pub mod pull;
pub mod push;
pub mod remote;
pub mod resolver;
pub mod session;

pub use document::Document;
pub use error::SyncError;
pub use pipeline::{SyncMode, SyncSummary};
pub use pull::{apply_and_settle, apply_change, NoHook, PullCounters, PullHook, PullOutcome};
pub use push::{push_unsynced, PushReport};
pub use remote::{ChangeEvent, ChangeKind, ChangeStream, DirRemote, MemoryRemote, RemoteStore};
pub use session::SyncSession;
