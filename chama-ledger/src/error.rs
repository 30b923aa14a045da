//! Error types for chama-ledger.

use thiserror::Error;

use chama_core::types::{EntityKind, ProvisionalId, UserId};
use chama_core::StoreError;

/// Errors from lifecycle, voting, and release operations.
///
/// Every variant is returned before any write happens, except where noted on
/// the operation itself.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// An error from the local store.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// No record with this provisional id exists locally.
    #[error("record {0} not found")]
    NotFound(ProvisionalId),

    /// The draft failed validation.
    #[error("invalid draft: {0}")]
    InvalidDraft(String),

    /// The requested transition is not allowed from the record's state.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// The caller lacks the role the action requires.
    #[error("{user} is not authorized to {action}")]
    Unauthorized { user: UserId, action: &'static str },

    /// A second vote under the `first_final` revote policy.
    #[error("{voter} has already voted on {entity}")]
    DuplicateVote { entity: ProvisionalId, voter: UserId },

    /// The canonical-id allocator kept colliding.
    #[error("could not allocate a unique {kind} id after {attempts} attempts")]
    IdAllocationConflict { kind: EntityKind, attempts: u32 },

    /// A stored canonical id has no numeric suffix.
    #[error("malformed canonical id '{0}'")]
    MalformedCanonicalId(String),
}
