//! Approval-gated record lifecycle.
//!
//! - [`lifecycle`] — creation, canonical-id allocation, closing
//! - [`quorum`] — votes and the ⌈2n/3⌉ approval threshold
//! - [`release`] — treasurer-only release of approved funds

pub mod error;
pub mod ledger;
pub mod lifecycle;
pub mod quorum;
pub mod release;

pub use error::LedgerError;
pub use ledger::Ledger;
pub use lifecycle::{allocator_lock, next_canonical_id, reassign_duplicate_canonical};
pub use quorum::{quorum_threshold, Tally, VoteOutcome};
