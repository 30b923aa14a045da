//! Chama core library: domain types and the local store.
//!
//! - [`types`] — newtypes, records, votes, and the [`Entity`] sync contract
//! - [`error`] — [`StoreError`]
//! - [`store`] — [`LocalStore`] contract and the YAML [`FileStore`]
//! - [`memory`] — [`MemoryStore`]
//! - [`roster`] — [`MembershipProvider`] and the YAML member roster
//! - [`settings`] — device settings

pub mod error;
pub mod memory;
pub mod roster;
pub mod settings;
pub mod store;
pub mod types;

pub use error::StoreError;
pub use memory::MemoryStore;
pub use roster::{MemberRoster, MembershipProvider, RosterFile};
pub use settings::{RevotePolicy, Settings};
pub use store::{FileStore, LocalStore};
pub use types::{
    ApprovalVote, CanonicalId, Collection, Entity, EntityKind, FinancialRecord, ProvisionalId,
    RecordDraft, RecordStatus, Role, UserId, VoteAction,
};
