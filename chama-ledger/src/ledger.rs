//! The [`Ledger`] handle shared by lifecycle, quorum, and release operations.

use std::sync::Arc;

use chama_core::settings::{RevotePolicy, Settings};
use chama_core::types::{Collection, EntityKind, FinancialRecord, ProvisionalId};
use chama_core::{LocalStore, MembershipProvider};

use crate::error::LedgerError;

/// Approval-gated view over a local store.
///
/// Canonical ids are issued under the process-wide
/// [`allocator_lock`](crate::lifecycle::allocator_lock), shared by every
/// `Ledger` and by the pull-side duplicate repair.
pub struct Ledger<S, M> {
    pub(crate) store: Arc<S>,
    pub(crate) members: Arc<M>,
    pub(crate) revote_policy: RevotePolicy,
    pub(crate) id_allocation_attempts: u32,
}

impl<S: LocalStore, M: MembershipProvider> Ledger<S, M> {
    pub fn new(store: Arc<S>, members: Arc<M>) -> Self {
        Self::with_settings(store, members, &Settings::default())
    }

    pub fn with_settings(store: Arc<S>, members: Arc<M>, settings: &Settings) -> Self {
        Self {
            store,
            members,
            revote_policy: settings.revote_policy,
            id_allocation_attempts: settings.id_allocation_attempts.max(1),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn members(&self) -> &M {
        &self.members
    }

    /// Locate a record by provisional id across every record collection.
    pub fn find_record(&self, id: &ProvisionalId) -> Result<FinancialRecord, LedgerError> {
        for kind in EntityKind::all() {
            if let Some(record) = self
                .store
                .get::<FinancialRecord>(Collection::Records(*kind), &id.0)?
            {
                return Ok(record);
            }
        }
        Err(LedgerError::NotFound(id.clone()))
    }

    /// Every record of one kind, ordered by provisional id.
    pub fn list(&self, kind: EntityKind) -> Result<Vec<FinancialRecord>, LedgerError> {
        Ok(self.store.list(Collection::Records(kind))?)
    }
}
