//! Record creation, canonical-id assignment, and closing.
//!
//! ## Canonical ids
//!
//! `<type code><sequence, zero-padded to 4>`, e.g. `BR0008`. The next id is
//! derived from the last one issued for the kind. Issuance happens only
//! under [`allocator_lock`], from the quorum-satisfaction and release
//! transitions and from [`reassign_duplicate_canonical`]. Before committing,
//! the candidate is checked against every local record of the kind; a
//! collision (typically a record pulled from another device in the meantime)
//! re-reads the last issued id and retries.
//!
//! Two devices that approve different records while offline can still issue
//! the same code. When that surfaces locally, the holder created first keeps
//! the code (ties go to the lower provisional id) and every other holder is
//! moved to a fresh one. All devices order holders the same way, so they
//! move the same records.

use std::sync::{Mutex, MutexGuard};

use chrono::Utc;

use chama_core::types::{
    CanonicalId, Collection, Entity, EntityKind, FinancialRecord, ProvisionalId, RecordDraft,
    RecordStatus,
};
use chama_core::{LocalStore, MembershipProvider};

use crate::error::LedgerError;
use crate::ledger::Ledger;

/// Width of the numeric part of a canonical id.
pub const CANONICAL_WIDTH: usize = 4;

static ALLOCATOR: Mutex<()> = Mutex::new(());

/// Serializes canonical-id issuance within this process.
pub fn allocator_lock() -> MutexGuard<'static, ()> {
    // Guards no data, so a panicked holder leaves nothing inconsistent.
    ALLOCATOR.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// The id that follows `last_issued` for `kind` (first id is `…0001`).
pub fn next_canonical_id(
    kind: EntityKind,
    last_issued: Option<&CanonicalId>,
) -> Result<CanonicalId, LedgerError> {
    let last = match last_issued {
        Some(id) => id
            .sequence()
            .ok_or_else(|| LedgerError::MalformedCanonicalId(id.0.clone()))?,
        None => 0,
    };
    Ok(canonical_for(kind, last + 1))
}

fn canonical_for(kind: EntityKind, sequence: u64) -> CanonicalId {
    CanonicalId(format!(
        "{}{:0width$}",
        kind.type_code(),
        sequence,
        width = CANONICAL_WIDTH
    ))
}

fn highest_sequence(records: &[FinancialRecord]) -> u64 {
    records
        .iter()
        .filter_map(|r| r.canonical_id.as_ref())
        .filter_map(CanonicalId::sequence)
        .max()
        .unwrap_or(0)
}

/// Give every record of `kind` that shares `code` with an earlier-created
/// record a fresh canonical id.
///
/// Returns the records that were moved; empty when `code` has at most one
/// holder. Each move is a local mutation and goes out with the next push.
pub fn reassign_duplicate_canonical<S: LocalStore>(
    store: &S,
    kind: EntityKind,
    code: &CanonicalId,
) -> Result<Vec<FinancialRecord>, LedgerError> {
    let _serial = allocator_lock();
    let collection = Collection::Records(kind);
    let records: Vec<FinancialRecord> = store.list(collection)?;

    let mut holders: Vec<&FinancialRecord> = records
        .iter()
        .filter(|r| r.canonical_id.as_ref() == Some(code))
        .collect();
    if holders.len() < 2 {
        return Ok(Vec::new());
    }
    holders.sort_by(|a, b| {
        (a.created_at, &a.provisional_id).cmp(&(b.created_at, &b.provisional_id))
    });

    let mut last = highest_sequence(&records);
    let mut moved = Vec::new();
    for loser in holders.into_iter().skip(1) {
        last += 1;
        let fresh = canonical_for(kind, last);
        let updated = store.modify::<FinancialRecord, _, LedgerError, _>(
            collection,
            &loser.provisional_id.0,
            |current: Option<FinancialRecord>| {
                let Some(mut next) = current else {
                    return Ok((None, None));
                };
                if next.canonical_id.as_ref() != Some(code) {
                    return Ok((None, None));
                }
                next.canonical_id = Some(fresh.clone());
                next.mark_mutated();
                Ok((Some(next.clone()), Some(next)))
            },
        )?;
        if let Some(record) = updated {
            tracing::warn!(
                id = %record.provisional_id,
                duplicate = %code,
                reassigned = %fresh,
                "duplicate canonical id moved",
            );
            moved.push(record);
        }
    }
    Ok(moved)
}

impl<S: LocalStore, M: MembershipProvider> Ledger<S, M> {
    /// Create a Pending, unsynced record with a fresh provisional id.
    pub fn create(&self, draft: RecordDraft) -> Result<FinancialRecord, LedgerError> {
        if draft.amount <= 0 {
            return Err(LedgerError::InvalidDraft(format!(
                "amount must be positive, got {}",
                draft.amount
            )));
        }
        if self.members.role_of(&draft.created_by)?.is_none() {
            return Err(LedgerError::Unauthorized {
                user: draft.created_by,
                action: "create records",
            });
        }
        match (&draft.related_to, draft.kind.requires_parent()) {
            (Some(parent), true) => {
                let parent_record = self
                    .store
                    .get::<FinancialRecord>(Collection::Records(EntityKind::Borrowing), &parent.0)?;
                if parent_record.is_none() {
                    return Err(LedgerError::InvalidDraft(format!(
                        "{} must reference an existing borrowing; {parent} not found",
                        draft.kind
                    )));
                }
            }
            (None, true) => {
                return Err(LedgerError::InvalidDraft(format!(
                    "{} must reference the borrowing it belongs to",
                    draft.kind
                )));
            }
            (Some(_), false) => {
                return Err(LedgerError::InvalidDraft(format!(
                    "{} records cannot reference another record",
                    draft.kind
                )));
            }
            (None, false) => {}
        }

        let now = Utc::now();
        let record = FinancialRecord {
            provisional_id: ProvisionalId::generate(),
            canonical_id: None,
            kind: draft.kind,
            status: RecordStatus::Pending,
            amount: draft.amount,
            created_by: draft.created_by,
            notes: draft.notes,
            related_to: draft.related_to,
            sync_flag: false,
            created_at: now,
            updated_at: now,
        };
        self.store.insert(&record)?;
        tracing::info!(
            id = %record.provisional_id,
            kind = %record.kind,
            amount = record.amount,
            "record created",
        );
        Ok(record)
    }

    /// Highest canonical id issued so far for `kind`, as seen locally.
    pub fn last_issued(&self, kind: EntityKind) -> Result<Option<CanonicalId>, LedgerError> {
        let records: Vec<FinancialRecord> = self.store.list(Collection::Records(kind))?;
        Ok(records
            .into_iter()
            .filter_map(|r| r.canonical_id)
            .filter_map(|id| id.sequence().map(|seq| (seq, id)))
            .max_by_key(|(seq, _)| *seq)
            .map(|(_, id)| id))
    }

    /// Assign the canonical id that follows `last_issued`.
    ///
    /// Idempotent: a record that already carries a canonical id is returned
    /// unchanged, without a write.
    pub fn assign_canonical_id(
        &self,
        id: &ProvisionalId,
        last_issued: Option<CanonicalId>,
    ) -> Result<FinancialRecord, LedgerError> {
        let record = self.find_record(id)?;
        if record.canonical_id.is_some() {
            return Ok(record);
        }
        self.commit_with_canonical(&record, last_issued, |_| Ok(()))
    }

    /// Apply `transition` to a record and make sure it carries a canonical
    /// id, in one atomic write.
    ///
    /// Holds the allocator lock for the whole attempt loop. On a collision
    /// `last_issued` is re-read from the store. Nothing is written when
    /// `transition` fails or attempts run out.
    pub(crate) fn commit_with_canonical<F>(
        &self,
        record: &FinancialRecord,
        mut last_issued: Option<CanonicalId>,
        transition: F,
    ) -> Result<FinancialRecord, LedgerError>
    where
        F: Fn(&mut FinancialRecord) -> Result<(), LedgerError>,
    {
        let _serial = allocator_lock();
        let kind = record.kind;
        let collection = Collection::Records(kind);

        for attempt in 1..=self.id_allocation_attempts {
            let current = self
                .store
                .get::<FinancialRecord>(collection, &record.provisional_id.0)?
                .ok_or_else(|| LedgerError::NotFound(record.provisional_id.clone()))?;

            let candidate = match &current.canonical_id {
                Some(existing) => existing.clone(),
                None => {
                    let candidate = next_canonical_id(kind, last_issued.as_ref())?;
                    let holder = self
                        .store
                        .find_by_canonical::<FinancialRecord>(collection, &candidate.0)?
                        .filter(|other| other.provisional_id != record.provisional_id);
                    if let Some(holder) = holder {
                        tracing::warn!(
                            candidate = %candidate,
                            held_by = %holder.provisional_id,
                            attempt,
                            "canonical id collision; re-reading last issued id",
                        );
                        last_issued = self.last_issued(kind)?;
                        continue;
                    }
                    candidate
                }
            };

            let committed = self.store.modify::<FinancialRecord, _, LedgerError, _>(
                collection,
                &record.provisional_id.0,
                |current: Option<FinancialRecord>| {
                    let mut next = current
                        .ok_or_else(|| LedgerError::NotFound(record.provisional_id.clone()))?;
                    if next.canonical_id.is_none() {
                        next.canonical_id = Some(candidate.clone());
                    }
                    transition(&mut next)?;
                    next.mark_mutated();
                    Ok((Some(next.clone()), next))
                },
            )?;
            tracing::info!(
                id = %committed.provisional_id,
                canonical = %candidate,
                status = %committed.status,
                "canonical id committed",
            );
            return Ok(committed);
        }

        Err(LedgerError::IdAllocationConflict {
            kind,
            attempts: self.id_allocation_attempts,
        })
    }

    /// Settle an Active record: Active → Closed.
    pub fn close(&self, id: &ProvisionalId) -> Result<FinancialRecord, LedgerError> {
        let record = self.find_record(id)?;
        let closed = self.store.modify::<FinancialRecord, _, LedgerError, _>(
            record.collection(),
            &id.0,
            |current: Option<FinancialRecord>| {
                let mut next = current.ok_or_else(|| LedgerError::NotFound(id.clone()))?;
                if next.status != RecordStatus::Active {
                    return Err(LedgerError::InvalidState(format!(
                        "only active records can be closed; {} is {}",
                        next.display_id(),
                        next.status
                    )));
                }
                next.status = RecordStatus::Closed;
                next.mark_mutated();
                Ok((Some(next.clone()), next))
            },
        )?;
        tracing::info!(id = %closed.provisional_id, "record closed");
        Ok(closed)
    }
}
