//! Treasurer-only release of approved funds.

use chama_core::types::{
    Collection, EntityKind, FinancialRecord, ProvisionalId, RecordStatus, UserId,
};
use chama_core::{LocalStore, MembershipProvider};

use crate::error::LedgerError;
use crate::ledger::Ledger;

fn ensure_releasable(record: &FinancialRecord) -> Result<(), LedgerError> {
    if record.status.is_released() {
        return Err(LedgerError::InvalidState(format!(
            "{} has already been released",
            record.display_id()
        )));
    }
    if record.status == RecordStatus::Rejected {
        return Err(LedgerError::InvalidState(format!(
            "{} was rejected",
            record.display_id()
        )));
    }
    Ok(())
}

impl<S: LocalStore, M: MembershipProvider> Ledger<S, M> {
    /// Move an approved record to Active.
    ///
    /// Checks, in order: the caller is the treasurer, the record is not
    /// already released or rejected, quorum holds right now. Status, a
    /// missing canonical id, and the sync metadata are written together.
    pub fn release_funds(
        &self,
        entity_id: &ProvisionalId,
        caller: &UserId,
    ) -> Result<FinancialRecord, LedgerError> {
        let authorized = self
            .members
            .role_of(caller)?
            .is_some_and(|role| role.can_release_funds());
        if !authorized {
            tracing::warn!(caller = %caller, entity = %entity_id, "release refused");
            return Err(LedgerError::Unauthorized {
                user: caller.clone(),
                action: "release funds",
            });
        }

        let record = self.find_record(entity_id)?;
        ensure_releasable(&record)?;
        let tally = self.tally(entity_id)?;
        if !tally.met {
            return Err(LedgerError::InvalidState(format!(
                "quorum not met for {}: {}/{} approvals",
                record.display_id(),
                tally.approves,
                tally.threshold
            )));
        }

        let last_issued = match record.canonical_id {
            Some(_) => None,
            None => self.last_issued(record.kind)?,
        };
        let released = self.commit_with_canonical(&record, last_issued, |next| {
            ensure_releasable(next)?;
            next.status = RecordStatus::Active;
            Ok(())
        })?;
        tracing::info!(
            id = %released.provisional_id,
            canonical = %released.display_id(),
            by = %caller,
            amount = released.amount,
            "funds released",
        );

        // The release is committed; closing the borrowing is a follow-up
        // that the next release against it retries.
        if released.kind == EntityKind::Repayment {
            if let Some(borrowing) = &released.related_to {
                if let Err(err) = self.close_if_settled(borrowing) {
                    tracing::warn!(
                        repayment = %released.display_id(),
                        borrowing = %borrowing,
                        error = %err,
                        "could not close settled borrowing",
                    );
                }
            }
        }
        Ok(released)
    }

    /// Close an Active borrowing once its released repayments cover it.
    ///
    /// Returns the closed borrowing, or `None` when nothing changed.
    pub fn close_if_settled(
        &self,
        borrowing: &ProvisionalId,
    ) -> Result<Option<FinancialRecord>, LedgerError> {
        let Some(loan) = self
            .store
            .get::<FinancialRecord>(Collection::Records(EntityKind::Borrowing), &borrowing.0)?
        else {
            return Ok(None);
        };
        if loan.status != RecordStatus::Active {
            return Ok(None);
        }

        let repaid: i64 = self
            .list(EntityKind::Repayment)?
            .iter()
            .filter(|r| r.related_to.as_ref() == Some(borrowing) && r.status.is_released())
            .map(|r| r.amount)
            .sum();
        if repaid < loan.amount {
            tracing::debug!(
                borrowing = %loan.display_id(),
                repaid,
                owed = loan.amount,
                "borrowing not yet settled",
            );
            return Ok(None);
        }
        self.close(borrowing).map(Some)
    }
}
