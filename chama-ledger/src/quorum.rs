//! Votes, quorum arithmetic, and the vote-driven status transitions.
//!
//! The active member count is read from the membership provider on every
//! evaluation. Votes from users who are no longer active members are kept on
//! disk but do not count.

use chrono::Utc;
use serde::Serialize;

use chama_core::settings::RevotePolicy;
use chama_core::types::{
    next_timestamp, ApprovalVote, Collection, FinancialRecord, ProvisionalId, RecordStatus,
    UserId, VoteAction,
};
use chama_core::{Entity, LocalStore, MemberRoster, MembershipProvider};

use crate::error::LedgerError;
use crate::ledger::Ledger;

/// Approvals needed out of `active_members`: ⌈2n/3⌉, never below one.
pub fn quorum_threshold(active_members: usize) -> usize {
    ((active_members * 2 + 2) / 3).max(1)
}

/// Snapshot of the votes on one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Tally {
    pub approves: usize,
    pub rejects: usize,
    pub threshold: usize,
    pub active_members: usize,
    pub met: bool,
}

impl Tally {
    /// Enough rejections that the threshold can no longer be reached.
    pub fn approval_impossible(&self) -> bool {
        self.rejects > self.active_members.saturating_sub(self.threshold)
    }
}

/// Result of [`Ledger::record_vote`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoteOutcome {
    pub vote: ApprovalVote,
    /// An earlier vote by the same member was overwritten.
    pub replaced: bool,
    /// Record status after the quorum transition (if any) ran.
    pub status: RecordStatus,
}

impl<S: LocalStore, M: MembershipProvider> Ledger<S, M> {
    /// Live votes on `entity_id` cast by members active in `roster`.
    fn counted_votes(
        &self,
        entity_id: &ProvisionalId,
        roster: &MemberRoster,
    ) -> Result<Vec<ApprovalVote>, LedgerError> {
        let votes: Vec<ApprovalVote> = self.store.list(Collection::Votes)?;
        let mut counted = Vec::new();
        for vote in votes.into_iter().filter(|v| &v.entity_id == entity_id) {
            if roster.role_of(&vote.voter_id)?.is_some() {
                counted.push(vote);
            }
        }
        Ok(counted)
    }

    pub fn approve_count(&self, entity_id: &ProvisionalId) -> Result<usize, LedgerError> {
        Ok(self.tally(entity_id)?.approves)
    }

    /// Count votes against one read of the roster.
    pub fn tally(&self, entity_id: &ProvisionalId) -> Result<Tally, LedgerError> {
        let roster = self.members.snapshot()?;
        let votes = self.counted_votes(entity_id, &roster)?;
        let approves = votes
            .iter()
            .filter(|v| v.action == VoteAction::Approve)
            .count();
        let active_members = roster.active_member_count()?;
        let threshold = quorum_threshold(active_members);
        Ok(Tally {
            approves,
            rejects: votes.len() - approves,
            threshold,
            active_members,
            met: approves >= threshold,
        })
    }

    pub fn is_quorum_met(&self, entity_id: &ProvisionalId) -> Result<bool, LedgerError> {
        Ok(self.tally(entity_id)?.met)
    }

    /// Record `voter`'s ballot on `entity_id`, then run the quorum
    /// transition.
    ///
    /// The vote is durable once this returns past the write; a failure in the
    /// transition afterwards is returned as an error but the vote stands.
    pub fn record_vote(
        &self,
        entity_id: &ProvisionalId,
        voter: &UserId,
        action: VoteAction,
    ) -> Result<VoteOutcome, LedgerError> {
        let record = self.find_record(entity_id)?;
        if !record.status.accepts_votes() {
            return Err(LedgerError::InvalidState(format!(
                "{} is {} and no longer accepts votes",
                record.display_id(),
                record.status
            )));
        }
        let voter_role = self
            .members
            .role_of(voter)?
            .ok_or_else(|| LedgerError::Unauthorized {
                user: voter.clone(),
                action: "vote",
            })?;

        let policy = self.revote_policy;
        let key = ApprovalVote::key_for(entity_id, voter);
        let (vote, replaced) = self.store.modify::<ApprovalVote, _, LedgerError, _>(
            Collection::Votes,
            &key,
            |existing| {
                if existing.is_some() && policy == RevotePolicy::FirstFinal {
                    return Err(LedgerError::DuplicateVote {
                        entity: entity_id.clone(),
                        voter: voter.clone(),
                    });
                }
                let now = Utc::now();
                let updated_at = match &existing {
                    Some(previous) => next_timestamp(previous.updated_at),
                    None => now,
                };
                let vote = ApprovalVote {
                    entity_id: entity_id.clone(),
                    voter_id: voter.clone(),
                    voter_role,
                    action,
                    timestamp: now,
                    sync_flag: false,
                    updated_at,
                };
                Ok((Some(vote.clone()), (vote, existing.is_some())))
            },
        )?;
        if replaced {
            tracing::debug!(entity = %entity_id, voter = %voter, "vote replaced");
        }
        tracing::info!(entity = %entity_id, voter = %voter, action = %action, "vote recorded");

        let status = self.apply_quorum_transition(&record)?;
        Ok(VoteOutcome {
            vote,
            replaced,
            status,
        })
    }

    /// Re-run the vote-driven transition for a record whose votes changed
    /// without passing through [`Ledger::record_vote`], such as votes pulled
    /// from another device.
    ///
    /// Returns the new status when the record left Pending. Unknown records
    /// are skipped: their votes may arrive before the record itself.
    pub fn reevaluate(
        &self,
        entity_id: &ProvisionalId,
    ) -> Result<Option<RecordStatus>, LedgerError> {
        let record = match self.find_record(entity_id) {
            Ok(record) => record,
            Err(LedgerError::NotFound(_)) => return Ok(None),
            Err(err) => return Err(err),
        };
        if record.status != RecordStatus::Pending {
            return Ok(None);
        }
        let status = self.apply_quorum_transition(&record)?;
        Ok((status != RecordStatus::Pending).then_some(status))
    }

    /// Pending → Approved (with a canonical id) when quorum holds;
    /// Pending → Rejected when approval became impossible.
    fn apply_quorum_transition(
        &self,
        record: &FinancialRecord,
    ) -> Result<RecordStatus, LedgerError> {
        let current = self.find_record(&record.provisional_id)?;
        if current.status != RecordStatus::Pending {
            return Ok(current.status);
        }
        let tally = self.tally(&record.provisional_id)?;

        if tally.met {
            let last_issued = match current.canonical_id {
                Some(_) => None,
                None => self.last_issued(current.kind)?,
            };
            let approved = self.commit_with_canonical(&current, last_issued, |next| {
                if next.status == RecordStatus::Pending {
                    next.status = RecordStatus::Approved;
                }
                Ok(())
            })?;
            tracing::info!(
                id = %approved.provisional_id,
                canonical = %approved.display_id(),
                approves = tally.approves,
                threshold = tally.threshold,
                "quorum met",
            );
            return Ok(approved.status);
        }

        if tally.approval_impossible() {
            let rejected = self.store.modify::<FinancialRecord, _, LedgerError, _>(
                current.collection(),
                &current.key(),
                |stored| {
                    let mut next = stored
                        .ok_or_else(|| LedgerError::NotFound(current.provisional_id.clone()))?;
                    if next.status != RecordStatus::Pending {
                        let status = next.status;
                        return Ok((None, status));
                    }
                    next.status = RecordStatus::Rejected;
                    next.mark_mutated();
                    Ok((Some(next), RecordStatus::Rejected))
                },
            )?;
            tracing::info!(
                id = %current.provisional_id,
                rejects = tally.rejects,
                active = tally.active_members,
                "approval no longer reachable",
            );
            return Ok(rejected);
        }

        Ok(RecordStatus::Pending)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chama_core::types::{EntityKind, RecordDraft, Role};
    use chama_core::{MemberRoster, MemoryStore, Settings};
    use rstest::rstest;

    use super::*;

    fn roster(n: usize) -> MemberRoster {
        let mut roster = MemberRoster::default();
        for i in 0..n {
            roster.upsert(UserId::from(format!("m{i}")), Role::Member, true);
        }
        roster
    }

    fn ledger_with(
        members: usize,
        policy: RevotePolicy,
    ) -> (Ledger<MemoryStore, MemberRoster>, FinancialRecord) {
        let settings = Settings {
            revote_policy: policy,
            ..Settings::default()
        };
        let ledger = Ledger::with_settings(
            Arc::new(MemoryStore::new()),
            Arc::new(roster(members)),
            &settings,
        );
        let record = ledger
            .create(RecordDraft {
                kind: EntityKind::Borrowing,
                amount: 5000,
                created_by: UserId::from("m0"),
                notes: None,
                related_to: None,
            })
            .unwrap();
        (ledger, record)
    }

    fn vote(
        ledger: &Ledger<MemoryStore, MemberRoster>,
        record: &FinancialRecord,
        voter: usize,
        action: VoteAction,
    ) -> VoteOutcome {
        ledger
            .record_vote(&record.provisional_id, &UserId::from(format!("m{voter}")), action)
            .unwrap()
    }

    #[rstest]
    #[case(0, 1)]
    #[case(1, 1)]
    #[case(2, 2)]
    #[case(3, 2)]
    #[case(4, 3)]
    #[case(9, 6)]
    #[case(10, 7)]
    #[case(12, 8)]
    fn threshold_is_two_thirds_rounded_up(#[case] members: usize, #[case] expected: usize) {
        assert_eq!(quorum_threshold(members), expected);
    }

    #[test]
    fn six_of_ten_is_not_enough_seven_is() {
        let (ledger, record) = ledger_with(10, RevotePolicy::Overwrite);
        for i in 0..6 {
            let outcome = vote(&ledger, &record, i, VoteAction::Approve);
            assert_eq!(outcome.status, RecordStatus::Pending);
        }
        assert!(!ledger.is_quorum_met(&record.provisional_id).unwrap());

        let outcome = vote(&ledger, &record, 6, VoteAction::Approve);
        assert_eq!(outcome.status, RecordStatus::Approved);
        assert!(ledger.is_quorum_met(&record.provisional_id).unwrap());

        let approved = ledger.find_record(&record.provisional_id).unwrap();
        assert_eq!(approved.canonical_id.unwrap().0, "BR0001");
        assert!(!approved.sync_flag);
    }

    #[test]
    fn revote_overwrites_by_default() {
        let (ledger, record) = ledger_with(10, RevotePolicy::Overwrite);
        let first = vote(&ledger, &record, 1, VoteAction::Approve);
        assert!(!first.replaced);
        let second = vote(&ledger, &record, 1, VoteAction::Reject);
        assert!(second.replaced);
        assert!(second.vote.updated_at > first.vote.updated_at);

        let tally = ledger.tally(&record.provisional_id).unwrap();
        assert_eq!((tally.approves, tally.rejects), (0, 1));
    }

    #[test]
    fn first_final_rejects_second_vote() {
        let (ledger, record) = ledger_with(10, RevotePolicy::FirstFinal);
        vote(&ledger, &record, 1, VoteAction::Approve);
        let err = ledger
            .record_vote(&record.provisional_id, &UserId::from("m1"), VoteAction::Reject)
            .unwrap_err();
        assert!(matches!(err, LedgerError::DuplicateVote { .. }));
        assert_eq!(ledger.approve_count(&record.provisional_id).unwrap(), 1);
    }

    #[test]
    fn non_member_cannot_vote() {
        let (ledger, record) = ledger_with(3, RevotePolicy::Overwrite);
        let err = ledger
            .record_vote(&record.provisional_id, &UserId::from("outsider"), VoteAction::Approve)
            .unwrap_err();
        assert!(matches!(err, LedgerError::Unauthorized { .. }));
    }

    #[test]
    fn enough_rejections_reject_the_record() {
        // 10 members, threshold 7: four rejections leave at most six approvals.
        let (ledger, record) = ledger_with(10, RevotePolicy::Overwrite);
        for i in 0..3 {
            assert_eq!(vote(&ledger, &record, i, VoteAction::Reject).status, RecordStatus::Pending);
        }
        let outcome = vote(&ledger, &record, 3, VoteAction::Reject);
        assert_eq!(outcome.status, RecordStatus::Rejected);

        let err = ledger
            .record_vote(&record.provisional_id, &UserId::from("m4"), VoteAction::Approve)
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidState(_)));
    }

    #[test]
    fn inactive_voters_do_not_count() {
        let (ledger, record) = ledger_with(3, RevotePolicy::Overwrite);
        vote(&ledger, &record, 0, VoteAction::Approve);

        let mut shrunk = roster(3);
        shrunk.upsert(UserId::from("m0"), Role::Member, false);
        let ledger = Ledger::new(Arc::clone(&ledger.store), Arc::new(shrunk));
        assert_eq!(ledger.approve_count(&record.provisional_id).unwrap(), 0);
        assert_eq!(ledger.tally(&record.provisional_id).unwrap().active_members, 2);
    }

    /// Counts roster reads; every other call goes to the inner roster.
    struct CountingRoster {
        inner: MemberRoster,
        reads: std::sync::atomic::AtomicUsize,
    }

    impl CountingRoster {
        fn reads(&self) -> usize {
            self.reads.load(std::sync::atomic::Ordering::SeqCst)
        }

        fn read(&self) {
            self.reads.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        }
    }

    impl MembershipProvider for CountingRoster {
        fn active_member_count(&self) -> Result<usize, chama_core::StoreError> {
            self.read();
            self.inner.active_member_count()
        }

        fn role_of(&self, user: &UserId) -> Result<Option<Role>, chama_core::StoreError> {
            self.read();
            self.inner.role_of(user)
        }

        fn snapshot(&self) -> Result<MemberRoster, chama_core::StoreError> {
            self.read();
            Ok(self.inner.clone())
        }
    }

    #[test]
    fn tally_reads_the_roster_once() {
        let store = Arc::new(MemoryStore::new());
        let (setup, record) = ledger_with(9, RevotePolicy::Overwrite);
        for i in 0..5 {
            vote(&setup, &record, i, VoteAction::Approve);
        }
        let votes: Vec<ApprovalVote> = setup.store.list(Collection::Votes).unwrap();
        for v in &votes {
            store.insert(v).unwrap();
        }
        store.insert(&setup.find_record(&record.provisional_id).unwrap()).unwrap();

        let counting = Arc::new(CountingRoster {
            inner: roster(9),
            reads: Default::default(),
        });
        let ledger = Ledger::new(store, Arc::clone(&counting));
        let tally = ledger.tally(&record.provisional_id).unwrap();
        assert_eq!(tally.approves, 5);
        assert_eq!(counting.reads(), 1);
    }

    /// Writes votes the way a pull does: straight into the store.
    fn land_votes(
        ledger: &Ledger<MemoryStore, MemberRoster>,
        record: &FinancialRecord,
        voters: std::ops::Range<usize>,
        action: VoteAction,
    ) {
        for i in voters {
            let now = chrono::Utc::now();
            ledger
                .store
                .insert(&ApprovalVote {
                    entity_id: record.provisional_id.clone(),
                    voter_id: UserId::from(format!("m{i}")),
                    voter_role: Role::Member,
                    action,
                    timestamp: now,
                    sync_flag: true,
                    updated_at: now,
                })
                .unwrap();
        }
    }

    #[test]
    fn reevaluate_approves_once_landed_votes_reach_quorum() {
        let (ledger, record) = ledger_with(3, RevotePolicy::Overwrite);
        land_votes(&ledger, &record, 0..1, VoteAction::Approve);
        assert_eq!(ledger.reevaluate(&record.provisional_id).unwrap(), None);

        land_votes(&ledger, &record, 1..2, VoteAction::Approve);
        assert_eq!(
            ledger.reevaluate(&record.provisional_id).unwrap(),
            Some(RecordStatus::Approved)
        );
        let approved = ledger.find_record(&record.provisional_id).unwrap();
        assert_eq!(approved.canonical_id.unwrap().0, "BR0001");
        assert!(!approved.sync_flag);

        // Already decided: nothing further happens.
        assert_eq!(ledger.reevaluate(&record.provisional_id).unwrap(), None);
    }

    #[test]
    fn reevaluate_rejects_and_skips_unknown_records() {
        let (ledger, record) = ledger_with(3, RevotePolicy::Overwrite);
        land_votes(&ledger, &record, 0..2, VoteAction::Reject);
        assert_eq!(
            ledger.reevaluate(&record.provisional_id).unwrap(),
            Some(RecordStatus::Rejected)
        );
        assert_eq!(
            ledger.reevaluate(&ProvisionalId::from("not-here-yet")).unwrap(),
            None
        );
    }
}
