//! Approval flow over the on-disk store and roster file.

use std::sync::Arc;

use chrono::Utc;
use tempfile::TempDir;

use chama_core::roster;
use chama_core::types::{
    CanonicalId, Collection, EntityKind, FinancialRecord, ProvisionalId, RecordDraft,
    RecordStatus, Role, UserId, VoteAction,
};
use chama_core::{FileStore, LocalStore, MemberRoster, RosterFile};
use chama_ledger::{Ledger, LedgerError};

fn setup(members: usize) -> (TempDir, Ledger<FileStore, RosterFile>) {
    let home = TempDir::new().expect("tempdir");
    let mut roster = MemberRoster::default();
    roster.upsert(UserId::from("treasurer"), Role::Treasurer, true);
    for i in 1..members {
        roster.upsert(UserId::from(format!("m{i}")), Role::Member, true);
    }
    roster::save_at(home.path(), &roster).expect("save roster");

    let store = FileStore::open_at(home.path()).expect("open store");
    let ledger = Ledger::new(Arc::new(store), Arc::new(RosterFile::at(home.path())));
    (home, ledger)
}

fn voters(n: usize) -> Vec<UserId> {
    let mut all = vec![UserId::from("treasurer")];
    all.extend((1..n).map(|i| UserId::from(format!("m{i}"))));
    all
}

fn seed_issued(store: &FileStore, kind: EntityKind, count: u64) {
    let now = Utc::now();
    for seq in 1..=count {
        store
            .insert(&FinancialRecord {
                provisional_id: ProvisionalId::generate(),
                canonical_id: Some(CanonicalId(format!("{}{:04}", kind.type_code(), seq))),
                kind,
                status: RecordStatus::Active,
                amount: 100,
                created_by: UserId::from("m1"),
                notes: None,
                related_to: None,
                sync_flag: true,
                created_at: now,
                updated_at: now,
            })
            .expect("seed");
    }
}

#[test]
fn borrowing_from_draft_to_release() {
    let (_home, ledger) = setup(10);
    seed_issued(ledger.store(), EntityKind::Borrowing, 7);

    let record = ledger
        .create(RecordDraft {
            kind: EntityKind::Borrowing,
            amount: 5000,
            created_by: UserId::from("m1"),
            notes: Some("school fees".into()),
            related_to: None,
        })
        .expect("create");
    assert_eq!(record.status, RecordStatus::Pending);
    assert!(!record.sync_flag);

    let all = voters(10);
    for voter in &all[..3] {
        ledger
            .record_vote(&record.provisional_id, voter, VoteAction::Approve)
            .expect("vote");
    }
    assert!(!ledger.is_quorum_met(&record.provisional_id).unwrap());

    for voter in &all[3..7] {
        ledger
            .record_vote(&record.provisional_id, voter, VoteAction::Approve)
            .expect("vote");
    }
    let tally = ledger.tally(&record.provisional_id).unwrap();
    assert_eq!((tally.approves, tally.threshold), (7, 7));
    assert!(tally.met);

    let approved = ledger.find_record(&record.provisional_id).unwrap();
    assert_eq!(approved.status, RecordStatus::Approved);
    assert_eq!(approved.canonical_id, Some(CanonicalId::from("BR0008")));

    let released = ledger
        .release_funds(&record.provisional_id, &UserId::from("treasurer"))
        .expect("release");
    assert_eq!(released.status, RecordStatus::Active);
    assert_eq!(released.canonical_id, Some(CanonicalId::from("BR0008")));

    let err = ledger
        .release_funds(&record.provisional_id, &UserId::from("treasurer"))
        .unwrap_err();
    assert!(matches!(err, LedgerError::InvalidState(_)));
}

#[test]
fn member_count_is_read_live() {
    let (home, ledger) = setup(4);
    let record = ledger
        .create(RecordDraft {
            kind: EntityKind::Deposit,
            amount: 250,
            created_by: UserId::from("m1"),
            notes: None,
            related_to: None,
        })
        .unwrap();
    for voter in &voters(4)[..2] {
        ledger
            .record_vote(&record.provisional_id, voter, VoteAction::Approve)
            .unwrap();
    }
    // 4 members need 3 approvals.
    assert!(!ledger.is_quorum_met(&record.provisional_id).unwrap());

    let mut roster = roster::load_at(home.path()).unwrap();
    roster.upsert(UserId::from("m3"), Role::Member, false);
    roster::save_at(home.path(), &roster).unwrap();
    // 3 members need 2 approvals.
    assert!(ledger.is_quorum_met(&record.provisional_id).unwrap());
}

#[test]
fn canonical_ids_are_per_kind_and_survive_reopen() {
    let (home, ledger) = setup(1);
    let mut issued = Vec::new();
    for kind in [EntityKind::Deposit, EntityKind::Investment, EntityKind::Deposit] {
        let record = ledger
            .create(RecordDraft {
                kind,
                amount: 10,
                created_by: UserId::from("treasurer"),
                notes: None,
                related_to: None,
            })
            .unwrap();
        let outcome = ledger
            .record_vote(&record.provisional_id, &UserId::from("treasurer"), VoteAction::Approve)
            .unwrap();
        assert_eq!(outcome.status, RecordStatus::Approved);
        issued.push(ledger.find_record(&record.provisional_id).unwrap().display_id());
    }
    assert_eq!(issued, ["DP0001", "IN0001", "DP0002"]);

    let reopened = FileStore::open_at(home.path()).unwrap();
    let deposits: Vec<FinancialRecord> =
        reopened.list(Collection::Records(EntityKind::Deposit)).unwrap();
    assert_eq!(deposits.len(), 2);
    assert!(deposits.iter().all(|d| !d.sync_flag));
}

#[test]
fn release_stands_when_closing_the_borrowing_fails() {
    let (_home, ledger) = setup(3);
    let treasurer = UserId::from("treasurer");
    let approve = |id: &ProvisionalId| {
        for voter in voters(2) {
            ledger.record_vote(id, &voter, VoteAction::Approve).expect("vote");
        }
    };

    let loan = ledger
        .create(RecordDraft {
            kind: EntityKind::Borrowing,
            amount: 100,
            created_by: UserId::from("m1"),
            notes: None,
            related_to: None,
        })
        .expect("create loan");
    approve(&loan.provisional_id);
    ledger.release_funds(&loan.provisional_id, &treasurer).expect("release loan");

    let repayment = ledger
        .create(RecordDraft {
            kind: EntityKind::Repayment,
            amount: 100,
            created_by: UserId::from("m1"),
            notes: None,
            related_to: Some(loan.provisional_id.clone()),
        })
        .expect("create repayment");
    approve(&repayment.provisional_id);

    // An unreadable sibling makes the settlement scan fail after the release.
    let dir = ledger
        .store()
        .root()
        .join(Collection::Records(EntityKind::Repayment).name());
    std::fs::write(dir.join("zz-corrupt.yaml"), "provisional_id: [unclosed").expect("corrupt");

    let released = ledger
        .release_funds(&repayment.provisional_id, &treasurer)
        .expect("release is not undone by the follow-up");
    assert_eq!(released.status, RecordStatus::Active);
    assert_eq!(
        ledger.find_record(&loan.provisional_id).expect("loan").status,
        RecordStatus::Active
    );
}
