//! Local store error-message, atomic-write-safety, and layout integration tests.
//! Storage: ~/.chama/store/<collection>/<key>.yaml

use assert_fs::prelude::*;
use chama_core::{
    store::{self, FileStore, LocalStore},
    types::{Collection, EntityKind, FinancialRecord, ProvisionalId, RecordStatus, UserId},
    StoreError,
};
use chrono::Utc;
use predicates::prelude::predicate;
use std::fs;

const BORROWINGS: Collection = Collection::Records(EntityKind::Borrowing);

fn record(id: &str) -> FinancialRecord {
    let now = Utc::now();
    FinancialRecord {
        provisional_id: ProvisionalId::from(id),
        canonical_id: None,
        kind: EntityKind::Borrowing,
        status: RecordStatus::Pending,
        amount: 5000,
        created_by: UserId::from("alice"),
        notes: None,
        related_to: None,
        sync_flag: false,
        created_at: now,
        updated_at: now,
    }
}

// ---------------------------------------------------------------------------
// 1. Load error messages
// ---------------------------------------------------------------------------

#[test]
fn corrupt_yaml_returns_parse_error_with_path() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    let dir = store::store_root_at(home.path()).join("borrowings");
    fs::create_dir_all(&dir).expect("mkdir");
    fs::write(dir.join("p1.yaml"), b": : corrupt : yaml : !!!\n  - broken: [unclosed")
        .expect("write");

    let store = FileStore::open_at(home.path()).expect("open");
    let err = store.get::<FinancialRecord>(BORROWINGS, "p1").unwrap_err();
    assert!(matches!(err, StoreError::Parse { .. }), "got: {err}");
    assert!(err.to_string().contains("p1.yaml"), "must contain file path, got: {err}");
}

#[test]
fn list_surfaces_parse_errors_instead_of_skipping() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    let store = FileStore::open_at(home.path()).expect("open");
    store.insert(&record("good")).expect("insert");
    fs::write(
        store::entity_path(store.root(), BORROWINGS, "bad"),
        b"- this is a list, not a mapping\n",
    )
    .expect("write");

    let err = store.list::<FinancialRecord>(BORROWINGS).unwrap_err();
    assert!(matches!(err, StoreError::Parse { .. }), "got: {err}");
}

// ---------------------------------------------------------------------------
// 2. Atomic write safety
// ---------------------------------------------------------------------------

#[test]
fn mid_write_crash_leaves_original_intact() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    let store = FileStore::open_at(home.path()).expect("open");
    store.insert(&record("p1")).expect("insert");

    let path = store::entity_path(store.root(), BORROWINGS, "p1");
    let original_bytes = fs::read(&path).expect("read original");

    // Simulate crash: .tmp written but process died before rename
    let tmp = path.with_file_name("p1.yaml.tmp");
    fs::write(&tmp, b"CRASH - INCOMPLETE WRITE").expect("write crash tmp");

    assert_eq!(original_bytes, fs::read(&path).expect("read after crash"));
    let listed: Vec<FinancialRecord> = store.list(BORROWINGS).expect("list ignores .tmp");
    assert_eq!(listed.len(), 1);
}

#[test]
fn entity_file_has_owner_only_mode() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    let store = FileStore::open_at(home.path()).expect("open");
    store.insert(&record("p1")).expect("insert");

    home.child(".chama/store/borrowings/p1.yaml")
        .assert(predicate::path::exists());

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let path = store::entity_path(store.root(), BORROWINGS, "p1");
        let mode = fs::metadata(&path).expect("meta").permissions().mode() & 0o777;
        assert_eq!(mode, 0o600, "expected 0600, got {mode:o}");
    }
}

// ---------------------------------------------------------------------------
// 3. Listing
// ---------------------------------------------------------------------------

#[test]
fn list_is_sorted_and_deterministic() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    let store = FileStore::open_at(home.path()).expect("open");
    store.insert(&record("zulu")).expect("insert");
    store.insert(&record("alpha")).expect("insert");

    let list: Vec<FinancialRecord> = store.list(BORROWINGS).expect("list");
    let keys: Vec<_> = list.iter().map(|r| r.provisional_id.0.as_str()).collect();
    assert_eq!(keys, ["alpha", "zulu"]);
}

#[test]
fn find_by_canonical_matches_issued_code_only() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    let store = FileStore::open_at(home.path()).expect("open");
    let mut approved = record("p1");
    approved.canonical_id = Some("BR0003".into());
    store.insert(&approved).expect("insert");
    store.insert(&record("p2")).expect("insert");

    let found: FinancialRecord = store
        .find_by_canonical(BORROWINGS, "BR0003")
        .expect("find")
        .expect("present");
    assert_eq!(found.provisional_id.0, "p1");
    assert!(store
        .find_by_canonical::<FinancialRecord>(BORROWINGS, "BR0004")
        .expect("find")
        .is_none());
}

#[test]
fn collections_are_isolated() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    let store = FileStore::open_at(home.path()).expect("open");
    let mut deposit = record("d1");
    deposit.kind = EntityKind::Deposit;
    store.insert(&deposit).expect("insert");
    store.insert(&record("b1")).expect("insert");

    let deposits: Vec<FinancialRecord> = store
        .list(Collection::Records(EntityKind::Deposit))
        .expect("list");
    assert_eq!(deposits.len(), 1);
    home.child(".chama/store/deposits/d1.yaml")
        .assert(predicate::path::exists());
}
