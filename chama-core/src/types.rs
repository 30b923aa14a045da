//! Domain types for the shared ledger.
//!
//! Every persisted type round-trips through serde: YAML on the local disk,
//! JSON documents on the remote store. Sync metadata (`sync_flag`,
//! `updated_at`) lives on the entity itself so a single-file write is a
//! single atomic mutation.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// Client-generated permanent identity of a record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProvisionalId(pub String);

impl ProvisionalId {
    /// A fresh random (UUID v4) identifier.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl fmt::Display for ProvisionalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for ProvisionalId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ProvisionalId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Human-readable sequential code such as `BR0008`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CanonicalId(pub String);

impl CanonicalId {
    /// Numeric suffix of the code (`BR0008` → `8`), if any.
    pub fn sequence(&self) -> Option<u64> {
        let digits: String = self
            .0
            .chars()
            .rev()
            .take_while(|c| c.is_ascii_digit())
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();
        digits.parse().ok()
    }
}

impl fmt::Display for CanonicalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for CanonicalId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for CanonicalId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// A participant of the group.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(pub String);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for UserId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// The kind of financial record. Each kind is stored in its own collection
/// and numbered with its own canonical-id sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Borrowing,
    Investment,
    Deposit,
    Repayment,
    Penalty,
}

impl EntityKind {
    pub fn all() -> &'static [EntityKind] {
        &[
            EntityKind::Borrowing,
            EntityKind::Investment,
            EntityKind::Deposit,
            EntityKind::Repayment,
            EntityKind::Penalty,
        ]
    }

    /// Two-letter prefix used in canonical ids.
    pub fn type_code(self) -> &'static str {
        match self {
            EntityKind::Borrowing => "BR",
            EntityKind::Investment => "IN",
            EntityKind::Deposit => "DP",
            EntityKind::Repayment => "RP",
            EntityKind::Penalty => "PN",
        }
    }

    /// Repayments and penalties must point at the borrowing they belong to.
    pub fn requires_parent(self) -> bool {
        matches!(self, EntityKind::Repayment | EntityKind::Penalty)
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKind::Borrowing => write!(f, "borrowing"),
            EntityKind::Investment => write!(f, "investment"),
            EntityKind::Deposit => write!(f, "deposit"),
            EntityKind::Repayment => write!(f, "repayment"),
            EntityKind::Penalty => write!(f, "penalty"),
        }
    }
}

/// Lifecycle state of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RecordStatus {
    #[default]
    Pending,
    Approved,
    Rejected,
    Active,
    Closed,
}

impl RecordStatus {
    /// Funds have moved (or the record has been settled afterwards).
    pub fn is_released(self) -> bool {
        matches!(self, RecordStatus::Active | RecordStatus::Closed)
    }

    /// Votes are still meaningful for this record.
    pub fn accepts_votes(self) -> bool {
        matches!(self, RecordStatus::Pending | RecordStatus::Approved)
    }
}

impl fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordStatus::Pending => write!(f, "pending"),
            RecordStatus::Approved => write!(f, "approved"),
            RecordStatus::Rejected => write!(f, "rejected"),
            RecordStatus::Active => write!(f, "active"),
            RecordStatus::Closed => write!(f, "closed"),
        }
    }
}

/// A member's ballot on a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VoteAction {
    Approve,
    Reject,
}

impl fmt::Display for VoteAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VoteAction::Approve => write!(f, "approve"),
            VoteAction::Reject => write!(f, "reject"),
        }
    }
}

/// Role of a member within the group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    Member,
    Treasurer,
    Chairperson,
    Secretary,
}

impl Role {
    /// Only the treasurer may move funds.
    pub fn can_release_funds(self) -> bool {
        matches!(self, Role::Treasurer)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Member => write!(f, "member"),
            Role::Treasurer => write!(f, "treasurer"),
            Role::Chairperson => write!(f, "chairperson"),
            Role::Secretary => write!(f, "secretary"),
        }
    }
}

/// A named group of documents, locally and remotely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Collection {
    Records(EntityKind),
    Votes,
}

impl Collection {
    /// Every collection that participates in sync.
    pub fn all() -> Vec<Collection> {
        let mut all: Vec<Collection> = EntityKind::all()
            .iter()
            .copied()
            .map(Collection::Records)
            .collect();
        all.push(Collection::Votes);
        all
    }

    /// Directory / remote collection name.
    pub fn name(&self) -> &'static str {
        match self {
            Collection::Records(EntityKind::Borrowing) => "borrowings",
            Collection::Records(EntityKind::Investment) => "investments",
            Collection::Records(EntityKind::Deposit) => "deposits",
            Collection::Records(EntityKind::Repayment) => "repayments",
            Collection::Records(EntityKind::Penalty) => "penalties",
            Collection::Votes => "approval_votes",
        }
    }

    pub fn from_name(name: &str) -> Option<Collection> {
        Collection::all().into_iter().find(|c| c.name() == name)
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ---------------------------------------------------------------------------
// Sync metadata
// ---------------------------------------------------------------------------

/// Next mutation timestamp for a record last written at `previous`.
///
/// Strictly greater than `previous` even when the wall clock stalls or steps
/// backwards.
pub fn next_timestamp(previous: DateTime<Utc>) -> DateTime<Utc> {
    let now = Utc::now();
    if now > previous {
        now
    } else {
        previous + Duration::microseconds(1)
    }
}

/// A document that lives in a [`Collection`] and takes part in sync.
pub trait Entity: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    fn collection(&self) -> Collection;

    /// Stable storage and remote key. Never changes over the entity's life.
    fn key(&self) -> String;

    /// Secondary lookup key, once one has been issued.
    fn canonical_key(&self) -> Option<String> {
        None
    }

    fn updated_at(&self) -> DateTime<Utc>;
    fn set_updated_at(&mut self, at: DateTime<Utc>);
    fn sync_flag(&self) -> bool;
    fn set_sync_flag(&mut self, synced: bool);

    /// Stamp a local mutation: bump `updated_at` and queue for push.
    fn mark_mutated(&mut self) {
        let next = next_timestamp(self.updated_at());
        self.set_updated_at(next);
        self.set_sync_flag(false);
    }
}

// ---------------------------------------------------------------------------
// Domain structs
// ---------------------------------------------------------------------------

/// Input to record creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordDraft {
    pub kind: EntityKind,
    /// Minor currency units.
    pub amount: i64,
    pub created_by: UserId,
    pub notes: Option<String>,
    pub related_to: Option<ProvisionalId>,
}

/// A borrowing, investment, deposit, repayment or penalty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinancialRecord {
    pub provisional_id: ProvisionalId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub canonical_id: Option<CanonicalId>,
    pub kind: EntityKind,
    #[serde(default)]
    pub status: RecordStatus,
    pub amount: i64,
    pub created_by: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub related_to: Option<ProvisionalId>,
    #[serde(default)]
    pub sync_flag: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FinancialRecord {
    /// Human-facing label: canonical id once issued, provisional otherwise.
    pub fn display_id(&self) -> String {
        match &self.canonical_id {
            Some(id) => id.0.clone(),
            None => self.provisional_id.0.clone(),
        }
    }
}

impl Entity for FinancialRecord {
    fn collection(&self) -> Collection {
        Collection::Records(self.kind)
    }

    fn key(&self) -> String {
        self.provisional_id.0.clone()
    }

    fn canonical_key(&self) -> Option<String> {
        self.canonical_id.as_ref().map(|id| id.0.clone())
    }

    fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    fn set_updated_at(&mut self, at: DateTime<Utc>) {
        self.updated_at = at;
    }

    fn sync_flag(&self) -> bool {
        self.sync_flag
    }

    fn set_sync_flag(&mut self, synced: bool) {
        self.sync_flag = synced;
    }
}

/// One member's live vote on one record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalVote {
    pub entity_id: ProvisionalId,
    pub voter_id: UserId,
    pub voter_role: Role,
    pub action: VoteAction,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub sync_flag: bool,
    pub updated_at: DateTime<Utc>,
}

impl ApprovalVote {
    /// Key shared by every vote of `voter` on `entity`.
    pub fn key_for(entity: &ProvisionalId, voter: &UserId) -> String {
        format!("{}.{}", entity.0, voter.0)
    }
}

impl Entity for ApprovalVote {
    fn collection(&self) -> Collection {
        Collection::Votes
    }

    fn key(&self) -> String {
        ApprovalVote::key_for(&self.entity_id, &self.voter_id)
    }

    fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    fn set_updated_at(&mut self, at: DateTime<Utc>) {
        self.updated_at = at;
    }

    fn sync_flag(&self) -> bool {
        self.sync_flag
    }

    fn set_sync_flag(&mut self, synced: bool) {
        self.sync_flag = synced;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn newtype_display() {
        assert_eq!(ProvisionalId::from("p1").to_string(), "p1");
        assert_eq!(CanonicalId::from("BR0008").to_string(), "BR0008");
        assert_eq!(UserId::from("alice").to_string(), "alice");
    }

    #[test]
    fn generated_ids_are_distinct() {
        assert_ne!(ProvisionalId::generate(), ProvisionalId::generate());
    }

    #[test]
    fn canonical_sequence_parses_suffix() {
        assert_eq!(CanonicalId::from("BR0007").sequence(), Some(7));
        assert_eq!(CanonicalId::from("RP0120").sequence(), Some(120));
        assert_eq!(CanonicalId::from("BR").sequence(), None);
    }

    #[test]
    fn collection_names_roundtrip() {
        for collection in Collection::all() {
            assert_eq!(Collection::from_name(collection.name()), Some(collection));
        }
        assert_eq!(Collection::from_name("tasks"), None);
    }

    #[test]
    fn next_timestamp_is_strictly_increasing_even_for_future_previous() {
        let future = Utc::now() + Duration::hours(1);
        let next = next_timestamp(future);
        assert!(next > future);
    }

    #[test]
    fn mark_mutated_bumps_timestamp_and_clears_sync_flag() {
        let now = Utc::now();
        let mut record = FinancialRecord {
            provisional_id: ProvisionalId::from("p1"),
            canonical_id: None,
            kind: EntityKind::Borrowing,
            status: RecordStatus::Pending,
            amount: 5000,
            created_by: UserId::from("alice"),
            notes: None,
            related_to: None,
            sync_flag: true,
            created_at: now,
            updated_at: now,
        };
        record.mark_mutated();
        assert!(record.updated_at > now);
        assert!(!record.sync_flag);
    }

    #[test]
    fn vote_key_combines_entity_and_voter() {
        let key = ApprovalVote::key_for(&ProvisionalId::from("p1"), &UserId::from("bob"));
        assert_eq!(key, "p1.bob");
    }

    #[test]
    fn only_treasurer_releases() {
        assert!(Role::Treasurer.can_release_funds());
        assert!(!Role::Member.can_release_funds());
        assert!(!Role::Chairperson.can_release_funds());
    }

    #[test]
    fn record_serde_roundtrip_preserves_timestamps() {
        let now = Utc::now();
        let record = FinancialRecord {
            provisional_id: ProvisionalId::from("p1"),
            canonical_id: Some(CanonicalId::from("BR0001")),
            kind: EntityKind::Borrowing,
            status: RecordStatus::Approved,
            amount: 5000,
            created_by: UserId::from("alice"),
            notes: Some("school fees".into()),
            related_to: None,
            sync_flag: false,
            created_at: now,
            updated_at: now,
        };
        let yaml = serde_yaml::to_string(&record).expect("serialize");
        let back: FinancialRecord = serde_yaml::from_str(&yaml).expect("deserialize");
        assert_eq!(back, record);
    }
}
