//! Membership roster and the role/membership provider contract.
//!
//! The roster is a single YAML file at `<home>/.chama/members.yaml`.
//! [`RosterFile`] re-reads it on every query so quorum arithmetic always sees
//! the live member count.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::store::{chama_root, home, set_file_permissions};
use crate::types::{Role, UserId};

/// Source of truth for who may vote and who may release funds.
pub trait MembershipProvider: Send + Sync {
    /// Number of members currently eligible to vote.
    fn active_member_count(&self) -> Result<usize, StoreError>;

    /// Role of an active member; `None` for unknown or inactive users.
    fn role_of(&self, user: &UserId) -> Result<Option<Role>, StoreError>;

    /// The whole roster as of one read, for evaluations that consult many
    /// members at once.
    fn snapshot(&self) -> Result<MemberRoster, StoreError>;
}

/// A single roster entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub user_id: UserId,
    #[serde(default)]
    pub role: Role,
    #[serde(default = "default_active")]
    pub active: bool,
    pub joined_at: DateTime<Utc>,
}

fn default_active() -> bool {
    true
}

/// In-memory roster snapshot; also the on-disk document shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct MemberRoster {
    #[serde(default)]
    pub members: Vec<Member>,
}

impl MemberRoster {
    /// Add or replace a member, keyed by user id.
    pub fn upsert(&mut self, user_id: UserId, role: Role, active: bool) {
        match self.members.iter_mut().find(|m| m.user_id == user_id) {
            Some(existing) => {
                existing.role = role;
                existing.active = active;
            }
            None => self.members.push(Member {
                user_id,
                role,
                active,
                joined_at: Utc::now(),
            }),
        }
    }

    pub fn find(&self, user_id: &UserId) -> Option<&Member> {
        self.members.iter().find(|m| &m.user_id == user_id)
    }
}

impl MembershipProvider for MemberRoster {
    fn active_member_count(&self) -> Result<usize, StoreError> {
        Ok(self.members.iter().filter(|m| m.active).count())
    }

    fn role_of(&self, user: &UserId) -> Result<Option<Role>, StoreError> {
        Ok(self.find(user).filter(|m| m.active).map(|m| m.role))
    }

    fn snapshot(&self) -> Result<MemberRoster, StoreError> {
        Ok(self.clone())
    }
}

// ---------------------------------------------------------------------------
// Persistence
// ---------------------------------------------------------------------------

/// `<home>/.chama/members.yaml` — pure, no I/O.
pub fn roster_path_at(home: &Path) -> PathBuf {
    chama_root(home).join("members.yaml")
}

/// Load the roster; an absent file is an empty roster.
pub fn load_at(home: &Path) -> Result<MemberRoster, StoreError> {
    let path = roster_path_at(home);
    if !path.exists() {
        return Ok(MemberRoster::default());
    }
    let contents = std::fs::read_to_string(&path)?;
    serde_yaml::from_str(&contents).map_err(|e| StoreError::Parse { path, source: e })
}

/// `load_at` convenience wrapper.
pub fn load() -> Result<MemberRoster, StoreError> {
    load_at(&home()?)
}

/// Atomically save the roster (`.tmp` + rename, mode 0600).
pub fn save_at(home: &Path, roster: &MemberRoster) -> Result<(), StoreError> {
    let path = roster_path_at(home);
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    let tmp = path.with_file_name("members.yaml.tmp");
    std::fs::write(&tmp, serde_yaml::to_string(roster)?)?;
    set_file_permissions(&tmp)?;
    std::fs::rename(&tmp, &path)?;
    Ok(())
}

/// Provider that reads `<home>/.chama/members.yaml` on every query.
#[derive(Debug, Clone)]
pub struct RosterFile {
    home: PathBuf,
}

impl RosterFile {
    pub fn at(home: impl Into<PathBuf>) -> Self {
        Self { home: home.into() }
    }
}

impl MembershipProvider for RosterFile {
    fn active_member_count(&self) -> Result<usize, StoreError> {
        load_at(&self.home)?.active_member_count()
    }

    fn role_of(&self, user: &UserId) -> Result<Option<Role>, StoreError> {
        load_at(&self.home)?.role_of(user)
    }

    fn snapshot(&self) -> Result<MemberRoster, StoreError> {
        load_at(&self.home)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn inactive_members_have_no_role_and_do_not_count() {
        let mut roster = MemberRoster::default();
        roster.upsert(UserId::from("alice"), Role::Member, true);
        roster.upsert(UserId::from("tara"), Role::Treasurer, true);
        roster.upsert(UserId::from("gone"), Role::Member, false);

        assert_eq!(roster.active_member_count().unwrap(), 2);
        assert_eq!(roster.role_of(&UserId::from("tara")).unwrap(), Some(Role::Treasurer));
        assert_eq!(roster.role_of(&UserId::from("gone")).unwrap(), None);
        assert_eq!(roster.role_of(&UserId::from("nobody")).unwrap(), None);
    }

    #[test]
    fn upsert_replaces_role() {
        let mut roster = MemberRoster::default();
        roster.upsert(UserId::from("alice"), Role::Member, true);
        roster.upsert(UserId::from("alice"), Role::Secretary, true);
        assert_eq!(roster.members.len(), 1);
        assert_eq!(roster.members[0].role, Role::Secretary);
    }

    #[test]
    fn roster_file_reads_live_membership() {
        let home = TempDir::new().unwrap();
        let provider = RosterFile::at(home.path());
        assert_eq!(provider.active_member_count().unwrap(), 0);

        let mut roster = MemberRoster::default();
        roster.upsert(UserId::from("alice"), Role::Member, true);
        save_at(home.path(), &roster).unwrap();
        assert_eq!(provider.active_member_count().unwrap(), 1);

        roster.upsert(UserId::from("bob"), Role::Member, true);
        save_at(home.path(), &roster).unwrap();
        assert_eq!(provider.active_member_count().unwrap(), 2);
        assert_eq!(provider.snapshot().unwrap(), roster);
    }

    #[test]
    fn malformed_roster_reports_path() {
        let home = TempDir::new().unwrap();
        let path = roster_path_at(home.path());
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "members: [unclosed").unwrap();
        let err = load_at(home.path()).unwrap_err();
        assert!(err.to_string().contains("members.yaml"));
    }
}
