//! Last-writer-wins conflict resolution.
//!
//! Every device applies the same comparator to the same `updated_at`
//! timestamps, so all copies converge on the most recent write. Ties go to
//! the remote copy.

use chrono::{DateTime, Utc};

use chama_core::types::Entity;

use crate::document::{digest, to_document};
use crate::error::SyncError;

/// Which copy survives a comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Both copies carry the same content.
    Identical,
    /// The remote copy replaces the local one.
    RemoteWins,
    /// The local copy is newer and must be pushed again.
    LocalWins,
}

/// Pure timestamp comparator: remote wins iff `remote >= local`.
pub fn last_writer_wins(local: DateTime<Utc>, remote: DateTime<Utc>) -> Resolution {
    if remote >= local {
        Resolution::RemoteWins
    } else {
        Resolution::LocalWins
    }
}

/// Compare a local entity with the copy decoded from a remote document.
pub fn resolve<E: Entity>(local: &E, remote: &E) -> Result<Resolution, SyncError> {
    if digest(&to_document(local)?)? == digest(&to_document(remote)?)? {
        return Ok(Resolution::Identical);
    }
    Ok(last_writer_wins(local.updated_at(), remote.updated_at()))
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use chama_core::types::{
        ApprovalVote, ProvisionalId, Role, UserId, VoteAction,
    };

    use super::*;

    fn vote(action: VoteAction, at: DateTime<Utc>) -> ApprovalVote {
        ApprovalVote {
            entity_id: ProvisionalId::from("p1"),
            voter_id: UserId::from("bob"),
            voter_role: Role::Member,
            action,
            timestamp: at,
            sync_flag: false,
            updated_at: at,
        }
    }

    #[test]
    fn newer_remote_wins_and_ties_go_remote() {
        let t = Utc::now();
        assert_eq!(last_writer_wins(t, t + Duration::seconds(1)), Resolution::RemoteWins);
        assert_eq!(last_writer_wins(t, t), Resolution::RemoteWins);
        assert_eq!(last_writer_wins(t + Duration::seconds(1), t), Resolution::LocalWins);
    }

    #[test]
    fn identical_content_short_circuits() {
        let t = Utc::now();
        let mut local = vote(VoteAction::Approve, t);
        let remote = vote(VoteAction::Approve, t);
        local.sync_flag = true;
        assert_eq!(resolve(&local, &remote).unwrap(), Resolution::Identical);
    }

    #[test]
    fn differing_content_uses_timestamps() {
        let t = Utc::now();
        let local = vote(VoteAction::Approve, t + Duration::seconds(5));
        let remote = vote(VoteAction::Reject, t);
        assert_eq!(resolve(&local, &remote).unwrap(), Resolution::LocalWins);
        assert_eq!(resolve(&remote, &local).unwrap(), Resolution::RemoteWins);
    }
}
