//! `chama vote`, `chama release`, `chama close`

use anyhow::{Context, Result};
use clap::Args;

use chama_core::types::{RecordStatus, UserId};

use super::record::status_label;
use super::{open_ledger, resolve_record};
use crate::VoteActionArg;

/// Cast or change a vote on a record.
#[derive(Args, Debug)]
pub struct VoteArgs {
    /// Provisional id or canonical code.
    pub id: String,

    /// approve | reject
    pub action: VoteActionArg,

    /// Member casting the vote.
    #[arg(long)]
    pub by: String,
}

/// Release approved funds (treasurer only).
#[derive(Args, Debug)]
pub struct ReleaseArgs {
    pub id: String,

    /// Member releasing the funds; must hold the treasurer role.
    #[arg(long)]
    pub by: String,
}

/// Close an active record.
#[derive(Args, Debug)]
pub struct CloseArgs {
    pub id: String,
}

impl VoteArgs {
    pub fn run(self) -> Result<()> {
        let ledger = open_ledger()?;
        let record = resolve_record(&ledger, &self.id)?;
        let outcome = ledger
            .record_vote(&record.provisional_id, &UserId::from(self.by.clone()), self.action.0)
            .with_context(|| format!("failed to record vote on {}", record.display_id()))?;
        let tally = ledger.tally(&record.provisional_id)?;

        let verb = if outcome.replaced { "Changed" } else { "Recorded" };
        println!(
            "✓ {verb} {} vote by '{}' on {}",
            self.action,
            self.by,
            record.display_id()
        );
        println!(
            "  {}/{} approvals, status {}",
            tally.approves,
            tally.threshold,
            status_label(outcome.status)
        );
        if outcome.status == RecordStatus::Approved && record.status != RecordStatus::Approved {
            let approved = ledger.find_record(&record.provisional_id)?;
            println!("  Quorum met; issued {}", approved.display_id());
        }
        Ok(())
    }
}

impl ReleaseArgs {
    pub fn run(self) -> Result<()> {
        let ledger = open_ledger()?;
        let record = resolve_record(&ledger, &self.id)?;
        let released = ledger
            .release_funds(&record.provisional_id, &UserId::from(self.by.clone()))
            .with_context(|| format!("failed to release {}", record.display_id()))?;

        println!(
            "✓ Released {} ({} {}) by '{}'",
            released.display_id(),
            released.kind,
            released.amount,
            self.by
        );
        Ok(())
    }
}

impl CloseArgs {
    pub fn run(self) -> Result<()> {
        let ledger = open_ledger()?;
        let record = resolve_record(&ledger, &self.id)?;
        let closed = ledger
            .close(&record.provisional_id)
            .with_context(|| format!("failed to close {}", record.display_id()))?;
        println!("✓ Closed {}", closed.display_id());
        Ok(())
    }
}
