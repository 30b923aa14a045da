//! `chama record create|list|show`

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use chama_core::types::{EntityKind, FinancialRecord, ProvisionalId, RecordDraft, RecordStatus, UserId};
use chama_ledger::Tally;

use super::{open_ledger, resolve_record};
use crate::EntityKindArg;

/// Create and inspect financial records.
#[derive(Subcommand, Debug)]
pub enum RecordCommand {
    /// Draft a new record; it starts Pending and unsynced.
    Create(CreateArgs),

    /// List records, optionally of a single kind.
    List(ListArgs),

    /// Show one record with its current vote tally.
    Show(ShowArgs),
}

#[derive(Args, Debug)]
pub struct CreateArgs {
    /// borrowing | investment | deposit | repayment | penalty
    #[arg(long, short = 'k')]
    pub kind: EntityKindArg,

    /// Amount in minor currency units.
    #[arg(long, short = 'a')]
    pub amount: i64,

    /// Member creating the record.
    #[arg(long)]
    pub by: String,

    /// Borrowing a repayment or penalty belongs to (provisional or canonical id).
    #[arg(long)]
    pub related_to: Option<String>,

    #[arg(long)]
    pub notes: Option<String>,
}

#[derive(Args, Debug)]
pub struct ListArgs {
    #[arg(long, short = 'k')]
    pub kind: Option<EntityKindArg>,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct ShowArgs {
    /// Provisional id or canonical code.
    pub id: String,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Tabled)]
struct RecordRow {
    #[tabled(rename = "id")]
    id: String,
    #[tabled(rename = "kind")]
    kind: String,
    #[tabled(rename = "status")]
    status: String,
    #[tabled(rename = "amount")]
    amount: i64,
    #[tabled(rename = "by")]
    created_by: String,
    #[tabled(rename = "synced")]
    synced: String,
}

#[derive(Serialize)]
struct RecordDetail<'a> {
    #[serde(flatten)]
    record: &'a FinancialRecord,
    tally: Tally,
}

pub fn run(cmd: RecordCommand) -> Result<()> {
    match cmd {
        RecordCommand::Create(args) => create(args),
        RecordCommand::List(args) => list(args),
        RecordCommand::Show(args) => show(args),
    }
}

fn create(args: CreateArgs) -> Result<()> {
    let ledger = open_ledger()?;
    let related_to = match args.related_to.as_deref() {
        Some(id) => Some(resolve_record(&ledger, id)?.provisional_id),
        None => None,
    };
    let record = ledger
        .create(RecordDraft {
            kind: args.kind.0,
            amount: args.amount,
            created_by: UserId::from(args.by),
            notes: args.notes,
            related_to,
        })
        .context("failed to create record")?;

    println!(
        "✓ Created {} {} ({})",
        record.kind, record.provisional_id, record.status
    );
    Ok(())
}

fn list(args: ListArgs) -> Result<()> {
    let ledger = open_ledger()?;
    let kinds: Vec<EntityKind> = match args.kind {
        Some(kind) => vec![kind.0],
        None => EntityKind::all().to_vec(),
    };
    let mut records = Vec::new();
    for kind in kinds {
        records.extend(ledger.list(kind).with_context(|| format!("failed to list {kind} records"))?);
    }

    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&records).context("failed to serialize records")?
        );
        return Ok(());
    }

    if records.is_empty() {
        println!("No records.");
        return Ok(());
    }
    let rows: Vec<RecordRow> = records
        .iter()
        .map(|r| RecordRow {
            id: r.display_id(),
            kind: r.kind.to_string(),
            status: status_label(r.status),
            amount: r.amount,
            created_by: r.created_by.to_string(),
            synced: if r.sync_flag {
                "yes".to_string()
            } else {
                "pending".yellow().to_string()
            },
        })
        .collect();
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");
    Ok(())
}

fn show(args: ShowArgs) -> Result<()> {
    let ledger = open_ledger()?;
    let record = resolve_record(&ledger, &args.id)?;
    let tally = ledger
        .tally(&record.provisional_id)
        .context("failed to count votes")?;

    if args.json {
        let detail = RecordDetail {
            record: &record,
            tally,
        };
        println!(
            "{}",
            serde_json::to_string_pretty(&detail).context("failed to serialize record")?
        );
        return Ok(());
    }

    println!("{} {}", record.kind.to_string().bold(), record.display_id().bold());
    println!("  provisional: {}", record.provisional_id);
    println!("  status:      {}", status_label(record.status));
    println!("  amount:      {}", record.amount);
    println!("  created by:  {} at {}", record.created_by, record.created_at.to_rfc3339());
    if let Some(parent) = &record.related_to {
        println!("  belongs to:  {}", parent_label(&ledger, parent));
    }
    if let Some(notes) = &record.notes {
        println!("  notes:       {notes}");
    }
    println!(
        "  votes:       {} approve / {} reject, {} needed of {} active{}",
        tally.approves,
        tally.rejects,
        tally.threshold,
        tally.active_members,
        if tally.met { " (quorum met)" } else { "" },
    );
    println!(
        "  synced:      {}",
        if record.sync_flag { "yes" } else { "pending push" }
    );
    Ok(())
}

fn parent_label(ledger: &super::FileLedger, parent: &ProvisionalId) -> String {
    ledger
        .find_record(parent)
        .map(|r| r.display_id())
        .unwrap_or_else(|_| parent.to_string())
}

pub(crate) fn status_label(status: RecordStatus) -> String {
    let label = status.to_string();
    match status {
        RecordStatus::Pending => label.yellow().to_string(),
        RecordStatus::Approved => label.cyan().to_string(),
        RecordStatus::Rejected => label.red().to_string(),
        RecordStatus::Active => label.green().to_string(),
        RecordStatus::Closed => label.bright_black().to_string(),
    }
}
