//! Chama: offline-first group ledger with approval-gated releases.
//!
//! # Usage
//!
//! ```text
//! chama init [--device-id <id>] [--remote-root <dir>]
//! chama member add <user> [--role member|treasurer|chairperson|secretary] [--inactive]
//! chama member list
//! chama record create --kind <kind> --amount <minor units> --by <user> [--related-to <id>] [--notes <text>]
//! chama record list [--kind <kind>] [--json]
//! chama record show <id> [--json]
//! chama vote <id> approve|reject --by <user>
//! chama release <id> --by <user>
//! chama close <id>
//! chama sync [--push-only|--pull-only]
//! chama status [--json]
//! chama daemon start|stop|status|logs
//! ```

mod commands;

use std::fmt;
use std::str::FromStr;

use anyhow::Result;
use clap::{Parser, Subcommand};

use chama_core::types::{EntityKind, Role, VoteAction};
use commands::{
    approval::{CloseArgs, ReleaseArgs, VoteArgs},
    daemon::DaemonCommand,
    init::InitArgs,
    member::MemberCommand,
    record::RecordCommand,
    status::StatusArgs,
    sync::SyncArgs,
};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "chama",
    version,
    about = "Offline-first group ledger with quorum approvals and treasurer releases",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create ~/.chama and write this device's config.
    Init(InitArgs),

    /// Manage the member roster.
    Member {
        #[command(subcommand)]
        command: MemberCommand,
    },

    /// Create and inspect financial records.
    Record {
        #[command(subcommand)]
        command: RecordCommand,
    },

    /// Cast or change a vote on a record.
    Vote(VoteArgs),

    /// Release approved funds (treasurer only).
    Release(ReleaseArgs),

    /// Close an active record.
    Close(CloseArgs),

    /// Push local changes and pull remote ones.
    Sync(SyncArgs),

    /// Show the push backlog and daemon state.
    Status(StatusArgs),

    /// Run and control the background sync daemon.
    Daemon {
        #[command(subcommand)]
        command: DaemonCommand,
    },
}

// ---------------------------------------------------------------------------
// Argument wrappers so clap can parse core enums
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
pub struct EntityKindArg(pub EntityKind);

impl FromStr for EntityKindArg {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "borrowing" | "br" => Ok(Self(EntityKind::Borrowing)),
            "investment" | "in" => Ok(Self(EntityKind::Investment)),
            "deposit" | "dp" => Ok(Self(EntityKind::Deposit)),
            "repayment" | "rp" => Ok(Self(EntityKind::Repayment)),
            "penalty" | "pn" => Ok(Self(EntityKind::Penalty)),
            other => Err(format!(
                "unknown record kind '{other}'; expected: borrowing, investment, deposit, repayment, penalty"
            )),
        }
    }
}

impl fmt::Display for EntityKindArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RoleArg(pub Role);

impl FromStr for RoleArg {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "member" => Ok(Self(Role::Member)),
            "treasurer" => Ok(Self(Role::Treasurer)),
            "chairperson" | "chair" => Ok(Self(Role::Chairperson)),
            "secretary" => Ok(Self(Role::Secretary)),
            other => Err(format!(
                "unknown role '{other}'; expected: member, treasurer, chairperson, secretary"
            )),
        }
    }
}

impl fmt::Display for RoleArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct VoteActionArg(pub VoteAction);

impl FromStr for VoteActionArg {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "approve" | "yes" => Ok(Self(VoteAction::Approve)),
            "reject" | "no" => Ok(Self(VoteAction::Reject)),
            other => Err(format!(
                "unknown vote '{other}'; expected: approve, reject"
            )),
        }
    }
}

impl fmt::Display for VoteActionArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Init(args) => args.run(),
        Commands::Member { command } => commands::member::run(command),
        Commands::Record { command } => commands::record::run(command),
        Commands::Vote(args) => args.run(),
        Commands::Release(args) => args.run(),
        Commands::Close(args) => args.run(),
        Commands::Sync(args) => args.run(),
        Commands::Status(args) => args.run(),
        Commands::Daemon { command } => commands::daemon::run(command),
    }
}
