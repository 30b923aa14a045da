//! `chama member add <user> [--role ...] [--inactive]` and `chama member list`

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use colored::Colorize;
use tabled::{settings::Style, Table, Tabled};

use chama_core::roster;
use chama_core::types::UserId;

use super::home_dir;
use crate::RoleArg;

/// Manage the member roster.
#[derive(Subcommand, Debug)]
pub enum MemberCommand {
    /// Add a member, or update an existing member's role and activity.
    Add(AddArgs),

    /// List every member in the roster.
    List,
}

#[derive(Args, Debug)]
pub struct AddArgs {
    /// User id as used in `--by` flags.
    pub user: String,

    /// member | treasurer | chairperson | secretary. Defaults to member.
    #[arg(long, short = 'r', default_value_t = RoleArg::default())]
    pub role: RoleArg,

    /// Record the member as inactive; inactive members neither vote nor
    /// count towards quorum.
    #[arg(long)]
    pub inactive: bool,
}

#[derive(Tabled)]
struct MemberRow {
    #[tabled(rename = "user")]
    user: String,
    #[tabled(rename = "role")]
    role: String,
    #[tabled(rename = "active")]
    active: String,
    #[tabled(rename = "joined")]
    joined: String,
}

pub fn run(cmd: MemberCommand) -> Result<()> {
    match cmd {
        MemberCommand::Add(args) => add(args),
        MemberCommand::List => list(),
    }
}

fn add(args: AddArgs) -> Result<()> {
    let home = home_dir()?;
    let mut members = roster::load_at(&home).context("failed to read members.yaml")?;
    let existed = members.find(&UserId::from(args.user.as_str())).is_some();
    members.upsert(UserId::from(args.user.clone()), args.role.0, !args.inactive);
    roster::save_at(&home, &members).context("failed to write members.yaml")?;

    let verb = if existed { "Updated" } else { "Added" };
    println!("✓ {verb} '{}' as {}", args.user, args.role);
    Ok(())
}

fn list() -> Result<()> {
    let home = home_dir()?;
    let members = roster::load_at(&home).context("failed to read members.yaml")?;
    if members.members.is_empty() {
        println!("No members yet.");
        println!("Run: chama member add <user> --role <role>");
        return Ok(());
    }

    let active = members.members.iter().filter(|m| m.active).count();
    println!(
        "{} members | {} active | quorum {}",
        members.members.len(),
        active,
        chama_ledger::quorum_threshold(active),
    );
    let rows: Vec<MemberRow> = members
        .members
        .iter()
        .map(|m| MemberRow {
            user: m.user_id.to_string(),
            role: m.role.to_string(),
            active: if m.active {
                "yes".green().to_string()
            } else {
                "no".bright_black().to_string()
            },
            joined: m.joined_at.format("%Y-%m-%d").to_string(),
        })
        .collect();
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");
    Ok(())
}
