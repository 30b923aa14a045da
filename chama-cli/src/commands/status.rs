//! `chama status` — push backlog and daemon visibility.

use std::path::Path;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use serde_json::Value;
use tabled::{settings::Style, Table, Tabled};

use chama_core::{settings, FileStore, Settings};
use chama_daemon::{send_request, DaemonError, DaemonRequest};
use chama_sync::backlog::{self, format_datetime_age, format_seconds, Backlog};

use super::home_dir;

/// Arguments for `chama status`.
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

impl StatusArgs {
    pub fn run(self) -> Result<()> {
        let home = home_dir()?;
        let config = settings::load_at(&home).context("failed to read config.yaml")?;
        let store = FileStore::open_at(&home).context("failed to open local store")?;
        let backlog = backlog::scan(&store).context("failed to scan local store")?;
        let daemon = daemon_status(&home)?;

        let report = StatusReport {
            device_id: config.device_id.clone(),
            remote_root: config.remote_root.as_ref().map(|p| p.display().to_string()),
            pending: backlog::pending_total(&backlog),
            backlog,
            daemon,
        };
        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&report).context("failed to serialize status JSON")?
            );
            return Ok(());
        }

        print_table(&config, report);
        Ok(())
    }
}

#[derive(Serialize)]
struct StatusReport {
    device_id: String,
    remote_root: Option<String>,
    pending: usize,
    backlog: Backlog,
    daemon: Value,
}

#[derive(Tabled)]
struct BacklogRow {
    #[tabled(rename = "collection")]
    collection: String,
    #[tabled(rename = "total")]
    total: usize,
    #[tabled(rename = "unsynced")]
    unsynced: String,
    #[tabled(rename = "oldest unsynced")]
    oldest: String,
}

/// Single status query; no retries, a stopped daemon is a normal answer.
fn daemon_status(home: &Path) -> Result<Value> {
    match send_request(home, &DaemonRequest::new("status")) {
        Ok(response) if response.ok => Ok(response.data.unwrap_or(Value::Null)),
        Ok(response) => Ok(serde_json::json!({
            "running": true,
            "error": response.error,
        })),
        Err(DaemonError::DaemonNotRunning { .. }) => Ok(serde_json::json!({ "running": false })),
        Err(err) => Err(err).context("failed to query daemon status"),
    }
}

fn print_table(config: &Settings, report: StatusReport) {
    println!(
        "Chama v{} | device {} | {} pending push",
        env!("CARGO_PKG_VERSION"),
        config.device_id,
        report.pending,
    );
    match &report.remote_root {
        Some(root) => println!("Remote: {root}"),
        None => println!("Remote: {}", "not configured".yellow()),
    }

    let rows: Vec<BacklogRow> = report
        .backlog
        .iter()
        .map(|(name, entry)| BacklogRow {
            collection: name.clone(),
            total: entry.total,
            unsynced: if entry.unsynced == 0 {
                "0".green().to_string()
            } else {
                entry.unsynced.to_string().yellow().to_string()
            },
            oldest: entry
                .oldest_unsynced
                .map(format_datetime_age)
                .unwrap_or_else(|| "-".to_string()),
        })
        .collect();
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");

    print_daemon_line(&report.daemon);
    if report.pending > 0 && report.remote_root.is_some() {
        println!("Run 'chama sync' to push pending changes.");
    }
}

fn print_daemon_line(daemon: &Value) {
    if daemon["running"] != Value::Bool(true) {
        println!("Daemon: {}", "stopped".bright_black());
        return;
    }
    let last_push = match daemon["last_push_at_unix"].as_u64() {
        Some(0) | None => "never".to_string(),
        Some(at) => {
            let now = std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(at);
            format!("{} ago", format_seconds(now.saturating_sub(at)))
        }
    };
    let session = if daemon["pull_session_live"] == Value::Bool(true) {
        "live".green().to_string()
    } else {
        "down".yellow().to_string()
    };
    println!(
        "Daemon: {} | last push {} | pull session {}",
        "running".green(),
        last_push,
        session,
    );
}
