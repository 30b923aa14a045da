pub mod approval;
pub mod daemon;
pub mod init;
pub mod member;
pub mod record;
pub mod status;
pub mod sync;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};

use chama_core::types::{Collection, EntityKind, FinancialRecord, ProvisionalId};
use chama_core::{settings, FileStore, LocalStore, RosterFile};
use chama_ledger::{Ledger, LedgerError};

pub type FileLedger = Ledger<FileStore, RosterFile>;

pub fn home_dir() -> Result<PathBuf> {
    dirs::home_dir().context("could not determine home directory")
}

/// Ledger over `~/.chama/store` with the roster file as membership source.
pub fn open_ledger() -> Result<FileLedger> {
    let home = home_dir()?;
    let settings = settings::load_at(&home).context("failed to read config.yaml")?;
    let store = FileStore::open_at(&home).context("failed to open local store")?;
    Ok(Ledger::with_settings(
        Arc::new(store),
        Arc::new(RosterFile::at(&home)),
        &settings,
    ))
}

/// Accept either a provisional id or an issued canonical code (`BR0008`).
pub fn resolve_record(ledger: &FileLedger, id: &str) -> Result<FinancialRecord> {
    match ledger.find_record(&ProvisionalId::from(id)) {
        Ok(record) => return Ok(record),
        Err(LedgerError::NotFound(_)) => {}
        Err(err) => return Err(err.into()),
    }
    for kind in EntityKind::all() {
        if let Some(record) = ledger
            .store()
            .find_by_canonical::<FinancialRecord>(Collection::Records(*kind), id)?
        {
            return Ok(record);
        }
    }
    bail!("no record with id '{id}'")
}
