//! `chama init [--device-id <id>] [--remote-root <dir>]`

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use uuid::Uuid;

use chama_core::{roster, settings, FileStore};

use super::home_dir;

/// Create ~/.chama and write this device's config.
#[derive(Args, Debug)]
pub struct InitArgs {
    /// Name for this device in logs and status output. Defaults to a
    /// random id on first init; kept on re-init.
    #[arg(long)]
    pub device_id: Option<String>,

    /// Shared directory acting as the remote store.
    #[arg(long, value_name = "DIR")]
    pub remote_root: Option<PathBuf>,
}

impl InitArgs {
    pub fn run(self) -> Result<()> {
        let home = home_dir()?;
        let config_path = settings::settings_path_at(&home);
        let first_init = !config_path.exists();

        let mut config = settings::load_at(&home).context("failed to read config.yaml")?;
        match self.device_id {
            Some(id) => config.device_id = id,
            None if first_init => config.device_id = Uuid::new_v4().to_string(),
            None => {}
        }
        if let Some(root) = self.remote_root {
            let root = if root.is_absolute() {
                root
            } else {
                std::env::current_dir()
                    .context("cannot resolve current directory")?
                    .join(root)
            };
            std::fs::create_dir_all(&root)
                .with_context(|| format!("cannot create remote root '{}'", root.display()))?;
            config.remote_root = Some(root);
        }
        settings::save_at(&home, &config).context("failed to write config.yaml")?;

        let store = FileStore::open_at(&home).context("failed to create local store")?;
        let roster_path = roster::roster_path_at(&home);
        if !roster_path.exists() {
            roster::save_at(&home, &Default::default()).context("failed to write members.yaml")?;
        }

        let verb = if first_init { "Initialized" } else { "Updated" };
        println!("✓ {verb} device '{}'", config.device_id);
        println!("  Config: {}", config_path.display());
        println!("  Store:  {}", store.root().display());
        match &config.remote_root {
            Some(root) => println!("  Remote: {}", root.display()),
            None => println!("  Remote: none (sync stays local until --remote-root is set)"),
        }
        Ok(())
    }
}
