//! Device settings at `<home>/.chama/config.yaml`.
//!
//! Missing file or missing keys fall back to [`Settings::default`].

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::store::{chama_root, home, set_file_permissions};

/// What a second vote from the same member means.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RevotePolicy {
    /// The latest vote replaces the earlier one.
    #[default]
    Overwrite,
    /// The first vote stands; later votes are rejected.
    FirstFinal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Identifies this device in logs and status output.
    pub device_id: String,
    /// Root of the shared directory remote, if configured.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_root: Option<PathBuf>,
    pub push_interval_secs: u64,
    pub remote_timeout_ms: u64,
    pub id_allocation_attempts: u32,
    pub revote_policy: RevotePolicy,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            device_id: "local".to_string(),
            remote_root: None,
            push_interval_secs: 30,
            remote_timeout_ms: 5_000,
            id_allocation_attempts: 5,
            revote_policy: RevotePolicy::Overwrite,
        }
    }
}

/// `<home>/.chama/config.yaml` — pure, no I/O.
pub fn settings_path_at(home: &Path) -> PathBuf {
    chama_root(home).join("config.yaml")
}

pub fn load_at(home: &Path) -> Result<Settings, StoreError> {
    let path = settings_path_at(home);
    if !path.exists() {
        return Ok(Settings::default());
    }
    let contents = std::fs::read_to_string(&path)?;
    serde_yaml::from_str(&contents).map_err(|e| StoreError::Parse { path, source: e })
}

/// `load_at` convenience wrapper.
pub fn load() -> Result<Settings, StoreError> {
    load_at(&home()?)
}

pub fn save_at(home: &Path, settings: &Settings) -> Result<(), StoreError> {
    let path = settings_path_at(home);
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    let tmp = path.with_file_name("config.yaml.tmp");
    std::fs::write(&tmp, serde_yaml::to_string(settings)?)?;
    set_file_permissions(&tmp)?;
    std::fs::rename(&tmp, &path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn defaults_when_missing() {
        let home = TempDir::new().unwrap();
        assert_eq!(load_at(home.path()).unwrap(), Settings::default());
    }

    #[test]
    fn partial_file_keeps_defaults_for_missing_keys() {
        let home = TempDir::new().unwrap();
        let path = settings_path_at(home.path());
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "device_id: phone-a\nrevote_policy: first_final\n").unwrap();

        let settings = load_at(home.path()).unwrap();
        assert_eq!(settings.device_id, "phone-a");
        assert_eq!(settings.revote_policy, RevotePolicy::FirstFinal);
        assert_eq!(settings.push_interval_secs, 30);
        assert_eq!(settings.id_allocation_attempts, 5);
    }

    #[test]
    fn save_load_roundtrip() {
        let home = TempDir::new().unwrap();
        let settings = Settings {
            device_id: "tablet".into(),
            remote_root: Some(PathBuf::from("/mnt/shared/chama")),
            ..Settings::default()
        };
        save_at(home.path(), &settings).unwrap();
        assert_eq!(load_at(home.path()).unwrap(), settings);
    }
}
