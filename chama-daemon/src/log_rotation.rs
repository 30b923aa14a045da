//! Size-based rotation of the daemon log files.
//!
//! `daemon.log` → `daemon.log.1` → … → `daemon.log.<keep>`; the oldest copy
//! is dropped. The live file is recreated empty so appenders keep working.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RotationPolicy {
    pub max_bytes: u64,
    pub keep: usize,
}

impl Default for RotationPolicy {
    /// 10 MiB, five copies.
    fn default() -> Self {
        Self {
            max_bytes: 10 * 1024 * 1024,
            keep: 5,
        }
    }
}

impl RotationPolicy {
    /// Rotate `log` if it has reached `max_bytes`.
    ///
    /// Returns whether a rotation happened. A missing file is not an error.
    pub fn rotate_if_needed(&self, log: &Path) -> io::Result<bool> {
        let size = match fs::metadata(log) {
            Ok(meta) => meta.len(),
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(false),
            Err(err) => return Err(err),
        };
        if size < self.max_bytes || self.keep == 0 {
            return Ok(false);
        }

        let oldest = numbered_path(log, self.keep);
        if oldest.exists() {
            fs::remove_file(&oldest)?;
        }
        for n in (1..self.keep).rev() {
            let from = numbered_path(log, n);
            if from.exists() {
                fs::rename(&from, numbered_path(log, n + 1))?;
            }
        }
        fs::rename(log, numbered_path(log, 1))?;
        fs::File::create(log)?;
        Ok(true)
    }
}

/// Rotate both daemon logs under `home`; failures are logged per file.
pub fn rotate_logs(home: &Path) {
    let policy = RotationPolicy::default();
    for log in [
        crate::paths::stdout_log_path(home),
        crate::paths::stderr_log_path(home),
    ] {
        match policy.rotate_if_needed(&log) {
            Ok(true) => tracing::info!(path = %log.display(), "log file rotated"),
            Ok(false) => {}
            Err(err) => tracing::warn!(path = %log.display(), error = %err, "log rotation failed"),
        }
    }
}

/// `daemon.log` + 2 → `daemon.log.2`.
fn numbered_path(base: &Path, n: usize) -> PathBuf {
    let name = base
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("daemon.log");
    base.with_file_name(format!("{name}.{n}"))
}
