use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread::sleep;
use std::time::{Duration, Instant};

use serde_json::Value;
use tempfile::TempDir;

fn chama_bin_path() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_chama"))
}

fn chama(binary: &Path, home: &Path, args: &[&str]) -> std::process::Output {
    Command::new(binary)
        .env("HOME", home)
        .env("USERPROFILE", home)
        .args(args)
        .output()
        .expect("run chama")
}

struct DaemonProcess {
    child: Child,
    binary: PathBuf,
    home: PathBuf,
}

impl DaemonProcess {
    fn start(binary: PathBuf, home: PathBuf) -> Self {
        let child = Command::new(&binary)
            .env("HOME", &home)
            .env("USERPROFILE", &home)
            .args(["daemon", "start"])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .expect("spawn daemon");

        Self {
            child,
            binary,
            home,
        }
    }

    fn stop(&mut self) {
        let _ = chama(&self.binary, &self.home, &["daemon", "stop"]);

        let deadline = Instant::now() + Duration::from_secs(3);
        while Instant::now() < deadline {
            if let Ok(Some(_)) = self.child.try_wait() {
                return;
            }
            sleep(Duration::from_millis(50));
        }

        let _ = self.child.kill();
        let _ = self.child.wait();
    }

    fn exited(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(Some(_)))
    }
}

impl Drop for DaemonProcess {
    fn drop(&mut self) {
        self.stop();
    }
}

fn daemon_status(binary: &Path, home: &Path) -> Option<Value> {
    let output = chama(binary, home, &["daemon", "status"]);
    if !output.status.success() {
        return None;
    }
    serde_json::from_slice(&output.stdout).ok()
}

fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        sleep(Duration::from_millis(100));
    }
    false
}

fn remote_documents(remote: &Path, collection: &str) -> usize {
    std::fs::read_dir(remote.join(collection))
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .filter(|e| e.path().extension().and_then(|x| x.to_str()) == Some("json"))
                .count()
        })
        .unwrap_or(0)
}

#[test]
fn store_change_is_pushed_by_running_daemon() {
    let home = TempDir::new().expect("home");
    let remote = TempDir::new().expect("remote");
    let binary = chama_bin_path();
    let remote_arg = remote.path().to_str().expect("utf8 path");

    assert!(chama(&binary, home.path(), &["init", "--device-id", "tablet", "--remote-root", remote_arg])
        .status
        .success());
    assert!(chama(&binary, home.path(), &["member", "add", "njeri", "--role", "treasurer"])
        .status
        .success());

    let mut daemon = DaemonProcess::start(binary.clone(), home.path().to_path_buf());
    assert!(
        wait_until(Duration::from_secs(5), || {
            daemon_status(&binary, home.path())
                .map(|s| s["running"] == Value::Bool(true))
                .unwrap_or(false)
        }),
        "daemon did not report running state in time",
    );
    let status = daemon_status(&binary, home.path()).expect("status");
    assert_eq!(status["device_id"], "tablet");

    let created = chama(
        &binary,
        home.path(),
        &["record", "create", "--kind", "investment", "--amount", "90000", "--by", "njeri"],
    );
    assert!(
        created.status.success(),
        "create failed: {}",
        String::from_utf8_lossy(&created.stderr)
    );

    assert!(
        wait_until(Duration::from_secs(10), || remote_documents(remote.path(), "investments") == 1),
        "daemon did not push the new record within timeout",
    );

    let synced = chama(&binary, home.path(), &["sync"]);
    assert!(
        synced.status.success(),
        "sync via daemon failed: {}",
        String::from_utf8_lossy(&synced.stderr)
    );
    assert!(String::from_utf8_lossy(&synced.stdout).contains("(daemon)"));

    daemon.stop();
    assert!(daemon.exited(), "daemon should exit after stop");
    assert!(!home.path().join(".chama/run/daemon.sock").exists());
}

#[test]
fn status_without_daemon_reports_not_running() {
    let home = TempDir::new().expect("home");
    let status = daemon_status(&chama_bin_path(), home.path()).expect("status JSON");
    assert_eq!(status["running"], Value::Bool(false));
}
