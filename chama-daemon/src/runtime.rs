use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::os::unix::net::UnixStream as StdUnixStream;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use notify::{recommended_watcher, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc, oneshot, RwLock};
use tokio::time::Instant;

use chama_core::types::Collection;
use chama_core::{settings, FileStore, RosterFile, Settings};
use chama_ledger::Ledger;
use chama_sync::pull::PullCounters;
use chama_sync::{backlog, pipeline, DirRemote, PullHook, SyncMode, SyncSession, SyncSummary};

use crate::error::{io_err, DaemonError};
use crate::paths::{run_dir, socket_path, store_root_at, DEBOUNCE_WINDOW};
use crate::protocol::{DaemonRequest, DaemonResponse};

/// How often the pull session's counters are copied into [`DaemonState`].
const PULL_STATS_REFRESH: Duration = Duration::from_secs(1);

struct SyncJob {
    mode: SyncMode,
    source: &'static str,
    respond_to: oneshot::Sender<Result<JobSummary, String>>,
}

/// One finished sync job as reported over the socket.
#[derive(Debug, Clone, Serialize)]
pub struct JobSummary {
    pub source: String,
    pub mode: String,
    #[serde(flatten)]
    pub sync: SyncSummary,
}

/// Mutable view of the daemon shared by its tasks.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DaemonState {
    pub last_push_at_unix: u64,
    pub last_job: Option<JobSummary>,
    pub pull_session_live: bool,
    pub pull: PullCounters,
}

type SharedState = Arc<RwLock<DaemonState>>;

/// Everything the tasks share; cloned into each one.
#[derive(Clone)]
struct Context {
    home: PathBuf,
    settings: Settings,
    store: Arc<FileStore>,
    ledger: Arc<Ledger<FileStore, RosterFile>>,
    remote: Option<Arc<DirRemote>>,
    state: SharedState,
    started_at_unix: u64,
}

impl Context {
    fn load(home: PathBuf) -> Result<Self, DaemonError> {
        let settings = settings::load_at(&home)?;
        let store = Arc::new(FileStore::open_at(&home)?);
        ensure_collection_dirs(store.root())?;
        let ledger = Arc::new(Ledger::with_settings(
            Arc::clone(&store),
            Arc::new(RosterFile::at(&home)),
            &settings,
        ));
        let remote = settings
            .remote_root
            .as_ref()
            .map(|root| Arc::new(DirRemote::new(root.clone())));
        Ok(Self {
            home,
            settings,
            store,
            ledger,
            remote,
            state: Arc::new(RwLock::new(DaemonState::default())),
            started_at_unix: unix_seconds_now(),
        })
    }

    fn remote_timeout(&self) -> Duration {
        Duration::from_millis(self.settings.remote_timeout_ms)
    }

    fn push_interval(&self) -> Duration {
        Duration::from_secs(self.settings.push_interval_secs.max(1))
    }
}

/// Start the daemon runtime and block the current thread until it exits.
pub fn start_blocking(home: &Path) -> Result<(), DaemonError> {
    ensure_runtime_dirs(home)?;
    crate::logging::init_tracing(home);
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(run(home.to_path_buf()))
}

/// Run the daemon runtime.
pub async fn run(home: PathBuf) -> Result<(), DaemonError> {
    ensure_runtime_dirs(&home)?;
    let ctx = Context::load(home)?;
    tracing::info!(
        device = %ctx.settings.device_id,
        remote = ?ctx.settings.remote_root,
        "daemon starting",
    );

    let (sync_tx, sync_rx) = mpsc::channel::<SyncJob>(64);
    let (shutdown_tx, _) = broadcast::channel::<()>(16);

    let watcher_handle = {
        let shutdown = shutdown_tx.clone();
        let ctx = ctx.clone();
        let sync_tx = sync_tx.clone();
        tokio::spawn(async move {
            let result = watcher_task(ctx, sync_tx, shutdown.subscribe()).await;
            let _ = shutdown.send(());
            result
        })
    };

    let processor_handle = {
        let shutdown = shutdown_tx.clone();
        let ctx = ctx.clone();
        tokio::spawn(async move {
            let result = sync_processor_task(ctx, sync_rx, shutdown.subscribe()).await;
            let _ = shutdown.send(());
            result
        })
    };

    let pull_handle = {
        let shutdown = shutdown_tx.clone();
        let ctx = ctx.clone();
        tokio::spawn(async move {
            let result = pull_session_task(ctx, shutdown.subscribe()).await;
            let _ = shutdown.send(());
            result
        })
    };

    let socket_handle = {
        let shutdown = shutdown_tx.clone();
        let ctx = ctx.clone();
        let sync_tx = sync_tx.clone();
        tokio::spawn(async move {
            let result =
                socket_server_task(ctx, sync_tx, shutdown.clone(), shutdown.subscribe()).await;
            let _ = shutdown.send(());
            result
        })
    };

    let rotation_handle = {
        let shutdown = shutdown_tx.clone();
        let home = ctx.home.clone();
        tokio::spawn(async move {
            let result = log_rotation_task(home, shutdown.subscribe()).await;
            let _ = shutdown.send(());
            result
        })
    };

    let signal_handle = {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            let mut shutdown_rx = shutdown.subscribe();
            tokio::select! {
                _ = shutdown_rx.recv() => Ok(()),
                signal = tokio::signal::ctrl_c() => {
                    match signal {
                        Ok(()) => {
                            tracing::info!("received ctrl-c, shutting down daemon");
                            let _ = shutdown.send(());
                            Ok(())
                        }
                        Err(err) => Err(DaemonError::Protocol(format!("ctrl-c handler failed: {err}"))),
                    }
                }
            }
        })
    };

    let (
        watcher_result,
        processor_result,
        pull_result,
        socket_result,
        rotation_result,
        signal_result,
    ) = tokio::join!(
        watcher_handle,
        processor_handle,
        pull_handle,
        socket_handle,
        rotation_handle,
        signal_handle
    );

    handle_join("watcher", watcher_result)?;
    handle_join("sync_processor", processor_result)?;
    handle_join("pull_session", pull_result)?;
    handle_join("socket_server", socket_result)?;
    handle_join("log_rotation", rotation_result)?;
    handle_join("signal_handler", signal_result)?;
    tracing::info!("daemon stopped");
    Ok(())
}

/// Queue a push whenever an entity file in the local store changes.
async fn watcher_task(
    ctx: Context,
    sync_tx: mpsc::Sender<SyncJob>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    if ctx.remote.is_none() {
        tracing::warn!("no remote configured; store changes will stay local");
        let _ = shutdown_rx.recv().await;
        return Ok(());
    }

    let store_root = store_root_at(&ctx.home);
    // Event paths arrive canonicalized on some platforms.
    let store_root = fs::canonicalize(&store_root).unwrap_or(store_root);

    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<notify::Result<Event>>();
    let mut watcher: RecommendedWatcher = recommended_watcher(move |event| {
        let _ = event_tx.send(event);
    })?;
    watcher.watch(&store_root, RecursiveMode::Recursive)?;
    tracing::debug!(path = %store_root.display(), "watching local store");

    let mut debounce = HashMap::<PathBuf, Instant>::new();

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            event = event_rx.recv() => {
                let Some(event) = event else { break };
                let event = match event {
                    Ok(event) => event,
                    Err(err) => {
                        tracing::warn!(error = %err, "watcher event error");
                        continue;
                    }
                };
                if !is_relevant_event_kind(&event.kind) {
                    continue;
                }

                let now = Instant::now();
                let mut triggered = false;
                for path in &event.paths {
                    if is_store_yaml(path, &store_root) && should_process_event(&mut debounce, path, now) {
                        triggered = true;
                    }
                }
                if !triggered {
                    continue;
                }

                match enqueue_sync(&sync_tx, SyncMode::PushOnly, "watcher").await {
                    Ok(summary) => {
                        tracing::info!(
                            pushed = summary.sync.pushed,
                            superseded = summary.sync.superseded,
                            failed = summary.sync.failed.len(),
                            duration_ms = summary.sync.duration_ms,
                            "watcher-triggered push completed",
                        );
                    }
                    Err(err) => {
                        tracing::error!(error = %err, "watcher-triggered push failed");
                    }
                }
            }
        }
    }

    Ok(())
}

/// Runs queued sync jobs one at a time, plus a periodic push of the backlog.
async fn sync_processor_task(
    ctx: Context,
    mut sync_rx: mpsc::Receiver<SyncJob>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    // The watcher and the pull session cover startup; the timer starts one period in.
    let period = ctx.push_interval();
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = interval.tick() => {
                if ctx.remote.is_none() {
                    continue;
                }
                match run_job(&ctx, SyncMode::PushOnly, "timer").await {
                    Ok(summary) if summary.sync.pushed > 0 || !summary.sync.failed.is_empty() => {
                        tracing::info!(
                            pushed = summary.sync.pushed,
                            failed = summary.sync.failed.len(),
                            "periodic push completed",
                        );
                    }
                    Ok(_) => {}
                    Err(err) => tracing::warn!(error = %err, "periodic push failed"),
                }
            }
            maybe_job = sync_rx.recv() => {
                let Some(job) = maybe_job else { break };
                let outcome = run_job(&ctx, job.mode, job.source)
                    .await
                    .map_err(|err| err.to_string());
                let _ = job.respond_to.send(outcome);
            }
        }
    }

    Ok(())
}

async fn run_job(
    ctx: &Context,
    mode: SyncMode,
    source: &'static str,
) -> Result<JobSummary, DaemonError> {
    let remote = ctx.remote.as_ref().ok_or(DaemonError::NoRemote)?;
    let sync = pipeline::run_with(
        &*ctx.store,
        &**remote,
        &*ctx.ledger,
        mode,
        ctx.remote_timeout(),
    ).await?;
    let summary = JobSummary {
        source: source.to_string(),
        mode: mode_label(mode).to_string(),
        sync,
    };

    let mut state = ctx.state.write().await;
    if mode != SyncMode::PullOnly {
        state.last_push_at_unix = unix_seconds_now();
    }
    state.last_job = Some(summary.clone());
    Ok(summary)
}

/// Keep one pull session open for the daemon's lifetime.
///
/// Starting the session needs the remote; until it is reachable the start is
/// retried on the push interval.
async fn pull_session_task(
    ctx: Context,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let Some(remote) = ctx.remote.clone() else {
        let _ = shutdown_rx.recv().await;
        return Ok(());
    };

    let mut retry = tokio::time::interval(ctx.push_interval());
    retry.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let session = loop {
        tokio::select! {
            _ = shutdown_rx.recv() => return Ok(()),
            _ = retry.tick() => {
                let hook: Arc<dyn PullHook> = ctx.ledger.clone();
                match SyncSession::start_with(Arc::clone(&ctx.store), Arc::clone(&remote), hook, &Collection::all()).await {
                    Ok(session) => break session,
                    Err(err) => tracing::warn!(error = %err, "pull session could not start; retrying"),
                }
            }
        }
    };

    let mut refresh = tokio::time::interval(PULL_STATS_REFRESH);
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = refresh.tick() => {
                let mut state = ctx.state.write().await;
                state.pull = session.stats();
                state.pull_session_live = !session.collections().is_empty();
            }
        }
    }

    session.teardown().await;
    ctx.state.write().await.pull_session_live = false;
    Ok(())
}

async fn socket_server_task(
    ctx: Context,
    sync_tx: mpsc::Sender<SyncJob>,
    shutdown_tx: broadcast::Sender<()>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let run = run_dir(&ctx.home);
    if !run.exists() {
        fs::create_dir_all(&run).map_err(|e| io_err(&run, e))?;
    }

    let socket = socket_path(&ctx.home);
    prepare_socket_for_bind(&socket)?;

    let listener = UnixListener::bind(&socket).map_err(|e| io_err(&socket, e))?;
    set_socket_permissions(&socket)?;
    tracing::info!(socket = %socket.display(), "daemon socket listening");

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            accepted = listener.accept() => {
                let (stream, _) = accepted.map_err(|e| io_err(&socket, e))?;
                let ctx = ctx.clone();
                let sync_tx = sync_tx.clone();
                let shutdown_tx = shutdown_tx.clone();
                tokio::spawn(async move {
                    if let Err(err) = handle_socket_client(stream, ctx, sync_tx, shutdown_tx).await {
                        tracing::error!(error = %err, "socket client error");
                    }
                });
            }
        }
    }

    if socket.exists() {
        let _ = fs::remove_file(&socket);
    }
    Ok(())
}

async fn handle_socket_client(
    stream: UnixStream,
    ctx: Context,
    sync_tx: mpsc::Sender<SyncJob>,
    shutdown_tx: broadcast::Sender<()>,
) -> Result<(), DaemonError> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| io_err("daemon socket read", e))?
    {
        if line.trim().is_empty() {
            continue;
        }

        let request: DaemonRequest = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(err) => {
                write_response(
                    &mut writer,
                    &DaemonResponse::error(format!("invalid request JSON: {err}")),
                )
                .await?;
                continue;
            }
        };

        let response = match request.cmd.as_str() {
            "status" => match build_status_payload(&ctx).await {
                Ok(payload) => DaemonResponse::ok(payload),
                Err(err) => DaemonResponse::error(err.to_string()),
            },
            "sync" => {
                let mode = SyncMode::from(request.direction.unwrap_or_default());
                match enqueue_sync(&sync_tx, mode, "socket").await {
                    Ok(summary) => DaemonResponse::ok(json!(summary)),
                    Err(err) => DaemonResponse::error(err.to_string()),
                }
            }
            "stop" => {
                let _ = shutdown_tx.send(());
                DaemonResponse::ok(json!({ "stopping": true }))
            }
            other => DaemonResponse::error(format!("unknown command '{other}'")),
        };

        write_response(&mut writer, &response).await?;
        if request.cmd == "stop" {
            break;
        }
    }

    Ok(())
}

async fn build_status_payload(ctx: &Context) -> Result<Value, DaemonError> {
    let backlog = backlog::scan(&*ctx.store)?;
    let pending = backlog::pending_total(&backlog);
    let state = ctx.state.read().await.clone();

    Ok(json!({
        "running": true,
        "device_id": ctx.settings.device_id,
        "started_at_unix": ctx.started_at_unix,
        "last_push_at_unix": state.last_push_at_unix,
        "remote_root": ctx.settings.remote_root.as_ref().map(|p| p.display().to_string()),
        "pending": pending,
        "backlog": backlog,
        "pull_session_live": state.pull_session_live,
        "pull": state.pull,
        "last_job": state.last_job,
        "socket": socket_path(&ctx.home).display().to_string(),
    }))
}

async fn enqueue_sync(
    sync_tx: &mpsc::Sender<SyncJob>,
    mode: SyncMode,
    source: &'static str,
) -> Result<JobSummary, DaemonError> {
    let (tx, rx) = oneshot::channel();
    sync_tx
        .send(SyncJob {
            mode,
            source,
            respond_to: tx,
        })
        .await
        .map_err(|_| DaemonError::ChannelClosed("sync queue"))?;

    let outcome = rx
        .await
        .map_err(|_| DaemonError::ChannelClosed("sync response"))?;
    outcome.map_err(DaemonError::Protocol)
}

async fn log_rotation_task(
    home: PathBuf,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let mut interval = tokio::time::interval(Duration::from_secs(5));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    // First tick fires immediately; nothing to rotate at startup.
    interval.tick().await;

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = interval.tick() => {
                let home = home.clone();
                tokio::task::spawn_blocking(move || {
                    crate::log_rotation::rotate_logs(&home);
                })
                .await
                .ok();
            }
        }
    }
    Ok(())
}

fn mode_label(mode: SyncMode) -> &'static str {
    match mode {
        SyncMode::Both => "both",
        SyncMode::PushOnly => "push",
        SyncMode::PullOnly => "pull",
    }
}

fn is_relevant_event_kind(kind: &EventKind) -> bool {
    matches!(kind, EventKind::Create(_) | EventKind::Modify(_))
}

/// Entity files only; `.yaml.tmp` siblings from in-flight writes are skipped.
fn is_store_yaml(path: &Path, store_root: &Path) -> bool {
    path.starts_with(store_root)
        && path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.eq_ignore_ascii_case("yaml"))
            .unwrap_or(false)
}

fn prepare_socket_for_bind(socket: &Path) -> Result<(), DaemonError> {
    if !socket.exists() {
        return Ok(());
    }

    match StdUnixStream::connect(socket) {
        Ok(_) => {
            return Err(DaemonError::Protocol(format!(
                "daemon socket already in use: {}",
                socket.display()
            )));
        }
        Err(err) => {
            tracing::warn!(
                socket = %socket.display(),
                error = %err,
                "removing stale daemon socket before bind",
            );
        }
    }

    match fs::remove_file(socket) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(io_err(socket, err)),
    }
}

fn should_process_event(
    debounce: &mut HashMap<PathBuf, Instant>,
    path: &Path,
    now: Instant,
) -> bool {
    should_process_event_with_threshold(debounce, path, now, DEBOUNCE_WINDOW)
}

fn should_process_event_with_threshold(
    debounce: &mut HashMap<PathBuf, Instant>,
    path: &Path,
    now: Instant,
    threshold: Duration,
) -> bool {
    debounce.retain(|_, seen_at| now.duration_since(*seen_at) <= Duration::from_secs(30));
    match debounce.get(path) {
        Some(last_seen) if now.duration_since(*last_seen) < threshold => false,
        _ => {
            debounce.insert(path.to_path_buf(), now);
            true
        }
    }
}

fn ensure_runtime_dirs(home: &Path) -> Result<(), DaemonError> {
    for dir in [run_dir(home), crate::paths::logs_dir(home)] {
        if !dir.exists() {
            fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;
        }
    }
    Ok(())
}

/// Collection directories exist before the watcher starts, so the first
/// entity written to a collection is never missed.
fn ensure_collection_dirs(store_root: &Path) -> Result<(), DaemonError> {
    use std::os::unix::fs::PermissionsExt;

    for collection in Collection::all() {
        let dir = store_root.join(collection.name());
        if !dir.exists() {
            fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;
            fs::set_permissions(&dir, fs::Permissions::from_mode(0o700))
                .map_err(|e| io_err(&dir, e))?;
        }
    }
    Ok(())
}

async fn write_response(
    writer: &mut OwnedWriteHalf,
    response: &DaemonResponse,
) -> Result<(), DaemonError> {
    let mut payload = serde_json::to_string(response)?;
    payload.push('\n');
    writer
        .write_all(payload.as_bytes())
        .await
        .map_err(|e| io_err("daemon socket write", e))?;
    writer
        .flush()
        .await
        .map_err(|e| io_err("daemon socket flush", e))?;
    Ok(())
}

fn handle_join(
    task: &str,
    result: Result<Result<(), DaemonError>, tokio::task::JoinError>,
) -> Result<(), DaemonError> {
    match result {
        Ok(inner) => inner,
        Err(err) => Err(DaemonError::Protocol(format!(
            "{task} task join failure: {err}"
        ))),
    }
}

fn unix_seconds_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(unix)]
fn set_socket_permissions(path: &Path) -> Result<(), DaemonError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(|e| io_err(path, e))
}

#[cfg(not(unix))]
fn set_socket_permissions(_path: &Path) -> Result<(), DaemonError> {
    Ok(())
}
