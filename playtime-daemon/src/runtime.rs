use std::fs;
use std::io::{ErrorKind, Write};
use std::os::unix::net::UnixStream as StdUnixStream;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::runtime::Handle;
use tokio::sync::broadcast;

use playtime_core::{Config, FileCredentialStore, GameId, SqliteRepository};
use playtime_monitor::{FallbackEnumerator, MonitorError, MonitorSettings, ProcessMonitor, SyncTrigger};
use playtime_sync::{DefaultConnector, S3Options, SyncEngine};

use crate::error::{io_err, DaemonError};
use crate::paths::{log_path, logs_dir, socket_path};
use crate::protocol::{DaemonRequest, DaemonResponse};

/// The services one daemon process hosts, and the request dispatcher.
pub struct Daemon {
    data_dir: PathBuf,
    monitor: ProcessMonitor,
    engine: Arc<SyncEngine>,
    credential_key: String,
    started_at: DateTime<Utc>,
}

impl Daemon {
    pub fn new(
        data_dir: impl Into<PathBuf>,
        monitor: ProcessMonitor,
        engine: Arc<SyncEngine>,
        credential_key: impl Into<String>,
    ) -> Self {
        Self {
            data_dir: data_dir.into(),
            monitor,
            engine,
            credential_key: credential_key.into(),
            started_at: Utc::now(),
        }
    }

    /// Wire up the production services from `config`. Must run inside a
    /// tokio runtime: post-session syncs are spawned on it.
    pub fn open(data_dir: &Path, config: &Config) -> Result<Self, DaemonError> {
        let repo = Arc::new(SqliteRepository::new(config.db_path(data_dir))?);
        let engine = Arc::new(SyncEngine::new(
            repo.clone(),
            Arc::new(FileCredentialStore::in_dir(data_dir)),
            Arc::new(DefaultConnector::new(S3Options::from_config(&config.cloud))),
            data_dir,
            config.metadata_key(),
        ));
        engine.set_offline_mode(config.cloud.offline);

        let monitor = ProcessMonitor::new(
            repo,
            FallbackEnumerator::system(config.monitor.enumeration_timeout()),
            MonitorSettings::from(&config.monitor),
        );
        if config.cloud.sync_after_session {
            let runtime = Handle::try_current().map_err(|err| {
                DaemonError::Protocol(format!("daemon must run inside a tokio runtime: {err}"))
            })?;
            monitor.set_sync_trigger(Arc::new(DetachedSync {
                engine: engine.clone(),
                credential_key: config.credential_key().to_string(),
                runtime,
            }));
        }
        Ok(Self::new(data_dir, monitor, engine, config.credential_key()))
    }

    pub fn monitor(&self) -> &ProcessMonitor {
        &self.monitor
    }

    pub async fn handle(&self, request: &DaemonRequest) -> DaemonResponse {
        match self.dispatch(request).await {
            Ok(data) => DaemonResponse::ok(data),
            Err(response) => response,
        }
    }

    async fn dispatch(&self, request: &DaemonRequest) -> Result<Value, DaemonResponse> {
        match request.cmd.as_str() {
            "status" => Ok(self.status_payload()),
            "processes" => Ok(json!(self.monitor.get_process_snapshot().await)),
            "pause" => {
                let id = game_arg(request)?;
                let paused = self.monitor.pause_session(&id);
                Ok(json!({ "gameId": id, "paused": paused }))
            }
            "resume" => {
                let id = game_arg(request)?;
                let resumed = self.monitor.resume_session(&id).await;
                Ok(json!({ "gameId": id, "resumed": resumed }))
            }
            "end" => {
                let id = game_arg(request)?;
                let ended = self.monitor.end_session(&id).await;
                Ok(json!({ "gameId": id, "ended": ended }))
            }
            "arm" => {
                let id = game_arg(request)?;
                match self.monitor.arm_game(&id).await {
                    Ok(armed) => Ok(json!({ "gameId": id, "armed": armed })),
                    Err(err) => Err(monitor_failure(&err)),
                }
            }
            "auto_detect" => {
                let enabled = enabled_arg(request)?;
                self.monitor.update_auto_detection(enabled).await;
                Ok(json!({ "autoDetection": enabled }))
            }
            "offline" => {
                let enabled = enabled_arg(request)?;
                self.engine.set_offline_mode(enabled);
                Ok(json!({ "offline": enabled }))
            }
            "sync" => self.sync(request.game.clone()).await,
            "stop" => Ok(json!({ "stopping": true })),
            other => Err(DaemonResponse::error(format!("unknown command '{other}'"))),
        }
    }

    fn status_payload(&self) -> Value {
        json!({
            "running": true,
            "pid": std::process::id(),
            "startedAt": self.started_at,
            "dataDir": self.data_dir.display().to_string(),
            "monitoring": self.monitor.is_monitoring(),
            "autoDetection": self.monitor.auto_detection(),
            "offline": self.engine.is_offline(),
            "games": self.monitor.get_status(),
        })
    }

    async fn sync(&self, game: Option<String>) -> Result<Value, DaemonResponse> {
        let engine = self.engine.clone();
        let key = self.credential_key.clone();
        let joined = tokio::task::spawn_blocking(move || match game {
            Some(id) => engine.sync_game(&key, &GameId::from(id)),
            None => engine.sync_all(&key),
        })
        .await;
        match joined {
            Ok(Ok(summary)) => Ok(json!(summary)),
            Ok(Err(err)) => {
                tracing::warn!(error = %err, detail = err.detail(), "sync request failed");
                Err(DaemonResponse::failure(err.message(), err.detail()))
            }
            Err(err) => Err(DaemonResponse::error(format!("sync task failed: {err}"))),
        }
    }
}

fn game_arg(request: &DaemonRequest) -> Result<GameId, DaemonResponse> {
    match request.game.as_deref().map(str::trim) {
        Some(id) if !id.is_empty() => Ok(GameId::from(id)),
        _ => Err(DaemonResponse::failure(
            format!("'{}' requires a game id", request.cmd),
            "invalid-argument",
        )),
    }
}

fn enabled_arg(request: &DaemonRequest) -> Result<bool, DaemonResponse> {
    request.enabled.ok_or_else(|| {
        DaemonResponse::failure(
            format!("'{}' requires 'enabled'", request.cmd),
            "invalid-argument",
        )
    })
}

fn monitor_failure(err: &MonitorError) -> DaemonResponse {
    let detail = match err {
        MonitorError::Repository(_) | MonitorError::Join(_) => "local-store",
        MonitorError::UnknownGame(_) | MonitorError::Unconfigured(_) => "invalid-argument",
    };
    DaemonResponse::failure(err.to_string(), detail)
}

/// Runs a single-game sync on the blocking pool after each recorded session.
/// Failures are only logged.
struct DetachedSync {
    engine: Arc<SyncEngine>,
    credential_key: String,
    runtime: Handle,
}

impl SyncTrigger for DetachedSync {
    fn session_recorded(&self, game_id: &GameId) {
        if self.engine.is_offline() {
            tracing::debug!(game_id = %game_id, "offline; skipping post-session sync");
            return;
        }
        let engine = self.engine.clone();
        let key = self.credential_key.clone();
        let game_id = game_id.clone();
        self.runtime.spawn_blocking(move || match engine.sync_game(&key, &game_id) {
            Ok(summary) => tracing::info!(
                game_id = %game_id,
                uploaded = summary.uploaded_games,
                downloaded = summary.downloaded_games,
                "post-session sync finished"
            ),
            Err(err) => tracing::warn!(
                game_id = %game_id,
                error = %err,
                detail = err.detail(),
                "post-session sync failed"
            ),
        });
    }
}

// ---------------------------------------------------------------------------
// Process entry points
// ---------------------------------------------------------------------------

/// Install logging, start a runtime and block until the daemon exits.
pub fn start_blocking(data_dir: &Path, config: Config) -> Result<(), DaemonError> {
    ensure_runtime_dirs(data_dir)?;
    init_tracing(data_dir, &config.log_level);
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(run(data_dir.to_path_buf(), config))
}

/// Run the monitor, socket server, log rotation and signal handling until a
/// `stop` request or a termination signal arrives.
pub async fn run(data_dir: PathBuf, config: Config) -> Result<(), DaemonError> {
    ensure_runtime_dirs(&data_dir)?;
    let daemon = Arc::new(Daemon::open(&data_dir, &config)?);
    daemon.monitor.start();
    tracing::info!(data_dir = %data_dir.display(), pid = std::process::id(), "daemon started");

    let (shutdown_tx, _) = broadcast::channel::<()>(16);

    let socket_handle = {
        let shutdown = shutdown_tx.clone();
        let daemon = daemon.clone();
        let socket = socket_path(&data_dir);
        tokio::spawn(async move {
            let result = serve(daemon, socket, shutdown.clone()).await;
            let _ = shutdown.send(());
            result
        })
    };

    let rotation_handle = {
        let shutdown = shutdown_tx.clone();
        let data_dir = data_dir.clone();
        tokio::spawn(async move { log_rotation_task(data_dir, shutdown.subscribe()).await })
    };

    let signal_handle = {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            let mut shutdown_rx = shutdown.subscribe();
            tokio::select! {
                _ = shutdown_rx.recv() => Ok::<(), DaemonError>(()),
                received = termination_signal() => match received {
                    Ok(()) => {
                        tracing::info!("termination signal received, shutting down");
                        let _ = shutdown.send(());
                        Ok(())
                    }
                    Err(err) => Err(DaemonError::Protocol(format!("signal handler failed: {err}"))),
                }
            }
        })
    };

    let (socket_result, rotation_result, signal_result) =
        tokio::join!(socket_handle, rotation_handle, signal_handle);

    // Flush open sessions even when a task failed.
    daemon.monitor.stop().await;
    tracing::info!("daemon stopped");

    handle_join("socket_server", socket_result)?;
    handle_join("log_rotation", rotation_result)?;
    handle_join("signal_handler", signal_result)?;
    Ok(())
}

#[cfg(unix)]
async fn termination_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};
    let mut term = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result,
        _ = term.recv() => Ok(()),
    }
}

#[cfg(not(unix))]
async fn termination_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}

/// Accept clients on `socket` until shutdown is broadcast.
pub async fn serve(
    daemon: Arc<Daemon>,
    socket: PathBuf,
    shutdown_tx: broadcast::Sender<()>,
) -> Result<(), DaemonError> {
    let mut shutdown_rx = shutdown_tx.subscribe();
    prepare_socket_for_bind(&socket)?;
    let listener = UnixListener::bind(&socket).map_err(|e| io_err(&socket, e))?;
    set_socket_permissions(&socket)?;
    tracing::debug!(socket = %socket.display(), "listening");

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            accepted = listener.accept() => {
                let (stream, _) = accepted.map_err(|e| io_err(&socket, e))?;
                let daemon = daemon.clone();
                let shutdown_tx = shutdown_tx.clone();
                tokio::spawn(async move {
                    if let Err(err) = handle_client(stream, daemon, shutdown_tx).await {
                        tracing::error!(error = %err, "socket client error");
                    }
                });
            }
        }
    }

    let _ = fs::remove_file(&socket);
    Ok(())
}

async fn handle_client(
    stream: UnixStream,
    daemon: Arc<Daemon>,
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
        let request = match serde_json::from_str::<DaemonRequest>(&line) {
            Ok(request) => request,
            Err(err) => {
                let response = DaemonResponse::failure(
                    format!("invalid request JSON: {err}"),
                    "invalid-argument",
                );
                write_response(&mut writer, &response).await?;
                continue;
            }
        };

        tracing::debug!(cmd = %request.cmd, game = ?request.game, "request");
        let response = daemon.handle(&request).await;
        write_response(&mut writer, &response).await?;
        if request.cmd == "stop" {
            let _ = shutdown_tx.send(());
            break;
        }
    }
    Ok(())
}

async fn write_response(
    writer: &mut OwnedWriteHalf,
    response: &DaemonResponse,
) -> Result<(), DaemonError> {
    let mut payload = serde_json::to_vec(response)?;
    payload.push(b'\n');
    writer
        .write_all(&payload)
        .await
        .map_err(|e| io_err("daemon socket write", e))?;
    writer
        .flush()
        .await
        .map_err(|e| io_err("daemon socket flush", e))
}

async fn log_rotation_task(
    data_dir: PathBuf,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let mut interval = tokio::time::interval(Duration::from_secs(30));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = interval.tick() => {
                let data_dir = data_dir.clone();
                // Failures are logged inside; rotation never stops the daemon.
                let _ = tokio::task::spawn_blocking(move || {
                    crate::log_rotation::rotate_daemon_log(&data_dir);
                })
                .await;
            }
        }
    }
    Ok(())
}

fn prepare_socket_for_bind(socket: &Path) -> Result<(), DaemonError> {
    if !socket.exists() {
        return Ok(());
    }
    if StdUnixStream::connect(socket).is_ok() {
        return Err(DaemonError::Protocol(format!(
            "daemon socket already in use: {}",
            socket.display()
        )));
    }
    tracing::warn!(socket = %socket.display(), "removing stale daemon socket before bind");
    match fs::remove_file(socket) {
        Err(err) if err.kind() != ErrorKind::NotFound => Err(io_err(socket, err)),
        _ => Ok(()),
    }
}

fn ensure_runtime_dirs(data_dir: &Path) -> Result<(), DaemonError> {
    let logs = logs_dir(data_dir);
    fs::create_dir_all(&logs).map_err(|e| io_err(&logs, e))
}

fn handle_join(
    task: &str,
    result: Result<Result<(), DaemonError>, tokio::task::JoinError>,
) -> Result<(), DaemonError> {
    result.map_err(|err| DaemonError::Protocol(format!("{task} task join failure: {err}")))?
}

/// Append-only file logging. The file is reopened per event so rotation can
/// move it away underneath the daemon.
fn init_tracing(data_dir: &Path, default_level: &str) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let path = log_path(data_dir);
    let make_writer = move || -> Box<dyn Write + Send> {
        match fs::OpenOptions::new().create(true).append(true).open(&path) {
            Ok(file) => Box::new(file),
            Err(_) => Box::new(std::io::stderr()),
        }
    };
    let _ = fmt()
        .with_env_filter(filter)
        .with_ansi(false)
        .with_target(false)
        .with_writer(make_writer)
        .try_init();
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
