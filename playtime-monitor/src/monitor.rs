//! The process monitor: registry of monitored games, the polling loop and
//! the explicit pause/resume/end overrides.
//!
//! # Locking
//!
//! The registry is one `std::sync::Mutex`. It is never held across an
//! `.await`, an enumeration or a repository call: ticks compute what must be
//! persisted under the lock and write it afterwards.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use playtime_core::config::MonitorConfig;
use playtime_core::repository::record_session;
use playtime_core::{GameFilter, GameId, NewSession, Repository};

use crate::enumerate::{Enumeration, FallbackEnumerator, ProcessInfo, ProcessSnapshot};
use crate::error::MonitorError;
use crate::matcher::ProcessIndex;
use crate::state::{FlushedSession, GameStatus, MonitoredGame, Transition};

/// Notified after a session has been persisted. The daemon uses this to run
/// a detached per-game cloud sync.
pub trait SyncTrigger: Send + Sync {
    fn session_recorded(&self, game_id: &GameId);
}

/// Timing knobs, usually built from [`MonitorConfig`].
#[derive(Debug, Clone)]
pub struct MonitorSettings {
    pub interval: StdDuration,
    pub absence_grace: Duration,
    pub cleanup_timeout: Duration,
    pub enumeration_timeout: StdDuration,
    pub auto_detect: bool,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self::from(&MonitorConfig::default())
    }
}

impl From<&MonitorConfig> for MonitorSettings {
    fn from(config: &MonitorConfig) -> Self {
        Self {
            interval: config.interval(),
            absence_grace: Duration::seconds(config.absence_grace_secs as i64),
            cleanup_timeout: Duration::seconds(config.cleanup_timeout_secs as i64),
            enumeration_timeout: config.enumeration_timeout(),
            auto_detect: config.auto_detect,
        }
    }
}

struct LoopHandle {
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

struct Inner {
    repo: Arc<dyn Repository>,
    enumerator: FallbackEnumerator,
    settings: MonitorSettings,
    auto_detect: AtomicBool,
    /// Set while a blocking enumeration runs, including one the caller
    /// already gave up on after the timeout.
    enumerating: AtomicBool,
    games: Mutex<HashMap<GameId, MonitoredGame>>,
    trigger: Mutex<Option<Arc<dyn SyncTrigger>>>,
    running: Mutex<Option<LoopHandle>>,
}

/// Cheap to clone; all clones share one registry.
#[derive(Clone)]
pub struct ProcessMonitor {
    inner: Arc<Inner>,
}

impl ProcessMonitor {
    pub fn new(
        repo: Arc<dyn Repository>,
        enumerator: FallbackEnumerator,
        settings: MonitorSettings,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                repo,
                enumerator,
                auto_detect: AtomicBool::new(settings.auto_detect),
                enumerating: AtomicBool::new(false),
                settings,
                games: Mutex::new(HashMap::new()),
                trigger: Mutex::new(None),
                running: Mutex::new(None),
            }),
        }
    }

    pub fn set_sync_trigger(&self, trigger: Arc<dyn SyncTrigger>) {
        *lock(&self.inner.trigger) = Some(trigger);
    }

    // -----------------------------------------------------------------------
    // Loop control
    // -----------------------------------------------------------------------

    /// Start the polling loop on the current tokio runtime. Returns `false`
    /// when it was already running.
    pub fn start(&self) -> bool {
        let mut running = lock(&self.inner.running);
        if running.is_some() {
            return false;
        }
        let (stop_tx, stop_rx) = watch::channel(false);
        let task = tokio::spawn(run_loop(Arc::clone(&self.inner), stop_rx));
        *running = Some(LoopHandle { stop_tx, task });
        tracing::info!(interval = ?self.inner.settings.interval, "process monitoring started");
        true
    }

    /// Stop the loop, wait for an in-flight tick, then flush every open
    /// interval. Returns `false` when it was not running.
    pub async fn stop(&self) -> bool {
        let Some(handle) = lock(&self.inner.running).take() else {
            return false;
        };
        let _ = handle.stop_tx.send(true);
        if let Err(e) = handle.task.await {
            tracing::error!(error = %e, "monitor loop ended abnormally");
        }
        self.inner.flush_all(Utc::now()).await;
        tracing::info!("process monitoring stopped");
        true
    }

    pub fn is_monitoring(&self) -> bool {
        lock(&self.inner.running).is_some()
    }

    pub fn auto_detection(&self) -> bool {
        self.inner.auto_detect.load(Ordering::SeqCst)
    }

    /// Toggle auto-arming. Re-enabling while running checks immediately.
    pub async fn update_auto_detection(&self, enabled: bool) {
        self.inner.auto_detect.store(enabled, Ordering::SeqCst);
        tracing::info!(enabled, "auto detection updated");
        if enabled && self.is_monitoring() {
            self.check_processes().await;
        }
    }

    // -----------------------------------------------------------------------
    // Ticks
    // -----------------------------------------------------------------------

    pub async fn check_processes(&self) {
        self.check_processes_at(Utc::now()).await;
    }

    /// Run one tick as if the clock read `now`.
    pub async fn check_processes_at(&self, now: DateTime<Utc>) {
        self.inner.check_processes_at(now).await;
    }

    // -----------------------------------------------------------------------
    // Explicit overrides
    // -----------------------------------------------------------------------

    /// Arm a game from the repository even when auto-detection is off.
    /// Returns `false` when it was already monitored.
    pub async fn arm_game(&self, game_id: &GameId) -> Result<bool, MonitorError> {
        let inner = Arc::clone(&self.inner);
        let id = game_id.clone();
        let game = tokio::task::spawn_blocking(move || inner.repo.get_game(&id))
            .await
            .map_err(|e| MonitorError::Join(e.to_string()))??
            .ok_or_else(|| MonitorError::UnknownGame(game_id.clone()))?;
        if !game.has_configured_exe() {
            return Err(MonitorError::Unconfigured(game.id));
        }

        let mut games = lock(&self.inner.games);
        if games.contains_key(&game.id) {
            return Ok(false);
        }
        tracing::info!(game_id = %game.id, title = %game.title, exe = game.exe_name(), "armed game");
        games.insert(
            game.id.clone(),
            MonitoredGame::new(game.id.clone(), game.title, game.exe_path),
        );
        Ok(true)
    }

    pub fn pause_session(&self, game_id: &GameId) -> bool {
        self.pause_session_at(game_id, Utc::now())
    }

    pub fn pause_session_at(&self, game_id: &GameId, now: DateTime<Utc>) -> bool {
        let mut games = lock(&self.inner.games);
        let paused = games.get_mut(game_id).is_some_and(|g| g.pause(now));
        if paused {
            tracing::info!(%game_id, "session paused");
        }
        paused
    }

    /// Resume a paused or pending-end game. Fails when the process is not
    /// observed running right now.
    pub async fn resume_session(&self, game_id: &GameId) -> bool {
        self.resume_session_at(game_id, Utc::now()).await
    }

    pub async fn resume_session_at(&self, game_id: &GameId, now: DateTime<Utc>) -> bool {
        let Some(enumeration) = self.inner.enumerate().await else {
            return false;
        };
        self.resume_with(game_id, &enumeration.processes, now)
    }

    fn resume_with(&self, game_id: &GameId, processes: &[ProcessInfo], now: DateTime<Utc>) -> bool {
        let index = ProcessIndex::build(processes);
        let mut games = lock(&self.inner.games);
        let Some(game) = games.get_mut(game_id) else {
            return false;
        };
        if !index.is_running(&game.exe_path) {
            tracing::debug!(%game_id, "resume refused: process not running");
            return false;
        }
        let resumed = game.resume(now);
        if resumed {
            tracing::info!(%game_id, "session resumed");
        }
        resumed
    }

    /// Close the current logical session and persist it. Returns `false` for
    /// games that are not monitored.
    pub async fn end_session(&self, game_id: &GameId) -> bool {
        self.end_session_at(game_id, Utc::now()).await
    }

    pub async fn end_session_at(&self, game_id: &GameId, now: DateTime<Utc>) -> bool {
        let flushed = {
            let mut games = lock(&self.inner.games);
            let Some(game) = games.get_mut(game_id) else {
                return false;
            };
            game.flush(now)
        };
        tracing::info!(%game_id, seconds = flushed.as_ref().map_or(0, |s| s.seconds), "session ended");
        if let Some(session) = flushed {
            self.inner.persist_all(vec![session]).await;
        }
        true
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    /// Status of every monitored game, sorted by title.
    pub fn get_status(&self) -> Vec<GameStatus> {
        self.get_status_at(Utc::now())
    }

    pub fn get_status_at(&self, now: DateTime<Utc>) -> Vec<GameStatus> {
        let mut statuses: Vec<GameStatus> = lock(&self.inner.games)
            .values()
            .map(|g| g.status(now))
            .collect();
        statuses.sort_by(|a, b| a.title.cmp(&b.title).then_with(|| a.game_id.cmp(&b.game_id)));
        statuses
    }

    pub async fn get_process_snapshot(&self) -> ProcessSnapshot {
        let enumeration = self.inner.enumerate().await;
        ProcessSnapshot::from(enumeration.unwrap_or_else(Enumeration::empty))
    }
}

// ---------------------------------------------------------------------------
// Internals
// ---------------------------------------------------------------------------

async fn run_loop(inner: Arc<Inner>, mut stop_rx: watch::Receiver<bool>) {
    loop {
        inner.check_processes_at(Utc::now()).await;
        tokio::select! {
            _ = tokio::time::sleep(inner.settings.interval) => {}
            _ = stop_rx.changed() => break,
        }
    }
}

/// Clears [`Inner::enumerating`] when the blocking enumeration returns.
struct InFlight(Arc<Inner>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.enumerating.store(false, Ordering::SeqCst);
    }
}

impl Inner {
    /// Enumerate on the blocking pool, abandoning the attempt after the
    /// enumeration timeout. `None` while an earlier enumeration is still
    /// running, so a hung OS call occupies at most one blocking thread.
    async fn enumerate(self: &Arc<Self>) -> Option<Enumeration> {
        if self.enumerating.swap(true, Ordering::SeqCst) {
            tracing::debug!("previous process enumeration still running; skipping");
            return None;
        }
        let guard = InFlight(Arc::clone(self));
        let task = tokio::task::spawn_blocking(move || {
            let guard = guard;
            guard.0.enumerator.enumerate()
        });
        let outcome = tokio::time::timeout(self.settings.enumeration_timeout, task).await;
        let enumeration = match outcome {
            Ok(Ok(enumeration)) => enumeration,
            Ok(Err(e)) => {
                tracing::error!(error = %e, "process enumeration task failed");
                Enumeration::empty()
            }
            Err(_) => {
                tracing::warn!(
                    timeout = ?self.settings.enumeration_timeout,
                    "process enumeration timed out"
                );
                Enumeration::empty()
            }
        };
        Some(enumeration)
    }

    async fn check_processes_at(self: &Arc<Self>, now: DateTime<Utc>) {
        let Some(enumeration) = self.enumerate().await else {
            return;
        };
        tracing::trace!(
            source = enumeration.source.as_str(),
            count = enumeration.processes.len(),
            "enumerated processes"
        );
        let inner = Arc::clone(self);
        let result = tokio::task::spawn_blocking(move || {
            let flushed = inner.apply_tick(now, &enumeration.processes);
            inner.persist_blocking(flushed);
        })
        .await;
        if let Err(e) = result {
            tracing::error!(error = %e, "monitor tick failed");
        }
    }

    /// Steps after enumeration: auto-arm, transitions, cleanup. Returns the
    /// sessions to persist; the registry lock is released on return.
    fn apply_tick(&self, now: DateTime<Utc>, processes: &[ProcessInfo]) -> Vec<FlushedSession> {
        let index = ProcessIndex::build(processes);
        if self.auto_detect.load(Ordering::SeqCst) {
            self.auto_arm(&index);
        }

        let mut flushed = Vec::new();
        let mut games = lock(&self.games);
        for game in games.values_mut() {
            let running = index.is_running(&game.exe_path);
            match game.observe(now, running, self.settings.absence_grace) {
                Transition::Started => {
                    tracing::info!(game_id = %game.game_id, exe = %game.exe_name, "game started")
                }
                Transition::Lost { banked } => tracing::info!(
                    game_id = %game.game_id,
                    exe = %game.exe_name,
                    banked,
                    "game process gone; awaiting confirmation"
                ),
                Transition::ResumePrompted => {
                    tracing::info!(game_id = %game.game_id, "paused game running again")
                }
                Transition::None => {}
            }
        }

        let stale: Vec<GameId> = games
            .values()
            .filter(|g| g.is_stale(now, self.settings.cleanup_timeout))
            .map(|g| g.game_id.clone())
            .collect();
        for id in stale {
            if let Some(mut game) = games.remove(&id) {
                let ended_at = game.last_detected_at.unwrap_or(now);
                if let Some(session) = game.flush(ended_at) {
                    flushed.push(session);
                }
                tracing::info!(game_id = %id, exe = %game.exe_name, "stopped monitoring absent game");
            }
        }
        flushed
    }

    fn auto_arm(&self, index: &ProcessIndex) {
        let candidates = match self.repo.list_games(&GameFilter::default()) {
            Ok(games) => games,
            Err(e) => {
                tracing::warn!(error = %e, "auto detection could not list games");
                return;
            }
        };
        let mut games = lock(&self.games);
        for game in candidates {
            if !game.has_configured_exe() || games.contains_key(&game.id) {
                continue;
            }
            if !index.contains_name(game.exe_name()) || !index.is_running(&game.exe_path) {
                continue;
            }
            tracing::info!(game_id = %game.id, title = %game.title, exe = game.exe_name(), "auto-detected game");
            games.insert(
                game.id.clone(),
                MonitoredGame::new(game.id.clone(), game.title, game.exe_path),
            );
        }
    }

    async fn flush_all(self: &Arc<Self>, now: DateTime<Utc>) {
        let flushed: Vec<FlushedSession> = lock(&self.games)
            .values_mut()
            .filter_map(|g| g.flush(now))
            .collect();
        self.persist_all(flushed).await;
    }

    async fn persist_all(self: &Arc<Self>, sessions: Vec<FlushedSession>) {
        if sessions.is_empty() {
            return;
        }
        let inner = Arc::clone(self);
        if let Err(e) = tokio::task::spawn_blocking(move || inner.persist_blocking(sessions)).await {
            tracing::error!(error = %e, "session persistence task failed");
        }
    }

    /// Each failure is logged and does not stop the rest.
    fn persist_blocking(&self, sessions: Vec<FlushedSession>) {
        let trigger = lock(&self.trigger).clone();
        for session in sessions {
            let new = NewSession {
                game_id: session.game_id.clone(),
                played_at: session.started_at(),
                duration: session.seconds,
                session_name: Some(session.session_name()),
                chapter_id: None,
                upload_id: None,
            };
            match record_session(self.repo.as_ref(), new, Utc::now()) {
                Ok(saved) => {
                    tracing::info!(
                        game_id = %session.game_id,
                        session_id = %saved.id,
                        duration = saved.duration,
                        "play session recorded"
                    );
                    if let Some(trigger) = &trigger {
                        trigger.session_recorded(&session.game_id);
                    }
                }
                Err(e) => tracing::error!(
                    game_id = %session.game_id,
                    error = %e,
                    "failed to record play session"
                ),
            }
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
