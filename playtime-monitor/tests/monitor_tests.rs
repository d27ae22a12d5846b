//! Monitor integration tests against a real SQLite repository and a scripted
//! process list.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, TimeZone, Utc};
use playtime_core::{Game, GameId, NewGame, Repository, SqliteRepository, UNCONFIGURED_EXE_PATH};
use playtime_monitor::{
    EnumerateError, EnumerationSource, FallbackEnumerator, MonitorError, MonitorSettings,
    ProcessEnumerator, ProcessInfo, ProcessMonitor, SyncTrigger,
};
use tempfile::TempDir;

const EXE: &str = r"C:\Games\Ever17\ever17.exe";

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
struct Scripted(Arc<Mutex<Vec<ProcessInfo>>>);

impl Scripted {
    fn set_running(&self, running: bool) {
        let mut procs = self.0.lock().unwrap();
        procs.clear();
        procs.push(ProcessInfo {
            name: "explorer.exe".into(),
            pid: 4,
            cmd: r"C:\Windows\explorer.exe".into(),
        });
        if running {
            procs.push(ProcessInfo {
                name: "Ever17.exe".into(),
                pid: 100,
                cmd: EXE.into(),
            });
        }
    }
}

impl ProcessEnumerator for Scripted {
    fn list_processes(&self) -> Result<Vec<ProcessInfo>, EnumerateError> {
        Ok(self.0.lock().unwrap().clone())
    }
}

struct Broken;

impl ProcessEnumerator for Broken {
    fn list_processes(&self) -> Result<Vec<ProcessInfo>, EnumerateError> {
        Err(EnumerateError::Parse("scripted failure".into()))
    }
}

/// Blocks every call until the test releases it.
struct Gated {
    calls: AtomicUsize,
    release: Mutex<mpsc::Receiver<()>>,
}

impl ProcessEnumerator for Gated {
    fn list_processes(&self) -> Result<Vec<ProcessInfo>, EnumerateError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let _ = self.release.lock().unwrap().recv();
        Ok(Vec::new())
    }
}

#[derive(Default)]
struct RecordingTrigger(Mutex<Vec<GameId>>);

impl SyncTrigger for RecordingTrigger {
    fn session_recorded(&self, game_id: &GameId) {
        self.0.lock().unwrap().push(game_id.clone());
    }
}

struct Fixture {
    _dir: TempDir,
    repo: Arc<SqliteRepository>,
    procs: Scripted,
    monitor: ProcessMonitor,
    game: Game,
}

fn fixture(auto_detect: bool) -> Fixture {
    let dir = TempDir::new().expect("tempdir");
    let repo = Arc::new(SqliteRepository::new(dir.path().join("playtime.db")).expect("open"));
    let game = repo
        .create_game(NewGame {
            title: "Ever17".into(),
            exe_path: EXE.into(),
            ..Default::default()
        })
        .expect("create game");
    let procs = Scripted::default();
    procs.set_running(false);
    let settings = MonitorSettings {
        interval: StdDuration::from_millis(20),
        auto_detect,
        ..MonitorSettings::default()
    };
    let shared: Arc<dyn Repository> = repo.clone();
    let monitor = ProcessMonitor::new(
        shared,
        FallbackEnumerator::new(Arc::new(procs.clone()), Arc::new(Broken)),
        settings,
    );
    Fixture {
        _dir: dir,
        repo,
        procs,
        monitor,
        game,
    }
}

fn t(secs: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 21, 0, 0).unwrap() + Duration::seconds(secs)
}

// ---------------------------------------------------------------------------
// 1. Detection
// ---------------------------------------------------------------------------

#[tokio::test]
async fn first_observation_starts_within_one_tick() {
    let f = fixture(true);
    f.procs.set_running(true);
    f.monitor.check_processes_at(t(0)).await;

    let status = f.monitor.get_status_at(t(3));
    assert_eq!(status.len(), 1);
    assert_eq!(status[0].game_id, f.game.id);
    assert!(status[0].is_playing);
    assert_eq!(status[0].play_seconds, 3);
    assert_eq!(status[0].executable_name, "ever17.exe");
}

#[tokio::test]
async fn auto_detection_off_requires_explicit_arming() {
    let f = fixture(false);
    f.procs.set_running(true);
    f.monitor.check_processes_at(t(0)).await;
    assert!(f.monitor.get_status_at(t(0)).is_empty());

    assert!(f.monitor.arm_game(&f.game.id).await.expect("arm"));
    assert!(!f.monitor.arm_game(&f.game.id).await.expect("arm twice"));
    f.monitor.check_processes_at(t(2)).await;
    assert!(f.monitor.get_status_at(t(2))[0].is_playing);
}

#[tokio::test]
async fn placeholder_games_cannot_be_armed() {
    let f = fixture(true);
    let downloaded = f
        .repo
        .create_game(NewGame {
            title: "Cloud only".into(),
            exe_path: UNCONFIGURED_EXE_PATH.into(),
            ..Default::default()
        })
        .expect("create");
    let err = f.monitor.arm_game(&downloaded.id).await.unwrap_err();
    assert!(matches!(err, MonitorError::Unconfigured(_)), "got: {err}");

    let err = f.monitor.arm_game(&GameId::from("ghost")).await.unwrap_err();
    assert!(matches!(err, MonitorError::UnknownGame(_)), "got: {err}");
}

#[tokio::test]
async fn enabling_auto_detection_while_stopped_does_not_tick() {
    let f = fixture(false);
    f.procs.set_running(true);
    f.monitor.update_auto_detection(true).await;
    assert!(f.monitor.auto_detection());
    assert!(f.monitor.get_status().is_empty());
}

// ---------------------------------------------------------------------------
// 2. Session lifecycle
// ---------------------------------------------------------------------------

#[tokio::test]
async fn three_ticks_then_absence_persists_exactly_one_session() {
    let f = fixture(true);
    f.procs.set_running(true);
    for tick in [0, 2, 4] {
        f.monitor.check_processes_at(t(tick)).await;
    }

    f.procs.set_running(false);
    let mut now = 6;
    while now <= 30 {
        f.monitor.check_processes_at(t(now)).await;
        now += 2;
    }

    let sessions = f.repo.list_sessions(&f.game.id).expect("sessions");
    assert_eq!(sessions.len(), 1, "got: {sessions:?}");
    let duration = sessions[0].duration;
    assert!((2..=6).contains(&duration), "observed window was 4s, got {duration}");
    assert_eq!(sessions[0].session_name.as_deref(), Some("auto: ever17.exe"));

    let game = f.repo.get_game(&f.game.id).expect("get").expect("present");
    assert_eq!(
        game.total_play_time,
        f.repo.sum_session_durations(&f.game.id).expect("sum")
    );
    assert!(game.updated_at > f.game.updated_at);
    assert!(f.monitor.get_status_at(t(30)).is_empty(), "absent game is cleaned up");
}

#[tokio::test]
async fn lost_process_waits_for_confirmation() {
    let f = fixture(true);
    f.procs.set_running(true);
    f.monitor.check_processes_at(t(0)).await;
    f.monitor.check_processes_at(t(10)).await;
    f.procs.set_running(false);
    f.monitor.check_processes_at(t(16)).await;

    let status = &f.monitor.get_status_at(t(16))[0];
    assert!(status.needs_confirmation);
    assert_eq!(status.play_seconds, 10);
    assert!(f.repo.list_sessions(&f.game.id).expect("sessions").is_empty());

    assert!(f.monitor.end_session_at(&f.game.id, t(17)).await);
    let sessions = f.repo.list_sessions(&f.game.id).expect("sessions");
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].duration, 10);
}

#[tokio::test]
async fn end_session_twice_persists_once() {
    let f = fixture(true);
    f.procs.set_running(true);
    f.monitor.check_processes_at(t(0)).await;
    f.monitor.check_processes_at(t(2)).await;

    assert!(f.monitor.end_session_at(&f.game.id, t(12)).await);
    assert!(f.monitor.end_session_at(&f.game.id, t(13)).await);

    let sessions = f.repo.list_sessions(&f.game.id).expect("sessions");
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].duration, 12);
    assert_eq!(sessions[0].played_at, t(0));
    assert_eq!(f.monitor.get_status_at(t(13))[0].play_seconds, 0);
    assert!(!f.monitor.end_session_at(&GameId::from("ghost"), t(14)).await);
}

#[tokio::test]
async fn pause_and_resume_keep_one_logical_session() {
    let f = fixture(true);
    f.procs.set_running(true);
    f.monitor.check_processes_at(t(0)).await;
    assert!(f.monitor.pause_session_at(&f.game.id, t(20)));

    f.procs.set_running(false);
    assert!(
        !f.monitor.resume_session_at(&f.game.id, t(25)).await,
        "resume requires a running process"
    );
    f.procs.set_running(true);
    assert!(f.monitor.resume_session_at(&f.game.id, t(30)).await);

    assert!(f.monitor.end_session_at(&f.game.id, t(40)).await);
    let sessions = f.repo.list_sessions(&f.game.id).expect("sessions");
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].duration, 30);
}

#[tokio::test]
async fn paused_games_survive_long_absence() {
    let f = fixture(true);
    f.procs.set_running(true);
    f.monitor.check_processes_at(t(0)).await;
    f.monitor.pause_session_at(&f.game.id, t(5));
    f.procs.set_running(false);
    f.monitor.check_processes_at(t(6)).await;
    f.monitor.check_processes_at(t(600)).await;

    let status = f.monitor.get_status_at(t(600));
    assert_eq!(status.len(), 1);
    assert!(status[0].is_paused);
    assert_eq!(status[0].play_seconds, 5);
}

#[tokio::test]
async fn recorded_sessions_fire_the_sync_trigger() {
    let f = fixture(true);
    let trigger = Arc::new(RecordingTrigger::default());
    f.monitor.set_sync_trigger(trigger.clone());

    f.procs.set_running(true);
    f.monitor.check_processes_at(t(0)).await;
    f.monitor.end_session_at(&f.game.id, t(8)).await;
    f.monitor.end_session_at(&f.game.id, t(9)).await;

    assert_eq!(*trigger.0.lock().unwrap(), vec![f.game.id.clone()]);
}

// ---------------------------------------------------------------------------
// 3. Loop and snapshot
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn start_and_stop_are_idempotent() {
    let f = fixture(true);
    f.procs.set_running(true);

    assert!(f.monitor.start());
    assert!(!f.monitor.start());
    assert!(f.monitor.is_monitoring());

    tokio::time::sleep(StdDuration::from_millis(200)).await;
    assert!(f.monitor.get_status()[0].is_playing);

    assert!(f.monitor.stop().await);
    assert!(!f.monitor.is_monitoring());
    assert!(!f.monitor.stop().await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stop_flushes_open_intervals() {
    let f = fixture(true);
    f.procs.set_running(true);
    f.monitor
        .check_processes_at(Utc::now() - Duration::seconds(30))
        .await;

    assert!(f.monitor.start());
    assert!(f.monitor.stop().await);

    let sessions = f.repo.list_sessions(&f.game.id).expect("sessions");
    assert_eq!(sessions.len(), 1);
    assert!(sessions[0].duration >= 30);
    let status = &f.monitor.get_status()[0];
    assert!(!status.is_playing);
    assert_eq!(status.play_seconds, 0);
}

#[tokio::test]
async fn snapshot_reports_fallback_source() {
    let procs = Scripted::default();
    procs.set_running(true);
    let dir = TempDir::new().expect("tempdir");
    let repo: Arc<dyn Repository> =
        Arc::new(SqliteRepository::new(dir.path().join("p.db")).expect("open"));
    let monitor = ProcessMonitor::new(
        repo,
        FallbackEnumerator::new(Arc::new(Broken), Arc::new(procs)),
        MonitorSettings::default(),
    );

    let snapshot = monitor.get_process_snapshot().await;
    assert_eq!(snapshot.source, EnumerationSource::Fallback);
    let ever17 = snapshot
        .items
        .iter()
        .find(|i| i.pid == 100)
        .expect("game process listed");
    assert_eq!(ever17.normalized_name, "ever17.exe");
    assert_eq!(ever17.normalized_cmd, r"c:\games\ever17\ever17.exe");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn hung_enumeration_is_not_stacked() {
    let (release_tx, release_rx) = mpsc::channel();
    let gated = Arc::new(Gated {
        calls: AtomicUsize::new(0),
        release: Mutex::new(release_rx),
    });
    let dir = TempDir::new().expect("tempdir");
    let repo: Arc<dyn Repository> =
        Arc::new(SqliteRepository::new(dir.path().join("p.db")).expect("open"));
    let primary: Arc<dyn ProcessEnumerator> = gated.clone();
    let monitor = ProcessMonitor::new(
        repo,
        FallbackEnumerator::new(primary, Arc::new(Broken)),
        MonitorSettings {
            enumeration_timeout: StdDuration::from_millis(30),
            ..MonitorSettings::default()
        },
    );

    // The first call times out and keeps its thread; later ticks skip.
    for secs in 0..3 {
        monitor.check_processes_at(t(secs)).await;
    }
    assert_eq!(gated.calls.load(Ordering::SeqCst), 1);

    release_tx.send(()).expect("release");
    for secs in 3..100 {
        monitor.check_processes_at(t(secs)).await;
        if gated.calls.load(Ordering::SeqCst) > 1 {
            break;
        }
        tokio::time::sleep(StdDuration::from_millis(10)).await;
    }
    assert_eq!(gated.calls.load(Ordering::SeqCst), 2);
    drop(release_tx);
}
