//! Per-game session state and the transition table applied on every tick.
//!
//! Everything here is pure: the monitor owns the values behind its lock and
//! performs any persistence after releasing it.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use playtime_core::types::exe_file_name;
use playtime_core::GameId;

/// Where a monitored game is in its logical session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No open interval; the next observation starts one.
    Idle,
    /// Process running, interval open since `started_at`.
    Active { started_at: DateTime<Utc> },
    /// Explicitly paused. `resume_prompt` is raised when the process is seen
    /// while paused.
    Paused { resume_prompt: bool },
    /// The process disappeared; awaiting confirmation or cleanup.
    PendingEnd,
}

/// A game tracked by the monitor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitoredGame {
    pub game_id: GameId,
    pub title: String,
    pub exe_name: String,
    pub exe_path: String,
    pub last_detected_at: Option<DateTime<Utc>>,
    pub last_not_found_at: Option<DateTime<Utc>>,
    /// Banked seconds of the current logical session.
    pub accumulated_seconds: i64,
    pub state: SessionState,
    /// Set by an explicit pause so the still-running process does not
    /// immediately raise a resume prompt.
    pub suppress_resume_prompt: bool,
}

/// A completed logical session ready to be persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlushedSession {
    pub game_id: GameId,
    pub exe_name: String,
    pub seconds: i64,
    pub ended_at: DateTime<Utc>,
}

impl FlushedSession {
    /// Start of the logical session, as recorded in `played_at`.
    pub fn started_at(&self) -> DateTime<Utc> {
        self.ended_at - Duration::seconds(self.seconds)
    }

    pub fn session_name(&self) -> String {
        format!("auto: {}", self.exe_name)
    }
}

/// What a tick did to one game; used for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    None,
    Started,
    /// Interval banked after the absence grace; now pending end.
    Lost { banked: i64 },
    ResumePrompted,
}

impl MonitoredGame {
    pub fn new(game_id: GameId, title: impl Into<String>, exe_path: impl Into<String>) -> Self {
        let exe_path = exe_path.into();
        Self {
            game_id,
            title: title.into(),
            exe_name: exe_file_name(&exe_path).to_string(),
            exe_path,
            last_detected_at: None,
            last_not_found_at: None,
            accumulated_seconds: 0,
            state: SessionState::Idle,
            suppress_resume_prompt: false,
        }
    }

    /// Apply one row of the transition table.
    pub fn observe(&mut self, now: DateTime<Utc>, running: bool, absence_grace: Duration) -> Transition {
        if running {
            self.last_detected_at = Some(now);
            self.last_not_found_at = None;
            match self.state {
                SessionState::Idle => {
                    self.state = SessionState::Active { started_at: now };
                    self.accumulated_seconds = 0;
                    Transition::Started
                }
                SessionState::Paused { resume_prompt } => {
                    let prompt = !self.suppress_resume_prompt;
                    self.state = SessionState::Paused {
                        resume_prompt: prompt,
                    };
                    if prompt && !resume_prompt {
                        Transition::ResumePrompted
                    } else {
                        Transition::None
                    }
                }
                SessionState::Active { .. } | SessionState::PendingEnd => Transition::None,
            }
        } else {
            self.last_not_found_at.get_or_insert(now);
            match self.state {
                SessionState::Active { started_at } => {
                    let Some(last_seen) = self.last_detected_at else {
                        return Transition::None;
                    };
                    if now - last_seen <= absence_grace {
                        return Transition::None;
                    }
                    let banked = whole_seconds(last_seen - started_at);
                    self.accumulated_seconds += banked;
                    self.state = SessionState::PendingEnd;
                    Transition::Lost { banked }
                }
                SessionState::Paused { .. } => {
                    self.state = SessionState::Paused {
                        resume_prompt: false,
                    };
                    self.suppress_resume_prompt = false;
                    Transition::None
                }
                SessionState::Idle | SessionState::PendingEnd => Transition::None,
            }
        }
    }

    /// Bank the open interval (if any) up to `now`. Returns the seconds added.
    pub fn bank_open_interval(&mut self, now: DateTime<Utc>) -> i64 {
        if let SessionState::Active { started_at } = self.state {
            let banked = whole_seconds(now - started_at);
            self.accumulated_seconds += banked;
            self.state = SessionState::Idle;
            banked
        } else {
            0
        }
    }

    /// Close the logical session: bank, hand back what must be persisted
    /// (nothing when the bank is empty) and return to `Idle`.
    pub fn flush(&mut self, now: DateTime<Utc>) -> Option<FlushedSession> {
        self.bank_open_interval(now);
        let seconds = std::mem::take(&mut self.accumulated_seconds);
        self.state = SessionState::Idle;
        self.suppress_resume_prompt = false;
        (seconds > 0).then(|| FlushedSession {
            game_id: self.game_id.clone(),
            exe_name: self.exe_name.clone(),
            seconds,
            ended_at: now,
        })
    }

    /// Explicit pause. Only an active interval can be paused.
    pub fn pause(&mut self, now: DateTime<Utc>) -> bool {
        if !matches!(self.state, SessionState::Active { .. }) {
            return false;
        }
        self.bank_open_interval(now);
        self.state = SessionState::Paused {
            resume_prompt: false,
        };
        self.suppress_resume_prompt = true;
        true
    }

    /// Explicit resume from `Paused` or `PendingEnd`; the caller has already
    /// confirmed that the process is running.
    pub fn resume(&mut self, now: DateTime<Utc>) -> bool {
        if !matches!(
            self.state,
            SessionState::Paused { .. } | SessionState::PendingEnd
        ) {
            return false;
        }
        self.state = SessionState::Active { started_at: now };
        self.last_detected_at = Some(now);
        self.last_not_found_at = None;
        self.suppress_resume_prompt = false;
        true
    }

    /// Absent, not active, not paused, for longer than `timeout`.
    pub fn is_stale(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        matches!(self.state, SessionState::Idle | SessionState::PendingEnd)
            && self
                .last_not_found_at
                .is_some_and(|since| now - since > timeout)
    }

    pub fn status(&self, now: DateTime<Utc>) -> GameStatus {
        let live = match self.state {
            SessionState::Active { started_at } => whole_seconds(now - started_at),
            _ => 0,
        };
        GameStatus {
            game_id: self.game_id.clone(),
            title: self.title.clone(),
            executable_name: self.exe_name.clone(),
            is_playing: matches!(self.state, SessionState::Active { .. }),
            play_seconds: self.accumulated_seconds + live,
            is_paused: matches!(self.state, SessionState::Paused { .. }),
            needs_confirmation: matches!(self.state, SessionState::PendingEnd),
            needs_resume: matches!(
                self.state,
                SessionState::Paused {
                    resume_prompt: true
                }
            ),
        }
    }
}

/// Read-only view of one monitored game.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameStatus {
    pub game_id: GameId,
    pub title: String,
    pub executable_name: String,
    pub is_playing: bool,
    /// Banked seconds plus the live open interval.
    pub play_seconds: i64,
    pub is_paused: bool,
    pub needs_confirmation: bool,
    pub needs_resume: bool,
}

fn whole_seconds(d: Duration) -> i64 {
    d.num_seconds().max(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 20, 0, 0).unwrap() + Duration::seconds(secs)
    }

    fn game() -> MonitoredGame {
        MonitoredGame::new(GameId::from("g"), "Game", r"C:\Games\G\g.exe")
    }

    fn grace() -> Duration {
        Duration::seconds(4)
    }

    #[test]
    fn first_observation_starts_interval() {
        let mut g = game();
        assert_eq!(g.exe_name, "g.exe");
        assert_eq!(g.observe(t(0), true, grace()), Transition::Started);
        assert_eq!(g.state, SessionState::Active { started_at: t(0) });
        assert_eq!(g.observe(t(2), true, grace()), Transition::None);
    }

    #[test]
    fn absence_within_grace_keeps_interval_open() {
        let mut g = game();
        g.observe(t(0), true, grace());
        g.observe(t(2), true, grace());
        assert_eq!(g.observe(t(4), false, grace()), Transition::None);
        assert_eq!(g.observe(t(6), false, grace()), Transition::None);
        assert!(matches!(g.state, SessionState::Active { .. }));
    }

    #[test]
    fn absence_past_grace_banks_until_last_seen() {
        let mut g = game();
        g.observe(t(0), true, grace());
        g.observe(t(2), true, grace());
        g.observe(t(4), true, grace());
        g.observe(t(6), false, grace());
        assert_eq!(g.observe(t(10), false, grace()), Transition::Lost { banked: 4 });
        assert_eq!(g.state, SessionState::PendingEnd);
        assert_eq!(g.accumulated_seconds, 4);
        assert_eq!(g.last_not_found_at, Some(t(6)));
        let status = g.status(t(10));
        assert!(status.needs_confirmation);
        assert!(!status.is_playing);
    }

    #[test]
    fn pending_end_stays_when_process_returns() {
        let mut g = game();
        g.state = SessionState::PendingEnd;
        g.accumulated_seconds = 30;
        assert_eq!(g.observe(t(0), true, grace()), Transition::None);
        assert_eq!(g.state, SessionState::PendingEnd);
        assert_eq!(g.last_detected_at, Some(t(0)));
        assert_eq!(g.last_not_found_at, None);
    }

    #[test]
    fn explicit_pause_suppresses_prompt_until_process_leaves() {
        let mut g = game();
        g.observe(t(0), true, grace());
        assert!(g.pause(t(10)));
        assert_eq!(g.accumulated_seconds, 10);
        assert!(!g.pause(t(11)), "pausing twice is refused");

        g.observe(t(12), true, grace());
        assert!(!g.status(t(12)).needs_resume);

        g.observe(t(14), false, grace());
        assert!(!g.suppress_resume_prompt);
        assert_eq!(g.observe(t(16), true, grace()), Transition::ResumePrompted);
        let status = g.status(t(16));
        assert!(status.needs_resume && status.is_paused);
        assert_eq!(status.play_seconds, 10);
    }

    #[test]
    fn resume_reopens_interval_and_keeps_bank() {
        let mut g = game();
        g.observe(t(0), true, grace());
        g.pause(t(10));
        assert!(g.resume(t(20)));
        assert_eq!(g.state, SessionState::Active { started_at: t(20) });
        assert_eq!(g.status(t(25)).play_seconds, 15);
        assert!(!g.resume(t(26)), "already active");
    }

    #[test]
    fn flush_is_idempotent() {
        let mut g = game();
        g.observe(t(0), true, grace());
        let first = g.flush(t(30)).expect("one session");
        assert_eq!(first.seconds, 30);
        assert_eq!(first.started_at(), t(0));
        assert_eq!(first.session_name(), "auto: g.exe");
        assert_eq!(g.accumulated_seconds, 0);
        assert_eq!(g.state, SessionState::Idle);
        assert!(g.flush(t(31)).is_none());
    }

    #[test]
    fn paused_games_are_never_stale() {
        let mut g = game();
        g.observe(t(0), true, grace());
        g.pause(t(5));
        g.observe(t(6), false, grace());
        assert!(!g.is_stale(t(600), Duration::seconds(20)));

        let mut idle = game();
        idle.observe(t(0), false, grace());
        assert!(!idle.is_stale(t(20), Duration::seconds(20)));
        assert!(idle.is_stale(t(21), Duration::seconds(20)));
    }
}
