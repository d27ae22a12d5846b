//! Process enumeration: a native strategy backed by `sysinfo`, a platform
//! command fallback, and the wrapper that tries them in order.

use std::collections::HashMap;
use std::io::Read;
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use sysinfo::{ProcessRefreshKind, System, UpdateKind};

use crate::error::EnumerateError;
use crate::matcher::normalize_token;

/// One running process as reported by an enumerator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessInfo {
    pub name: String,
    pub pid: u32,
    /// Executable path when known, otherwise the name.
    pub cmd: String,
}

/// A strategy for listing processes. Implementations block; the monitor
/// calls them from `spawn_blocking`.
pub trait ProcessEnumerator: Send + Sync {
    fn list_processes(&self) -> Result<Vec<ProcessInfo>, EnumerateError>;
}

/// Which strategy produced a process list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnumerationSource {
    Native,
    Fallback,
    /// Both strategies failed (or enumeration timed out).
    None,
}

impl EnumerationSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnumerationSource::Native => "native",
            EnumerationSource::Fallback => "fallback",
            EnumerationSource::None => "none",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Enumeration {
    pub source: EnumerationSource,
    pub processes: Vec<ProcessInfo>,
}

impl Enumeration {
    pub fn empty() -> Self {
        Self {
            source: EnumerationSource::None,
            processes: Vec::new(),
        }
    }
}

/// Primary strategy with a single fallback per call.
#[derive(Clone)]
pub struct FallbackEnumerator {
    primary: Arc<dyn ProcessEnumerator>,
    fallback: Arc<dyn ProcessEnumerator>,
}

impl FallbackEnumerator {
    pub fn new(primary: Arc<dyn ProcessEnumerator>, fallback: Arc<dyn ProcessEnumerator>) -> Self {
        Self { primary, fallback }
    }

    /// `sysinfo` first, then `wmic` on Windows or `ps` elsewhere.
    pub fn system(command_timeout: Duration) -> Self {
        Self::new(
            Arc::new(SysinfoEnumerator),
            Arc::new(CommandEnumerator::platform(command_timeout)),
        )
    }

    /// Never fails: both strategies failing yields an empty list.
    pub fn enumerate(&self) -> Enumeration {
        match self.primary.list_processes() {
            Ok(processes) => Enumeration {
                source: EnumerationSource::Native,
                processes,
            },
            Err(primary_err) => {
                tracing::warn!(error = %primary_err, "native process enumeration failed; using fallback");
                match self.fallback.list_processes() {
                    Ok(processes) => Enumeration {
                        source: EnumerationSource::Fallback,
                        processes,
                    },
                    Err(fallback_err) => {
                        tracing::error!(error = %fallback_err, "fallback process enumeration failed");
                        Enumeration::empty()
                    }
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Native
// ---------------------------------------------------------------------------

pub struct SysinfoEnumerator;

impl ProcessEnumerator for SysinfoEnumerator {
    fn list_processes(&self) -> Result<Vec<ProcessInfo>, EnumerateError> {
        let mut sys = System::new();
        sys.refresh_processes_specifics(
            ProcessRefreshKind::new()
                .with_cmd(UpdateKind::Always)
                .with_exe(UpdateKind::Always),
        );

        let mut processes = Vec::with_capacity(sys.processes().len());
        for (pid, process) in sys.processes() {
            let name = process.name().trim();
            if name.is_empty() {
                continue;
            }
            let cmd = match process.exe() {
                Some(exe) if !exe.as_os_str().is_empty() => exe.to_string_lossy().into_owned(),
                _ => process.cmd().join(" "),
            };
            processes.push(finish_record(name.to_string(), pid.as_u32(), cmd));
        }
        if processes.is_empty() {
            return Err(EnumerateError::Parse("sysinfo returned no processes".into()));
        }
        Ok(processes)
    }
}

// ---------------------------------------------------------------------------
// Command fallback
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputFormat {
    WmicCsv,
    Ps,
}

/// Runs a platform command and parses its output. The child is killed if
/// it outlives `timeout`.
#[derive(Debug, Clone)]
pub struct CommandEnumerator {
    program: String,
    args: Vec<String>,
    format: OutputFormat,
    timeout: Duration,
}

impl CommandEnumerator {
    pub fn platform(timeout: Duration) -> Self {
        if cfg!(windows) {
            Self::wmic(timeout)
        } else {
            Self::ps(timeout)
        }
    }

    pub fn wmic(timeout: Duration) -> Self {
        Self {
            program: "wmic".into(),
            args: ["process", "get", "Name,ProcessId,ExecutablePath", "/FORMAT:CSV"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            format: OutputFormat::WmicCsv,
            timeout,
        }
    }

    pub fn ps(timeout: Duration) -> Self {
        Self {
            program: "ps".into(),
            args: vec!["-axo".into(), "pid=,comm=".into()],
            format: OutputFormat::Ps,
            timeout,
        }
    }

    fn command_line(&self, args: &[String]) -> String {
        std::iter::once(self.program.as_str())
            .chain(args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn output(&self, args: &[String]) -> Result<String, EnumerateError> {
        let bytes = run_with_timeout(&self.program, args, self.timeout)
            .map_err(|e| with_command(e, self.command_line(args)))?;
        Ok(decode_output(&bytes))
    }
}

impl ProcessEnumerator for CommandEnumerator {
    fn list_processes(&self) -> Result<Vec<ProcessInfo>, EnumerateError> {
        let text = self.output(&self.args)?;
        let processes = match self.format {
            OutputFormat::WmicCsv => parse_wmic_csv(&text),
            OutputFormat::Ps => {
                // Either column may contain spaces, so each gets its own run.
                let args = self.output(&["-axo".to_string(), "pid=,args=".to_string()])?;
                join_ps(&text, &args)
            }
        };
        if processes.is_empty() {
            return Err(EnumerateError::Parse(format!(
                "`{}` produced no process rows",
                self.command_line(&self.args)
            )));
        }
        Ok(processes)
    }
}

fn with_command(err: EnumerateError, command: String) -> EnumerateError {
    match err {
        EnumerateError::Spawn { source, .. } => EnumerateError::Spawn { command, source },
        EnumerateError::Timeout { after, .. } => EnumerateError::Timeout { command, after },
        EnumerateError::Failed { status, stderr, .. } => EnumerateError::Failed {
            command,
            status,
            stderr,
        },
        other => other,
    }
}

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Run `program args…`, returning stdout. Pipes are drained on helper
/// threads so a chatty child cannot block on a full pipe.
pub(crate) fn run_with_timeout(
    program: &str,
    args: &[String],
    timeout: Duration,
) -> Result<Vec<u8>, EnumerateError> {
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|source| EnumerateError::Spawn {
            command: program.to_string(),
            source,
        })?;

    let stdout = child.stdout.take().map(drain);
    let stderr = child.stderr.take().map(drain);

    let deadline = Instant::now() + timeout;
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) if Instant::now() >= deadline => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(EnumerateError::Timeout {
                    command: program.to_string(),
                    after: timeout,
                });
            }
            Ok(None) => thread::sleep(POLL_INTERVAL),
            Err(source) => {
                let _ = child.kill();
                return Err(EnumerateError::Spawn {
                    command: program.to_string(),
                    source,
                });
            }
        }
    };

    let out = stdout.and_then(|h| h.join().ok()).unwrap_or_default();
    let err = stderr.and_then(|h| h.join().ok()).unwrap_or_default();
    if !status.success() {
        return Err(EnumerateError::Failed {
            command: program.to_string(),
            status: status.to_string(),
            stderr: String::from_utf8_lossy(&err).trim().to_string(),
        });
    }
    Ok(out)
}

fn drain<R: Read + Send + 'static>(mut reader: R) -> thread::JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = reader.read_to_end(&mut buf);
        buf
    })
}

/// UTF-16LE when the bytes contain NUL, else UTF-8, else Shift-JIS.
pub fn decode_output(bytes: &[u8]) -> String {
    if bytes.contains(&0) {
        let (text, _, had_errors) = encoding_rs::UTF_16LE.decode(bytes);
        if !had_errors {
            return text.into_owned();
        }
    }
    if let Ok(text) = std::str::from_utf8(bytes) {
        return text.to_string();
    }
    let (text, _, _) = encoding_rs::SHIFT_JIS.decode(bytes);
    text.into_owned()
}

/// Parse `wmic process get Name,ProcessId,ExecutablePath /FORMAT:CSV`.
///
/// wmic orders columns itself (`Node,ExecutablePath,Name,ProcessId`), so the
/// header row decides the layout when present.
pub fn parse_wmic_csv(text: &str) -> Vec<ProcessInfo> {
    let mut columns: Option<(usize, usize, usize)> = None;
    let mut processes = Vec::new();

    for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let record = split_csv_line(line);
        if columns.is_none() {
            let find = |wanted: &str| {
                record
                    .iter()
                    .position(|f| f.trim().eq_ignore_ascii_case(wanted))
            };
            if let (Some(name), Some(pid), Some(path)) =
                (find("Name"), find("ProcessId"), find("ExecutablePath"))
            {
                columns = Some((name, pid, path));
                continue;
            }
        }
        let (name_idx, pid_idx, path_idx) = columns.unwrap_or((1, 2, 3));
        if record.len() <= name_idx.max(pid_idx).max(path_idx) {
            continue;
        }
        let name = record[name_idx].trim();
        let Ok(pid) = record[pid_idx].trim().parse::<u32>() else {
            continue;
        };
        if name.is_empty() || pid == 0 {
            continue;
        }
        processes.push(finish_record(
            name.to_string(),
            pid,
            record[path_idx].trim().to_string(),
        ));
    }
    processes
}

/// Split `ps -axo pid=,<column>=` output into `(pid, value)` rows. The
/// value is the rest of the line and may contain spaces.
fn ps_rows(text: &str) -> Vec<(u32, &str)> {
    text.lines()
        .filter_map(|line| {
            let line = line.trim();
            let (pid, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
            let pid = pid.parse::<u32>().ok().filter(|&pid| pid != 0)?;
            Some((pid, rest.trim()))
        })
        .collect()
}

/// Join `ps -axo pid=,comm=` with `ps -axo pid=,args=` by pid. `comm` may be
/// a full path on macOS; the name is its last component. Processes missing
/// from the second listing use `comm` as their command line.
pub fn join_ps(comm_text: &str, args_text: &str) -> Vec<ProcessInfo> {
    let args: HashMap<u32, &str> = ps_rows(args_text).into_iter().collect();
    let mut processes = Vec::new();
    for (pid, comm) in ps_rows(comm_text) {
        let name = playtime_core::types::exe_file_name(comm);
        if name.is_empty() {
            continue;
        }
        let cmd = args
            .get(&pid)
            .copied()
            .filter(|a| !a.is_empty())
            .unwrap_or(comm);
        processes.push(finish_record(name.to_string(), pid, cmd.to_string()));
    }
    processes
}

/// Shared post-processing: empty command lines fall back to the name, and on
/// Windows names get the `.exe` suffix configured paths carry.
fn finish_record(mut name: String, pid: u32, cmd: String) -> ProcessInfo {
    if cfg!(windows) && !name.to_ascii_lowercase().ends_with(".exe") {
        name.push_str(".exe");
    }
    let cmd = if cmd.trim().is_empty() {
        name.clone()
    } else {
        cmd
    };
    ProcessInfo { name, pid, cmd }
}

/// Minimal RFC 4180 field splitter: quoted fields, doubled quotes.
fn split_csv_line(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes && chars.peek() == Some(&'"') => {
                field.push('"');
                chars.next();
            }
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => fields.push(std::mem::take(&mut field)),
            _ => field.push(c),
        }
    }
    fields.push(field);
    fields
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessSnapshotItem {
    pub name: String,
    pub pid: u32,
    pub cmd: String,
    pub normalized_name: String,
    pub normalized_cmd: String,
}

/// Diagnostic view of one enumeration, with the tokens the matcher sees.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessSnapshot {
    pub source: EnumerationSource,
    pub items: Vec<ProcessSnapshotItem>,
}

impl From<Enumeration> for ProcessSnapshot {
    fn from(enumeration: Enumeration) -> Self {
        let items = enumeration
            .processes
            .into_iter()
            .map(|p| ProcessSnapshotItem {
                normalized_name: normalize_token(&p.name),
                normalized_cmd: normalize_token(&p.cmd),
                name: p.name,
                pid: p.pid,
                cmd: p.cmd,
            })
            .collect();
        Self {
            source: enumeration.source,
            items,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(Result<Vec<ProcessInfo>, ()>);

    impl ProcessEnumerator for Fixed {
        fn list_processes(&self) -> Result<Vec<ProcessInfo>, EnumerateError> {
            self.0
                .clone()
                .map_err(|_| EnumerateError::Parse("scripted failure".into()))
        }
    }

    fn one(name: &str) -> Vec<ProcessInfo> {
        vec![ProcessInfo {
            name: name.into(),
            pid: 1,
            cmd: name.into(),
        }]
    }

    #[test]
    fn primary_success_reports_native() {
        let e = FallbackEnumerator::new(Arc::new(Fixed(Ok(one("a")))), Arc::new(Fixed(Err(()))));
        let result = e.enumerate();
        assert_eq!(result.source, EnumerationSource::Native);
        assert_eq!(result.processes[0].name, "a");
    }

    #[test]
    fn primary_failure_uses_fallback() {
        let e = FallbackEnumerator::new(Arc::new(Fixed(Err(()))), Arc::new(Fixed(Ok(one("b")))));
        let result = e.enumerate();
        assert_eq!(result.source, EnumerationSource::Fallback);
        assert_eq!(result.processes.len(), 1);
    }

    #[test]
    fn both_failing_yields_empty_list() {
        let e = FallbackEnumerator::new(Arc::new(Fixed(Err(()))), Arc::new(Fixed(Err(()))));
        let result = e.enumerate();
        assert_eq!(result.source, EnumerationSource::None);
        assert!(result.processes.is_empty());
    }

    #[test]
    fn decodes_utf16le_output() {
        let text = "Node,ExecutablePath,Name,ProcessId\r\n";
        let mut bytes = vec![0xFF, 0xFE];
        for unit in text.encode_utf16() {
            bytes.extend_from_slice(&unit.to_le_bytes());
        }
        assert_eq!(decode_output(&bytes), text);
    }

    #[test]
    fn decodes_shift_jis_when_not_utf8() {
        // "ゲーム" in Shift-JIS
        let bytes = [0x83, 0x51, 0x81, 0x5B, 0x83, 0x80];
        assert_eq!(decode_output(&bytes), "ゲーム");
    }

    #[test]
    fn utf8_passes_through() {
        assert_eq!(decode_output("ゲーム.exe".as_bytes()), "ゲーム.exe");
    }

    #[test]
    fn wmic_csv_uses_header_layout() {
        let text = "\r\nNode,ExecutablePath,Name,ProcessId\r\n\
                    HOST,C:\\Games\\Foo\\foo.exe,foo.exe,1234\r\n\
                    HOST,,System,4\r\n\
                    HOST,,Idle,0\r\n";
        let procs = parse_wmic_csv(text);
        assert_eq!(procs.len(), 2);
        assert_eq!(procs[0].name, "foo.exe");
        assert_eq!(procs[0].pid, 1234);
        assert_eq!(procs[0].cmd, r"C:\Games\Foo\foo.exe");
        // empty path falls back to the name
        assert_eq!(procs[1].cmd, procs[1].name);
    }

    #[test]
    fn csv_splitter_handles_quotes() {
        assert_eq!(
            split_csv_line(r#"a,"b,c","say ""hi""""#),
            vec!["a", "b,c", r#"say "hi""#]
        );
    }

    #[test]
    fn ps_listings_are_joined_by_pid() {
        let comm = "    1 /sbin/launchd\n\
                    4242 /Applications/My Game.app/Contents/MacOS/My Game\n\
                    77 kworker\n\
                    garbage line\n";
        let args = "    1 /sbin/launchd\n\
                    4242 /Applications/My Game.app/Contents/MacOS/My Game -psn_0_1\n";
        let procs = join_ps(comm, args);
        assert_eq!(procs.len(), 3);
        assert_eq!(procs[0].pid, 1);
        assert!(procs[1].name.starts_with("My Game"));
        assert_eq!(
            procs[1].cmd,
            "/Applications/My Game.app/Contents/MacOS/My Game -psn_0_1"
        );
        // Gone before the second listing.
        assert_eq!(procs[2].cmd, "kworker");
    }

    #[test]
    fn snapshot_carries_normalized_tokens() {
        let snapshot = ProcessSnapshot::from(Enumeration {
            source: EnumerationSource::Fallback,
            processes: vec![ProcessInfo {
                name: "FOO.EXE".into(),
                pid: 9,
                cmd: r"C:\GAMES\FOO.EXE".into(),
            }],
        });
        assert_eq!(snapshot.items[0].normalized_name, "foo.exe");
        assert_eq!(snapshot.items[0].normalized_cmd, r"c:\games\foo.exe");
        let json = serde_json::to_value(&snapshot).expect("serialize");
        assert_eq!(json["source"], "fallback");
        assert!(json["items"][0].get("normalizedCmd").is_some());
    }

    #[cfg(unix)]
    #[test]
    fn command_timeout_kills_child() {
        let started = Instant::now();
        let err = run_with_timeout("sleep", &["5".to_string()], Duration::from_millis(100))
            .unwrap_err();
        assert!(matches!(err, EnumerateError::Timeout { .. }), "got: {err}");
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[test]
    fn missing_program_is_a_spawn_error() {
        let err = run_with_timeout(
            "playtime-definitely-not-a-real-binary",
            &[],
            Duration::from_secs(1),
        )
        .unwrap_err();
        assert!(matches!(err, EnumerateError::Spawn { .. }));
    }
}
