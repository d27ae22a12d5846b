use std::path::Path;
use std::process::Command;

use assert_cmd::prelude::*;
use predicates::str::contains;
use serde_json::Value;
use tempfile::TempDir;

fn playtime_cmd(data_dir: &Path) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("playtime"));
    cmd.env("PLAYTIME_HOME", data_dir)
        .env_remove("PLAYTIME_OFFLINE")
        .env_remove("PLAYTIME_DB_PATH")
        .env_remove("PLAYTIME_CREDENTIAL_KEY")
        .env_remove("RUST_LOG");
    cmd
}

fn json_output(data_dir: &Path, args: &[&str]) -> Value {
    let output = playtime_cmd(data_dir)
        .args(args)
        .output()
        .expect("run playtime");
    assert!(
        output.status.success(),
        "playtime {args:?} failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).expect("json stdout")
}

fn add_game(data_dir: &Path, title: &str) -> String {
    playtime_cmd(data_dir)
        .args(["game", "add", title, "--exe", &format!(r"C:\Games\{title}\{title}.exe")])
        .assert()
        .success()
        .stdout(contains("Added"));
    let games = json_output(data_dir, &["game", "list", "--json", "--search", title]);
    games[0]["id"].as_str().expect("id").to_string()
}

#[test]
fn init_writes_config_and_database() {
    let home = TempDir::new().expect("home");
    playtime_cmd(home.path())
        .arg("init")
        .assert()
        .success()
        .stdout(contains("config.yaml"))
        .stdout(contains("schema v1"));
    assert!(home.path().join("config.yaml").exists());
    assert!(home.path().join("playtime.db").exists());

    playtime_cmd(home.path())
        .arg("init")
        .assert()
        .success()
        .stdout(contains("Keeping existing"));
}

#[test]
fn games_can_be_added_listed_and_shown_by_title() {
    let home = TempDir::new().expect("home");
    let id = add_game(home.path(), "Rewrite");
    add_game(home.path(), "Clannad");

    let games = json_output(home.path(), &["game", "list", "--json"]);
    let titles: Vec<&str> = games
        .as_array()
        .expect("array")
        .iter()
        .filter_map(|g| g["title"].as_str())
        .collect();
    assert_eq!(titles, vec!["Clannad", "Rewrite"]);

    let detail = json_output(home.path(), &["game", "show", "rewrite", "--json"]);
    assert_eq!(detail["id"], id.as_str());
    assert_eq!(detail["exePath"], r"C:\Games\Rewrite\Rewrite.exe");

    playtime_cmd(home.path())
        .args(["game", "show", "Missing"])
        .assert()
        .failure()
        .stderr(contains("no game with id or title 'Missing'"));
}

#[test]
fn sessions_keep_the_total_in_step() {
    let home = TempDir::new().expect("home");
    let id = add_game(home.path(), "Ever17");

    playtime_cmd(home.path())
        .args(["session", "add", &id, "--duration", "1h30m", "--name", "route A"])
        .assert()
        .success()
        .stdout(contains("1h 30m"));
    playtime_cmd(home.path())
        .args(["session", "add", "Ever17", "--duration", "600"])
        .assert()
        .success();

    let detail = json_output(home.path(), &["game", "show", &id, "--json"]);
    assert_eq!(detail["totalPlayTime"], 6000);
    let sessions = detail["sessions"].as_array().expect("sessions");
    assert_eq!(sessions.len(), 2);

    let named = sessions
        .iter()
        .find(|s| s["sessionName"] == "route A")
        .expect("named session");
    let session_id = named["id"].as_str().expect("session id").to_string();

    playtime_cmd(home.path())
        .args(["session", "rename", &session_id, "route B"])
        .assert()
        .success();
    playtime_cmd(home.path())
        .args(["session", "delete", &session_id])
        .assert()
        .success();

    let detail = json_output(home.path(), &["game", "show", &id, "--json"]);
    assert_eq!(detail["totalPlayTime"], 600);

    playtime_cmd(home.path())
        .args(["session", "delete", &session_id])
        .assert()
        .failure()
        .stderr(contains("no session"));
    playtime_cmd(home.path())
        .args(["session", "add", &id, "--duration", "10x"])
        .assert()
        .failure();
}

#[test]
fn chapters_can_be_added_made_current_and_assigned() {
    let home = TempDir::new().expect("home");
    let id = add_game(home.path(), "Steins Gate");

    for name in ["Prologue", "Open the Steins Gate"] {
        playtime_cmd(home.path())
            .args(["chapter", "add", &id, name])
            .assert()
            .success()
            .stdout(contains("Added chapter"));
    }
    let chapters = json_output(home.path(), &["chapter", "list", &id, "--json"]);
    let names: Vec<&str> = chapters
        .as_array()
        .expect("array")
        .iter()
        .filter_map(|c| c["name"].as_str())
        .collect();
    assert_eq!(names, vec!["Prologue", "Open the Steins Gate"]);
    let second = chapters[1]["id"].as_str().expect("chapter id").to_string();

    playtime_cmd(home.path())
        .args(["chapter", "current", &id, "open the steins gate"])
        .assert()
        .success();
    let detail = json_output(home.path(), &["game", "show", &id, "--json"]);
    assert_eq!(detail["currentChapter"], second.as_str());

    playtime_cmd(home.path())
        .args(["session", "add", &id, "--duration", "20m"])
        .assert()
        .success();
    let detail = json_output(home.path(), &["game", "show", &id, "--json"]);
    let session_id = detail["sessions"][0]["id"].as_str().expect("session").to_string();

    playtime_cmd(home.path())
        .args(["session", "chapter", &session_id, "Prologue"])
        .assert()
        .success()
        .stdout(contains("Prologue"));
    let detail = json_output(home.path(), &["game", "show", &id, "--json"]);
    assert_eq!(detail["sessions"][0]["chapterId"], chapters[0]["id"]);

    playtime_cmd(home.path())
        .args(["session", "chapter", &session_id, "Epilogue"])
        .assert()
        .failure()
        .stderr(contains("no chapter 'Epilogue'"));
    playtime_cmd(home.path())
        .args(["session", "chapter", &session_id, "--clear"])
        .assert()
        .success();
    let detail = json_output(home.path(), &["game", "show", &id, "--json"]);
    assert!(detail["sessions"][0].get("chapterId").map_or(true, Value::is_null));

    playtime_cmd(home.path())
        .args(["chapter", "delete", &second])
        .assert()
        .success();
    let detail = json_output(home.path(), &["game", "show", &id, "--json"]);
    assert!(detail.get("currentChapter").map_or(true, Value::is_null));
    assert_eq!(detail["chapters"].as_array().expect("chapters").len(), 1);
}

#[test]
fn deleting_a_game_removes_it_from_the_library() {
    let home = TempDir::new().expect("home");
    let id = add_game(home.path(), "Fate");
    add_game(home.path(), "Tsukihime");
    playtime_cmd(home.path())
        .args(["session", "add", &id, "--duration", "5m"])
        .assert()
        .success();

    playtime_cmd(home.path())
        .args(["game", "delete", "fate"])
        .assert()
        .success()
        .stdout(contains("Deleted 'Fate'"));

    let games = json_output(home.path(), &["game", "list", "--json"]);
    assert_eq!(games.as_array().expect("array").len(), 1);
    playtime_cmd(home.path())
        .args(["game", "show", &id])
        .assert()
        .failure()
        .stderr(contains("no game"));
    playtime_cmd(home.path())
        .args(["game", "delete", "Fate"])
        .assert()
        .failure();
}

#[test]
fn sync_moves_games_between_machines_through_a_folder_bucket() {
    let bucket = TempDir::new().expect("bucket");
    let endpoint = format!("file://{}", bucket.path().display());
    let first = TempDir::new().expect("first");
    let second = TempDir::new().expect("second");

    for home in [&first, &second] {
        playtime_cmd(home.path())
            .args(["credential", "set", "--bucket", "library", "--endpoint", &endpoint])
            .assert()
            .success();
    }
    playtime_cmd(first.path())
        .args(["credential", "show"])
        .assert()
        .success()
        .stdout(contains("library"));

    let id = add_game(first.path(), "Planetarian");
    playtime_cmd(first.path())
        .args(["session", "add", &id, "--duration", "45m"])
        .assert()
        .success();

    let up = json_output(first.path(), &["sync", "--all", "--json"]);
    assert_eq!(up["uploadedGames"], 1);
    assert_eq!(up["uploadedSessions"], 1);
    assert!(bucket.path().join("library").join("games.json").exists());

    let again = json_output(first.path(), &["sync", "--all", "--json"]);
    assert_eq!(again["skippedGames"], 1);

    let down = json_output(second.path(), &["sync", "--all", "--json"]);
    assert_eq!(down["downloadedGames"], 1);
    let copy = json_output(second.path(), &["game", "show", &id, "--json"]);
    assert_eq!(copy["totalPlayTime"], 2700);
    assert_eq!(copy["exePath"], "__unconfigured__");
}

#[test]
fn sync_is_refused_offline_and_without_a_target() {
    let home = TempDir::new().expect("home");
    add_game(home.path(), "Air");

    playtime_cmd(home.path())
        .env("PLAYTIME_OFFLINE", "1")
        .args(["sync", "--all"])
        .assert()
        .failure()
        .stderr(contains("offline"));
    playtime_cmd(home.path())
        .arg("sync")
        .assert()
        .failure()
        .stderr(contains("--all"));
    playtime_cmd(home.path())
        .args(["sync", "Air"])
        .assert()
        .failure()
        .stderr(contains("credential"));
}

#[test]
fn offline_switch_is_saved_and_honoured_without_a_daemon() {
    let bucket = TempDir::new().expect("bucket");
    let home = TempDir::new().expect("home");
    let endpoint = format!("file://{}", bucket.path().display());
    playtime_cmd(home.path())
        .args(["credential", "set", "--bucket", "library", "--endpoint", &endpoint])
        .assert()
        .success();
    add_game(home.path(), "Air");

    playtime_cmd(home.path())
        .args(["offline", "on"])
        .assert()
        .success()
        .stdout(contains("daemon is not running"));
    let config = std::fs::read_to_string(home.path().join("config.yaml")).expect("config");
    assert!(config.contains("offline: true"), "{config}");

    for args in [&["sync", "--all"][..], &["cloud", "list"][..]] {
        playtime_cmd(home.path())
            .args(args)
            .assert()
            .failure()
            .stderr(contains("offline"));
    }
    assert!(!bucket.path().join("library").join("games.json").exists());

    playtime_cmd(home.path())
        .args(["offline", "off"])
        .assert()
        .success();
    let up = json_output(home.path(), &["sync", "--all", "--json"]);
    assert_eq!(up["uploadedGames"], 1);
}

#[test]
fn save_folders_and_cloud_data_through_the_cli() {
    let bucket = TempDir::new().expect("bucket");
    let home = TempDir::new().expect("home");
    let endpoint = format!("file://{}", bucket.path().display());
    playtime_cmd(home.path())
        .args(["credential", "set", "--bucket", "library", "--endpoint", &endpoint])
        .assert()
        .success();

    let saves = home.path().join("Saves");
    std::fs::create_dir_all(&saves).expect("mkdir");
    std::fs::write(saves.join("slot1.sav"), "flag=7").expect("write");
    playtime_cmd(home.path())
        .args(["game", "add", "Rewrite", "--exe", r"C:\Games\Rewrite\Rewrite.exe"])
        .arg("--save-folder")
        .arg(&saves)
        .assert()
        .success();

    let up = json_output(home.path(), &["sync", "save", "upload", "Rewrite", "--json"]);
    assert_eq!(up["files"], 1);
    playtime_cmd(home.path())
        .args(["sync", "save", "upload", "Rewrite"])
        .assert()
        .success()
        .stdout(contains("unchanged"));

    let restore = home.path().join("Restored");
    playtime_cmd(home.path())
        .args(["sync", "save", "download", "Rewrite", "--to"])
        .arg(&restore)
        .assert()
        .success()
        .stdout(contains("Restored 1 file(s)"));
    assert_eq!(
        std::fs::read_to_string(restore.join("slot1.sav")).expect("restored"),
        "flag=7"
    );

    let items = json_output(home.path(), &["cloud", "list", "--json"]);
    let item = &items[0];
    assert_eq!(item["fileCount"], 2);
    assert!(item["remotePath"].as_str().expect("path").starts_with("games/"));

    playtime_cmd(home.path())
        .args(["cloud", "delete", "Rewrite"])
        .assert()
        .success()
        .stdout(contains("Deleted 2 object(s)"));
    playtime_cmd(home.path())
        .args(["cloud", "list"])
        .assert()
        .success()
        .stdout(contains("The bucket is empty."));
}

#[test]
fn daemon_commands_without_a_daemon() {
    let home = TempDir::new().expect("home");
    add_game(home.path(), "Kanon");

    playtime_cmd(home.path())
        .arg("status")
        .assert()
        .success()
        .stdout(contains("daemon is not running"));
    playtime_cmd(home.path())
        .args(["pause", "Kanon"])
        .assert()
        .failure()
        .stderr(contains("daemon is not running"));
    playtime_cmd(home.path())
        .args(["daemon", "status"])
        .assert()
        .success()
        .stdout(contains("\"running\": false"));
    playtime_cmd(home.path())
        .args(["daemon", "logs"])
        .assert()
        .success()
        .stdout(contains("log file not found"));
}
