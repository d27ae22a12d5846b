//! On-disk layout of the config and credential files.

use assert_fs::prelude::*;
use predicates::prelude::*;

use playtime_core::config::{data_dir_at, images_dir_at};
use playtime_core::{Config, Credential, CredentialStore, FileCredentialStore};

#[test]
fn config_file_is_plain_yaml_without_leftovers() {
    let home = assert_fs::TempDir::new().expect("home");
    let data_dir = data_dir_at(home.path());

    let mut config = Config::default();
    config.monitor.interval_secs = 3;
    config.cloud.offline = true;
    config.save_to(&data_dir).expect("save");

    let file = home.child(".playtime/config.yaml");
    file.assert(predicate::path::is_file());
    file.assert(predicate::str::contains("interval_secs: 3"));
    file.assert(predicate::str::contains("offline: true"));
    home.child(".playtime/config.yaml.tmp")
        .assert(predicate::path::missing());

    assert_eq!(Config::load_from(&data_dir).expect("load"), config);
}

#[test]
fn hand_edited_config_overrides_only_named_fields() {
    let dir = assert_fs::TempDir::new().expect("dir");
    dir.child("config.yaml")
        .write_str("log_level: debug\ncloud:\n  metadata_key: library.json\n")
        .expect("write");

    let config = Config::load_from(dir.path()).expect("load");
    assert_eq!(config.log_level, "debug");
    assert_eq!(config.metadata_key(), "library.json");
    assert_eq!(config.monitor.interval_secs, 2);
    assert!(config.cloud.sync_after_session);
}

#[test]
fn credentials_are_keyed_json() {
    let dir = assert_fs::TempDir::new().expect("dir");
    let store = FileCredentialStore::in_dir(dir.path());
    store
        .save(
            "work",
            &Credential {
                bucket_name: "games".into(),
                endpoint: "file:///srv/bucket".into(),
                secret_access_key: "s3cr3t".into(),
                ..Credential::default()
            },
        )
        .expect("save");

    let file = dir.child("credentials.json");
    file.assert(predicate::str::contains("\"work\""));
    file.assert(predicate::str::contains("\"bucketName\": \"games\""));
    assert_eq!(store.load("work").expect("load").secret_access_key, "s3cr3t");
}

#[test]
fn image_dirs_are_per_game() {
    let data = std::path::Path::new("/data");
    assert_eq!(images_dir_at(data, "g1"), data.join("images").join("g1"));
}
