//! Bucket contents grouped per game, for listing and deletion.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::object_store::ObjectInfo;

/// One group of objects: `games/<id>` or a top-level name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloudDataItem {
    pub name: String,
    pub total_size: u64,
    pub file_count: usize,
    pub last_modified: Option<DateTime<Utc>>,
    pub remote_path: String,
}

/// `games/<id>/...` groups under `games/<id>`; anything else under its
/// first path segment.
pub fn detect_game_prefix(key: &str) -> &str {
    let mut parts = key.splitn(3, '/');
    match (parts.next(), parts.next()) {
        (Some("games"), Some(id)) if !id.is_empty() => &key[.."games/".len() + id.len()],
        (Some(first), _) => first,
        _ => key,
    }
}

/// Group objects by [`detect_game_prefix`], sorted by name.
pub fn group_objects(objects: &[ObjectInfo]) -> Vec<CloudDataItem> {
    let mut groups: BTreeMap<&str, CloudDataItem> = BTreeMap::new();
    for object in objects {
        let prefix = detect_game_prefix(&object.key);
        let item = groups.entry(prefix).or_insert_with(|| CloudDataItem {
            name: prefix.rsplit('/').next().unwrap_or(prefix).to_string(),
            total_size: 0,
            file_count: 0,
            last_modified: None,
            remote_path: prefix.to_string(),
        });
        item.total_size += object.size;
        item.file_count += 1;
        item.last_modified = item.last_modified.max(object.last_modified);
    }
    let mut items: Vec<CloudDataItem> = groups.into_values().collect();
    items.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.remote_path.cmp(&b.remote_path)));
    items
}

/// Normalize a delete target to an object prefix. `""` and `"*"` mean the
/// whole bucket; anything else is treated as a folder.
pub fn delete_prefix(path: &str) -> String {
    let path = path.trim().trim_matches('/');
    if path.is_empty() || path == "*" {
        String::new()
    } else {
        format!("{path}/")
    }
}
