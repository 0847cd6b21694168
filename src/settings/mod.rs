//! User-tunable settings consumed by the dispatcher.
//!
//! The settings file has lived through two shapes of the command map:
//! the legacy `{command: topic_id}` and the current `{topic_id: [commands]}`.
//! Everything downstream sees only the canonical shape; normalization happens
//! here and nowhere else.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Mutex;

use serde_json::{json, Value};
use tracing::{info, warn};

use crate::error::Result;

const KEY_TARGET_GROUP: &str = "selected_target_group";
const KEY_COMMAND_MAP: &str = "active_command_to_topic_map";
const KEY_AUTHORIZED: &str = "directly_authorized_pvs";

/// The configured categorization destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetGroup {
    pub id: i64,
    pub is_forum: bool,
    pub title: Option<String>,
}

/// Canonical command map: topic id (`None` = main group chat) → command names.
///
/// Invariant: each command name appears under at most one topic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandMap {
    entries: BTreeMap<Option<i64>, Vec<String>>,
}

impl CommandMap {
    /// Normalize any historical on-disk shape into the canonical map.
    ///
    /// When both shapes are present the new shape wins: entries whose value
    /// is a list are taken, scalar entries are dropped with a warning.
    pub fn normalize(value: &Value) -> Self {
        let mut map = CommandMap::default();
        let Some(obj) = value.as_object() else {
            if !value.is_null() {
                warn!("Command map is not an object; resetting");
            }
            return map;
        };

        let has_list_values = obj.values().any(|v| v.is_array());

        if has_list_values {
            for (key, val) in obj {
                let Some(commands) = val.as_array() else {
                    warn!(key = %key, "Dropping non-list entry from mixed command map");
                    continue;
                };
                let Some(topic) = parse_topic_key(key) else {
                    warn!(key = %key, "Dropping mapping with invalid topic identifier");
                    continue;
                };
                for cmd in commands.iter().filter_map(|c| c.as_str()) {
                    map.insert(topic, cmd);
                }
            }
        } else {
            // Legacy shape: command → topic id (or null for main chat).
            for (cmd, val) in obj {
                let topic = match val {
                    Value::Null => None,
                    Value::Number(n) => match n.as_i64() {
                        Some(id) => Some(id),
                        None => {
                            warn!(command = %cmd, "Dropping legacy entry with non-integer topic");
                            continue;
                        }
                    },
                    Value::String(s) => match parse_topic_key(s) {
                        Some(t) => t,
                        None => {
                            warn!(command = %cmd, "Dropping legacy entry with invalid topic");
                            continue;
                        }
                    },
                    _ => {
                        warn!(command = %cmd, "Dropping legacy entry with invalid topic");
                        continue;
                    }
                };
                map.insert(topic, cmd);
            }
        }

        map
    }

    /// Insert a command under a topic, normalizing the name and enforcing the
    /// one-topic-per-command invariant (first mapping wins).
    pub fn insert(&mut self, topic: Option<i64>, command: &str) {
        let name = normalize_command_name(command);
        if name.is_empty() || self.topic_for(&name).is_some() {
            return;
        }
        self.entries.entry(topic).or_default().push(name);
    }

    /// Look up the topic a command forwards to. `Some(None)` means the main
    /// group chat; `None` means the command is not mapped.
    pub fn topic_for(&self, command: &str) -> Option<Option<i64>> {
        let name = normalize_command_name(command);
        for (topic, commands) in &self.entries {
            if commands.iter().any(|c| c == &name) {
                return Some(*topic);
            }
        }
        None
    }

    /// Remove a command from the map. Returns whether it was present.
    pub fn remove(&mut self, command: &str) -> bool {
        let name = normalize_command_name(command);
        let mut removed = false;
        self.entries.retain(|_, commands| {
            let before = commands.len();
            commands.retain(|c| c != &name);
            removed |= commands.len() != before;
            !commands.is_empty()
        });
        removed
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total number of mapped commands.
    pub fn command_count(&self) -> usize {
        self.entries.values().map(|c| c.len()).sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Option<i64>, &Vec<String>)> {
        self.entries.iter()
    }

    fn to_json(&self) -> Value {
        let mut obj = serde_json::Map::new();
        for (topic, commands) in &self.entries {
            let key = match topic {
                Some(id) => id.to_string(),
                None => "null".to_string(),
            };
            obj.insert(key, json!(commands));
        }
        Value::Object(obj)
    }
}

fn parse_topic_key(key: &str) -> Option<Option<i64>> {
    let trimmed = key.trim();
    if trimmed.eq_ignore_ascii_case("null") || trimmed.eq_ignore_ascii_case("none") {
        return Some(None);
    }
    trimmed.parse::<i64>().ok().map(Some)
}

/// Lowercase and strip the leading slash; command names are stored bare.
pub fn normalize_command_name(command: &str) -> String {
    command.trim().trim_start_matches('/').to_lowercase()
}

/// The dispatcher-visible settings snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Settings {
    pub target_group: Option<TargetGroup>,
    pub command_map: CommandMap,
    pub authorized_peers: BTreeSet<i64>,
}

impl Settings {
    fn from_json(value: &Value) -> Self {
        let mut settings = Settings::default();
        let Some(obj) = value.as_object() else {
            warn!("Settings file root is not an object; using defaults");
            return settings;
        };

        match obj.get(KEY_TARGET_GROUP) {
            Some(Value::Object(group)) => {
                if let Some(id) = group.get("id").and_then(|v| v.as_i64()) {
                    settings.target_group = Some(TargetGroup {
                        id,
                        is_forum: group
                            .get("is_forum")
                            .and_then(|v| v.as_bool())
                            .unwrap_or(false),
                        title: group
                            .get("title")
                            .and_then(|v| v.as_str())
                            .map(String::from),
                    });
                } else {
                    warn!("Target group entry has no integer id; resetting");
                }
            }
            // Legacy shape: the bare group id.
            Some(Value::Number(n)) => {
                if let Some(id) = n.as_i64() {
                    settings.target_group = Some(TargetGroup {
                        id,
                        is_forum: false,
                        title: None,
                    });
                }
            }
            Some(Value::Null) | None => {}
            Some(_) => warn!("Target group has an unrecognized shape; resetting"),
        }

        let map_value = obj.get(KEY_COMMAND_MAP).cloned().unwrap_or(Value::Null);
        if !map_value.is_object() && !map_value.is_null() {
            warn!("Command map is not an object; resetting");
        }
        settings.command_map = CommandMap::normalize(&map_value);

        match obj.get(KEY_AUTHORIZED) {
            Some(Value::Array(peers)) => {
                settings.authorized_peers = peers.iter().filter_map(|v| v.as_i64()).collect();
            }
            Some(Value::Null) | None => {}
            Some(_) => warn!("Authorized peer list is not a list; resetting"),
        }

        settings
    }

    fn to_json(&self) -> Value {
        let target = match &self.target_group {
            Some(g) => json!({"id": g.id, "is_forum": g.is_forum, "title": g.title}),
            None => Value::Null,
        };
        json!({
            KEY_TARGET_GROUP: target,
            KEY_COMMAND_MAP: self.command_map.to_json(),
            KEY_AUTHORIZED: self.authorized_peers.iter().collect::<Vec<_>>(),
        })
    }
}

/// Owner of the persisted [`Settings`]; all mutation goes through here.
pub struct SettingsStore {
    path: PathBuf,
    inner: Mutex<Settings>,
}

impl SettingsStore {
    /// Load settings from `path`, tolerating missing files and bad shapes.
    pub fn load(path: PathBuf) -> Self {
        let settings = match std::fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str::<Value>(&content) {
                Ok(value) => {
                    let s = Settings::from_json(&value);
                    info!(
                        authorized = s.authorized_peers.len(),
                        mapped_commands = s.command_map.command_count(),
                        "User settings loaded"
                    );
                    s
                }
                Err(e) => {
                    warn!(error = %e, "Settings file is not valid JSON; using defaults");
                    Settings::default()
                }
            },
            Err(_) => {
                info!(path = %path.display(), "Settings file not found; using defaults");
                Settings::default()
            }
        };
        Self {
            path,
            inner: Mutex::new(settings),
        }
    }

    /// Copy-on-snapshot read.
    pub fn snapshot(&self) -> Settings {
        self.inner.lock().unwrap().clone()
    }

    /// Persist the current settings; only expected keys are written.
    pub fn save(&self) -> Result<()> {
        let value = self.inner.lock().unwrap().to_json();
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_string_pretty(&value)?)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    pub fn set_target_group(&self, group: Option<TargetGroup>) -> Result<()> {
        self.inner.lock().unwrap().target_group = group;
        self.save()
    }

    /// Returns `false` if the peer was already authorized.
    pub fn add_authorized_peer(&self, peer_id: i64) -> Result<bool> {
        let added = self.inner.lock().unwrap().authorized_peers.insert(peer_id);
        if added {
            self.save()?;
        }
        Ok(added)
    }

    /// Returns `false` if the peer was not authorized.
    pub fn remove_authorized_peer(&self, peer_id: i64) -> Result<bool> {
        let removed = self.inner.lock().unwrap().authorized_peers.remove(&peer_id);
        if removed {
            self.save()?;
        }
        Ok(removed)
    }

    pub fn map_command(&self, topic: Option<i64>, command: &str) -> Result<()> {
        self.inner.lock().unwrap().command_map.insert(topic, command);
        self.save()
    }

    pub fn unmap_command(&self, command: &str) -> Result<bool> {
        let removed = self.inner.lock().unwrap().command_map.remove(command);
        if removed {
            self.save()?;
        }
        Ok(removed)
    }
}
