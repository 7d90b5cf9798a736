//! Settings loading with repair and environment variable overrides.
//!
//! Loading flow:
//! 1. Read `config.json`. A missing or unparseable file is replaced by defaults.
//! 2. Record keys the file lacks, strip keys the defaults do not know.
//! 3. Deep-merge the file over compiled [`LobbySettings::default()`].
//! 4. Reset any top-level key whose value has the wrong type, then clamp.
//! 5. Flip `firstTimeRun`, and write the file back if anything changed.
//! 6. Apply environment variable overrides (never persisted).

use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::errors::{Result, SettingsError};
use crate::types::LobbySettings;

/// Default config file location, relative to the working directory.
pub fn settings_path() -> PathBuf {
    PathBuf::from("config.json")
}

/// What `load_or_repair` changed on the way in.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RepairReport {
    /// The file was missing or unparseable and was rebuilt from defaults.
    pub recreated: bool,
    /// Dotted paths of keys filled in from defaults.
    pub added: Vec<String>,
    /// Dotted paths of unknown keys that were dropped.
    pub removed: Vec<String>,
    /// Top-level keys whose values had the wrong type and were reset.
    pub reset: Vec<String>,
    /// Out-of-range values that were clamped.
    pub clamped: Vec<String>,
    /// `firstTimeRun` was flipped.
    pub first_run_flipped: bool,
}

impl RepairReport {
    pub fn changed(&self) -> bool {
        self.recreated
            || self.first_run_flipped
            || !self.added.is_empty()
            || !self.removed.is_empty()
            || !self.reset.is_empty()
            || !self.clamped.is_empty()
    }
}

/// Settings plus the repair report.
#[derive(Clone, Debug)]
pub struct Loaded {
    pub settings: LobbySettings,
    pub report: RepairReport,
}

/// Load the config file, repairing and rewriting it when needed.
///
/// Malformed content is never fatal. Only a failed read of an existing file
/// (permissions, I/O) is returned as an error. A failed write-back is logged.
pub fn load_or_repair(path: &Path) -> Result<Loaded> {
    let defaults = serde_json::to_value(LobbySettings::default())?;
    let mut report = RepairReport::default();

    let user = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        match serde_json::from_str::<Value>(&content) {
            Ok(Value::Object(map)) => Some(map),
            Ok(_) => {
                warn!(?path, "settings file is not a JSON object, recreating");
                None
            }
            Err(e) => {
                warn!(?path, error = %e, "settings file is not valid JSON, recreating");
                None
            }
        }
    } else {
        info!(?path, "settings file not found, creating it");
        None
    };

    let user = match user {
        Some(map) => map,
        None => {
            report.recreated = true;
            Map::new()
        }
    };

    let Value::Object(defaults_map) = &defaults else {
        return Err(SettingsError::InvalidValue("defaults are not an object".into()));
    };
    let previous_first_run = user.get("firstTimeRun").and_then(Value::as_bool);

    if !report.recreated {
        collect_missing(defaults_map, &user, "", &mut report.added);
    }
    let stripped = strip_unknown(defaults_map, user, "", &mut report.removed);
    let merged = deep_merge(defaults.clone(), Value::Object(stripped));

    let mut settings = deserialize_lenient(merged, defaults_map, &mut report.reset)?;
    report.clamped = settings.normalize();

    if previous_first_run == Some(true) {
        settings.first_time_run = false;
        report.first_run_flipped = true;
    }

    for key in &report.added {
        info!(?path, key = %key, "adding missing settings key");
    }
    for key in &report.removed {
        info!(?path, key = %key, "removing unknown settings key");
    }
    for key in &report.reset {
        warn!(?path, key = %key, "resetting settings key with invalid value");
    }
    for change in &report.clamped {
        warn!(?path, change = %change, "clamped settings value");
    }

    if report.changed() {
        if let Err(e) = write_settings(path, &settings) {
            warn!(?path, error = %e, "failed to write repaired settings");
        } else {
            info!(?path, "recorded settings changes");
        }
    } else {
        debug!(?path, "settings file intact, no changes made");
    }

    apply_env_overrides(&mut settings);
    Ok(Loaded { settings, report })
}

/// Write settings as pretty JSON, creating parent directories.
pub fn write_settings(path: &Path, settings: &LobbySettings) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let content = serde_json::to_string_pretty(settings)?;
    std::fs::write(path, content)?;
    Ok(())
}

/// Recursive deep merge of two JSON values.
///
/// - Objects are merged recursively (source overrides target per-key)
/// - Arrays and primitives are replaced entirely by source
/// - Null values in source are skipped (preserving target)
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

fn join_path(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{prefix}.{key}")
    }
}

/// Record every defaults key absent from `user`, descending into objects both share.
fn collect_missing(
    defaults: &Map<String, Value>,
    user: &Map<String, Value>,
    prefix: &str,
    out: &mut Vec<String>,
) {
    for (key, default_val) in defaults {
        match (default_val, user.get(key)) {
            (_, None) => out.push(join_path(prefix, key)),
            (Value::Object(d), Some(Value::Object(u))) => {
                collect_missing(d, u, &join_path(prefix, key), out);
            }
            _ => {}
        }
    }
}

/// Drop keys that have no counterpart in `defaults`, at every object level.
fn strip_unknown(
    defaults: &Map<String, Value>,
    user: Map<String, Value>,
    prefix: &str,
    removed: &mut Vec<String>,
) -> Map<String, Value> {
    let mut out = Map::new();
    for (key, value) in user {
        let Some(default_val) = defaults.get(&key) else {
            removed.push(join_path(prefix, &key));
            continue;
        };
        let value = match (default_val, value) {
            (Value::Object(d), Value::Object(u)) => {
                Value::Object(strip_unknown(d, u, &join_path(prefix, &key), removed))
            }
            (_, v) => v,
        };
        let _ = out.insert(key, value);
    }
    out
}

/// Deserialize merged settings; a top-level key that fails on its own is reset to its default.
fn deserialize_lenient(
    merged: Value,
    defaults: &Map<String, Value>,
    reset: &mut Vec<String>,
) -> Result<LobbySettings> {
    if let Ok(settings) = serde_json::from_value::<LobbySettings>(merged.clone()) {
        return Ok(settings);
    }

    let Value::Object(mut map) = merged else {
        return Ok(LobbySettings::default());
    };
    for (key, default_val) in defaults {
        let Some(value) = map.get(key) else { continue };
        let mut single = Map::new();
        let _ = single.insert(key.clone(), value.clone());
        if serde_json::from_value::<LobbySettings>(Value::Object(single)).is_err() {
            reset.push(key.clone());
            let _ = map.insert(key.clone(), default_val.clone());
        }
    }
    Ok(serde_json::from_value(Value::Object(map))?)
}

/// Apply environment variable overrides to loaded settings.
///
/// - `PORT` / `LOBBY_PORT`: listening port (`LOBBY_PORT` wins)
/// - `LOBBY_VERBOSE`: boolean
///
/// Invalid values are ignored with a warning.
pub fn apply_env_overrides(settings: &mut LobbySettings) {
    if let Some(v) = read_env_u16("PORT", 1, 65535) {
        settings.port = v;
    }
    if let Some(v) = read_env_u16("LOBBY_PORT", 1, 65535) {
        settings.port = v;
    }
    if let Some(v) = read_env_bool("LOBBY_VERBOSE") {
        settings.be_verbose = v;
    }
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a string as a `u16` within a range.
pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

fn read_env_bool(name: &str) -> Option<bool> {
    let val = std::env::var(name).ok()?;
    let result = parse_bool(&val);
    if result.is_none() {
        warn!(key = name, value = %val, "invalid boolean env var, ignoring");
    }
    result
}

fn read_env_u16(name: &str, min: u16, max: u16) -> Option<u16> {
    let val = std::env::var(name).ok()?;
    let result = parse_u16_range(&val, min, max);
    if result.is_none() {
        warn!(key = name, value = %val, "invalid u16 env var, ignoring");
    }
    result
}
