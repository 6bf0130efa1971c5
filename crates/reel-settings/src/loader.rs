//! Settings loading with deep merge and environment variable overrides.
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::Result;
use crate::types::ReelSettings;

/// `~/.reel`, or `/tmp/.reel` when `HOME` is unset.
pub fn reel_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
        .join(".reel")
}

pub fn settings_path() -> PathBuf {
    reel_home().join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<ReelSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults. A file with invalid JSON is an error.
pub fn load_settings_from_path(path: &Path) -> Result<ReelSettings> {
    let defaults = serde_json::to_value(ReelSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: ReelSettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings);
    Ok(settings)
}

pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = match target_map.remove(&key) {
                    Some(target_val) => deep_merge(target_val, source_val),
                    None => source_val,
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply `REEL_*` environment overrides. Invalid values are logged and ignored.
pub fn apply_env_overrides(settings: &mut ReelSettings) {
    if let Some(v) = read_env_string("REEL_API_URL") {
        settings.api.base_url = v;
    }
    if let Some(v) = read_env_string("REEL_API_KEY") {
        settings.api.api_key = v;
    }
    if let Some(v) = read_env_string("REEL_DEFAULT_MODEL") {
        settings.api.default_model = Some(v);
    }
    if let Some(v) = read_env_u64("REEL_IDLE_TIMEOUT_SECS", 1, 3600) {
        settings.generation.idle_timeout_secs = v;
    }
    if let Some(v) = read_env_u64("REEL_CONNECT_TIMEOUT_SECS", 1, 600) {
        settings.generation.connect_timeout_secs = v;
    }
    if let Some(v) = read_env_string("REEL_DB_PATH") {
        settings.storage.database_path = PathBuf::from(v);
    }
    if let Some(v) = read_env_bool("REEL_THUMBNAILS") {
        settings.storage.thumbnails = v;
    }
    if let Some(v) = read_env_string("REEL_LOG_LEVEL") {
        settings.logging.level = v;
    }
}

/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn read_env_bool(name: &str) -> Option<bool> {
    let val = std::env::var(name).ok()?;
    let result = parse_bool(&val);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid boolean env var, ignoring");
    }
    result
}

fn read_env_u64(name: &str, min: u64, max: u64) -> Option<u64> {
    let val = std::env::var(name).ok()?;
    let result = parse_u64_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid u64 env var, ignoring");
    }
    result
}
