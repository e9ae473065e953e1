//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`FerrySettings::default()`]
//! 2. If the settings file exists, deep-merge its values over defaults
//! 3. Apply `FERRY_*` environment variable overrides (highest priority)
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::Result;
use crate::types::FerrySettings;

/// Resolve the default settings file (`~/.ferry/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".ferry").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<FerrySettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// If the file does not exist, returns defaults (plus overrides). If the file
/// contains invalid JSON, returns an error.
pub fn load_settings_from_path(path: &Path) -> Result<FerrySettings> {
    let mut settings = load_file(path)?;
    apply_env_overrides(&mut settings);
    Ok(settings)
}

/// Defaults deep-merged with the file at `path`, without env overrides.
pub fn load_file(path: &Path) -> Result<FerrySettings> {
    let defaults = serde_json::to_value(FerrySettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    Ok(serde_json::from_value(merged)?)
}

/// Recursive deep merge of two JSON values.
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

/// Apply process environment overrides.
pub fn apply_env_overrides(settings: &mut FerrySettings) {
    apply_overrides(settings, |name| std::env::var(name).ok());
}

/// Apply overrides read through `lookup`.
///
/// Invalid values are ignored with a warning and the file/default value
/// stays in place.
pub fn apply_overrides(settings: &mut FerrySettings, lookup: impl Fn(&str) -> Option<String>) {
    let env = EnvReader { lookup };

    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = env.string("FERRY_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = env.u16("FERRY_PORT", 0, 65535) {
        settings.server.port = v;
    }
    if let Some(v) = env.u64("FERRY_HEARTBEAT_INTERVAL_MS", 1000, 600_000) {
        settings.server.heartbeat_interval_ms = v;
    }

    // ── Node ────────────────────────────────────────────────────────
    if let Some(v) = env.string("FERRY_NODE_HOST") {
        settings.node.host = v;
    }
    if let Some(v) = env.u16("FERRY_NODE_PORT", 1, 65535) {
        settings.node.port = v;
    }
    if let Some(v) = env.string("FERRY_NODE_PUBLIC_KEY") {
        settings.node.public_key = v;
    }
    if let Some(v) = env.u64("FERRY_NODE_TIMEOUT_MS", 1, 600_000) {
        settings.node.timeout_ms = v;
    }
    if let Some(v) = env.string("FERRY_PRIVATE_KEY") {
        settings.identity.private_key = v;
    }

    // ── Push ────────────────────────────────────────────────────────
    if let Some(v) = env.bool("FERRY_PUSH_ENABLED") {
        settings.push.enabled = v;
    }
    if let Some(v) = env.string("FERRY_PUSH_HOST") {
        settings.push.host = v;
    }
    if let Some(v) = env.u16("FERRY_PUSH_PORT", 1, 65535) {
        settings.push.port = v;
    }

    // ── WebSocket / logging ─────────────────────────────────────────
    if let Some(v) = env.bool("FERRY_ALLOW_OPTIONAL_ADDRESS") {
        settings.websocket.allow_optional_address = v;
    }
    if let Some(v) = env.u16("FERRY_NETWORK_ID", 0, 255).and_then(|v| u8::try_from(v).ok()) {
        settings.websocket.network_id = v;
    }
    if let Some(v) = env.string("FERRY_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = env.bool("FERRY_LOG_JSON") {
        settings.logging.json = v;
    }
}

// ── Pure parsing functions ──────────────────────────────────────────────────

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

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

// ── Env readers ─────────────────────────────────────────────────────────────

struct EnvReader<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> EnvReader<F> {
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    fn bool(&self, name: &str) -> Option<bool> {
        let val = (self.lookup)(name)?;
        let result = parse_bool(&val);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid boolean env var, ignoring");
        }
        result
    }

    fn u16(&self, name: &str, min: u16, max: u16) -> Option<u16> {
        let val = (self.lookup)(name)?;
        let result = parse_u16_range(&val, min, max);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid u16 env var, ignoring");
        }
        result
    }

    fn u64(&self, name: &str, min: u64, max: u64) -> Option<u64> {
        let val = (self.lookup)(name)?;
        let result = parse_u64_range(&val, min, max);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid u64 env var, ignoring");
        }
        result
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
