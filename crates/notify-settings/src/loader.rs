//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`NotifySettings::default()`]
//! 2. If the settings file exists, deep-merge its values over the defaults
//! 3. Apply `NOTIFY_*` environment variable overrides
//! 4. Validate
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::{Result, SettingsError};
use crate::types::NotifySettings;

/// Resolve the default settings file path (`~/.notify/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".notify").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<NotifySettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults. Invalid JSON or a value that fails
/// validation is an error.
pub fn load_settings_from_path(path: &Path) -> Result<NotifySettings> {
    let mut settings = read_settings_file(path)?;
    apply_env_overrides(&mut settings);
    settings.validate()?;
    Ok(settings)
}

fn read_settings_file(path: &Path) -> Result<NotifySettings> {
    let defaults = serde_json::to_value(NotifySettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
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

/// Apply `NOTIFY_*` environment overrides to loaded settings.
///
/// A variable that does not parse or is out of range is logged and skipped.
pub fn apply_env_overrides(settings: &mut NotifySettings) {
    let env = |name: &str| std::env::var(name).ok().filter(|v| !v.is_empty());
    apply_overrides(settings, env);
}

/// Apply overrides from an arbitrary variable source.
fn apply_overrides(settings: &mut NotifySettings, lookup: impl Fn(&str) -> Option<String>) {
    let server = &mut settings.server;
    if let Some(host) = lookup("NOTIFY_HOST") {
        server.host = host;
    }
    override_with(&lookup, "NOTIFY_PORT", &mut server.port, |v| {
        parse_in_range(v, 0..=u16::MAX)
    });

    let logging = &mut settings.logging;
    if let Some(level) = lookup("NOTIFY_LOG_LEVEL") {
        logging.level = level;
    }
    override_with(&lookup, "NOTIFY_LOG_JSON", &mut logging.json, parse_bool);

    let conn = &mut settings.connection;
    override_with(&lookup, "NOTIFY_WRITE_WAIT_MS", &mut conn.write_wait_ms, |v| {
        parse_in_range(v, 1..=600_000)
    });
    override_with(&lookup, "NOTIFY_PONG_WAIT_MS", &mut conn.pong_wait_ms, |v| {
        parse_in_range(v, 10..=3_600_000)
    });
    override_with(&lookup, "NOTIFY_MAX_MESSAGE_SIZE", &mut conn.max_message_size, |v| {
        parse_in_range(v, 1..=MAX_FRAME_LIMIT)
    });
    override_with(&lookup, "NOTIFY_SEND_BUFFER_CAPACITY", &mut conn.send_buffer_capacity, |v| {
        parse_in_range(v, 1..=MAX_QUEUE)
    });

    let hub = &mut settings.hub;
    override_with(&lookup, "NOTIFY_BROADCAST_CAPACITY", &mut hub.broadcast_capacity, |v| {
        parse_in_range(v, 1..=MAX_QUEUE)
    });
    override_with(&lookup, "NOTIFY_INTAKE_CAPACITY", &mut hub.intake_capacity, |v| {
        parse_in_range(v, 1..=MAX_QUEUE)
    });
}

const MAX_FRAME_LIMIT: usize = 16 * 1024 * 1024;
const MAX_QUEUE: usize = 1_000_000;

fn override_with<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
    slot: &mut T,
    parse: impl FnOnce(&str) -> Option<T>,
) {
    let Some(raw) = lookup(name) else { return };
    match parse(&raw) {
        Some(value) => *slot = value,
        None => warn!(key = name, value = %raw, "ignoring unusable env override"),
    }
}

/// Parse a boolean flag: `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`, any case.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a number and keep it only if it falls inside `range`.
pub fn parse_in_range<T>(val: &str, range: RangeInclusive<T>) -> Option<T>
where
    T: FromStr + PartialOrd,
{
    val.trim().parse().ok().filter(|n| range.contains(n))
}
