/*
 * mod.rs
 * Copyright (C) 2026 Chris Burdess
 *
 * This file is part of Casellario, an SMTP message-processing backend.
 *
 * Casellario is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * Casellario is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with Casellario.  If not, see <http://www.gnu.org/licenses/>.
 */

//! Configuration tree: processors / stream_processors / gateways sections,
//! alias-capable instance keys, typed extraction into config records.

mod diff;

pub use diff::{diff_trees, ConfigDiff};

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{Map, Value};

/// Configuration errors: malformed tree, missing/wrong-typed fields, unknown names.
#[derive(Debug)]
pub enum ConfigError {
    /// Generic error message.
    Message(String),
    /// A typed record could not be materialised from a group; the message names the field.
    Extract { instance: String, message: String },
}

impl ConfigError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self::Message(msg.into())
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Message(m) => write!(f, "{}", m),
            ConfigError::Extract { instance, message } => {
                write!(f, "config for [{}]: {}", instance, message)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// One instance's free-form configuration: key → value, keys lowercased.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigGroup(Map<String, Value>);

impl ConfigGroup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(map: Map<String, Value>) -> Self {
        let mut lowered = Map::new();
        for (k, v) in map {
            lowered.insert(k.to_lowercase(), v);
        }
        Self(lowered)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(&key.to_lowercase())
    }

    pub fn str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    pub fn int(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(Value::as_i64)
    }

    pub fn bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(Value::as_bool)
    }

    pub fn set(&mut self, key: &str, value: Value) {
        self.0.insert(key.to_lowercase(), value);
    }

    /// Materialise this group into a typed record. A missing or wrong-typed
    /// required field fails with an error naming the field.
    pub fn extract<T: DeserializeOwned>(&self, instance: &str) -> Result<T, ConfigError> {
        serde_json::from_value(Value::Object(self.0.clone())).map_err(|e| ConfigError::Extract {
            instance: instance.to_string(),
            message: e.to_string(),
        })
    }
}

/// A configuration section: instance key (or `alias:name`) → group.
/// Keys are lowercased; the alias map resolves alias → canonical name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Section {
    groups: BTreeMap<String, ConfigGroup>,
    names: BTreeMap<String, String>,
}

impl Section {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an instance. `key` may be `name` or `alias:name`.
    pub fn insert(&mut self, key: &str, group: ConfigGroup) {
        let key = key.to_lowercase();
        let (alias, name) = match key.split_once(':') {
            Some((a, n)) => (a.trim().to_string(), n.trim().to_string()),
            None => (key.clone(), key.clone()),
        };
        self.names.insert(alias.clone(), name);
        self.groups.insert(alias, group);
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Group for an instance alias. Missing instances resolve to no group.
    pub fn group(&self, alias: &str) -> Option<&ConfigGroup> {
        self.groups.get(&alias.to_lowercase())
    }

    /// Canonical processor name for an alias; an unconfigured alias is its own name.
    pub fn canonical<'a>(&'a self, alias: &'a str) -> &'a str {
        self.names.get(alias).map(String::as_str).unwrap_or(alias)
    }

    pub fn aliases(&self) -> impl Iterator<Item = &str> {
        self.groups.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ConfigGroup)> {
        self.groups.iter().map(|(k, v)| (k.as_str(), v))
    }
}

/// The full three-section configuration tree.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigTree {
    pub processors: Section,
    pub stream_processors: Section,
    pub gateways: Section,
}

impl ConfigTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a tree from a JSON value with the three fixed top-level sections.
    /// Unknown sections are rejected; section entries must be objects.
    pub fn from_value(value: Value) -> Result<Self, ConfigError> {
        let obj = match value {
            Value::Object(o) => o,
            _ => return Err(ConfigError::new("configuration root must be an object")),
        };
        let mut tree = ConfigTree::new();
        for (key, val) in obj {
            let section = match key.to_lowercase().as_str() {
                "processors" => &mut tree.processors,
                "stream_processors" => &mut tree.stream_processors,
                "gateways" => &mut tree.gateways,
                other => {
                    return Err(ConfigError::new(format!(
                        "unknown configuration section [{}]",
                        other
                    )))
                }
            };
            let entries = match val {
                Value::Object(o) => o,
                _ => {
                    return Err(ConfigError::new(format!(
                        "configuration section [{}] must be an object",
                        key
                    )))
                }
            };
            for (instance, group) in entries {
                let map = match group {
                    Value::Object(m) => m,
                    _ => {
                        return Err(ConfigError::new(format!(
                            "configuration group [{}] must be an object",
                            instance
                        )))
                    }
                };
                section.insert(&instance, ConfigGroup::from_map(map));
            }
        }
        Ok(tree)
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let value: Value =
            serde_json::from_str(json).map_err(|e| ConfigError::new(e.to_string()))?;
        Self::from_value(value)
    }

    /// Typed gateway record for one gateway instance; absent gateways get defaults.
    pub fn gateway_config(&self, name: &str) -> Result<GatewayConfig, ConfigError> {
        match self.gateways.group(name) {
            Some(g) => g.extract::<GatewayConfig>(name),
            None => Ok(GatewayConfig::default()),
        }
    }
}

const DEFAULT_QUEUE_SIZE: i64 = 64;
const DEFAULT_STREAM_BUFFER_SIZE: usize = 4096;
const DEFAULT_SAVE_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_VALIDATE_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_STREAM_TIMEOUT: Duration = Duration::from_secs(30);

/// Recognised keys under `gateways.<name>`. All fields are optional; sizes
/// ≤ 0 and unparseable durations fall back to their defaults.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub save_workers_size: i64,
    pub validate_workers_size: i64,
    pub stream_workers_size: i64,
    pub background_workers_size: i64,
    pub save_process: String,
    pub validate_process: String,
    pub save_stream: String,
    pub post_process_producer: String,
    pub post_process_consumer: String,
    pub save_process_size: i64,
    pub validate_process_size: i64,
    pub save_stream_size: i64,
    pub post_process_size: i64,
    pub save_timeout: String,
    pub val_rcpt_timeout: String,
    pub stream_timeout: String,
    pub stream_buffer_size: i64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            save_workers_size: 0,
            validate_workers_size: 0,
            stream_workers_size: 0,
            background_workers_size: 0,
            save_process: String::new(),
            validate_process: String::new(),
            save_stream: String::new(),
            post_process_producer: String::new(),
            post_process_consumer: String::new(),
            save_process_size: 0,
            validate_process_size: 0,
            save_stream_size: 0,
            post_process_size: 0,
            save_timeout: String::new(),
            val_rcpt_timeout: String::new(),
            stream_timeout: String::new(),
            stream_buffer_size: 0,
        }
    }
}

fn size_or(n: i64, default: i64) -> usize {
    if n <= 0 {
        default as usize
    } else {
        n as usize
    }
}

impl GatewayConfig {
    pub fn save_workers(&self) -> usize {
        size_or(self.save_workers_size, 1)
    }

    pub fn validate_workers(&self) -> usize {
        size_or(self.validate_workers_size, 1)
    }

    pub fn stream_workers(&self) -> usize {
        size_or(self.stream_workers_size, 1)
    }

    pub fn background_workers(&self) -> usize {
        size_or(self.background_workers_size, 1)
    }

    /// Workers started per gateway: one pool serves save, validate, and stream.
    pub fn worker_count(&self) -> usize {
        self.save_workers()
            .max(self.validate_workers())
            .max(self.stream_workers())
    }

    pub fn validate_queue(&self) -> usize {
        size_or(self.validate_process_size, DEFAULT_QUEUE_SIZE)
    }

    pub fn stream_queue(&self) -> usize {
        size_or(self.save_stream_size, DEFAULT_QUEUE_SIZE)
    }

    pub fn post_process_queue(&self) -> usize {
        size_or(self.post_process_size, DEFAULT_QUEUE_SIZE)
    }

    pub fn stream_buffer(&self) -> usize {
        if self.stream_buffer_size <= 0 {
            DEFAULT_STREAM_BUFFER_SIZE
        } else {
            self.stream_buffer_size as usize
        }
    }

    pub fn save_timeout_duration(&self) -> Duration {
        parse_duration(&self.save_timeout).unwrap_or(DEFAULT_SAVE_TIMEOUT)
    }

    pub fn validate_timeout_duration(&self) -> Duration {
        parse_duration(&self.val_rcpt_timeout).unwrap_or(DEFAULT_VALIDATE_TIMEOUT)
    }

    pub fn stream_timeout_duration(&self) -> Duration {
        parse_duration(&self.stream_timeout).unwrap_or(DEFAULT_STREAM_TIMEOUT)
    }

    /// Worker pool sizes must come out ≥ 1 after defaults.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (key, n) in [
            ("save_workers_size", self.save_workers()),
            ("validate_workers_size", self.validate_workers()),
            ("stream_workers_size", self.stream_workers()),
            ("background_workers_size", self.background_workers()),
        ] {
            if n < 1 {
                return Err(ConfigError::new(format!("{} must be at least 1", key)));
            }
        }
        Ok(())
    }
}

/// Split a pipeline expression into `(alias, name)` entries, lowercased.
/// Entries are pipe-separated, left to right; `alias:name` names an instance,
/// a bare name is its own alias. Empty expressions yield no entries.
pub fn split_pipeline(expr: &str) -> Vec<(String, String)> {
    expr.split('|')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(|t| {
            let t = t.to_lowercase();
            match t.find(':') {
                Some(i) => (
                    t[..i].trim().to_string(),
                    t[i + 1..].trim().to_string(),
                ),
                None => (t.clone(), t),
            }
        })
        .collect()
}

/// Parse a duration string of `<int><unit>` components (`100ms`, `30s`, `1h30m`).
/// Units: ns, us, ms, s, m, h. Returns None on anything unparseable.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    let bytes = s.as_bytes();
    let mut pos = 0;
    let mut total = Duration::ZERO;
    while pos < bytes.len() {
        let num_start = pos;
        while pos < bytes.len() && bytes[pos].is_ascii_digit() {
            pos += 1;
        }
        if pos == num_start {
            return None;
        }
        let n: u64 = s[num_start..pos].parse().ok()?;
        let unit_start = pos;
        while pos < bytes.len() && !bytes[pos].is_ascii_digit() {
            pos += 1;
        }
        let d = match &s[unit_start..pos] {
            "ns" => Duration::from_nanos(n),
            "us" => Duration::from_micros(n),
            "ms" => Duration::from_millis(n),
            "s" => Duration::from_secs(n),
            "m" => Duration::from_secs(n * 60),
            "h" => Duration::from_secs(n * 3600),
            _ => return None,
        };
        total += d;
    }
    Some(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_duration_units() {
        assert_eq!(parse_duration("30s"), Some(Duration::from_secs(30)));
        assert_eq!(parse_duration("100ms"), Some(Duration::from_millis(100)));
        assert_eq!(parse_duration("1h30m"), Some(Duration::from_secs(5400)));
        assert_eq!(parse_duration(""), None);
        assert_eq!(parse_duration("fast"), None);
        assert_eq!(parse_duration("10"), None);
    }

    #[test]
    fn tree_sections_and_aliases() {
        let tree = ConfigTree::from_json(
            r#"{
                "Processors": {
                    "Debugger": {"Log_Received_Mails": true},
                    "mydb:sql": {"sql_driver": "none"}
                },
                "gateways": {
                    "default": {"save_process": "HeadersParser|Debugger"}
                }
            }"#,
        )
        .unwrap();
        let dbg = tree.processors.group("debugger").unwrap();
        assert_eq!(dbg.bool("log_received_mails"), Some(true));
        assert_eq!(tree.processors.canonical("mydb"), "sql");
        assert_eq!(tree.processors.canonical("debugger"), "debugger");
        assert!(tree.processors.group("mydb").is_some());
        assert!(tree.gateways.group("default").is_some());
    }

    #[test]
    fn unknown_section_rejected() {
        let err = ConfigTree::from_json(r#"{"backends": {}}"#).unwrap_err();
        assert!(err.to_string().contains("unknown configuration section"));
    }

    #[test]
    fn gateway_defaults() {
        let cfg = GatewayConfig::default();
        assert_eq!(cfg.save_workers(), 1);
        assert_eq!(cfg.worker_count(), 1);
        assert_eq!(cfg.validate_queue(), 64);
        assert_eq!(cfg.stream_buffer(), 4096);
        assert_eq!(cfg.save_timeout_duration(), Duration::from_secs(30));
        assert_eq!(cfg.validate_timeout_duration(), Duration::from_secs(5));
        cfg.validate().unwrap();
    }

    #[test]
    fn gateway_config_extraction() {
        let tree = ConfigTree::from_json(
            r#"{"gateways": {"g": {
                "save_workers_size": 3,
                "save_timeout": "100ms",
                "val_rcpt_timeout": "junk",
                "stream_buffer_size": 128
            }}}"#,
        )
        .unwrap();
        let cfg = tree.gateway_config("g").unwrap();
        assert_eq!(cfg.save_workers(), 3);
        assert_eq!(cfg.worker_count(), 3);
        assert_eq!(cfg.save_timeout_duration(), Duration::from_millis(100));
        // Unparseable duration falls back silently.
        assert_eq!(cfg.validate_timeout_duration(), Duration::from_secs(5));
        assert_eq!(cfg.stream_buffer(), 128);
    }

    #[test]
    fn extraction_names_missing_field() {
        #[derive(Debug, Deserialize)]
        struct Wants {
            #[allow(dead_code)]
            primary_mail_host: String,
        }
        let g = ConfigGroup::new();
        let err = g.extract::<Wants>("header").unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("header"));
        assert!(msg.contains("primary_mail_host"));
    }
}
