// ftail - config.rs
//
// TOML configuration loading and validation, in the shape
// `logsleuth::core::profile` uses: a raw `#[derive(Deserialize)]` struct with
// `#[serde(default = "...")]` field defaults, validated and compiled into a
// strongly-typed `Config` the rest of the crate consumes. Field names follow
// spec.md §6's "recognized options" list.

use crate::error::{ConfigError, Result};
use crate::util::constants::{
    DEFAULT_DELAY_SECS, DEFAULT_MAX_HEAD_HASH_SIZE, DEFAULT_NOTIFY_INTERVAL_MS,
    DEFAULT_PERIOD_SECS, DEFAULT_ROTATE_PERIOD_SECS,
};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Raw TOML shape. Never consumed directly outside this module — always
/// passed through `validate_and_compile`.
#[derive(Debug, Deserialize)]
pub struct RawConfig {
    pub name: String,
    pub buf_dir: String,

    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub path_fmt: Option<String>,

    #[serde(default = "default_period_secs")]
    pub period_secs: u64,
    #[serde(default = "default_max_head_hash_size")]
    pub max_head_hash_size: u64,
    #[serde(default = "default_rotate_period_secs")]
    pub rotate_period_secs: u64,
    #[serde(default = "default_delay_secs")]
    pub delay_secs: u64,
    #[serde(default)]
    pub poll: bool,
    #[serde(default = "default_notify_interval_ms")]
    pub notify_interval_ms: u64,

    /// If unset, defaults to `delay_secs` (DESIGN.md: the Go original treats
    /// `ReOpenDelay` and `Delay` as the same knob unless `Delay` is zero).
    #[serde(default)]
    pub reopen_delay_ms: Option<u64>,

    #[serde(default)]
    pub log_level: Option<String>,
}

fn default_period_secs() -> u64 {
    DEFAULT_PERIOD_SECS
}
fn default_max_head_hash_size() -> u64 {
    DEFAULT_MAX_HEAD_HASH_SIZE
}
fn default_rotate_period_secs() -> u64 {
    DEFAULT_ROTATE_PERIOD_SECS
}
fn default_delay_secs() -> u64 {
    DEFAULT_DELAY_SECS
}
fn default_notify_interval_ms() -> u64 {
    DEFAULT_NOTIFY_INTERVAL_MS
}

/// Where the source file lives: a fixed path, or a strftime-style template
/// expanded against the current rotation bucket.
#[derive(Debug, Clone)]
pub enum PathSource {
    Fixed(PathBuf),
    Templated { path_fmt: String, rotate_period: Duration },
}

/// Validated, fully-resolved configuration for one ftail source.
#[derive(Debug, Clone)]
pub struct Config {
    pub name: String,
    pub buf_dir: PathBuf,
    pub period: Duration,
    pub max_head_hash_size: u64,
    pub source: PathSource,
    pub delay: Duration,
    pub poll: bool,
    pub notify_interval: Duration,
    pub reopen_delay: Duration,
    pub log_level: Option<String>,
}

/// Load and validate configuration from a TOML file at `path`.
pub fn load(path: &Path) -> Result<Config> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let raw: RawConfig = toml::from_str(&text).map_err(|source| ConfigError::TomlParse {
        path: path.to_path_buf(),
        source,
    })?;
    validate_and_compile(raw)
}

pub fn validate_and_compile(raw: RawConfig) -> Result<Config> {
    if raw.name.trim().is_empty() {
        return Err(ConfigError::MissingField { field: "name" }.into());
    }
    if raw.buf_dir.trim().is_empty() {
        return Err(ConfigError::MissingField { field: "buf_dir" }.into());
    }
    if raw.max_head_hash_size > crate::util::constants::ABSOLUTE_MAX_HEAD_HASH_SIZE {
        return Err(ConfigError::ValueOutOfRange {
            field: "max_head_hash_size",
            value: raw.max_head_hash_size.to_string(),
            expected: "<= 16MiB",
        }
        .into());
    }

    let rotate_period = Duration::from_secs(raw.rotate_period_secs);
    let source = match (raw.path, raw.path_fmt) {
        (Some(p), None) => PathSource::Fixed(PathBuf::from(p)),
        (None, Some(fmt)) => PathSource::Templated {
            path_fmt: fmt,
            rotate_period,
        },
        (None, None) | (Some(_), Some(_)) => return Err(ConfigError::AmbiguousSource.into()),
    };

    let delay = Duration::from_secs(raw.delay_secs);
    let reopen_delay = raw
        .reopen_delay_ms
        .map(Duration::from_millis)
        .unwrap_or(delay);

    Ok(Config {
        name: raw.name,
        buf_dir: PathBuf::from(raw.buf_dir),
        period: Duration::from_secs(raw.period_secs),
        max_head_hash_size: raw.max_head_hash_size,
        source,
        delay,
        poll: raw.poll,
        notify_interval: Duration::from_millis(raw.notify_interval_ms),
        reopen_delay,
        log_level: raw.log_level,
    })
}
