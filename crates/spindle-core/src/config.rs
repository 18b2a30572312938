//! Spindle configuration types and loading
//!
//! Loaded from YAML (`serde_yaml`), then overridden by the
//! `TASK_QUEUE_*` environment variables.

use std::fs;
use std::path::{Path, PathBuf};

use std::fmt;

use chrono::FixedOffset;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

/// Project-local config file, tried when no explicit path is given.
pub const LOCAL_CONFIG_FILE: &str = "spindle.yml";

pub const ENV_MAX_WORKERS: &str = "TASK_QUEUE_MAX_WORKERS";
pub const ENV_SCHEDULER_ENABLED: &str = "TASK_QUEUE_SCHEDULER_ENABLED";
pub const ENV_TIMEZONE: &str = "TASK_QUEUE_TIMEZONE";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid value for {key}: '{value}'")]
    InvalidEnv { key: String, value: String },

    #[error("invalid timezone '{0}' (expected an IANA name, UTC, Z or +HH:MM)")]
    InvalidTimezone(String),

    #[error("max-workers must be greater than zero")]
    NoWorkers,
}

/// Main configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpindleConfig {
    /// Worker pool and queue limits
    pub engine: EngineConfig,

    /// Periodic scheduler
    pub scheduler: SchedulerConfig,
}

/// Worker pool and queue limits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Number of worker tasks
    #[serde(rename = "max-workers")]
    pub max_workers: usize,

    /// Submissions beyond this many ready entries are rejected
    #[serde(rename = "queue-capacity")]
    pub queue_capacity: usize,

    /// Capacity of the transition event channel
    #[serde(rename = "event-buffer")]
    pub event_buffer: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_workers: 4,
            queue_capacity: 10_000,
            event_buffer: 256,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_workers == 0 {
            return Err(ConfigError::NoWorkers);
        }
        Ok(())
    }
}

/// Periodic scheduler configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Run the scheduler at all
    pub enabled: bool,

    /// Zone the calendar triggers are evaluated in: an IANA name
    /// (`America/Lima`) or a fixed offset (`-05:00`)
    pub timezone: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            timezone: "America/Lima".to_string(),
        }
    }
}

impl SchedulerConfig {
    pub fn zone(&self) -> Result<ScheduleZone, ConfigError> {
        parse_timezone(&self.timezone)
    }
}

/// Parsed scheduler timezone.
///
/// Named zones follow their DST rules; fixed offsets never shift.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleZone {
    Named(Tz),
    Fixed(FixedOffset),
}

impl fmt::Display for ScheduleZone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScheduleZone::Named(tz) => f.write_str(tz.name()),
            ScheduleZone::Fixed(offset) => write!(f, "{offset}"),
        }
    }
}

/// Parse `UTC`, `Z`, `+HH:MM`, `-HH:MM`, `+HHMM`, `+HH`, or an IANA name.
pub fn parse_timezone(s: &str) -> Result<ScheduleZone, ConfigError> {
    let invalid = || ConfigError::InvalidTimezone(s.to_string());
    let trimmed = s.trim();
    if trimmed.eq_ignore_ascii_case("utc") || trimmed == "Z" {
        return FixedOffset::east_opt(0)
            .map(ScheduleZone::Fixed)
            .ok_or_else(invalid);
    }

    let (sign, rest) = match trimmed.as_bytes().first() {
        Some(b'+') => (1, &trimmed[1..]),
        Some(b'-') => (-1, &trimmed[1..]),
        _ => return trimmed.parse::<Tz>().map(ScheduleZone::Named).map_err(|_| invalid()),
    };
    let (hours, minutes) = match rest.split_once(':') {
        Some((h, m)) => (h, m),
        None if rest.len() == 4 => rest.split_at(2),
        None => (rest, "0"),
    };
    if hours.is_empty() || hours.len() > 2 || minutes.is_empty() || minutes.len() > 2 {
        return Err(invalid());
    }
    let hours: i32 = hours.parse().map_err(|_| invalid())?;
    let minutes: i32 = minutes.parse().map_err(|_| invalid())?;
    if hours > 23 || minutes > 59 {
        return Err(invalid());
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
        .map(ScheduleZone::Fixed)
        .ok_or_else(invalid)
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

impl SpindleConfig {
    /// Load configuration with fallback chain, then apply env overrides.
    ///
    /// 1. explicit `path`
    /// 2. `./spindle.yml`
    /// 3. defaults
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::load_from_file(path)?,
            None => {
                let local = PathBuf::from(LOCAL_CONFIG_FILE);
                if local.exists() {
                    Self::load_from_file(&local)?
                } else {
                    tracing::info!("No config file found, using defaults");
                    Self::default()
                }
            }
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_yaml_str(&content)?;
        tracing::info!("Loaded config from: {}", path.display());
        Ok(config)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigError> {
        // an empty file deserializes as unit, not as a map
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(content)?)
    }

    /// Apply `TASK_QUEUE_*` overrides read through `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(ENV_MAX_WORKERS) {
            self.engine.max_workers =
                value
                    .trim()
                    .parse()
                    .map_err(|_| ConfigError::InvalidEnv {
                        key: ENV_MAX_WORKERS.to_string(),
                        value: value.clone(),
                    })?;
        }
        if let Some(value) = lookup(ENV_SCHEDULER_ENABLED) {
            self.scheduler.enabled = parse_bool(&value).ok_or_else(|| ConfigError::InvalidEnv {
                key: ENV_SCHEDULER_ENABLED.to_string(),
                value: value.clone(),
            })?;
        }
        if let Some(value) = lookup(ENV_TIMEZONE) {
            self.scheduler.timezone = value;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.engine.validate()?;
        self.scheduler.zone()?;
        Ok(())
    }
}
