//! Tunables of the telemetry core.
//!
//! Values are read once at tracker construction and pinned into the
//! tracker, so tests can inject configurations without touching process
//! state and running loops never observe configuration changes.

use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid value {value:?} for {key}: expected a positive number of seconds")]
    InvalidDuration { key: &'static str, value: String },
    #[error("invalid value {value:?} for {key}: expected a boolean")]
    InvalidBool { key: &'static str, value: String },
}

pub type Result<T> = std::result::Result<T, Error>;

/// Pinned tunables for one container tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackerConfig {
    /// Baseline interval between housekeeping cycles.
    pub housekeeping_interval: Duration,
    /// Ceiling the housekeeping interval may back off to.
    pub max_housekeeping_interval: Duration,
    /// Master switch for interval doubling on unchanged samples.
    pub allow_dynamic_housekeeping: bool,
    /// Baseline interval between load probes.
    pub load_reader_interval: Duration,
    /// Ceiling the load probe interval may back off to.
    pub max_load_reader_interval: Duration,
    /// Deadline after which a wedged probe iteration aborts the process.
    pub panic_timeout: Duration,
    /// Whether the load probe runs at all. When disabled the load average
    /// stays at its -1 sentinel.
    pub enable_load_reader: bool,
    /// Whether to log a usage summary line after each housekeeping cycle.
    pub log_usage: bool,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            housekeeping_interval: Duration::from_secs(1),
            max_housekeeping_interval: Duration::from_secs(60),
            allow_dynamic_housekeeping: true,
            load_reader_interval: Duration::from_secs(1),
            max_load_reader_interval: Duration::from_secs(60),
            panic_timeout: Duration::from_secs(60),
            enable_load_reader: false,
            log_usage: false,
        }
    }
}

const HOUSEKEEPING_INTERVAL: &str = "CGTRACK_HOUSEKEEPING_INTERVAL";
const MAX_HOUSEKEEPING_INTERVAL: &str = "CGTRACK_MAX_HOUSEKEEPING_INTERVAL";
const ALLOW_DYNAMIC_HOUSEKEEPING: &str = "CGTRACK_ALLOW_DYNAMIC_HOUSEKEEPING";
const LOAD_READER_INTERVAL: &str = "CGTRACK_LOAD_READER_INTERVAL";
const MAX_LOAD_READER_INTERVAL: &str = "CGTRACK_MAX_LOAD_READER_INTERVAL";
const PANIC_TIMEOUT: &str = "CGTRACK_PANIC_TIMEOUT";
const ENABLE_LOAD_READER: &str = "CGTRACK_ENABLE_LOAD_READER";
const LOG_USAGE: &str = "CGTRACK_LOG_USAGE";

impl TrackerConfig {
    /// Reads tunables from the process environment.
    ///
    /// # Errors
    ///
    /// Returns an error for any variable that is present but does not parse
    /// as a positive number of seconds (intervals) or a boolean (switches).
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads tunables through the given lookup function.
    ///
    /// Exists so tests can inject values without mutating the process
    /// environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(value) = lookup(HOUSEKEEPING_INTERVAL) {
            config.housekeeping_interval = parse_seconds(HOUSEKEEPING_INTERVAL, &value)?;
        }
        if let Some(value) = lookup(MAX_HOUSEKEEPING_INTERVAL) {
            config.max_housekeeping_interval = parse_seconds(MAX_HOUSEKEEPING_INTERVAL, &value)?;
        }
        if let Some(value) = lookup(ALLOW_DYNAMIC_HOUSEKEEPING) {
            config.allow_dynamic_housekeeping = parse_bool(ALLOW_DYNAMIC_HOUSEKEEPING, &value)?;
        }
        if let Some(value) = lookup(LOAD_READER_INTERVAL) {
            config.load_reader_interval = parse_seconds(LOAD_READER_INTERVAL, &value)?;
        }
        if let Some(value) = lookup(MAX_LOAD_READER_INTERVAL) {
            config.max_load_reader_interval = parse_seconds(MAX_LOAD_READER_INTERVAL, &value)?;
        }
        if let Some(value) = lookup(PANIC_TIMEOUT) {
            config.panic_timeout = parse_seconds(PANIC_TIMEOUT, &value)?;
        }
        if let Some(value) = lookup(ENABLE_LOAD_READER) {
            config.enable_load_reader = parse_bool(ENABLE_LOAD_READER, &value)?;
        }
        if let Some(value) = lookup(LOG_USAGE) {
            config.log_usage = parse_bool(LOG_USAGE, &value)?;
        }

        Ok(config)
    }
}

fn parse_seconds(key: &'static str, value: &str) -> Result<Duration> {
    match value.trim().parse::<f64>() {
        Ok(seconds) if seconds.is_finite() && seconds > 0.0 => {
            Ok(Duration::from_secs_f64(seconds))
        }
        _ => Err(Error::InvalidDuration {
            key,
            value: value.to_owned(),
        }),
    }
}

fn parse_bool(key: &'static str, value: &str) -> Result<bool> {
    match value.trim() {
        "true" | "1" => Ok(true),
        "false" | "0" => Ok(false),
        _ => Err(Error::InvalidBool {
            key,
            value: value.to_owned(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(map: HashMap<&'static str, &'static str>) -> impl Fn(&str) -> Option<String> {
        move |key| map.get(key).map(|value| (*value).to_owned())
    }

    #[test]
    fn test_defaults_when_nothing_set() {
        let config = TrackerConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config, TrackerConfig::default());
        assert_eq!(config.housekeeping_interval, Duration::from_secs(1));
        assert_eq!(config.panic_timeout, Duration::from_secs(60));
        assert!(!config.enable_load_reader);
    }

    #[test]
    fn test_overrides_applied() {
        let lookup = lookup_from(HashMap::from([
            (HOUSEKEEPING_INTERVAL, "0.5"),
            (MAX_HOUSEKEEPING_INTERVAL, "30"),
            (ALLOW_DYNAMIC_HOUSEKEEPING, "false"),
            (ENABLE_LOAD_READER, "1"),
            (LOG_USAGE, "true"),
        ]));
        let config = TrackerConfig::from_lookup(lookup).unwrap();
        assert_eq!(config.housekeeping_interval, Duration::from_millis(500));
        assert_eq!(config.max_housekeeping_interval, Duration::from_secs(30));
        assert!(!config.allow_dynamic_housekeeping);
        assert!(config.enable_load_reader);
        assert!(config.log_usage);
    }

    #[test]
    fn test_invalid_duration_rejected() {
        for bad in ["abc", "-1", "0", "inf", ""] {
            let lookup = lookup_from(HashMap::from([(PANIC_TIMEOUT, bad)]));
            let err = TrackerConfig::from_lookup(lookup).unwrap_err();
            assert!(matches!(err, Error::InvalidDuration { key, .. } if key == PANIC_TIMEOUT));
        }
    }

    #[test]
    fn test_invalid_bool_rejected() {
        let lookup = lookup_from(HashMap::from([(LOG_USAGE, "yes")]));
        let err = TrackerConfig::from_lookup(lookup).unwrap_err();
        assert!(matches!(err, Error::InvalidBool { key, .. } if key == LOG_USAGE));
    }
}
