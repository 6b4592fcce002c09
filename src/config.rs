use std::path::PathBuf;
use std::str::FromStr;

use chrono_tz::Tz;
use thiserror::Error;

use crate::limits::*;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid timezone: {0}")]
    InvalidTimezone(String),

    #[error("invalid value for {var}: {value}")]
    InvalidValue { var: &'static str, value: String },
}

/// Runtime configuration, read from `SLOTWISE_*` environment variables.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub data_dir: PathBuf,
    pub metrics_port: Option<u16>,
    pub compact_threshold: u64,
    pub default_timezone: Tz,
    pub min_advance_hours: u32,
    pub min_booking_minutes: u32,
    pub max_booking_minutes: u32,
    pub cache_failure_threshold: u32,
    pub cache_cooldown_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            metrics_port: None,
            compact_threshold: DEFAULT_COMPACT_THRESHOLD,
            default_timezone: chrono_tz::America::New_York,
            min_advance_hours: DEFAULT_MIN_ADVANCE_HOURS,
            min_booking_minutes: DEFAULT_MIN_BOOKING_MINUTES,
            max_booking_minutes: DEFAULT_MAX_BOOKING_MINUTES,
            cache_failure_threshold: DEFAULT_BREAKER_FAILURE_THRESHOLD,
            cache_cooldown_secs: DEFAULT_BREAKER_COOLDOWN_SECS,
        }
    }
}

fn parse_or<T: FromStr>(value: Option<String>, default: T) -> T {
    value.and_then(|s| s.parse().ok()).unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from an arbitrary variable source. Unparseable numbers fall back
    /// to their defaults; an unknown timezone is an error.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let default_timezone = match lookup("SLOTWISE_DEFAULT_TIMEZONE") {
            Some(name) => crate::timezone::parse_timezone(&name)?,
            None => defaults.default_timezone,
        };

        let min_booking_minutes: u32 =
            parse_or(lookup("SLOTWISE_MIN_BOOKING_MINUTES"), defaults.min_booking_minutes);
        let max_booking_minutes: u32 =
            parse_or(lookup("SLOTWISE_MAX_BOOKING_MINUTES"), defaults.max_booking_minutes);
        if min_booking_minutes == 0 || min_booking_minutes > max_booking_minutes {
            return Err(ConfigError::InvalidValue {
                var: "SLOTWISE_MIN_BOOKING_MINUTES",
                value: format!("{min_booking_minutes} (max {max_booking_minutes})"),
            });
        }

        Ok(Self {
            data_dir: lookup("SLOTWISE_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            metrics_port: lookup("SLOTWISE_METRICS_PORT").and_then(|s| s.parse().ok()),
            compact_threshold: parse_or(
                lookup("SLOTWISE_COMPACT_THRESHOLD"),
                defaults.compact_threshold,
            ),
            default_timezone,
            min_advance_hours: parse_or(
                lookup("SLOTWISE_MIN_ADVANCE_HOURS"),
                defaults.min_advance_hours,
            ),
            min_booking_minutes,
            max_booking_minutes,
            cache_failure_threshold: parse_or(
                lookup("SLOTWISE_CACHE_FAILURE_THRESHOLD"),
                defaults.cache_failure_threshold,
            ),
            cache_cooldown_secs: parse_or(
                lookup("SLOTWISE_CACHE_COOLDOWN_SECS"),
                defaults.cache_cooldown_secs,
            ),
        })
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("availability.wal")
    }
}
