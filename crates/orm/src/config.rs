//! Alias configuration
//!
//! An [`AliasConfig`] describes one named database: which driver, where it
//! lives, how large its pool may grow and which timezone offset-less
//! timestamps are read in. Build it in code or load it from environment
//! variables sharing a prefix:
//!
//! | variable | meaning | default |
//! |---|---|---|
//! | `<PREFIX>_DATABASE_URL` | data source | required |
//! | `<PREFIX>_DRIVER` | `postgres`, `mysql`, `sqlite` | from the URL scheme |
//! | `<PREFIX>_MAX_IDLE_CONNS` | idle connections kept | 2 |
//! | `<PREFIX>_MAX_OPEN_CONNS` | pool size | 10 |
//! | `<PREFIX>_TIMEZONE` | `UTC` or `+08:00` | UTC |
//! | `<PREFIX>_ACQUIRE_TIMEOUT` | seconds | 30 |

use std::env;
use std::time::Duration;

use chrono::{FixedOffset, Offset, Utc};

use crate::backends::DatabaseBackendType;
use crate::error::{OrmError, OrmResult};

pub const DEFAULT_ALIAS: &str = "default";

/// Connection profile of one alias
#[derive(Debug, Clone, PartialEq)]
pub struct AliasConfig {
    pub name: String,
    pub driver: DatabaseBackendType,
    pub data_source: String,
    pub max_idle_conns: u32,
    pub max_open_conns: u32,
    pub timezone: FixedOffset,
    pub acquire_timeout: Duration,
}

impl AliasConfig {
    /// Configuration for the `default` alias with stock pool limits
    pub fn new(driver: DatabaseBackendType, data_source: impl Into<String>) -> Self {
        Self {
            name: DEFAULT_ALIAS.to_string(),
            driver,
            data_source: data_source.into(),
            max_idle_conns: 2,
            max_open_conns: 10,
            timezone: Utc.fix(),
            acquire_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_max_idle_conns(mut self, max_idle_conns: u32) -> Self {
        self.max_idle_conns = max_idle_conns;
        self
    }

    pub fn with_max_open_conns(mut self, max_open_conns: u32) -> Self {
        self.max_open_conns = max_open_conns;
        self
    }

    pub fn with_timezone(mut self, timezone: FixedOffset) -> Self {
        self.timezone = timezone;
        self
    }

    pub fn with_acquire_timeout(mut self, acquire_timeout: Duration) -> Self {
        self.acquire_timeout = acquire_timeout;
        self
    }

    /// Load `<prefix>_*` variables from the process environment
    pub fn from_env(prefix: &str) -> OrmResult<Self> {
        Self::from_lookup(prefix, |key| env::var(key).ok())
    }

    /// Load from any key/value source; `from_env` reads the process environment
    pub fn from_lookup<F>(prefix: &str, lookup: F) -> OrmResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |suffix: &str| {
            let key = format!("{}_{}", prefix, suffix);
            lookup(&key).map(|value| (key, value.trim().to_string()))
        };

        let (_, data_source) = var("DATABASE_URL")
            .ok_or_else(|| OrmError::Configuration(format!("{}_DATABASE_URL is not set", prefix)))?;

        let driver = match var("DRIVER") {
            Some((key, value)) => value
                .parse::<DatabaseBackendType>()
                .map_err(|e| OrmError::Configuration(format!("{}: {}", key, e)))?,
            None => DatabaseBackendType::from_data_source(&data_source).ok_or_else(|| {
                OrmError::Configuration(format!(
                    "cannot infer a driver from {}_DATABASE_URL; set {}_DRIVER",
                    prefix, prefix
                ))
            })?,
        };

        let mut config = Self::new(driver, data_source).with_name(prefix.to_ascii_lowercase());

        if let Some((key, value)) = var("MAX_IDLE_CONNS") {
            config.max_idle_conns = parse_number(&key, &value)?;
        }
        if let Some((key, value)) = var("MAX_OPEN_CONNS") {
            config.max_open_conns = parse_number(&key, &value)?;
        }
        if let Some((key, value)) = var("TIMEZONE") {
            config.timezone = parse_timezone(&value)
                .ok_or_else(|| OrmError::Configuration(format!("{}: invalid timezone '{}'", key, value)))?;
        }
        if let Some((key, value)) = var("ACQUIRE_TIMEOUT") {
            config.acquire_timeout = Duration::from_secs(parse_number::<u64>(&key, &value)?);
        }

        config.validate()?;
        Ok(config)
    }

    /// Check pool limits and that the data source suits the driver
    pub fn validate(&self) -> OrmResult<()> {
        if self.name.is_empty() {
            return Err(OrmError::Configuration("alias name cannot be empty".to_string()));
        }
        if self.max_open_conns == 0 {
            return Err(OrmError::Configuration(format!(
                "alias '{}': max_open_conns must be at least 1",
                self.name
            )));
        }
        if self.max_idle_conns > self.max_open_conns {
            return Err(OrmError::Configuration(format!(
                "alias '{}': max_idle_conns ({}) exceeds max_open_conns ({})",
                self.name, self.max_idle_conns, self.max_open_conns
            )));
        }

        match self.driver {
            DatabaseBackendType::SQLite => {
                if self.data_source.is_empty() {
                    return Err(OrmError::Configuration(format!(
                        "alias '{}': SQLite data source is empty",
                        self.name
                    )));
                }
            }
            DatabaseBackendType::PostgreSQL | DatabaseBackendType::MySQL => {
                let url = url::Url::parse(&self.data_source)?;
                let matches = match self.driver {
                    DatabaseBackendType::PostgreSQL => matches!(url.scheme(), "postgres" | "postgresql"),
                    _ => matches!(url.scheme(), "mysql" | "mariadb"),
                };
                if !matches {
                    return Err(OrmError::Configuration(format!(
                        "alias '{}': scheme '{}' does not match driver {}",
                        self.name,
                        url.scheme(),
                        self.driver
                    )));
                }
            }
        }
        Ok(())
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> OrmResult<T> {
    value
        .parse()
        .map_err(|_| OrmError::Configuration(format!("{}: '{}' is not a valid number", key, value)))
}

/// `UTC`, `Z`, `+08:00`, `-0530` or `+8`
pub fn parse_timezone(value: &str) -> Option<FixedOffset> {
    if value.eq_ignore_ascii_case("utc") || value.eq_ignore_ascii_case("z") {
        return Some(Utc.fix());
    }

    let (sign, rest) = match value.as_bytes().first()? {
        b'+' => (1, &value[1..]),
        b'-' => (-1, &value[1..]),
        _ => return None,
    };
    let (hours, minutes) = match rest.split_once(':') {
        Some((h, m)) => (h, m),
        None if rest.len() == 4 => rest.split_at(2),
        None => (rest, "0"),
    };
    let hours: i32 = hours.parse().ok()?;
    let minutes: i32 = minutes.parse().ok()?;
    if hours > 14 || minutes >= 60 {
        return None;
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}
