//! Server settings read from `RESLOT_*` environment variables.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::engine::ChallengeSettings;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var}: cannot parse {value:?}")]
    Invalid { var: &'static str, value: String },

    #[error("{var} must be greater than zero")]
    Zero { var: &'static str },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub password: String,
    pub max_connections: usize,
    pub metrics_port: Option<u16>,
    pub challenge_ttl: Duration,
    pub token_ttl: Duration,
    pub code_digits: u32,
    pub request_timeout: Duration,
    pub reap_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: 5434,
            data_dir: PathBuf::from("./data"),
            password: "reslot".into(),
            max_connections: 256,
            metrics_port: None,
            challenge_ttl: Duration::from_secs(600),
            token_ttl: Duration::from_secs(900),
            code_digits: 6,
            request_timeout: Duration::from_millis(5000),
            reap_interval: Duration::from_secs(5),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from any variable source; unset variables keep their default.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Config::default();
        let parse = |var: &'static str| -> Result<Option<u64>, ConfigError> { parsed(&lookup, var) };

        let max_connections = parse("RESLOT_MAX_CONNECTIONS")?
            .map_or(defaults.max_connections, |n| n as usize);
        let secs = |var: &'static str, default: Duration| -> Result<Duration, ConfigError> {
            Ok(parse(var)?.map_or(default, Duration::from_secs))
        };

        let config = Config {
            bind: lookup("RESLOT_BIND").unwrap_or(defaults.bind),
            port: parsed(&lookup, "RESLOT_PORT")?.unwrap_or(defaults.port),
            data_dir: lookup("RESLOT_DATA_DIR").map_or(defaults.data_dir, PathBuf::from),
            password: lookup("RESLOT_PASSWORD").unwrap_or(defaults.password),
            max_connections,
            metrics_port: parsed(&lookup, "RESLOT_METRICS_PORT")?,
            challenge_ttl: secs("RESLOT_CHALLENGE_TTL_SECS", defaults.challenge_ttl)?,
            token_ttl: secs("RESLOT_TOKEN_TTL_SECS", defaults.token_ttl)?,
            code_digits: parsed(&lookup, "RESLOT_CODE_DIGITS")?.unwrap_or(defaults.code_digits),
            request_timeout: parse("RESLOT_REQUEST_TIMEOUT_MS")?
                .map_or(defaults.request_timeout, Duration::from_millis),
            reap_interval: secs("RESLOT_REAP_INTERVAL_SECS", defaults.reap_interval)?,
        };

        for (var, zero) in [
            ("RESLOT_MAX_CONNECTIONS", config.max_connections == 0),
            ("RESLOT_CHALLENGE_TTL_SECS", config.challenge_ttl.is_zero()),
            ("RESLOT_TOKEN_TTL_SECS", config.token_ttl.is_zero()),
            ("RESLOT_REQUEST_TIMEOUT_MS", config.request_timeout.is_zero()),
            ("RESLOT_REAP_INTERVAL_SECS", config.reap_interval.is_zero()),
        ] {
            if zero {
                return Err(ConfigError::Zero { var });
            }
        }
        Ok(config)
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn journal_path(&self) -> PathBuf {
        self.data_dir.join("reslot.journal")
    }

    pub fn challenge_settings(&self) -> ChallengeSettings {
        let to_chrono = |d: Duration| chrono::Duration::from_std(d).unwrap_or(chrono::Duration::MAX);
        ChallengeSettings {
            ttl: to_chrono(self.challenge_ttl),
            token_ttl: to_chrono(self.token_ttl),
            code_digits: self.code_digits,
        }
    }
}

fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, var: &'static str) -> Result<Option<T>, ConfigError> {
    match lookup(var) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { var, value }),
    }
}
