//! Configuration loading and representation.
//!
//! Everything comes from environment variables. `Config::from_lookup` takes
//! any key -> value function so tests do not touch the process environment.

use std::net::SocketAddr;
use std::time::Duration;

use courier_observability::LogFormat;
use thiserror::Error;

use crate::publish::RetryPolicy;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{key} has invalid value '{value}': {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

impl ConfigError {
    fn invalid(key: &'static str, value: &str, reason: impl ToString) -> Self {
        Self::Invalid {
            key,
            value: value.to_string(),
            reason: reason.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CdcConfig {
    pub slot: String,
    pub poll_interval: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub bind_addr: SocketAddr,
    /// `None` selects the in-memory store.
    pub database: Option<DatabaseConfig>,
    /// `None` delivers republished messages in-process.
    pub push_endpoint: Option<String>,
    /// Redelivery schedule for published messages, in both publishing modes.
    pub retry: RetryPolicy,
    /// `None` disables the change relay.
    pub cdc: Option<CdcConfig>,
    pub flagsmith_key: Option<String>,
    pub log_format: LogFormat,
}

impl Config {
    pub const DEFAULT_BIND_ADDR: &'static str = "0.0.0.0:8080";
    pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;
    pub const DEFAULT_CDC_POLL_INTERVAL_MS: u64 = 1000;

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let bind_raw = get("BIND_ADDR").unwrap_or_else(|| Self::DEFAULT_BIND_ADDR.to_string());
        let bind_addr = bind_raw
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::invalid("BIND_ADDR", &bind_raw, e))?;

        let max_connections = match get("DATABASE_MAX_CONNECTIONS") {
            Some(raw) => match raw.parse::<u32>() {
                Ok(n) if n > 0 => n,
                Ok(_) => {
                    return Err(ConfigError::invalid(
                        "DATABASE_MAX_CONNECTIONS",
                        &raw,
                        "must be positive",
                    ));
                }
                Err(e) => return Err(ConfigError::invalid("DATABASE_MAX_CONNECTIONS", &raw, e)),
            },
            None => Self::DEFAULT_MAX_CONNECTIONS,
        };
        let database = get("DATABASE_URL").map(|url| DatabaseConfig {
            url,
            max_connections,
        });

        let push_endpoint = match get("PUSH_ENDPOINT") {
            Some(raw) if raw.starts_with("http://") || raw.starts_with("https://") => {
                Some(raw.trim_end_matches('/').to_string())
            }
            Some(raw) => {
                return Err(ConfigError::invalid(
                    "PUSH_ENDPOINT",
                    &raw,
                    "must be an http(s) URL",
                ));
            }
            None => None,
        };

        let retry = RetryPolicy {
            max_retries: parse_or("PUSH_RETRY_MAX", &get, RetryPolicy::DEFAULT_MAX_RETRIES)?,
            base_delay: Duration::from_millis(parse_or(
                "PUSH_RETRY_BASE_MS",
                &get,
                RetryPolicy::DEFAULT_BASE_DELAY_MS,
            )?),
            max_delay: Duration::from_millis(parse_or(
                "PUSH_RETRY_MAX_MS",
                &get,
                RetryPolicy::DEFAULT_MAX_DELAY_MS,
            )?),
            jitter: parse_or("PUSH_RETRY_JITTER", &get, RetryPolicy::DEFAULT_JITTER)?,
        };
        if !(0.0..=1.0).contains(&retry.jitter) {
            return Err(ConfigError::invalid(
                "PUSH_RETRY_JITTER",
                &retry.jitter.to_string(),
                "must be between 0 and 1",
            ));
        }

        let poll_ms = match get("CDC_POLL_INTERVAL_MS") {
            Some(raw) => raw
                .parse::<u64>()
                .map_err(|e| ConfigError::invalid("CDC_POLL_INTERVAL_MS", &raw, e))?,
            None => Self::DEFAULT_CDC_POLL_INTERVAL_MS,
        };
        let cdc = get("CDC_SLOT").map(|slot| CdcConfig {
            slot,
            poll_interval: Duration::from_millis(poll_ms),
        });

        let log_format = match get("LOG_FORMAT").as_deref() {
            None | Some("json") => LogFormat::Json,
            Some("pretty") => LogFormat::Pretty,
            Some(other) => {
                return Err(ConfigError::invalid(
                    "LOG_FORMAT",
                    other,
                    "expected 'json' or 'pretty'",
                ));
            }
        };

        Ok(Self {
            bind_addr,
            database,
            push_endpoint,
            retry,
            cdc,
            flagsmith_key: get("FLAGSMITH_KEY"),
            log_format,
        })
    }
}

fn parse_or<T, G>(key: &'static str, get: &G, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| ConfigError::invalid(key, &raw, e)),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn defaults_select_in_memory_everything() {
        let cfg = config(&[]).unwrap();
        assert_eq!(cfg.bind_addr, "0.0.0.0:8080".parse().unwrap());
        assert!(cfg.database.is_none());
        assert!(cfg.push_endpoint.is_none());
        assert!(cfg.cdc.is_none());
        assert!(cfg.flagsmith_key.is_none());
        assert_eq!(cfg.log_format, LogFormat::Json);
        assert_eq!(cfg.retry, RetryPolicy::default());
    }

    #[test]
    fn reads_full_environment() {
        let cfg = config(&[
            ("BIND_ADDR", "127.0.0.1:9000"),
            ("DATABASE_URL", "postgres://localhost/api"),
            ("DATABASE_MAX_CONNECTIONS", "4"),
            ("PUSH_ENDPOINT", "http://relay.local/push/"),
            ("CDC_SLOT", "courier"),
            ("CDC_POLL_INTERVAL_MS", "250"),
            ("FLAGSMITH_KEY", "env-key"),
            ("LOG_FORMAT", "pretty"),
            ("PUSH_RETRY_MAX", "2"),
            ("PUSH_RETRY_BASE_MS", "50"),
            ("PUSH_RETRY_MAX_MS", "400"),
            ("PUSH_RETRY_JITTER", "0"),
        ])
        .unwrap();

        assert_eq!(
            cfg.database,
            Some(DatabaseConfig {
                url: "postgres://localhost/api".into(),
                max_connections: 4
            })
        );
        assert_eq!(cfg.push_endpoint.as_deref(), Some("http://relay.local/push"));
        assert_eq!(
            cfg.cdc,
            Some(CdcConfig {
                slot: "courier".into(),
                poll_interval: Duration::from_millis(250)
            })
        );
        assert_eq!(cfg.flagsmith_key.as_deref(), Some("env-key"));
        assert_eq!(cfg.log_format, LogFormat::Pretty);
        assert_eq!(
            cfg.retry,
            RetryPolicy {
                max_retries: 2,
                base_delay: Duration::from_millis(50),
                max_delay: Duration::from_millis(400),
                jitter: 0.0,
            }
        );
    }

    #[test]
    fn invalid_values_are_rejected() {
        for (key, value) in [
            ("BIND_ADDR", "nowhere"),
            ("DATABASE_MAX_CONNECTIONS", "0"),
            ("PUSH_ENDPOINT", "relay.local"),
            ("CDC_POLL_INTERVAL_MS", "soon"),
            ("LOG_FORMAT", "xml"),
            ("PUSH_RETRY_MAX", "-1"),
            ("PUSH_RETRY_BASE_MS", "fast"),
            ("PUSH_RETRY_JITTER", "1.5"),
        ] {
            let err = config(&[(key, value)]).unwrap_err();
            assert!(matches!(err, ConfigError::Invalid { key: k, .. } if k == key));
        }
    }
}
