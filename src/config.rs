//! Configuration module
//!
//! Loads configuration from environment variables.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::applier::ApplierConfig;
use crate::producer::ProducerConfig;

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Database connection URL
    pub database_url: String,

    /// Maximum database connections in pool
    pub database_max_connections: u32,

    /// Connection attempts at startup before giving up
    pub database_connect_retries: u32,

    /// Delay between startup connection attempts
    pub database_retry_delay: Duration,

    /// Event log broker addresses, tried in order
    pub event_log_brokers: Vec<String>,

    /// Cursor owner name used by the appliers
    pub consumer_group: String,

    /// Applier idle wait between fetches
    pub applier_poll_interval: Duration,

    /// Applier wait before redelivery after a failed apply
    pub applier_retry_backoff: Duration,

    /// Producer retries after the first attempt
    pub publish_max_retries: u32,

    /// Server host
    pub host: String,

    /// Server port
    pub port: u16,

    /// Environment (development, production)
    pub environment: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url =
            env::var("DATABASE_URL").map_err(|_| ConfigError::MissingEnv("DATABASE_URL"))?;

        let event_log_brokers = match env::var("EVENT_LOG_BROKERS") {
            Ok(list) => parse_broker_list(&list)?,
            Err(_) => vec![database_url.clone()],
        };

        Ok(Self {
            database_max_connections: parse_or("DATABASE_MAX_CONNECTIONS", 10)?,
            database_connect_retries: parse_or("DATABASE_CONNECT_RETRIES", 5)?,
            database_retry_delay: Duration::from_secs(parse_or("DATABASE_RETRY_DELAY_SECS", 5)?),
            event_log_brokers,
            consumer_group: env::var("CONSUMER_GROUP")
                .unwrap_or_else(|_| "ledger-applier".to_string()),
            applier_poll_interval: Duration::from_millis(parse_or("APPLIER_POLL_INTERVAL_MS", 250)?),
            applier_retry_backoff: Duration::from_millis(parse_or(
                "APPLIER_RETRY_BACKOFF_MS",
                1000,
            )?),
            publish_max_retries: parse_or("PUBLISH_MAX_RETRIES", 5)?,
            host: env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: parse_or("PORT", 3000)?,
            environment: env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),
            database_url,
        })
    }

    pub fn applier(&self) -> ApplierConfig {
        ApplierConfig {
            consumer_group: self.consumer_group.clone(),
            poll_interval: self.applier_poll_interval,
            retry_backoff: self.applier_retry_backoff,
        }
    }

    pub fn producer(&self) -> ProducerConfig {
        ProducerConfig {
            max_retries: self.publish_max_retries,
            ..ProducerConfig::default()
        }
    }
}

fn parse_or<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue(name)),
        Err(_) => Ok(default),
    }
}

fn parse_broker_list(list: &str) -> Result<Vec<String>, ConfigError> {
    let brokers: Vec<String> = list
        .split(',')
        .map(str::trim)
        .filter(|b| !b.is_empty())
        .map(String::from)
        .collect();

    if brokers.is_empty() {
        return Err(ConfigError::InvalidValue("EVENT_LOG_BROKERS"));
    }
    Ok(brokers)
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnv(&'static str),

    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_broker_list() {
        let brokers = parse_broker_list(" postgres://a/log , ,postgres://b/log").unwrap();
        assert_eq!(brokers, vec!["postgres://a/log", "postgres://b/log"]);

        assert!(matches!(
            parse_broker_list(" , "),
            Err(ConfigError::InvalidValue("EVENT_LOG_BROKERS"))
        ));
    }

    #[test]
    fn test_parse_or_default_when_unset() {
        let value: u32 = parse_or("DIGITAL_BANK_TEST_UNSET_VARIABLE", 42).unwrap();
        assert_eq!(value, 42);
    }
}
