use crate::market::quote::DEFAULT_QUOTE_URL;
use crate::market::{GatewayEndpoint, SessionConfig};
use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub journal_path: PathBuf,
    pub gateway: GatewayEndpoint,
    pub ticker_refresh_ms: u64,
    pub keepalive_ms: u64,
    pub quote_fallback_url: String,
    pub auto_connect: bool,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnv(String),
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_map(std::env::vars().collect())
    }

    pub fn from_env_map(env_map: HashMap<String, String>) -> Result<Self, ConfigError> {
        let port = parse_or(&env_map, "PORT", 8080u16, "must be a valid u16")?;

        let journal_path = env_map
            .get("JOURNAL_PATH")
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from)
            .ok_or_else(|| ConfigError::MissingEnv("JOURNAL_PATH".to_string()))?;

        let gateway = GatewayEndpoint {
            host: env_map
                .get("GATEWAY_HOST")
                .cloned()
                .unwrap_or_else(|| "127.0.0.1".to_string()),
            port: parse_or(&env_map, "GATEWAY_PORT", 7496u16, "must be a valid u16")?,
            client_id: parse_or(&env_map, "GATEWAY_CLIENT_ID", 1i64, "must be a valid i64")?,
        };

        let ticker_refresh_ms = parse_interval(&env_map, "TICKER_REFRESH_MS", 1000)?;
        let keepalive_ms = parse_interval(&env_map, "KEEPALIVE_MS", 7500)?;

        let quote_fallback_url = env_map
            .get("QUOTE_FALLBACK_URL")
            .cloned()
            .unwrap_or_else(|| DEFAULT_QUOTE_URL.to_string());

        let auto_connect = match env_map
            .get("AUTO_CONNECT")
            .map(|s| s.as_str())
            .unwrap_or("false")
        {
            "true" | "1" => true,
            "false" | "0" => false,
            other => {
                return Err(ConfigError::InvalidValue(
                    "AUTO_CONNECT".to_string(),
                    format!("must be true or false, got {}", other),
                ))
            }
        };

        Ok(Config {
            port,
            journal_path,
            gateway,
            ticker_refresh_ms,
            keepalive_ms,
            quote_fallback_url,
            auto_connect,
        })
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            ticker_refresh: Duration::from_millis(self.ticker_refresh_ms),
            keepalive: Duration::from_millis(self.keepalive_ms),
        }
    }
}

fn parse_or<T: FromStr>(
    env_map: &HashMap<String, String>,
    key: &str,
    default: T,
    reason: &str,
) -> Result<T, ConfigError> {
    match env_map.get(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| ConfigError::InvalidValue(key.to_string(), reason.to_string())),
        None => Ok(default),
    }
}

/// Worker intervals must be non-zero.
fn parse_interval(env_map: &HashMap<String, String>, key: &str, default: u64) -> Result<u64, ConfigError> {
    let ms = parse_or(env_map, key, default, "must be a positive integer")?;
    if ms == 0 {
        return Err(ConfigError::InvalidValue(
            key.to_string(),
            "must be a positive integer".to_string(),
        ));
    }
    Ok(ms)
}
