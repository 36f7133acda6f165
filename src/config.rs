//! Application configuration
//!
//! Layered sources, later wins: defaults, config file (TOML or JSON),
//! `CONIC_*` environment variables, command-line flags (applied by the
//! binary). The final configuration is always validated.

use std::env;
use std::fmt;
use std::path::Path;
use std::time::Duration;

use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize, Serializer};

use crate::error::{Error, Result};

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Listener configuration
    pub server: ServerConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to bind to (1-65535)
    pub port: u16,
    /// Per-message read deadline on peer connections
    #[serde(
        deserialize_with = "deserialize_duration",
        serialize_with = "serialize_duration"
    )]
    pub read_timeout: Duration,
    /// Per-frame write deadline on peer connections
    #[serde(
        deserialize_with = "deserialize_duration",
        serialize_with = "serialize_duration"
    )]
    pub write_timeout: Duration,
    /// Deadline for completing the WebSocket upgrade after accept
    #[serde(
        deserialize_with = "deserialize_duration",
        serialize_with = "serialize_duration"
    )]
    pub idle_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 3000,
            read_timeout: Duration::from_secs(60),
            write_timeout: Duration::from_secs(10),
            idle_timeout: Duration::from_secs(120),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (debug, info, warn, error)
    pub level: String,
    /// Log format (json, text)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "json".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from an optional file plus the environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };

        config.apply_env_overrides()?;
        config.validate()?;

        Ok(config)
    }

    /// Load configuration from a TOML or JSON file
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::config("config", format!("failed to read config file: {e}")))?;

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => toml::from_str(&contents)
                .map_err(|e| Error::config("config", format!("failed to parse TOML config: {e}"))),
            Some("json") => serde_json::from_str(&contents)
                .map_err(|e| Error::config("config", format!("failed to parse JSON config: {e}"))),
            other => Err(Error::config(
                "config",
                format!("unsupported config file format: {:?}", other.unwrap_or("")),
            )),
        }
    }

    /// Apply `CONIC_*` environment variable overrides
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(host) = env::var("CONIC_SERVER_HOST") {
            if !host.is_empty() {
                self.server.host = host;
            }
        }
        if let Ok(port) = env::var("CONIC_SERVER_PORT") {
            if !port.is_empty() {
                self.server.port = port.parse().map_err(|e| {
                    Error::config("server.port", format!("invalid port number: {e}"))
                })?;
            }
        }
        if let Ok(level) = env::var("CONIC_LOG_LEVEL") {
            if !level.is_empty() {
                self.logging.level = level;
            }
        }
        if let Ok(format) = env::var("CONIC_LOG_FORMAT") {
            if !format.is_empty() {
                self.logging.format = format;
            }
        }

        Ok(())
    }

    /// Validate the final configuration
    pub fn validate(&self) -> Result<()> {
        if self.server.host.is_empty() {
            return Err(Error::config("server.host", "host must not be empty"));
        }
        if self.server.port == 0 {
            return Err(Error::config("server.port", "invalid port number"));
        }
        if !matches!(self.logging.level.as_str(), "debug" | "info" | "warn" | "error") {
            return Err(Error::config(
                "logging.level",
                format!("unknown log level: {}", self.logging.level),
            ));
        }
        if !matches!(self.logging.format.as_str(), "json" | "text") {
            return Err(Error::config(
                "logging.format",
                format!("unknown log format: {}", self.logging.format),
            ));
        }

        Ok(())
    }

    /// Address the listener binds to
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

/// Deserialize a duration from `"30s"`-style strings or bare seconds
fn deserialize_duration<'de, D>(deserializer: D) -> std::result::Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    struct DurationVisitor;

    impl<'de> Visitor<'de> for DurationVisitor {
        type Value = Duration;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("a duration string like '30s' or '5m', or seconds as an integer")
        }

        fn visit_str<E>(self, value: &str) -> std::result::Result<Duration, E>
        where
            E: de::Error,
        {
            parse_duration(value).map_err(E::custom)
        }

        fn visit_u64<E>(self, value: u64) -> std::result::Result<Duration, E>
        where
            E: de::Error,
        {
            Ok(Duration::from_secs(value))
        }

        fn visit_i64<E>(self, value: i64) -> std::result::Result<Duration, E>
        where
            E: de::Error,
        {
            u64::try_from(value)
                .map(Duration::from_secs)
                .map_err(|_| E::custom("duration cannot be negative"))
        }
    }

    deserializer.deserialize_any(DurationVisitor)
}

/// Serialize a duration in the same scalar form the loader accepts
fn serialize_duration<S>(duration: &Duration, serializer: S) -> std::result::Result<S::Ok, S::Error>
where
    S: Serializer,
{
    if duration.subsec_nanos() == 0 {
        serializer.serialize_str(&format!("{}s", duration.as_secs()))
    } else {
        serializer.serialize_str(&format!("{}ms", duration.as_millis()))
    }
}

/// Parse common duration formats: `500ms`, `30s`, `5m`, `2h`, bare seconds
fn parse_duration(s: &str) -> std::result::Result<Duration, String> {
    if let Some(ms) = s.strip_suffix("ms") {
        let ms: u64 = ms.parse().map_err(|_| "invalid milliseconds")?;
        Ok(Duration::from_millis(ms))
    } else if let Some(secs) = s.strip_suffix('s') {
        let secs: u64 = secs.parse().map_err(|_| "invalid seconds")?;
        Ok(Duration::from_secs(secs))
    } else if let Some(mins) = s.strip_suffix('m') {
        let mins: u64 = mins.parse().map_err(|_| "invalid minutes")?;
        Ok(Duration::from_secs(mins * 60))
    } else if let Some(hours) = s.strip_suffix('h') {
        let hours: u64 = hours.parse().map_err(|_| "invalid hours")?;
        Ok(Duration::from_secs(hours * 3600))
    } else {
        let secs: u64 = s.parse().map_err(|_| "invalid duration format")?;
        Ok(Duration::from_secs(secs))
    }
}
