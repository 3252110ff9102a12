use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration as StdDuration;

use serde::Deserialize;
use thiserror::Error;

use crate::events::DispatchConfig;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub events: EventsConfig,
    pub ledger: LedgerConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub health_check_port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct EventsConfig {
    /// Chat transcript collaborator; None wires the noop sink.
    pub webhook_url: Option<String>,
    pub retry_max: u32,
    pub retry_delay_secs: u64,
    pub queue_capacity: usize,
}

impl EventsConfig {
    pub fn dispatch_config(&self) -> DispatchConfig {
        DispatchConfig {
            retry_max: self.retry_max,
            retry_delay: StdDuration::from_secs(self.retry_delay_secs),
            queue_capacity: self.queue_capacity,
        }
    }
}

#[derive(Clone, Debug)]
pub struct LedgerConfig {
    pub ttl_secs: u64,
}

impl LedgerConfig {
    pub fn ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.ttl_secs as i64)
    }
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub bind_address: Option<String>,
    pub port: Option<u16>,
    pub health_check_port: Option<u16>,
    pub events_webhook_url: Option<String>,
    pub ledger_ttl_secs: Option<u64>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://trato.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8081,
                health_check_port: 8080,
                graceful_shutdown_secs: 15,
            },
            events: EventsConfig {
                webhook_url: None,
                retry_max: 3,
                retry_delay_secs: 5,
                queue_capacity: 256,
            },
            ledger: LedgerConfig { ttl_secs: 86_400 },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    server: Option<ServerPatch>,
    events: Option<EventsPatch>,
    ledger: Option<LedgerPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    health_check_port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct EventsPatch {
    webhook_url: Option<String>,
    retry_max: Option<u32>,
    retry_delay_secs: Option<u64>,
    queue_capacity: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct LedgerPatch {
    ttl_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("trato.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_pairs(env::vars())?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(health_check_port) = server.health_check_port {
                self.server.health_check_port = health_check_port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(events) = patch.events {
            if let Some(webhook_url) = events.webhook_url {
                self.events.webhook_url = Some(webhook_url);
            }
            if let Some(retry_max) = events.retry_max {
                self.events.retry_max = retry_max;
            }
            if let Some(retry_delay_secs) = events.retry_delay_secs {
                self.events.retry_delay_secs = retry_delay_secs;
            }
            if let Some(queue_capacity) = events.queue_capacity {
                self.events.queue_capacity = queue_capacity;
            }
        }

        if let Some(ledger) = patch.ledger {
            if let Some(ttl_secs) = ledger.ttl_secs {
                self.ledger.ttl_secs = ttl_secs;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    /// Apply `TRATO_*` environment overrides from an explicit iterator so
    /// the parsing is testable without touching process state.
    fn apply_env_pairs(
        &mut self,
        vars: impl Iterator<Item = (String, String)>,
    ) -> Result<(), ConfigError> {
        for (key, value) in vars {
            match key.as_str() {
                "TRATO_DATABASE_URL" => self.database.url = value,
                "TRATO_DATABASE_MAX_CONNECTIONS" => {
                    self.database.max_connections = parse_env(&key, &value)?;
                }
                "TRATO_BIND_ADDRESS" => self.server.bind_address = value,
                "TRATO_PORT" => self.server.port = parse_env(&key, &value)?,
                "TRATO_HEALTH_CHECK_PORT" => {
                    self.server.health_check_port = parse_env(&key, &value)?;
                }
                "TRATO_EVENTS_WEBHOOK_URL" => self.events.webhook_url = Some(value),
                "TRATO_EVENTS_RETRY_MAX" => self.events.retry_max = parse_env(&key, &value)?,
                "TRATO_LEDGER_TTL_SECS" => self.ledger.ttl_secs = parse_env(&key, &value)?,
                "TRATO_LOG_LEVEL" => self.logging.level = value,
                "TRATO_LOG_FORMAT" => {
                    self.logging.format = value.parse().map_err(|_| {
                        ConfigError::InvalidEnvOverride { key: key.clone(), value }
                    })?;
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(bind_address) = overrides.bind_address {
            self.server.bind_address = bind_address;
        }
        if let Some(port) = overrides.port {
            self.server.port = port;
        }
        if let Some(health_check_port) = overrides.health_check_port {
            self.server.health_check_port = health_check_port;
        }
        if let Some(events_webhook_url) = overrides.events_webhook_url {
            self.events.webhook_url = Some(events_webhook_url);
        }
        if let Some(ledger_ttl_secs) = overrides.ledger_ttl_secs {
            self.ledger.ttl_secs = ledger_ttl_secs;
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.database.url.trim().is_empty() {
            return Err(ConfigError::Validation("database.url must not be empty".to_string()));
        }
        if self.server.port == self.server.health_check_port {
            return Err(ConfigError::Validation(
                "server.port and server.health_check_port must differ".to_string(),
            ));
        }
        if self.ledger.ttl_secs == 0 {
            return Err(ConfigError::Validation("ledger.ttl_secs must be positive".to_string()));
        }
        if self.events.queue_capacity == 0 {
            return Err(ConfigError::Validation(
                "events.queue_capacity must be positive".to_string(),
            ));
        }
        const LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];
        if !LEVELS.contains(&self.logging.level.to_ascii_lowercase().as_str()) {
            return Err(ConfigError::Validation(format!(
                "unsupported log level `{}`",
                self.logging.level
            )));
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn resolve_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        if path.exists() {
            return Some(path.to_path_buf());
        }
        return None;
    }
    let default = PathBuf::from("trato.toml");
    if default.exists() {
        Some(default)
    } else {
        None
    }
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;
    toml::from_str(&raw)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::path::PathBuf;

    use crate::config::{AppConfig, ConfigError, ConfigOverrides, LoadOptions, LogFormat};

    #[test]
    fn defaults_pass_validation() {
        let config = AppConfig::load(LoadOptions::default()).expect("defaults must load");
        assert_eq!(config.server.port, 8081);
        assert_eq!(config.ledger.ttl_secs, 86_400);
        assert_eq!(config.logging.format, LogFormat::Compact);
    }

    #[test]
    fn config_file_patch_overrides_defaults() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(
            file,
            r#"
[database]
url = "sqlite://negotiations.db"

[events]
webhook_url = "http://chat.internal/events"
retry_max = 7

[logging]
format = "json"
"#
        )
        .expect("write config");

        let config = AppConfig::load(LoadOptions {
            config_path: Some(file.path().to_path_buf()),
            ..LoadOptions::default()
        })
        .expect("load from file");

        assert_eq!(config.database.url, "sqlite://negotiations.db");
        assert_eq!(config.events.webhook_url.as_deref(), Some("http://chat.internal/events"));
        assert_eq!(config.events.retry_max, 7);
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn missing_required_file_fails_fast() {
        let result = AppConfig::load(LoadOptions {
            config_path: Some(PathBuf::from("/definitely/not/here.toml")),
            require_file: true,
            ..LoadOptions::default()
        });
        assert!(matches!(result, Err(ConfigError::MissingConfigFile(_))));
    }

    #[test]
    fn env_pairs_override_with_type_checking() {
        let mut config = AppConfig::default();
        config
            .apply_env_pairs(
                vec![
                    ("TRATO_PORT".to_string(), "9000".to_string()),
                    ("TRATO_LEDGER_TTL_SECS".to_string(), "3600".to_string()),
                ]
                .into_iter(),
            )
            .expect("valid overrides");
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.ledger.ttl_secs, 3600);

        let error = config
            .apply_env_pairs(vec![("TRATO_PORT".to_string(), "not-a-port".to_string())].into_iter())
            .expect_err("non-numeric port");
        assert!(matches!(error, ConfigError::InvalidEnvOverride { .. }));
    }

    #[test]
    fn colliding_ports_fail_validation() {
        let result = AppConfig::load(LoadOptions {
            overrides: ConfigOverrides {
                port: Some(8080),
                health_check_port: Some(8080),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        });
        let message = result.err().expect("validation error").to_string();
        assert!(message.contains("must differ"));
    }

    #[test]
    fn ledger_ttl_converts_to_a_duration() {
        let config = AppConfig::default();
        assert_eq!(config.ledger.ttl(), chrono::Duration::hours(24));
    }
}
