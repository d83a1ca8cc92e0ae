use std::env;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use crate::domain::SourceSystem;

/// Distinguishes runtime behavior for different stages of the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnvironment {
    Development,
    Test,
    Production,
}

impl AppEnvironment {
    fn from_str(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "prod" | "production" => Self::Production,
            "test" | "ci" => Self::Test,
            _ => Self::Development,
        }
    }
}

/// Top-level configuration for the application.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: AppEnvironment,
    pub server: ServerConfig,
    pub telemetry: TelemetryConfig,
    pub sync: SyncConfig,
    pub credentials: CredentialsConfig,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let environment = AppEnvironment::from_str(
            &env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
        );

        let host = env::var("APP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("APP_PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidPort)?;

        let log_level = env::var("APP_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
        let log_format = LogFormat::from_str(
            &env::var("APP_LOG_FORMAT").unwrap_or_else(|_| "compact".to_string()),
        );

        Ok(Self {
            environment,
            server: ServerConfig { host, port },
            telemetry: TelemetryConfig {
                log_level,
                log_format,
            },
            sync: SyncConfig::from_env()?,
            credentials: CredentialsConfig::from_env(),
        })
    }
}

/// Settings controlling the HTTP server binding.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        if self.host.eq_ignore_ascii_case("localhost") {
            return Ok(SocketAddr::new(IpAddr::from([127, 0, 0, 1]), self.port));
        }

        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|source| ConfigError::InvalidHost { source })?;

        Ok(SocketAddr::new(ip, self.port))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Compact,
    Json,
}

impl LogFormat {
    fn from_str(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "json" => Self::Json,
            _ => Self::Compact,
        }
    }
}

/// Tracing controls.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
    pub log_format: LogFormat,
}

/// Backpressure knobs applied to every sync run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    pub batch_size: usize,
    pub batch_delay: Duration,
    pub max_retries: u32,
    pub retry_base_delay: Duration,
    pub fetch_details: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            batch_delay: Duration::from_millis(1000),
            max_retries: 3,
            retry_base_delay: Duration::from_millis(500),
            fetch_details: true,
        }
    }
}

impl SyncConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let batch_size = number_var("SYNC_BATCH_SIZE", defaults.batch_size as u64)?;
        if batch_size == 0 {
            return Err(ConfigError::InvalidNumber {
                key: "SYNC_BATCH_SIZE",
            });
        }

        Ok(Self {
            batch_size: batch_size as usize,
            batch_delay: Duration::from_millis(number_var(
                "SYNC_BATCH_DELAY_MS",
                defaults.batch_delay.as_millis() as u64,
            )?),
            max_retries: number_var("SYNC_MAX_RETRIES", u64::from(defaults.max_retries))?
                .try_into()
                .map_err(|_| ConfigError::InvalidNumber {
                    key: "SYNC_MAX_RETRIES",
                })?,
            retry_base_delay: Duration::from_millis(number_var(
                "SYNC_RETRY_BASE_MS",
                defaults.retry_base_delay.as_millis() as u64,
            )?),
            fetch_details: env::var("SYNC_FETCH_DETAILS")
                .map(|value| !matches!(value.trim().to_ascii_lowercase().as_str(), "false" | "0" | "no"))
                .unwrap_or(defaults.fetch_details),
        })
    }
}

/// Credentials for one upstream system. Either part may be absent.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct SystemCredentials {
    pub refresh_token: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub static_token: Option<String>,
}

impl SystemCredentials {
    /// True only when all three parts of the refresh material are present.
    pub fn has_refresh_material(&self) -> bool {
        [&self.refresh_token, &self.client_id, &self.client_secret]
            .iter()
            .all(|part| part.is_some())
    }

    fn from_env(prefix: &str) -> Self {
        Self {
            refresh_token: text_var(&format!("{prefix}_REFRESH_TOKEN")),
            client_id: text_var(&format!("{prefix}_CLIENT_ID")),
            client_secret: text_var(&format!("{prefix}_CLIENT_SECRET")),
            static_token: text_var(&format!("{prefix}_ACCESS_TOKEN")),
        }
    }
}

impl fmt::Debug for SystemCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SystemCredentials")
            .field("refresh_material", &self.has_refresh_material())
            .field("static_token", &self.static_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[derive(Debug, Clone, Default)]
pub struct CredentialsConfig {
    pub rezen: SystemCredentials,
    pub zoho: SystemCredentials,
    pub quickbooks: SystemCredentials,
}

impl CredentialsConfig {
    fn from_env() -> Self {
        Self {
            rezen: SystemCredentials {
                static_token: text_var("REZEN_API_KEY"),
                ..SystemCredentials::default()
            },
            zoho: SystemCredentials::from_env("ZOHO"),
            quickbooks: SystemCredentials::from_env("QUICKBOOKS"),
        }
    }

    pub fn for_system(&self, system: SourceSystem) -> &SystemCredentials {
        match system {
            SourceSystem::Rezen => &self.rezen,
            SourceSystem::Zoho => &self.zoho,
            SourceSystem::Quickbooks => &self.quickbooks,
        }
    }
}

fn text_var(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn number_var(key: &'static str, default: u64) -> Result<u64, ConfigError> {
    match env::var(key) {
        Ok(value) => value
            .trim()
            .parse::<u64>()
            .map_err(|_| ConfigError::InvalidNumber { key }),
        Err(_) => Ok(default),
    }
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidPort,
    InvalidHost { source: std::net::AddrParseError },
    InvalidNumber { key: &'static str },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidPort => write!(f, "APP_PORT must be a valid u16"),
            ConfigError::InvalidHost { .. } => {
                write!(f, "APP_HOST must parse to an IPv4 or IPv6 address")
            }
            ConfigError::InvalidNumber { key } => {
                write!(f, "{key} must be a positive whole number")
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::InvalidHost { source } => Some(source),
            ConfigError::InvalidPort | ConfigError::InvalidNumber { .. } => None,
        }
    }
}
