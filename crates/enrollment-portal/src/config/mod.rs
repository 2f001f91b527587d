use std::env;
use std::fmt;
use std::net::{IpAddr, SocketAddr};

const DEFAULT_CONNECTION_BUFFER: usize = 16;
const MAX_CONNECTION_BUFFER: usize = 1024;

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

/// Top-level configuration for the enrollment service.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: AppEnvironment,
    pub server: ServerConfig,
    pub telemetry: TelemetryConfig,
    pub notifications: NotificationConfig,
    pub email: EmailConfig,
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

        let connection_buffer = match env::var("APP_CONNECTION_BUFFER") {
            Ok(raw) => raw
                .trim()
                .parse::<usize>()
                .ok()
                .filter(|size| (1..=MAX_CONNECTION_BUFFER).contains(size))
                .ok_or(ConfigError::InvalidConnectionBuffer { value: raw })?,
            Err(_) => DEFAULT_CONNECTION_BUFFER,
        };

        let from_address =
            env::var("APP_EMAIL_FROM").unwrap_or_else(|_| "registrar@enrollment.local".to_string());
        if !from_address.contains('@') {
            return Err(ConfigError::InvalidEmailSender {
                value: from_address,
            });
        }
        let school_name =
            env::var("APP_SCHOOL_NAME").unwrap_or_else(|_| "Enrollment Office".to_string());

        Ok(Self {
            environment,
            server: ServerConfig { host, port },
            telemetry: TelemetryConfig {
                log_level,
                log_format,
            },
            notifications: NotificationConfig { connection_buffer },
            email: EmailConfig {
                from_address,
                school_name,
            },
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

/// Output layout for the fmt subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Compact,
    Pretty,
}

impl LogFormat {
    fn from_str(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "pretty" => Self::Pretty,
            _ => Self::Compact,
        }
    }
}

/// Tracing and metrics controls.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
    pub log_format: LogFormat,
}

/// Real-time channel tuning.
#[derive(Debug, Clone, Copy)]
pub struct NotificationConfig {
    /// Events queued per connection before further events are dropped for it.
    pub connection_buffer: usize,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            connection_buffer: DEFAULT_CONNECTION_BUFFER,
        }
    }
}

/// Sender identity used for status e-mails.
#[derive(Debug, Clone)]
pub struct EmailConfig {
    pub from_address: String,
    pub school_name: String,
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            from_address: "registrar@enrollment.local".to_string(),
            school_name: "Enrollment Office".to_string(),
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidPort,
    InvalidHost { source: std::net::AddrParseError },
    InvalidConnectionBuffer { value: String },
    InvalidEmailSender { value: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidPort => write!(f, "APP_PORT must be a valid u16"),
            ConfigError::InvalidHost { .. } => {
                write!(f, "APP_HOST must parse to an IPv4 or IPv6 address")
            }
            ConfigError::InvalidConnectionBuffer { value } => write!(
                f,
                "APP_CONNECTION_BUFFER must be between 1 and {MAX_CONNECTION_BUFFER} (got '{value}')"
            ),
            ConfigError::InvalidEmailSender { value } => {
                write!(f, "APP_EMAIL_FROM must be an e-mail address (got '{value}')")
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::InvalidHost { source } => Some(source),
            ConfigError::InvalidPort
            | ConfigError::InvalidConnectionBuffer { .. }
            | ConfigError::InvalidEmailSender { .. } => None,
        }
    }
}
