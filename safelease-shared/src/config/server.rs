use std::{
    env, fmt, fs,
    path::{Path, PathBuf},
    str::FromStr,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

const DEV_JWT_SECRET: &str = "safelease-dev-secret";

/// Deployment profile selecting the baseline defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Profile {
    #[default]
    Dev,
    Test,
    Prod,
}

impl FromStr for Profile {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "dev" | "development" => Ok(Self::Dev),
            "test" => Ok(Self::Test),
            "prod" | "production" => Ok(Self::Prod),
            other => Err(format!("unknown profile `{other}`")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "text" | "pretty" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown log format `{other}`")),
        }
    }
}

/// Serialization formats accepted for configuration files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Yaml,
    Json,
    Toml,
}

impl ConfigFormat {
    #[must_use]
    pub fn from_path(path: &Path) -> Option<Self> {
        match path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase)
            .as_deref()
        {
            Some("yaml" | "yml") => Some(Self::Yaml),
            Some("json") => Some(Self::Json),
            Some("toml") => Some(Self::Toml),
            _ => None,
        }
    }
}

impl FromStr for ConfigFormat {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "yaml" | "yml" => Ok(Self::Yaml),
            "json" => Ok(Self::Json),
            "toml" => Ok(Self::Toml),
            other => Err(format!("unsupported configuration format `{other}`")),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse configuration file {path}: {message}")]
    Parse { path: PathBuf, message: String },
    #[error("unsupported configuration format for {0}; use yaml, json, or toml")]
    UnsupportedFormat(PathBuf),
    #[error("invalid value `{value}` for {var}")]
    InvalidEnv { var: &'static str, value: String },
    #[error("failed to render configuration: {0}")]
    Render(String),
    #[error("invalid configuration: {}", .0.join("; "))]
    Invalid(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CorsConfig {
    /// Empty means any origin.
    pub allowed_origins: Vec<String>,
    pub allow_credentials: bool,
    pub max_age_seconds: u64,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: Vec::new(),
            allow_credentials: false,
            max_age_seconds: 600,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub request_id_header: String,
    /// Route that upgrades to the realtime chat socket.
    pub realtime_path: String,
    pub cors: CorsConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            request_id_header: "x-request-id".to_string(),
            realtime_path: "/ws".to_string(),
            cors: CorsConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Postgres connection string. Without one the server keeps chat state in memory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub max_connections: u32,
    pub statement_timeout_ms: u64,
    pub bootstrap_path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 10,
            statement_timeout_ms: 5_000,
            bootstrap_path: PathBuf::from("scripts/pg"),
        }
    }
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// HMAC secret shared with the token issuer.
    pub jwt_secret: String,
    /// Clock skew tolerated when checking `exp`.
    pub leeway_seconds: u64,
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthConfig")
            .field("jwt_secret", &"<redacted>")
            .field("leeway_seconds", &self.leeway_seconds)
            .finish()
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: DEV_JWT_SECRET.to_string(),
            leeway_seconds: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// Upper bound on trimmed message length, in characters.
    pub max_message_length: usize,
    /// Reject joins to conversations the caller is not part of.
    pub enforce_participants: bool,
    /// Frames buffered per connection before a slow reader is disconnected.
    pub outbound_queue_capacity: usize,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            max_message_length: 4_000,
            enforce_participants: true,
            outbound_queue_capacity: 256,
        }
    }
}

/// Fully resolved configuration for the chat server and its tools.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub profile: Profile,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub db: DatabaseConfig,
    pub auth: AuthConfig,
    pub chat: ChatConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self::default_for_profile(Profile::Dev)
    }
}

impl Config {
    /// Baseline configuration for a profile.
    #[must_use]
    pub fn default_for_profile(profile: Profile) -> Self {
        let mut config = Self {
            profile,
            server: ServerConfig::default(),
            logging: LoggingConfig::default(),
            db: DatabaseConfig::default(),
            auth: AuthConfig::default(),
            chat: ChatConfig::default(),
        };

        match profile {
            Profile::Dev => {
                config.logging.level = "debug".to_string();
            }
            Profile::Test => {
                config.server.host = "127.0.0.1".to_string();
                config.logging.level = "warn".to_string();
            }
            Profile::Prod => {
                config.logging.format = LogFormat::Json;
                config.auth.jwt_secret = String::new();
                config.db.max_connections = 32;
            }
        }

        config
    }

    /// Resolves configuration from defaults, an optional file, `SAFELEASE_*`
    /// environment variables, and finally the port override, in that order.
    ///
    /// # Errors
    /// Returns [`ConfigError`] when the file cannot be read or parsed, an
    /// environment value is malformed, or the result fails validation.
    pub fn load_config(
        config_path: Option<PathBuf>,
        port_override: Option<u16>,
    ) -> Result<Self, ConfigError> {
        let profile = match env::var("SAFELEASE_PROFILE") {
            Ok(value) => value.parse().map_err(|_| ConfigError::InvalidEnv {
                var: "SAFELEASE_PROFILE",
                value,
            })?,
            Err(_) => Profile::Dev,
        };

        let mut config = match config_path {
            Some(path) => Self::from_file(&path)?,
            None => Self::default_for_profile(profile),
        };

        config.apply_env_overrides()?;

        if let Some(port) = port_override {
            config.server.port = port;
        }

        config.validate().map_err(ConfigError::Invalid)?;
        Ok(config)
    }

    /// Parses a configuration file; missing fields fall back to dev defaults.
    ///
    /// # Errors
    /// Returns [`ConfigError`] for unreadable, unparseable, or unsupported files.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let format =
            ConfigFormat::from_path(path).ok_or_else(|| ConfigError::UnsupportedFormat(path.into()))?;
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content, format).map_err(|message| ConfigError::Parse {
            path: path.to_path_buf(),
            message,
        })
    }

    fn parse(content: &str, format: ConfigFormat) -> Result<Self, String> {
        match format {
            ConfigFormat::Yaml => serde_yml::from_str(content).map_err(|err| err.to_string()),
            ConfigFormat::Json => serde_json::from_str(content).map_err(|err| err.to_string()),
            ConfigFormat::Toml => toml::from_str(content).map_err(|err| err.to_string()),
        }
    }

    /// Serializes the configuration in the requested format.
    ///
    /// # Errors
    /// Returns [`ConfigError::Render`] if serialization fails.
    pub fn render(&self, format: ConfigFormat) -> Result<String, ConfigError> {
        match format {
            ConfigFormat::Yaml => serde_yml::to_string(self).map_err(|err| err.to_string()),
            ConfigFormat::Json => serde_json::to_string_pretty(self).map_err(|err| err.to_string()),
            ConfigFormat::Toml => toml::to_string_pretty(self).map_err(|err| err.to_string()),
        }
        .map_err(ConfigError::Render)
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(host) = env::var("SAFELEASE_SERVER_HOST") {
            self.server.host = host;
        }
        if let Ok(port) = env::var("SAFELEASE_SERVER_PORT") {
            self.server.port = port.parse().map_err(|_| ConfigError::InvalidEnv {
                var: "SAFELEASE_SERVER_PORT",
                value: port,
            })?;
        }
        if let Ok(url) = env::var("SAFELEASE_DATABASE_URL") {
            self.db.url = Some(url).filter(|url| !url.trim().is_empty());
        }
        if let Ok(level) = env::var("SAFELEASE_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(format) = env::var("SAFELEASE_LOG_FORMAT") {
            self.logging.format = format.parse().map_err(|_| ConfigError::InvalidEnv {
                var: "SAFELEASE_LOG_FORMAT",
                value: format,
            })?;
        }
        if let Ok(secret) = env::var("SAFELEASE_JWT_SECRET") {
            self.auth.jwt_secret = secret;
        }
        Ok(())
    }

    /// Checks cross-field invariants.
    ///
    /// # Errors
    /// Returns every violated rule as a human readable message.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.server.port == 0 {
            errors.push("Invalid server port. Must be greater than 0.".to_string());
        }
        if !self.server.realtime_path.starts_with('/') {
            errors.push("server.realtime_path must start with '/'".to_string());
        }
        if self.auth.jwt_secret.trim().is_empty() {
            errors.push("auth.jwt_secret must be set".to_string());
        } else if self.profile == Profile::Prod && self.auth.jwt_secret == DEV_JWT_SECRET {
            errors.push("auth.jwt_secret must not use the development secret in prod".to_string());
        }
        if self.chat.max_message_length == 0 {
            errors.push("chat.max_message_length must be greater than 0".to_string());
        }
        if self.chat.outbound_queue_capacity == 0 {
            errors.push("chat.outbound_queue_capacity must be greater than 0".to_string());
        }
        if self.db.url.is_some() && self.db.max_connections == 0 {
            errors.push("db.max_connections must be greater than 0".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
