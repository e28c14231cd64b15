//! Server configuration module.
//!
//! Parses configuration from environment variables for the Daytrack server.
//!
//! # Environment Variables
//!
//! | Variable | Required | Default | Description |
//! |----------|----------|---------|-------------|
//! | `TELEGRAM_TOKEN` | Yes | - | Bot token |
//! | `TELEGRAM_CHAT_ID` | Yes | - | Chat the schedule is posted to (non-zero integer) |
//! | `RAILWAY_PUBLIC_DOMAIN` | No | - | Public hostname; enables webhook registration |
//! | `PORT` | No | 8080 | HTTP server port |
//! | `TELEGRAM_API_URL` | No | `https://api.telegram.org` | Bot API base URL |

use std::env;
use std::fmt;

use thiserror::Error;

/// Default HTTP server port.
const DEFAULT_PORT: u16 = 8080;

/// Default Bot API base URL.
pub const DEFAULT_API_URL: &str = "https://api.telegram.org";

/// Path the webhook is served on.
pub const WEBHOOK_PATH: &str = "/webhook";

/// Errors that can occur when parsing configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),

    /// Environment variable has invalid format.
    #[error("invalid format for {var}: {message}")]
    InvalidFormat { var: String, message: String },

    /// Port number is invalid.
    #[error("invalid port number: {0}")]
    InvalidPort(#[from] std::num::ParseIntError),
}

/// Server configuration parsed from environment variables.
#[derive(Clone)]
pub struct Config {
    /// Bot token used to authenticate against the Bot API.
    pub bot_token: String,

    /// Chat whose schedule messages are turned into checklists.
    pub chat_id: i64,

    /// Public hostname of the deployment, if any.
    pub public_domain: Option<String>,

    /// HTTP server port.
    pub port: u16,

    /// Bot API base URL.
    pub api_base_url: String,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("bot_token", &"<redacted>")
            .field("chat_id", &self.chat_id)
            .field("public_domain", &self.public_domain)
            .field("port", &self.port)
            .field("api_base_url", &self.api_base_url)
            .finish()
    }
}

impl Config {
    /// Parse configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - `TELEGRAM_TOKEN` or `TELEGRAM_CHAT_ID` is missing or empty
    /// - `TELEGRAM_CHAT_ID` is not a non-zero integer
    /// - Port number is not a valid u16
    ///
    /// # Example
    ///
    /// ```no_run
    /// use daytrack_server::config::Config;
    ///
    /// let config = Config::from_env().expect("Failed to load config");
    /// println!("Server will listen on port {}", config.port);
    /// ```
    pub fn from_env() -> Result<Self, ConfigError> {
        let bot_token = required_env("TELEGRAM_TOKEN")?;
        let chat_id = parse_chat_id(&required_env("TELEGRAM_CHAT_ID")?)?;
        let public_domain = optional_env("RAILWAY_PUBLIC_DOMAIN");
        let port = parse_port()?;
        let api_base_url =
            optional_env("TELEGRAM_API_URL").unwrap_or_else(|| DEFAULT_API_URL.to_string());

        Ok(Self {
            bot_token,
            chat_id,
            public_domain,
            port,
            api_base_url,
        })
    }

    /// Public webhook URL, if a public hostname is configured.
    ///
    /// A scheme or trailing slash on the hostname is tolerated.
    ///
    /// # Example
    ///
    /// ```
    /// # use daytrack_server::config::Config;
    /// let mut config = Config::for_chat("token", 42);
    /// assert_eq!(config.webhook_url(), None);
    ///
    /// config.public_domain = Some("bot.up.railway.app".into());
    /// assert_eq!(
    ///     config.webhook_url().as_deref(),
    ///     Some("https://bot.up.railway.app/webhook")
    /// );
    /// ```
    pub fn webhook_url(&self) -> Option<String> {
        let domain = self.public_domain.as_deref()?;
        let host = domain
            .trim_start_matches("https://")
            .trim_start_matches("http://")
            .trim_end_matches('/');
        if host.is_empty() {
            return None;
        }
        Some(format!("https://{host}{WEBHOOK_PATH}"))
    }

    /// Configuration with defaults for everything but the bot and chat.
    pub fn for_chat(bot_token: impl Into<String>, chat_id: i64) -> Self {
        Self {
            bot_token: bot_token.into(),
            chat_id,
            public_domain: None,
            port: DEFAULT_PORT,
            api_base_url: DEFAULT_API_URL.to_string(),
        }
    }
}

/// Read a required, non-empty environment variable.
fn required_env(name: &str) -> Result<String, ConfigError> {
    match env::var(name) {
        Ok(value) if !value.trim().is_empty() => Ok(value.trim().to_string()),
        Ok(_) | Err(env::VarError::NotPresent) => Err(ConfigError::MissingEnvVar(name.to_string())),
        Err(env::VarError::NotUnicode(_)) => Err(ConfigError::InvalidFormat {
            var: name.to_string(),
            message: "contains invalid unicode".to_string(),
        }),
    }
}

/// Read an optional environment variable, treating empty values as unset.
fn optional_env(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Parse a chat id, which must be a non-zero integer.
fn parse_chat_id(value: &str) -> Result<i64, ConfigError> {
    let invalid = |message: &str| ConfigError::InvalidFormat {
        var: "TELEGRAM_CHAT_ID".to_string(),
        message: message.to_string(),
    };
    match value.parse::<i64>() {
        Ok(0) => Err(invalid("chat id cannot be zero")),
        Ok(id) => Ok(id),
        Err(_) => Err(invalid(&format!("expected an integer, got '{value}'"))),
    }
}

/// Parse the PORT environment variable.
///
/// Returns the default port if not set.
fn parse_port() -> Result<u16, ConfigError> {
    match env::var("PORT") {
        Ok(port_str) => Ok(port_str.trim().parse()?),
        Err(env::VarError::NotPresent) => Ok(DEFAULT_PORT),
        Err(env::VarError::NotUnicode(_)) => Err(ConfigError::InvalidFormat {
            var: "PORT".to_string(),
            message: "contains invalid unicode".to_string(),
        }),
    }
}
