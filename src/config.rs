//! Configuration types.
//!
//! Built once at process start from environment variables and passed by value
//! into the components that need it.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;

/// Default poll interval in seconds.
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 30;

/// Default IMAP connect/read/write timeout in seconds.
pub const DEFAULT_IMAP_TIMEOUT_SECS: u64 = 30;

/// Body text is truncated to this many characters before it is stored.
pub const MAX_BODY_CHARS: usize = 10_000;

/// Mailbox connection settings.
#[derive(Debug, Clone)]
pub struct MailboxConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: SecretString,
    pub folder: String,
    /// Applied to connect, read and write on the IMAP socket.
    pub timeout: Duration,
}

/// Process-wide configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// `None` when no IMAP credentials are configured (polling disabled).
    pub mailbox: Option<MailboxConfig>,
    pub poll_interval: Duration,
    pub database_path: PathBuf,
    pub log_dir: Option<PathBuf>,
    pub max_body_chars: usize,
}

impl AppConfig {
    /// Build config from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from an arbitrary key lookup (the environment in production,
    /// a map in tests).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let timeout_secs: u64 = parse_or(&get, "IMAP_TIMEOUT_SECS", DEFAULT_IMAP_TIMEOUT_SECS)?;
        let poll_secs: u64 = parse_or(&get, "IMAP_POLL_INTERVAL", DEFAULT_POLL_INTERVAL_SECS)?;
        if poll_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "IMAP_POLL_INTERVAL".into(),
                message: "must be greater than zero".into(),
            });
        }

        let mailbox = match (get("IMAP_EMAIL"), get("IMAP_PASSWORD")) {
            (Some(username), Some(password)) => Some(MailboxConfig {
                host: get("IMAP_SERVER").unwrap_or_else(|| "imap.gmail.com".to_string()),
                port: parse_or(&get, "IMAP_PORT", 993)?,
                username,
                password: SecretString::from(password),
                folder: get("IMAP_FOLDER").unwrap_or_else(|| "INBOX".to_string()),
                timeout: Duration::from_secs(timeout_secs),
            }),
            (Some(_), None) => return Err(ConfigError::MissingEnvVar("IMAP_PASSWORD".into())),
            _ => None,
        };

        Ok(Self {
            mailbox,
            poll_interval: Duration::from_secs(poll_secs),
            database_path: get("MAIL_TRIAGE_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./data/mail-triage.db")),
            log_dir: get("LOG_DIR").map(PathBuf::from),
            max_body_chars: MAX_BODY_CHARS,
        })
    }
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("{raw:?}: {e}"),
        }),
        None => Ok(default),
    }
}
