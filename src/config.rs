use std::env;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Errors raised while reading configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value:?} ({reason})")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// How the agent authenticates against the backend
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Credential {
    /// No token configured
    None,
    /// Long-lived agent key, sent as `X-API-Key`
    ApiKey(String),
    /// Anything else, sent as `Authorization: Bearer`
    Bearer(String),
}

impl Credential {
    pub const API_KEY_PREFIX: &'static str = "pk_live_";

    pub fn from_token(token: &str) -> Self {
        let token = token.trim();
        if token.is_empty() {
            Credential::None
        } else if token.starts_with(Self::API_KEY_PREFIX) {
            Credential::ApiKey(token.to_string())
        } else {
            Credential::Bearer(token.to_string())
        }
    }
}

/// Agent configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Base address of the job queue API, without trailing slash
    pub backend_url: String,

    pub credential: Credential,

    /// Identity attached to every status update
    /// Default: agent-{hostname}
    pub agent_id: String,

    /// Fixed poll period
    /// Default: 3000ms
    pub poll_interval: Duration,

    /// Retries for status update calls
    /// Default: 3
    pub max_retries: u32,

    /// Page size for pending jobs
    /// Default: 10
    pub batch_limit: usize,

    pub http_timeout: Duration,
    pub printer_connect_timeout: Duration,
    pub printer_write_timeout: Duration,
    pub spool_timeout: Duration,

    /// Program used to hand PDFs to the OS spooler
    pub print_command: String,

    /// Scratch directory for downloaded PDFs
    pub temp_dir: PathBuf,

    /// How long shutdown waits for the in-flight job
    pub shutdown_grace: Duration,

    /// Health server bind address, `None` disables it
    pub health_addr: Option<String>,

    pub log_dir: String,
}

impl Config {
    /// Load configuration from environment variables
    ///
    /// All variables are optional:
    /// - BACKEND_URL (default: http://localhost:3000)
    /// - API_TOKEN (default: empty)
    /// - AGENT_ID (default: agent-{hostname})
    /// - POLL_INTERVAL in ms (default: 3000)
    /// - MAX_RETRIES (default: 3)
    /// - BATCH_LIMIT (default: 10)
    /// - HTTP_TIMEOUT_MS, PRINTER_CONNECT_TIMEOUT_MS, PRINTER_WRITE_TIMEOUT_MS, SPOOL_TIMEOUT_MS
    /// - PRINT_COMMAND (default: lp, or SumatraPDF.exe on Windows)
    /// - TEMP_DIR (default: ./temp)
    /// - SHUTDOWN_GRACE_MS (default: 30000)
    /// - HEALTH_ADDR (default: 127.0.0.1:9180, empty disables)
    /// - LOG_DIR (default: logs)
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if it exists
        dotenv::dotenv().ok();

        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string());

        let backend_url = var("BACKEND_URL")
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "http://localhost:3000".to_string());
        if let Err(e) = reqwest::Url::parse(&backend_url) {
            return Err(ConfigError::Invalid {
                key: "BACKEND_URL",
                value: backend_url,
                reason: e.to_string(),
            });
        }
        let backend_url = backend_url.trim_end_matches('/').to_string();

        let credential = Credential::from_token(&var("API_TOKEN").unwrap_or_default());

        let agent_id = var("AGENT_ID")
            .filter(|s| !s.is_empty())
            .unwrap_or_else(default_agent_id);

        let poll_interval = millis(&var, "POLL_INTERVAL", 3000)?;
        if poll_interval.is_zero() {
            return Err(ConfigError::Invalid {
                key: "POLL_INTERVAL",
                value: "0".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }

        let max_retries = number(&var, "MAX_RETRIES", 3u32)?;

        let batch_limit = number(&var, "BATCH_LIMIT", 10usize)?;
        if batch_limit == 0 {
            return Err(ConfigError::Invalid {
                key: "BATCH_LIMIT",
                value: "0".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }

        let print_command = var("PRINT_COMMAND")
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| default_print_command().to_string());

        let temp_dir = var("TEMP_DIR")
            .filter(|s| !s.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("temp"));

        let health_addr = match var("HEALTH_ADDR") {
            Some(addr) if addr.is_empty() => None,
            Some(addr) => Some(addr),
            None => Some("127.0.0.1:9180".to_string()),
        };

        let log_dir = var("LOG_DIR")
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "logs".to_string());

        Ok(Config {
            backend_url,
            credential,
            agent_id,
            poll_interval,
            max_retries,
            batch_limit,
            http_timeout: millis(&var, "HTTP_TIMEOUT_MS", 10_000)?,
            printer_connect_timeout: millis(&var, "PRINTER_CONNECT_TIMEOUT_MS", 5_000)?,
            printer_write_timeout: millis(&var, "PRINTER_WRITE_TIMEOUT_MS", 10_000)?,
            spool_timeout: millis(&var, "SPOOL_TIMEOUT_MS", 30_000)?,
            print_command,
            temp_dir,
            shutdown_grace: millis(&var, "SHUTDOWN_GRACE_MS", 30_000)?,
            health_addr,
            log_dir,
        })
    }
}

fn number<T, F>(var: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match var(key).filter(|s| !s.is_empty()) {
        None => Ok(default),
        Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::Invalid {
            key,
            value: raw.clone(),
            reason: e.to_string(),
        }),
    }
}

fn millis<F>(var: &F, key: &'static str, default: u64) -> Result<Duration, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    number(var, key, default).map(Duration::from_millis)
}

fn default_agent_id() -> String {
    let host = hostname::get()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "unknown".to_string());
    format!("agent-{}", host)
}

#[cfg(windows)]
fn default_print_command() -> &'static str {
    "SumatraPDF.exe"
}

#[cfg(not(windows))]
fn default_print_command() -> &'static str {
    "lp"
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_environment_is_empty() {
        let config = load(&[]).unwrap();
        assert_eq!(config.backend_url, "http://localhost:3000");
        assert_eq!(config.credential, Credential::None);
        assert!(config.agent_id.starts_with("agent-"));
        assert_eq!(config.poll_interval, Duration::from_millis(3000));
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.batch_limit, 10);
        assert_eq!(config.temp_dir, PathBuf::from("temp"));
        assert_eq!(config.health_addr.as_deref(), Some("127.0.0.1:9180"));
    }

    #[test]
    fn explicit_values_override_defaults() {
        let config = load(&[
            ("BACKEND_URL", "https://pos.example.com/"),
            ("AGENT_ID", "grill-pi"),
            ("POLL_INTERVAL", "500"),
            ("MAX_RETRIES", "5"),
            ("HEALTH_ADDR", ""),
        ])
        .unwrap();
        assert_eq!(config.backend_url, "https://pos.example.com");
        assert_eq!(config.agent_id, "grill-pi");
        assert_eq!(config.poll_interval, Duration::from_millis(500));
        assert_eq!(config.max_retries, 5);
        assert!(config.health_addr.is_none());
    }

    #[test]
    fn token_prefix_selects_header_kind() {
        assert_eq!(
            Credential::from_token("pk_live_abc"),
            Credential::ApiKey("pk_live_abc".to_string())
        );
        assert_eq!(
            Credential::from_token("eyJhbGciOi"),
            Credential::Bearer("eyJhbGciOi".to_string())
        );
        assert_eq!(Credential::from_token("  "), Credential::None);
    }

    #[test]
    fn unparseable_numbers_are_rejected() {
        let err = load(&[("POLL_INTERVAL", "fast")]).unwrap_err();
        assert!(err.to_string().contains("POLL_INTERVAL"));

        assert!(load(&[("POLL_INTERVAL", "0")]).is_err());
        assert!(load(&[("BATCH_LIMIT", "0")]).is_err());
    }

    #[test]
    fn malformed_backend_url_is_rejected() {
        let err = load(&[("BACKEND_URL", "not a url")]).unwrap_err();
        assert!(err.to_string().contains("BACKEND_URL"));
    }
}
