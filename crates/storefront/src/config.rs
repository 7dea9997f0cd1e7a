//! Storefront configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Required
//! - `RENTAL_BACKEND_URL` - Base URL of the hosted backend (e.g., https://xyz.backend.example)
//! - `RENTAL_BACKEND_API_KEY` - Backend service API key (high entropy)
//!
//! ## Optional
//! - `RENTAL_HOST` - Bind address (default: 127.0.0.1)
//! - `RENTAL_PORT` - Listen port (default: 3000)
//! - `RENTAL_BASE_URL` - Public URL of the storefront (default: http://localhost:3000)
//! - `RENTAL_CURRENCY` - ISO 4217 code carts are priced in (default: BRL)
//! - `RENTAL_BACKEND_TABLE` - Table checkout sessions are inserted into (default: checkout_sessions)
//! - `RENTAL_BACKEND_TIMEOUT_SECS` - Backend request timeout (default: 15)
//! - `RENTAL_SESSION_CAPACITY` - Maximum sessions kept in memory (default: 10000)
//! - `SENTRY_DSN` - Sentry error tracking DSN
//! - `SENTRY_ENVIRONMENT` - Sentry environment name

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use rental_core::CurrencyCode;
use secrecy::SecretString;
use thiserror::Error;
use url::Url;

const MIN_ENTROPY_BITS_PER_CHAR: f64 = 3.3;

const DEFAULT_TIMEOUT_SECS: u64 = 15;

const DEFAULT_SESSION_CAPACITY: u64 = 10_000;

/// Blocklist of common placeholder patterns (case-insensitive)
const PLACEHOLDER_PATTERNS: &[&str] = &[
    "your-",
    "changeme",
    "replace",
    "placeholder",
    "example",
    "xxx",
    "todo",
    "fixme",
    "insert",
    "enter-",
    "put-your",
    "add-your",
];

/// Configuration errors that can occur during loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
    #[error("Insecure secret in {0}: {1}")]
    InsecureSecret(String, String),
}

/// Storefront application configuration.
#[derive(Debug, Clone)]
pub struct StorefrontConfig {
    /// IP address to bind the server to
    pub host: IpAddr,
    /// Port to listen on
    pub port: u16,
    /// Public base URL for the storefront
    pub base_url: String,
    /// Currency new carts are priced in
    pub currency: CurrencyCode,
    /// Maximum number of sessions held by the in-memory store
    pub session_capacity: u64,
    /// Hosted backend configuration
    pub backend: BackendConfig,
    /// Sentry DSN for error tracking
    pub sentry_dsn: Option<String>,
    /// Sentry environment name
    pub sentry_environment: Option<String>,
}

/// Hosted backend (REST) configuration.
///
/// Implements `Debug` manually to redact the API key.
#[derive(Clone)]
pub struct BackendConfig {
    /// Base URL; the REST API lives under `/rest/v1/`
    pub url: Url,
    /// Service API key, sent as `apikey` and bearer token
    pub api_key: SecretString,
    /// Table checkout sessions are inserted into
    pub table: String,
    /// Per-request timeout
    pub timeout: Duration,
}

impl std::fmt::Debug for BackendConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendConfig")
            .field("url", &self.url.as_str())
            .field("api_key", &"[REDACTED]")
            .field("table", &self.table)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl StorefrontConfig {
    /// Load configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv()` to load from `.env` file if present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if required variables are missing, invalid, or
    /// if secrets fail validation (placeholder detection, entropy check).
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let host = get_env_or_default("RENTAL_HOST", "127.0.0.1")
            .parse::<IpAddr>()
            .map_err(|e| ConfigError::InvalidEnvVar("RENTAL_HOST".to_string(), e.to_string()))?;
        let port = get_env_or_default("RENTAL_PORT", "3000")
            .parse::<u16>()
            .map_err(|e| ConfigError::InvalidEnvVar("RENTAL_PORT".to_string(), e.to_string()))?;
        let base_url = get_env_or_default("RENTAL_BASE_URL", "http://localhost:3000");
        let currency = get_env_or_default("RENTAL_CURRENCY", "BRL")
            .parse::<CurrencyCode>()
            .map_err(|e| {
                ConfigError::InvalidEnvVar("RENTAL_CURRENCY".to_string(), e.to_string())
            })?;

        let session_capacity = get_env_or_default(
            "RENTAL_SESSION_CAPACITY",
            &DEFAULT_SESSION_CAPACITY.to_string(),
        )
        .parse::<u64>()
        .ok()
        .filter(|capacity| *capacity > 0)
        .ok_or_else(|| {
            ConfigError::InvalidEnvVar(
                "RENTAL_SESSION_CAPACITY".to_string(),
                "must be a positive integer".to_string(),
            )
        })?;

        let backend = BackendConfig::from_env()?;

        Ok(Self {
            host,
            port,
            base_url,
            currency,
            session_capacity,
            backend,
            sentry_dsn: get_optional_env("SENTRY_DSN"),
            sentry_environment: get_optional_env("SENTRY_ENVIRONMENT"),
        })
    }

    /// Returns the socket address for binding the server.
    #[must_use]
    pub const fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    /// Whether session cookies must be marked `Secure`.
    #[must_use]
    pub fn is_secure(&self) -> bool {
        self.base_url.starts_with("https://")
    }
}

impl BackendConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let url = parse_backend_url(&get_required_env("RENTAL_BACKEND_URL")?)?;
        let timeout_secs = get_env_or_default(
            "RENTAL_BACKEND_TIMEOUT_SECS",
            &DEFAULT_TIMEOUT_SECS.to_string(),
        )
        .parse::<u64>()
        .map_err(|e| {
            ConfigError::InvalidEnvVar("RENTAL_BACKEND_TIMEOUT_SECS".to_string(), e.to_string())
        })?;

        Ok(Self {
            url,
            api_key: get_api_key("RENTAL_BACKEND_API_KEY")?,
            table: get_env_or_default("RENTAL_BACKEND_TABLE", "checkout_sessions"),
            timeout: Duration::from_secs(timeout_secs),
        })
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Get a required environment variable.
fn get_required_env(key: &str) -> Result<String, ConfigError> {
    std::env::var(key).map_err(|_| ConfigError::MissingEnvVar(key.to_string()))
}

/// Get an optional environment variable.
fn get_optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Get an environment variable with a default value.
fn get_env_or_default(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Parse the backend base URL, requiring http(s).
fn parse_backend_url(raw: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(raw.trim()).map_err(|e| {
        ConfigError::InvalidEnvVar("RENTAL_BACKEND_URL".to_string(), e.to_string())
    })?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return Err(ConfigError::InvalidEnvVar(
            "RENTAL_BACKEND_URL".to_string(),
            "must be an http(s) URL with a host".to_string(),
        ));
    }
    Ok(url)
}

/// Shannon entropy of `key`, in bits per character.
fn bits_per_char(key: &str) -> f64 {
    let mut counts: HashMap<char, u32> = HashMap::new();
    for c in key.chars() {
        *counts.entry(c).or_default() += 1;
    }
    let total: u32 = counts.values().sum();
    if total == 0 {
        return 0.0;
    }

    let total = f64::from(total);
    counts
        .into_values()
        .map(|n| {
            let share = f64::from(n) / total;
            -share * share.log2()
        })
        .sum()
}

/// Reject keys that look copied from a sample `.env` or are too repetitive
/// to have been issued by the backend.
fn check_api_key(key: &str, var_name: &str) -> Result<(), ConfigError> {
    let insecure = |reason: String| ConfigError::InsecureSecret(var_name.to_string(), reason);

    let lower = key.to_lowercase();
    if let Some(pattern) = PLACEHOLDER_PATTERNS.iter().find(|p| lower.contains(*p)) {
        return Err(insecure(format!("looks like a placeholder ('{pattern}')")));
    }

    let bits = bits_per_char(key);
    if bits < MIN_ENTROPY_BITS_PER_CHAR {
        return Err(insecure(format!(
            "only {bits:.2} bits of entropy per character, at least {MIN_ENTROPY_BITS_PER_CHAR:.1} required"
        )));
    }
    Ok(())
}

/// Read a required API key and check it before wrapping it.
fn get_api_key(key: &str) -> Result<SecretString, ConfigError> {
    let value = get_required_env(key)?;
    check_api_key(&value, key)?;
    Ok(SecretString::from(value))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn test_config() -> StorefrontConfig {
        StorefrontConfig {
            host: "127.0.0.1".parse().unwrap(),
            port: 3000,
            base_url: "http://localhost:3000".to_string(),
            currency: CurrencyCode::BRL,
            session_capacity: 1_000,
            backend: BackendConfig {
                url: Url::parse("https://rental.backend.test").unwrap(),
                api_key: SecretString::from("super_secret_backend_key"),
                table: "checkout_sessions".to_string(),
                timeout: Duration::from_secs(15),
            },
            sentry_dsn: None,
            sentry_environment: None,
        }
    }

    #[test]
    fn test_bits_per_char() {
        assert!(bits_per_char("").abs() < f64::EPSILON);
        assert!(bits_per_char("kkkk").abs() < f64::EPSILON);
        assert!((bits_per_char("abab") - 1.0).abs() < 0.01);
    }

    #[test]
    fn test_check_api_key() {
        for key in ["your-backend-key", "CHANGEME-0a9f3c1b7d", "sk_example_91x7"] {
            assert!(
                matches!(
                    check_api_key(key, "RENTAL_BACKEND_API_KEY"),
                    Err(ConfigError::InsecureSecret(_, _))
                ),
                "{key} should be rejected"
            );
        }
        assert!(matches!(
            check_api_key("zzzzzzzzzzzzyyyyyyyyyyyy", "RENTAL_BACKEND_API_KEY"),
            Err(ConfigError::InsecureSecret(_, _))
        ));
        assert!(check_api_key("sb_k7Qd2Lw9Rf3Hn6Xp1Tz8Vm4C", "RENTAL_BACKEND_API_KEY").is_ok());
    }

    #[test]
    fn test_parse_backend_url() {
        assert!(parse_backend_url("https://abc.backend.test").is_ok());
        assert!(parse_backend_url(" http://127.0.0.1:54321 ").is_ok());
        assert!(matches!(
            parse_backend_url("ftp://abc.backend.test"),
            Err(ConfigError::InvalidEnvVar(_, _))
        ));
        assert!(matches!(
            parse_backend_url("not a url"),
            Err(ConfigError::InvalidEnvVar(_, _))
        ));
    }

    #[test]
    fn test_socket_addr() {
        let addr = test_config().socket_addr();
        assert_eq!(addr.ip().to_string(), "127.0.0.1");
        assert_eq!(addr.port(), 3000);
    }

    #[test]
    fn test_is_secure() {
        let mut config = test_config();
        assert!(!config.is_secure());
        config.base_url = "https://rent.example.com".to_string();
        assert!(config.is_secure());
    }

    #[test]
    fn test_backend_config_debug_redacts_key() {
        let debug_output = format!("{:?}", test_config().backend);

        assert!(debug_output.contains("rental.backend.test"));
        assert!(debug_output.contains("[REDACTED]"));
        assert!(!debug_output.contains("super_secret_backend_key"));
    }
}
