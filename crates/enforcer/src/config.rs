//! Enforcer configuration.
//!
//! Service settings (ports, worker pool, cache, key manager, event hub) come
//! from environment variables. Issuers, the trust store location and the API
//! table come from a TOML document whose path is itself an environment
//! variable. Sensitive fields are redacted in Debug output.

use common::jwt::{DEFAULT_CLOCK_SKEW, MAX_CLOCK_SKEW};
use common::secret::SecretString;
use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Default TOML document path.
pub const DEFAULT_CONFIG_PATH: &str = "conf/enforcer.toml";

/// Default gRPC listener port.
pub const DEFAULT_AUTH_SERVICE_PORT: u16 = 8081;

/// Default maximum inbound gRPC message size in bytes.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 1_000_000_000;

/// Default maximum inbound header list size in bytes.
pub const DEFAULT_MAX_HEADER_LIMIT: u32 = 8192;

/// Default HTTP/2 keep-alive interval in seconds.
pub const DEFAULT_KEEP_ALIVE_TIME_SECONDS: u64 = 600;

/// Default number of always-on workers.
pub const DEFAULT_THREAD_POOL_CORE_SIZE: usize = 400;

/// Default worker ceiling.
pub const DEFAULT_THREAD_POOL_MAX_SIZE: usize = 500;

/// Default idle time before a non-core worker exits, in seconds.
pub const DEFAULT_THREAD_POOL_KEEP_ALIVE_SECONDS: u64 = 600;

/// Default bounded queue depth.
pub const DEFAULT_THREAD_POOL_QUEUE_SIZE: usize = 1000;

/// Default health endpoint bind address.
pub const DEFAULT_HEALTH_BIND_ADDRESS: &str = "0.0.0.0:9091";

/// Default per-tier cache entry bound.
pub const DEFAULT_CACHE_MAXIMUM_SIZE: u64 = 10_000;

/// Default per-tier cache TTL in seconds.
pub const DEFAULT_CACHE_EXPIRY_SECONDS: u64 = 900;

/// Default background sweep period in seconds.
pub const DEFAULT_CACHE_SWEEP_INTERVAL_SECONDS: u64 = 60;

/// Default tenant domain.
pub const DEFAULT_TENANT_DOMAIN: &str = "carbon.super";

/// Default key manager base URL.
pub const DEFAULT_KEY_MANAGER_URL: &str = "https://localhost:9443";

/// Default key manager user.
pub const DEFAULT_KEY_MANAGER_USERNAME: &str = "admin";

/// Default key manager call timeout in milliseconds.
pub const DEFAULT_KEY_MANAGER_TIMEOUT_MS: u64 = 5000;

/// Default revocation feed URL.
pub const DEFAULT_EVENT_HUB_URL: &str = "https://localhost:9443/internal/data/v1";

/// Default revocation feed polling period in seconds.
pub const DEFAULT_EVENT_HUB_POLL_INTERVAL_SECONDS: u64 = 30;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {name}: {reason}")]
    InvalidValue { name: String, reason: String },

    #[error("Invalid thread pool configuration: {0}")]
    InvalidThreadPool(String),

    #[error("Invalid JWT clock skew configuration: {0}")]
    InvalidJwtClockSkew(String),

    #[error("Failed to read config document {path}: {reason}")]
    DocumentRead { path: String, reason: String },

    #[error("Failed to parse config document: {0}")]
    DocumentParse(String),
}

/// Worker pool sizing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadPoolConfig {
    pub core_size: usize,
    pub max_size: usize,
    pub keep_alive_time: Duration,
    pub queue_size: usize,
}

impl Default for ThreadPoolConfig {
    fn default() -> Self {
        Self {
            core_size: DEFAULT_THREAD_POOL_CORE_SIZE,
            max_size: DEFAULT_THREAD_POOL_MAX_SIZE,
            keep_alive_time: Duration::from_secs(DEFAULT_THREAD_POOL_KEEP_ALIVE_SECONDS),
            queue_size: DEFAULT_THREAD_POOL_QUEUE_SIZE,
        }
    }
}

/// gRPC listener settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthServiceConfig {
    pub port: u16,
    pub max_message_size: usize,
    pub max_header_limit: u32,
    pub keep_alive_time: Duration,
    pub thread_pool: ThreadPoolConfig,
}

/// Token cache settings, applied to every tier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    pub enabled: bool,
    pub maximum_size: u64,
    pub expiry_time: Duration,
    pub sweep_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            maximum_size: DEFAULT_CACHE_MAXIMUM_SIZE,
            expiry_time: Duration::from_secs(DEFAULT_CACHE_EXPIRY_SECONDS),
            sweep_interval: Duration::from_secs(DEFAULT_CACHE_SWEEP_INTERVAL_SECONDS),
        }
    }
}

/// Remote key manager connection.
#[derive(Clone)]
pub struct KeyManagerConfig {
    pub url: String,
    pub username: String,
    /// Basic auth is only sent when a password is configured.
    pub password: Option<SecretString>,
    pub timeout: Duration,
}

impl fmt::Debug for KeyManagerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyManagerConfig")
            .field("url", &self.url)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Revocation feed connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventHubConfig {
    pub enabled: bool,
    pub url: String,
    pub poll_interval: Duration,
}

/// Enforcer service configuration.
///
/// Loaded from environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the TOML document with issuers, trust store and APIs.
    pub config_path: PathBuf,

    /// gRPC listener and worker pool.
    pub auth_service: AuthServiceConfig,

    /// Health and metrics server bind address (default: "0.0.0.0:9091").
    pub health_bind_address: String,

    /// Token cache tiers.
    pub cache: CacheConfig,

    /// Clock skew for `exp`/`nbf` checks and lazy expiry (default: 5s).
    pub jwt_clock_skew: Duration,

    /// Tenant used to select the key manager client.
    pub tenant_domain: String,

    /// Remote key manager.
    pub key_manager: KeyManagerConfig,

    /// Revocation feed.
    pub event_hub: EventHubConfig,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a HashMap (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let config_path = PathBuf::from(
            vars.get("ENFORCER_CONFIG_PATH")
                .map_or(DEFAULT_CONFIG_PATH, String::as_str),
        );

        let thread_pool = ThreadPoolConfig {
            core_size: parse_var(vars, "THREAD_POOL_CORE_SIZE", DEFAULT_THREAD_POOL_CORE_SIZE)?,
            max_size: parse_var(vars, "THREAD_POOL_MAX_SIZE", DEFAULT_THREAD_POOL_MAX_SIZE)?,
            keep_alive_time: Duration::from_secs(parse_var(
                vars,
                "THREAD_POOL_KEEP_ALIVE_TIME",
                DEFAULT_THREAD_POOL_KEEP_ALIVE_SECONDS,
            )?),
            queue_size: parse_var(vars, "THREAD_POOL_QUEUE_SIZE", DEFAULT_THREAD_POOL_QUEUE_SIZE)?,
        };
        validate_thread_pool(&thread_pool)?;

        let auth_service = AuthServiceConfig {
            port: parse_var(vars, "AUTH_SERVICE_PORT", DEFAULT_AUTH_SERVICE_PORT)?,
            max_message_size: parse_var(
                vars,
                "AUTH_SERVICE_MAX_MESSAGE_SIZE",
                DEFAULT_MAX_MESSAGE_SIZE,
            )?,
            max_header_limit: parse_var(
                vars,
                "AUTH_SERVICE_MAX_HEADER_LIMIT",
                DEFAULT_MAX_HEADER_LIMIT,
            )?,
            keep_alive_time: Duration::from_secs(parse_var(
                vars,
                "AUTH_SERVICE_KEEP_ALIVE_TIME",
                DEFAULT_KEEP_ALIVE_TIME_SECONDS,
            )?),
            thread_pool,
        };

        let health_bind_address = vars
            .get("HEALTH_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_HEALTH_BIND_ADDRESS.to_string());

        let cache = CacheConfig {
            enabled: parse_var(vars, "CACHE_ENABLED", true)?,
            maximum_size: parse_var(vars, "CACHE_MAXIMUM_SIZE", DEFAULT_CACHE_MAXIMUM_SIZE)?,
            expiry_time: Duration::from_secs(parse_var(
                vars,
                "CACHE_EXPIRY_SECONDS",
                DEFAULT_CACHE_EXPIRY_SECONDS,
            )?),
            sweep_interval: Duration::from_secs(parse_var(
                vars,
                "CACHE_SWEEP_INTERVAL_SECONDS",
                DEFAULT_CACHE_SWEEP_INTERVAL_SECONDS,
            )?),
        };
        if cache.maximum_size == 0 {
            return Err(ConfigError::InvalidValue {
                name: "CACHE_MAXIMUM_SIZE".to_string(),
                reason: "must be greater than 0".to_string(),
            });
        }
        if cache.sweep_interval.is_zero() {
            return Err(ConfigError::InvalidValue {
                name: "CACHE_SWEEP_INTERVAL_SECONDS".to_string(),
                reason: "must be greater than 0".to_string(),
            });
        }

        // Parse JWT clock skew tolerance with validation
        let skew_seconds: u64 =
            parse_var(vars, "JWT_CLOCK_SKEW_SECONDS", DEFAULT_CLOCK_SKEW.as_secs())?;
        if skew_seconds > MAX_CLOCK_SKEW.as_secs() {
            return Err(ConfigError::InvalidJwtClockSkew(format!(
                "JWT_CLOCK_SKEW_SECONDS must not exceed {} seconds, got {skew_seconds}",
                MAX_CLOCK_SKEW.as_secs()
            )));
        }

        let tenant_domain = vars
            .get("TENANT_DOMAIN")
            .cloned()
            .unwrap_or_else(|| DEFAULT_TENANT_DOMAIN.to_string());

        let key_manager = KeyManagerConfig {
            url: vars
                .get("KEY_MANAGER_URL")
                .cloned()
                .unwrap_or_else(|| DEFAULT_KEY_MANAGER_URL.to_string()),
            username: vars
                .get("KEY_MANAGER_USERNAME")
                .cloned()
                .unwrap_or_else(|| DEFAULT_KEY_MANAGER_USERNAME.to_string()),
            password: vars
                .get("KEY_MANAGER_PASSWORD")
                .map(|p| SecretString::from(p.clone())),
            timeout: Duration::from_millis(parse_var(
                vars,
                "KEY_MANAGER_TIMEOUT_MS",
                DEFAULT_KEY_MANAGER_TIMEOUT_MS,
            )?),
        };
        if key_manager.timeout.is_zero() {
            return Err(ConfigError::InvalidValue {
                name: "KEY_MANAGER_TIMEOUT_MS".to_string(),
                reason: "must be greater than 0".to_string(),
            });
        }

        let event_hub = EventHubConfig {
            enabled: parse_var(vars, "EVENT_HUB_ENABLED", false)?,
            url: vars
                .get("EVENT_HUB_URL")
                .cloned()
                .unwrap_or_else(|| DEFAULT_EVENT_HUB_URL.to_string()),
            poll_interval: Duration::from_secs(parse_var(
                vars,
                "EVENT_HUB_POLL_INTERVAL_SECONDS",
                DEFAULT_EVENT_HUB_POLL_INTERVAL_SECONDS,
            )?),
        };
        if event_hub.poll_interval.is_zero() {
            return Err(ConfigError::InvalidValue {
                name: "EVENT_HUB_POLL_INTERVAL_SECONDS".to_string(),
                reason: "must be greater than 0".to_string(),
            });
        }

        Ok(Config {
            config_path,
            auth_service,
            health_bind_address,
            cache,
            jwt_clock_skew: Duration::from_secs(skew_seconds),
            tenant_domain,
            key_manager,
            event_hub,
        })
    }
}

/// Validate worker pool sizing.
///
/// # Errors
///
/// `InvalidThreadPool` when core size or queue size is zero, or max size is
/// below core size.
pub fn validate_thread_pool(pool: &ThreadPoolConfig) -> Result<(), ConfigError> {
    if pool.core_size == 0 {
        return Err(ConfigError::InvalidThreadPool(
            "THREAD_POOL_CORE_SIZE must be greater than 0".to_string(),
        ));
    }
    if pool.max_size < pool.core_size {
        return Err(ConfigError::InvalidThreadPool(format!(
            "THREAD_POOL_MAX_SIZE ({}) must be >= THREAD_POOL_CORE_SIZE ({})",
            pool.max_size, pool.core_size
        )));
    }
    if pool.queue_size == 0 {
        return Err(ConfigError::InvalidThreadPool(
            "THREAD_POOL_QUEUE_SIZE must be greater than 0".to_string(),
        ));
    }
    Ok(())
}

fn parse_var<T>(vars: &HashMap<String, String>, name: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match vars.get(name) {
        Some(value_str) => value_str
            .trim()
            .parse()
            .map_err(|e: T::Err| ConfigError::InvalidValue {
                name: name.to_string(),
                reason: format!("got '{value_str}': {e}"),
            }),
        None => Ok(default),
    }
}

// =============================================================================
// TOML document
// =============================================================================

/// Issuers, trust store and API table loaded from the TOML document.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EnforcerDocument {
    #[serde(default)]
    pub truststore: TrustStoreDocument,

    #[serde(default)]
    pub issuers: Vec<IssuerDocument>,

    #[serde(default)]
    pub apis: Vec<ApiDocument>,
}

/// Trust store location.
#[derive(Debug, Clone, Deserialize)]
pub struct TrustStoreDocument {
    /// Directory holding `<alias>.pem` files.
    #[serde(default = "default_truststore_location")]
    pub location: PathBuf,
}

impl Default for TrustStoreDocument {
    fn default() -> Self {
        Self {
            location: default_truststore_location(),
        }
    }
}

fn default_truststore_location() -> PathBuf {
    PathBuf::from("security/truststore")
}

/// One trusted token issuer.
#[derive(Debug, Clone, Deserialize)]
pub struct IssuerDocument {
    /// Value of the `iss` claim.
    pub issuer: String,

    /// Display name, reported as the key manager identity.
    pub name: String,

    #[serde(default = "default_consumer_key_claim")]
    pub consumer_key_claim: String,

    /// Trust store alias of the signing certificate.
    #[serde(default)]
    pub certificate_alias: Option<String>,

    /// Signing algorithm of the certificate (e.g. "RS256", "EdDSA").
    #[serde(default = "default_algorithm")]
    pub algorithm: String,

    #[serde(default = "default_true")]
    pub validate_subscriptions: bool,

    /// JWKS endpoint; empty disables JWKS for this issuer.
    #[serde(default)]
    pub jwks_url: String,
}

fn default_consumer_key_claim() -> String {
    "azp".to_string()
}

fn default_algorithm() -> String {
    "RS256".to_string()
}

fn default_true() -> bool {
    true
}

/// One API exposed through the gateway.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiDocument {
    pub name: String,
    pub version: String,
    pub base_path: String,
    #[serde(default)]
    pub resources: Vec<ResourceDocument>,
}

/// One resource of an API.
#[derive(Debug, Clone, Deserialize)]
pub struct ResourceDocument {
    /// Path template relative to the base path, e.g. `/pets/{petId}`.
    pub path: String,
    pub method: String,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default = "default_true")]
    pub secured: bool,
}

impl EnforcerDocument {
    /// Parse a TOML document.
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        toml::from_str(raw).map_err(|e| ConfigError::DocumentParse(e.to_string()))
    }

    /// Read and parse the TOML document at `path`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::DocumentRead {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_toml_str(&raw)
    }
}
