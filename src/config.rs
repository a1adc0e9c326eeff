//! Configuration management
//!
//! Loads configuration from:
//! 1. Default values
//! 2. Configuration file (config/default.toml, config/local.toml)
//! 3. Environment variables (override)

use serde::Deserialize;

use crate::error::FederationError;

/// Main federation configuration
#[derive(Debug, Clone, Deserialize)]
pub struct FederationConfig {
    pub instance: InstanceConfig,
    pub webfinger: WebFingerConfig,
    pub http: HttpConfig,
    pub key_cache: KeyCacheConfig,
    pub logging: LoggingConfig,
}

/// Local instance identity
#[derive(Debug, Clone, Deserialize)]
pub struct InstanceConfig {
    /// Public domain (e.g., "lamia.social")
    pub domain: String,
    /// Protocol ("http" or "https")
    pub protocol: String,
}

impl InstanceConfig {
    /// Get the base URL for the instance
    ///
    /// # Returns
    /// Full URL like "https://lamia.social"
    pub fn base_url(&self) -> String {
        format!("{}://{}", self.protocol, self.domain)
    }

    /// URI of a local actor, e.g. "https://lamia.social/users/alice"
    pub fn actor_uri(&self, username: &str) -> String {
        format!("{}/users/{}", self.base_url(), username)
    }
}

/// Identifier normalization settings
#[derive(Debug, Clone, Deserialize)]
pub struct WebFingerConfig {
    /// Keep explicit ports in the WebFinger resource
    pub preserve_port: bool,
}

/// Outbound HTTP settings
#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    pub user_agent: String,
    /// Per-request timeout
    pub timeout_seconds: u64,
}

/// Remote public key cache settings
#[derive(Debug, Clone, Deserialize)]
pub struct KeyCacheConfig {
    pub ttl_seconds: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Log format ("pretty" or "json")
    pub format: String,
}

impl FederationConfig {
    /// Load configuration from file and environment
    ///
    /// # Loading Order
    /// 1. Default values
    /// 2. config/default.toml (if exists)
    /// 3. config/local.toml (if exists)
    /// 4. Environment variables (FEDIWIRE__*)
    ///
    /// # Errors
    /// Returns error if configuration is invalid
    pub fn load() -> Result<Self, FederationError> {
        use config::{Config, Environment, File};

        let config = Config::builder()
            // Start with default values
            .set_default("instance.protocol", "https")?
            .set_default("webfinger.preserve_port", false)?
            .set_default(
                "http.user_agent",
                concat!("fediwire/", env!("CARGO_PKG_VERSION")),
            )?
            .set_default("http.timeout_seconds", 30)?
            .set_default("key_cache.ttl_seconds", 3600)?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "pretty")?
            // Load from config/default.toml if it exists
            .add_source(File::with_name("config/default").required(false))
            // Load from config/local.toml if it exists (overrides default)
            .add_source(File::with_name("config/local").required(false))
            // Load from environment variables (FEDIWIRE__*)
            .add_source(
                Environment::with_prefix("FEDIWIRE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let federation_config: Self = config.try_deserialize()?;
        federation_config.validate()?;
        Ok(federation_config)
    }

    /// Reject settings the federation core cannot run with
    pub fn validate(&self) -> Result<(), FederationError> {
        if self.instance.domain.trim().is_empty() {
            return Err(FederationError::Config(
                "instance.domain must not be empty".to_string(),
            ));
        }

        if !matches!(self.instance.protocol.as_str(), "http" | "https") {
            return Err(FederationError::Config(format!(
                "instance.protocol must be http or https, got {}",
                self.instance.protocol
            )));
        }

        if self.http.timeout_seconds == 0 {
            return Err(FederationError::Config(
                "http.timeout_seconds must be greater than 0".to_string(),
            ));
        }

        if self.key_cache.ttl_seconds == 0 {
            return Err(FederationError::Config(
                "key_cache.ttl_seconds must be greater than 0".to_string(),
            ));
        }

        if self.instance.protocol == "http" {
            tracing::warn!(
                domain = %self.instance.domain,
                "Federating over plain http; remote servers will usually refuse"
            );
        }

        Ok(())
    }

    pub fn base_url(&self) -> String {
        self.instance.base_url()
    }
}
