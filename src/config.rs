//! Configuration types for the removal service and the image pipeline

use crate::error::{Result, StudioError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Default endpoint of the remove.bg compatible removal service
pub const DEFAULT_ENDPOINT: &str = "https://api.remove.bg/v1.0/removebg";

/// Environment variable holding the service credential
pub const API_KEY_ENV: &str = "REMOVE_BG_API_KEY";

/// Environment variable overriding the service endpoint
pub const ENDPOINT_ENV: &str = "REMOVE_BG_ENDPOINT";

/// Environment variable overriding the request timeout in seconds
pub const TIMEOUT_ENV: &str = "REMOVE_BG_TIMEOUT_SECS";

/// Upper bound for parallel removal calls
pub const MAX_CONCURRENT_REQUESTS: usize = 32;

/// Service credential; redacted in `Debug` output and never serialized
#[derive(Clone, PartialEq, Eq, Default)]
pub struct ApiKey(String);

impl ApiKey {
    #[must_use]
    pub fn new<S: Into<String>>(key: S) -> Self {
        Self(key.into().trim().to_string())
    }

    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            f.write_str("ApiKey(<unset>)")
        } else {
            f.write_str("ApiKey(<redacted>)")
        }
    }
}

/// Connection settings for the remote removal service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Endpoint receiving the multipart POST
    pub endpoint: String,

    /// Credential sent in the `X-Api-Key` header
    #[serde(skip)]
    pub api_key: ApiKey,

    /// Multipart field carrying the image bytes
    pub form_field: String,

    /// Optional output size hint (`auto`, `preview`, `full`, ...)
    pub size: Option<String>,

    /// Per-request timeout in seconds
    pub timeout_secs: u64,

    /// User agent sent with every request
    pub user_agent: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            api_key: ApiKey::default(),
            form_field: "image_file".to_string(),
            size: None,
            timeout_secs: 60,
            user_agent: format!("bgremove-studio/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl ServiceConfig {
    /// Read the service settings from the environment
    ///
    /// `REMOVE_BG_API_KEY` is required; `REMOVE_BG_ENDPOINT` and
    /// `REMOVE_BG_TIMEOUT_SECS` are optional overrides.
    ///
    /// # Errors
    /// - `InvalidConfig` if the key is missing or an override does not parse
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an injectable variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        config.api_key = lookup(API_KEY_ENV)
            .map(ApiKey::new)
            .filter(|key| !key.is_empty())
            .ok_or_else(|| {
                StudioError::invalid_config(format!(
                    "No API key configured. Set the {API_KEY_ENV} environment variable."
                ))
            })?;

        if let Some(endpoint) = lookup(ENDPOINT_ENV).filter(|v| !v.trim().is_empty()) {
            config.endpoint = endpoint.trim().to_string();
        }

        if let Some(timeout) = lookup(TIMEOUT_ENV) {
            config.timeout_secs = timeout.trim().parse().map_err(|_| {
                StudioError::config_value_error(TIMEOUT_ENV, &timeout, "positive integer seconds")
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Check the settings for consistency
    ///
    /// # Errors
    /// - `InvalidConfig` describing the first offending field
    pub fn validate(&self) -> Result<()> {
        if self.api_key.is_empty() {
            return Err(StudioError::invalid_config(format!(
                "API key must not be empty (set {API_KEY_ENV} or pass --api-key)"
            )));
        }
        if !(self.endpoint.starts_with("https://") || self.endpoint.starts_with("http://")) {
            return Err(StudioError::invalid_config(format!(
                "Endpoint must be an http(s) URL, got '{}'",
                self.endpoint
            )));
        }
        if self.form_field.trim().is_empty() {
            return Err(StudioError::invalid_config("Form field name must not be empty"));
        }
        if self.timeout_secs == 0 || self.timeout_secs > 3600 {
            return Err(StudioError::config_value_error(
                "timeout_secs",
                self.timeout_secs,
                "1-3600",
            ));
        }
        Ok(())
    }
}

/// Configuration of the image pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Removal service settings
    pub service: ServiceConfig,

    /// Removal calls allowed in flight at once (1 = strictly sequential)
    pub max_concurrent_requests: usize,

    /// Timeout for fetching external background images, in seconds
    pub background_fetch_timeout_secs: u64,

    /// Largest external background image accepted, in bytes
    pub max_background_bytes: u64,

    /// Capacity of the event channel handed to subscribers
    pub event_capacity: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            service: ServiceConfig::default(),
            max_concurrent_requests: 1, // Sequential, matching the service's quota model
            background_fetch_timeout_secs: 30,
            max_background_bytes: 50 * 1024 * 1024,
            event_capacity: 256,
        }
    }
}

impl PipelineConfig {
    /// Create a new configuration builder for fluent API construction
    ///
    /// # Examples
    ///
    /// ```rust
    /// use bgremove_studio::{ApiKey, PipelineConfig};
    ///
    /// let config = PipelineConfig::builder()
    ///     .api_key(ApiKey::new("test-key"))
    ///     .max_concurrent_requests(4)
    ///     .build()
    ///     .unwrap();
    /// assert_eq!(config.max_concurrent_requests, 4);
    /// ```
    #[must_use]
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder::new()
    }

    #[must_use]
    pub fn background_fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.background_fetch_timeout_secs)
    }

    /// Validate the whole configuration
    ///
    /// # Errors
    /// - `InvalidConfig` describing the first offending field
    pub fn validate(&self) -> Result<()> {
        self.service.validate()?;
        if self.max_concurrent_requests == 0 || self.max_concurrent_requests > MAX_CONCURRENT_REQUESTS
        {
            return Err(StudioError::config_value_error(
                "max_concurrent_requests",
                self.max_concurrent_requests,
                "1-32",
            ));
        }
        if self.background_fetch_timeout_secs == 0 {
            return Err(StudioError::config_value_error(
                "background_fetch_timeout_secs",
                self.background_fetch_timeout_secs,
                "1 or more",
            ));
        }
        if self.max_background_bytes == 0 {
            return Err(StudioError::config_value_error(
                "max_background_bytes",
                self.max_background_bytes,
                "1 or more",
            ));
        }
        if self.event_capacity == 0 {
            return Err(StudioError::config_value_error(
                "event_capacity",
                self.event_capacity,
                "1 or more",
            ));
        }
        Ok(())
    }
}

/// Builder for `PipelineConfig`
#[derive(Debug, Default)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from service settings read elsewhere (e.g. [`ServiceConfig::from_env`])
    #[must_use]
    pub fn service(mut self, service: ServiceConfig) -> Self {
        self.config.service = service;
        self
    }

    #[must_use]
    pub fn api_key(mut self, api_key: ApiKey) -> Self {
        self.config.service.api_key = api_key;
        self
    }

    #[must_use]
    pub fn endpoint<S: Into<String>>(mut self, endpoint: S) -> Self {
        self.config.service.endpoint = endpoint.into();
        self
    }

    #[must_use]
    pub fn form_field<S: Into<String>>(mut self, field: S) -> Self {
        self.config.service.form_field = field.into();
        self
    }

    #[must_use]
    pub fn size(mut self, size: Option<String>) -> Self {
        self.config.service.size = size;
        self
    }

    #[must_use]
    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.config.service.timeout_secs = secs;
        self
    }

    #[must_use]
    pub fn max_concurrent_requests(mut self, requests: usize) -> Self {
        self.config.max_concurrent_requests = requests;
        self
    }

    #[must_use]
    pub fn background_fetch_timeout_secs(mut self, secs: u64) -> Self {
        self.config.background_fetch_timeout_secs = secs;
        self
    }

    #[must_use]
    pub fn max_background_bytes(mut self, bytes: u64) -> Self {
        self.config.max_background_bytes = bytes;
        self
    }

    #[must_use]
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.config.event_capacity = capacity;
        self
    }

    /// Build the configuration with validation
    ///
    /// # Errors
    /// - `InvalidConfig` if any value is out of range or the API key is missing
    pub fn build(self) -> Result<PipelineConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
