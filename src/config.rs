//! Configuration types for lxops

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, time::Duration};
use utoipa::ToSchema;

/// Main configuration
///
/// Every section has defaults, so `Config::default()` (or an empty JSON
/// object) yields a working setup.
#[derive(Clone, Debug, Default, Serialize, Deserialize, ToSchema)]
pub struct Config {
    /// REST API configuration
    #[serde(default)]
    pub api: ApiConfig,

    /// Operation registry behaviour
    #[serde(default)]
    pub operations: OperationConfig,

    /// Stream relay tuning
    #[serde(default)]
    pub stream: StreamConfig,

    /// Cancelable download settings
    #[serde(default)]
    pub download: DownloadConfig,
}

impl Config {
    /// Check values that serde cannot reject on its own
    pub fn validate(&self) -> Result<()> {
        if self.stream.read_buffer_size == 0 {
            return Err(Error::Config {
                message: "read buffer size must be greater than zero".to_string(),
                key: Some("stream.read_buffer_size".to_string()),
            });
        }

        if self.stream.channel_depth == 0 {
            return Err(Error::Config {
                message: "channel depth must be greater than zero".to_string(),
                key: Some("stream.channel_depth".to_string()),
            });
        }

        if self.operations.event_buffer == 0 {
            return Err(Error::Config {
                message: "event buffer must be greater than zero".to_string(),
                key: Some("operations.event_buffer".to_string()),
            });
        }

        if self.download.retry.backoff_multiplier < 1.0 {
            return Err(Error::Config {
                message: "backoff multiplier must be at least 1.0".to_string(),
                key: Some("download.retry.backoff_multiplier".to_string()),
            });
        }

        Ok(())
    }
}

/// REST API configuration
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct ApiConfig {
    /// Address to bind to (default: 127.0.0.1:8443)
    #[serde(default = "default_bind_address")]
    pub bind_address: SocketAddr,

    /// Enable CORS for browser access (default: false)
    #[serde(default)]
    pub cors_enabled: bool,

    /// Allowed CORS origins (default: ["*"])
    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,

    /// Enable Swagger UI at /swagger-ui (default: true)
    #[serde(default = "default_true")]
    pub swagger_ui: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            cors_enabled: false,
            cors_origins: default_cors_origins(),
            swagger_ui: true,
        }
    }
}

/// Operation registry configuration
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct OperationConfig {
    /// How long a finished operation stays queryable before removal (default: 5 seconds)
    #[serde(default = "default_retention", with = "duration_serde")]
    pub retention: Duration,

    /// Capacity of the event broadcast channel (default: 1000)
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

impl Default for OperationConfig {
    fn default() -> Self {
        Self {
            retention: default_retention(),
            event_buffer: default_event_buffer(),
        }
    }
}

/// Stream relay configuration
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct StreamConfig {
    /// Size of each bounded read performed by the reader pump (default: 32 KiB)
    #[serde(default = "default_read_buffer_size")]
    pub read_buffer_size: usize,

    /// Number of chunks the reader pump may queue ahead of the consumer (default: 1)
    #[serde(default = "default_channel_depth")]
    pub channel_depth: usize,

    /// How long a session waits for its clients to connect (default: 5 seconds)
    #[serde(default = "default_accept_timeout", with = "duration_serde")]
    pub accept_timeout: Duration,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            read_buffer_size: default_read_buffer_size(),
            channel_depth: default_channel_depth(),
            accept_timeout: default_accept_timeout(),
        }
    }
}

/// Cancelable download configuration
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct DownloadConfig {
    /// User-Agent header sent with downloads
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// TCP connect timeout (default: 30 seconds)
    #[serde(default = "default_connect_timeout", with = "duration_serde")]
    pub connect_timeout: Duration,

    /// Retry configuration for transient failures
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            connect_timeout: default_connect_timeout(),
            retry: RetryConfig::default(),
        }
    }
}

impl DownloadConfig {
    /// Build an HTTP client honouring this configuration
    pub fn build_client(&self) -> Result<reqwest::Client> {
        reqwest::Client::builder()
            .user_agent(self.user_agent.clone())
            .connect_timeout(self.connect_timeout)
            .build()
            .map_err(Error::Network)
    }
}

/// Retry configuration for transient failures
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (default: 3)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial delay before first retry (default: 1 second)
    #[serde(default = "default_initial_delay", with = "duration_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between retries (default: 30 seconds)
    #[serde(default = "default_max_delay", with = "duration_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: true,
        }
    }
}

// Default value functions
fn default_bind_address() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8443))
}

fn default_cors_origins() -> Vec<String> {
    vec!["*".to_string()]
}

fn default_true() -> bool {
    true
}

fn default_retention() -> Duration {
    Duration::from_secs(5)
}

fn default_event_buffer() -> usize {
    1000
}

fn default_read_buffer_size() -> usize {
    32 * 1024
}

fn default_channel_depth() -> usize {
    1
}

fn default_accept_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_user_agent() -> String {
    format!("lxops/{}", env!("CARGO_PKG_VERSION"))
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(30)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

// Duration serialization helper
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
